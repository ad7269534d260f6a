//! Reliability layer: retransmission and reassembly.
//!
//! Reliable delivery is symmetric around the sequence number:
//!
//! - **Send side**: [`RetransmitBuffer`] keeps every unacknowledged wire
//!   image and schedules retransmissions with exponential backoff derived
//!   from the peer's RTT estimate via [`retransmit_timeout`].
//! - **Receive side**: [`ReassemblyBuffer`] deduplicates sequences,
//!   reassembles fragmented messages and queues acknowledgment batches.
//!
//! Both sides are plain state machines driven by the transport event loop;
//! neither owns a socket or a clock.

mod incoming;
mod outgoing;

pub use incoming::ReassemblyBuffer;
pub use outgoing::{retransmit_timeout, RetransmitBuffer, TickOutcome};
