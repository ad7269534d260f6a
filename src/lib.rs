//! # Tether Protocol
//!
//! A reliable message transport over UDP. One socket, one background
//! thread, any number of peers. It provides:
//!
//! - **Framing**: compact trailing headers, one datagram per packet
//! - **Encryption**: per-peer ChaCha20-Poly1305 once a session key is set
//! - **Reliability**: opt-in per message, with acknowledgment batching and
//!   RTT-adaptive retransmission
//! - **Fragmentation**: transparent for reliable messages beyond the MTU
//! - **Liveness**: ping/pong RTT probes and inactivity teardown
//!
//! Key negotiation is deliberately out of scope: handshake packets travel
//! as opaque [`TransportEvent::Control`] payloads and the application
//! installs the resulting key via [`TransportSocket::set_peer_key`].
//!
//! ## Modules
//!
//! - [`core`]: constants, error types, sequence number space
//! - [`crypto`]: the AEAD session cipher
//! - [`wire`]: packet kinds, flags and the datagram codec
//! - [`reliability`]: retransmission and reassembly state machines
//! - [`transport`]: peers, RTT estimation and the socket event loop
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use tether_protocol::{TransportEvent, TransportSocket};
//!
//! fn main() -> std::io::Result<()> {
//!     let socket = TransportSocket::bind("0.0.0.0:4433")?;
//!     socket.start().expect("transport thread");
//!
//!     let peer = "203.0.113.7:4433".parse().unwrap();
//!     socket.send_reliable(peer, b"hello").expect("queue message");
//!
//!     loop {
//!         match socket.recv_event_timeout(Duration::from_millis(100)) {
//!             Some(TransportEvent::Message { from, payload }) => {
//!                 println!("{from}: {} bytes", payload.len());
//!             }
//!             Some(event) => println!("{event:?}"),
//!             None => {}
//!         }
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;

pub mod crypto;

pub mod wire;

pub mod reliability;

pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::crypto::*;

    pub use crate::transport::*;

    pub use crate::wire::{PacketFlags, PacketKind};
}

// Re-export commonly used items at crate root
pub use crate::core::{TransportError, TransportResult};
pub use crate::crypto::{SessionKey, SESSION_KEY_SIZE};
pub use crate::transport::{Peer, TransportConfig, TransportEvent, TransportSocket};
pub use crate::wire::{PacketFlags, PacketKind};
