//! Transport layer: peers, timing and the socket event loop.
//!
//! This is the layer applications talk to. It provides:
//!
//! - **Peer handles**: [`Peer`] with per-endpoint MTU and session crypto
//! - **RTT estimation**: [`RttEstimator`] fed by the ping/pong probes
//! - **The socket**: [`TransportSocket`] owning the UDP handle and the
//!   background event loop, configured via [`TransportConfig`]
//! - **Events**: [`TransportEvent`] carrying everything the loop learns
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Application                   │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   peers, RTT, event loop, events        │
//! ├─────────────────────────────────────────┤
//! │   Reliability / Wire / Crypto           │
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```

mod event;
mod peer;
mod rtt;
mod socket;

pub use event::TransportEvent;
pub use peer::Peer;
pub use rtt::RttEstimator;
pub use socket::{TransportConfig, TransportSocket};
