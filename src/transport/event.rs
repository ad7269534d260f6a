//! Events surfaced by the transport event loop.

use std::net::SocketAddr;

use crate::wire::packet::PacketKind;

/// Event from the transport.
///
/// Drained via [`poll_event`](crate::transport::TransportSocket::poll_event) or
/// [`recv_event_timeout`](crate::transport::TransportSocket::recv_event_timeout).
#[derive(Debug)]
pub enum TransportEvent {
    /// A datagram arrived from an address we had no peer for.
    ///
    /// The peer is already registered; this is informational so the
    /// application can attach a session key or adjust the MTU.
    PeerConnected {
        /// The new peer's address.
        addr: SocketAddr,
    },

    /// An application message was delivered, reassembled if it was
    /// fragmented and deduplicated if it was retransmitted.
    Message {
        /// Sender address.
        from: SocketAddr,
        /// The message payload.
        payload: Vec<u8>,
    },

    /// A handshake control packet arrived. The transport carries these
    /// without interpreting them; key negotiation happens above.
    Control {
        /// Sender address.
        from: SocketAddr,
        /// Which control packet this is.
        kind: PacketKind,
        /// The control payload.
        payload: Vec<u8>,
    },

    /// Nothing was heard from the peer for the dead interval. Its state
    /// has been dropped.
    PeerTimedOut {
        /// The silent peer's address.
        addr: SocketAddr,
    },

    /// A reliable packet ran out of retransmission attempts. The peer's
    /// state has been dropped.
    PeerUnreachable {
        /// The unreachable peer's address.
        addr: SocketAddr,
    },

    /// The socket failed in a way the loop cannot recover from; the loop
    /// has stopped.
    Fatal(std::io::Error),
}
