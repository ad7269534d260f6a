//! Protocol constants.
//!
//! These values are fixed by the wire format and MUST NOT be changed;
//! the timing values are the defaults behind
//! [`TransportConfig`](crate::transport::TransportConfig).

use std::time::Duration;

// =============================================================================
// WIRE SIZES
// =============================================================================

/// AEAD initialization vector size (ChaCha20-Poly1305 nonce).
pub const AEAD_IV_SIZE: usize = 12;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// Encryption envelope prefix (IV followed by tag).
pub const AEAD_ENVELOPE_SIZE: usize = AEAD_IV_SIZE + AEAD_TAG_SIZE;

/// Header of an unreliable packet: the trailing kind byte only.
pub const UNRELIABLE_HEADER_SIZE: usize = 1;

/// Header of a reliable packet, trailing the payload: sequence (4) +
/// total length (2) + fragment offset (2) + kind byte (1).
pub const RELIABLE_HEADER_SIZE: usize = 9;

// =============================================================================
// BUDGETS
// =============================================================================

/// Per-peer MTU until adjusted via [`Peer::set_mtu`](crate::transport::Peer::set_mtu).
pub const DEFAULT_MTU: u16 = 1024;

/// Smallest accepted MTU; keeps every header/envelope combination sendable.
pub const MIN_MTU: u16 = 64;

/// Staging buffer for a single received datagram.
pub const RECV_BUFFER_SIZE: usize = 65535;

/// Largest fragment count a single reliable message may span.
pub const MAX_FRAGMENTS: usize = 255;

// =============================================================================
// EVENT LOOP
// =============================================================================

/// Datagrams drained from the socket per loop iteration.
pub const RECV_BATCH: usize = 16;

/// Outbound queue entries drained per loop iteration.
pub const SEND_BATCH: usize = 16;

/// Retransmissions issued per peer per loop iteration.
pub const RETRANSMIT_BATCH: usize = 16;

/// Sleep between loop iterations when neither direction had work.
pub const IDLE_SLEEP: Duration = Duration::from_millis(1);

// =============================================================================
// TIMING - RELIABILITY
// =============================================================================

/// RTT multiplier for the base retransmission timeout.
pub const RTO_MULTIPLIER: u32 = 4;

/// Retransmit backoff multiplier per attempt.
pub const RETRANSMIT_BACKOFF: u32 = 2;

/// Minimum retransmission timeout.
pub const MIN_RTO: Duration = Duration::from_millis(100);

/// Maximum retransmission timeout.
pub const MAX_RTO: Duration = Duration::from_millis(60000);

/// Maximum retransmission attempts before declaring the peer unreachable.
pub const MAX_RETRANSMITS: u32 = 10;

/// Interval between RTT probe pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(1);

/// Consider a peer dead after this long without any datagram from it.
pub const DEAD_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// RTT ESTIMATION
// =============================================================================

/// Number of samples in the RTT ring.
pub const RTT_WINDOW: usize = 16;

/// Initial value of every RTT ring slot, in microseconds.
pub const INITIAL_RTT_MICROS: u32 = 50;

// =============================================================================
// SEQUENCE SPACE
// =============================================================================

/// Distance from either end of the sequence range within which wraparound
/// comparison applies.
pub const SEQUENCE_WRAP_MARGIN: i32 = 1 << 30;

/// How long an accepted reliable sequence is remembered for deduplication.
///
/// Covers a full retransmit lifetime: [`MAX_RETRANSMITS`] + 1 backoff
/// intervals at the [`MAX_RTO`] ceiling. A transport configured with a
/// larger retransmit budget needs a proportionally larger retention.
pub const DEDUP_RETENTION: Duration = Duration::from_secs(660);

/// Upper bound on fragment sets a peer may hold in progress.
pub const MAX_PENDING_MESSAGES: usize = 64;
