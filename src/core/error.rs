//! Error types for the Tether protocol.

use thiserror::Error;

use crate::wire::codec::WireError;
use crate::wire::packet::PacketKind;

/// Errors in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,
}

/// Top-level transport errors surfaced to the application.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Wire format error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Message rejected at send time: it cannot fit the peer's budget.
    #[error("message of {len} bytes exceeds the {max}-byte budget")]
    Oversized {
        /// Message length requested.
        len: usize,
        /// Largest length the peer's MTU and flags allow.
        max: usize,
    },

    /// The kind passed to a control send is not a control kind.
    #[error("not a control kind: {0:?}")]
    NotControlKind(PacketKind),

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
