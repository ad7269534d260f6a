//! Tether Protocol - Crypto Layer
//!
//! The AEAD envelope applied to encrypted packets. The transport never
//! negotiates keys; a handshake running over the control kinds installs
//! them per peer, after which message packets are sealed with
//! ChaCha20-Poly1305:
//!
//! - **Keys**: [`SessionKey`] (32 bytes, zeroized on drop)
//! - **Envelope**: [`SessionCrypto`] detached-tag seal/open with the packet
//!   trailer as associated data

mod session;

pub use session::{SessionCrypto, SessionKey, SESSION_KEY_SIZE};
