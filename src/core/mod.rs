//! Tether Protocol - Core Layer
//!
//! Constants, error types and the sequence-number service shared by the
//! wire, reliability and transport layers:
//!
//! - **Constants**: wire sizes, budgets and timing defaults
//! - **Errors**: [`CryptoError`], [`TransportError`], [`TransportResult`]
//! - **Sequencing**: [`SequenceSpace`] issuance and wraparound ordering

pub mod constants;
mod error;
mod sequence;

pub use constants::*;
pub use error::{CryptoError, TransportError, TransportResult};
pub use sequence::SequenceSpace;
