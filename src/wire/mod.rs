//! Tether Protocol - Wire Layer
//!
//! Bit-exact packet format handling:
//!
//! - **Scalars**: [`bytes`] little-endian helpers
//! - **Vocabulary**: [`PacketKind`], [`PacketFlags`], [`ReliableHeader`]
//! - **Codec**: [`encode_packet`] / [`decode_packet`] with the AEAD envelope
//!
//! The header grows backward from the end of the datagram: the kind byte is
//! always last, which lets a receiver classify a packet from its final byte
//! alone and keeps the payload at a fixed front offset for zero-shift
//! fragmentation.

pub mod bytes;
pub mod codec;
pub mod packet;

pub use codec::{decode_packet, encode_packet, DecodedPacket, WireError};
pub use packet::{PacketFlags, PacketKind, ReliableHeader};
