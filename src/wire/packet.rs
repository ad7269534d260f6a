//! Packet kinds, flag bits and the reliable trailer.
//!
//! Every datagram ends in a single kind byte: the low nibble names the base
//! kind, the high nibble carries flag bits. Reliable packets additionally
//! carry an 8-byte trailer immediately before the kind byte, so the header
//! grows backward from the end of the datagram and the payload always
//! starts at a fixed offset from the front.

/// Base packet kinds (low nibble of the kind byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Certificate transfer (handshake boundary).
    Certificate = 0x01,
    /// Request for the peer's certificate.
    CertificateRequest = 0x02,
    /// Key exchange material (handshake boundary).
    KeyExchange = 0x03,
    /// Request for key exchange material.
    KeyExchangeRequest = 0x04,
    /// MTU probe (discovery boundary).
    MtuProbe = 0x05,
    /// RTT probe carrying the sender's monotonic timestamp.
    Ping = 0x06,
    /// RTT probe reply, echoing the ping payload verbatim.
    Pong = 0x07,
    /// Application message carried whole in one packet.
    Message = 0x08,
    /// One fragment of an application message spanning several packets.
    Fragment = 0x09,
    /// Batch of reliable-sequence acknowledgments.
    AckBatch = 0x0A,
}

impl PacketKind {
    /// Parse a base kind from the low nibble of a kind byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte & PacketFlags::KIND_MASK {
            0x01 => Some(Self::Certificate),
            0x02 => Some(Self::CertificateRequest),
            0x03 => Some(Self::KeyExchange),
            0x04 => Some(Self::KeyExchangeRequest),
            0x05 => Some(Self::MtuProbe),
            0x06 => Some(Self::Ping),
            0x07 => Some(Self::Pong),
            0x08 => Some(Self::Message),
            0x09 => Some(Self::Fragment),
            0x0A => Some(Self::AckBatch),
            _ => None,
        }
    }

    /// The base kind's byte value (flag bits clear).
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Kinds owned by out-of-scope collaborators (handshake, MTU discovery).
    /// The transport surfaces them to the application instead of consuming
    /// them.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::Certificate
                | Self::CertificateRequest
                | Self::KeyExchange
                | Self::KeyExchangeRequest
                | Self::MtuProbe
        )
    }
}

/// Flag bits carried in the high nibble of the kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// Mask selecting the base kind.
    pub const KIND_MASK: u8 = 0x0F;
    /// Mask selecting the flag bits.
    pub const FLAG_MASK: u8 = 0xF0;

    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Payload is wrapped in the AEAD envelope.
    pub const ENCRYPTED: Self = Self(0x80);
    /// Packet carries the reliable trailer and must be acknowledged.
    pub const RELIABLE: Self = Self(0x40);
    /// Reserved for ordered delivery. Never set by this transport.
    pub const ORDERED: Self = Self(0x20);
    /// Reserved for an application header. Never set by this transport.
    pub const APP_HEADER: Self = Self(0x10);

    /// Extract the flag bits from a raw kind byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte & Self::FLAG_MASK)
    }

    /// Get the raw flag bits.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if the ENCRYPTED bit is set.
    pub fn is_encrypted(self) -> bool {
        self.0 & Self::ENCRYPTED.0 != 0
    }

    /// Check if the RELIABLE bit is set.
    pub fn is_reliable(self) -> bool {
        self.0 & Self::RELIABLE.0 != 0
    }

    /// Set the ENCRYPTED bit.
    pub fn with_encrypted(self) -> Self {
        Self(self.0 | Self::ENCRYPTED.0)
    }

    /// Set the RELIABLE bit.
    pub fn with_reliable(self) -> Self {
        Self(self.0 | Self::RELIABLE.0)
    }
}

/// Reliable trailer fields, written immediately before the kind byte.
///
/// Wire order (little-endian, ascending offsets):
/// ```text
/// +------------------+------------------+------------------+--------+
/// | Sequence         | Total Length     | Fragment Offset  | Kind   |
/// | 4 bytes (LE i32) | 2 bytes (LE u16) | 2 bytes (LE u16) | 1 byte |
/// +------------------+------------------+------------------+--------+
/// ```
///
/// A whole-message packet carries `offset == 0` and a payload of exactly
/// `total_len` bytes. A fragment covers `[offset, offset + len)` of the
/// reassembled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReliableHeader {
    /// Sequence number of this packet. Never 0.
    pub sequence: i32,
    /// Length of the complete message being carried.
    pub total_len: u16,
    /// Byte offset of this packet's payload within the complete message.
    pub offset: u16,
}

impl ReliableHeader {
    /// Header for a message carried whole in one packet.
    pub fn single(sequence: i32, total_len: u16) -> Self {
        Self {
            sequence,
            total_len,
            offset: 0,
        }
    }
}
