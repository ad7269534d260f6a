//! Packet encoding and decoding.
//!
//! The codec owns the backward-growing layout: every datagram ends in the
//! kind byte, reliable packets put their 8 trailer bytes just before it,
//! and encrypted packets start with the 28-byte AEAD envelope:
//!
//! ```text
//! [ IV (12) | tag (16) ]? [ payload ] [ seq (4) | total (2) | offset (2) ]? [ kind (1) ]
//! ```
//!
//! The plaintext trailer (including the kind byte) is the AEAD associated
//! data, so flag bits and reliable fields cannot be forged on an encrypted
//! packet. Trailer fields are written before sealing; retransmissions reuse
//! the encoded buffer and never re-encrypt.

use thiserror::Error;

use crate::core::constants::{
    AEAD_ENVELOPE_SIZE, AEAD_IV_SIZE, AEAD_TAG_SIZE, RELIABLE_HEADER_SIZE, UNRELIABLE_HEADER_SIZE,
};
use crate::crypto::SessionCrypto;
use crate::wire::bytes;
use crate::wire::packet::{PacketFlags, PacketKind, ReliableHeader};

/// Errors raised while encoding or decoding a packet.
#[derive(Debug, Error)]
pub enum WireError {
    /// Datagram shorter than its headers require.
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum size the kind byte implies.
        expected: usize,
        /// Actual datagram size.
        actual: usize,
    },

    /// Unknown base kind in the kind byte.
    #[error("invalid packet kind: 0x{0:02x}")]
    InvalidKind(u8),

    /// Reliable trailer carries the unset sequence sentinel.
    #[error("reliable packet with sequence 0")]
    SequenceZero,

    /// Payload length contradicts the reliable trailer.
    #[error("payload length mismatch: trailer declares {declared}, got {actual}")]
    LengthMismatch {
        /// Length the trailer declares.
        declared: usize,
        /// Length actually present.
        actual: usize,
    },

    /// Payload cannot be represented in the 16-bit total length field.
    #[error("payload of {len} bytes exceeds the 16-bit length field")]
    PayloadTooLarge {
        /// Payload length requested.
        len: usize,
    },

    /// Fragment kind without the RELIABLE bit has no identity.
    #[error("fragment packet without RELIABLE flag")]
    UnreliableFragment,

    /// Encrypted packet arrived but no session key is installed.
    #[error("encrypted packet without a session key")]
    MissingSessionKey,

    /// AEAD tag verification failed.
    #[error("packet authentication failed")]
    AuthenticationFailed,

    /// AEAD sealing failed.
    #[error("packet encryption failed")]
    EncryptionFailed,
}

/// A decoded datagram.
#[derive(Debug)]
pub struct DecodedPacket {
    /// Base kind.
    pub kind: PacketKind,
    /// Flag bits, including reserved bits, as received.
    pub flags: PacketFlags,
    /// Reliable trailer, present iff the RELIABLE bit is set.
    pub header: Option<ReliableHeader>,
    /// Decrypted payload bytes.
    pub payload: Vec<u8>,
}

/// Encode one packet into a fresh datagram buffer.
///
/// The RELIABLE bit is derived from `header`, the ENCRYPTED bit from
/// `crypto`. Budget enforcement against the peer's MTU happens in the peer
/// layer; the codec only rejects payloads the length field cannot express.
pub fn encode_packet(
    kind: PacketKind,
    header: Option<&ReliableHeader>,
    payload: &[u8],
    crypto: Option<&SessionCrypto>,
) -> Result<Vec<u8>, WireError> {
    if payload.len() > u16::MAX as usize {
        return Err(WireError::PayloadTooLarge { len: payload.len() });
    }
    if kind == PacketKind::Fragment && header.is_none() {
        return Err(WireError::UnreliableFragment);
    }
    if let (PacketKind::Message, Some(h)) = (kind, header) {
        debug_assert_eq!(h.offset, 0);
        debug_assert_eq!(h.total_len as usize, payload.len());
    }

    let trailer = match header {
        Some(_) => RELIABLE_HEADER_SIZE,
        None => UNRELIABLE_HEADER_SIZE,
    };
    let envelope = match crypto {
        Some(_) => AEAD_ENVELOPE_SIZE,
        None => 0,
    };
    let size = envelope + payload.len() + trailer;
    let mut buf = vec![0u8; size];

    let mut kind_byte = kind.as_byte();
    if header.is_some() {
        kind_byte |= PacketFlags::RELIABLE.as_byte();
    }
    if crypto.is_some() {
        kind_byte |= PacketFlags::ENCRYPTED.as_byte();
    }
    buf[size - 1] = kind_byte;

    if let Some(h) = header {
        debug_assert_ne!(h.sequence, 0);
        bytes::put_i32_le(&mut buf, size - RELIABLE_HEADER_SIZE, h.sequence);
        bytes::put_u16_le(&mut buf, size - 5, h.total_len);
        bytes::put_u16_le(&mut buf, size - 3, h.offset);
    }

    match crypto {
        None => buf[..payload.len()].copy_from_slice(payload),
        Some(crypto) => {
            // The trailer must be final before sealing: it is the AAD.
            let (front, aad) = buf.split_at_mut(size - trailer);
            front[AEAD_ENVELOPE_SIZE..].copy_from_slice(payload);

            let iv = SessionCrypto::generate_iv();
            let (envelope, data) = front.split_at_mut(AEAD_ENVELOPE_SIZE);
            let tag = crypto
                .seal_detached(&iv, aad, data)
                .map_err(|_| WireError::EncryptionFailed)?;
            envelope[..AEAD_IV_SIZE].copy_from_slice(&iv);
            envelope[AEAD_IV_SIZE..].copy_from_slice(&tag);
        }
    }

    Ok(buf)
}

/// Decode one received datagram.
///
/// Fails closed: any structural violation or failed tag check rejects the
/// whole datagram. `crypto` is consulted only when the ENCRYPTED bit is set.
pub fn decode_packet(
    datagram: &[u8],
    crypto: Option<&SessionCrypto>,
) -> Result<DecodedPacket, WireError> {
    let len = datagram.len();
    if len == 0 {
        return Err(WireError::Truncated {
            expected: UNRELIABLE_HEADER_SIZE,
            actual: 0,
        });
    }

    let kind_byte = datagram[len - 1];
    let kind = PacketKind::from_byte(kind_byte).ok_or(WireError::InvalidKind(kind_byte))?;
    let flags = PacketFlags::from_byte(kind_byte);

    let trailer = if flags.is_reliable() {
        RELIABLE_HEADER_SIZE
    } else {
        UNRELIABLE_HEADER_SIZE
    };
    let envelope = if flags.is_encrypted() {
        AEAD_ENVELOPE_SIZE
    } else {
        0
    };
    let min_size = trailer + envelope;
    if len < min_size {
        return Err(WireError::Truncated {
            expected: min_size,
            actual: len,
        });
    }

    let header = if flags.is_reliable() {
        // In bounds after the min_size check; Truncated is unreachable here.
        let short = || WireError::Truncated {
            expected: min_size,
            actual: len,
        };
        let sequence =
            bytes::get_i32_le(datagram, len - RELIABLE_HEADER_SIZE).ok_or_else(short)?;
        let total_len = bytes::get_u16_le(datagram, len - 5).ok_or_else(short)?;
        let offset = bytes::get_u16_le(datagram, len - 3).ok_or_else(short)?;
        if sequence == 0 {
            return Err(WireError::SequenceZero);
        }
        Some(ReliableHeader {
            sequence,
            total_len,
            offset,
        })
    } else {
        None
    };

    if kind == PacketKind::Fragment && header.is_none() {
        return Err(WireError::UnreliableFragment);
    }

    let body = &datagram[..len - trailer];
    let payload = if flags.is_encrypted() {
        let Some(crypto) = crypto else {
            return Err(WireError::MissingSessionKey);
        };
        let mut iv = [0u8; AEAD_IV_SIZE];
        iv.copy_from_slice(&body[..AEAD_IV_SIZE]);
        let mut tag = [0u8; AEAD_TAG_SIZE];
        tag.copy_from_slice(&body[AEAD_IV_SIZE..AEAD_ENVELOPE_SIZE]);

        let mut data = body[AEAD_ENVELOPE_SIZE..].to_vec();
        let aad = &datagram[len - trailer..];
        crypto
            .open_detached(&iv, &tag, aad, &mut data)
            .map_err(|_| WireError::AuthenticationFailed)?;
        data
    } else {
        body.to_vec()
    };

    if let Some(h) = &header {
        let declared = h.total_len as usize;
        match kind {
            PacketKind::Message => {
                if h.offset != 0 || declared != payload.len() {
                    return Err(WireError::LengthMismatch {
                        declared,
                        actual: payload.len(),
                    });
                }
            }
            PacketKind::Fragment => {
                if payload.is_empty() || (h.offset as usize) + payload.len() > declared {
                    return Err(WireError::LengthMismatch {
                        declared,
                        actual: payload.len(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(DecodedPacket {
        kind,
        flags,
        header,
        payload,
    })
}
