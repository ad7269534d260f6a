//! Shared per-endpoint state.
//!
//! A [`Peer`] is the handle both sides of the API hold: the application
//! keeps one to adjust the MTU or install a session key, the event loop
//! keeps one inside its session table. Everything mutable is therefore
//! atomic or behind a lock, and the reliability state (which only the
//! loop touches) lives elsewhere.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::constants::{
    AEAD_ENVELOPE_SIZE, MAX_FRAGMENTS, MIN_MTU, RELIABLE_HEADER_SIZE, UNRELIABLE_HEADER_SIZE,
};
use crate::core::{SequenceSpace, TransportError, TransportResult};
use crate::crypto::{SessionCrypto, SessionKey};
use crate::wire::codec::{decode_packet, encode_packet, DecodedPacket, WireError};
use crate::wire::packet::{PacketKind, ReliableHeader};

/// A remote endpoint, identified by its socket address.
pub struct Peer {
    addr: SocketAddr,
    /// Post-header payload budget source; adjustable at runtime.
    mtu: AtomicU16,
    /// Session cipher, installed once key negotiation above us finishes.
    crypto: Mutex<Option<SessionCrypto>>,
}

impl Peer {
    pub(crate) fn new(addr: SocketAddr, mtu: u16) -> Self {
        Self {
            addr,
            mtu: AtomicU16::new(mtu.max(MIN_MTU)),
            crypto: Mutex::new(None),
        }
    }

    /// The peer's socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current MTU in bytes. Packets are sized to never exceed this.
    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Relaxed)
    }

    /// Adjust the MTU, clamped to [`MIN_MTU`].
    pub fn set_mtu(&self, mtu: u16) {
        self.mtu.store(mtu.max(MIN_MTU), Ordering::Relaxed);
    }

    /// Install the session key. Message packets to and from this peer are
    /// encrypted from here on.
    pub fn set_session_key(&self, key: &SessionKey) {
        *self.lock_crypto() = Some(SessionCrypto::new(key));
    }

    /// Whether a session key has been installed.
    pub fn has_session_key(&self) -> bool {
        self.lock_crypto().is_some()
    }

    /// Largest message payload a single packet to this peer can carry.
    pub fn max_payload(&self, reliable: bool) -> usize {
        let header = if reliable {
            RELIABLE_HEADER_SIZE
        } else {
            UNRELIABLE_HEADER_SIZE
        };
        Self::budget(self.mtu(), header, self.has_session_key())
    }

    /// Encode one unreliable message packet, encrypted if keys are
    /// installed. Oversized payloads are rejected synchronously.
    pub(crate) fn encode_unreliable(&self, payload: &[u8]) -> TransportResult<Vec<u8>> {
        let crypto = self.lock_crypto();
        let max = Self::budget(self.mtu(), UNRELIABLE_HEADER_SIZE, crypto.is_some());
        if payload.len() > max {
            return Err(TransportError::Oversized {
                len: payload.len(),
                max,
            });
        }
        Ok(encode_packet(PacketKind::Message, None, payload, crypto.as_ref())?)
    }

    /// Encode a reliable message as one packet, or as a fragment set
    /// carrying a consecutive sequence block when it exceeds the MTU.
    pub(crate) fn encode_reliable(
        &self,
        sequences: &SequenceSpace,
        payload: &[u8],
    ) -> TransportResult<Vec<(i32, Vec<u8>)>> {
        let crypto = self.lock_crypto();
        let capacity = Self::budget(self.mtu(), RELIABLE_HEADER_SIZE, crypto.is_some());

        if payload.len() <= capacity {
            let sequence = sequences.next();
            let header = ReliableHeader::single(sequence, payload.len() as u16);
            let wire = encode_packet(PacketKind::Message, Some(&header), payload, crypto.as_ref())?;
            return Ok(vec![(sequence, wire)]);
        }

        // total_len is a u16 on the wire and the fragment count a single
        // sequence block; whichever is tighter bounds the message.
        let max = usize::min(u16::MAX as usize, capacity * MAX_FRAGMENTS);
        if payload.len() > max {
            return Err(TransportError::Oversized {
                len: payload.len(),
                max,
            });
        }

        let count = payload.len().div_ceil(capacity);
        let base = sequences.next_block(count);
        let mut packets = Vec::with_capacity(count);
        for index in 0..count {
            let offset = index * capacity;
            let end = usize::min(offset + capacity, payload.len());
            let header = ReliableHeader {
                sequence: base.wrapping_add(index as i32),
                total_len: payload.len() as u16,
                offset: offset as u16,
            };
            let wire = encode_packet(
                PacketKind::Fragment,
                Some(&header),
                &payload[offset..end],
                crypto.as_ref(),
            )?;
            packets.push((header.sequence, wire));
        }
        Ok(packets)
    }

    /// Encode a packet that is never encrypted and never reliable: pings,
    /// pongs, ack batches and the handshake control kinds.
    pub(crate) fn encode_plain(
        &self,
        kind: PacketKind,
        payload: &[u8],
    ) -> TransportResult<Vec<u8>> {
        let max = Self::budget(self.mtu(), UNRELIABLE_HEADER_SIZE, false);
        if payload.len() > max {
            return Err(TransportError::Oversized {
                len: payload.len(),
                max,
            });
        }
        Ok(encode_packet(kind, None, payload, None)?)
    }

    /// Decode one datagram from this peer under the crypto lock.
    pub(crate) fn decode(&self, datagram: &[u8]) -> Result<DecodedPacket, WireError> {
        let crypto = self.lock_crypto();
        decode_packet(datagram, crypto.as_ref())
    }

    /// Stride a fragmented message to this peer is sliced with. Receivers
    /// derive the same value from their own MTU and the packet's
    /// encryption flag to locate a fragment's set.
    pub(crate) fn fragment_capacity(&self, encrypted: bool) -> usize {
        Self::budget(self.mtu(), RELIABLE_HEADER_SIZE, encrypted)
    }

    fn budget(mtu: u16, header: usize, encrypted: bool) -> usize {
        let envelope = if encrypted { AEAD_ENVELOPE_SIZE } else { 0 };
        mtu as usize - header - envelope
    }

    fn lock_crypto(&self) -> MutexGuard<'_, Option<SessionCrypto>> {
        // The cipher handle stays valid even if a holder panicked.
        self.crypto.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("addr", &self.addr)
            .field("mtu", &self.mtu())
            .field("encrypted", &self.has_session_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::core::constants::DEFAULT_MTU;
    use crate::reliability::ReassemblyBuffer;

    fn peer() -> Peer {
        Peer::new("127.0.0.1:4433".parse().unwrap(), DEFAULT_MTU)
    }

    fn key() -> SessionKey {
        SessionKey::from_bytes([7; 32])
    }

    #[test]
    fn test_mtu_defaults_and_clamps() {
        let peer = peer();
        assert_eq!(peer.mtu(), DEFAULT_MTU);

        peer.set_mtu(10);
        assert_eq!(peer.mtu(), MIN_MTU);

        peer.set_mtu(1500);
        assert_eq!(peer.mtu(), 1500);
    }

    #[test]
    fn test_max_payload_accounts_for_keys() {
        let peer = peer();
        assert_eq!(peer.max_payload(false), 1023);
        assert_eq!(peer.max_payload(true), 1015);

        peer.set_session_key(&key());
        assert_eq!(peer.max_payload(false), 995);
        assert_eq!(peer.max_payload(true), 987);
    }

    #[test]
    fn test_unreliable_roundtrip_encrypted() {
        let sender = peer();
        let receiver = peer();
        sender.set_session_key(&key());
        receiver.set_session_key(&key());

        let wire = sender.encode_unreliable(b"status").unwrap();
        let packet = receiver.decode(&wire).unwrap();
        assert_eq!(packet.kind, PacketKind::Message);
        assert!(packet.flags.is_encrypted());
        assert!(!packet.flags.is_reliable());
        assert!(packet.header.is_none());
        assert_eq!(packet.payload, b"status");
    }

    #[test]
    fn test_unreliable_oversized_rejected() {
        let peer = peer();
        let max = peer.max_payload(false);
        let err = peer.encode_unreliable(&vec![0; max + 1]).unwrap_err();
        match err {
            TransportError::Oversized { len, max: limit } => {
                assert_eq!(len, max + 1);
                assert_eq!(limit, max);
            }
            other => panic!("expected Oversized, got {other:?}"),
        }
    }

    #[test]
    fn test_reliable_single_packet_when_it_fits() {
        let peer = peer();
        let sequences = SequenceSpace::new();

        let packets = peer.encode_reliable(&sequences, b"hello").unwrap();
        assert_eq!(packets.len(), 1);
        let (sequence, wire) = &packets[0];
        assert_ne!(*sequence, 0);

        let packet = peer.decode(wire).unwrap();
        assert_eq!(packet.kind, PacketKind::Message);
        let header = packet.header.unwrap();
        assert_eq!(header.sequence, *sequence);
        assert_eq!(header.total_len, 5);
        assert_eq!(header.offset, 0);
    }

    #[test]
    fn test_reliable_fragments_carry_consecutive_sequences() {
        let peer = peer();
        peer.set_mtu(MIN_MTU);
        let capacity = peer.max_payload(true);
        assert_eq!(capacity, 55);

        let sequences = SequenceSpace::new();
        let message: Vec<u8> = (0..150u8).collect();
        let packets = peer.encode_reliable(&sequences, &message).unwrap();
        assert_eq!(packets.len(), 3);

        let base = packets[0].0;
        let mut reassembly = ReassemblyBuffer::new();
        let mut delivered = None;
        for (index, (sequence, wire)) in packets.iter().enumerate() {
            assert_eq!(*sequence, base.wrapping_add(index as i32));
            let packet = peer.decode(wire).unwrap();
            assert_eq!(packet.kind, PacketKind::Fragment);
            let header = packet.header.unwrap();
            assert_eq!(header.total_len, 150);
            assert_eq!(header.offset as usize, index * capacity);
            delivered = delivered.or(reassembly.on_fragment(
                &header,
                packet.payload,
                capacity,
                Instant::now(),
            ));
        }
        assert_eq!(delivered, Some(message));
    }

    #[test]
    fn test_reliable_fragments_encrypted() {
        let sender = peer();
        let receiver = peer();
        sender.set_mtu(MIN_MTU);
        receiver.set_mtu(MIN_MTU);
        sender.set_session_key(&key());
        receiver.set_session_key(&key());
        let capacity = receiver.max_payload(true);
        assert_eq!(capacity, 27);

        let sequences = SequenceSpace::new();
        let message = vec![0xC4; 60];
        let packets = sender.encode_reliable(&sequences, &message).unwrap();
        assert_eq!(packets.len(), 3);

        let mut reassembly = ReassemblyBuffer::new();
        let mut delivered = None;
        for (_, wire) in &packets {
            assert!(wire.len() <= MIN_MTU as usize);
            let packet = receiver.decode(wire).unwrap();
            assert!(packet.flags.is_encrypted());
            let header = packet.header.unwrap();
            delivered = delivered.or(reassembly.on_fragment(
                &header,
                packet.payload,
                capacity,
                Instant::now(),
            ));
        }
        assert_eq!(delivered, Some(message));
    }

    #[test]
    fn test_reliable_oversized_rejected() {
        let peer = peer();
        peer.set_mtu(MIN_MTU);
        // 55 bytes per fragment, at most 255 fragments.
        let max = 55 * 255;
        let sequences = SequenceSpace::new();

        assert!(peer.encode_reliable(&sequences, &vec![0; max]).is_ok());
        let err = peer
            .encode_reliable(&sequences, &vec![0; max + 1])
            .unwrap_err();
        assert!(matches!(err, TransportError::Oversized { max: 14025, .. }));
    }

    #[test]
    fn test_plain_packets_bypass_session_crypto() {
        let sender = peer();
        let receiver = peer();
        // Only the sender holds a key; a plain packet must still decode.
        sender.set_session_key(&key());

        let wire = sender
            .encode_plain(PacketKind::Ping, &42u64.to_le_bytes())
            .unwrap();
        let packet = receiver.decode(&wire).unwrap();
        assert_eq!(packet.kind, PacketKind::Ping);
        assert!(!packet.flags.is_encrypted());
        assert_eq!(packet.payload, 42u64.to_le_bytes());
    }
}
