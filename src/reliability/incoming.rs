//! Receive-side deduplication, reassembly and acknowledgment queueing.
//!
//! Reliable packets are deduplicated by sequence number against the exact
//! set of sequences accepted recently. A sender stops retransmitting once
//! its retry budget is spent, so entries older than
//! [`DEDUP_RETENTION`](crate::core::constants::DEDUP_RETENTION) are pruned;
//! the set's memory is bounded by the arrival rate over that span.
//! Fragments locate their set through the block-allocation contract: the
//! fragments of one message carry consecutive sequence numbers in offset
//! order, so `offset / capacity` recovers the index and `sequence - index`
//! the base that keys the set.
//!
//! Accepted and duplicate packets queue their sequence for the next ack
//! batch. Malformed fragments are dropped without an ack so an honest
//! sender keeps retransmitting rather than retiring data we discarded.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::core::constants::{DEDUP_RETENTION, MAX_FRAGMENTS, MAX_PENDING_MESSAGES};
use crate::core::SequenceSpace;
use crate::wire::packet::ReliableHeader;

/// Reassembly state for one fragmented message.
#[derive(Debug)]
struct PendingMessage {
    total_len: usize,
    count: usize,
    received: usize,
    slots: Vec<Option<Vec<u8>>>,
}

impl PendingMessage {
    fn new(total_len: usize, count: usize) -> Self {
        Self {
            total_len,
            count,
            received: 0,
            slots: vec![None; count],
        }
    }
}

/// Per-peer receive state for reliable packets.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    /// Accepted sequences and when they arrived.
    seen: HashMap<i32, Instant>,
    /// Arrival log of `seen`, oldest first, driving retention pruning.
    arrivals: VecDeque<(Instant, i32)>,
    pending: HashMap<i32, PendingMessage>,
    ack_queue: Vec<i32>,
}

impl ReassemblyBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a whole-message reliable packet. Returns the payload on first
    /// arrival, `None` for duplicates. Either way the sequence is queued
    /// for acknowledgment.
    pub fn on_message(
        &mut self,
        header: &ReliableHeader,
        payload: Vec<u8>,
        now: Instant,
    ) -> Option<Vec<u8>> {
        let sequence = header.sequence;
        self.ack_queue.push(sequence);
        if self.is_seen(sequence) {
            return None;
        }
        self.record(sequence, now);
        Some(payload)
    }

    /// Handle one fragment. `capacity` is the stride the sender used, i.e.
    /// this receiver's payload budget for reliable packets with the same
    /// flags. Returns the reassembled message when its last fragment lands.
    pub fn on_fragment(
        &mut self,
        header: &ReliableHeader,
        payload: Vec<u8>,
        capacity: usize,
        now: Instant,
    ) -> Option<Vec<u8>> {
        let sequence = header.sequence;
        if capacity == 0 {
            log::warn!("dropping fragment {sequence}: zero payload capacity");
            return None;
        }
        if self.is_seen(sequence) {
            self.ack_queue.push(sequence);
            return None;
        }

        let total = header.total_len as usize;
        let offset = header.offset as usize;
        if offset % capacity != 0 {
            log::debug!("dropping fragment {sequence}: offset {offset} off the {capacity} stride");
            return None;
        }
        let index = offset / capacity;
        let count = total.div_ceil(capacity);
        if count < 2 || count > MAX_FRAGMENTS || index >= count {
            log::debug!("dropping fragment {sequence}: bad geometry ({index} of {count})");
            return None;
        }
        let expected = if index + 1 == count {
            total - (count - 1) * capacity
        } else {
            capacity
        };
        if payload.len() != expected {
            log::debug!(
                "dropping fragment {sequence}: {} bytes where {expected} expected",
                payload.len()
            );
            return None;
        }

        let base = sequence.wrapping_sub(index as i32);
        // A block containing 0 is never issued, so such a base is forged.
        if (0i32.wrapping_sub(base) as u32) < count as u32 {
            log::debug!("dropping fragment {sequence}: block would contain sequence 0");
            return None;
        }

        if !self.pending.contains_key(&base) && self.pending.len() >= MAX_PENDING_MESSAGES {
            self.evict_oldest();
        }
        let entry = match self.pending.entry(base) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if entry.total_len != total || entry.count != count {
                    log::debug!(
                        "dropping fragment {sequence}: set {base} is {}x{}, claims {count}x{total}",
                        entry.count,
                        entry.total_len,
                    );
                    return None;
                }
                entry
            }
            Entry::Vacant(vacant) => vacant.insert(PendingMessage::new(total, count)),
        };

        entry.slots[index] = Some(payload);
        entry.received += 1;
        let complete = entry.received >= entry.count;
        self.record(sequence, now);
        self.ack_queue.push(sequence);

        if !complete {
            return None;
        }

        let set = self.pending.remove(&base)?;
        let mut message = Vec::with_capacity(total);
        for slot in set.slots.into_iter().flatten() {
            message.extend_from_slice(&slot);
        }
        if message.len() != total {
            log::error!("fragment set {base} assembled to {} of {total} bytes", message.len());
            return None;
        }
        Some(message)
    }

    /// Drain the sequences queued for acknowledgment since the last call.
    pub fn take_pending_acks(&mut self) -> Vec<i32> {
        std::mem::take(&mut self.ack_queue)
    }

    /// Whether any acknowledgment is waiting to be flushed.
    pub fn has_pending_acks(&self) -> bool {
        !self.ack_queue.is_empty()
    }

    fn is_seen(&self, sequence: i32) -> bool {
        self.seen.contains_key(&sequence)
    }

    fn record(&mut self, sequence: i32, now: Instant) {
        while let Some(&(at, seq)) = self.arrivals.front() {
            if now.duration_since(at) <= DEDUP_RETENTION {
                break;
            }
            self.arrivals.pop_front();
            // A sequence re-recorded after an eviction carries a fresher
            // stamp; only the matching entry is forgotten.
            if self.seen.get(&seq) == Some(&at) {
                self.seen.remove(&seq);
            }
        }
        self.seen.insert(sequence, now);
        self.arrivals.push_back((now, sequence));
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .pending
            .keys()
            .copied()
            .reduce(|a, b| if SequenceSpace::is_newer(a, b) { a } else { b });
        let Some(base) = oldest else { return };
        log::warn!("reassembly buffer full, evicting fragment set {base}");
        if let Some(set) = self.pending.remove(&base) {
            // Forget the set's sequences; the sender is still retransmitting
            // them and the set must be able to rebuild.
            for index in 0..set.count as i32 {
                self.seen.remove(&base.wrapping_add(index));
            }
        }
    }

    #[cfg(test)]
    fn pending_sets(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::constants::{DEFAULT_MTU, RELIABLE_HEADER_SIZE};

    fn header(sequence: i32, total_len: u16, offset: u16) -> ReliableHeader {
        ReliableHeader {
            sequence,
            total_len,
            offset,
        }
    }

    #[test]
    fn test_message_delivered_once() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();

        let delivered = buffer.on_message(&header(1, 3, 0), b"abc".to_vec(), now);
        assert_eq!(delivered, Some(b"abc".to_vec()));

        // The retransmitted copy is dropped but still acknowledged.
        let delivered = buffer.on_message(&header(1, 3, 0), b"abc".to_vec(), now);
        assert_eq!(delivered, None);
        assert_eq!(buffer.take_pending_acks(), vec![1, 1]);
    }

    #[test]
    fn test_messages_delivered_in_arrival_order() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();

        assert!(buffer.on_message(&header(2, 1, 0), vec![0xB2], now).is_some());
        assert!(buffer.on_message(&header(1, 1, 0), vec![0xB1], now).is_some());
        assert_eq!(buffer.take_pending_acks(), vec![2, 1]);
    }

    #[test]
    fn test_fragments_assemble_in_any_order() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();
        let capacity = 4;
        // 10 bytes over capacity 4: fragments of 4, 4, 2 at base 10.
        let message: Vec<u8> = (0u8..10).collect();

        assert!(buffer
            .on_fragment(&header(12, 10, 8), message[8..].to_vec(), capacity, now)
            .is_none());
        assert!(buffer
            .on_fragment(&header(10, 10, 0), message[..4].to_vec(), capacity, now)
            .is_none());
        let delivered =
            buffer.on_fragment(&header(11, 10, 4), message[4..8].to_vec(), capacity, now);
        assert_eq!(delivered, Some(message));
        assert_eq!(buffer.take_pending_acks(), vec![12, 10, 11]);
        assert_eq!(buffer.pending_sets(), 0);
    }

    #[test]
    fn test_duplicate_fragment_only_reacked() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();
        let capacity = 4;

        assert!(buffer
            .on_fragment(&header(10, 10, 0), vec![0; 4], capacity, now)
            .is_none());
        assert!(buffer
            .on_fragment(&header(10, 10, 0), vec![0; 4], capacity, now)
            .is_none());
        assert_eq!(buffer.take_pending_acks(), vec![10, 10]);
        assert_eq!(buffer.pending_sets(), 1);
    }

    #[test]
    fn test_wrong_length_fragment_discarded_without_ack() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();
        // Non-final fragment must be exactly one stride.
        assert!(buffer
            .on_fragment(&header(10, 10, 0), vec![0; 3], 4, now)
            .is_none());
        assert!(!buffer.has_pending_acks());
        assert_eq!(buffer.pending_sets(), 0);
    }

    #[test]
    fn test_misaligned_offset_discarded_without_ack() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();
        assert!(buffer
            .on_fragment(&header(10, 10, 3), vec![0; 4], 4, now)
            .is_none());
        assert!(!buffer.has_pending_acks());
    }

    #[test]
    fn test_mismatched_set_claim_discarded() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();
        let capacity = 4;

        assert!(buffer
            .on_fragment(&header(10, 10, 0), vec![0; 4], capacity, now)
            .is_none());
        // Same base, different total: protocol violation.
        assert!(buffer
            .on_fragment(&header(11, 9, 4), vec![0; 4], capacity, now)
            .is_none());
        assert_eq!(buffer.take_pending_acks(), vec![10]);
    }

    #[test]
    fn test_single_fragment_sets_rejected() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();
        // total 3 within capacity 4 should have been a Message packet.
        assert!(buffer
            .on_fragment(&header(10, 3, 0), vec![0; 3], 4, now)
            .is_none());
        assert!(!buffer.has_pending_acks());
    }

    #[test]
    fn test_late_first_arrival_still_delivered() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();

        // The sequence space is shared by every peer of a socket, so traffic
        // to other peers advances it arbitrarily far between packets this
        // peer actually receives.
        assert!(buffer
            .on_message(&header(50_000, 1, 0), vec![0xAA], now)
            .is_some());

        // First arrival of a packet issued long before: still fresh.
        let delivered = buffer.on_message(&header(100, 1, 0), vec![0xBB], now);
        assert_eq!(delivered, Some(vec![0xBB]));

        // Its retransmitted duplicate is dropped but re-acked.
        assert_eq!(buffer.on_message(&header(100, 1, 0), vec![0xBB], now), None);
        assert_eq!(buffer.take_pending_acks(), vec![50_000, 100, 100]);
    }

    #[test]
    fn test_seen_entries_expire_after_retransmit_lifetime() {
        let t0 = Instant::now();
        let mut buffer = ReassemblyBuffer::new();

        assert!(buffer.on_message(&header(1, 1, 0), vec![0x01], t0).is_some());

        // Within the retention span duplicates stay suppressed.
        let t1 = t0 + DEDUP_RETENTION;
        assert_eq!(buffer.on_message(&header(1, 1, 0), vec![0x01], t1), None);

        // Past it the sender's budget is long spent; recording a new
        // sequence prunes the stale entry.
        let t2 = t1 + Duration::from_millis(1);
        assert!(buffer.on_message(&header(2, 1, 0), vec![0x02], t2).is_some());
        assert!(buffer.on_message(&header(1, 1, 0), vec![0x01], t2).is_some());
    }

    #[test]
    fn test_evicted_set_rebuilt_by_retransmission() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();
        let capacity = 4;

        // One more two-fragment set than fits evicts the oldest (base 10).
        for i in 0..(MAX_PENDING_MESSAGES as i32 + 1) {
            let base = 10 + i * 2;
            assert!(buffer
                .on_fragment(&header(base, 8, 0), vec![0; 4], capacity, now)
                .is_none());
        }
        assert_eq!(buffer.pending_sets(), MAX_PENDING_MESSAGES);
        buffer.take_pending_acks();

        // The evicted set's sender is still retransmitting both fragments;
        // they must rebuild and complete the set, not be swallowed as
        // duplicates.
        assert!(buffer
            .on_fragment(&header(10, 8, 0), vec![2; 4], capacity, now)
            .is_none());
        let delivered = buffer.on_fragment(&header(11, 8, 4), vec![3; 4], capacity, now);
        assert_eq!(delivered, Some(vec![2, 2, 2, 2, 3, 3, 3, 3]));
        assert_eq!(buffer.take_pending_acks(), vec![10, 11]);
    }

    #[test]
    fn test_pending_sets_bounded() {
        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();
        let capacity = 4;

        for i in 0..(MAX_PENDING_MESSAGES as i32 + 8) {
            let base = 10 + i * 2;
            assert!(buffer
                .on_fragment(&header(base, 8, 0), vec![0; 4], capacity, now)
                .is_none());
        }
        assert_eq!(buffer.pending_sets(), MAX_PENDING_MESSAGES);

        // The newest set is intact and still completes.
        let base = 10 + (MAX_PENDING_MESSAGES as i32 + 7) * 2;
        let delivered = buffer.on_fragment(&header(base + 1, 8, 4), vec![1; 4], capacity, now);
        assert_eq!(delivered, Some(vec![0, 0, 0, 0, 1, 1, 1, 1]));
    }

    #[test]
    fn test_default_mtu_scenario() {
        // 5000 bytes at the default MTU without encryption: stride 1015,
        // five fragments at offsets 0/1015/2030/3045/4060.
        let capacity = DEFAULT_MTU as usize - RELIABLE_HEADER_SIZE;
        assert_eq!(capacity, 1015);
        let message: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let count = message.len().div_ceil(capacity);
        assert_eq!(count, 5);

        let base = 100;
        let mut arrivals: Vec<(i32, usize)> = (0..count)
            .map(|index| (base + index as i32, index * capacity))
            .collect();
        arrivals.swap(0, 4);
        arrivals.swap(1, 3);

        let now = Instant::now();
        let mut buffer = ReassemblyBuffer::new();
        let mut delivered = None;
        for (sequence, offset) in arrivals {
            let end = usize::min(offset + capacity, message.len());
            let fragment = message[offset..end].to_vec();
            let result = buffer.on_fragment(
                &header(sequence, 5000, offset as u16),
                fragment,
                capacity,
                now,
            );
            assert!(delivered.is_none() || result.is_none());
            if result.is_some() {
                delivered = result;
            }
        }
        assert_eq!(delivered, Some(message));
        assert_eq!(buffer.take_pending_acks().len(), 5);
    }
}
