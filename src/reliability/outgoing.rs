//! Retransmission bookkeeping for reliable packets.
//!
//! Every encoded reliable packet stays buffered here until its
//! acknowledgment arrives. The tick pass re-sends entries whose backoff
//! timeout elapsed and reports budget exhaustion, which is fatal for the
//! peer. Retransmissions reuse the stored bytes verbatim, so an encrypted
//! packet keeps its original IV and tag.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::constants::{MAX_RTO, MIN_RTO, RETRANSMIT_BACKOFF, RTO_MULTIPLIER};

/// Timeout before retransmit attempt `retransmits + 1`.
///
/// Grows exponentially from `rtt_estimate * RTO_MULTIPLIER`, clamped to
/// `[MIN_RTO, MAX_RTO]`.
pub fn retransmit_timeout(rtt_estimate: Duration, retransmits: u32) -> Duration {
    let timeout = match RETRANSMIT_BACKOFF.checked_pow(retransmits) {
        Some(factor) => rtt_estimate
            .saturating_mul(RTO_MULTIPLIER)
            .saturating_mul(factor),
        None => MAX_RTO,
    };
    timeout.clamp(MIN_RTO, MAX_RTO)
}

/// One unacknowledged reliable packet.
#[derive(Debug)]
struct PendingPacket {
    wire: Vec<u8>,
    last_sent: Instant,
    retransmits: u32,
}

/// Result of a retransmit tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Sequences due for re-sending, already marked as sent.
    pub retransmit: Vec<i32>,
    /// A packet timed out with its retry budget spent; the peer is
    /// unreachable and must be torn down.
    pub exhausted: bool,
}

/// Buffers encoded reliable packets until their acknowledgment arrives.
#[derive(Debug, Default)]
pub struct RetransmitBuffer {
    pending: HashMap<i32, PendingPacket>,
}

impl RetransmitBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly encoded packet.
    pub fn insert(&mut self, sequence: i32, wire: Vec<u8>, now: Instant) {
        self.pending.insert(
            sequence,
            PendingPacket {
                wire,
                last_sent: now,
                retransmits: 0,
            },
        );
    }

    /// Encoded bytes of a tracked packet.
    pub fn wire(&self, sequence: i32) -> Option<&[u8]> {
        self.pending.get(&sequence).map(|p| p.wire.as_slice())
    }

    /// Retire every entry named in an ack batch. Unknown and repeated
    /// sequences are no-ops. Returns the number of entries retired.
    pub fn acknowledge(&mut self, sequences: &[i32]) -> usize {
        sequences
            .iter()
            .filter(|seq| self.pending.remove(seq).is_some())
            .count()
    }

    /// Number of unacknowledged packets.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no packet awaits acknowledgment.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Mark entries whose timeout elapsed, at most `batch` of them, bumping
    /// their attempt count and send time. An entry timing out after `budget`
    /// attempts sets `exhausted` instead.
    pub fn tick_at(
        &mut self,
        now: Instant,
        rtt_estimate: Duration,
        budget: u32,
        batch: usize,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        for (&sequence, entry) in self.pending.iter_mut() {
            let timeout = retransmit_timeout(rtt_estimate, entry.retransmits);
            if now.duration_since(entry.last_sent) < timeout {
                continue;
            }
            if entry.retransmits >= budget {
                outcome.exhausted = true;
                break;
            }
            if outcome.retransmit.len() < batch {
                entry.retransmits += 1;
                entry.last_sent = now;
                outcome.retransmit.push(sequence);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESTIMATE: Duration = Duration::from_millis(50);

    #[test]
    fn test_timeout_growth_and_clamps() {
        assert_eq!(retransmit_timeout(ESTIMATE, 0), Duration::from_millis(200));
        assert_eq!(retransmit_timeout(ESTIMATE, 1), Duration::from_millis(400));
        assert_eq!(retransmit_timeout(ESTIMATE, 2), Duration::from_millis(800));

        // Tiny estimates hit the floor, huge backoffs the ceiling.
        assert_eq!(retransmit_timeout(Duration::from_micros(50), 0), MIN_RTO);
        assert_eq!(retransmit_timeout(ESTIMATE, 20), MAX_RTO);
        assert_eq!(retransmit_timeout(Duration::from_secs(100), 40), MAX_RTO);
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let now = Instant::now();
        let mut buffer = RetransmitBuffer::new();
        buffer.insert(1, vec![0x01], now);
        buffer.insert(2, vec![0x02], now);
        buffer.insert(3, vec![0x03], now);

        // Unknown sequences in the batch are ignored.
        assert_eq!(buffer.acknowledge(&[2, 99]), 1);
        assert_eq!(buffer.len(), 2);
        assert!(buffer.wire(2).is_none());

        // Re-acking the same subset changes nothing.
        assert_eq!(buffer.acknowledge(&[2, 99]), 0);
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.acknowledge(&[1, 3]), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_tick_before_timeout_is_quiet() {
        let now = Instant::now();
        let mut buffer = RetransmitBuffer::new();
        buffer.insert(1, vec![0xAA], now);

        let outcome = buffer.tick_at(now + Duration::from_millis(10), ESTIMATE, 10, 16);
        assert!(outcome.retransmit.is_empty());
        assert!(!outcome.exhausted);
    }

    #[test]
    fn test_tick_marks_due_entries_once() {
        let now = Instant::now();
        let mut buffer = RetransmitBuffer::new();
        buffer.insert(1, vec![0xAA], now);

        let due = now + retransmit_timeout(ESTIMATE, 0);
        let outcome = buffer.tick_at(due, ESTIMATE, 10, 16);
        assert_eq!(outcome.retransmit, vec![1]);

        // Same instant again: the entry was just re-sent and its timeout grew.
        let outcome = buffer.tick_at(due, ESTIMATE, 10, 16);
        assert!(outcome.retransmit.is_empty());

        // Due again only after the backed-off timeout.
        let outcome = buffer.tick_at(due + retransmit_timeout(ESTIMATE, 1), ESTIMATE, 10, 16);
        assert_eq!(outcome.retransmit, vec![1]);
    }

    #[test]
    fn test_budget_exhaustion_is_fatal() {
        let now = Instant::now();
        let mut buffer = RetransmitBuffer::new();
        buffer.insert(7, vec![0xAA], now);

        let mut at = now;
        for attempt in 0..3 {
            at += retransmit_timeout(ESTIMATE, attempt);
            let outcome = buffer.tick_at(at, ESTIMATE, 3, 16);
            assert_eq!(outcome.retransmit, vec![7]);
            assert!(!outcome.exhausted);
        }

        at += retransmit_timeout(ESTIMATE, 3);
        let outcome = buffer.tick_at(at, ESTIMATE, 3, 16);
        assert!(outcome.retransmit.is_empty());
        assert!(outcome.exhausted);
    }

    #[test]
    fn test_retransmit_batch_cap() {
        let now = Instant::now();
        let mut buffer = RetransmitBuffer::new();
        for seq in 1..=20 {
            buffer.insert(seq, vec![seq as u8], now);
        }

        let due = now + retransmit_timeout(ESTIMATE, 0);
        let outcome = buffer.tick_at(due, ESTIMATE, 10, 16);
        assert_eq!(outcome.retransmit.len(), 16);

        // The remainder is still due on the next pass.
        let outcome = buffer.tick_at(due, ESTIMATE, 10, 16);
        assert_eq!(outcome.retransmit.len(), 4);
    }

    #[test]
    fn test_wire_survives_until_acknowledged() {
        let now = Instant::now();
        let mut buffer = RetransmitBuffer::new();
        buffer.insert(5, vec![0xDE, 0xAD], now);

        assert_eq!(buffer.wire(5), Some([0xDE, 0xAD].as_slice()));
        buffer.acknowledge(&[5]);
        assert_eq!(buffer.wire(5), None);
    }
}
