//! Sequence number issuance and wraparound-safe ordering.
//!
//! Sequence numbers are signed 32-bit values that wrap. Zero is the unset
//! sentinel and is never issued; ordering treats values near opposite ends
//! of the range as wrapped rather than distant.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::core::constants::SEQUENCE_WRAP_MARGIN;

/// Issues reliable sequence numbers for one transport.
///
/// A single instance is shared by every peer of a socket. Fragments of one
/// message draw a consecutive block so the receiver can locate the set from
/// any member.
#[derive(Debug, Default)]
pub struct SequenceSpace {
    counter: AtomicI32,
}

impl SequenceSpace {
    /// Create a sequence space whose first issued number is 1.
    pub fn new() -> Self {
        Self {
            counter: AtomicI32::new(0),
        }
    }

    /// Create a sequence space whose next issued number follows `last`.
    pub fn starting_after(last: i32) -> Self {
        Self {
            counter: AtomicI32::new(last),
        }
    }

    /// Issue the next sequence number. Never returns 0.
    pub fn next(&self) -> i32 {
        self.next_block(1)
    }

    /// Atomically reserve `count` consecutive sequence numbers, returning the
    /// first. A block that would contain 0 is discarded and a fresh one drawn.
    pub fn next_block(&self, count: usize) -> i32 {
        debug_assert!(count >= 1 && count <= i32::MAX as usize);
        loop {
            let start = self.counter.fetch_add(count as i32, Ordering::Relaxed);
            let first = start.wrapping_add(1);
            // 0 lies inside [first, first + count) iff its circular distance
            // from first is below count.
            if (0i32.wrapping_sub(first) as u32) < count as u32 {
                continue;
            }
            return first;
        }
    }

    /// Whether `candidate` was issued after `reference`.
    ///
    /// Plain numeric comparison, unless the two values sit within
    /// [`SEQUENCE_WRAP_MARGIN`] of opposite ends of the range; the value on
    /// the negative side is then the one that wrapped, hence newer. Never
    /// true for equal values.
    pub fn is_newer(reference: i32, candidate: i32) -> bool {
        if candidate > SEQUENCE_WRAP_MARGIN && reference < -SEQUENCE_WRAP_MARGIN {
            false
        } else if reference > SEQUENCE_WRAP_MARGIN && candidate < -SEQUENCE_WRAP_MARGIN {
            true
        } else {
            candidate > reference
        }
    }
}
