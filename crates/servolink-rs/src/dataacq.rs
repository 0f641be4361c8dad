//! Data Acquisition (spec §17, supplementing `original_source/pubDataAcq.h`).
//!
//! A bounded per-node ring fed by the classifier's `ExtendLow: data-acq`
//! route (spec §4.2 table), drained by `get_data_acq_points`/`flush_data_acq`.

use alloc::collections::VecDeque;

/// Default ring capacity; generous enough to absorb a burst between two
/// polling-worker ticks without dropping samples in the common case.
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAcqPoint {
    pub sample: i32,
    pub at_us: u64,
}

/// Fixed-capacity FIFO ring. Oldest sample is dropped when a new one
/// arrives at capacity, matching the Diagnostic Trace Log's own ring
/// discipline (spec §11).
pub struct DataAcqRing {
    capacity: usize,
    points: VecDeque<DataAcqPoint>,
    dropped: u32,
}

impl DataAcqRing {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            points: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, point: DataAcqPoint) {
        if self.points.len() >= self.capacity {
            self.points.pop_front();
            self.dropped += 1;
        }
        self.points.push_back(point);
    }

    pub fn dropped_count(&self) -> u32 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Drains up to `max` oldest points without clearing the rest
    /// (spec §6 "get_data_acq_points(addr, max, out[])").
    pub fn take(&mut self, max: usize) -> alloc::vec::Vec<DataAcqPoint> {
        let n = max.min(self.points.len());
        self.points.drain(..n).collect()
    }

    /// Discards every buffered point (spec §6 "flush_data_acq(addr)").
    pub fn flush(&mut self) {
        self.points.clear();
    }
}

impl Default for DataAcqRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_past_capacity() {
        let mut ring = DataAcqRing::with_capacity(2);
        ring.push(DataAcqPoint { sample: 1, at_us: 0 });
        ring.push(DataAcqPoint { sample: 2, at_us: 1 });
        ring.push(DataAcqPoint { sample: 3, at_us: 2 });
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.dropped_count(), 1);
        let drained = ring.take(10);
        assert_eq!(drained[0].sample, 2);
        assert_eq!(drained[1].sample, 3);
    }

    #[test]
    fn flush_clears_without_incrementing_drop_count() {
        let mut ring = DataAcqRing::with_capacity(4);
        ring.push(DataAcqPoint { sample: 1, at_us: 0 });
        ring.flush();
        assert!(ring.is_empty());
        assert_eq!(ring.dropped_count(), 0);
    }
}
