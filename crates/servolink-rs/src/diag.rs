//! Diagnostic Trace Log (spec §4.6).
//!
//! A fixed-capacity ring of every octet transmitted and received, used for
//! post-mortem. Built as a `Vec` with a write cursor rather than a
//! `VecDeque` so the buffer never reallocates once full, the same
//! fixed-capacity discipline the teacher favors for embedded-safe storage
//! (e.g. its object-dictionary storage backing).

use alloc::string::String;
use alloc::vec::Vec;

/// Default ring capacity (spec §4.6: "capacity a few thousand frames").
pub const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub direction: Direction,
    pub at_us: u64,
    pub octets: Vec<u8>,
}

/// Bounded ring buffer of `TraceEntry`. Once `capacity` entries have been
/// written, new entries overwrite the oldest in place (no reallocation).
pub struct DiagLog {
    capacity: usize,
    entries: Vec<TraceEntry>,
    cursor: usize,
    filled: bool,
    enabled: bool,
}

impl DiagLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Vec::new(),
            cursor: 0,
            filled: false,
            enabled: true,
        }
    }

    pub fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, direction: Direction, at_us: u64, octets: &[u8]) {
        if !self.enabled {
            return;
        }
        let entry = TraceEntry {
            direction,
            at_us,
            octets: octets.to_vec(),
        };
        if self.entries.len() < self.capacity {
            self.entries.push(entry);
        } else {
            self.entries[self.cursor] = entry;
            self.filled = true;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Entries in chronological order (oldest first).
    pub fn entries_in_order(&self) -> Vec<&TraceEntry> {
        if !self.filled {
            self.entries.iter().collect()
        } else {
            let (tail, head) = self.entries.split_at(self.cursor);
            head.iter().chain(tail.iter()).collect()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the ring as a UTF-8 annotated hex log (spec §4.6: "`dump`
    /// serializes the ring as a UTF-8 annotated hex log").
    pub fn render(&self) -> String {
        use core::fmt::Write;
        let mut out = String::new();
        for entry in self.entries_in_order() {
            let dir = match entry.direction {
                Direction::Tx => "TX",
                Direction::Rx => "RX",
            };
            let _ = write!(out, "[{:>12}us] {dir} ", entry.at_us);
            for b in &entry.octets {
                let _ = write!(out, "{b:02x} ");
            }
            out.push('\n');
        }
        out
    }
}

impl Default for DiagLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl DiagLog {
    /// Writes the rendered log to `path` (spec §4.6 `dump(filepath)`).
    pub fn dump(&self, path: &std::path::Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())
    }

    /// Snapshots the ring to an implementation-chosen path next to the
    /// working directory, used on the `Online -> Broken` transition
    /// (spec §4.6: "On Broken, the current ring is automatically
    /// snapshotted ... for post-mortem").
    pub fn auto_snapshot(&self, net_index: u8, now_us: u64) -> std::io::Result<std::path::PathBuf> {
        let path = std::path::PathBuf::from(alloc::format!(
            "servolink-trace-net{net_index}-{now_us}.log"
        ));
        self.dump(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_stay_in_chronological_order_after_wrap() {
        let mut log = DiagLog::with_capacity(3);
        for i in 0..5u64 {
            log.record(Direction::Tx, i, &[i as u8]);
        }
        let ordered: Vec<u64> = log.entries_in_order().iter().map(|e| e.at_us).collect();
        assert_eq!(ordered, alloc::vec![2, 3, 4]);
    }

    #[test]
    fn disabled_log_drops_records() {
        let mut log = DiagLog::with_capacity(4);
        log.enable(false);
        log.record(Direction::Rx, 0, &[1, 2, 3]);
        assert!(log.is_empty());
    }

    #[test]
    fn render_contains_hex_octets() {
        let mut log = DiagLog::with_capacity(4);
        log.record(Direction::Tx, 123, &[0xAB, 0xCD]);
        let rendered = log.render();
        assert!(rendered.contains("ab"));
        assert!(rendered.contains("cd"));
        assert!(rendered.contains("TX"));
    }
}
