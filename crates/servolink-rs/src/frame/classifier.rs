//! Packet Classifier: a byte-at-a-time accumulator that turns a raw serial
//! stream into delimited frames (spec §4.2 "Packet Classifier").
//!
//! Decoder policy (spec §4.2): any octet with the start-of-packet bit set
//! terminates an in-progress frame as a `Fragment` and begins a new one.
//! Once two header octets are available the expected total length is known
//! from the header's length field, so the classifier always knows exactly
//! how many more octets to wait for.

use super::codec;
use super::{Frame, FrameHeader};
use crate::error::DriverError;
use alloc::vec::Vec;

/// Runaway input is declared babble once this many consecutive non-SOP
/// octets have arrived with no frame in progress (spec §4.2 open question:
/// "> 2x maximum frame length without a SOP").
const BABBLE_THRESHOLD: usize = 2 * (2 + super::MAX_WIRE_SEPTETS as usize + 1);

/// Cumulative counters surfaced through the diagnostic/host-error-stats API
/// (spec §11 "Diagnostic Trace Log", §21 "get_host_err_stats").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierStats {
    pub frames_ok: u32,
    pub fragments: u32,
    pub bad_checksums: u32,
    pub stray_octets: u32,
    pub babbles: u32,
    pub overruns: u32,
}

/// Byte-accumulating classifier state machine.
pub struct Classifier {
    buffer: Vec<u8>,
    expected_len: Option<usize>,
    stray_run: usize,
    pub stats: ClassifierStats,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            expected_len: None,
            stray_run: 0,
            stats: ClassifierStats::default(),
        }
    }

    fn in_progress(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.expected_len = None;
    }

    /// Feeds one octet from the wire. Returns `Some(Ok(frame))` once a
    /// complete, checksum-valid frame has been accumulated, or
    /// `Some(Err(_))` for a frame that was discarded (fragment, bad
    /// checksum, stray data, babble). `None` means "still accumulating".
    pub fn feed(&mut self, octet: u8) -> Option<Result<Frame, DriverError>> {
        let is_sop = octet & 0x80 != 0;

        if is_sop {
            let fragment_result = if self.in_progress() {
                self.stats.fragments += 1;
                Some(Err(DriverError::Fragment))
            } else {
                None
            };
            self.reset();
            self.stray_run = 0;
            self.buffer.push(octet);
            // A dropped in-progress frame is reported immediately; the new
            // frame keeps accumulating on subsequent calls.
            return fragment_result;
        }

        if !self.in_progress() {
            self.stats.stray_octets += 1;
            self.stray_run += 1;
            if self.stray_run >= BABBLE_THRESHOLD {
                self.stats.babbles += 1;
                self.stray_run = 0;
                return Some(Err(DriverError::Babble));
            }
            return None;
        }

        self.buffer.push(octet);

        if self.expected_len.is_none() && self.buffer.len() == 2 {
            match FrameHeader::decode([self.buffer[0], self.buffer[1]]) {
                Ok(header) => self.expected_len = Some(codec::wire_len(&header)),
                Err(_) => {
                    // Malformed packet-type field; treat as a fragment and
                    // wait for the next SOP.
                    self.reset();
                    self.stats.fragments += 1;
                    return Some(Err(DriverError::Fragment));
                }
            }
        }

        if let Some(expected) = self.expected_len {
            if self.buffer.len() > expected + 4 {
                // Should be unreachable given the header-derived length, but
                // guards against a runaway accumulation eating host memory.
                self.reset();
                self.stats.overruns += 1;
                return Some(Err(DriverError::PortOverrun));
            }
            if self.buffer.len() == expected {
                let complete = core::mem::take(&mut self.buffer);
                self.expected_len = None;
                return Some(match codec::decode(&complete) {
                    Ok(frame) => {
                        self.stats.frames_ok += 1;
                        Ok(frame)
                    }
                    Err(DriverError::BadChecksum) => {
                        self.stats.bad_checksums += 1;
                        Err(DriverError::BadChecksum)
                    }
                    Err(other) => {
                        self.stats.fragments += 1;
                        Err(other)
                    }
                });
            }
        }

        None
    }

    /// Feeds a whole buffer, collecting every classification result in
    /// arrival order.
    pub fn feed_all(&mut self, octets: &[u8]) -> Vec<Result<Frame, DriverError>> {
        octets.iter().filter_map(|&b| self.feed(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::codec::encode;
    use crate::frame::{FrameHeader, PacketType};

    fn command_frame(address: u8, payload: &[u8]) -> Frame {
        Frame::new(
            FrameHeader {
                address,
                packet_type: PacketType::Command,
                septet_len: 0,
                mode: false,
                from_node: false,
            },
            payload.to_vec(),
        )
    }

    #[test]
    fn classifies_a_clean_frame() {
        let frame = command_frame(3, &[10, 20, 30]);
        let wire = encode(&frame).unwrap();
        let mut c = Classifier::new();
        let results = c.feed_all(&wire);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().payload, frame.payload);
        assert_eq!(c.stats.frames_ok, 1);
    }

    #[test]
    fn stray_bytes_before_sop_are_counted_and_discarded() {
        let mut c = Classifier::new();
        let results = c.feed_all(&[0x01, 0x02, 0x03]);
        assert!(results.is_empty());
        assert_eq!(c.stats.stray_octets, 3);
    }

    #[test]
    fn new_sop_aborts_in_progress_frame_as_fragment() {
        let frame = command_frame(1, &[1, 2, 3, 4, 5]);
        let mut wire = encode(&frame).unwrap();
        // Truncate so the first frame never completes, then start a new one.
        wire.truncate(3);
        let mut c = Classifier::new();
        assert!(c.feed_all(&wire).is_empty());

        let next = command_frame(2, &[9]);
        let next_wire = encode(&next).unwrap();
        let results = c.feed_all(&next_wire);
        assert_eq!(c.stats.fragments, 1);
        assert_eq!(results.last().unwrap().as_ref().unwrap().header.address, 2);
    }

    #[test]
    fn bad_checksum_is_reported_and_classifier_recovers() {
        let frame = command_frame(4, &[5, 6, 7]);
        let mut wire = encode(&frame).unwrap();
        *wire.last_mut().unwrap() ^= 0xFF & 0x7F;
        let mut c = Classifier::new();
        let results = c.feed_all(&wire);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0], Err(DriverError::BadChecksum));
        assert_eq!(c.stats.bad_checksums, 1);

        // Classifier is ready for the next frame after a bad one.
        let good = command_frame(4, &[1]);
        let good_wire = encode(&good).unwrap();
        let results2 = c.feed_all(&good_wire);
        assert!(results2[0].is_ok());
    }

    #[test]
    fn sustained_stray_stream_is_flagged_as_babble() {
        let mut c = Classifier::new();
        let garbage = vec![0x01u8; BABBLE_THRESHOLD];
        let results = c.feed_all(&garbage);
        assert!(results.iter().any(|r| matches!(r, Err(DriverError::Babble))));
    }
}
