//! Command Tracker: request/response matching, slot bounding, timing
//! instrumentation (spec §4.3).

use crate::address::MultiAddress;
use crate::error::DriverError;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// Default in-flight slot depth, matching the firmware's command pipeline
/// (spec §4.3 "typically 4-16").
pub const DEFAULT_QUEUE_LIMIT: usize = 8;

/// A command awaiting a matching Response or Error (spec §3 `PendingCommand`).
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub dest_address: MultiAddress,
    pub opcode: u8,
    pub payload: Vec<u8>,
    pub enqueue_time_us: u64,
    pub deadline_us: u64,
    pub response_slot: u32,
}

/// Per-command timing recorded once a Response or Error closes it out
/// (spec §4.3 "Timing instrumentation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionStats {
    pub send_time_us: u64,
    pub queueing_delay_us: u64,
    pub execution_time_us: u64,
    pub receive_time_us: u64,
    pub ring_depth_at_send: u32,
}

/// Outcome handed back to the caller of `run_command`/delivered to the
/// completion callback.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub dest_address: MultiAddress,
    pub result: Result<Vec<u8>, DriverError>,
    pub stats: CompletionStats,
}

/// FIFO command/response matcher, one instance per network.
///
/// Matching rule (spec §4.3): a Response closes the oldest `PendingCommand`
/// whose `dest_address` equals the Response's source address. A stray
/// Response (no outstanding command for that address) is discarded and
/// logged by the caller. An Error closes the oldest pending command for its
/// address, or is surfaced via the error callback alone if none is pending.
pub struct CommandTracker {
    queue_limit: usize,
    next_slot: u32,
    in_flight: VecDeque<PendingCommand>,
}

impl CommandTracker {
    pub fn new(queue_limit: usize) -> Self {
        Self {
            queue_limit: queue_limit.max(1),
            next_slot: 0,
            in_flight: VecDeque::new(),
        }
    }

    pub fn queue_limit(&self) -> usize {
        self.queue_limit
    }

    pub fn depth(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_full(&self) -> bool {
        self.in_flight.len() >= self.queue_limit
    }

    /// Pushes a new command onto the tail of the in-flight queue. Returns
    /// `Err(DriverError::BufferFull)` if the slot ring is already at its
    /// configured depth; the caller is responsible for the blocking/retry
    /// loop that waits for a slot to free (spec §4.3 "Slot policy").
    pub fn enqueue(
        &mut self,
        dest_address: MultiAddress,
        opcode: u8,
        payload: Vec<u8>,
        enqueue_time_us: u64,
        deadline_us: u64,
    ) -> Result<u32, DriverError> {
        if self.is_full() {
            return Err(DriverError::BufferFull);
        }
        let slot = self.next_slot;
        self.next_slot = self.next_slot.wrapping_add(1);
        self.in_flight.push_back(PendingCommand {
            dest_address,
            opcode,
            payload,
            enqueue_time_us,
            deadline_us,
            response_slot: slot,
        });
        Ok(slot)
    }

    /// Matches an inbound Response from `source` against the oldest pending
    /// command addressed to it, closing it with `payload`. Returns `None`
    /// (a stray) if no command for that address is outstanding.
    pub fn complete_with_response(
        &mut self,
        source: MultiAddress,
        payload: Vec<u8>,
        now_us: u64,
    ) -> Option<CommandOutcome> {
        let idx = self
            .in_flight
            .iter()
            .position(|cmd| cmd.dest_address == source)?;
        let cmd = self.remove_at(idx);
        Some(self.finish(cmd, Ok(payload), now_us))
    }

    /// Fails the oldest pending command for `source` with a node-reported
    /// error. Returns `None` if nothing was outstanding for that address,
    /// in which case the caller surfaces the error via the error callback
    /// only (spec §4.3 "Matching rule").
    pub fn complete_with_error(
        &mut self,
        source: MultiAddress,
        error: DriverError,
        now_us: u64,
    ) -> Option<CommandOutcome> {
        let idx = self
            .in_flight
            .iter()
            .position(|cmd| cmd.dest_address == source)?;
        let cmd = self.remove_at(idx);
        Some(self.finish(cmd, Err(error), now_us))
    }

    /// Advances retry/timeout bookkeeping, called by the polling worker
    /// (spec §4.9 "Advances retry timers inside the Command Tracker").
    /// Returns every command whose deadline has passed, closed with
    /// `DriverError::CommandTimeout`.
    pub fn expire_overdue(&mut self, now_us: u64) -> Vec<CommandOutcome> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].deadline_us <= now_us {
                let cmd = self.remove_at(i);
                expired.push(self.finish(cmd, Err(DriverError::CommandTimeout), now_us));
            } else {
                i += 1;
            }
        }
        expired
    }

    /// Drains every in-flight command with `CommAborted` (spec §4.3
    /// "Cancellation": network close, fatal port error, explicit flush).
    pub fn flush(&mut self, now_us: u64) -> Vec<CommandOutcome> {
        let mut drained = Vec::with_capacity(self.in_flight.len());
        while let Some(cmd) = self.in_flight.pop_front() {
            drained.push(self.finish(cmd, Err(DriverError::CommAborted), now_us));
        }
        drained
    }

    fn remove_at(&mut self, idx: usize) -> PendingCommand {
        // `VecDeque::remove` preserves the relative order of the remaining
        // elements, keeping the FIFO matching order intact even if a
        // closer-than-oldest match had to be removed out of position.
        self.in_flight.remove(idx).expect("idx was just located")
    }

    fn finish(
        &self,
        cmd: PendingCommand,
        result: Result<Vec<u8>, DriverError>,
        now_us: u64,
    ) -> CommandOutcome {
        let queueing_delay_us = now_us.saturating_sub(cmd.enqueue_time_us);
        CommandOutcome {
            dest_address: cmd.dest_address,
            result,
            stats: CompletionStats {
                send_time_us: cmd.enqueue_time_us,
                queueing_delay_us,
                execution_time_us: queueing_delay_us,
                receive_time_us: now_us,
                ring_depth_at_send: self.in_flight.len() as u32,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> MultiAddress {
        MultiAddress::from_net_node(0, n)
    }

    #[test]
    fn responses_match_oldest_command_for_the_address_fifo() {
        let mut tracker = CommandTracker::new(DEFAULT_QUEUE_LIMIT);
        tracker.enqueue(addr(1), 0x10, Vec::new(), 0, 1_000).unwrap();
        tracker.enqueue(addr(1), 0x11, Vec::new(), 10, 1_000).unwrap();

        let first = tracker
            .complete_with_response(addr(1), alloc::vec![1], 20)
            .expect("matches oldest");
        assert!(matches!(first.result, Ok(ref v) if v == &[1]));

        let second = tracker
            .complete_with_response(addr(1), alloc::vec![2], 30)
            .expect("matches next oldest");
        assert!(matches!(second.result, Ok(ref v) if v == &[2]));
    }

    #[test]
    fn stray_response_with_no_outstanding_command_is_none() {
        let mut tracker = CommandTracker::new(DEFAULT_QUEUE_LIMIT);
        assert!(tracker
            .complete_with_response(addr(9), Vec::new(), 0)
            .is_none());
    }

    #[test]
    fn queue_never_exceeds_configured_limit() {
        let mut tracker = CommandTracker::new(2);
        tracker.enqueue(addr(1), 0, Vec::new(), 0, 1_000).unwrap();
        tracker.enqueue(addr(1), 0, Vec::new(), 0, 1_000).unwrap();
        assert_eq!(
            tracker.enqueue(addr(1), 0, Vec::new(), 0, 1_000),
            Err(DriverError::BufferFull)
        );
        assert_eq!(tracker.depth(), 2);
    }

    #[test]
    fn overdue_commands_time_out() {
        let mut tracker = CommandTracker::new(DEFAULT_QUEUE_LIMIT);
        tracker.enqueue(addr(1), 0, Vec::new(), 0, 100).unwrap();
        let expired = tracker.expire_overdue(200);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].result, Err(DriverError::CommandTimeout));
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn flush_aborts_every_in_flight_command() {
        let mut tracker = CommandTracker::new(DEFAULT_QUEUE_LIMIT);
        tracker.enqueue(addr(1), 0, Vec::new(), 0, 1_000).unwrap();
        tracker.enqueue(addr(2), 0, Vec::new(), 0, 1_000).unwrap();
        let drained = tracker.flush(50);
        assert_eq!(drained.len(), 2);
        assert!(drained
            .iter()
            .all(|o| o.result == Err(DriverError::CommAborted)));
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn error_packet_fails_oldest_pending_for_address() {
        let mut tracker = CommandTracker::new(DEFAULT_QUEUE_LIMIT);
        tracker.enqueue(addr(3), 0, Vec::new(), 0, 1_000).unwrap();
        let outcome = tracker
            .complete_with_error(addr(3), DriverError::IllegalArgs, 5)
            .expect("matches pending");
        assert_eq!(outcome.result, Err(DriverError::IllegalArgs));
    }
}
