//! Attention & Event Dispatcher (spec §4.5, §10).
//!
//! Callback delivery happens with no core locks held (spec §5 "Locking
//! discipline") — callers invoke `EventDispatcher::push_*` from the
//! dispatcher task, never the reader thread, and this type itself holds no
//! lock; the caller's own `Network`/`Driver` wiring is what keeps it off the
//! reader thread.

use crate::address::MultiAddress;
use crate::error::FaultEvent;
use crate::network::NetworkChange;
use crate::param::ParamRef;
use crate::tracker::CommandOutcome;
use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

/// Produced by the classifier when an `AttnRequest` packet is seen
/// (spec §3 `AttentionRecord`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionRecord {
    pub address: MultiAddress,
    pub bits: u32,
    pub at_us: u64,
}

/// Bounded per-node queue depth; a slow/absent callback consumer should not
/// let attentions grow without bound.
pub const ATTENTION_QUEUE_CAPACITY: usize = 64;

type ErrorCallback = Box<dyn FnMut(FaultEvent) + Send>;
type CommandCompleteCallback = Box<dyn FnMut(CommandOutcome) + Send>;
type CacheInvalidateCallback = Box<dyn FnMut(MultiAddress, ParamRef) + Send>;
type NetworkStateCallback = Box<dyn FnMut(u8, NetworkChange) + Send>;
type ParameterChangeCallback = Box<dyn FnMut(MultiAddress, ParamRef) + Send>;
type AttentionCallback = Box<dyn FnMut(AttentionRecord) + Send>;

/// Owns the per-node attention queues and the five registered-callback
/// slots named in spec §6 "Event path", plus attention itself
/// (spec §4.5).
#[derive(Default)]
pub struct EventDispatcher {
    attention_queues: BTreeMap<MultiAddress, VecDeque<AttentionRecord>>,
    on_error: Option<ErrorCallback>,
    on_command_complete: Option<CommandCompleteCallback>,
    on_cache_invalidate: Option<CacheInvalidateCallback>,
    on_network_state: Option<NetworkStateCallback>,
    on_parameter_change: Option<ParameterChangeCallback>,
    on_attention: Option<AttentionCallback>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(&mut self, cb: impl FnMut(FaultEvent) + Send + 'static) {
        self.on_error = Some(Box::new(cb));
    }

    pub fn on_command_complete(&mut self, cb: impl FnMut(CommandOutcome) + Send + 'static) {
        self.on_command_complete = Some(Box::new(cb));
    }

    pub fn on_cache_invalidate(&mut self, cb: impl FnMut(MultiAddress, ParamRef) + Send + 'static) {
        self.on_cache_invalidate = Some(Box::new(cb));
    }

    pub fn on_network_state(&mut self, cb: impl FnMut(u8, NetworkChange) + Send + 'static) {
        self.on_network_state = Some(Box::new(cb));
    }

    pub fn on_parameter_change(&mut self, cb: impl FnMut(MultiAddress, ParamRef) + Send + 'static) {
        self.on_parameter_change = Some(Box::new(cb));
    }

    pub fn on_attention(&mut self, cb: impl FnMut(AttentionRecord) + Send + 'static) {
        self.on_attention = Some(Box::new(cb));
    }

    /// Queues one attention record for its node (in arrival order) and, if
    /// a callback is registered, invokes it (spec §4.5 "Ordering":
    /// "Attentions from a single node are delivered in the order received").
    pub fn push_attention(&mut self, record: AttentionRecord) {
        let queue = self.attention_queues.entry(record.address).or_default();
        if queue.len() >= ATTENTION_QUEUE_CAPACITY {
            queue.pop_front();
        }
        queue.push_back(record);
        if let Some(cb) = self.on_attention.as_mut() {
            cb(record);
        }
    }

    pub fn push_error(&mut self, fault: FaultEvent) {
        if let Some(cb) = self.on_error.as_mut() {
            cb(fault);
        }
    }

    pub fn push_command_complete(&mut self, outcome: CommandOutcome) {
        if let Some(cb) = self.on_command_complete.as_mut() {
            cb(outcome);
        }
    }

    pub fn push_cache_invalidate(&mut self, address: MultiAddress, param: ParamRef) {
        if let Some(cb) = self.on_cache_invalidate.as_mut() {
            cb(address, param);
        }
    }

    pub fn push_network_state(&mut self, net: u8, change: NetworkChange) {
        if let Some(cb) = self.on_network_state.as_mut() {
            cb(net, change);
        }
    }

    pub fn push_parameter_change(&mut self, address: MultiAddress, param: ParamRef) {
        if let Some(cb) = self.on_parameter_change.as_mut() {
            cb(address, param);
        }
    }

    /// Polled alternative to the attention callback (spec §4.5
    /// "next_attention(net) returns the oldest undelivered AttnRecord
    /// without a callback").
    pub fn next_attention(&mut self, address: MultiAddress) -> Option<AttentionRecord> {
        self.attention_queues.get_mut(&address)?.pop_front()
    }

    pub fn pending_attention_count(&self, address: MultiAddress) -> usize {
        self.attention_queues
            .get(&address)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn drain_attentions(&mut self, address: MultiAddress) -> Vec<AttentionRecord> {
        let mut out = Vec::new();
        while let Some(a) = self.next_attention(address) {
            out.push(a);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use alloc::sync::Arc;

    fn addr(n: u8) -> MultiAddress {
        MultiAddress::from_net_node(0, n)
    }

    #[test]
    fn attentions_from_one_node_are_delivered_in_arrival_order() {
        let mut d = EventDispatcher::new();
        d.push_attention(AttentionRecord {
            address: addr(1),
            bits: 0x1,
            at_us: 10,
        });
        d.push_attention(AttentionRecord {
            address: addr(1),
            bits: 0x2,
            at_us: 20,
        });
        let drained = d.drain_attentions(addr(1));
        assert_eq!(drained[0].bits, 0x1);
        assert_eq!(drained[1].bits, 0x2);
    }

    #[test]
    fn callback_fires_alongside_the_polled_queue() {
        let mut d = EventDispatcher::new();
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        d.on_attention(move |record| {
            seen2.store(record.bits, Ordering::SeqCst);
        });
        d.push_attention(AttentionRecord {
            address: addr(2),
            bits: 0x7,
            at_us: 5,
        });
        assert_eq!(seen.load(Ordering::SeqCst), 0x7);
        assert_eq!(d.pending_attention_count(addr(2)), 1);
    }

    #[test]
    fn different_nodes_keep_independent_queues() {
        let mut d = EventDispatcher::new();
        d.push_attention(AttentionRecord {
            address: addr(1),
            bits: 1,
            at_us: 0,
        });
        assert_eq!(d.pending_attention_count(addr(2)), 0);
        assert_eq!(d.pending_attention_count(addr(1)), 1);
    }
}
