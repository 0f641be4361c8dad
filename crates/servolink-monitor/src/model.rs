//! Serializable diagnostic data structures for the web monitor.
//!
//! These DTOs exist so a `servolink_rs::Driver`'s internal state never needs
//! `serde` itself (keeping the core `no_std`-clean): this crate builds a
//! plain, owned snapshot from the driver's public getters and serializes
//! that, the same separation the teacher draws in `powerlink-rs-monitor`'s
//! own `model.rs`.

use serde::Serialize;

/// One network's state as seen by the monitor (spec §3 `Network` /
/// SPEC_FULL §16 "Monitor").
#[derive(Serialize, Clone, Debug)]
pub struct NetworkSummary {
    pub index: u8,
    pub state: String,
    pub node_count: u8,
    pub nodes: Vec<NodeSummary>,
}

/// One node's live status fields, the subset meaningful to a diagnostic
/// viewer (stop/motion-block state, pending attentions) rather than the
/// full parameter cache.
#[derive(Serialize, Clone, Debug)]
pub struct NodeSummary {
    pub node_index: u8,
    /// Set once a sticky E-Stop latch is active (`Node::motion_blocked`).
    pub motion_blocked: bool,
    pub pending_attentions: usize,
}

/// A single reported fault, flattened for JSON delivery.
#[derive(Serialize, Clone, Debug)]
pub struct FaultRecord {
    pub net: u8,
    pub node_index: u8,
    pub error: String,
    pub at_us: u64,
}

/// The packet sent from the driver's callback threads to the monitor's
/// broadcast channel — one complete picture of every registered network,
/// plus the most recent faults since the last snapshot.
#[derive(Serialize, Clone, Debug)]
pub struct DiagnosticSnapshot {
    pub at_us: u64,
    pub networks: Vec<NetworkSummary>,
    pub recent_faults: Vec<FaultRecord>,
}
