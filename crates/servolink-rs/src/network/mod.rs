//! A `Network`: one serial link, one ring of nodes, one Command Tracker,
//! one Diagnostic Log (spec §3 `Network`).

pub mod state_machine;

use crate::address::MultiAddress;
use crate::diag::DiagLog;
use crate::frame::classifier::Classifier;
use crate::hal::{BaudRate, SerialPort};
use crate::node::Node;
use crate::tracker::CommandTracker;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

pub use state_machine::{NetworkChange, NetworkState, NetworkStateMachine, StateEvent};

/// Identifies one serial port and the rate to try first (spec §3
/// `ControllerSpec`).
#[derive(Debug, Clone)]
pub struct ControllerSpec {
    pub port_name: String,
    pub initial_rate: BaudRate,
    /// Enables the `Broken -> Probing` autonomous recovery path and the
    /// `AddressAssigning -> AddressReversing` ring-verification step
    /// (spec §4.4).
    pub auto_net_discovery: bool,
}

impl ControllerSpec {
    pub fn new(port_name: impl Into<String>, initial_rate: BaudRate) -> Self {
        Self {
            port_name: port_name.into(),
            initial_rate,
            auto_net_discovery: true,
        }
    }
}

/// One physical network: a serial port, its Command Tracker, its nodes, and
/// its own state machine and diagnostic log. Only the state machine mutates
/// `state` (spec §3: "Only the state machine mutates this field").
pub struct Network {
    pub index: u8,
    pub spec: ControllerSpec,
    pub port: Box<dyn SerialPort>,
    pub tracker: CommandTracker,
    pub state_machine: NetworkStateMachine,
    pub diag: DiagLog,
    pub classifier: Classifier,
    pub nodes: Vec<Node>,
    pending_events: Vec<NetworkChange>,
    last_traffic_us: u64,
    heartbeat_failures: u8,
}

impl Network {
    pub fn new(index: u8, spec: ControllerSpec, port: Box<dyn SerialPort>) -> Self {
        Self {
            index,
            spec,
            port,
            tracker: CommandTracker::new(crate::tracker::DEFAULT_QUEUE_LIMIT),
            state_machine: NetworkStateMachine::new(),
            diag: DiagLog::new(),
            classifier: Classifier::new(),
            nodes: Vec::new(),
            pending_events: Vec::new(),
            last_traffic_us: 0,
            heartbeat_failures: 0,
        }
    }

    pub fn state(&self) -> NetworkState {
        self.state_machine.current_state
    }

    pub fn is_online(&self) -> bool {
        self.state() == NetworkState::Online
    }

    /// Address space currently assigned (spec §3: "a network in the Online
    /// state has a contiguous address assignment `0..N-1`").
    pub fn node_count(&self) -> u8 {
        self.nodes.len() as u8
    }

    pub fn find_node(&self, address: MultiAddress) -> Option<&Node> {
        self.nodes.iter().find(|n| n.address == address)
    }

    pub fn find_node_mut(&mut self, address: MultiAddress) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.address == address)
    }

    /// Validates an address against the currently inventoried node count
    /// (spec §3: "a command targeting an address >= N ... fails with
    /// InvalidAddress synchronously").
    pub fn validate_address(&self, address: MultiAddress) -> Result<(), crate::error::DriverError> {
        if !self.is_online() {
            return Err(crate::error::DriverError::NetworkNotOnline);
        }
        let node_index = address.node();
        let count = self.node_count();
        if node_index >= count {
            return Err(crate::error::DriverError::AddressOutOfRange {
                requested: node_index,
                online_count: count,
            });
        }
        Ok(())
    }

    /// Records a state-machine-emitted change for later delivery to the
    /// registered network-state callback / `next_network_change` poll.
    pub(crate) fn push_change(&mut self, change: NetworkChange) {
        self.pending_events.push(change);
    }

    pub fn drain_changes(&mut self) -> Vec<NetworkChange> {
        core::mem::take(&mut self.pending_events)
    }

    /// Records that traffic was just seen on this network, resetting the
    /// polling worker's idle timer (spec §4.9: "if no traffic has flowed").
    pub(crate) fn note_traffic(&mut self, now_us: u64) {
        self.last_traffic_us = now_us;
    }

    pub(crate) fn idle_since(&self, now_us: u64) -> u64 {
        now_us.saturating_sub(self.last_traffic_us)
    }

    /// Updates the consecutive-heartbeat-failure counter, returning `true`
    /// the moment a second consecutive failure is recorded (spec §4.4: "The
    /// polling worker raises Broken if a heartbeat read fails twice
    /// consecutively").
    pub(crate) fn record_heartbeat_result(&mut self, ok: bool) -> bool {
        if ok {
            self.heartbeat_failures = 0;
            false
        } else {
            self.heartbeat_failures += 1;
            self.heartbeat_failures >= 2
        }
    }
}
