//! Network State Machine (spec §4.4).
//!
//! Built the same way the teacher structures its NMT state machines: an
//! explicit `current_state` field, a `process_event` entry point matching
//! `(current_state, event)` tuples, and a small retry policy struct rather
//! than hard-coded constants (spec §9 "Open questions": retry count and
//! backoff for address-reverse failures are left to the implementer).

use crate::error::DriverError;
use crate::hal::BaudRate;
use alloc::vec::Vec;

/// States named exactly as in spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Offline,
    Probing,
    BreakSent,
    AddressAssigning,
    AddressReversing,
    BaudNegotiating,
    Inventorying,
    Online,
    Broken,
    Stopping,
    Closed,
}

/// Inputs that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    StartController,
    BreakGuardElapsed,
    AddressAssignComplete { node_count: u8 },
    AddressAssignTimeout,
    ReverseVerified,
    ReverseFailed,
    BaudNegotiated { rate: BaudRate },
    BaudDegraded { rate: BaudRate },
    InventoryComplete,
    InventoryPartial,
    UnrecoverableError(DriverError),
    RecoverBackoffElapsed,
    StopRequested,
    ShutdownRequested,
    ClosedAck,
}

/// Published on every state change (spec §4.4 "Emitted events"), delivered
/// both to a pollable queue and to the registered network-state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkChange {
    Offline,
    Resetting,
    Online,
    NoPort,
    FlashMode,
    BaudUnsupported,
    BaudChanging,
    Broken,
    Stopping,
    Closed,
}

/// Small bounded-retry policy; concrete defaults are configuration, not
/// baked-in constants (spec §9 open question).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_address_assign_retries: u8,
    pub max_reverse_retries: u8,
    pub broken_backoff_ms: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_address_assign_retries: 3,
            max_reverse_retries: 3,
            broken_backoff_ms: 500,
        }
    }
}

/// Result of one `process_event` call: any `NetworkChange`s to publish and
/// any `DriverError`s to surface (e.g. to fail outstanding commands).
#[derive(Debug, Default)]
pub struct StateTransitionResult {
    pub changes: Vec<NetworkChange>,
    pub errors: Vec<DriverError>,
}

impl StateTransitionResult {
    fn change(change: NetworkChange) -> Self {
        Self {
            changes: alloc::vec![change],
            errors: Vec::new(),
        }
    }

    fn error(error: DriverError) -> Self {
        Self {
            changes: Vec::new(),
            errors: alloc::vec![error],
        }
    }

    fn broken(error: DriverError) -> Self {
        Self {
            changes: alloc::vec![NetworkChange::Broken],
            errors: alloc::vec![error],
        }
    }

    fn none() -> Self {
        Self::default()
    }
}

pub struct NetworkStateMachine {
    pub current_state: NetworkState,
    pub retry_policy: RetryPolicy,
    address_assign_attempts: u8,
    reverse_attempts: u8,
}

impl Default for NetworkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: NetworkState::Offline,
            retry_policy: RetryPolicy::default(),
            address_assign_attempts: 0,
            reverse_attempts: 0,
        }
    }

    pub fn with_retry_policy(retry_policy: RetryPolicy) -> Self {
        Self {
            retry_policy,
            ..Self::new()
        }
    }

    /// Drives one transition. Unknown `(state, event)` pairs are a no-op,
    /// mirroring the teacher's NMT machines silently ignoring events that
    /// don't apply to the current state rather than treating them as bugs.
    pub fn process_event(&mut self, event: StateEvent) -> StateTransitionResult {
        use NetworkState::*;
        use StateEvent::*;

        // An unrecoverable error moves any state straight to Broken (spec
        // §4.4: "Any state -> Broken on unrecoverable error").
        if let UnrecoverableError(err) = event {
            self.current_state = Broken;
            return StateTransitionResult::broken(err);
        }

        match (self.current_state, event) {
            (Offline, StartController) => {
                self.current_state = Probing;
                StateTransitionResult::none()
            }
            (Probing, BreakGuardElapsed) => {
                self.current_state = BreakSent;
                StateTransitionResult::change(NetworkChange::Resetting)
            }
            (BreakSent, BreakGuardElapsed) => {
                self.address_assign_attempts = 0;
                self.current_state = AddressAssigning;
                StateTransitionResult::none()
            }
            (AddressAssigning, AddressAssignComplete { .. }) => {
                self.current_state = AddressReversing;
                StateTransitionResult::none()
            }
            (AddressAssigning, AddressAssignTimeout) => {
                self.address_assign_attempts += 1;
                if self.address_assign_attempts >= self.retry_policy.max_address_assign_retries {
                    self.current_state = Broken;
                    StateTransitionResult::broken(DriverError::NodeReset)
                } else {
                    StateTransitionResult::none()
                }
            }
            (AddressReversing, ReverseVerified) => {
                self.current_state = BaudNegotiating;
                StateTransitionResult::none()
            }
            (AddressReversing, ReverseFailed) => {
                self.reverse_attempts += 1;
                if self.reverse_attempts >= self.retry_policy.max_reverse_retries {
                    self.current_state = Broken;
                    StateTransitionResult::broken(DriverError::NodeReset)
                } else {
                    StateTransitionResult::none()
                }
            }
            (BaudNegotiating, BaudNegotiated { .. }) => {
                self.current_state = Inventorying;
                StateTransitionResult::none()
            }
            (BaudNegotiating, BaudDegraded { .. }) => {
                StateTransitionResult::change(NetworkChange::BaudChanging)
            }
            (Inventorying, InventoryComplete) => {
                self.current_state = Online;
                StateTransitionResult::change(NetworkChange::Online)
            }
            (Inventorying, InventoryPartial) => {
                self.current_state = Broken;
                StateTransitionResult::broken(DriverError::NodeReset)
            }
            (Online, StopRequested) | (Online, ShutdownRequested) => {
                self.current_state = Stopping;
                StateTransitionResult::change(NetworkChange::Stopping)
            }
            (Stopping, ClosedAck) => {
                self.current_state = Closed;
                StateTransitionResult::change(NetworkChange::Closed)
            }
            (Broken, RecoverBackoffElapsed) => {
                self.current_state = Probing;
                StateTransitionResult::none()
            }
            (Broken, StopRequested) | (Broken, ShutdownRequested) => {
                self.current_state = Closed;
                StateTransitionResult::change(NetworkChange::Closed)
            }
            _ => StateTransitionResult::none(),
        }
    }
}
