//! Safety & Stop Semantics (spec §4.7).

use crate::address::MultiAddress;

/// Stop style carried in a NodeStop register (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStyle {
    Abrupt,
    DecelLimit,
    DecelAtActive,
    AfterCycle,
    Ignore,
}

/// Latched modifier bits. Hand-rolled rather than built on the `bitflags`
/// crate, the same way the teacher hand-rolls `FeatureFlags(pub u32)` in
/// `nmt/flags.rs` without pulling in that dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopModifiers(pub u8);

impl StopModifiers {
    pub const EMPTY: Self = Self(0);
    pub const MOTION_LOCK: Self = Self(1 << 0);
    pub const CONTROLLED: Self = Self(1 << 1);
    pub const QUIET: Self = Self(1 << 2);
    pub const DISABLE: Self = Self(1 << 3);
    /// When combined with another modifier bit in a NodeStop request, clears
    /// that modifier's latch instead of setting it (spec §4.7).
    pub const CLEAR: Self = Self(1 << 4);

    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & 0b0001_1111)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_clear_request(self) -> bool {
        self.contains(Self::CLEAR)
    }
}

/// A NodeStop request: the 16-bit on-wire register split into style +
/// modifiers for the host-side API (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStopCommand {
    pub style: StopStyle,
    pub modifiers: StopModifiers,
}

impl NodeStopCommand {
    pub const fn new(style: StopStyle, modifiers: StopModifiers) -> Self {
        Self { style, modifiers }
    }

    /// Whether this request sets the sticky E-Stop latch (spec §4.7:
    /// "Treat `STOP_TYPE_ESTOP_*` as sticky on the host side").
    pub const fn sets_estop_latch(self) -> bool {
        self.modifiers.contains(StopModifiers::MOTION_LOCK) && !self.modifiers.is_clear_request()
    }

    /// Whether this request clears a previously-set E-Stop latch.
    pub const fn clears_estop_latch(self) -> bool {
        self.modifiers.contains(StopModifiers::MOTION_LOCK) && self.modifiers.is_clear_request()
    }
}

/// Per-node stop configuration, persisted across NodeStop calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopConfig {
    pub last_style: Option<StopStyleStorage>,
    pub active_modifiers: StopModifiers,
}

/// `StopStyle` does not derive `Default`; this wrapper lets `StopConfig`
/// derive it while still recording the last applied style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopStyleStorage(pub StopStyle);

/// "Auto-brake on disable" binding (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrakeBinding {
    pub brake_index: u8,
    pub enabled: bool,
    pub node_address: MultiAddress,
}

/// "Shutdown-on-exit" event set: a group NodeStop fired when the driver
/// shuts down (spec §4.7).
#[derive(Debug, Clone)]
pub struct ShutdownOnExit {
    pub targets: alloc::vec::Vec<MultiAddress>,
    pub command: NodeStopCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estop_then_clear_toggles_latch_intent() {
        let estop = NodeStopCommand::new(StopStyle::Abrupt, StopModifiers::MOTION_LOCK);
        assert!(estop.sets_estop_latch());
        assert!(!estop.clears_estop_latch());

        let clear = NodeStopCommand::new(
            StopStyle::Ignore,
            StopModifiers::MOTION_LOCK.union(StopModifiers::CLEAR),
        );
        assert!(clear.clears_estop_latch());
        assert!(!clear.sets_estop_latch());
    }

    #[test]
    fn modifiers_from_bits_truncate_drops_unknown_bits() {
        let m = StopModifiers::from_bits_truncate(0xFF);
        assert_eq!(m.0, 0b0001_1111);
    }

    #[test]
    fn non_estop_modifier_does_not_set_latch() {
        let quiet_only = NodeStopCommand::new(StopStyle::DecelLimit, StopModifiers::QUIET);
        assert!(!quiet_only.sets_estop_latch());
    }
}
