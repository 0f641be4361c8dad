//! `Node`: per-address device record owned exclusively by its `Network`
//! (spec §3 `Node`).

use crate::address::MultiAddress;
use crate::dataacq::DataAcqRing;
use crate::param::{ParamRef, ParamValue};
use crate::safety::{BrakeBinding, StopConfig};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// Identity fields populated during the `Inventorying` state (spec §4.4:
/// "reading device-ID, firmware-version, hardware-version, option register,
/// and serial number from every node").
#[derive(Debug, Clone, Default)]
pub struct NodeIdentity {
    pub device_type: u16,
    pub firmware_version: u32,
    pub hardware_version: u32,
    pub serial_number: u32,
    pub part_number: Vec<u8>,
    pub option_register: u32,
}

/// 32-bit event masks applied to a node's internal status register to
/// decide which bits raise an attention (spec §4.5 "Model").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventMasks {
    pub attention: u32,
    pub warning: u32,
    pub alert: u32,
    pub status: u32,
}

/// Record of the most recent shutdown a node went through, if any
/// (spec §3 "shutdown-info record").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownInfo {
    pub occurred: bool,
    pub at_us: u64,
    pub reason_code: u16,
}

pub struct Node {
    pub address: MultiAddress,
    pub identity: NodeIdentity,
    pub masks: EventMasks,
    pub last_status: u32,
    pub stop_config: StopConfig,
    pub brake_binding: Option<BrakeBinding>,
    pub shutdown_info: ShutdownInfo,
    /// True once a sticky E-Stop latch is set; cleared only by a
    /// `Clear`-flagged NodeStop (spec §4.7).
    pub motion_blocked: bool,
    param_cache: BTreeMap<ParamRef, ParamValue>,
    pub data_acq: DataAcqRing,
}

impl Node {
    pub fn new(address: MultiAddress) -> Self {
        Self {
            address,
            identity: NodeIdentity::default(),
            masks: EventMasks::default(),
            last_status: 0,
            stop_config: StopConfig::default(),
            brake_binding: None,
            shutdown_info: ShutdownInfo::default(),
            motion_blocked: false,
            param_cache: BTreeMap::new(),
            data_acq: DataAcqRing::new(),
        }
    }

    pub fn cached_param(&self, param: ParamRef) -> Option<&ParamValue> {
        self.param_cache.get(&param)
    }

    pub fn cache_param(&mut self, param: ParamRef, value: ParamValue) {
        self.param_cache.insert(param, value);
    }

    /// Invalidates one cached parameter on a `param-change` notice
    /// (spec §4.2 classifier table: "invalidate cache").
    pub fn invalidate_param(&mut self, param: ParamRef) {
        self.param_cache.remove(&param);
    }

    pub fn invalidate_all_params(&mut self) {
        self.param_cache.clear();
    }

    /// Applies a rising-edge status update, returning the newly raised bits
    /// masked by the attention mask (spec §4.5: "bitwise-ANDed with a mask
    /// becomes non-zero on a rising edge").
    pub fn raised_attention_bits(&mut self, new_status: u32) -> u32 {
        let rising = new_status & !self.last_status;
        self.last_status = new_status;
        rising & self.masks.attention
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_cache_round_trips_and_invalidates() {
        let mut node = Node::new(MultiAddress::from_net_node(0, 1));
        let p = ParamRef::live(0, 5);
        node.cache_param(p, ParamValue::from_bytes(&[1, 2, 3]));
        assert_eq!(node.cached_param(p).unwrap().as_bytes(), &[1, 2, 3]);

        node.invalidate_param(p);
        assert!(node.cached_param(p).is_none());
    }

    #[test]
    fn attention_only_raised_on_rising_edge_within_mask() {
        let mut node = Node::new(MultiAddress::from_net_node(0, 1));
        node.masks.attention = 0b0011;

        // First observation: bit 0 rises, masked bit.
        assert_eq!(node.raised_attention_bits(0b0001), 0b0001);
        // Same status again: nothing new rises.
        assert_eq!(node.raised_attention_bits(0b0001), 0);
        // Bit 2 rises but is outside the mask.
        assert_eq!(node.raised_attention_bits(0b0101), 0);
        // Bit 1 rises, inside the mask.
        assert_eq!(node.raised_attention_bits(0b0111), 0b0010);
    }
}
