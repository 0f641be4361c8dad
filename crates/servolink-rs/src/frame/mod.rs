//! Wire frame definitions (spec §3 "Frame", §6 "Wire protocol (bit-exact)").

pub mod codec;
pub mod classifier;

use crate::error::DriverError;
use core::convert::TryFrom;

/// Tagged union of the eight packet types the wire header can carry
/// (spec §3 "Packet type variants"). Values are the 3-bit `packet type`
/// field from header octet 0, bits [6:4].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Command = 0,
    Response = 1,
    Error = 2,
    ExtendLow = 3,
    AttnRequest = 4,
    SetAddress = 5,
    Trigger = 6,
    ExtendHigh = 7,
}

impl PacketType {
    /// Flow-controlled types append a checksum octet and are matched by the
    /// Command Tracker (spec §4.1 "Checksum", §6).
    pub const fn is_flow_controlled(self) -> bool {
        matches!(
            self,
            Self::Command | Self::Response | Self::Error | Self::ExtendLow
        )
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DriverError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & 0x07 {
            0 => Ok(Self::Command),
            1 => Ok(Self::Response),
            2 => Ok(Self::Error),
            3 => Ok(Self::ExtendLow),
            4 => Ok(Self::AttnRequest),
            5 => Ok(Self::SetAddress),
            6 => Ok(Self::Trigger),
            7 => Ok(Self::ExtendHigh),
            _ => unreachable!("masked to 3 bits"),
        }
    }
}

/// Sub-type carried by an `ExtendLow` packet (spec §4.2 routing table).
///
/// The wire carries this as a leading payload tag octet (`0`, `1`, `2`);
/// the spec leaves the concrete sub-kind encoding to the implementer, the
/// same way it leaves the host-assigned command opcodes in `driver.rs`
/// unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendLowKind {
    DataAcq,
    ParamChange,
    HostAlive,
}

impl ExtendLowKind {
    pub const fn tag(self) -> u8 {
        match self {
            Self::DataAcq => 0,
            Self::ParamChange => 1,
            Self::HostAlive => 2,
        }
    }
}

impl TryFrom<u8> for ExtendLowKind {
    type Error = DriverError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::DataAcq),
            1 => Ok(Self::ParamChange),
            2 => Ok(Self::HostAlive),
            _ => Err(DriverError::Fragment),
        }
    }
}

/// Sub-type carried by an `ExtendHigh` packet (spec §3, §4.4), tagged on
/// the wire the same way as `ExtendLowKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendHighKind {
    Reset,
    ReverseAddress,
    NetworkNodeStop,
    DiagInfo,
    BaudChange,
}

impl ExtendHighKind {
    pub const fn tag(self) -> u8 {
        match self {
            Self::Reset => 0,
            Self::ReverseAddress => 1,
            Self::NetworkNodeStop => 2,
            Self::DiagInfo => 3,
            Self::BaudChange => 4,
        }
    }
}

impl TryFrom<u8> for ExtendHighKind {
    type Error = DriverError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Reset),
            1 => Ok(Self::ReverseAddress),
            2 => Ok(Self::NetworkNodeStop),
            3 => Ok(Self::DiagInfo),
            4 => Ok(Self::BaudChange),
            _ => Err(DriverError::Fragment),
        }
    }
}

/// Maximum number of 7-bit "septet" octets the 5-bit length field can carry
/// on the wire (spec §6: "length ... capped at 31").
pub const MAX_WIRE_SEPTETS: u8 = 31;

/// Maximum original (unpacked) payload length that fits in
/// `MAX_WIRE_SEPTETS` septets: `floor(31 * 7 / 8)` (spec §3 "K≈29", derived
/// exactly here from the bit-exact wire layout in §6).
pub const MAX_PAYLOAD_BYTES: usize = (MAX_WIRE_SEPTETS as usize * 7) / 8;

/// The two-octet frame header (spec §6, bit-exact).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 4-bit node address (destination when host-originated, source when
    /// node-originated).
    pub address: u8,
    pub packet_type: PacketType,
    /// Number of 7-bit wire septets the payload occupies (0..=31).
    pub septet_len: u8,
    pub mode: bool,
    pub from_node: bool,
}

impl FrameHeader {
    pub fn encode(self) -> [u8; 2] {
        let octet0 = 0x80 | ((self.packet_type as u8) << 4) | (self.address & 0x0F);
        let octet1 = ((self.from_node as u8) << 6)
            | ((self.mode as u8) << 5)
            | (self.septet_len & 0x1F);
        [octet0, octet1]
    }

    pub fn decode(octets: [u8; 2]) -> Result<Self, DriverError> {
        let [octet0, octet1] = octets;
        if octet0 & 0x80 == 0 {
            return Err(DriverError::StrayData);
        }
        let packet_type = PacketType::try_from((octet0 >> 4) & 0x07)?;
        Ok(Self {
            address: octet0 & 0x0F,
            packet_type,
            septet_len: octet1 & 0x1F,
            mode: (octet1 & 0x20) != 0,
            from_node: (octet1 & 0x40) != 0,
        })
    }
}

/// A fully decoded frame: header plus the original (unpacked) payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: alloc::vec::Vec<u8>,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: alloc::vec::Vec<u8>) -> Self {
        Self { header, payload }
    }
}
