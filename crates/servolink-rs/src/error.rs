//! The single error taxonomy shared across every public API (spec §7).

use crate::address::MultiAddress;
use core::fmt;

/// Every error the driver can surface, grouped by the families in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    // --- Transport ---
    PortNotOpen,
    WriteFailed,
    ReadFailed,
    PortOverrun,

    // --- Framing ---
    Fragment,
    BadChecksum,
    StrayData,
    Babble,
    RxParity,
    FramingError,

    // --- Addressing ---
    UnknownAddress,
    AddressOutOfRange { requested: u8, online_count: u8 },
    NetworkNotOnline,

    // --- Command ---
    CommandUnknown,
    IllegalArgs,
    WriteToReadOnly,
    InsufficientAccess,
    CommandTimeout,
    PayloadTooLarge,

    // --- Motion ---
    BufferFull,
    SpecError,
    EStopped,
    RangeError,
    ShutdownBlocked,
    MotionBlocked,
    InMotion,
    HomingBlocked,

    // --- Lifecycle ---
    CommAborted,
    NodeReset,
    BaudUnsupported,

    /// A catch-all for a node's self-reported on-wire error code that does
    /// not map to one of the taxonomy members above.
    NodeReported(u16),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortNotOpen => write!(f, "serial port is not open"),
            Self::WriteFailed => write!(f, "write to serial port failed"),
            Self::ReadFailed => write!(f, "read from serial port failed"),
            Self::PortOverrun => write!(f, "serial port receive buffer overrun"),
            Self::Fragment => write!(f, "frame discarded as a fragment"),
            Self::BadChecksum => write!(f, "frame checksum mismatch"),
            Self::StrayData => write!(f, "non start-of-packet octet seen before SOP"),
            Self::Babble => write!(f, "runaway byte stream without a start-of-packet marker"),
            Self::RxParity => write!(f, "receive parity error"),
            Self::FramingError => write!(f, "serial framing error"),
            Self::UnknownAddress => write!(f, "no node is known at this address"),
            Self::AddressOutOfRange {
                requested,
                online_count,
            } => write!(
                f,
                "address {requested} is out of range for a network of {online_count} nodes"
            ),
            Self::NetworkNotOnline => write!(f, "network is not online"),
            Self::CommandUnknown => write!(f, "node does not recognize the command opcode"),
            Self::IllegalArgs => write!(f, "command arguments are illegal"),
            Self::WriteToReadOnly => write!(f, "attempted to write a read-only parameter"),
            Self::InsufficientAccess => write!(f, "insufficient access level for this operation"),
            Self::CommandTimeout => write!(f, "command timed out waiting for a response"),
            Self::PayloadTooLarge => write!(f, "payload exceeds the maximum frame length"),
            Self::BufferFull => write!(f, "node's onboard move buffer is full"),
            Self::SpecError => write!(f, "move specification is invalid"),
            Self::EStopped => write!(f, "node is in an E-Stop condition"),
            Self::RangeError => write!(f, "value is out of the node's allowed range"),
            Self::ShutdownBlocked => write!(f, "operation blocked during shutdown"),
            Self::MotionBlocked => write!(f, "motion is blocked pending an E-Stop clear"),
            Self::InMotion => write!(f, "node is already in motion"),
            Self::HomingBlocked => write!(f, "operation blocked pending homing"),
            Self::CommAborted => write!(f, "command aborted, network is closing or resetting"),
            Self::NodeReset => write!(f, "node reset mid-command"),
            Self::BaudUnsupported => write!(f, "requested baud rate is not supported"),
            Self::NodeReported(code) => write!(f, "node reported error code {code:#06x}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DriverError {}

/// Maximum length of the triggering-command snapshot kept alongside a fault
/// (spec §3 `ErrorRecord`, grounded on the source's 18-byte `packetbuf18`).
pub const FAULT_SNAPSHOT_LEN: usize = 18;

/// A surfaced error tagged with the node it came from and, where available,
/// a snapshot of the command that triggered it (spec §7: "every surface-level
/// error carries the originating MultiAddress").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultEvent {
    pub address: MultiAddress,
    pub error: DriverError,
    pub snapshot: Option<[u8; FAULT_SNAPSHOT_LEN]>,
    pub snapshot_len: u8,
}

impl FaultEvent {
    pub fn new(address: MultiAddress, error: DriverError) -> Self {
        Self {
            address,
            error,
            snapshot: None,
            snapshot_len: 0,
        }
    }

    pub fn with_snapshot(address: MultiAddress, error: DriverError, data: &[u8]) -> Self {
        let mut snapshot = [0u8; FAULT_SNAPSHOT_LEN];
        let len = data.len().min(FAULT_SNAPSHOT_LEN);
        snapshot[..len].copy_from_slice(&data[..len]);
        Self {
            address,
            error,
            snapshot: Some(snapshot),
            snapshot_len: len as u8,
        }
    }

    pub fn snapshot_bytes(&self) -> &[u8] {
        match &self.snapshot {
            Some(buf) => &buf[..self.snapshot_len as usize],
            None => &[],
        }
    }
}

impl fmt::Display for FaultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.address, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_truncates_to_capacity() {
        let data = [7u8; 40];
        let ev = FaultEvent::with_snapshot(MultiAddress::from_net_node(0, 1), DriverError::CommandTimeout, &data);
        assert_eq!(ev.snapshot_bytes().len(), FAULT_SNAPSHOT_LEN);
    }

    #[test]
    fn display_includes_address() {
        let ev = FaultEvent::new(MultiAddress::from_net_node(0, 2), DriverError::MotionBlocked);
        let text = alloc::format!("{ev}");
        assert!(text.contains("net0/node2"));
    }
}
