//! Parameter / object access (spec §3 "Parameter reference", §16).
//!
//! The core treats every parameter as an opaque, variable-length byte
//! sequence; decoding its meaning is the caller's responsibility (spec §9
//! "Polymorphism over node families" explicitly rejects a strongly-typed
//! per-parameter catalog).

use alloc::vec::Vec;

/// `(bank, index)` plus the non-volatile-shadow bit (spec §3 "Parameter
/// reference").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamRef {
    pub bank: u8,
    pub index: u8,
    pub non_volatile: bool,
}

impl ParamRef {
    pub const fn live(bank: u8, index: u8) -> Self {
        Self {
            bank,
            index,
            non_volatile: false,
        }
    }

    pub const fn non_volatile(bank: u8, index: u8) -> Self {
        Self {
            bank,
            index,
            non_volatile: true,
        }
    }
}

/// An opaque parameter payload. Small values (the common case) are stored
/// inline; this stays a thin `Vec` wrapper rather than a fixed array so the
/// `std` and `no_std` paths share one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamValue(Vec<u8>);

impl ParamValue {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_and_non_volatile_refs_to_the_same_slot_are_distinct() {
        let live = ParamRef::live(1, 2);
        let nv = ParamRef::non_volatile(1, 2);
        assert_ne!(live, nv);
        assert_eq!(live.bank, nv.bank);
        assert_eq!(live.index, nv.index);
    }
}
