#![no_std]
//! `no_std` HAL binding over `embedded-hal`/`embedded-hal-nb`'s serial
//! traits, grounded on the pack's `rtxm-rust-nrf24l01` example (the only
//! example in the pack that binds a protocol driver directly onto a
//! peripheral trait behind a feature-gated, generic-over-peripheral impl
//! block) — the teacher's own `powerlink-io-embedded` crate has no source
//! of its own to adapt.

use embedded_hal_nb::serial::{Read, Write};
use nb;
use servolink_rs::error::DriverError;
use servolink_rs::hal::{BaudRate, SerialPort};

/// Adapts any `embedded-hal-nb` UART peripheral into a `servolink_rs`
/// `SerialPort`.
///
/// `nb::Error::WouldBlock` maps onto `SerialPort::read`'s `Ok(0)`-on-timeout
/// contract: "nothing arrived yet" is not a fault, it just means the
/// classifier keeps waiting for the next octet.
pub struct EmbeddedSerialPort<S> {
    serial: S,
    baud: BaudRate,
    open: bool,
}

impl<S> EmbeddedSerialPort<S> {
    /// `baud` is the rate the peripheral was already configured for at
    /// construction time (see `set_baud`'s doc comment for why this can't
    /// be changed later).
    pub fn new(serial: S, baud: BaudRate) -> Self {
        Self {
            serial,
            baud,
            open: false,
        }
    }
}

impl<S> SerialPort for EmbeddedSerialPort<S>
where
    S: Read<u8> + Write<u8> + Send,
{
    fn open(&mut self, baud: BaudRate) -> Result<(), DriverError> {
        if baud.bits_per_sec() != self.baud.bits_per_sec() {
            return Err(DriverError::BaudUnsupported);
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.open = false;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, DriverError> {
        if !self.open {
            return Err(DriverError::PortNotOpen);
        }
        if buffer.is_empty() {
            return Ok(0);
        }
        match self.serial.read() {
            Ok(byte) => {
                buffer[0] = byte;
                Ok(1)
            }
            Err(nb::Error::WouldBlock) => Ok(0),
            Err(nb::Error::Other(_)) => Err(DriverError::ReadFailed),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DriverError> {
        if !self.open {
            return Err(DriverError::PortNotOpen);
        }
        for &byte in data {
            nb::block!(self.serial.write(byte)).map_err(|_| DriverError::WriteFailed)?;
        }
        Ok(data.len())
    }

    /// `embedded-hal-nb`'s serial traits have no runtime baud-rate
    /// reconfiguration hook — the rate is fixed by whatever clock-tree
    /// setup produced `S` and can't be renegotiated from here. Requesting
    /// the rate the peripheral already runs at is a no-op; anything else
    /// is rejected rather than silently ignored, so `negotiate_baud`'s
    /// result actually reflects what the link runs at.
    fn set_baud(&mut self, baud: BaudRate) -> Result<(), DriverError> {
        if baud.bits_per_sec() != self.baud.bits_per_sec() {
            return Err(DriverError::BaudUnsupported);
        }
        Ok(())
    }

    /// Line-break generation isn't part of `embedded-hal-nb`'s serial
    /// traits either — it's MCU-specific (usually a direct register poke
    /// on the UART peripheral). Bring-up paths that rely on a break to
    /// force nodes back to discovery baud aren't reachable through this
    /// generic binding; a concrete MCU HAL crate wanting break support
    /// needs its own `SerialPort` impl written directly against that
    /// chip's peripheral API instead of through this adapter.
    fn send_break(&mut self, _millis: u32) -> Result<(), DriverError> {
        Err(DriverError::WriteFailed)
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        nb::block!(Write::flush(&mut self.serial)).map_err(|_| DriverError::WriteFailed)
    }

    fn port_name(&self) -> &str {
        "embedded-serial"
    }
}
