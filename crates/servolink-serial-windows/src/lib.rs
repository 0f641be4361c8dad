#![cfg(target_os = "windows")]
//! Windows `SerialPort` implementation backed by the `serialport` crate's
//! COM-port support. Same contract and `Mutex` discipline as
//! `servolink-serial-linux`; kept as its own crate the way the teacher keeps
//! `powerlink-rs-windows` separate from `powerlink-rs-linux` even though
//! both wrap the same underlying transport crate, in case the platforms'
//! break-signal or baud-negotiation quirks diverge later.

use log::warn;
use servolink_rs::error::DriverError;
use servolink_rs::hal::{BaudRate, SerialPort};
use std::sync::Mutex;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_millis(5);

fn to_serialport_baud(baud: BaudRate) -> u32 {
    baud.bits_per_sec()
}

/// A single Windows COM port (e.g. `COM3`).
pub struct WindowsSerialPort {
    path: String,
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
}

impl WindowsSerialPort {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            port: Mutex::new(None),
        }
    }

    fn open_at(&self, baud: BaudRate) -> Result<Box<dyn serialport::SerialPort>, DriverError> {
        serialport::new(&self.path, to_serialport_baud(baud))
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                warn!("failed to open {}: {}", self.path, e);
                DriverError::PortNotOpen
            })
    }
}

impl SerialPort for WindowsSerialPort {
    fn open(&mut self, baud: BaudRate) -> Result<(), DriverError> {
        let opened = self.open_at(baud)?;
        *self.port.lock().unwrap() = Some(opened);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        *self.port.lock().unwrap() = None;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, DriverError> {
        let mut guard = self.port.lock().unwrap();
        let port = guard.as_mut().ok_or(DriverError::PortNotOpen)?;
        match port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => {
                warn!("read error on {}: {}", self.path, e);
                Err(DriverError::ReadFailed)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DriverError> {
        let mut guard = self.port.lock().unwrap();
        let port = guard.as_mut().ok_or(DriverError::PortNotOpen)?;
        port.write(data).map_err(|e| {
            warn!("write error on {}: {}", self.path, e);
            DriverError::WriteFailed
        })
    }

    fn set_baud(&mut self, baud: BaudRate) -> Result<(), DriverError> {
        let mut guard = self.port.lock().unwrap();
        let port = guard.as_mut().ok_or(DriverError::PortNotOpen)?;
        port.set_baud_rate(to_serialport_baud(baud)).map_err(|e| {
            warn!("failed to set baud on {}: {}", self.path, e);
            DriverError::BaudUnsupported
        })
    }

    fn send_break(&mut self, millis: u32) -> Result<(), DriverError> {
        let mut guard = self.port.lock().unwrap();
        let port = guard.as_mut().ok_or(DriverError::PortNotOpen)?;
        port.set_break().map_err(|_| DriverError::WriteFailed)?;
        std::thread::sleep(Duration::from_millis(millis as u64));
        port.clear_break().map_err(|_| DriverError::WriteFailed)
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        let mut guard = self.port.lock().unwrap();
        let port = guard.as_mut().ok_or(DriverError::PortNotOpen)?;
        port.flush().map_err(|_| DriverError::WriteFailed)
    }

    fn port_name(&self) -> &str {
        &self.path
    }
}
