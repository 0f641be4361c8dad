// crates/servolink-serial-linux/src/lib.rs
#![cfg(target_os = "linux")]
//! Linux `SerialPort` implementation backed by the `serialport` crate,
//! grounded on the teacher's `LinuxPnetInterface` (`powerlink-rs-linux`):
//! same `Mutex`-guarded handle, same "timeout is not an error" read contract,
//! same re-open-on-reconfigure pattern for baud changes.

use log::warn;
use servolink_rs::error::DriverError;
use servolink_rs::hal::{BaudRate, SerialPort};
use std::sync::Mutex;
use std::time::Duration;

/// Read timeout handed to the OS port. Short enough that the reader thread
/// in `servolink_rs::runtime` keeps making progress on other networks while
/// this one has nothing queued (see `runtime.rs`'s `READER_IDLE_SLEEP`).
const READ_TIMEOUT: Duration = Duration::from_millis(5);

fn to_serialport_baud(baud: BaudRate) -> u32 {
    baud.bits_per_sec()
}

/// A single Linux serial device (e.g. `/dev/ttyUSB0`).
///
/// The underlying `Box<dyn serialport::SerialPort>` is held in a `Mutex`
/// even though `SerialPort: Send` already lets the driver own one instance
/// per network — matching the teacher's own choice to guard its tx/rx
/// handles behind a lock rather than assume single-threaded access, since a
/// `servolink_rs::runtime::RuntimeHandle` may hand this port's network
/// frames to both a reader thread and (indirectly, via shutdown) the
/// caller's own thread.
pub struct LinuxSerialPort {
    path: String,
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
}

impl LinuxSerialPort {
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

impl SerialPort for LinuxSerialPort {
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
        // serialport's baud rate can be changed on an open handle directly,
        // unlike pnet's channel which the teacher had to recreate from
        // scratch (`LinuxPnetInterface::set_read_timeout`).
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
