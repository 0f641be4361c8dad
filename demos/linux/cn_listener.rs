// demos/linux/cn_listener.rs
//! Minimal host-side demo: bring up one network on a real serial port,
//! wait for it to reach Online, then issue a single command and print the
//! response. Not part of the cargo workspace — copy into a binary crate
//! that depends on `servolink-rs` + `servolink-serial-linux` to run it.
//!
//! IMPORTANT: replace "/dev/ttyUSB0" with your actual serial device, and
//! run with whatever permissions that device requires (often membership in
//! the `dialout` group on Linux, rather than sudo).

use log::{error, info};
use servolink_rs::hal::BaudRate;
use servolink_rs::network::ControllerSpec;
use servolink_rs::{Driver, RuntimeHandle};
use servolink_serial_linux::LinuxSerialPort;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port_name = std::env::var("SERVOLINK_PORT").unwrap_or_else(|_| "/dev/ttyUSB0".to_string());
    info!("Starting servolink demo on {port_name}...");

    let mut driver = Driver::new();
    let port = LinuxSerialPort::new(&port_name);
    let net = driver.add_network(ControllerSpec::new(&port_name, BaudRate::B9600), Box::new(port));

    // Bring every registered network up: discover nodes, assign addresses,
    // negotiate the fastest commonly-supported baud rate (spec §4.4
    // cold-start sequence).
    driver.init_nets(false, 0)?;

    let handle = RuntimeHandle::spawn_default(driver);

    handle.on_error(|fault| {
        error!("network fault: {:?} on {}", fault.error, fault.address);
    });

    let address = servolink_rs::MultiAddress::from_net_node(net, 0);
    match handle.run_command(address, 0x01, Vec::new(), Duration::from_millis(500)) {
        Ok(reply) => info!("node {address} replied: {reply:?}"),
        Err(e) => error!("command to {address} failed: {e:?}"),
    }

    handle.shutdown()?;
    Ok(())
}
