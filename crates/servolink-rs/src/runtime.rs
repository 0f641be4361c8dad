//! `std`-only thread orchestration (spec §5/§19, SPEC_FULL §14/§19).
//!
//! The core engine in `driver.rs` is deliberately clock-agnostic: it reads
//! and writes against a caller-supplied `now_us` snapshot and never owns a
//! thread or a sleep primitive, so it stays `no_std`-safe. This module is
//! the `std`-only caller-thread wrapper spec §5 describes: it owns the
//! `Driver` behind a `Mutex` (the same discipline the teacher's own
//! `LinuxPnetInterface` uses for its tx/rx handles), spawns one reader
//! thread per network plus a background-poll thread, and gives
//! `RuntimeHandle::run_command` real wall-clock blocking the same way the
//! teacher's dedicated real-time node thread waits in
//! `powerlink-rs-linux/examples/mn_web_monitor.rs`: a tight loop paced by
//! `thread::sleep`, not a condvar the teacher never reaches for.

use crate::driver::Driver;
use crate::address::MultiAddress;
use crate::dispatch::AttentionRecord;
use crate::error::{DriverError, FaultEvent};
use crate::network::NetworkChange;
use crate::param::ParamRef;
use crate::tracker::CommandOutcome;
use alloc::vec::Vec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Pace of `RuntimeHandle::run_command`'s wait loop between poll attempts.
const RUN_COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// How often the background-poll thread calls `Driver::tick` (spec §4.9).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long the per-network reader thread waits between read attempts
/// when its port has nothing queued, matching the pacing the teacher's
/// own real-time loop uses (`thread::sleep(Duration::from_micros(100))`
/// in `mn_web_monitor.rs`) rather than spinning the CPU at 100%.
const READER_IDLE_SLEEP: Duration = Duration::from_micros(200);

struct RuntimeInner {
    driver: Mutex<Driver>,
    start: Instant,
    poll_active: AtomicBool,
    running: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// A handle to a `Driver` running on dedicated background threads.
///
/// Cloning shares the same underlying `Driver` and threads (an `Arc`
/// wrapper) — use this the way the teacher's example shares a
/// `crossbeam_channel::Sender` across threads that all feed one real-time
/// loop, except here callers also get a genuine blocking `run_command`.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<RuntimeInner>,
}

impl RuntimeHandle {
    /// Spawns the reader threads (one per network already registered on
    /// `driver` via `Driver::add_network`) and the background-poll thread,
    /// then returns a handle for the caller's own threads to drive it from.
    ///
    /// Networks must be registered before calling this; networks added
    /// afterward get no dedicated reader thread (a limitation worth
    /// flagging rather than hiding, see `DESIGN.md`).
    pub fn spawn(driver: Driver, poll_interval: Duration) -> Self {
        let net_count = driver.networks.len() as u8;
        let inner = Arc::new(RuntimeInner {
            driver: Mutex::new(driver),
            start: Instant::now(),
            poll_active: AtomicBool::new(true),
            running: AtomicBool::new(true),
            threads: Mutex::new(Vec::new()),
        });

        let mut threads = Vec::new();
        for net in 0..net_count {
            let inner = inner.clone();
            threads.push(thread::spawn(move || reader_loop(inner, net)));
        }
        {
            let inner = inner.clone();
            threads.push(thread::spawn(move || poll_loop(inner, poll_interval)));
        }
        *inner.threads.lock().unwrap() = threads;

        Self { inner }
    }

    /// Spawns with the default background-poll interval.
    pub fn spawn_default(driver: Driver) -> Self {
        Self::spawn(driver, DEFAULT_POLL_INTERVAL)
    }

    fn now_us(&self) -> u64 {
        self.inner.start.elapsed().as_micros() as u64
    }

    /// Runs any closure against the owned `Driver` under its lock. Every
    /// bounded, single-snapshot `Driver` method (`init_nets`, `get_param`,
    /// `set_param`, the motion opcodes, masks, diagnostics, data
    /// acquisition, event polling, callback registration, ...) is reached
    /// this way: they already make their own bounded read attempts per
    /// spec §4.3's typical sub-millisecond device turnaround, so a second
    /// layer of real-time waiting buys nothing for them. Only raw
    /// `run_command` below gets the full `Mutex`/`Condvar` wait treatment,
    /// since it is the one spec names explicitly as the suspending call
    /// (spec §5 "run_command suspends until response/error/timeout").
    pub fn with_driver<T>(&self, f: impl FnOnce(&mut Driver, u64) -> T) -> T {
        let mut driver = self.inner.driver.lock().unwrap();
        let now_us = self.now_us();
        f(&mut driver, now_us)
    }

    /// Sends one command and blocks the calling thread until a response,
    /// a node-reported error, or `timeout` elapses — spec §5's actual
    /// suspending `run_command` contract, built from the core's
    /// `begin_command`/`poll_command` pair so the command is enqueued and
    /// transmitted exactly once no matter how long the wait runs.
    pub fn run_command(
        &self,
        address: MultiAddress,
        opcode: u8,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, DriverError> {
        let start_us = self.now_us();
        let deadline_us = start_us.saturating_add(timeout.as_micros() as u64);

        {
            let mut driver = self.inner.driver.lock().unwrap();
            driver.begin_command(address, opcode, payload, start_us, deadline_us)?;
        }

        loop {
            let now_us = self.now_us();
            {
                let mut driver = self.inner.driver.lock().unwrap();
                if let Some(result) = driver.poll_command(address, now_us, deadline_us) {
                    return result;
                }
            }
            // Drop the lock before sleeping so the reader/poll threads (and
            // any other caller sharing this handle) keep making progress
            // while we wait.
            thread::sleep(RUN_COMMAND_POLL_INTERVAL);
        }
    }

    /// Starts or stops the background-poll thread's `Driver::tick` calls
    /// (spec §4.9 "background_poll_control(net, start/stop)" — generalized
    /// here to the whole runtime, since one thread services every network).
    pub fn set_background_poll(&self, active: bool) {
        self.inner.poll_active.store(active, Ordering::Relaxed);
    }

    pub fn on_error(&self, cb: impl FnMut(FaultEvent) + Send + 'static) {
        self.with_driver(|d, _| d.dispatcher.on_error(cb));
    }

    pub fn on_command_complete(&self, cb: impl FnMut(CommandOutcome) + Send + 'static) {
        self.with_driver(|d, _| d.dispatcher.on_command_complete(cb));
    }

    pub fn on_cache_invalidate(&self, cb: impl FnMut(MultiAddress, ParamRef) + Send + 'static) {
        self.with_driver(|d, _| d.dispatcher.on_cache_invalidate(cb));
    }

    pub fn on_network_state(&self, cb: impl FnMut(u8, NetworkChange) + Send + 'static) {
        self.with_driver(|d, _| d.dispatcher.on_network_state(cb));
    }

    pub fn on_parameter_change(&self, cb: impl FnMut(MultiAddress, ParamRef) + Send + 'static) {
        self.with_driver(|d, _| d.dispatcher.on_parameter_change(cb));
    }

    pub fn on_attention(&self, cb: impl FnMut(AttentionRecord) + Send + 'static) {
        self.with_driver(|d, _| d.dispatcher.on_attention(cb));
    }

    /// Stops every background thread and runs the core's own shutdown
    /// sequence (shutdown-on-exit bindings, network teardown). Consumes
    /// the handle: once stopped, a `RuntimeHandle` has nothing left to
    /// drive it, even if other clones still exist (they will find
    /// `running` false and the reader/poll threads gone).
    pub fn shutdown(self) -> Result<(), DriverError> {
        self.inner.running.store(false, Ordering::Relaxed);
        let result = {
            let mut driver = self.inner.driver.lock().unwrap();
            let now_us = self.now_us();
            driver.shutdown(now_us)
        };
        for handle in self.inner.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        result
    }
}

fn reader_loop(inner: Arc<RuntimeInner>, net: u8) {
    while inner.running.load(Ordering::Relaxed) {
        let now_us = inner.start.elapsed().as_micros() as u64;
        let routed = {
            let mut driver = inner.driver.lock().unwrap();
            driver.service_rx(net, now_us).is_ok()
        };
        if !routed {
            thread::sleep(READER_IDLE_SLEEP);
        }
    }
}

fn poll_loop(inner: Arc<RuntimeInner>, poll_interval: Duration) {
    while inner.running.load(Ordering::Relaxed) {
        thread::sleep(poll_interval);
        if !inner.running.load(Ordering::Relaxed) {
            break;
        }
        if inner.poll_active.load(Ordering::Relaxed) {
            let now_us = inner.start.elapsed().as_micros() as u64;
            inner.driver.lock().unwrap().tick(now_us);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::codec::encode;
    use crate::frame::{Frame, FrameHeader, PacketType};
    use crate::hal::loopback::LoopbackPort;
    use crate::hal::BaudRate;
    use crate::network::ControllerSpec;
    use crate::node::Node;
    use alloc::boxed::Box;

    fn push_response(port: &mut LoopbackPort, address: u8, payload: &[u8]) {
        let frame = Frame::new(
            FrameHeader {
                address,
                packet_type: PacketType::Response,
                septet_len: 0,
                mode: false,
                from_node: true,
            },
            payload.to_vec(),
        );
        let wire = encode(&frame).unwrap();
        port.inject(&wire);
    }

    #[test]
    fn run_command_blocks_until_the_reader_thread_delivers_the_response() {
        let mut port = LoopbackPort::new("sim0");
        push_response(&mut port, 0, &[0x42]);

        let mut driver = Driver::new();
        let net = driver.add_network(ControllerSpec::new("sim0", BaudRate::B115200), Box::new(port));
        {
            // Bypass full cold-start bring-up for this narrowly-scoped test.
            let network = &mut driver.networks[net as usize];
            network.port.open(BaudRate::B115200).unwrap();
            network.state_machine.current_state = crate::network::NetworkState::Online;
            network.nodes.push(Node::new(MultiAddress::from_net_node(net, 0)));
        }

        let handle = RuntimeHandle::spawn(driver, Duration::from_millis(1));
        let address = MultiAddress::from_net_node(net, 0);
        let result = handle.run_command(address, 0x10, Vec::new(), Duration::from_secs(2));
        assert_eq!(result, Ok(alloc::vec![0x42]));
        handle.shutdown().unwrap();
    }

    #[test]
    fn run_command_times_out_when_nothing_ever_answers() {
        let port = LoopbackPort::new("sim1");
        let mut driver = Driver::new();
        let net = driver.add_network(ControllerSpec::new("sim1", BaudRate::B115200), Box::new(port));
        {
            let network = &mut driver.networks[net as usize];
            network.port.open(BaudRate::B115200).unwrap();
            network.state_machine.current_state = crate::network::NetworkState::Online;
            network.nodes.push(Node::new(MultiAddress::from_net_node(net, 0)));
        }

        let handle = RuntimeHandle::spawn(driver, Duration::from_millis(1));
        let address = MultiAddress::from_net_node(net, 0);
        let result = handle.run_command(address, 0x10, Vec::new(), Duration::from_millis(50));
        assert_eq!(result, Err(DriverError::CommandTimeout));
        handle.shutdown().unwrap();
    }
}
