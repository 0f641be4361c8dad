// crates/servolink-monitor/src/lib.rs
//! Web-based diagnostic monitor for a `servolink_rs::runtime::RuntimeHandle`
//! (SPEC_FULL §16 "Monitor"), grounded on the teacher's
//! `powerlink-rs-monitor`: an RT-safe `crossbeam_channel` snapshot bridged
//! into a `tokio::sync::broadcast` channel, fanned out to any number of
//! WebSocket clients over `axum`.

pub mod model;
mod server;

use log::{error, info};
use model::{DiagnosticSnapshot, FaultRecord, NetworkSummary, NodeSummary};
use servolink_rs::RuntimeHandle;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The default port for the web monitor.
const DEFAULT_MONITOR_PORT: u16 = 3000;
/// The capacity of the broadcast channel for WebSocket clients.
const BROADCAST_CHANNEL_CAPACITY: usize = 32;
/// How often the bridge thread samples the driver's state into a snapshot.
const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(200);
/// How many recent faults each snapshot carries forward.
const MAX_RECENT_FAULTS: usize = 32;

/// Builds one `DiagnosticSnapshot` from the runtime's current state.
///
/// Reads node/network status through `RuntimeHandle::with_driver` (a single
/// bounded lock acquisition, the same escape hatch every other non-blocking
/// `Driver` operation uses — see `servolink_rs::runtime`), rather than
/// holding the lock across the whole HTTP/WebSocket stack.
fn build_snapshot(handle: &RuntimeHandle, recent_faults: &[FaultRecord]) -> DiagnosticSnapshot {
    handle.with_driver(|driver, now_us| {
        let networks = driver
            .networks
            .iter()
            .map(|net| NetworkSummary {
                index: net.index,
                state: format!("{:?}", net.state()),
                node_count: net.node_count(),
                nodes: net
                    .nodes
                    .iter()
                    .map(|node| NodeSummary {
                        node_index: node.address.node(),
                        motion_blocked: node.motion_blocked,
                        pending_attentions: driver.dispatcher.pending_attention_count(node.address),
                    })
                    .collect(),
            })
            .collect();

        DiagnosticSnapshot {
            at_us: now_us,
            networks,
            recent_faults: recent_faults.to_vec(),
        }
    })
}

/// Starts the web monitor for a running `RuntimeHandle`.
///
/// Registers an `on_error` callback on the handle to collect `FaultRecord`s
/// as they occur, spawns a dedicated sampling thread that periodically
/// builds a full `DiagnosticSnapshot` and pushes it over a bounded
/// `crossbeam_channel` (capacity 1, matching the teacher's own "never block
/// the RT-adjacent thread, just drop a stale snapshot" choice), and runs the
/// `axum` web server in the caller's async runtime.
#[cfg(feature = "in-process")]
pub async fn start_monitor(handle: RuntimeHandle) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), DEFAULT_MONITOR_PORT);

    let (snapshot_tx, snapshot_rx) = crossbeam_channel::bounded::<DiagnosticSnapshot>(1);

    let recent_faults: Arc<Mutex<Vec<FaultRecord>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let recent_faults = recent_faults.clone();
        handle.on_error(move |fault| {
            let mut faults = recent_faults.lock().unwrap();
            faults.push(FaultRecord {
                net: fault.address.net(),
                node_index: fault.address.node(),
                error: format!("{:?}", fault.error),
                at_us: 0,
            });
            if faults.len() > MAX_RECENT_FAULTS {
                faults.remove(0);
            }
        });
    }

    {
        let handle = handle.clone();
        let recent_faults = recent_faults.clone();
        std::thread::spawn(move || loop {
            let faults = recent_faults.lock().unwrap().clone();
            let snapshot = build_snapshot(&handle, &faults);
            // Non-blocking: if the bridge task is behind, drop the stale
            // snapshot rather than stall this sampling thread.
            let _ = snapshot_tx.try_send(snapshot);
            std::thread::sleep(SNAPSHOT_INTERVAL);
        });
    }

    let (broadcast_tx, _) = tokio::sync::broadcast::channel::<DiagnosticSnapshot>(BROADCAST_CHANNEL_CAPACITY);
    let bridge_tx = broadcast_tx.clone();
    tokio::task::spawn_blocking(move || {
        info!("Starting RT-to-NRT snapshot bridge task.");
        while let Ok(snapshot) = snapshot_rx.recv() {
            if let Err(e) = bridge_tx.send(snapshot) {
                error!("Failed to broadcast snapshot (no receivers?): {}. Shutting down bridge.", e);
                break;
            }
        }
        info!("RT-to-NRT snapshot bridge task shut down.");
    });

    server::start_web_server(addr, broadcast_tx).await;
    Ok(())
}
