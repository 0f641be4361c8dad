#![cfg_attr(not(feature = "std"), no_std)]

// 'alloc' is used for dynamic allocation (e.g., Vec<u8> frame buffers, per-node caches)
extern crate alloc;

// --- Foundation Modules ---
pub mod error;
pub mod log;
pub mod address;
pub mod hal;

// --- Data Link Layer ---
pub mod frame;
pub mod tracker;

// --- Network Lifecycle ---
pub mod network;
pub mod node;

// --- Application-Facing Layers ---
pub mod dispatch;
pub mod diag;
pub mod safety;
pub mod motion;
pub mod param;
pub mod dataacq;

// --- Public Facade ---
pub mod driver;
pub mod registers;

#[cfg(feature = "std")]
pub mod runtime;

// --- Top-level Exports ---
pub use address::MultiAddress;
pub use driver::Driver;
pub use error::{DriverError, FaultEvent};
pub use hal::SerialPort;
pub use network::{ControllerSpec, NetworkChange, NetworkState};
pub use node::Node;

#[cfg(feature = "std")]
pub use runtime::RuntimeHandle;
