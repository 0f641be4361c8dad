//! Namespaced logging helpers that attach a `MultiAddress` to every record.
//!
//! The core never installs a logger; it only emits through the `log` facade
//! so `no_std` builds stay dependency-light. Binaries/HAL crates pick the
//! backend (typically `env_logger`).

use crate::address::MultiAddress;
use core::fmt;

/// Lightweight context carried by the `net_*!` macros below.
pub struct NetContext {
    pub address: MultiAddress,
}

impl fmt::Display for NetContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addr={}", self.address)
    }
}

macro_rules! net_info {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        log::info!(concat!("[{}] ", $fmt), $ctx $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::info!($fmt $(, $($arg)+)?);
    }};
}

macro_rules! net_warn {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        log::warn!(concat!("[{}] ", $fmt), $ctx $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::warn!($fmt $(, $($arg)+)?);
    }};
}

macro_rules! net_error {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        log::error!(concat!("[{}] ", $fmt), $ctx $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::error!($fmt $(, $($arg)+)?);
    }};
}

macro_rules! net_debug {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        log::debug!(concat!("[{}] ", $fmt), $ctx $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::debug!($fmt $(, $($arg)+)?);
    }};
}

macro_rules! net_trace {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        log::trace!(concat!("[{}] ", $fmt), $ctx $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::trace!($fmt $(, $($arg)+)?);
    }};
}

pub(crate) use net_debug;
pub(crate) use net_error;
pub(crate) use net_info;
pub(crate) use net_trace;
pub(crate) use net_warn;
