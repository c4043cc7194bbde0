//! Logging module.
//!
//! Thin macros over `tracing` so call sites stay short, plus the subscriber
//! setup the binary entry points use.

use tracing_subscriber::EnvFilter;

pub fn log_info_impl(msg: &str) {
    tracing::info!("{}", msg);
}

pub fn log_error_impl(msg: &str) {
    tracing::error!("{}", msg);
}

pub fn log_warn_impl(msg: &str) {
    tracing::warn!("{}", msg);
}

pub fn log_debug_impl(msg: &str) {
    tracing::debug!("{}", msg);
}

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Returns false if a global subscriber was already set.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init()
        .is_ok()
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}
