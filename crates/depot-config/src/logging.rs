//! Structured logging utilities for Depot components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use depot_config::{log_cache_debug, log_gc_info};
//!
//! log_cache_debug!("Evicting stale file", resource = "central:/a/b.jar");
//! log_gc_info!("Sweep finished", deleted = 12u64);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const CACHE: &'static str = "CACHE";
    pub const PATHDB: &'static str = "PATHDB";
    pub const GC: &'static str = "GC";
    pub const TRANSFER: &'static str = "TRANSFER";
    pub const ROUTING: &'static str = "ROUTING";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === CACHE logging macros ===

#[macro_export]
macro_rules! log_cache_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "CACHE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cache_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CACHE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cache_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CACHE", $($key = $value,)* $msg)
    };
}

// === PATHDB logging macros ===

#[macro_export]
macro_rules! log_pathdb_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "PATHDB", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_pathdb_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "PATHDB", $($key = $value,)* $msg)
    };
}

// === GC logging macros ===

#[macro_export]
macro_rules! log_gc_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "GC", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_gc_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "GC", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_gc_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "GC", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_gc_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "GC", $($key = $value,)* $msg)
    };
}

// === TRANSFER logging macros ===

#[macro_export]
macro_rules! log_transfer_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "TRANSFER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_transfer_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "TRANSFER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_transfer_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "TRANSFER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_transfer_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "TRANSFER", $($key = $value,)* $msg)
    };
}

// === ROUTING logging macros ===

#[macro_export]
macro_rules! log_routing_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "ROUTING", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup. `RUST_LOG` wins when set.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // A second call (e.g. from several tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::CACHE, "CACHE");
        assert_eq!(Component::GC, "GC");
        assert_eq!(Component::TRANSFER, "TRANSFER");
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging(LogLevel::Debug);
        init_logging(LogLevel::Warn);
        log_gc_debug!("Sweep scheduled", batch = 10u64);
        log_transfer_info!("Download complete", bytes = 3u64, resource = "central:/a");
    }
}
