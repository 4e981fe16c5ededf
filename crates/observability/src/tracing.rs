//! Tracing/logging initialization.
//!
//! JSON lines with timestamps; the filter comes from `RUST_LOG` and falls back
//! to `info` for everything except the scheduler, which logs at `debug` when
//! `WIKITASK_DEBUG` is set.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

fn default_filter() -> EnvFilter {
    if std::env::var_os("WIKITASK_DEBUG").is_some() {
        EnvFilter::new("info,wikitask_scheduler=debug")
    } else {
        EnvFilter::new("info")
    }
}
