//! Tracing subscriber setup for binaries and tests embedding the task core.

use tracing_subscriber::EnvFilter;

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "TASKQ_LOG";

/// Filter used when neither [`LOG_ENV`] nor `RUST_LOG` is set.
pub const DEFAULT_DIRECTIVE: &str = "prometheus_task_queue=info";

/// Build the filter: `TASKQ_LOG`, then `RUST_LOG`, then [`DEFAULT_DIRECTIVE`].
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install a fmt subscriber unless the host application already set one.
///
/// Returns `true` if this call installed the subscriber.
pub fn init_tracing() -> bool {
    if tracing::dispatcher::has_been_set() {
        return false;
    }
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init()
        .is_ok()
}
