//! Configuration models for the queue, worker pool, and scheduler.

pub mod pool;
pub mod queue;
pub mod scheduler;

pub use pool::WorkerPoolConfig;
pub use queue::QueueConfig;
pub use scheduler::SchedulerConfig;

use serde::{Deserialize, Serialize};

/// Prefix of environment variables read by [`CoreConfig::from_env`].
pub const ENV_PREFIX: &str = "TASKQ_";

/// Root configuration for the task-processing core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Queue and persistence settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub workers: WorkerPoolConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl CoreConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting, prefixed with its section.
    pub fn validate(&self) -> Result<(), String> {
        self.queue.validate().map_err(|e| format!("queue: {e}"))?;
        self.workers.validate().map_err(|e| format!("workers: {e}"))?;
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `TASKQ_*` environment variables (a `.env` file is
    /// loaded first when present).
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse or validate.
    pub fn from_env() -> Result<Self, String> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from a key lookup (`TASKQ_WORKERS`, `TASKQ_STORE_PATH`, ...).
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable whose value did not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(path) = get("STORE_PATH") {
            self.queue.store_path = (!path.trim().is_empty()).then(|| path.trim().into());
        }
        if let Some(v) = get("DEFAULT_MAX_RETRIES") {
            self.queue.default_max_retries = parse_var("DEFAULT_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("DEFAULT_TIMEOUT_SECS") {
            self.queue.default_timeout_secs = match v.trim() {
                "" | "none" => None,
                s => Some(parse_var("DEFAULT_TIMEOUT_SECS", s)?),
            };
        }
        if let Some(v) = get("RETENTION_SECS") {
            self.queue.retention_secs = parse_var("RETENTION_SECS", &v)?;
        }
        if let Some(v) = get("WORKERS") {
            self.workers.concurrency = parse_var("WORKERS", &v)?;
        }
        if let Some(v) = get("BACKOFF_BASE_MS") {
            self.workers.backoff_base_ms = parse_var("BACKOFF_BASE_MS", &v)?;
        }
        if let Some(v) = get("BACKOFF_MAX_MS") {
            self.workers.backoff_max_ms = parse_var("BACKOFF_MAX_MS", &v)?;
        }
        if let Some(v) = get("POLL_INTERVAL_MS") {
            self.workers.poll_interval_ms = parse_var("POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("SHUTDOWN_GRACE_SECS") {
            self.workers.shutdown_grace_secs = parse_var("SHUTDOWN_GRACE_SECS", &v)?;
        }
        if let Some(v) = get("SCHEDULER_TICK_MS") {
            self.scheduler.tick_ms = parse_var("SCHEDULER_TICK_MS", &v)?;
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{name}=`{value}`: {e}"))
}
