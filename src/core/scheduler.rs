//! Recurring work: interval and daily wall-clock triggers that enqueue tasks.
//!
//! The scheduler never executes anything itself. A tick loop evaluates every
//! enabled definition and calls [`TaskQueue::enqueue`] for those whose window
//! has opened. Each definition fires at most once per window; a failed enqueue
//! is logged, kept in `last_error`, and the next window fires as usual.
//!
//! Interval windows are measured on the monotonic clock. Daily windows are
//! evaluated against the wall clock on every pass: a definition fires once the
//! local time reaches `hour:minute`, unless it already fired that day.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::{QueueError, TaskQueue, TaskRequest};
use crate::util::serde::Priority;

/// When a definition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Trigger {
    /// Every `every`, first at registration + `every`.
    Interval {
        /// Period between fires.
        every: Duration,
    },
    /// Once a day at `hour:minute` local time.
    Daily {
        /// 0..=23
        hour: u32,
        /// 0..=59
        minute: u32,
    },
}

impl Trigger {
    fn validate(&self) -> Result<(), QueueError> {
        match *self {
            Self::Interval { every } if every.is_zero() => Err(QueueError::Validation(
                "interval must be greater than 0".into(),
            )),
            Self::Daily { hour, minute } if hour > 23 || minute > 59 => {
                Err(QueueError::Validation(format!(
                    "invalid daily time {hour:02}:{minute:02}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// What a definition enqueues each time it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Unique definition name, also used as the task name.
    pub name: String,
    /// Registered function key.
    pub callable_ref: String,
    /// Arguments for every fired task.
    #[serde(default)]
    pub args: Value,
    /// Priority of fired tasks.
    #[serde(default)]
    pub priority: Priority,
    /// Retry ceiling override.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Timeout override.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Whether the definition is enabled when registered.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

const fn enabled_by_default() -> bool {
    true
}

impl ScheduleSpec {
    /// Enabled spec with no arguments and default priority.
    pub fn new(name: impl Into<String>, callable_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            callable_ref: callable_ref.into(),
            args: Value::Null,
            priority: Priority::Normal,
            max_retries: None,
            timeout_seconds: None,
            enabled: true,
        }
    }

    /// Serialize `args` into the spec.
    ///
    /// # Errors
    ///
    /// `QueueError::Validation` if `args` cannot be represented as JSON.
    pub fn with_args<A: Serialize + ?Sized>(mut self, args: &A) -> Result<Self, QueueError> {
        self.args = serde_json::to_value(args)
            .map_err(|e| QueueError::Validation(format!("args are not serializable: {e}")))?;
        Ok(self)
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry ceiling.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the timeout.
    #[must_use]
    pub const fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Register the definition enabled or disabled.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn request(&self) -> TaskRequest {
        TaskRequest {
            name: self.name.clone(),
            callable_ref: self.callable_ref.clone(),
            args: self.args.clone(),
            priority: self.priority,
            max_retries: self.max_retries,
            timeout_seconds: self.timeout_seconds,
        }
    }
}

/// A registered recurring definition and its firing bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledDefinition {
    /// What gets enqueued.
    pub spec: ScheduleSpec,
    /// When it gets enqueued.
    pub trigger: Trigger,
    /// Disabled definitions are skipped by the loop.
    pub enabled: bool,
    /// Last time the definition fired, successfully or not.
    pub last_fired_at: Option<DateTime<Local>>,
    /// Successful enqueues so far.
    pub fire_count: u64,
    /// Error of the latest failed enqueue; cleared by the next success.
    pub last_error: Option<String>,
}

impl ScheduledDefinition {
    /// Definition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Where a definition stands relative to its next window.
enum Window {
    /// Due once the monotonic clock reaches `next_due`.
    Interval { next_due: Instant },
    /// Due once today's `hour:minute` has passed and lies after `armed_at`
    /// (registration, enable, or the previous fire).
    Daily { armed_at: DateTime<Local> },
}

struct Entry {
    definition: ScheduledDefinition,
    window: Window,
}

impl Entry {
    fn new(definition: ScheduledDefinition, now: Instant, wall: DateTime<Local>) -> Self {
        let window = Self::open_window(definition.trigger, now, wall);
        Self { definition, window }
    }

    fn open_window(trigger: Trigger, now: Instant, wall: DateTime<Local>) -> Window {
        match trigger {
            Trigger::Interval { every } => Window::Interval {
                next_due: now + every,
            },
            Trigger::Daily { .. } => Window::Daily { armed_at: wall },
        }
    }

    fn is_due(&self, now: Instant, wall: &DateTime<Local>) -> bool {
        if !self.definition.enabled {
            return false;
        }
        match (&self.window, self.definition.trigger) {
            (Window::Interval { next_due }, _) => *next_due <= now,
            (Window::Daily { armed_at }, Trigger::Daily { hour, minute }) => {
                let fired_today = self
                    .definition
                    .last_fired_at
                    .is_some_and(|at| at.date_naive() == wall.date_naive());
                !fired_today
                    && daily_fire_time(wall, hour, minute)
                        .is_some_and(|slot| slot <= *wall && slot > *armed_at)
            }
            (Window::Daily { .. }, Trigger::Interval { .. }) => false,
        }
    }

    /// Close the window that just fired and open the next one.
    fn fired(&mut self, now: Instant, wall: DateTime<Local>) {
        self.definition.last_fired_at = Some(wall);
        self.window = match (&self.window, self.definition.trigger) {
            (Window::Interval { next_due }, Trigger::Interval { every }) => {
                let next = *next_due + every;
                Window::Interval {
                    next_due: if next <= now { now + every } else { next },
                }
            }
            _ => Self::open_window(self.definition.trigger, now, wall),
        };
    }
}

/// Occurrence of `hour:minute` on the local date of `on`, in `on`'s time zone.
///
/// `None` when that local time does not exist (a DST gap); the definition then
/// skips that day. Ambiguous times resolve to their earliest occurrence.
pub fn daily_fire_time<Tz: TimeZone>(
    on: &DateTime<Tz>,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Tz>> {
    let naive = on.date_naive().and_hms_opt(hour, minute, 0)?;
    on.timezone().from_local_datetime(&naive).earliest()
}

/// Evaluates recurring definitions and enqueues their tasks.
pub struct Scheduler {
    config: SchedulerConfig,
    queue: Arc<TaskQueue>,
    entries: parking_lot::Mutex<Vec<Entry>>,
    shutdown_tx: watch::Sender<bool>,
    tick_loop: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Scheduler enqueueing into `queue`.
    ///
    /// # Errors
    ///
    /// `QueueError::Validation` if the configuration is invalid.
    pub fn new(config: SchedulerConfig, queue: Arc<TaskQueue>) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::Validation)?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            queue,
            entries: parking_lot::Mutex::new(Vec::new()),
            shutdown_tx,
            tick_loop: parking_lot::Mutex::new(None),
        })
    }

    /// Register a definition firing every `every`, first at now + `every`.
    ///
    /// # Errors
    ///
    /// `QueueError::Validation` for a duplicate or empty name, or a zero interval.
    pub fn schedule_interval(&self, spec: ScheduleSpec, every: Duration) -> Result<(), QueueError> {
        self.register(spec, Trigger::Interval { every })
    }

    /// Register a definition firing daily at `hour:minute` local time.
    ///
    /// # Errors
    ///
    /// `QueueError::Validation` for a duplicate or empty name, or an invalid time.
    pub fn schedule_daily(&self, spec: ScheduleSpec, hour: u32, minute: u32) -> Result<(), QueueError> {
        self.register(spec, Trigger::Daily { hour, minute })
    }

    fn register(&self, spec: ScheduleSpec, trigger: Trigger) -> Result<(), QueueError> {
        if spec.name.trim().is_empty() {
            return Err(QueueError::Validation("schedule name must not be empty".into()));
        }
        trigger.validate()?;

        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.definition.name() == spec.name) {
            return Err(QueueError::Validation(format!(
                "schedule `{}` is already registered",
                spec.name
            )));
        }
        info!(
            name = %spec.name,
            callable_ref = %spec.callable_ref,
            ?trigger,
            enabled = spec.enabled,
            "schedule registered"
        );
        entries.push(Entry::new(
            ScheduledDefinition {
                enabled: spec.enabled,
                spec,
                trigger,
                last_fired_at: None,
                fire_count: 0,
                last_error: None,
            },
            Instant::now(),
            Local::now(),
        ));
        Ok(())
    }

    /// Resume firing. The window restarts from now: an interval definition
    /// next fires after a full period, a daily one at its next `hour:minute`.
    ///
    /// # Errors
    ///
    /// `QueueError::NotFound` for an unknown name.
    pub fn enable(&self, name: &str) -> Result<(), QueueError> {
        self.with_entry(name, |entry| {
            if !entry.definition.enabled {
                entry.definition.enabled = true;
                entry.window =
                    Entry::open_window(entry.definition.trigger, Instant::now(), Local::now());
            }
        })
    }

    /// Stop firing until re-enabled.
    ///
    /// # Errors
    ///
    /// `QueueError::NotFound` for an unknown name.
    pub fn disable(&self, name: &str) -> Result<(), QueueError> {
        self.with_entry(name, |entry| entry.definition.enabled = false)
    }

    fn with_entry(&self, name: &str, apply: impl FnOnce(&mut Entry)) -> Result<(), QueueError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.definition.name() == name)
            .ok_or_else(|| QueueError::NotFound(format!("schedule {name}")))?;
        apply(entry);
        debug!(name, enabled = entry.definition.enabled, "schedule toggled");
        Ok(())
    }

    /// Snapshot of all definitions in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ScheduledDefinition> {
        self.entries
            .lock()
            .iter()
            .map(|e| e.definition.clone())
            .collect()
    }

    /// One definition by name.
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<ScheduledDefinition> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.definition.name() == name)
            .map(|e| e.definition.clone())
    }

    /// Fire every enabled definition whose window has opened.
    ///
    /// Returns how many tasks were enqueued.
    pub async fn run_pending(&self) -> usize {
        self.run_pending_at(Local::now()).await
    }

    /// [`Scheduler::run_pending`] with daily windows evaluated at wall-clock
    /// time `wall`. Interval windows always use the monotonic clock.
    pub async fn run_pending_at(&self, wall: DateTime<Local>) -> usize {
        let due: Vec<(String, TaskRequest)> = {
            let now = Instant::now();
            let mut entries = self.entries.lock();
            let mut due = Vec::new();
            for entry in entries.iter_mut().filter(|e| e.is_due(now, &wall)) {
                entry.fired(now, wall);
                due.push((entry.definition.spec.name.clone(), entry.definition.spec.request()));
            }
            due
        };

        let mut fired = 0;
        for (name, request) in due {
            let outcome = self.queue.enqueue(request).await;
            let mut entries = self.entries.lock();
            let Some(entry) = entries.iter_mut().find(|e| e.definition.name() == name) else {
                continue;
            };
            match outcome {
                Ok(task_id) => {
                    fired += 1;
                    entry.definition.fire_count += 1;
                    entry.definition.last_error = None;
                    debug!(name = %name, task_id = %task_id, "scheduled task enqueued");
                }
                Err(err) => {
                    warn!(name = %name, error = %err, "scheduled enqueue failed");
                    entry.definition.last_error = Some(err.to_string());
                }
            }
        }
        fired
    }

    /// Spawn the tick loop on the current tokio runtime. No-op if already started.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.tick_loop.lock();
        if slot.is_some() || *self.shutdown_tx.borrow() {
            return;
        }
        let scheduler = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let tick = self.config.tick();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        scheduler.run_pending().await;
                    }
                }
            }
            debug!("scheduler loop stopped");
        }));
        info!(
            tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX),
            definitions = self.entries.lock().len(),
            "scheduler started"
        );
    }

    /// Stop the tick loop and wait for the current pass to finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self.tick_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "scheduler loop ended abnormally");
            }
            info!("scheduler shut down");
        }
    }

    /// Whether the tick loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tick_loop.lock().is_some()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("definitions", &self.definitions())
            .finish_non_exhaustive()
    }
}
