//! Durable priority task queue.
//!
//! The queue owns every [`TaskRecord`] and is the only component allowed to
//! change one. Each transition is applied in memory under a short
//! `parking_lot::Mutex` critical section, then the full snapshot is written to
//! the [`TaskStore`] on the blocking pool behind a separate async writer lock.
//! Reads never wait on disk I/O. A transition whose write fails is rolled back
//! and reported as [`QueueError::Persistence`].
//!
//! Dequeue order is priority first, then `ready_at_ms` (creation time, or the
//! retry-ready time for retried work), then the enqueue sequence.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::core::events::{build_task_event, EventSink};
use crate::core::{
    FunctionRegistry, QueueError, ResolvedRequest, TaskFailure, TaskRecord, TaskRequest,
    TaskStatus,
};
use crate::infra::store::{InMemoryStore, TaskStore};
use crate::util::clock::{after_ms, now_ms};
use crate::util::serde::{new_task_id, Priority, TaskId};

/// Heap entry for a pending record, ordered so the max-heap pops the next record to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: Priority,
    ready_at_ms: u128,
    sequence: u64,
    id: TaskId,
}

impl ReadyEntry {
    const fn of(record: &TaskRecord) -> Self {
        Self {
            priority: record.priority,
            ready_at_ms: record.ready_at_ms,
            sequence: record.sequence,
            id: record.id,
        }
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earliest ready time, then earliest enqueue
        // (the latter two reversed for the max-heap).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.ready_at_ms.cmp(&self.ready_at_ms))
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Waiting to be claimed.
    pub pending: usize,
    /// Claimed by a worker.
    pub running: usize,
    /// Waiting out a backoff.
    pub retrying: usize,
    /// Finished successfully.
    pub completed: usize,
    /// Failed permanently.
    pub failed: usize,
    /// Cancelled before running.
    pub cancelled: usize,
    /// All records in the store.
    pub total: usize,
}

impl QueueStats {
    /// Count for one status.
    #[must_use]
    pub const fn count(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Running => self.running,
            TaskStatus::Retrying => self.retrying,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    fn add(&mut self, status: TaskStatus) {
        let slot = match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Running => &mut self.running,
            TaskStatus::Retrying => &mut self.retrying,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
        self.total += 1;
    }
}

/// How to revert an in-memory change whose write failed.
enum Undo {
    Created(TaskId),
    Modified { before: TaskRecord, after: TaskRecord },
    Deleted(TaskRecord),
}

#[derive(Default)]
struct QueueState {
    records: HashMap<TaskId, TaskRecord>,
    /// Pending records; stale entries are skipped on pop.
    ready: BinaryHeap<ReadyEntry>,
    /// Retrying records keyed by due time; stale entries are skipped on pop.
    delayed: BinaryHeap<Reverse<(u128, u64, TaskId)>>,
    next_sequence: u64,
}

impl QueueState {
    fn insert(&mut self, record: TaskRecord) {
        self.next_sequence = self.next_sequence.max(record.sequence.saturating_add(1));
        self.index(&record);
        self.records.insert(record.id, record);
    }

    fn index(&mut self, record: &TaskRecord) {
        match record.status {
            TaskStatus::Pending => self.ready.push(ReadyEntry::of(record)),
            TaskStatus::Retrying => {
                let due = record.retry_at_ms.unwrap_or(record.updated_at_ms);
                self.delayed.push(Reverse((due, record.sequence, record.id)));
            }
            _ => {}
        }
    }

    fn pop_ready(&mut self) -> Option<TaskId> {
        while let Some(entry) = self.ready.pop() {
            let live = self.records.get(&entry.id).is_some_and(|r| {
                r.status == TaskStatus::Pending && ReadyEntry::of(r) == entry
            });
            if live {
                return Some(entry.id);
            }
        }
        None
    }

    fn pop_due_retry(&mut self, now: u128) -> Option<TaskId> {
        while let Some(Reverse((due, _, id))) = self.delayed.peek().copied() {
            if due > now {
                return None;
            }
            self.delayed.pop();
            let live = self
                .records
                .get(&id)
                .is_some_and(|r| r.status == TaskStatus::Retrying && r.retry_at_ms.unwrap_or(due) == due);
            if live {
                return Some(id);
            }
        }
        None
    }

    fn snapshot(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    fn rollback(&mut self, undo: Undo) {
        match undo {
            Undo::Created(id) => {
                self.records.remove(&id);
            }
            Undo::Modified { before, after } => {
                // Only revert if nobody moved the record on since.
                if self.records.get(&before.id) == Some(&after) {
                    self.index(&before);
                    self.records.insert(before.id, before);
                }
            }
            Undo::Deleted(record) => {
                if !self.records.contains_key(&record.id) {
                    self.index(&record);
                    self.records.insert(record.id, record);
                }
            }
        }
    }
}

/// Durable priority queue of task records.
///
/// Construct once and share as `Arc<TaskQueue>` with the worker pool and the
/// scheduler.
pub struct TaskQueue {
    config: QueueConfig,
    registry: Arc<FunctionRegistry>,
    store: Arc<dyn TaskStore>,
    state: parking_lot::Mutex<QueueState>,
    /// Serializes snapshot writes so the newest state is always written last.
    writer: tokio::sync::Mutex<()>,
    work_available: Notify,
    events: Option<Arc<dyn EventSink>>,
}

impl TaskQueue {
    /// Open a queue over `store`, reloading persisted records.
    ///
    /// Records found `Running` were claimed by a worker that no longer exists;
    /// they are re-admitted as `Pending` (at-least-once: their body may run
    /// again). `Retrying` records become due at their stored retry time.
    ///
    /// # Errors
    ///
    /// `QueueError::Persistence` if the snapshot cannot be read, or the
    /// recovered snapshot cannot be written back.
    pub async fn open(
        config: QueueConfig,
        registry: Arc<FunctionRegistry>,
        store: Arc<dyn TaskStore>,
    ) -> Result<Self, QueueError> {
        Self::open_inner(config, registry, store, None).await
    }

    /// [`TaskQueue::open`] with an event sink attached before recovery, so
    /// `recover` events are reported too.
    ///
    /// # Errors
    ///
    /// Same as [`TaskQueue::open`].
    pub async fn open_with_sink(
        config: QueueConfig,
        registry: Arc<FunctionRegistry>,
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, QueueError> {
        Self::open_inner(config, registry, store, Some(sink)).await
    }

    async fn open_inner(
        config: QueueConfig,
        registry: Arc<FunctionRegistry>,
        store: Arc<dyn TaskStore>,
        events: Option<Arc<dyn EventSink>>,
    ) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::Validation)?;

        let loader = Arc::clone(&store);
        let records = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| QueueError::Persistence(format!("store load task failed: {e}")))??;

        let now = now_ms();
        let mut state = QueueState::default();
        let mut recovered = Vec::new();
        for mut record in records {
            if state.records.contains_key(&record.id) {
                warn!(task_id = %record.id, "duplicate task id in snapshot, keeping first");
                continue;
            }
            if record.status == TaskStatus::Running {
                warn!(
                    task_id = %record.id,
                    name = %record.name,
                    attempt = record.attempt,
                    "re-admitting task interrupted while running"
                );
                record.recover_interrupted(now);
                recovered.push(record.id);
            }
            if !record.status.is_terminal() && !registry.contains(&record.callable_ref) {
                warn!(
                    task_id = %record.id,
                    callable_ref = %record.callable_ref,
                    "persisted task references an unregistered function"
                );
            }
            state.insert(record);
        }

        info!(
            store = %store.describe(),
            records = state.records.len(),
            recovered = recovered.len(),
            "task queue opened"
        );

        let queue = Self {
            config,
            registry,
            store,
            state: parking_lot::Mutex::new(state),
            writer: tokio::sync::Mutex::new(()),
            work_available: Notify::new(),
            events,
        };

        if !recovered.is_empty() {
            queue.persist().await?;
            for id in recovered {
                queue.emit(id, "recover", None);
            }
        }
        Ok(queue)
    }

    /// Queue over a fresh in-memory store.
    #[must_use]
    pub fn in_memory(config: QueueConfig, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            config,
            registry,
            store: Arc::new(InMemoryStore::new()),
            state: parking_lot::Mutex::new(QueueState::default()),
            writer: tokio::sync::Mutex::new(()),
            work_available: Notify::new(),
            events: None,
        }
    }

    /// Attach an event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// The function registry requests are validated against.
    #[must_use]
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Queue configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create a `Pending` record and persist it.
    ///
    /// # Errors
    ///
    /// - `QueueError::Validation` for an unregistered `callable_ref`, an empty
    ///   name, or a zero timeout; nothing is created.
    /// - `QueueError::Persistence` if the record could not be written.
    pub async fn enqueue(&self, request: TaskRequest) -> Result<TaskId, QueueError> {
        let resolved = self.resolve(request)?;
        let record = {
            let mut state = self.state.lock();
            let sequence = state.next_sequence;
            let mut id = new_task_id();
            while state.records.contains_key(&id) {
                id = new_task_id();
            }
            let record = TaskRecord::new(id, resolved, sequence, now_ms());
            state.insert(record.clone());
            record
        };

        self.commit(vec![Undo::Created(record.id)]).await?;
        debug!(
            task_id = %record.id,
            name = %record.name,
            callable_ref = %record.callable_ref,
            priority = %record.priority,
            "task enqueued"
        );
        self.emit(record.id, "enqueue", Some(record.callable_ref.clone()));
        self.work_available.notify_one();
        Ok(record.id)
    }

    fn resolve(&self, request: TaskRequest) -> Result<ResolvedRequest, QueueError> {
        if request.name.trim().is_empty() {
            return Err(QueueError::Validation("task name must not be empty".into()));
        }
        if !self.registry.contains(&request.callable_ref) {
            return Err(QueueError::Validation(format!(
                "callable_ref `{}` is not registered",
                request.callable_ref
            )));
        }
        let timeout_seconds = request.timeout_seconds.or(self.config.default_timeout_secs);
        if timeout_seconds == Some(0) {
            return Err(QueueError::Validation(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        Ok(ResolvedRequest {
            name: request.name,
            callable_ref: request.callable_ref,
            args: request.args,
            priority: request.priority,
            max_retries: request
                .max_retries
                .unwrap_or(self.config.default_max_retries),
            timeout_seconds,
        })
    }

    /// Claim the next record: highest priority, then earliest ready time.
    ///
    /// Retrying records whose backoff has elapsed are promoted to `Pending`
    /// first. The claimed record is `Running` (and persisted) before it is
    /// returned; no two callers can claim the same record.
    ///
    /// # Errors
    ///
    /// `QueueError::Persistence` if the claim could not be written; the record
    /// stays claimable.
    pub async fn dequeue(&self) -> Result<Option<TaskRecord>, QueueError> {
        self.promote_due_retries().await?;

        let (before, claimed) = {
            let mut state = self.state.lock();
            let Some(id) = state.pop_ready() else {
                return Ok(None);
            };
            let Some(record) = state.records.get_mut(&id) else {
                return Ok(None);
            };
            let before = record.clone();
            record.start_attempt(now_ms())?;
            (before, record.clone())
        };

        self.commit(vec![Undo::Modified {
            before,
            after: claimed.clone(),
        }])
        .await?;
        debug!(task_id = %claimed.id, attempt = claimed.attempt, "task claimed");
        self.emit(claimed.id, "start", Some(format!("attempt {}", claimed.attempt)));
        Ok(Some(claimed))
    }

    async fn promote_due_retries(&self) -> Result<(), QueueError> {
        let undo: Vec<Undo> = {
            let mut state = self.state.lock();
            let now = now_ms();
            let mut undo = Vec::new();
            while let Some(id) = state.pop_due_retry(now) {
                let Some(record) = state.records.get_mut(&id) else {
                    continue;
                };
                let before = record.clone();
                if record.requeue(now).is_ok() {
                    let after = record.clone();
                    state.index(&after);
                    undo.push(Undo::Modified { before, after });
                }
            }
            undo
        };
        if undo.is_empty() {
            return Ok(());
        }
        let ids: Vec<TaskId> = undo
            .iter()
            .filter_map(|u| match u {
                Undo::Modified { after, .. } => Some(after.id),
                _ => None,
            })
            .collect();
        self.commit(undo).await?;
        for id in ids {
            self.emit(id, "requeue", None);
        }
        Ok(())
    }

    /// `Running -> Completed` with the function's result.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidTransition`, or `Persistence`.
    pub async fn complete(&self, id: TaskId, result: Value) -> Result<TaskRecord, QueueError> {
        let record = self
            .modify(id, "complete", |r, now| r.mark_completed(result, now))
            .await?;
        info!(task_id = %id, name = %record.name, attempt = record.attempt, "task completed");
        Ok(record)
    }

    /// `Running -> Failed`; the failure is kept on the record.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidTransition`, or `Persistence`.
    pub async fn fail(&self, id: TaskId, failure: TaskFailure) -> Result<TaskRecord, QueueError> {
        let message = failure.to_string();
        let record = self
            .modify(id, "fail", |r, now| r.mark_failed(failure, now))
            .await?;
        error!(
            task_id = %id,
            name = %record.name,
            attempt = record.attempt,
            error = %message,
            "task failed permanently"
        );
        Ok(record)
    }

    /// `Running -> Retrying`, due after `delay`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidTransition`, or `Persistence`.
    pub async fn schedule_retry(
        &self,
        id: TaskId,
        failure: TaskFailure,
        delay: Duration,
    ) -> Result<TaskRecord, QueueError> {
        let detail = format!("in {}ms: {failure}", delay.as_millis());
        self.modify(id, "retry", |r, now| {
            r.schedule_retry(failure, after_ms(now, delay), now)
        })
        .await
        .inspect(|_| debug!(task_id = %id, %detail, "retry scheduled"))
    }

    /// `Retrying -> Pending`; the record re-enters dequeue order at the current time.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidTransition` (e.g. already promoted by `dequeue`), or
    /// `Persistence`.
    pub async fn requeue(&self, id: TaskId) -> Result<TaskRecord, QueueError> {
        let record = self.modify(id, "requeue", TaskRecord::requeue).await?;
        self.work_available.notify_one();
        Ok(record)
    }

    /// `Pending -> Cancelled`. Running work cannot be cancelled.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidTransition` when the record is not `Pending`, or
    /// `Persistence`.
    pub async fn cancel(&self, id: TaskId) -> Result<TaskRecord, QueueError> {
        let record = self.modify(id, "cancel", TaskRecord::mark_cancelled).await?;
        info!(task_id = %id, name = %record.name, "task cancelled");
        Ok(record)
    }

    async fn modify<F>(
        &self,
        id: TaskId,
        action: &'static str,
        apply: F,
    ) -> Result<TaskRecord, QueueError>
    where
        F: FnOnce(&mut TaskRecord, u128) -> Result<(), QueueError>,
    {
        let (before, after) = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get_mut(&id)
                .ok_or_else(|| QueueError::task_not_found(id))?;
            let before = record.clone();
            apply(record, now_ms())?;
            let after = record.clone();
            state.index(&after);
            (before, after)
        };
        self.commit(vec![Undo::Modified {
            before,
            after: after.clone(),
        }])
        .await?;
        self.emit(id, action, after.error.as_ref().map(ToString::to_string));
        Ok(after)
    }

    /// Delete terminal records that finished at least `older_than_seconds` ago.
    /// `Pending`, `Running` and `Retrying` records are never touched.
    ///
    /// # Errors
    ///
    /// `QueueError::Persistence`; nothing is deleted in that case.
    pub async fn cleanup(&self, older_than_seconds: u64) -> Result<usize, QueueError> {
        let removed: Vec<TaskRecord> = {
            let mut state = self.state.lock();
            let cutoff = now_ms().saturating_sub(u128::from(older_than_seconds) * 1_000);
            let expired: Vec<TaskId> = state
                .records
                .values()
                .filter(|r| r.status.is_terminal())
                .filter(|r| r.finished_at_ms.unwrap_or(r.updated_at_ms) <= cutoff)
                .map(|r| r.id)
                .collect();
            let removed: Vec<TaskRecord> = expired
                .into_iter()
                .filter_map(|id| state.records.remove(&id))
                .collect();
            removed
        };
        if removed.is_empty() {
            return Ok(0);
        }

        let count = removed.len();
        let ids: Vec<TaskId> = removed.iter().map(|r| r.id).collect();
        self.commit(removed.into_iter().map(Undo::Deleted).collect())
            .await?;
        for id in ids {
            self.emit(id, "cleanup", None);
        }
        info!(removed = count, older_than_seconds, "cleaned up finished tasks");
        Ok(count)
    }

    /// Snapshot of one record.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<TaskRecord> {
        self.state.lock().records.get(&id).cloned()
    }

    /// Records in enqueue order, optionally filtered by status.
    #[must_use]
    pub fn list(&self, status_filter: Option<TaskStatus>) -> Vec<TaskRecord> {
        let state = self.state.lock();
        let mut records: Vec<TaskRecord> = state
            .records
            .values()
            .filter(|r| status_filter.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        drop(state);
        records.sort_by_key(|r| r.sequence);
        records
    }

    /// Counts per status.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let mut stats = QueueStats::default();
        for record in state.records.values() {
            stats.add(record.status);
        }
        stats
    }

    /// Total records held, terminal ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether the queue holds no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until new work may be claimable, or `timeout` elapses.
    /// Returns `true` when woken by an enqueue or requeue.
    pub async fn wait_for_work(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.work_available.notified())
            .await
            .is_ok()
    }

    async fn commit(&self, undo: Vec<Undo>) -> Result<(), QueueError> {
        if let Err(err) = self.persist().await {
            error!(error = %err, "persisting task state failed, rolling back");
            let mut state = self.state.lock();
            for step in undo.into_iter().rev() {
                state.rollback(step);
            }
            return Err(err);
        }
        Ok(())
    }

    async fn persist(&self) -> Result<(), QueueError> {
        let _writer = self.writer.lock().await;
        let snapshot = self.state.lock().snapshot();
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|e| QueueError::Persistence(format!("store write task failed: {e}")))?
    }

    fn emit(&self, id: TaskId, action: &str, detail: Option<String>) {
        if let Some(sink) = &self.events {
            sink.record(build_task_event(id, action, detail));
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("store", &self.store.describe())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
