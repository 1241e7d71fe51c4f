//! Function registry: maps `callable_ref` keys to executable task bodies.
//!
//! Task records only ever store the string key and JSON arguments, so work can be
//! persisted and resumed after a restart. The registry is built once at startup
//! and shared immutably (`Arc<FunctionRegistry>`) with the queue and worker pool.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{AppResult, QueueError};

/// An executable task body.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_task_queue::core::{AppResult, TaskFunction};
///
/// struct RenderPdf;
///
/// #[async_trait]
/// impl TaskFunction for RenderPdf {
///     async fn call(&self, args: serde_json::Value) -> AppResult<serde_json::Value> {
///         let quote = args["quote_id"].as_u64().unwrap_or_default();
///         Ok(serde_json::json!({ "path": format!("/tmp/quote-{quote}.pdf") }))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskFunction: Send + Sync + 'static {
    /// Execute with the record's arguments and return a serializable result.
    async fn call(&self, args: Value) -> AppResult<Value>;

    /// Whether the body blocks its thread. Blocking bodies run on tokio's
    /// blocking pool; they still occupy one worker slot for their whole duration.
    fn is_blocking(&self) -> bool {
        false
    }
}

type BoxedFuture = Pin<Box<dyn Future<Output = AppResult<Value>> + Send>>;

struct AsyncFn<F>(F);

#[async_trait]
impl<F> TaskFunction for AsyncFn<F>
where
    F: Fn(Value) -> BoxedFuture + Send + Sync + 'static,
{
    async fn call(&self, args: Value) -> AppResult<Value> {
        (self.0)(args).await
    }
}

struct BlockingFn<F>(F);

#[async_trait]
impl<F> TaskFunction for BlockingFn<F>
where
    F: Fn(Value) -> AppResult<Value> + Send + Sync + 'static,
{
    async fn call(&self, args: Value) -> AppResult<Value> {
        (self.0)(args)
    }

    fn is_blocking(&self) -> bool {
        true
    }
}

/// Registry of task bodies (`callable_ref` -> function).
///
/// Mutable while the application is wired up, then frozen behind an `Arc`.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn TaskFunction>>,
}

impl FunctionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under `key`.
    ///
    /// # Errors
    ///
    /// `QueueError::Validation` for an empty or already registered key.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        function: Arc<dyn TaskFunction>,
    ) -> Result<(), QueueError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(QueueError::Validation("callable_ref must not be empty".into()));
        }
        if self.functions.contains_key(&key) {
            return Err(QueueError::Validation(format!(
                "callable_ref `{key}` is already registered"
            )));
        }
        tracing::debug!(callable_ref = %key, "registered task function");
        self.functions.insert(key, function);
        Ok(())
    }

    /// Register an async closure.
    ///
    /// # Errors
    ///
    /// Same as [`FunctionRegistry::register`].
    pub fn register_fn<F, Fut>(&mut self, key: impl Into<String>, f: F) -> Result<(), QueueError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<Value>> + Send + 'static,
    {
        let boxed = move |args: Value| -> BoxedFuture { Box::pin(f(args)) };
        self.register(key, Arc::new(AsyncFn(boxed)))
    }

    /// Register a synchronous closure that runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`FunctionRegistry::register`].
    pub fn register_blocking<F>(&mut self, key: impl Into<String>, f: F) -> Result<(), QueueError>
    where
        F: Fn(Value) -> AppResult<Value> + Send + Sync + 'static,
    {
        self.register(key, Arc::new(BlockingFn(f)))
    }

    /// Look up a function.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<dyn TaskFunction>> {
        self.functions.get(key).cloned()
    }

    /// Whether `key` is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.functions.contains_key(key)
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.functions.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.keys())
            .finish()
    }
}
