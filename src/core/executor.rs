//! Runner abstraction between the service facade and the supervisor.

use async_trait::async_trait;
use serde_json::Value;

use super::{WorkerError, WorkerSupervisor};

/// Executes one job input and produces its structured result.
///
/// [`WorkerSupervisor`] is the production implementation; tests substitute
/// in-process doubles.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use scrape_parking_lot::core::{JobRunner, WorkerError};
/// use serde_json::{json, Value};
///
/// struct Canned;
///
/// #[async_trait]
/// impl JobRunner for Canned {
///     async fn execute(&self, _input: Value) -> Result<Value, WorkerError> {
///         Ok(json!({"totalResults": 0, "articles": []}))
///     }
/// }
/// ```
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Execute `input` and return the structured result.
    async fn execute(&self, input: Value) -> Result<Value, WorkerError>;
}

#[async_trait]
impl JobRunner for WorkerSupervisor {
    async fn execute(&self, input: Value) -> Result<Value, WorkerError> {
        self.run(&input).await
    }
}
