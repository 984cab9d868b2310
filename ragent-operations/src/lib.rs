#![deny(missing_docs)]
//! In-memory registry of long-running operations (agent design, training,
//! backtest, assessment runs).
//!
//! Uses a `HashMap` behind a `RwLock` for concurrent access, the same
//! shape as a plain key-value state store, generalized to a typed
//! lifecycle record instead of an opaque JSON value. Each operation
//! carries its own [`CancellationToken`] so a caller holding the
//! operation id can ask the in-flight work to stop without reaching
//! into the worker task directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{Notify, RwLock};

/// What kind of work an operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Strategy design produced by the LLM.
    AgentDesign,
    /// Model training run.
    Training,
    /// Strategy backtest run.
    Backtest,
    /// Post-backtest assessment produced by the LLM.
    AgentAssessment,
}

impl OperationType {
    fn as_str(&self) -> &'static str {
        match self {
            OperationType::AgentDesign => "agent_design",
            OperationType::Training => "training",
            OperationType::Backtest => "backtest",
            OperationType::AgentAssessment => "agent_assessment",
        }
    }
}

/// Where an operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Created, not yet started.
    Pending,
    /// Actively running.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by cancellation.
    Cancelled,
}

impl OperationStatus {
    /// Whether this status is a terminal state (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

/// Errors from operation registry calls.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OperationError {
    /// No operation exists with the given id.
    #[error("operation not found: {0}")]
    NotFound(String),

    /// The requested transition isn't valid from the operation's current status.
    #[error("cannot transition operation {id} from {from:?} via {attempted}")]
    InvalidTransition {
        /// The operation id.
        id: String,
        /// The status the operation was in.
        from: OperationStatus,
        /// What the caller tried to do.
        attempted: &'static str,
    },
}

/// A cheap, clonable cancellation signal.
///
/// Pairs an `Arc<AtomicBool>` (for cheap polling) with a `tokio::sync::Notify`
/// (for callers that want to `await` cancellation instead of polling it).
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    /// Create a new, not-yet-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signal cancellation. Idempotent — cancelling twice is a no-op the
    /// second time.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether cancellation has been signaled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is signaled. Returns immediately if it
    /// already was — checks the flag before waiting to avoid missing a
    /// signal that fired before this call.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A single tracked operation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Operation {
    /// Opaque id, `op_<type>_<unix_ms>_<short_rand>`.
    pub id: String,
    /// What kind of work this is.
    pub op_type: OperationType,
    /// Current lifecycle status.
    pub status: OperationStatus,
    /// Progress in `[0.0, 1.0]`, if the caller reports it.
    pub progress: Option<f64>,
    /// Human-readable result summary, set on success.
    pub result_summary: Option<String>,
    /// Error message, set on failure.
    pub error_message: Option<String>,
    /// The operation that spawned this one, if any (e.g. a backtest
    /// operation started from a training operation's session).
    pub parent_operation_id: Option<String>,
    /// Cancellation signal for in-flight work tied to this operation.
    #[serde(skip)]
    pub cancellation: CancellationToken,
}

fn new_operation_id(op_type: OperationType) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let rand = uuid::Uuid::new_v4().simple().to_string();
    format!("op_{}_{}_{}", op_type.as_str(), ts, &rand[..8])
}

/// Registry of in-flight and completed operations.
///
/// Holds operations in a `HashMap` behind a `RwLock`, keyed by id.
/// Operations are never removed — callers that need to bound memory
/// growth should periodically sweep terminal operations older than some
/// retention window (not this crate's concern).
pub struct OperationRegistry {
    operations: RwLock<HashMap<String, Operation>>,
}

impl OperationRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new operation in `Pending` status and return its id.
    pub async fn create(
        &self,
        op_type: OperationType,
        parent_operation_id: Option<String>,
    ) -> String {
        let id = new_operation_id(op_type);
        let operation = Operation {
            id: id.clone(),
            op_type,
            status: OperationStatus::Pending,
            progress: None,
            result_summary: None,
            error_message: None,
            parent_operation_id,
            cancellation: CancellationToken::new(),
        };
        self.operations.write().await.insert(id.clone(), operation);
        id
    }

    /// Transition an operation from `Pending` to `Running`.
    pub async fn start(&self, id: &str) -> Result<(), OperationError> {
        let mut ops = self.operations.write().await;
        let op = ops
            .get_mut(id)
            .ok_or_else(|| OperationError::NotFound(id.to_string()))?;
        if op.status != OperationStatus::Pending {
            return Err(OperationError::InvalidTransition {
                id: id.to_string(),
                from: op.status,
                attempted: "start",
            });
        }
        op.status = OperationStatus::Running;
        Ok(())
    }

    /// Update the progress of a running operation. Valid for both
    /// `Pending` and `Running` operations; a no-op value reported before
    /// `start()` is still recorded.
    pub async fn update_progress(&self, id: &str, progress: f64) -> Result<(), OperationError> {
        let mut ops = self.operations.write().await;
        let op = ops
            .get_mut(id)
            .ok_or_else(|| OperationError::NotFound(id.to_string()))?;
        if op.status.is_terminal() {
            return Err(OperationError::InvalidTransition {
                id: id.to_string(),
                from: op.status,
                attempted: "update_progress",
            });
        }
        op.progress = Some(progress.clamp(0.0, 1.0));
        Ok(())
    }

    /// Mark an operation completed. Idempotent: calling this on an
    /// already-completed operation logs a warning and leaves the stored
    /// record untouched rather than erroring.
    pub async fn complete(
        &self,
        id: &str,
        result_summary: impl Into<String>,
    ) -> Result<(), OperationError> {
        let mut ops = self.operations.write().await;
        let op = ops
            .get_mut(id)
            .ok_or_else(|| OperationError::NotFound(id.to_string()))?;
        if op.status == OperationStatus::Completed {
            tracing::warn!(operation_id = %id, "operation already completed, ignoring duplicate complete()");
            return Ok(());
        }
        if op.status.is_terminal() {
            return Err(OperationError::InvalidTransition {
                id: id.to_string(),
                from: op.status,
                attempted: "complete",
            });
        }
        op.status = OperationStatus::Completed;
        op.progress = Some(1.0);
        op.result_summary = Some(result_summary.into());
        Ok(())
    }

    /// Mark an operation failed. Idempotent in the same sense as `complete()`.
    pub async fn fail(
        &self,
        id: &str,
        error_message: impl Into<String>,
    ) -> Result<(), OperationError> {
        let mut ops = self.operations.write().await;
        let op = ops
            .get_mut(id)
            .ok_or_else(|| OperationError::NotFound(id.to_string()))?;
        if op.status == OperationStatus::Failed {
            tracing::warn!(operation_id = %id, "operation already failed, ignoring duplicate fail()");
            return Ok(());
        }
        if op.status.is_terminal() {
            return Err(OperationError::InvalidTransition {
                id: id.to_string(),
                from: op.status,
                attempted: "fail",
            });
        }
        op.status = OperationStatus::Failed;
        op.error_message = Some(error_message.into());
        Ok(())
    }

    /// Cancel a running operation: signals its cancellation token, marks
    /// it `Cancelled`, and records `reason` as its `error_message`. Only
    /// legal from `Running` — a `Pending` operation hasn't started, and a
    /// terminal one is already too late to matter.
    pub async fn cancel(&self, id: &str, reason: impl Into<String>) -> Result<(), OperationError> {
        let mut ops = self.operations.write().await;
        let op = ops
            .get_mut(id)
            .ok_or_else(|| OperationError::NotFound(id.to_string()))?;
        if op.status != OperationStatus::Running {
            return Err(OperationError::InvalidTransition {
                id: id.to_string(),
                from: op.status,
                attempted: "cancel",
            });
        }
        op.cancellation.cancel();
        op.status = OperationStatus::Cancelled;
        op.error_message = Some(reason.into());
        Ok(())
    }

    /// Look up an operation by id.
    pub async fn get(&self, id: &str) -> Option<Operation> {
        self.operations.read().await.get(id).cloned()
    }

    /// Get the cancellation token for an operation, if it exists.
    pub async fn get_cancellation_token(&self, id: &str) -> Option<CancellationToken> {
        self.operations
            .read()
            .await
            .get(id)
            .map(|op| op.cancellation.clone())
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
