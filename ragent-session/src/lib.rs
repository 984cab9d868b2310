#![deny(missing_docs)]
//! Persistent store for research-cycle sessions and their action log.
//!
//! Backed by Postgres via `sqlx`. The reconciler is the sole writer of
//! `phase`/`outcome`; workers are the sole writers of `strategy_name` and
//! the assessment fields. [`SessionStore::transition_phase`] enforces
//! that split with a compare-and-swap `UPDATE ... WHERE phase = $expected`
//! rather than a transaction, so two reconciler ticks racing on the same
//! session can't both believe they made the move.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use thiserror::Error;

/// Where a session sits in the design -> train -> backtest -> assess cycle.
///
/// Closed, not `#[non_exhaustive]` — every reconciler dispatch arm and
/// every session-store query is written against this exact set and a new
/// phase is a breaking change to both, not something a downstream crate
/// can add on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No active session.
    Idle,
    /// Design worker is running.
    Designing,
    /// Design worker produced a strategy; training not yet started.
    Designed,
    /// Training operation in flight.
    Training,
    /// Backtest operation in flight.
    Backtesting,
    /// Assessment worker is running.
    Assessing,
    /// Terminal: the cycle finished, successfully or not.
    Complete,
}

impl SessionPhase {
    /// Phases the reconciler treats as "a cycle is in progress" — used
    /// both by the active-session partial index and by orphan recovery.
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionPhase::Idle | SessionPhase::Complete)
    }
}

/// Terminal outcome recorded once a session reaches `COMPLETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Cycle ran to a verdict.
    Success,
    /// Design worker did not save a strategy.
    FailedDesign,
    /// Training operation reported failure.
    FailedTraining,
    /// Training result summary failed the training gate.
    FailedTrainingGate,
    /// Backtest operation reported failure.
    FailedBacktest,
    /// Backtest result summary failed the backtest gate.
    FailedBacktestGate,
    /// Assessment worker did not produce a verdict.
    FailedAssessment,
    /// A watchdog timeout aborted the session.
    FailedTimeout,
    /// Orphaned by a process restart mid-cycle.
    FailedInterrupted,
    /// Explicitly cancelled.
    Cancelled,
}

/// A research-cycle session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Primary key, backed by SQL `serial`.
    pub id: i64,
    /// Current phase.
    pub phase: SessionPhase,
    /// Strategy name, set once by the design worker.
    pub strategy_name: Option<String>,
    /// Operation id of the in-flight training or backtest run.
    pub operation_id: Option<String>,
    /// Terminal outcome, set iff `phase == COMPLETE`.
    pub outcome: Option<SessionOutcome>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Free-form assessment narrative from the assessment worker.
    pub assessment_text: Option<String>,
    /// Structured assessment metrics from the assessment worker.
    pub assessment_metrics: Option<serde_json::Value>,
    /// Training result summary recorded once the training gate passes,
    /// carried forward so the assessment step can read it back without
    /// going through the action log.
    pub training_result: Option<serde_json::Value>,
}

/// One entry in a session's action log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// Owning session id.
    pub session_id: i64,
    /// Tool invoked.
    pub tool_name: String,
    /// Arguments passed to the tool.
    pub tool_args: serde_json::Value,
    /// Result returned by the tool.
    pub result: serde_json::Value,
    /// When the call happened.
    pub timestamp: DateTime<Utc>,
    /// Input tokens billed for the model call that produced this action.
    pub input_token_count: i64,
    /// Output tokens billed for the model call that produced this action.
    pub output_token_count: i64,
}

/// Errors from session-store operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SessionError {
    /// No row with the given id.
    #[error("session not found: {0}")]
    NotFound(i64),
    /// A `transition_phase` call's `expected_from` didn't match the
    /// stored phase — someone else moved the session first.
    #[error("session {id} is in phase {actual:?}, expected {expected:?}")]
    PhaseMismatch {
        /// Session id.
        id: i64,
        /// Phase the caller expected.
        expected: SessionPhase,
        /// Phase actually stored.
        actual: SessionPhase,
    },
    /// `strategy_name` is set once; a second write was attempted.
    #[error("session {0} already has a strategy_name")]
    StrategyAlreadySet(i64),
    /// A second session was started while one was already active.
    #[error("a session is already active: {0}")]
    AlreadyActive(i64),
    /// Underlying database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const SCHEMA_SESSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id SERIAL PRIMARY KEY,
    phase TEXT NOT NULL,
    strategy_name TEXT,
    operation_id TEXT,
    outcome TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    assessment_text TEXT,
    assessment_metrics JSONB,
    training_result JSONB
)
"#;

const SCHEMA_ACTIVE_SESSION_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS sessions_active_idx ON sessions ((1))
    WHERE phase NOT IN ('idle', 'complete')
"#;

const SCHEMA_ACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS actions (
    id BIGSERIAL PRIMARY KEY,
    session_id BIGINT NOT NULL REFERENCES sessions (id),
    tool_name TEXT NOT NULL,
    tool_args JSONB NOT NULL,
    result JSONB NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    input_token_count BIGINT NOT NULL,
    output_token_count BIGINT NOT NULL
)
"#;

/// Store for sessions and their action log.
pub struct SessionStore {
    pool: PgPool,
}

impl SessionStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the schema if it doesn't already exist. Idempotent —
    /// intended to run on every daemon startup, not via a migrations
    /// directory, since this store owns exactly two tables.
    pub async fn ensure_schema(&self) -> Result<(), SessionError> {
        sqlx::query(SCHEMA_SESSIONS).execute(&self.pool).await?;
        sqlx::query(SCHEMA_ACTIONS).execute(&self.pool).await?;
        sqlx::query(SCHEMA_ACTIVE_SESSION_INDEX)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_session(row: &sqlx::postgres::PgRow) -> Result<Session, SessionError> {
        Ok(Session {
            id: row.try_get("id")?,
            phase: row.try_get("phase")?,
            strategy_name: row.try_get("strategy_name")?,
            operation_id: row.try_get("operation_id")?,
            outcome: row.try_get("outcome")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            assessment_text: row.try_get("assessment_text")?,
            assessment_metrics: row.try_get("assessment_metrics")?,
            training_result: row.try_get("training_result")?,
        })
    }

    /// Start a new session in `DESIGNING`. Fails if one is already active
    /// — the single-active-session invariant is enforced here, not left
    /// to the caller. The id is assigned by the database (`SERIAL`), not
    /// chosen by the caller.
    pub async fn create_session(&self) -> Result<Session, SessionError> {
        if let Some(active) = self.get_active_session().await? {
            return Err(SessionError::AlreadyActive(active.id));
        }
        let row = sqlx::query("INSERT INTO sessions (phase) VALUES ('designing') RETURNING id")
            .fetch_one(&self.pool)
            .await?;
        let id: i64 = row.try_get("id")?;
        self.get(id).await?.ok_or(SessionError::NotFound(id))
    }

    /// Fetch a session by id.
    pub async fn get(&self, id: i64) -> Result<Option<Session>, SessionError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    /// The single session currently in a non-idle, non-complete phase,
    /// if any.
    pub async fn get_active_session(&self) -> Result<Option<Session>, SessionError> {
        let row = sqlx::query(
            "SELECT * FROM sessions WHERE phase NOT IN ('idle', 'complete') LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    /// Compare-and-swap phase transition. Fails with
    /// [`SessionError::PhaseMismatch`] if the stored phase isn't
    /// `expected_from` at the moment of the write — the reconciler is
    /// the only writer of this field, so a mismatch means a bug rather
    /// than legitimate contention, but we report it instead of silently
    /// clobbering.
    pub async fn transition_phase(
        &self,
        id: i64,
        expected_from: SessionPhase,
        to: SessionPhase,
    ) -> Result<(), SessionError> {
        let result = sqlx::query(
            "UPDATE sessions SET phase = $1, updated_at = now() WHERE id = $2 AND phase = $3",
        )
        .bind(to)
        .bind(id)
        .bind(expected_from)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual = self
                .get(id)
                .await?
                .ok_or(SessionError::NotFound(id))?
                .phase;
            return Err(SessionError::PhaseMismatch {
                id,
                expected: expected_from,
                actual,
            });
        }
        Ok(())
    }

    /// Record the operation id of the in-flight training or backtest run.
    pub async fn set_operation_id(
        &self,
        id: i64,
        operation_id: impl Into<String>,
    ) -> Result<(), SessionError> {
        sqlx::query("UPDATE sessions SET operation_id = $1, updated_at = now() WHERE id = $2")
            .bind(operation_id.into())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the strategy name produced by the design worker. Fails if
    /// one is already set — `strategy_name` is write-once.
    pub async fn set_strategy_name(
        &self,
        id: i64,
        strategy_name: impl Into<String>,
    ) -> Result<(), SessionError> {
        let session = self.get(id).await?.ok_or(SessionError::NotFound(id))?;
        if session.strategy_name.is_some() {
            return Err(SessionError::StrategyAlreadySet(id));
        }
        sqlx::query("UPDATE sessions SET strategy_name = $1, updated_at = now() WHERE id = $2")
            .bind(strategy_name.into())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the training result summary once the training gate passes,
    /// so the assessment worker can read it back from the session row
    /// instead of the action log.
    pub async fn set_training_result(
        &self,
        id: i64,
        training_result: serde_json::Value,
    ) -> Result<(), SessionError> {
        sqlx::query("UPDATE sessions SET training_result = $1, updated_at = now() WHERE id = $2")
            .bind(training_result)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move a session to `COMPLETE` and record its outcome, optionally
    /// with assessment narrative and metrics. Clears `operation_id` —
    /// a complete session has no in-flight external job.
    pub async fn complete(
        &self,
        id: i64,
        outcome: SessionOutcome,
        assessment_text: Option<String>,
        assessment_metrics: Option<serde_json::Value>,
    ) -> Result<(), SessionError> {
        sqlx::query(
            "UPDATE sessions
             SET phase = 'complete', outcome = $1, assessment_text = $2,
                 assessment_metrics = $3, operation_id = NULL, updated_at = now()
             WHERE id = $4",
        )
        .bind(outcome)
        .bind(assessment_text)
        .bind(assessment_metrics)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append one action-log entry.
    pub async fn append_action(
        &self,
        session_id: i64,
        tool_name: &str,
        tool_args: serde_json::Value,
        result: serde_json::Value,
        input_token_count: i64,
        output_token_count: i64,
    ) -> Result<(), SessionError> {
        sqlx::query(
            "INSERT INTO actions
                (session_id, tool_name, tool_args, result, input_token_count, output_token_count)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(session_id)
        .bind(tool_name)
        .bind(tool_args)
        .bind(result)
        .bind(input_token_count)
        .bind(output_token_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent action log entry for `session_id` invoking `tool_name`,
    /// if any.
    pub async fn latest_action(
        &self,
        session_id: i64,
        tool_name: &str,
    ) -> Result<Option<ActionLogEntry>, SessionError> {
        let row = sqlx::query(
            "SELECT * FROM actions WHERE session_id = $1 AND tool_name = $2
             ORDER BY id DESC LIMIT 1",
        )
        .bind(session_id)
        .bind(tool_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_action).transpose()
    }

    fn row_to_action(row: &sqlx::postgres::PgRow) -> Result<ActionLogEntry, SessionError> {
        Ok(ActionLogEntry {
            session_id: row.try_get("session_id")?,
            tool_name: row.try_get("tool_name")?,
            tool_args: row.try_get("tool_args")?,
            result: row.try_get("result")?,
            timestamp: row.try_get("timestamp")?,
            input_token_count: row.try_get("input_token_count")?,
            output_token_count: row.try_get("output_token_count")?,
        })
    }

    /// Startup recovery: any session left in a non-idle, non-complete
    /// phase from a prior process's lifetime didn't crash gracefully.
    /// Mark each `FAILED_INTERRUPTED` and return their ids.
    pub async fn recover_orphaned_sessions(&self) -> Result<Vec<i64>, SessionError> {
        let rows = sqlx::query(
            "UPDATE sessions
             SET phase = 'complete', outcome = 'failed_interrupted', operation_id = NULL, updated_at = now()
             WHERE phase NOT IN ('idle', 'complete')
             RETURNING id",
        )
        .fetch_all(&self.pool)
        .await?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;

        for id in &ids {
            tracing::warn!(session_id = %id, "recovered orphaned session as failed_interrupted");
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_active_excludes_idle_and_complete() {
        assert!(!SessionPhase::Idle.is_active());
        assert!(!SessionPhase::Complete.is_active());
        assert!(SessionPhase::Designing.is_active());
        assert!(SessionPhase::Training.is_active());
        assert!(SessionPhase::Backtesting.is_active());
        assert!(SessionPhase::Assessing.is_active());
        assert!(SessionPhase::Designed.is_active());
    }

    #[test]
    fn phase_serde_round_trip_is_snake_case() {
        let phase = SessionPhase::Backtesting;
        let json = serde_json::to_string(&phase).unwrap();
        assert_eq!(json, "\"backtesting\"");
        let back: SessionPhase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SessionPhase::Backtesting);
    }

    #[test]
    fn outcome_serde_round_trip_is_snake_case() {
        let outcome = SessionOutcome::FailedTrainingGate;
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, "\"failed_training_gate\"");
    }
}
