#![deny(missing_docs)]
//! Polling trigger reconciler for the design -> train -> backtest -> assess
//! research cycle.
//!
//! One [`Reconciler`] owns the [`ragent_session::SessionStore`], the
//! shared [`ragent_operations::OperationRegistry`], the two workers, and
//! the job-starter/status collaborators. [`Reconciler::check_and_trigger`]
//! observes the single active session (if any) and performs at most one
//! legal phase transition, dispatched by the session's current phase.
//! Design and assessment steps run as background tasks rather than
//! inline: a tick that finds a session already `DESIGNING`/`ASSESSING` is
//! a no-op, which is what keeps steady-state ticks idempotent.

use ragent_gates::{BacktestGateConfig, BacktestResult, TrainingGateConfig, TrainingResult};
use ragent_operations::OperationRegistry;
use ragent_session::{Session, SessionError, SessionOutcome, SessionPhase, SessionStore};
use ragent_tools_builtin::{
    BacktestRequest, BacktestStarter, OperationStatusSource, StartResult, TrainingRequest,
    TrainingStarter,
};
use ragent_turn::provider::Provider;
use ragent_workers::{AssessmentOutcome, AssessmentWorker, DesignOutcome, DesignWorker};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors surfaced by reconciler construction or startup recovery, as
/// opposed to ordinary tick outcomes (reported via [`TriggerOutcome`]).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The session store rejected an operation outside normal dispatch.
    #[error("session store error: {0}")]
    Session(#[from] SessionError),
}

/// Result of one [`Reconciler::check_and_trigger`] call.
///
/// Closed, not `#[non_exhaustive]` — every variant corresponds to exactly
/// one arm of the phase dispatch table.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// The reconciler is disabled; no session was observed.
    Disabled,
    /// No active session existed; a new one was created and the design
    /// worker was started in the background.
    DesignStarted {
        /// Id of the newly created session.
        session_id: i64,
    },
    /// A session is `DESIGNING`; the design worker is still running.
    DesignInProgress {
        /// The in-progress session.
        session_id: i64,
    },
    /// A `DESIGNED` session's training run was started.
    TrainingStarted {
        /// The session that entered `TRAINING`.
        session_id: i64,
        /// External operation id to poll.
        operation_id: String,
    },
    /// The training starter rejected or failed to start the run; the
    /// session completed as `FAILED_TRAINING`.
    TrainingStartFailed {
        /// The session that failed to start training.
        session_id: i64,
        /// Why the start failed.
        reason: String,
    },
    /// The external training or backtest operation is still running or
    /// pending.
    OperationInProgress {
        /// The session whose operation is in flight.
        session_id: i64,
        /// The operation being polled.
        operation_id: String,
    },
    /// The training operation itself reported failure.
    TrainingFailed {
        /// The session that completed as `FAILED_TRAINING`.
        session_id: i64,
        /// The operation's error message.
        reason: String,
    },
    /// The training result summary failed the training gate.
    TrainingGateFailed {
        /// The session that completed as `FAILED_TRAINING_GATE`.
        session_id: i64,
        /// The gate's failure reason.
        reason: String,
    },
    /// A `TRAINING` session's backtest run was started after a gate pass.
    BacktestStarted {
        /// The session that entered `BACKTESTING`.
        session_id: i64,
        /// External operation id to poll.
        operation_id: String,
    },
    /// The backtest starter rejected or failed to start the run.
    BacktestStartFailed {
        /// The session that failed to start the backtest.
        session_id: i64,
        /// Why the start failed.
        reason: String,
    },
    /// The backtest operation itself reported failure.
    BacktestFailed {
        /// The session that completed as `FAILED_BACKTEST`.
        session_id: i64,
        /// The operation's error message.
        reason: String,
    },
    /// The backtest result summary failed the backtest gate.
    BacktestGateFailed {
        /// The session that completed as `FAILED_BACKTEST_GATE`.
        session_id: i64,
        /// The gate's failure reason.
        reason: String,
    },
    /// A `BACKTESTING` session passed its gate; the assessment worker
    /// was started in the background.
    AssessmentStarted {
        /// The session that entered `ASSESSING`.
        session_id: i64,
    },
    /// A session is `ASSESSING`; the assessment worker is still running.
    AssessmentInProgress {
        /// The in-progress session.
        session_id: i64,
    },
    /// No session is active and none was started this tick. Only
    /// reachable for `IDLE`/`COMPLETE` sessions observed mid-dispatch —
    /// normal operation starts a fresh cycle whenever none is active.
    NotActive,
    /// A session-store call failed; the tick made no progress.
    StoreError {
        /// The underlying error, stringified.
        reason: String,
    },
}

struct ActiveWorker {
    #[allow(dead_code)]
    session_id: i64,
    operation_id: String,
}

/// Polls one session through the design -> train -> backtest -> assess
/// cycle, one legal transition per tick.
pub struct Reconciler<P: Provider + Clone + 'static> {
    sessions: Arc<SessionStore>,
    operations: Arc<OperationRegistry>,
    design_worker: Arc<DesignWorker<P>>,
    assessment_worker: Arc<AssessmentWorker<P>>,
    training_starter: Arc<dyn TrainingStarter>,
    backtest_starter: Arc<dyn BacktestStarter>,
    operation_status: Arc<dyn OperationStatusSource>,
    training_gate: TrainingGateConfig,
    backtest_gate: BacktestGateConfig,
    enabled: AtomicBool,
    tick_guard: Mutex<()>,
    active_worker: Mutex<Option<ActiveWorker>>,
}

impl<P: Provider + Clone + 'static> Reconciler<P> {
    /// Build a reconciler. Starts enabled; call [`Self::set_enabled`] to
    /// flip it off.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionStore>,
        operations: Arc<OperationRegistry>,
        design_worker: Arc<DesignWorker<P>>,
        assessment_worker: Arc<AssessmentWorker<P>>,
        training_starter: Arc<dyn TrainingStarter>,
        backtest_starter: Arc<dyn BacktestStarter>,
        operation_status: Arc<dyn OperationStatusSource>,
        training_gate: TrainingGateConfig,
        backtest_gate: BacktestGateConfig,
    ) -> Self {
        Self {
            sessions,
            operations,
            design_worker,
            assessment_worker,
            training_starter,
            backtest_starter,
            operation_status,
            training_gate,
            backtest_gate,
            enabled: AtomicBool::new(true),
            tick_guard: Mutex::new(()),
            active_worker: Mutex::new(None),
        }
    }

    /// Enable or disable the reconciler. Disabled ticks always report
    /// [`TriggerOutcome::Disabled`] without touching the session store.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Startup recovery: complete every orphaned session as
    /// `FAILED_INTERRUPTED` before the run loop starts.
    pub async fn recover_orphaned_sessions(&self) -> Result<Vec<i64>, ReconcilerError> {
        Ok(self.sessions.recover_orphaned_sessions().await?)
    }

    /// Cancel the currently in-flight design or assessment worker, if
    /// any. A no-op if the active session is in `TRAINING`/`BACKTESTING`
    /// (those external jobs aren't cancelled through this path) or if no
    /// worker is in flight.
    pub async fn cancel_active(&self) {
        if let Some(active) = self.active_worker.lock().await.take() {
            self.operations
                .cancel(&active.operation_id, "reconciler shutdown")
                .await
                .ok();
            tracing::info!(
                operation_id = %active.operation_id,
                "cancellation requested for in-flight worker"
            );
        }
    }

    /// Observe the single active session, if any, and perform at most
    /// one legal phase transition. Never panics; session-store failures
    /// are reported as [`TriggerOutcome::StoreError`] and logged.
    pub async fn check_and_trigger(self: &Arc<Self>) -> TriggerOutcome {
        if !self.enabled.load(Ordering::SeqCst) {
            return TriggerOutcome::Disabled;
        }

        let _guard = self.tick_guard.lock().await;

        let active = match self.sessions.get_active_session().await {
            Ok(active) => active,
            Err(e) => {
                tracing::error!(error = %e, "failed to load active session");
                return TriggerOutcome::StoreError {
                    reason: e.to_string(),
                };
            }
        };

        let outcome = match active {
            None => self.start_new_cycle().await,
            Some(session) => self.dispatch(session).await,
        };

        match &outcome {
            TriggerOutcome::StoreError { reason } => {
                tracing::error!(reason = %reason, "tick failed");
            }
            other => tracing::info!(outcome = ?other, "tick complete"),
        }
        outcome
    }

    async fn dispatch(self: &Arc<Self>, session: Session) -> TriggerOutcome {
        match session.phase {
            SessionPhase::Idle | SessionPhase::Complete => TriggerOutcome::NotActive,
            SessionPhase::Designing => TriggerOutcome::DesignInProgress {
                session_id: session.id,
            },
            SessionPhase::Designed => self.start_training(session).await,
            SessionPhase::Training => self.poll_training(session).await,
            SessionPhase::Backtesting => self.poll_backtest(session).await,
            SessionPhase::Assessing => TriggerOutcome::AssessmentInProgress {
                session_id: session.id,
            },
        }
    }

    async fn start_new_cycle(self: &Arc<Self>) -> TriggerOutcome {
        let session = match self.sessions.create_session().await {
            Ok(session) => session,
            Err(e) => {
                return TriggerOutcome::StoreError {
                    reason: e.to_string(),
                };
            }
        };
        let id = session.id;

        let op_id = match self.design_worker.begin(None).await {
            Ok(op_id) => op_id,
            Err(e) => {
                self.sessions
                    .complete(id, SessionOutcome::FailedDesign, Some(e.to_string()), None)
                    .await
                    .ok();
                return TriggerOutcome::StoreError {
                    reason: e.to_string(),
                };
            }
        };

        *self.active_worker.lock().await = Some(ActiveWorker {
            session_id: id,
            operation_id: op_id.clone(),
        });

        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            reconciler.run_design(id, op_id).await;
        });

        TriggerOutcome::DesignStarted { session_id: id }
    }

    async fn run_design(self: Arc<Self>, session_id: i64, op_id: String) {
        let outcome = self
            .design_worker
            .run_started(op_id, "scheduled tick")
            .await;

        match outcome {
            Ok(DesignOutcome::Designed {
                strategy_name,
                operation_id,
            }) => {
                if let Err(e) = self
                    .sessions
                    .set_strategy_name(session_id, strategy_name.clone())
                    .await
                {
                    tracing::error!(error = %e, session_id = %session_id, "failed to record strategy name");
                }
                if let Err(e) = self
                    .sessions
                    .transition_phase(session_id, SessionPhase::Designing, SessionPhase::Designed)
                    .await
                {
                    tracing::error!(error = %e, session_id = %session_id, "failed to transition to designed");
                }
                tracing::info!(session_id = %session_id, operation_id = %operation_id, strategy_name = %strategy_name, "design succeeded");
            }
            Ok(DesignOutcome::Failed { reason, .. }) => {
                self.sessions
                    .complete(session_id, SessionOutcome::FailedDesign, Some(reason), None)
                    .await
                    .ok();
            }
            Ok(DesignOutcome::Cancelled { .. }) => {
                self.sessions
                    .complete(session_id, SessionOutcome::Cancelled, None, None)
                    .await
                    .ok();
            }
            Err(e) => {
                self.sessions
                    .complete(
                        session_id,
                        SessionOutcome::FailedDesign,
                        Some(e.to_string()),
                        None,
                    )
                    .await
                    .ok();
            }
        }

        self.active_worker.lock().await.take();
    }

    async fn start_training(&self, session: Session) -> TriggerOutcome {
        let session_id = session.id;
        let Some(strategy_name) = session.strategy_name.clone() else {
            return TriggerOutcome::StoreError {
                reason: format!("session {session_id} is DESIGNED with no strategy_name"),
            };
        };

        let request = TrainingRequest {
            strategy_name,
            symbols: None,
            timeframes: None,
            start_date: None,
            end_date: None,
        };

        match self.training_starter.start_training(request).await {
            Ok(StartResult {
                success: true,
                operation_id: Some(operation_id),
            }) => {
                if let Err(e) = self
                    .sessions
                    .set_operation_id(session_id, operation_id.clone())
                    .await
                {
                    return TriggerOutcome::StoreError {
                        reason: e.to_string(),
                    };
                }
                if let Err(e) = self
                    .sessions
                    .transition_phase(session_id, SessionPhase::Designed, SessionPhase::Training)
                    .await
                {
                    return TriggerOutcome::StoreError {
                        reason: e.to_string(),
                    };
                }
                TriggerOutcome::TrainingStarted {
                    session_id,
                    operation_id,
                }
            }
            Ok(_) => {
                let reason = "training starter rejected the run".to_string();
                self.sessions
                    .complete(session_id, SessionOutcome::FailedTraining, Some(reason.clone()), None)
                    .await
                    .ok();
                TriggerOutcome::TrainingStartFailed { session_id, reason }
            }
            Err(e) => {
                let reason = e.to_string();
                self.sessions
                    .complete(session_id, SessionOutcome::FailedTraining, Some(reason.clone()), None)
                    .await
                    .ok();
                TriggerOutcome::TrainingStartFailed { session_id, reason }
            }
        }
    }

    async fn poll_training(self: &Arc<Self>, session: Session) -> TriggerOutcome {
        let session_id = session.id;
        let Some(operation_id) = session.operation_id.clone() else {
            return TriggerOutcome::StoreError {
                reason: format!("session {session_id} is TRAINING with no operation_id"),
            };
        };

        let status = match self.operation_status.get_operation(&operation_id).await {
            Ok(status) => status,
            Err(e) => {
                return TriggerOutcome::StoreError {
                    reason: e.to_string(),
                };
            }
        };

        match status.status.as_str() {
            "completed" => {
                let summary = status.result_summary.unwrap_or(Value::Null);
                let result: TrainingResult =
                    serde_json::from_value(summary.clone()).unwrap_or_default();
                let gate = self.training_gate.evaluate(&result);
                if gate.passed {
                    self.sessions
                        .set_training_result(session_id, summary.clone())
                        .await
                        .ok();
                    self.start_backtest(session, summary).await
                } else {
                    self.sessions
                        .complete(
                            session_id,
                            SessionOutcome::FailedTrainingGate,
                            Some(gate.reason.clone()),
                            Some(summary),
                        )
                        .await
                        .ok();
                    TriggerOutcome::TrainingGateFailed {
                        session_id,
                        reason: gate.reason,
                    }
                }
            }
            "failed" => {
                let reason = status
                    .error_message
                    .unwrap_or_else(|| "training operation failed".into());
                self.sessions
                    .complete(session_id, SessionOutcome::FailedTraining, Some(reason.clone()), None)
                    .await
                    .ok();
                TriggerOutcome::TrainingFailed { session_id, reason }
            }
            _ => TriggerOutcome::OperationInProgress {
                session_id,
                operation_id,
            },
        }
    }

    async fn start_backtest(&self, session: Session, training_summary: Value) -> TriggerOutcome {
        let session_id = session.id;
        let Some(strategy_name) = session.strategy_name.clone() else {
            return TriggerOutcome::StoreError {
                reason: format!("session {session_id} has no strategy_name"),
            };
        };
        let model_path = training_summary
            .get("model_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let request = BacktestRequest {
            strategy_name,
            model_path,
            symbols: None,
            timeframes: None,
            start_date: None,
            end_date: None,
        };

        match self.backtest_starter.start_backtest(request).await {
            Ok(StartResult {
                success: true,
                operation_id: Some(operation_id),
            }) => {
                if let Err(e) = self
                    .sessions
                    .set_operation_id(session_id, operation_id.clone())
                    .await
                {
                    return TriggerOutcome::StoreError {
                        reason: e.to_string(),
                    };
                }
                if let Err(e) = self
                    .sessions
                    .transition_phase(session_id, SessionPhase::Training, SessionPhase::Backtesting)
                    .await
                {
                    return TriggerOutcome::StoreError {
                        reason: e.to_string(),
                    };
                }
                TriggerOutcome::BacktestStarted {
                    session_id,
                    operation_id,
                }
            }
            Ok(_) => {
                let reason = "backtest starter rejected the run".to_string();
                self.sessions
                    .complete(session_id, SessionOutcome::FailedBacktest, Some(reason.clone()), None)
                    .await
                    .ok();
                TriggerOutcome::BacktestStartFailed { session_id, reason }
            }
            Err(e) => {
                let reason = e.to_string();
                self.sessions
                    .complete(session_id, SessionOutcome::FailedBacktest, Some(reason.clone()), None)
                    .await
                    .ok();
                TriggerOutcome::BacktestStartFailed { session_id, reason }
            }
        }
    }

    async fn poll_backtest(self: &Arc<Self>, session: Session) -> TriggerOutcome {
        let session_id = session.id;
        let Some(operation_id) = session.operation_id.clone() else {
            return TriggerOutcome::StoreError {
                reason: format!("session {session_id} is BACKTESTING with no operation_id"),
            };
        };

        let status = match self.operation_status.get_operation(&operation_id).await {
            Ok(status) => status,
            Err(e) => {
                return TriggerOutcome::StoreError {
                    reason: e.to_string(),
                };
            }
        };

        match status.status.as_str() {
            "completed" => {
                let summary = status.result_summary.unwrap_or(Value::Null);
                let result: BacktestResult =
                    serde_json::from_value(summary.clone()).unwrap_or_default();
                let gate = self.backtest_gate.evaluate(&result);
                if gate.passed {
                    self.start_assessment(session, summary).await
                } else {
                    self.sessions
                        .complete(
                            session_id,
                            SessionOutcome::FailedBacktestGate,
                            Some(gate.reason.clone()),
                            Some(summary),
                        )
                        .await
                        .ok();
                    TriggerOutcome::BacktestGateFailed {
                        session_id,
                        reason: gate.reason,
                    }
                }
            }
            "failed" => {
                let reason = status
                    .error_message
                    .unwrap_or_else(|| "backtest operation failed".into());
                self.sessions
                    .complete(session_id, SessionOutcome::FailedBacktest, Some(reason.clone()), None)
                    .await
                    .ok();
                TriggerOutcome::BacktestFailed { session_id, reason }
            }
            _ => TriggerOutcome::OperationInProgress {
                session_id,
                operation_id,
            },
        }
    }

    async fn start_assessment(self: &Arc<Self>, session: Session, backtest_summary: Value) -> TriggerOutcome {
        let session_id = session.id;
        let Some(strategy_name) = session.strategy_name.clone() else {
            return TriggerOutcome::StoreError {
                reason: format!("session {session_id} has no strategy_name"),
            };
        };

        if let Err(e) = self
            .sessions
            .transition_phase(session_id, SessionPhase::Backtesting, SessionPhase::Assessing)
            .await
        {
            return TriggerOutcome::StoreError {
                reason: e.to_string(),
            };
        }

        let training_summary = session.training_result.clone().unwrap_or(Value::Null);

        let op_id = match self.assessment_worker.begin(None).await {
            Ok(op_id) => op_id,
            Err(e) => {
                self.sessions
                    .complete(
                        session_id,
                        SessionOutcome::FailedAssessment,
                        Some(e.to_string()),
                        None,
                    )
                    .await
                    .ok();
                return TriggerOutcome::StoreError {
                    reason: e.to_string(),
                };
            }
        };

        *self.active_worker.lock().await = Some(ActiveWorker {
            session_id,
            operation_id: op_id.clone(),
        });

        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            reconciler
                .run_assessment(
                    session_id,
                    op_id,
                    strategy_name,
                    training_summary,
                    backtest_summary,
                )
                .await;
        });

        TriggerOutcome::AssessmentStarted { session_id }
    }

    async fn run_assessment(
        self: Arc<Self>,
        session_id: i64,
        op_id: String,
        strategy_name: String,
        training_metrics: Value,
        backtest_metrics: Value,
    ) {
        let outcome = self
            .assessment_worker
            .run_started(op_id, &strategy_name, training_metrics, backtest_metrics)
            .await;

        match outcome {
            Ok(AssessmentOutcome::Assessed { verdict, operation_id }) => {
                self.sessions
                    .complete(
                        session_id,
                        SessionOutcome::Success,
                        Some(format!("verdict: {verdict}")),
                        Some(serde_json::json!({"verdict": verdict})),
                    )
                    .await
                    .ok();
                tracing::info!(session_id = %session_id, operation_id = %operation_id, "assessment succeeded");
            }
            Ok(AssessmentOutcome::Failed { reason, .. }) => {
                self.sessions
                    .complete(session_id, SessionOutcome::FailedAssessment, Some(reason), None)
                    .await
                    .ok();
            }
            Ok(AssessmentOutcome::Cancelled { .. }) => {
                self.sessions
                    .complete(session_id, SessionOutcome::Cancelled, None, None)
                    .await
                    .ok();
            }
            Err(e) => {
                self.sessions
                    .complete(
                        session_id,
                        SessionOutcome::FailedAssessment,
                        Some(e.to_string()),
                        None,
                    )
                    .await
                    .ok();
            }
        }

        self.active_worker.lock().await.take();
    }
}

/// Runs [`Reconciler::check_and_trigger`] on a fixed interval until `stop`
/// reports `true`. `interval` is the daemon's trigger interval; the
/// reconciler itself does not read environment variables.
pub async fn run_loop<P: Provider + Clone + 'static>(
    reconciler: Arc<Reconciler<P>>,
    interval: Duration,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                reconciler.check_and_trigger().await;
            }
            result = stop.changed() => {
                if result.is_err() || *stop.borrow() {
                    tracing::info!("reconciler loop stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_gate_failure_reason_mentions_accuracy_and_thresholds() {
        let gate = TrainingGateConfig::default();
        let result = TrainingResult {
            accuracy: Some(0.30),
            final_loss: Some(0.30),
            initial_loss: Some(1.00),
        };
        let verdict = gate.evaluate(&result);
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("accuracy"));
        assert!(verdict.reason.contains("0.3"));
        assert!(verdict.reason.contains("0.45"));
    }

    #[test]
    fn backtest_gate_failure_reason_mentions_drawdown() {
        let gate = BacktestGateConfig::default();
        let result = BacktestResult {
            win_rate: Some(0.55),
            max_drawdown: Some(0.55),
            sharpe_ratio: Some(0.50),
        };
        let verdict = gate.evaluate(&result);
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("drawdown"));
    }

    #[test]
    fn happy_path_training_then_backtest_both_pass() {
        let training_gate = TrainingGateConfig::default();
        let training = TrainingResult {
            accuracy: Some(0.65),
            final_loss: Some(0.30),
            initial_loss: Some(1.00),
        };
        assert!(training_gate.evaluate(&training).passed);

        let backtest_gate = BacktestGateConfig::default();
        let backtest = BacktestResult {
            win_rate: Some(0.55),
            max_drawdown: Some(0.15),
            sharpe_ratio: Some(0.80),
        };
        assert!(backtest_gate.evaluate(&backtest).passed);
    }

    #[test]
    fn trigger_outcome_variants_are_plain_data() {
        let outcome = TriggerOutcome::DesignStarted { session_id: 1 };
        assert_eq!(outcome, TriggerOutcome::DesignStarted { session_id: 1 });
    }
}
