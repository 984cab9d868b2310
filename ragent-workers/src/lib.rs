#![deny(missing_docs)]
//! Design and assessment workers.
//!
//! Each worker runs one [`ragent_agent_loop::ReactOperator`] invocation
//! under an [`ragent_operations::OperationRegistry`]-tracked operation,
//! with a tool catalog scoped to exactly what that step of the cycle
//! needs. The reconciler spawns a worker when a session's phase calls
//! for one and reads back the outcome; workers never touch session
//! storage directly.

use async_trait::async_trait;
use layer0::content::Content;
use layer0::effect::Scope;
use layer0::error::StateError;
use layer0::operator::{ExitReason, Operator, OperatorInput, TriggerType};
use layer0::state::{SearchResult, StateReader};
use ragent_agent_loop::{ReactConfig, ReactOperator};
use ragent_context::SlidingWindow;
use ragent_hooks::HookRegistry;
use ragent_operations::{OperationError, OperationRegistry, OperationType};
use ragent_tool::ToolRegistry;
use ragent_tools_builtin::{CollaboratorError, MarketDataCatalog, StrategyValidator, ToolExecutor};
use ragent_turn::provider::Provider;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// A [`StateReader`] that never has anything to read. The research-agent
/// workers don't carry multi-turn chat history between invocations — the
/// session store is that history — so `ReactOperator`'s state-reading
/// seam is satisfied trivially here.
pub struct NullStateReader;

#[async_trait]
impl StateReader for NullStateReader {
    async fn read(&self, _scope: &Scope, _key: &str) -> Result<Option<serde_json::Value>, StateError> {
        Ok(None)
    }

    async fn list(&self, _scope: &Scope, _prefix: &str) -> Result<Vec<String>, StateError> {
        Ok(vec![])
    }

    async fn search(
        &self,
        _scope: &Scope,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<SearchResult>, StateError> {
        Ok(vec![])
    }
}

/// Errors from running a worker.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The operator invocation itself failed (transport error, model
    /// error, or an exhausted budget the operator treats as a hard stop).
    #[error("operator execution failed: {0}")]
    Operator(#[from] layer0::error::OperatorError),
    /// The operation registry rejected a lifecycle transition.
    #[error("operation registry error: {0}")]
    Operation(#[from] OperationError),
    /// A collaborator (catalog, validator) call failed while gathering
    /// context before the agent loop started.
    #[error("context gathering failed: {0}")]
    Context(#[from] CollaboratorError),
}

/// Outcome of a design worker run.
#[derive(Debug, Clone, PartialEq)]
pub enum DesignOutcome {
    /// The worker saved a strategy configuration.
    Designed {
        /// Name of the saved strategy.
        strategy_name: String,
        /// Operation id of the completed `AGENT_DESIGN` operation.
        operation_id: String,
    },
    /// The worker ran to completion without saving a strategy, or the
    /// model call itself failed.
    Failed {
        /// Human-readable failure reason.
        reason: String,
        /// Operation id of the failed `AGENT_DESIGN` operation.
        operation_id: String,
    },
    /// The operation was cancelled before the worker finished.
    Cancelled {
        /// Operation id of the cancelled `AGENT_DESIGN` operation.
        operation_id: String,
    },
}

/// Outcome of an assessment worker run.
#[derive(Debug, Clone, PartialEq)]
pub enum AssessmentOutcome {
    /// The worker recorded a verdict.
    Assessed {
        /// The verdict the model recorded (`promising`, `mediocre`, `poor`).
        verdict: String,
        /// Operation id of the completed `AGENT_ASSESSMENT` operation.
        operation_id: String,
    },
    /// The worker ran to completion without recording a verdict, or the
    /// model call itself failed.
    Failed {
        /// Human-readable failure reason.
        reason: String,
        /// Operation id of the failed `AGENT_ASSESSMENT` operation.
        operation_id: String,
    },
    /// The operation was cancelled before the worker finished.
    Cancelled {
        /// Operation id of the cancelled `AGENT_ASSESSMENT` operation.
        operation_id: String,
    },
}

fn build_design_prompt(
    trigger_reason: &str,
    operation_id: &str,
    indicators: &[String],
    symbols: &[String],
    recent_strategies: &[String],
) -> (String, String) {
    let system = "You design trading strategy configurations. Use validate_strategy_config \
        to check your work before saving, then save_strategy_config exactly once with the \
        final configuration. A cycle with no saved strategy is a failed design."
        .to_string();

    let user = format!(
        "Trigger: {trigger_reason}\n\
         Operation: {operation_id}\n\
         Available indicators: {}\n\
         Available symbols: {}\n\
         Recently designed strategies (avoid repeating them verbatim): {}\n\n\
         Design a new trading strategy configuration and save it.",
        indicators.join(", "),
        symbols.join(", "),
        recent_strategies.join(", "),
    );

    (system, user)
}

fn build_assessment_prompt(
    strategy_name: &str,
    training_metrics: &serde_json::Value,
    backtest_metrics: &serde_json::Value,
) -> (String, String) {
    let system = "You assess a strategy's training and backtest results. Call save_assessment \
        exactly once with a verdict of promising, mediocre, or poor, plus concrete strengths, \
        weaknesses, and suggestions grounded in the numbers you were given."
        .to_string();

    let user = format!(
        "Strategy: {strategy_name}\n\
         Training metrics: {training_metrics}\n\
         Backtest metrics: {backtest_metrics}\n\n\
         Assess whether this strategy is worth pursuing further.",
    );

    (system, user)
}

/// Runs one design cycle: gathers context, lets the model draft and
/// save a strategy configuration, and reports the outcome.
pub struct DesignWorker<P: Provider + Clone + 'static> {
    provider: P,
    operations: Arc<OperationRegistry>,
    strategies_dir: PathBuf,
    validator: Arc<dyn StrategyValidator>,
    catalog: Arc<dyn MarketDataCatalog>,
    base_config: ReactConfig,
}

impl<P: Provider + Clone + 'static> DesignWorker<P> {
    /// Build a design worker. `base_config` supplies model/turn/budget
    /// defaults; its `system_prompt` is overwritten per run.
    pub fn new(
        provider: P,
        operations: Arc<OperationRegistry>,
        strategies_dir: PathBuf,
        validator: Arc<dyn StrategyValidator>,
        catalog: Arc<dyn MarketDataCatalog>,
        base_config: ReactConfig,
    ) -> Self {
        Self {
            provider,
            operations,
            strategies_dir,
            validator,
            catalog,
            base_config,
        }
    }

    /// Run one design cycle, tracked as a child of `parent_operation_id`
    /// if given (the operation that triggered this worker).
    pub async fn run(
        &self,
        parent_operation_id: Option<String>,
        trigger_reason: &str,
    ) -> Result<DesignOutcome, WorkerError> {
        let op_id = self.begin(parent_operation_id).await?;
        self.run_started(op_id, trigger_reason).await
    }

    /// Create and start the `AGENT_DESIGN` operation without running the
    /// agent loop yet. Split out from [`Self::run`] so a caller (the
    /// reconciler) can learn the operation id — and so make it
    /// cancellable — before the potentially long-running model call
    /// begins.
    pub async fn begin(&self, parent_operation_id: Option<String>) -> Result<String, WorkerError> {
        let op_id = self
            .operations
            .create(OperationType::AgentDesign, parent_operation_id)
            .await;
        self.operations.start(&op_id).await?;
        Ok(op_id)
    }

    /// Run the agent loop for an operation already created via
    /// [`Self::begin`].
    pub async fn run_started(
        &self,
        op_id: String,
        trigger_reason: &str,
    ) -> Result<DesignOutcome, WorkerError> {
        let token = self
            .operations
            .get_cancellation_token(&op_id)
            .await
            .expect("operation was just created");

        let executor = Arc::new(ToolExecutor::new(
            self.strategies_dir.clone(),
            Arc::clone(&self.validator),
            Arc::clone(&self.catalog),
        ));

        let indicators = executor.list_available_indicators().await.unwrap_or_default();
        let symbols = executor.list_available_symbols().await.unwrap_or_default();
        let recent_strategies = executor.list_recent_strategies(5).await.unwrap_or_default();

        let (system_prompt, user_prompt) =
            build_design_prompt(trigger_reason, &op_id, &indicators, &symbols, &recent_strategies);

        let mut tools = ToolRegistry::new();
        for tool in executor.design_tools() {
            tools.register(tool);
        }

        let operator = ReactOperator::new(
            self.provider.clone(),
            tools,
            Box::new(SlidingWindow::new()),
            HookRegistry::new(),
            Arc::new(NullStateReader),
            ReactConfig {
                system_prompt,
                ..self.base_config.clone()
            },
        );

        let input = OperatorInput::new(Content::text(user_prompt), TriggerType::Task);

        let outcome = tokio::select! {
            result = operator.execute(input) => self.finish(&op_id, &executor, result).await?,
            () = token.cancelled() => {
                self.operations.cancel(&op_id, "cancellation requested").await.ok();
                DesignOutcome::Cancelled { operation_id: op_id }
            }
        };

        Ok(outcome)
    }

    async fn finish(
        &self,
        op_id: &str,
        executor: &ToolExecutor,
        result: Result<layer0::operator::OperatorOutput, layer0::error::OperatorError>,
    ) -> Result<DesignOutcome, WorkerError> {
        let saved_name = executor.last_saved_strategy_name().await;

        match result {
            Ok(output) => {
                if let Some(name) = saved_name {
                    self.operations
                        .complete(op_id, format!("saved strategy {name}"))
                        .await?;
                    Ok(DesignOutcome::Designed {
                        strategy_name: name,
                        operation_id: op_id.to_string(),
                    })
                } else {
                    let reason = format!(
                        "agent did not save a strategy ({})",
                        describe_exit_reason(&output.exit_reason)
                    );
                    self.operations.fail(op_id, reason.clone()).await?;
                    Ok(DesignOutcome::Failed {
                        reason,
                        operation_id: op_id.to_string(),
                    })
                }
            }
            Err(e) => {
                // An LLM/operator failure fails the child operation
                // unconditionally, even if a strategy was saved before
                // the failure — a half-finished cycle is not a success.
                self.operations.fail(op_id, e.to_string()).await?;
                Ok(DesignOutcome::Failed {
                    reason: e.to_string(),
                    operation_id: op_id.to_string(),
                })
            }
        }
    }
}

fn describe_exit_reason(reason: &ExitReason) -> String {
    match reason {
        ExitReason::Complete => "agent finished without acting".to_string(),
        ExitReason::MaxTurns(limit) => format!("reached the iteration limit of {limit}"),
        ExitReason::TokenBudgetExhausted(total) => {
            format!("exceeded the input token budget at {total} accumulated tokens")
        }
        other => format!("exited via {other:?}"),
    }
}

/// Runs one assessment cycle: presents training/backtest metrics and
/// lets the model record a verdict.
pub struct AssessmentWorker<P: Provider + Clone + 'static> {
    provider: P,
    operations: Arc<OperationRegistry>,
    strategies_dir: PathBuf,
    validator: Arc<dyn StrategyValidator>,
    catalog: Arc<dyn MarketDataCatalog>,
    base_config: ReactConfig,
}

impl<P: Provider + Clone + 'static> AssessmentWorker<P> {
    /// Build an assessment worker.
    pub fn new(
        provider: P,
        operations: Arc<OperationRegistry>,
        strategies_dir: PathBuf,
        validator: Arc<dyn StrategyValidator>,
        catalog: Arc<dyn MarketDataCatalog>,
        base_config: ReactConfig,
    ) -> Self {
        Self {
            provider,
            operations,
            strategies_dir,
            validator,
            catalog,
            base_config,
        }
    }

    /// Run one assessment cycle for `strategy_name`, tracked as a child
    /// of `parent_operation_id`.
    pub async fn run(
        &self,
        parent_operation_id: Option<String>,
        strategy_name: &str,
        training_metrics: serde_json::Value,
        backtest_metrics: serde_json::Value,
    ) -> Result<AssessmentOutcome, WorkerError> {
        let op_id = self.begin(parent_operation_id).await?;
        self.run_started(op_id, strategy_name, training_metrics, backtest_metrics)
            .await
    }

    /// Create and start the `AGENT_ASSESSMENT` operation without running
    /// the agent loop yet, mirroring [`DesignWorker::begin`].
    pub async fn begin(&self, parent_operation_id: Option<String>) -> Result<String, WorkerError> {
        let op_id = self
            .operations
            .create(OperationType::AgentAssessment, parent_operation_id)
            .await;
        self.operations.start(&op_id).await?;
        Ok(op_id)
    }

    /// Run the agent loop for an operation already created via
    /// [`Self::begin`].
    pub async fn run_started(
        &self,
        op_id: String,
        strategy_name: &str,
        training_metrics: serde_json::Value,
        backtest_metrics: serde_json::Value,
    ) -> Result<AssessmentOutcome, WorkerError> {
        let token = self
            .operations
            .get_cancellation_token(&op_id)
            .await
            .expect("operation was just created");

        let executor = Arc::new(
            ToolExecutor::new(
                self.strategies_dir.clone(),
                Arc::clone(&self.validator),
                Arc::clone(&self.catalog),
            )
            .with_current_strategy(strategy_name),
        );

        let (system_prompt, user_prompt) =
            build_assessment_prompt(strategy_name, &training_metrics, &backtest_metrics);

        let mut tools = ToolRegistry::new();
        for tool in executor.assessment_tools() {
            tools.register(tool);
        }

        let operator = ReactOperator::new(
            self.provider.clone(),
            tools,
            Box::new(SlidingWindow::new()),
            HookRegistry::new(),
            Arc::new(NullStateReader),
            ReactConfig {
                system_prompt,
                ..self.base_config.clone()
            },
        );

        let input = OperatorInput::new(Content::text(user_prompt), TriggerType::Task);

        let outcome = tokio::select! {
            result = operator.execute(input) => self.finish(&op_id, &executor, result).await?,
            () = token.cancelled() => {
                self.operations.cancel(&op_id, "cancellation requested").await.ok();
                AssessmentOutcome::Cancelled { operation_id: op_id }
            }
        };

        Ok(outcome)
    }

    async fn finish(
        &self,
        op_id: &str,
        executor: &ToolExecutor,
        result: Result<layer0::operator::OperatorOutput, layer0::error::OperatorError>,
    ) -> Result<AssessmentOutcome, WorkerError> {
        let saved = executor.last_saved_assessment().await;

        match (result, saved) {
            (Ok(_), Some(assessment)) => {
                let verdict = assessment
                    .get("verdict")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                self.operations
                    .complete(op_id, format!("verdict: {verdict}"))
                    .await?;
                Ok(AssessmentOutcome::Assessed {
                    verdict,
                    operation_id: op_id.to_string(),
                })
            }
            (Ok(output), None) => {
                let reason = format!(
                    "agent did not record a verdict ({})",
                    describe_exit_reason(&output.exit_reason)
                );
                self.operations.fail(op_id, reason.clone()).await?;
                Ok(AssessmentOutcome::Failed {
                    reason,
                    operation_id: op_id.to_string(),
                })
            }
            // An LLM/operator failure completes as FAILED_ASSESSMENT even
            // if a verdict was saved before the failure.
            (Err(e), Some(_)) | (Err(e), None) => {
                self.operations.fail(op_id, e.to_string()).await?;
                Ok(AssessmentOutcome::Failed {
                    reason: e.to_string(),
                    operation_id: op_id.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragent_turn::types::{ProviderRequest, ProviderResponse, StopReason, TokenUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::collections::VecDeque;

    #[derive(Clone)]
    struct ScriptedProvider {
        responses: Arc<Mutex<VecDeque<ProviderResponse>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ProviderResponse>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses.into())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Provider for ScriptedProvider {
        fn complete(
            &self,
            _request: ProviderRequest,
        ) -> impl std::future::Future<
            Output = Result<ProviderResponse, ragent_turn::provider::ProviderError>,
        > + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self.responses.lock().unwrap().pop_front();
            async move {
                response.ok_or(ragent_turn::provider::ProviderError::RequestFailed(
                    "no scripted response left".into(),
                ))
            }
        }
    }

    fn text_response(text: &str) -> ProviderResponse {
        ProviderResponse {
            content: vec![ragent_turn::types::ContentPart::Text { text: text.into() }],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
            model: "test".into(),
            cost: None,
            truncated: None,
        }
    }

    fn tool_use_response(name: &str, input: serde_json::Value) -> ProviderResponse {
        ProviderResponse {
            content: vec![ragent_turn::types::ContentPart::ToolUse {
                id: "call_1".into(),
                name: name.into(),
                input,
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
            model: "test".into(),
            cost: None,
            truncated: None,
        }
    }

    struct StubValidator;

    #[async_trait]
    impl StrategyValidator for StubValidator {
        async fn validate(
            &self,
            _config: &serde_json::Value,
        ) -> Result<ragent_tools_builtin::ValidationResult, CollaboratorError> {
            Ok(ragent_tools_builtin::ValidationResult {
                valid: true,
                errors: vec![],
                warnings: vec![],
                suggestions: vec![],
            })
        }
        async fn check_name_unique(&self, _name: &str) -> Result<bool, CollaboratorError> {
            Ok(true)
        }
    }

    struct StubCatalog;

    #[async_trait]
    impl MarketDataCatalog for StubCatalog {
        async fn available_indicators(&self) -> Result<Vec<String>, CollaboratorError> {
            Ok(vec!["rsi".into()])
        }
        async fn available_symbols(&self) -> Result<Vec<String>, CollaboratorError> {
            Ok(vec!["EURUSD".into()])
        }
    }

    fn base_config() -> ReactConfig {
        ReactConfig {
            default_max_turns: 5,
            ..ReactConfig::default()
        }
    }

    #[tokio::test]
    async fn design_worker_completes_when_strategy_saved() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![
            tool_use_response(
                "save_strategy_config",
                serde_json::json!({"name": "momentum_v1", "config": {"window": 14}}),
            ),
            text_response("Saved momentum_v1."),
        ]);
        let operations = Arc::new(OperationRegistry::new());
        let worker = DesignWorker::new(
            provider,
            Arc::clone(&operations),
            dir.path().to_path_buf(),
            Arc::new(StubValidator),
            Arc::new(StubCatalog),
            base_config(),
        );

        let outcome = worker.run(None, "scheduled tick").await.unwrap();
        match outcome {
            DesignOutcome::Designed { strategy_name, .. } => {
                assert_eq!(strategy_name, "momentum_v1");
            }
            other => panic!("expected Designed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn design_worker_fails_when_nothing_saved() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![text_response("I thought about it.")]);
        let operations = Arc::new(OperationRegistry::new());
        let worker = DesignWorker::new(
            provider,
            Arc::clone(&operations),
            dir.path().to_path_buf(),
            Arc::new(StubValidator),
            Arc::new(StubCatalog),
            base_config(),
        );

        let outcome = worker.run(None, "scheduled tick").await.unwrap();
        match outcome {
            DesignOutcome::Failed { reason, .. } => {
                assert!(reason.contains("did not save a strategy"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn assessment_worker_completes_when_verdict_saved() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![tool_use_response(
            "save_assessment",
            serde_json::json!({
                "verdict": "promising",
                "strengths": ["good sharpe"],
                "weaknesses": [],
                "suggestions": [],
            }),
        )]);
        let operations = Arc::new(OperationRegistry::new());
        let worker = AssessmentWorker::new(
            provider,
            Arc::clone(&operations),
            dir.path().to_path_buf(),
            Arc::new(StubValidator),
            Arc::new(StubCatalog),
            base_config(),
        );

        let outcome = worker
            .run(
                None,
                "momentum_v1",
                serde_json::json!({"accuracy": 0.7}),
                serde_json::json!({"sharpe_ratio": 1.2}),
            )
            .await
            .unwrap();
        match outcome {
            AssessmentOutcome::Assessed { verdict, .. } => assert_eq!(verdict, "promising"),
            other => panic!("expected Assessed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn assessment_worker_fails_when_no_verdict_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![text_response("Hmm, unsure.")]);
        let operations = Arc::new(OperationRegistry::new());
        let worker = AssessmentWorker::new(
            provider,
            Arc::clone(&operations),
            dir.path().to_path_buf(),
            Arc::new(StubValidator),
            Arc::new(StubCatalog),
            base_config(),
        );

        let outcome = worker
            .run(
                None,
                "momentum_v1",
                serde_json::json!({}),
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, AssessmentOutcome::Failed { .. }));
    }
}
