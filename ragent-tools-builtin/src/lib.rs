#![deny(missing_docs)]
//! Tool handlers exposed to the design and assessment workers, plus the
//! external-collaborator traits those handlers call through.
//!
//! A [`ToolExecutor`] is constructed fresh per worker run (its "last
//! saved" fields are scoped to one invocation, not shared across
//! sessions) and exposes itself as a handful of [`ragent_tool::ToolDyn`]
//! tools, subset per catalog (`design_tools()`, `assessment_tools()`).

use async_trait::async_trait;
use ragent_tool::{ToolDyn, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from the external systems a worker's tools call through to
/// (the training/backtest job runners, the market-data catalog, the
/// strategy validator). Distinct from [`ragent_tool::ToolError`] — these
/// are caught at the tool boundary and turned into `{"error": ...}`
/// payloads rather than propagated as tool-call failures.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The collaborator couldn't be reached or returned garbage.
    #[error("{0}")]
    Unavailable(String),
}

/// Request to start a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRequest {
    /// Strategy the run trains a model for.
    pub strategy_name: String,
    /// Symbols to train on, if the caller wants a specific subset.
    pub symbols: Option<Vec<String>>,
    /// Timeframes to train on.
    pub timeframes: Option<Vec<String>>,
    /// Start of the training window.
    pub start_date: Option<String>,
    /// End of the training window.
    pub end_date: Option<String>,
}

/// Request to start a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRequest {
    /// Strategy the backtest evaluates.
    pub strategy_name: String,
    /// Path to the trained model to backtest.
    pub model_path: String,
    /// Symbols to backtest against.
    pub symbols: Option<Vec<String>>,
    /// Timeframes to backtest against.
    pub timeframes: Option<Vec<String>>,
    /// Start of the backtest window.
    pub start_date: Option<String>,
    /// End of the backtest window.
    pub end_date: Option<String>,
}

/// Result of asking a collaborator to start a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResult {
    /// Whether the job was accepted.
    pub success: bool,
    /// Operation id to poll, if accepted.
    pub operation_id: Option<String>,
}

/// Snapshot of a training or backtest job's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    /// Current status string (`running`, `completed`, `failed`, ...).
    pub status: String,
    /// Result summary, once completed.
    pub result_summary: Option<Value>,
    /// Error message, once failed.
    pub error_message: Option<String>,
}

/// Validation outcome for a proposed strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the configuration is usable as-is.
    pub valid: bool,
    /// Hard problems that block saving.
    pub errors: Vec<String>,
    /// Non-blocking concerns.
    pub warnings: Vec<String>,
    /// Suggested fixes.
    pub suggestions: Vec<String>,
}

/// Starts training runs on behalf of the design worker's handoff.
#[async_trait]
pub trait TrainingStarter: Send + Sync {
    /// Kick off a training run. Returns immediately with an operation id
    /// to poll, not the training result itself.
    async fn start_training(
        &self,
        request: TrainingRequest,
    ) -> Result<StartResult, CollaboratorError>;
}

/// Starts backtest runs on behalf of the reconciler's handoff after a
/// training gate pass.
#[async_trait]
pub trait BacktestStarter: Send + Sync {
    /// Kick off a backtest run.
    async fn start_backtest(
        &self,
        request: BacktestRequest,
    ) -> Result<StartResult, CollaboratorError>;
}

/// Polls the status of a training or backtest operation.
#[async_trait]
pub trait OperationStatusSource: Send + Sync {
    /// Fetch the current status of an operation by id.
    async fn get_operation(&self, operation_id: &str) -> Result<JobStatus, CollaboratorError>;
}

/// Read-only catalog of indicators and symbols available to strategies.
#[async_trait]
pub trait MarketDataCatalog: Send + Sync {
    /// Technical indicators a strategy can reference.
    async fn available_indicators(&self) -> Result<Vec<String>, CollaboratorError>;
    /// Symbols a strategy can be designed against.
    async fn available_symbols(&self) -> Result<Vec<String>, CollaboratorError>;
}

/// Validates strategy configurations before they're saved to disk.
#[async_trait]
pub trait StrategyValidator: Send + Sync {
    /// Check a proposed configuration for structural and semantic
    /// problems. Has no side effects.
    async fn validate(&self, config: &Value) -> Result<ValidationResult, CollaboratorError>;
    /// Whether `name` is not already taken by a saved strategy.
    async fn check_name_unique(&self, name: &str) -> Result<bool, CollaboratorError>;
}

#[derive(Default)]
struct ExecutorState {
    last_saved_strategy_name: Option<String>,
    last_saved_strategy_path: Option<String>,
    last_saved_assessment: Option<Value>,
}

/// Dispatches the six tools a worker's agent loop can call, and
/// accumulates the side effects workers need to read back after the
/// loop exits (what strategy got saved, what assessment got recorded).
///
/// Constructed fresh per worker invocation — its mutable state is not
/// meant to outlive one design or assessment run.
pub struct ToolExecutor {
    strategies_dir: PathBuf,
    validator: Arc<dyn StrategyValidator>,
    catalog: Arc<dyn MarketDataCatalog>,
    current_strategy_name: Option<String>,
    state: Mutex<ExecutorState>,
}

impl ToolExecutor {
    /// Build an executor rooted at `strategies_dir`, for a worker run
    /// that has not yet designed or assessed a strategy.
    pub fn new(
        strategies_dir: PathBuf,
        validator: Arc<dyn StrategyValidator>,
        catalog: Arc<dyn MarketDataCatalog>,
    ) -> Self {
        Self {
            strategies_dir,
            validator,
            catalog,
            current_strategy_name: None,
            state: Mutex::new(ExecutorState::default()),
        }
    }

    /// Build an executor scoped to an already-known strategy, for the
    /// assessment worker which needs `save_assessment` to know which
    /// strategy it's assessing.
    pub fn with_current_strategy(mut self, strategy_name: impl Into<String>) -> Self {
        self.current_strategy_name = Some(strategy_name.into());
        self
    }

    /// Strategy name recorded by a successful `save_strategy_config`
    /// call during this executor's lifetime, if any.
    pub async fn last_saved_strategy_name(&self) -> Option<String> {
        self.state.lock().await.last_saved_strategy_name.clone()
    }

    /// Path recorded by a successful `save_strategy_config` call, if any.
    pub async fn last_saved_strategy_path(&self) -> Option<String> {
        self.state.lock().await.last_saved_strategy_path.clone()
    }

    /// Assessment payload recorded by a successful `save_assessment`
    /// call, if any.
    pub async fn last_saved_assessment(&self) -> Option<Value> {
        self.state.lock().await.last_saved_assessment.clone()
    }

    async fn validate_strategy_config(&self, input: Value) -> Result<Value, CollaboratorError> {
        let config = input.get("config").cloned().unwrap_or(Value::Null);
        let verdict = self.validator.validate(&config).await?;
        Ok(serde_json::to_value(verdict).expect("ValidationResult always serializes"))
    }

    async fn save_strategy_config(&self, input: Value) -> Result<Value, CollaboratorError> {
        let name = input
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| CollaboratorError::Unavailable("missing field: name".into()))?
            .to_string();
        let description = input
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        let config = input.get("config").cloned().unwrap_or(Value::Null);

        let verdict = self.validator.validate(&config).await?;
        if !verdict.valid {
            return Ok(json!({
                "success": false,
                "errors": verdict.errors,
                "suggestions": verdict.suggestions,
            }));
        }

        if !self.validator.check_name_unique(&name).await? {
            return Ok(json!({
                "success": false,
                "errors": [format!("strategy name already exists: {name}")],
                "suggestions": [],
            }));
        }

        let mut document = match config {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("config".into(), other);
                map
            }
        };
        document.insert("name".into(), json!(name));
        if let Some(description) = &description {
            document.insert("description".into(), json!(description));
        }

        tokio::fs::create_dir_all(&self.strategies_dir)
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        let path = self.strategies_dir.join(format!("{name}.yaml"));
        let yaml = serde_yaml::to_string(&Value::Object(document))
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        tokio::fs::write(&path, yaml)
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;

        let path_str = path.to_string_lossy().to_string();
        {
            let mut state = self.state.lock().await;
            state.last_saved_strategy_name = Some(name.clone());
            state.last_saved_strategy_path = Some(path_str.clone());
        }

        Ok(json!({"success": true, "path": path_str}))
    }

    async fn save_assessment(&self, input: Value) -> Result<Value, CollaboratorError> {
        let strategy_name = self.current_strategy_name.clone().ok_or_else(|| {
            CollaboratorError::Unavailable("no current strategy to assess".into())
        })?;

        let verdict = input
            .get("verdict")
            .and_then(Value::as_str)
            .ok_or_else(|| CollaboratorError::Unavailable("missing field: verdict".into()))?;
        if !matches!(verdict, "promising" | "mediocre" | "poor") {
            return Err(CollaboratorError::Unavailable(format!(
                "invalid verdict: {verdict}"
            )));
        }

        let strengths = input.get("strengths").cloned().unwrap_or(json!([]));
        let weaknesses = input.get("weaknesses").cloned().unwrap_or(json!([]));
        let suggestions = input.get("suggestions").cloned().unwrap_or(json!([]));

        let assessment = json!({
            "verdict": verdict,
            "strengths": strengths,
            "weaknesses": weaknesses,
            "suggestions": suggestions,
            "assessed_at": chrono::Utc::now().to_rfc3339(),
        });

        let dir = self.strategies_dir.join(&strategy_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        let path = dir.join("assessment.json");
        let contents = serde_json::to_string_pretty(&assessment)
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;

        self.state.lock().await.last_saved_assessment = Some(assessment.clone());

        Ok(json!({"success": true}))
    }

    async fn get_available_indicators(&self) -> Result<Value, CollaboratorError> {
        let indicators = self.list_available_indicators().await?;
        Ok(json!({"indicators": indicators}))
    }

    async fn get_available_symbols(&self) -> Result<Value, CollaboratorError> {
        let symbols = self.list_available_symbols().await?;
        Ok(json!({"symbols": symbols}))
    }

    async fn get_recent_strategies(&self, input: Value) -> Result<Value, CollaboratorError> {
        let requested = input.get("n").and_then(Value::as_u64).unwrap_or(5);
        let n = requested.clamp(1, 20) as usize;
        let strategies = self.list_recent_strategies(n).await?;
        Ok(json!({"strategies": strategies}))
    }

    /// Indicators available to reference in a strategy. Exposed directly
    /// (not just via the `get_available_indicators` tool) so a worker can
    /// gather this context before the agent loop starts, not only in
    /// response to a model tool call.
    pub async fn list_available_indicators(&self) -> Result<Vec<String>, CollaboratorError> {
        self.catalog.available_indicators().await
    }

    /// Symbols available to design a strategy against.
    pub async fn list_available_symbols(&self) -> Result<Vec<String>, CollaboratorError> {
        self.catalog.available_symbols().await
    }

    /// Names of the `n` most recently saved strategies, clamped to
    /// `[1, 20]`.
    pub async fn list_recent_strategies(&self, n: usize) -> Result<Vec<String>, CollaboratorError> {
        let n = n.clamp(1, 20);

        let mut entries = match tokio::fs::read_dir(&self.strategies_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CollaboratorError::Unavailable(e.to_string())),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found.push((modified, stem.to_string()));
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found.into_iter().take(n).map(|(_, name)| name).collect())
    }

    /// The reduced tool catalog the design worker's agent loop gets:
    /// validate and save, nothing else.
    pub fn design_tools(self: &Arc<Self>) -> Vec<Arc<dyn ToolDyn>> {
        vec![
            Arc::new(ValidateStrategyConfigTool {
                executor: Arc::clone(self),
            }),
            Arc::new(SaveStrategyConfigTool {
                executor: Arc::clone(self),
            }),
        ]
    }

    /// The reduced tool catalog the assessment worker's agent loop
    /// gets: a single tool to record its verdict.
    pub fn assessment_tools(self: &Arc<Self>) -> Vec<Arc<dyn ToolDyn>> {
        vec![Arc::new(SaveAssessmentTool {
            executor: Arc::clone(self),
        })]
    }

    /// All six tools, for callers that don't need a reduced catalog
    /// (e.g. manual testing harnesses).
    pub fn all_tools(self: &Arc<Self>) -> Vec<Arc<dyn ToolDyn>> {
        vec![
            Arc::new(ValidateStrategyConfigTool {
                executor: Arc::clone(self),
            }),
            Arc::new(SaveStrategyConfigTool {
                executor: Arc::clone(self),
            }),
            Arc::new(SaveAssessmentTool {
                executor: Arc::clone(self),
            }),
            Arc::new(GetAvailableIndicatorsTool {
                executor: Arc::clone(self),
            }),
            Arc::new(GetAvailableSymbolsTool {
                executor: Arc::clone(self),
            }),
            Arc::new(GetRecentStrategiesTool {
                executor: Arc::clone(self),
            }),
        ]
    }
}

fn caught(result: Result<Value, CollaboratorError>) -> Value {
    match result {
        Ok(value) => value,
        Err(e) => json!({"error": format!("Tool execution failed: {e}")}),
    }
}

macro_rules! tool_wrapper {
    ($struct_name:ident, $name:literal, $description:literal, $schema:expr, $call:expr) => {
        struct $struct_name {
            executor: Arc<ToolExecutor>,
        }

        impl ToolDyn for $struct_name {
            fn name(&self) -> &str {
                $name
            }
            fn description(&self) -> &str {
                $description
            }
            fn input_schema(&self) -> Value {
                $schema
            }
            fn call(
                &self,
                input: Value,
            ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
                let executor = Arc::clone(&self.executor);
                Box::pin(async move { Ok(caught($call(&executor, input).await)) })
            }
        }
    };
}

tool_wrapper!(
    ValidateStrategyConfigTool,
    "validate_strategy_config",
    "Check a proposed strategy configuration for problems without saving it.",
    json!({
        "type": "object",
        "properties": {"config": {"type": "object"}},
        "required": ["config"],
    }),
    |executor: &Arc<ToolExecutor>, input: Value| async move {
        executor.validate_strategy_config(input).await
    }
);

tool_wrapper!(
    SaveStrategyConfigTool,
    "save_strategy_config",
    "Validate and persist a strategy configuration under a unique name.",
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "config": {"type": "object"},
            "description": {"type": "string"},
        },
        "required": ["name", "config"],
    }),
    |executor: &Arc<ToolExecutor>, input: Value| async move {
        executor.save_strategy_config(input).await
    }
);

tool_wrapper!(
    SaveAssessmentTool,
    "save_assessment",
    "Record the verdict, strengths, weaknesses, and suggestions for the strategy under assessment.",
    json!({
        "type": "object",
        "properties": {
            "verdict": {"type": "string", "enum": ["promising", "mediocre", "poor"]},
            "strengths": {"type": "array", "items": {"type": "string"}},
            "weaknesses": {"type": "array", "items": {"type": "string"}},
            "suggestions": {"type": "array", "items": {"type": "string"}},
        },
        "required": ["verdict"],
    }),
    |executor: &Arc<ToolExecutor>, input: Value| async move { executor.save_assessment(input).await }
);

tool_wrapper!(
    GetAvailableIndicatorsTool,
    "get_available_indicators",
    "List technical indicators available to reference in a strategy.",
    json!({"type": "object", "properties": {}}),
    |executor: &Arc<ToolExecutor>, _input: Value| async move {
        executor.get_available_indicators().await
    }
);

tool_wrapper!(
    GetAvailableSymbolsTool,
    "get_available_symbols",
    "List symbols available to design a strategy against.",
    json!({"type": "object", "properties": {}}),
    |executor: &Arc<ToolExecutor>, _input: Value| async move {
        executor.get_available_symbols().await
    }
);

tool_wrapper!(
    GetRecentStrategiesTool,
    "get_recent_strategies",
    "List the most recently saved strategies (clamped to between 1 and 20).",
    json!({
        "type": "object",
        "properties": {"n": {"type": "integer", "minimum": 1, "maximum": 20}},
    }),
    |executor: &Arc<ToolExecutor>, input: Value| async move {
        executor.get_recent_strategies(input).await
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    struct StubValidator {
        valid: bool,
        name_unique: bool,
    }

    #[async_trait]
    impl StrategyValidator for StubValidator {
        async fn validate(&self, _config: &Value) -> Result<ValidationResult, CollaboratorError> {
            Ok(ValidationResult {
                valid: self.valid,
                errors: if self.valid {
                    vec![]
                } else {
                    vec!["bad config".into()]
                },
                warnings: vec![],
                suggestions: vec![],
            })
        }
        async fn check_name_unique(&self, _name: &str) -> Result<bool, CollaboratorError> {
            Ok(self.name_unique)
        }
    }

    struct StubCatalog;

    #[async_trait]
    impl MarketDataCatalog for StubCatalog {
        async fn available_indicators(&self) -> Result<Vec<String>, CollaboratorError> {
            Ok(vec!["rsi".into(), "macd".into()])
        }
        async fn available_symbols(&self) -> Result<Vec<String>, CollaboratorError> {
            Ok(vec!["EURUSD".into(), "GBPUSD".into()])
        }
    }

    fn executor(valid: bool, name_unique: bool, dir: &std::path::Path) -> Arc<ToolExecutor> {
        Arc::new(ToolExecutor::new(
            dir.to_path_buf(),
            Arc::new(StubValidator { valid, name_unique }),
            Arc::new(StubCatalog),
        ))
    }

    #[tokio::test]
    async fn validate_tool_reports_validator_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(true, true, dir.path());
        let tools = exec.design_tools();
        let tool = tools.iter().find(|t| t.name() == "validate_strategy_config").unwrap();
        let result = tool.call(json!({"config": {"foo": 1}})).await.unwrap();
        assert_eq!(result["valid"], json!(true));
    }

    #[tokio::test]
    async fn save_strategy_config_writes_yaml_and_records_state() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(true, true, dir.path());
        let tools = exec.design_tools();
        let tool = tools.iter().find(|t| t.name() == "save_strategy_config").unwrap();
        let result = tool
            .call(json!({"name": "momentum_v1", "config": {"window": 14}, "description": "test"}))
            .await
            .unwrap();
        assert_eq!(result["success"], json!(true));

        let path = dir.path().join("momentum_v1.yaml");
        assert!(path.exists());
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("momentum_v1"));

        assert_eq!(
            exec.last_saved_strategy_name().await,
            Some("momentum_v1".to_string())
        );
    }

    #[tokio::test]
    async fn save_strategy_config_rejects_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(true, false, dir.path());
        let tools = exec.design_tools();
        let tool = tools.iter().find(|t| t.name() == "save_strategy_config").unwrap();
        let result = tool
            .call(json!({"name": "taken", "config": {}}))
            .await
            .unwrap();
        assert_eq!(result["success"], json!(false));
    }

    #[tokio::test]
    async fn save_strategy_config_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(false, true, dir.path());
        let tools = exec.design_tools();
        let tool = tools.iter().find(|t| t.name() == "save_strategy_config").unwrap();
        let result = tool
            .call(json!({"name": "x", "config": {}}))
            .await
            .unwrap();
        assert_eq!(result["success"], json!(false));
        assert!(result["errors"].as_array().unwrap().contains(&json!("bad config")));
    }

    #[tokio::test]
    async fn save_assessment_requires_current_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(true, true, dir.path());
        let tools = exec.assessment_tools();
        let tool = tools.iter().find(|t| t.name() == "save_assessment").unwrap();
        let result = tool
            .call(json!({"verdict": "promising", "strengths": [], "weaknesses": [], "suggestions": []}))
            .await
            .unwrap();
        assert!(result["error"].as_str().unwrap().contains("Tool execution failed"));
    }

    #[tokio::test]
    async fn save_assessment_writes_and_records_with_current_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(
            ToolExecutor::new(
                dir.path().to_path_buf(),
                Arc::new(StubValidator { valid: true, name_unique: true }),
                Arc::new(StubCatalog),
            )
            .with_current_strategy("momentum_v1"),
        );
        let tools = exec.assessment_tools();
        let tool = tools.iter().find(|t| t.name() == "save_assessment").unwrap();
        let result = tool
            .call(json!({
                "verdict": "promising",
                "strengths": ["good sharpe"],
                "weaknesses": [],
                "suggestions": [],
            }))
            .await
            .unwrap();
        assert_eq!(result["success"], json!(true));

        let path = dir.path().join("momentum_v1").join("assessment.json");
        assert!(path.exists());
        assert!(exec.last_saved_assessment().await.is_some());
    }

    #[tokio::test]
    async fn save_assessment_rejects_invalid_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(
            ToolExecutor::new(
                dir.path().to_path_buf(),
                Arc::new(StubValidator { valid: true, name_unique: true }),
                Arc::new(StubCatalog),
            )
            .with_current_strategy("momentum_v1"),
        );
        let tools = exec.assessment_tools();
        let tool = tools.iter().find(|t| t.name() == "save_assessment").unwrap();
        let result = tool
            .call(json!({"verdict": "amazing"}))
            .await
            .unwrap();
        assert!(result["error"].as_str().unwrap().contains("Tool execution failed"));
    }

    #[tokio::test]
    async fn get_available_indicators_delegates_to_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(true, true, dir.path());
        let tools = exec.all_tools();
        let tool = tools.iter().find(|t| t.name() == "get_available_indicators").unwrap();
        let result = tool.call(json!({})).await.unwrap();
        assert_eq!(result["indicators"], json!(["rsi", "macd"]));
    }

    #[tokio::test]
    async fn get_recent_strategies_clamps_n_and_sorts_by_recency() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            tokio::fs::write(dir.path().join(format!("{name}.yaml")), "name: x\n")
                .await
                .unwrap();
        }
        let exec = executor(true, true, dir.path());
        let tools = exec.all_tools();
        let tool = tools.iter().find(|t| t.name() == "get_recent_strategies").unwrap();
        let result = tool.call(json!({"n": 100})).await.unwrap();
        let strategies = result["strategies"].as_array().unwrap();
        assert!(strategies.len() <= 20);
        assert_eq!(strategies.len(), 3);
    }

    #[tokio::test]
    async fn get_recent_strategies_empty_dir_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("missing");
        let exec = executor(true, true, &empty);
        let tools = exec.all_tools();
        let tool = tools.iter().find(|t| t.name() == "get_recent_strategies").unwrap();
        let result = tool.call(json!({})).await.unwrap();
        assert_eq!(result["strategies"], json!([]));
    }

    #[test]
    fn design_tools_is_the_reduced_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(true, true, dir.path());
        let names: Vec<&str> = exec.design_tools().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["validate_strategy_config", "save_strategy_config"]);
    }

    #[test]
    fn assessment_tools_is_the_reduced_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(true, true, dir.path());
        let names: Vec<&str> = exec.assessment_tools().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["save_assessment"]);
    }
}
