//! HTTP-backed implementations of the `ragent-tools-builtin` collaborator
//! traits, talking to the KTRDR backend's REST API.
//!
//! Grounded on the original Python `ktrdr/agents/executor.py`, which reads
//! `KTRDR_API_URL` (default `http://localhost:8000`) and calls
//! `GET /api/v1/indicators/` and `GET /api/v1/symbols`. Training, backtest,
//! and operation-status endpoints follow the same `/api/v1/...` convention.

use async_trait::async_trait;
use ragent_tools_builtin::{
    BacktestRequest, BacktestStarter, CollaboratorError, JobStatus, MarketDataCatalog,
    OperationStatusSource, StartResult, StrategyValidator, TrainingRequest, TrainingStarter,
    ValidationResult,
};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// One client, shared behind an `Arc`, implementing every external
/// collaborator trait the reconciler and workers need.
pub struct KtrdrClient {
    http: reqwest::Client,
    base_url: String,
    strategies_dir: PathBuf,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl KtrdrClient {
    /// Build a client against `base_url`, validating strategy files saved
    /// under `strategies_dir`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            strategies_dir: PathBuf::from("strategies"),
        }
    }

    /// Point uniqueness checks at a specific strategies directory (the
    /// daemon uses this to share `STRATEGIES_DIR` with `ToolExecutor`).
    pub fn with_strategies_dir(mut self, dir: PathBuf) -> Self {
        self.strategies_dir = dir;
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, CollaboratorError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("GET {url}: {e}")))?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("GET {url}: bad response: {e}")))?;
        match envelope.data {
            Some(data) if envelope.success => Ok(data),
            _ => Err(CollaboratorError::Unavailable(
                envelope.error.unwrap_or_else(|| format!("GET {url}: no data")),
            )),
        }
    }

    async fn post_json<B: serde::Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CollaboratorError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("POST {url}: {e}")))?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("POST {url}: bad response: {e}")))?;
        match envelope.data {
            Some(data) if envelope.success => Ok(data),
            _ => Err(CollaboratorError::Unavailable(
                envelope.error.unwrap_or_else(|| format!("POST {url}: no data")),
            )),
        }
    }
}

#[async_trait]
impl MarketDataCatalog for KtrdrClient {
    async fn available_indicators(&self) -> Result<Vec<String>, CollaboratorError> {
        let entries: Vec<Value> = self.get_json("/api/v1/indicators/").await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| entry.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    async fn available_symbols(&self) -> Result<Vec<String>, CollaboratorError> {
        let entries: Vec<Value> = self.get_json("/api/v1/symbols").await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| entry.get("symbol").and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl TrainingStarter for KtrdrClient {
    async fn start_training(&self, request: TrainingRequest) -> Result<StartResult, CollaboratorError> {
        self.post_json("/api/v1/trainings/start", &request).await
    }
}

#[async_trait]
impl BacktestStarter for KtrdrClient {
    async fn start_backtest(&self, request: BacktestRequest) -> Result<StartResult, CollaboratorError> {
        self.post_json("/api/v1/backtests/start", &request).await
    }
}

#[async_trait]
impl OperationStatusSource for KtrdrClient {
    async fn get_operation(&self, operation_id: &str) -> Result<JobStatus, CollaboratorError> {
        self.get_json(&format!("/api/v1/operations/{operation_id}")).await
    }
}

#[async_trait]
impl StrategyValidator for KtrdrClient {
    async fn validate(&self, config: &Value) -> Result<ValidationResult, CollaboratorError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let object = config.as_object();
        if object.is_none() {
            errors.push("config must be a JSON object".to_string());
        }
        let has_indicators = object
            .and_then(|o| o.get("indicators"))
            .is_some_and(|v| v.is_array() && !v.as_array().unwrap().is_empty());
        if !has_indicators {
            errors.push("config must declare at least one indicator under `indicators`".to_string());
        }
        let has_training_data = object.and_then(|o| o.get("training_data")).is_some();
        if !has_training_data {
            errors.push("config is missing the `training_data` section".to_string());
        }
        if object.and_then(|o| o.get("deployment")).is_none() {
            warnings.push("config has no `deployment` section; defaults will apply".to_string());
        }

        Ok(ValidationResult {
            valid: errors.is_empty(),
            suggestions: if errors.is_empty() {
                vec![]
            } else {
                vec!["see the strategy_designer prompt's config schema reference".to_string()]
            },
            errors,
            warnings,
        })
    }

    async fn check_name_unique(&self, name: &str) -> Result<bool, CollaboratorError> {
        let path = self.strategies_dir.join(format!("{name}.yaml"));
        match tokio::fs::try_exists(&path).await {
            Ok(exists) => Ok(!exists),
            Err(e) => Err(CollaboratorError::Unavailable(format!(
                "checking strategy name uniqueness: {e}"
            ))),
        }
    }
}
