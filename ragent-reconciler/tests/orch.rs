use async_trait::async_trait;
use ragent_tools_builtin::{
    BacktestRequest, BacktestStarter, CollaboratorError, JobStatus, OperationStatusSource,
    StartResult, TrainingRequest, TrainingStarter,
};
use std::collections::HashMap;
use std::sync::Mutex;

struct FixedTrainingStarter {
    operation_id: &'static str,
}

#[async_trait]
impl TrainingStarter for FixedTrainingStarter {
    async fn start_training(&self, _request: TrainingRequest) -> Result<StartResult, CollaboratorError> {
        Ok(StartResult {
            success: true,
            operation_id: Some(self.operation_id.to_string()),
        })
    }
}

struct FixedBacktestStarter {
    operation_id: &'static str,
}

#[async_trait]
impl BacktestStarter for FixedBacktestStarter {
    async fn start_backtest(&self, _request: BacktestRequest) -> Result<StartResult, CollaboratorError> {
        Ok(StartResult {
            success: true,
            operation_id: Some(self.operation_id.to_string()),
        })
    }
}

struct MapStatusSource {
    statuses: Mutex<HashMap<String, JobStatus>>,
}

impl MapStatusSource {
    fn new() -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, operation_id: &str, status: JobStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(operation_id.to_string(), status);
    }
}

#[async_trait]
impl OperationStatusSource for MapStatusSource {
    async fn get_operation(&self, operation_id: &str) -> Result<JobStatus, CollaboratorError> {
        self.statuses
            .lock()
            .unwrap()
            .get(operation_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::Unavailable(format!("unknown operation {operation_id}")))
    }
}

#[tokio::test]
async fn training_starter_returns_operation_id() {
    let starter = FixedTrainingStarter {
        operation_id: "op_train_1",
    };
    let result = starter
        .start_training(TrainingRequest {
            strategy_name: "momentum_v1".into(),
            symbols: None,
            timeframes: None,
            start_date: None,
            end_date: None,
        })
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.operation_id.as_deref(), Some("op_train_1"));
}

#[tokio::test]
async fn backtest_starter_returns_operation_id() {
    let starter = FixedBacktestStarter {
        operation_id: "op_bt_1",
    };
    let result = starter
        .start_backtest(BacktestRequest {
            strategy_name: "momentum_v1".into(),
            model_path: "models/momentum_v1.bin".into(),
            symbols: None,
            timeframes: None,
            start_date: None,
            end_date: None,
        })
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.operation_id.as_deref(), Some("op_bt_1"));
}

#[tokio::test]
async fn status_source_reports_completed_with_summary() {
    let source = MapStatusSource::new();
    source.set(
        "op_train_1",
        JobStatus {
            status: "completed".into(),
            result_summary: Some(serde_json::json!({
                "accuracy": 0.65,
                "final_loss": 0.30,
                "initial_loss": 1.00,
            })),
            error_message: None,
        },
    );

    let status = source.get_operation("op_train_1").await.unwrap();
    assert_eq!(status.status, "completed");
    assert_eq!(status.result_summary.unwrap()["accuracy"], 0.65);
}

#[tokio::test]
async fn status_source_reports_failed_with_error_message() {
    let source = MapStatusSource::new();
    source.set(
        "op_train_2",
        JobStatus {
            status: "failed".into(),
            result_summary: None,
            error_message: Some("Out of memory".into()),
        },
    );

    let status = source.get_operation("op_train_2").await.unwrap();
    assert_eq!(status.status, "failed");
    assert_eq!(status.error_message.as_deref(), Some("Out of memory"));
}

#[tokio::test]
async fn status_source_unknown_operation_is_an_error() {
    let source = MapStatusSource::new();
    let result = source.get_operation("op_missing").await;
    assert!(result.is_err());
}
