//! Process entry point for the research agent orchestrator.
//!
//! Reads configuration from the environment, wires the session store,
//! operation registry, workers, and external collaborators into one
//! [`ragent_reconciler::Reconciler`], recovers any session left active by
//! a previous crash, then runs the trigger loop until `SIGINT`/`SIGTERM`.

mod config;
mod ktrdr_client;

use config::DaemonConfig;
use ktrdr_client::KtrdrClient;
use ragent_agent_loop::ReactConfig;
use ragent_gates::{BacktestGateConfig, TrainingGateConfig};
use ragent_operations::OperationRegistry;
use ragent_provider_anthropic::AnthropicProvider;
use ragent_reconciler::Reconciler;
use ragent_session::SessionStore;
use ragent_tools_builtin::{
    BacktestStarter, MarketDataCatalog, OperationStatusSource, StrategyValidator, TrainingStarter,
};
use ragent_workers::{AssessmentWorker, DesignWorker};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "daemon exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = DaemonConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let sessions = Arc::new(SessionStore::new(pool));
    sessions.ensure_schema().await?;

    let operations = Arc::new(OperationRegistry::default());

    let provider = Arc::new(AnthropicProvider::new(config.anthropic_api_key.clone()));
    let client = Arc::new(
        KtrdrClient::new(config.ktrdr_api_url.clone())
            .with_strategies_dir(config.strategies_dir.clone()),
    );

    let base_config = ReactConfig {
        system_prompt: String::new(),
        default_model: config.agent_model.clone(),
        default_max_tokens: config.agent_max_tokens,
        default_max_turns: config.agent_max_iterations,
        default_request_timeout: layer0::duration::DurationMs::from_secs(config.agent_timeout_seconds),
        default_max_total_input_tokens: config.agent_max_input_tokens,
    };

    let design_worker = Arc::new(DesignWorker::new(
        Arc::clone(&provider),
        Arc::clone(&operations),
        config.strategies_dir.clone(),
        Arc::clone(&client) as Arc<dyn StrategyValidator>,
        Arc::clone(&client) as Arc<dyn MarketDataCatalog>,
        base_config.clone(),
    ));
    let assessment_worker = Arc::new(AssessmentWorker::new(
        provider,
        Arc::clone(&operations),
        config.strategies_dir.clone(),
        Arc::clone(&client) as Arc<dyn StrategyValidator>,
        Arc::clone(&client) as Arc<dyn MarketDataCatalog>,
        base_config,
    ));

    let reconciler = Arc::new(Reconciler::new(
        sessions,
        operations,
        design_worker,
        assessment_worker,
        Arc::clone(&client) as Arc<dyn TrainingStarter>,
        Arc::clone(&client) as Arc<dyn BacktestStarter>,
        client as Arc<dyn OperationStatusSource>,
        TrainingGateConfig::from_env(),
        BacktestGateConfig::from_env(),
    ));
    reconciler.set_enabled(config.agent_enabled);

    match reconciler.recover_orphaned_sessions().await {
        Ok(recovered) if !recovered.is_empty() => {
            tracing::warn!(?recovered, "recovered sessions left active by a previous run");
        }
        Ok(_) => {}
        Err(err) => tracing::error!(error = %err, "failed to recover orphaned sessions at startup"),
    }

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let loop_handle = tokio::spawn(ragent_reconciler::run_loop(
        Arc::clone(&reconciler),
        Duration::from_secs(config.trigger_interval_seconds),
        stop_rx,
    ));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping reconciler loop");
    reconciler.cancel_active().await;
    let _ = stop_tx.send(true);
    let _ = loop_handle.await;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
