// =============================================================================
// pulsecore — main entry point
// =============================================================================
//
// Starts every component in dependency order via the orchestrator, then
// blocks on Ctrl+C and shuts down cleanly. Grounded on the host's startup
// sequence: env/config load first, structured logging next, then component
// construction, then a run-until-signalled loop.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulsecore::config::EngineConfig;
use pulsecore::execution::{self, DemoExecutor, LoggingNotificationService, RestOrderExecutor};
use pulsecore::orchestrator::{Orchestrator, OrchestratorDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("pulsecore starting up");

    let config = EngineConfig::load("engine_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    // Demo mode unless the operator explicitly opts into live trading.
    let live = std::env::var("ENGINE_LIVE_TRADING").map(|v| v == "1").unwrap_or(false);
    let executor: Arc<dyn execution::IOrderExecutor> = if live {
        info!(exchange = %config.exchange_name, "live trading enabled, using REST executor");
        let auth = std::env::var("ENGINE_API_KEY").ok();
        Arc::new(RestOrderExecutor::new(config.exchange_name.clone(), config.rest_base_url.clone(), auth.as_deref()))
    } else {
        info!("starting in demo mode, orders are paper fills only");
        Arc::new(DemoExecutor::new(config.exchange_name.clone(), config.initial_capital))
    };

    let deps = OrchestratorDeps {
        executor,
        notifier: Arc::new(LoggingNotificationService),
    };

    let orchestrator = Orchestrator::new(config, deps);
    orchestrator.start().await;

    info!("pulsecore running, press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }

    info!("shutdown signal received");
    orchestrator.stop().await;

    Ok(())
}
