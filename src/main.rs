use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vitalstream::alerts::LogSink;
use vitalstream::config::{load_config, Config};
use vitalstream::logging::init_logging;
use vitalstream::{AlertGenerator, IngestClient, IngestServer, MeasurementStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"));

    let (config, loaded) = if config_path.exists() {
        (load_config(&config_path)?, true)
    } else {
        (Config::default(), false)
    };

    init_logging(&config.logging)?;
    if loaded {
        info!(path = %config_path.display(), "configuration loaded");
    } else {
        warn!(path = %config_path.display(), "config file not found, using defaults");
    }

    let store = Arc::new(MeasurementStore::new());
    let shutdown = CancellationToken::new();

    let server = IngestServer::bind(&config.server, Arc::clone(&store)).await?;
    info!(addr = %server.local_addr()?, "starting vitalstream");
    let server_handle = tokio::spawn(server.run(shutdown.clone()));

    let client = match &config.client.upstream {
        Some(upstream) => {
            Some(IngestClient::connect(upstream.clone(), Arc::clone(&store), &config.client).await?)
        }
        None => None,
    };

    let generator = Arc::new(AlertGenerator::with_default_strategies(
        Arc::clone(&store),
        &config.alerts,
        Arc::new(LogSink),
    ));
    let evaluator_handle = tokio::spawn(generator.run(
        config.evaluator.interval(),
        config.evaluator.lookback_ms,
        shutdown.clone(),
    ));

    // Wait for Ctrl+C
    signal::ctrl_c().await?;
    info!("Ctrl+C received, starting graceful shutdown");
    shutdown.cancel();

    if let Some(client) = client {
        client.shutdown().await;
    }
    if let Err(e) = evaluator_handle.await {
        error!(error = %e, "evaluator task failed");
    }
    server_handle.await??;

    info!(
        patients = store.patient_count(),
        measurements = store.len(),
        "shutdown complete"
    );
    Ok(())
}
