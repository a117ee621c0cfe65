use crate::config::Config;
use crate::model::Model;
use crate::model_builder::build_model;
use crate::server::HttpServer;

use std::collections::HashMap;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let models = build_models(
        &config.models.config_dir,
        &config.ovms.get_address(),
        config.ovms.get_request_timeout(),
    );
    if models.is_empty() {
        tracing::warn!(
            "no model configurations loaded from {}",
            config.models.config_dir.display()
        );
    }

    let server = HttpServer::new(models, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

/// Builds every `*.json` model configuration in `config_dir`, keyed by
/// endpoint. A broken configuration skips that model only; the rest of the
/// gateway still comes up.
pub fn build_models(
    config_dir: &Path,
    ovms_address: &str,
    request_timeout: Duration,
) -> HashMap<String, Arc<Model>> {
    let mut models = HashMap::new();

    let entries = match std::fs::read_dir(config_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(
                "failed to read model config directory {}: {}",
                config_dir.display(),
                e
            );
            return models;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        match build_model(&path, ovms_address, request_timeout) {
            Ok(model) => {
                let endpoint = model.endpoint().to_string();
                models.insert(endpoint, Arc::new(model));
            }
            Err(e) => {
                tracing::error!("skipping model config {}: {}", path.display(), e);
            }
        }
    }

    models
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
