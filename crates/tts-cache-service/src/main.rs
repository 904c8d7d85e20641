//! TTS Cache Service - caching text-to-speech front end
//!
//! Serves synthesized speech from a disk cache keyed by (text, language),
//! coalesces concurrent identical requests into one synthesis, and runs a
//! background sweeper that reclaims artifacts past their retention window.

mod config;
mod error;
mod server;
mod synth;

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::server::{start_server, ServerState, SharedState};
use crate::synth::HttpSynthesizer;
use artifact_cache::{start_sweeper, ArtifactCache, ArtifactStore, ShutdownOutcome};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("tts_cache_service=info".parse()?)
        .add_directive("artifact_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting TTS Cache Service...");

    let config = ServiceConfig::from_env()?;
    info!("Port: {}", config.port);
    info!("Output dir: {:?}", config.output_dir);
    info!("Synthesis engine: {}", config.synth_url);
    info!(
        "Retention: {}s max age, sweep every {}s",
        config.max_artifact_age.as_secs(),
        config.sweep_interval.as_secs()
    );

    let synthesizer = HttpSynthesizer::new(config.synth_url.clone(), config.synth_timeout)?;
    let cache = ArtifactCache::new(
        ArtifactStore::new(config.output_dir.clone(), config.artifact_extension.clone()),
        Arc::new(synthesizer),
    )
    .with_max_text_chars(config.max_text_chars);
    cache.init().await?;

    let sweeper = start_sweeper(cache.sweeper(config.max_artifact_age, config.sweep_interval));

    let state: SharedState = Arc::new(ServerState::new(cache, config.content_type.clone()));

    // Serve until SIGINT/SIGTERM, then stop the sweeper
    let served = start_server(state, config.port, shutdown_signal()).await;

    match sweeper.shutdown(config.shutdown_timeout).await {
        ShutdownOutcome::Graceful => info!("Sweeper stopped"),
        ShutdownOutcome::Forced => warn!("Sweeper was aborted after shutdown timeout"),
    }

    served.map_err(|e| {
        error!(error = %e, "HTTP server error");
        ServiceError::Io(e)
    })?;

    info!("TTS Cache Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
