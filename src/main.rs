use anyhow::{Context, Result};
use std::sync::Arc;
use telemetry_archiver::config::{Config, TransportConfig};
use telemetry_archiver::handoff::{handoff_channel, spawn_handoff_worker};
use telemetry_archiver::ingest::{spawn_engine_thread, IngestHandle};
use telemetry_archiver::rotation::RotationEngine;
use telemetry_archiver::sink::{ArchiveSink, Sink};
use telemetry_archiver::{http, mqtt, poll};
use tokio::task::JoinHandle;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,telemetry_archiver=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

fn spawn_transport(transport: TransportConfig, ingest: IngestHandle) -> Option<JoinHandle<()>> {
    match transport {
        TransportConfig::Mqtts(config) => Some(tokio::spawn(async move {
            if let Err(err) = mqtt::run_listener(config, ingest).await {
                tracing::error!(error=%err, "MQTT listener exited");
            }
        })),
        TransportConfig::HttpPoll(config) => Some(tokio::spawn(async move {
            if let Err(err) = poll::run_poller(config, ingest).await {
                tracing::error!(error=%err, "HTTP poller exited");
            }
        })),
        TransportConfig::HttpPush => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    if let Some(parent) = config.local_file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let sink = Arc::new(ArchiveSink::from_target(&config.sink).await);
    tracing::info!(sink = sink.name(), base_path=%config.local_file_path.display(), "telemetry-archiver starting");

    let (queue, receiver) = handoff_channel();
    let worker = spawn_handoff_worker(sink, config.handoff.clone(), receiver);
    let engine = RotationEngine::new(config.local_file_path.clone(), queue);
    let (ingest, engine_thread) = spawn_engine_thread(engine)?;

    let mut transport_handle = spawn_transport(config.transport.clone(), ingest.clone());

    let app = http::router(http::HttpState {
        ingest: ingest.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind))?;
    tracing::info!(bind=%config.http_bind, "telemetry-archiver HTTP listening");
    let mut http_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = async {
            match transport_handle.as_mut() {
                Some(handle) => {
                    let _ = handle.await;
                }
                None => std::future::pending::<()>().await,
            }
        } => {
            tracing::warn!("transport task exited");
        }
        _ = &mut http_handle => {
            tracing::warn!("HTTP server exited");
        }
    }

    if config.finalize_on_shutdown {
        match ingest.finalize().await {
            Ok(Some(closed)) => {
                tracing::info!(path=%closed.path.display(), "active day file queued for hand-off")
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error=%err, "failed to finalize active day file"),
        }
    }

    // The engine thread exits once the last IngestHandle is gone; open HTTP
    // connections may still hold one, so the join shares the grace period.
    if let Some(handle) = transport_handle {
        handle.abort();
    }
    http_handle.abort();
    drop(ingest);

    let drain = async move {
        tokio::task::spawn_blocking(move || engine_thread.join())
            .await
            .context("failed to join rotation engine thread")?
            .map_err(|_| anyhow::anyhow!("rotation engine thread panicked"))?;
        worker.await.context("hand-off worker failed")
    };
    match tokio::time::timeout(config.shutdown_grace, drain).await {
        Ok(Ok(())) => tracing::info!("hand-off queue drained"),
        Ok(Err(err)) => tracing::error!(error=%err, "shutdown did not complete cleanly"),
        Err(_) => tracing::warn!(
            grace_secs = config.shutdown_grace.as_secs(),
            "hand-off still running at shutdown; remaining day files stay on disk"
        ),
    }

    Ok(())
}
