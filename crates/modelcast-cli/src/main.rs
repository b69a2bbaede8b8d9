//! Modelcast CLI
//!
//! Publishes model artifacts into a Redis-backed store and follows the
//! current one. `seed` and `publish` are the producer side; `watch` runs a
//! loader the way an inference service would, optionally exposing health
//! and metrics endpoints.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use modelcast_core::{decode_record, ArtifactRecord, ArtifactStore, KeyLayout, VersionId};
use modelcast_protocol::{ArtifactHandler, FileProducer, Loader, PublishReceipt, Publisher};
use modelcast_redis::RedisStore;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod cli;
mod config;
mod health;

use cli::{Cli, Commands};
use config::ModelcastConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let config = ModelcastConfig::load(&cli.config, cli.redis_url.as_deref())?;

    match cli.command {
        Commands::PrintConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Publish { file, version_id } => {
            let version_id = version_id.map(VersionId::new).transpose()?;
            publish(&config, file, version_id).await
        }
        Commands::Seed { file, version_id } => {
            publish(&config, file, Some(VersionId::new(version_id)?)).await
        }
        Commands::Watch {
            health_listen,
            output,
        } => {
            let listen = health_listen.or_else(|| config.health.listen.clone());
            watch(&config, listen, output).await
        }
        Commands::Current => {
            let store = connect(&config).await?;
            show(store.as_ref(), &config.keys.current_key()).await
        }
        Commands::Show { version_id } => {
            let version_id = VersionId::new(version_id)?;
            let store = connect(&config).await?;
            show(store.as_ref(), &config.keys.artifact_key(&version_id)).await
        }
    }
}

async fn connect(config: &ModelcastConfig) -> Result<Arc<dyn ArtifactStore>> {
    let store = RedisStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("Failed to connect to {}", config.redis_url))?;
    info!(addr = %store.addr(), "Connected to store");
    Ok(Arc::new(store))
}

async fn publish(
    config: &ModelcastConfig,
    file: PathBuf,
    version_id: Option<VersionId>,
) -> Result<()> {
    let store = connect(config).await?;
    let publisher = Publisher::new(store, config.keys.clone());

    let mut producer = FileProducer::new(file);
    if let Some(version_id) = version_id {
        producer = producer.with_version_id(version_id);
    }

    let receipt = publisher.publish_from(&producer).await?;
    print_receipt(&receipt, &config.keys);
    Ok(())
}

fn print_receipt(receipt: &PublishReceipt, keys: &KeyLayout) {
    println!("Published {}", receipt.version_id);
    println!("  key:      {}", receipt.artifact_key);
    println!("  pointer:  {}", keys.current_key());
    println!("  notified: {}", receipt.notification.is_delivered());
}

async fn show(store: &dyn ArtifactStore, key: &str) -> Result<()> {
    let Some(raw) = store.get(key).await? else {
        anyhow::bail!("Nothing stored under '{}'", key);
    };
    let record = decode_record(&raw)?;

    let created = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(record.created_at)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| record.created_at.to_string());

    println!("version_id: {}", record.version_id);
    println!("created_at: {}", created);
    println!("size:       {} bytes", record.size());
    println!("sha256:     {}", record.payload_digest());
    Ok(())
}

async fn watch(
    config: &ModelcastConfig,
    health_listen: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let prometheus = init_metrics()?;
    let store = connect(config).await?;

    let loader = Loader::new(store.clone(), config.keys.clone(), config.loader.clone());
    let cancel = CancellationToken::new();

    if let Some(listen) = health_listen {
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("Invalid health listen address '{}'", listen))?;
        let app = health::create_router(health::HealthState {
            loader: loader.handle(),
            store,
            prometheus: Some(prometheus),
        });
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Health endpoints listening on http://{}", addr);

        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Health server stopped");
            }
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Shutdown signal received, stopping loader...");
            cancel.cancel();
        });
    }

    let handler = OutputHandler { output };
    loader.run(&handler, cancel).await?;

    info!("Loader shutdown complete");
    Ok(())
}

/// Logs each activation and optionally mirrors the payload to a file
struct OutputHandler {
    output: Option<PathBuf>,
}

#[async_trait]
impl ArtifactHandler for OutputHandler {
    async fn activate(&self, artifact: Arc<ArtifactRecord>) -> modelcast_core::Result<()> {
        if let Some(path) = &self.output {
            write_atomically(path, &artifact.payload).await?;
        }
        println!(
            "{} {} ({} bytes)",
            artifact.version_id,
            artifact.created_at,
            artifact.size()
        );
        Ok(())
    }
}

/// Write via a sibling temp file so readers never see a partial payload
async fn write_atomically(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, payload).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("modelcast=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modelcast=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    modelcast_telemetry::describe_metrics();

    info!("Metrics exporter initialized");
    Ok(handle)
}
