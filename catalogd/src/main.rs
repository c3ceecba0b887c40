//! catalogd binary — thin CLI shell over the [`catalog_core`] library crate.
//! Boots the orchestrator, serves the `/api/fuse/*` surface, and runs the
//! event ingestor until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use catalog_core::config::Config;
use catalog_core::orchestrator::Orchestrator;

mod http;

/// Streaming media-catalog ingestion daemon.
#[derive(Parser)]
#[command(name = "catalogd", version, about, long_about = None)]
struct Cli {
    /// Bind to 0.0.0.0 instead of 127.0.0.1 (localhost)
    #[arg(long)]
    bind_all: bool,

    /// HTTP port (overrides the PORT environment variable)
    #[arg(long)]
    port: Option<u16>,
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("catalogd=info".parse().unwrap())
                .add_directive("catalog_core=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let orchestrator = match Orchestrator::boot(&config).await {
        Ok(o) => Arc::new(o),
        Err(e) => {
            error!(error = %e, "failed to boot orchestrator");
            std::process::exit(1);
        }
    };

    let app = http::router(http::AppState {
        pipeline: orchestrator.pipeline.clone(),
        vfs: orchestrator.vfs.clone(),
    });

    let bind_addr = if cli.bind_all { "0.0.0.0" } else { "127.0.0.1" };
    let port = cli.port.or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok())).unwrap_or(8787);

    let listener = match tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind_addr, port, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };
    info!(bind_addr, port, "catalogd listening");

    let run_orchestrator = orchestrator.clone();
    let ingest_pipeline = orchestrator.pipeline.clone();
    let ingestor_task = tokio::spawn(async move {
        if let Err(e) = run_orchestrator.run(ingest_pipeline).await {
            error!(error = %e, "event ingestor exited with an error");
        }
    });

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();

    orchestrator.shutdown().await;
    ingestor_task.abort();
}
