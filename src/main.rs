//! Server entry point for mediagate.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mediagate_core::{
    Database, DownloadService, HistorySink, NoopHistory, ServiceConfig, SqliteHistory, YtDlpTool,
    serve,
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    init_tracing(default_level);
    debug!(?args, "CLI arguments parsed");

    let loaded = app_config::load_config(args.config.as_deref())?;
    if loaded.loaded_from_file
        && let Some(path) = &loaded.path
    {
        info!(path = %path.display(), "loaded configuration file");
    }

    let mut config = ServiceConfig::default();
    if let Some(file) = &loaded.config {
        file.apply_to(&mut config);
    }
    args.apply_to(&mut config);
    config.validate().context("Invalid configuration")?;

    let history_db = args
        .history_db
        .clone()
        .or_else(|| loaded.config.as_ref().and_then(|c| c.history_db.clone()));

    if args.check_config {
        println!("{config:#?}");
        if let Some(path) = &history_db {
            println!("history_db: {}", path.display());
        }
        return Ok(());
    }

    let (history, db): (Arc<dyn HistorySink>, Option<Database>) = match &history_db {
        Some(path) => {
            let db = Database::new(path)
                .await
                .with_context(|| format!("Failed to open history database '{}'", path.display()))?;
            info!(path = %path.display(), "download history enabled");
            (Arc::new(SqliteHistory::new(db.clone())), Some(db))
        }
        None => {
            debug!("download history disabled");
            (Arc::new(NoopHistory), None)
        }
    };

    let tool = Arc::new(YtDlpTool::new(config.tool_program.clone()));
    let bind_addr = config.bind_addr;
    let service = Arc::new(DownloadService::new(config, tool, history));
    service
        .prepare()
        .await
        .context("Failed to prepare service directories")?;
    let maintenance = service.spawn_maintenance();

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!(addr = %listener.local_addr()?, "mediagate listening");

    let result = serve(listener, Arc::clone(&service), shutdown_signal()).await;
    maintenance.abort();
    if let Some(db) = db {
        db.close().await;
    }
    result.context("Server terminated with an error")?;

    info!("mediagate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}
