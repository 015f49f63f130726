use anyhow::{Context, Result};
use clap::Parser;
use sheetfill_core::{ReportService, ServiceConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod routes;

#[derive(Parser)]
#[command(name = "sheetfill-server")]
#[command(about = "HTTP service generating calculation report bundles", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "CONFIG", default_value = "sheetfill.toml")]
    config: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sheetfill=info,tower_http=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = ServiceConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    info!(
        template = %config.template_path.display(),
        work_dir = %config.work_dir.display(),
        converter = %config.converter.program.display(),
        "configuration loaded"
    );
    let service = ReportService::from_config(config).context("Invalid configuration")?;

    let app = routes::create_router(Arc::new(service));

    info!("Starting server on {}", cli.bind);
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}
