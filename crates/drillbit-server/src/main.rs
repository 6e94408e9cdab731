use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use drillbit_core::catalog::DimensionCatalog;
use drillbit_core::config::Config;
use drillbit_core::ReportEngine;
use drillbit_duckdb::{DuckDbBehavioralStore, DuckDbConversionStore, PoolSettings};
use drillbit_server::state::AppState;

/// `drillbit health`: liveness check for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$DRILLBIT_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("DRILLBIT_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("drillbit=info".parse()?),
        )
        .json()
        .init();

    let cfg = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let settings = PoolSettings::from_config(&cfg);

    ensure_parent_dir(&cfg.behavioral_db_path)?;
    ensure_parent_dir(&cfg.conversion_db_path)?;
    let behavioral = DuckDbBehavioralStore::open(&cfg.behavioral_db_path, &settings)?;
    let conversion = DuckDbConversionStore::open(&cfg.conversion_db_path, &settings)?;

    let engine = ReportEngine::new(
        Arc::new(DimensionCatalog::standard()),
        Arc::new(behavioral),
        Arc::new(conversion),
    )
    .with_max_rows(cfg.max_report_rows);

    if let Err(e) = engine.ping().await {
        tracing::warn!(error = %e, "Report stores not reachable at startup");
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let state = Arc::new(AppState::new(engine, cfg.clone()));
    let app = drillbit_server::app::build_app(state);

    info!(
        port = cfg.port,
        pool_size = cfg.pool_size,
        "Drillbit listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
