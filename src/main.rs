mod api;
mod cache;
mod config;
mod dashboard;
mod error;
mod report;
mod types;
mod warehouse;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::{Config, REPORT_WINDOW_DAYS};
use crate::dashboard::Dashboard;
use crate::error::Result;
use crate::warehouse::Warehouse;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Warehouse ---
    let warehouse = Warehouse::connect(&cfg).await?;
    info!(
        warehouse = warehouse.name(),
        start_date = %cfg.start_date,
        "Reporting {} days from {} (refresh every {}m, cache {}s)",
        REPORT_WINDOW_DAYS,
        cfg.start_date,
        cfg.refresh_mins,
        cfg.cache_ttl_secs(),
    );
    info!(
        "Products: PIF={:?} 3-Pay={:?} sub_category={:?}",
        cfg.catalog.pif_products, cfg.catalog.plan_products, cfg.catalog.sub_category,
    );

    if cfg.tracking_url.is_none() {
        warn!("TRACKING_URL not set, the tracking widget will be left off the page");
    }

    // --- HTTP server ---
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let dashboard = Arc::new(Dashboard::new(cfg, warehouse)?);
    let app = router(ApiState { dashboard });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Dashboard listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
