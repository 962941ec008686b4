use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Html,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::latency::LatencySummary;
use crate::dashboard::Dashboard;
use crate::error::AppError;
use crate::types::{RenderedReport, ReportKind};

#[derive(Clone)]
pub struct ApiState {
    pub dashboard: Arc<Dashboard>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(get_page))
        .route("/reports", get(get_reports))
        .route("/reports/:kind", get(get_report))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub warehouse: String,
    pub start_date: String,
    pub refresh_mins: u64,
    pub cache_ttl_secs: u64,
    pub last_refresh_at_ns: Option<u64>,
    pub warehouse_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_page(State(state): State<ApiState>) -> Result<Html<String>, AppError> {
    Ok(Html(state.dashboard.page().await?))
}

async fn get_reports(
    State(state): State<ApiState>,
) -> Result<Json<Vec<RenderedReport>>, AppError> {
    Ok(Json(state.dashboard.reports().await?))
}

async fn get_report(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
) -> Result<Json<RenderedReport>, AppError> {
    let kind = ReportKind::from_slug(&kind)
        .ok_or_else(|| AppError::NotFound(format!("no report named {kind:?}")))?;
    Ok(Json(state.dashboard.report(kind).await?))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let d = &state.dashboard;
    let health = d.health();
    let last = health.last_refresh_at_ns();
    Json(HealthResponse {
        warehouse: d.warehouse_name().to_string(),
        start_date: d.config().start_date.format("%Y-%m-%d").to_string(),
        refresh_mins: d.config().refresh_mins,
        cache_ttl_secs: d.cache_ttl().as_secs(),
        last_refresh_at_ns: (last > 0).then_some(last),
        warehouse_errors: health.warehouse_errors(),
        cache_hits: health.cache_hits(),
        cache_misses: health.cache_misses(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.dashboard.latency().summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::dashboard::tests::{test_config, test_dashboard};

    async fn app() -> (Router, sqlx::SqlitePool) {
        let (dashboard, pool) = test_dashboard(test_config(&[])).await;
        let state = ApiState {
            dashboard: Arc::new(dashboard),
        };
        (router(state), pool)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn index_serves_html_page() {
        let (app, _pool) = app().await;
        let (status, body) = get(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("<!DOCTYPE html>"));
        assert!(body.contains("<td>Total</td>"));
    }

    #[tokio::test]
    async fn reports_endpoint_returns_both_variants() {
        let (app, _pool) = app().await;
        let (status, body) = get(&app, "/reports").await;
        assert_eq!(status, StatusCode::OK);
        let reports: Vec<RenderedReport> = serde_json::from_str(&body).unwrap();
        let kinds: Vec<ReportKind> = reports.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ReportKind::Daily, ReportKind::ByMinute]);
        assert_eq!(reports[0].rows.last().unwrap()[0], "Total");
    }

    #[tokio::test]
    async fn single_report_by_slug() {
        let (app, _pool) = app().await;
        let (status, body) = get(&app, "/reports/by-minute").await;
        assert_eq!(status, StatusCode::OK);
        let report: RenderedReport = serde_json::from_str(&body).unwrap();
        assert_eq!(report.kind, ReportKind::ByMinute);

        let (status, _) = get(&app, "/reports/weekly").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failed_render_is_a_server_error() {
        let (app, pool) = app().await;
        sqlx::query("DROP TABLE products").execute(&pool).await.unwrap();
        let (status, body) = get(&app, "/").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("Database error"), "{body}");
    }

    #[tokio::test]
    async fn health_and_latency_track_refreshes() {
        let (app, _pool) = app().await;
        let _ = get(&app, "/reports/daily").await;
        let _ = get(&app, "/reports/daily").await;

        let (status, body) = get(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(health.warehouse, "sqlite");
        assert_eq!(health.start_date, "2024-03-01");
        assert_eq!(health.cache_ttl_secs, 59);
        assert_eq!((health.cache_hits, health.cache_misses), (1, 1));
        assert!(health.last_refresh_at_ns.is_some());

        let (_, body) = get(&app, "/stats/latency").await;
        let latency: LatencySummary = serde_json::from_str(&body).unwrap();
        assert_eq!(latency.sample_count, 1);
        assert!(latency.p50_ms.is_some());
    }
}
