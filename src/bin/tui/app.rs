use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct ReportResponse {
    pub kind: String,
    pub heading: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub last_update: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct HealthResponse {
    pub warehouse: Option<String>,
    pub start_date: Option<String>,
    pub refresh_mins: Option<u64>,
    pub cache_ttl_secs: Option<u64>,
    pub last_refresh_at_ns: Option<u64>,
    pub warehouse_errors: Option<u64>,
    pub cache_hits: Option<u64>,
    pub cache_misses: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct LatencyResponse {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub sample_count: Option<u64>,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub reports: Vec<ReportResponse>,
    pub health: HealthResponse,
    pub latency: LatencyResponse,
    pub last_refresh: std::time::Instant,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            reports: Vec::new(),
            health: HealthResponse::default(),
            latency: LatencyResponse::default(),
            last_refresh: std::time::Instant::now(),
            base_url,
        }
    }

    /// Reload every report. On failure the previous tables stay on screen and the
    /// header shows the error.
    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let reports_url = format!("{}/reports", self.base_url);
        let health_url = format!("{}/health", self.base_url);
        let latency_url = format!("{}/stats/latency", self.base_url);

        let (reports_res, health_res, latency_res) = tokio::join!(
            client.get(&reports_url).send(),
            client.get(&health_url).send(),
            client.get(&latency_url).send(),
        );

        let resp = match reports_res {
            Ok(r) => r,
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            self.status = ConnectionStatus::Error(format!("{status}: {}", body.trim()));
            return;
        }

        match resp.json::<Vec<ReportResponse>>().await {
            Ok(reports) => {
                self.reports = reports;
                self.status = ConnectionStatus::Connected;
                self.last_refresh = std::time::Instant::now();

                if let Ok(h) = health_res {
                    if let Ok(health) = h.json::<HealthResponse>().await {
                        self.health = health;
                    }
                }
                if let Ok(l) = latency_res {
                    if let Ok(latency) = l.json::<LatencyResponse>().await {
                        self.latency = latency;
                    }
                }
            }
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Longest auto-refresh interval, matching the server's REFRESH_MINS bound.
pub const MAX_REFRESH_MINS: u64 = 1440;

/// Auto-refresh interval from REFRESH_MINS: unparseable or zero falls back to one
/// minute, larger values are capped at a day.
pub fn refresh_interval(raw: Option<&str>) -> std::time::Duration {
    let mins = raw
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|m| *m > 0)
        .unwrap_or(1)
        .min(MAX_REFRESH_MINS);
    std::time::Duration::from_secs(mins * 60)
}

pub fn format_latency(ms: Option<f64>) -> String {
    match ms {
        Some(d) if d >= 1000.0 => format!("{:.1}s", d / 1000.0),
        Some(d) => format!("{:.0}ms", d),
        None => "—".to_string(),
    }
}

/// Cash cells are the widest; size every numeric column to the longest cell.
pub fn column_width(report: &ReportResponse, col: usize) -> u16 {
    let header = report.columns.get(col).map_or(0, |c| c.chars().count());
    let widest = report
        .rows
        .iter()
        .filter_map(|r| r.get(col))
        .map(|c| c.chars().count())
        .max()
        .unwrap_or(0);
    header.max(widest) as u16 + 2
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}
