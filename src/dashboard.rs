use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use futures_util::future::try_join;
use minijinja::Environment;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::api::health::HealthState;
use crate::api::latency::RoundTripLatency;
use crate::cache::ReportCache;
use crate::config::{Config, IFRAME_HEIGHT, IFRAME_WIDTH, MINUTE_LOOKBACK_MINS};
use crate::error::Result;
use crate::report::format::{format_table, last_update_stamp};
use crate::report::ReportQuery;
use crate::types::{RenderedReport, ReportKind, SortOrder, COLUMNS};
use crate::warehouse::Warehouse;

const PAGE_TEMPLATE: &str = "page.html";

#[derive(Serialize)]
struct PageContext<'a> {
    title: &'a str,
    refresh_mins: u64,
    refresh_ms: u64,
    tracking_url: Option<&'a str>,
    iframe_width: u32,
    iframe_height: u32,
    reports: &'a [RenderedReport],
}

/// Query → format → render, with each report memoized for `REFRESH_MINS * 59` seconds.
/// Warehouse failures are counted and returned; the next reload is the retry.
pub struct Dashboard {
    cfg: Config,
    warehouse: Warehouse,
    cache: ReportCache,
    templates: Environment<'static>,
    health: HealthState,
    latency: RoundTripLatency,
}

impl Dashboard {
    pub fn new(cfg: Config, warehouse: Warehouse) -> Result<Self> {
        let mut templates = Environment::new();
        templates.add_template(PAGE_TEMPLATE, include_str!("../templates/page.html"))?;

        let cache = ReportCache::new(Duration::from_secs(cfg.cache_ttl_secs()));
        Ok(Self {
            cfg,
            warehouse,
            cache,
            templates,
            health: HealthState::new(),
            latency: RoundTripLatency::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn warehouse_name(&self) -> &'static str {
        self.warehouse.name()
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    pub fn latency(&self) -> &RoundTripLatency {
        &self.latency
    }

    pub fn heading(&self, kind: ReportKind) -> String {
        match kind {
            ReportKind::Daily => self.cfg.report_label.clone(),
            ReportKind::ByMinute => format!(
                "{} by Minute Last {MINUTE_LOOKBACK_MINS} Minutes",
                self.cfg.report_label
            ),
        }
    }

    fn query(&self, kind: ReportKind) -> ReportQuery {
        let order = match kind {
            ReportKind::Daily => SortOrder::Ascending,
            ReportKind::ByMinute => self.cfg.minute_order,
        };
        ReportQuery::new(kind, self.cfg.start_date, order)
    }

    pub async fn report(&self, kind: ReportKind) -> Result<RenderedReport> {
        if let Some(hit) = self.cache.get(kind) {
            self.health.inc_cache_hits();
            debug!(kind = %kind, "Report served from cache");
            return Ok(hit);
        }
        self.health.inc_cache_misses();

        let query = self.query(kind);
        let started = Instant::now();
        let table = match self.warehouse.fetch_report(&query).await {
            Ok(t) => t,
            Err(e) => {
                self.health.inc_warehouse_errors();
                error!(kind = %kind, warehouse = self.warehouse.name(), "Report query failed: {e}");
                return Err(e);
            }
        };
        let elapsed = started.elapsed();
        self.latency.record(elapsed);
        self.health.set_last_refresh_at_ns(now_ns());

        let report = RenderedReport {
            kind,
            heading: self.heading(kind),
            columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: format_table(&table),
            last_update: last_update_stamp(Utc::now(), self.cfg.display_offset),
        };
        info!(
            kind = %kind,
            rows = table.bucket_rows().len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Report refreshed from {} in {}ms",
            self.warehouse.name(),
            elapsed.as_millis(),
        );

        self.cache.insert(report.clone());
        Ok(report)
    }

    /// Every report variant, in page order. The first failure fails the whole call.
    pub async fn reports(&self) -> Result<Vec<RenderedReport>> {
        let (daily, by_minute) =
            try_join(self.report(ReportKind::Daily), self.report(ReportKind::ByMinute)).await?;
        Ok(vec![daily, by_minute])
    }

    pub async fn page(&self) -> Result<String> {
        let reports = self.reports().await?;
        self.render_page(&reports)
    }

    pub fn render_page(&self, reports: &[RenderedReport]) -> Result<String> {
        let ctx = PageContext {
            title: &self.cfg.title,
            refresh_mins: self.cfg.refresh_mins,
            refresh_ms: self.cfg.refresh_interval_ms(),
            tracking_url: self.cfg.tracking_url.as_deref(),
            iframe_width: IFRAME_WIDTH,
            iframe_height: IFRAME_HEIGHT,
            reports,
        };
        let html = self.templates.get_template(PAGE_TEMPLATE)?.render(&ctx)?;
        Ok(html)
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::{Days, NaiveDateTime, TimeDelta};
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

    use crate::warehouse::SqliteWarehouse;

    pub(crate) fn test_config(extra: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("START_DATE".to_string(), "2024-03-01".to_string()),
            ("WAREHOUSE".to_string(), "sqlite".to_string()),
        ]);
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    /// Dashboard over an in-memory SQLite warehouse holding two March 1st sales.
    pub(crate) async fn test_dashboard(cfg: Config) -> (Dashboard, SqlitePool) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let warehouse =
            SqliteWarehouse::from_pool(pool.clone(), cfg.catalog.clone(), cfg.warehouse_offset)
                .await
                .unwrap();

        for (product, sub_category) in [
            ("997_yearly", "997 membership"),
            ("yearly_3_payment_plan_380_per_month", "997 membership"),
        ] {
            sqlx::query("INSERT INTO products (product, sub_category) VALUES (?, ?)")
                .bind(product)
                .bind(sub_category)
                .execute(&pool)
                .await
                .unwrap();
        }
        for (product, at, amt, sub) in [
            ("997_yearly", "2024-03-01 09:00:00", 997.0, "sub-1"),
            ("yearly_3_payment_plan_380_per_month", "2024-03-01 10:00:00", 380.0, "sub-2"),
        ] {
            insert_txn(&pool, product, at, amt, sub).await;
        }

        let dashboard = Dashboard::new(cfg, Warehouse::Sqlite(warehouse)).unwrap();
        (dashboard, pool)
    }

    pub(crate) async fn insert_txn(pool: &SqlitePool, product: &str, at: &str, amt: f64, sub: &str) {
        sqlx::query(
            "INSERT INTO transactions (product, transaction_date, amt, subscription_id) VALUES (?, ?, ?, ?)",
        )
        .bind(product)
        .bind(at)
        .bind(amt)
        .bind(sub)
        .execute(pool)
        .await
        .unwrap();
    }

    /// `minutes_ago` on the warehouse wall clock, the clock transactions are stored in.
    fn warehouse_time(cfg: &Config, minutes_ago: i64) -> NaiveDateTime {
        Utc::now().with_timezone(&cfg.warehouse_offset).naive_local() - TimeDelta::minutes(minutes_ago)
    }

    fn stored(t: NaiveDateTime) -> String {
        t.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    fn minute_label(t: NaiveDateTime) -> String {
        t.format("%Y-%m-%d %H:%M:00").to_string()
    }

    /// Config whose window covers the last few minutes of the warehouse clock.
    fn recent_config(extra: &[(&str, &str)]) -> Config {
        let mut cfg = test_config(extra);
        cfg.start_date = warehouse_time(&cfg, 0).date() - Days::new(1);
        cfg
    }

    #[tokio::test]
    async fn report_is_formatted_with_totals() {
        let (dashboard, _pool) = test_dashboard(test_config(&[])).await;
        let report = dashboard.report(ReportKind::Daily).await.unwrap();

        assert_eq!(report.heading, "Mastermind Business System Sales");
        assert_eq!(report.columns, COLUMNS.to_vec());
        assert_eq!(
            report.rows,
            vec![
                vec!["2024-03-01", "1", "$997", "1", "$380", "2", "$1,377"],
                vec!["Total", "1", "$997", "1", "$380", "2", "$1,377"],
            ]
        );
        assert_eq!(report.last_update.len(), "03/01/2024, 10:00:00".len());
    }

    #[tokio::test]
    async fn repeat_requests_inside_ttl_reuse_result() {
        let (dashboard, pool) = test_dashboard(test_config(&[])).await;
        let first = dashboard.report(ReportKind::Daily).await.unwrap();

        // new data lands, but the memo window has not passed
        insert_txn(&pool, "997_yearly", "2024-03-02 09:00:00", 997.0, "sub-3").await;
        let second = dashboard.report(ReportKind::Daily).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(dashboard.health().cache_hits(), 1);
        assert_eq!(dashboard.health().cache_misses(), 1);
        assert_eq!(dashboard.latency().summary().sample_count, 1);
        assert!(dashboard.health().last_refresh_at_ns() > 0);
    }

    #[tokio::test]
    async fn warehouse_failures_propagate_and_are_not_cached() {
        let (dashboard, pool) = test_dashboard(test_config(&[])).await;
        sqlx::query("DROP TABLE transactions").execute(&pool).await.unwrap();

        assert!(dashboard.report(ReportKind::Daily).await.is_err());
        assert!(dashboard.report(ReportKind::Daily).await.is_err());
        assert_eq!(dashboard.health().warehouse_errors(), 2);
        assert_eq!(dashboard.health().cache_hits(), 0);
    }

    #[tokio::test]
    async fn page_has_tables_widget_and_refresh_timer() {
        let cfg = test_config(&[
            ("TITLE", "Launch Week"),
            ("TRACKING_URL", "https://tracker.example.com/embed"),
            ("REFRESH_MINS", "2"),
        ]);
        let (dashboard, _pool) = test_dashboard(cfg).await;
        let html = dashboard.page().await.unwrap();

        assert!(html.contains("<h1>Launch Week</h1>"));
        assert!(html.contains("<h3>Mastermind Business System Sales by Minute Last 30 Minutes</h3>"));
        assert_eq!(html.matches("<table class=\"report\">").count(), 2);
        assert!(html.contains("<td>$1,377</td>"));
        assert!(html.contains("Updates Every 2 Minute(s) Automatically"));
        assert!(html.contains("tracker.example.com"));
        assert_eq!(html.matches("<iframe").count(), 1);
        assert!(html.contains("Updates Every Hour Automatically"));
        assert!(html.contains("window.location.reload(); }, 120000);"));

        // the widget sits between the two reports
        let iframe = html.find("<iframe").unwrap();
        let minute_section = html.find("id=\"report-by-minute\"").unwrap();
        assert!(iframe < minute_section);
    }

    #[tokio::test]
    async fn page_without_tracking_url_has_no_widget() {
        let (dashboard, _pool) = test_dashboard(test_config(&[])).await;
        let html = dashboard.page().await.unwrap();
        assert!(!html.contains("<iframe"));
        assert!(html.contains("<h1>Mastermind Business System Sales</h1>"));
    }

    #[tokio::test]
    async fn minute_report_follows_configured_order() {
        let cfg = recent_config(&[("MINUTE_REPORT_ORDER", "desc")]);
        let older = warehouse_time(&cfg, 12);
        let newer = warehouse_time(&cfg, 4);
        let (dashboard, pool) = test_dashboard(cfg).await;
        insert_txn(&pool, "997_yearly", &stored(older), 997.0, "sub-10").await;
        insert_txn(&pool, "yearly_3_payment_plan_380_per_month", &stored(newer), 380.0, "sub-11").await;

        let report = dashboard.report(ReportKind::ByMinute).await.unwrap();
        let labels: Vec<String> = report.rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(labels, vec![minute_label(newer), minute_label(older), "Total".to_string()]);
        assert_eq!(report.rows[2][6], "$1,377");

        // the daily report stays ascending whatever the minute order
        let daily = dashboard.report(ReportKind::Daily).await.unwrap();
        let days: Vec<&str> = daily.rows[..daily.rows.len() - 1]
            .iter()
            .map(|r| r[0].as_str())
            .collect();
        let mut sorted = days.clone();
        sorted.sort();
        assert_eq!(days, sorted);
    }

    #[tokio::test]
    async fn minute_lookback_ignores_display_offset() {
        // display clock twelve hours ahead of the warehouse clock
        let cfg = recent_config(&[("DISPLAY_UTC_OFFSET_HOURS", "5")]);
        let sold_at = warehouse_time(&cfg, 3);
        let (dashboard, pool) = test_dashboard(cfg).await;
        insert_txn(&pool, "997_yearly", &stored(sold_at), 997.0, "sub-12").await;

        let report = dashboard.report(ReportKind::ByMinute).await.unwrap();
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0][0], minute_label(sold_at));
        assert_eq!(report.rows[1][1..3], ["1".to_string(), "$997".to_string()]);
    }

    #[tokio::test]
    async fn minute_heading_names_lookback() {
        let cfg = test_config(&[("REPORT_LABEL", "Launch Sales")]);
        let (dashboard, _pool) = test_dashboard(cfg).await;
        assert_eq!(dashboard.heading(ReportKind::Daily), "Launch Sales");
        assert_eq!(
            dashboard.heading(ReportKind::ByMinute),
            "Launch Sales by Minute Last 30 Minutes"
        );
    }
}
