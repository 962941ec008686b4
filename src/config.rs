use chrono::{FixedOffset, NaiveDate, Utc};

use crate::error::{AppError, Result};
use crate::types::SortOrder;

pub const BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

pub const DEFAULT_TITLE: &str = "Mastermind Business System Sales";

/// Days after the start date covered by every report.
pub const REPORT_WINDOW_DAYS: i64 = 30;

/// Look-back of the by-minute report.
pub const MINUTE_LOOKBACK_MINS: i64 = 30;

/// Transactions at or below this amount are ignored (test charges, card checks).
pub const MIN_TRANSACTION_AMOUNT: f64 = 10.0;

/// Time zone the warehouse evaluates `current_datetime` in.
pub const WAREHOUSE_TIME_ZONE: &str = "America/Phoenix";

/// UTC offset of `WAREHOUSE_TIME_ZONE` (no daylight saving).
pub const WAREHOUSE_UTC_OFFSET_HOURS: i32 = -7;

/// Memo TTL per refresh minute, kept just under a minute so each reload past the
/// interval triggers a fresh round trip.
pub const CACHE_SECS_PER_REFRESH_MIN: u64 = 59;

/// Longest accepted refresh interval (one day).
pub const MAX_REFRESH_MINS: u64 = 1440;

/// Warehouse HTTP timeout (seconds).
pub const WAREHOUSE_TIMEOUT_SECS: u64 = 60;

/// Fixed tracking widget frame size.
pub const IFRAME_WIDTH: u32 = 1500;
pub const IFRAME_HEIGHT: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarehouseKind {
    BigQuery,
    Sqlite,
}

/// Which products feed the report and where they live.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    pub project: String,
    pub dataset: String,
    pub sub_category: String,
    /// Pay-in-full product ids (PIF_PRODUCTS, comma-separated)
    pub pif_products: Vec<String>,
    /// Payment-plan product ids (PLAN_PRODUCTS, comma-separated)
    pub plan_products: Vec<String>,
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self {
            project: "bbg-platform".to_string(),
            dataset: "analytics".to_string(),
            sub_category: "997 membership".to_string(),
            pif_products: vec![
                "Mastermind Business System".to_string(),
                "997_yearly".to_string(),
                "mm_annual_997_1".to_string(),
            ],
            plan_products: vec![
                "Mastermind Business System 3 Pay".to_string(),
                "yearly_3_payment_plan_380_per_month".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub api_port: u16,
    pub title: String,
    /// Subheader prefix for each report section (REPORT_LABEL)
    pub report_label: String,
    /// First day of the reporting window (START_DATE)
    pub start_date: NaiveDate,
    /// External widget shown below the daily report; omitted when unset (TRACKING_URL)
    pub tracking_url: Option<String>,
    pub refresh_mins: u64,
    /// Bucket order of the by-minute report (MINUTE_REPORT_ORDER)
    pub minute_order: SortOrder,
    /// Offset applied to "Last Update" stamps (DISPLAY_UTC_OFFSET_HOURS)
    pub display_offset: FixedOffset,
    /// Wall clock of stored transaction timestamps, used for the local by-minute
    /// look-back (WAREHOUSE_UTC_OFFSET_HOURS). Independent of `display_offset`.
    pub warehouse_offset: FixedOffset,
    pub warehouse: WarehouseKind,
    pub bigquery_api_url: String,
    pub bigquery_location: Option<String>,
    pub bigquery_access_token: Option<String>,
    pub db_path: String,
    pub catalog: ProductCatalog,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let display_offset = utc_offset(&var, "DISPLAY_UTC_OFFSET_HOURS", -7)?;
        let warehouse_offset =
            utc_offset(&var, "WAREHOUSE_UTC_OFFSET_HOURS", WAREHOUSE_UTC_OFFSET_HOURS)?;

        let start_date = match non_empty(var("START_DATE")) {
            Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
                AppError::Config(format!("START_DATE must be YYYY-MM-DD, got {s:?}"))
            })?,
            None => Utc::now().with_timezone(&display_offset).date_naive(),
        };

        let refresh_mins = var("REFRESH_MINS")
            .unwrap_or_else(|| "1".to_string())
            .trim()
            .parse::<u64>()
            .map_err(|_| AppError::Config("REFRESH_MINS must be a positive integer".to_string()))?;
        if !(1..=MAX_REFRESH_MINS).contains(&refresh_mins) {
            return Err(AppError::Config(format!(
                "REFRESH_MINS must be between 1 and {MAX_REFRESH_MINS}, got {refresh_mins}"
            )));
        }

        let minute_order = match var("MINUTE_REPORT_ORDER")
            .unwrap_or_else(|| "asc".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "asc" | "ascending" => SortOrder::Ascending,
            "desc" | "descending" => SortOrder::Descending,
            other => {
                return Err(AppError::Config(format!(
                    "MINUTE_REPORT_ORDER must be asc or desc, got {other:?}"
                )))
            }
        };

        let warehouse = match var("WAREHOUSE")
            .unwrap_or_else(|| "bigquery".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "bigquery" => WarehouseKind::BigQuery,
            "sqlite" => WarehouseKind::Sqlite,
            other => {
                return Err(AppError::Config(format!(
                    "WAREHOUSE must be bigquery or sqlite, got {other:?}"
                )))
            }
        };

        let defaults = ProductCatalog::default();
        let catalog = ProductCatalog {
            project: non_empty(var("BIGQUERY_PROJECT")).unwrap_or(defaults.project),
            dataset: non_empty(var("BIGQUERY_DATASET")).unwrap_or(defaults.dataset),
            sub_category: non_empty(var("PRODUCT_SUB_CATEGORY")).unwrap_or(defaults.sub_category),
            pif_products: var("PIF_PRODUCTS")
                .map(|s| split_list(&s))
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.pif_products),
            plan_products: var("PLAN_PRODUCTS")
                .map(|s| split_list(&s))
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.plan_products),
        };

        Ok(Self {
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            api_port: var("API_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            title: non_empty(var("TITLE")).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            report_label: non_empty(var("REPORT_LABEL")).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            start_date,
            tracking_url: non_empty(var("TRACKING_URL")),
            refresh_mins,
            minute_order,
            display_offset,
            warehouse_offset,
            warehouse,
            bigquery_api_url: var("BIGQUERY_API_URL")
                .unwrap_or_else(|| BIGQUERY_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            bigquery_location: non_empty(var("BIGQUERY_LOCATION")),
            bigquery_access_token: non_empty(var("BIGQUERY_ACCESS_TOKEN")),
            db_path: var("DB_PATH").unwrap_or_else(|| "warehouse.db".to_string()),
            catalog,
        })
    }

    /// Memo TTL for each report variant, in seconds.
    pub fn cache_ttl_secs(&self) -> u64 {
        self.refresh_mins * CACHE_SECS_PER_REFRESH_MIN
    }

    /// Client-side reload interval, in milliseconds.
    pub fn refresh_interval_ms(&self) -> u64 {
        self.refresh_mins * 60 * 1000
    }
}

/// Whole-hour UTC offset from `key`, or `default` when unset.
fn utc_offset<F>(var: &F, key: &str, default: i32) -> Result<FixedOffset>
where
    F: Fn(&str) -> Option<String>,
{
    let hours = match non_empty(var(key)) {
        Some(s) => s
            .parse::<i32>()
            .map_err(|_| AppError::Config(format!("{key} must be a whole number of hours")))?,
        None => default,
    };
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| AppError::Config(format!("{key} out of range: {hours}")))
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
