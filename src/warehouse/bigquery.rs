//! BigQuery over its REST API (`jobs.query` + `jobs.getQueryResults`).
//!
//! One round trip per report: post the SQL, poll while the job is still running,
//! then follow page tokens until every row is in. Cells arrive as strings and are
//! decoded by column name, so the select order in the SQL does not matter.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Config, ProductCatalog, METADATA_TOKEN_URL, WAREHOUSE_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::report::ReportQuery;
use crate::types::{
    Bucket, Figures, ReportKind, ReportRow, ReportTable, RowLabel, DATE_COLUMN, PIF_CASH,
    PIF_SALES, PLAN_CASH, PLAN_SALES, TOTAL_CASH, TOTAL_SALES,
};

/// Server-side wait per request while a job runs.
const JOB_WAIT_MS: u64 = 10_000;
/// Give up after this many getQueryResults polls on an incomplete job.
const MAX_JOB_POLLS: usize = 12;
/// Refresh metadata tokens this long before they expire.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryResponse {
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Schema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct Field {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    #[serde(default)]
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

struct CachedToken {
    value: String,
    expires_at: Instant,
}

enum TokenSource {
    /// BIGQUERY_ACCESS_TOKEN
    Static(String),
    /// Service account of the host VM / Cloud Run instance.
    Metadata {
        url: String,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl TokenSource {
    async fn token(&self, client: &reqwest::Client) -> Result<String> {
        let (url, cached) = match self {
            TokenSource::Static(t) => return Ok(t.clone()),
            TokenSource::Metadata { url, cached } => (url, cached),
        };

        if let Ok(guard) = cached.lock() {
            if let Some(t) = guard.as_ref().filter(|t| t.expires_at > Instant::now()) {
                return Ok(t.value.clone());
            }
        }

        let token: MetadataToken = client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(expires_in = token.expires_in, "Fetched metadata access token");

        let lifetime = token.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS);
        if let Ok(mut guard) = cached.lock() {
            *guard = Some(CachedToken {
                value: token.access_token.clone(),
                expires_at: Instant::now() + Duration::from_secs(lifetime),
            });
        }
        Ok(token.access_token)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BigQueryClient {
    client: reqwest::Client,
    api_url: String,
    location: Option<String>,
    catalog: ProductCatalog,
    tokens: TokenSource,
}

impl BigQueryClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WAREHOUSE_TIMEOUT_SECS))
            .build()?;

        let tokens = match &cfg.bigquery_access_token {
            Some(t) => TokenSource::Static(t.clone()),
            None => TokenSource::Metadata {
                url: METADATA_TOKEN_URL.to_string(),
                cached: Mutex::new(None),
            },
        };

        Ok(Self {
            client,
            api_url: cfg.bigquery_api_url.clone(),
            location: cfg.bigquery_location.clone(),
            catalog: cfg.catalog.clone(),
            tokens,
        })
    }

    pub async fn fetch_report(&self, query: &ReportQuery) -> Result<ReportTable> {
        let sql = query.to_bigquery_sql(&self.catalog);
        let result = self.run_query(&sql).await?;
        let rows = decode_rows(query.kind, &result)?;
        Ok(ReportTable::with_totals(rows, query.order))
    }

    async fn run_query(&self, sql: &str) -> Result<QueryResponse> {
        let token = self.tokens.token(&self.client).await?;

        let url = format!("{}/projects/{}/queries", self.api_url, self.catalog.project);
        let body = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: JOB_WAIT_MS,
            location: self.location.as_deref(),
        };
        let mut resp: QueryResponse =
            send_json(self.client.post(&url).bearer_auth(&token).json(&body)).await?;

        let mut polls = 0;
        while resp.job_complete == Some(false) {
            polls += 1;
            if polls > MAX_JOB_POLLS {
                return Err(AppError::Warehouse(format!(
                    "query did not complete after {MAX_JOB_POLLS} polls"
                )));
            }
            let job = job_of(&resp)?;
            debug!(job_id = %job.job_id, polls, "BigQuery job still running");
            resp = self.get_results(&job, None, &token).await?;
        }

        for e in &resp.errors {
            warn!("BigQuery reported: {}", e.message);
        }

        while let Some(page_token) = resp.page_token.take() {
            let job = job_of(&resp)?;
            let next = self.get_results(&job, Some(&page_token), &token).await?;
            resp.rows.extend(next.rows);
            resp.page_token = next.page_token;
            if resp.schema.is_none() {
                resp.schema = next.schema;
            }
        }

        Ok(resp)
    }

    async fn get_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
        token: &str,
    ) -> Result<QueryResponse> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.api_url, self.catalog.project, job.job_id
        );
        let mut params: Vec<(&str, String)> = vec![("timeoutMs", JOB_WAIT_MS.to_string())];
        if let Some(loc) = job.location.as_deref().or(self.location.as_deref()) {
            params.push(("location", loc.to_string()));
        }
        if let Some(p) = page_token {
            params.push(("pageToken", p.to_string()));
        }
        let mut resp: QueryResponse =
            send_json(self.client.get(&url).bearer_auth(token).query(&params)).await?;
        if resp.job_reference.is_none() {
            resp.job_reference = Some(job.clone());
        }
        Ok(resp)
    }
}

fn job_of(resp: &QueryResponse) -> Result<JobReference> {
    resp.job_reference
        .clone()
        .ok_or_else(|| AppError::Warehouse("response is missing jobReference".to_string()))
}

async fn send_json<T: serde::de::DeserializeOwned>(req: reqwest::RequestBuilder) -> Result<T> {
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(AppError::Warehouse(format!(
            "BigQuery returned {status}: {}",
            api_error_message(&text)
        )));
    }
    Ok(resp.json().await?)
}

/// `error.message` of a Google API error body, or the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn decode_rows(kind: ReportKind, resp: &QueryResponse) -> Result<Vec<ReportRow>> {
    let fields: Vec<&str> = resp
        .schema
        .as_ref()
        .map(|s| s.fields.iter().map(|f| f.name.as_str()).collect())
        .unwrap_or_default();
    let col = |name: &str| -> Result<usize> {
        fields
            .iter()
            .position(|f| *f == name)
            .ok_or_else(|| AppError::Warehouse(format!("result is missing column {name:?}")))
    };

    if resp.rows.is_empty() {
        return Ok(Vec::new());
    }

    let date = col(DATE_COLUMN)?;
    let pif_sales = col(PIF_SALES)?;
    let pif_cash = col(PIF_CASH)?;
    let plan_sales = col(PLAN_SALES)?;
    let plan_cash = col(PLAN_CASH)?;
    let total_sales = col(TOTAL_SALES)?;
    let total_cash = col(TOTAL_CASH)?;

    resp.rows
        .iter()
        .map(|row| {
            let cell = |i: usize| row.f.get(i).and_then(|c| c.v.as_str());
            let bucket = cell(date)
                .and_then(|s| parse_bucket(kind, s))
                .ok_or_else(|| {
                    AppError::Warehouse(format!("unreadable {DATE_COLUMN} value: {:?}", cell(date)))
                })?;
            Ok(ReportRow {
                label: RowLabel::Bucket(bucket),
                figures: Figures {
                    pif_sales: parse_count(cell(pif_sales)),
                    pif_cash: parse_amount(cell(pif_cash)),
                    plan_sales: parse_count(cell(plan_sales)),
                    plan_cash: parse_amount(cell(plan_cash)),
                    total_sales: parse_count(cell(total_sales)),
                    total_cash: parse_amount(cell(total_cash)),
                },
            })
        })
        .collect()
}

fn parse_bucket(kind: ReportKind, s: &str) -> Option<Bucket> {
    let s = s.trim();
    let datetime = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok());
    match (kind, datetime) {
        (ReportKind::Daily, Some(dt)) => Some(Bucket::Day(dt.date())),
        (ReportKind::ByMinute, Some(dt)) => Some(Bucket::Minute(dt)),
        (ReportKind::Daily, None) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Bucket::Day),
        (ReportKind::ByMinute, None) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Bucket::Minute),
    }
}

/// Null cells sum as zero, the same as a skipped NaN.
fn parse_count(v: Option<&str>) -> i64 {
    v.and_then(|s| {
        s.parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
    })
    .unwrap_or(0)
}

fn parse_amount(v: Option<&str>) -> f64 {
    v.and_then(|s| s.parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .unwrap_or(0.0)
}
