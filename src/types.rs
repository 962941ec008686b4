use std::ops::AddAssign;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Display headers, in order. The warehouse returns columns under the same names.
pub const DATE_COLUMN: &str = "Date";
pub const PIF_SALES: &str = "PIF Sales";
pub const PIF_CASH: &str = "PIF Cash";
pub const PLAN_SALES: &str = "3 Pay Sales";
pub const PLAN_CASH: &str = "3 Pay Cash";
pub const TOTAL_SALES: &str = "Total Sales";
pub const TOTAL_CASH: &str = "Total Cash";

pub const COLUMNS: [&str; 7] = [
    DATE_COLUMN,
    PIF_SALES,
    PIF_CASH,
    PLAN_SALES,
    PLAN_CASH,
    TOTAL_SALES,
    TOTAL_CASH,
];

pub const TOTAL_LABEL: &str = "Total";

// ---------------------------------------------------------------------------
// Report variants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    /// One row per calendar day of the reporting window.
    Daily,
    /// One row per minute over the last half hour.
    ByMinute,
}

impl ReportKind {
    pub const ALL: [ReportKind; 2] = [ReportKind::Daily, ReportKind::ByMinute];

    pub fn slug(&self) -> &'static str {
        match self {
            ReportKind::Daily => "daily",
            ReportKind::ByMinute => "by-minute",
        }
    }

    pub fn from_slug(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.slug() == s)
    }
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slug())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// A warehouse fact row. Never created or mutated here.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Transaction {
    pub product: String,
    pub transaction_date: NaiveDateTime,
    pub amt: f64,
    pub subscription_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    PayInFull,
    PaymentPlan,
}

/// Time-grouping key of a report row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    Day(NaiveDate),
    Minute(NaiveDateTime),
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bucket::Day(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Bucket::Minute(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

// ---------------------------------------------------------------------------
// Report rows
// ---------------------------------------------------------------------------

/// Summed figures of one row. Sales are counts of first payments, cash sums every payment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Figures {
    pub pif_sales: i64,
    pub pif_cash: f64,
    pub plan_sales: i64,
    pub plan_cash: f64,
    pub total_sales: i64,
    pub total_cash: f64,
}

impl AddAssign for Figures {
    fn add_assign(&mut self, rhs: Self) {
        self.pif_sales += rhs.pif_sales;
        self.pif_cash += rhs.pif_cash;
        self.plan_sales += rhs.plan_sales;
        self.plan_cash += rhs.plan_cash;
        self.total_sales += rhs.total_sales;
        self.total_cash += rhs.total_cash;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowLabel {
    Bucket(Bucket),
    Total,
}

impl std::fmt::Display for RowLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowLabel::Bucket(b) => write!(f, "{b}"),
            RowLabel::Total => write!(f, "{TOTAL_LABEL}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub label: RowLabel,
    pub figures: Figures,
}

/// Ordered report rows; the totals row is always last.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    pub rows: Vec<ReportRow>,
}

// ---------------------------------------------------------------------------
// Rendered output
// ---------------------------------------------------------------------------

/// A report ready for display: formatted cells plus the stamp of its warehouse round trip.
/// Shared by the HTML page, the JSON API and the terminal viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedReport {
    pub kind: ReportKind,
    pub heading: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub last_update: String,
}
