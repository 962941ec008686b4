//! Cell formatting for report tables.
//!
//! Zero and missing values print as a dash, positives with thousands
//! separators, negatives in accounting parentheses. Values are truncated
//! toward zero first, so `-0.4` is a dash too.

use chrono::{DateTime, FixedOffset, Utc};

use crate::types::{ReportRow, ReportTable};

pub const PLACEHOLDER: &str = "-";

/// Format a sale count: `1,234`, `(12)`, or `-`.
pub fn format_sales(value: Option<i64>) -> String {
    format_whole(value, "")
}

/// Format a cash amount: `$1,234`, `$(500)`, or `-`.
pub fn format_cash(value: Option<f64>) -> String {
    let whole = value.filter(|v| v.is_finite()).map(|v| v.trunc() as i64);
    format_whole(whole, "$")
}

fn format_whole(value: Option<i64>, prefix: &str) -> String {
    match value {
        None | Some(0) => PLACEHOLDER.to_string(),
        Some(n) if n > 0 => format!("{prefix}{}", group_thousands(n.unsigned_abs())),
        Some(n) => format!("{prefix}({})", group_thousands(n.unsigned_abs())),
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Cells of one row in display column order.
pub fn format_row(row: &ReportRow) -> Vec<String> {
    let f = &row.figures;
    vec![
        row.label.to_string(),
        format_sales(Some(f.pif_sales)),
        format_cash(Some(f.pif_cash)),
        format_sales(Some(f.plan_sales)),
        format_cash(Some(f.plan_cash)),
        format_sales(Some(f.total_sales)),
        format_cash(Some(f.total_cash)),
    ]
}

pub fn format_table(table: &ReportTable) -> Vec<Vec<String>> {
    table.rows.iter().map(format_row).collect()
}

/// "Last Update" stamp: `now` shifted to the display offset, `MM/DD/YYYY, HH:MM:SS`.
pub fn last_update_stamp(now: DateTime<Utc>, offset: FixedOffset) -> String {
    now.with_timezone(&offset)
        .format("%m/%d/%Y, %H:%M:%S")
        .to_string()
}
