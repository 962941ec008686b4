use std::collections::{BTreeMap, HashMap};

use chrono::{DurationRound, NaiveDateTime, TimeDelta};

use crate::config::ProductCatalog;
use crate::types::{
    Bucket, Figures, ReportKind, ReportRow, ReportTable, RowLabel, SortOrder, Tier, Transaction,
};

/// A transaction already attributed to a bucket and tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub bucket: Bucket,
    /// None for products in the sub-category but in neither tier list; they only count toward totals.
    pub tier: Option<Tier>,
    pub amount: f64,
    /// First payment of its subscription.
    pub first_payment: bool,
}

/// Flags, per input position, whether the transaction is the first payment of its
/// subscription. Earliest timestamp wins; ties go to the earlier input position.
pub fn mark_first_payments(transactions: &[Transaction]) -> Vec<bool> {
    let mut first: HashMap<&str, usize> = HashMap::new();
    for (i, t) in transactions.iter().enumerate() {
        first
            .entry(t.subscription_id.as_str())
            .and_modify(|best| {
                if t.transaction_date < transactions[*best].transaction_date {
                    *best = i;
                }
            })
            .or_insert(i);
    }

    let mut flags = vec![false; transactions.len()];
    for i in first.into_values() {
        flags[i] = true;
    }
    flags
}

pub fn tier_of(catalog: &ProductCatalog, product: &str) -> Option<Tier> {
    if catalog.pif_products.iter().any(|p| p == product) {
        Some(Tier::PayInFull)
    } else if catalog.plan_products.iter().any(|p| p == product) {
        Some(Tier::PaymentPlan)
    } else {
        None
    }
}

pub fn bucket_for(kind: ReportKind, at: NaiveDateTime) -> Bucket {
    match kind {
        ReportKind::Daily => Bucket::Day(at.date()),
        ReportKind::ByMinute => {
            Bucket::Minute(at.duration_trunc(TimeDelta::minutes(1)).unwrap_or(at))
        }
    }
}

/// Group entries by bucket and sum their figures. Sales count first payments only;
/// cash sums every amount.
pub fn aggregate<I>(entries: I, order: SortOrder) -> ReportTable
where
    I: IntoIterator<Item = Entry>,
{
    let mut buckets: BTreeMap<Bucket, Figures> = BTreeMap::new();
    for e in entries {
        let sale = i64::from(e.first_payment);
        let figures = buckets.entry(e.bucket).or_default();
        match e.tier {
            Some(Tier::PayInFull) => {
                figures.pif_sales += sale;
                figures.pif_cash += e.amount;
            }
            Some(Tier::PaymentPlan) => {
                figures.plan_sales += sale;
                figures.plan_cash += e.amount;
            }
            None => {}
        }
        figures.total_sales += sale;
        figures.total_cash += e.amount;
    }

    let rows = buckets
        .into_iter()
        .map(|(bucket, figures)| ReportRow {
            label: RowLabel::Bucket(bucket),
            figures,
        })
        .collect();
    ReportTable::with_totals(rows, order)
}

impl ReportTable {
    /// Order bucket rows and append the `Total` row. Any incoming totals row is
    /// dropped and recomputed.
    pub fn with_totals(rows: Vec<ReportRow>, order: SortOrder) -> Self {
        let mut rows: Vec<(Bucket, Figures)> = rows
            .into_iter()
            .filter_map(|r| match r.label {
                RowLabel::Bucket(b) => Some((b, r.figures)),
                RowLabel::Total => None,
            })
            .collect();
        rows.sort_by(|a, b| match order {
            SortOrder::Ascending => a.0.cmp(&b.0),
            SortOrder::Descending => b.0.cmp(&a.0),
        });

        let mut total = Figures::default();
        for (_, figures) in &rows {
            total += *figures;
        }

        let mut out: Vec<ReportRow> = rows
            .into_iter()
            .map(|(bucket, figures)| ReportRow {
                label: RowLabel::Bucket(bucket),
                figures,
            })
            .collect();
        out.push(ReportRow {
            label: RowLabel::Total,
            figures: total,
        });
        Self { rows: out }
    }

    pub fn total(&self) -> Option<&ReportRow> {
        self.rows.last().filter(|r| r.label == RowLabel::Total)
    }

    /// Rows excluding the totals row.
    pub fn bucket_rows(&self) -> &[ReportRow] {
        match self.total() {
            Some(_) => &self.rows[..self.rows.len() - 1],
            None => &self.rows,
        }
    }
}
