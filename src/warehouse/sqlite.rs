use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

use crate::config::{
    Config, ProductCatalog, MINUTE_LOOKBACK_MINS, MIN_TRANSACTION_AMOUNT,
};
use crate::error::Result;
use crate::report::aggregate::{aggregate, bucket_for, mark_first_payments, tier_of, Entry};
use crate::report::ReportQuery;
use crate::types::{ReportKind, ReportTable, Transaction};

/// Raw transactions in a local SQLite file, aggregated in process.
/// Same semantics as the BigQuery SQL: first payments are decided over the whole
/// reporting window before the by-minute look-back is applied.
pub struct SqliteWarehouse {
    pool: SqlitePool,
    catalog: ProductCatalog,
    /// Wall clock of `transactions.transaction_date`; "now" for the look-back is
    /// read on this clock, the same role `WAREHOUSE_TIME_ZONE` plays in the SQL.
    warehouse_offset: FixedOffset,
}

impl SqliteWarehouse {
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
        let warehouse = Self::from_pool(pool, cfg.catalog.clone(), cfg.warehouse_offset).await?;
        info!("SQLite warehouse ready at {}", cfg.db_path);
        Ok(warehouse)
    }

    pub async fn from_pool(
        pool: SqlitePool,
        catalog: ProductCatalog,
        warehouse_offset: FixedOffset,
    ) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool, catalog, warehouse_offset })
    }

    pub async fn fetch_report(&self, query: &ReportQuery) -> Result<ReportTable> {
        self.fetch_report_at(query, Utc::now()).await
    }

    async fn fetch_report_at(&self, query: &ReportQuery, now: DateTime<Utc>) -> Result<ReportTable> {
        let transactions = self.window_transactions(query).await?;
        let first_payments = mark_first_payments(&transactions);

        let cutoff = match query.kind {
            ReportKind::Daily => None,
            ReportKind::ByMinute => Some(
                now.with_timezone(&self.warehouse_offset).naive_local()
                    - TimeDelta::minutes(MINUTE_LOOKBACK_MINS),
            ),
        };
        debug!(
            kind = %query.kind,
            transactions = transactions.len(),
            cutoff = ?cutoff,
            "Aggregating SQLite transactions"
        );

        let entries = transactions
            .iter()
            .zip(first_payments)
            .filter(|(t, _)| cutoff.map_or(true, |c| t.transaction_date >= c))
            .map(|(t, first_payment)| Entry {
                bucket: bucket_for(query.kind, t.transaction_date),
                tier: tier_of(&self.catalog, &t.product),
                amount: t.amt,
                first_payment,
            });

        Ok(aggregate(entries, query.order))
    }

    /// Transactions of the sub-category inside the reporting window, oldest first.
    async fn window_transactions(&self, query: &ReportQuery) -> Result<Vec<Transaction>> {
        let start = query.start_date.format("%Y-%m-%d").to_string();
        let end = query.end_date().format("%Y-%m-%d").to_string();

        let rows = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT t.product, t.transaction_date, t.amt, t.subscription_id
            FROM transactions t
            JOIN products p ON t.product = p.product AND p.sub_category = ?
            WHERE date(t.transaction_date) BETWEEN ? AND ?
              AND t.amt > ?
            ORDER BY t.transaction_date, t.id
            "#,
        )
        .bind(&self.catalog.sub_category)
        .bind(start)
        .bind(end)
        .bind(MIN_TRANSACTION_AMOUNT)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
