pub mod bigquery;
pub mod sqlite;

use crate::config::{Config, WarehouseKind};
use crate::error::Result;
use crate::report::ReportQuery;
use crate::types::ReportTable;

pub use bigquery::BigQueryClient;
pub use sqlite::SqliteWarehouse;

/// Where report rows come from. Both backends return the table with its totals row.
pub enum Warehouse {
    BigQuery(BigQueryClient),
    Sqlite(SqliteWarehouse),
}

impl Warehouse {
    pub async fn connect(cfg: &Config) -> Result<Self> {
        Ok(match cfg.warehouse {
            WarehouseKind::BigQuery => Warehouse::BigQuery(BigQueryClient::new(cfg)?),
            WarehouseKind::Sqlite => Warehouse::Sqlite(SqliteWarehouse::connect(cfg).await?),
        })
    }

    pub async fn fetch_report(&self, query: &ReportQuery) -> Result<ReportTable> {
        match self {
            Warehouse::BigQuery(bq) => bq.fetch_report(query).await,
            Warehouse::Sqlite(db) => db.fetch_report(query).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Warehouse::BigQuery(_) => "bigquery",
            Warehouse::Sqlite(_) => "sqlite",
        }
    }
}
