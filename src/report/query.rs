use chrono::NaiveDate;

use crate::config::{
    ProductCatalog, MINUTE_LOOKBACK_MINS, MIN_TRANSACTION_AMOUNT, REPORT_WINDOW_DAYS,
    WAREHOUSE_TIME_ZONE,
};
use crate::types::{
    ReportKind, SortOrder, DATE_COLUMN, PIF_CASH, PIF_SALES, PLAN_CASH, PLAN_SALES, TOTAL_CASH,
    TOTAL_SALES,
};

/// Parameters of one warehouse round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportQuery {
    pub kind: ReportKind,
    pub start_date: NaiveDate,
    pub order: SortOrder,
}

impl ReportQuery {
    pub fn new(kind: ReportKind, start_date: NaiveDate, order: SortOrder) -> Self {
        Self { kind, start_date, order }
    }

    /// Last day (inclusive) of the reporting window.
    pub fn end_date(&self) -> NaiveDate {
        self.start_date + chrono::Days::new(REPORT_WINDOW_DAYS as u64)
    }

    /// Standard SQL for BigQuery. The start date is a typed date, product ids are
    /// escaped as string literals.
    pub fn to_bigquery_sql(&self, catalog: &ProductCatalog) -> String {
        let transactions = table_ref(catalog, "fct_transactions__live");
        let products = table_ref(catalog, "dim_products");
        let start = self.start_date.format("%Y-%m-%d");
        let sub_category = quote(&catalog.sub_category);
        let pif = in_list(&catalog.pif_products);
        let plan = in_list(&catalog.plan_products);

        let bucket = match self.kind {
            ReportKind::Daily => "cast(b.transaction_date as date)".to_string(),
            ReportKind::ByMinute => {
                "DATETIME_TRUNC(cast(b.transaction_date as datetime), MINUTE)".to_string()
            }
        };
        let lookback = match self.kind {
            ReportKind::Daily => String::new(),
            ReportKind::ByMinute => format!(
                "\n        where cast(b.transaction_date as datetime) >= date_add(current_datetime('{WAREHOUSE_TIME_ZONE}'), interval -{MINUTE_LOOKBACK_MINS} minute)"
            ),
        };
        let direction = match self.order {
            SortOrder::Ascending => "",
            SortOrder::Descending => " desc",
        };

        format!(
            r#"
        with base as (
        select t.*
            , case when row_number() over (partition by t.subscription_id order by t.transaction_date) = 1 then 1 else 0 end sales
        from {transactions} t
            join {products} p
            on t.product = p.product
            and p.sub_category = {sub_category}
        where cast(t.transaction_date as date) between '{start}' and DATE_ADD(CAST('{start}' AS DATE), INTERVAL {REPORT_WINDOW_DAYS} DAY)
            and t.amt > {MIN_TRANSACTION_AMOUNT}
        )

        select {bucket} as `{DATE_COLUMN}`
            , sum(case when b.product in ({pif}) then b.sales else 0 end) as `{PIF_SALES}`
            , sum(case when b.product in ({pif}) then b.amt else 0 end) as `{PIF_CASH}`
            , sum(case when b.product in ({plan}) then b.sales else 0 end) as `{PLAN_SALES}`
            , sum(case when b.product in ({plan}) then b.amt else 0 end) as `{PLAN_CASH}`
            , sum(b.sales) as `{TOTAL_SALES}`
            , sum(b.amt) as `{TOTAL_CASH}`
        from base b{lookback}
        group by all
        order by 1{direction}
    "#
        )
    }
}

fn table_ref(catalog: &ProductCatalog, table: &str) -> String {
    let strip = |s: &str| s.replace('`', "");
    format!(
        "`{}.{}.{}`",
        strip(&catalog.project),
        strip(&catalog.dataset),
        table
    )
}

/// BigQuery string literal.
fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
    format!("\"{escaped}\"")
}

fn in_list(items: &[String]) -> String {
    if items.is_empty() {
        // `in ()` is a syntax error; match nothing instead.
        return "cast(null as string)".to_string();
    }
    items.iter().map(|s| quote(s)).collect::<Vec<_>>().join(", ")
}
