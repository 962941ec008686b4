pub mod aggregate;
pub mod format;
pub mod query;

pub use query::ReportQuery;
