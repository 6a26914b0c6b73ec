//! Egress: how records reach the analytical store.

use metric::Record;

pub mod clickhouse;

pub use self::clickhouse::{staging_table_for, ClickhouseConfig, Store,
                           StoreError};

/// The store operations one harvest needs.
///
/// `Store` is the ClickHouse implementation; the orchestrator is written
/// against this trait so its sequencing rules can be exercised with an
/// in-memory substitute.
pub trait Storage {
    /// Create-if-absent the two durable destination tables.
    fn ensure_destinations(&self) -> Result<(), StoreError>;
    /// Create-if-absent the transient staging table for this run.
    fn create_staging(&self, table: &str) -> Result<(), StoreError>;
    /// Bulk-append records to a table. Order is not significant and is not
    /// preserved by the store.
    fn insert(&self, table: &str, records: &[Record]) -> Result<(), StoreError>;
    /// Read the staged batch back out of the staging table.
    fn select_staged(&self, table: &str) -> Result<Vec<Record>, StoreError>;
    /// Merge/optimize pass on the delta table to reclaim space from repeated
    /// small appends. Maintenance only; callers may tolerate failure here
    /// without breaking query correctness.
    fn optimize_deltas(&self) -> Result<(), StoreError>;
    /// Name of the durable raw-baseline table.
    fn raw_table(&self) -> &str;
    /// Name of the durable delta table.
    fn delta_table(&self) -> &str;
}
