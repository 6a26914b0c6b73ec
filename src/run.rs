//! The run orchestrator.
//!
//! One run walks a fixed sequence: connect to the store, scope a working
//! directory, fetch snapshots, parse, stage, transform, clean up. Each
//! step's output is the next step's required input, so there is no overlap
//! within a run. Failure at any step aborts the run; the working directory
//! guard and the store handle still release on the way out.
//!
//! Runs against distinct arrays may execute concurrently: the working
//! directory name is unique per run and the staging table name is derived
//! from the logical hostname. Two overlapping runs against the *same* array
//! are not defended against here; the deployment schedules one
//! non-overlapping run per array.

use chrono::Utc;
use config::Args;
use metric::Record;
use protocols::nvstats::{self, ParseError};
use sink::clickhouse::staging_table_for;
use sink::{Storage, Store, StoreError};
use source::scp::{self, FetchError};
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use transform;
use uuid::Uuid;

/// What a completed run did, for the operator's benefit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Snapshot files fetched from the array.
    pub files: usize,
    /// Records parsed and staged.
    pub records: usize,
    /// Rows appended to the raw-baseline destination.
    pub baseline_rows: usize,
    /// Rows appended to the delta destination.
    pub delta_rows: usize,
}

/// A fatal run failure, tagged by the stage that produced it.
#[derive(Debug)]
pub enum Error {
    /// The store was unreachable before any write was attempted.
    Connection(StoreError),
    /// Artifact retrieval failed in a way that is not "nothing there".
    Transfer(FetchError),
    /// A fetched snapshot file did not parse; nothing was written.
    Parse(PathBuf, ParseError),
    /// The store rejected a staging or transform write. A whole-run retry
    /// is safe: the transform's dedup rules make reprocessing idempotent.
    Write(StoreError),
    /// Local filesystem trouble with the working directory or its files.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Connection(ref e) => write!(f, "store connection: {}", e),
            Error::Transfer(ref e) => write!(f, "artifact fetch: {}", e),
            Error::Parse(ref path, ref e) => {
                write!(f, "parse of {:?}: {}", path, e)
            }
            Error::Write(ref e) => write!(f, "store write: {}", e),
            Error::Io(ref e) => write!(f, "working directory: {}", e),
        }
    }
}

impl error::Error for Error {}

impl From<FetchError> for Error {
    fn from(e: FetchError) -> Error {
        Error::Transfer(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

/// A uniquely named working directory, removed on drop.
///
/// Removal is best effort: a failure to clean up costs disk, never
/// correctness, so it is logged and swallowed. If the process dies mid-run
/// the directory is left behind for the next run or an external reaper.
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Create a fresh working directory under `base`. The name embeds a v4
    /// UUID so concurrent runs can never collide; a pre-existing directory
    /// of the same name is an error, not something to reuse.
    pub fn new(base: &Path) -> io::Result<WorkDir> {
        fs::create_dir_all(base)?;
        let path = base.join(format!("volstat-{}", Uuid::new_v4().simple()));
        fs::create_dir(&path)?;
        debug!("created working directory {:?}", path);
        Ok(WorkDir {
            path: path,
        })
    }

    /// Where fetched snapshot files land.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(
                "unable to remove working directory {:?}: {}",
                self.path, e
            );
        }
    }
}

/// Execute one complete harvest cycle.
///
/// Sequencing and failure semantics:
///
///  * the store connection check comes first; nothing else happens if the
///    store is unreachable;
///  * an empty fetch is success -- the run finishes with the store
///    untouched;
///  * any parse failure aborts the run before the first store statement, so
///    a bad file never leaves partial staging behind;
///  * transform writes go baseline first, deltas second; a failure between
///    the two is retried by re-running the whole cycle, which the dedup
///    rules make idempotent;
///  * the post-append optimize pass is maintenance and only logs on
///    failure.
pub fn run(args: &Args) -> Result<Summary, Error> {
    let store = Store::new(&args.clickhouse);
    store.ping().map_err(Error::Connection)?;
    info!("connected to store for {}", args.hostname);

    let workdir = WorkDir::new(&args.scratch_directory)?;
    let files = scp::fetch(&args.address, &args.ssh, workdir.path())?;
    harvest(&store, &args.hostname, &files)
}

/// Parse, stage and transform a batch of fetched snapshot files.
///
/// This is the store-facing half of a run, kept behind the `Storage` seam.
/// Zero files short-circuits before any store statement, destination DDL
/// included, leaving a fresh store byte-identical to how it was found. The
/// parse of every file completes before the first store statement for the
/// same reason.
pub fn harvest<S: Storage>(
    store: &S,
    hostname: &str,
    files: &[PathBuf],
) -> Result<Summary, Error> {
    if files.is_empty() {
        info!("no snapshot files for {}; store left untouched", hostname);
        return Ok(Summary {
            files: 0,
            records: 0,
            baseline_rows: 0,
            delta_rows: 0,
        });
    }

    // One version for every record of the run; wall-clock seconds makes it
    // strictly increasing across non-overlapping runs.
    let version = Utc::now().timestamp() as u32;
    let mut records: Vec<Record> = Vec::new();
    for file in files {
        let text = fs::read_to_string(file)?;
        let mut parsed = nvstats::parse_nvstats(&text, hostname, version)
            .map_err(|e| Error::Parse(file.clone(), e))?;
        records.append(&mut parsed);
    }
    let record_count = records.len();

    store.ensure_destinations().map_err(Error::Write)?;
    let staging = staging_table_for(hostname);
    store.create_staging(&staging).map_err(Error::Write)?;
    store.insert(&staging, &records).map_err(Error::Write)?;
    info!(
        "staged {} records from {} files into {}",
        record_count,
        files.len(),
        staging
    );

    let staged = store.select_staged(&staging).map_err(Error::Write)?;
    let baseline = transform::compact_baseline(&staged);
    let deltas = transform::compute_deltas(staged);
    store
        .insert(store.raw_table(), &baseline)
        .map_err(Error::Write)?;
    store
        .insert(store.delta_table(), &deltas)
        .map_err(Error::Write)?;
    if let Err(e) = store.optimize_deltas() {
        warn!("post-append optimize failed, deferring to next run: {}", e);
    }

    Ok(Summary {
        files: files.len(),
        records: record_count,
        baseline_rows: baseline.len(),
        delta_rows: deltas.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use metric::{Metric, Record};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempdir::TempDir;

    #[test]
    fn workdirs_are_unique_and_cleaned_up() {
        let base = TempDir::new("volstat-test").unwrap();
        let first_path;
        {
            let a = WorkDir::new(base.path()).unwrap();
            let b = WorkDir::new(base.path()).unwrap();
            assert_ne!(a.path(), b.path());
            assert!(a.path().is_dir());
            assert!(b.path().is_dir());
            first_path = a.path().to_path_buf();
        }
        assert!(!first_path.exists());
    }

    #[test]
    fn workdir_removes_contained_files() {
        let base = TempDir::new("volstat-test").unwrap();
        let path;
        {
            let wd = WorkDir::new(base.path()).unwrap();
            fs::write(wd.path().join("Nv_stats_x"), b"leftover").unwrap();
            path = wd.path().to_path_buf();
        }
        assert!(!path.exists());
    }

    #[test]
    fn workdir_creates_missing_base() {
        let base = TempDir::new("volstat-test").unwrap();
        let nested = base.path().join("a").join("b");
        let wd = WorkDir::new(&nested).unwrap();
        assert!(wd.path().is_dir());
    }

    /// In-memory stand-in for the store, recording every statement issued.
    struct MemoryStore {
        ops: RefCell<Vec<String>>,
        tables: RefCell<HashMap<String, Vec<Record>>>,
    }

    impl MemoryStore {
        fn new() -> MemoryStore {
            MemoryStore {
                ops: RefCell::new(Vec::new()),
                tables: RefCell::new(HashMap::new()),
            }
        }

        fn rows(&self, table: &str) -> Vec<Record> {
            self.tables
                .borrow()
                .get(table)
                .cloned()
                .unwrap_or_default()
        }

        fn op_count(&self) -> usize {
            self.ops.borrow().len()
        }
    }

    impl Storage for MemoryStore {
        fn ensure_destinations(&self) -> Result<(), StoreError> {
            self.ops.borrow_mut().push("ensure_destinations".to_string());
            Ok(())
        }

        fn create_staging(&self, table: &str) -> Result<(), StoreError> {
            self.ops
                .borrow_mut()
                .push(format!("create_staging {}", table));
            self.tables
                .borrow_mut()
                .entry(table.to_string())
                .or_insert_with(Vec::new);
            Ok(())
        }

        fn insert(
            &self,
            table: &str,
            records: &[Record],
        ) -> Result<(), StoreError> {
            self.ops
                .borrow_mut()
                .push(format!("insert {} {}", table, records.len()));
            self.tables
                .borrow_mut()
                .entry(table.to_string())
                .or_insert_with(Vec::new)
                .extend(records.iter().cloned());
            Ok(())
        }

        fn select_staged(
            &self,
            table: &str,
        ) -> Result<Vec<Record>, StoreError> {
            self.ops
                .borrow_mut()
                .push(format!("select_staged {}", table));
            Ok(self.rows(table))
        }

        fn optimize_deltas(&self) -> Result<(), StoreError> {
            self.ops.borrow_mut().push("optimize_deltas".to_string());
            Ok(())
        }

        fn raw_table(&self) -> &str {
            "raw"
        }

        fn delta_table(&self) -> &str {
            "delta"
        }
    }

    const SNAPSHOT_EARLY: &'static str =
        r#"<nvstat timestamp="2018-03-02 11:30:05">
  <vdsk id="vd0" ro="10" wo="20" rb="30" wb="40" rl="1" wl="2"/>
</nvstat>"#;

    const SNAPSHOT_LATE: &'static str =
        r#"<nvstat timestamp="2018-03-02 11:30:15">
  <vdsk id="vd0" ro="50" wo="60" rb="90" wb="140" rl="3" wl="4"/>
</nvstat>"#;

    #[test]
    fn empty_fetch_completes_with_store_untouched() {
        let store = MemoryStore::new();
        let summary = harvest(&store, "fs9510-a", &[]).unwrap();
        assert_eq!(
            summary,
            Summary {
                files: 0,
                records: 0,
                baseline_rows: 0,
                delta_rows: 0,
            }
        );
        // Not one statement, destination DDL included: a fresh store must
        // come out of an idle run exactly as it went in.
        assert_eq!(store.op_count(), 0);
        assert!(store.tables.borrow().is_empty());
    }

    #[test]
    fn parse_failure_aborts_before_any_store_statement() {
        let base = TempDir::new("volstat-test").unwrap();
        let good = base.path().join("Nv_stats_0");
        let bad = base.path().join("Nv_stats_1");
        fs::write(&good, SNAPSHOT_EARLY).unwrap();
        fs::write(
            &bad,
            r#"<nvstat timestamp="2018-03-02 11:30:15">
  <vdsk id="vd0" ro="three" wo="60" rb="90" wb="140" rl="3" wl="4"/>
</nvstat>"#,
        ).unwrap();

        let store = MemoryStore::new();
        match harvest(&store, "fs9510-a", &[good, bad]) {
            Err(Error::Parse(path, _)) => {
                assert!(path.ends_with("Nv_stats_1"))
            }
            other => panic!("expected Error::Parse, got {:?}", other),
        }
        assert_eq!(store.op_count(), 0);
        assert!(store.tables.borrow().is_empty());
    }

    #[test]
    fn staged_batch_flows_into_baseline_and_deltas() {
        let base = TempDir::new("volstat-test").unwrap();
        let early = base.path().join("Nv_stats_0");
        let late = base.path().join("Nv_stats_1");
        fs::write(&early, SNAPSHOT_EARLY).unwrap();
        fs::write(&late, SNAPSHOT_LATE).unwrap();

        let store = MemoryStore::new();
        let summary = harvest(&store, "fs9510-a", &[early, late]).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.records, 12);
        assert_eq!(summary.baseline_rows, 6);
        assert_eq!(summary.delta_rows, 6);

        // Destination DDL leads, then staging, then the two destination
        // appends, then maintenance.
        let ops = store.ops.borrow();
        assert_eq!(ops[0], "ensure_destinations");
        assert_eq!(ops[1], "create_staging stage_fs9510_a");
        assert_eq!(ops[2], "insert stage_fs9510_a 12");
        assert_eq!(ops[3], "select_staged stage_fs9510_a");
        assert_eq!(ops[4], "insert raw 6");
        assert_eq!(ops[5], "insert delta 6");
        assert_eq!(ops[6], "optimize_deltas");
        drop(ops);

        let staged = store.rows("stage_fs9510_a");
        let late_capture =
            staged.iter().map(|r| r.timestamp).max().unwrap();

        for row in store.rows("raw") {
            assert_eq!(row.timestamp, 0);
        }
        let deltas = store.rows("delta");
        for row in &deltas {
            assert_eq!(row.timestamp, late_capture);
        }
        let read_ops = deltas
            .iter()
            .find(|r| r.metric == Metric::ReadOps)
            .unwrap();
        assert_eq!(read_ops.value, 4.0);
        let write_bytes = deltas
            .iter()
            .find(|r| r.metric == Metric::WriteBytes)
            .unwrap();
        assert_eq!(write_bytes.value, 10.0);
    }
}
