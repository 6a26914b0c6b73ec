//! ClickHouse store client, speaking the HTTP interface.
//!
//! The store holds three relations per deployment: a transient per-host
//! staging table scoped to one run, a durable raw-baseline table and a
//! durable delta table, all sharing the six-column record schema. The
//! staging table is `CREATE TEMPORARY ... ENGINE = Memory`; temporaries live
//! and die with the server session, so every `Store` pins a fresh
//! `session_id` on each request and the staging table can never survive a
//! process restart.
//!
//! Rows travel as `TabSeparated` in both directions. The loader is a pure
//! transport step: no validation happens here beyond what the row codec
//! needs to hold together.

use metric::{Metric, Record};
use reqwest;
use sink::Storage;
use std::error;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// Store operations inherit this deadline; a wedged server must not hold a
// scheduled run open forever.
const REQUEST_TIMEOUT_SECS: u64 = 60;

const SCHEMA_COLUMNS: &'static str = "metric String, \
                                      hostname String, \
                                      volumename String, \
                                      timestamp UInt32, \
                                      value Float64, \
                                      version UInt32";

const COLUMN_LIST: &'static str =
    "metric, hostname, volumename, timestamp, value, version";

/// Connection parameters for the store, read from the config file.
#[derive(Debug, Clone)]
pub struct ClickhouseConfig {
    /// Hostname or address of the ClickHouse server.
    pub host: String,
    /// HTTP interface port.
    pub port: u16,
    /// Database the three relations live in.
    pub database: String,
    /// Store user.
    pub user: String,
    /// Store password.
    pub password: String,
    /// Name of the durable raw-baseline table.
    pub raw_table: String,
    /// Name of the durable delta table.
    pub delta_table: String,
}

impl Default for ClickhouseConfig {
    fn default() -> ClickhouseConfig {
        ClickhouseConfig {
            host: "localhost".to_string(),
            port: 8123,
            database: "default".to_string(),
            user: "default".to_string(),
            password: String::new(),
            raw_table: "volstat_raw".to_string(),
            delta_table: "volstat_delta".to_string(),
        }
    }
}

/// The ways a store interaction can fail.
#[derive(Debug)]
pub enum StoreError {
    /// The HTTP request did not complete.
    Transport(reqwest::Error),
    /// The server answered with a non-success status; `body` carries the
    /// server's explanation verbatim.
    Rejected {
        /// HTTP status code of the rejection.
        status: u16,
        /// Response body, which ClickHouse fills with the error text.
        body: String,
    },
    /// A row read back from the store did not fit the record schema.
    BadRow(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StoreError::Transport(ref e) => {
                write!(f, "store unreachable: {}", e)
            }
            StoreError::Rejected {
                status,
                ref body,
            } => write!(f, "store rejected request ({}): {}", status, body.trim()),
            StoreError::BadRow(ref line) => {
                write!(f, "unreadable row from store: {:?}", line)
            }
        }
    }
}

impl error::Error for StoreError {}

/// A handle on the store, scoped to one run.
pub struct Store {
    url: String,
    database: String,
    user: String,
    password: String,
    session: String,
    raw_table: String,
    delta_table: String,
    client: reqwest::blocking::Client,
}

impl Store {
    /// Build a store handle from config. Each handle owns a fresh session
    /// id, so temporary tables created through one handle are invisible to
    /// every other run.
    pub fn new(config: &ClickhouseConfig) -> Store {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("could not build HTTP client");
        Store {
            url: format!("http://{}:{}/", config.host, config.port),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            session: format!("volstat-{}", Uuid::new_v4().simple()),
            raw_table: config.raw_table.clone(),
            delta_table: config.delta_table.clone(),
            client: client,
        }
    }

    /// Connection check. Nothing else should be attempted when this fails.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.post("SELECT 1", String::new()).map(|_| ())
    }

    fn post(&self, sql: &str, body: String) -> Result<String, StoreError> {
        trace!("store request: {}", sql);
        let res = self.client
            .post(&self.url)
            .query(&[
                ("database", self.database.as_str()),
                ("session_id", self.session.as_str()),
                ("query", sql),
            ])
            .header("X-ClickHouse-User", self.user.as_str())
            .header("X-ClickHouse-Key", self.password.as_str())
            .body(body)
            .send()
            .map_err(StoreError::Transport)?;
        let status = res.status();
        let text = res.text().map_err(StoreError::Transport)?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(StoreError::Rejected {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}

impl Storage for Store {
    fn ensure_destinations(&self) -> Result<(), StoreError> {
        for table in &[&self.raw_table, &self.delta_table] {
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} ({}) \
                 ENGINE = MergeTree \
                 ORDER BY (metric, hostname, volumename, timestamp)",
                table, SCHEMA_COLUMNS
            );
            self.post(&sql, String::new())?;
        }
        Ok(())
    }

    // The staging table lives in this run's server session and dies with
    // it.
    fn create_staging(&self, table: &str) -> Result<(), StoreError> {
        let sql = format!(
            "CREATE TEMPORARY TABLE IF NOT EXISTS {} ({}) ENGINE = Memory",
            table, SCHEMA_COLUMNS
        );
        self.post(&sql, String::new()).map(|_| ())
    }

    fn insert(
        &self,
        table: &str,
        records: &[Record],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut body = String::with_capacity(records.len() * 64);
        for r in records {
            encode_row(r, &mut body);
        }
        let sql = insert_sql(table);
        self.post(&sql, body)?;
        debug!("inserted {} rows into {}", records.len(), table);
        Ok(())
    }

    fn select_staged(
        &self,
        table: &str,
    ) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} FORMAT TabSeparated",
            COLUMN_LIST, table
        );
        let text = self.post(&sql, String::new())?;
        let mut records = Vec::new();
        for line in text.lines() {
            records.push(parse_row(line)?);
        }
        Ok(records)
    }

    fn optimize_deltas(&self) -> Result<(), StoreError> {
        let sql = format!("OPTIMIZE TABLE {}", self.delta_table);
        self.post(&sql, String::new()).map(|_| ())
    }

    fn raw_table(&self) -> &str {
        &self.raw_table
    }

    fn delta_table(&self) -> &str {
        &self.delta_table
    }
}

/// Derive the per-host staging table name from the logical hostname.
///
/// Two runs against distinct hosts must never share a staging table, so the
/// name is a sanitized image of the operator-supplied label.
pub fn staging_table_for(hostname: &str) -> String {
    let mut name = String::with_capacity(hostname.len() + 6);
    name.push_str("stage_");
    for c in hostname.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else {
            name.push('_');
        }
    }
    name
}

fn insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {} ({}) FORMAT TabSeparated",
        table, COLUMN_LIST
    )
}

// TabSeparated escaping: backslash, tab, newline, carriage return.
fn escape_into(field: &str, buf: &mut String) {
    for c in field.chars() {
        match c {
            '\\' => buf.push_str("\\\\"),
            '\t' => buf.push_str("\\t"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            c => buf.push(c),
        }
    }
}

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn encode_row(r: &Record, buf: &mut String) {
    buf.push_str(r.metric.code());
    buf.push('\t');
    escape_into(&r.hostname, buf);
    buf.push('\t');
    escape_into(&r.volume, buf);
    buf.push('\t');
    buf.push_str(&r.timestamp.to_string());
    buf.push('\t');
    buf.push_str(&r.value.to_string());
    buf.push('\t');
    buf.push_str(&r.version.to_string());
    buf.push('\n');
}

fn parse_row(line: &str) -> Result<Record, StoreError> {
    let bad = || StoreError::BadRow(line.to_string());
    let mut fields = line.split('\t');
    let metric = fields
        .next()
        .and_then(Metric::from_code)
        .ok_or_else(&bad)?;
    let hostname = fields.next().map(unescape).ok_or_else(&bad)?;
    let volume = fields.next().map(unescape).ok_or_else(&bad)?;
    let timestamp = fields
        .next()
        .and_then(|s| u32::from_str(s).ok())
        .ok_or_else(&bad)?;
    let value = fields
        .next()
        .and_then(|s| f64::from_str(s).ok())
        .ok_or_else(&bad)?;
    let version = fields
        .next()
        .and_then(|s| u32::from_str(s).ok())
        .ok_or_else(&bad)?;
    if fields.next().is_some() {
        return Err(bad());
    }
    Ok(Record {
        metric: metric,
        hostname: hostname,
        volume: volume,
        timestamp: timestamp,
        value: value,
        version: version,
    })
}
