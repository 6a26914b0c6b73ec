//! Volstat harvests per-volume I/O performance counters from storage arrays
//! and lands them in ClickHouse. One invocation performs one complete harvest
//! cycle against one array: counter snapshot files are copied off the array
//! over SSH, parsed into metric tuples, bulk loaded into a per-host staging
//! table and then transformed into two durable series -- a compacted raw
//! baseline and per-interval rates derived from the cumulative counters.
//!
//! Why you might choose to use volstat:
//!
//!  * Your arrays expose I/O statistics only as on-box snapshot files.
//!  * You want rates, not raw monotonic counters, in your dashboards.
//!  * You re-ingest overlapping snapshots and need that to be idempotent.
//!
//! The pipeline is strictly sequential within a run. Runs against distinct
//! arrays may execute in parallel so long as each keeps its own working
//! directory and staging table, which volstat arranges by deriving both from
//! the run identity.
#![allow(unknown_lints)]
#![deny(trivial_numeric_casts, missing_docs, unstable_features, unused_import_braces)]
extern crate chrono;
extern crate clap;
extern crate glob;
extern crate reqwest;
extern crate roxmltree;
extern crate ssh2;
extern crate toml;
extern crate uuid;

#[macro_use]
extern crate log;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
extern crate tempdir;

pub mod config;
pub mod metric;
pub mod protocols;
pub mod run;
pub mod sink;
pub mod source;
pub mod transform;
