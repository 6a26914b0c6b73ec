//! The delta transform engine.
//!
//! Raw counter samples are cumulative: they only grow until the array resets
//! them. What dashboards want is the rate of change. This module converts a
//! staged batch of possibly duplicated samples into two outputs:
//!
//!  * a compacted raw baseline, one sentinel row per series, and
//!  * per-interval rates, one row per consecutive sample pair.
//!
//! Both are pure functions over `Record` slices. The windowed running
//! difference is an explicit sort-then-pairwise scan per series rather than a
//! store-side window function, which keeps the rules testable without a live
//! store.
//!
//! Rules an implementer must not bend: grouping is always by the
//! `(metric, hostname, volume)` triple; within-group order for rate
//! computation is strictly ascending timestamp; rows identical in
//! `(metric, hostname, volume, timestamp, value)` collapse to the one with
//! the highest version before any rate is computed. These rules are what
//! make re-ingesting an overlapping snapshot idempotent.

use metric::Record;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Compact a staged batch into raw-baseline rows.
///
/// One row per `(metric, hostname, volume)` group carrying `timestamp = 0`,
/// the minimum observed value and the maximum observed version. The minimum
/// gives downstream consumers a stable low-water mark to bound counter
/// resets against; the version records the most recent run that confirmed
/// it. Repeated partial ingestions of overlapping snapshots therefore never
/// double-count.
///
/// The source is the just-staged batch, never the durable baseline
/// destination itself.
pub fn compact_baseline(records: &[Record]) -> Vec<Record> {
    let mut groups: BTreeMap<(_, String, String), (f64, u32)> = BTreeMap::new();
    for r in records {
        let key = (r.metric, r.hostname.clone(), r.volume.clone());
        let entry = groups.entry(key).or_insert((r.value, r.version));
        if r.value < entry.0 {
            entry.0 = r.value;
        }
        if r.version > entry.1 {
            entry.1 = r.version;
        }
    }
    groups
        .into_iter()
        .map(|((metric, hostname, volume), (value, version))| Record {
            metric: metric,
            hostname: hostname,
            volume: volume,
            timestamp: 0,
            value: value,
            version: version,
        })
        .collect()
}

/// Convert a staged batch into per-interval rate rows.
///
/// After dedup and ordering, each row past the first in its series yields
/// `delta = (value[i] - value[i-1]) / (timestamp[i] - timestamp[i-1])` at
/// `timestamp[i]`. The first row of a series has no predecessor and emits
/// nothing. Baseline sentinel rows (`timestamp == 0`) neither emit nor serve
/// as a predecessor. A deduplicated pair left with zero elapsed time carries
/// no meaningful rate and is skipped.
pub fn compute_deltas(mut records: Vec<Record>) -> Vec<Record> {
    // Version descending within an otherwise equal tuple so that dedup
    // retains the authoritative row.
    records.sort_by(|a, b| {
        a.metric
            .cmp(&b.metric)
            .then_with(|| a.hostname.cmp(&b.hostname))
            .then_with(|| a.volume.cmp(&b.volume))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| {
                a.value.partial_cmp(&b.value).unwrap_or(Ordering::Equal)
            })
            .then_with(|| b.version.cmp(&a.version))
    });
    records.dedup_by(|b, a| {
        b.metric == a.metric && b.hostname == a.hostname && b.volume == a.volume
            && b.timestamp == a.timestamp && b.value == a.value
    });

    let mut deltas = Vec::new();
    {
        let mut prev: Option<&Record> = None;
        for r in &records {
            if r.timestamp == 0 {
                continue;
            }
            if let Some(p) = prev {
                if p.key() == r.key() {
                    let elapsed =
                        i64::from(r.timestamp) - i64::from(p.timestamp);
                    if elapsed > 0 {
                        deltas.push(Record {
                            metric: r.metric,
                            hostname: r.hostname.clone(),
                            volume: r.volume.clone(),
                            timestamp: r.timestamp,
                            value: (r.value - p.value) / elapsed as f64,
                            version: r.version,
                        });
                    } else {
                        debug!(
                            "skipping zero-interval pair for {} {} {} at {}",
                            r.metric, r.hostname, r.volume, r.timestamp
                        );
                    }
                }
            }
            prev = Some(r);
        }
    }
    deltas
}
