//! The canonical representation of one counter observation.
//!
//! Everything volstat moves around -- parser output, staging rows, baseline
//! rows, delta rows -- is a `Record`. The shape mirrors the store schema
//! one to one so that loading and reading back are plain transport.

use std::fmt;

/// The fixed set of per-volume counters an array snapshot tracks.
///
/// The wire codes are the attribute names used in the snapshot documents and
/// the `metric` column values in the store. Anything outside this set in a
/// snapshot is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    /// Cumulative read operations, code `ro`.
    ReadOps,
    /// Cumulative write operations, code `wo`.
    WriteOps,
    /// Cumulative bytes read, code `rb`.
    ReadBytes,
    /// Cumulative bytes written, code `wb`.
    WriteBytes,
    /// Measured read latency, code `rl`.
    ReadLatency,
    /// Measured write latency, code `wl`.
    WriteLatency,
}

const ALL_METRICS: [Metric; 6] = [
    Metric::ReadOps,
    Metric::WriteOps,
    Metric::ReadBytes,
    Metric::WriteBytes,
    Metric::ReadLatency,
    Metric::WriteLatency,
];

impl Metric {
    /// The two-letter wire code for this metric.
    pub fn code(self) -> &'static str {
        match self {
            Metric::ReadOps => "ro",
            Metric::WriteOps => "wo",
            Metric::ReadBytes => "rb",
            Metric::WriteBytes => "wb",
            Metric::ReadLatency => "rl",
            Metric::WriteLatency => "wl",
        }
    }

    /// Resolve a wire code back into a `Metric`, `None` for unknown codes.
    pub fn from_code(code: &str) -> Option<Metric> {
        match code {
            "ro" => Some(Metric::ReadOps),
            "wo" => Some(Metric::WriteOps),
            "rb" => Some(Metric::ReadBytes),
            "wb" => Some(Metric::WriteBytes),
            "rl" => Some(Metric::ReadLatency),
            "wl" => Some(Metric::WriteLatency),
            _ => None,
        }
    }

    /// Every tracked metric, in wire order.
    pub fn all() -> &'static [Metric] {
        &ALL_METRICS
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One observation of one metric for one volume at one instant.
///
/// `(metric, hostname, volume, timestamp)` is the natural key for raw
/// counters. `timestamp == 0` is reserved as the raw-baseline sentinel and
/// never appears in the delta destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Which counter this observation belongs to.
    pub metric: Metric,
    /// Logical identity of the source array, operator supplied. This is not
    /// the network address.
    pub hostname: String,
    /// Identifier of the logical volume the counter belongs to.
    pub volume: String,
    /// Capture time in epoch seconds, shared by every record parsed from one
    /// snapshot file.
    pub timestamp: u32,
    /// The counter or measured value.
    pub value: f64,
    /// Ingestion version, shared by every record of one run and strictly
    /// increasing across runs. A dedup tie-breaker, not a schema version.
    pub version: u32,
}

impl Record {
    /// The grouping key the transform engine works over.
    pub fn key(&self) -> (Metric, &str, &str) {
        (self.metric, self.hostname.as_str(), self.volume.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_resolution_covers_all_metrics() {
        for metric in Metric::all() {
            assert_eq!(Some(*metric), Metric::from_code(metric.code()));
        }
        assert_eq!(None, Metric::from_code("iops"));
        assert_eq!(None, Metric::from_code(""));
    }

    #[test]
    fn key_ignores_time_and_value() {
        let a = Record {
            metric: Metric::ReadOps,
            hostname: "fs9510-a".to_string(),
            volume: "vd0".to_string(),
            timestamp: 100,
            value: 10.0,
            version: 1,
        };
        let mut b = a.clone();
        b.timestamp = 200;
        b.value = 99.0;
        b.version = 2;
        assert_eq!(a.key(), b.key());
    }
}
