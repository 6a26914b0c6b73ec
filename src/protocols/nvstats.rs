//! Parser for array counter snapshot documents.
//!
//! A snapshot is one XML document. The root element carries a `timestamp`
//! attribute in `YYYY-MM-DD HH:MM:SS` local time; each `vdsk` element
//! describes one volume with an `id` attribute plus one attribute per tracked
//! metric. One document becomes one `Record` per (volume x metric), all
//! sharing the document's capture time and the run's ingestion version.
//!
//! A partial snapshot is unreliable signal for rate computation, so any
//! malformed element fails the whole document. Unknown extra attributes are
//! ignored.

use chrono::{Local, NaiveDateTime, TimeZone};
use metric::{Metric, Record};
use roxmltree;
use std::error;
use std::fmt;
use std::str::FromStr;

const TIMESTAMP_FORMAT: &'static str = "%Y-%m-%d %H:%M:%S";

/// The ways a snapshot document can fail to parse. All of them abort the
/// whole document: no records are emitted for a file that trips any of these.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The document is not well formed XML, the root element has no
    /// `timestamp` attribute or a volume element has no `id`.
    MalformedDocument(String),
    /// The root `timestamp` attribute does not match `YYYY-MM-DD HH:MM:SS`.
    MalformedTimestamp(String),
    /// A tracked metric attribute is missing from a volume element, is not
    /// numeric or is not finite. Counters are cumulative totals; NaN and the
    /// infinities cannot be differenced and would poison the run.
    MalformedMetricValue {
        /// The volume the bad attribute was found on.
        volume: String,
        /// The wire code of the offending metric.
        code: &'static str,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ParseError::MalformedDocument(ref detail) => {
                write!(f, "malformed snapshot document: {}", detail)
            }
            ParseError::MalformedTimestamp(ref raw) => {
                write!(f, "malformed snapshot timestamp: {:?}", raw)
            }
            ParseError::MalformedMetricValue {
                ref volume,
                ref code,
            } => write!(
                f,
                "missing or non-numeric metric attribute {:?} on volume {:?}",
                code, volume
            ),
        }
    }
}

impl error::Error for ParseError {}

/// Parse one snapshot document into records.
///
/// `hostname` is the logical identity the records will be stored under and
/// `version` the shared ingestion version of the current run. Returns the
/// records for every (volume x tracked metric) combination or the first
/// error encountered, in document order.
pub fn parse_nvstats(
    text: &str,
    hostname: &str,
    version: u32,
) -> Result<Vec<Record>, ParseError> {
    let doc = roxmltree::Document::parse(text)
        .map_err(|e| ParseError::MalformedDocument(e.to_string()))?;
    let root = doc.root_element();
    let stamp = root.attribute("timestamp").ok_or_else(|| {
        ParseError::MalformedDocument(
            "root element has no timestamp attribute".to_string(),
        )
    })?;
    let timestamp = parse_timestamp(stamp)?;

    let mut records = Vec::new();
    for node in doc.descendants().filter(|n| n.has_tag_name("vdsk")) {
        let volume = node.attribute("id").ok_or_else(|| {
            ParseError::MalformedDocument("vdsk element has no id".to_string())
        })?;
        for metric in Metric::all() {
            let code = metric.code();
            let raw = node.attribute(code).ok_or_else(|| {
                ParseError::MalformedMetricValue {
                    volume: volume.to_string(),
                    code: code,
                }
            })?;
            let value = match f64::from_str(raw) {
                Ok(v) if v.is_finite() => v,
                _ => {
                    return Err(ParseError::MalformedMetricValue {
                        volume: volume.to_string(),
                        code: code,
                    })
                }
            };
            records.push(Record {
                metric: *metric,
                hostname: hostname.to_string(),
                volume: volume.to_string(),
                timestamp: timestamp,
                value: value,
                version: version,
            });
        }
    }
    trace!(
        "parsed {} records at capture time {}",
        records.len(),
        timestamp
    );
    Ok(records)
}

/// Convert a capture time string to epoch seconds, interpreted in local
/// time. Arrays report wall-clock time in the timezone they are configured
/// for, which deployment-wise is the collector's own.
fn parse_timestamp(raw: &str) -> Result<u32, ParseError> {
    let naive = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|_| ParseError::MalformedTimestamp(raw.to_string()))?;
    match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => Ok(dt.timestamp() as u32),
        None => Err(ParseError::MalformedTimestamp(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metric::Metric;

    const GOOD: &'static str = r#"<nvstat timestamp="2018-03-02 11:30:05">
  <vdsk id="vd0" ro="100" wo="200" rb="4096" wb="8192" rl="1.5" wl="2.5"/>
  <vdsk id="vd1" ro="10" wo="20" rb="40" wb="80" rl="0.1" wl="0.2"/>
</nvstat>"#;

    #[test]
    fn parses_one_record_per_volume_metric_pair() {
        let records = parse_nvstats(GOOD, "fs9510-a", 77).unwrap();
        assert_eq!(records.len(), 12);
        for r in &records {
            assert_eq!(r.hostname, "fs9510-a");
            assert_eq!(r.version, 77);
            assert_eq!(r.timestamp, records[0].timestamp);
            assert!(r.timestamp > 0);
        }
        let ro_vd0 = records
            .iter()
            .find(|r| r.metric == Metric::ReadOps && r.volume == "vd0")
            .unwrap();
        assert_eq!(ro_vd0.value, 100.0);
        let wl_vd1 = records
            .iter()
            .find(|r| r.metric == Metric::WriteLatency && r.volume == "vd1")
            .unwrap();
        assert_eq!(wl_vd1.value, 0.2);
    }

    #[test]
    fn unknown_attributes_are_ignored() {
        let pyld = r#"<nvstat timestamp="2018-03-02 11:30:05" cluster="c1">
  <vdsk id="vd0" ro="1" wo="2" rb="3" wb="4" rl="5" wl="6" extra="9"/>
</nvstat>"#;
        let records = parse_nvstats(pyld, "h", 1).unwrap();
        assert_eq!(records.len(), 6);
    }

    #[test]
    fn snapshot_with_no_volumes_is_empty_not_an_error() {
        let pyld = r#"<nvstat timestamp="2018-03-02 11:30:05"></nvstat>"#;
        assert_eq!(parse_nvstats(pyld, "h", 1).unwrap(), Vec::new());
    }

    #[test]
    fn rejects_bad_timestamp() {
        let pyld = r#"<nvstat timestamp="02/03/2018 11:30">
  <vdsk id="vd0" ro="1" wo="2" rb="3" wb="4" rl="5" wl="6"/>
</nvstat>"#;
        match parse_nvstats(pyld, "h", 1) {
            Err(ParseError::MalformedTimestamp(raw)) => {
                assert_eq!(raw, "02/03/2018 11:30")
            }
            other => panic!("expected MalformedTimestamp, got {:?}", other),
        }
    }

    #[test]
    fn rejects_missing_timestamp_attribute() {
        let pyld = r#"<nvstat><vdsk id="vd0"/></nvstat>"#;
        match parse_nvstats(pyld, "h", 1) {
            Err(ParseError::MalformedDocument(_)) => {}
            other => panic!("expected MalformedDocument, got {:?}", other),
        }
    }

    #[test]
    fn rejects_missing_metric_attribute() {
        let pyld = r#"<nvstat timestamp="2018-03-02 11:30:05">
  <vdsk id="vd0" ro="1" wo="2" rb="3" wb="4" rl="5"/>
</nvstat>"#;
        match parse_nvstats(pyld, "h", 1) {
            Err(ParseError::MalformedMetricValue { volume, code }) => {
                assert_eq!(volume, "vd0");
                assert_eq!(code, "wl");
            }
            other => panic!("expected MalformedMetricValue, got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_numeric_metric_attribute() {
        let pyld = r#"<nvstat timestamp="2018-03-02 11:30:05">
  <vdsk id="vd0" ro="1" wo="2" rb="three" wb="4" rl="5" wl="6"/>
</nvstat>"#;
        match parse_nvstats(pyld, "h", 1) {
            Err(ParseError::MalformedMetricValue { volume, code }) => {
                assert_eq!(volume, "vd0");
                assert_eq!(code, "rb");
            }
            other => panic!("expected MalformedMetricValue, got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_finite_metric_values() {
        for raw in &["NaN", "inf", "-inf"] {
            let pyld = format!(
                r#"<nvstat timestamp="2018-03-02 11:30:05">
  <vdsk id="vd0" ro="{}" wo="2" rb="3" wb="4" rl="5" wl="6"/>
</nvstat>"#,
                raw
            );
            match parse_nvstats(&pyld, "h", 1) {
                Err(ParseError::MalformedMetricValue { volume, code }) => {
                    assert_eq!(volume, "vd0");
                    assert_eq!(code, "ro");
                }
                other => panic!(
                    "expected MalformedMetricValue for {:?}, got {:?}",
                    raw, other
                ),
            }
        }
    }

    #[test]
    fn rejects_not_xml() {
        assert!(parse_nvstats("not xml at all", "h", 1).is_err());
    }
}
