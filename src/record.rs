//! DNS query records as delivered by the record store, and their parsed form.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{checkpoint, EngineError};

/// Synthetic latency per domain character, in milliseconds.
///
/// The record store does not carry a measured latency; the value is derived
/// from the domain length. Detectors built on it are deliberately weak.
pub const SYNTHETIC_LATENCY_MS_PER_CHAR: f64 = 1.0;

/// Naive timestamp layouts accepted in addition to RFC 3339 and Unix seconds.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// One resolved DNS query observation, as produced by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub timestamp: String,
    pub domain: String,
    pub client: String,
    #[serde(default, alias = "hardwareAddress", skip_serializing_if = "Option::is_none")]
    pub hardware_address: Option<String>,
    #[serde(default)]
    pub status: QueryStatus,
}

impl QueryRecord {
    pub fn new(
        timestamp: impl Into<String>,
        domain: impl Into<String>,
        client: impl Into<String>,
        status: QueryStatus,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            domain: domain.into(),
            client: client.into(),
            hardware_address: None,
            status,
        }
    }

    /// Parse into the engine's internal representation.
    pub fn parse(&self) -> Result<ParsedRecord, EngineError> {
        let timestamp = parse_timestamp(&self.timestamp)?;

        let domain = normalize_domain(&self.domain);
        if domain.is_empty() {
            return Err(EngineError::MalformedRecord {
                reason: "empty domain".to_string(),
            });
        }

        let client = self.client.trim();
        if client.is_empty() {
            return Err(EngineError::MalformedRecord {
                reason: "empty client address".to_string(),
            });
        }

        Ok(ParsedRecord {
            timestamp,
            domain,
            client: client.to_string(),
            status: self.status,
        })
    }
}

/// Resolver disposition of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", from = "RawStatus")]
pub enum QueryStatus {
    #[default]
    Unknown,
    Gravity,
    Forwarded,
    Cached,
    Regex,
    Denylist,
    ExternalBlocked,
    GravityCname,
    RegexCname,
    DenylistCname,
    Retried,
    AlreadyForwarded,
    SpecialDomain,
}

impl QueryStatus {
    /// Map a numeric resolver status code.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Gravity,
            2 => Self::Forwarded,
            3 => Self::Cached,
            4 => Self::Regex,
            5 => Self::Denylist,
            6..=8 => Self::ExternalBlocked,
            9 => Self::GravityCname,
            10 => Self::RegexCname,
            11 => Self::DenylistCname,
            12 | 13 => Self::Retried,
            14 => Self::AlreadyForwarded,
            16 => Self::SpecialDomain,
            _ => Self::Unknown,
        }
    }

    /// Map a symbolic status name (case and separator insensitive).
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase().replace('_', "-");
        match name.as_str() {
            "gravity" | "blocked" => Self::Gravity,
            "forwarded" => Self::Forwarded,
            "cached" | "cache" => Self::Cached,
            "regex" => Self::Regex,
            "denylist" | "blacklist" => Self::Denylist,
            "external-blocked" | "external-blocked-ip" | "external-blocked-null"
            | "external-blocked-nxra" => Self::ExternalBlocked,
            "gravity-cname" => Self::GravityCname,
            "regex-cname" => Self::RegexCname,
            "denylist-cname" | "blacklist-cname" => Self::DenylistCname,
            "retried" | "retried-dnssec" => Self::Retried,
            "already-forwarded" | "in-progress" => Self::AlreadyForwarded,
            "special-domain" => Self::SpecialDomain,
            other => match other.parse::<i64>() {
                Ok(code) => Self::from_code(code),
                Err(_) => Self::Unknown,
            },
        }
    }

    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            Self::Gravity
                | Self::Regex
                | Self::Denylist
                | Self::ExternalBlocked
                | Self::GravityCname
                | Self::RegexCname
                | Self::DenylistCname
                | Self::SpecialDomain
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStatus {
    Code(i64),
    Name(String),
}

impl From<RawStatus> for QueryStatus {
    fn from(raw: RawStatus) -> Self {
        match raw {
            RawStatus::Code(code) => QueryStatus::from_code(code),
            RawStatus::Name(name) => QueryStatus::from_name(&name),
        }
    }
}

/// A validated record with a UTC timestamp and normalized domain.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub timestamp: DateTime<Utc>,
    pub domain: String,
    pub client: String,
    pub status: QueryStatus,
}

impl ParsedRecord {
    /// Latency attributed to this query, in milliseconds.
    pub fn latency_ms(&self) -> f64 {
        self.domain.len() as f64 * SYNTHETIC_LATENCY_MS_PER_CHAR
    }
}

/// Result of parsing a batch: the usable records plus the number dropped.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub records: Vec<ParsedRecord>,
    pub skipped: usize,
}

impl ParsedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Latest timestamp in the batch.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.records.last().map(|r| r.timestamp)
    }
}

/// Parse every record, skipping malformed ones. Output is sorted by time.
pub fn parse_batch(
    records: &[QueryRecord],
    cancel: &CancellationToken,
) -> Result<ParsedBatch, EngineError> {
    let mut batch = ParsedBatch {
        records: Vec::with_capacity(records.len()),
        skipped: 0,
    };

    for (i, record) in records.iter().enumerate() {
        checkpoint(cancel, i)?;
        match record.parse() {
            Ok(parsed) => batch.records.push(parsed),
            Err(e) => {
                debug!(index = i, timestamp = %record.timestamp, error = %e, "skipping record");
                batch.skipped += 1;
            }
        }
    }

    batch.records.sort_by_key(|r| r.timestamp);
    Ok(batch)
}

/// 9999-12-31T23:59:59Z, the last instant RFC 3339 can express. Unix
/// timestamps outside `0..=MAX_UNIX_SECS` are rejected.
pub const MAX_UNIX_SECS: i64 = 253_402_300_799;

/// Parse a second-precision timestamp string.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    let raw = raw.trim();
    let malformed = || EngineError::MalformedRecord {
        reason: format!("unparseable timestamp '{}'", raw),
    };

    if raw.is_empty() {
        return Err(malformed());
    }

    if let Ok(secs) = raw.parse::<i64>() {
        if !(0..=MAX_UNIX_SECS).contains(&secs) {
            return Err(malformed());
        }
        return Utc.timestamp_opt(secs, 0).single().ok_or_else(malformed);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(malformed)
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_timestamp_formats() {
        let rfc = parse_timestamp("2024-05-01T12:30:15Z").unwrap();
        let naive = parse_timestamp("2024-05-01 12:30:15").unwrap();
        let naive_t = parse_timestamp("2024-05-01T12:30:15").unwrap();
        let unix = parse_timestamp(&rfc.timestamp().to_string()).unwrap();
        assert_eq!(rfc, naive);
        assert_eq!(rfc, naive_t);
        assert_eq!(rfc, unix);
        assert_eq!(rfc.hour(), 12);

        let offset = parse_timestamp("2024-05-01T14:30:15+02:00").unwrap();
        assert_eq!(offset, rfc);
    }

    #[test]
    fn test_bad_timestamp_is_malformed() {
        for raw in ["", "yesterday", "2024-13-45 99:00:00", "999999999999", "-5"] {
            assert!(matches!(
                parse_timestamp(raw),
                Err(EngineError::MalformedRecord { .. })
            ));
        }
    }

    #[test]
    fn test_parse_normalizes_domain() {
        let record = QueryRecord::new("2024-05-01 00:00:00", " Example.COM. ", "10.0.0.2", QueryStatus::Cached);
        let parsed = record.parse().unwrap();
        assert_eq!(parsed.domain, "example.com");
        assert_eq!(parsed.client, "10.0.0.2");
        assert_eq!(parsed.latency_ms(), 11.0);
    }

    #[test]
    fn test_batch_skips_malformed_and_sorts() {
        let records = vec![
            QueryRecord::new("2024-05-01 02:00:00", "b.com", "10.0.0.2", QueryStatus::Forwarded),
            QueryRecord::new("garbage", "c.com", "10.0.0.2", QueryStatus::Forwarded),
            QueryRecord::new("2024-05-01 01:00:00", "a.com", "10.0.0.2", QueryStatus::Forwarded),
            QueryRecord::new("2024-05-01 03:00:00", "", "10.0.0.2", QueryStatus::Forwarded),
        ];
        let batch = parse_batch(&records, &CancellationToken::new()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.skipped, 2);
        assert_eq!(batch.records[0].domain, "a.com");
        assert_eq!(batch.latest(), Some(parse_timestamp("2024-05-01 02:00:00").unwrap()));
    }

    #[test]
    fn test_status_from_code_and_name() {
        assert_eq!(QueryStatus::from_code(2), QueryStatus::Forwarded);
        assert_eq!(QueryStatus::from_code(7), QueryStatus::ExternalBlocked);
        assert_eq!(QueryStatus::from_code(99), QueryStatus::Unknown);
        assert_eq!(QueryStatus::from_name("CACHE"), QueryStatus::Cached);
        assert_eq!(QueryStatus::from_name("regex_cname"), QueryStatus::RegexCname);
        assert_eq!(QueryStatus::from_name("1"), QueryStatus::Gravity);
        assert!(QueryStatus::Gravity.is_blocked());
        assert!(!QueryStatus::Cached.is_blocked());
    }

    #[test]
    fn test_status_deserializes_from_code_or_name() {
        let json = r#"[
            {"timestamp": "2024-05-01 00:00:00", "domain": "a.com", "client": "10.0.0.1", "status": 3},
            {"timestamp": "2024-05-01 00:00:01", "domain": "b.com", "client": "10.0.0.1", "status": "gravity",
             "hardwareAddress": "aa:bb:cc:dd:ee:ff"},
            {"timestamp": "2024-05-01 00:00:02", "domain": "c.com", "client": "10.0.0.1"}
        ]"#;
        let records: Vec<QueryRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records[0].status, QueryStatus::Cached);
        assert_eq!(records[1].status, QueryStatus::Gravity);
        assert_eq!(records[1].hardware_address.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(records[2].status, QueryStatus::Unknown);

        let out = serde_json::to_value(&records[1]).unwrap();
        assert_eq!(out["status"], "gravity");
    }
}
