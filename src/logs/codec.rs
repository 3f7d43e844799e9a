//! # Row Codec
//!
//! Maps log entries to table rows and `(timestamp, server)` pairs to primary
//! keys. The key's wire form is a two-element array
//! `["<UTC timestamp, 9 fractional digits>", "<server uuid>"]`, so keys sort
//! by time within a server and round-trip exactly at nanosecond precision.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::directory::ServerId;
use super::entry::LogEntry;
use super::errors::{LogsError, LogsResult};

/// How the `server` field of a row identifies its server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierFormat {
    /// Display name from the server's config
    #[default]
    Name,
    /// Stable server uuid
    Uuid,
}

/// Primary key of a log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub timestamp: DateTime<Utc>,
    pub server_id: ServerId,
}

impl RowKey {
    pub fn new(timestamp: DateTime<Utc>, server_id: ServerId) -> Self {
        Self {
            timestamp,
            server_id,
        }
    }

    /// Wire form of the key
    pub fn to_datum(&self) -> Value {
        json!([format_time(&self.timestamp), self.server_id.to_string()])
    }

    /// Parse the wire form of a key
    pub fn from_datum(datum: &Value) -> LogsResult<Self> {
        let items = match datum.as_array() {
            Some(items) if items.len() == 2 => items,
            _ => {
                return Err(LogsError::MalformedKey(format!(
                    "Expected two-element array, got: {}",
                    datum
                )))
            }
        };

        let Some(time_str) = items[0].as_str() else {
            return Err(LogsError::MalformedKey(format!(
                "Expected string, got: {}",
                datum
            )));
        };
        let timestamp = parse_time(time_str)
            .map_err(|e| LogsError::MalformedKey(format!("In timestamp: {}", e)))?;

        let server_id = items[1]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(ServerId)
            .ok_or_else(|| {
                LogsError::MalformedKey(format!("Expected a server UUID, got: {}", items[1]))
            })?;

        Ok(Self {
            timestamp,
            server_id,
        })
    }

    /// Canonical string form, used as the key of change notifications
    pub fn print_primary(&self) -> String {
        self.to_datum().to_string()
    }
}

/// Build the primary key for an entry
pub fn encode_key(timestamp: DateTime<Utc>, server_id: ServerId) -> RowKey {
    RowKey::new(timestamp, server_id)
}

/// Decode a primary key datum
pub fn decode_key(datum: &Value) -> LogsResult<RowKey> {
    RowKey::from_datum(datum)
}

/// Format a timestamp the way keys carry it
pub fn format_time(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse an RFC 3339 timestamp into UTC
pub fn parse_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

/// Absolute time value as stored in the `timestamp` field
pub fn time_datum(timestamp: &DateTime<Utc>) -> Value {
    let epoch = timestamp.timestamp() as f64 + f64::from(timestamp.timestamp_subsec_nanos()) / 1e9;
    json!({
        "$reql_type$": "TIME",
        "epoch_time": epoch,
        "timezone": "+00:00",
    })
}

/// Value of the `server` field for a server
pub fn server_datum(name: &str, server_id: &ServerId, format: IdentifierFormat) -> Value {
    match format {
        IdentifierFormat::Name => Value::String(name.to_string()),
        IdentifierFormat::Uuid => Value::String(server_id.to_string()),
    }
}

/// Encode a log entry as a table row
pub fn encode_entry(entry: &LogEntry, server_id: &ServerId, server: &Value) -> Value {
    json!({
        "id": encode_key(entry.timestamp, *server_id).to_datum(),
        "server": server,
        "timestamp": time_datum(&entry.timestamp),
        "uptime": entry.uptime.as_secs_f64(),
        "level": entry.level.as_str(),
        "message": entry.message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::entry::LogLevel;
    use chrono::TimeZone;
    use std::time::Duration;

    fn ts(nanos: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap() + chrono::Duration::nanoseconds(nanos as i64)
    }

    #[test]
    fn test_key_round_trip() {
        let server = ServerId::new();
        for nanos in [0, 1, 999_999_999, 123_456_789] {
            let key = encode_key(ts(nanos), server);
            let decoded = decode_key(&key.to_datum()).unwrap();
            assert_eq!(decoded, key);
        }
    }

    #[test]
    fn test_key_wire_format() {
        let server = ServerId::new();
        let datum = encode_key(ts(5), server).to_datum();
        assert_eq!(datum[0], "2024-03-01T10:00:00.000000005Z");
        assert_eq!(datum[1], server.to_string());
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(matches!(
            decode_key(&json!("not an array")),
            Err(LogsError::MalformedKey(_))
        ));
        assert!(matches!(
            decode_key(&json!(["2024-03-01T10:00:00Z"])),
            Err(LogsError::MalformedKey(_))
        ));
        assert!(matches!(
            decode_key(&json!([1, 2])),
            Err(LogsError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_parts() {
        let server = ServerId::new().to_string();
        assert!(decode_key(&json!(["yesterday", server])).is_err());
        assert!(decode_key(&json!(["2024-03-01T10:00:00Z", "not-a-uuid"])).is_err());
        assert!(decode_key(&json!(["2024-03-01T10:00:00Z", 7])).is_err());
    }

    #[test]
    fn test_decode_accepts_other_offsets() {
        let server = ServerId::new();
        let key = decode_key(&json!(["2024-03-01T11:00:00+01:00", server.to_string()])).unwrap();
        assert_eq!(key.timestamp, ts(0));
    }

    #[test]
    fn test_encode_entry_fields() {
        let server = ServerId::new();
        let entry = LogEntry::new(ts(0), Duration::from_millis(1500), LogLevel::Notice, "ready");
        let row = encode_entry(&entry, &server, &server_datum("alpha", &server, IdentifierFormat::Name));

        assert_eq!(row["id"], encode_key(entry.timestamp, server).to_datum());
        assert_eq!(row["server"], "alpha");
        assert_eq!(row["timestamp"]["$reql_type$"], "TIME");
        assert_eq!(row["uptime"], 1.5);
        assert_eq!(row["level"], "notice");
        assert_eq!(row["message"], "ready");
    }

    #[test]
    fn test_server_datum_formats() {
        let server = ServerId::new();
        assert_eq!(server_datum("alpha", &server, IdentifierFormat::Name), "alpha");
        assert_eq!(
            server_datum("alpha", &server, IdentifierFormat::Uuid),
            Value::String(server.to_string())
        );
    }
}
