use base64::Engine;
use chrono::{DateTime, Utc};
use revenant_proto::{Measurement, WrappedMeasurement};
use serde::{Deserialize, Serialize};

/// The on-disk JSON shape of one journal entry. Field names are
/// capitalized to match what sites and replay tooling already expect
/// on the wire; internal code uses the snake_case `WrappedMeasurement`
/// from `revenant-proto` everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    #[serde(rename = "Site")]
    pub site: u64,
    #[serde(rename = "Host")]
    pub host: u64,
    #[serde(rename = "Run")]
    pub run: u64,
    #[serde(rename = "Measurement")]
    pub measurement: JournalMeasurement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalMeasurement {
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Start")]
    pub start: DateTime<Utc>,
    #[serde(rename = "Duration")]
    pub duration: i64,
    #[serde(rename = "Frequency")]
    pub frequency: i64,
    #[serde(rename = "System")]
    pub system: String,
    #[serde(rename = "Measurement", with = "measurement_as_base64")]
    pub measurement: Vec<u8>,
}

/// The wire/on-disk shape for `JournalMeasurement::measurement` is a
/// base64 string, not a JSON byte array, so an entry round-trips
/// through any JSON tool that expects the documented shape. Plain
/// `String::from_utf8` isn't enough since a `/sys/class/net` read can
/// be opaque, non-UTF-8 bytes.
mod measurement_as_base64 {
    use super::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

impl From<WrappedMeasurement> for JournalEntry {
    fn from(w: WrappedMeasurement) -> Self {
        JournalEntry {
            site: w.site,
            host: w.host,
            run: w.run,
            measurement: JournalMeasurement {
                timestamp: w.measurement.timestamp,
                start: w.measurement.start,
                duration: w.measurement.duration_nanos,
                frequency: w.measurement.frequency_nanos,
                system: w.measurement.system,
                measurement: w.measurement.measurement,
            },
        }
    }
}

impl From<JournalEntry> for WrappedMeasurement {
    fn from(e: JournalEntry) -> Self {
        WrappedMeasurement {
            site: e.site,
            host: e.host,
            run: e.run,
            measurement: Measurement {
                timestamp: e.measurement.timestamp,
                start: e.measurement.start,
                duration_nanos: e.measurement.duration,
                frequency_nanos: e.measurement.frequency,
                system: e.measurement.system,
                measurement: e.measurement.measurement,
            },
        }
    }
}
