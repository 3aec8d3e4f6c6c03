use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// An immutable capture of one `/proc` (or `/sys/class/net`) read.
///
/// Created by the collector agent, never mutated afterwards. Dropped
/// whole (a "spill") if the bounded measurement queue is full when it
/// is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Overall wall-clock timestamp of the read, monotonic-unix-nanos.
    pub timestamp: DateTime<Utc>,
    /// Timestamp this particular sample was started.
    pub start: DateTime<Utc>,
    /// How long the read took.
    pub duration_nanos: i64,
    /// Configured sampling interval at capture time.
    pub frequency_nanos: i64,
    /// The system path this measurement came from, e.g. `/proc/stat`.
    pub system: String,
    /// The raw bytes read from `system` (opaque or UTF-8 text).
    pub measurement: Vec<u8>,
}

/// A `Measurement` tagged with the site/host/run it was captured
/// under. Created by the processor when it receives a `Measurement`
/// from a known agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedMeasurement {
    pub site: u64,
    pub host: u64,
    pub run: u64,
    pub measurement: Measurement,
}

/// `(site, host, run, system)` — identifies one time series. Used as
/// the differentiator's prev-snapshot key and the journal's grouping
/// key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub site: u64,
    pub host: u64,
    pub run: u64,
    pub system: String,
}

impl SeriesKey {
    pub fn new(site: u64, host: u64, run: u64, system: impl Into<String>) -> Self {
        Self { site, host, run, system: system.into() }
    }
}

impl WrappedMeasurement {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.site, self.host, self.run, self.measurement.system.clone())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SystemPathError {
    #[error("system path `{0}` is not under /proc or /sys/class/net")]
    BadPrefix(String),
    #[error("system path `{0}` escapes its root via `..`")]
    Escapes(String),
    #[error("system path `{0}` does not exist")]
    NotFound(String),
}

const ALLOWED_PREFIXES: [&str; 2] = ["/proc/", "/sys/class/net/"];

/// Validates (and cleans) a system path: it must be
/// prefixed by `/proc/` or `/sys/class/net/`, contain no `..`
/// components, and exist on disk. Invalid paths are rejected at
/// command-parse time, before a collection loop ever starts.
pub fn validate_system_path(raw: &str) -> Result<String, SystemPathError> {
    if !ALLOWED_PREFIXES.iter().any(|p| raw.starts_with(p)) {
        return Err(SystemPathError::BadPrefix(raw.to_string()));
    }
    let path = Path::new(raw);
    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(SystemPathError::Escapes(raw.to_string()));
        }
    }
    if !path.exists() {
        return Err(SystemPathError::NotFound(raw.to_string()));
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_paths_outside_allowed_roots() {
        assert_eq!(
            validate_system_path("/etc/passwd"),
            Err(SystemPathError::BadPrefix("/etc/passwd".to_string()))
        );
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let err = validate_system_path("/proc/../etc/passwd");
        assert_eq!(err, Err(SystemPathError::Escapes("/proc/../etc/passwd".to_string())));
    }

    #[test]
    fn accepts_existing_proc_file() {
        assert_eq!(validate_system_path("/proc/stat").as_deref(), Ok("/proc/stat"));
    }

    #[test]
    fn rejects_missing_file() {
        assert!(matches!(
            validate_system_path("/proc/this-does-not-exist-12345"),
            Err(SystemPathError::NotFound(_))
        ));
    }
}
