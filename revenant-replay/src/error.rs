use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] revenant_proc::ParseError),
    #[error("journal error: {0}")]
    Journal(#[from] revenant_journal::JournalError),
    /// Training's rough and fine passes disagreed by more than 5% on
    /// either units/sec or per-unit wall time, or a decile search
    /// exhausted its ten retries without landing within ±2pp.
    #[error("measurement unstable: rough rate {rough_rate:.1} units/s, fine rate {fine_rate:.1} units/s")]
    UnstableMeasurement { rough_rate: f64, fine_rate: f64 },
    #[error("decile {0} did not converge within 10 attempts")]
    DecileDidNotConverge(u32),
    #[error("unknown device {0} in disk mapping")]
    UnknownDevice(String),
    #[error("could not parse disk mapping line: {0}")]
    BadDiskMapping(String),
}
