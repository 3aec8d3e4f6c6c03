use revenant_journal::{derive_key, JournalEntry, JournalWriter};
use revenant_proc::DifferentiatedRecord;
use revenant_proto::{SeriesKey, WrappedMeasurement};

/// Where the processor archives every raw measurement it receives,
/// before differentiation. `JournalWriter` is the only implementation
/// in this workspace; any durable store that accepts append-only
/// encrypted entries fits this seam.
pub trait JournalSink: Send + Sync {
    fn append(&self, wrapped: WrappedMeasurement) -> Result<(), revenant_journal::JournalError>;
}

impl JournalSink for JournalWriter {
    fn append(&self, wrapped: WrappedMeasurement) -> Result<(), revenant_journal::JournalError> {
        JournalWriter::append(self, JournalEntry::from(wrapped))
    }
}

/// Where the processor hands finished differentiated records.
/// Recording them in a time-series database is explicitly out of
/// scope for this workspace; this trait is the seam a caller would
/// implement to bolt one on without touching the reconnect loop.
pub trait RecordSink: Send + Sync {
    fn record(&self, key: &SeriesKey, record: DifferentiatedRecord);
}

/// Default `RecordSink` used when no external store is configured:
/// discards records after logging them at debug level.
pub struct NullRecordSink;

impl RecordSink for NullRecordSink {
    fn record(&self, key: &SeriesKey, record: DifferentiatedRecord) {
        log::debug!("record for {}/{}: {:?}", key.host, key.system, record);
    }
}

pub fn journal_writer_for_site(
    path: impl AsRef<std::path::Path>,
    license: &[u8],
    site_id: u64,
    site_name: &str,
) -> Result<JournalWriter, revenant_journal::JournalError> {
    let key = derive_key(license, &site_id.to_le_bytes(), site_name.as_bytes());
    JournalWriter::open(path, key)
}
