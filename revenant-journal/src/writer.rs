use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use log::debug;

use crate::codec::encode_entry;
use crate::entry::JournalEntry;
use crate::error::JournalError;

/// Appends framed, encrypted entries to one journal file. Writes are
/// serialized behind a mutex since the processor may hand entries
/// across tasks but the underlying file handle is not `Sync`.
pub struct JournalWriter {
    file: Mutex<File>,
    key: [u8; 32],
}

impl JournalWriter {
    pub fn open(path: impl AsRef<Path>, key: [u8; 32]) -> Result<Self, JournalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file), key })
    }

    /// Encodes and appends one entry, flushing before returning so a
    /// crash immediately after `append` can't silently drop data still
    /// sitting in a userspace buffer.
    pub fn append(&self, entry: JournalEntry) -> Result<(), JournalError> {
        let frame = encode_entry(&self.key, &entry)?;
        let mut file = self.file.lock().expect("journal writer mutex poisoned");
        file.write_all(&frame)?;
        file.flush()?;
        debug!("appended journal entry ({} bytes)", frame.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::JournalMeasurement;
    use chrono::Utc;
    use tempfile::NamedTempFile;

    fn sample_entry(run: u64) -> JournalEntry {
        JournalEntry {
            site: 1,
            host: 1,
            run,
            measurement: JournalMeasurement {
                timestamp: Utc::now(),
                start: Utc::now(),
                duration: 100,
                frequency: 1_000_000_000,
                system: "/proc/stat".to_string(),
                measurement: b"cpu  1 2 3 4".to_vec(),
            },
        }
    }

    #[test]
    fn appends_multiple_entries() {
        let path = NamedTempFile::new().unwrap().into_temp_path();
        let writer = JournalWriter::open(&path, [1u8; 32]).unwrap();
        writer.append(sample_entry(1)).unwrap();
        writer.append(sample_entry(2)).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
