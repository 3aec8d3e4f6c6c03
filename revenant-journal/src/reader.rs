use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::codec::decode_body;
use crate::entry::JournalEntry;
use crate::error::JournalError;

/// Sequentially reads framed entries from a journal file, starting at
/// offset 0. Uses blocking `std::fs::File` I/O; this is meant for the
/// processor's reconnect-time catch-up and the replay engine's offline
/// scan, not a hot path.
pub struct JournalReader {
    file: File,
    key: [u8; 32],
    bytes_read: u64,
}

impl JournalReader {
    pub fn open(path: impl AsRef<Path>, key: [u8; 32]) -> Result<Self, JournalError> {
        let file = File::open(path)?;
        Ok(Self { file, key, bytes_read: 0 })
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalEntry, JournalError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut len_buf = [0u8; 4];
        match self.file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }
        self.bytes_read += 4;

        let body_len = u32::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; body_len];
        if let Err(e) = self.file.read_exact(&mut body) {
            return Some(Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => JournalError::Truncated,
                _ => JournalError::Io(e),
            }));
        }
        self.bytes_read += body_len as u64;

        Some(decode_body(&self.key, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::JournalMeasurement;
    use crate::writer::JournalWriter;
    use chrono::Utc;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn entry(site: u64, run: u64) -> JournalEntry {
        JournalEntry {
            site,
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
    fn s3_round_trips_three_entries_distinct_sites() {
        let path = NamedTempFile::new().unwrap().into_temp_path();
        let key = [9u8; 32];
        let writer = JournalWriter::open(&path, key).unwrap();
        writer.append(entry(1, 1)).unwrap();
        writer.append(entry(2, 1)).unwrap();
        writer.append(entry(3, 1)).unwrap();

        let reader = JournalReader::open(&path, key).unwrap();
        let entries: Vec<_> = reader.collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].site, 1);
        assert_eq!(entries[1].site, 2);
        assert_eq!(entries[2].site, 3);
    }

    #[test]
    fn s4_truncated_tail_recovers_earlier_entries_then_reports_truncated() {
        let path = NamedTempFile::new().unwrap().into_temp_path();
        let key = [9u8; 32];
        let writer = JournalWriter::open(&path, key).unwrap();
        writer.append(entry(1, 1)).unwrap();
        writer.append(entry(2, 1)).unwrap();
        writer.append(entry(3, 1)).unwrap();
        drop(writer);

        let full_len = std::fs::metadata(&path).unwrap().len();
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 1).unwrap();
        file.flush().unwrap();
        drop(file);

        let reader = JournalReader::open(&path, key).unwrap();
        let mut recovered = Vec::new();
        let mut saw_truncated = false;
        for result in reader {
            match result {
                Ok(entry) => recovered.push(entry),
                Err(JournalError::Truncated) => {
                    saw_truncated = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(recovered.len(), 2);
        assert!(saw_truncated);
    }

    #[test]
    fn key_mismatch_fails_every_entry() {
        let path = NamedTempFile::new().unwrap().into_temp_path();
        let key = [9u8; 32];
        let mut wrong_key = key;
        wrong_key[31] ^= 0x01;

        let writer = JournalWriter::open(&path, key).unwrap();
        writer.append(entry(1, 1)).unwrap();
        drop(writer);

        let reader = JournalReader::open(&path, wrong_key).unwrap();
        let results: Vec<_> = reader.collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(JournalError::Tampered)));
    }
}
