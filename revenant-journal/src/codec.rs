use std::io::{Read, Write};

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::entry::JournalEntry;
use crate::error::JournalError;

const NONCE_LEN: usize = 24;

/// Encodes one entry as `len:u32 LE | nonce(24) | ciphertext`, where
/// the ciphertext is XChaCha20-Poly1305-sealed gzip-compressed JSON.
/// `len` covers everything after itself (nonce + ciphertext).
pub fn encode_entry(key: &[u8; 32], entry: &JournalEntry) -> Result<Vec<u8>, JournalError> {
    let json = serde_json::to_vec(entry).map_err(|e| JournalError::CorruptEntry(e.to_string()))?;

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&json)?;
    let compressed = gz.finish()?;

    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, compressed.as_ref())
        .map_err(|_| JournalError::Tampered)?;

    let mut frame = Vec::with_capacity(4 + NONCE_LEN + ciphertext.len());
    let body_len = (NONCE_LEN + ciphertext.len()) as u32;
    frame.extend_from_slice(&body_len.to_le_bytes());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Decrypts and decodes one frame's body (everything after the length
/// prefix, which the caller has already consumed to know how much to
/// read).
pub fn decode_body(key: &[u8; 32], body: &[u8]) -> Result<JournalEntry, JournalError> {
    if body.len() < NONCE_LEN {
        return Err(JournalError::Truncated);
    }
    let (nonce_bytes, ciphertext) = body.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new(key.into());
    let compressed = cipher.decrypt(nonce, ciphertext).map_err(|_| JournalError::Tampered)?;

    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| JournalError::CorruptEntry(e.to_string()))?;

    serde_json::from_slice(&json).map_err(|e| JournalError::CorruptEntry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::JournalMeasurement;
    use chrono::Utc;

    fn sample_entry() -> JournalEntry {
        JournalEntry {
            site: 1,
            host: 2,
            run: 3,
            measurement: JournalMeasurement {
                timestamp: Utc::now(),
                start: Utc::now(),
                duration: 500,
                frequency: 1_000_000_000,
                system: "/proc/stat".to_string(),
                measurement: b"cpu  1 2 3 4".to_vec(),
            },
        }
    }

    #[test]
    fn round_trips_through_encrypt_and_decrypt() {
        let key = [7u8; 32];
        let entry = sample_entry();
        let frame = encode_entry(&key, &entry).unwrap();
        let body = &frame[4..];
        let decoded = decode_body(&key, body).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let key = [7u8; 32];
        let mut wrong_key = key;
        wrong_key[0] ^= 0x01;

        let entry = sample_entry();
        let frame = encode_entry(&key, &entry).unwrap();
        let body = &frame[4..];
        assert!(matches!(decode_body(&wrong_key, body), Err(JournalError::Tampered)));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = [7u8; 32];
        let entry = sample_entry();
        let mut frame = encode_entry(&key, &entry).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        let body = &frame[4..];
        assert!(matches!(decode_body(&key, body), Err(JournalError::Tampered)));
    }
}
