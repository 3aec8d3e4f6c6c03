//! Encrypted, append-only journal storage for captured measurements.
//!
//! Each entry is gzip-compressed JSON sealed with XChaCha20-Poly1305,
//! framed as `len:u32 LE | nonce(24) | ciphertext` inside a plain
//! append-only file. The AEAD key is derived per-site from a license
//! string so one site's journal can't be decrypted with another
//! site's key.

mod codec;
mod entry;
mod error;
mod key;
mod reader;
mod writer;

pub use entry::{JournalEntry, JournalMeasurement};
pub use error::JournalError;
pub use key::derive_key;
pub use reader::JournalReader;
pub use writer::JournalWriter;
