use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The frame's length prefix was present but the file ended before
    /// the full frame could be read — the writer was interrupted
    /// mid-append. Entries read before this point are still valid.
    #[error("journal truncated mid-entry")]
    Truncated,
    /// AEAD decryption failed. Indistinguishable by design from a bad
    /// key: an attacker flipping ciphertext bits and a site reading
    /// with the wrong license both fail identically here.
    #[error("journal entry failed authentication (wrong key or tampered data)")]
    Tampered,
    /// The frame decrypted and authenticated but its plaintext wasn't
    /// valid gzip or valid JSON. Unlike `Truncated`, this can't be
    /// explained by a clean partial write, so iteration stops rather
    /// than skipping the entry.
    #[error("journal entry corrupt: {0}")]
    CorruptEntry(String),
}
