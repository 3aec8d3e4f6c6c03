use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derives the 32-byte AEAD key for one site's journal: `HMAC-SHA256(
/// license, site_id || site_name)`. The license is the key, not the
/// message, so a site can't derive another site's key without it.
pub fn derive_key(license: &[u8], site_id: &[u8], site_name: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(license).expect("HMAC accepts keys of any length");
    mac.update(site_id);
    mac.update(site_name);
    let result = mac.finalize().into_bytes();
    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_derive_the_same_key() {
        let a = derive_key(b"license-123", b"site-1", b"Acme Corp");
        let b = derive_key(b"license-123", b"site-1", b"Acme Corp");
        assert_eq!(a, b);
    }

    #[test]
    fn different_sites_derive_different_keys() {
        let a = derive_key(b"license-123", b"site-1", b"Acme Corp");
        let b = derive_key(b"license-123", b"site-2", b"Acme Corp");
        assert_ne!(a, b);
    }

    #[test]
    fn different_licenses_derive_different_keys() {
        let a = derive_key(b"license-123", b"site-1", b"Acme Corp");
        let b = derive_key(b"license-456", b"site-1", b"Acme Corp");
        assert_ne!(a, b);
    }
}
