/// Decides whether a peer's Noise static public key is acceptable.
/// Checked by the responder against the initiator's key (revealed
/// partway through the IK handshake) and, on the initiator side,
/// against the key the operator configured for that agent.
pub trait PeerPolicy: Send + Sync {
    fn verify(&self, remote_static_pubkey: &[u8]) -> bool;
}

/// Accepts only keys on an explicit allow-list, keyed by the raw
/// 32-byte Curve25519 public key.
#[derive(Debug, Clone, Default)]
pub struct Pinned {
    allowed: Vec<[u8; 32]>,
}

impl Pinned {
    pub fn new(allowed: Vec<[u8; 32]>) -> Self {
        Self { allowed }
    }
}

impl PeerPolicy for Pinned {
    fn verify(&self, remote_static_pubkey: &[u8]) -> bool {
        remote_static_pubkey.len() == 32 && self.allowed.iter().any(|k| k == remote_static_pubkey)
    }
}

/// Accepts any peer key. Only ever wired up for local integration
/// tests and the harness binary — never for a real agent/processor
/// link.
#[derive(Debug, Clone, Copy, Default)]
pub struct Insecure;

impl PeerPolicy for Insecure {
    fn verify(&self, _remote_static_pubkey: &[u8]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_rejects_unknown_key() {
        let policy = Pinned::new(vec![[1u8; 32]]);
        assert!(!policy.verify(&[2u8; 32]));
        assert!(policy.verify(&[1u8; 32]));
    }

    #[test]
    fn insecure_accepts_anything() {
        assert!(Insecure.verify(&[9u8; 32]));
    }
}
