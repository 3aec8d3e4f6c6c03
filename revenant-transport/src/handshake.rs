use snow::{Builder, Keypair, TransportState};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;
use crate::policy::PeerPolicy;
use crate::wire::{read_frame, write_frame, MAX_FRAME_LEN};

/// `IK`: the initiator already knows the responder's static key before
/// the handshake starts (it's how agents and the processor are
/// configured to find each other); the responder learns the
/// initiator's static key partway through and checks it against its
/// own `PeerPolicy`.
const NOISE_PATTERN: &str = "Noise_IK_25519_ChaChaPoly_BLAKE2s";

pub fn generate_keypair() -> Result<Keypair, TransportError> {
    Ok(Builder::new(NOISE_PATTERN.parse()?).generate_keypair()?)
}

/// Drives the initiator side of an IK handshake (one message each
/// way) over `stream`, then checks the now-known responder key
/// against `policy` as a belt-and-suspenders recheck even though IK
/// means the initiator chose that key up front.
pub async fn initiate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    local_keypair: &Keypair,
    remote_static_pubkey: &[u8],
    policy: &dyn PeerPolicy,
) -> Result<TransportState, TransportError> {
    if !policy.verify(remote_static_pubkey) {
        return Err(TransportError::PeerRejected);
    }

    let mut handshake = Builder::new(NOISE_PATTERN.parse()?)
        .local_private_key(&local_keypair.private)
        .remote_public_key(remote_static_pubkey)
        .build_initiator()?;

    let mut buf = vec![0u8; MAX_FRAME_LEN];

    let len = handshake.write_message(&[], &mut buf)?;
    write_frame(stream, &buf[..len]).await?;

    let msg = read_frame(stream).await?;
    handshake.read_message(&msg, &mut buf)?;

    Ok(handshake.into_transport_mode()?)
}

/// Drives the responder side of an IK handshake. Returns the
/// completed transport and the initiator's static key so the caller
/// can log or re-verify which peer connected.
pub async fn respond<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    local_keypair: &Keypair,
    policy: &dyn PeerPolicy,
) -> Result<(TransportState, Vec<u8>), TransportError> {
    let mut handshake = Builder::new(NOISE_PATTERN.parse()?)
        .local_private_key(&local_keypair.private)
        .build_responder()?;

    let mut buf = vec![0u8; MAX_FRAME_LEN];

    let msg = read_frame(stream).await?;
    handshake.read_message(&msg, &mut buf)?;

    let remote_static = handshake
        .get_remote_static()
        .expect("IK reveals the initiator's static key in message 1")
        .to_vec();
    if !policy.verify(&remote_static) {
        return Err(TransportError::PeerRejected);
    }

    let len = handshake.write_message(&[], &mut buf)?;
    write_frame(stream, &buf[..len]).await?;

    Ok((handshake.into_transport_mode()?, remote_static))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Insecure, Pinned};
    use tokio::io::duplex;

    #[tokio::test]
    async fn handshake_succeeds_with_pinned_keys_both_sides() {
        let initiator_kp = generate_keypair().unwrap();
        let responder_kp = generate_keypair().unwrap();

        let (mut client, mut server) = duplex(4096);

        let responder_pub = responder_kp.public.clone();
        let initiator_pub = initiator_kp.public.clone();

        let server_task = tokio::spawn(async move {
            let policy = Pinned::new(vec![initiator_pub.clone().try_into().unwrap()]);
            respond(&mut server, &responder_kp, &policy).await
        });

        let client_policy = Pinned::new(vec![responder_pub.clone().try_into().unwrap()]);
        let client_result = initiate(&mut client, &initiator_kp, &responder_pub, &client_policy).await;

        let server_result = server_task.await.unwrap();

        assert!(client_result.is_ok());
        assert!(server_result.is_ok());
    }

    #[tokio::test]
    async fn responder_rejects_unpinned_initiator() {
        let initiator_kp = generate_keypair().unwrap();
        let responder_kp = generate_keypair().unwrap();
        let (mut client, mut server) = duplex(4096);

        let responder_pub = responder_kp.public.clone();

        let server_task = tokio::spawn(async move {
            let policy = Pinned::new(vec![[0xffu8; 32]]);
            respond(&mut server, &responder_kp, &policy).await
        });

        let client_policy = Insecure;
        let _ = initiate(&mut client, &initiator_kp, &responder_pub, &client_policy).await;

        let server_result = server_task.await.unwrap();
        assert!(matches!(server_result, Err(TransportError::PeerRejected)));
    }
}
