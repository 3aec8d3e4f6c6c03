use snow::TransportState;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;
use crate::wire::{read_frame, write_frame, MAX_FRAME_LEN};

/// One handshake-completed Noise session over an async duplex stream.
/// Each `send`/`recv` call is one Noise transport message: the
/// plaintext is encrypted, framed with a 2-byte length prefix, and
/// written whole (or read and decrypted the same way).
pub struct SecureChannel<S> {
    stream: S,
    transport: TransportState,
}

impl<S: AsyncRead + AsyncWrite + Unpin> SecureChannel<S> {
    pub fn new(stream: S, transport: TransportState) -> Self {
        Self { stream, transport }
    }

    pub async fn send(&mut self, plaintext: &[u8]) -> Result<(), TransportError> {
        let mut ciphertext = vec![0u8; MAX_FRAME_LEN];
        let len = self.transport.write_message(plaintext, &mut ciphertext)?;
        write_frame(&mut self.stream, &ciphertext[..len]).await
    }

    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let frame = read_frame(&mut self.stream).await?;
        let mut plaintext = vec![0u8; MAX_FRAME_LEN];
        let len = self.transport.read_message(&frame, &mut plaintext)?;
        plaintext.truncate(len);
        Ok(plaintext)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{generate_keypair, initiate, respond};
    use crate::policy::Insecure;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_an_encrypted_message() {
        let initiator_kp = generate_keypair().unwrap();
        let responder_kp = generate_keypair().unwrap();
        let responder_pub = responder_kp.public.clone();

        let (mut client_io, mut server_io) = duplex(8192);

        let server_task = tokio::spawn(async move {
            respond(&mut server_io, &responder_kp, &Insecure).await.map(|(t, _)| (t, server_io))
        });
        let client_transport = initiate(&mut client_io, &initiator_kp, &responder_pub, &Insecure).await.unwrap();
        let (server_transport, server_io) = server_task.await.unwrap().unwrap();

        let mut client = SecureChannel::new(client_io, client_transport);
        let mut server = SecureChannel::new(server_io, server_transport);

        client.send(b"hello agent").await.unwrap();
        let received = server.recv().await.unwrap();
        assert_eq!(received, b"hello agent");

        server.send(b"hello processor").await.unwrap();
        let received = client.recv().await.unwrap();
        assert_eq!(received, b"hello processor");
    }
}
