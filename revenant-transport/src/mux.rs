use revenant_chan::Ctx;
use revenant_proto::{Command, Measurement, OobFrame};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::frame::SecureChannel;

/// One wire message over a multiplexed connection: either an OOB
/// command/reply (which the caller expects an ack or reply for) or a
/// bulk measurement (fire-and-forget).
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Envelope {
    Oob(OobFrame),
    Bulk(Measurement),
}

/// Drives one connection's single encrypted stream: a writer loop that
/// serializes outgoing OOB and bulk traffic into one sequence of Noise
/// messages, and dispatches inbound messages to the matching channel.
/// Runs until `ctx` is cancelled or the connection errors/closes.
pub struct Multiplexer {
    pub outgoing_oob: mpsc::Sender<OobFrame>,
    pub outgoing_bulk: mpsc::Sender<Measurement>,
    pub incoming_oob: mpsc::Receiver<OobFrame>,
    pub incoming_bulk: mpsc::Receiver<Measurement>,
}

enum Outgoing {
    Oob(OobFrame),
    Bulk(Measurement),
}

pub fn spawn<S>(channel: SecureChannel<S>, ctx: Ctx) -> (Multiplexer, JoinHandle<Result<(), TransportError>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outgoing_oob_tx, mut outgoing_oob_rx) = mpsc::channel::<OobFrame>(32);
    let (outgoing_bulk_tx, mut outgoing_bulk_rx) = mpsc::channel::<Measurement>(256);
    let (incoming_oob_tx, incoming_oob_rx) = mpsc::channel::<OobFrame>(32);
    let (incoming_bulk_tx, incoming_bulk_rx) = mpsc::channel::<Measurement>(256);

    let handle = tokio::spawn(async move {
        let mut channel = channel;
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),

                outgoing = outgoing_oob_rx.recv() => {
                    match outgoing {
                        Some(frame) => send_envelope(&mut channel, Outgoing::Oob(frame)).await?,
                        None => return Ok(()),
                    }
                }

                outgoing = outgoing_bulk_rx.recv() => {
                    match outgoing {
                        Some(measurement) => send_envelope(&mut channel, Outgoing::Bulk(measurement)).await?,
                        None => return Ok(()),
                    }
                }

                received = channel.recv() => {
                    let bytes = received?;
                    let envelope: Envelope = bincode::deserialize(&bytes)?;
                    match envelope {
                        Envelope::Oob(frame) => {
                            if incoming_oob_tx.send(frame).await.is_err() {
                                return Ok(());
                            }
                        }
                        Envelope::Bulk(measurement) => {
                            if incoming_bulk_tx.send(measurement).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    });

    (
        Multiplexer {
            outgoing_oob: outgoing_oob_tx,
            outgoing_bulk: outgoing_bulk_tx,
            incoming_oob: incoming_oob_rx,
            incoming_bulk: incoming_bulk_rx,
        },
        handle,
    )
}

async fn send_envelope<S: AsyncRead + AsyncWrite + Unpin>(
    channel: &mut SecureChannel<S>,
    outgoing: Outgoing,
) -> Result<(), TransportError> {
    let envelope = match outgoing {
        Outgoing::Oob(frame) => Envelope::Oob(frame),
        Outgoing::Bulk(measurement) => Envelope::Bulk(measurement),
    };
    let bytes = bincode::serialize(&envelope)?;
    channel.send(&bytes).await
}

/// Convenience for command-style OOB exchanges: sends one command
/// frame and nothing else. Full request/reply tag bookkeeping lives in
/// `revenant-agent`/`revenant-processor`, which own the tag space.
pub async fn send_command(tx: &mpsc::Sender<OobFrame>, tag: u64, command: Command) -> Result<(), TransportError> {
    tx.send(OobFrame::new(tag, command)).await.map_err(|_| TransportError::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{generate_keypair, initiate, respond};
    use crate::policy::Insecure;
    use chrono::Utc;
        use tokio::io::duplex;
    use tokio_util::sync::CancellationToken;

    fn measurement() -> Measurement {
        Measurement {
            timestamp: Utc::now(),
            start: Utc::now(),
            duration_nanos: 10,
            frequency_nanos: 1_000_000_000,
            system: "/proc/stat".to_string(),
            measurement: b"cpu 1 2 3".to_vec(),
        }
    }

    #[tokio::test]
    async fn carries_oob_and_bulk_traffic_on_one_connection() {
        let initiator_kp = generate_keypair().unwrap();
        let responder_kp = generate_keypair().unwrap();
        let responder_pub = responder_kp.public.clone();
        let (mut client_io, mut server_io) = duplex(16384);

        let server_task = tokio::spawn(async move {
            let t = respond(&mut server_io, &responder_kp, &Insecure).await.unwrap().0;
            (t, server_io)
        });
        let client_transport = initiate(&mut client_io, &initiator_kp, &responder_pub, &Insecure).await.unwrap();
        let (server_transport, server_io) = server_task.await.unwrap();

        let ctx = CancellationToken::new();
        let (mut client_mux, _client_handle) = spawn(SecureChannel::new(client_io, client_transport), ctx.clone());
        let (mut server_mux, _server_handle) = spawn(SecureChannel::new(server_io, server_transport), ctx.clone());

        client_mux.outgoing_oob.send(OobFrame::new(1, Command::StatusCollection)).await.unwrap();
        client_mux.outgoing_bulk.send(measurement()).await.unwrap();

        let received_oob = server_mux.incoming_oob.recv().await.unwrap();
        assert_eq!(received_oob.tag, 1);
        assert!(matches!(received_oob.command, Command::StatusCollection));

        let received_bulk = server_mux.incoming_bulk.recv().await.unwrap();
        assert_eq!(received_bulk.system, "/proc/stat");

        ctx.cancel();
    }
}
