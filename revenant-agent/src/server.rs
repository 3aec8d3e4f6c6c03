use std::sync::Arc;

use log::{info, warn};
use revenant_chan::Ctx;
use revenant_proto::OobFrame;
use revenant_transport::{PeerPolicy, SecureChannel};
use snow::Keypair;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::session::Session;

/// Accepts processor connections on `listener`, one at a time in
/// practice (an agent expects exactly one registered sink), handling
/// each with its own Noise responder handshake and multiplexer.
pub async fn serve(listener: TcpListener, keypair: Arc<Keypair>, policy: Arc<dyn PeerPolicy>, session: Arc<Mutex<Session>>, ctx: Ctx) {
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        info!("accepted connection from {addr}");
                        let keypair = keypair.clone();
                        let policy = policy.clone();
                        let session = session.clone();
                        let ctx = ctx.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, keypair, policy, session, ctx).await {
                                warn!("connection from {addr} ended: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    keypair: Arc<Keypair>,
    policy: Arc<dyn PeerPolicy>,
    session: Arc<Mutex<Session>>,
    ctx: Ctx,
) -> anyhow::Result<()> {
    let (transport, _remote_static) = revenant_transport::respond(&mut stream, &keypair, policy.as_ref()).await?;
    let channel = SecureChannel::new(stream, transport);
    let (mut mux, handle) = revenant_transport::spawn_multiplexer(channel, ctx.clone());

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            incoming = mux.incoming_oob.recv() => {
                let Some(frame) = incoming else { break };
                let reply_command = {
                    let mut session = session.lock().await;
                    session.handle(frame.command, mux.outgoing_bulk.clone()).await
                };
                if mux.outgoing_oob.send(OobFrame::new(frame.tag, reply_command)).await.is_err() {
                    break;
                }
            }
        }
    }

    handle.abort();
    Ok(())
}
