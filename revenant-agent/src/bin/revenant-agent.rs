use std::sync::Arc;

use clap::Parser;
use log::info;
use revenant_agent::{serve, Session};
use revenant_chan::Ctx;
use revenant_transport::{generate_keypair, Insecure, Pinned};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

/// Collector agent: reads configured host metrics on a schedule and
/// streams them to a processor over an encrypted connection.
#[derive(Parser, Debug)]
#[command(name = "revenant-agent")]
struct Args {
    /// Address to listen on for the processor connection.
    #[arg(long, default_value = "0.0.0.0:7300")]
    listen: String,

    /// Hex-encoded 32-byte public key the processor must present.
    /// When omitted, any processor is accepted (test-only).
    #[arg(long)]
    pin_processor_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let topology = revenant_platform::SystemTopology::detect();
    info!("agent starting with {} logical core(s)", topology.logical_cores());

    let keypair = Arc::new(generate_keypair()?);
    info!("agent static public key: {}", hex_encode(&keypair.public));

    let policy: Arc<dyn revenant_transport::PeerPolicy> = match args.pin_processor_key {
        Some(hex) => Arc::new(Pinned::new(vec![decode_hex_key(&hex)?])),
        None => Arc::new(Insecure),
    };

    let ctx = Ctx::new();
    let (sink_tx, sink_rx) = mpsc::channel(64);
    tokio::spawn(revenant_agent::sink::run(ctx.clone(), 1024, sink_rx));
    let session = Arc::new(Mutex::new(Session::new(ctx.clone(), sink_tx)));

    let listener = TcpListener::bind(&args.listen).await?;
    info!("agent listening on {}", args.listen);

    let ctrl_ctx = ctx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_ctx.cancel();
    });

    serve(listener, keypair, policy, session, ctx).await;
    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!("expected a 64-character hex string (32 bytes)");
    }
    let mut key = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let byte_str = std::str::from_utf8(chunk)?;
        key[i] = u8::from_str_radix(byte_str, 16)?;
    }
    Ok(key)
}
