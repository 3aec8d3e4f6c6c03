use std::sync::Arc;

use clap::Parser;
use log::info;
use revenant_chan::Ctx;
use revenant_processor::{journal_writer_for_site, AgentEndpoint, BackoffConfig, NullRecordSink};
use revenant_transport::{generate_keypair, Pinned};

/// Processor: connects out to one collector agent, registers itself as
/// its sink, and archives everything it receives into an encrypted
/// journal.
#[derive(Parser, Debug)]
#[command(name = "revenant-processor")]
struct Args {
    /// Agent address to dial, e.g. `10.0.0.4:7300`.
    #[arg(long)]
    agent: String,

    /// Hex-encoded 32-byte static key the agent must present. When
    /// omitted, any agent is accepted (test-only).
    #[arg(long)]
    pin_agent_key: Option<String>,

    /// Site identifier this agent belongs to.
    #[arg(long)]
    site: u64,

    /// Numeric host identifier within the site.
    #[arg(long)]
    host: u64,

    /// Human-readable site name, combined with the license to derive
    /// the journal's encryption key.
    #[arg(long)]
    site_name: String,

    /// License string used in journal key derivation.
    #[arg(long)]
    license: String,

    /// Path to the journal file this processor appends to.
    #[arg(long)]
    journal_path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let local_keypair = Arc::new(generate_keypair()?);
    info!("processor static public key: {}", hex_encode(&local_keypair.public));

    let remote_static_pubkey = match &args.pin_agent_key {
        Some(hex) => decode_hex_key(hex)?.to_vec(),
        None => {
            anyhow::bail!("--pin-agent-key is required: IK needs the agent's static key up front");
        }
    };
    let policy: Arc<dyn revenant_transport::PeerPolicy> = Arc::new(Pinned::new(vec![remote_static_pubkey.clone().try_into().map_err(|_| anyhow::anyhow!("pinned key must be 32 bytes"))?]));

    let journal = Arc::new(journal_writer_for_site(&args.journal_path, args.license.as_bytes(), args.site, &args.site_name)?);
    let records = Arc::new(NullRecordSink);

    let endpoint = AgentEndpoint {
        addr: args.agent.clone(),
        remote_static_pubkey,
        policy,
        site: args.site,
        host: args.host,
    };

    let ctx = Ctx::new();
    let ctrl_ctx = ctx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_ctx.cancel();
    });

    info!("processor connecting to agent at {}", args.agent);
    revenant_processor::run(ctx, endpoint, local_keypair, journal, records, BackoffConfig::default()).await;
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
