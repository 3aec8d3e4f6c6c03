//! End-to-end smoke test: drives a real collector agent, a real
//! processor, and a real replay run against the journal they produce
//! together, all inside one process. Exercises the seams that a unit
//! test never crosses a process boundary for: the Noise handshake,
//! the multiplexed wire format, the encrypted journal, and the
//! calibration/replay pipeline that reads it back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use revenant_chan::Ctx;
use revenant_journal::derive_key;
use revenant_platform::SystemTopology;
use revenant_processor::{journal_writer_for_site, AgentEndpoint, BackoffConfig, NullRecordSink};
use revenant_proto::{Command, OobFrame, StartCollectionRequest};
use revenant_replay::{CalibrationTable, ReplayControls, ReplayEngine, ReplayMode};
use revenant_transport::{generate_keypair, Insecure, SecureChannel};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// Runs one agent/processor/replay cycle against local `/proc` reads
/// and prints a pass/fail receipt.
#[derive(Parser, Debug)]
#[command(name = "revenant-harness")]
struct Args {
    /// How long to let the agent/processor pair collect before
    /// replaying what they captured.
    #[arg(long, default_value_t = 10)]
    duration_seconds: u64,

    /// Collection frequency for the smoke run.
    #[arg(long, default_value_t = 1000)]
    frequency_millis: u64,

    /// System paths to collect and then replay.
    #[arg(long, value_delimiter = ',', default_value = "/proc/stat,/proc/meminfo")]
    systems: Vec<String>,

    /// Fine-pass duration for CPU calibration training.
    #[arg(long, default_value_t = 2)]
    fine_seconds: u64,

    /// Keep the temporary journal file around after the run instead of
    /// deleting it with the rest of the scratch directory.
    #[arg(long)]
    keep_journal: bool,
}

const LICENSE: &[u8] = b"revenant-harness-local-smoke-test";
const SITE: u64 = 1;
const SITE_NAME: &str = "harness";
const HOST: u64 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let scratch = tempfile::tempdir()?;
    let journal_path = scratch.path().join("harness.journal");

    let topology = SystemTopology::detect();
    let logical_cores = topology.logical_cores();

    let (agent_addr, agent_ctx, agent_pubkey) = spawn_agent().await?;
    info!("harness: agent listening on {agent_addr}");

    let journal = Arc::new(journal_writer_for_site(&journal_path, LICENSE, SITE, SITE_NAME)?);
    let processor_ctx = Ctx::new();
    let processor_keypair = Arc::new(generate_keypair()?);
    let endpoint = AgentEndpoint {
        addr: agent_addr.to_string(),
        remote_static_pubkey: agent_pubkey.clone(),
        policy: Arc::new(Insecure),
        site: SITE,
        host: HOST,
    };
    let processor_handle = tokio::spawn(revenant_processor::run(
        processor_ctx.clone(),
        endpoint,
        processor_keypair,
        journal.clone(),
        Arc::new(NullRecordSink),
        BackoffConfig::default(),
    ));

    // Give the processor a moment to register itself as the agent's
    // sink before the control connection starts collection.
    tokio::time::sleep(Duration::from_millis(200)).await;
    start_collection(&agent_addr, &agent_pubkey, args.frequency_millis, args.systems.clone()).await?;
    info!("harness: collecting for {}s", args.duration_seconds);
    tokio::time::sleep(Duration::from_secs(args.duration_seconds)).await;

    processor_ctx.cancel();
    agent_ctx.cancel();
    let _ = processor_handle.await;
    drop(journal);

    info!("harness: training calibration table ({}s fine pass)", args.fine_seconds);
    let table = CalibrationTable::train(logical_cores, Duration::from_secs(1), Duration::from_secs(args.fine_seconds))?;

    let key = derive_key(LICENSE, &SITE.to_le_bytes(), SITE_NAME.as_bytes());
    let controls = ReplayControls { mode: ReplayMode::CpuMemory, ..ReplayControls::default() };
    let engine = ReplayEngine::new(table, topology, Vec::new(), controls);

    info!("harness: replaying {}", journal_path.display());
    let (report, collectors) = engine.run(&journal_path, key)?;
    print_receipt(&journal_path, &report, &collectors);

    if args.keep_journal {
        let kept: PathBuf = std::env::current_dir()?.join("harness.journal");
        std::fs::copy(&journal_path, &kept)?;
        info!("harness: journal kept at {}", kept.display());
    }

    Ok(())
}

/// Spins up one in-process agent on an ephemeral port: keypair, sink
/// actor, session, and the accept loop. Returns its address and static
/// public key so the processor and the control connection can dial it.
async fn spawn_agent() -> anyhow::Result<(std::net::SocketAddr, Ctx, Vec<u8>)> {
    let keypair = Arc::new(generate_keypair()?);
    let pubkey = keypair.public.clone();
    let ctx = Ctx::new();

    let (sink_tx, sink_rx) = tokio::sync::mpsc::channel(64);
    tokio::spawn(revenant_agent::sink::run(ctx.clone(), 1024, sink_rx));
    let session = Arc::new(Mutex::new(revenant_agent::Session::new(ctx.clone(), sink_tx)));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let policy: Arc<dyn revenant_transport::PeerPolicy> = Arc::new(Insecure);
    tokio::spawn(revenant_agent::serve(listener, keypair, policy, session, ctx.clone()));

    Ok((addr, ctx, pubkey))
}

/// Opens a short-lived control connection to the agent, separate from
/// the processor's sink connection, and issues `StartCollection` on
/// it. An agent's `Session` is shared across connections, so any
/// handshaked peer can drive its lifecycle this way.
async fn start_collection(agent_addr: &std::net::SocketAddr, agent_pubkey: &[u8], frequency_millis: u64, systems: Vec<String>) -> anyhow::Result<()> {
    let control_keypair = generate_keypair()?;
    let mut stream = TcpStream::connect(agent_addr).await?;
    let transport = revenant_transport::initiate(&mut stream, &control_keypair, agent_pubkey, &Insecure).await?;
    let channel = SecureChannel::new(stream, transport);
    let ctx = Ctx::new();
    let (mut mux, handle) = revenant_transport::spawn_multiplexer(channel, ctx.clone());

    let request = StartCollectionRequest { frequency_millis, systems, queue_depth: 64 };
    mux.outgoing_oob.send(OobFrame::new(1, Command::StartCollection(request))).await.map_err(|_| anyhow::anyhow!("agent connection closed before StartCollection"))?;
    match mux.incoming_oob.recv().await {
        Some(OobFrame { command: Command::Ack, .. }) => {}
        Some(OobFrame { command: Command::Error { message }, .. }) => anyhow::bail!("agent rejected StartCollection: {message}"),
        _ => anyhow::bail!("agent connection closed before acking StartCollection"),
    }

    ctx.cancel();
    handle.abort();
    Ok(())
}

fn print_receipt(
    journal_path: &std::path::Path,
    report: &revenant_replay::ReplayReport,
    collectors: &std::collections::HashMap<&'static str, revenant_replay::ValidationCollector>,
) {
    println!("\n==================================================");
    println!("          REVENANT HARNESS RECEIPT               ");
    println!("==================================================");
    println!(" [ BLOCK 1: PIPELINE ]");
    println!(" Journal:       {}", journal_path.display());
    println!(" Rounds:        {}", report.rounds);
    println!(" Lagged rounds: {}", report.lagged_rounds);
    println!("--------------------------------------------------");
    println!(" [ BLOCK 2: WORKER POOLS ]");
    println!(" CPU dropped:    {}", report.cpu_dropped);
    println!(" CPU behind:     {}", report.cpu_behind);
    println!(" Memory dropped: {}", report.memory_dropped);
    println!("--------------------------------------------------");
    println!(" [ BLOCK 3: VALIDATION ]");
    let mut overall_pass = true;
    for family in ["cpu", "memory"] {
        let Some(collector) = collectors.get(family) else { continue };
        match collector.stats() {
            Some(stats) => {
                let passed = stats.passes();
                overall_pass &= passed;
                let status = if passed { "PASS" } else { "FAIL" };
                println!(
                    " {:<8} {:<4} samples={} rmse={:.2} within5%={:.1}% within10%={:.1}% corr={:.3}",
                    family,
                    status,
                    collector.len(),
                    stats.rmse,
                    stats.within_5_percent * 100.0,
                    stats.within_10_percent * 100.0,
                    stats.correlation
                );
            }
            None => {
                overall_pass = false;
                println!(" {family:<8} no samples collected");
            }
        }
    }
    println!("--------------------------------------------------");
    println!(" [ BLOCK 4: OVERALL ]");
    println!(" Status: {}", if overall_pass { "PASS" } else { "FAIL" });
    println!("==================================================\n");
}
