use std::time::Duration;

use clap::Parser;
use log::info;
use revenant_journal::derive_key;
use revenant_platform::SystemTopology;
use revenant_replay::{
    parse_disk_mappings, CalibrationTable, DiskMapping, ReplayControls, ReplayEngine, ReplayMode,
};

/// Drives CPU training or a replay run against a captured journal.
#[derive(Parser, Debug)]
#[command(name = "revenant-replay")]
struct Args {
    /// Train a fresh calibration table and write it to `calibration`
    /// instead of replaying. When absent, `calibration` is read.
    #[arg(long)]
    train: bool,

    /// Path to the calibration table JSON file (read for a replay run,
    /// written when `--train` is given).
    #[arg(long)]
    calibration: String,

    /// Fine-pass duration for training, in seconds.
    #[arg(long, default_value_t = 5)]
    fine_seconds: u64,

    /// Journal file to replay. Required unless `--train`.
    #[arg(long)]
    journal: Option<String>,

    /// License string used to derive the journal's decryption key.
    #[arg(long)]
    license: Option<String>,

    /// Site identifier the journal was written under.
    #[arg(long)]
    site: Option<u64>,

    /// Human-readable site name used in key derivation.
    #[arg(long)]
    site_name: Option<String>,

    /// Newline-delimited JSON disk mapping file (device, mount point,
    /// and a human-readable `readsize`). Only consulted when replaying
    /// disk activity.
    #[arg(long)]
    disk_mapping: Option<String>,

    /// Replay speed multiplier: >1 replays faster than it was
    /// captured.
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Busy-percentage scale multiplier applied before the calibration
    /// lookup.
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    /// Which worker pools to drive: all, cpu, memory, disk, cpu_memory.
    #[arg(long, default_value = "all")]
    mode: String,
}

fn parse_mode(s: &str) -> anyhow::Result<ReplayMode> {
    match s {
        "all" => Ok(ReplayMode::All),
        "cpu" => Ok(ReplayMode::Cpu),
        "memory" => Ok(ReplayMode::Memory),
        "disk" => Ok(ReplayMode::Disk),
        "cpu_memory" => Ok(ReplayMode::CpuMemory),
        other => anyhow::bail!("unknown replay mode `{other}`; expected all/cpu/memory/disk/cpu_memory"),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.train {
        return train(&args);
    }
    replay(&args)
}

fn train(args: &Args) -> anyhow::Result<()> {
    let topology = SystemTopology::detect();
    let interval = Duration::from_secs(1);
    let table = CalibrationTable::train(topology.logical_cores(), interval, Duration::from_secs(args.fine_seconds))?;
    let json = serde_json::to_string_pretty(&table)?;
    std::fs::write(&args.calibration, json)?;
    info!("wrote calibration table to {}", args.calibration);
    Ok(())
}

fn replay(args: &Args) -> anyhow::Result<()> {
    let journal = args.journal.as_ref().ok_or_else(|| anyhow::anyhow!("--journal is required for a replay run"))?;
    let license = args.license.as_ref().ok_or_else(|| anyhow::anyhow!("--license is required for a replay run"))?;
    let site = args.site.ok_or_else(|| anyhow::anyhow!("--site is required for a replay run"))?;
    let site_name = args.site_name.as_ref().ok_or_else(|| anyhow::anyhow!("--site-name is required for a replay run"))?;

    let key = derive_key(license.as_bytes(), &site.to_le_bytes(), site_name.as_bytes());
    let table: CalibrationTable = serde_json::from_str(&std::fs::read_to_string(&args.calibration)?)?;
    let disk_mappings: Vec<DiskMapping> = match &args.disk_mapping {
        Some(path) => parse_disk_mappings(&std::fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    let topology = SystemTopology::detect();
    let controls = ReplayControls {
        speed: args.speed,
        scale: args.scale,
        mode: parse_mode(&args.mode)?,
        ..ReplayControls::default()
    };
    let engine = ReplayEngine::new(table, topology, disk_mappings, controls);

    info!("replaying journal {journal} at speed={} scale={}", args.speed, args.scale);
    let (report, collectors) = engine.run(journal, key)?;
    print_receipt(&report, &collectors);
    Ok(())
}

fn print_receipt(
    report: &revenant_replay::ReplayReport,
    collectors: &std::collections::HashMap<&'static str, revenant_replay::ValidationCollector>,
) {
    println!("\n==================================================");
    println!("          REVENANT REPLAY RECEIPT                ");
    println!("==================================================");
    println!(" [ BLOCK 1: PACING ]");
    println!(" Rounds:        {}", report.rounds);
    println!(" Lagged rounds: {}", report.lagged_rounds);
    println!("--------------------------------------------------");
    println!(" [ BLOCK 2: WORKER POOLS ]");
    println!(" CPU dropped:    {}", report.cpu_dropped);
    println!(" CPU behind:     {}", report.cpu_behind);
    println!(" Memory dropped: {}", report.memory_dropped);
    println!(" Disk dropped:   {}", report.disk_dropped);
    println!("--------------------------------------------------");
    println!(" [ BLOCK 3: VALIDATION ]");
    for family in ["cpu", "memory"] {
        let Some(collector) = collectors.get(family) else { continue };
        match collector.stats() {
            Some(stats) => {
                let status = if stats.passes() { "PASS" } else { "FAIL" };
                println!(
                    " {:<8} {:<4} rmse={:.2} mae={:.2} within5%={:.1}% within10%={:.1}% corr={:.3} peak_err={:.1}%",
                    family,
                    status,
                    stats.rmse,
                    stats.mae,
                    stats.within_5_percent * 100.0,
                    stats.within_10_percent * 100.0,
                    stats.correlation,
                    stats.peak_error
                );
            }
            None => println!(" {family:<8} no samples collected"),
        }
    }
    println!("==================================================\n");
}
