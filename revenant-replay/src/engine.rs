use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{info, warn};
use revenant_journal::JournalReader;
use revenant_platform::SystemTopology;
use revenant_proc::{DifferentiatedRecord, Differentiator, SysfsNicCapability};
use revenant_proto::SeriesKey;

use crate::calibration::CalibrationTable;
use crate::disk_mapping::DiskMapping;
use crate::error::ReplayError;
use crate::pools::{CpuPool, DiskPool, MemoryPool};
use crate::validation::ValidationCollector;

/// Which worker pools a run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    All,
    Cpu,
    Memory,
    Disk,
    CpuMemory,
}

impl ReplayMode {
    fn wants_cpu(self) -> bool {
        matches!(self, Self::All | Self::Cpu | Self::CpuMemory)
    }

    fn wants_memory(self) -> bool {
        matches!(self, Self::All | Self::Memory | Self::CpuMemory)
    }

    fn wants_disk(self) -> bool {
        matches!(self, Self::All | Self::Disk)
    }
}

pub struct ReplayControls {
    pub speed: f64,
    pub scale: f64,
    pub mode: ReplayMode,
    pub send_deadline: Duration,
    /// Bounds one device's disk batch; defaults to the tick's own
    /// adjusted interval when unset.
    pub disk_timeout: Option<Duration>,
}

impl Default for ReplayControls {
    fn default() -> Self {
        Self {
            speed: 1.0,
            scale: 1.0,
            mode: ReplayMode::All,
            send_deadline: Duration::from_millis(100),
            disk_timeout: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayReport {
    pub rounds: u64,
    pub lagged_rounds: u64,
    pub cpu_dropped: u64,
    pub cpu_behind: u64,
    pub memory_dropped: u64,
    pub disk_dropped: u64,
}

pub struct ReplayEngine {
    table: CalibrationTable,
    topology: SystemTopology,
    disk_mappings: Vec<DiskMapping>,
    controls: ReplayControls,
}

impl ReplayEngine {
    pub fn new(
        table: CalibrationTable,
        topology: SystemTopology,
        disk_mappings: Vec<DiskMapping>,
        controls: ReplayControls,
    ) -> Self {
        Self { table, topology, disk_mappings, controls }
    }

    /// Replays one journal file end to end: discovers the active
    /// system set, walks records in rounds (one per distinct system),
    /// dispatches each round to its worker pool, and paces rounds on
    /// a monotonic ticker derived from `source_frequency / speed`.
    pub fn run(
        &self,
        journal_path: impl AsRef<Path>,
        key: [u8; 32],
    ) -> Result<(ReplayReport, HashMap<&'static str, ValidationCollector>), ReplayError> {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
        rt.block_on(self.run_async(journal_path, key))
    }

    async fn run_async(
        &self,
        journal_path: impl AsRef<Path>,
        key: [u8; 32],
    ) -> Result<(ReplayReport, HashMap<&'static str, ValidationCollector>), ReplayError> {
        let seen = discover_seen_set(journal_path.as_ref(), key)?;
        info!("replay: discovered {} distinct series in journal", seen.len());
        if seen.is_empty() {
            warn!("journal contains no recognized series; nothing to replay");
        }

        let cpu_pool = self.controls.mode.wants_cpu().then(|| CpuPool::spawn(self.topology.logical_cores()));
        let memory_pool = self.controls.mode.wants_memory().then(MemoryPool::spawn);
        let disk_pool = self.controls.mode.wants_disk().then(|| DiskPool::spawn(&self.disk_mappings));

        let mut collectors: HashMap<&'static str, ValidationCollector> = HashMap::new();
        collectors.insert("cpu", ValidationCollector::new());
        collectors.insert("memory", ValidationCollector::new());

        let mut report = ReplayReport::default();
        let mut differentiator = Differentiator::new(SysfsNicCapability);
        let mut observer = Differentiator::new(SysfsNicCapability);
        let observer_key = SeriesKey::new(0, 0, 0, "/proc/stat");
        let observer_mem_key = SeriesKey::new(0, 0, 0, "/proc/meminfo");

        let mut round: HashMap<String, DifferentiatedRecord> = HashMap::new();
        let mut round_systems: HashSet<String> = HashSet::new();
        let mut adjusted_interval = Duration::from_millis(1);
        let mut next_tick: Option<Instant> = None;
        let mut pending_cpu_target: Option<f64> = None;
        let mut pending_mem_target: Option<f64> = None;

        let reader = JournalReader::open(journal_path.as_ref(), key)?;
        for entry in reader {
            let entry = entry?;
            let system = entry.measurement.system.clone();
            let series_key = SeriesKey::new(entry.site, entry.host, entry.run, system.clone());
            let text = String::from_utf8_lossy(&entry.measurement.measurement).into_owned();

            if next_tick.is_none() {
                let freq_nanos = entry.measurement.frequency.max(1_000_000) as u64;
                adjusted_interval = adjust_interval(Duration::from_nanos(freq_nanos), self.controls.speed);
                next_tick = Some(Instant::now() + adjusted_interval);
            }

            if round_systems.contains(&system) {
                self.pace_and_dispatch(
                    &round,
                    &cpu_pool,
                    &memory_pool,
                    &disk_pool,
                    adjusted_interval,
                    &mut next_tick,
                    &mut report,
                )
                .await;
                observe_actuals(
                    &mut observer,
                    &observer_key,
                    &observer_mem_key,
                    &mut pending_cpu_target,
                    &mut pending_mem_target,
                    &mut collectors,
                );
                round.clear();
                round_systems.clear();
            }
            round_systems.insert(system.clone());

            match differentiator.advance(series_key, &system, &text, entry.measurement.timestamp) {
                Ok(Some(record)) => {
                    if system == "/proc/stat" {
                        pending_cpu_target = aggregate_busy(&record);
                    } else if system == "/proc/meminfo" {
                        pending_mem_target = mem_used(&record);
                    }
                    round.insert(system, record);
                }
                Ok(None) => {}
                Err(e) => warn!("replay: could not parse journal record for {system}: {e}"),
            }
        }

        if !round.is_empty() {
            self.pace_and_dispatch(
                &round,
                &cpu_pool,
                &memory_pool,
                &disk_pool,
                adjusted_interval,
                &mut next_tick,
                &mut report,
            )
            .await;
            observe_actuals(
                &mut observer,
                &observer_key,
                &observer_mem_key,
                &mut pending_cpu_target,
                &mut pending_mem_target,
                &mut collectors,
            );
        }

        if let Some(pool) = &cpu_pool {
            report.cpu_dropped = pool.dropped();
            report.cpu_behind = pool.behind_count();
        }
        if let Some(pool) = &memory_pool {
            report.memory_dropped = pool.dropped();
        }
        if let Some(pool) = &disk_pool {
            report.disk_dropped = pool.dropped();
        }

        Ok((report, collectors))
    }

    #[allow(clippy::too_many_arguments)]
    async fn pace_and_dispatch(
        &self,
        round: &HashMap<String, DifferentiatedRecord>,
        cpu_pool: &Option<CpuPool>,
        memory_pool: &Option<MemoryPool>,
        disk_pool: &Option<DiskPool>,
        interval: Duration,
        next_tick: &mut Option<Instant>,
        report: &mut ReplayReport,
    ) {
        if let Some(pool) = cpu_pool {
            if let Some(DifferentiatedRecord::Stat(records)) = round.get("/proc/stat") {
                pool.dispatch(records, &self.table, self.controls.scale, interval, self.topology.hyperthreaded(), self.controls.send_deadline)
                    .await;
            }
        }
        if let Some(pool) = memory_pool {
            if let Some(DifferentiatedRecord::Mem(mem)) = round.get("/proc/meminfo") {
                pool.dispatch(mem, self.controls.send_deadline).await;
            }
        }
        if let Some(pool) = disk_pool {
            if let Some(DifferentiatedRecord::Disk(records)) = round.get("/proc/diskstats") {
                let timeout = self.controls.disk_timeout.unwrap_or(interval);
                pool.dispatch(records, self.controls.send_deadline, timeout).await;
            }
        }

        report.rounds += 1;
        if let Some(tick) = *next_tick {
            let now = Instant::now();
            if now >= tick {
                report.lagged_rounds += 1;
                *next_tick = Some(now + interval);
            } else {
                tokio::time::sleep(tick - now).await;
                *next_tick = Some(tick + interval);
            }
        }
    }
}

fn adjust_interval(source_frequency: Duration, speed: f64) -> Duration {
    let scaled = source_frequency.as_secs_f64() / speed.max(f64::MIN_POSITIVE);
    Duration::from_secs_f64(scaled.max(0.001))
}

fn aggregate_busy(record: &DifferentiatedRecord) -> Option<f64> {
    let DifferentiatedRecord::Stat(records) = record else { return None };
    records.iter().find(|r| r.cpu_id == -1).map(|r| 100.0 - r.idle)
}

fn mem_used(record: &DifferentiatedRecord) -> Option<f64> {
    let DifferentiatedRecord::Mem(mem) = record else { return None };
    Some(mem.mem_used as f64)
}

/// Reads the replaying host's own current `/proc/stat`/`/proc/meminfo`
/// and, once the observer differentiator is primed, pairs the result
/// with whatever target the previous round set, feeding the validation
/// collectors.
fn observe_actuals(
    observer: &mut Differentiator<SysfsNicCapability>,
    stat_key: &SeriesKey,
    mem_key: &SeriesKey,
    pending_cpu_target: &mut Option<f64>,
    pending_mem_target: &mut Option<f64>,
    collectors: &mut HashMap<&'static str, ValidationCollector>,
) {
    let now = Utc::now();
    let timestamp_millis = now.timestamp_millis();

    if let Some(target) = pending_cpu_target.take() {
        if let Ok(text) = std::fs::read_to_string("/proc/stat") {
            if let Ok(Some(record)) = observer.advance(stat_key.clone(), "/proc/stat", &text, now) {
                if let Some(actual) = aggregate_busy(&record) {
                    collectors.get_mut("cpu").unwrap().record(timestamp_millis, target, actual);
                }
            }
        }
    }
    if let Some(target) = pending_mem_target.take() {
        if let Ok(text) = std::fs::read_to_string("/proc/meminfo") {
            if let Ok(Some(record)) = observer.advance(mem_key.clone(), "/proc/meminfo", &text, now) {
                if let Some(actual) = mem_used(&record) {
                    collectors.get_mut("memory").unwrap().record(timestamp_millis, target, actual);
                }
            }
        }
    }
}

fn discover_seen_set(path: &Path, key: [u8; 32]) -> Result<HashSet<String>, ReplayError> {
    let reader = JournalReader::open(path, key)?;
    let mut seen = HashSet::new();
    for entry in reader {
        let entry = entry?;
        seen.insert(entry.measurement.system);
    }
    Ok(seen)
}
