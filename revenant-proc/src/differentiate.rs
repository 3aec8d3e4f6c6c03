use std::collections::HashMap;

use chrono::{DateTime, Utc};
use revenant_proto::SeriesKey;

use crate::nic::NicCapability;
use crate::parse::{self, CpuTicks, DiskStatsSnapshot, NetDevSnapshot, ParseError, StatSnapshot};
use crate::records::{clamp_pct, delta_u64, DifferentiatedRecord, DiskStat, MemInfo, NetDev, StatRecord};

/// The system paths the differentiator recognizes. `/proc/cpuinfo` is
/// parsed (see [`parse::parse_cpuinfo`]) but doesn't belong to any of
/// the four differentiated record families, so it isn't routed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Stat,
    Mem,
    Net,
    Disk,
}

fn classify(system: &str) -> Option<Family> {
    match system {
        "/proc/stat" => Some(Family::Stat),
        "/proc/meminfo" => Some(Family::Mem),
        "/proc/net/dev" => Some(Family::Net),
        "/proc/diskstats" => Some(Family::Disk),
        _ => None,
    }
}

#[derive(Debug, Clone)]
enum RawSnapshot {
    Stat(StatSnapshot),
    Mem(HashMap<String, u64>),
    Net(NetDevSnapshot),
    Disk(DiskStatsSnapshot),
}

/// Turns successive raw `/proc` reads for one series into the
/// differentiated records, keeping per-series-key
/// priming state so the first read of a series is silently absorbed
/// (the series's first read never emits a record).
pub struct Differentiator<N: NicCapability> {
    prev: HashMap<SeriesKey, (RawSnapshot, DateTime<Utc>)>,
    nic: N,
}

impl<N: NicCapability> Differentiator<N> {
    pub fn new(nic: N) -> Self {
        Self { prev: HashMap::new(), nic }
    }

    /// Feeds one raw snapshot read for `key`/`system` at time `now`.
    /// Returns `None` when this is the series' priming read or when
    /// `system` isn't one of the four recognized families.
    pub fn advance(
        &mut self,
        key: SeriesKey,
        system: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DifferentiatedRecord>, ParseError> {
        let Some(family) = classify(system) else {
            return Ok(None);
        };
        let raw = match family {
            Family::Stat => RawSnapshot::Stat(parse::parse_stat(text)?),
            Family::Mem => RawSnapshot::Mem(parse::parse_meminfo(text)?),
            Family::Net => RawSnapshot::Net(parse::parse_net_dev(text)?),
            Family::Disk => RawSnapshot::Disk(parse::parse_diskstats(text)?),
        };

        let Some((prev_raw, prev_time)) = self.prev.insert(key.clone(), (raw.clone(), now)) else {
            return Ok(None);
        };

        let interval_seconds = (now - prev_time).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
        let interval_seconds = if interval_seconds > 0.0 { interval_seconds } else { f64::MIN_POSITIVE };

        let record = match (prev_raw, raw) {
            (RawSnapshot::Stat(p), RawSnapshot::Stat(c)) => DifferentiatedRecord::Stat(cube_stat(&p, &c)),
            (RawSnapshot::Mem(m), RawSnapshot::Mem(_)) => DifferentiatedRecord::Mem(cube_meminfo(&m)),
            (RawSnapshot::Net(p), RawSnapshot::Net(c)) => {
                DifferentiatedRecord::Net(cube_netdev(&p, &c, interval_seconds, &self.nic))
            }
            (RawSnapshot::Disk(p), RawSnapshot::Disk(c)) => {
                DifferentiatedRecord::Disk(cube_diskstats(&p, &c, interval_seconds))
            }
            _ => unreachable!("family classification guarantees matching raw variants"),
        };
        Ok(Some(record))
    }
}

/// CPU tick percentages for one interval (worked example
/// S1). All fields are fractions of `total_delta`, clamped to
/// `[0, 100]`; a zero `total_delta` (no time actually elapsed on this
/// CPU) reports 100% idle rather than dividing by zero.
fn cube_one_cpu(cpu_id: i32, p: &CpuTicks, c: &CpuTicks) -> StatRecord {
    let d_user = delta_u64(c.user, p.user);
    let d_nice = delta_u64(c.nice, p.nice);
    let d_system = delta_u64(c.system, p.system);
    let d_iowait = delta_u64(c.iowait, p.iowait);
    let d_steal = delta_u64(c.steal, p.steal);
    let d_idle = delta_u64(c.idle, p.idle);
    let d_irq = delta_u64(c.irq, p.irq);
    let d_softirq = delta_u64(c.softirq, p.softirq);

    let total = d_user + d_nice + d_system + d_iowait + d_steal + d_idle + d_irq + d_softirq;
    if total == 0 {
        return StatRecord { cpu_id, user_t: 0.0, nice: 0.0, system: 0.0, iowait: 0.0, steal: 0.0, idle: 100.0 };
    }
    let pct = |d: u64| clamp_pct(d as f64 / total as f64 * 100.0);
    StatRecord {
        cpu_id,
        user_t: pct(d_user),
        nice: pct(d_nice),
        system: pct(d_system),
        iowait: pct(d_iowait),
        steal: pct(d_steal),
        idle: pct(d_idle),
    }
}

fn cube_stat(prev: &StatSnapshot, curr: &StatSnapshot) -> Vec<StatRecord> {
    let mut ids: Vec<i32> = curr.cpus.keys().copied().filter(|id| prev.cpus.contains_key(id)).collect();
    ids.sort_unstable();
    ids.into_iter()
        .map(|id| cube_one_cpu(id, &prev.cpus[&id], &curr.cpus[&id]))
        .collect()
}

/// Non-differential memory snapshot. Only
/// the current read is used; `Commit` and `Committed_AS` are both
/// accepted as the commit-charge key since real kernels only expose
/// the latter while some reference fixtures use the former.
fn cube_meminfo(map: &HashMap<String, u64>) -> MemInfo {
    let get = |key: &str| map.get(key).copied().unwrap_or(0);
    let mem_total = get("MemTotal");
    let mem_free = get("MemFree");
    let mem_available = get("MemAvailable");
    let buffers = get("Buffers");
    let cached = get("Cached");
    let commit = map.get("Commit").or_else(|| map.get("Committed_AS")).copied().unwrap_or(0);
    let active = get("Active");
    let inactive = get("Inactive");
    let dirty = get("Dirty");
    let slab = get("Slab");
    let swap_total = get("SwapTotal");

    let mem_used = mem_total.saturating_sub(mem_free).saturating_sub(buffers).saturating_sub(cached).saturating_sub(slab);
    let percent_used = if mem_total == 0 { 0.0 } else { clamp_pct(mem_used as f64 / mem_total as f64 * 100.0) };
    let commit_denom = mem_total + swap_total;
    let percent_commit = if commit_denom == 0 { 0.0 } else { clamp_pct(commit as f64 / commit_denom as f64 * 100.0) };

    MemInfo {
        mem_free,
        mem_available,
        mem_used,
        percent_used,
        buffers,
        cached,
        commit,
        percent_commit,
        active,
        inactive,
        dirty,
    }
}

/// Per-interface throughput rates. `rx_kbytes`/
/// `tx_kbytes` are pre-scaled to kB/s; `ifutil` is the busier of the
/// rx/tx directions as a fraction of the interface's link capacity,
/// reported as 0 when the capacity can't be determined (e.g. virtual
/// interfaces).
fn cube_netdev(prev: &NetDevSnapshot, curr: &NetDevSnapshot, interval_seconds: f64, nic: &impl NicCapability) -> Vec<NetDev> {
    let mut names: Vec<&String> =
        curr.interfaces.keys().filter(|name| prev.interfaces.contains_key(*name)).collect();
    names.sort_unstable();

    names
        .into_iter()
        .map(|name| {
            let p = &prev.interfaces[name];
            let c = &curr.interfaces[name];
            let rate = |d: u64| d as f64 / interval_seconds;

            let rx_bytes_rate = rate(delta_u64(c.rx_bytes, p.rx_bytes));
            let tx_bytes_rate = rate(delta_u64(c.tx_bytes, p.tx_bytes));

            let ifutil = match nic.capability_bps(name) {
                Some(capacity_bps) if capacity_bps > 0 => {
                    let busier_bytes_per_sec = rx_bytes_rate.max(tx_bytes_rate);
                    clamp_pct(busier_bytes_per_sec * 8.0 / capacity_bps as f64 * 100.0)
                }
                _ => 0.0,
            };

            NetDev {
                interface: name.clone(),
                rx_packets: rate(delta_u64(c.rx_packets, p.rx_packets)),
                tx_packets: rate(delta_u64(c.tx_packets, p.tx_packets)),
                rx_kbytes: rx_bytes_rate / 1024.0,
                tx_kbytes: tx_bytes_rate / 1024.0,
                rx_compressed: rate(delta_u64(c.rx_compressed, p.rx_compressed)),
                tx_compressed: rate(delta_u64(c.tx_compressed, p.tx_compressed)),
                rx_multicast: rate(delta_u64(c.rx_multicast, p.rx_multicast)),
                ifutil,
            }
        })
        .collect()
}

const SECTOR_BYTES: f64 = 512.0;

/// Per-device disk rates. `bread`/`bwrtn`/`bdscd` are
/// bytes/sec, computed from the kernel's 512-byte sector counters, so
/// replay's disk pool can derive an average I/O size as `bread / rtps`
/// without a unit mismatch.
fn cube_diskstats(prev: &DiskStatsSnapshot, curr: &DiskStatsSnapshot, interval_seconds: f64) -> Vec<DiskStat> {
    let mut names: Vec<&String> = curr.devices.keys().filter(|name| prev.devices.contains_key(*name)).collect();
    names.sort_unstable();

    names
        .into_iter()
        .map(|name| {
            let p = &prev.devices[name];
            let c = &curr.devices[name];
            let rate = |d: u64| d as f64 / interval_seconds;

            let reads = delta_u64(c.reads_completed, p.reads_completed);
            let writes = delta_u64(c.writes_completed, p.writes_completed);
            let discards = delta_u64(c.discards_completed, p.discards_completed);

            DiskStat {
                device: name.clone(),
                tps: rate(reads + writes + discards),
                rtps: rate(reads),
                wtps: rate(writes),
                dtps: rate(discards),
                bread: rate(delta_u64(c.sectors_read, p.sectors_read)) * SECTOR_BYTES,
                bwrtn: rate(delta_u64(c.sectors_written, p.sectors_written)) * SECTOR_BYTES,
                bdscd: rate(delta_u64(c.sectors_discarded, p.sectors_discarded)) * SECTOR_BYTES,
            }
        })
        .collect()
}
