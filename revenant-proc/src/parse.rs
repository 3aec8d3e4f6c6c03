use std::collections::HashMap;
use thiserror::Error;

/// Fixed USER_HZ assumed throughout. Real Linux systems
/// can in principle build with a different tick rate, but 100 is
/// universal on the target platforms for this system.
pub const USER_HZ: u64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("snapshot text for {0} was empty")]
    Empty(&'static str),
    #[error("no `cpu` aggregate line found in /proc/stat")]
    MissingAggregateCpuLine,
}

/// One CPU line's raw jiffie counters, stored undivided. `USER_HZ`
/// only enters the picture when an interval length is converted into
/// jiffie units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatSnapshot {
    /// Keyed by cpu id; `-1` is the aggregate `cpu` line.
    pub cpus: HashMap<i32, CpuTicks>,
    pub softirq_total: u64,
    pub softirq_categories: [u64; 10],
    pub intr_total: u64,
    pub intr_vector: Vec<u64>,
}

/// Parses a whole `/proc/stat` snapshot.
pub fn parse_stat(text: &str) -> Result<StatSnapshot, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty("/proc/stat"));
    }
    let mut snapshot = StatSnapshot::default();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else { continue };

        if label == "cpu" || (label.starts_with("cpu") && label[3..].chars().all(|c| c.is_ascii_digit())) {
            let cpu_id: i32 = if label == "cpu" { -1 } else { label[3..].parse().unwrap_or(-1) };
            let raw: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
            // Stored as raw jiffies; USER_HZ is applied when converting an
            // interval to jiffie units elsewhere (the NetDev rate
            // formula), not to these counters themselves.
            let get = |i: usize| raw.get(i).copied().unwrap_or(0);
            let ticks = CpuTicks {
                user: get(0),
                nice: get(1),
                system: get(2),
                idle: get(3),
                iowait: get(4),
                irq: get(5),
                softirq: get(6),
                steal: get(7),
            };
            snapshot.cpus.insert(cpu_id, ticks);
        } else if label == "softirq" {
            let raw: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
            snapshot.softirq_total = raw.first().copied().unwrap_or(0);
            for (i, slot) in snapshot.softirq_categories.iter_mut().enumerate() {
                *slot = raw.get(i + 1).copied().unwrap_or(0);
            }
        } else if label == "intr" {
            let raw: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
            snapshot.intr_total = raw.first().copied().unwrap_or(0);
            snapshot.intr_vector = raw.into_iter().skip(1).collect();
        }
    }
    if !snapshot.cpus.contains_key(&-1) {
        return Err(ParseError::MissingAggregateCpuLine);
    }
    Ok(snapshot)
}

/// Parses `/proc/meminfo` into a flat `key -> kB value` map. Values
/// carry the literal kernel key (`MemTotal`, `Committed_AS`, ...); an
/// alias for `Commit` is accepted alongside `Committed_AS` so hosts
/// and synthetic test fixtures using either name both parse.
pub fn parse_meminfo(text: &str) -> Result<HashMap<String, u64>, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty("/proc/meminfo"));
    }
    let mut map = HashMap::new();
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else { continue };
        let value: u64 = rest
            .trim()
            .split_whitespace()
            .next()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        map.insert(key.trim().to_string(), value);
    }
    Ok(map)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetDevCounters {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_compressed: u64,
    pub rx_multicast: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_compressed: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetDevSnapshot {
    pub interfaces: HashMap<String, NetDevCounters>,
}

/// Parses `/proc/net/dev`. The loopback interface is kept (callers
/// filter it out if undesired) since it doesn't belong to an
/// exclusion and downstream NIC-capability lookups naturally yield
/// `ifutil = 0` for `lo`.
pub fn parse_net_dev(text: &str) -> Result<NetDevSnapshot, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty("/proc/net/dev"));
    }
    let mut snapshot = NetDevSnapshot::default();
    for line in text.lines().skip(2) {
        let Some((name, rest)) = line.split_once(':') else { continue };
        let raw: Vec<u64> = rest.split_whitespace().filter_map(|f| f.parse().ok()).collect();
        if raw.len() < 16 {
            continue;
        }
        let counters = NetDevCounters {
            rx_bytes: raw[0],
            rx_packets: raw[1],
            rx_compressed: raw[6],
            rx_multicast: raw[7],
            tx_bytes: raw[8],
            tx_packets: raw[9],
            tx_compressed: raw[15],
        };
        snapshot.interfaces.insert(name.trim().to_string(), counters);
    }
    Ok(snapshot)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskCounters {
    pub reads_completed: u64,
    pub sectors_read: u64,
    pub writes_completed: u64,
    pub sectors_written: u64,
    pub discards_completed: u64,
    pub sectors_discarded: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskStatsSnapshot {
    pub devices: HashMap<String, DiskCounters>,
}

/// Parses `/proc/diskstats`. The discard columns (kernel 4.18+) are
/// optional; devices/kernels without them report zero discards.
pub fn parse_diskstats(text: &str) -> Result<DiskStatsSnapshot, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty("/proc/diskstats"));
    }
    let mut snapshot = DiskStatsSnapshot::default();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let name = fields[2].to_string();
        let parse = |i: usize| fields.get(i).and_then(|f| f.parse().ok()).unwrap_or(0u64);
        let counters = DiskCounters {
            reads_completed: parse(3),
            sectors_read: parse(5),
            writes_completed: parse(7),
            sectors_written: parse(9),
            discards_completed: parse(14),
            sectors_discarded: parse(16),
        };
        snapshot.devices.insert(name, counters);
    }
    Ok(snapshot)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuInfo {
    pub processor_count: usize,
    pub model_name: Option<String>,
}

/// Parses `/proc/cpuinfo`, used by CPU calibration to cross-check the
/// logical core count reported by `revenant-platform` and to label a
/// training report with the host's model name.
pub fn parse_cpuinfo(text: &str) -> Result<CpuInfo, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty("/proc/cpuinfo"));
    }
    let mut processor_count = 0;
    let mut model_name = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim();
        if key == "processor" {
            processor_count += 1;
        } else if key == "model name" && model_name.is_none() {
            model_name = Some(value.trim().to_string());
        }
    }
    Ok(CpuInfo { processor_count, model_name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_s1_aggregate_cpu_line() {
        let prev = parse_stat("cpu  100 0 50 850 0 0 0 0 0 0").unwrap();
        let curr = parse_stat("cpu  110 0 55 875 0 0 0 0 0 0").unwrap();
        let p = prev.cpus[&-1];
        let c = curr.cpus[&-1];
        assert_eq!(p.user, 100);
        assert_eq!(c.user, 110);
        assert_eq!(c.idle, 875);
    }

    #[test]
    fn parses_per_cpu_lines_too() {
        let snap = parse_stat("cpu  100 0 50 850 0 0 0 0 0 0\ncpu0 50 0 25 425 0 0 0 0 0 0").unwrap();
        assert!(snap.cpus.contains_key(&-1));
        assert!(snap.cpus.contains_key(&0));
    }

    #[test]
    fn rejects_missing_aggregate_line() {
        assert_eq!(parse_stat("cpu0 1 2 3 4 5 6 7 8"), Err(ParseError::MissingAggregateCpuLine));
    }
}
