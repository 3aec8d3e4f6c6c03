/// One CPU's differentiated `/proc/stat` fields for one interval, all
/// expressed as a percentage of the interval's total jiffies.
/// `cpu_id == -1` is the aggregate `cpu` line.
#[derive(Debug, Clone, PartialEq)]
pub struct StatRecord {
    pub cpu_id: i32,
    pub user_t: f64,
    pub nice: f64,
    pub system: f64,
    pub iowait: f64,
    pub steal: f64,
    pub idle: f64,
}

/// Non-differential memory snapshot — only the current
/// `/proc/meminfo` read is used, but a series still needs to be
/// primed once before it is emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct MemInfo {
    pub mem_free: u64,
    pub mem_available: u64,
    pub mem_used: u64,
    pub percent_used: f64,
    pub buffers: u64,
    pub cached: u64,
    pub commit: u64,
    pub percent_commit: f64,
    pub active: u64,
    pub inactive: u64,
    pub dirty: u64,
}

/// Per-interface differentiated `/proc/net/dev` rates, all per-second.
#[derive(Debug, Clone, PartialEq)]
pub struct NetDev {
    pub interface: String,
    pub rx_packets: f64,
    pub tx_packets: f64,
    pub rx_kbytes: f64,
    pub tx_kbytes: f64,
    pub rx_compressed: f64,
    pub tx_compressed: f64,
    pub rx_multicast: f64,
    pub ifutil: f64,
}

/// Per-device differentiated `/proc/diskstats` rates.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskStat {
    pub device: String,
    pub tps: f64,
    pub rtps: f64,
    pub wtps: f64,
    pub dtps: f64,
    /// Bytes/sec read — already scaled so replay's disk pool can
    /// derive an average I/O size as `bread / rtps`.
    pub bread: f64,
    pub bwrtn: f64,
    pub bdscd: f64,
}

/// One of the four disjoint differentiated record families.
#[derive(Debug, Clone, PartialEq)]
pub enum DifferentiatedRecord {
    Stat(Vec<StatRecord>),
    Mem(MemInfo),
    Net(Vec<NetDev>),
    Disk(Vec<DiskStat>),
}

/// Clamps to `[0, 100]`, the percentage invariant every differentiated field holds.
pub(crate) fn clamp_pct(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

/// Non-negative counter delta: a decrease means the counter wrapped or
/// reset, and the invariant is to report a rate of exactly 0
/// rather than a negative or wrapped value.
pub(crate) fn delta_u64(curr: u64, prev: u64) -> u64 {
    curr.saturating_sub(prev)
}
