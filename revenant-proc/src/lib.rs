//! Parses raw `/proc` text into typed snapshots and differentiates
//! successive snapshots of the same series into the percentage/rate
//! records the rest of the system consumes.

pub mod differentiate;
pub mod nic;
pub mod parse;
pub mod records;

pub use differentiate::Differentiator;
pub use nic::{FixedNicCapability, NicCapability, SysfsNicCapability};
pub use parse::{
    parse_cpuinfo, parse_diskstats, parse_meminfo, parse_net_dev, parse_stat, CpuInfo, CpuTicks,
    DiskCounters, DiskStatsSnapshot, NetDevCounters, NetDevSnapshot, ParseError, StatSnapshot, USER_HZ,
};
pub use records::{DifferentiatedRecord, DiskStat, MemInfo, NetDev, StatRecord};
