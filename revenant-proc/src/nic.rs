use std::collections::HashMap;
use std::fs;

/// Looks up a NIC's link capacity in bits/sec, used to turn raw
/// throughput into the `ifutil` percentage on the differentiated NetDev record.
pub trait NicCapability {
    fn capability_bps(&self, interface: &str) -> Option<u64>;
}

/// Reads `/sys/class/net/<if>/speed` (reported in Mbps). Virtual
/// interfaces (veth, lo, bridges) usually don't expose a speed file,
/// in which case `ifutil` is reported as 0 rather than guessed.
pub struct SysfsNicCapability;

impl NicCapability for SysfsNicCapability {
    fn capability_bps(&self, interface: &str) -> Option<u64> {
        let path = format!("/sys/class/net/{interface}/speed");
        let text = fs::read_to_string(path).ok()?;
        let mbps: i64 = text.trim().parse().ok()?;
        if mbps <= 0 {
            return None;
        }
        Some(mbps as u64 * 1_000_000)
    }
}

/// Fixed-table capability lookup, for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct FixedNicCapability(pub HashMap<String, u64>);

impl NicCapability for FixedNicCapability {
    fn capability_bps(&self, interface: &str) -> Option<u64> {
        self.0.get(interface).copied()
    }
}
