//! Hardware topology and thread placement, used by CPU training
//! (which needs to know whether cores are hyperthreaded siblings) and
//! by the replay engine's per-core CPU worker pool.

use hwloc2::{ObjectType, Topology};
use log::{info, warn};

pub struct SystemTopology {
    physical_cores: usize,
    logical_cores: usize,
    numa_nodes: usize,
}

impl SystemTopology {
    /// Probes the host via `hwloc2` for physical core / NUMA counts
    /// and `std::thread::available_parallelism` for logical cores.
    /// Falls back to treating the machine as single-core, non-NUMA,
    /// non-hyperthreaded if hwloc initialization fails (e.g. inside a
    /// restrictive container).
    pub fn detect() -> Self {
        let logical_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let (physical_cores, numa_nodes) = match Topology::new() {
            Some(topology) => {
                let physical = topology
                    .objects_with_type(&ObjectType::Core)
                    .map(|cores| cores.len())
                    .unwrap_or(logical_cores);
                let numa = topology
                    .depth_for_type(&ObjectType::NUMANode)
                    .map(|depth| topology.objects_at_depth(depth).len())
                    .unwrap_or(1)
                    .max(1);
                (physical.max(1), numa)
            }
            None => {
                warn!("hwloc topology probe failed; assuming {logical_cores} physical cores, 1 NUMA node");
                (logical_cores, 1)
            }
        };

        let topology = Self { physical_cores, logical_cores, numa_nodes };
        topology.log_summary();
        topology
    }

    pub fn physical_cores(&self) -> usize {
        self.physical_cores
    }

    pub fn logical_cores(&self) -> usize {
        self.logical_cores
    }

    pub fn numa_nodes(&self) -> usize {
        self.numa_nodes
    }

    /// True when there are more schedulable (logical) cores than
    /// physical ones — the condition replay's CPU dispatch uses to decide between
    /// averaged and per-core CPU dispatch during replay.
    pub fn hyperthreaded(&self) -> bool {
        self.logical_cores > self.physical_cores
    }

    fn log_summary(&self) {
        info!(
            "topology: {} physical core(s), {} logical core(s), {} NUMA node(s), hyperthreaded={}",
            self.physical_cores, self.logical_cores, self.numa_nodes, self.hyperthreaded()
        );
    }
}

/// Pins the calling OS thread to `core_id`. Used by replay CPU
/// workers so each worker's load lands on a distinct core instead of
/// drifting across the scheduler.
///
/// Returns `false` (rather than panicking) when pinning is refused —
/// callers in this workspace treat that as a performance-only
/// degradation, not a fatal error, since replay fidelity is
/// statistical rather than cycle-exact.
pub fn pin_thread_to_core(core_id: usize) -> bool {
    let core = core_affinity::CoreId { id: core_id };
    if core_affinity::set_for_current(core) {
        true
    } else {
        warn!("failed to pin thread to core {core_id}; continuing unpinned");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_reports_at_least_one_core() {
        let topo = SystemTopology::detect();
        assert!(topo.logical_cores() >= 1);
        assert!(topo.physical_cores() >= 1);
        assert!(topo.numa_nodes() >= 1);
    }
}
