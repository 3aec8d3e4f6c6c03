use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use revenant_platform::pin_thread_to_core;
use revenant_proc::StatRecord;
use tokio::sync::mpsc;

use crate::calibration::CalibrationTable;
use crate::work::Workload;

struct CpuJob {
    units: u64,
    interval: Duration,
}

/// One OS thread per logical core, each pinned and running the
/// canonical work primitive on demand.
///
/// `units[p]` is trained as a total across all cores for one tick
/// (`load * cores`); each worker here runs its own `total / cores`
/// share so the aggregate work done across the pool matches the
/// trained total instead of multiplying it by the core count.
pub struct CpuPool {
    senders: Vec<mpsc::Sender<CpuJob>>,
    dropped: AtomicU64,
    behind: Arc<AtomicU64>,
}

impl CpuPool {
    pub fn spawn(logical_cores: usize) -> Self {
        let logical_cores = logical_cores.max(1);
        let mut senders = Vec::with_capacity(logical_cores);
        let behind = Arc::new(AtomicU64::new(0));
        for core_id in 0..logical_cores {
            let (tx, mut rx) = mpsc::channel::<CpuJob>(1);
            let behind = Arc::clone(&behind);
            std::thread::spawn(move || {
                pin_thread_to_core(core_id);
                let mut workload = Workload::new();
                while let Some(job) = rx.blocking_recv() {
                    let start = Instant::now();
                    workload.run_units(job.units);
                    let elapsed = start.elapsed();
                    if elapsed < job.interval {
                        std::thread::sleep(job.interval - elapsed);
                    } else if elapsed > job.interval {
                        behind.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
            senders.push(tx);
        }
        Self { senders, dropped: AtomicU64::new(0), behind }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ticks where a worker's batch ran longer than the interval it
    /// was given ("cannot keep up" — non-fatal).
    pub fn behind_count(&self) -> u64 {
        self.behind.load(Ordering::Relaxed)
    }

    /// Translates one tick's `StatRecord`s (one per CPU, plus the `-1`
    /// aggregate) into per-core unit counts and dispatches them,
    /// honoring `deadline` per worker send.
    pub async fn dispatch(
        &self,
        records: &[StatRecord],
        table: &CalibrationTable,
        scale: f64,
        interval: Duration,
        hyperthreaded: bool,
        deadline: Duration,
    ) {
        let per_core: Vec<&StatRecord> = records.iter().filter(|r| r.cpu_id != -1).collect();
        if per_core.is_empty() {
            return;
        }
        let cores = self.senders.len() as u64;

        let targets: Vec<f64> = if hyperthreaded {
            let avg = per_core.iter().map(|r| 100.0 - r.idle).sum::<f64>() / per_core.len() as f64;
            vec![avg; self.senders.len()]
        } else {
            (0..self.senders.len())
                .map(|i| per_core.get(i).map(|r| 100.0 - r.idle).unwrap_or(0.0))
                .collect()
        };

        for (sender, busy) in self.senders.iter().zip(targets.iter()) {
            let total = table.units_for_tick(*busy, scale, interval);
            let job = CpuJob { units: total / cores.max(1), interval };
            match tokio::time::timeout(deadline, sender.send(job)).await {
                Ok(Ok(())) => {}
                _ => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationTable;
    use std::time::Duration;

    fn flat_table(units_at_100: u64) -> CalibrationTable {
        let mut units = [0u64; 101];
        for p in 0..=100 {
            units[p] = units_at_100 * p as u64 / 100;
        }
        CalibrationTable::from_parts(units, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn dispatch_does_not_panic_on_empty_per_core_records() {
        let pool = CpuPool::spawn(2);
        let table = flat_table(1000);
        pool.dispatch(&[], &table, 1.0, Duration::from_millis(100), false, Duration::from_millis(50)).await;
        assert_eq!(pool.dropped(), 0);
    }

    #[tokio::test]
    async fn a_full_pool_does_not_drop_a_normal_tick() {
        let pool = CpuPool::spawn(2);
        let table = flat_table(10);
        let records = vec![
            StatRecord { cpu_id: -1, user_t: 0.0, nice: 0.0, system: 0.0, iowait: 0.0, steal: 0.0, idle: 70.0 },
            StatRecord { cpu_id: 0, user_t: 0.0, nice: 0.0, system: 0.0, iowait: 0.0, steal: 0.0, idle: 70.0 },
            StatRecord { cpu_id: 1, user_t: 0.0, nice: 0.0, system: 0.0, iowait: 0.0, steal: 0.0, idle: 70.0 },
        ];
        pool.dispatch(&records, &table, 1.0, Duration::from_millis(10), false, Duration::from_millis(200)).await;
        assert_eq!(pool.dropped(), 0);
    }
}
