use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use revenant_proc::MemInfo;
use tokio::sync::mpsc;

const PAGE_BYTES: usize = 4096;
const HYSTERESIS: f64 = 0.10;

/// Keeps one process-wide resident mapping sized to the replayed
/// `mem_used`. Remapping is expensive, so a target within 10% of the
/// current size is a no-op rather than a fresh allocation every tick.
pub struct MemoryPool {
    sender: mpsc::Sender<u64>,
    dropped: AtomicU64,
}

impl MemoryPool {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<u64>(1);
        std::thread::spawn(move || {
            let mut resident: Vec<u8> = Vec::new();
            while let Some(target_bytes) = rx.blocking_recv() {
                let target = target_bytes as usize;
                if !resident.is_empty() {
                    let diff = (target as f64 - resident.len() as f64).abs() / resident.len() as f64;
                    if diff <= HYSTERESIS {
                        continue;
                    }
                }
                resident = vec![0u8; target];
                let mut offset = 0;
                while offset < resident.len() {
                    resident[offset] = 1;
                    offset += PAGE_BYTES;
                }
            }
        });
        Self { sender: tx, dropped: AtomicU64::new(0) }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn dispatch(&self, mem: &MemInfo, deadline: Duration) {
        match tokio::time::timeout(deadline, self.sender.send(mem.mem_used)).await {
            Ok(Ok(())) => {}
            _ => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(used: u64) -> MemInfo {
        MemInfo {
            mem_free: 0,
            mem_available: 0,
            mem_used: used,
            percent_used: 0.0,
            buffers: 0,
            cached: 0,
            commit: 0,
            percent_commit: 0.0,
            active: 0,
            inactive: 0,
            dirty: 0,
        }
    }

    #[tokio::test]
    async fn a_normal_target_does_not_get_dropped() {
        let pool = MemoryPool::spawn();
        pool.dispatch(&mem(1024 * 1024), Duration::from_millis(200)).await;
        assert_eq!(pool.dropped(), 0);
    }
}
