use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::warn;
use revenant_proc::DiskStat;
use tokio::sync::mpsc;

use crate::disk_mapping::DiskMapping;

const ALIGNMENT: u64 = 4096;
const MAX_IO_BYTES: u64 = 1024 * 1024 * 1024;

struct DiskJob {
    read_ios: u64,
    read_size: u64,
    write_ios: u64,
    write_size: u64,
    timeout: Duration,
}

/// A 4096-byte-aligned heap buffer, required for `O_DIRECT` I/O.
/// Modeled on a pinned buffer page, minus the `mlock` residency
/// guarantee this use case doesn't need.
struct AlignedBuffer {
    ptr: *mut u8,
    layout: std::alloc::Layout,
    len: usize,
}

impl AlignedBuffer {
    fn new(len: usize) -> Self {
        let layout = std::alloc::Layout::from_size_align(len.max(ALIGNMENT as usize), ALIGNMENT as usize)
            .expect("disk replay I/O sizes are always nonzero and alignment is a power of two");
        // SAFETY: layout has nonzero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        Self { ptr, layout, len: layout.size() }
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for `len` bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    fn as_slice_mut(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for `len` bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/layout came from a matching alloc_zeroed above.
        unsafe { std::alloc::dealloc(self.ptr, self.layout) }
    }
}

// SAFETY: the buffer owns its allocation exclusively; no aliasing across threads.
unsafe impl Send for AlignedBuffer {}

/// Per-device worker threads replaying `DiskStat` batches as real
/// `O_DIRECT` + `O_SYNC` I/O against a staged mount point.
pub struct DiskPool {
    workers: HashMap<String, mpsc::Sender<DiskJob>>,
    warned_unknown: Mutex<HashSet<String>>,
    dropped: AtomicU64,
}

impl DiskPool {
    pub fn spawn(mappings: &[DiskMapping]) -> Self {
        let mut workers = HashMap::new();
        for mapping in mappings {
            let (tx, rx) = mpsc::channel::<DiskJob>(1);
            let device = mapping.device.clone();
            let mount_point = PathBuf::from(&mapping.mount_point);
            let stage_size = mapping.stage_size_bytes;
            std::thread::spawn(move || device_worker(device, mount_point, stage_size, rx));
            workers.insert(mapping.device.clone(), tx);
        }
        Self { workers, warned_unknown: Mutex::new(HashSet::new()), dropped: AtomicU64::new(0) }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Dispatches one tick's `DiskStat`s to their mapped devices.
    /// `default_timeout` bounds each device's batch when no
    /// per-call override is given (the design default is one
    /// measurement interval).
    pub async fn dispatch(&self, records: &[DiskStat], deadline: Duration, default_timeout: Duration) {
        for record in records {
            let Some(sender) = self.workers.get(&record.device) else {
                let mut warned = self.warned_unknown.lock().unwrap();
                if warned.insert(record.device.clone()) {
                    warn!("disk replay: device {} has no mapping; skipping", record.device);
                }
                continue;
            };
            if record.rtps <= 0.0 && record.wtps <= 0.0 {
                continue;
            }
            let job = DiskJob {
                read_ios: if record.rtps > 0.0 { record.rtps.round() as u64 } else { 0 },
                read_size: if record.rtps > 0.0 { (record.bread / record.rtps) as u64 } else { 0 },
                write_ios: if record.wtps > 0.0 { record.wtps.round() as u64 } else { 0 },
                write_size: if record.wtps > 0.0 { (record.bwrtn / record.wtps) as u64 } else { 0 },
                timeout: default_timeout,
            };
            match tokio::time::timeout(deadline, sender.send(job)).await {
                Ok(Ok(())) => {}
                _ => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

fn align_and_cap(size: u64) -> u64 {
    let capped = size.clamp(ALIGNMENT, MAX_IO_BYTES);
    capped.div_ceil(ALIGNMENT) * ALIGNMENT
}

fn device_worker(device: String, mount_point: PathBuf, stage_size_bytes: u64, mut rx: mpsc::Receiver<DiskJob>) {
    let read_path = mount_point.join("revenant-replay-read.bin");
    if let Err(e) = ensure_staged_file(&read_path, stage_size_bytes) {
        warn!("device {device}: could not stage read file at {}: {e}", read_path.display());
        return;
    }

    while let Some(job) = rx.blocking_recv() {
        let deadline = Instant::now() + job.timeout;
        if job.read_ios > 0 {
            if let Err(e) = run_reads(&read_path, job.read_ios, job.read_size, deadline) {
                warn!("device {device}: replay read failed: {e}");
            }
        }
        if job.write_ios > 0 {
            if let Err(e) = run_writes(&mount_point, job.write_ios, job.write_size, deadline) {
                warn!("device {device}: replay write failed: {e}");
            }
        }
    }
}

fn ensure_staged_file(path: &Path, size: u64) -> std::io::Result<()> {
    let wanted = align_and_cap(size.max(ALIGNMENT));
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.len() >= wanted {
            return Ok(());
        }
    }
    let file = OpenOptions::new().write(true).create(true).open(path)?;
    file.set_len(wanted)?;
    Ok(())
}

fn run_reads(path: &Path, ios: u64, size: u64, deadline: Instant) -> std::io::Result<()> {
    let size = align_and_cap(size);
    let mut file = OpenOptions::new().read(true).custom_flags(libc::O_DIRECT | libc::O_SYNC).open(path)?;
    let mut buf = AlignedBuffer::new(size as usize);
    for _ in 0..ios {
        if Instant::now() >= deadline {
            break;
        }
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(buf.as_slice_mut())?;
    }
    Ok(())
}

fn run_writes(mount_point: &Path, ios: u64, size: u64, deadline: Instant) -> std::io::Result<()> {
    let size = align_and_cap(size);
    let path = mount_point.join(format!(".revenant-replay-write-{}.tmp", std::process::id()));
    let opened = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .custom_flags(libc::O_DIRECT | libc::O_SYNC)
        .open(&path);

    let result = (|| -> std::io::Result<()> {
        let mut file = opened?;
        let buf = AlignedBuffer::new(size as usize);
        for _ in 0..ios {
            if Instant::now() >= deadline {
                break;
            }
            file.write_all(buf.as_slice())?;
        }
        Ok(())
    })();
    let _ = std::fs::remove_file(&path);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_and_cap_rounds_up_to_4096_and_caps_at_1gib() {
        assert_eq!(align_and_cap(100), 4096);
        assert_eq!(align_and_cap(4096), 4096);
        assert_eq!(align_and_cap(4097), 8192);
        assert_eq!(align_and_cap(2 * MAX_IO_BYTES), MAX_IO_BYTES);
    }

    #[tokio::test]
    async fn unmapped_device_is_warned_once_and_not_dropped() {
        let pool = DiskPool::spawn(&[]);
        let records = vec![DiskStat {
            device: "sdz".to_string(),
            tps: 10.0,
            rtps: 10.0,
            wtps: 0.0,
            dtps: 0.0,
            bread: 40960.0,
            bwrtn: 0.0,
            bdscd: 0.0,
        }];
        pool.dispatch(&records, Duration::from_millis(100), Duration::from_millis(100)).await;
        assert_eq!(pool.dropped(), 0);
        assert!(pool.warned_unknown.lock().unwrap().contains("sdz"));
    }
}
