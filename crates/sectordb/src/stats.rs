//! Throughput counters and the meter thread that reports them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::error::{SectorError, SectorResult};

/// Live counters, updated with relaxed atomics on the hot paths.
#[derive(Debug, Default)]
pub struct SectorStats {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    records_flushed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    flush_batches: AtomicU64,
}

/// Point-in-time copy of [`SectorStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub records_flushed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub flush_batches: u64,
}

impl SectorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_written(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_flushed(&self, records: u64) {
        self.records_flushed.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_cache(&self, hit: bool) {
        let counter = if hit { &self.cache_hits } else { &self.cache_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.flush_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            flush_batches: self.flush_batches.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running meter thread. Dropping it stops the thread.
pub struct MeterHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MeterHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for MeterHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Start a thread logging per-second throughput every `interval`.
pub fn start_meter(stats: Arc<SectorStats>, interval: Duration) -> SectorResult<MeterHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);

    let thread = thread::Builder::new()
        .name("sectordb-meter".to_string())
        .spawn(move || meter_loop(stats, interval, shutdown_clone))
        .map_err(|e| SectorError::Io {
            path: None,
            kind: std::io::ErrorKind::Other,
            message: format!("Failed to spawn meter thread: {}", e),
        })?;

    Ok(MeterHandle { shutdown, thread: Some(thread) })
}

fn meter_loop(stats: Arc<SectorStats>, interval: Duration, shutdown: Arc<AtomicBool>) {
    let poll = interval.min(Duration::from_millis(100));
    let mut last = stats.snapshot();
    let mut last_time = Instant::now();

    loop {
        let wake_time = last_time + interval;
        while Instant::now() < wake_time {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            thread::sleep(poll);
        }

        let now = stats.snapshot();
        let secs = last_time.elapsed().as_secs_f64().max(f64::EPSILON);
        info!(
            read_bytes_per_sec = ((now.bytes_read - last.bytes_read) as f64 / secs) as u64,
            write_bytes_per_sec = ((now.bytes_written - last.bytes_written) as f64 / secs) as u64,
            records_flushed = now.records_flushed - last.records_flushed,
            cache_hits = now.cache_hits - last.cache_hits,
            cache_misses = now.cache_misses - last.cache_misses,
            "sector meter"
        );

        last = now;
        last_time = Instant::now();
    }
}
