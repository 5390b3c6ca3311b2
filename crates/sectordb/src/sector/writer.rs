//! Background flush from the write buffer to block files
//!
//! `SectorDatabase::write` only caches the value (reserved) and queues it
//! here. The flusher thread swaps the whole buffer out, allocates a sector
//! per record, writes the payloads in chunks of `flush_chunk_size`, and
//! after each chunk reaches its file persists the chunk's `SectorKey`s and
//! releases their cache reservations. Until then the cache is the only
//! place the value can be read from.
//!
//! There is no write-ahead log: a crash before the flush loses the write.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, trace};

use super::Inner;
use crate::cache::PayloadCache;
use crate::error::{SectorError, SectorResult};
use crate::key::{SectorKey, SectorState};
use crate::keychain::Keychain;

/// Records waiting for the flusher.
#[derive(Debug, Default)]
pub(super) struct WriteBuffer {
    pub(super) records: Vec<(Vec<u8>, Vec<u8>)>,
    /// Payload bytes queued or in the batch being flushed
    pub(super) pending_bytes: u64,
    /// A swapped-out batch is still being written
    pub(super) in_flight: bool,
}

impl WriteBuffer {
    pub(super) fn push(&mut self, key: &[u8], value: &[u8]) {
        self.pending_bytes += value.len() as u64;
        self.records.push((key.to_vec(), value.to_vec()));
    }

    /// Drop every queued record for `key`. Returns whether any was queued.
    pub(super) fn remove_key(&mut self, key: &[u8]) -> bool {
        let before = self.records.len();
        let mut removed_bytes = 0u64;
        self.records.retain(|(k, v)| {
            if k.as_slice() == key {
                removed_bytes += v.len() as u64;
                false
            } else {
                true
            }
        });
        self.pending_bytes -= removed_bytes;
        self.records.len() != before
    }

    pub(super) fn is_drained(&self) -> bool {
        self.records.is_empty() && !self.in_flight
    }
}

/// Payload bytes for consecutive sectors of one block file.
#[derive(Default)]
struct Chunk {
    file: u32,
    start: u32,
    bytes: Vec<u8>,
    sectors: Vec<SectorKey>,
}

impl Chunk {
    fn accepts(&self, file: u32, start: u32, len: usize, limit: usize) -> bool {
        if self.sectors.is_empty() {
            return true;
        }
        file == self.file
            && start as u64 == self.start as u64 + self.bytes.len() as u64
            && self.bytes.len() + len <= limit
    }

    fn push(&mut self, sector: SectorKey, value: &[u8]) {
        if self.sectors.is_empty() {
            self.file = sector.sector_file;
            self.start = sector.sector_start;
        }
        self.bytes.extend_from_slice(value);
        self.sectors.push(sector);
    }
}

/// Handle to the flusher thread. Dropping it drains the buffer and joins.
pub(super) struct FlushHandle<K: Keychain, C: PayloadCache> {
    inner: Arc<Inner<K, C>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl<K: Keychain, C: PayloadCache> FlushHandle<K, C> {
    #[cfg(test)]
    pub(super) fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl<K: Keychain, C: PayloadCache> Drop for FlushHandle<K, C> {
    fn drop(&mut self) {
        self.inner.begin_shutdown();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

pub(super) fn start_flusher<K: Keychain, C: PayloadCache>(inner: Arc<Inner<K, C>>) -> SectorResult<FlushHandle<K, C>> {
    let thread_inner = Arc::clone(&inner);
    let thread = thread::Builder::new()
        .name("sectordb-flusher".to_string())
        .spawn(move || flush_loop(thread_inner))
        .map_err(|e| SectorError::Io {
            path: None,
            kind: std::io::ErrorKind::Other,
            message: format!("Failed to spawn flusher thread: {}", e),
        })?;

    Ok(FlushHandle { inner, thread: Some(thread) })
}

/// Main flush loop. Exits once shutdown is requested and the buffer is empty.
fn flush_loop<K: Keychain, C: PayloadCache>(inner: Arc<Inner<K, C>>) {
    loop {
        {
            let mut buffer = inner.buffer.lock();
            while buffer.records.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
                inner.work.wait(&mut buffer);
            }
            if buffer.records.is_empty() {
                return;
            }
        }

        // Non-transactional erase holds the gate while it purges the buffer,
        // so the batch must be taken under it too.
        let gate = inner.gate.lock();
        let (batch, bytes) = {
            let mut buffer = inner.buffer.lock();
            let batch = std::mem::take(&mut buffer.records);
            let bytes: u64 = batch.iter().map(|(_, v)| v.len() as u64).sum();
            buffer.in_flight = true;
            (batch, bytes)
        };

        if !batch.is_empty() {
            inner.flush_batch(batch);
        }
        drop(gate);

        {
            let mut buffer = inner.buffer.lock();
            buffer.pending_bytes -= bytes;
            buffer.in_flight = false;
        }
        inner.drained.notify_all();
    }
}

impl<K: Keychain, C: PayloadCache> Inner<K, C> {
    fn flush_batch(&self, batch: Vec<(Vec<u8>, Vec<u8>)>) {
        let records = batch.len();
        let limit = self.config.flush_chunk_size;
        let mut chunk = Chunk::default();
        let mut touched: Vec<u32> = Vec::new();
        let mut flushed = 0u64;

        for (key, value) in batch {
            let allocation = self.blocks.lock().allocate(value.len());
            let (file, start) = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    error!(key_len = key.len(), size = value.len(), error = %e, "couldn't allocate sector, value stays cached only");
                    continue;
                }
            };

            if !chunk.accepts(file, start, value.len(), limit) {
                flushed += self.write_chunk(std::mem::take(&mut chunk), &mut touched);
            }
            let sector = SectorKey::new(SectorState::Ready, key, file, start, value.len() as u32);
            chunk.push(sector, &value);
        }
        flushed += self.write_chunk(chunk, &mut touched);

        for file in touched {
            let handle = self.blocks.lock().handle(file);
            if let Err(e) = handle.and_then(|h| h.sync()) {
                error!(file, error = %e, "block file sync failed after flush");
            }
        }

        self.stats.record_flushed(flushed);
        self.stats.record_batch();
        debug!(records, flushed, "flushed write buffer");
    }

    /// Write one chunk, then publish its sectors. Returns how many were
    /// persisted to the keychain.
    fn write_chunk(&self, chunk: Chunk, touched: &mut Vec<u32>) -> u64 {
        if chunk.sectors.is_empty() {
            return 0;
        }

        let handle = self.blocks.lock().handle(chunk.file);
        let written = handle.and_then(|h| h.write(chunk.start, &chunk.bytes));
        if let Err(e) = written {
            error!(
                file = chunk.file,
                start = chunk.start,
                bytes = chunk.bytes.len(),
                error = %e,
                "block write failed, chunk stays cached only"
            );
            return 0;
        }
        self.stats.record_written(chunk.bytes.len());
        if !touched.contains(&chunk.file) {
            touched.push(chunk.file);
        }

        let mut flushed = 0;
        for sector in &chunk.sectors {
            match self.keychain.put(sector) {
                Ok(()) => {
                    self.cache.lock().set_reserved(&sector.key, false);
                    flushed += 1;
                }
                Err(e) => {
                    error!(
                        sector_file = sector.sector_file,
                        sector_start = sector.sector_start,
                        sector_size = sector.sector_size,
                        error = %e,
                        "keychain put failed, value stays cached only"
                    );
                }
            }
        }
        trace!(file = chunk.file, start = chunk.start, bytes = chunk.bytes.len(), flushed, "wrote chunk");
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_accounting() {
        let mut buffer = WriteBuffer::default();
        buffer.push(b"a", b"1234");
        buffer.push(b"b", b"56");
        buffer.push(b"a", b"7");
        assert_eq!(buffer.pending_bytes, 7);

        assert!(buffer.remove_key(b"a"));
        assert_eq!(buffer.pending_bytes, 2);
        assert_eq!(buffer.records.len(), 1);
        assert!(!buffer.remove_key(b"a"));
    }

    #[test]
    fn test_drained_tracks_in_flight() {
        let mut buffer = WriteBuffer::default();
        assert!(buffer.is_drained());
        buffer.in_flight = true;
        assert!(!buffer.is_drained());
    }

    #[test]
    fn test_chunk_boundaries() {
        let mut chunk = Chunk::default();
        assert!(chunk.accepts(0, 100, 50, 64));
        chunk.push(SectorKey::new(SectorState::Ready, b"a".to_vec(), 0, 100, 50), &[0u8; 50]);

        // contiguous and under the limit
        assert!(chunk.accepts(0, 150, 14, 64));
        // over the limit
        assert!(!chunk.accepts(0, 150, 15, 64));
        // other file
        assert!(!chunk.accepts(1, 0, 1, 64));
        // gap
        assert!(!chunk.accepts(0, 151, 1, 64));
    }
}
