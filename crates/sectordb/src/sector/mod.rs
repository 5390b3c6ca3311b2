//! Sector database: the record store on top of a keychain.
//!
//! **Read path**: open transaction, then payload cache, then keychain lookup
//! and a positional read from the block file (which is then cached).
//! **Write path**: reserve the value in the cache and queue it for the
//! background flusher, blocking while too many bytes are queued.
//! **Transactions**: an in-memory overlay applied to the keychain by
//! `txn_commit` in four passes. A failed commit is not undone automatically;
//! `rollback_transactions` replays the values the keys held before.

mod blockfile;
mod txn;
mod writer;

pub use blockfile::{BlockFiles, BlockHandle};
pub use txn::{CommitJournal, NoJournal, SectorTransaction, TxnView};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::cache::{BinaryLru, PayloadCache};
use crate::config::Config;
use crate::error::{SectorError, SectorResult};
use crate::key::{SectorKey, SectorState};
use crate::keychain::{BinaryHashMap, Keychain};
use crate::stats::{start_meter, MeterHandle, SectorStats, StatsSnapshot};
use writer::{start_flusher, FlushHandle, WriteBuffer};

/// Open and failed-commit transactions.
#[derive(Default)]
struct TxnSlots {
    active: Option<SectorTransaction>,
    /// Last transaction whose commit failed, kept for rollback
    failed: Option<SectorTransaction>,
}

/// State shared between the database handle and its flusher thread.
pub(crate) struct Inner<K, C> {
    config: Config,
    keychain: K,
    cache: Mutex<C>,
    buffer: Mutex<WriteBuffer>,
    /// Signals the flusher that records were queued
    work: Condvar,
    /// Signals writers and `flush` that buffered bytes were released
    drained: Condvar,
    blocks: Mutex<BlockFiles>,
    /// Held by the flusher for a whole batch and by non-transactional erase
    /// and commit
    gate: Mutex<()>,
    txns: Mutex<TxnSlots>,
    journal: Box<dyn CommitJournal>,
    stats: Arc<SectorStats>,
    /// Bumped under the cache lock whenever a key is erased
    erase_epoch: AtomicU64,
    shutdown: AtomicBool,
}

impl<K: Keychain, C: PayloadCache> Inner<K, C> {
    fn begin_shutdown(&self) {
        {
            let _buffer = self.buffer.lock();
            self.shutdown.store(true, Ordering::Release);
        }
        self.work.notify_all();
        self.drained.notify_all();
    }

    fn txn_view(&self, key: &[u8]) -> TxnView {
        let txns = self.txns.lock();
        txns.active.as_ref().map_or(TxnView::Untouched, |txn| txn.view(key))
    }

    /// Committed value of `key`, ignoring any open transaction.
    fn read_committed(&self, key: &[u8]) -> SectorResult<Option<Vec<u8>>> {
        if let Some(value) = self.cache.lock().get(key) {
            self.stats.record_cache(true);
            return Ok(Some(value));
        }
        self.stats.record_cache(false);

        let epoch = self.erase_epoch.load(Ordering::Acquire);
        let sector = match self.keychain.get(key)? {
            Some(sector) => sector,
            None => return Ok(None),
        };

        let handle = self.blocks.lock().handle(sector.sector_file)?;
        let value = handle.read(sector.sector_start, sector.sector_size).map_err(|e| {
            error!(
                sector_file = sector.sector_file,
                sector_start = sector.sector_start,
                sector_size = sector.sector_size,
                error = %e,
                "sector read failed"
            );
            e
        })?;
        self.stats.record_read(value.len());

        let mut cache = self.cache.lock();
        if !cache.contains(key) && self.erase_epoch.load(Ordering::Acquire) == epoch {
            cache.put(key, &value, false);
        }
        Ok(Some(value))
    }

    fn buffer_write(&self, key: &[u8], value: &[u8]) {
        self.cache.lock().put(key, value, true);

        let mut buffer = self.buffer.lock();
        if buffer.pending_bytes > self.config.max_sector_buffer_size {
            debug!(pending = buffer.pending_bytes, "write buffer full, waiting for flush");
        }
        while buffer.pending_bytes > self.config.max_sector_buffer_size && !self.shutdown.load(Ordering::Acquire) {
            self.drained.wait(&mut buffer);
        }
        buffer.push(key, value);
        drop(buffer);
        self.work.notify_one();
    }

    fn evict_erased(&self, key: &[u8]) -> bool {
        let mut cache = self.cache.lock();
        self.erase_epoch.fetch_add(1, Ordering::AcqRel);
        cache.remove(key)
    }

    /// Erase outside a transaction: queued writes, cache entry, keychain slots.
    fn erase_committed(&self, key: &[u8]) -> SectorResult<bool> {
        let _gate = self.gate.lock();
        let buffered = self.buffer.lock().remove_key(key);
        if buffered {
            self.drained.notify_all();
        }
        let erased = self.keychain.erase(key)?;
        let cached = self.evict_erased(key);
        Ok(buffered || erased || cached)
    }

    fn wait_drained(&self) {
        let mut buffer = self.buffer.lock();
        while !buffer.is_drained() && !self.shutdown.load(Ordering::Acquire) {
            self.drained.wait(&mut buffer);
        }
    }

    fn sync_current(&self) -> SectorResult<()> {
        let handle = {
            let mut blocks = self.blocks.lock();
            let current = blocks.current_file();
            blocks.handle(current)?
        };
        handle.sync()
    }

    /// Apply a transaction to the keychain and block files. Stops at the
    /// first error, leaving earlier passes applied.
    fn apply_commit(&self, txn: &SectorTransaction) -> SectorResult<()> {
        // (a) mark keys being rewritten as in flight
        for key in txn.pending_writes().keys() {
            if let Some(mut sector) = self.keychain.get(key)? {
                sector.state = SectorState::Transaction;
                self.keychain.put(&sector)?;
            }
        }

        // (b) erases
        for key in txn.pending_erases() {
            self.keychain.erase(key)?;
            self.evict_erased(key);
        }

        // (c) payloads: new sectors are allocated, existing ones rewritten in
        // place. An overwrite keeps the key's allocation; a shorter payload is
        // zero padded to fill it.
        let mut touched: Vec<u32> = Vec::new();
        for (key, value) in txn.pending_writes() {
            let (sector, bytes) = match self.keychain.get(key)? {
                Some(existing) => {
                    if value.len() > existing.sector_size as usize {
                        warn!(
                            sector_file = existing.sector_file,
                            sector_start = existing.sector_start,
                            sector_size = existing.sector_size,
                            requested = value.len(),
                            "transaction payload exceeds sector allocation"
                        );
                        return Err(SectorError::OversizedSector {
                            sector_file: existing.sector_file,
                            sector_start: existing.sector_start,
                            allocated: existing.sector_size,
                            requested: value.len(),
                        });
                    }
                    let mut padded = value.clone();
                    padded.resize(existing.sector_size as usize, 0);
                    let sector = SectorKey::new(
                        SectorState::Transaction,
                        key.clone(),
                        existing.sector_file,
                        existing.sector_start,
                        existing.sector_size,
                    );
                    (sector, padded)
                }
                None => {
                    let (file, start) = self.blocks.lock().allocate(value.len())?;
                    let sector = SectorKey::new(SectorState::Transaction, key.clone(), file, start, value.len() as u32);
                    (sector, value.clone())
                }
            };

            let handle = self.blocks.lock().handle(sector.sector_file)?;
            handle.write(sector.sector_start, &bytes)?;
            if !touched.contains(&sector.sector_file) {
                touched.push(sector.sector_file);
            }
            self.keychain.put(&sector)?;
            self.stats.record_written(bytes.len());
            self.cache.lock().put(key, &bytes, false);
        }

        for file in touched {
            let handle = self.blocks.lock().handle(file)?;
            handle.sync()?;
        }

        // (d) back to ready
        for key in txn.pending_writes().keys() {
            if let Some(mut sector) = self.keychain.get(key)? {
                sector.state = SectorState::Ready;
                self.keychain.put(&sector)?;
            }
        }
        Ok(())
    }
}

/// Cached, write-buffered record store over a keychain.
///
/// All methods take `&self`; the store can be shared between threads.
/// Dropping it drains the write buffer and joins the background threads.
pub struct SectorDatabase<K: Keychain = BinaryHashMap, C: PayloadCache = BinaryLru> {
    inner: Arc<Inner<K, C>>,
    flusher: Option<FlushHandle<K, C>>,
    meter: Option<MeterHandle>,
    path: PathBuf,
}

impl SectorDatabase<BinaryHashMap, BinaryLru> {
    /// Open or create a store at `path` with a hashed keychain under
    /// `keychain/` and block files under `datachain/`.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> SectorResult<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let keychain = BinaryHashMap::open(path.join("keychain"), &config)?;
        let cache = BinaryLru::new(config.cache_capacity);
        Self::with_parts(path, config, keychain, cache, Box::new(NoJournal))
    }
}

impl<K: Keychain, C: PayloadCache> SectorDatabase<K, C> {
    /// Open a store over a caller-supplied keychain, cache and commit journal.
    pub fn with_parts<P: AsRef<Path>>(
        path: P,
        config: Config,
        keychain: K,
        cache: C,
        journal: Box<dyn CommitJournal>,
    ) -> SectorResult<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let blocks = BlockFiles::open(
            &path.join("datachain"),
            config.max_sector_file_size,
            config.file_cache_capacity,
        )?;

        let stats = Arc::new(SectorStats::new());
        let meter = match config.meter_interval {
            Some(interval) => Some(start_meter(Arc::clone(&stats), interval)?),
            None => None,
        };

        let inner = Arc::new(Inner {
            config,
            keychain,
            cache: Mutex::new(cache),
            buffer: Mutex::new(WriteBuffer::default()),
            work: Condvar::new(),
            drained: Condvar::new(),
            blocks: Mutex::new(blocks),
            gate: Mutex::new(()),
            txns: Mutex::new(TxnSlots::default()),
            journal,
            stats,
            erase_epoch: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });
        let flusher = start_flusher(Arc::clone(&inner))?;

        info!(path = %path.display(), read_only = inner.config.read_only, "opened sector database");
        Ok(Self { inner, flusher: Some(flusher), meter, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn keychain(&self) -> &K {
        &self.inner.keychain
    }

    fn check_writable(&self) -> SectorResult<()> {
        if self.inner.config.read_only {
            return Err(SectorError::ReadOnly);
        }
        Ok(())
    }

    fn check_record(&self, key: &[u8], value: &[u8]) -> SectorResult<()> {
        if key.len() > u16::MAX as usize {
            return Err(SectorError::OversizedKey { size: key.len(), max: u16::MAX as usize });
        }
        let max = self.inner.config.max_sector_file_size;
        if value.len() as u64 > max {
            return Err(SectorError::OversizedValue { size: value.len(), max });
        }
        Ok(())
    }

    /// Read the value visible to this handle: pending transaction state
    /// first, then committed state.
    pub fn read(&self, key: &[u8]) -> SectorResult<Option<Vec<u8>>> {
        match self.inner.txn_view(key) {
            TxnView::Erased => Ok(None),
            TxnView::Written(value) => Ok(Some(value)),
            TxnView::Untouched => self.inner.read_committed(key),
        }
    }

    /// Write a value. Inside a transaction it is only staged; otherwise it
    /// is readable immediately and persisted by the flusher.
    pub fn write(&self, key: &[u8], value: &[u8]) -> SectorResult<()> {
        self.check_writable()?;
        self.check_record(key, value)?;

        {
            let mut txns = self.inner.txns.lock();
            if let Some(txn) = txns.active.as_mut() {
                if txn.needs_original(key) {
                    let committed = self.inner.read_committed(key)?;
                    txn.record_original(key, committed);
                }
                txn.write(key, value);
                return Ok(());
            }
        }

        self.inner.buffer_write(key, value);
        Ok(())
    }

    /// Erase a key. Returns whether it was visible before the call.
    pub fn erase(&self, key: &[u8]) -> SectorResult<bool> {
        self.check_writable()?;

        {
            let mut txns = self.inner.txns.lock();
            if let Some(txn) = txns.active.as_mut() {
                if txn.needs_original(key) {
                    let committed = self.inner.read_committed(key)?;
                    txn.record_original(key, committed);
                }
                let existed = match txn.view(key) {
                    TxnView::Erased => false,
                    TxnView::Written(_) => true,
                    TxnView::Untouched => txn.original_values().get(key).map_or(false, |v| v.is_some()),
                };
                txn.erase(key);
                return Ok(existed);
            }
        }

        self.inner.erase_committed(key)
    }

    pub fn exists(&self, key: &[u8]) -> SectorResult<bool> {
        match self.inner.txn_view(key) {
            TxnView::Erased => return Ok(false),
            TxnView::Written(_) => return Ok(true),
            TxnView::Untouched => {}
        }
        if self.inner.cache.lock().contains(key) {
            return Ok(true);
        }
        self.inner.keychain.has_key(key)
    }

    /// Start a transaction, discarding any open or failed one.
    pub fn txn_begin(&self) {
        let mut txns = self.inner.txns.lock();
        if txns.active.is_some() || txns.failed.is_some() {
            debug!("discarding previous transaction state");
        }
        txns.failed = None;
        txns.active = Some(SectorTransaction::new());
    }

    /// Drop the open (or failed) transaction without touching disk.
    /// Returns whether there was one.
    pub fn txn_abort(&self) -> bool {
        let mut txns = self.inner.txns.lock();
        let active = txns.active.take();
        let failed = txns.failed.take();
        active.is_some() || failed.is_some()
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.txns.lock().active.is_some()
    }

    /// Apply the open transaction.
    ///
    /// Runs (a) flip existing keys to `Transaction`, (b) erases, (c) writes,
    /// (d) flip back to `Ready`. On failure the passes already applied stay
    /// applied and the transaction is parked for `rollback_transactions`.
    pub fn txn_commit(&self) -> SectorResult<()> {
        self.check_writable()?;
        if !self.in_transaction() {
            return Err(SectorError::NoTransaction);
        }

        self.inner.wait_drained();
        let _gate = self.inner.gate.lock();
        let txn = self.inner.txns.lock().active.take().ok_or(SectorError::NoTransaction)?;

        let writes = txn.pending_writes().len();
        let erases = txn.pending_erases().len();

        let result = self
            .inner
            .journal
            .prepare(&txn)
            .and_then(|()| self.inner.apply_commit(&txn))
            .and_then(|()| self.inner.journal.finish(&txn));

        match result {
            Ok(()) => {
                info!(writes, erases, "committed transaction");
                Ok(())
            }
            Err(e) => {
                error!(writes, erases, error = %e, "transaction commit failed, keychain may be partially committed");
                self.inner.txns.lock().failed = Some(txn);
                Err(e)
            }
        }
    }

    /// Replay the pre-transaction values of the open or failed transaction
    /// through the normal write path. Keys that did not exist are erased.
    /// Returns how many keys were restored.
    pub fn rollback_transactions(&self) -> SectorResult<usize> {
        self.check_writable()?;
        let txn = {
            let mut txns = self.inner.txns.lock();
            let active = txns.active.take();
            active.or_else(|| txns.failed.take()).ok_or(SectorError::NoTransaction)?
        };

        let mut restored = 0;
        for (key, original) in txn.original_values() {
            match original {
                Some(value) => self.inner.buffer_write(key, value),
                None => {
                    self.inner.erase_committed(key)?;
                }
            }
            restored += 1;
        }
        info!(restored, "rolled back transaction");
        Ok(restored)
    }

    /// Block until every buffered write has reached the keychain.
    pub fn flush(&self) -> SectorResult<()> {
        self.inner.wait_drained();
        Ok(())
    }

    /// `flush`, then durably sync the current block file and keychain index.
    pub fn sync(&self) -> SectorResult<()> {
        self.flush()?;
        self.inner.sync_current()?;
        self.inner.keychain.flush()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Drain the buffer, stop the background threads and sync everything.
    pub fn close(mut self) -> SectorResult<()> {
        self.flush()?;
        drop(self.flusher.take());
        drop(self.meter.take());
        self.inner.sync_current()?;
        self.inner.keychain.flush()?;
        info!(path = %self.path.display(), "closed sector database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_config() -> Config {
        Config::compact()
            .with_total_buckets(64)
            .with_max_key_size(8)
            .with_cache_capacity(16)
    }

    #[test]
    fn test_write_read_before_and_after_flush() {
        let tmp = TempDir::new().unwrap();
        let db = SectorDatabase::open(tmp.path(), small_config()).unwrap();

        db.write(b"k", b"value").unwrap();
        assert_eq!(db.read(b"k").unwrap(), Some(b"value".to_vec()));

        db.flush().unwrap();
        assert_eq!(db.read(b"k").unwrap(), Some(b"value".to_vec()));
        assert!(db.keychain().get(b"k").unwrap().is_some());
        assert!(tmp.path().join("datachain").join("_block.00000").exists());
        assert!(tmp.path().join("keychain").join("_hashmap.index").exists());
    }

    #[test]
    fn test_read_missing() {
        let tmp = TempDir::new().unwrap();
        let db = SectorDatabase::open(tmp.path(), small_config()).unwrap();
        assert_eq!(db.read(b"nothing").unwrap(), None);
        assert!(!db.exists(b"nothing").unwrap());
    }

    #[test]
    fn test_read_from_disk_after_eviction() {
        let tmp = TempDir::new().unwrap();
        let db = SectorDatabase::open(tmp.path(), small_config().with_cache_capacity(1)).unwrap();

        db.write(b"a", b"first").unwrap();
        db.write(b"b", b"second").unwrap();
        db.flush().unwrap();

        assert_eq!(db.read(b"a").unwrap(), Some(b"first".to_vec()));
        assert_eq!(db.read(b"b").unwrap(), Some(b"second".to_vec()));
        assert!(db.stats().bytes_read > 0);
    }

    #[test]
    fn test_erase_buffered_write() {
        let tmp = TempDir::new().unwrap();
        let db = SectorDatabase::open(tmp.path(), small_config()).unwrap();

        db.write(b"k", b"v").unwrap();
        assert!(db.erase(b"k").unwrap());
        db.flush().unwrap();

        assert_eq!(db.read(b"k").unwrap(), None);
        assert!(!db.erase(b"k").unwrap());
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let tmp = TempDir::new().unwrap();
        drop(SectorDatabase::open(tmp.path(), small_config()).unwrap());

        let db = SectorDatabase::open(tmp.path(), small_config().with_read_only(true)).unwrap();
        assert!(matches!(db.write(b"k", b"v"), Err(SectorError::ReadOnly)));
        assert!(matches!(db.erase(b"k"), Err(SectorError::ReadOnly)));
        db.txn_begin();
        assert!(matches!(db.txn_commit(), Err(SectorError::ReadOnly)));
    }

    #[test]
    fn test_oversized_value_rejected() {
        let tmp = TempDir::new().unwrap();
        let db = SectorDatabase::open(tmp.path(), small_config().with_max_sector_file_size(16)).unwrap();
        assert!(matches!(db.write(b"k", &[0u8; 17]), Err(SectorError::OversizedValue { .. })));
    }

    #[test]
    fn test_commit_without_transaction() {
        let tmp = TempDir::new().unwrap();
        let db = SectorDatabase::open(tmp.path(), small_config()).unwrap();
        assert!(matches!(db.txn_commit(), Err(SectorError::NoTransaction)));
        assert!(matches!(db.rollback_transactions(), Err(SectorError::NoTransaction)));
        assert!(!db.txn_abort());
    }

    #[test]
    fn test_transaction_erase_hides_committed() {
        let tmp = TempDir::new().unwrap();
        let db = SectorDatabase::open(tmp.path(), small_config()).unwrap();
        db.write(b"k", b"v").unwrap();
        db.flush().unwrap();

        db.txn_begin();
        assert!(db.erase(b"k").unwrap());
        assert_eq!(db.read(b"k").unwrap(), None);
        assert!(!db.exists(b"k").unwrap());
        db.txn_commit().unwrap();

        assert_eq!(db.read(b"k").unwrap(), None);
        assert!(db.keychain().get(b"k").unwrap().is_none());
    }

    #[test]
    fn test_commit_overwrite_keeps_allocation() {
        let tmp = TempDir::new().unwrap();
        let db = SectorDatabase::open(tmp.path(), small_config()).unwrap();
        db.write(b"old", b"0123456789").unwrap();
        db.flush().unwrap();

        db.txn_begin();
        db.write(b"old", b"short").unwrap();
        db.write(b"new", b"fresh").unwrap();
        db.txn_commit().unwrap();

        let sector = db.keychain().get(b"old").unwrap().unwrap();
        assert!(sector.is_ready());
        assert_eq!(sector.sector_size, 10);
        assert!(db.keychain().get(b"new").unwrap().unwrap().is_ready());
        assert_eq!(db.read(b"old").unwrap(), Some(b"short\0\0\0\0\0".to_vec()));
        assert_eq!(db.read(b"new").unwrap(), Some(b"fresh".to_vec()));

        // still bounded by the original 10 bytes, not the 5 just written
        db.txn_begin();
        db.write(b"old", b"eight888").unwrap();
        db.txn_commit().unwrap();
        assert_eq!(db.read(b"old").unwrap(), Some(b"eight888\0\0".to_vec()));

        db.txn_begin();
        db.write(b"old", b"eleven bytes").unwrap();
        assert!(matches!(
            db.txn_commit(),
            Err(SectorError::OversizedSector { allocated: 10, requested: 12, .. })
        ));
        assert!(db.txn_abort());
    }

    #[test]
    fn test_flusher_running_until_close() {
        let tmp = TempDir::new().unwrap();
        let db = SectorDatabase::open(tmp.path(), small_config()).unwrap();
        assert!(db.flusher.as_ref().map_or(false, |f| f.is_running()));
        db.write(b"k", b"v").unwrap();
        db.close().unwrap();

        let db = SectorDatabase::open(tmp.path(), small_config()).unwrap();
        assert_eq!(db.read(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
