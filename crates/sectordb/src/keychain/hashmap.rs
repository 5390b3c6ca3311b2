//! Binary hash map keychain.
//!
//! Keys hash to one of `total_buckets` buckets. Each bucket owns one
//! fixed-size slot in every overflow file (`_hashmap.00000`,
//! `_hashmap.00001`, ...), and `counts[bucket]` records how many of those
//! files hold a slot for it: the bucket's chain. Appends go to overflow file
//! `counts[bucket]`, so scanning the chain newest-first gives
//! last-writer-wins per key.
//!
//! `counts` lives in memory and is persisted to `_hashmap.index` by a
//! background thread whenever a mutation marks it dirty.

use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use lru::LruCache;
use md5::{Digest, Md5};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace};

use crate::config::{Config, KeychainMode};
use crate::error::{SectorError, SectorResult};
use crate::io::{create_zeroed, durable_sync, open_rw, read_exact_at, write_all_at};
use crate::key::{compress_key, SectorKey, Slot};
use crate::keychain::Keychain;

const INDEX_FILE: &str = "_hashmap.index";

/// Slots read per request while rebuilding the index.
const REBUILD_BATCH_SLOTS: usize = 4096;

/// Bucket for a raw key: first 8 bytes of its MD5 digest (LE) modulo `total_buckets`.
pub fn bucket_for(key: &[u8], total_buckets: u32) -> u32 {
    let digest = Md5::digest(key);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(head) % total_buckets as u64) as u32
}

/// Mutable keychain state, guarded by one mutex.
struct KeychainState {
    /// Chain length per bucket
    counts: Vec<u32>,
    /// Open overflow-file handles
    files: LruCache<u32, Arc<File>>,
    /// Counts changed since the index was last written
    dirty: bool,
    shutdown: bool,
}

/// State shared with the index flush thread.
struct Shared {
    state: Mutex<KeychainState>,
    /// Wakes the flush thread
    wake: Condvar,
    /// Serializes index file writes so snapshots land in order
    index_write: Mutex<()>,
    index_path: PathBuf,
}

impl Shared {
    /// Snapshot `counts` and overwrite the index file with it.
    fn write_index(&self, sync: bool) -> SectorResult<()> {
        let _ordered = self.index_write.lock();
        let bytes = {
            let mut state = self.state.lock();
            state.dirty = false;
            encode_counts(&state.counts)
        };

        let file = open_rw(&self.index_path)
            .map_err(|e| SectorError::io(&self.index_path, &e, "Failed to open keychain index"))?;
        write_all_at(&file, &bytes, 0)
            .map_err(|e| SectorError::io(&self.index_path, &e, "Failed to write keychain index"))?;
        if sync {
            durable_sync(&file)
                .map_err(|e| SectorError::io(&self.index_path, &e, "Keychain index durable_sync failed"))?;
        }
        trace!(bytes = bytes.len(), "flushed keychain index");
        Ok(())
    }
}

fn encode_counts(counts: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(counts.len() * 4);
    for count in counts {
        bytes.extend_from_slice(&count.to_le_bytes());
    }
    bytes
}

fn decode_counts(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Hashed keychain with append-only overflow-file chains.
pub struct BinaryHashMap {
    dir: PathBuf,
    total_buckets: u32,
    max_key_size: usize,
    slot_size: usize,
    mode: KeychainMode,
    shared: Arc<Shared>,
    flusher: Option<thread::JoinHandle<()>>,
}

impl BinaryHashMap {
    /// Open or create a keychain in `dir`.
    ///
    /// Loads the bucket counts from `_hashmap.index` (rebuilding them from
    /// the overflow files if the index is missing), makes sure overflow file
    /// 0 exists, and starts the index flush thread.
    pub fn open<P: AsRef<Path>>(dir: P, config: &Config) -> SectorResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let total_buckets = config.total_buckets;
        let max_key_size = config.max_key_size as usize;
        let slot_size = config.slot_size();

        std::fs::create_dir_all(&dir)
            .map_err(|e| SectorError::io(&dir, &e, "Failed to create keychain directory"))?;

        let index_path = dir.join(INDEX_FILE);
        let index_len = total_buckets as u64 * 4;
        let first_overflow = overflow_path(&dir, 0);
        let overflow_len = total_buckets as u64 * slot_size as u64;

        if first_overflow.exists() {
            let found = std::fs::metadata(&first_overflow)
                .map_err(|e| SectorError::io(&first_overflow, &e, "Failed to stat overflow file"))?
                .len();
            if found != overflow_len {
                return Err(SectorError::InvalidConfig(format!(
                    "keychain overflow file holds {} bytes, configuration expects {}",
                    found, overflow_len
                )));
            }
        }

        let counts = if index_path.exists() {
            let bytes = std::fs::read(&index_path)
                .map_err(|e| SectorError::io(&index_path, &e, "Failed to read keychain index"))?;
            if bytes.len() as u64 != index_len {
                return Err(SectorError::InvalidConfig(format!(
                    "keychain index holds {} buckets, configuration expects {}",
                    bytes.len() / 4,
                    total_buckets
                )));
            }
            let counts = decode_counts(&bytes);
            let total: u64 = counts.iter().map(|&c| c as u64).sum();
            info!(bytes = bytes.len(), keys = total, "loaded keychain index");
            counts
        } else if first_overflow.exists() {
            let counts = rebuild_counts(&dir, total_buckets, max_key_size, slot_size)?;
            std::fs::write(&index_path, encode_counts(&counts))
                .map_err(|e| SectorError::io(&index_path, &e, "Failed to write rebuilt keychain index"))?;
            info!(path = %index_path.display(), "rebuilt missing keychain index from overflow files");
            counts
        } else {
            create_zeroed(&index_path, index_len)
                .map_err(|e| SectorError::io(&index_path, &e, "Failed to create keychain index"))?;
            info!(bytes = index_len, "generated keychain index");
            vec![0u32; total_buckets as usize]
        };

        if !first_overflow.exists() {
            create_zeroed(&first_overflow, overflow_len)
                .map_err(|e| SectorError::io(&first_overflow, &e, "Failed to create overflow file"))?;
            info!(file = 0, bytes = overflow_len, "generated keychain overflow file");
        }
        let first = open_rw(&first_overflow)
            .map_err(|e| SectorError::io(&first_overflow, &e, "Failed to open overflow file"))?;

        let capacity = NonZeroUsize::new(config.file_cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        let mut files = LruCache::new(capacity);
        files.put(0, Arc::new(first));

        let shared = Arc::new(Shared {
            state: Mutex::new(KeychainState { counts, files, dirty: false, shutdown: false }),
            wake: Condvar::new(),
            index_write: Mutex::new(()),
            index_path,
        });

        let thread_shared = Arc::clone(&shared);
        let flusher = thread::Builder::new()
            .name("sectordb-keychain".to_string())
            .spawn(move || index_flush_loop(thread_shared))
            .map_err(|e| SectorError::Io {
                path: Some(dir.clone()),
                kind: std::io::ErrorKind::Other,
                message: format!("Failed to spawn keychain flush thread: {}", e),
            })?;

        Ok(Self {
            dir,
            total_buckets,
            max_key_size,
            slot_size,
            mode: config.keychain_mode,
            shared,
            flusher: Some(flusher),
        })
    }

    pub fn bucket(&self, key: &[u8]) -> u32 {
        bucket_for(key, self.total_buckets)
    }

    pub fn compress(&self, key: &[u8]) -> Vec<u8> {
        compress_key(key, self.max_key_size)
    }

    /// Chain length of a bucket.
    pub fn chain_len(&self, bucket: u32) -> u32 {
        self.shared.state.lock().counts[bucket as usize]
    }

    /// Sum of all chain lengths (slots ever appended).
    pub fn total_keys(&self) -> u64 {
        self.shared.state.lock().counts.iter().map(|&c| c as u64).sum()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Recompute every bucket's chain length from the overflow files and
    /// persist the result.
    pub fn rebuild_index(&self) -> SectorResult<()> {
        let counts = rebuild_counts(&self.dir, self.total_buckets, self.max_key_size, self.slot_size)?;
        {
            let mut state = self.shared.state.lock();
            state.counts = counts;
        }
        self.shared.write_index(true)
    }

    fn slot_offset(&self, bucket: u32) -> u64 {
        bucket as u64 * self.slot_size as u64
    }

    /// Cached handle for an overflow file, opening it on a miss.
    fn handle(&self, state: &mut KeychainState, index: u32) -> SectorResult<Arc<File>> {
        if let Some(file) = state.files.get(&index) {
            return Ok(Arc::clone(file));
        }
        let path = overflow_path(&self.dir, index);
        let file = open_rw(&path).map_err(|e| {
            error!(file = index, path = %path.display(), error = %e, "couldn't open keychain overflow file");
            SectorError::io(&path, &e, "Failed to open overflow file")
        })?;
        let file = Arc::new(file);
        state.files.put(index, Arc::clone(&file));
        Ok(file)
    }

    fn read_slot(&self, file: &File, index: u32, bucket: u32) -> SectorResult<Option<Slot>> {
        let mut buf = vec![0u8; self.slot_size];
        let offset = self.slot_offset(bucket);
        read_exact_at(file, &mut buf, offset).map_err(|e| {
            error!(file = index, bucket, offset, error = %e, "keychain slot read failed");
            SectorError::io(overflow_path(&self.dir, index), &e, "Failed to read keychain slot")
        })?;
        Slot::decode(&buf, self.max_key_size).map_err(|reason| {
            error!(file = index, bucket, offset, %reason, "corrupt keychain slot");
            SectorError::CorruptSlot { file: index, bucket, reason }
        })
    }

    fn write_slot(&self, file: &File, index: u32, bucket: u32, bytes: &[u8]) -> SectorResult<()> {
        let offset = self.slot_offset(bucket);
        write_all_at(file, bytes, offset).map_err(|e| {
            error!(file = index, bucket, offset, error = %e, "keychain slot write failed");
            SectorError::io(overflow_path(&self.dir, index), &e, "Failed to write keychain slot")
        })
    }

    /// Walk the bucket chain newest-first, calling `visit` for every slot
    /// matching `compressed`. Stops early when `visit` returns false.
    fn scan_chain<F>(&self, bucket: u32, compressed: &[u8], mut visit: F) -> SectorResult<()>
    where
        F: FnMut(u32, &Arc<File>, Slot) -> SectorResult<bool>,
    {
        let chain = self.chain_len(bucket);
        for index in (0..chain).rev() {
            let file = {
                let mut state = self.shared.state.lock();
                self.handle(&mut state, index)?
            };
            let slot = match self.read_slot(&file, index, bucket) {
                Ok(Some(slot)) => slot,
                Ok(None) => continue,
                // logged by read_slot; the rest of the chain stays readable
                Err(SectorError::CorruptSlot { .. }) => continue,
                Err(e) => return Err(e),
            };
            if slot.matches(compressed) && !visit(index, &file, slot)? {
                break;
            }
        }
        Ok(())
    }

    fn mark_dirty(&self) {
        self.shared.state.lock().dirty = true;
        self.shared.wake.notify_one();
    }

    fn append(&self, bucket: u32, bytes: &[u8], key: &SectorKey) -> SectorResult<()> {
        let mut state = self.shared.state.lock();
        let index = state.counts[bucket as usize];

        let path = overflow_path(&self.dir, index);
        if !path.exists() {
            let len = self.total_buckets as u64 * self.slot_size as u64;
            let file = create_zeroed(&path, len).map_err(|e| {
                error!(file = index, error = %e, "couldn't generate keychain overflow file");
                SectorError::io(&path, &e, "Failed to create overflow file")
            })?;
            state.files.put(index, Arc::new(file));
            info!(file = index, bytes = len, "generated keychain overflow file");
        }

        let file = self.handle(&mut state, index)?;
        self.write_slot(&file, index, bucket, bytes)?;
        state.counts[bucket as usize] += 1;
        state.dirty = true;
        drop(state);
        self.shared.wake.notify_one();

        debug!(
            state = ?key.state,
            bucket,
            file = index,
            sector_file = key.sector_file,
            sector_start = key.sector_start,
            sector_size = key.sector_size,
            "appended keychain slot"
        );
        Ok(())
    }
}

impl Keychain for BinaryHashMap {
    fn get(&self, key: &[u8]) -> SectorResult<Option<SectorKey>> {
        let bucket = self.bucket(key);
        let compressed = self.compress(key);

        let mut found = None;
        self.scan_chain(bucket, &compressed, |index, _, slot| {
            let sector = slot.to_sector_key(key);
            trace!(
                state = ?sector.state,
                bucket,
                file = index,
                sector_file = sector.sector_file,
                sector_start = sector.sector_start,
                sector_size = sector.sector_size,
                "keychain hit"
            );
            found = Some(sector);
            Ok(false)
        })?;
        Ok(found)
    }

    fn get_all(&self, key: &[u8]) -> SectorResult<Vec<SectorKey>> {
        let bucket = self.bucket(key);
        let compressed = self.compress(key);

        let mut found = Vec::new();
        self.scan_chain(bucket, &compressed, |_, _, slot| {
            found.push(slot.to_sector_key(key));
            Ok(true)
        })?;
        Ok(found)
    }

    fn put(&self, key: &SectorKey) -> SectorResult<()> {
        let bucket = self.bucket(&key.key);
        let slot = Slot::for_key(key, self.max_key_size)?;
        let bytes = slot.encode(self.max_key_size);

        if self.mode == KeychainMode::Overwrite {
            let mut rewritten = false;
            self.scan_chain(bucket, &slot.compressed, |index, file, _| {
                self.write_slot(file, index, bucket, &bytes)?;
                debug!(bucket, file = index, sector_file = key.sector_file, "rewrote keychain slot");
                rewritten = true;
                Ok(false)
            })?;
            if rewritten {
                self.mark_dirty();
                return Ok(());
            }
        }

        self.append(bucket, &bytes, key)
    }

    fn erase(&self, key: &[u8]) -> SectorResult<bool> {
        let bucket = self.bucket(key);
        let compressed = self.compress(key);
        let blank = vec![0u8; self.slot_size];

        let mut erased = false;
        self.scan_chain(bucket, &compressed, |index, file, slot| {
            self.write_slot(file, index, bucket, &blank)?;
            debug!(
                bucket,
                file = index,
                sector_file = slot.header.sector_file,
                sector_start = slot.header.sector_start,
                "erased keychain slot"
            );
            erased = true;
            Ok(true)
        })?;

        if erased {
            self.mark_dirty();
        }
        Ok(erased)
    }

    fn flush(&self) -> SectorResult<()> {
        self.shared.write_index(true)
    }
}

impl Drop for BinaryHashMap {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.flusher.take() {
            let _ = handle.join();
        }
    }
}

fn overflow_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("_hashmap.{:05}", index))
}

/// Index flush thread: rewrite `_hashmap.index` whenever counts are dirty,
/// once more on shutdown if needed, then exit.
fn index_flush_loop(shared: Arc<Shared>) {
    loop {
        {
            let mut state = shared.state.lock();
            while !state.dirty && !state.shutdown {
                shared.wake.wait(&mut state);
            }
            if !state.dirty {
                return;
            }
        }

        if let Err(e) = shared.write_index(false) {
            error!(path = %shared.index_path.display(), error = %e, "keychain index flush failed");
        }
    }
}

/// Chain length per bucket = 1 + highest overflow file with an occupied slot.
fn rebuild_counts(dir: &Path, total_buckets: u32, max_key_size: usize, slot_size: usize) -> SectorResult<Vec<u32>> {
    let mut counts = vec![0u32; total_buckets as usize];
    let mut index = 0u32;

    loop {
        let path = overflow_path(dir, index);
        if !path.exists() {
            break;
        }
        let file = open_rw(&path).map_err(|e| SectorError::io(&path, &e, "Failed to open overflow file"))?;

        let mut bucket = 0u32;
        while bucket < total_buckets {
            let batch = REBUILD_BATCH_SLOTS.min((total_buckets - bucket) as usize);
            let mut buf = vec![0u8; batch * slot_size];
            read_exact_at(&file, &mut buf, bucket as u64 * slot_size as u64)
                .map_err(|e| SectorError::io(&path, &e, "Failed to read overflow file"))?;

            for (i, raw) in buf.chunks_exact(slot_size).enumerate() {
                match Slot::decode(raw, max_key_size) {
                    Ok(Some(_)) => counts[bucket as usize + i] = index + 1,
                    Ok(None) => {}
                    Err(reason) => {
                        error!(file = index, bucket = bucket + i as u32, %reason, "skipping corrupt slot during rebuild");
                    }
                }
            }
            bucket += batch as u32;
        }
        index += 1;
    }

    debug!(files = index, "rebuilt keychain counts");
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SectorState;
    use tempfile::TempDir;

    fn small_config() -> Config {
        Config::compact().with_total_buckets(16).with_max_key_size(8)
    }

    fn sector(key: &[u8], file: u32, start: u32, size: u32) -> SectorKey {
        SectorKey::new(SectorState::Ready, key.to_vec(), file, start, size)
    }

    #[test]
    fn test_open_creates_files() {
        let tmp = TempDir::new().unwrap();
        let keychain = BinaryHashMap::open(tmp.path(), &small_config()).unwrap();

        let index = std::fs::metadata(tmp.path().join("_hashmap.index")).unwrap();
        assert_eq!(index.len(), 16 * 4);
        let overflow = std::fs::metadata(tmp.path().join("_hashmap.00000")).unwrap();
        assert_eq!(overflow.len(), 16 * 21);
        assert_eq!(keychain.total_keys(), 0);
    }

    #[test]
    fn test_put_get() {
        let tmp = TempDir::new().unwrap();
        let keychain = BinaryHashMap::open(tmp.path(), &small_config()).unwrap();

        keychain.put(&sector(b"alpha", 0, 0, 1)).unwrap();
        let found = keychain.get(b"alpha").unwrap().unwrap();
        assert_eq!(found.key, b"alpha");
        assert_eq!(found.sector_size, 1);
        assert!(found.is_ready());
        assert!(keychain.get(b"beta").unwrap().is_none());
    }

    #[test]
    fn test_prefix_key_does_not_match() {
        let tmp = TempDir::new().unwrap();
        let keychain = BinaryHashMap::open(tmp.path(), &small_config().with_total_buckets(1)).unwrap();

        keychain.put(&sector(b"alphabet", 0, 0, 1)).unwrap();
        assert!(keychain.get(b"alpha").unwrap().is_none());
    }

    #[test]
    fn test_append_chain_newest_wins() {
        let tmp = TempDir::new().unwrap();
        let keychain = BinaryHashMap::open(tmp.path(), &small_config()).unwrap();
        let bucket = keychain.bucket(b"key");

        keychain.put(&sector(b"key", 0, 0, 10)).unwrap();
        keychain.put(&sector(b"key", 0, 10, 20)).unwrap();

        assert_eq!(keychain.chain_len(bucket), 2);
        assert!(tmp.path().join("_hashmap.00001").exists());
        assert_eq!(keychain.get(b"key").unwrap().unwrap().sector_start, 10);

        let all = keychain.get_all(b"key").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sector_start, 10);
        assert_eq!(all[1].sector_start, 0);
    }

    #[test]
    fn test_overwrite_mode_reuses_slot() {
        let tmp = TempDir::new().unwrap();
        let config = small_config().with_keychain_mode(KeychainMode::Overwrite);
        let keychain = BinaryHashMap::open(tmp.path(), &config).unwrap();
        let bucket = keychain.bucket(b"key");

        keychain.put(&sector(b"key", 0, 0, 10)).unwrap();
        keychain.put(&sector(b"key", 0, 10, 20)).unwrap();

        assert_eq!(keychain.chain_len(bucket), 1);
        assert_eq!(keychain.get(b"key").unwrap().unwrap().sector_start, 10);
    }

    #[test]
    fn test_erase_keeps_chain_length() {
        let tmp = TempDir::new().unwrap();
        let keychain = BinaryHashMap::open(tmp.path(), &small_config()).unwrap();
        let bucket = keychain.bucket(b"gone");

        keychain.put(&sector(b"gone", 0, 0, 4)).unwrap();
        keychain.put(&sector(b"gone", 0, 4, 4)).unwrap();
        assert!(keychain.erase(b"gone").unwrap());

        assert!(keychain.get(b"gone").unwrap().is_none());
        assert!(keychain.get_all(b"gone").unwrap().is_empty());
        assert_eq!(keychain.chain_len(bucket), 2);
        assert!(!keychain.erase(b"gone").unwrap());
    }

    #[test]
    fn test_long_keys_compressed() {
        let tmp = TempDir::new().unwrap();
        let keychain = BinaryHashMap::open(tmp.path(), &small_config()).unwrap();
        let long = vec![0x5Au8; 200];

        keychain.put(&sector(&long, 1, 2, 3)).unwrap();
        let found = keychain.get(&long).unwrap().unwrap();
        assert_eq!(found.key, long);
        assert_eq!(found.sector_file, 1);
    }

    #[test]
    fn test_index_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let keychain = BinaryHashMap::open(tmp.path(), &small_config()).unwrap();
            keychain.put(&sector(b"one", 0, 0, 1)).unwrap();
            keychain.put(&sector(b"two", 0, 1, 1)).unwrap();
        }
        let keychain = BinaryHashMap::open(tmp.path(), &small_config()).unwrap();
        assert_eq!(keychain.total_keys(), 2);
        assert_eq!(keychain.get(b"two").unwrap().unwrap().sector_start, 1);
    }

    #[test]
    fn test_missing_index_is_rebuilt() {
        let tmp = TempDir::new().unwrap();
        {
            let keychain = BinaryHashMap::open(tmp.path(), &small_config()).unwrap();
            keychain.put(&sector(b"k", 0, 0, 1)).unwrap();
            keychain.put(&sector(b"k", 0, 1, 1)).unwrap();
        }
        std::fs::remove_file(tmp.path().join("_hashmap.index")).unwrap();

        let keychain = BinaryHashMap::open(tmp.path(), &small_config()).unwrap();
        assert_eq!(keychain.chain_len(keychain.bucket(b"k")), 2);
        assert_eq!(keychain.get(b"k").unwrap().unwrap().sector_start, 1);
    }

    #[test]
    fn test_bucket_count_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        drop(BinaryHashMap::open(tmp.path(), &small_config()).unwrap());
        let result = BinaryHashMap::open(tmp.path(), &small_config().with_total_buckets(32));
        assert!(matches!(result, Err(SectorError::InvalidConfig(_))));
    }

    #[test]
    fn test_slot_size_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        drop(BinaryHashMap::open(tmp.path(), &small_config()).unwrap());
        // same bucket count, wider slots
        let result = BinaryHashMap::open(tmp.path(), &small_config().with_max_key_size(16));
        assert!(matches!(result, Err(SectorError::InvalidConfig(_))));
    }

    #[test]
    fn test_corrupt_slot_skipped_in_chain() {
        let tmp = TempDir::new().unwrap();
        let keychain = BinaryHashMap::open(tmp.path(), &small_config()).unwrap();
        let bucket = keychain.bucket(b"k");
        keychain.put(&sector(b"k", 0, 0, 10)).unwrap();
        keychain.put(&sector(b"k", 0, 10, 10)).unwrap();

        // unknown state byte in the newest slot
        let file = crate::io::open_rw(&tmp.path().join("_hashmap.00001")).unwrap();
        crate::io::write_all_at(&file, &[0x7F], bucket as u64 * 21).unwrap();

        assert_eq!(keychain.get(b"k").unwrap().unwrap().sector_start, 0);
        assert_eq!(keychain.get_all(b"k").unwrap().len(), 1);
        assert!(keychain.erase(b"k").unwrap());
        assert!(keychain.get(b"k").unwrap().is_none());
    }

    #[test]
    fn test_bucket_in_range() {
        for i in 0..1000u32 {
            assert!(bucket_for(&i.to_le_bytes(), 16) < 16);
        }
    }
}
