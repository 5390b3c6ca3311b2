//! Block file storage for sector payloads
//!
//! Payload bytes are appended to `_block.00000`, `_block.00001`, ... with no
//! framing: a sector is located purely by the `(file, start, size)` its
//! keychain record holds. A file rolls over once the next sector would push
//! it past `max_sector_file_size`. Sectors never move.

use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use tracing::{debug, info};

use crate::error::{SectorError, SectorResult};
use crate::io::{durable_sync, read_exact_at, write_all_at};
use crate::key::MAX_SECTOR_FILE;

/// Open handle on one block file.
#[derive(Clone)]
pub struct BlockHandle {
    pub index: u32,
    path: PathBuf,
    file: Arc<File>,
}

impl BlockHandle {
    pub fn read(&self, start: u32, size: u32) -> SectorResult<Vec<u8>> {
        let mut buf = vec![0u8; size as usize];
        read_exact_at(&self.file, &mut buf, start as u64).map_err(|e| {
            SectorError::io(&self.path, &e, &format!("Failed to read sector at offset {}", start))
        })?;
        Ok(buf)
    }

    pub fn write(&self, start: u32, bytes: &[u8]) -> SectorResult<()> {
        write_all_at(&self.file, bytes, start as u64).map_err(|e| {
            SectorError::io(&self.path, &e, &format!("Failed to write sector at offset {}", start))
        })
    }

    pub fn sync(&self) -> SectorResult<()> {
        durable_sync(&self.file).map_err(|e| SectorError::io(&self.path, &e, "Block file durable_sync failed"))
    }
}

/// Write cursor over the block files plus a cache of open handles.
pub struct BlockFiles {
    dir: PathBuf,
    /// Index of the file new sectors are appended to
    current: u32,
    /// Bytes allocated in the current file
    current_size: u64,
    max_file_size: u64,
    handles: LruCache<u32, BlockHandle>,
}

impl BlockFiles {
    /// Scan `dir` for `_block.NNNNN` files. The highest contiguous index is
    /// current and its length is the write cursor; file 0 is created when
    /// the directory holds none.
    pub fn open(dir: &Path, max_file_size: u64, handle_capacity: usize) -> SectorResult<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| SectorError::io(dir, &e, "Failed to create block directory"))?;

        let mut next = 0u32;
        while block_path(dir, next).exists() {
            next += 1;
        }
        let current = next.saturating_sub(1);

        let capacity = NonZeroUsize::new(handle_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        let mut blocks = Self {
            dir: dir.to_path_buf(),
            current,
            current_size: 0,
            max_file_size,
            handles: LruCache::new(capacity),
        };

        let handle = blocks.open_handle(current)?;
        blocks.current_size = handle
            .file
            .metadata()
            .map_err(|e| SectorError::io(&handle.path, &e, "Failed to stat block file"))?
            .len();

        if next == 0 {
            info!(file = current, "generated block file");
        } else {
            info!(file = current, size = blocks.current_size, "loaded block files");
        }
        Ok(blocks)
    }

    pub fn current_file(&self) -> u32 {
        self.current
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// Reserve `len` bytes for a new sector. Returns `(file, start)`.
    pub fn allocate(&mut self, len: usize) -> SectorResult<(u32, u32)> {
        let len = len as u64;
        if len > self.max_file_size {
            return Err(SectorError::OversizedValue { size: len as usize, max: self.max_file_size });
        }
        if self.current_size > 0 && self.current_size + len > self.max_file_size {
            self.rotate()?;
        }

        let start = self.current_size as u32;
        self.current_size += len;
        Ok((self.current, start))
    }

    /// Cached handle for block file `index`, opening it on a miss.
    pub fn handle(&mut self, index: u32) -> SectorResult<BlockHandle> {
        if let Some(handle) = self.handles.get(&index) {
            return Ok(handle.clone());
        }
        self.open_handle(index)
    }

    fn open_handle(&mut self, index: u32) -> SectorResult<BlockHandle> {
        let path = block_path(&self.dir, index);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(index == self.current)
            .open(&path)
            .map_err(|e| SectorError::io(&path, &e, "Failed to open block file"))?;

        let handle = BlockHandle { index, path, file: Arc::new(file) };
        self.handles.put(index, handle.clone());
        Ok(handle)
    }

    /// Sync the current file and start appending to the next one.
    fn rotate(&mut self) -> SectorResult<()> {
        let next = self.current + 1;
        if next > MAX_SECTOR_FILE {
            return Err(SectorError::SectorFileOverflow { file: next, max: MAX_SECTOR_FILE });
        }

        self.handle(self.current)?.sync()?;
        debug!(file = self.current, size = self.current_size, "sealed block file");

        self.current = next;
        self.current_size = 0;
        self.open_handle(next)?;
        info!(file = next, "rolled over to new block file");
        Ok(())
    }
}

fn block_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("_block.{:05}", index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_first_file() {
        let tmp = TempDir::new().unwrap();
        let blocks = BlockFiles::open(tmp.path(), 1024, 4).unwrap();

        assert!(tmp.path().join("_block.00000").exists());
        assert_eq!(blocks.current_file(), 0);
        assert_eq!(blocks.current_size(), 0);
    }

    #[test]
    fn test_allocate_write_read() {
        let tmp = TempDir::new().unwrap();
        let mut blocks = BlockFiles::open(tmp.path(), 1024, 4).unwrap();

        let (file, start) = blocks.allocate(5).unwrap();
        blocks.handle(file).unwrap().write(start, b"hello").unwrap();
        let (file2, start2) = blocks.allocate(5).unwrap();
        blocks.handle(file2).unwrap().write(start2, b"world").unwrap();

        assert_eq!((file, start), (0, 0));
        assert_eq!((file2, start2), (0, 5));
        assert_eq!(blocks.handle(0).unwrap().read(5, 5).unwrap(), b"world");
    }

    #[test]
    fn test_rollover_at_limit() {
        let tmp = TempDir::new().unwrap();
        let mut blocks = BlockFiles::open(tmp.path(), 10, 4).unwrap();

        assert_eq!(blocks.allocate(8).unwrap(), (0, 0));
        assert_eq!(blocks.allocate(4).unwrap(), (1, 0));
        assert_eq!(blocks.allocate(6).unwrap(), (1, 4));
        assert!(tmp.path().join("_block.00001").exists());
    }

    #[test]
    fn test_oversized_value_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut blocks = BlockFiles::open(tmp.path(), 10, 4).unwrap();
        assert!(matches!(blocks.allocate(11), Err(SectorError::OversizedValue { .. })));
    }

    #[test]
    fn test_reopen_resumes_cursor() {
        let tmp = TempDir::new().unwrap();
        {
            let mut blocks = BlockFiles::open(tmp.path(), 10, 4).unwrap();
            blocks.allocate(8).unwrap();
            let (file, start) = blocks.allocate(3).unwrap();
            blocks.handle(file).unwrap().write(start, b"abc").unwrap();
        }
        let blocks = BlockFiles::open(tmp.path(), 10, 4).unwrap();
        assert_eq!(blocks.current_file(), 1);
        assert_eq!(blocks.current_size(), 3);
    }
}
