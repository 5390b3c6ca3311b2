//! Configuration management for the sector database
//!
//! Provides size presets for a full ledger node and for small embedded
//! stores, plus `with_*` adjusters for custom configurations.

use std::time::Duration;

use crate::error::{SectorError, SectorResult};

/// How the keychain places a `SectorKey` for a key it has seen before
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeychainMode {
    /// Always write a new slot at the end of the bucket chain
    Append,
    /// Rewrite the newest matching slot in place, append if none matches
    Overwrite,
}

/// Sector database configuration with size presets
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of keychain buckets (slots per overflow file)
    pub total_buckets: u32,
    /// Keys longer than this are compressed before being stored in a slot
    pub max_key_size: u16,
    /// Payload cache capacity (entries)
    pub cache_capacity: usize,
    /// Keychain overflow-file handles kept open
    pub file_cache_capacity: usize,
    /// Block file rollover threshold (bytes)
    pub max_sector_file_size: u64,
    /// Buffered-but-unflushed bytes before writers block
    pub max_sector_buffer_size: u64,
    /// Bytes accumulated by the flusher before each block-file write
    pub flush_chunk_size: usize,
    /// Keychain slot placement
    pub keychain_mode: KeychainMode,
    /// Reject every mutation
    pub read_only: bool,
    /// Log throughput meters at this interval (None disables the meter thread)
    pub meter_interval: Option<Duration>,
}

impl Config {
    /// Full ledger node: 1.5M buckets, 128MB block files and write buffer
    pub fn ledger() -> Self {
        Self {
            total_buckets: 256 * 256 * 24,
            max_key_size: 32,
            cache_capacity: 64 * 1024,
            file_cache_capacity: 8,
            max_sector_file_size: 128 * 1024 * 1024,
            max_sector_buffer_size: 128 * 1024 * 1024,
            flush_chunk_size: 20 * 1024 * 1024,
            keychain_mode: KeychainMode::Append,
            read_only: false,
            meter_interval: None,
        }
    }

    /// Small footprint: 64K buckets, 16MB block files and write buffer
    pub fn compact() -> Self {
        Self {
            total_buckets: 256 * 256,
            max_key_size: 32,
            cache_capacity: 4 * 1024,
            file_cache_capacity: 4,
            max_sector_file_size: 16 * 1024 * 1024,
            max_sector_buffer_size: 16 * 1024 * 1024,
            flush_chunk_size: 1024 * 1024,
            keychain_mode: KeychainMode::Append,
            read_only: false,
            meter_interval: None,
        }
    }

    pub fn with_total_buckets(mut self, total_buckets: u32) -> Self {
        self.total_buckets = total_buckets;
        self
    }

    pub fn with_max_key_size(mut self, max_key_size: u16) -> Self {
        self.max_key_size = max_key_size;
        self
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_max_sector_file_size(mut self, bytes: u64) -> Self {
        self.max_sector_file_size = bytes;
        self
    }

    pub fn with_max_sector_buffer_size(mut self, bytes: u64) -> Self {
        self.max_sector_buffer_size = bytes;
        self
    }

    pub fn with_flush_chunk_size(mut self, bytes: usize) -> Self {
        self.flush_chunk_size = bytes;
        self
    }

    pub fn with_keychain_mode(mut self, mode: KeychainMode) -> Self {
        self.keychain_mode = mode;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_meter_interval(mut self, interval: Duration) -> Self {
        self.meter_interval = Some(interval);
        self
    }

    /// Bytes one keychain slot occupies on disk.
    pub fn slot_size(&self) -> usize {
        crate::key::SLOT_HEADER_SIZE + self.max_key_size as usize
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> SectorResult<()> {
        if self.total_buckets == 0 {
            return Err(SectorError::InvalidConfig("total_buckets must be > 0".into()));
        }
        if self.max_key_size == 0 {
            return Err(SectorError::InvalidConfig("max_key_size must be > 0".into()));
        }
        if self.cache_capacity == 0 {
            return Err(SectorError::InvalidConfig("cache_capacity must be > 0".into()));
        }
        if self.file_cache_capacity == 0 {
            return Err(SectorError::InvalidConfig("file_cache_capacity must be > 0".into()));
        }
        if self.max_sector_file_size == 0 || self.max_sector_file_size > u32::MAX as u64 {
            return Err(SectorError::InvalidConfig(
                "max_sector_file_size must be in [1, 4GB)".into(),
            ));
        }
        if self.max_sector_buffer_size == 0 {
            return Err(SectorError::InvalidConfig("max_sector_buffer_size must be > 0".into()));
        }
        if self.flush_chunk_size == 0 {
            return Err(SectorError::InvalidConfig("flush_chunk_size must be > 0".into()));
        }
        if let Some(interval) = self.meter_interval {
            if interval.is_zero() {
                return Err(SectorError::InvalidConfig("meter_interval must be > 0".into()));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::ledger() }
}
