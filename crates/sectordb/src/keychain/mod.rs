//! Keychains map raw keys to the location of their payload.
//!
//! The sector database only talks to its keychain through [`Keychain`], so
//! alternative index structures can be dropped in beneath it.

mod hashmap;

pub use hashmap::{bucket_for, BinaryHashMap};

use crate::error::SectorResult;
use crate::key::SectorKey;

/// Durable `key -> SectorKey` index.
pub trait Keychain: Send + Sync + 'static {
    /// Most recent location written for `key`.
    fn get(&self, key: &[u8]) -> SectorResult<Option<SectorKey>>;

    /// Every location whose slot matches `key`, newest first.
    fn get_all(&self, key: &[u8]) -> SectorResult<Vec<SectorKey>>;

    /// Persist a location record under `key.key`.
    fn put(&self, key: &SectorKey) -> SectorResult<()>;

    /// Clear every slot matching `key`. Returns whether any was cleared.
    fn erase(&self, key: &[u8]) -> SectorResult<bool>;

    fn has_key(&self, key: &[u8]) -> SectorResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Write any in-memory index state to disk now.
    fn flush(&self) -> SectorResult<()>;
}
