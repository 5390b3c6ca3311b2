//! sectordb: hashed keychain and sector record store
//!
//! A disk-backed key-value engine for ledger state. Keys and values are
//! opaque bytes.
//!
//! # Architecture
//!
//! - **Keychain** ([`BinaryHashMap`]): raw key -> [`SectorKey`] location,
//!   stored as fixed-size slots chained across overflow files per bucket
//! - **Record store** ([`SectorDatabase`]): payload bytes in append-only block
//!   files, an LRU payload cache, and a write buffer drained by a background
//!   flusher
//! - **Transactions**: begin/write/erase/commit/abort overlay with a manual
//!   `rollback_transactions` for failed commits
//!
//! There is no write-ahead log. Writes that have not been flushed are lost
//! on a crash, and a failed commit leaves the keychain partially committed.
//!
//! # Layout
//!
//! ```text
//! <root>/keychain/_hashmap.index    bucket chain lengths
//! <root>/keychain/_hashmap.NNNNN    overflow files of keychain slots
//! <root>/datachain/_block.NNNNN     payload bytes
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod io;
pub mod key;
pub mod keychain;
pub mod sector;
pub mod stats;

pub use cache::{BinaryLru, PayloadCache};
pub use config::{Config, KeychainMode};
pub use error::{SectorError, SectorResult};
pub use key::{compress_key, SectorKey, SectorState, Slot, SlotHeader};
pub use keychain::{bucket_for, BinaryHashMap, Keychain};
pub use sector::{CommitJournal, NoJournal, SectorDatabase, SectorTransaction, TxnView};
pub use stats::{SectorStats, StatsSnapshot};
