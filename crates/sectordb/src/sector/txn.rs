//! Transaction state and the commit journal seam.
//!
//! A transaction is an in-memory overlay: pending writes and erases are
//! visible to reads on the same store until commit or abort, and the value
//! each key held before its first touch is kept for `rollback_transactions`.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SectorResult;

/// What an open transaction says about a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnView {
    /// Erased by the transaction
    Erased,
    /// Written by the transaction
    Written(Vec<u8>),
    /// Not touched; fall through to committed state
    Untouched,
}

#[derive(Debug, Default, Clone)]
pub struct SectorTransaction {
    pending_writes: BTreeMap<Vec<u8>, Vec<u8>>,
    pending_erases: BTreeSet<Vec<u8>>,
    /// Committed value at first touch; `None` when the key did not exist
    original_values: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl SectorTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self, key: &[u8]) -> TxnView {
        if self.pending_erases.contains(key) {
            return TxnView::Erased;
        }
        match self.pending_writes.get(key) {
            Some(value) => TxnView::Written(value.clone()),
            None => TxnView::Untouched,
        }
    }

    /// Whether the committed value of `key` still has to be recorded.
    pub fn needs_original(&self, key: &[u8]) -> bool {
        !self.original_values.contains_key(key)
    }

    pub fn record_original(&mut self, key: &[u8], committed: Option<Vec<u8>>) {
        self.original_values.entry(key.to_vec()).or_insert(committed);
    }

    pub fn write(&mut self, key: &[u8], value: &[u8]) {
        self.pending_erases.remove(key);
        self.pending_writes.insert(key.to_vec(), value.to_vec());
    }

    pub fn erase(&mut self, key: &[u8]) {
        self.pending_writes.remove(key);
        self.pending_erases.insert(key.to_vec());
    }

    pub fn pending_writes(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.pending_writes
    }

    pub fn pending_erases(&self) -> &BTreeSet<Vec<u8>> {
        &self.pending_erases
    }

    pub fn original_values(&self) -> &BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        &self.original_values
    }

    pub fn is_empty(&self) -> bool {
        self.pending_writes.is_empty() && self.pending_erases.is_empty()
    }
}

/// Hooks around `txn_commit`.
///
/// `prepare` runs before the first keychain mutation and `finish` after the
/// last. An error from `prepare` aborts the commit with nothing applied.
pub trait CommitJournal: Send + Sync + 'static {
    fn prepare(&self, txn: &SectorTransaction) -> SectorResult<()>;
    fn finish(&self, txn: &SectorTransaction) -> SectorResult<()>;
}

/// Journal that records nothing: a crash mid-commit leaves the keychain
/// partially committed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJournal;

impl CommitJournal for NoJournal {
    fn prepare(&self, _txn: &SectorTransaction) -> SectorResult<()> {
        Ok(())
    }

    fn finish(&self, _txn: &SectorTransaction) -> SectorResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_tracks_last_operation() {
        let mut txn = SectorTransaction::new();
        assert_eq!(txn.view(b"k"), TxnView::Untouched);

        txn.write(b"k", b"v1");
        assert_eq!(txn.view(b"k"), TxnView::Written(b"v1".to_vec()));

        txn.erase(b"k");
        assert_eq!(txn.view(b"k"), TxnView::Erased);
        assert!(txn.pending_writes().is_empty());

        txn.write(b"k", b"v2");
        assert_eq!(txn.view(b"k"), TxnView::Written(b"v2".to_vec()));
        assert!(txn.pending_erases().is_empty());
    }

    #[test]
    fn test_original_recorded_once() {
        let mut txn = SectorTransaction::new();
        assert!(txn.needs_original(b"k"));

        txn.record_original(b"k", Some(b"committed".to_vec()));
        txn.record_original(b"k", Some(b"later".to_vec()));

        assert!(!txn.needs_original(b"k"));
        assert_eq!(txn.original_values()[b"k".as_slice()], Some(b"committed".to_vec()));
    }

    #[test]
    fn test_empty() {
        let mut txn = SectorTransaction::new();
        assert!(txn.is_empty());
        txn.erase(b"gone");
        assert!(!txn.is_empty());
    }
}
