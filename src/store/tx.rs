/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Read and write transactions over the keyed store.
//!
//! A [WriteTx] applies each mutation to the tree immediately and records a pair of items: the rollback
//! item restoring the previous value, and the commit item appended to the log. [WriteTx::commit] appends
//! the commit items as one batch; [WriteTx::rollback] (or dropping the transaction) replays the rollback
//! items in reverse.

use std::io::{Seek, SeekFrom, Write};
use std::ops::Bound;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, trace};

use super::record::{self, Record};
use super::{Inner, LogFile, SyncMode, Tree};
use crate::error::StoreError;

/// Lexicographic successor of all keys starting with `prefix`, i.e. the exclusive upper bound of the
/// prefix range. None when every byte is 0xff (the range is unbounded above).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Read access shared by [ReadTx] and [WriteTx].
///
/// Iteration callbacks return `true` to continue and `false` to stop.
pub trait StoreRead {
    fn tree(&self) -> &Tree;

    /// Checked before every iteration.
    fn check_iterate(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.tree().get(key).cloned().ok_or(StoreError::NotFound)
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.tree().contains_key(key)
    }

    fn ascend<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        walk(self, Bound::Unbounded, Bound::Unbounded, true, f)
    }

    fn descend<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        walk(self, Bound::Unbounded, Bound::Unbounded, false, f)
    }

    /// Ascending over the half-open range `[start, end)`.
    fn ascend_range<F>(&self, start: &[u8], end: &[u8], f: F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        if start > end {
            return self.check_iterate();
        }
        walk(self, Bound::Included(start), Bound::Excluded(end), true, f)
    }

    /// Descending over the half-open range `[start, end)`.
    fn descend_range<F>(&self, start: &[u8], end: &[u8], f: F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        if start > end {
            return self.check_iterate();
        }
        walk(self, Bound::Included(start), Bound::Excluded(end), false, f)
    }

    /// Ascending over every key that starts with `prefix`.
    fn iterate<F>(&self, prefix: &[u8], f: F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        match prefix_successor(prefix) {
            Some(end) => walk(self, Bound::Included(prefix), Bound::Excluded(end.as_slice()), true, f),
            None => walk(self, Bound::Included(prefix), Bound::Unbounded, true, f),
        }
    }
}

fn walk<T, F>(
    tx: &T,
    lower: Bound<&[u8]>,
    upper: Bound<&[u8]>,
    ascending: bool,
    mut f: F,
) -> Result<(), StoreError>
where
    T: StoreRead + ?Sized,
    F: FnMut(&[u8], &[u8]) -> bool,
{
    tx.check_iterate()?;
    let range = tx.tree().range::<[u8], _>((lower, upper));
    if ascending {
        for (k, v) in range {
            if !f(k, v) {
                break;
            }
        }
    } else {
        for (k, v) in range.rev() {
            if !f(k, v) {
                break;
            }
        }
    }
    Ok(())
}

/// Shared-lock transaction.
pub struct ReadTx<'s> {
    tree: RwLockReadGuard<'s, Tree>,
}

impl<'s> ReadTx<'s> {
    pub(crate) fn new(tree: RwLockReadGuard<'s, Tree>) -> Self {
        Self { tree }
    }
}

impl StoreRead for ReadTx<'_> {
    fn tree(&self) -> &Tree {
        &self.tree
    }
}

/// Inverse of a mutation, replayed on rollback.
enum Undo {
    Set(Vec<u8>, Vec<u8>),
    Del(Vec<u8>),
    Restore(Tree),
}

/// Exclusive-lock transaction.
pub struct WriteTx<'s> {
    inner: &'s Inner,
    tree: RwLockWriteGuard<'s, Tree>,
    rollback: Vec<Undo>,
    commit: Vec<Record>,
    done: bool,
}

impl<'s> WriteTx<'s> {
    pub(crate) fn new(inner: &'s Inner, tree: RwLockWriteGuard<'s, Tree>) -> Self {
        Self { inner, tree, rollback: Vec::new(), commit: Vec::new(), done: false }
    }

    pub fn set(&mut self, key: &[u8], value: Vec<u8>) {
        let undo = match self.tree.insert(key.to_vec(), value.clone()) {
            Some(prev) => Undo::Set(key.to_vec(), prev),
            None => Undo::Del(key.to_vec()),
        };
        self.rollback.push(undo);
        self.commit.push(Record::Set(key.to_vec(), value));
    }

    /// Deletes `key`. Deleting an absent key records nothing.
    pub fn delete(&mut self, key: &[u8]) {
        if let Some(prev) = self.tree.remove(key) {
            self.rollback.push(Undo::Set(key.to_vec(), prev));
            self.commit.push(Record::Del(key.to_vec()));
        }
    }

    /// Empties the whole tree.
    pub fn flush(&mut self) {
        let old = std::mem::take(&mut *self.tree);
        self.rollback.push(Undo::Restore(old));
        self.commit.push(Record::Flush);
    }

    /// Number of buffered commit items.
    pub fn pending(&self) -> usize {
        self.commit.len()
    }

    /// Appends the buffered records as one batch and releases the lock.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.done = true;
        if self.inner.closed.load(std::sync::atomic::Ordering::SeqCst) {
            self.undo();
            return Err(StoreError::TxClosed);
        }
        if self.commit.is_empty() {
            return Ok(());
        }

        let bytes = match record::encode_batch(&self.commit) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.undo();
                return Err(e.into());
            }
        };

        let result = {
            let mut log = self.inner.log.lock();
            append(&mut log, &bytes, self.inner.config.sync)
        };
        match result {
            Ok(()) => {
                trace!(records = self.commit.len(), bytes = bytes.len(), "batch committed");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to append batch; rolling back");
                self.undo();
                Err(e.into())
            }
        }
    }

    /// Restores the tree to its state at the start of the transaction and releases the lock.
    pub fn rollback(mut self) {
        self.done = true;
        self.undo();
    }

    fn undo(&mut self) {
        while let Some(undo) = self.rollback.pop() {
            match undo {
                Undo::Set(key, value) => {
                    self.tree.insert(key, value);
                }
                Undo::Del(key) => {
                    self.tree.remove(&key);
                }
                Undo::Restore(tree) => *self.tree = tree,
            }
        }
        self.commit.clear();
    }
}

impl StoreRead for WriteTx<'_> {
    fn tree(&self) -> &Tree {
        &self.tree
    }

    fn check_iterate(&self) -> Result<(), StoreError> {
        if self.commit.is_empty() {
            Ok(())
        } else {
            Err(StoreError::TxIterating)
        }
    }
}

impl Drop for WriteTx<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.undo();
        }
    }
}

fn append(log: &mut LogFile, bytes: &[u8], sync: SyncMode) -> std::io::Result<()> {
    log.file.seek(SeekFrom::Start(log.size))?;
    log.file.write_all(bytes)?;
    log.size += bytes.len() as u64;
    if sync == SyncMode::Always {
        log.file.sync_data()?;
    } else {
        log.dirty = true;
    }
    Ok(())
}
