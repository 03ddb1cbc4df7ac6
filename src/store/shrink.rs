/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Log compaction.
//!
//! A compaction rewrites the log as a sequence of `SET` batches reproducing the current tree. It runs in
//! two phases so that writers are blocked only briefly:
//! 1. Snapshot the tree together with the log offset it corresponds to, and stream the snapshot into a
//!    temporary file without holding any lock.
//! 2. Take the log lock, copy every batch committed after the snapshot offset onto the end of the
//!    temporary file, and rename it over the log.
//!
//! The compacted log carries no FLUSH record: it replaces the old file whole, so replay starts from an
//! empty tree anyway. The parent directory is synced after the rename so the swap survives a power loss.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::record::{self, Record};
use super::{sleep_unless_shutdown, Inner};
use crate::error::StoreError;

/// Records per batch in a compacted log.
const SHRINK_BATCH: usize = 1024;

/// When the background worker compacts the log.
#[derive(Debug, Clone)]
pub struct ShrinkPolicy {
    /// Never compact a log smaller than this many bytes.
    pub min_size: u64,
    /// Compact once the log has grown by this percentage over its size after the last compaction.
    pub percent: u64,
    pub check_interval: Duration,
}

impl Default for ShrinkPolicy {
    fn default() -> Self {
        Self { min_size: 64 * 1024 * 1024, percent: 100, check_interval: Duration::from_secs(1) }
    }
}

impl ShrinkPolicy {
    pub fn new(min_size: u64, percent: u64, check_interval: Duration) -> Self {
        Self { min_size, percent, check_interval }
    }

    pub(crate) fn should_shrink(&self, size: u64, last_size: u64) -> bool {
        size > self.min_size && size >= last_size.saturating_mul(100 + self.percent) / 100
    }
}

/// Clears the `shrinking` flag on every exit path.
struct ShrinkingGuard<'a>(&'a AtomicBool);

impl Drop for ShrinkingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub(crate) fn shrink(inner: &Inner) -> Result<(), StoreError> {
    if inner.config.read_only {
        return Err(StoreError::TxNotWritable);
    }
    if inner
        .shrinking
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(StoreError::ShrinkInProcess);
    }
    let _guard = ShrinkingGuard(&inner.shrinking);

    let (snapshot, offset) = {
        let tree = inner.tree.read();
        let log = inner.log.lock();
        (tree.clone(), log.size)
    };
    debug!(keys = snapshot.len(), offset, "shrink started");

    let temp_path = inner.path.with_extension("shrink");
    let mut temp = BufWriter::new(
        OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&temp_path)?,
    );

    let mut batch = Vec::with_capacity(SHRINK_BATCH);
    for (key, value) in snapshot {
        if inner.shutdown.load(Ordering::SeqCst) {
            drop(temp);
            let _ = std::fs::remove_file(&temp_path);
            debug!("shrink abandoned on shutdown");
            return Ok(());
        }
        batch.push(Record::Set(key, value));
        if batch.len() == SHRINK_BATCH {
            temp.write_all(&record::encode_batch(&batch)?)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        temp.write_all(&record::encode_batch(&batch)?)?;
    }
    let mut temp = temp.into_inner().map_err(|e| e.into_error())?;

    let mut log = inner.log.lock();
    let tail_len = log.size - offset;
    if tail_len > 0 {
        let mut live = File::open(&inner.path)?;
        live.seek(SeekFrom::Start(offset))?;
        let copied = std::io::copy(&mut live.take(tail_len), &mut temp)?;
        if copied != tail_len {
            drop(temp);
            let _ = std::fs::remove_file(&temp_path);
            return Err(StoreError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
    }
    temp.sync_all()?;
    drop(temp);

    let before = log.size;
    std::fs::rename(&temp_path, &inner.path)?;
    sync_parent_dir(&inner.path)?;
    let mut file = OpenOptions::new().read(true).write(true).open(&inner.path)?;
    let size = file.seek(SeekFrom::End(0))?;
    log.file = file;
    log.size = size;
    log.dirty = false;
    inner.last_shrink_size.store(size, Ordering::SeqCst);

    info!(before, after = size, tail = tail_len, "log shrunk");
    Ok(())
}

/// Makes a rename inside the directory durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => File::open(dir)?.sync_all(),
        None => File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

pub(crate) fn shrink_worker(weak: Weak<Inner>, shutdown: Arc<AtomicBool>, policy: ShrinkPolicy) {
    while sleep_unless_shutdown(&shutdown, policy.check_interval) {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let size = inner.log.lock().size;
        let last = inner.last_shrink_size.load(Ordering::SeqCst);
        if !policy.should_shrink(size, last) {
            continue;
        }
        match shrink(&inner) {
            Ok(()) | Err(StoreError::ShrinkInProcess) => {}
            Err(e) => warn!(error = %e, "background shrink failed"),
        }
    }
}
