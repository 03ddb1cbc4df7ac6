/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Durable ordered map from byte-string keys to byte-string values.
//!
//! The map lives in memory as a [BTreeMap]. Durability comes from an append-only log of
//! per-transaction record groups (see [record]). Opening a store replays the log; bytes past the last
//! complete transaction are truncated. A background worker compacts ("shrinks") the log once it has
//! grown enough relative to its last compacted size.
//!
//! Concurrency: read transactions share the tree lock, a write transaction holds it exclusively until
//! it commits or rolls back. Commits append to the log under a second lock, which is also the lock the
//! flusher and the compactor take.

pub(crate) mod record;

pub mod shrink;
pub use shrink::ShrinkPolicy;

pub mod tx;
pub use tx::{prefix_successor, ReadTx, StoreRead, WriteTx};

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// In-memory representation of the store.
pub type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// When committed batches reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Leave it to the operating system.
    Never,
    /// A background worker syncs dirty data once a second.
    #[default]
    EverySecond,
    /// `fsync` on every commit.
    Always,
}

/// Configuration of a [Store].
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub sync: SyncMode,
    /// Background compaction. None disables it; [Store::shrink] can still be called.
    pub shrink: Option<ShrinkPolicy>,
    /// Refuse write transactions with [StoreError::TxNotWritable].
    pub read_only: bool,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sync_mode(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    pub fn set_shrink_policy(mut self, policy: ShrinkPolicy) -> Self {
        self.shrink = Some(policy);
        self
    }

    pub fn set_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Handle on the live log file.
pub(crate) struct LogFile {
    pub file: File,
    /// Length of the valid log in bytes.
    pub size: u64,
    /// Data written since the last sync.
    pub dirty: bool,
}

pub(crate) struct Inner {
    pub path: PathBuf,
    pub config: StoreConfig,
    pub tree: RwLock<Tree>,
    pub log: Mutex<LogFile>,
    pub closed: AtomicBool,
    pub shrinking: AtomicBool,
    pub last_shrink_size: AtomicU64,
    pub shutdown: Arc<AtomicBool>,
}

/// The append-only keyed store. Cloning yields another handle on the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Store {
    /// Opens (or creates) the log at `path` and replays it into memory.
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(!config.read_only)
            .create(!config.read_only)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let replay = record::replay(BufReader::new(&mut file))?;
        if replay.valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len = replay.valid_len,
                file_len,
                "discarding torn batch at the end of the log"
            );
            if !config.read_only {
                file.set_len(replay.valid_len)?;
                file.sync_all()?;
            }
        }
        file.seek(SeekFrom::Start(replay.valid_len))?;
        info!(
            path = %path.display(),
            keys = replay.tree.len(),
            batches = replay.batches,
            size = replay.valid_len,
            "store loaded"
        );

        let inner = Arc::new(Inner {
            path,
            tree: RwLock::new(replay.tree),
            log: Mutex::new(LogFile { file, size: replay.valid_len, dirty: false }),
            closed: AtomicBool::new(false),
            shrinking: AtomicBool::new(false),
            last_shrink_size: AtomicU64::new(replay.valid_len),
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        });

        let store = Store { inner, workers: Arc::new(Mutex::new(Vec::new())) };
        if !store.inner.config.read_only {
            store.start_workers();
        }
        Ok(store)
    }

    fn start_workers(&self) {
        let mut workers = self.workers.lock();
        if self.inner.config.sync == SyncMode::EverySecond {
            let weak = Arc::downgrade(&self.inner);
            let shutdown = Arc::clone(&self.inner.shutdown);
            workers.push(std::thread::spawn(move || {
                flush_worker(weak, shutdown, Duration::from_secs(1))
            }));
        }
        if let Some(policy) = self.inner.config.shrink.clone() {
            let weak = Arc::downgrade(&self.inner);
            let shutdown = Arc::clone(&self.inner.shutdown);
            workers.push(std::thread::spawn(move || shrink::shrink_worker(weak, shutdown, policy)));
        }
    }

    /// Starts a read transaction. It holds the shared lock until dropped.
    pub fn read_tx(&self) -> Result<ReadTx<'_>, StoreError> {
        self.ensure_open()?;
        Ok(ReadTx::new(self.inner.tree.read()))
    }

    /// Starts a write transaction. It holds the exclusive lock until committed, rolled back or dropped.
    pub fn write_tx(&self) -> Result<WriteTx<'_>, StoreError> {
        self.ensure_open()?;
        if self.inner.config.read_only {
            return Err(StoreError::TxNotWritable);
        }
        Ok(WriteTx::new(&self.inner, self.inner.tree.write()))
    }

    /// Point read in its own read transaction.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.read_tx()?.get(key)
    }

    /// Point read that maps [StoreError::NotFound] to None.
    pub fn get_opt(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.get(key) {
            Ok(v) => Ok(Some(v)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Runs `f` inside a write transaction, committing on Ok and rolling back on Err.
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut WriteTx<'_>) -> Result<T, E>,
    {
        let mut tx = self.write_tx()?;
        match f(&mut tx) {
            Ok(v) => {
                tx.commit()?;
                Ok(v)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Tree {
        self.inner.tree.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tree.read().is_empty()
    }

    /// Current length of the log in bytes.
    pub fn log_size(&self) -> u64 {
        self.inner.log.lock().size
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Compacts the log now. Fails with [StoreError::ShrinkInProcess] when a compaction is running.
    pub fn shrink(&self) -> Result<(), StoreError> {
        shrink::shrink(&self.inner)
    }

    /// Stops background workers and syncs the log. Later transactions fail with [StoreError::TxClosed].
    pub fn close(&self) -> Result<(), StoreError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        if !self.inner.config.read_only {
            let mut log = self.inner.log.lock();
            log.file.sync_data()?;
            log.dirty = false;
        }
        debug!(path = %self.inner.path.display(), "store closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(StoreError::TxClosed)
        } else {
            Ok(())
        }
    }
}

/// Sleeps up to `total`, waking early on shutdown. Returns false when shutdown was requested.
pub(crate) fn sleep_unless_shutdown(shutdown: &AtomicBool, total: Duration) -> bool {
    let step = Duration::from_millis(50);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let nap = step.min(total - elapsed);
        std::thread::sleep(nap);
        elapsed += nap;
    }
    !shutdown.load(Ordering::SeqCst)
}

fn flush_worker(weak: Weak<Inner>, shutdown: Arc<AtomicBool>, interval: Duration) {
    while sleep_unless_shutdown(&shutdown, interval) {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let mut log = inner.log.lock();
        if log.dirty {
            match log.file.sync_data() {
                Ok(()) => log.dirty = false,
                Err(e) => warn!(error = %e, "background sync failed"),
            }
        }
    }
}
