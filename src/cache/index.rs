//! Cache Index Module
//!
//! The key → metadata map and its on-disk home.
//!
//! Layout of a cache directory:
//! - `cache_index.json` - the serialized [`CacheIndex`]
//! - `<stem>.cache` - one payload file per entry
//! - `cache.lock` - held while any process reads or rewrites the index;
//!   it holds the holder's token so only that holder deletes it
//!
//! All access goes through [`IndexStore::with_lock`], which serializes
//! read-modify-write cycles both within this process and across processes
//! sharing the directory.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

const INDEX_FILE: &str = "cache_index.json";
const LOCK_FILE: &str = "cache.lock";
const PAYLOAD_EXT: &str = "cache";
const TMP_SUFFIX: &str = ".tmp";

/// Longest key used verbatim as a file stem.
const MAX_PLAIN_STEM: usize = 100;

/// How long to wait for another process to release the lock file.
const LOCK_WAIT: Duration = Duration::from_secs(10);

/// A lock file older than this is assumed to belong to a crashed process.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

const LOCK_POLL: Duration = Duration::from_millis(10);

/// Prefix of the name a stale lock is moved to before it is deleted.
const STALE_LOCK_PREFIX: &str = "cache.lock.stale-";

// == Cache Index ==
/// Mapping from key to entry metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
}

/// Keys a cleanup pass should delete, in deletion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupPlan {
    /// Entries past their TTL
    pub expired: Vec<String>,
    /// Live entries removed to get back under the size ceiling, oldest first
    pub evicted: Vec<String>,
}

impl CleanupPlan {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.evicted.is_empty()
    }
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or fully replaces an entry; returns the replaced one.
    pub fn insert(&mut self, key: String, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(key, entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Sum of recorded payload sizes.
    pub fn total_size_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    /// Number of entries past their TTL that have not been purged yet.
    pub fn expired_count(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        self.entries
            .values()
            .filter(|e| e.is_expired(now, ttl))
            .count()
    }

    // == Plan Cleanup ==
    /// Decides which entries the cleanup algorithm removes.
    ///
    /// First every expired entry, then, if the survivors still exceed
    /// `max_size_bytes`, survivors in ascending `(created_at, key)` order until
    /// the total is at or below the ceiling.
    pub fn plan_cleanup(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        max_size_bytes: u64,
    ) -> CleanupPlan {
        let mut plan = CleanupPlan::default();
        let mut live: Vec<(&String, &CacheEntry)> = Vec::with_capacity(self.entries.len());

        for (key, entry) in &self.entries {
            if entry.is_expired(now, ttl) {
                plan.expired.push(key.clone());
            } else {
                live.push((key, entry));
            }
        }
        plan.expired.sort();

        let mut total: u64 = live.iter().map(|(_, e)| e.size_bytes).sum();
        if total > max_size_bytes {
            live.sort_by(|(ka, ea), (kb, eb)| {
                ea.created_at.cmp(&eb.created_at).then_with(|| ka.cmp(kb))
            });
            for (key, entry) in live {
                if total <= max_size_bytes {
                    break;
                }
                total -= entry.size_bytes;
                plan.evicted.push(key.clone());
            }
        }

        plan
    }
}

// == Payload File Naming ==
/// File stem for a key.
///
/// Short keys made of `[A-Za-z0-9_-]` are used verbatim (fingerprints fall in
/// this class). Anything else is hashed behind a `~` prefix, which cannot
/// collide with a verbatim stem.
pub fn payload_stem(key: &str) -> String {
    let plain = !key.is_empty()
        && key.len() <= MAX_PLAIN_STEM
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if plain {
        key.to_string()
    } else {
        format!("~{:x}", Sha256::digest(key.as_bytes()))
    }
}

// == Index Store ==
/// On-disk index plus payload files, guarded by a coarse lock.
#[derive(Debug)]
pub struct IndexStore {
    dir: PathBuf,
    index_path: PathBuf,
    lock_path: PathBuf,
    /// Serializes threads of this process before they contend on the lock file
    guard: Mutex<()>,
}

impl IndexStore {
    // == Constructor ==
    /// Opens (creating if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        Ok(Self {
            index_path: dir.join(INDEX_FILE),
            lock_path: dir.join(LOCK_FILE),
            dir,
            guard: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the payload file backing `key`.
    pub fn payload_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", payload_stem(key), PAYLOAD_EXT))
    }

    // == With Lock ==
    /// Runs `f` with exclusive access to the index and payload files.
    ///
    /// The index is loaded before `f` runs and written back afterwards if `f`
    /// changed it, even when `f` itself fails part way.
    pub fn with_lock<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut IndexTxn<'_>) -> Result<R>,
    {
        let _local = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let _file_lock = self.acquire_file_lock()?;

        let index = self.load_index()?;
        let mut txn = IndexTxn {
            store: self,
            index,
            dirty: false,
        };

        let result = f(&mut txn);
        if txn.dirty {
            let saved = self.save_index(&txn.index);
            if result.is_ok() {
                saved?;
            } else if let Err(e) = saved {
                warn!("Failed to persist cache index after error: {}", e);
            }
        }
        result
    }

    /// Creates the lock file and stamps it with a token unique to this
    /// acquisition, so release never deletes a lock someone else now holds.
    fn acquire_file_lock(&self) -> Result<FileLock> {
        let started = Instant::now();
        let token = format!("{}:{:016x}", std::process::id(), rand::random::<u64>());
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(token.as_bytes()) {
                        drop(file);
                        let _ = fs::remove_file(&self.lock_path);
                        return Err(CacheError::io(&self.lock_path, e));
                    }
                    return Ok(FileLock {
                        path: self.lock_path.clone(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_age(&self.lock_path).is_some_and(|age| age > LOCK_STALE_AFTER)
                        && self.reclaim_stale_lock()?
                    {
                        continue;
                    }
                    if started.elapsed() >= LOCK_WAIT {
                        return Err(CacheError::LockTimeout(self.lock_path.clone()));
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(CacheError::io(&self.lock_path, e)),
            }
        }
    }

    /// Moves the lock file aside under a unique name and deletes it.
    ///
    /// Only one waiter can win the rename. If the file it moved turns out to
    /// be fresh (another waiter reclaimed first and a new holder created it),
    /// it is linked back into place. Returns whether a stale lock was removed.
    fn reclaim_stale_lock(&self) -> Result<bool> {
        let aside = self
            .dir
            .join(format!("{}{:016x}", STALE_LOCK_PREFIX, rand::random::<u64>()));
        match fs::rename(&self.lock_path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(CacheError::io(&self.lock_path, e)),
        }

        let stale = lock_age(&aside).map_or(true, |age| age > LOCK_STALE_AFTER);
        if stale {
            warn!("Removed stale cache lock {}", self.lock_path.display());
        } else if let Err(e) = fs::hard_link(&aside, &self.lock_path) {
            warn!(
                "Could not restore live cache lock {}: {}",
                self.lock_path.display(),
                e
            );
        }
        if let Err(e) = fs::remove_file(&aside) {
            warn!("Failed to delete {}: {}", aside.display(), e);
        }
        Ok(stale)
    }

    fn load_index(&self) -> Result<CacheIndex> {
        let bytes = match fs::read(&self.index_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CacheIndex::new()),
            Err(e) => return Err(CacheError::io(&self.index_path, e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!(
                    "Cache index {} is corrupted ({}), starting empty",
                    self.index_path.display(),
                    e
                );
                Ok(CacheIndex::new())
            }
        }
    }

    fn save_index(&self, index: &CacheIndex) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.index_path, &bytes)
    }
}

// == Index Transaction ==
/// Locked view handed to [`IndexStore::with_lock`] callbacks.
///
/// Mutations keep payload files and index entries in step: payloads are
/// written before their entry is recorded and entries are dropped even if
/// their payload cannot be deleted, so an index entry never outlives a
/// payload that was successfully removed.
#[derive(Debug)]
pub struct IndexTxn<'a> {
    store: &'a IndexStore,
    index: CacheIndex,
    dirty: bool,
}

impl IndexTxn<'_> {
    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    /// Reads a payload file, `None` if it does not exist.
    pub fn read_payload(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.store.payload_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Writes the payload, then records its entry.
    pub fn write(&mut self, key: &str, value: &str, entry: CacheEntry) -> Result<()> {
        write_atomic(&self.store.payload_path(key), value.as_bytes())?;
        self.index.insert(key.to_string(), entry);
        self.dirty = true;
        Ok(())
    }

    /// Drops the entry and its payload; returns the dropped metadata.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.index.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        let path = self.store.payload_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete cache payload {}: {}", path.display(), e),
        }
        removed
    }

    /// Drops every entry and every payload file in the directory.
    pub fn clear(&mut self) -> Result<usize> {
        let count = self.index.len();
        self.index.clear();
        self.dirty = true;
        self.remove_payload_files(|_| true)?;
        Ok(count)
    }

    /// Deletes payload and temp files no index entry refers to.
    pub fn remove_orphans(&mut self) -> Result<usize> {
        let referenced: HashSet<String> = self.index.keys().map(|k| payload_stem(k)).collect();
        self.remove_payload_files(|stem| !referenced.contains(stem))
    }

    fn remove_payload_files<P>(&self, should_remove: P) -> Result<usize>
    where
        P: Fn(&str) -> bool,
    {
        let dir = self.store.dir();
        let mut removed = 0;
        for item in fs::read_dir(dir).map_err(|e| CacheError::io(dir, e))? {
            let item = item.map_err(|e| CacheError::io(dir, e))?;
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };

            let target = if let Some(stem) = name.strip_suffix(".cache") {
                should_remove(stem)
            } else {
                name.ends_with(TMP_SUFFIX) && !name.starts_with(INDEX_FILE)
            };
            if !target {
                continue;
            }
            match fs::remove_file(item.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(item.path(), e)),
            }
        }
        if removed > 0 {
            debug!("Removed {} unreferenced cache files", removed);
        }
        Ok(removed)
    }
}

// == Lock Guard ==
#[derive(Debug)]
struct FileLock {
    path: PathBuf,
    token: String,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(current) if current == self.token => {
                let _ = fs::remove_file(&self.path);
            }
            Ok(_) => warn!(
                "Cache lock {} was taken over by another holder, leaving it",
                self.path.display()
            ),
            Err(_) => {}
        }
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

// == Atomic Write ==
/// Writes to a sibling temp file and renames it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    if let Err(e) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(CacheError::io(tmp, e));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(CacheError::io(path, e));
    }
    Ok(())
}
