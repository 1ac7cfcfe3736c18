use std::collections::HashMap;
use std::fmt::Write as _;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contact_core::{normalize_email, CacheEntry, VerificationResult};
use contact_logging::{contact_debug, contact_info, contact_warn};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::persist::{ensure_dir, quarantine, read_json_entries, AtomicFileWriter, StoreError};
use crate::time::{system_clock, UtcClock};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub writes: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Verification results keyed by normalized email, with expiry.
///
/// Persistent stores keep one JSON file per key. Access for a key goes through
/// a per-key async lock, which makes [`CacheStore::get_or_verify`] single-flight:
/// concurrent callers for one key share a single computation.
pub struct CacheStore {
    writer: Option<AtomicFileWriter>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    key_locks: KeyLocks,
    stats: Mutex<CacheStats>,
    clock: UtcClock,
}

impl CacheStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_clock(dir, system_clock())
    }

    pub fn open_with_clock(dir: impl Into<PathBuf>, clock: UtcClock) -> Result<Self, StoreError> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        let writer = AtomicFileWriter::new(dir);

        let (loaded, corrupt) = read_json_entries::<CacheEntry>(writer.dir())?;
        for bad in &corrupt {
            let backup = quarantine(bad)?;
            contact_warn!("Cache entry {:?} is unreadable; moved to {:?}", bad.path, backup);
        }

        let now = clock();
        let mut entries = HashMap::with_capacity(loaded.len());
        let mut dropped = 0usize;
        for entry in loaded {
            if entry.is_expired(now) {
                remove_file(&writer, &entry.key)?;
                dropped += 1;
            } else {
                entries.insert(entry.key.clone(), entry);
            }
        }
        contact_info!(
            "Cache opened at {:?}: {} live entries, {} expired dropped",
            writer.dir(),
            entries.len(),
            dropped
        );

        Ok(Self {
            writer: Some(writer),
            entries: Mutex::new(entries),
            key_locks: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
            clock,
        })
    }

    pub fn in_memory() -> Self {
        Self::in_memory_with_clock(system_clock())
    }

    pub fn in_memory_with_clock(clock: UtcClock) -> Self {
        Self {
            writer: None,
            entries: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
            clock,
        }
    }

    /// Cached result for `key`; missing and expired entries are both absent.
    pub fn get(&self, key: &str) -> Option<VerificationResult> {
        let key = normalize_email(key);
        let now = (self.clock)();
        let mut entries = self.entries.lock();
        let mut stats = self.stats.lock();
        match entries.get(&key) {
            Some(entry) if !entry.is_expired(now) => {
                stats.hits += 1;
                Some(entry.result.clone())
            }
            Some(_) => {
                entries.remove(&key);
                stats.expired += 1;
                stats.misses += 1;
                None
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    pub async fn put(
        &self,
        key: &str,
        result: VerificationResult,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = normalize_email(key);
        let lease = self.lease(&key);
        let _guard = lease.lock.lock().await;
        self.store(&key, result, ttl)
    }

    /// Return the cached result, or run `compute` once and cache what it yields.
    ///
    /// Callers arriving while a computation for the same key is running wait for
    /// it and receive its stored result instead of computing again.
    pub async fn get_or_verify<F, Fut>(
        &self,
        key: &str,
        ttl_for: impl Fn(&VerificationResult) -> Duration,
        compute: F,
    ) -> Result<VerificationResult, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = VerificationResult>,
    {
        let key = normalize_email(key);
        let lease = self.lease(&key);
        let _guard = lease.lock.lock().await;
        match self.get(&key) {
            Some(hit) => {
                contact_debug!("Cache hit for {}", key);
                Ok(hit)
            }
            None => {
                let result = compute().await;
                let ttl = ttl_for(&result);
                self.store(&key, result.clone(), ttl).map(|()| result)
            }
        }
    }

    /// Drop every expired entry from memory and disk.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = (self.clock)();
        let expired: Vec<String> = {
            let mut entries = self.entries.lock();
            let keys: Vec<String> = entries
                .values()
                .filter(|entry| entry.is_expired(now))
                .map(|entry| entry.key.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };
        if let Some(writer) = &self.writer {
            for key in &expired {
                remove_file(writer, key)?;
            }
        }
        self.stats.lock().expired += expired.len() as u64;
        Ok(expired.len())
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys some caller is computing, storing or waiting on right now.
    pub fn busy_keys(&self) -> usize {
        self.key_locks.lock().len()
    }

    /// Caller must hold the key lock.
    fn store(&self, key: &str, result: VerificationResult, ttl: Duration) -> Result<(), StoreError> {
        let entry = CacheEntry {
            key: key.to_string(),
            expires_at: expiry((self.clock)(), ttl),
            result,
        };
        if let Some(writer) = &self.writer {
            writer.write_json(&entry_filename(key), &entry)?;
        }
        self.entries.lock().insert(key.to_string(), entry);
        self.stats.lock().writes += 1;
        Ok(())
    }

    fn lease(&self, key: &str) -> KeyLease<'_> {
        let lock = self
            .key_locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone();
        KeyLease {
            locks: &self.key_locks,
            key: key.to_string(),
            lock,
        }
    }
}

type KeyLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A caller's share of one key's lock; the map entry goes with the last share.
///
/// Released on drop, so a panicking or cancelled computation cleans up too.
struct KeyLease<'a> {
    locks: &'a KeyLocks,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // The map and this lease are the only holders: nobody else wants the key.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn entry_filename(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut name = String::with_capacity(69);
    for byte in digest.iter() {
        let _ = write!(&mut name, "{byte:02x}");
    }
    name.push_str(".json");
    name
}

fn remove_file(writer: &AtomicFileWriter, key: &str) -> Result<(), StoreError> {
    let path = writer.dir().join(entry_filename(key));
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Io { path, source }),
    }
}
