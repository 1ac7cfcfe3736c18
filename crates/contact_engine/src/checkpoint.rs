use std::collections::BTreeMap;
use std::path::PathBuf;

use contact_core::{
    CheckpointEntry, CheckpointStatus, Completion, ContactRecord, FailureRecord, Target, TargetId,
};
use contact_logging::{contact_debug, contact_info, contact_warn};
use parking_lot::Mutex;

use crate::persist::{ensure_dir, quarantine, read_json_entries, AtomicFileWriter, StoreError};
use crate::time::{system_clock, UtcClock};

/// Counts of checkpoint entries per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointProgress {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
}

/// Durable per-target progress, one JSON file per target id.
///
/// Every mutation is synced to disk before it returns. Writes for one target
/// come from the single worker that owns it, so they never interleave.
pub struct CheckpointStore {
    writer: AtomicFileWriter,
    entries: Mutex<BTreeMap<TargetId, CheckpointEntry>>,
    clock: UtcClock,
}

impl CheckpointStore {
    /// Open the store and [`load`](Self::load) what is already on disk.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_clock(dir, system_clock())
    }

    pub fn open_with_clock(dir: impl Into<PathBuf>, clock: UtcClock) -> Result<Self, StoreError> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        let store = Self {
            writer: AtomicFileWriter::new(dir),
            entries: Mutex::new(BTreeMap::new()),
            clock,
        };
        // Mutations start from the persisted entry, never from a blank one.
        store.load()?;
        Ok(store)
    }

    /// Load persisted state, turning interrupted (`in_progress`) entries back into `pending`.
    pub fn load(&self) -> Result<BTreeMap<TargetId, CheckpointEntry>, StoreError> {
        let (entries, corrupt) = read_json_entries::<CheckpointEntry>(self.writer.dir())?;
        for bad in &corrupt {
            let backup = quarantine(bad)?;
            contact_warn!(
                "Checkpoint entry {:?} is unreadable ({}); moved to {:?}",
                bad.path,
                bad.message,
                backup
            );
        }

        let mut loaded = BTreeMap::new();
        let mut recovered = 0usize;
        for mut entry in entries {
            if entry.recover() {
                recovered += 1;
                self.persist(&entry)?;
            }
            loaded.insert(entry.target_id.clone(), entry);
        }

        if recovered > 0 {
            contact_info!("Recovered {} interrupted targets as pending", recovered);
        }
        contact_info!(
            "Loaded {} checkpoint entries from {:?}",
            loaded.len(),
            self.writer.dir()
        );
        *self.entries.lock() = loaded.clone();
        Ok(loaded)
    }

    pub fn entry(&self, target_id: &str) -> Option<CheckpointEntry> {
        self.entries.lock().get(target_id).cloned()
    }

    pub fn status(&self, target_id: &str) -> Option<CheckpointStatus> {
        self.entries.lock().get(target_id).map(|entry| entry.status)
    }

    /// Start an attempt; returns the attempt number (1-based, cumulative across runs).
    pub fn mark_in_progress(&self, target: &Target) -> Result<u32, StoreError> {
        let now = (self.clock)();
        let mut entry = self
            .entry(&target.id)
            .unwrap_or_else(|| CheckpointEntry::new(target, now));
        entry.begin_attempt(now)?;
        self.commit(entry.clone())?;
        Ok(entry.attempts)
    }

    /// Record the output of a finished target. Repeating the same record is a no-op.
    pub fn mark_done(
        &self,
        target_id: &str,
        record: ContactRecord,
    ) -> Result<Completion, StoreError> {
        let mut entry = self.require(target_id)?;
        let completion = entry.complete(record, (self.clock)())?;
        match completion {
            Completion::Unchanged => {
                contact_debug!("Target {} already done with the same record", target_id);
            }
            Completion::Replaced => {
                contact_warn!("Target {} was already done; replacing its record", target_id);
                self.commit(entry)?;
            }
            Completion::Recorded => self.commit(entry)?,
        }
        Ok(completion)
    }

    pub fn mark_failed(&self, target_id: &str, failure: FailureRecord) -> Result<(), StoreError> {
        let mut entry = self.require(target_id)?;
        entry.fail(failure, (self.clock)())?;
        self.commit(entry)
    }

    pub fn progress(&self) -> CheckpointProgress {
        let entries = self.entries.lock();
        let mut progress = CheckpointProgress::default();
        for entry in entries.values() {
            match entry.status {
                CheckpointStatus::Pending => progress.pending += 1,
                CheckpointStatus::InProgress => progress.in_progress += 1,
                CheckpointStatus::Done => progress.done += 1,
                CheckpointStatus::Failed => progress.failed += 1,
            }
        }
        progress
    }

    fn require(&self, target_id: &str) -> Result<CheckpointEntry, StoreError> {
        self.entry(target_id)
            .ok_or_else(|| StoreError::UnknownTarget(target_id.to_string()))
    }

    /// Persist first, then publish in memory: memory never runs ahead of disk.
    fn commit(&self, entry: CheckpointEntry) -> Result<(), StoreError> {
        self.persist(&entry)?;
        self.entries.lock().insert(entry.target_id.clone(), entry);
        Ok(())
    }

    fn persist(&self, entry: &CheckpointEntry) -> Result<(), StoreError> {
        self.writer
            .write_json(&format!("{}.json", entry.target_id), entry)
            .map(|_| ())
    }
}
