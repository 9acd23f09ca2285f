//! File-backed store of managed domain records
//!
//! One JSON document per record under `<root>/domains/<name>/md.json`.
//! Records carry an insertion sequence so listings keep creation order.
//! Foreign entries in the store directory are skipped on load, never fatal.
//! Writes go through a temp file plus rename; the in-memory view is only
//! swapped after a full pass succeeds, so a reader never observes a
//! partially merged record.

use crate::domain::{normalize_hostname, ManagedDomain};
use crate::error::{MdError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

const RECORD_FILE: &str = "md.json";

/// On-disk envelope of one record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    sequence: u64,
    md: ManagedDomain,
}

/// The persistent collection of managed domains, keyed by primary name.
pub struct MdStore {
    root: PathBuf,
    // mutated only after a successful persist or by wholesale snapshot swap,
    // so the map stays consistent even behind a poisoned lock
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl MdStore {
    /// Open (or lazily create) a store rooted at `root`.
    ///
    /// Unparseable or unrelated entries under `domains/` are logged and
    /// skipped; they must never abort startup.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut records = HashMap::new();
        let domains = root.join("domains");
        if domains.is_dir() {
            let entries = fs::read_dir(&domains)
                .map_err(|e| MdError::StoreReadError(format!("{}: {e}", domains.display())))?;
            for entry in entries {
                let entry =
                    entry.map_err(|e| MdError::StoreReadError(format!("{}: {e}", domains.display())))?;
                let path = entry.path();
                if !path.is_dir() {
                    warn!(entry = %path.display(), "ignoring foreign entry in store");
                    continue;
                }
                match Self::load_record(&path) {
                    Ok(Some(rec)) => {
                        records.insert(rec.md.name.clone(), rec);
                    }
                    Ok(None) => {
                        warn!(entry = %path.display(), "ignoring domain dir without record");
                    }
                    Err(e) => {
                        warn!(entry = %path.display(), error = %e, "ignoring unreadable record");
                    }
                }
            }
        }
        debug!(root = %root.display(), count = records.len(), "store opened");
        Ok(MdStore {
            root,
            records: RwLock::new(records),
        })
    }

    fn load_record(dir: &Path) -> Result<Option<StoredRecord>> {
        let file = dir.join(RECORD_FILE);
        if !file.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&file)
            .map_err(|e| MdError::StoreReadError(format!("{}: {e}", file.display())))?;
        let rec: StoredRecord = serde_json::from_str(&text)
            .map_err(|e| MdError::StoreReadError(format!("{}: {e}", file.display())))?;
        Ok(Some(rec))
    }

    /// Path of the store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_dir(&self, name: &str) -> PathBuf {
        self.root.join("domains").join(name)
    }

    /// Look up a record by primary name.
    pub fn get(&self, name: &str) -> Result<ManagedDomain> {
        let name = normalize_hostname(name);
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .get(&name)
            .map(|r| r.md.clone())
            .ok_or(MdError::NotFound(name))
    }

    /// All records in creation order.
    pub fn list(&self) -> Vec<ManagedDomain> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut recs: Vec<&StoredRecord> = records.values().collect();
        recs.sort_by_key(|r| r.sequence);
        recs.into_iter().map(|r| r.md.clone()).collect()
    }

    /// Insert or totally replace a record under its primary name.
    pub fn upsert(&self, md: ManagedDomain) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let sequence = records
            .get(&md.name)
            .map(|r| r.sequence)
            .unwrap_or_else(|| next_sequence(&records));
        let rec = StoredRecord {
            sequence,
            md,
        };
        self.persist(&rec)?;
        records.insert(rec.md.name.clone(), rec);
        Ok(())
    }

    /// Remove a record and its backing files. Reconciliation never calls
    /// this; it exists for explicit operator removal.
    pub fn remove(&self, name: &str) -> Result<()> {
        let name = normalize_hostname(name);
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.remove(&name).is_none() {
            return Err(MdError::NotFound(name));
        }
        let dir = self.record_dir(&name);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .map_err(|e| MdError::StoreWriteError(format!("{}: {e}", dir.display())))?;
        }
        Ok(())
    }

    /// Replace the whole record set in one pass, keeping the given order as
    /// creation order. Used by reconciliation: either every record is
    /// persisted or the previous on-disk and in-memory state is restored.
    pub fn replace_all(&self, mds: Vec<ManagedDomain>) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);

        let new_set: HashMap<String, StoredRecord> = mds
            .into_iter()
            .enumerate()
            .map(|(i, md)| {
                (
                    md.name.clone(),
                    StoredRecord {
                        sequence: i as u64,
                        md,
                    },
                )
            })
            .collect();

        // overwritten or deleted files, kept for rollback
        let mut undo: Vec<(String, Option<String>)> = Vec::new();
        let mut result = Ok(());

        for rec in new_set.values() {
            let unchanged = records
                .get(&rec.md.name)
                .is_some_and(|old| old.sequence == rec.sequence && old.md == rec.md);
            if unchanged {
                continue;
            }
            let prior = self.read_raw(&rec.md.name);
            if let Err(e) = self.persist(rec) {
                result = Err(e);
                break;
            }
            undo.push((rec.md.name.clone(), prior));
        }

        if result.is_ok() {
            for name in records.keys() {
                if !new_set.contains_key(name) {
                    let prior = self.read_raw(name);
                    let dir = self.record_dir(name);
                    if let Err(e) = fs::remove_dir_all(&dir) {
                        result = Err(MdError::StoreWriteError(format!(
                            "{}: {e}",
                            dir.display()
                        )));
                        break;
                    }
                    undo.push((name.clone(), prior));
                }
            }
        }

        match result {
            Ok(()) => {
                *records = new_set;
                Ok(())
            }
            Err(e) => {
                for (name, prior) in undo.into_iter().rev() {
                    self.restore_raw(&name, prior);
                }
                Err(e)
            }
        }
    }

    fn persist(&self, rec: &StoredRecord) -> Result<()> {
        let dir = self.record_dir(&rec.md.name);
        fs::create_dir_all(&dir)
            .map_err(|e| MdError::StoreWriteError(format!("{}: {e}", dir.display())))?;
        let text = serde_json::to_string_pretty(rec)
            .map_err(|e| MdError::StoreWriteError(format!("serialize {}: {e}", rec.md.name)))?;
        let tmp = dir.join(format!("{RECORD_FILE}.tmp"));
        let file = dir.join(RECORD_FILE);
        fs::write(&tmp, text)
            .map_err(|e| MdError::StoreWriteError(format!("{}: {e}", tmp.display())))?;
        fs::rename(&tmp, &file)
            .map_err(|e| MdError::StoreWriteError(format!("{}: {e}", file.display())))?;
        Ok(())
    }

    fn read_raw(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.record_dir(name).join(RECORD_FILE)).ok()
    }

    /// Best-effort rollback of one record file after a failed pass.
    fn restore_raw(&self, name: &str, prior: Option<String>) {
        let dir = self.record_dir(name);
        match prior {
            Some(text) => {
                if fs::create_dir_all(&dir)
                    .and_then(|()| fs::write(dir.join(RECORD_FILE), text))
                    .is_err()
                {
                    warn!(name, "rollback write failed");
                }
            }
            None => {
                if dir.exists() && fs::remove_dir_all(&dir).is_err() {
                    warn!(name, "rollback removal failed");
                }
            }
        }
    }
}

fn next_sequence(records: &HashMap<String, StoredRecord>) -> u64 {
    records.values().map(|r| r.sequence + 1).max().unwrap_or(0)
}
