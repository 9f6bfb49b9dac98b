//! Target Cache: keyed by a target's transitive dependency hash, used to
//! skip rebuilding a target whose inputs and dependencies are unchanged.
//! Lookups use a two-tier strategy: a cheap `(size, mtime)` comparison
//! first, falling back to the caller's content hash only when metadata
//! looks stale.

use std::collections::HashMap;
use std::time::SystemTime;

use bldr_core::TargetId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    pub mtime_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetCacheEntry {
    /// Transitive hash (own content + all dependency hashes) at insert time.
    pub target_hash: String,
    /// Hash of the produced output blob, for handing the caller a CAS key.
    pub output_hash: String,
    pub metadata: FileMetadata,
    /// Per-dependency hash recorded at insertion time, so a lookup can
    /// recursively verify that each dependency's current hash still matches
    /// rather than trusting only the rolled-up `target_hash`.
    pub dependency_hashes: HashMap<TargetId, String>,
    pub created_at: SystemTime,
    pub last_accessed_at: SystemTime,
}

impl TargetCacheEntry {
    pub fn new(
        target_hash: String,
        output_hash: String,
        metadata: FileMetadata,
        dependency_hashes: HashMap<TargetId, String>,
        now: SystemTime,
    ) -> Self {
        TargetCacheEntry {
            target_hash,
            output_hash,
            metadata,
            dependency_hashes,
            created_at: now,
            last_accessed_at: now,
        }
    }

    /// Whether every dependency hash recorded at insertion time still
    /// matches the caller's current view of that dependency.
    pub fn dependencies_unchanged(&self, current: &HashMap<TargetId, String>) -> bool {
        self.dependency_hashes
            .iter()
            .all(|(dep, hash)| current.get(dep) == Some(hash))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// Metadata matched; the entry is trusted without recomputing the hash.
    HitFast { output_hash: String },
    /// Metadata looked stale but the recomputed content hash still matched.
    HitContent { output_hash: String },
    Miss,
}

#[derive(Default)]
pub struct TargetCache {
    entries: RwLock<HashMap<TargetId, TargetCacheEntry>>,
}

impl TargetCache {
    pub fn new() -> Self {
        TargetCache::default()
    }

    /// `current_hash` is the transitive hash computed by the caller (cheap
    /// to derive from already-known node hashes); it is only consulted when
    /// the fast metadata path misses, so callers that want to skip hashing
    /// entirely when metadata matches can pass a closure via
    /// [`TargetCache::lookup_lazy`].
    pub fn lookup(
        &self,
        target_id: &TargetId,
        current_metadata: FileMetadata,
        current_hash: &str,
        now: SystemTime,
    ) -> LookupResult {
        let result = {
            let entries = self.entries.read();
            let Some(entry) = entries.get(target_id) else {
                return LookupResult::Miss;
            };

            if entry.metadata == current_metadata {
                LookupResult::HitFast {
                    output_hash: entry.output_hash.clone(),
                }
            } else if entry.target_hash == current_hash {
                LookupResult::HitContent {
                    output_hash: entry.output_hash.clone(),
                }
            } else {
                LookupResult::Miss
            }
        };

        if result != LookupResult::Miss {
            self.touch(target_id, now);
        }
        result
    }

    fn touch(&self, target_id: &TargetId, now: SystemTime) {
        if let Some(entry) = self.entries.write().get_mut(target_id) {
            entry.last_accessed_at = now;
        }
    }

    /// Like [`TargetCache::lookup`] but only invokes `compute_hash` when the
    /// fast metadata comparison misses, avoiding the transitive hash
    /// computation entirely on the common warm-cache path.
    pub fn lookup_lazy(
        &self,
        target_id: &TargetId,
        current_metadata: FileMetadata,
        compute_hash: impl FnOnce() -> String,
        now: SystemTime,
    ) -> LookupResult {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(target_id) {
                if entry.metadata == current_metadata {
                    let output_hash = entry.output_hash.clone();
                    drop(entries);
                    self.touch(target_id, now);
                    return LookupResult::HitFast { output_hash };
                }
            } else {
                return LookupResult::Miss;
            }
        }

        let current_hash = compute_hash();
        let result = {
            let entries = self.entries.read();
            match entries.get(target_id) {
                Some(entry) if entry.target_hash == current_hash => LookupResult::HitContent {
                    output_hash: entry.output_hash.clone(),
                },
                _ => LookupResult::Miss,
            }
        };
        if result != LookupResult::Miss {
            self.touch(target_id, now);
        }
        result
    }

    pub fn insert(&self, target_id: TargetId, entry: TargetCacheEntry) {
        self.entries.write().insert(target_id, entry);
    }

    pub fn remove(&self, target_id: &TargetId) -> Option<TargetCacheEntry> {
        self.entries.write().remove(target_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> HashMap<TargetId, TargetCacheEntry> {
        self.entries.read().clone()
    }

    pub fn load(&self, entries: HashMap<TargetId, TargetCacheEntry>) {
        *self.entries.write() = entries;
    }
}
