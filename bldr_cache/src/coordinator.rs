//! `CacheCoordinator`: the facade the scheduler talks to.
//! Wires together the CAS, Target Cache, Action Cache and eviction policy,
//! and emits cache events through an injected publisher rather than a
//! global singleton.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use bldr_core::TargetId;
use bldr_events::{EventDispatcher, EventPayload, EventPublisher};

use crate::action_cache::{hash_metadata, ActionCache, ActionCacheEntry, ActionLookup};
use crate::cas::{CasError, ContentAddressableStore};
use crate::eviction::{plan_eviction, EntryMeta, EvictionLimits};
use crate::persist::{self, CacheSnapshot};
use crate::target_cache::{FileMetadata, LookupResult, TargetCache, TargetCacheEntry};

pub use crate::eviction::EvictionLimits as EvictionConfig;

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub target_hits: u64,
    pub target_misses: u64,
    pub action_hits: u64,
    pub action_misses: u64,
    pub fast_path_hits: u64,
    pub content_hash_hits: u64,
}

pub struct CacheCoordinator<P: EventPublisher> {
    root: PathBuf,
    cas: ContentAddressableStore,
    targets: TargetCache,
    actions: ActionCache,
    events: Arc<EventDispatcher<P>>,
    limits: EvictionLimits,
    signing_key: Vec<u8>,
    stats: parking_lot::Mutex<CacheStats>,
}

impl<P: EventPublisher> CacheCoordinator<P> {
    pub fn open(
        root: impl Into<PathBuf>,
        signing_key: Vec<u8>,
        limits: EvictionLimits,
        events: Arc<EventDispatcher<P>>,
    ) -> Result<Self, CasError> {
        let root = root.into();
        let cas = ContentAddressableStore::open(&root)?;
        let targets = TargetCache::new();
        let actions = ActionCache::new();

        let snapshot = persist::load(&root.join("cache.bin"), &signing_key);
        targets.load(snapshot.targets);
        actions.load(snapshot.actions);

        Ok(CacheCoordinator {
            root,
            cas,
            targets,
            actions,
            events,
            limits,
            signing_key,
            stats: parking_lot::Mutex::new(CacheStats::default()),
        })
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    /// Checks the Target Cache; on a hit, fetches the output blob from the
    /// CAS. Returns `None` on a miss without touching the CAS.
    pub fn is_cached(
        &self,
        target_id: &TargetId,
        metadata: FileMetadata,
        current_hash: &str,
    ) -> Option<Vec<u8>> {
        let key = target_id.as_str().to_string();
        let result = self
            .targets
            .lookup(target_id, metadata, current_hash, SystemTime::now());
        let mut stats = self.stats.lock();
        match result {
            LookupResult::HitFast { output_hash } => {
                stats.target_hits += 1;
                stats.fast_path_hits += 1;
                drop(stats);
                self.events.emit(EventPayload::CacheHit { key });
                self.cas.get(&output_hash).ok()
            }
            LookupResult::HitContent { output_hash } => {
                stats.target_hits += 1;
                stats.content_hash_hits += 1;
                drop(stats);
                self.events.emit(EventPayload::CacheHit { key });
                self.cas.get(&output_hash).ok()
            }
            LookupResult::Miss => {
                stats.target_misses += 1;
                drop(stats);
                self.events.emit(EventPayload::CacheMiss { key });
                None
            }
        }
    }

    /// Records a successful build: stores `output_bytes` in the CAS and
    /// updates the Target Cache entry.
    pub fn update(
        &self,
        target_id: TargetId,
        target_hash: String,
        metadata: FileMetadata,
        dependency_hashes: HashMap<TargetId, String>,
        output_bytes: &[u8],
    ) -> Result<String, CasError> {
        let output_hash = self.cas.put(output_bytes)?;
        self.targets.insert(
            target_id.clone(),
            TargetCacheEntry::new(
                target_hash,
                output_hash.clone(),
                metadata,
                dependency_hashes,
                SystemTime::now(),
            ),
        );
        self.events.emit(EventPayload::CacheUpdate {
            key: target_id.as_str().to_string(),
        });
        Ok(output_hash)
    }

    pub fn is_action_cached(
        &self,
        action_hash: &str,
        metadata: &HashMap<String, String>,
    ) -> Option<Vec<String>> {
        let metadata_hash = hash_metadata(metadata);
        let result = self
            .actions
            .lookup(action_hash, &metadata_hash, |hash| self.cas.has(hash));
        let mut stats = self.stats.lock();
        match result {
            ActionLookup::Hit { output_hashes } => {
                stats.action_hits += 1;
                drop(stats);
                self.events.emit(EventPayload::ActionCacheHit {
                    key: action_hash.to_string(),
                });
                Some(output_hashes)
            }
            ActionLookup::Miss => {
                stats.action_misses += 1;
                drop(stats);
                self.events.emit(EventPayload::ActionCacheMiss {
                    key: action_hash.to_string(),
                });
                None
            }
        }
    }

    pub fn record_action(
        &self,
        action_hash: String,
        metadata: &HashMap<String, String>,
        output_hashes: Vec<String>,
        succeeded: bool,
    ) {
        self.actions.record(
            action_hash,
            ActionCacheEntry {
                output_hashes,
                succeeded,
                metadata_hash: hash_metadata(metadata),
            },
        );
    }

    /// Runs the eviction policy against the current Target Cache entries
    /// and deletes evicted blobs from the CAS, emitting one event per
    /// evicted key.
    pub fn gc(&self) -> Result<GcReport, CasError> {
        self.events.emit(EventPayload::GcStarted);
        let snapshot = self.targets.snapshot();
        let now = SystemTime::now();
        let entries: Vec<EntryMeta> = snapshot
            .iter()
            .map(|(id, entry)| EntryMeta {
                key: id.as_str().to_string(),
                size_bytes: entry.metadata.size,
                last_accessed: entry.last_accessed_at,
            })
            .collect();

        let evicted_keys = plan_eviction(&entries, &self.limits, now);
        let mut bytes_freed = 0u64;
        let mut blobs_removed = 0u64;

        for key in &evicted_keys {
            let id = TargetId::new(key.clone());
            if let Some(entry) = self.targets.remove(&id) {
                bytes_freed += entry.metadata.size;
                self.cas.delete(&entry.output_hash)?;
                blobs_removed += 1;
                self.events.emit(EventPayload::CacheEviction { key: key.clone() });
            }
        }

        self.events.emit(EventPayload::GcCompleted {
            bytes_freed,
            blobs_removed,
        });

        Ok(GcReport {
            evicted_targets: evicted_keys.len(),
            bytes_freed,
            blobs_removed,
        })
    }

    /// Persists the current Target/Action Cache contents to disk.
    pub fn flush(&self) -> std::io::Result<()> {
        let snapshot = CacheSnapshot {
            targets: self.targets.snapshot(),
            actions: self.actions.snapshot(),
        };
        persist::save(&self.root.join("cache.bin"), &self.signing_key, &snapshot)
    }

    pub fn close(&self) -> std::io::Result<()> {
        self.flush()
    }

    /// Writes a blob directly to the CAS, for callers that need a content
    /// hash before an action cache entry exists to associate it with.
    pub fn put_blob(&self, bytes: &[u8]) -> Result<String, CasError> {
        self.cas.put(bytes)
    }

    /// Fetches a blob by its CAS hash, for materializing an Action Cache hit.
    pub fn get_blob(&self, hash: &str) -> Result<Vec<u8>, CasError> {
        self.cas.get(hash)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GcReport {
    pub evicted_targets: usize,
    pub bytes_freed: u64,
    pub blobs_removed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bldr_events::NullPublisher;

    fn meta(size: u64, mtime: i64) -> FileMetadata {
        FileMetadata {
            size,
            mtime_secs: mtime,
        }
    }

    fn signing_key() -> Vec<u8> {
        b"workspace-1".to_vec()
    }

    #[test]
    fn miss_then_update_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = CacheCoordinator::open(
            dir.path(),
            signing_key(),
            EvictionLimits::default(),
            Arc::new(EventDispatcher::new(NullPublisher)),
        )
            .unwrap();

        let id = TargetId::new("pkg:a");
        assert!(coordinator.is_cached(&id, meta(5, 1), "h1").is_none());

        coordinator
            .update(id.clone(), "h1".to_string(), meta(5, 1), HashMap::new(), b"built bytes")
            .unwrap();

        let hit = coordinator.is_cached(&id, meta(5, 1), "h1");
        assert_eq!(hit, Some(b"built bytes".to_vec()));
        assert_eq!(coordinator.stats().target_hits, 1);
    }

    #[test]
    fn action_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = CacheCoordinator::open(
            dir.path(),
            signing_key(),
            EvictionLimits::default(),
            Arc::new(EventDispatcher::new(NullPublisher)),
        )
            .unwrap();

        let metadata = HashMap::from([("tool".to_string(), "rustc-1.75".to_string())]);
        assert!(coordinator.is_action_cached("act1", &metadata).is_none());

        let out_hash = coordinator.put_blob(b"output").unwrap();
        coordinator.record_action("act1".to_string(), &metadata, vec![out_hash.clone()], true);

        assert_eq!(
            coordinator.is_action_cached("act1", &metadata),
            Some(vec![out_hash])
        );
    }

    #[test]
    fn action_cache_misses_when_metadata_drifts() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = CacheCoordinator::open(
            dir.path(),
            signing_key(),
            EvictionLimits::default(),
            Arc::new(EventDispatcher::new(NullPublisher)),
        )
            .unwrap();

        let metadata = HashMap::from([("tool".to_string(), "rustc-1.75".to_string())]);
        let out_hash = coordinator.put_blob(b"output").unwrap();
        coordinator.record_action("act1".to_string(), &metadata, vec![out_hash], true);

        let drifted = HashMap::from([("tool".to_string(), "rustc-1.76".to_string())]);
        assert!(coordinator.is_action_cached("act1", &drifted).is_none());
    }

    #[test]
    fn flush_and_reopen_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let coordinator = CacheCoordinator::open(
                dir.path(),
                signing_key(),
                EvictionLimits::default(),
                Arc::new(EventDispatcher::new(NullPublisher)),
            )
                .unwrap();
            let id = TargetId::new("pkg:a");
            coordinator
                .update(id, "h1".to_string(), meta(5, 1), HashMap::new(), b"bytes")
                .unwrap();
            coordinator.flush().unwrap();
        }

        let reopened = CacheCoordinator::open(
            dir.path(),
            signing_key(),
            EvictionLimits::default(),
            Arc::new(EventDispatcher::new(NullPublisher)),
        )
            .unwrap();
        let hit = reopened.is_cached(&TargetId::new("pkg:a"), meta(5, 1), "h1");
        assert_eq!(hit, Some(b"bytes".to_vec()));
    }
}
