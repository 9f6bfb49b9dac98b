//! Action Cache: keyed by a hash of an action's exact command line, tool
//! versions and input hashes, mapping to the CAS hashes of its outputs.
//! Unlike the Target Cache there is no metadata fast path — the key itself
//! is already a content hash of everything that could make the action
//! produce different bytes — but a hit is only honored when the recorded
//! output blobs still exist, its stored metadata hash still matches, and
//! an action that previously failed is never treated as a hit.
use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCacheEntry {
    pub output_hashes: Vec<String>,
    pub succeeded: bool,
    /// Hash of the action's metadata map (tool versions, env, declared
    /// inputs) at record time, with keys sorted before hashing so the
    /// comparison is order-independent.
    pub metadata_hash: String,
}

/// Hashes a metadata map with stable key ordering so the same logical
/// metadata always produces the same hash regardless of map iteration order.
pub fn hash_metadata(metadata: &HashMap<String, String>) -> String {
    use sha2::{Digest, Sha256};
    let mut keys: Vec<&String> = metadata.keys().collect();
    keys.sort();
    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(metadata[key].as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionLookup {
    Hit { output_hashes: Vec<String> },
    Miss,
}

#[derive(Default)]
pub struct ActionCache {
    entries: RwLock<HashMap<String, ActionCacheEntry>>,
}

impl ActionCache {
    pub fn new() -> Self {
        ActionCache::default()
    }

    /// `outputs_exist` lets the caller confirm the referenced CAS blobs are
    /// still present; a recorded entry whose blobs were since evicted must
    /// not be served as a hit. `current_metadata_hash` must also match the
    /// hash recorded at insertion time.
    pub fn lookup(
        &self,
        action_hash: &str,
        current_metadata_hash: &str,
        outputs_exist: impl Fn(&str) -> bool,
    ) -> ActionLookup {
        let entries = self.entries.read();
        match entries.get(action_hash) {
            Some(entry)
                if entry.succeeded
                    && entry.metadata_hash == current_metadata_hash
                    && entry.output_hashes.iter().all(|h| outputs_exist(h)) =>
            {
                ActionLookup::Hit {
                    output_hashes: entry.output_hashes.clone(),
                }
            }
            _ => ActionLookup::Miss,
        }
    }

    pub fn record(&self, action_hash: String, entry: ActionCacheEntry) {
        self.entries.write().insert(action_hash, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> HashMap<String, ActionCacheEntry> {
        self.entries.read().clone()
    }

    pub fn load(&self, entries: HashMap<String, ActionCacheEntry>) {
        *self.entries.write() = entries;
    }
}
