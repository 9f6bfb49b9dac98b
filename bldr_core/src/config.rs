use serde::{Deserialize, Serialize};

/// Shape of the configuration the engine consumes. This crate does not parse
/// any file format or CLI flags — that's the workspace/config parser
/// collaborator's job — it only defines what the parser must produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of scheduler worker threads. Defaults to the host's CPU count.
    pub workers: usize,
    /// `fail-fast` cancels the run on the first failure; `keep-going` (the
    /// default) continues scheduling unaffected nodes.
    pub fail_fast: bool,
    /// Per-cache eviction parameters; `0` disables the corresponding limit.
    pub target_cache_limits: CacheLimits,
    pub action_cache_limits: CacheLimits,
    /// Checkpoints older than this are refused by the resume planner.
    /// Default: 24 hours.
    pub max_checkpoint_age_secs: u64,
    /// HMAC signing key for the cache and checkpoint binary formats. Must be
    /// supplied by the caller; this crate never
    /// generates and silently persists one.
    pub signing_key: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_size_bytes: u64,
    pub max_age_days: u32,
}

impl Default for CacheLimits {
    fn default() -> Self {
        CacheLimits {
            max_entries: 10_000,
            max_size_bytes: 0,
            max_age_days: 0,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            workers: num_cpus::get(),
            fail_fast: false,
            target_cache_limits: CacheLimits::default(),
            action_cache_limits: CacheLimits::default(),
            max_checkpoint_age_secs: 24 * 3600,
            signing_key: Vec::new(),
        }
    }
}
