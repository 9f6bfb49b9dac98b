//! Cache eviction policy. Pure: takes a snapshot of entry
//! metadata and limits, returns the keys to evict. No I/O happens here —
//! the coordinator applies the decision.

use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub key: String,
    pub size_bytes: u64,
    pub last_accessed: SystemTime,
}

#[derive(Debug, Clone)]
pub struct EvictionLimits {
    pub max_entries: usize,
    pub max_total_bytes: u64,
    pub max_age: Duration,
}

impl Default for EvictionLimits {
    fn default() -> Self {
        EvictionLimits {
            max_entries: 100_000,
            max_total_bytes: 10 * 1024 * 1024 * 1024,
            max_age: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Three passes, applied in order and deduplicated:
/// 1. expired-by-age — anything older than `max_age`.
/// 2. excess-by-count — oldest-accessed entries beyond `max_entries`.
/// 3. excess-by-size — oldest-accessed entries until total size fits
///    `max_total_bytes`.
///
/// Entries already marked for eviction by an earlier pass are not
/// re-evaluated by a later one.
pub fn plan_eviction(entries: &[EntryMeta], limits: &EvictionLimits, now: SystemTime) -> Vec<String> {
    let mut evicted: Vec<String> = Vec::new();
    let mut evicted_set = std::collections::HashSet::new();

    for e in entries {
        let age = now.duration_since(e.last_accessed).unwrap_or(Duration::ZERO);
        if age > limits.max_age {
            evicted.push(e.key.clone());
            evicted_set.insert(e.key.clone());
        }
    }

    let mut by_age: Vec<&EntryMeta> = entries
        .iter()
        .filter(|e| !evicted_set.contains(&e.key))
        .collect();
    by_age.sort_by_key(|e| e.last_accessed);

    let survivors_after_age = entries.len() - evicted.len();
    if survivors_after_age > limits.max_entries {
        let excess = survivors_after_age - limits.max_entries;
        for e in by_age.iter().take(excess) {
            evicted.push(e.key.clone());
            evicted_set.insert(e.key.clone());
        }
    }

    let mut total: u64 = entries
        .iter()
        .filter(|e| !evicted_set.contains(&e.key))
        .map(|e| e.size_bytes)
        .sum();

    if total > limits.max_total_bytes {
        for e in by_age {
            if evicted_set.contains(&e.key) {
                continue;
            }
            if total <= limits.max_total_bytes {
                break;
            }
            evicted.push(e.key.clone());
            evicted_set.insert(e.key.clone());
            total = total.saturating_sub(e.size_bytes);
        }
    }

    evicted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &str, size: u64, age_secs: u64, now: SystemTime) -> EntryMeta {
        EntryMeta {
            key: key.to_string(),
            size_bytes: size,
            last_accessed: now - Duration::from_secs(age_secs),
        }
    }

    #[test]
    fn evicts_expired_entries_by_age() {
        let now = SystemTime::now();
        let limits = EvictionLimits {
            max_age: Duration::from_secs(60),
..EvictionLimits::default()
        };
        let entries = vec![meta("fresh", 10, 10, now), meta("stale", 10, 120, now)];
        let evicted = plan_eviction(&entries, &limits, now);
        assert_eq!(evicted, vec!["stale".to_string()]);
    }

    #[test]
    fn evicts_oldest_when_over_count() {
        let now = SystemTime::now();
        let limits = EvictionLimits {
            max_entries: 2,
            max_age: Duration::from_secs(1_000_000),
..EvictionLimits::default()
        };
        let entries = vec![
            meta("oldest", 1, 300, now),
            meta("middle", 1, 200, now),
            meta("newest", 1, 10, now),
        ];
        let evicted = plan_eviction(&entries, &limits, now);
        assert_eq!(evicted, vec!["oldest".to_string()]);
    }

    #[test]
    fn evicts_by_size_oldest_first() {
        let now = SystemTime::now();
        let limits = EvictionLimits {
            max_total_bytes: 15,
            max_age: Duration::from_secs(1_000_000),
            max_entries: 100,
        };
        let entries = vec![
            meta("a", 10, 300, now),
            meta("b", 10, 200, now),
            meta("c", 10, 10, now),
        ];
        let evicted = plan_eviction(&entries, &limits, now);
        assert_eq!(evicted, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn does_not_double_evict_across_passes() {
        let now = SystemTime::now();
        let limits = EvictionLimits {
            max_age: Duration::from_secs(60),
            max_entries: 1,
            max_total_bytes: 5,
        };
        let entries = vec![meta("stale", 10, 120, now), meta("keep", 1, 1, now)];
        let evicted = plan_eviction(&entries, &limits, now);
        assert_eq!(evicted.iter().filter(|k| *k == "stale").count(), 1);
    }
}
