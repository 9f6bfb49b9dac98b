//! Output verification strategies: repeated runs of the same
//! action, hashed pairwise, establish determinism or produce a per-file
//! diff.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStrategy {
    /// Hash every output file's raw bytes. The default.
    ContentHash,
    /// Byte-for-byte comparison without hashing (useful for small outputs
    /// where a diff is cheaper to read than two hashes).
    BitwiseCompare,
    /// Ignore timestamps and embedded-mtime-like byte ranges before
    /// comparing.
    Fuzzy,
    /// Caller-supplied normalization before comparing (e.g. parse+re-emit a
    /// structured format so irrelevant formatting differences don't count).
    Structural,
}

/// One run's captured outputs: path -> raw bytes.
pub type OutputSnapshot = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub first_hash: String,
    pub second_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct DeterminismCheckResult {
    pub is_deterministic: bool,
    pub diffs: Vec<FileDiff>,
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn normalize_fuzzy(bytes: &[u8]) -> Vec<u8> {
    // A conservative placeholder normalization: strip ASCII digit runs of
    // length >= 10, which is where embedded unix-epoch timestamps tend to
    // live. Real structured formats should use `Structural` instead.
    let mut out = Vec::with_capacity(bytes.len());
    let mut run = 0usize;
    for &b in bytes {
        if b.is_ascii_digit() {
            run += 1;
            if run <= 9 {
                out.push(b);
            }
        } else {
            run = 0;
            out.push(b);
        }
    }
    out
}

/// Compares two snapshots of the same action's outputs under `strategy`.
/// `normalize` is only consulted for [`VerificationStrategy::Structural`].
pub fn compare_runs(
    strategy: VerificationStrategy,
    first: &OutputSnapshot,
    second: &OutputSnapshot,
    normalize: Option<&dyn Fn(&str, &[u8]) -> Vec<u8>>,
) -> DeterminismCheckResult {
    let mut diffs = Vec::new();
    let mut paths: Vec<&String> = first.keys().chain(second.keys()).collect();
    paths.sort();
    paths.dedup();

    for path in paths {
        let a = first.get(path);
        let b = second.get(path);
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a.clone(), b.clone()),
            _ => {
                diffs.push(FileDiff {
                    path: path.clone(),
                    first_hash: a.map(|v| hash_bytes(v)).unwrap_or_default(),
                    second_hash: b.map(|v| hash_bytes(v)).unwrap_or_default(),
                });
                continue;
            }
        };

        let (a, b) = match strategy {
            VerificationStrategy::ContentHash | VerificationStrategy::BitwiseCompare => (a, b),
            VerificationStrategy::Fuzzy => (normalize_fuzzy(&a), normalize_fuzzy(&b)),
            VerificationStrategy::Structural => match normalize {
                Some(f) => (f(path, &a), f(path, &b)),
                None => (a, b),
            },
        };

        let equal = match strategy {
            VerificationStrategy::BitwiseCompare => a == b,
            _ => hash_bytes(&a) == hash_bytes(&b),
        };

        if !equal {
            diffs.push(FileDiff {
                path: path.clone(),
                first_hash: hash_bytes(&a),
                second_hash: hash_bytes(&b),
            });
        }
    }

    DeterminismCheckResult {
        is_deterministic: diffs.is_empty(),
        diffs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_detects_difference() {
        let mut a = OutputSnapshot::new();
        a.insert("out.bin".into(), b"hello".to_vec());
        let mut b = OutputSnapshot::new();
        b.insert("out.bin".into(), b"world".to_vec());

        let result = compare_runs(VerificationStrategy::ContentHash, &a, &b, None);
        assert!(!result.is_deterministic);
        assert_eq!(result.diffs.len(), 1);
    }

    #[test]
    fn fuzzy_ignores_embedded_timestamps() {
        let mut a = OutputSnapshot::new();
        a.insert("log.txt".into(), b"built at 1700000000 ok".to_vec());
        let mut b = OutputSnapshot::new();
        b.insert("log.txt".into(), b"built at 1700000123 ok".to_vec());

        let result = compare_runs(VerificationStrategy::Fuzzy, &a, &b, None);
        assert!(result.is_deterministic);
    }
}
