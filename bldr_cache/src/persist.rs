//! On-disk cache persistence. A deliberately explicit
//! binary format rather than a general-purpose serializer wrapper: magic
//! number, version byte, length-prefixed sections, HMAC-SHA256 signature
//! over the payload. Any tamper, truncation or signature mismatch resets
//! the cache to empty rather than propagating a fatal error — a cold
//! cache is always a safe fallback, a cache poisoned by a corrupt read is
//! not.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use bldr_core::TargetId;

use crate::action_cache::ActionCacheEntry;
use crate::target_cache::TargetCacheEntry;

type HmacSha256 = Hmac<Sha256>;

const MAGIC: u32 = 0x4243_4348; // "BCCH"
const VERSION: u8 = 1;

#[derive(Debug, Default, Clone)]
pub struct CacheSnapshot {
    pub targets: HashMap<TargetId, TargetCacheEntry>,
    pub actions: HashMap<String, ActionCacheEntry>,
}

fn write_section(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.write_u32::<BigEndian>(bytes.len() as u32).unwrap();
    buf.extend_from_slice(bytes);
}

fn read_section(cursor: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
    let len = cursor.read_u32::<BigEndian>().ok()? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).ok()?;
    Some(buf)
}

fn build_payload(snapshot: &CacheSnapshot) -> Vec<u8> {
    let targets_json = serde_json::to_vec(&snapshot.targets).expect("map serializes");
    let actions_json = serde_json::to_vec(&snapshot.actions).expect("map serializes");
    let mut payload = Vec::new();
    write_section(&mut payload, &targets_json);
    write_section(&mut payload, &actions_json);
    payload
}

fn sign(key: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Writes `snapshot` to `path` atomically (temp file + rename), signed with
/// `key` (the workspace id, matching the certificate signing scheme in
/// `bldr_graph::verifier`).
pub fn save(path: &Path, key: &[u8], snapshot: &CacheSnapshot) -> std::io::Result<()> {
    let payload = build_payload(snapshot);
    let signature = sign(key, &payload);

    let mut out = Vec::with_capacity(4 + 1 + 32 + payload.len());
    out.write_u32::<BigEndian>(MAGIC)?;
    out.write_u8(VERSION)?;
    out.extend_from_slice(&signature);
    out.extend_from_slice(&payload);

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".{}.tmp", path.file_name().unwrap_or_default().to_string_lossy()));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&out)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Loads a previously-saved snapshot. Returns `CacheSnapshot::default()` on
/// any I/O error, malformed header, truncated payload, or signature
/// mismatch — corruption here must never fail the build.
pub fn load(path: &Path, key: &[u8]) -> CacheSnapshot {
    match try_load(path, key) {
        Ok(snapshot) => snapshot,
        Err(reason) => {
            tracing::warn!(path = %path.display(), %reason, "cache file unreadable, starting empty");
            CacheSnapshot::default()
        }
    }
}

fn try_load(path: &Path, key: &[u8]) -> Result<CacheSnapshot, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    let mut cursor = Cursor::new(bytes.as_slice());

    let magic = cursor.read_u32::<BigEndian>().map_err(|e| e.to_string())?;
    if magic != MAGIC {
        return Err("bad magic number".to_string());
    }
    let version = cursor.read_u8().map_err(|e| e.to_string())?;
    if version != VERSION {
        return Err(format!("unsupported version {version}"));
    }
    let mut signature = [0u8; 32];
    cursor.read_exact(&mut signature).map_err(|e| e.to_string())?;

    let payload_start = cursor.position() as usize;
    let payload = &bytes[payload_start..];

    let expected = sign(key, payload);
    if expected != signature {
        return Err("signature mismatch".to_string());
    }

    let mut payload_cursor = Cursor::new(payload);
    let targets_json = read_section(&mut payload_cursor).ok_or("truncated targets section")?;
    let actions_json = read_section(&mut payload_cursor).ok_or("truncated actions section")?;

    let targets: HashMap<TargetId, TargetCacheEntry> =
        serde_json::from_slice(&targets_json).map_err(|e| e.to_string())?;
    let actions: HashMap<String, ActionCacheEntry> =
        serde_json::from_slice(&actions_json).map_err(|e| e.to_string())?;

    Ok(CacheSnapshot { targets, actions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target_cache::FileMetadata;

    fn sample_snapshot() -> CacheSnapshot {
        let mut targets = HashMap::new();
        targets.insert(
            TargetId::new("pkg:a"),
            TargetCacheEntry::new(
                "hash1".to_string(),
                "out1".to_string(),
                FileMetadata {
                    size: 100,
                    mtime_secs: 1234,
                },
                HashMap::new(),
                std::time::SystemTime::now(),
            ),
        );
        let mut actions = HashMap::new();
        actions.insert(
            "action1".to_string(),
            ActionCacheEntry {
                output_hashes: vec!["out1".to_string()],
                succeeded: true,
                metadata_hash: "meta1".to_string(),
            },
        );
        CacheSnapshot { targets, actions }
    }

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        let snapshot = sample_snapshot();
        save(&path, b"workspace-key", &snapshot).unwrap();
        let loaded = load(&path, b"workspace-key");
        assert_eq!(loaded.targets.len(), 1);
        assert_eq!(loaded.actions.len(), 1);
    }

    #[test]
    fn wrong_key_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        save(&path, b"right-key", &sample_snapshot()).unwrap();
        let loaded = load(&path, b"wrong-key");
        assert!(loaded.targets.is_empty());
        assert!(loaded.actions.is_empty());
    }

    #[test]
    fn truncated_file_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        save(&path, b"k", &sample_snapshot()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() / 2);
        fs::write(&path, &bytes).unwrap();
        let loaded = load(&path, b"k");
        assert!(loaded.targets.is_empty());
    }

    #[test]
    fn missing_file_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.bin");
        let loaded = load(&path, b"k");
        assert!(loaded.targets.is_empty());
    }

    #[test]
    fn tampered_payload_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        save(&path, b"k", &sample_snapshot()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();
        let loaded = load(&path, b"k");
        assert!(loaded.targets.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn roundtrips_for_arbitrary_entry_counts(n_targets in 0usize..20, n_actions in 0usize..20) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("cache.bin");

            let mut targets = HashMap::new();
            for i in 0..n_targets {
                targets.insert(
                    TargetId::new(format!("pkg:{i}")),
                    TargetCacheEntry::new(
                        format!("h{i}"),
                        format!("o{i}"),
                        FileMetadata { size: i as u64, mtime_secs: i as i64 },
                        HashMap::new(),
                        std::time::SystemTime::now(),
                    ),
                );
            }
            let mut actions = HashMap::new();
            for i in 0..n_actions {
                actions.insert(
                    format!("act{i}"),
                    ActionCacheEntry {
                        output_hashes: vec![format!("o{i}")],
                        succeeded: i % 2 == 0,
                        metadata_hash: format!("meta{i}"),
                    },
                );
            }
            let snapshot = CacheSnapshot { targets, actions };

            save(&path, b"prop-key", &snapshot).unwrap();
            let loaded = load(&path, b"prop-key");
            prop_assert_eq!(loaded.targets.len(), n_targets);
            prop_assert_eq!(loaded.actions.len(), n_actions);
        }
    }
}
