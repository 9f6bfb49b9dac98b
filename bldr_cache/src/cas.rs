//! Content-addressable blob store. Blobs are written
//! atomically (temp file in the same directory, fsync, rename) and
//! addressed purely by the SHA-256 hex digest of their bytes — fixed,
//! because inter-run reproducibility depends on this hash function never
//! changing.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CasError {
    #[error("blob {0} not found")]
    NotFound(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Blobs stored at `<root>/blobs/<first-2-hex-chars>/<rest-of-hash>`
///. The store's working directory is created eagerly with a
/// `.gitignore` excluding itself.
pub struct ContentAddressableStore {
    root: PathBuf,
}

impl ContentAddressableStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CasError> {
        let root = root.into();
        let blobs = root.join("blobs");
        fs::create_dir_all(&blobs)?;
        let gitignore = root.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "*\n")?;
        }
        Ok(ContentAddressableStore { root })
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        let (prefix, rest) = hash.split_at(hash.len().min(2));
        self.root.join("blobs").join(prefix).join(rest)
    }

    pub fn has(&self, hash: &str) -> bool {
        self.blob_path(hash).is_file()
    }

    /// Writes `bytes`, returning its content hash. A re-put of bytes whose
    /// hash already exists is a no-op in storage size: the temp file is
    /// dropped and the existing blob kept.
    pub fn put(&self, bytes: &[u8]) -> Result<String, CasError> {
        let hash = hash_bytes(bytes);
        let dest = self.blob_path(&hash);
        if dest.is_file() {
            return Ok(hash);
        }

        let dir = dest.parent().expect("blob path always has a parent");
        fs::create_dir_all(dir)?;

        let tmp_path = dir.join(format!(".tmp-{}", uuid_like()));
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(bytes)?;
            tmp.sync_all()?;
        }

        match fs::rename(&tmp_path, &dest) {
            Ok(()) => Ok(hash),
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(e.into())
            }
        }
    }

    pub fn get(&self, hash: &str) -> Result<Vec<u8>, CasError> {
        let path = self.blob_path(hash);
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CasError::NotFound(hash.to_string()),
            _ => CasError::Io(e),
        })
    }

    /// Only called by the garbage collector.
    pub fn delete(&self, hash: &str) -> Result<(), CasError> {
        let path = self.blob_path(hash);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every blob hash currently stored, for the garbage collector to
    /// cross-reference against live cache entries.
    pub fn list_hashes(&self) -> Result<Vec<String>, CasError> {
        let mut out = Vec::new();
        let blobs = self.root.join("blobs");
        if !blobs.is_dir() {
            return Ok(out);
        }
        for prefix_entry in fs::read_dir(&blobs)? {
            let prefix_entry = prefix_entry?;
            if !prefix_entry.file_type()?.is_dir() {
                continue;
            }
            let prefix = prefix_entry.file_name().to_string_lossy().to_string();
            for rest_entry in fs::read_dir(prefix_entry.path())? {
                let rest_entry = rest_entry?;
                if rest_entry.file_type()?.is_file() {
                    let rest = rest_entry.file_name().to_string_lossy().to_string();
                    out.push(format!("{prefix}{rest}"));
                }
            }
        }
        Ok(out)
    }

    pub fn total_size_bytes(&self) -> Result<u64, CasError> {
        let mut total = 0;
        for hash in self.list_hashes()? {
            total += fs::metadata(self.blob_path(&hash))?.len();
        }
        Ok(total)
    }
}

fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}-{:x}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let cas = ContentAddressableStore::open(dir.path()).unwrap();
        let hash = cas.put(b"hello world").unwrap();
        assert!(cas.has(&hash));
        assert_eq!(cas.get(&hash).unwrap(), b"hello world");
    }

    #[test]
    fn duplicate_put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cas = ContentAddressableStore::open(dir.path()).unwrap();
        let h1 = cas.put(b"same bytes").unwrap();
        let h2 = cas.put(b"same bytes").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(cas.list_hashes().unwrap().len(), 1);
    }

    #[test]
    fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cas = ContentAddressableStore::open(dir.path()).unwrap();
        let err = cas.get(&"a".repeat(64));
        assert!(matches!(err, Err(CasError::NotFound(_))));
    }

    #[test]
    fn creates_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let _cas = ContentAddressableStore::open(dir.path()).unwrap();
        assert!(dir.path().join(".gitignore").exists());
    }
}
