//! Binary checkpoint format: a snapshot of per-node status
//! and content hashes written after throttled status changes and always on
//! failure, so a crashed run can resume instead of rebuilding from scratch.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use bldr_core::{BuildStatus, TargetId};

const MAGIC: u32 = 0x434B_5054; // "CKPT"
const VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed checkpoint: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub workspace: String,
    pub timestamp_unix: i64,
    pub total_targets: u32,
    pub completed_targets: u32,
    pub failed_targets: u32,
    pub node_states: HashMap<TargetId, BuildStatus>,
    pub node_hashes: HashMap<TargetId, String>,
    pub failed_ids: Vec<TargetId>,
}

fn status_byte(status: BuildStatus) -> u8 {
    match status {
        BuildStatus::Pending => 0,
        BuildStatus::Building => 1,
        BuildStatus::Success => 2,
        BuildStatus::Cached => 3,
        BuildStatus::Failed => 4,
    }
}

fn status_from_byte(b: u8) -> Result<BuildStatus, CheckpointError> {
    match b {
        0 => Ok(BuildStatus::Pending),
        1 => Ok(BuildStatus::Building),
        2 => Ok(BuildStatus::Success),
        3 => Ok(BuildStatus::Cached),
        4 => Ok(BuildStatus::Failed),
        other => Err(CheckpointError::Malformed(format!("unknown status byte {other}"))),
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.write_u32::<BigEndian>(s.len() as u32).unwrap();
    buf.extend_from_slice(s.as_bytes());
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, CheckpointError> {
    let len = cursor.read_u32::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| CheckpointError::Malformed(e.to_string()))
}

impl Checkpoint {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(MAGIC).unwrap();
        buf.write_u8(VERSION).unwrap();
        write_string(&mut buf, &self.workspace);
        buf.write_i64::<BigEndian>(self.timestamp_unix).unwrap();
        buf.write_u32::<BigEndian>(self.total_targets).unwrap();
        buf.write_u32::<BigEndian>(self.completed_targets).unwrap();
        buf.write_u32::<BigEndian>(self.failed_targets).unwrap();

        buf.write_u32::<BigEndian>(self.node_states.len() as u32).unwrap();
        for (id, status) in &self.node_states {
            write_string(&mut buf, id.as_str());
            buf.write_u8(status_byte(*status)).unwrap();
        }

        buf.write_u32::<BigEndian>(self.node_hashes.len() as u32).unwrap();
        for (id, hash) in &self.node_hashes {
            write_string(&mut buf, id.as_str());
            write_string(&mut buf, hash);
        }

        buf.write_u32::<BigEndian>(self.failed_ids.len() as u32).unwrap();
        for id in &self.failed_ids {
            write_string(&mut buf, id.as_str());
        }

        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let mut cursor = Cursor::new(bytes);

        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != MAGIC {
            return Err(CheckpointError::Malformed("bad magic number".to_string()));
        }
        let version = cursor.read_u8()?;
        if version != VERSION {
            return Err(CheckpointError::Malformed(format!(
                "unsupported version {version}"
            )));
        }

        let workspace = read_string(&mut cursor)?;
        let timestamp_unix = cursor.read_i64::<BigEndian>()?;
        let total_targets = cursor.read_u32::<BigEndian>()?;
        let completed_targets = cursor.read_u32::<BigEndian>()?;
        let failed_targets = cursor.read_u32::<BigEndian>()?;

        let states_count = cursor.read_u32::<BigEndian>()?;
        let mut node_states = HashMap::with_capacity(states_count as usize);
        for _ in 0..states_count {
            let key = read_string(&mut cursor)?;
            let status = status_from_byte(cursor.read_u8()?)?;
            node_states.insert(TargetId::new(key), status);
        }

        let hashes_count = cursor.read_u32::<BigEndian>()?;
        let mut node_hashes = HashMap::with_capacity(hashes_count as usize);
        for _ in 0..hashes_count {
            let key = read_string(&mut cursor)?;
            let value = read_string(&mut cursor)?;
            node_hashes.insert(TargetId::new(key), value);
        }

        let failed_count = cursor.read_u32::<BigEndian>()?;
        let mut failed_ids = Vec::with_capacity(failed_count as usize);
        for _ in 0..failed_count {
            failed_ids.push(TargetId::new(read_string(&mut cursor)?));
        }

        Ok(Checkpoint {
            workspace,
            timestamp_unix,
            total_targets,
            completed_targets,
            failed_targets,
            node_states,
            node_hashes,
            failed_ids,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!(
            ".{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy()
        ));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&self.to_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let bytes = fs::read(path)?;
        Checkpoint::from_bytes(&bytes)
    }
}
