//! Snapshot persistence (C13, §4.10, §6.4).
//!
//! File layout: `snapshot_<sequence_num>.bin` in `snapshot_dir`, each file
//! `u32 version | u64 ts_ns | u64 sequence_num | payload`. `payload` is the
//! JSON encoding of `Snapshot`; an unknown `version` or malformed payload is
//! skipped as corrupt, never fatal to `load_latest_snapshot`.

use crate::error::PersistenceError;
use crate::model::{OrderRecord, Position};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub sequence_num: u64,
    pub ts_ns: i64,
    pub balances: Vec<(String, f64)>,
    pub orders: Vec<OrderRecord>,
    pub positions: Vec<Position>,
    pub strategies: Vec<String>,
}

pub struct StatePersistence {
    snapshot_dir: PathBuf,
    max_snapshots: usize,
}

impl StatePersistence {
    pub fn new(snapshot_dir: impl Into<PathBuf>, max_snapshots: usize) -> Self {
        Self { snapshot_dir, max_snapshots: max_snapshots.max(1) }
    }

    fn path_for(&self, sequence_num: u64) -> PathBuf {
        self.snapshot_dir.join(format!("snapshot_{sequence_num}.bin"))
    }

    /// Write a snapshot atomically: serialize to a sibling temp file, flush,
    /// then rename over the target path.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.snapshot_dir)
            .map_err(|e| PersistenceError::DirUnavailable(e.to_string()))?;

        let payload = serde_json::to_vec(snapshot)
            .map_err(|e| PersistenceError::SnapshotWriteFailed(e.to_string()))?;

        let mut buf = Vec::with_capacity(4 + 8 + 8 + payload.len());
        buf.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(snapshot.ts_ns as u64).to_le_bytes());
        buf.extend_from_slice(&snapshot.sequence_num.to_le_bytes());
        buf.extend_from_slice(&payload);

        let final_path = self.path_for(snapshot.sequence_num);
        let tmp_path = final_path.with_extension("bin.tmp");

        {
            let mut f = fs::File::create(&tmp_path)
                .map_err(|e| PersistenceError::SnapshotWriteFailed(e.to_string()))?;
            f.write_all(&buf).map_err(|e| PersistenceError::SnapshotWriteFailed(e.to_string()))?;
            f.sync_all().map_err(|e| PersistenceError::SnapshotWriteFailed(e.to_string()))?;
        }
        fs::rename(&tmp_path, &final_path)
            .map_err(|e| PersistenceError::SnapshotWriteFailed(e.to_string()))?;

        self.enforce_retention()?;
        Ok(())
    }

    /// Decode one `snapshot_*.bin` file, returning `None` if its header or
    /// payload is malformed (corrupt, not fatal).
    fn decode(path: &Path) -> Option<(u64, Snapshot)> {
        let bytes = fs::read(path).ok()?;
        if bytes.len() < 20 {
            return None;
        }
        let version = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        if version != SNAPSHOT_FORMAT_VERSION {
            return None;
        }
        let sequence_num = u64::from_le_bytes(bytes[12..20].try_into().ok()?);
        let snapshot: Snapshot = serde_json::from_slice(&bytes[20..]).ok()?;
        Some((sequence_num, snapshot))
    }

    /// Selects the file with the highest valid `sequence_num`, skipping any
    /// unreadable or corrupt file rather than failing.
    pub fn load_latest_snapshot(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let entries = match fs::read_dir(&self.snapshot_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::DirUnavailable(e.to_string())),
        };

        let mut best: Option<(u64, Snapshot)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            if let Some((seq, snap)) = Self::decode(&path) {
                if best.as_ref().map(|(b, _)| seq > *b).unwrap_or(true) {
                    best = Some((seq, snap));
                }
            }
        }
        Ok(best.map(|(_, snap)| snap))
    }

    /// Deletes all but the newest `max_snapshots` files, called after each
    /// successful write.
    fn enforce_retention(&self) -> Result<(), PersistenceError> {
        let entries = fs::read_dir(&self.snapshot_dir)
            .map_err(|e| PersistenceError::DirUnavailable(e.to_string()))?;

        let mut sequences: Vec<(u64, PathBuf)> = entries
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                Self::decode(&path).map(|(seq, _)| (seq, path))
            })
            .collect();

        sequences.sort_by_key(|(seq, _)| std::cmp::Reverse(*seq));
        for (_, path) in sequences.into_iter().skip(self.max_snapshots) {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn snapshot(seq: u64) -> Snapshot {
        Snapshot { sequence_num: seq, ts_ns: 1, ..Default::default() }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let ps = StatePersistence::new(dir.path(), 5);
        ps.save(&snapshot(1)).unwrap();
        let loaded = ps.load_latest_snapshot().unwrap().unwrap();
        assert_eq!(loaded.sequence_num, 1);
    }

    #[test]
    fn load_latest_picks_highest_sequence() {
        let dir = tempdir().unwrap();
        let ps = StatePersistence::new(dir.path(), 10);
        ps.save(&snapshot(1)).unwrap();
        ps.save(&snapshot(3)).unwrap();
        ps.save(&snapshot(2)).unwrap();
        let loaded = ps.load_latest_snapshot().unwrap().unwrap();
        assert_eq!(loaded.sequence_num, 3);
    }

    #[test]
    fn retention_keeps_only_newest_n() {
        let dir = tempdir().unwrap();
        let ps = StatePersistence::new(dir.path(), 2);
        for seq in 1..=5 {
            ps.save(&snapshot(seq)).unwrap();
        }
        let remaining = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(remaining, 2);
        let loaded = ps.load_latest_snapshot().unwrap().unwrap();
        assert_eq!(loaded.sequence_num, 5);
    }

    #[test]
    fn corrupt_file_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let ps = StatePersistence::new(dir.path(), 5);
        ps.save(&snapshot(1)).unwrap();
        fs::write(dir.path().join("snapshot_2.bin"), b"not a real snapshot").unwrap();

        let loaded = ps.load_latest_snapshot().unwrap().unwrap();
        assert_eq!(loaded.sequence_num, 1);
    }

    #[test]
    fn missing_dir_returns_none_not_error() {
        let dir = tempdir().unwrap();
        let ps = StatePersistence::new(dir.path().join("does-not-exist"), 5);
        assert!(ps.load_latest_snapshot().unwrap().is_none());
    }
}
