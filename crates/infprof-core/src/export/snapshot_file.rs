//! Intermediate per-cycle snapshot files for batch export.
//!
//! One JSON file per cycle, named `<session>-<seq>.json` with a
//! zero-padded sequence so lexicographic order is write order. Files are
//! written to a `.tmp` name and renamed into place, so a crash never
//! leaves a half-written file under a final name.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::record::FlatRecord;

use super::ExportError;

const EXTENSION: &str = "json";
const TMP_EXTENSION: &str = "tmp";

pub struct SnapshotStore {
    dir: PathBuf,
    session_id: String,
    next_seq: u64,
}

impl SnapshotStore {
    /// Opens `dir`, creating it and removing leftover `.tmp` files.
    pub fn open(dir: impl Into<PathBuf>, session_id: &str) -> Result<Self, ExportError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut next_seq = 0;
        for entry in fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(TMP_EXTENSION) => {
                    let _ = fs::remove_file(&path);
                }
                Some(EXTENSION) => {
                    if let Some(seq) = sequence_of(&path, session_id) {
                        next_seq = next_seq.max(seq + 1);
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            dir,
            session_id: session_id.to_string(),
            next_seq,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far in this session.
    pub fn len(&self) -> u64 {
        self.next_seq
    }

    pub fn is_empty(&self) -> bool {
        self.next_seq == 0
    }

    /// Writes one cycle's records as the next numbered file.
    pub fn append(&mut self, records: &[FlatRecord]) -> Result<PathBuf, ExportError> {
        let name = format!("{}-{:08}", self.session_id, self.next_seq);
        let tmp_path = self.dir.join(format!("{name}.{TMP_EXTENSION}"));
        let path = self.dir.join(format!("{name}.{EXTENSION}"));

        let mut file = fs::File::create(&tmp_path)?;
        serde_json::to_writer(&mut file, records)?;
        file.flush()?;
        drop(file);
        fs::rename(&tmp_path, &path)?;

        self.next_seq += 1;
        Ok(path)
    }

    /// Paths of every snapshot file of this session, in sequence order.
    pub fn files(&self) -> Result<Vec<PathBuf>, ExportError> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| sequence_of(p, &self.session_id).is_some())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Reads every record back in sequence order.
    ///
    /// A file that cannot be read or parsed is skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<FlatRecord>, ExportError> {
        let mut records = Vec::new();
        for path in self.files()? {
            let parsed = fs::read(&path)
                .map_err(ExportError::from)
                .and_then(|data| serde_json::from_slice::<Vec<FlatRecord>>(&data).map_err(ExportError::from));
            match parsed {
                Ok(mut cycle) => records.append(&mut cycle),
                Err(e) => warn!("Skipping corrupt snapshot file {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }

    /// Deletes every snapshot file and the directory if it is then empty.
    pub fn remove_all(&self) -> Result<(), ExportError> {
        if !self.dir.exists() {
            return Ok(());
        }
        let mut removed = 0usize;
        for path in self.files()? {
            fs::remove_file(&path)?;
            removed += 1;
        }
        if fs::read_dir(&self.dir)?.next().is_none() {
            fs::remove_dir(&self.dir)?;
        }
        debug!("Removed {} snapshot files from {}", removed, self.dir.display());
        Ok(())
    }
}

/// Sequence number of `<session>-<seq>.json`, if `path` is one.
fn sequence_of(path: &Path, session_id: &str) -> Option<u64> {
    if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(session_id)?
        .strip_prefix('-')?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FlatValue;

    fn rec(ts: i64) -> FlatRecord {
        let mut r = FlatRecord::new();
        r.insert("timestamp".into(), FlatValue::Int(ts));
        r
    }

    #[test]
    fn test_files_are_zero_padded_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::open(dir.path().join("snap"), "s1").unwrap();
        for ts in 0..12 {
            store.append(&[rec(ts)]).unwrap();
        }

        let files = store.files().unwrap();
        assert_eq!(files.len(), 12);
        assert!(files[0].ends_with("s1-00000000.json"));
        assert!(files[11].ends_with("s1-00000011.json"));

        let back = store.read_all().unwrap();
        let ts: Vec<i64> = back.iter().map(crate::record::record_timestamp).collect();
        assert_eq!(ts, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_corrupt_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::open(dir.path(), "s").unwrap();
        store.append(&[rec(1)]).unwrap();
        let bad = store.append(&[rec(2)]).unwrap();
        store.append(&[rec(3)]).unwrap();
        fs::write(&bad, b"{not json").unwrap();

        let back = store.read_all().unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1]["timestamp"], FlatValue::Int(3));
    }

    #[test]
    fn test_reopen_continues_sequence_and_drops_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::open(dir.path(), "s").unwrap();
        store.append(&[rec(1)]).unwrap();
        fs::write(dir.path().join("s-00000001.tmp"), b"partial").unwrap();

        let store = SnapshotStore::open(dir.path(), "s").unwrap();
        assert_eq!(store.len(), 1);
        assert!(!dir.path().join("s-00000001.tmp").exists());
    }

    #[test]
    fn test_remove_all_deletes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("snap");
        let mut store = SnapshotStore::open(&snap, "s").unwrap();
        store.append(&[rec(1)]).unwrap();
        store.remove_all().unwrap();
        assert!(!snap.exists());
        store.remove_all().unwrap();
    }
}
