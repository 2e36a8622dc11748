//! On-disk experiment record store
//!
//! Layout is `<root>/<target>/<id>.json`, one pretty-printed record per file.
//! Records are written to a hidden sibling first and hard-linked into place, so
//! a reader never sees a half-written record and an existing one is never
//! replaced.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use shared::{process_debug, process_warn, ExperimentId, ExperimentRecord, ProcessRole, Target};

use crate::error::{AgentError, AgentResult};

const RECORD_EXTENSION: &str = "json";

/// File-backed store of experiment records
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    role: ProcessRole,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            role: ProcessRole::Cli,
        }
    }

    /// Configure the role reported in log lines (fluent API)
    pub fn with_role(mut self, role: ProcessRole) -> Self {
        self.role = role;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target_dir(&self, target: Target) -> PathBuf {
        self.root.join(target.as_str())
    }

    pub fn record_path(&self, target: Target, id: &ExperimentId) -> PathBuf {
        self.target_dir(target).join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    /// Write a brand new record; fails if a record with the same id exists
    pub fn write_new(&self, record: &ExperimentRecord) -> AgentResult<PathBuf> {
        check_id(record.target, &record.id)?;

        let dir = self.target_dir(record.target);
        fs::create_dir_all(&dir).map_err(|e| AgentError::store("create directory", &dir, e))?;

        let final_path = self.record_path(record.target, &record.id);
        let temp_path = dir.join(format!(".{}.tmp", record.id));
        let content = record.to_json_pretty()?;

        let written = fs::File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(content.as_bytes())?;
                file.sync_all()
            })
            .map_err(|e| AgentError::store("write", &temp_path, e));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        // Linking fails with AlreadyExists instead of replacing the target
        let linked = fs::hard_link(&temp_path, &final_path).map_err(|e| AgentError::store("create", &final_path, e));
        if let Err(e) = fs::remove_file(&temp_path) {
            process_warn!(self.role, "⚠️ Failed to remove {}: {}", temp_path.display(), e);
        }
        linked?;

        process_debug!(self.role, "📝 Wrote record {}", final_path.display());
        Ok(final_path)
    }

    /// Read one record; `None` when no such file exists
    pub fn read(&self, target: Target, id: &ExperimentId) -> AgentResult<Option<ExperimentRecord>> {
        check_id(target, id)?;
        let path = self.record_path(target, id);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(ExperimentRecord::from_json(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::store("read", &path, e)),
        }
    }

    /// Delete a record, but only if it still belongs to `owner` when one is given
    ///
    /// Returns whether a file was removed. A missing file is not an error.
    pub fn remove_if_owned(&self, target: Target, id: &ExperimentId, owner: Option<u32>) -> AgentResult<bool> {
        check_id(target, id)?;
        let path = self.record_path(target, id);

        if let Some(owner_pid) = owner {
            match fs::read_to_string(&path) {
                Ok(content) => {
                    if let Ok(record) = ExperimentRecord::from_json(&content) {
                        if record.pid != 0 && record.pid != owner_pid {
                            process_debug!(
                                self.role,
                                "Keeping record {} owned by pid {} (not {})",
                                id,
                                record.pid,
                                owner_pid
                            );
                            return Ok(false);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(AgentError::store("read", &path, e)),
            }
        }

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AgentError::store("remove", &path, e)),
        }
    }

    /// Lazily walk every readable record of a target
    pub fn scan(&self, target: Target) -> AgentResult<RecordScan> {
        let dir = self.target_dir(target);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => Some(entries),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(AgentError::store("list", &dir, e)),
        };
        Ok(RecordScan {
            entries,
            target,
            role: self.role,
        })
    }
}

/// Ids become file names, so anything that could escape the target directory is unknown
fn check_id(target: Target, id: &ExperimentId) -> AgentResult<()> {
    let raw = id.as_str();
    let safe = !raw.is_empty()
        && !raw.starts_with('.')
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        Ok(())
    } else {
        Err(AgentError::RecordNotFound {
            target,
            id: raw.to_string(),
        })
    }
}

/// Single-pass iterator over the records of one target
///
/// Unreadable and malformed files are skipped with a warning.
pub struct RecordScan {
    entries: Option<fs::ReadDir>,
    target: Target,
    role: ProcessRole,
}

impl Iterator for RecordScan {
    type Item = ExperimentRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.entries.as_mut()?;
        for entry in entries.by_ref() {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    process_warn!(self.role, "⚠️ Skipping unreadable {} entry: {}", self.target, e);
                    continue;
                }
            };

            let is_record = path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(true, |n| n.starts_with('.'));
            if !is_record || !path.is_file() {
                continue;
            }

            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| ExperimentRecord::from_json(&content).map_err(|e| e.to_string()));
            match parsed {
                Ok(record) => return Some(record),
                Err(reason) => {
                    process_warn!(self.role, "⚠️ Skipping malformed record {}: {}", path.display(), reason);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Parameters;
    use tempfile::TempDir;

    fn record(target: Target, pid: u32) -> ExperimentRecord {
        let mut params = Parameters::new();
        params.insert("bytes".to_string(), "1048576".to_string());
        ExperimentRecord::new(target, "load", pid, params)
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let rec = record(Target::Mem, 42);

        let path = store.write_new(&rec).unwrap();

        assert_eq!(path, dir.path().join("mem").join(format!("{}.json", rec.id)));
        assert_eq!(store.read(Target::Mem, &rec.id).unwrap(), Some(rec));
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        store.write_new(&record(Target::Cpu, 1)).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join("cpu"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[test]
    fn test_write_refuses_existing_id() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let rec = record(Target::Disk, 7);
        store.write_new(&rec).unwrap();

        assert!(matches!(store.write_new(&rec), Err(AgentError::StateStore { .. })));
    }

    /// A second writer with the same id never replaces the first record
    #[test]
    fn test_colliding_write_keeps_original_record() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let original = record(Target::Disk, 7);
        store.write_new(&original).unwrap();
        let mut rival = record(Target::Disk, 8);
        rival.id = original.id.clone();

        // Act
        let err = store.write_new(&rival).unwrap_err();

        // Assert
        match err {
            AgentError::StateStore { source, .. } => assert_eq!(source.kind(), ErrorKind::AlreadyExists),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.read(Target::Disk, &original.id).unwrap(), Some(original));
        let names: Vec<_> = fs::read_dir(dir.path().join("disk"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1, "{names:?}");
    }

    #[test]
    fn test_remove_respects_owner() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let rec = record(Target::Net, 100);
        store.write_new(&rec).unwrap();

        assert!(!store.remove_if_owned(Target::Net, &rec.id, Some(200)).unwrap());
        assert!(store.read(Target::Net, &rec.id).unwrap().is_some());

        assert!(store.remove_if_owned(Target::Net, &rec.id, Some(100)).unwrap());
        assert!(store.read(Target::Net, &rec.id).unwrap().is_none());
        assert!(!store.remove_if_owned(Target::Net, &rec.id, None).unwrap());
    }

    #[test]
    fn test_scan_skips_malformed_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let good = record(Target::Mem, 5);
        store.write_new(&good).unwrap();

        let mem_dir = dir.path().join("mem");
        fs::write(mem_dir.join("broken.json"), "{ not json").unwrap();
        fs::write(mem_dir.join("notes.txt"), "ignore me").unwrap();
        fs::write(mem_dir.join(".pending.tmp"), "{}").unwrap();

        let found: Vec<_> = store.scan(Target::Mem).unwrap().collect();
        assert_eq!(found, vec![good]);
    }

    #[test]
    fn test_scan_of_missing_target_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        assert_eq!(store.scan(Target::Cpu).unwrap().count(), 0);
    }

    #[test]
    fn test_unknown_fields_and_missing_params_accepted() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        fs::create_dir_all(dir.path().join("cpu")).unwrap();
        fs::write(
            dir.path().join("cpu").join("abc-123.json"),
            r#"{"id":"abc-123","target":"cpu","action":"load","pid":9,"startedAt":"2024-01-01T00:00:00Z","extra":true}"#,
        )
        .unwrap();

        let rec = store.read(Target::Cpu, &ExperimentId::from("abc-123")).unwrap().unwrap();
        assert_eq!(rec.pid, 9);
        assert!(rec.params.is_empty());
    }

    #[test]
    fn test_path_like_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        for bad in ["../escape", "a/b", "", ".hidden"] {
            assert!(matches!(
                store.read(Target::Cpu, &ExperimentId::from(bad)),
                Err(AgentError::RecordNotFound { .. })
            ));
        }
    }
}
