//! Point-in-time snapshots of files before the annotator mutates them.
//!
//! Backups are sibling files named `<file>.autotype.bak`. When that name is
//! already taken by an earlier session the next free `<file>.autotype.N.bak`
//! is used; an existing snapshot is never overwritten.

use crate::error::{AutotypeError, IntoAutotypeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Marker inserted between the original file name and the backup suffix.
pub const BACKUP_MARKER: &str = ".autotype";

/// Extension of every backup artifact.
pub const BACKUP_EXTENSION: &str = "bak";

/// Upper bound on numbered backups probed for one file.
const MAX_BACKUP_SLOTS: u32 = 1000;

/// SHA-256 hex digest of a byte slice.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of a file's content.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<String> {
    Ok(hash_bytes(&fs::read(path)?))
}

/// Backup path for slot `n` (slot 0 is the unnumbered name).
fn slot_path(original: &Path, n: u32) -> PathBuf {
    let mut name = original
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    if n == 0 {
        name.push(format!("{BACKUP_MARKER}.{BACKUP_EXTENSION}"));
    } else {
        name.push(format!("{BACKUP_MARKER}.{n}.{BACKUP_EXTENSION}"));
    }
    original.with_file_name(name)
}

/// Recover the original path from a backup artifact path.
///
/// Returns `None` if `backup` does not follow the naming scheme.
#[must_use]
pub fn original_path_for(backup: &Path) -> Option<PathBuf> {
    let name = backup.file_name()?.to_str()?;
    let stem = name.strip_suffix(&format!(".{BACKUP_EXTENSION}"))?;

    let original = match stem.strip_suffix(BACKUP_MARKER) {
        Some(original) => original,
        None => {
            let (rest, slot) = stem.rsplit_once('.')?;
            if slot.is_empty() || !slot.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            rest.strip_suffix(BACKUP_MARKER)?
        }
    };

    if original.is_empty() {
        return None;
    }
    Some(backup.with_file_name(original))
}

/// A snapshot taken for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHandle {
    /// The live file.
    pub original: PathBuf,
    /// The snapshot artifact.
    pub backup: PathBuf,
    /// Content hash of the snapshot.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl BackupHandle {
    /// Overwrite the live file with the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::Backup`] if the snapshot is missing or the
    /// live file was deleted externally.
    pub fn restore(&self) -> Result<()> {
        if !self.backup.is_file() {
            return Err(AutotypeError::backup(
                &self.backup,
                "snapshot is missing",
            ));
        }
        if !self.original.exists() {
            return Err(AutotypeError::backup(
                &self.original,
                "live file was deleted; refusing to recreate it",
            ));
        }

        let content = fs::read(&self.backup).into_backup_error(&self.backup)?;
        fs::write(&self.original, content).into_backup_error(&self.original)?;

        info!(
            "Restored {} from {}",
            self.original.display(),
            self.backup.display()
        );
        Ok(())
    }

    /// Delete the snapshot artifact.
    ///
    /// # Errors
    ///
    /// Returns [`AutotypeError::Backup`] if the artifact cannot be removed.
    pub fn discard(&self) -> Result<()> {
        match fs::remove_file(&self.backup) {
            Ok(()) => {
                debug!("Discarded backup {}", self.backup.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AutotypeError::backup(&self.backup, e.to_string())),
        }
    }

    /// Whether the live file currently matches the snapshot.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        hash_file(&self.original)
            .map(|hash| hash == self.content_hash)
            .unwrap_or(false)
    }
}

/// Per-session backup registry.
///
/// [`BackupManager::acquire`] is idempotent per path: the first call copies
/// the file, later calls return the same handle.
#[derive(Debug, Default)]
pub struct BackupManager {
    handles: HashMap<PathBuf, BackupHandle>,
}

impl BackupManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot `path`, or return the existing snapshot for it.
    ///
    /// # Errors
    ///
    /// - [`AutotypeError::FileNotFound`] if `path` does not exist
    /// - [`AutotypeError::Backup`] if the snapshot cannot be written
    pub fn acquire(&mut self, path: &Path) -> Result<BackupHandle> {
        if let Some(handle) = self.handles.get(path) {
            return Ok(handle.clone());
        }

        if !path.is_file() {
            return Err(AutotypeError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read(path).into_backup_error(path)?;
        let backup = write_new_backup(path, &content)?;

        let handle = BackupHandle {
            original: path.to_path_buf(),
            backup,
            content_hash: hash_bytes(&content),
            created_at: Utc::now(),
        };
        info!(
            "Backed up {} to {}",
            path.display(),
            handle.backup.display()
        );

        self.handles.insert(path.to_path_buf(), handle.clone());
        Ok(handle)
    }

    /// Existing snapshot for `path`, if any.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&BackupHandle> {
        self.handles.get(path)
    }

    /// Number of snapshots taken in this session.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Write `content` into the first free backup slot next to `original`.
fn write_new_backup(original: &Path, content: &[u8]) -> Result<PathBuf> {
    for slot in 0..MAX_BACKUP_SLOTS {
        let candidate = slot_path(original, slot);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate);

        match file {
            Ok(mut file) => {
                if let Err(e) = file.write_all(content).and_then(|()| file.sync_all()) {
                    drop(file);
                    let _ = fs::remove_file(&candidate);
                    return Err(AutotypeError::backup(&candidate, e.to_string()));
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(AutotypeError::backup(&candidate, e.to_string())),
        }
    }

    Err(AutotypeError::backup(
        original,
        format!("no free backup slot after {MAX_BACKUP_SLOTS} attempts"),
    ))
}

/// Restore a live file from a backup artifact path.
///
/// The original path is derived from the artifact name. Returns the restored
/// path.
///
/// # Errors
///
/// Returns [`AutotypeError::Backup`] if the name is not a backup artifact,
/// the artifact is missing, or the live file no longer exists.
pub fn restore_from(backup: &Path) -> Result<PathBuf> {
    let original = original_path_for(backup)
        .ok_or_else(|| AutotypeError::backup(backup, "not an autotype backup file name"))?;

    let handle = BackupHandle {
        original: original.clone(),
        backup: backup.to_path_buf(),
        content_hash: String::new(),
        created_at: Utc::now(),
    };
    handle.restore()?;
    Ok(original)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_acquire_copies_content() {
        let temp = TempDir::new().unwrap();
        let file = write(&temp, "app.py", "def f(x):\n    return x\n");

        let mut manager = BackupManager::new();
        let handle = manager.acquire(&file).unwrap();

        assert_eq!(handle.backup, temp.path().join("app.py.autotype.bak"));
        assert_eq!(
            fs::read_to_string(&handle.backup).unwrap(),
            "def f(x):\n    return x\n"
        );
        assert_eq!(handle.content_hash, hash_file(&file).unwrap());
        assert!(file.exists());
    }

    #[test]
    fn test_acquire_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let file = write(&temp, "app.py", "x = 1\n");

        let mut manager = BackupManager::new();
        let first = manager.acquire(&file).unwrap();
        fs::write(&file, "x: int = 1\n").unwrap();
        let second = manager.acquire(&file).unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&second.backup).unwrap(), "x = 1\n");
        assert_eq!(manager.len(), 1);
        assert!(!temp.path().join("app.py.autotype.1.bak").exists());
    }

    #[test]
    fn test_never_overwrites_earlier_backup() {
        let temp = TempDir::new().unwrap();
        let file = write(&temp, "app.py", "new\n");
        write(&temp, "app.py.autotype.bak", "old session\n");

        let handle = BackupManager::new().acquire(&file).unwrap();

        assert_eq!(handle.backup, temp.path().join("app.py.autotype.1.bak"));
        assert_eq!(
            fs::read_to_string(temp.path().join("app.py.autotype.bak")).unwrap(),
            "old session\n"
        );
    }

    #[test]
    fn test_acquire_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = BackupManager::new()
            .acquire(&temp.path().join("ghost.py"))
            .unwrap_err();
        assert!(matches!(err, AutotypeError::FileNotFound { .. }));
    }

    #[test]
    fn test_restore_round_trip() {
        let temp = TempDir::new().unwrap();
        let file = write(&temp, "app.py", "def f(x):\n    return x\n");

        let handle = BackupManager::new().acquire(&file).unwrap();
        fs::write(&file, "def f(x: int) -> int:\n    return x\n").unwrap();
        assert!(!handle.is_unchanged());

        handle.restore().unwrap();
        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "def f(x):\n    return x\n"
        );
        assert!(handle.is_unchanged());
    }

    #[test]
    fn test_restore_fails_when_snapshot_missing() {
        let temp = TempDir::new().unwrap();
        let file = write(&temp, "app.py", "x = 1\n");
        let handle = BackupManager::new().acquire(&file).unwrap();
        fs::remove_file(&handle.backup).unwrap();

        assert!(matches!(
            handle.restore().unwrap_err(),
            AutotypeError::Backup { .. }
        ));
    }

    #[test]
    fn test_restore_fails_when_live_file_deleted() {
        let temp = TempDir::new().unwrap();
        let file = write(&temp, "app.py", "x = 1\n");
        let handle = BackupManager::new().acquire(&file).unwrap();
        fs::remove_file(&file).unwrap();

        assert!(matches!(
            handle.restore().unwrap_err(),
            AutotypeError::Backup { .. }
        ));
        assert!(!file.exists());
    }

    #[test]
    fn test_discard() {
        let temp = TempDir::new().unwrap();
        let file = write(&temp, "app.py", "x = 1\n");
        let handle = BackupManager::new().acquire(&file).unwrap();

        handle.discard().unwrap();
        assert!(!handle.backup.exists());
        // Discarding twice is fine.
        handle.discard().unwrap();
        assert!(file.exists());
    }

    #[test]
    fn test_original_path_for() {
        assert_eq!(
            original_path_for(Path::new("/p/app.py.autotype.bak")),
            Some(PathBuf::from("/p/app.py"))
        );
        assert_eq!(
            original_path_for(Path::new("/p/app.py.autotype.12.bak")),
            Some(PathBuf::from("/p/app.py"))
        );
        assert_eq!(original_path_for(Path::new("/p/app.py.bak")), None);
        assert_eq!(original_path_for(Path::new("/p/app.py.autotype.x.bak")), None);
        assert_eq!(original_path_for(Path::new("/p/.autotype.bak")), None);
    }

    #[test]
    fn test_restore_from_backup_path() {
        let temp = TempDir::new().unwrap();
        let file = write(&temp, "mod.py", "changed\n");
        let backup = write(&temp, "mod.py.autotype.2.bak", "original\n");

        let restored = restore_from(&backup).unwrap();
        assert_eq!(restored, file);
        assert_eq!(fs::read_to_string(&file).unwrap(), "original\n");
    }

    #[test]
    fn test_hash_bytes_is_sha256() {
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
