use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::kv::write_atomic;
use crate::errors::{WalletError, WalletResult};

/// Manages filesystem paths used by the wallet backend.
#[derive(Debug, Clone)]
pub struct WalletPaths {
    /// Root directory for wallet data.
    root_dir: PathBuf,
    /// Directory holding the encrypted key-value records.
    store_dir: PathBuf,
    /// Directory for exported backup bundles.
    backup_dir: PathBuf,
    /// Path to persisted wallet configuration.
    config_file: PathBuf,
}

impl WalletPaths {
    /// Backup file extension appended to timestamped backups.
    pub const BACKUP_EXTENSION: &'static str = "whispr";

    /// Create a new path manager rooted at the provided directory.
    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageError(
                "Wallet root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            store_dir: root_dir.join("store"),
            backup_dir: root_dir.join("backups"),
            config_file: root_dir.join("wallet.config"),
            root_dir,
        })
    }

    /// Ensure the directory structure exists, creating missing folders.
    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.store_dir)?;
        fs::create_dir_all(&self.backup_dir)?;
        Ok(())
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Write a serialized backup bundle to a new timestamped file.
    pub fn write_backup(&self, bundle_json: &str) -> WalletResult<PathBuf> {
        fs::create_dir_all(&self.backup_dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let backup_filename = format!("whispr_backup_{}.{}", timestamp, Self::BACKUP_EXTENSION);
        let backup_path = self.backup_dir.join(backup_filename);
        write_atomic(&backup_path, bundle_json.as_bytes())?;
        Ok(backup_path)
    }

    pub fn read_backup(&self, backup_path: impl AsRef<Path>) -> WalletResult<String> {
        let backup_path = backup_path.as_ref();
        if !backup_path.exists() {
            return Err(WalletError::NotFound(format!(
                "Backup file does not exist: {}",
                backup_path.display()
            )));
        }
        Ok(fs::read_to_string(backup_path)?)
    }

    /// List all available backup files, sorted by timestamp (newest first).
    pub fn list_backups(&self) -> WalletResult<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            let is_backup = path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == Self::BACKUP_EXTENSION);
            if is_backup {
                backups.push(path);
            }
        }

        // Timestamped names sort chronologically.
        backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(backups)
    }

    /// Delete old backups, keeping only the N most recent.
    pub fn prune_old_backups(&self, keep_count: usize) -> WalletResult<usize> {
        let backups = self.list_backups()?;
        let mut deleted_count = 0;

        for backup_path in backups.iter().skip(keep_count) {
            fs::remove_file(backup_path)?;
            deleted_count += 1;
        }

        if deleted_count > 0 {
            log::info!("Pruned {} old backup(s)", deleted_count);
        }
        Ok(deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_wallet_paths_creation() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();

        assert_eq!(paths.store_dir(), temp_dir.path().join("store"));
        assert_eq!(paths.backup_dir(), temp_dir.path().join("backups"));
        assert_eq!(paths.config_file(), temp_dir.path().join("wallet.config"));
    }

    #[test]
    fn test_empty_root_directory_rejected() {
        match WalletPaths::new("") {
            Err(WalletError::StorageError(msg)) => assert!(msg.contains("cannot be empty")),
            _ => panic!("Expected StorageError for empty root"),
        }
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path().join("nested")).unwrap();

        paths.ensure_directories().unwrap();

        assert!(paths.root_dir().exists());
        assert!(paths.store_dir().exists());
        assert!(paths.backup_dir().exists());
    }

    #[test]
    fn test_write_and_read_backup() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();

        let backup_path = paths.write_backup("{\"format\":\"whispr-backup\"}").unwrap();
        assert!(backup_path.starts_with(paths.backup_dir()));

        let filename = backup_path.file_name().unwrap().to_string_lossy();
        assert!(filename.starts_with("whispr_backup_"));
        assert!(filename.ends_with(".whispr"));

        let content = paths.read_backup(&backup_path).unwrap();
        assert_eq!(content, "{\"format\":\"whispr-backup\"}");
    }

    #[test]
    fn test_read_missing_backup() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();
        let result = paths.read_backup(temp_dir.path().join("nope.whispr"));
        assert!(matches!(result, Err(WalletError::NotFound(_))));
    }

    #[test]
    fn test_list_backups_sorted_and_filtered() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();
        paths.ensure_directories().unwrap();
        assert!(paths.list_backups().unwrap().is_empty());

        let first = paths.write_backup("1").unwrap();
        thread::sleep(Duration::from_millis(5));
        let second = paths.write_backup("2").unwrap();
        fs::write(paths.backup_dir().join("notes.txt"), b"not a backup").unwrap();

        let backups = paths.list_backups().unwrap();
        assert_eq!(backups, vec![second, first]);
    }

    #[test]
    fn test_prune_old_backups() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();

        for i in 0..5 {
            paths.write_backup(&i.to_string()).unwrap();
            thread::sleep(Duration::from_millis(5));
        }

        let before = paths.list_backups().unwrap();
        assert_eq!(paths.prune_old_backups(3).unwrap(), 2);

        let after = paths.list_backups().unwrap();
        assert_eq!(after, before[..3].to_vec());
        assert_eq!(paths.prune_old_backups(10).unwrap(), 0);
    }
}
