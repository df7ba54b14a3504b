//! Backup-before-write for the allowlist file.
//!
//! Each destructive write copies the current file into the backup directory
//! first. Names carry a UTC timestamp with microseconds so a plain sort is
//! chronological:
//!
//! ```text
//! backups/config.yaml.20261018T093012.413207Z.bak
//! ```

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use super::error::{StoreError, StoreResult};
use crate::config::loader::parent_dir;

/// Directory name used next to the config file when none is configured.
pub const DEFAULT_BACKUP_DIR: &str = "backups";

/// What a mutation does when its backup cannot be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackupPolicy {
    /// Log the failure, report it in the outcome, and write anyway.
    #[default]
    FailOpen,
    /// Abort the mutation with [`StoreError::BackupFailed`].
    FailClosed,
}

impl FromStr for BackupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail-open" | "fail_open" | "open" => Ok(Self::FailOpen),
            "fail-closed" | "fail_closed" | "closed" => Ok(Self::FailClosed),
            other => Err(format!(
                "unknown backup policy '{other}': expected fail-open or fail-closed"
            )),
        }
    }
}

impl std::fmt::Display for BackupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailOpen => f.write_str("fail-open"),
            Self::FailClosed => f.write_str("fail-closed"),
        }
    }
}

/// Result of the backup step of one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStatus {
    /// A copy was written here.
    Created(PathBuf),
    /// Nothing to back up: no file existed, or the mutation changed nothing.
    NotNeeded,
    /// The copy failed and the mutation went ahead (fail-open).
    Failed(String),
}

impl BackupStatus {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Created(path) => Some(path),
            _ => None,
        }
    }
}

/// Writes and lists backups for one config file.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    policy: BackupPolicy,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>, policy: BackupPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
        }
    }

    /// Backups for `config_path` in `dir`, or in `<config dir>/backups`.
    pub fn for_config(config_path: &Path, dir: Option<PathBuf>, policy: BackupPolicy) -> Self {
        let dir = dir.unwrap_or_else(|| parent_dir(config_path).join(DEFAULT_BACKUP_DIR));
        Self::new(dir, policy)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> BackupPolicy {
        self.policy
    }

    /// Copy `source` into the backup directory.
    ///
    /// Returns `NotNeeded` when `source` does not exist. Failures follow the
    /// configured [`BackupPolicy`].
    pub fn backup(&self, source: &Path) -> StoreResult<BackupStatus> {
        if !source.exists() {
            return Ok(BackupStatus::NotNeeded);
        }

        match self.copy_now(source, Utc::now()) {
            Ok(target) => {
                info!(backup = %target.display(), "Configuration backup created");
                Ok(BackupStatus::Created(target))
            }
            Err(e) => match self.policy {
                BackupPolicy::FailOpen => {
                    warn!(
                        source = %source.display(),
                        error = %e,
                        "Configuration backup failed, continuing with write"
                    );
                    Ok(BackupStatus::Failed(e.to_string()))
                }
                BackupPolicy::FailClosed => Err(StoreError::BackupFailed {
                    path: source.to_path_buf(),
                    message: e.to_string(),
                }),
            },
        }
    }

    /// Existing backups of `source`, oldest first.
    pub fn list(&self, source: &Path) -> StoreResult<Vec<PathBuf>> {
        let prefix = format!("{}.", file_name(source));
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".bak"))
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    fn copy_now(&self, source: &Path, now: DateTime<Utc>) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let stem = format!("{}.{}", file_name(source), now.format("%Y%m%dT%H%M%S%.6fZ"));
        let mut target = self.dir.join(format!("{stem}.bak"));
        let mut n = 1;
        while target.exists() {
            target = self.dir.join(format!("{stem}-{n}.bak"));
            n += 1;
        }

        std::fs::copy(source, &target)?;
        Ok(target)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_policy_parse() {
        assert_eq!("fail-open".parse::<BackupPolicy>(), Ok(BackupPolicy::FailOpen));
        assert_eq!("FAIL_CLOSED".parse::<BackupPolicy>(), Ok(BackupPolicy::FailClosed));
        assert!("sometimes".parse::<BackupPolicy>().is_err());
        assert_eq!(BackupPolicy::default(), BackupPolicy::FailOpen);
    }

    #[test]
    fn test_default_dir_next_to_config() {
        let manager = BackupManager::for_config(
            Path::new("/etc/usegate/config.yaml"),
            None,
            BackupPolicy::FailOpen,
        );
        assert_eq!(manager.dir(), Path::new("/etc/usegate/backups"));
    }

    #[test]
    fn test_no_backup_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path().join("backups"), BackupPolicy::FailClosed);
        let status = manager.backup(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(status, BackupStatus::NotNeeded);
        assert!(!dir.path().join("backups").exists());
    }

    #[test]
    fn test_backup_copies_contents() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.yaml");
        std::fs::write(&config, "original").unwrap();

        let manager = BackupManager::for_config(&config, None, BackupPolicy::FailOpen);
        let status = manager.backup(&config).unwrap();
        let path = status.path().unwrap().to_path_buf();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
        assert_eq!(manager.list(&config).unwrap(), vec![path]);
    }

    #[test]
    fn test_name_collision_gets_suffix() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.yaml");
        std::fs::write(&config, "x").unwrap();

        let manager = BackupManager::new(dir.path().join("b"), BackupPolicy::FailOpen);
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 12).unwrap();
        let first = manager.copy_now(&config, now).unwrap();
        let second = manager.copy_now(&config, now).unwrap();

        assert_eq!(
            first.file_name().unwrap(),
            "config.yaml.20261018T093012.000000Z.bak"
        );
        assert_eq!(
            second.file_name().unwrap(),
            "config.yaml.20261018T093012.000000Z-1.bak"
        );
    }

    #[test]
    fn test_fail_closed_reports_error() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.yaml");
        std::fs::write(&config, "x").unwrap();

        // A regular file where the backup directory should be.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "").unwrap();

        let closed = BackupManager::new(&blocker, BackupPolicy::FailClosed);
        assert!(matches!(
            closed.backup(&config),
            Err(StoreError::BackupFailed { .. })
        ));

        let open = BackupManager::new(&blocker, BackupPolicy::FailOpen);
        assert!(matches!(open.backup(&config), Ok(BackupStatus::Failed(_))));
    }
}
