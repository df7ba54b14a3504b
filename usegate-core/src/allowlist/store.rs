//! File-backed allowlist store.
//!
//! `AllowlistStore` owns the YAML file and the current snapshot. Reads are a
//! single atomic pointer load. Reloads and mutations share one sequence,
//! executed by one writer at a time:
//!
//! ```text
//! lock ─► read file ─► modify ─► backup ─► atomic write ─► publish snapshot
//! ```
//!
//! Writers are serialised in-process by a mutex and across processes by an
//! advisory lock on `<config path>.lock`, so the CLI and a running proxy can
//! share one file.

use arc_swap::ArcSwap;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use super::backup::{BackupManager, BackupPolicy, BackupStatus};
use super::bulk;
use super::error::{StoreError, StoreResult};
use super::{AllowlistRecord, AllowlistSnapshot, SnapshotOrigin, canonical, check_id};
use crate::config::{
    AccessControl, ConfigDocument, ConfigError, SecuritySection, StoreDefaults, load_and_validate,
    render_document, write_document,
};
use crate::metrics::GateMetrics;
use crate::policy::SnapshotProvider;

/// Poll interval while waiting for the cross-process lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Store construction options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Backup directory. Defaults to `<config dir>/backups`.
    pub backup_dir: Option<PathBuf>,
    pub backup_policy: BackupPolicy,
    /// Maximum wait for the cross-process writer lock.
    pub lock_timeout: Duration,
    /// Write the built-in document when the file does not exist.
    pub create_if_missing: bool,
    pub metrics: Option<Arc<GateMetrics>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            backup_dir: None,
            backup_policy: BackupPolicy::default(),
            lock_timeout: StoreDefaults::default().lock_timeout,
            create_if_missing: true,
            metrics: None,
        }
    }
}

/// Outcome of a single-record mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub backup: BackupStatus,
}

/// Outcome of a bulk import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkAddReport {
    /// Identifiers added, in input order.
    pub added: Vec<String>,
    /// Identifiers already present (or repeated in the input).
    pub skipped: Vec<String>,
    pub backup: BackupStatus,
}

/// Modification time and length of the file as last published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// Writer-side state, guarded by the writer mutex.
#[derive(Debug, Default)]
struct WriterState {
    stamp: Option<FileStamp>,
}

/// Owns the allowlist file and publishes snapshots of it.
pub struct AllowlistStore {
    path: PathBuf,
    backups: BackupManager,
    current: ArcSwap<AllowlistSnapshot>,
    writer: Mutex<WriterState>,
    lock_timeout: Duration,
    metrics: Option<Arc<GateMetrics>>,
}

impl std::fmt::Debug for AllowlistStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllowlistStore")
            .field("path", &self.path)
            .field("backup_dir", &self.backups.dir())
            .field("records", &self.current.load().len())
            .finish()
    }
}

impl AllowlistStore {
    /// Open the store at `path`.
    ///
    /// Creates the file from the built-in document when it is missing and
    /// `create_if_missing` is set. An unreadable or unparsable file is not an
    /// error: the store starts from the built-in snapshot and logs a warning.
    ///
    /// # Errors
    ///
    /// - `PathIsDirectory` if `path` names a directory
    /// - `Persist` if the default file cannot be created
    pub fn open(path: impl Into<PathBuf>, options: StoreOptions) -> StoreResult<Self> {
        let path = path.into();
        if path.is_dir() {
            return Err(StoreError::PathIsDirectory { path });
        }

        if options.create_if_missing && !path.exists() {
            write_document(&path, &ConfigDocument::builtin()).map_err(|source| {
                StoreError::Persist {
                    path: path.clone(),
                    source,
                }
            })?;
            info!(path = %path.display(), "Created default configuration file");
        }

        let backups = BackupManager::for_config(&path, options.backup_dir, options.backup_policy);

        let store = Self {
            path,
            backups,
            current: ArcSwap::from_pointee(AllowlistSnapshot::builtin()),
            writer: Mutex::new(WriterState::default()),
            lock_timeout: options.lock_timeout,
            metrics: options.metrics,
        };
        store.reload();

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// The current snapshot. Never blocks on writers.
    pub fn snapshot(&self) -> Arc<AllowlistSnapshot> {
        self.current.load_full()
    }

    /// Canonical membership test against the current snapshot.
    pub fn validate(&self, id: &str) -> bool {
        self.current.load().contains(id)
    }

    /// Current records in insertion order.
    pub fn list(&self) -> Vec<AllowlistRecord> {
        self.current.load().records().to_vec()
    }

    /// The current document rendered as YAML.
    pub fn show(&self) -> StoreResult<String> {
        Ok(render_document(self.current.load().document())?)
    }

    /// Write the current records to `destination` in the bulk line format.
    ///
    /// Returns the number of records written.
    pub fn export(&self, destination: &Path) -> StoreResult<usize> {
        let snapshot = self.snapshot();
        std::fs::write(destination, bulk::format(snapshot.records()))?;
        info!(
            destination = %destination.display(),
            count = snapshot.len(),
            "Exported use cases"
        );
        Ok(snapshot.len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Load / reload
    // ─────────────────────────────────────────────────────────────────────────

    /// Read the backing file into a snapshot without publishing it.
    ///
    /// Never fails: on a missing, unparsable or invalid file this returns
    /// the last-known-good snapshot, or the built-in one if nothing good was
    /// ever loaded.
    pub fn load(&self) -> Arc<AllowlistSnapshot> {
        match read_validated(&self.path) {
            Ok(document) => Arc::new(AllowlistSnapshot::from_document(
                document,
                SnapshotOrigin::File,
            )),
            Err(e) => {
                let current = self.current.load();
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    fallback = current.origin().as_str(),
                    "Failed to load configuration, keeping previous allowlist"
                );
                Arc::new(current.as_last_known_good())
            }
        }
    }

    /// Load the file and publish the result.
    pub fn reload(&self) -> Arc<AllowlistSnapshot> {
        let mut state = self.writer.lock();
        self.reload_locked(&mut state)
    }

    /// Reload only if the file's modification time or length changed since
    /// the last publish.
    pub fn reload_if_changed(&self) -> Option<Arc<AllowlistSnapshot>> {
        let mut state = self.writer.lock();
        let stamp = FileStamp::of(&self.path);
        if stamp == state.stamp {
            return None;
        }
        debug!(path = %self.path.display(), "Configuration file changed on disk");
        Some(self.reload_locked(&mut state))
    }

    fn reload_locked(&self, state: &mut WriterState) -> Arc<AllowlistSnapshot> {
        state.stamp = FileStamp::of(&self.path);
        let snapshot = self.load();
        let ok = snapshot.origin() == SnapshotOrigin::File;
        self.publish(snapshot.clone());

        if let Some(metrics) = &self.metrics {
            metrics.record_reload(if ok { "success" } else { "failure" });
        }
        info!(
            path = %self.path.display(),
            use_cases = snapshot.len(),
            origin = snapshot.origin().as_str(),
            "Allowlist loaded"
        );
        snapshot
    }

    fn publish(&self, snapshot: Arc<AllowlistSnapshot>) {
        if let Some(metrics) = &self.metrics {
            metrics.set_allowlist_size(snapshot.len());
        }
        self.current.store(snapshot);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Add an identifier with an optional description.
    ///
    /// # Errors
    ///
    /// - `InvalidId` if the identifier is unusable
    /// - `DuplicateId` if its canonical form is already present
    pub fn add(&self, id: &str, description: Option<&str>) -> StoreResult<MutationOutcome> {
        let id = id.trim();
        check_id(id).map_err(|reason| StoreError::InvalidId {
            id: id.to_string(),
            reason,
        })?;
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let ((), backup) = self.mutate("add", |document| {
            let case_sensitive = document.security.case_sensitive_matching;
            let key = canonical(id, case_sensitive);
            if existing_keys(document).contains(&key) {
                return Err(StoreError::DuplicateId { id: id.to_string() });
            }
            push_record(&mut document.access_control, id, description);
            Ok(((), true))
        })?;

        info!(use_case_id = %id, "Use case added");
        Ok(MutationOutcome { backup })
    }

    /// Remove an identifier (canonical match) and its description.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no identifier matches
    pub fn remove(&self, id: &str) -> StoreResult<MutationOutcome> {
        let id = id.trim();

        let (removed, backup) = self.mutate("remove", |document| {
            let case_sensitive = document.security.case_sensitive_matching;
            let key = canonical(id, case_sensitive);
            let access = &mut document.access_control;

            let before = access.allowed_use_cases.len();
            let mut removed = Vec::new();
            access.allowed_use_cases.retain(|existing| {
                let hit = canonical(existing.trim(), case_sensitive) == key;
                if hit {
                    removed.push(existing.clone());
                }
                !hit
            });
            if access.allowed_use_cases.len() == before {
                return Err(StoreError::NotFound { id: id.to_string() });
            }
            access
                .use_case_descriptions
                .retain(|desc_id, _| canonical(desc_id.trim(), case_sensitive) != key);
            Ok((removed, true))
        })?;

        info!(use_case_id = %id, removed = ?removed, "Use case removed");
        Ok(MutationOutcome { backup })
    }

    /// Import identifiers from bulk text.
    ///
    /// Existing identifiers and repeats within the input are skipped. The file
    /// is written once, and not at all if nothing was added.
    ///
    /// # Errors
    ///
    /// - `MalformedBulkLine` on the first unparsable line; nothing is written
    pub fn bulk_add(&self, text: &str) -> StoreResult<BulkAddReport> {
        let entries = bulk::parse(text)?;

        let ((added, skipped), backup) = self.mutate("bulk_add", |document| {
            let case_sensitive = document.security.case_sensitive_matching;
            let mut seen = existing_keys(document);
            let mut added = Vec::new();
            let mut skipped = Vec::new();

            for entry in entries {
                if !seen.insert(canonical(&entry.id, case_sensitive)) {
                    debug!(use_case_id = %entry.id, line = entry.line, "Skipping existing use case");
                    skipped.push(entry.id);
                    continue;
                }
                push_record(&mut document.access_control, &entry.id, entry.description);
                added.push(entry.id);
            }

            let changed = !added.is_empty();
            Ok(((added, skipped), changed))
        })?;

        info!(
            added = added.len(),
            skipped = skipped.len(),
            "Bulk import finished"
        );
        Ok(BulkAddReport {
            added,
            skipped,
            backup,
        })
    }

    /// Read bulk text from a file and import it.
    pub fn bulk_add_file(&self, source: &Path) -> StoreResult<BulkAddReport> {
        let text = std::fs::read_to_string(source)?;
        self.bulk_add(&text)
    }

    /// Restore the built-in allowlist and security flags. Other sections are
    /// kept. Always backs up first.
    pub fn reset(&self) -> StoreResult<MutationOutcome> {
        let ((), backup) = self.mutate("reset", |document| {
            document.access_control = AccessControl::builtin();
            document.security = SecuritySection::default();
            Ok(((), true))
        })?;

        warn!(path = %self.path.display(), "Allowlist reset to built-in defaults");
        Ok(MutationOutcome { backup })
    }

    /// Run one read-modify-backup-write-publish cycle.
    ///
    /// `apply` returns its value and whether the document changed. Unchanged
    /// documents are neither backed up nor written.
    fn mutate<T, F>(&self, operation: &'static str, apply: F) -> StoreResult<(T, BackupStatus)>
    where
        F: FnOnce(&mut ConfigDocument) -> StoreResult<(T, bool)>,
    {
        let mut state = self.writer.lock();
        let _file_lock = FileLock::acquire(&self.path, self.lock_timeout)?;

        let mut document = match read_validated(&self.path) {
            Ok(document) => document,
            Err(ConfigError::PathIsDirectory { path }) => {
                return Err(StoreError::PathIsDirectory { path });
            }
            // Rewriting would replace the operator's edit with the fallback.
            Err(e @ (ConfigError::InvalidExemptPath { .. } | ConfigError::InvalidUrl { .. })) => {
                return Err(e.into());
            }
            Err(e) => {
                warn!(
                    operation,
                    path = %self.path.display(),
                    error = %e,
                    "Configuration unreadable, applying change to the last good document"
                );
                self.current.load().document().clone()
            }
        };

        let (value, changed) = apply(&mut document)?;
        if !changed {
            debug!(operation, "No change, skipping write");
            return Ok((value, BackupStatus::NotNeeded));
        }

        let backup = self.backups.backup(&self.path)?;

        write_document(&self.path, &document).map_err(|source| StoreError::Persist {
            path: self.path.clone(),
            source,
        })?;

        state.stamp = FileStamp::of(&self.path);
        self.publish(Arc::new(AllowlistSnapshot::from_document(
            document,
            SnapshotOrigin::File,
        )));

        Ok((value, backup))
    }
}

impl SnapshotProvider for AllowlistStore {
    fn snapshot(&self) -> Arc<AllowlistSnapshot> {
        self.current.load_full()
    }
}

/// Load and validate the file, logging each warning.
fn read_validated(path: &Path) -> Result<ConfigDocument, ConfigError> {
    let (document, result) = load_and_validate(path)?;
    for warning in &result.warnings {
        warn!(path = %path.display(), warning = %warning, "Configuration warning");
    }
    Ok(document)
}

fn existing_keys(document: &ConfigDocument) -> HashSet<String> {
    let case_sensitive = document.security.case_sensitive_matching;
    document
        .access_control
        .allowed_use_cases
        .iter()
        .map(|id| canonical(id.trim(), case_sensitive))
        .collect()
}

fn push_record(access: &mut AccessControl, id: &str, description: Option<String>) {
    access.allowed_use_cases.push(id.to_string());
    if let Some(desc) = description {
        access.use_case_descriptions.insert(id.to_string(), desc);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cross-process lock
// ─────────────────────────────────────────────────────────────────────────────

/// Exclusive advisory lock on `<config path>.lock`.
///
/// The lock lives on a separate file because the config itself is replaced by
/// rename on every write, which would orphan a lock held on its inode. The
/// lock file is left on disk after release.
struct FileLock {
    _file: File,
}

impl FileLock {
    fn acquire(config_path: &Path, timeout: Duration) -> StoreResult<Self> {
        let mut lock_path_os = config_path.as_os_str().to_os_string();
        lock_path_os.push(".lock");
        let lock_path = PathBuf::from(lock_path_os);

        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        let deadline = Instant::now() + timeout;
        loop {
            if file.try_lock_exclusive().is_ok() {
                return Ok(Self { _file: file });
            }
            if Instant::now() >= deadline {
                return Err(StoreError::Locked { path: lock_path });
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }
}
