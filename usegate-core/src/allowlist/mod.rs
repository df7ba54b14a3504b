//! Use-case allowlist: records, immutable snapshots and the file-backed store.
//!
//! # Overview
//!
//! The allowlist lives in a YAML file owned by [`AllowlistStore`]. Readers
//! never see the file directly; they take an [`AllowlistSnapshot`], an
//! immutable view built from one successful parse. Every reload or mutation
//! builds a fresh snapshot and publishes it with a single atomic swap, so a
//! request that already holds a snapshot finishes against it unchanged.
//!
//! ```text
//! file ──► load ──► AllowlistSnapshot ──► ArcSwap (current) ──► PolicyGate
//!   ▲                                          ▲
//!   └──── backup ◄── write ◄── mutate ─────────┘ (one writer at a time)
//! ```

pub mod backup;
pub mod bulk;
pub mod error;
pub mod reload;
pub mod store;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::config::{ConfigDocument, SecuritySection};
use crate::policy::ExemptPaths;

pub use backup::{BackupManager, BackupPolicy, BackupStatus};
pub use bulk::BulkEntry;
pub use error::{StoreError, StoreResult};
pub use reload::spawn_reload_task;
pub use store::{AllowlistStore, BulkAddReport, MutationOutcome, StoreOptions};

/// Security flags carried by a snapshot.
pub type SecuritySettings = SecuritySection;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Canonical form of an identifier used for every comparison.
///
/// Lower-cased unless matching is case sensitive. Storage keeps the original
/// spelling.
pub fn canonical(id: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        id.to_string()
    } else {
        id.to_lowercase()
    }
}

/// Check that `id` can be stored, sent as a header value and exported in the
/// bulk line format.
///
/// Returns the reason on failure.
pub fn check_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("identifier is empty");
    }
    if id.starts_with('#') {
        return Err("identifier must not start with '#'");
    }
    if id.contains(':') {
        return Err("identifier must not contain ':'");
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("identifier must not contain whitespace or control characters");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Records and snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// One allowed use case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistRecord {
    /// Identifier as written in the file.
    pub id: String,
    pub description: Option<String>,
}

impl AllowlistRecord {
    pub fn new(id: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: id.into(),
            description,
        }
    }

    /// Description, or `Use case <id>` when none is set.
    pub fn display_description(&self) -> String {
        match &self.description {
            Some(desc) => desc.clone(),
            None => format!("Use case {}", self.id),
        }
    }
}

/// Where a snapshot's contents came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// Parsed from the backing file.
    File,
    /// The file could not be read; this is the previous good snapshot.
    LastKnownGood,
    /// Nothing usable was ever loaded; the seeded allowlist.
    BuiltInDefault,
}

impl SnapshotOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::LastKnownGood => "last_known_good",
            Self::BuiltInDefault => "builtin_default",
        }
    }
}

/// Immutable point-in-time view of the allowlist and its security flags.
#[derive(Debug, Clone)]
pub struct AllowlistSnapshot {
    records: Vec<AllowlistRecord>,
    /// canonical id -> position in `records`
    index: HashMap<String, usize>,
    security: SecuritySettings,
    exempt_paths: ExemptPaths,
    document: ConfigDocument,
    loaded_at: DateTime<Utc>,
    origin: SnapshotOrigin,
}

impl AllowlistSnapshot {
    /// Build a snapshot from a parsed document.
    ///
    /// Identifiers that fail [`check_id`] and canonical duplicates are dropped
    /// with a warning; the first occurrence wins.
    pub fn from_document(document: ConfigDocument, origin: SnapshotOrigin) -> Self {
        let security = document.security;
        let case_sensitive = security.case_sensitive_matching;

        let descriptions: HashMap<String, &String> = document
            .access_control
            .use_case_descriptions
            .iter()
            .map(|(id, desc)| (canonical(id.trim(), case_sensitive), desc))
            .collect();

        let mut records = Vec::with_capacity(document.access_control.allowed_use_cases.len());
        let mut index = HashMap::with_capacity(records.capacity());

        for raw in &document.access_control.allowed_use_cases {
            let id = raw.trim();
            if let Err(reason) = check_id(id) {
                tracing::warn!(use_case_id = %raw, reason, "Ignoring unusable use case");
                continue;
            }
            let key = canonical(id, case_sensitive);
            if index.contains_key(&key) {
                tracing::warn!(use_case_id = %raw, "Ignoring duplicate use case");
                continue;
            }
            let description = descriptions
                .get(&key)
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty());
            index.insert(key, records.len());
            records.push(AllowlistRecord::new(id, description));
        }

        let exempt_paths = ExemptPaths::new(&document.proxy.exempt_paths);

        Self {
            records,
            index,
            security,
            exempt_paths,
            document,
            loaded_at: Utc::now(),
            origin,
        }
    }

    /// The seeded allowlist.
    pub fn builtin() -> Self {
        Self::from_document(ConfigDocument::builtin(), SnapshotOrigin::BuiltInDefault)
    }

    /// Same contents, relabelled as a fallback.
    pub(crate) fn as_last_known_good(&self) -> Self {
        let mut snapshot = self.clone();
        if snapshot.origin == SnapshotOrigin::File {
            snapshot.origin = SnapshotOrigin::LastKnownGood;
        }
        snapshot
    }

    /// Look up an identifier by canonical form. Surrounding whitespace is
    /// ignored.
    pub fn lookup(&self, id: &str) -> Option<&AllowlistRecord> {
        let key = canonical(id.trim(), self.security.case_sensitive_matching);
        self.index.get(&key).map(|&pos| &self.records[pos])
    }

    /// Canonical membership test.
    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[AllowlistRecord] {
        &self.records
    }

    /// Identifiers in insertion order, original spelling.
    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    /// Description for every allowed identifier, with the default filled in.
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.records
            .iter()
            .map(|r| (r.id.clone(), r.display_description()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub fn exempt_paths(&self) -> &ExemptPaths {
        &self.exempt_paths
    }

    /// Backend URL named in the file.
    pub fn backend_url(&self) -> &str {
        &self.document.proxy.backend_url
    }

    /// The document this snapshot was built from.
    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn origin(&self) -> SnapshotOrigin {
        self.origin
    }
}
