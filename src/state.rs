//! # Persistent override state.
//!
//! The manager persists a small administrative document per domain at
//! `<statedir>/state.json`:
//!
//! ```json
//! {
//!     "SchemaVersion": 1,
//!     "Overrides": {
//!         "org.example.httpd": { "Enabled": false }
//!     }
//! }
//! ```
//!
//! An entry in `Overrides` supersedes the manifest's own `Disabled` key; an
//! absent entry defers to the manifest. Unknown keys in the document and in
//! each override entry survive load/store round-trips.
//!
//! ## Rules
//! - The document is only mutated through [`StateStore`].
//! - Every write is durable before the call returns (write to a temporary
//!   file, fsync, rename into place).
//! - A missing file or missing keys read as the default document.

use std::collections::BTreeMap;
use std::io::{self, Write as _};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Domain;
use crate::error::ManagerError;
use crate::manifest::Label;

/// Per-label enable/disable decision.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobOverride {
    /// Whether the job may be loaded, regardless of the manifest.
    #[serde(rename = "Enabled")]
    pub enabled: bool,

    /// Keys not interpreted by the manager, preserved as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The persisted administrative document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(rename = "SchemaVersion", default = "default_schema_version")]
    pub schema_version: u32,

    /// Per-label overrides, keyed by job label.
    #[serde(rename = "Overrides", default)]
    pub overrides: BTreeMap<String, JobOverride>,

    /// Keys not interpreted by the manager, preserved as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            schema_version: 1,
            overrides: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl StateDocument {
    /// Effective enabled/disabled decision for a label, if one is recorded.
    pub fn override_for(&self, label: &Label) -> Option<bool> {
        self.overrides.get(label.as_str()).map(|o| o.enabled)
    }
}

/// Transactional accessor for the state document.
///
/// Keeps an in-memory copy of the document; [`StateStore::set`] persists
/// atomically and refreshes the copy only after the write succeeded.
pub struct StateStore {
    path: PathBuf,
    doc: StateDocument,
}

impl StateStore {
    /// Opens (or initializes) the state file for a domain.
    ///
    /// Creates the state directory when it is missing and the process is not
    /// the superuser; the superuser is assumed to run against a
    /// pre-provisioned system path.
    pub fn open(domain: &Domain) -> Result<Self, ManagerError> {
        let statedir = domain.statedir();
        let is_root = unsafe { libc::getuid() } == 0;
        if !is_root && !statedir.exists() {
            debug!(dir = %statedir.display(), "creating state directory");
            std::fs::create_dir_all(statedir).map_err(|source| ManagerError::StateFile {
                path: statedir.to_path_buf(),
                source,
            })?;
        }

        let path = domain.state_file_path();
        let doc = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| ManagerError::StateFile {
                path: path.clone(),
                source: io::Error::new(io::ErrorKind::InvalidData, e),
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => StateDocument::default(),
            Err(source) => {
                return Err(ManagerError::StateFile {
                    path,
                    source,
                })
            }
        };
        Ok(Self { path, doc })
    }

    /// Current in-memory snapshot of the document.
    pub fn get(&self) -> &StateDocument {
        &self.doc
    }

    /// Durably persists a new document, then updates the snapshot.
    pub fn set(&mut self, doc: StateDocument) -> Result<(), ManagerError> {
        self.write_durably(&doc)
            .map_err(|source| ManagerError::StateFile {
                path: self.path.clone(),
                source,
            })?;
        self.doc = doc;
        Ok(())
    }

    /// Records an enable/disable override for a label.
    pub fn override_enabled(&mut self, label: &Label, enabled: bool) -> Result<(), ManagerError> {
        let mut doc = self.doc.clone();
        doc.overrides
            .entry(label.as_str().to_string())
            .or_default()
            .enabled = enabled;
        self.set(doc)?;
        info!(job = %label, enabled, "recorded enabled override");
        Ok(())
    }

    /// Resets the document to the default. Test-only.
    ///
    /// Outside of test builds (the `test-util` feature or `cfg(test)`) this
    /// refuses with [`ManagerError::TestOnly`] rather than silently wiping
    /// administrative state.
    pub fn clear(&mut self) -> Result<(), ManagerError> {
        if cfg!(any(test, feature = "test-util")) {
            self.set(StateDocument::default())
        } else {
            Err(ManagerError::TestOnly {
                operation: "clear_state_file",
            })
        }
    }

    // Write-to-temp, fsync, rename. The temp file lives next to the target
    // so the rename stays on one filesystem.
    fn write_durably(&self, doc: &StateDocument) -> io::Result<()> {
        let raw = serde_json::to_vec_pretty(doc)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(&raw)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    // Pre-provisions the statedir the way an installed system would, so the
    // tests behave the same for the superuser.
    fn test_domain(dir: &std::path::Path) -> Domain {
        let statedir = dir.join("state");
        std::fs::create_dir_all(&statedir).unwrap();
        Domain::new("test", statedir, Vec::<PathBuf>::new())
    }

    #[test]
    fn missing_file_reads_as_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::open(&test_domain(tmp.path())).unwrap();
        assert_eq!(store.get().schema_version, 1);
        assert!(store.get().overrides.is_empty());
    }

    #[test]
    fn override_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let domain = test_domain(tmp.path());
        let label = Label::from("org.example.a");

        let mut store = StateStore::open(&domain).unwrap();
        store.override_enabled(&label, false).unwrap();
        assert_eq!(store.get().override_for(&label), Some(false));

        let reopened = StateStore::open(&domain).unwrap();
        assert_eq!(reopened.get().override_for(&label), Some(false));
    }

    #[test]
    fn unknown_keys_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let domain = test_domain(tmp.path());
        std::fs::create_dir_all(domain.statedir()).unwrap();
        std::fs::write(
            domain.state_file_path(),
            serde_json::json!({
                "SchemaVersion": 1,
                "Overrides": { "a": { "Enabled": true, "Reason": "manual" } },
                "Audit": { "by": "admin" },
            })
            .to_string(),
        )
        .unwrap();

        let mut store = StateStore::open(&domain).unwrap();
        store.override_enabled(&Label::from("b"), false).unwrap();

        let raw = std::fs::read(domain.state_file_path()).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(doc["Audit"]["by"], "admin");
        assert_eq!(doc["Overrides"]["a"]["Reason"], "manual");
        assert_eq!(doc["Overrides"]["b"]["Enabled"], false);
    }

    #[test]
    fn clear_resets_under_test_builds() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = StateStore::open(&test_domain(tmp.path())).unwrap();
        store.override_enabled(&Label::from("a"), false).unwrap();
        store.clear().unwrap();
        assert!(store.get().overrides.is_empty());
    }
}
