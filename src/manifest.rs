//! # Job manifests.
//!
//! A manifest is the declarative description of one job: the label that
//! identifies it, whether it is disabled, and how to run its process. On
//! disk a manifest is a JSON document with PascalCase keys:
//!
//! ```json
//! {
//!     "Label": "org.example.httpd",
//!     "Program": "/usr/sbin/httpd",
//!     "ProgramArguments": ["-f", "/etc/httpd.conf"],
//!     "KeepAlive": true
//! }
//! ```
//!
//! Keys this module does not know about are preserved in
//! [`Manifest::extra`] and ignored by the manager.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when reading a manifest from disk.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },
    /// The file is not a valid JSON document.
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Unique identifier of a job within a domain.
///
/// An opaque non-empty string. Labels are the only stable identity of a job;
/// the registry keys both its pending and active maps by label.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// Wraps a raw string. Emptiness is checked by [`Manifest::validate`].
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets ordered maps keyed by Label be queried with &str.
impl Borrow<str> for Label {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Parsed job description.
///
/// The admission engine reads `label` and `disabled`; the rest configures
/// the job's process and restart behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Manifest {
    /// Unique job identity.
    pub label: Label,

    /// When true the job is admitted only with an override or force-load.
    #[serde(default)]
    pub disabled: bool,

    /// Executable to run. When absent, `program_arguments[0]` is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    /// Argument vector. With `program` set, this is argv[1..]; without it,
    /// the first element is the executable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub program_arguments: Vec<String>,

    /// Working directory for the child process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// Extra environment variables for the child process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_variables: BTreeMap<String, String>,

    /// File that receives the child's stdout (appended).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_out_path: Option<PathBuf>,

    /// File that receives the child's stderr (appended).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_error_path: Option<PathBuf>,

    /// Start the process as soon as the job is bootstrapped.
    #[serde(default = "default_true")]
    pub run_at_load: bool,

    /// Restart the process whenever it exits.
    #[serde(default)]
    pub keep_alive: bool,

    /// Minimum seconds between successive starts of a KeepAlive job.
    #[serde(default = "default_throttle_interval")]
    pub throttle_interval: u64,

    /// Keys not interpreted by the manager, preserved as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

fn default_throttle_interval() -> u64 {
    10
}

impl Manifest {
    /// Schema checks beyond what deserialization enforces.
    ///
    /// Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.label.is_empty() {
            return Err("the Label key must be a non-empty string".to_string());
        }
        Ok(())
    }

    /// The argv to spawn, or `None` for a process-less job.
    pub fn command_line(&self) -> Option<(&str, &[String])> {
        match (&self.program, self.program_arguments.as_slice()) {
            (Some(prog), args) => Some((prog.as_str(), args)),
            (None, [first, rest @ ..]) => Some((first.as_str(), rest)),
            (None, []) => None,
        }
    }
}

/// Reads a manifest file into an untyped JSON document.
///
/// Validation into [`Manifest`] is a separate step so callers can report
/// parse failures and schema failures distinctly.
pub fn parse(path: &Path) -> Result<serde_json::Value, ManifestError> {
    let raw = std::fs::read(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| ManifestError::Json {
        path: path.to_path_buf(),
        source,
    })
}
