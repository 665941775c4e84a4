//! # Domain configuration.
//!
//! A [`Domain`] is the administrative scope of one manager instance. It fixes
//! the state directory (override document, RPC socket) and the ordered list
//! of paths searched for job manifests at startup.
//!
//! # Example
//! ```
//! use std::path::PathBuf;
//! use jobvisor::Domain;
//!
//! let domain = Domain::new(
//!     "example",
//!     PathBuf::from("/tmp/jobvisor-example"),
//!     vec![PathBuf::from("/tmp/jobvisor-example/jobs.d")],
//! );
//!
//! assert_eq!(domain.name(), "example");
//! assert!(domain.rpc_socket_path().ends_with("rpc.sock"));
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

/// Immutable per-domain configuration.
///
/// Determines where the manager keeps its state file and RPC socket, and
/// which directories are scanned for manifests when the manager starts.
#[derive(Clone, Debug)]
pub struct Domain {
    name: String,
    statedir: PathBuf,
    load_paths: Vec<PathBuf>,
}

impl Domain {
    /// Creates a domain from explicit parts.
    pub fn new(name: impl Into<String>, statedir: PathBuf, load_paths: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            statedir,
            load_paths,
        }
    }

    /// Creates a per-user domain.
    ///
    /// State lives under `$XDG_STATE_HOME/<name>` (falling back to
    /// `~/.local/state/<name>`); manifests are loaded from
    /// `~/.config/<name>/jobs.d`.
    pub fn user(name: impl Into<String>) -> Self {
        let name = name.into();
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        let statedir = std::env::var_os("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".local/state"))
            .join(&name);
        let load_paths = vec![home.join(".config").join(&name).join("jobs.d")];
        Self {
            name,
            statedir,
            load_paths,
        }
    }

    /// Creates the system-wide domain.
    ///
    /// State lives under `/var/db/<name>`; manifests are loaded from
    /// `/etc/<name>/jobs.d`. The state directory is expected to be
    /// pre-provisioned for the superuser.
    pub fn system(name: impl Into<String>) -> Self {
        let name = name.into();
        let statedir = Path::new("/var/db").join(&name);
        let load_paths = vec![Path::new("/etc").join(&name).join("jobs.d")];
        Self {
            name,
            statedir,
            load_paths,
        }
    }

    /// Domain name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the state file and the RPC socket.
    pub fn statedir(&self) -> &Path {
        &self.statedir
    }

    /// Ordered manifest search paths scanned at startup.
    pub fn load_paths(&self) -> &[PathBuf] {
        &self.load_paths
    }

    /// Path of the persisted override document.
    pub fn state_file_path(&self) -> PathBuf {
        self.statedir.join("state.json")
    }

    /// Path of the UNIX-domain control socket.
    pub fn rpc_socket_path(&self) -> PathBuf {
        self.statedir.join("rpc.sock")
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_derive_from_statedir() {
        let d = Domain::new("t", PathBuf::from("/tmp/t"), vec![]);
        assert_eq!(d.state_file_path(), PathBuf::from("/tmp/t/state.json"));
        assert_eq!(d.rpc_socket_path(), PathBuf::from("/tmp/t/rpc.sock"));
    }

    #[test]
    fn display_is_the_name() {
        let d = Domain::new("gui", PathBuf::from("/x"), vec![]);
        assert_eq!(d.to_string(), "gui");
    }
}
