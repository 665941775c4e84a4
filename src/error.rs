//! # Error types used by the jobvisor manager.
//!
//! This module defines [`ManagerError`], the error enum for failures of the
//! management machinery itself. Job admission rejections and lookups against
//! unknown labels are **not** errors: those surface as `false` returns with a
//! log line, so callers can keep batch operations going. `ManagerError` is
//! reserved for conditions the manager cannot recover from locally, such as
//! calling an operation in the wrong lifecycle state or failing to persist
//! the override document.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// # Errors produced by the manager runtime.
///
/// These represent misuse of the manager API or failures of resources the
/// manager depends on. They propagate out of the core; they are never
/// swallowed into a `false` return.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ManagerError {
    /// An operation was invoked in a lifecycle state that does not support it.
    #[error("operation requires the '{required}' state, but the manager is '{actual}'")]
    InvalidState {
        /// State the operation requires.
        required: &'static str,
        /// State the manager was actually in.
        actual: &'static str,
    },

    /// A test-only operation was invoked in a production build.
    #[error("'{operation}' is a test-only operation")]
    TestOnly {
        /// Name of the refused operation.
        operation: &'static str,
    },

    /// The state file could not be read or durably written.
    ///
    /// The override policy is part of the correctness contract, so a failed
    /// write cannot be dropped silently.
    #[error("state file {path}: {source}")]
    StateFile {
        /// Path of the state file.
        path: PathBuf,
        /// Underlying I/O or encoding failure.
        source: io::Error,
    },

    /// A signal handler could not be installed with the event driver.
    #[error("failed to install handler for {signal}: {source}")]
    SignalInstall {
        /// Human-readable signal name.
        signal: &'static str,
        /// Underlying registration failure.
        source: io::Error,
    },

    /// The RPC control socket could not be bound.
    #[error("failed to bind rpc socket {path}: {source}")]
    RpcBind {
        /// Path of the UNIX-domain socket.
        path: PathBuf,
        /// Underlying bind failure.
        source: io::Error,
    },
}

impl ManagerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ManagerError::InvalidState { .. } => "manager_invalid_state",
            ManagerError::TestOnly { .. } => "manager_test_only",
            ManagerError::StateFile { .. } => "manager_state_file",
            ManagerError::SignalInstall { .. } => "manager_signal_install",
            ManagerError::RpcBind { .. } => "manager_rpc_bind",
        }
    }
}
