//! # jobvisor
//!
//! **Jobvisor** is a per-domain service manager: a long-running process that
//! reads job manifests from well-known directories, supervises each job's
//! subprocess, exposes a control socket, persists administrative
//! enable/disable overrides, and shuts down gracefully on signal.
//!
//! ## Features
//!
//! | Area            | Description                                                        | Key types                            |
//! |-----------------|--------------------------------------------------------------------|--------------------------------------|
//! | **Lifecycle**   | Explicit four-state machine driving startup, steady state, drain.  | [`Manager`], [`ManagerState`]        |
//! | **Admission**   | Manifest loading with duplicate detection and override policy.     | [`Manifest`], [`Label`]              |
//! | **Overrides**   | Durable per-job enable/disable decisions that outlive the manager. | [`StateStore`], [`StateDocument`]    |
//! | **Supervision** | Spawn, reap, KeepAlive restarts, graceful and forced unload.       | [`JobState`], [`JobSnapshot`]        |
//! | **Control**     | UNIX-socket RPC with pluggable named methods.                      | [`RpcMethod`], [`rpc`]               |
//! | **Events**      | Single-threaded cooperative multiplexer; the only suspension point.| [`EventDriver`], [`DriverEvent`]     |
//! | **Errors**      | Typed errors for misuse and persistence failures.                  | [`ManagerError`]                     |
//!
//! ## Optional features
//! - `test-util`: exposes test-only operations such as clearing the state
//!   file. Production builds refuse them loudly.
//!
//! ```no_run
//! use std::path::PathBuf;
//! use jobvisor::{Domain, Manager};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let domain = Domain::new(
//!         "example",
//!         PathBuf::from("/tmp/jobvisor"),
//!         vec![PathBuf::from("/tmp/jobvisor/jobs.d")],
//!     );
//!
//!     let mut manager = Manager::new(domain)?;
//!     manager.start_running()?;
//!     manager.run_main_loop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency model
//!
//! The manager is single-threaded and cooperative. Every mutation of manager
//! state happens while dispatching an event returned by
//! [`EventDriver::wait`], so there are no locks anywhere; run it on a
//! `current_thread` tokio runtime.
//!
//! ---

mod config;
mod core;
mod error;
mod events;
mod manifest;
mod signals;
mod state;

pub mod rpc;

// ---- Public re-exports ----

pub use config::Domain;
pub use crate::core::{JobSnapshot, JobState, Manager, ManagerState, RpcMethod, UnloadTarget};
pub use error::ManagerError;
pub use events::{DriverEvent, DriverHandle, EventDriver};
pub use manifest::{Label, Manifest, ManifestError};
pub use signals::lookup as lookup_signal;
pub use state::{JobOverride, StateDocument, StateStore};
