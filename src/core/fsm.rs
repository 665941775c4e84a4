//! # Manager lifecycle states and triggers.
//!
//! The manager's lifecycle is a four-state machine driven by three triggers.
//! The legal transitions are data: an explicit table of
//! `(from, trigger, to, guard, action)` rows owned by the manager, executed
//! by [`Manager::fire`](super::Manager). A trigger with no matching row is a
//! logged no-op, which keeps the "admission closes once shutdown begins"
//! property a structural fact instead of a scattered set of `if` checks.
//!
//! ```text
//!                 StartRequested
//! Unconfigured ───────────────────► Running ◄──┐ StartRequested
//!      │                              │    └───┘ (pending jobs)
//!      │ StopRequested                │ StopRequested
//!      ▼                              ▼
//!   Finished ◄─────────────── GracefulShutdown
//!              StopRequested │ AllJobsExited
//! ```

use std::fmt;

use crate::error::ManagerError;

use super::manager::Manager;

/// Lifecycle state of a manager instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    /// Constructed but not started. No jobs exist in this state.
    Unconfigured,
    /// Steady state: the control socket is bound and jobs are supervised.
    Running,
    /// Draining: admission is closed, every active job was asked to unload.
    GracefulShutdown,
    /// Terminal. No transitions leave this state.
    Finished,
}

impl ManagerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerState::Unconfigured => "unconfigured",
            ManagerState::Running => "running",
            ManagerState::GracefulShutdown => "shutting-down",
            ManagerState::Finished => "finished",
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the manager between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Start the manager, or promote newly admitted jobs while running.
    StartRequested,
    /// Begin (or force the completion of) shutdown.
    StopRequested,
    /// Every active job has exited during a graceful shutdown.
    AllJobsExited,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::StartRequested => "StartRequested",
            Trigger::StopRequested => "StopRequested",
            Trigger::AllJobsExited => "AllJobsExited",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the transition table.
pub(crate) struct Transition {
    pub from: ManagerState,
    pub trigger: Trigger,
    pub to: ManagerState,
    pub guard: fn(&Manager) -> bool,
    pub action: fn(&mut Manager) -> Result<(), ManagerError>,
}
