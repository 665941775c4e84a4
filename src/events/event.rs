//! Events delivered by the driver to its caller.

use std::process::ExitStatus;

use tokio::net::UnixStream;

use crate::manifest::Label;

/// One ready event, returned from [`EventDriver::wait`](super::EventDriver::wait).
#[derive(Debug)]
pub enum DriverEvent {
    /// A watched POSIX signal was delivered (raw signal number).
    Signal(i32),

    /// A client connected to the control socket.
    Rpc(UnixStream),

    /// A named method call from the internal queue or an expired timer.
    Ipc {
        /// Registered method name.
        method: String,
        /// Single string argument.
        arg: String,
    },

    /// A supervised child process exited.
    ///
    /// `status` is `None` when the child could not be reaped; the failure is
    /// logged at the watcher.
    ChildExited {
        /// Label of the owning job.
        label: Label,
        /// Exit status, if the child was reaped cleanly.
        status: Option<ExitStatus>,
    },
}
