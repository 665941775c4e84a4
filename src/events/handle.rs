//! Injection handle for code running inside dispatched events.

use std::time::Duration;

use tokio::process::Child;
use tokio::sync::mpsc;

use crate::manifest::Label;

/// Messages accepted by the driver's internal queue.
pub(crate) enum HandleMsg {
    /// Invoke a registered method on the next wait.
    Call { method: String, arg: String },
    /// Invoke a registered method after a delay.
    Timer {
        delay: Duration,
        method: String,
        arg: String,
    },
    /// Start watching a spawned child for exit.
    WatchChild { label: Label, child: Child },
}

/// Cloneable sender into the driver's internal queue.
///
/// Jobs and method handlers hold one of these instead of a reference to the
/// driver itself. Everything enqueued here is consumed by
/// [`EventDriver::wait`](super::EventDriver::wait) on the driver thread, so a
/// callback can schedule follow-up work without re-entering the manager.
#[derive(Clone)]
pub struct DriverHandle {
    tx: mpsc::UnboundedSender<HandleMsg>,
}

impl DriverHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<HandleMsg>) -> Self {
        Self { tx }
    }

    /// Enqueues a named method call with a single string argument.
    pub fn call(&self, method: impl Into<String>, arg: impl Into<String>) {
        let _ = self.tx.send(HandleMsg::Call {
            method: method.into(),
            arg: arg.into(),
        });
    }

    /// Schedules a named method call to fire after `delay`.
    pub fn arm_timer(&self, delay: Duration, method: impl Into<String>, arg: impl Into<String>) {
        let _ = self.tx.send(HandleMsg::Timer {
            delay,
            method: method.into(),
            arg: arg.into(),
        });
    }

    /// Hands a spawned child to the driver for exit watching.
    pub(crate) fn watch_child(&self, label: Label, child: Child) {
        let _ = self.tx.send(HandleMsg::WatchChild { label, child });
    }
}
