//! # Event multiplexer.
//!
//! Everything asynchronous in the manager funnels through one
//! [`EventDriver`]: POSIX signals, RPC connections on the control socket,
//! child process exits, timers, and internally queued method calls. The
//! manager blocks in [`EventDriver::wait`] and dispatches each returned
//! [`DriverEvent`] to completion before waiting again, which is what makes
//! lock-free single-threaded mutation of manager state safe.
//!
//! ## Sources
//! ```text
//! signals ────────────┐
//! rpc.sock accept ────┤
//! child exits ────────┼──► EventDriver::wait(timeout) ──► DriverEvent
//! timers ─────────────┤
//! DriverHandle queue ─┘
//! ```
//!
//! ## Rules
//! - `wait` is the only suspension point in the whole manager.
//! - Code running inside a dispatched event (a job callback, an RPC handler)
//!   must not touch the driver directly; it enqueues work through a cloned
//!   [`DriverHandle`] instead, and the driver picks it up on the next wait.

mod driver;
mod event;
mod handle;

pub use driver::EventDriver;
pub use event::DriverEvent;
pub use handle::DriverHandle;
