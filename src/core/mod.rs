//! Manager core: lifecycle, admission, and supervision.
//!
//! This module contains the orchestration half of jobvisor. The public API
//! re-exported from here is [`Manager`] plus the types that appear in its
//! signatures; everything else is an internal building block the manager
//! wires together.
//!
//! ## Files & responsibilities
//! - **manager.rs**: public facade; owns the Domain, StateStore, EventDriver
//!   and JobRegistry, executes the transition table, runs the admission
//!   pipeline, dispatches driver events, and serves the control methods.
//! - **fsm.rs**: the four lifecycle states, the three triggers, and the
//!   shape of a transition-table row.
//! - **registry.rs**: the pending/active job maps, promotion, the unload
//!   batch operations, and the `delete_job` removal path.
//! - **job.rs**: one supervised job; process spawn and reap, unload
//!   bookkeeping, KeepAlive restart scheduling.
//!
//! ## Control-plane data flow
//! ```text
//! manifests on disk ──► admission (load_manifest / load_all)
//!                            │ pass: shutdown gate, schema, duplicate
//!                            │       label, override policy, force gate
//!                            ▼
//!                     registry.pending ──promote_all()──► registry.active
//!                                                              │
//!                   EventDriver::wait ◄────────────────────────┘
//!                        │                 (children, timers, delete_job)
//!                        ▼
//!       Signal / Rpc / Ipc / ChildExited ──► Manager::dispatch
//! ```

mod fsm;
mod job;
mod manager;
mod registry;

pub use fsm::ManagerState;
pub use job::JobState;
pub use manager::{Manager, RpcMethod, UnloadTarget};
pub use registry::JobSnapshot;
