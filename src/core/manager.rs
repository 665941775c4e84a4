//! # The manager: admission, supervision, and lifecycle.
//!
//! [`Manager`] ties the pieces together: it owns the [`Domain`], the
//! [`StateStore`], the [`EventDriver`], the [`JobRegistry`], and the
//! lifecycle state, and it executes the transition table that moves the
//! whole system between states.
//!
//! ## Wiring
//! ```text
//! start_running()
//!   └─► Unconfigured ─StartRequested─► Running
//!         ├─ install signal handlers (SIGPIPE, SIGINT, SIGTERM)
//!         ├─ bind <statedir>/rpc.sock and register it with the driver
//!         ├─ load manifests from every domain load path
//!         └─ promote pending jobs and bootstrap each one
//!
//! run_main_loop() / run_once() / handle_event()
//!   └─► EventDriver::wait(timeout) ─► dispatch:
//!         ├─ Signal        → shutdown policy (graceful, then forced)
//!         ├─ Rpc           → decode request, run method, write reply
//!         ├─ Ipc           → run method (delete_job, start_job, ...)
//!         └─ ChildExited   → job records exit; may arm restart or finish
//!                            its unload via a deferred delete_job
//!
//! stop_running()
//!   └─► Running ─StopRequested─► GracefulShutdown
//!         ├─ unbind the rpc socket (no new work during the drain)
//!         └─ request the unload of every active job
//!       GracefulShutdown ticks poll at 500ms until the active map
//!       empties, then AllJobsExited lands the manager in Finished.
//! ```
//!
//! ## Rules
//! - All state is mutated from dispatched events on the driver thread; no
//!   locks exist anywhere in the manager.
//! - A transition's action runs to completion before the next event is
//!   dispatched.
//! - Admission rejections and unknown labels are `Ok(false)` plus a log
//!   line; `Err` is reserved for misuse and persistence failures.

use std::collections::HashMap;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};

use crate::config::Domain;
use crate::error::ManagerError;
use crate::events::{DriverEvent, DriverHandle, EventDriver};
use crate::manifest::{self, Label, Manifest};
use crate::rpc::{self, RpcReply};
use crate::signals;
use crate::state::StateStore;

use super::fsm::{ManagerState, Transition, Trigger};
use super::job::{Job, DELETE_JOB_METHOD, START_JOB_METHOD};
use super::registry::{JobRegistry, JobSnapshot};

/// Poll cap for shutdown ticks, so exited jobs are reaped promptly even if
/// no other event arrives.
const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

/// A control method: takes the manager and a single string argument.
pub type RpcMethod = fn(&mut Manager, &str) -> Result<serde_json::Value, String>;

/// Target of an unload request.
pub enum UnloadTarget<'a> {
    /// An active job, by label.
    Label(&'a str),
    /// A manifest file whose `Label` key names the job.
    Path(&'a Path),
}

/// A per-domain service manager.
pub struct Manager {
    domain: Domain,
    state_file: StateStore,
    driver: EventDriver,
    handle: DriverHandle,
    registry: JobRegistry,
    state: ManagerState,
    /// Methods reachable from the control socket.
    methods: HashMap<String, RpcMethod>,
    /// Methods reachable only through the driver's internal queue. Job
    /// bookkeeping lives here so a socket client cannot drop a registry
    /// entry out from under a live process.
    internal_methods: HashMap<String, RpcMethod>,
}

const TRANSITIONS: &[Transition] = &[
    Transition {
        from: ManagerState::Unconfigured,
        trigger: Trigger::StopRequested,
        to: ManagerState::Finished,
        guard: always,
        action: no_action,
    },
    Transition {
        from: ManagerState::Unconfigured,
        trigger: Trigger::StartRequested,
        to: ManagerState::Running,
        guard: always,
        action: begin_running,
    },
    Transition {
        from: ManagerState::Running,
        trigger: Trigger::StartRequested,
        to: ManagerState::Running,
        guard: has_pending,
        action: promote_pending,
    },
    Transition {
        from: ManagerState::Running,
        trigger: Trigger::StopRequested,
        to: ManagerState::GracefulShutdown,
        guard: always,
        action: begin_graceful_shutdown,
    },
    Transition {
        from: ManagerState::GracefulShutdown,
        trigger: Trigger::StopRequested,
        to: ManagerState::Finished,
        guard: always,
        action: no_action,
    },
    Transition {
        from: ManagerState::GracefulShutdown,
        trigger: Trigger::AllJobsExited,
        to: ManagerState::Finished,
        guard: always,
        action: announce_drained,
    },
];

fn always(_: &Manager) -> bool {
    true
}

fn has_pending(m: &Manager) -> bool {
    !m.registry.pending_is_empty()
}

fn no_action(_: &mut Manager) -> Result<(), ManagerError> {
    Ok(())
}

fn begin_running(m: &mut Manager) -> Result<(), ManagerError> {
    m.install_signal_handlers()?;
    m.bind_rpc_socket()?;
    m.load_default_manifests()?;
    m.registry.promote_all();
    Ok(())
}

fn promote_pending(m: &mut Manager) -> Result<(), ManagerError> {
    m.registry.promote_all();
    Ok(())
}

fn begin_graceful_shutdown(m: &mut Manager) -> Result<(), ManagerError> {
    // No new work may arrive while the drain runs, so the socket goes first.
    m.unbind_rpc_socket();
    m.registry.unload_all();
    Ok(())
}

fn announce_drained(_: &mut Manager) -> Result<(), ManagerError> {
    info!("all jobs have exited");
    Ok(())
}

impl Manager {
    /// Creates an unconfigured manager for a domain.
    ///
    /// Opens (or initializes) the domain's state file and pre-registers the
    /// built-in control methods. Call [`start_running`](Self::start_running)
    /// to bring the manager up.
    pub fn new(domain: Domain) -> Result<Self, ManagerError> {
        let state_file = StateStore::open(&domain)?;
        let driver = EventDriver::new();
        let handle = driver.handle();
        let mut manager = Self {
            domain,
            state_file,
            driver,
            handle,
            registry: JobRegistry::new(),
            state: ManagerState::Unconfigured,
            methods: HashMap::new(),
            internal_methods: HashMap::new(),
        };
        manager.register_internal_method(DELETE_JOB_METHOD, ipc_delete_job);
        manager.register_internal_method(START_JOB_METHOD, ipc_start_job);
        manager.register_method("load", rpc_load);
        manager.register_method("unload", rpc_unload);
        manager.register_method("list", rpc_list);
        manager.register_method("kill", rpc_kill);
        manager.register_method("dump", rpc_dump);
        manager.register_method("version", rpc_version);
        Ok(manager)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Registers a named control method, replacing any previous handler.
    pub fn register_method(&mut self, name: impl Into<String>, method: RpcMethod) {
        self.methods.insert(name.into(), method);
    }

    /// Registers a method reachable only from the internal queue.
    fn register_internal_method(&mut self, name: impl Into<String>, method: RpcMethod) {
        self.internal_methods.insert(name.into(), method);
    }

    /// Fires `StartRequested`: brings an unconfigured manager up, or
    /// promotes newly admitted jobs on a running one.
    pub fn start_running(&mut self) -> Result<(), ManagerError> {
        self.fire(Trigger::StartRequested)
    }

    /// Fires `StopRequested`: begins a graceful shutdown, or forces a
    /// shutdown already in progress to finish.
    pub fn stop_running(&mut self) -> Result<(), ManagerError> {
        self.fire(Trigger::StopRequested)
    }

    /// Ticks the manager until it reaches `Finished`.
    pub async fn run_main_loop(&mut self) -> Result<(), ManagerError> {
        self.require_running("run_main_loop")?;
        while self.handle_event(None).await? {}
        Ok(())
    }

    /// Single tick; returns false only once the manager is `Finished`.
    pub async fn run_once(&mut self, timeout: Option<Duration>) -> Result<bool, ManagerError> {
        self.require_running("run_once")?;
        self.handle_event(timeout).await
    }

    /// One turn of the event loop.
    ///
    /// - `Running`: wait up to `timeout` for an event and dispatch it.
    /// - `GracefulShutdown`: fire `AllJobsExited` once the active map is
    ///   empty; otherwise wait with a 500ms cap regardless of `timeout`.
    /// - `Finished`: return false.
    ///
    /// Calling this on an unconfigured manager is misuse and errors.
    pub async fn handle_event(&mut self, timeout: Option<Duration>) -> Result<bool, ManagerError> {
        match self.state {
            ManagerState::Unconfigured => Err(ManagerError::InvalidState {
                required: "running",
                actual: self.state.as_str(),
            }),
            ManagerState::Running => {
                if let Some(event) = self.driver.wait(timeout).await {
                    self.dispatch(event).await?;
                }
                Ok(self.state != ManagerState::Finished)
            }
            ManagerState::GracefulShutdown => {
                if self.registry.active_is_empty() {
                    self.fire(Trigger::AllJobsExited)?;
                } else {
                    debug!(
                        remaining = self.registry.active_len(),
                        "shutting down; waiting for jobs to exit"
                    );
                    if let Some(event) = self.driver.wait(Some(SHUTDOWN_POLL)).await {
                        self.dispatch(event).await?;
                    }
                }
                Ok(self.state != ManagerState::Finished)
            }
            ManagerState::Finished => Ok(false),
        }
    }

    /// Admits a manifest file.
    ///
    /// Returns `Ok(true)` when the job entered the pending set; every
    /// rejection is `Ok(false)` with a log line naming the reason.
    pub fn load_manifest(
        &mut self,
        path: &Path,
        override_disabled: bool,
        force_load: bool,
    ) -> Result<bool, ManagerError> {
        let doc = match manifest::parse(path) {
            Ok(doc) => doc,
            Err(e) => {
                error!(error = %e, "failed to parse manifest");
                return Ok(false);
            }
        };
        self.load_manifest_doc(doc, path, override_disabled, force_load)
    }

    /// Admits an already parsed manifest document.
    ///
    /// The decision procedure, in order; the first failure rejects:
    /// shutdown gate, schema validation, duplicate label across
    /// pending and active, the optional enabled-override write, then the
    /// effective-enabled check (a recorded override supersedes the
    /// manifest's `Disabled` key) unless `force_load` is set.
    pub fn load_manifest_doc(
        &mut self,
        doc: serde_json::Value,
        origin: &Path,
        override_disabled: bool,
        force_load: bool,
    ) -> Result<bool, ManagerError> {
        if self.state == ManagerState::GracefulShutdown {
            error!("refusing to load a new job while the manager is shutting down");
            return Ok(false);
        }
        let manifest: Manifest = match serde_json::from_value(doc) {
            Ok(m) => m,
            Err(e) => {
                error!(path = %origin.display(), error = %e, "manifest failed validation");
                return Ok(false);
            }
        };
        if let Err(reason) = manifest.validate() {
            error!(path = %origin.display(), %reason, "manifest failed validation");
            return Ok(false);
        }

        let label = manifest.label.clone();
        if self.registry.contains(&label) {
            error!(job = %label, "tried to load a duplicate job");
            return Ok(false);
        }

        if override_disabled {
            debug!(job = %label, "overriding the Disabled key");
            self.state_file.override_enabled(&label, true)?;
        }

        let recorded = self.state_file.get().override_for(&label);
        let enabled = recorded.unwrap_or(!manifest.disabled);
        if !enabled {
            if force_load {
                info!(job = %label, "forcibly loading a disabled job");
            } else if recorded.is_some() {
                info!(job = %label, "will not load: it is explicitly disabled in the state file");
                return Ok(false);
            } else {
                info!(job = %label, "will not load: the manifest Disabled key is true");
                return Ok(false);
            }
        }

        info!(job = %label, path = %origin.display(), "loaded job");
        let job = Job::new(origin.to_path_buf(), manifest, self.handle.clone());
        self.registry.insert_pending(job);
        Ok(true)
    }

    /// Admits every manifest under a path.
    ///
    /// A directory is scanned one level deep; a file is admitted directly.
    /// Individual failures never abort the batch. Returns `Ok(true)` when
    /// **any** sub-load reported failure (an error flag, not a success
    /// flag), and `Ok(false)` for a path that does not exist.
    pub fn load_all(
        &mut self,
        path: &Path,
        override_disabled: bool,
        force_load: bool,
    ) -> Result<bool, ManagerError> {
        if self.state == ManagerState::GracefulShutdown {
            error!("refusing to load new jobs while the manager is shutting down");
            return Ok(false);
        }
        debug!(path = %path.display(), "loading all manifests");
        if !path.exists() {
            warn!(path = %path.display(), "load failed: path does not exist");
            return Ok(false);
        }

        let mut failed = false;
        if path.is_dir() {
            info!(dir = %path.display(), "loading all manifests in directory");
            let entries = match std::fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    error!(dir = %path.display(), error = %e, "failed to read directory");
                    return Ok(true);
                }
            };
            for entry in entries {
                match entry {
                    Ok(entry) => {
                        if !self.load_manifest(&entry.path(), override_disabled, force_load)? {
                            failed = true;
                        }
                    }
                    Err(e) => {
                        error!(dir = %path.display(), error = %e, "failed to read directory entry");
                        failed = true;
                    }
                }
            }
        } else if !self.load_manifest(path, override_disabled, force_load)? {
            failed = true;
        }
        Ok(failed)
    }

    /// Requests the unload of a job, by label or by manifest path.
    ///
    /// With `override_disabled`, a disabled override is recorded first so
    /// the job stays gone across future loads.
    pub fn unload(
        &mut self,
        target: UnloadTarget<'_>,
        override_disabled: bool,
        force: bool,
    ) -> Result<bool, ManagerError> {
        match target {
            UnloadTarget::Label(label) => self.unload_label(label, override_disabled, force),
            UnloadTarget::Path(path) => {
                let doc = match manifest::parse(path) {
                    Ok(doc) => doc,
                    Err(e) => {
                        error!(error = %e, "failed to parse manifest");
                        return Ok(false);
                    }
                };
                match doc.get("Label").and_then(|v| v.as_str()) {
                    Some(label) => {
                        let label = label.to_string();
                        self.unload_label(&label, override_disabled, force)
                    }
                    None => {
                        error!(path = %path.display(), "manifest has no Label key");
                        Ok(false)
                    }
                }
            }
        }
    }

    fn unload_label(
        &mut self,
        label: &str,
        override_disabled: bool,
        force: bool,
    ) -> Result<bool, ManagerError> {
        if !self.registry.exists(label) {
            info!(job = label, "tried to unload a job that is not loaded");
            return Ok(false);
        }
        if override_disabled {
            debug!(job = label, "overriding the Disabled key");
            self.state_file
                .override_enabled(&Label::from(label), false)?;
        }
        Ok(self.registry.unload(label, force))
    }

    /// Snapshot of the active jobs.
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.registry.list()
    }

    /// Sends a signal, by name or number, to an active job's process.
    pub fn kill(&mut self, label: &str, signame_or_number: &str) -> bool {
        let Some(signum) = signals::lookup(signame_or_number) else {
            info!(signal = signame_or_number, "unknown signal");
            return false;
        };
        let Some(job) = self.registry.get_mut(label) else {
            debug!(job = label, "tried to signal a nonexistent job");
            return false;
        };
        let success = job.kill(signum);
        debug!(job = label, signal = signame_or_number, success, "sent signal");
        success
    }

    /// Logs a description of an active job.
    pub fn dump(&self, label: &str) -> bool {
        match self.registry.get(label) {
            Some(job) => {
                job.dump();
                true
            }
            None => {
                info!(job = label, "no such job");
                false
            }
        }
    }

    /// Resets the state file to its default. Test-only; production builds
    /// refuse.
    pub fn clear_state_file(&mut self) -> Result<(), ManagerError> {
        self.state_file.clear()
    }

    // ---- transitions ----

    fn fire(&mut self, trigger: Trigger) -> Result<(), ManagerError> {
        let row = TRANSITIONS
            .iter()
            .find(|t| t.from == self.state && t.trigger == trigger && (t.guard)(self));
        match row {
            Some(t) => {
                debug!(from = %t.from, to = %t.to, trigger = %trigger, "state transition");
                self.state = t.to;
                (t.action)(self)
            }
            None => {
                debug!(state = %self.state, trigger = %trigger, "trigger has no matching transition; ignoring");
                Ok(())
            }
        }
    }

    fn require_running(&self, operation: &str) -> Result<(), ManagerError> {
        if self.state != ManagerState::Running {
            debug!(operation, state = %self.state, "operation requires a running manager");
            return Err(ManagerError::InvalidState {
                required: "running",
                actual: self.state.as_str(),
            });
        }
        Ok(())
    }

    // ---- transition actions ----

    fn install_signal_handlers(&mut self) -> Result<(), ManagerError> {
        for (signum, name) in [
            (libc::SIGPIPE, "SIGPIPE"),
            (libc::SIGINT, "SIGINT"),
            (libc::SIGTERM, "SIGTERM"),
        ] {
            self.driver
                .watch_signal(signum)
                .map_err(|source| ManagerError::SignalInstall {
                    signal: name,
                    source,
                })?;
        }
        Ok(())
    }

    fn bind_rpc_socket(&mut self) -> Result<(), ManagerError> {
        let path = self.domain.rpc_socket_path();
        let listener = rpc::bind(&path).map_err(|source| ManagerError::RpcBind {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "rpc socket bound");
        self.driver.register_listener(listener);
        Ok(())
    }

    fn unbind_rpc_socket(&mut self) {
        if self.driver.take_listener().is_some() {
            rpc::unlink(&self.domain.rpc_socket_path());
            debug!("rpc socket unbound");
        }
    }

    fn load_default_manifests(&mut self) -> Result<(), ManagerError> {
        info!(domain = %self.domain, "loading default manifests");
        let paths = self.domain.load_paths().to_vec();
        for path in paths {
            let _ = self.load_all(&path, false, false)?;
        }
        Ok(())
    }

    // ---- event dispatch ----

    async fn dispatch(&mut self, event: DriverEvent) -> Result<(), ManagerError> {
        match event {
            DriverEvent::Signal(signum) => self.handle_signal(signum),
            DriverEvent::Rpc(stream) => {
                self.serve_rpc(stream).await;
                Ok(())
            }
            DriverEvent::Ipc { method, arg } => {
                if let Err(reason) = self.dispatch_internal(&method, &arg) {
                    debug!(%method, %reason, "internal method call failed");
                }
                Ok(())
            }
            DriverEvent::ChildExited { label, status } => {
                self.handle_child_exit(&label, status);
                Ok(())
            }
        }
    }

    /// Dispatches a method from the control socket. Internal-only methods
    /// are invisible here.
    fn dispatch_method(&mut self, method: &str, arg: &str) -> Result<serde_json::Value, String> {
        match self.methods.get(method).copied() {
            Some(handler) => handler(self, arg),
            None => {
                warn!(method, "unknown control method");
                Err(format!("unknown method '{method}'"))
            }
        }
    }

    /// Dispatches a method from the internal queue (job callbacks, timers).
    /// Falls back to the public table so queued work can reuse it.
    fn dispatch_internal(&mut self, method: &str, arg: &str) -> Result<serde_json::Value, String> {
        match self.internal_methods.get(method).copied() {
            Some(handler) => handler(self, arg),
            None => self.dispatch_method(method, arg),
        }
    }

    async fn serve_rpc(&mut self, mut stream: UnixStream) {
        let request = match rpc::read_request(&mut stream).await {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "failed to decode rpc request");
                return;
            }
        };
        debug!(method = %request.method, "rpc request");
        let reply = match self.dispatch_method(&request.method, &request.arg) {
            Ok(value) => RpcReply::Ok(value),
            Err(reason) => RpcReply::Error(reason),
        };
        if let Err(e) = rpc::write_reply(&mut stream, &reply).await {
            debug!(error = %e, "failed to write rpc reply");
        }
    }

    fn handle_signal(&mut self, signum: i32) -> Result<(), ManagerError> {
        if signum == libc::SIGPIPE {
            debug!("caught SIGPIPE and ignored it");
            return Ok(());
        }
        let name = signals::name(signum)
            .map(|n| format!("SIG{n}"))
            .unwrap_or_else(|| signum.to_string());
        self.handle_shutdown_signal(&name)
    }

    /// Shutdown escalation: the first signal starts a graceful drain, a
    /// second one while draining unloads everything immediately.
    fn handle_shutdown_signal(&mut self, signame: &str) -> Result<(), ManagerError> {
        match self.state {
            ManagerState::Unconfigured => {
                info!(signal = signame, "caught signal before the manager started");
                self.fire(Trigger::StopRequested)
            }
            ManagerState::Running => {
                info!(signal = signame, "caught signal; shutting down gracefully");
                self.fire(Trigger::StopRequested)
            }
            ManagerState::GracefulShutdown => {
                info!(
                    signal = signame,
                    "caught signal; immediately unloading all running jobs"
                );
                self.registry.force_unload_all();
                self.fire(Trigger::AllJobsExited)
            }
            ManagerState::Finished => {
                info!(signal = signame, "caught signal after the manager was shut down");
                Ok(())
            }
        }
    }

    fn handle_child_exit(&mut self, label: &Label, status: Option<ExitStatus>) {
        match self.registry.get_mut(label.as_str()) {
            Some(job) => job.handle_exit(status),
            None => debug!(job = %label, "exit reported for a job that is no longer loaded"),
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.unbind_rpc_socket();
        self.registry.force_unload_all();
    }
}

// ---- built-in control methods ----

// Internal queue only: dropping a registry entry is safe solely because the
// job itself requests it after reaching its terminal state.
fn ipc_delete_job(m: &mut Manager, arg: &str) -> Result<serde_json::Value, String> {
    if m.registry.remove(arg) {
        debug!(job = arg, "deleted job");
    }
    Ok(serde_json::Value::Null)
}

// Internal queue only: the KeepAlive restart timer's target.
fn ipc_start_job(m: &mut Manager, arg: &str) -> Result<serde_json::Value, String> {
    if m.state != ManagerState::Running {
        return Err("manager is not running".to_string());
    }
    match m.registry.get_mut(arg) {
        Some(job) => {
            if job.start() {
                Ok(serde_json::Value::Null)
            } else {
                Err(format!("job '{arg}' could not be started"))
            }
        }
        None => Err(format!("no job with label '{arg}'")),
    }
}

fn rpc_load(m: &mut Manager, arg: &str) -> Result<serde_json::Value, String> {
    let admitted = m
        .load_manifest(Path::new(arg), false, false)
        .map_err(|e| e.to_string())?;
    if admitted {
        m.start_running().map_err(|e| e.to_string())?;
    }
    Ok(serde_json::json!(admitted))
}

fn rpc_unload(m: &mut Manager, arg: &str) -> Result<serde_json::Value, String> {
    let target = if m.registry.exists(arg) {
        UnloadTarget::Label(arg)
    } else {
        UnloadTarget::Path(Path::new(arg))
    };
    m.unload(target, false, false)
        .map(|ok| serde_json::json!(ok))
        .map_err(|e| e.to_string())
}

fn rpc_list(m: &mut Manager, _arg: &str) -> Result<serde_json::Value, String> {
    serde_json::to_value(m.list()).map_err(|e| e.to_string())
}

fn rpc_kill(m: &mut Manager, arg: &str) -> Result<serde_json::Value, String> {
    let Some((label, signal)) = arg.split_once(' ') else {
        return Err("expected '<label> <signal>'".to_string());
    };
    Ok(serde_json::json!(m.kill(label.trim(), signal.trim())))
}

fn rpc_dump(m: &mut Manager, arg: &str) -> Result<serde_json::Value, String> {
    Ok(serde_json::json!(m.dump(arg)))
}

fn rpc_version(_m: &mut Manager, _arg: &str) -> Result<serde_json::Value, String> {
    Ok(serde_json::json!(env!("CARGO_PKG_VERSION")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobState;
    use serde_json::json;

    // Pre-provisions the statedir so the tests also pass for the superuser,
    // which the store never creates directories for.
    fn test_domain(dir: &Path, load_paths: Vec<std::path::PathBuf>) -> Domain {
        let statedir = dir.join("state");
        std::fs::create_dir_all(&statedir).unwrap();
        Domain::new("test", statedir, load_paths)
    }

    fn test_manager(dir: &Path) -> Manager {
        Manager::new(test_domain(dir, Vec::new())).expect("manager should construct")
    }

    fn admit(m: &mut Manager, doc: serde_json::Value) -> bool {
        m.load_manifest_doc(doc, Path::new("test.json"), false, false)
            .expect("admission should not error")
    }

    async fn drain_to_finished(m: &mut Manager) {
        for _ in 0..100 {
            if !m.handle_event(Some(Duration::from_millis(100))).await.unwrap() {
                return;
            }
        }
        panic!("manager did not reach finished; state={}", m.state());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disabled_manifest_is_rejected_without_force() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();

        assert!(!admit(&mut m, json!({ "Label": "a", "Disabled": true })));
        assert!(m.list().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disabled_manifest_loads_with_force() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();

        let admitted = m
            .load_manifest_doc(
                json!({ "Label": "a", "Disabled": true }),
                Path::new("test.json"),
                false,
                true,
            )
            .unwrap();
        assert!(admitted);

        m.start_running().unwrap();
        let rows = m.list();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "a");
        assert_eq!(rows[0].pid, "-");
        assert_eq!(rows[0].last_exit_status, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn state_file_override_wins_over_the_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let domain = test_domain(tmp.path(), Vec::new());
        {
            let mut store = StateStore::open(&domain).unwrap();
            store.override_enabled(&Label::from("a"), false).unwrap();
        }

        let mut m = Manager::new(domain).unwrap();
        m.start_running().unwrap();
        assert!(!admit(&mut m, json!({ "Label": "a", "Disabled": false })));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn override_disabled_enables_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let domain = test_domain(tmp.path(), Vec::new());
        let mut m = Manager::new(domain.clone()).unwrap();
        m.start_running().unwrap();

        let admitted = m
            .load_manifest_doc(
                json!({ "Label": "a", "Disabled": true }),
                Path::new("test.json"),
                true,
                false,
            )
            .unwrap();
        assert!(admitted);

        let store = StateStore::open(&domain).unwrap();
        assert_eq!(store.get().override_for(&Label::from("a")), Some(true));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn duplicates_are_rejected_across_pending_and_active() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();

        assert!(admit(&mut m, json!({ "Label": "a" })));
        assert!(!admit(&mut m, json!({ "Label": "a" })));

        m.start_running().unwrap();
        assert!(!admit(&mut m, json!({ "Label": "a" })));
        assert_eq!(m.list().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unload_then_reload_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();

        assert!(admit(&mut m, json!({ "Label": "a" })));
        m.start_running().unwrap();
        assert!(m.unload(UnloadTarget::Label("a"), false, false).unwrap());

        // The job's delete_job request is queued; one tick removes it.
        m.run_once(Some(Duration::from_millis(100))).await.unwrap();
        assert!(m.list().is_empty());
        assert!(admit(&mut m, json!({ "Label": "a" })));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unload_with_override_blocks_future_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();

        let admitted = m
            .load_manifest_doc(json!({ "Label": "a" }), Path::new("test.json"), true, false)
            .unwrap();
        assert!(admitted);
        m.start_running().unwrap();

        assert!(m.unload(UnloadTarget::Label("a"), true, false).unwrap());
        m.run_once(Some(Duration::from_millis(100))).await.unwrap();

        // The recorded override now disables the job even though the
        // manifest itself is not disabled.
        assert!(!admit(&mut m, json!({ "Label": "a", "Disabled": false })));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn handle_event_in_unconfigured_is_misuse() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        let err = m.handle_event(None).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidState { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_once_requires_a_running_manager() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        assert!(m.run_once(None).await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_before_start_goes_straight_to_finished() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.stop_running().unwrap();
        assert_eq!(m.state(), ManagerState::Finished);

        // Further triggers are ignored.
        m.stop_running().unwrap();
        assert_eq!(m.state(), ManagerState::Finished);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn graceful_shutdown_with_no_jobs_finishes_in_one_tick() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();
        m.stop_running().unwrap();
        assert_eq!(m.state(), ManagerState::GracefulShutdown);
        assert!(!m.handle_event(None).await.unwrap());
        assert_eq!(m.state(), ManagerState::Finished);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn graceful_shutdown_drains_a_running_job() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();

        assert!(admit(
            &mut m,
            json!({ "Label": "a", "ProgramArguments": ["sleep", "30"] })
        ));
        m.start_running().unwrap();
        let rows = m.list();
        assert_eq!(rows.len(), 1);
        assert_ne!(rows[0].pid, "-");

        let sock = m.domain().rpc_socket_path();
        assert!(sock.exists());
        m.stop_running().unwrap();
        assert_eq!(m.state(), ManagerState::GracefulShutdown);
        assert!(!sock.exists());

        drain_to_finished(&mut m).await;
        assert_eq!(m.state(), ManagerState::Finished);
        assert!(m.list().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn second_shutdown_signal_forces_termination() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();

        assert!(admit(
            &mut m,
            json!({ "Label": "a", "ProgramArguments": ["sleep", "30"] })
        ));
        m.start_running().unwrap();

        m.handle_shutdown_signal("SIGTERM").unwrap();
        assert_eq!(m.state(), ManagerState::GracefulShutdown);

        m.handle_shutdown_signal("SIGTERM").unwrap();
        assert_eq!(m.state(), ManagerState::Finished);
        assert!(m.list().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn admission_is_refused_during_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();
        m.stop_running().unwrap();

        assert!(!admit(&mut m, json!({ "Label": "late" })));
        let failed = m
            .load_all(tmp.path(), false, false)
            .expect("load_all should not error");
        assert!(!failed);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn load_all_reports_partial_failure_but_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let jobs = tmp.path().join("jobs.d");
        std::fs::create_dir_all(&jobs).unwrap();
        std::fs::write(
            jobs.join("good.json"),
            json!({ "Label": "good" }).to_string(),
        )
        .unwrap();
        std::fs::write(jobs.join("garbage.json"), "{ not json").unwrap();

        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();
        let failed = m.load_all(&jobs, false, false).unwrap();
        assert!(failed);

        m.start_running().unwrap();
        let rows = m.list();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "good");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn load_all_on_a_missing_path_is_false() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();
        let failed = m
            .load_all(&tmp.path().join("nope"), false, false)
            .unwrap();
        assert!(!failed);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn manifests_on_load_paths_are_admitted_at_startup() {
        let tmp = tempfile::tempdir().unwrap();
        let jobs = tmp.path().join("jobs.d");
        std::fs::create_dir_all(&jobs).unwrap();
        std::fs::write(jobs.join("a.json"), json!({ "Label": "a" }).to_string()).unwrap();

        let mut m = Manager::new(test_domain(tmp.path(), vec![jobs])).unwrap();
        m.start_running().unwrap();

        assert_eq!(m.state(), ManagerState::Running);
        let rows = m.list();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "a");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn kill_rejects_unknown_signals_and_labels() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();
        assert!(!m.kill("nobody", "SIGTERM"));
        assert!(!m.kill("nobody", "SIGWHATEVER"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rpc_round_trip_lists_jobs() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();
        assert!(admit(&mut m, json!({ "Label": "a" })));
        m.start_running().unwrap();

        let sock = m.domain().rpc_socket_path();
        let client = tokio::spawn(async move {
            let mut stream = tokio::net::UnixStream::connect(&sock).await.unwrap();
            stream
                .write_all(b"{\"Method\": \"list\", \"Arg\": \"\"}\n")
                .await
                .unwrap();
            let mut line = String::new();
            BufReader::new(&mut stream).read_line(&mut line).await.unwrap();
            line
        });

        // One tick accepts and serves the connection.
        m.run_once(Some(Duration::from_secs(2))).await.unwrap();
        let line = client.await.unwrap();
        let reply: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["Ok"][0]["Label"], "a");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn internal_methods_are_not_reachable_over_rpc() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();
        assert!(admit(
            &mut m,
            json!({ "Label": "a", "ProgramArguments": ["sleep", "30"] })
        ));
        m.start_running().unwrap();

        let sock = m.domain().rpc_socket_path();
        for method in [DELETE_JOB_METHOD, START_JOB_METHOD] {
            let sock = sock.clone();
            let request = format!("{{\"Method\": \"{method}\", \"Arg\": \"a\"}}\n");
            let client = tokio::spawn(async move {
                let mut stream = tokio::net::UnixStream::connect(&sock).await.unwrap();
                stream.write_all(request.as_bytes()).await.unwrap();
                let mut line = String::new();
                BufReader::new(&mut stream).read_line(&mut line).await.unwrap();
                line
            });

            m.run_once(Some(Duration::from_secs(2))).await.unwrap();
            let reply: serde_json::Value =
                serde_json::from_str(&client.await.unwrap()).unwrap();
            assert!(
                reply.get("Error").is_some(),
                "{method} should be rejected over rpc, got {reply}"
            );
        }

        // The running job was not dropped from the registry.
        let rows = m.list();
        assert_eq!(rows.len(), 1);
        assert_ne!(rows[0].pid, "-");

        // A proper unload still drains it: SIGTERM, reap, then the job's
        // own delete_job request through the internal queue.
        assert!(m.unload(UnloadTarget::Label("a"), false, false).unwrap());
        for _ in 0..50 {
            if m.list().is_empty() {
                break;
            }
            m.run_once(Some(Duration::from_millis(100))).await.unwrap();
        }
        assert!(m.list().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn keep_alive_job_is_restarted_after_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        m.start_running().unwrap();

        assert!(admit(
            &mut m,
            json!({
                "Label": "flappy",
                "ProgramArguments": ["true"],
                "KeepAlive": true,
                "ThrottleInterval": 0,
            })
        ));
        m.start_running().unwrap();

        // Tick until the exit is reaped and the restart timer has fired.
        let mut restarted = false;
        for _ in 0..50 {
            m.run_once(Some(Duration::from_millis(50))).await.unwrap();
            let job = m.registry.get("flappy").unwrap();
            if job.state() == JobState::Running && job.last_exit_status() == 0 {
                restarted = true;
                break;
            }
        }
        assert!(restarted, "job was not restarted");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn clear_state_file_succeeds_in_test_builds() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = test_manager(tmp.path());
        assert!(m.clear_state_file().is_ok());
    }
}
