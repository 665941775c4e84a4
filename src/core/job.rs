//! # One supervised job.
//!
//! A [`Job`] owns the runtime side of a manifest: the child process (when
//! one is running), the last exit status, and the unload bookkeeping the
//! registry relies on. Jobs never touch the event driver directly; they
//! enqueue follow-up work through their [`DriverHandle`]:
//!
//! - spawned children are handed to the driver for exit watching,
//! - KeepAlive restarts are armed as `start_job` timers,
//! - a job that reaches its terminal state enqueues `delete_job` so the
//!   registry drops it on a later dispatch. A job must not be removed from
//!   the registry while one of its own callbacks is on the stack, so the
//!   deletion is always deferred through the driver queue.

use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, error, info};

use crate::events::DriverHandle;
use crate::manifest::{Label, Manifest};

/// Method name used for deferred registry deletion.
pub(crate) const DELETE_JOB_METHOD: &str = "delete_job";
/// Method name used for timer-driven and on-demand starts.
pub(crate) const START_JOB_METHOD: &str = "start_job";

/// Lifecycle state of one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Admitted and bootstrapped, no process running.
    Loaded,
    /// A child process is running.
    Running,
    /// The process exited; the job may be restarted.
    Exited,
    /// Terminal: the job is gone as soon as the registry drops it.
    Unloaded,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Loaded => "loaded",
            JobState::Running => "running",
            JobState::Exited => "exited",
            JobState::Unloaded => "unloaded",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A manifest bound to its runtime state.
pub struct Job {
    source: PathBuf,
    manifest: Manifest,
    state: JobState,
    pid: u32,
    last_exit_status: i32,
    unload_requested: bool,
    last_spawn: Option<Instant>,
    handle: DriverHandle,
}

impl Job {
    pub(crate) fn new(source: PathBuf, manifest: Manifest, handle: DriverHandle) -> Self {
        Self {
            source,
            manifest,
            state: JobState::Loaded,
            pid: 0,
            last_exit_status: 0,
            unload_requested: false,
            last_spawn: None,
            handle,
        }
    }

    pub fn label(&self) -> &Label {
        &self.manifest.label
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// PID of the running process, 0 when none.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn last_exit_status(&self) -> i32 {
        self.last_exit_status
    }

    pub fn unload_requested(&self) -> bool {
        self.unload_requested
    }

    /// Moves a freshly promoted job into its initial running state.
    pub(crate) fn bootstrap(&mut self) {
        debug!(job = %self.label(), "bootstrapping");
        if self.manifest.run_at_load {
            self.start();
        } else {
            debug!(job = %self.label(), "RunAtLoad is false; staying loaded");
        }
    }

    /// Spawns the job's process.
    ///
    /// Returns false when the job has no command line, is already running,
    /// is being unloaded, or the spawn itself fails.
    pub(crate) fn start(&mut self) -> bool {
        if self.unload_requested || self.state == JobState::Unloaded {
            debug!(job = %self.label(), "not starting: unload requested");
            return false;
        }
        if self.state == JobState::Running {
            debug!(job = %self.label(), "not starting: already running");
            return false;
        }
        let Some((program, args)) = self.manifest.command_line() else {
            debug!(job = %self.label(), "no program configured; nothing to start");
            return false;
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &self.manifest.working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.manifest.environment_variables);
        cmd.stdin(Stdio::null());
        match self.stdio_pair() {
            Ok((out, err)) => {
                cmd.stdout(out);
                cmd.stderr(err);
            }
            Err(e) => {
                error!(job = %self.label(), error = %e, "failed to open stdio redirection");
                self.state = JobState::Exited;
                return false;
            }
        }

        match cmd.spawn() {
            Ok(child) => {
                self.pid = child.id().unwrap_or(0);
                self.last_spawn = Some(Instant::now());
                self.state = JobState::Running;
                info!(job = %self.label(), pid = self.pid, "started job");
                self.handle.watch_child(self.label().clone(), child);
                true
            }
            Err(e) => {
                error!(job = %self.label(), program, error = %e, "failed to spawn job");
                self.state = JobState::Exited;
                false
            }
        }
    }

    /// Records a reaped exit and decides what happens next.
    ///
    /// An unloading job completes its unload; a KeepAlive job schedules a
    /// restart no sooner than ThrottleInterval after the previous start.
    pub(crate) fn handle_exit(&mut self, status: Option<ExitStatus>) {
        self.pid = 0;
        if let Some(status) = status {
            self.last_exit_status = exit_code(status);
        }
        info!(job = %self.label(), status = self.last_exit_status, "job exited");

        if self.unload_requested {
            self.finish_unload();
            return;
        }
        self.state = JobState::Exited;
        if self.manifest.keep_alive {
            let throttle = Duration::from_secs(self.manifest.throttle_interval);
            let since_spawn = self
                .last_spawn
                .map(|t| t.elapsed())
                .unwrap_or(throttle);
            let delay = throttle.saturating_sub(since_spawn);
            debug!(job = %self.label(), delay = ?delay, "scheduling KeepAlive restart");
            self.handle
                .arm_timer(delay, START_JOB_METHOD, self.label().as_str());
        }
    }

    /// Requests that the job leave the system.
    ///
    /// A running process is sent SIGTERM and the job finishes unloading when
    /// the exit is reaped. Without a process the unload completes at once.
    /// A repeated request is refused unless `force` is set, in which case
    /// the termination signal is sent again.
    pub(crate) fn unload(&mut self, force: bool) -> bool {
        if self.state == JobState::Unloaded {
            return true;
        }
        if self.unload_requested && !force {
            debug!(job = %self.label(), "unload already requested");
            return false;
        }
        self.unload_requested = true;
        if self.pid != 0 {
            debug!(job = %self.label(), pid = self.pid, "sending SIGTERM to unload");
            self.kill(libc::SIGTERM)
        } else {
            self.finish_unload();
            true
        }
    }

    /// Tears the job down immediately: SIGKILL the process, mark unloaded.
    ///
    /// Used on forced shutdown and manager destruction; the caller clears
    /// the registry afterwards, so no deletion is enqueued.
    pub(crate) fn force_unload(&mut self) {
        if self.pid != 0 {
            debug!(job = %self.label(), pid = self.pid, "sending SIGKILL");
            let _ = self.kill(libc::SIGKILL);
        }
        self.pid = 0;
        self.unload_requested = true;
        self.state = JobState::Unloaded;
    }

    /// Delivers a signal to the job's process.
    pub(crate) fn kill(&self, signum: i32) -> bool {
        if self.pid == 0 {
            debug!(job = %self.label(), "no process to signal");
            return false;
        }
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, signum) };
        if rc != 0 {
            let e = io::Error::last_os_error();
            error!(job = %self.label(), pid = self.pid, signal = signum, error = %e, "kill failed");
        }
        rc == 0
    }

    /// Logs a structured description of the job.
    pub(crate) fn dump(&self) {
        info!(
            job = %self.label(),
            state = %self.state,
            pid = self.pid,
            last_exit_status = self.last_exit_status,
            unload_requested = self.unload_requested,
            disabled = self.manifest.disabled,
            keep_alive = self.manifest.keep_alive,
            source = %self.source.display(),
            "job dump"
        );
    }

    fn finish_unload(&mut self) {
        self.state = JobState::Unloaded;
        debug!(job = %self.label(), "unloaded; requesting deletion");
        self.handle.call(DELETE_JOB_METHOD, self.label().as_str());
    }

    fn stdio_pair(&self) -> io::Result<(Stdio, Stdio)> {
        Ok((
            stdio_for(self.manifest.standard_out_path.as_deref())?,
            stdio_for(self.manifest.standard_error_path.as_deref())?,
        ))
    }
}

fn stdio_for(path: Option<&Path>) -> io::Result<Stdio> {
    match path {
        Some(p) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)?;
            Ok(Stdio::from(file))
        }
        None => Ok(Stdio::inherit()),
    }
}

// Shell convention: 128 + N for death by signal N.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventDriver;

    fn job_from(json: serde_json::Value) -> (Job, EventDriver) {
        let driver = EventDriver::new();
        let manifest: Manifest = serde_json::from_value(json).unwrap();
        let job = Job::new(PathBuf::from("test.json"), manifest, driver.handle());
        (job, driver)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bootstrap_without_a_program_stays_loaded() {
        let (mut job, _driver) = job_from(serde_json::json!({ "Label": "a" }));
        job.bootstrap();
        assert_eq!(job.state(), JobState::Loaded);
        assert_eq!(job.pid(), 0);
        assert_eq!(job.last_exit_status(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_at_load_false_stays_loaded_until_started() {
        let (mut job, _driver) = job_from(serde_json::json!({
            "Label": "a",
            "ProgramArguments": ["sleep", "30"],
            "RunAtLoad": false,
        }));
        job.bootstrap();
        assert_eq!(job.state(), JobState::Loaded);
        assert_eq!(job.pid(), 0);

        // An explicit start brings it up; nothing else will.
        assert!(job.start());
        assert_eq!(job.state(), JobState::Running);
        assert_ne!(job.pid(), 0);
        job.force_unload();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unload_without_a_process_completes_immediately() {
        let (mut job, mut driver) = job_from(serde_json::json!({ "Label": "a" }));
        job.bootstrap();
        assert!(job.unload(false));
        assert_eq!(job.state(), JobState::Unloaded);

        // The deferred deletion request is sitting in the driver queue.
        match driver.wait(Some(Duration::from_millis(100))).await {
            Some(crate::events::DriverEvent::Ipc { method, arg }) => {
                assert_eq!(method, DELETE_JOB_METHOD);
                assert_eq!(arg, "a");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn repeated_unload_requires_force() {
        let (mut job, _driver) = job_from(serde_json::json!({
            "Label": "a",
            "ProgramArguments": ["sleep", "30"],
        }));
        job.bootstrap();
        assert_eq!(job.state(), JobState::Running);
        assert!(job.unload(false));
        assert!(!job.unload(false));
        assert!(job.unload(true));
        job.force_unload();
        assert_eq!(job.state(), JobState::Unloaded);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn spawn_failure_leaves_the_job_exited() {
        let (mut job, _driver) = job_from(serde_json::json!({
            "Label": "a",
            "Program": "/nonexistent/definitely-not-a-binary",
        }));
        job.bootstrap();
        assert_eq!(job.state(), JobState::Exited);
        assert_eq!(job.pid(), 0);
    }

    #[test]
    fn exit_code_follows_shell_convention() {
        let normal = ExitStatus::from_raw(0x0100); // exit(1)
        assert_eq!(exit_code(normal), 1);
        let signaled = ExitStatus::from_raw(libc::SIGKILL); // killed by SIGKILL
        assert_eq!(exit_code(signaled), 128 + libc::SIGKILL);
    }
}
