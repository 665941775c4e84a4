//! # Pending and active job maps.
//!
//! Admission is two-phase: a manifest that passes every check becomes a
//! *pending* job, and a later promotion moves the whole pending set into the
//! *active* map and bootstraps each job. The split lets a batch of manifests
//! be admitted in full, with duplicate detection across the batch, before
//! any one of them starts.
//!
//! ## Rules
//! - A label appears in at most one of the two maps.
//! - Promotion is one-way; a job never returns to `pending`.
//! - The registry exclusively owns its jobs. The only way a job leaves the
//!   active map from inside its own callback is the deferred `delete_job`
//!   call handled by [`remove`](JobRegistry::remove).

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::manifest::Label;

use super::job::{Job, JobState};

/// One row of the `list` control operation.
#[derive(Clone, Debug, Serialize)]
pub struct JobSnapshot {
    /// Job label.
    #[serde(rename = "Label")]
    pub label: String,
    /// Decimal PID, or `"-"` when no process is running.
    #[serde(rename = "PID")]
    pub pid: String,
    /// Exit status of the most recent process, 0 if none ran yet.
    #[serde(rename = "LastExitStatus")]
    pub last_exit_status: i32,
}

/// Owner of every admitted job, split into pending and active sets.
#[derive(Default)]
pub struct JobRegistry {
    pending: BTreeMap<Label, Job>,
    active: BTreeMap<Label, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership across both maps; admission uses this for duplicates.
    pub fn contains(&self, label: &Label) -> bool {
        self.active.contains_key(label) || self.pending.contains_key(label)
    }

    /// Membership in the active map only.
    pub fn exists(&self, label: &str) -> bool {
        self.active.contains_key(label)
    }

    pub fn get(&self, label: &str) -> Option<&Job> {
        self.active.get(label)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut Job> {
        self.active.get_mut(label)
    }

    /// Parks an admitted job until the next promotion.
    pub fn insert_pending(&mut self, job: Job) {
        self.pending.insert(job.label().clone(), job);
    }

    pub fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn active_is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Moves every pending job into the active map and bootstraps it.
    ///
    /// Admission already rejected duplicates, so a pending label that is
    /// also active means the two call sites fell out of step.
    pub fn promote_all(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (label, mut job) in pending {
            if self.active.contains_key(&label) {
                debug_assert!(false, "pending job {label} is already active");
                error!(job = %label, "job is already loaded; will not load a new version");
                continue;
            }
            job.bootstrap();
            self.active.insert(label, job);
        }
    }

    /// Snapshot of the active jobs.
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.active
            .values()
            .map(|job| JobSnapshot {
                label: job.label().to_string(),
                pid: match job.pid() {
                    0 => "-".to_string(),
                    pid => pid.to_string(),
                },
                last_exit_status: job.last_exit_status(),
            })
            .collect()
    }

    /// Requests the unload of one active job.
    pub fn unload(&mut self, label: &str, force: bool) -> bool {
        match self.active.get_mut(label) {
            Some(job) => job.unload(force),
            None => {
                info!(job = label, "tried to unload a job that is not loaded");
                false
            }
        }
    }

    /// Requests the unload of every active job, continuing past failures.
    ///
    /// Returns false when any individual unload reported failure.
    pub fn unload_all(&mut self) -> bool {
        debug!("unloading all jobs");
        let mut success = true;
        for job in self.active.values_mut() {
            if job.state() == JobState::Unloaded || job.unload_requested() {
                continue;
            }
            if !job.unload(true) {
                error!(
                    job = %job.label(),
                    "failed to unload; ignoring because all jobs are being unloaded"
                );
                success = false;
            }
        }
        success
    }

    /// Kills every active job and empties the map. Never fails.
    pub fn force_unload_all(&mut self) {
        for job in self.active.values_mut() {
            job.force_unload();
        }
        self.active.clear();
    }

    /// Drops an active job by label. The `delete_job` dispatch target.
    pub fn remove(&mut self, label: &str) -> bool {
        self.active.remove(label).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventDriver;
    use crate::manifest::Manifest;
    use std::path::PathBuf;

    fn job(driver: &EventDriver, label: &str) -> Job {
        let manifest: Manifest =
            serde_json::from_value(serde_json::json!({ "Label": label })).unwrap();
        Job::new(PathBuf::from("test.json"), manifest, driver.handle())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn promotion_moves_pending_to_active() {
        let driver = EventDriver::new();
        let mut reg = JobRegistry::new();
        reg.insert_pending(job(&driver, "a"));
        reg.insert_pending(job(&driver, "b"));
        assert!(reg.contains(&Label::from("a")));
        assert!(!reg.exists("a"));

        reg.promote_all();
        assert!(reg.pending_is_empty());
        assert!(reg.exists("a"));
        assert!(reg.exists("b"));
        assert_eq!(reg.active_len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn list_renders_idle_pids_as_dash() {
        let driver = EventDriver::new();
        let mut reg = JobRegistry::new();
        reg.insert_pending(job(&driver, "a"));
        reg.promote_all();

        let rows = reg.list();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "a");
        assert_eq!(rows[0].pid, "-");
        assert_eq!(rows[0].last_exit_status, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unload_of_unknown_label_is_false() {
        let mut reg = JobRegistry::new();
        assert!(!reg.unload("missing", false));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn force_unload_all_clears_the_active_map() {
        let driver = EventDriver::new();
        let mut reg = JobRegistry::new();
        reg.insert_pending(job(&driver, "a"));
        reg.promote_all();
        reg.force_unload_all();
        assert!(reg.active_is_empty());
    }
}
