use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::scheduler::job::{Job, JobStatus};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Outcome of a status write against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// No job with that id is known
    Unknown,
    /// The job exists but is in a state the write may not move it out of
    Rejected(JobStatus),
}

/// Outcome of taking over a job record found on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    Adopted,
    /// The id is already in the store
    Known,
    /// Every slot holds a live job
    Full,
}

/// Authoritative record of every job the coordinator knows about.
#[derive(Debug)]
pub struct JobStore {
    jobs: HashMap<Uuid, Job>,
    max_jobs: usize,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            max_jobs,
        }
    }

    /// Add a freshly submitted job. Returns false if the store is at capacity.
    ///
    /// Only live jobs count toward capacity: when the map is full the oldest
    /// finished job is evicted to make room.
    pub fn add_job(&mut self, job: Job) -> bool {
        if !self.make_room() {
            return false;
        }
        self.jobs.insert(job.id, job);
        true
    }

    fn make_room(&mut self) -> bool {
        if self.jobs.len() < self.max_jobs {
            return true;
        }
        let oldest_finished = self
            .jobs
            .values()
            .filter(|j| j.status.is_terminal())
            .min_by_key(|j| j.completed_at.unwrap_or(j.created_at))
            .map(|j| j.id);
        match oldest_finished {
            Some(id) => {
                self.jobs.remove(&id);
                tracing::debug!(job_id = %id, "Evicted finished job to make room");
                true
            }
            None => false,
        }
    }

    /// Forget a job. Used to roll back a submission whose enqueue failed.
    pub fn remove(&mut self, id: &Uuid) -> Option<Job> {
        self.jobs.remove(id)
    }

    /// Take ownership of a job found on the queue that this store has never seen,
    /// e.g. one left behind by a previous coordinator process. Subject to the
    /// same capacity limit as [`JobStore::add_job`].
    pub fn adopt(&mut self, mut job: Job) -> Adoption {
        if self.jobs.contains_key(&job.id) {
            return Adoption::Known;
        }
        if !self.make_room() {
            return Adoption::Full;
        }
        job.status = JobStatus::Pending;
        job.assigned_worker = None;
        job.result = None;
        job.completed_at = None;
        self.jobs.insert(job.id, job);
        Adoption::Adopted
    }

    pub fn get(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn status(&self, id: &Uuid) -> Option<JobStatus> {
        self.jobs.get(id).map(|j| j.status)
    }

    /// Count a dispatch attempt, successful or not.
    pub fn record_attempt(&mut self, id: &Uuid) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.dispatch_attempts += 1;
        }
    }

    /// Record that `worker_id` accepted the job. Only called after the worker
    /// acknowledged `StartTask`.
    pub fn mark_dispatched(&mut self, id: &Uuid, worker_id: &str) -> Transition {
        let Some(job) = self.jobs.get_mut(id) else {
            return Transition::Unknown;
        };
        if !job.status.can_transition_to(JobStatus::Dispatched) {
            return Transition::Rejected(job.status);
        }
        job.status = JobStatus::Dispatched;
        job.assigned_worker = Some(worker_id.to_string());
        Transition::Applied
    }

    /// Apply a completion report. Terminal jobs are left untouched so replays
    /// cannot overwrite the first result.
    pub fn complete(
        &mut self,
        id: &Uuid,
        worker_id: &str,
        success: bool,
        result: String,
    ) -> Transition {
        let Some(job) = self.jobs.get_mut(id) else {
            return Transition::Unknown;
        };
        let next = if success {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };
        if !job.status.can_transition_to(next) {
            return Transition::Rejected(job.status);
        }
        job.status = next;
        if job.assigned_worker.is_none() {
            job.assigned_worker = Some(worker_id.to_string());
        }
        job.result = Some(result);
        job.completed_at = Some(Utc::now());
        Transition::Applied
    }

    pub fn pending_jobs(&self) -> Vec<&Job> {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .collect()
    }

    /// All jobs sorted chronologically by creation time
    pub fn all_jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn jobs_for_worker(&self, worker_id: &str) -> Vec<&Job> {
        self.jobs
            .values()
            .filter(|j| j.assigned_worker.as_deref() == Some(worker_id))
            .collect()
    }

    /// Drop succeeded and failed jobs. Returns the number removed.
    pub fn cleanup_finished(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.status.is_terminal());
        before - self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs not yet succeeded or failed.
    pub fn live_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .count()
    }

    /// True when no new job fits, even after evicting finished ones.
    pub fn is_full(&self) -> bool {
        self.live_count() >= self.max_jobs
    }

    pub fn capacity(&self) -> usize {
        self.max_jobs
    }
}
