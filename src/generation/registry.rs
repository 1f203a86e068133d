//! In-memory registry of submitted jobs, keyed by remote job id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::models::{JobHandle, JobState};

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, JobHandle>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: JobHandle) {
        self.jobs.write().insert(handle.job_id.clone(), handle);
    }

    pub fn get(&self, job_id: &str) -> Option<JobHandle> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Mutate a handle in place and return a snapshot of the result.
    pub fn update<F>(&self, job_id: &str, apply: F) -> Option<JobHandle>
    where
        F: FnOnce(&mut JobHandle),
    {
        let mut jobs = self.jobs.write();
        let handle = jobs.get_mut(job_id)?;
        apply(handle);
        Some(handle.clone())
    }

    pub fn remove(&self, job_id: &str) -> Option<JobHandle> {
        self.jobs.write().remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Drop handles that stopped changing before `cutoff` and are not being
    /// polled. Succeeded handles left behind by a failed resolution count as
    /// settled too. Returns how many were removed.
    pub fn evict_settled_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, handle| {
            let polling = matches!(handle.state, JobState::Submitted | JobState::Polling);
            polling || handle.updated_at >= cutoff
        });
        before - jobs.len()
    }
}

/// Periodically evicts settled handles idle for longer than `retention`.
pub async fn start_eviction_worker(registry: JobRegistry, retention: Duration, every: Duration) {
    log::info!(
        "Job eviction worker started (retention {}s, sweep every {}s)",
        retention.as_secs(),
        every.as_secs()
    );

    let retention = match chrono::Duration::from_std(retention) {
        Ok(retention) => retention,
        Err(e) => {
            log::error!("Job retention out of range, eviction worker stopped: {}", e);
            return;
        }
    };

    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = registry.evict_settled_before(Utc::now() - retention);
        if evicted > 0 {
            log::info!(
                "Evicted {} finished job(s), {} still tracked",
                evicted,
                registry.len()
            );
        }
    }
}
