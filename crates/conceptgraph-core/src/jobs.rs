//! External job-queue contract.
//!
//! The restore pipeline runs as one unit of work on somebody else's
//! queue. This module only defines the calls it makes outward; queuing,
//! scheduling, and persistence live in the host system.

use serde::Serialize;
use serde_json::Value;

/// Partial update to a queued job's visible state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<Value>,
}

impl JobPatch {
    pub fn phase(phase: impl Into<String>) -> Self {
        Self {
            phase: Some(phase.into()),
            ..Self::default()
        }
    }
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, kind: &str, payload: Value) -> anyhow::Result<String>;
    fn update(&self, id: &str, patch: JobPatch) -> anyhow::Result<()>;
}

/// In-memory double for tests and local runs: records every call.
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: parking_lot::Mutex<MemoryJobQueueState>,
}

#[derive(Default)]
struct MemoryJobQueueState {
    next_id: u64,
    jobs: Vec<(String, String, Value)>,
    updates: Vec<(String, JobPatch)>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .jobs
            .iter()
            .map(|(id, kind, _)| (id.clone(), kind.clone()))
            .collect()
    }

    pub fn recorded_phases(&self, id: &str) -> Vec<String> {
        self.inner
            .lock()
            .updates
            .iter()
            .filter(|(job_id, _)| job_id == id)
            .filter_map(|(_, patch)| patch.phase.clone())
            .collect()
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, kind: &str, payload: Value) -> anyhow::Result<String> {
        let mut state = self.inner.lock();
        state.next_id += 1;
        let id = format!("job-{}", state.next_id);
        state.jobs.push((id.clone(), kind.to_string(), payload));
        Ok(id)
    }

    fn update(&self, id: &str, patch: JobPatch) -> anyhow::Result<()> {
        self.inner.lock().updates.push((id.to_string(), patch));
        Ok(())
    }
}
