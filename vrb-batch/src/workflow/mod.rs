//! Job workflow
//!
//! - [`job`]: the two-stage pipeline run for every input file
//! - [`scheduler`]: bounded pool that runs pipelines and refills on completion
//!
//! The scheduler only knows jobs through [`JobExecutor`], so tests can run it
//! against executors that never start a subprocess.

pub mod job;
pub mod scheduler;

pub use job::{PipelineExecutor, PipelineJob};
pub use scheduler::{RunSummary, Scheduler};

use crate::services::JobDescriptor;
use async_trait::async_trait;
use tokio::sync::mpsc;
use vrb_common::{JobEvent, ProgressEvent, Stage};

/// Position of a job in enumeration order
pub type JobId = usize;

/// Channel end a job reports its progress through
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    job_id: JobId,
    tx: mpsc::UnboundedSender<(JobId, JobEvent)>,
}

impl ProgressHandle {
    pub fn new(job_id: JobId, tx: mpsc::UnboundedSender<(JobId, JobEvent)>) -> Self {
        Self { job_id, tx }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn stage(&self, stage: Stage) {
        self.send(JobEvent::StageStarted(stage));
    }

    pub fn report(&self, event: ProgressEvent) {
        self.send(JobEvent::Progress(event));
    }

    fn send(&self, event: JobEvent) {
        // Receiver gone means nobody is displaying progress any more
        let _ = self.tx.send((self.job_id, event));
    }
}

/// Runs one job to completion
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: JobDescriptor, progress: ProgressHandle) -> anyhow::Result<()>;
}
