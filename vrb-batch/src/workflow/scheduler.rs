//! Concurrency-bounded scheduler
//!
//! Holds the pending queue and the active set, starts jobs until the active
//! set is full, and refills it every time a job finishes. The run is over
//! when a refill finds both queues empty.
//!
//! All job futures are polled by the scheduler's own task, so queue state is
//! touched only from [`Scheduler::refill`] and the completion handler, never
//! across an await point. No locks needed.

use super::{JobExecutor, JobId, ProgressHandle};
use crate::progress::ProgressBoard;
use crate::services::JobDescriptor;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use vrb_common::{Error, JobEvent, Result};

type JobFuture = BoxFuture<'static, (JobId, anyhow::Result<()>)>;

/// Outcome of a complete run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Display names of jobs that completed
    pub succeeded: Vec<String>,
    /// Display names and error text of jobs that failed
    pub failed: Vec<(String, String)>,
    /// Largest number of simultaneously active jobs observed
    pub peak_active: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Bounded pool of pipeline jobs
pub struct Scheduler {
    limit: usize,
    pending: VecDeque<(JobId, JobDescriptor)>,
    active: HashMap<JobId, String>,
    running: FuturesUnordered<JobFuture>,
    executor: Arc<dyn JobExecutor>,
    board: ProgressBoard,
    events_tx: mpsc::UnboundedSender<(JobId, JobEvent)>,
    events_rx: mpsc::UnboundedReceiver<(JobId, JobEvent)>,
    summary: RunSummary,
}

impl Scheduler {
    /// Create a scheduler over `jobs`, started in the given order
    ///
    /// `limit` must be at least 1.
    pub fn new(
        limit: usize,
        jobs: Vec<JobDescriptor>,
        executor: Arc<dyn JobExecutor>,
        board: ProgressBoard,
    ) -> Result<Self> {
        if limit == 0 {
            return Err(Error::InvalidInput(
                "concurrency limit must be at least 1".to_string(),
            ));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            limit,
            pending: jobs.into_iter().enumerate().collect(),
            active: HashMap::new(),
            running: FuturesUnordered::new(),
            executor,
            board,
            events_tx,
            events_rx,
            summary: RunSummary::default(),
        })
    }

    /// Number of jobs currently running
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of jobs not yet started
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run every job and return the summary
    pub async fn run(mut self) -> RunSummary {
        if self.refill() {
            return self.summary;
        }

        loop {
            tokio::select! {
                biased;

                Some((id, event)) = self.events_rx.recv() => {
                    self.board.apply(id, event);
                }
                Some((id, result)) = self.running.next() => {
                    self.complete(id, result);
                    if self.refill() {
                        break;
                    }
                }
                else => break,
            }
        }

        self.summary
    }

    /// Fill free slots from the pending queue
    ///
    /// Returns true when nothing is pending or active, i.e. the run is over.
    fn refill(&mut self) -> bool {
        let free = self.limit.saturating_sub(self.active.len());
        let num_to_add = free.min(self.pending.len());

        if num_to_add == 0 && self.pending.is_empty() && self.active.is_empty() {
            self.board.stop();
            return true;
        }

        for _ in 0..num_to_add {
            let Some((id, job)) = self.pending.pop_front() else {
                break;
            };
            self.start(id, job);
        }

        self.summary.peak_active = self.summary.peak_active.max(self.active.len());
        debug!(
            active = self.active.len(),
            pending = self.pending.len(),
            "Refilled active set"
        );
        false
    }

    fn start(&mut self, id: JobId, job: JobDescriptor) {
        info!("Starting conversion of {}", job.file_name);
        let name = job.display_name.clone();
        self.board.add_lane(id, &name);
        self.active.insert(id, name);

        let executor = Arc::clone(&self.executor);
        let progress = ProgressHandle::new(id, self.events_tx.clone());
        let future = async move {
            let result = AssertUnwindSafe(executor.execute(job, progress))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(anyhow::anyhow!("job panicked: {}", panic_message(&*panic)))
                });
            (id, result)
        };
        self.running.push(future.boxed());
    }

    fn complete(&mut self, id: JobId, result: anyhow::Result<()>) {
        // Flush events the job sent before finishing
        while let Ok((event_id, event)) = self.events_rx.try_recv() {
            self.board.apply(event_id, event);
        }

        let name = self.active.remove(&id).unwrap_or_default();
        self.board.finish_lane(id);

        match result {
            Ok(()) => self.summary.succeeded.push(name),
            Err(e) => {
                error!("Issue converting {}: {:#}", name, e);
                self.summary.failed.push((name, format!("{:#}", e)));
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
