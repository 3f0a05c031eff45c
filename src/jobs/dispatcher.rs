//! Bounded-concurrency background job runner.

use super::{Job, JobContext};
use std::{collections::VecDeque, sync::Arc};
use tokio::{sync::Mutex, task::JoinSet};
use tracing::error;

/// Runs a batch of queued jobs on a fixed number of workers.
///
/// `submit` enqueues; `start(n)` launches `n` workers that each pull and
/// run jobs until the queue is drained, at which point the batch is
/// complete. A failing job is logged and does not abort its siblings, and
/// nothing is retried here — operators re-drive stuck work through the
/// metadata store.
#[derive(Clone, Default)]
pub struct Dispatcher {
    queue: Arc<Mutex<VecDeque<Job>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submit(&self, job: Job) {
        self.queue.lock().await.push_back(job);
    }

    /// Run queued jobs on `concurrency` workers until the queue drains.
    pub async fn start(&self, ctx: JobContext, concurrency: usize) {
        let mut workers = JoinSet::new();
        for _ in 0..concurrency.max(1) {
            let queue = self.queue.clone();
            let ctx = ctx.clone();
            workers.spawn(async move {
                loop {
                    let job = queue.lock().await.pop_front();
                    let Some(job) = job else { break };
                    if let Err(err) = job.run(&ctx).await {
                        error!(job = %job.describe(), %err, "background job failed");
                    }
                }
            });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(%err, "job worker panicked");
            }
        }
    }

    /// Fire-and-forget variant used from request paths: the batch runs on
    /// the runtime without the caller awaiting it.
    pub fn start_detached(self, ctx: JobContext, concurrency: usize) {
        tokio::spawn(async move { self.start(ctx, concurrency).await });
    }
}
