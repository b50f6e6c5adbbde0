//! Client role: a handful of local workers pulling jobs off the shared queue.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::sleep;
use uuid::Uuid;

use crate::common::{
    BuiltinOperations, JobEnvelope, JobMessage, Outcome, ResultEnvelope, UnitOfWork,
};
use crate::error::{Error, JobError, Result};
use crate::queue::protocol::{encoded_len, MAX_PAYLOAD_LEN};
use crate::queue::{Queue, WorkerRegistry};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Sleep between empty polls of the job queue.
    pub poll_interval: Duration,
    /// Results that encode larger than this are sent as failures instead.
    pub max_result_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_result_bytes: MAX_PAYLOAD_LEN,
        }
    }
}

/// What a pool did before its workers stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub workers: usize,
    pub jobs_done: usize,
    pub jobs_failed: usize,
}

pub struct WorkerPool {
    config: PoolConfig,
    jobs: Arc<dyn Queue<JobMessage>>,
    results: Arc<dyn Queue<ResultEnvelope>>,
    app: Arc<dyn UnitOfWork>,
    registry: Option<Arc<dyn WorkerRegistry>>,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        jobs: Arc<dyn Queue<JobMessage>>,
        results: Arc<dyn Queue<ResultEnvelope>>,
    ) -> WorkerPool {
        WorkerPool {
            config,
            jobs,
            results,
            app: Arc::new(BuiltinOperations),
            registry: None,
        }
    }

    pub fn with_unit_of_work(mut self, app: Arc<dyn UnitOfWork>) -> Self {
        self.app = app;
        self
    }

    /// Announce each worker's start and exit to `registry`.
    pub fn with_registry(mut self, registry: Arc<dyn WorkerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Run `size` workers until every one of them has seen the sentinel.
    ///
    /// A worker whose queue connection fails stops early; the first such
    /// error is returned once all workers are done.
    pub async fn start(&self, size: usize) -> Result<PoolReport> {
        if size == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }

        let handles: Vec<_> = (0..size)
            .map(|_| {
                let worker = Worker {
                    id: Uuid::new_v4().to_string(),
                    jobs: Arc::clone(&self.jobs),
                    results: Arc::clone(&self.results),
                    app: Arc::clone(&self.app),
                    registry: self.registry.clone(),
                    poll_interval: self.config.poll_interval,
                    max_result_bytes: self.config.max_result_bytes,
                };
                tokio::spawn(worker.run())
            })
            .collect();
        tracing::info!(workers = size, "Started workers");

        let mut report = PoolReport {
            workers: size,
            ..PoolReport::default()
        };
        let mut first_error = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(stats)) => {
                    report.jobs_done += stats.done;
                    report.jobs_failed += stats.failed;
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Worker stopped on error");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Worker task died");
                    first_error.get_or_insert(Error::Protocol(format!("worker task died: {}", e)));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(
                    done = report.jobs_done,
                    failed = report.jobs_failed,
                    "All workers finished"
                );
                Ok(report)
            }
        }
    }
}

#[derive(Debug, Default)]
struct WorkerStats {
    done: usize,
    failed: usize,
}

struct Worker {
    id: String,
    jobs: Arc<dyn Queue<JobMessage>>,
    results: Arc<dyn Queue<ResultEnvelope>>,
    app: Arc<dyn UnitOfWork>,
    registry: Option<Arc<dyn WorkerRegistry>>,
    poll_interval: Duration,
    max_result_bytes: usize,
}

impl Worker {
    async fn run(self) -> Result<WorkerStats> {
        if let Some(registry) = &self.registry {
            registry.register(&self.id).await?;
        }

        let outcome = self.poll().await;

        if let Some(registry) = &self.registry {
            if let Err(e) = registry.deregister(&self.id).await {
                tracing::warn!(worker_id = %self.id, error = %e, "Could not deregister");
            }
        }
        outcome
    }

    async fn poll(&self) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();
        loop {
            match self.jobs.try_get().await? {
                None => {
                    tracing::trace!(worker_id = %self.id, "Job queue empty");
                    sleep(self.poll_interval).await;
                }
                Some(JobMessage::Sentinel) => {
                    // put it back for the next worker
                    self.jobs.put(JobMessage::Sentinel).await?;
                    tracing::info!(worker_id = %self.id, done = stats.done, failed = stats.failed, "Got sentinel, stopping");
                    return Ok(stats);
                }
                Some(JobMessage::Job(job)) => {
                    let result = self.execute(job).await;
                    if result.outcome.is_failed() {
                        stats.failed += 1;
                    } else {
                        stats.done += 1;
                    }
                    self.results.put(result).await?;
                }
            }
        }
    }

    async fn execute(&self, mut job: JobEnvelope) -> ResultEnvelope {
        tracing::debug!(
            worker_id = %self.id,
            job_id = %job.job_id,
            source_id = job.source_id,
            chunk_index = job.chunk_index,
            lines = job.payload.len(),
            "Working on chunk"
        );

        let payload = std::mem::take(&mut job.payload);
        let operation = job.operation;
        let app = Arc::clone(&self.app);
        let outcome = match tokio::task::spawn_blocking(move || app.execute(operation, &payload)).await
        {
            Ok(Ok(scores)) => Outcome::Scores(scores),
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(e) if e.is_panic() => {
                Outcome::Failed(JobError::Panicked(panic_message(e.into_panic())).to_string())
            }
            Err(e) => Outcome::Failed(e.to_string()),
        };

        let mut result = ResultEnvelope::for_job(&job, &self.id, outcome);
        match encoded_len(&result) {
            Ok(bytes) if bytes <= self.max_result_bytes => {}
            Ok(bytes) => {
                result.outcome = Outcome::Failed(format!(
                    "result encodes to {} bytes, over the {} byte limit",
                    bytes, self.max_result_bytes
                ));
            }
            Err(e) => result.outcome = Outcome::Failed(e.to_string()),
        }

        if let Outcome::Failed(reason) = &result.outcome {
            tracing::warn!(worker_id = %self.id, job_id = %job.job_id, %reason, "Job failed");
        }
        result
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
