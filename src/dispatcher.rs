//! Server role: hand out every chunk, wait for every result, then tell the
//! workers to stop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::aggregator::{Accepted, Aggregate, ResultAggregator};
use crate::common::{JobEnvelope, JobMessage, Operation, ResultEnvelope, SourceId, WorkItem};
use crate::error::{Error, Result};
use crate::partition::partition;
use crate::queue::protocol::{encoded_len, MAX_PAYLOAD_LEN};
use crate::queue::{LiveWorkers, Queue};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Chunks per source.
    pub chunks: usize,
    /// Sleep between empty polls of the result queue.
    pub poll_interval: Duration,
    /// Upper bound on waiting for workers to leave after the sentinel.
    pub grace_period: Duration,
    /// Give up when no new result arrived for this long. `None` waits forever.
    pub result_timeout: Option<Duration>,
    /// Largest encoded job accepted. Bigger chunks fail the run before
    /// anything is enqueued.
    pub max_job_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chunks: 1,
            poll_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(5),
            result_timeout: None,
            max_job_bytes: MAX_PAYLOAD_LEN,
        }
    }
}

pub struct Dispatcher {
    config: DispatchConfig,
    jobs: Arc<dyn Queue<JobMessage>>,
    results: Arc<dyn Queue<ResultEnvelope>>,
    live_workers: Option<Arc<LiveWorkers>>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        jobs: Arc<dyn Queue<JobMessage>>,
        results: Arc<dyn Queue<ResultEnvelope>>,
    ) -> Self {
        Self {
            config,
            jobs,
            results,
            live_workers: None,
        }
    }

    /// Drain by waiting for registered workers to leave instead of sleeping
    /// out the whole grace period.
    pub fn with_live_workers(mut self, live_workers: Arc<LiveWorkers>) -> Self {
        self.live_workers = Some(live_workers);
        self
    }

    pub async fn run(&self, sources: Vec<Vec<WorkItem>>, operation: Operation) -> Result<Aggregate> {
        let expected = self.dispatch_all(&sources, operation).await?;
        let aggregator = ResultAggregator::new(expected);

        if aggregator.expected_total() == 0 {
            tracing::info!(sources = sources.len(), "Nothing to dispatch");
            self.publish_sentinel().await?;
            self.drain().await;
            return Ok(aggregator.finish());
        }

        let aggregate = self.collect(aggregator).await?;
        self.publish_sentinel().await?;
        self.drain().await;
        Ok(aggregate)
    }

    /// Partition every source and enqueue one job per chunk.
    ///
    /// Returns the chunk count per source. Nothing is enqueued if any
    /// source fails to partition or any chunk is over `max_job_bytes`.
    pub async fn dispatch_all(
        &self,
        sources: &[Vec<WorkItem>],
        operation: Operation,
    ) -> Result<BTreeMap<SourceId, usize>> {
        let limit = self.config.max_job_bytes;
        let mut planned = Vec::with_capacity(sources.len());
        for (source_id, items) in sources.iter().enumerate() {
            let mut jobs = Vec::new();
            for (chunk_index, payload) in partition(items, self.config.chunks)?.into_iter().enumerate() {
                let job = JobEnvelope::new(source_id, chunk_index, operation, payload);
                let bytes = encoded_len(&job)?;
                if bytes > limit {
                    return Err(Error::ChunkTooLarge {
                        source_id,
                        chunk_index,
                        bytes,
                        limit,
                    });
                }
                jobs.push(job);
            }
            planned.push((source_id, jobs));
        }

        let mut expected = BTreeMap::new();
        for (source_id, jobs) in planned {
            expected.insert(source_id, jobs.len());
            for job in jobs {
                tracing::trace!(job_id = %job.job_id, source_id, chunk_index = job.chunk_index, "Enqueue job");
                self.jobs.put(JobMessage::Job(job)).await?;
            }
        }

        let total: usize = expected.values().sum();
        tracing::info!(sources = sources.len(), jobs = total, "Sent all jobs");
        Ok(expected)
    }

    /// Poll the result queue until every expected chunk has reported back.
    pub async fn collect(&self, mut aggregator: ResultAggregator) -> Result<Aggregate> {
        let expected = aggregator.expected_total();
        if self.config.result_timeout.is_none() {
            tracing::warn!(
                expected,
                "No result timeout set: if a worker dies holding a job this run never finishes"
            );
        }

        let mut last_progress = Instant::now();
        while !aggregator.is_complete() {
            let Some(result) = self.results.try_get().await? else {
                if let Some(limit) = self.config.result_timeout {
                    if last_progress.elapsed() >= limit {
                        return Err(Error::LivenessGap {
                            received: aggregator.received(),
                            expected,
                        });
                    }
                }
                sleep(self.config.poll_interval).await;
                continue;
            };

            let (source_id, chunk_index) = (result.source_id, result.chunk_index);
            let failed = result.outcome.is_failed();
            let worker_id = result.worker_id.clone();
            match aggregator.accept(result) {
                Accepted::New => {
                    last_progress = Instant::now();
                    if failed {
                        tracing::warn!(source_id, chunk_index, %worker_id, "Chunk failed");
                    }
                    tracing::debug!(
                        source_id,
                        chunk_index,
                        received = aggregator.received(),
                        expected,
                        "Got result"
                    );
                }
                Accepted::Duplicate => {
                    tracing::warn!(source_id, chunk_index, %worker_id, "Dropping duplicate result");
                }
                Accepted::Unknown => {
                    tracing::warn!(source_id, chunk_index, %worker_id, "Dropping result for unknown chunk");
                }
            }
        }

        tracing::info!(expected, "Got all results");
        Ok(aggregator.finish())
    }

    pub async fn publish_sentinel(&self) -> Result<()> {
        tracing::info!("Publishing sentinel");
        self.jobs.put(JobMessage::Sentinel).await
    }

    /// Give workers time to see the sentinel and leave. Returns whether every
    /// registered worker left within the grace period.
    pub async fn drain(&self) -> bool {
        let Some(live_workers) = &self.live_workers else {
            sleep(self.config.grace_period).await;
            return true;
        };

        let deadline = Instant::now() + self.config.grace_period;
        loop {
            let live = live_workers.count();
            if live == 0 {
                tracing::info!("All workers left");
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(live, "Grace period over with workers still registered");
                return false;
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}
