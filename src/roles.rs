//! The two process roles: the server owns the queues and the report, the
//! client lends its CPUs.

use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ClientConfig, ServerConfig};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::phred::{self, SourceReport};
use crate::queue::{QueueServer, QueueSession};
use crate::worker_pool::{PoolReport, WorkerPool};

/// A bound server, ready to run once.
pub struct Server {
    config: ServerConfig,
    queues: QueueServer,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let queues = QueueServer::bind(config.bind.as_str(), config.secret.clone()).await?;
        Ok(Self { config, queues })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.queues.local_addr()
    }

    /// Read the sources, let the workers process them, and write the report.
    pub async fn run(self) -> Result<Vec<SourceReport>> {
        let mut sources = Vec::with_capacity(self.config.sources.len());
        for path in &self.config.sources {
            let lines = phred::read_quality_lines(path)?;
            tracing::info!(file = %path.display(), reads = lines.len(), "Read quality lines");
            sources.push(lines);
        }

        let dispatcher = Dispatcher::new(
            self.config.dispatch.clone(),
            self.queues.jobs(),
            self.queues.results(),
        )
        .with_live_workers(self.queues.workers());
        let outcome = dispatcher.run(sources, self.config.operation).await;
        self.queues.shutdown().await;
        let aggregate = outcome?;

        let reports: Vec<SourceReport> = aggregate
            .iter()
            .map(|(&source_id, results)| {
                let name = source_name(&self.config.sources[source_id]);
                let report = phred::summarize(name, results);
                if report.failed_chunks > 0 {
                    tracing::warn!(
                        source = %report.name,
                        failed_chunks = report.failed_chunks,
                        "Some chunks failed, means cover the remaining reads only"
                    );
                }
                report
            })
            .collect();

        match &self.config.output {
            Some(path) => {
                phred::write_csv(BufWriter::new(File::create(path)?), &reports)?;
                tracing::info!(file = %path.display(), "Wrote report");
            }
            None => phred::write_csv(std::io::stdout().lock(), &reports)?,
        }
        Ok(reports)
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Connect to the server and work until it sends the sentinel.
pub async fn run_client(config: ClientConfig) -> Result<PoolReport> {
    let session = QueueSession::connect(&config.server, &config.secret, config.connect_timeout).await?;
    WorkerPool::new(
        config.pool,
        Arc::new(session.job_queue()),
        Arc::new(session.result_queue()),
    )
    .with_registry(session)
    .start(config.workers)
    .await
}
