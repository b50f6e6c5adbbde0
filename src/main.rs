use anyhow::Context;
use clap::Parser;

use phred_dispatch::config::{Cli, ClientConfig, Command, ServerConfig};
use phred_dispatch::logging;
use phred_dispatch::roles::{run_client, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);

    match cli.command {
        Command::Server(args) => {
            let config = ServerConfig::try_from(args)?;
            let server = Server::bind(config.clone())
                .await
                .with_context(|| format!("failed to start queue server on {}", config.bind))?;
            tracing::info!(addr = %server.local_addr(), chunks = config.dispatch.chunks, "Server mode");
            server.run().await.context("server run failed")?;
        }
        Command::Client(args) => {
            let config = ClientConfig::try_from(args)?;
            tracing::info!(server = %config.server, workers = config.workers, "Client mode");
            let report = run_client(config).await.context("client run failed")?;
            tracing::info!(
                done = report.jobs_done,
                failed = report.jobs_failed,
                "Client finished"
            );
        }
    }

    Ok(())
}
