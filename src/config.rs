//! Command-line interface and the run configuration derived from it.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::common::Operation;
use crate::dispatcher::DispatchConfig;
use crate::error::{Error, Result};
use crate::logging::LogFormat;
use crate::worker_pool::PoolConfig;

pub const DEFAULT_PORT: u16 = 5381;
pub const DEFAULT_AUTHKEY: &str = "whathasitgotinitspocketsesss?";

/// Average PHRED quality per base position of FASTQ files, computed by
/// workers that pull chunks from a shared server queue.
#[derive(Parser, Debug)]
#[command(name = "phred-dispatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log format on stderr.
    #[arg(long, value_enum, env = "PHRED_DISPATCH_LOG_FORMAT", default_value_t, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Own the queues, hand out chunks and write the report.
    Server(ServerArgs),
    /// Connect to a server and work on its chunks.
    Client(ClientArgs),
}

/// Settings both sides must agree on.
#[derive(Args, Debug, Clone)]
pub struct SharedArgs {
    /// Port of the queue server.
    #[arg(long, env = "PHRED_DISPATCH_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Shared secret clients present when connecting.
    #[arg(long, env = "PHRED_DISPATCH_AUTHKEY", default_value = DEFAULT_AUTHKEY, hide_env_values = true)]
    pub authkey: String,

    /// Milliseconds to sleep after finding a queue empty.
    #[arg(long, env = "PHRED_DISPATCH_POLL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// FASTQ files to process.
    #[arg(required = true)]
    pub fastq_files: Vec<PathBuf>,

    /// Write the CSV report here instead of stdout.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Chunks per file (default: number of CPUs).
    #[arg(long)]
    pub chunks: Option<usize>,

    /// Address to listen on.
    #[arg(long, env = "PHRED_DISPATCH_BIND", default_value = "0.0.0.0")]
    pub host: String,

    /// ASCII offset of the quality encoding.
    #[arg(long, default_value_t = 33)]
    pub phred_offset: u8,

    /// Seconds to wait for workers to leave after the sentinel.
    #[arg(long, default_value_t = 5)]
    pub grace_secs: u64,

    /// Fail when no result arrived for this many seconds (default: wait forever).
    #[arg(long, env = "PHRED_DISPATCH_RESULT_TIMEOUT")]
    pub result_timeout_secs: Option<u64>,

    #[command(flatten)]
    pub shared: SharedArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Host of the queue server.
    #[arg(long, env = "PHRED_DISPATCH_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Local workers to run.
    #[arg(short = 'n', long = "workers", default_value_t = 1)]
    pub workers: usize,

    /// Seconds to wait for the server to accept the connection.
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    #[command(flatten)]
    pub shared: SharedArgs,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub secret: String,
    pub sources: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub operation: Operation,
    pub dispatch: DispatchConfig,
}

impl TryFrom<ServerArgs> for ServerConfig {
    type Error = Error;

    fn try_from(args: ServerArgs) -> Result<Self> {
        let chunks = match args.chunks {
            Some(0) => return Err(Error::Config("--chunks must be at least 1".to_string())),
            Some(n) => n,
            None => std::thread::available_parallelism().map_or(1, |n| n.get()),
        };
        if args.shared.poll_interval_ms == 0 {
            return Err(Error::Config("--poll-interval-ms must be at least 1".to_string()));
        }

        Ok(Self {
            bind: format!("{}:{}", args.host, args.shared.port),
            secret: args.shared.authkey,
            sources: args.fastq_files,
            output: args.output,
            operation: Operation::DecodeQuality {
                offset: args.phred_offset,
            },
            dispatch: DispatchConfig {
                chunks,
                poll_interval: Duration::from_millis(args.shared.poll_interval_ms),
                grace_period: Duration::from_secs(args.grace_secs),
                result_timeout: args.result_timeout_secs.map(Duration::from_secs),
                ..DispatchConfig::default()
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    pub secret: String,
    pub workers: usize,
    pub connect_timeout: Duration,
    pub pool: PoolConfig,
}

impl TryFrom<ClientArgs> for ClientConfig {
    type Error = Error;

    fn try_from(args: ClientArgs) -> Result<Self> {
        if args.workers == 0 {
            return Err(Error::Config("--workers must be at least 1".to_string()));
        }
        if args.shared.poll_interval_ms == 0 {
            return Err(Error::Config("--poll-interval-ms must be at least 1".to_string()));
        }

        Ok(Self {
            server: format!("{}:{}", args.host, args.shared.port),
            secret: args.shared.authkey,
            workers: args.workers,
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            pool: PoolConfig {
                poll_interval: Duration::from_millis(args.shared.poll_interval_ms),
                ..PoolConfig::default()
            },
        })
    }
}
