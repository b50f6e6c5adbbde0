//! Mean PHRED quality per base position of FASTQ files, spread over any
//! number of worker processes.
//!
//! A server process splits each file's quality lines into chunks, puts one
//! job per chunk on a shared work queue and waits on a result queue until
//! every chunk has come back. Then it puts a sentinel on the work queue.
//! Client processes connect over TCP, pull jobs, push results, and stop when
//! they see the sentinel (putting it back for their peers).

pub mod aggregator;
pub mod common;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod partition;
pub mod phred;
pub mod queue;
pub mod roles;
pub mod worker_pool;

pub use error::{Error, Result};
