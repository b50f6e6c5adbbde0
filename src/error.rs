//! Error types for phred-dispatch.

use thiserror::Error;

/// A unit of work rejected its chunk.
///
/// Never crosses a worker boundary as an error: workers turn it into
/// [`Outcome::Failed`](crate::common::Outcome::Failed).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("invalid quality character {found:?} in line {line} at position {position} (offset {offset})")]
    InvalidQuality {
        line: usize,
        position: usize,
        found: char,
        offset: u8,
    },

    #[error("unit of work panicked: {0}")]
    Panicked(String),
}

/// Main error type for phred-dispatch.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid partition request: {0}")]
    Partition(String),

    #[error("Job failed: {0}")]
    Job(#[from] JobError),

    #[error("Queue server at {addr} unavailable: {reason}")]
    QueueUnavailable { addr: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(
        "Gave up waiting for results: received {received} of {expected}. A worker probably died holding a job."
    )]
    LivenessGap { received: usize, expected: usize },

    #[error(
        "Chunk {chunk_index} of source {source_id} encodes to {bytes} bytes, over the {limit} byte limit. Use more chunks."
    )]
    ChunkTooLarge {
        source_id: usize,
        chunk_index: usize,
        bytes: usize,
        limit: usize,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for phred-dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_queue_unavailable_message() {
        let err = Error::QueueUnavailable {
            addr: "10.0.0.1:5381".to_string(),
            reason: "authentication rejected".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.1:5381"));
        assert!(msg.contains("authentication rejected"));
    }

    #[test]
    fn test_liveness_gap_message() {
        let err = Error::LivenessGap {
            received: 3,
            expected: 8,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 of 8"));
    }

    #[test]
    fn test_chunk_too_large_message() {
        let err = Error::ChunkTooLarge {
            source_id: 1,
            chunk_index: 0,
            bytes: 70_000_000,
            limit: 67_108_608,
        };
        let msg = err.to_string();
        assert!(msg.contains("source 1"));
        assert!(msg.contains("70000000 bytes"));
        assert!(msg.contains("more chunks"));
    }

    #[test]
    fn test_job_error_conversion() {
        let job_err = JobError::InvalidQuality {
            line: 2,
            position: 5,
            found: ' ',
            offset: 33,
        };
        let err: Error = job_err.clone().into();
        assert!(matches!(err, Error::Job(ref e) if *e == job_err));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "reads.fastq");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("reads.fastq"));
    }
}
