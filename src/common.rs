use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// Index of an input source (one FASTQ file), in command-line order.
pub type SourceId = usize;
/// One encoded quality line.
pub type WorkItem = String;
/// Contiguous slice of one source's work items.
pub type Chunk = Vec<WorkItem>;
/// Per-line decoded scores for one chunk.
pub type Scores = Vec<Vec<u8>>;

/// The unit of work a job asks for.
///
/// Workers resolve the variant locally, nothing executable travels over the
/// wire. Every job of a run carries the same operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// PHRED decode: each byte minus `offset`.
    DecodeQuality { offset: u8 },
    /// Each line's raw bytes.
    Identity,
}

impl Operation {
    pub const PHRED33: Operation = Operation::DecodeQuality { offset: 33 };

    pub fn apply(&self, chunk: &[WorkItem]) -> Result<Scores, JobError> {
        match *self {
            Operation::DecodeQuality { offset } => chunk
                .iter()
                .enumerate()
                .map(|(line, encoded)| decode_line(line, encoded, offset))
                .collect(),
            Operation::Identity => Ok(chunk.iter().map(|line| line.as_bytes().to_vec()).collect()),
        }
    }
}

/// Runs a job's operation on a worker.
pub trait UnitOfWork: Send + Sync {
    fn execute(&self, operation: Operation, chunk: &[WorkItem]) -> Result<Scores, JobError>;
}

/// Resolves every [`Operation`] with its built-in implementation.
pub struct BuiltinOperations;

impl UnitOfWork for BuiltinOperations {
    fn execute(&self, operation: Operation, chunk: &[WorkItem]) -> Result<Scores, JobError> {
        operation.apply(chunk)
    }
}

fn decode_line(line: usize, encoded: &str, offset: u8) -> Result<Vec<u8>, JobError> {
    encoded
        .bytes()
        .enumerate()
        .map(|(position, b)| {
            b.checked_sub(offset).ok_or(JobError::InvalidQuality {
                line,
                position,
                found: b as char,
                offset,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: Uuid,
    pub source_id: SourceId,
    /// Position of the chunk within its source.
    pub chunk_index: usize,
    pub operation: Operation,
    pub payload: Chunk,
}

impl JobEnvelope {
    pub fn new(source_id: SourceId, chunk_index: usize, operation: Operation, payload: Chunk) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            source_id,
            chunk_index,
            operation,
            payload,
        }
    }
}

/// What travels on the work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobMessage {
    Job(JobEnvelope),
    /// Poison pill: no more work. Whoever takes it puts it back.
    Sentinel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// One base64 string per line on the wire.
    Scores(#[serde(with = "base64_rows")] Scores),
    /// The unit of work failed on this chunk.
    Failed(String),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

mod base64_rows {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use super::Scores;

    pub fn serialize<S: Serializer>(rows: &Scores, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(rows.iter().map(|row| BASE64.encode(row)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Scores, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|row| BASE64.decode(row).map_err(D::Error::custom))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub job_id: Uuid,
    pub source_id: SourceId,
    pub chunk_index: usize,
    pub worker_id: String,
    pub outcome: Outcome,
}

impl ResultEnvelope {
    pub fn for_job(job: &JobEnvelope, worker_id: &str, outcome: Outcome) -> Self {
        Self {
            job_id: job.job_id,
            source_id: job.source_id,
            chunk_index: job.chunk_index,
            worker_id: worker_id.to_string(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn decode_phred33() {
        let scores = Operation::PHRED33.apply(&lines(&["II#", "!5"])).unwrap();
        assert_eq!(scores, vec![vec![40, 40, 2], vec![0, 20]]);
    }

    #[test]
    fn decode_rejects_bytes_below_offset() {
        let err = Operation::PHRED33
            .apply(&lines(&["IIII", "II I"]))
            .unwrap_err();
        assert_eq!(
            err,
            JobError::InvalidQuality {
                line: 1,
                position: 2,
                found: ' ',
                offset: 33,
            }
        );
    }

    #[test]
    fn identity_returns_raw_bytes() {
        let scores = Operation::Identity.apply(&lines(&["AB"])).unwrap();
        assert_eq!(scores, vec![vec![65, 66]]);
    }

    #[test]
    fn scores_travel_as_base64_rows() {
        let outcome = Outcome::Scores(vec![vec![40; 4], vec![]]);
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"status":"scores","value":["KCgoKA==",""]}"#);
        let back: Outcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn scores_encode_smaller_than_twice_the_input() {
        let line = "I".repeat(30_000);
        let scores = Operation::PHRED33.apply(&[line.clone()]).unwrap();
        let encoded = serde_json::to_vec(&Outcome::Scores(scores)).unwrap();
        assert!(encoded.len() < line.len() * 3 / 2);
    }

    #[test]
    fn sentinel_is_distinct_on_the_wire() {
        let job = JobMessage::Job(JobEnvelope::new(0, 0, Operation::Identity, vec![]));
        let sentinel = serde_json::to_string(&JobMessage::Sentinel).unwrap();
        assert_ne!(serde_json::to_string(&job).unwrap(), sentinel);
        let back: JobMessage = serde_json::from_str(&sentinel).unwrap();
        assert_eq!(back, JobMessage::Sentinel);
    }
}
