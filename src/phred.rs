//! FASTQ quality lines in, mean PHRED score per base position out.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::common::{Outcome, ResultEnvelope, WorkItem};
use crate::error::Result;

/// Every 4th line of a FASTQ stream (the quality line of each record),
/// without its line ending.
pub fn quality_lines<R: BufRead>(reader: R) -> Result<Vec<WorkItem>> {
    let mut lines = Vec::new();
    for (count, line) in reader.lines().enumerate() {
        let line = line?;
        if count % 4 == 3 {
            lines.push(line.trim_end_matches('\r').to_string());
        }
    }
    Ok(lines)
}

pub fn read_quality_lines(path: &Path) -> Result<Vec<WorkItem>> {
    let file = File::open(path)?;
    quality_lines(BufReader::new(file))
}

/// Mean score per position over all reads.
///
/// A read shorter than the longest one counts as 0 at the positions it
/// lacks.
pub fn mean_scores<I, R>(reads: I) -> Vec<f64>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[u8]>,
{
    let mut sums: Vec<u64> = Vec::new();
    let mut count = 0u64;
    for read in reads {
        let read = read.as_ref();
        if read.len() > sums.len() {
            sums.resize(read.len(), 0);
        }
        for (sum, score) in sums.iter_mut().zip(read) {
            *sum += u64::from(*score);
        }
        count += 1;
    }
    sums.into_iter()
        .map(|sum| sum as f64 / count as f64)
        .collect()
}

/// Final numbers for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub name: String,
    pub means: Vec<f64>,
    pub failed_chunks: usize,
}

/// Reduce one source's results. Failed chunks are counted and left out of
/// the means.
pub fn summarize(name: impl Into<String>, results: &[ResultEnvelope]) -> SourceReport {
    let mut failed_chunks = 0;
    let reads = results.iter().flat_map(|r| match &r.outcome {
        Outcome::Scores(scores) => scores.as_slice(),
        Outcome::Failed(_) => {
            failed_chunks += 1;
            &[]
        }
    });
    let means = mean_scores(reads);
    SourceReport {
        name: name.into(),
        means,
        failed_chunks,
    }
}

/// Write `position,mean` rows, positions counted from 1. With more than one
/// report each block is preceded by a row holding the source name.
pub fn write_csv<W: Write>(writer: W, reports: &[SourceReport]) -> Result<()> {
    let named = reports.len() > 1;
    let mut csv = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(writer);
    for report in reports {
        if named {
            csv.write_record([report.name.as_str()])?;
        }
        for (position, mean) in report.means.iter().enumerate() {
            csv.write_record([(position + 1).to_string(), mean.to_string()])?;
        }
    }
    csv.flush()?;
    Ok(())
}
