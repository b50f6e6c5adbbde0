//! Regrouping results by source.
//!
//! Results of different sources arrive interleaved and in completion order.
//! The aggregator files them per source, drops redelivered duplicates and,
//! when finished, sorts each group by chunk index so the group reads in input
//! order again. Failed chunks are kept in their group so the caller can see
//! which sources are incomplete.

use std::collections::{BTreeMap, HashSet};

use crate::common::{ResultEnvelope, SourceId};

/// Per-source results, each group sorted by chunk index.
pub type Aggregate = BTreeMap<SourceId, Vec<ResultEnvelope>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    New,
    /// Same source and chunk seen before.
    Duplicate,
    /// Source not part of this run, or chunk index out of range.
    Unknown,
}

pub struct ResultAggregator {
    expected: BTreeMap<SourceId, usize>,
    groups: Aggregate,
    seen: HashSet<(SourceId, usize)>,
}

impl ResultAggregator {
    /// `expected` maps every source of the run to its chunk count.
    pub fn new(expected: BTreeMap<SourceId, usize>) -> Self {
        let groups = expected.keys().map(|&source| (source, Vec::new())).collect();
        Self {
            expected,
            groups,
            seen: HashSet::new(),
        }
    }

    pub fn accept(&mut self, result: ResultEnvelope) -> Accepted {
        let Some(&chunks) = self.expected.get(&result.source_id) else {
            return Accepted::Unknown;
        };
        if result.chunk_index >= chunks {
            return Accepted::Unknown;
        }
        if !self.seen.insert((result.source_id, result.chunk_index)) {
            return Accepted::Duplicate;
        }
        self.groups
            .entry(result.source_id)
            .or_default()
            .push(result);
        Accepted::New
    }

    pub fn received(&self) -> usize {
        self.seen.len()
    }

    pub fn expected_total(&self) -> usize {
        self.expected.values().sum()
    }

    pub fn is_complete(&self) -> bool {
        self.received() >= self.expected_total()
    }

    pub fn finish(mut self) -> Aggregate {
        for group in self.groups.values_mut() {
            group.sort_by_key(|r| r.chunk_index);
        }
        self.groups
    }
}

/// Group a finished batch of results in one go.
pub fn group<I>(results: I, expected: &BTreeMap<SourceId, usize>) -> Aggregate
where
    I: IntoIterator<Item = ResultEnvelope>,
{
    let mut aggregator = ResultAggregator::new(expected.clone());
    for result in results {
        aggregator.accept(result);
    }
    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Outcome;
    use uuid::Uuid;

    fn result(source_id: SourceId, chunk_index: usize, outcome: Outcome) -> ResultEnvelope {
        ResultEnvelope {
            job_id: Uuid::new_v4(),
            source_id,
            chunk_index,
            worker_id: "w".to_string(),
            outcome,
        }
    }

    fn ok(source_id: SourceId, chunk_index: usize) -> ResultEnvelope {
        result(source_id, chunk_index, Outcome::Scores(vec![vec![chunk_index as u8]]))
    }

    fn expected(counts: &[(SourceId, usize)]) -> BTreeMap<SourceId, usize> {
        counts.iter().copied().collect()
    }

    #[test]
    fn regroups_interleaved_sources_in_chunk_order() {
        let mut agg = ResultAggregator::new(expected(&[(0, 3), (1, 2)]));
        for r in [ok(1, 1), ok(0, 2), ok(0, 0), ok(1, 0), ok(0, 1)] {
            assert_eq!(agg.accept(r), Accepted::New);
        }
        assert!(agg.is_complete());

        let groups = agg.finish();
        let order = |s: SourceId| -> Vec<usize> { groups[&s].iter().map(|r| r.chunk_index).collect() };
        assert_eq!(order(0), vec![0, 1, 2]);
        assert_eq!(order(1), vec![0, 1]);
    }

    #[test]
    fn duplicates_and_strangers_do_not_count() {
        let mut agg = ResultAggregator::new(expected(&[(0, 2)]));
        assert_eq!(agg.accept(ok(0, 0)), Accepted::New);
        assert_eq!(agg.accept(ok(0, 0)), Accepted::Duplicate);
        assert_eq!(agg.accept(ok(7, 0)), Accepted::Unknown);
        assert_eq!(agg.accept(ok(0, 2)), Accepted::Unknown);
        assert_eq!(agg.received(), 1);
        assert!(!agg.is_complete());
    }

    #[test]
    fn failures_are_kept_with_their_source() {
        let mut agg = ResultAggregator::new(expected(&[(0, 2)]));
        agg.accept(result(0, 1, Outcome::Failed("bad byte".to_string())));
        agg.accept(ok(0, 0));
        let groups = agg.finish();
        assert!(!groups[&0][0].outcome.is_failed());
        assert!(groups[&0][1].outcome.is_failed());
    }

    #[test]
    fn sources_without_results_still_appear() {
        let groups = ResultAggregator::new(expected(&[(0, 1), (1, 1)])).finish();
        assert_eq!(groups.len(), 2);
        assert!(groups.values().all(Vec::is_empty));
    }

    #[test]
    fn grouping_twice_gives_the_same_answer() {
        let exp = expected(&[(0, 2), (1, 2)]);
        let batch = vec![ok(1, 0), ok(0, 1), ok(1, 1), ok(0, 0)];
        let mut reversed = batch.clone();
        reversed.reverse();
        let first = group(batch.clone(), &exp);
        assert_eq!(first, group(batch, &exp));
        assert_eq!(first, group(reversed, &exp));
    }
}
