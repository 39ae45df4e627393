//! The emitted unit and the sink that receives it.

use std::collections::HashMap;

use serde::Serialize;

use crate::{
    model::{SearchType, TokenType},
    storage::FeatureId,
    token_range::TokenRange,
};

/// Everything the ranking stage needs to know about one emitted feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreRankingInfo {
    pub feature: FeatureId,
    pub search_type: SearchType,
    /// Token range consumed by each matched type, in query order.
    pub token_ranges: Vec<(TokenType, TokenRange)>,
    /// The city the feature was found in, if any.
    pub city: Option<FeatureId>,
    pub matched_country: bool,
    pub matched_state: bool,
    pub all_tokens_used: bool,
    pub exact_match: bool,
    /// Every matched token is a common word.
    pub is_common_match_only: bool,
}

impl PreRankingInfo {
    pub fn token_range(&self, ty: impl Into<TokenType>) -> Option<TokenRange> {
        let ty = ty.into();
        self.token_ranges
            .iter()
            .find(|(t, _)| *t == ty)
            .map(|(_, range)| *range)
    }

    pub fn num_matched_tokens(&self) -> usize {
        self.token_ranges.iter().map(|(_, range)| range.len()).sum()
    }

    /// Whether `self` describes the feature better than `other`.
    fn is_better_than(&self, other: &PreRankingInfo) -> bool {
        (self.all_tokens_used, self.exact_match, self.num_matched_tokens())
            > (
                other.all_tokens_used,
                other.exact_match,
                other.num_matched_tokens(),
            )
    }
}

/// Receives emitted results.
pub trait PreRanker {
    fn emplace(&mut self, info: PreRankingInfo);

    /// Soft bound on the number of results; also the viewport filter
    /// threshold.
    fn limit(&self) -> usize;

    fn num_sent_results(&self) -> usize;

    /// Called after each shard of the must-process prefix and once more,
    /// with `last` set, when the search is over.
    fn update_results(&mut self, last: bool);
}

/// Collects results in emission order, merging emissions of the same
/// feature.
#[derive(Debug, Clone)]
pub struct CollectingPreRanker {
    limit: usize,
    results: Vec<PreRankingInfo>,
    index: HashMap<FeatureId, usize>,
    num_sent: usize,
    num_dropped: usize,
    finished: bool,
}

impl CollectingPreRanker {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            results: Vec::new(),
            index: HashMap::new(),
            num_sent: 0,
            num_dropped: 0,
            finished: false,
        }
    }

    pub fn results(&self) -> &[PreRankingInfo] {
        &self.results
    }

    pub fn into_results(self) -> Vec<PreRankingInfo> {
        self.results
    }

    /// New features refused because the limit was reached.
    pub fn num_dropped(&self) -> usize {
        self.num_dropped
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.index.clear();
        self.num_sent = 0;
        self.num_dropped = 0;
        self.finished = false;
    }
}

impl PreRanker for CollectingPreRanker {
    fn emplace(&mut self, info: PreRankingInfo) {
        if let Some(&i) = self.index.get(&info.feature) {
            if info.is_better_than(&self.results[i]) {
                self.results[i] = info;
            }
            return;
        }
        if self.results.len() >= self.limit {
            self.num_dropped += 1;
            return;
        }
        self.index.insert(info.feature, self.results.len());
        self.results.push(info);
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn num_sent_results(&self) -> usize {
        self.num_sent
    }

    fn update_results(&mut self, last: bool) {
        self.num_sent = self.results.len();
        self.finished |= last;
    }
}
