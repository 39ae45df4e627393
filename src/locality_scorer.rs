//! Ranking of locality candidates (countries, states, cities, villages).

use std::cmp::Ordering;

use crate::{
    base_context::BaseContext,
    cbv::Cbv,
    locality::Locality,
    query::QueryParams,
    storage::{FeatureId, Shard, ShardId},
    token_range::TokenRange,
};

/// Number of candidates kept before name scoring.
pub const DEFAULT_READ_LIMIT: usize = 100;

/// How well a feature name matches a query slice, worst first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NameScore {
    Zero,
    /// The slice occurs inside the name.
    Substring,
    /// The slice is a prefix of the name.
    Prefix,
    /// The slice covers the name, the last token only as a prefix.
    FullPrefix,
    Full,
}

impl NameScore {
    fn is_almost_full(self) -> bool {
        self >= NameScore::FullPrefix
    }
}

fn name_tokens(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_lowercase).collect()
}

/// Scores `name` against the query tokens `slice`.
pub fn name_score(
    name: &str,
    slice: &[&str],
    last_is_prefix: bool,
) -> NameScore {
    let name = name_tokens(name);
    if name.is_empty() || slice.is_empty() || slice.len() > name.len() {
        return NameScore::Zero;
    }

    let last = slice.len() - 1;
    let mut best = NameScore::Zero;
    for offset in 0..=name.len() - slice.len() {
        let mut last_exact = true;
        let matched = slice.iter().enumerate().all(|(i, token)| {
            let word = &name[offset + i];
            if word == token {
                return true;
            }
            if i == last && last_is_prefix && word.starts_with(token) {
                last_exact = false;
                return true;
            }
            false
        });
        if !matched {
            continue;
        }

        let score = match (offset == 0, slice.len() == name.len()) {
            (true, true) if last_exact => NameScore::Full,
            (true, true) => NameScore::FullPrefix,
            (true, false) => NameScore::Prefix,
            (false, _) => NameScore::Substring,
        };
        best = best.max(score);
    }
    best
}

/// Feature lookups the scorer needs.
pub trait Delegate {
    /// Every display name of the feature.
    fn names(&self, id: u32) -> Vec<String>;

    fn rank(&self, id: u32) -> u8;
}

/// [`Delegate`] reading names and ranks from a shard.
pub struct ShardDelegate<'s> {
    shard: &'s dyn Shard,
}

impl<'s> ShardDelegate<'s> {
    pub fn new(shard: &'s dyn Shard) -> Self {
        Self { shard }
    }
}

impl Delegate for ShardDelegate<'_> {
    fn names(&self, id: u32) -> Vec<String> {
        self.shard
            .feature(id)
            .map(|f| f.names.into_iter().map(|(_, name)| name).collect())
            .unwrap_or_default()
    }

    fn rank(&self, id: u32) -> u8 {
        self.shard.rank(id)
    }
}

#[derive(Debug)]
struct ExLocality {
    locality: Locality,
    rank: u8,
    name_score: NameScore,
}

impl ExLocality {
    fn num_tokens(&self) -> usize {
        self.locality.range.len()
    }
}

pub struct LocalityScorer<'p, D> {
    params: &'p QueryParams,
    delegate: D,
}

impl<'p, D: Delegate> LocalityScorer<'p, D> {
    pub fn new(params: &'p QueryParams, delegate: D) -> Self {
        Self { params, delegate }
    }

    /// Collects localities of `shard` over every token range whose
    /// candidates survive `filter`, then keeps the best `limit`.
    pub fn get_top_localities(
        &self,
        ctx: &BaseContext<'_>,
        shard: ShardId,
        filter: &Cbv,
        limit: usize,
    ) -> Vec<Locality> {
        let candidates = self.candidates(ctx, shard, filter);
        self.top(candidates, limit)
    }

    /// Grows every token range from each start position while the
    /// filtered intersection of per-token candidates stays non-empty.
    fn candidates(
        &self,
        ctx: &BaseContext<'_>,
        shard: ShardId,
        filter: &Cbv,
    ) -> Vec<Locality> {
        let num_tokens = ctx.num_tokens();
        let mut localities = Vec::new();

        for begin in 0..num_tokens {
            let mut intersection = filter.intersect(&ctx.features[begin].all);
            let mut unfiltered = ctx.features[begin].all.clone();

            for end in begin + 1..=num_tokens {
                if intersection.is_empty() || intersection.is_full() {
                    break;
                }
                let range = TokenRange::new(begin, end);

                // Ranges made of numbers only are never localities.
                if !self.params.is_number_tokens(range) {
                    let probability = if unfiltered.is_full() {
                        0.0
                    } else {
                        intersection.pop_count() as f64
                            / unfiltered.pop_count() as f64
                    };
                    intersection.for_each(|id| {
                        localities.push(Locality::new(
                            FeatureId::new(shard, id),
                            range,
                            probability,
                        ));
                    });
                }

                if end < num_tokens {
                    intersection =
                        intersection.intersect(&ctx.features[end].all);
                    unfiltered = unfiltered.intersect(&ctx.features[end].all);
                }
            }
        }

        localities
    }

    fn top(&self, localities: Vec<Locality>, limit: usize) -> Vec<Locality> {
        let read_limit = limit.max(DEFAULT_READ_LIMIT);
        let mut ex: Vec<ExLocality> = dedup_by_largest_range(localities)
            .into_iter()
            .map(|locality| ExLocality {
                rank: self.delegate.rank(locality.feature.feature),
                locality,
                name_score: NameScore::Zero,
            })
            .collect();

        // Rank-prune before fetching names.
        if ex.len() > read_limit {
            ex.sort_by(|a, b| {
                cmp_desc(a.locality.probability, b.locality.probability)
                    .then_with(|| b.rank.cmp(&a.rank))
                    .then_with(|| b.num_tokens().cmp(&a.num_tokens()))
            });
            ex.truncate(read_limit);
        }

        for l in &mut ex {
            l.name_score = self.best_name_score(&l.locality);
        }
        ex.sort_by(compare_by_name);
        ex.truncate(limit);

        ex.into_iter().map(|l| l.locality).collect()
    }

    fn best_name_score(&self, locality: &Locality) -> NameScore {
        let range = locality.range;
        let slice = self.params.slice(range);
        let last_is_prefix = self.params.range_ends_with_prefix(range);
        self.delegate
            .names(locality.feature.feature)
            .iter()
            .map(|name| name_score(name, &slice, last_is_prefix))
            .max()
            .unwrap_or(NameScore::Zero)
    }
}

/// Keeps, per feature, only the locality with the largest token range.
fn dedup_by_largest_range(mut localities: Vec<Locality>) -> Vec<Locality> {
    localities.sort_by(|a, b| {
        a.feature
            .cmp(&b.feature)
            .then_with(|| b.range.len().cmp(&a.range.len()))
            .then_with(|| a.range.cmp(&b.range))
    });
    localities.dedup_by(|next, kept| next.feature == kept.feature);
    localities
}

fn cmp_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

fn compare_by_name(a: &ExLocality, b: &ExLocality) -> Ordering {
    cmp_desc(a.locality.probability, b.locality.probability)
        .then_with(|| {
            if a.name_score.is_almost_full() && b.name_score.is_almost_full() {
                b.num_tokens()
                    .cmp(&a.num_tokens())
                    .then_with(|| b.name_score.cmp(&a.name_score))
            } else {
                b.name_score
                    .cmp(&a.name_score)
                    .then_with(|| b.num_tokens().cmp(&a.num_tokens()))
            }
        })
        .then_with(|| b.rank.cmp(&a.rank))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{geometry::Rect, storage::TokenCandidates};

    #[derive(Default)]
    struct FakeDelegate {
        names: HashMap<u32, Vec<String>>,
        ranks: HashMap<u32, u8>,
    }

    impl FakeDelegate {
        fn add(&mut self, id: u32, name: &str, rank: u8) {
            self.names.insert(id, vec![name.to_string()]);
            self.ranks.insert(id, rank);
        }
    }

    impl Delegate for &FakeDelegate {
        fn names(&self, id: u32) -> Vec<String> {
            self.names.get(&id).cloned().unwrap_or_default()
        }

        fn rank(&self, id: u32) -> u8 {
            self.ranks.get(&id).copied().unwrap_or(0)
        }
    }

    fn params(query: &str) -> QueryParams {
        let mut params =
            QueryParams::parse(query, Rect::new(0.0, 0.0, 1.0, 1.0));
        params.last_token_is_prefix = false;
        params
    }

    fn token(ids: &[u32]) -> TokenCandidates {
        let cbv = Cbv::from_ids(ids.iter().copied());
        TokenCandidates::new(cbv.clone(), cbv)
    }

    #[test]
    fn name_scores() {
        assert_eq!(
            name_score("New York", &["new", "york"], false),
            NameScore::Full
        );
        assert_eq!(
            name_score("New York", &["new", "yo"], true),
            NameScore::FullPrefix
        );
        assert_eq!(name_score("New York", &["new"], false), NameScore::Prefix);
        assert_eq!(
            name_score("New York", &["york"], false),
            NameScore::Substring
        );
        assert_eq!(name_score("New York", &["boston"], false), NameScore::Zero);
        assert_eq!(name_score("", &["york"], false), NameScore::Zero);
    }

    #[test]
    fn probability_is_share_of_filtered_candidates() {
        let params = params("springfield");
        let ctx = BaseContext::new(vec![token(&[1, 2, 3, 4])]);
        let mut delegate = FakeDelegate::default();
        delegate.add(1, "Springfield", 0);
        delegate.add(2, "Springfield", 0);
        let scorer = LocalityScorer::new(&params, &delegate);

        let top = scorer.get_top_localities(&ctx, 0, &Cbv::from_ids([1, 2]), 5);
        assert_eq!(top.len(), 2);
        assert!(top.iter().all(|l| l.probability == 0.5));
    }

    #[test]
    fn keeps_largest_range_per_feature() {
        let params = params("new york");
        let ctx = BaseContext::new(vec![token(&[1, 2]), token(&[1])]);
        let mut delegate = FakeDelegate::default();
        delegate.add(1, "New York", 0);
        delegate.add(2, "New Orleans", 0);
        let scorer = LocalityScorer::new(&params, &delegate);

        let top = scorer.get_top_localities(&ctx, 0, &Cbv::full(), 5);
        let ny = top.iter().find(|l| l.feature.feature == 1);
        assert_eq!(ny.map(|l| l.range), Some(TokenRange::new(0, 2)));
    }

    #[test]
    fn number_only_ranges_are_skipped() {
        let params = params("10");
        let ctx = BaseContext::new(vec![token(&[1])]);
        let delegate = FakeDelegate::default();
        let scorer = LocalityScorer::new(&params, &delegate);
        assert!(scorer.get_top_localities(&ctx, 0, &Cbv::full(), 5).is_empty());
    }

    #[test]
    fn name_score_then_rank_orders_ties() {
        let params = params("paris");
        let ctx = BaseContext::new(vec![token(&[1, 2, 3])]);
        let mut delegate = FakeDelegate::default();
        delegate.add(1, "Paris Hilton Park", 200);
        delegate.add(2, "Paris", 10);
        delegate.add(3, "Paris", 50);
        let scorer = LocalityScorer::new(&params, &delegate);

        let top = scorer.get_top_localities(&ctx, 0, &Cbv::full(), 2);
        let ids: Vec<u32> = top.iter().map(|l| l.feature.feature).collect();
        assert_eq!(ids, vec![3, 2]);
    }
}
