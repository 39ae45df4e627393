//! Street and suburb name predictions.
//!
//! [`go`] scans the unused tokens for ranges whose candidates intersect the
//! street (or suburb) set, preferring exact matches and falling back to
//! fuzzy ones, which are then flagged as misprinted.

use std::{cmp::Ordering, collections::HashSet};

use crate::{
    base_context::BaseContext,
    cbv::Cbv,
    features_filter::FeaturesFilter,
    query::QueryParams,
    token_range::TokenRange,
};

/// Generic street words that never identify a street on their own.
const STREET_SYNONYMS: &[&str] = &[
    "av", "ave", "avenue", "blvd", "boulevard", "calle", "dr", "drive",
    "lane", "ln", "rd", "road", "rue", "st", "str", "strasse", "street",
    "ul", "ulitsa", "via",
];

/// Below this probability, trailing predictions are dropped.
const MIN_PROBABILITY: f64 = 0.05;

/// Predictions always kept regardless of probability.
const MIN_PREDICTIONS: usize = 3;

pub fn is_street_synonym(token: &str) -> bool {
    STREET_SYNONYMS.contains(&token)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub features: Cbv,
    pub range: TokenRange,
    pub with_misprints: bool,
    pub probability: f64,
    /// Hash of `features`.
    pub hash: u64,
}

impl Prediction {
    fn num_tokens(&self) -> usize {
        self.range.len()
    }

    /// More tokens wins, then fewer misprints, then higher probability.
    pub fn is_better(&self, other: &Prediction) -> bool {
        self.compare(other) == Ordering::Less
    }

    /// Whether the two predictions are interchangeable for a relaxed retry.
    pub fn same_for_relaxed_match(&self, other: &Prediction) -> bool {
        self.with_misprints == other.with_misprints
            && self.num_tokens() == other.num_tokens()
    }

    /// Orders better predictions first; ties fall back to token position.
    fn compare(&self, other: &Prediction) -> Ordering {
        other
            .num_tokens()
            .cmp(&self.num_tokens())
            .then_with(|| self.with_misprints.cmp(&other.with_misprints))
            .then_with(|| {
                other
                    .probability
                    .partial_cmp(&self.probability)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| self.range.cmp(&other.range))
    }
}

/// Proposes street predictions for `candidates` (the shard's streets or
/// suburbs) over the unused tokens of `ctx`, best first.
pub fn go(
    ctx: &BaseContext<'_>,
    candidates: &Cbv,
    filter: &FeaturesFilter,
    params: &QueryParams,
) -> Vec<Prediction> {
    let mut predictions = find(ctx, candidates, filter, params);
    prune(&mut predictions);
    predictions
}

fn find(
    ctx: &BaseContext<'_>,
    candidates: &Cbv,
    filter: &FeaturesFilter,
    params: &QueryParams,
) -> Vec<Prediction> {
    let num_tokens = ctx.num_tokens();
    let mut predictions = Vec::new();

    for begin in 0..num_tokens {
        if ctx.is_token_used(begin) {
            continue;
        }

        let mut all = candidates.clone();
        let mut exact = candidates.clone();
        let mut only_synonyms = true;

        for end in begin + 1..=num_tokens {
            let token = end - 1;
            if ctx.is_token_used(token) {
                break;
            }

            all = all.intersect(&ctx.features[token].all);
            exact = exact.intersect(&ctx.features[token].exact);
            if all.is_empty() || all.is_full() {
                break;
            }

            only_synonyms &= is_street_synonym(params.token(token));
            if only_synonyms {
                continue;
            }

            let filtered = filter.apply(&all);
            if filtered.is_empty() {
                break;
            }
            let filtered_exact = filtered.intersect(&exact);
            let with_misprints = filtered_exact.is_empty();
            let features = if with_misprints {
                filtered
            } else {
                filtered_exact
            };

            let probability =
                features.pop_count() as f64 / all.pop_count() as f64;
            predictions.push(Prediction {
                hash: features.hash(),
                features,
                range: TokenRange::new(begin, end),
                with_misprints,
                probability,
            });
        }
    }

    predictions
}

/// Sorts predictions best first, drops duplicates and trims the
/// improbable tail.
fn prune(predictions: &mut Vec<Prediction>) {
    predictions.sort_by(Prediction::compare);

    let mut seen = HashSet::new();
    predictions.retain(|p| seen.insert((p.hash, p.range)));

    let mut kept: Vec<Prediction> = Vec::with_capacity(predictions.len());
    for p in predictions.drain(..) {
        if !kept
            .iter()
            .any(|k| k.hash == p.hash && k.same_for_relaxed_match(&p))
        {
            kept.push(p);
        }
    }
    *predictions = kept;

    while predictions.len() > MIN_PREDICTIONS
        && predictions
            .last()
            .is_some_and(|p| p.probability < MIN_PROBABILITY)
    {
        predictions.pop();
    }
}
