//! Per-shard, per-query matching state.
//!
//! Every mutation made while exploring one hypothesis (marking tokens,
//! pushing a layer, entering a region or a city) goes through a
//! [`Scoped`] guard. The guard derefs to the context, so recursion simply
//! continues on it, and it reverts its mutation when dropped, whichever way
//! the scope is left.

use std::ops::{Deref, DerefMut};

use crate::{
    cbv::Cbv,
    features_layer::FeaturesLayer,
    locality::{City, Region},
    model::TokenType,
    storage::TokenCandidates,
    token_range::TokenRange,
};

#[derive(Debug, Default)]
pub struct BaseContext<'a> {
    /// Candidates retrieved for every query token.
    pub features: Vec<TokenCandidates>,
    pub streets: Cbv,
    pub suburbs: Cbv,
    pub villages: Cbv,
    /// Number of results emitted from this context.
    pub num_emitted: usize,
    tokens: Vec<Option<TokenType>>,
    layers: Vec<FeaturesLayer>,
    regions: Vec<&'a Region>,
    city: Option<&'a City>,
}

#[derive(Debug, Clone, Copy)]
enum Undo<'a> {
    Tokens(TokenRange),
    Layer,
    Region,
    City(Option<&'a City>),
}

/// Reverts one context mutation on drop.
#[must_use = "the mutation is reverted as soon as the guard is dropped"]
pub struct Scoped<'c, 'a> {
    ctx: &'c mut BaseContext<'a>,
    undo: Undo<'a>,
}

impl<'a> Deref for Scoped<'_, 'a> {
    type Target = BaseContext<'a>;

    fn deref(&self) -> &Self::Target {
        &*self.ctx
    }
}

impl DerefMut for Scoped<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.ctx
    }
}

impl Drop for Scoped<'_, '_> {
    fn drop(&mut self) {
        match self.undo {
            Undo::Tokens(range) => {
                for token in range.tokens() {
                    self.ctx.tokens[token] = None;
                }
            }
            Undo::Layer => {
                self.ctx.layers.pop();
            }
            Undo::Region => {
                self.ctx.regions.pop();
            }
            Undo::City(prev) => self.ctx.city = prev,
        }
    }
}

impl<'a> BaseContext<'a> {
    pub fn new(features: Vec<TokenCandidates>) -> Self {
        let num_tokens = features.len();
        Self {
            features,
            tokens: vec![None; num_tokens],
            ..Self::default()
        }
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    // -- Token marking --

    /// Marks `range` as consumed by `ty` until the guard is dropped.
    pub fn mark_tokens<'c>(
        &'c mut self,
        range: TokenRange,
        ty: impl Into<TokenType>,
    ) -> Scoped<'c, 'a> {
        debug_assert!(range.end <= self.num_tokens());
        debug_assert!(
            !self.has_used_tokens_in_range(range),
            "tokens {range} are already marked"
        );
        let ty = ty.into();
        for token in range.tokens() {
            self.tokens[token] = Some(ty);
        }
        Scoped {
            ctx: self,
            undo: Undo::Tokens(range),
        }
    }

    pub fn is_token_used(&self, token: usize) -> bool {
        self.tokens[token].is_some()
    }

    pub fn token_types(&self) -> &[Option<TokenType>] {
        &self.tokens
    }

    /// Next unused token at or after `from`; `num_tokens()` when none.
    pub fn skip_used_tokens(&self, from: usize) -> usize {
        (from..self.num_tokens())
            .find(|&i| !self.is_token_used(i))
            .unwrap_or(self.num_tokens())
    }

    pub fn all_tokens_used(&self) -> bool {
        self.tokens.iter().all(Option::is_some)
    }

    pub fn has_used_tokens_in_range(&self, range: TokenRange) -> bool {
        range.tokens().any(|i| self.is_token_used(i))
    }

    pub fn num_used_tokens(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_some()).count()
    }

    /// Number of maximal runs of contiguous unused tokens.
    pub fn num_unused_token_groups(&self) -> usize {
        let mut groups = 0;
        let mut prev_used = true;
        for token in &self.tokens {
            if token.is_none() && prev_used {
                groups += 1;
            }
            prev_used = token.is_some();
        }
        groups
    }

    // -- Layers --

    pub fn push_layer<'c>(
        &'c mut self,
        layer: FeaturesLayer,
    ) -> Scoped<'c, 'a> {
        self.layers.push(layer);
        Scoped {
            ctx: self,
            undo: Undo::Layer,
        }
    }

    pub fn layers(&self) -> &[FeaturesLayer] {
        &self.layers
    }

    // -- Regions and city --

    pub fn push_region<'c>(&'c mut self, region: &'a Region) -> Scoped<'c, 'a> {
        self.regions.push(region);
        Scoped {
            ctx: self,
            undo: Undo::Region,
        }
    }

    pub fn regions(&self) -> &[&'a Region] {
        &self.regions
    }

    /// The innermost matched region.
    pub fn last_region(&self) -> Option<&'a Region> {
        self.regions.last().copied()
    }

    pub fn set_city<'c>(&'c mut self, city: &'a City) -> Scoped<'c, 'a> {
        let prev = self.city.replace(city);
        Scoped {
            ctx: self,
            undo: Undo::City(prev),
        }
    }

    pub fn city(&self) -> Option<&'a City> {
        self.city
    }

    // -- Candidates --

    /// Intersection of all candidates over `range`.
    pub fn candidates_in_range(&self, range: TokenRange) -> Cbv {
        range.tokens().fold(Cbv::full(), |acc, i| {
            acc.intersect(&self.features[i].all)
        })
    }

    /// Intersection of the exact candidates over `range`.
    pub fn exact_in_range(&self, range: TokenRange) -> Cbv {
        range.tokens().fold(Cbv::full(), |acc, i| {
            acc.intersect(&self.features[i].exact)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geometry::Rect,
        locality::Locality,
        model::{LocalityType, SearchType},
        storage::FeatureId,
    };

    fn context(num_tokens: usize) -> BaseContext<'static> {
        BaseContext::new(vec![TokenCandidates::default(); num_tokens])
    }

    fn layer(ty: SearchType, range: TokenRange) -> FeaturesLayer {
        FeaturesLayer::new(ty, range, vec![1, 2], String::new(), false)
    }

    #[test]
    fn marks_are_reverted_on_drop() {
        let mut ctx = context(3);
        {
            let marked =
                ctx.mark_tokens(TokenRange::new(0, 2), SearchType::Street);
            assert!(marked.is_token_used(0));
            assert!(marked.is_token_used(1));
            assert!(!marked.all_tokens_used());
            assert_eq!(
                marked.token_types()[0],
                Some(TokenType::Search(SearchType::Street))
            );
        }
        assert_eq!(ctx.num_used_tokens(), 0);
    }

    #[test]
    fn nested_guards_unwind_in_order() {
        let mut ctx = context(4);
        {
            let street = TokenRange::new(1, 4);
            let mut outer = ctx.mark_tokens(street, SearchType::Street);
            let mut with_layer =
                outer.push_layer(layer(SearchType::Street, street));
            let inner = with_layer
                .mark_tokens(TokenRange::new(0, 1), SearchType::Building);
            assert!(inner.all_tokens_used());
            assert_eq!(inner.layers().len(), 1);
        }
        assert_eq!(ctx.num_used_tokens(), 0);
        assert!(ctx.layers().is_empty());
    }

    #[test]
    fn guards_unwind_on_early_error() {
        fn recurse(ctx: &mut BaseContext<'_>, token: usize) -> Result<(), ()> {
            if token == ctx.num_tokens() {
                return Err(());
            }
            let mut ctx = ctx.mark_tokens(
                TokenRange::new(token, token + 1),
                SearchType::Poi,
            );
            let mut ctx = ctx.push_layer(layer(
                SearchType::Poi,
                TokenRange::new(token, token + 1),
            ));
            recurse(&mut ctx, token + 1)
        }

        let mut ctx = context(3);
        assert!(recurse(&mut ctx, 0).is_err());
        assert_eq!(ctx.num_used_tokens(), 0);
        assert!(ctx.layers().is_empty());
    }

    #[test]
    fn skip_used_tokens_and_groups() {
        let mut ctx = context(3);
        let ctx = ctx.mark_tokens(TokenRange::new(1, 2), SearchType::City);
        assert_eq!(ctx.skip_used_tokens(0), 0);
        assert_eq!(ctx.skip_used_tokens(1), 2);
        assert_eq!(ctx.num_unused_token_groups(), 2);
        assert!(ctx.has_used_tokens_in_range(TokenRange::new(0, 2)));
        assert!(!ctx.has_used_tokens_in_range(TokenRange::new(2, 3)));
    }

    #[test]
    fn skip_used_tokens_past_end() {
        let mut ctx = context(2);
        let ctx = ctx.mark_tokens(TokenRange::new(1, 2), SearchType::City);
        assert_eq!(ctx.skip_used_tokens(1), 2);
        assert_eq!(ctx.num_unused_token_groups(), 1);
    }

    #[test]
    fn city_is_restored() {
        let city = City {
            locality: Locality::new(
                FeatureId::new(0, 7),
                TokenRange::new(0, 1),
                1.0,
            ),
            locality_type: LocalityType::City,
            rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            default_name: "Paris".into(),
            exact_match: true,
        };
        let mut ctx = BaseContext::new(vec![TokenCandidates::default(); 1]);
        {
            let with_city = ctx.set_city(&city);
            assert_eq!(
                with_city.city().map(|c| c.default_name.as_str()),
                Some("Paris")
            );
        }
        assert!(ctx.city().is_none());
    }

    #[test]
    fn candidate_intersections() {
        let ctx = BaseContext::new(vec![
            TokenCandidates::new(Cbv::from_ids([1, 2, 3]), Cbv::from_ids([1])),
            TokenCandidates::new(Cbv::from_ids([2, 3]), Cbv::from_ids([2, 3])),
        ]);
        let range = TokenRange::new(0, 2);
        assert_eq!(ctx.candidates_in_range(range), Cbv::from_ids([2, 3]));
        assert!(ctx.exact_in_range(range).is_empty());
        assert!(ctx.candidates_in_range(TokenRange::new(1, 1)).is_full());
    }
}
