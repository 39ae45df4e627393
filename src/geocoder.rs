//! The search orchestrator.
//!
//! A query is matched shard by shard. Before the shard loop, countries,
//! states and cities are read from the world shard into a
//! [`LocalityTables`]. Every shard pass then explores interpretations of
//! the query depth first:
//!
//! ```text
//! regions -> cities -> (postcodes) -> streets/suburbs -> POIs/buildings
//!                                                    -> path finding
//! ```
//!
//! Each recursive step marks the tokens it consumes and pushes what it
//! matched onto a [`BaseContext`] through scoped guards, so leaving a
//! step, by return or by cancellation, restores the context.

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, trace, warn};

use crate::{
    base_context::BaseContext,
    cancel::Cancellable,
    cbv::Cbv,
    config::GeocoderConfig,
    error::{Error, Result},
    features_filter::FeaturesFilter,
    features_layer::{FeaturesLayer, is_layer_sequence_sane},
    geometry::{Rect, radius_by_population, similarity},
    house_numbers::looks_like_house_number,
    layer_matcher::FeaturesLayerMatcher,
    locality::{City, LocalityTables, Region},
    locality_scorer::{LocalityScorer, ShardDelegate},
    model::{LocalityType, RegionType, SearchType, TokenType},
    path_finder::PathFinder,
    postcodes::looks_like_postcode,
    pre_ranking::{PreRanker, PreRankingInfo},
    query::{Mode, QueryParams},
    rect_cache::RectCache,
    storage::{
        DataSource, FeatureId, FeatureRecord, Shard, ShardHandle, ShardId,
        ShardInfo, TokenCandidates,
    },
    streets_matcher::{self, Prediction},
    token_range::TokenRange,
    tracer::{Branch, Tracer, trace as trace_branch},
};

/// Summary of one [`Geocoder::go`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoStats {
    pub shards_processed: usize,
    pub shards_skipped: usize,
    /// Emissions handed to the sink. A feature found by several shards
    /// counts once per shard; merging is up to the sink.
    pub emitted: usize,
    /// The run stopped early on a cancellation request.
    pub cancelled: bool,
}

/// Runs queries against a [`DataSource`].
///
/// A geocoder is single-threaded and keeps private caches (rect retrievals,
/// per-shard matchers, street/suburb/village sets) between queries; use one
/// instance per thread.
pub struct Geocoder {
    source: Arc<dyn DataSource>,
    config: GeocoderConfig,
    pivot_rects: RectCache,
    locality_rects: RectCache,
    matchers: HashMap<ShardId, FeaturesLayerMatcher>,
    categories: HashMap<(ShardId, SearchType), Cbv>,
}

impl Geocoder {
    pub fn new(source: Arc<dyn DataSource>, config: GeocoderConfig) -> Self {
        Self {
            pivot_rects: RectCache::new(config.pivot_cache_capacity()),
            locality_rects: RectCache::new(config.locality_cache_capacity()),
            matchers: HashMap::new(),
            categories: HashMap::new(),
            source,
            config,
        }
    }

    pub fn config(&self) -> &GeocoderConfig {
        &self.config
    }

    pub fn clear_caches(&mut self) {
        self.pivot_rects.clear();
        self.locality_rects.clear();
        self.matchers.clear();
        self.categories.clear();
    }

    /// Matches `params` against every shard and hands results to `sink`.
    ///
    /// Cancellation is not an error: the run stops at the next poll and
    /// reports `cancelled` in the returned stats, with everything emitted
    /// so far left in `sink`.
    pub fn go(
        &mut self,
        params: &QueryParams,
        sink: &mut dyn PreRanker,
        cancel: &dyn Cancellable,
        tracer: Option<&Tracer>,
    ) -> Result<GoStats> {
        let mut stats = GoStats::default();
        if params.num_tokens() == 0 {
            return Ok(stats);
        }

        let branch = match params.mode {
            Mode::Everywhere => Branch::GoEverywhere,
            Mode::Viewport => Branch::GoInViewport,
        };
        let _branch = trace_branch(tracer, branch);
        debug!(
            tokens = params.num_tokens(),
            mode = ?params.mode,
            "geocoding"
        );

        match self.go_impl(params, sink, cancel, tracer, &mut stats) {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                debug!(emitted = stats.emitted, "geocoding cancelled");
                stats.cancelled = true;
            }
            Err(e) => return Err(e),
        }
        sink.update_results(true);
        Ok(stats)
    }

    fn go_impl(
        &mut self,
        params: &QueryParams,
        sink: &mut dyn PreRanker,
        cancel: &dyn Cancellable,
        tracer: Option<&Tracer>,
        stats: &mut GoStats,
    ) -> Result<()> {
        let mut infos = self.source.shard_infos();
        if params.mode == Mode::Viewport {
            infos.retain(|info| info.rect.intersects(&params.pivot));
        }
        let (infos, num_must) =
            order_shards(infos, params, self.config.similarity_bonus_m);

        let world = infos
            .iter()
            .find(|info| info.is_world())
            .and_then(|info| self.source.acquire(info.id));
        let tables = match &world {
            Some(world) if world.info().has_search_index => {
                let ctx = BaseContext::new(retrieve_features(params, &**world));
                self.fill_localities_table(params, &**world, &ctx)
            }
            _ => LocalityTables::default(),
        };
        debug!(
            countries = tables.num_regions(RegionType::Country),
            states = tables.num_regions(RegionType::State),
            cities = tables.num_cities(),
            "filled localities table"
        );

        let query = Query {
            params,
            cancel,
            tracer,
            world,
            tables,
            num_must,
        };

        for (index, info) in infos.iter().enumerate() {
            cancel.bail_if_cancelled()?;
            if !info.has_search_index {
                trace!(shard = %info.name, "no search index, skipping");
                stats.shards_skipped += 1;
                continue;
            }
            let Some(handle) = self.source.acquire(info.id) else {
                stats.shards_skipped += 1;
                continue;
            };

            self.process_shard(&query, sink, index, handle, stats)?;
            stats.shards_processed += 1;

            if index + 1 >= num_must {
                sink.update_results(false);
            }
        }
        Ok(())
    }

    fn process_shard(
        &mut self,
        query: &Query<'_>,
        sink: &mut dyn PreRanker,
        index: usize,
        handle: ShardHandle,
        stats: &mut GoStats,
    ) -> Result<()> {
        let params = query.params;
        let shard: &dyn Shard = &*handle;
        let shard_id = shard.info().id;

        let mut features = retrieve_features(params, shard);
        if params.mode == Mode::Viewport {
            let viewport =
                self.pivot_rects.get(shard, &params.pivot, self.config.scale);
            for candidates in &mut features {
                *candidates = candidates.intersect(&viewport);
            }
        }

        let mut tables = query.tables.clone();
        let mut ctx = BaseContext::new(features);
        ctx.streets = self.load_category(shard, SearchType::Street);
        ctx.suburbs = self.load_category(shard, SearchType::Suburb);
        ctx.villages = self.load_category(shard, SearchType::Village);
        self.add_village_localities(params, shard, &ctx, &mut tables);

        let matcher = self
            .matchers
            .entry(shard_id)
            .or_insert_with(|| FeaturesLayerMatcher::new(shard_id));
        matcher.set_context(Arc::clone(&handle));

        let mut pass = ShardPass {
            params,
            config: &self.config,
            source: &*self.source,
            shard,
            world: query.world.as_deref(),
            tables: &tables,
            pivot_rects: &mut self.pivot_rects,
            locality_rects: &mut self.locality_rects,
            matcher,
            sink,
            cancel: query.cancel,
            tracer: query.tracer,
            filter: None,
            postcodes: None,
            num_emitted: 0,
        };

        let result = pass.run(&mut ctx, index < query.num_must);
        pass.matcher.on_query_finished();
        stats.emitted += pass.num_emitted;

        if let Some(tracer) = query.tracer {
            tracer.record_shard_done(
                shard_id,
                ctx.layers().len(),
                ctx.num_used_tokens(),
            );
        }
        debug!(
            shard = %shard.info().name,
            emitted = ctx.num_emitted,
            "geocoding complete"
        );
        result
    }

    fn load_category(&mut self, shard: &dyn Shard, ty: SearchType) -> Cbv {
        self.categories
            .entry((shard.info().id, ty))
            .or_insert_with(|| shard.retrieve_category(ty.category_key()))
            .clone()
    }

    /// Reads the best countries, states and cities of the world shard.
    fn fill_localities_table(
        &self,
        params: &QueryParams,
        world: &dyn Shard,
        ctx: &BaseContext<'_>,
    ) -> LocalityTables {
        let scorer = LocalityScorer::new(params, ShardDelegate::new(world));
        let localities = scorer.get_top_localities(
            ctx,
            world.info().id,
            &Cbv::full(),
            self.config.max_num_localities,
        );

        let mut tables = LocalityTables::default();
        let mut num_cities = 0;
        let mut num_states = 0;
        let mut num_countries = 0;

        for locality in localities {
            let id = locality.feature.feature;
            let Some(record) = world.feature(id) else {
                continue;
            };
            if !record.is_point {
                continue;
            }
            let exact_match = ctx.exact_in_range(locality.range).has_bit(id);
            let default_name = record.default_name().unwrap_or_default();

            match record.search_type {
                SearchType::City => {
                    if num_cities >= self.config.max_num_cities {
                        continue;
                    }
                    num_cities += 1;
                    let locality_type =
                        record.locality_type().unwrap_or(LocalityType::City);
                    let rect = locality_rect(world, &record, locality_type);
                    debug!(
                        city = default_name,
                        range = %locality.range,
                        "matched city"
                    );
                    tables.add_city(City {
                        default_name: default_name.to_string(),
                        locality,
                        locality_type,
                        rect,
                        exact_match,
                    });
                }
                SearchType::State | SearchType::Country => {
                    let (region_type, count, max) =
                        if record.search_type == SearchType::State {
                            (
                                RegionType::State,
                                &mut num_states,
                                self.config.max_num_states,
                            )
                        } else {
                            (
                                RegionType::Country,
                                &mut num_countries,
                                self.config.max_num_countries,
                            )
                        };
                    if *count >= max {
                        continue;
                    }
                    let Some(affiliation) = record.affiliation_name() else {
                        continue;
                    };
                    let ids = self.source.matched_regions(affiliation);
                    if ids.is_empty() {
                        warn!(
                            region = default_name,
                            affiliation, "no shards found for region"
                        );
                    }
                    *count += 1;
                    debug!(
                        region = default_name,
                        range = %locality.range,
                        "matched region"
                    );
                    tables.add_region(Region {
                        default_name: default_name.to_string(),
                        locality,
                        region_type,
                        center: record.center,
                        ids,
                        exact_match,
                    });
                }
                _ => {}
            }
        }
        tables
    }

    /// Adds the best villages of `shard` to the city table.
    fn add_village_localities(
        &self,
        params: &QueryParams,
        shard: &dyn Shard,
        ctx: &BaseContext<'_>,
        tables: &mut LocalityTables,
    ) {
        if ctx.villages.is_empty() {
            return;
        }
        let scorer = LocalityScorer::new(params, ShardDelegate::new(shard));
        let localities = scorer.get_top_localities(
            ctx,
            shard.info().id,
            &ctx.villages,
            self.config.max_num_villages,
        );

        let mut num_villages = 0;
        for locality in localities {
            let id = locality.feature.feature;
            let Some(record) = shard.feature(id) else {
                continue;
            };
            if record.search_type != SearchType::Village {
                continue;
            }
            let rect = locality_rect(shard, &record, LocalityType::Village);
            let exact_match = ctx.exact_in_range(locality.range).has_bit(id);
            trace!(
                village = record.default_name().unwrap_or_default(),
                probability = locality.probability,
                "village"
            );
            tables.add_city(City {
                default_name: record
                    .default_name()
                    .unwrap_or_default()
                    .to_string(),
                locality,
                locality_type: LocalityType::Village,
                rect,
                exact_match,
            });
            num_villages += 1;
            if num_villages >= self.config.max_num_villages {
                break;
            }
        }
    }
}

/// Orders shards for processing. Returns the ordered shards and the length
/// of the prefix that is always processed: the world shard, shards
/// intersecting the pivot and the shard containing the user position.
pub fn order_shards(
    infos: Vec<ShardInfo>,
    params: &QueryParams,
    similarity_bonus_m: f64,
) -> (Vec<ShardInfo>, usize) {
    let pivot = params.pivot;
    let center = pivot.center();
    let position = match params.mode {
        Mode::Everywhere => params.position,
        Mode::Viewport => None,
    };
    let contains_position = |info: &ShardInfo| {
        position.is_some_and(|p| info.rect.contains(&p))
    };

    let class = |info: &ShardInfo| -> u8 {
        if info.is_world() {
            0
        } else if info.rect.contains(&center) {
            1
        } else if contains_position(info) {
            2
        } else {
            3
        }
    };
    let score = |info: &ShardInfo| {
        info.rect.distance_to(&center)
            - similarity(&pivot, &info.rect) * similarity_bonus_m
    };

    let mut infos = infos;
    infos.sort_by(|a, b| {
        class(a)
            .cmp(&class(b))
            .then_with(|| score(a).total_cmp(&score(b)))
            .then_with(|| a.id.cmp(&b.id))
    });

    let (mut ordered, rest): (Vec<_>, Vec<_>) =
        infos.into_iter().partition(|info| {
            info.is_world()
                || info.rect.intersects(&pivot)
                || contains_position(info)
        });
    let num_must = ordered.len();
    ordered.extend(rest);
    (ordered, num_must)
}

fn retrieve_features(
    params: &QueryParams,
    shard: &dyn Shard,
) -> Vec<TokenCandidates> {
    (0..params.num_tokens())
        .map(|i| {
            let candidates = shard.retrieve_candidates(
                params.token(i),
                params.is_prefix_token(i),
            );
            let categories = Cbv::unite_all(
                params.tokens[i]
                    .categories
                    .iter()
                    .map(|category| shard.retrieve_category(category))
                    .collect(),
            );
            if categories.is_empty() {
                return candidates;
            }
            candidates
                .union(&TokenCandidates::new(categories.clone(), categories))
        })
        .collect()
}

/// Search area of a locality: its explicit boundary, or a square sized
/// after its population.
fn locality_rect(
    shard: &dyn Shard,
    record: &FeatureRecord,
    locality_type: LocalityType,
) -> Rect {
    shard.locality_boundary(record.id).unwrap_or_else(|| {
        let population = if record.population > 0 {
            record.population
        } else {
            locality_type.default_population()
        };
        Rect::from_center_and_radius(
            record.center,
            radius_by_population(population),
        )
    })
}

/// Groups contiguous tokens consumed as the same type.
fn token_ranges(types: &[Option<TokenType>]) -> Vec<(TokenType, TokenRange)> {
    let mut ranges: Vec<(TokenType, TokenRange)> = Vec::new();
    for (i, ty) in types.iter().enumerate() {
        let Some(ty) = *ty else {
            continue;
        };
        match ranges.last_mut() {
            Some((last, range)) if *last == ty && range.end == i => {
                range.end = i + 1;
            }
            _ => ranges.push((ty, TokenRange::new(i, i + 1))),
        }
    }
    ranges
}

/// Per-query inputs shared by every shard pass.
struct Query<'q> {
    params: &'q QueryParams,
    cancel: &'q dyn Cancellable,
    tracer: Option<&'q Tracer>,
    world: Option<ShardHandle>,
    tables: LocalityTables,
    num_must: usize,
}

/// A postcode matched on a token range.
struct Postcodes {
    range: TokenRange,
    features: Cbv,
}

/// State of one shard's pass over the query.
struct ShardPass<'q> {
    params: &'q QueryParams,
    config: &'q GeocoderConfig,
    source: &'q dyn DataSource,
    shard: &'q dyn Shard,
    world: Option<&'q dyn Shard>,
    tables: &'q LocalityTables,
    pivot_rects: &'q mut RectCache,
    locality_rects: &'q mut RectCache,
    matcher: &'q mut FeaturesLayerMatcher,
    sink: &'q mut dyn PreRanker,
    cancel: &'q dyn Cancellable,
    tracer: Option<&'q Tracer>,
    filter: Option<FeaturesFilter>,
    postcodes: Option<Postcodes>,
    num_emitted: usize,
}

impl<'q> ShardPass<'q> {
    fn run(
        &mut self,
        ctx: &mut BaseContext<'q>,
        must_process: bool,
    ) -> Result<()> {
        {
            let _branch = trace_branch(self.tracer, Branch::MatchRegions);
            self.match_regions(ctx, RegionType::Country)?;
        }
        if must_process || self.sink.num_sent_results() == 0 {
            self.match_around_pivot(ctx)?;
        }
        Ok(())
    }

    fn bail_if_cancelled(&self) -> Result<()> {
        self.cancel.bail_if_cancelled()
    }

    fn is_world(&self) -> bool {
        self.shard.info().is_world()
    }

    fn with_filter<R>(
        &mut self,
        filter: FeaturesFilter,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let prev = self.filter.replace(filter);
        let result = f(self);
        self.filter = prev;
        result
    }

    fn with_postcodes<R>(
        &mut self,
        postcodes: Postcodes,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let prev = self.postcodes.replace(postcodes);
        let result = f(self);
        self.postcodes = prev;
        result
    }

    fn apply_filter(&self, cbv: &Cbv) -> Cbv {
        match &self.filter {
            Some(filter) => filter.apply(cbv),
            None => cbv.clone(),
        }
    }

    fn make_layer(
        &self,
        search_type: SearchType,
        range: TokenRange,
        sorted_features: Vec<u32>,
    ) -> FeaturesLayer {
        FeaturesLayer::new(
            search_type,
            range,
            sorted_features,
            self.params.join(range, " "),
            self.params.range_ends_with_prefix(range),
        )
    }

    fn search_type_of(
        &self,
        ctx: &BaseContext<'_>,
        id: u32,
    ) -> Option<SearchType> {
        if ctx.streets.has_bit(id) {
            return Some(SearchType::Street);
        }
        if ctx.villages.has_bit(id) {
            return Some(SearchType::Village);
        }
        self.shard.feature(id).map(|f| f.search_type)
    }

    // -- Regions and cities --

    fn match_regions(
        &mut self,
        ctx: &mut BaseContext<'q>,
        ty: RegionType,
    ) -> Result<()> {
        // Skipping this region type is always an option.
        match ty.narrower() {
            Some(narrower) => self.match_regions(ctx, narrower)?,
            None => self.match_cities(ctx)?,
        }

        let tables = self.tables;
        for (&range, regions) in tables.regions(ty) {
            self.bail_if_cancelled()?;
            if ctx.has_used_tokens_in_range(range) {
                continue;
            }

            for region in regions {
                // On the world shard the regions must nest; elsewhere the
                // shard itself must belong to the region.
                let matches = if self.is_world() {
                    ctx.last_region().is_none_or(|outer| {
                        self.source.point_in_regions(&region.center, &outer.ids)
                    })
                } else {
                    region.ids.contains(&self.shard.info().id)
                };
                if !matches {
                    continue;
                }

                let mut ctx = ctx.mark_tokens(range, region.search_type());
                let mut ctx = ctx.push_region(region);
                if ctx.all_tokens_used() {
                    self.emit(
                        &mut ctx,
                        region.locality.feature,
                        region.search_type(),
                        true,
                    );
                    continue;
                }

                match ty.narrower() {
                    Some(narrower) => self.match_regions(&mut ctx, narrower)?,
                    None => self.match_cities(&mut ctx)?,
                }
            }
        }
        Ok(())
    }

    fn match_cities(&mut self, ctx: &mut BaseContext<'q>) -> Result<()> {
        let _branch = trace_branch(self.tracer, Branch::MatchCities);

        let tables = self.tables;
        for (&range, cities) in &tables.cities {
            if ctx.has_used_tokens_in_range(range) {
                continue;
            }

            for city in cities {
                self.bail_if_cancelled()?;
                if let Some(region) = ctx.last_region()
                    && !self
                        .source
                        .point_in_regions(&city.rect.center(), &region.ids)
                {
                    continue;
                }

                let mut ctx = ctx.mark_tokens(range, city.search_type());
                let mut ctx = ctx.set_city(city);
                if ctx.all_tokens_used() {
                    self.emit_city(&mut ctx, city);
                    continue;
                }

                // Streets and POIs never live in the world shard.
                if self.is_world() {
                    continue;
                }

                let city_features = self.locality_rects.get(
                    self.shard,
                    &city.rect,
                    self.config.scale,
                );
                if city_features.is_empty() {
                    continue;
                }

                let emitted = ctx.num_emitted;
                let filter = FeaturesFilter::locality(city_features);
                self.with_filter(filter, |this| this.limited_search(&mut ctx))?;

                if ctx.num_emitted == emitted {
                    let _branch = trace_branch(self.tracer, Branch::Relaxed);
                    self.emit_city(&mut ctx, city);
                }
            }
        }
        Ok(())
    }

    fn match_around_pivot(&mut self, ctx: &mut BaseContext<'q>) -> Result<()> {
        let _branch = trace_branch(self.tracer, Branch::MatchAroundPivot);
        let features = self.pivot_rects.get(
            self.shard,
            &self.params.pivot,
            self.config.scale,
        );
        let filter =
            FeaturesFilter::viewport(features, self.sink.limit() as u64);
        self.with_filter(filter, |this| this.limited_search(ctx))
    }

    /// Everything below cities, under the current filter.
    fn limited_search(&mut self, ctx: &mut BaseContext<'q>) -> Result<()> {
        self.match_unclassified(ctx)?;
        self.match_postcodes(ctx)?;
        self.search(ctx)
    }

    fn search(&mut self, ctx: &mut BaseContext<'q>) -> Result<()> {
        self.greedily_match_streets(ctx)?;
        self.greedily_match_suburbs(ctx)?;
        let _branch = trace_branch(self.tracer, Branch::MatchPoisAndBuildings);
        self.match_pois_and_buildings(ctx, 0)
    }

    // -- Postcodes --

    fn match_postcodes(&mut self, ctx: &mut BaseContext<'q>) -> Result<()> {
        let _branch = trace_branch(self.tracer, Branch::MatchPostcodes);
        let num_tokens = ctx.num_tokens();

        for begin in 0..num_tokens {
            let mut ends = Vec::new();
            for len in 1..=self.config.max_postcode_tokens {
                let end = begin + len;
                if end > num_tokens || ctx.is_token_used(end - 1) {
                    break;
                }
                let range = TokenRange::new(begin, end);
                let is_prefix = self.params.range_ends_with_prefix(range);
                if looks_like_postcode(&self.params.join(range, " "), is_prefix)
                {
                    ends.push(end);
                }
            }

            // The longest look-alike run known to this shard or the world.
            let Some((range, postcode, features, world)) =
                ends.iter().rev().find_map(|&end| {
                    let range = TokenRange::new(begin, end);
                    let postcode = self.params.join(range, " ");
                    let (features, world) = self.retrieve_postcode(&postcode);
                    (!features.is_empty() || !world.is_empty())
                        .then_some((range, postcode, features, world))
                })
            else {
                continue;
            };
            self.bail_if_cancelled()?;

            let shard_id = self.shard.info().id;
            let city_has_postcode = ctx.city().is_some_and(|city| {
                let feature = city.locality.feature;
                if feature.shard == shard_id {
                    features.has_bit(feature.feature)
                } else {
                    world.has_bit(feature.feature)
                }
            });

            let mut ctx = ctx.mark_tokens(range, TokenType::Postcode);
            if ctx.all_tokens_used()
                && city_has_postcode
                && let Some(city) = ctx.city()
            {
                self.emit_city(&mut ctx, city);
                continue;
            }
            if features.is_empty() {
                continue;
            }

            trace!(%postcode, features = features.pop_count(), "postcode");
            self.with_postcodes(Postcodes { range, features }, |this| {
                this.search(&mut ctx)
            })?;
        }
        Ok(())
    }

    /// Features carrying `postcode` in this shard and in the world shard.
    fn retrieve_postcode(&self, postcode: &str) -> (Cbv, Cbv) {
        let local = self.shard.retrieve_postcode(postcode);
        let world = match self.world {
            Some(world) if !self.is_world() => {
                world.retrieve_postcode(postcode)
            }
            _ => Cbv::empty(),
        };
        (local, world)
    }

    // -- Streets and suburbs --

    fn greedily_match_streets(
        &mut self,
        ctx: &mut BaseContext<'q>,
    ) -> Result<()> {
        let _branch = trace_branch(self.tracer, Branch::MatchStreets);
        let Some(filter) = &self.filter else {
            return Ok(());
        };
        let predictions =
            streets_matcher::go(ctx, &ctx.streets, filter, self.params);

        for prediction in &predictions {
            self.bail_if_cancelled()?;
            self.create_streets_layer_and_match_lower_layers(ctx, prediction)?;
        }
        Ok(())
    }

    fn create_streets_layer_and_match_lower_layers(
        &mut self,
        ctx: &mut BaseContext<'q>,
        prediction: &Prediction,
    ) -> Result<()> {
        let range = prediction.range;
        let layer = self.make_layer(
            SearchType::Street,
            range,
            prediction.features.to_sorted_vec(),
        );
        let mut ctx = ctx.mark_tokens(range, SearchType::Street);
        let mut ctx = ctx.push_layer(layer);
        self.match_pois_and_buildings(&mut ctx, 0)
    }

    fn greedily_match_suburbs(
        &mut self,
        ctx: &mut BaseContext<'q>,
    ) -> Result<()> {
        let _branch = trace_branch(self.tracer, Branch::MatchSuburbs);
        let Some(filter) = &self.filter else {
            return Ok(());
        };
        let predictions =
            streets_matcher::go(ctx, &ctx.suburbs, filter, self.params);

        for prediction in &predictions {
            let suburbs: Vec<u32> = prediction
                .features
                .iter()
                .take(self.config.max_suburbs_per_prediction)
                .collect();
            for suburb in suburbs {
                self.bail_if_cancelled()?;
                self.match_in_suburb(ctx, prediction.range, suburb)?;
            }
        }
        Ok(())
    }

    /// Searches streets, POIs and buildings inside one suburb.
    fn match_in_suburb(
        &mut self,
        ctx: &mut BaseContext<'q>,
        range: TokenRange,
        suburb: u32,
    ) -> Result<()> {
        let rect = self.shard.locality_boundary(suburb).or_else(|| {
            self.shard.feature(suburb).and_then(|feature| feature.rect)
        });
        let Some(rect) = rect else {
            return Ok(());
        };
        let features =
            self.locality_rects.get(self.shard, &rect, self.config.scale);
        let allowed = self.apply_filter(&features);
        if allowed.is_empty() {
            return Ok(());
        }

        let layer = self.make_layer(SearchType::Suburb, range, vec![suburb]);
        let mut ctx = ctx.mark_tokens(range, SearchType::Suburb);
        let mut ctx = ctx.push_layer(layer);
        self.with_filter(FeaturesFilter::locality(allowed), |this| {
            this.greedily_match_streets(&mut ctx)?;
            this.match_pois_and_buildings(&mut ctx, 0)
        })
    }

    // -- POIs and buildings --

    fn match_pois_and_buildings(
        &mut self,
        ctx: &mut BaseContext<'q>,
        cur: usize,
    ) -> Result<()> {
        self.bail_if_cancelled()?;

        let cur = ctx.skip_used_tokens(cur);
        if cur == ctx.num_tokens() {
            return self.finish_interpretation(ctx);
        }

        let mut types: HashMap<u32, Option<SearchType>> = HashMap::new();
        let mut features = Cbv::full();

        for end in cur + 1..=ctx.num_tokens() {
            if ctx.is_token_used(end - 1) {
                break;
            }
            self.bail_if_cancelled()?;

            let range = TokenRange::new(cur, end);
            features = features.intersect(&ctx.features[end - 1].all);
            let filtered = self.apply_filter(&features);
            if filtered.is_full() {
                break;
            }

            let subquery = self.params.join(range, " ");
            let is_prefix = self.params.range_ends_with_prefix(range);
            let looks_like_house =
                looks_like_house_number(&subquery, is_prefix);
            if filtered.is_empty() && !looks_like_house {
                break;
            }

            let mut pois = Vec::new();
            let mut buildings = Vec::new();
            for id in filtered.iter() {
                if self
                    .postcodes
                    .as_ref()
                    .is_some_and(|p| !p.features.has_bit(id))
                {
                    continue;
                }
                let ty = *types
                    .entry(id)
                    .or_insert_with(|| self.search_type_of(&*ctx, id));
                match ty {
                    Some(SearchType::Poi) => pois.push(id),
                    Some(SearchType::Building) => buildings.push(id),
                    _ => {}
                }
            }

            for (ty, cluster) in
                [(SearchType::Poi, pois), (SearchType::Building, buildings)]
            {
                let delayed = cluster.is_empty();
                if delayed && !(ty == SearchType::Building && looks_like_house)
                {
                    continue;
                }

                let layer = FeaturesLayer::new(
                    ty,
                    range,
                    cluster,
                    subquery.clone(),
                    is_prefix,
                )
                .with_delayed_features(delayed);
                let mut ctx = ctx.push_layer(layer);
                if !is_layer_sequence_sane(ctx.layers()) {
                    continue;
                }
                let mut ctx = ctx.mark_tokens(range, ty);
                self.match_pois_and_buildings(&mut ctx, end)?;
            }
        }
        Ok(())
    }

    /// All tokens are consumed: emit what the layers (and postcode) agree
    /// on.
    fn finish_interpretation(
        &mut self,
        ctx: &mut BaseContext<'q>,
    ) -> Result<()> {
        let Some(postcodes) = &self.postcodes else {
            return self.find_paths(ctx);
        };
        let postcode_range = postcodes.range;
        let postcode_features = postcodes.features.clone();

        // A postcode alone: emit everything carrying it.
        if ctx.layers().is_empty() {
            let filtered = self.apply_filter(&postcode_features);
            if filtered.is_full() {
                return Ok(());
            }
            for id in filtered.iter() {
                self.bail_if_cancelled()?;
                if let Some(ty) = self.search_type_of(ctx, id) {
                    let feature = FeatureId::new(self.shard.info().id, id);
                    self.emit(ctx, feature, ty, true);
                }
            }
            return Ok(());
        }

        let only_street = matches!(
            ctx.layers(),
            [layer] if layer.search_type == SearchType::Street
        );
        if !only_street {
            return self.find_paths(ctx);
        }

        // A street and a postcode: emit the streets carrying the postcode,
        // then buildings with the postcode on those streets.
        let street = &ctx.layers()[0];
        let exact = ctx.exact_in_range(street.range);
        let streets: Vec<(u32, bool)> = street
            .sorted_features
            .iter()
            .filter(|&&id| postcode_features.has_bit(id))
            .map(|&id| (id, exact.has_bit(id)))
            .collect();
        for (id, exact) in streets {
            let feature = FeatureId::new(self.shard.info().id, id);
            self.emit(ctx, feature, SearchType::Street, exact);
        }

        // Matched by postcode rather than by its tokens, so this layer is
        // exempt from the token adjacency rule.
        let layer = self.make_layer(
            SearchType::Building,
            postcode_range,
            postcode_features.to_sorted_vec(),
        );
        let mut ctx = ctx.push_layer(layer);
        self.find_paths(&mut ctx)
    }

    fn find_paths(&mut self, ctx: &mut BaseContext<'q>) -> Result<()> {
        if ctx.layers().is_empty() {
            return Ok(());
        }
        let _branch = trace_branch(self.tracer, Branch::FindPaths);

        let mut sorted: Vec<&FeaturesLayer> = ctx.layers().iter().collect();
        sorted.sort_by_key(|layer| layer.search_type);
        let innermost_type = sorted[0].search_type;

        // A layer counts as exact when its feature came from the exact
        // index; house numbers and postcodes match literally.
        let postcode_range = self.postcodes.as_ref().map(|p| p.range);
        let exact_sets: Vec<Option<Cbv>> = sorted
            .iter()
            .map(|layer| {
                let literal = layer.has_delayed_features
                    || postcode_range == Some(layer.range);
                (!literal).then(|| ctx.exact_in_range(layer.range))
            })
            .collect();

        self.matcher.set_postcodes(
            self.postcodes.as_ref().map(|p| p.features.clone()),
        );
        let finder = PathFinder::new(self.cancel, self.config.max_paths);
        let mut found = Vec::new();
        finder.for_each_reachable_vertex(&mut *self.matcher, &sorted, |result| {
            let Some(innermost) = result.innermost_result() else {
                return Ok(());
            };
            let exact = sorted.iter().zip(&exact_sets).all(|(layer, exact)| {
                let id = match layer.search_type {
                    SearchType::Poi => result.poi,
                    SearchType::Building => result.building,
                    SearchType::Street => result.street,
                    SearchType::Suburb => result.suburb,
                    _ => None,
                };
                match (id, exact) {
                    (Some(id), Some(exact)) => exact.has_bit(id),
                    _ => true,
                }
            });
            found.push((innermost, exact));
            Ok(())
        })?;

        for (id, exact) in found {
            let feature = FeatureId::new(self.shard.info().id, id);
            self.emit(ctx, feature, innermost_type, exact);
        }
        Ok(())
    }

    // -- Unclassified --

    /// Matches the single run of unused tokens against unclassified
    /// features.
    fn match_unclassified(&mut self, ctx: &mut BaseContext<'q>) -> Result<()> {
        let _branch = trace_branch(self.tracer, Branch::MatchUnclassified);
        self.bail_if_cancelled()?;

        // Unused tokens must be adjacent: "london hyde park" may match
        // "hyde park" once london is a city, "park london hyde" may not.
        if ctx.num_unused_token_groups() != 1 {
            return Ok(());
        }

        let begin = ctx.skip_used_tokens(0);
        let mut end = begin;
        let mut features = Cbv::full();
        while end < ctx.num_tokens() && !ctx.is_token_used(end) {
            features = features.intersect(&ctx.features[end].all);
            end += 1;
        }
        let features = self.apply_filter(&features);
        if features.is_empty() || features.is_full() {
            return Ok(());
        }

        let range = TokenRange::new(begin, end);
        let exact = ctx.exact_in_range(range);
        let unclassified: Vec<u32> = features
            .iter()
            .filter(|&id| {
                self.search_type_of(&*ctx, id) == Some(SearchType::Unclassified)
            })
            .collect();
        if unclassified.is_empty() {
            return Ok(());
        }

        let mut ctx = ctx.mark_tokens(range, SearchType::Unclassified);
        for id in unclassified {
            let feature = FeatureId::new(self.shard.info().id, id);
            let is_exact = exact.has_bit(id);
            self.emit(&mut ctx, feature, SearchType::Unclassified, is_exact);
        }
        Ok(())
    }

    // -- Emission --

    fn emit_city(&mut self, ctx: &mut BaseContext<'q>, city: &City) {
        self.emit(ctx, city.locality.feature, city.search_type(), true);
    }

    /// Hands one result to the sink. `exact` covers the emitted feature's
    /// own layers; matched regions and the city are folded in here.
    fn emit(
        &mut self,
        ctx: &mut BaseContext<'q>,
        feature: FeatureId,
        search_type: SearchType,
        exact: bool,
    ) {
        let types = ctx.token_types();
        let regions = ctx.regions();
        let city = ctx.city();

        let used: Vec<usize> =
            (0..types.len()).filter(|&i| types[i].is_some()).collect();
        let info = PreRankingInfo {
            feature,
            search_type,
            token_ranges: token_ranges(types),
            city: city.map(|c| c.locality.feature),
            matched_country: regions
                .iter()
                .any(|r| r.region_type == RegionType::Country),
            matched_state: regions
                .iter()
                .any(|r| r.region_type == RegionType::State),
            all_tokens_used: ctx.all_tokens_used(),
            exact_match: exact
                && regions.iter().all(|r| r.exact_match)
                && city.is_none_or(|c| c.exact_match),
            is_common_match_only: !used.is_empty()
                && used.iter().all(|&i| self.params.is_common_token(i)),
        };

        trace!(?feature, %search_type, "emit");
        if let Some(tracer) = self.tracer {
            tracer.record_emit(feature, types);
        }
        self.sink.emplace(info);
        ctx.num_emitted += 1;
        self.num_emitted += 1;
    }
}
