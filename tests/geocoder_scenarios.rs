use std::sync::Arc;

use geocoder::{
    Branch, CancelFlag, CollectingPreRanker, FeatureId, FeatureRecord,
    Geocoder, GeocoderConfig, MemoryShardData, MemorySource, Mode, Never,
    Point, PreRankingInfo, QueryParams, Rect, SearchType, ShardInfo,
    TokenRange, TokenType, TraceEvent, Tracer,
};

const WORLD: u32 = 0;
const FRANCE: u32 = 1;
const UK: u32 = 2;

const PARIS: FeatureId = FeatureId { shard: WORLD, feature: 2 };
const CHAMPS_ELYSEES: FeatureId = FeatureId { shard: FRANCE, feature: 10 };
const NUMBER_5: FeatureId = FeatureId { shard: FRANCE, feature: 11 };
const HYDE_PARK: FeatureId = FeatureId { shard: UK, feature: 20 };
const DOWNING_STREET_10: FeatureId = FeatureId { shard: UK, feature: 21 };

fn shards() -> Vec<MemoryShardData> {
    let world = MemoryShardData::new(ShardInfo::world(
        WORLD,
        "World",
        Rect::new(-1e7, -1e7, 1e7, 1e7),
    ))
    .with_feature(
        FeatureRecord::new(1, SearchType::Country, Point::new(0.0, 0.0))
            .with_name("France"),
    )
    .with_feature(
        FeatureRecord::new(2, SearchType::City, Point::new(0.0, 0.0))
            .with_name("Paris")
            .with_population(2_000_000),
    )
    .with_feature(
        FeatureRecord::new(3, SearchType::City, Point::new(1e6, 0.0))
            .with_name("London")
            .with_population(8_000_000),
    )
    .with_boundary(2, Rect::new(-5_000.0, -5_000.0, 5_000.0, 5_000.0))
    .with_boundary(3, Rect::new(995_000.0, -5_000.0, 1_005_000.0, 5_000.0));

    let france = MemoryShardData::new(ShardInfo::country(
        FRANCE,
        "France",
        Rect::new(-5e5, -5e5, 5e5, 5e5),
    ))
    .with_affiliation("France")
    .with_feature(
        FeatureRecord::new(10, SearchType::Street, Point::new(100.0, 100.0))
            .with_name("Avenue des Champs-Elysees")
            .with_postcode("75008"),
    )
    .with_feature(
        FeatureRecord::new(11, SearchType::Building, Point::new(110.0, 110.0))
            .with_house_number("5")
            .with_postcode("75008"),
    )
    .with_feature(
        FeatureRecord::new(12, SearchType::Building, Point::new(120.0, 120.0))
            .with_house_number("7"),
    )
    .with_link(11, 10)
    .with_link(12, 10);

    let uk = MemoryShardData::new(ShardInfo::country(
        UK,
        "United Kingdom",
        Rect::new(5e5, -5e5, 1.5e6, 5e5),
    ))
    .with_affiliation("United Kingdom")
    .with_feature(
        FeatureRecord::new(
            20,
            SearchType::Unclassified,
            Point::new(1_000_100.0, 100.0),
        )
        .with_name("Hyde Park"),
    )
    .with_feature(
        FeatureRecord::new(
            21,
            SearchType::Building,
            Point::new(1_000_200.0, 100.0),
        )
        .with_postcode("SW1A 2AA"),
    );

    vec![world, france, uk]
}

fn paris_pivot() -> Rect {
    Rect::new(-1_000.0, -1_000.0, 1_000.0, 1_000.0)
}

fn london_pivot() -> Rect {
    Rect::new(999_000.0, -1_000.0, 1_001_000.0, 1_000.0)
}

fn geocoder() -> Geocoder {
    Geocoder::new(
        Arc::new(MemorySource::new(shards())),
        GeocoderConfig::default(),
    )
}

fn run(query: &str) -> Vec<PreRankingInfo> {
    run_around(query, paris_pivot())
}

fn run_around(query: &str, pivot: Rect) -> Vec<PreRankingInfo> {
    let params = QueryParams::parse(query, pivot);
    let mut ranker = CollectingPreRanker::new(20);
    let stats = geocoder().go(&params, &mut ranker, &Never, None).unwrap();
    assert!(!stats.cancelled);
    assert!(ranker.is_finished());
    ranker.into_results()
}

fn find(results: &[PreRankingInfo], feature: FeatureId) -> &PreRankingInfo {
    results
        .iter()
        .find(|r| r.feature == feature)
        .unwrap_or_else(|| panic!("{feature:?} not emitted: {results:#?}"))
}

#[test]
fn single_city_token() {
    let results = run("Paris ");

    assert_eq!(results.len(), 1);
    let paris = &results[0];
    assert_eq!(paris.feature, PARIS);
    assert_eq!(paris.search_type, SearchType::City);
    assert!(paris.all_tokens_used);
    assert!(paris.exact_match);
    assert_eq!(
        paris.token_range(SearchType::City),
        Some(TokenRange::new(0, 1))
    );
}

#[test]
fn house_number_on_street() {
    let tracer = Tracer::new();
    let params =
        QueryParams::parse("5 avenue des champs-elysees", paris_pivot());
    let mut ranker = CollectingPreRanker::new(20);
    geocoder()
        .go(&params, &mut ranker, &Never, Some(&tracer))
        .unwrap();
    let results = ranker.into_results();

    let building = find(&results, NUMBER_5);
    assert_eq!(building.search_type, SearchType::Building);
    assert!(building.all_tokens_used);
    assert!(building.exact_match);
    assert_eq!(
        building.token_range(SearchType::Building),
        Some(TokenRange::new(0, 1))
    );
    assert_eq!(
        building.token_range(SearchType::Street),
        Some(TokenRange::new(1, 4))
    );
    assert!(
        results.iter().all(|r| r.feature.feature != 12),
        "house 7 must not match"
    );

    let provenance = tracer.provenance();
    let emitted = provenance
        .iter()
        .find(|p| p.feature == NUMBER_5)
        .unwrap();
    assert!(emitted.branches.contains(&Branch::FindPaths));
    assert_eq!(
        emitted.tokens,
        vec![
            Some(TokenType::Search(SearchType::Building)),
            Some(TokenType::Search(SearchType::Street)),
            Some(TokenType::Search(SearchType::Street)),
            Some(TokenType::Search(SearchType::Street)),
        ]
    );
}

#[test]
fn postcode_restricts_city_search() {
    let results = run("75008 paris ");

    let mut features: Vec<FeatureId> =
        results.iter().map(|r| r.feature).collect();
    features.sort();
    assert_eq!(features, vec![CHAMPS_ELYSEES, NUMBER_5]);

    for result in &results {
        assert_eq!(result.city, Some(PARIS));
        assert!(result.all_tokens_used);
        assert_eq!(
            result.token_range(TokenType::Postcode),
            Some(TokenRange::new(0, 1))
        );
        assert_eq!(
            result.token_range(SearchType::City),
            Some(TokenRange::new(1, 2))
        );
    }
    assert_eq!(find(&results, CHAMPS_ELYSEES).search_type, SearchType::Street);
    assert_eq!(find(&results, NUMBER_5).search_type, SearchType::Building);
}

#[test]
fn postcode_and_street_apart_still_find_the_building() {
    let results = run("75008 paris champs-elysees ");

    let mut features: Vec<FeatureId> =
        results.iter().map(|r| r.feature).collect();
    features.sort();
    assert_eq!(features, vec![CHAMPS_ELYSEES, NUMBER_5]);

    let building = find(&results, NUMBER_5);
    assert_eq!(building.search_type, SearchType::Building);
    assert!(building.all_tokens_used);
    assert!(building.exact_match);
    assert_eq!(building.city, Some(PARIS));
    assert_eq!(
        building.token_range(TokenType::Postcode),
        Some(TokenRange::new(0, 1))
    );
    assert_eq!(
        building.token_range(SearchType::Street),
        Some(TokenRange::new(2, 3))
    );
}

#[test]
fn multi_token_postcode() {
    for query in ["sw1a 2aa ", "sw1a2aa "] {
        let results = run_around(query, london_pivot());

        assert_eq!(results.len(), 1, "{query}: {results:#?}");
        let house = &results[0];
        assert_eq!(house.feature, DOWNING_STREET_10);
        assert_eq!(house.search_type, SearchType::Building);
        assert!(house.all_tokens_used);
        let tokens = query.split_whitespace().count();
        assert_eq!(
            house.token_range(TokenType::Postcode),
            Some(TokenRange::new(0, tokens))
        );
    }
}

#[test]
fn cancellation_after_region_matching_unwinds_the_context() {
    let tracer = Tracer::new();
    let cancel = || tracer.has_left(Branch::MatchRegions);
    let params = QueryParams::parse("paris ", paris_pivot());
    let mut ranker = CollectingPreRanker::new(20);

    let stats = geocoder()
        .go(&params, &mut ranker, &cancel, Some(&tracer))
        .unwrap();
    assert!(stats.cancelled);
    assert!(ranker.is_finished());

    let events = tracer.events();
    let cancelled_at = events
        .iter()
        .position(|e| *e == TraceEvent::Leave(Branch::MatchRegions))
        .unwrap();
    assert!(
        events[..cancelled_at]
            .iter()
            .any(|e| matches!(e, TraceEvent::Emit(_))),
        "region matching emits before the cancellation point"
    );
    assert!(
        !events[cancelled_at..]
            .iter()
            .any(|e| matches!(e, TraceEvent::Emit(_))),
        "no emission after cancellation"
    );

    let done: Vec<&TraceEvent> = events
        .iter()
        .filter(|e| matches!(e, TraceEvent::ShardDone { .. }))
        .collect();
    assert_eq!(
        done,
        vec![&TraceEvent::ShardDone {
            shard: WORLD,
            residual_layers: 0,
            residual_marks: 0,
        }]
    );
    assert_eq!(ranker.results()[0].feature, PARIS);
}

#[test]
fn cancelled_before_start_emits_nothing() {
    let flag = CancelFlag::new();
    flag.cancel();
    let params = QueryParams::parse("paris ", paris_pivot());
    let mut ranker = CollectingPreRanker::new(20);

    let stats = geocoder().go(&params, &mut ranker, &flag, None).unwrap();
    assert!(stats.cancelled);
    assert_eq!(stats.shards_processed, 0);
    assert!(ranker.results().is_empty());
    assert!(ranker.is_finished());
}

#[test]
fn runs_are_deterministic() {
    let params =
        QueryParams::parse("5 avenue des champs-elysees", paris_pivot());
    let mut geocoder = geocoder();

    let mut first = CollectingPreRanker::new(20);
    geocoder.go(&params, &mut first, &Never, None).unwrap();
    geocoder.clear_caches();
    let mut second = CollectingPreRanker::new(20);
    geocoder.go(&params, &mut second, &Never, None).unwrap();

    assert!(!first.results().is_empty());
    assert_eq!(first.results(), second.results());
}

#[test]
fn unclassified_needs_adjacent_unused_tokens() {
    let results = run("london hyde park ");
    let park = find(&results, HYDE_PARK);
    assert_eq!(park.search_type, SearchType::Unclassified);
    assert_eq!(
        park.token_range(SearchType::Unclassified),
        Some(TokenRange::new(1, 3))
    );
    assert_eq!(park.token_range(SearchType::City), Some(TokenRange::new(0, 1)));

    let results = run("park london hyde ");
    assert!(
        results
            .iter()
            .all(|r| r.search_type != SearchType::Unclassified),
        "{results:#?}"
    );
}

#[test]
fn viewport_mode_skips_distant_shards() {
    let tracer = Tracer::new();
    let params =
        QueryParams::parse("5 avenue des champs-elysees", paris_pivot())
            .with_mode(Mode::Viewport);
    let mut ranker = CollectingPreRanker::new(20);

    let stats = geocoder()
        .go(&params, &mut ranker, &Never, Some(&tracer))
        .unwrap();

    assert_eq!(stats.shards_processed, 2);
    assert!(tracer.events().contains(&TraceEvent::Enter(Branch::GoInViewport)));
    find(ranker.results(), NUMBER_5);
}

#[test]
fn shards_without_search_index_are_skipped() {
    let mut shards = shards();
    shards[2].info.has_search_index = false;
    let mut geocoder = Geocoder::new(
        Arc::new(MemorySource::new(shards)),
        GeocoderConfig::default(),
    );
    let params = QueryParams::parse("london hyde park ", paris_pivot());
    let mut ranker = CollectingPreRanker::new(20);

    let stats = geocoder.go(&params, &mut ranker, &Never, None).unwrap();

    assert_eq!(stats.shards_skipped, 1);
    assert!(ranker.results().iter().all(|r| r.feature != HYDE_PARK));
}

#[test]
fn fixtures_and_config_load_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let source_path = tmp.path().join("shards.json");
    let config_path = tmp.path().join("geocoder.json");
    std::fs::write(
        &source_path,
        serde_json::json!({ "shards": shards() }).to_string(),
    )
    .unwrap();
    std::fs::write(&config_path, r#"{"max_num_cities": 1}"#).unwrap();

    let source = MemorySource::from_path(&source_path).unwrap();
    let config = GeocoderConfig::resolve(Some(&config_path)).unwrap();
    assert_eq!(config.max_num_cities, 1);

    let mut geocoder = Geocoder::new(Arc::new(source), config);
    let params = QueryParams::parse("paris ", paris_pivot());
    let mut ranker = CollectingPreRanker::new(20);
    geocoder.go(&params, &mut ranker, &Never, None).unwrap();

    assert_eq!(ranker.results().len(), 1);
    assert_eq!(ranker.results()[0].feature, PARIS);
}
