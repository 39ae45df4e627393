//! Batch geocoding on the rayon thread pool.

use std::sync::Arc;

use rayon::prelude::*;

use crate::{
    cancel::Never,
    config::GeocoderConfig,
    error::Result,
    geocoder::Geocoder,
    pre_ranking::{CollectingPreRanker, PreRankingInfo},
    query::QueryParams,
    storage::DataSource,
};

/// Geocodes every query in parallel and returns the collected results in
/// query order.
///
/// Each worker thread owns its own [`Geocoder`] and caches; only `source`
/// is shared.
pub fn geocode_batch(
    source: Arc<dyn DataSource>,
    config: &GeocoderConfig,
    queries: &[QueryParams],
    limit: usize,
) -> Result<Vec<Vec<PreRankingInfo>>> {
    config.validate()?;
    queries
        .par_iter()
        .map_init(
            || Geocoder::new(Arc::clone(&source), config.clone()),
            |geocoder, params| -> Result<Vec<PreRankingInfo>> {
                let mut ranker = CollectingPreRanker::new(limit);
                geocoder.go(params, &mut ranker, &Never, None)?;
                Ok(ranker.into_results())
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geometry::{Point, Rect},
        memory::{MemoryShardData, MemorySource},
        model::SearchType,
        storage::{FeatureRecord, ShardInfo},
    };

    fn source() -> Arc<dyn DataSource> {
        let world = MemoryShardData::new(ShardInfo::world(
            0,
            "World",
            Rect::new(-1e6, -1e6, 1e6, 1e6),
        ))
        .with_feature(
            FeatureRecord::new(1, SearchType::City, Point::new(0.0, 0.0))
                .with_name("Lyon")
                .with_population(500_000),
        )
        .with_feature(
            FeatureRecord::new(2, SearchType::City, Point::new(5e5, 5e5))
                .with_name("Nantes")
                .with_population(300_000),
        );
        Arc::new(MemorySource::new([world]))
    }

    #[test]
    fn results_come_back_in_query_order() {
        let pivot = Rect::new(-100.0, -100.0, 100.0, 100.0);
        let queries: Vec<QueryParams> = ["nantes ", "lyon ", "nowhere "]
            .iter()
            .map(|q| QueryParams::parse(q, pivot))
            .collect();

        let results =
            geocode_batch(source(), &GeocoderConfig::default(), &queries, 10)
                .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0][0].feature.feature, 2);
        assert_eq!(results[1][0].feature.feature, 1);
        assert!(results[2].is_empty());
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = GeocoderConfig {
            max_paths: 0,
            ..GeocoderConfig::default()
        };
        assert!(geocode_batch(source(), &config, &[], 10).is_err());
    }
}
