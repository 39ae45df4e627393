//! geocoder - a layered, backtracking token-matching geocoder over regional
//! map shards.
//!
//! A query is split into tokens and matched against a world shard holding
//! countries, states and cities, then against every regional shard for
//! streets, suburbs, buildings and POIs. Candidate interpretations are
//! checked for geometric consistency and handed to a [`PreRanker`].
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//!
//! use geocoder::{
//!     CollectingPreRanker, FeatureRecord, Geocoder, GeocoderConfig,
//!     MemoryShardData, MemorySource, Never, Point, QueryParams, Rect,
//!     SearchType, ShardInfo,
//! };
//!
//! let world = MemoryShardData::new(ShardInfo::world(
//!     0,
//!     "World",
//!     Rect::new(-1e6, -1e6, 1e6, 1e6),
//! ))
//! .with_feature(
//!     FeatureRecord::new(1, SearchType::City, Point::new(0.0, 0.0))
//!         .with_name("Paris")
//!         .with_population(2_000_000),
//! );
//! let source = Arc::new(MemorySource::new([world]));
//!
//! let mut geocoder = Geocoder::new(source, GeocoderConfig::default());
//! let mut ranker = CollectingPreRanker::new(10);
//! let pivot = Rect::new(-10.0, -10.0, 10.0, 10.0);
//! let params = QueryParams::parse("paris ", pivot);
//!
//! let stats = geocoder.go(&params, &mut ranker, &Never, None).unwrap();
//! assert!(!stats.cancelled);
//! assert_eq!(ranker.results()[0].search_type, SearchType::City);
//! ```

pub mod base_context;
pub mod cancel;
pub mod cbv;
pub mod config;
pub mod error;
pub mod features_filter;
pub mod features_layer;
pub mod geocoder;
pub mod geometry;
pub mod house_numbers;
pub mod layer_matcher;
pub mod locality;
pub mod locality_scorer;
pub mod logging;
pub mod memory;
pub mod model;
pub mod path_finder;
pub mod pool;
pub mod postcodes;
pub mod pre_ranking;
pub mod query;
pub mod rect_cache;
pub mod storage;
pub mod streets_matcher;
pub mod token_range;
pub mod tracer;

pub use cancel::{CancelFlag, Cancellable, Never};
pub use cbv::Cbv;
pub use config::GeocoderConfig;
pub use error::{Error, Result};
pub use geocoder::{Geocoder, GoStats};
pub use geometry::{Point, Rect};
pub use memory::{MemoryShardData, MemorySource};
pub use model::{LocalityType, RegionType, SearchType, TokenType};
pub use pre_ranking::{CollectingPreRanker, PreRanker, PreRankingInfo};
pub use query::{Mode, QueryParams, QueryToken};
pub use storage::{
    DataSource, FeatureId, FeatureRecord, Shard, ShardHandle, ShardId,
    ShardInfo, ShardKind,
};
pub use token_range::TokenRange;
pub use tracer::{Branch, TraceEvent, Tracer};
