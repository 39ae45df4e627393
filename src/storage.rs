//! Interfaces of the storage/indexing collaborator.
//!
//! The geocoder never reads shard files itself. Everything it needs from a
//! shard (inverted-index lookups, geometric retrieval, feature metadata,
//! adjacency tests) comes through these traits. [`crate::memory`] provides
//! an in-memory implementation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    cbv::Cbv,
    geometry::{Point, Rect},
    model::{LocalityType, SearchType},
};

pub type ShardId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardKind {
    /// The global shard holding countries, states and cities.
    World,
    Country,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub id: ShardId,
    pub name: String,
    pub kind: ShardKind,
    pub rect: Rect,
    #[serde(default = "default_true")]
    pub has_search_index: bool,
}

fn default_true() -> bool {
    true
}

impl ShardInfo {
    pub fn world(id: ShardId, name: impl Into<String>, rect: Rect) -> Self {
        Self {
            id,
            name: name.into(),
            kind: ShardKind::World,
            rect,
            has_search_index: true,
        }
    }

    pub fn country(id: ShardId, name: impl Into<String>, rect: Rect) -> Self {
        Self {
            kind: ShardKind::Country,
            ..Self::world(id, name, rect)
        }
    }

    pub fn is_world(&self) -> bool {
        self.kind == ShardKind::World
    }
}

/// A feature together with the shard it lives in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct FeatureId {
    pub shard: ShardId,
    pub feature: u32,
}

impl FeatureId {
    pub fn new(shard: ShardId, feature: u32) -> Self {
        Self { shard, feature }
    }
}

/// Metadata of a single feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub id: u32,
    pub search_type: SearchType,
    pub center: Point,
    /// Bounding rect of the feature geometry.
    #[serde(default)]
    pub rect: Option<Rect>,
    /// Names as `(language, name)` pairs; the first one is the default name.
    #[serde(default)]
    pub names: Vec<(String, String)>,
    #[serde(default)]
    pub locality_type: Option<LocalityType>,
    #[serde(default)]
    pub population: u64,
    #[serde(default)]
    pub rank: u8,
    #[serde(default)]
    pub house_number: Option<String>,
    #[serde(default)]
    pub postcodes: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Point features are the only ones accepted as regions and cities.
    #[serde(default = "default_true")]
    pub is_point: bool,
}

impl FeatureRecord {
    pub fn new(id: u32, search_type: SearchType, center: Point) -> Self {
        Self {
            id,
            search_type,
            center,
            rect: None,
            names: Vec::new(),
            locality_type: None,
            population: 0,
            rank: 0,
            house_number: None,
            postcodes: Vec::new(),
            categories: Vec::new(),
            is_point: true,
        }
    }

    /// Adds a name in the default language.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.with_name_in("default", name)
    }

    pub fn with_name_in(
        mut self,
        lang: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.names.push((lang.into(), name.into()));
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = Some(rect);
        self
    }

    pub fn with_locality_type(mut self, ty: LocalityType) -> Self {
        self.locality_type = Some(ty);
        self
    }

    pub fn with_population(mut self, population: u64) -> Self {
        self.population = population;
        self
    }

    pub fn with_rank(mut self, rank: u8) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_house_number(
        mut self,
        house_number: impl Into<String>,
    ) -> Self {
        self.house_number = Some(house_number.into());
        self
    }

    pub fn with_postcode(mut self, postcode: impl Into<String>) -> Self {
        self.postcodes.push(postcode.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn default_name(&self) -> Option<&str> {
        self.names.first().map(|(_, name)| name.as_str())
    }

    /// Name used to look up the shards of an administrative region: the
    /// default name, or the English one when the default is missing.
    pub fn affiliation_name(&self) -> Option<&str> {
        self.default_name()
            .filter(|name| !name.is_empty())
            .or_else(|| self.name_in("en"))
    }

    pub fn name_in(&self, lang: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|(l, name)| l == lang && !name.is_empty())
            .map(|(_, name)| name.as_str())
    }

    pub fn locality_type(&self) -> Option<LocalityType> {
        self.locality_type
            .or_else(|| LocalityType::from_search_type(self.search_type))
    }
}

/// Result of an inverted-index lookup for one token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenCandidates {
    /// Every feature matching the token, fuzzy matches included.
    pub all: Cbv,
    /// The subset matched without any fuzziness.
    pub exact: Cbv,
}

impl TokenCandidates {
    pub fn new(all: Cbv, exact: Cbv) -> Self {
        Self { all, exact }
    }

    pub fn union(&self, other: &TokenCandidates) -> TokenCandidates {
        Self::new(self.all.union(&other.all), self.exact.union(&other.exact))
    }

    pub fn intersect(&self, other: &Cbv) -> TokenCandidates {
        Self::new(self.all.intersect(other), self.exact.intersect(other))
    }
}

/// A (type, feature) vertex of a features layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerFeature {
    pub search_type: SearchType,
    pub id: u32,
}

impl LayerFeature {
    pub fn new(search_type: SearchType, id: u32) -> Self {
        Self { search_type, id }
    }
}

/// Read-only access to one shard's indices.
pub trait Shard: Send + Sync {
    fn info(&self) -> &ShardInfo;

    /// Inverted-index lookup of a query token. When `is_prefix` is set the
    /// token may be an incomplete word.
    fn retrieve_candidates(&self, token: &str, is_prefix: bool)
    -> TokenCandidates;

    /// Every feature indexed under a category key.
    fn retrieve_category(&self, category: &str) -> Cbv;

    /// Features carrying the given postcode.
    fn retrieve_postcode(&self, postcode: &str) -> Cbv;

    /// Features whose geometry lies in `rect` at the given scale.
    fn retrieve_in_rect(&self, rect: &Rect, scale: u8) -> Cbv;

    fn feature(&self, id: u32) -> Option<FeatureRecord>;

    /// External rank of a feature; zero when unknown.
    fn rank(&self, id: u32) -> u8 {
        self.feature(id).map_or(0, |f| f.rank)
    }

    /// Bounding rect of the explicit boundary of a locality, if known.
    fn locality_boundary(&self, id: u32) -> Option<Rect>;

    /// Geometric/topological adjacency between a feature of an inner layer
    /// (`child`) and a feature of an outer layer (`parent`): a POI on a
    /// street, a building in a suburb, and so on.
    fn is_adjacent(&self, child: LayerFeature, parent: LayerFeature) -> bool;

    /// Buildings on `street` whose house number matches `house_number`.
    fn houses_on_street(&self, street: u32, house_number: &str) -> Vec<u32>;
}

/// Pins a shard's data for the duration of one pass.
pub type ShardHandle = Arc<dyn Shard>;

/// The set of shards, plus country-containment knowledge.
pub trait DataSource: Send + Sync {
    fn shard_infos(&self) -> Vec<ShardInfo>;

    /// Returns `None` when the shard is gone.
    fn acquire(&self, id: ShardId) -> Option<ShardHandle>;

    /// Shards belonging to the administrative region named `affiliation`.
    fn matched_regions(&self, affiliation: &str) -> Vec<ShardId>;

    /// Whether `point` lies inside any of the given regions' shards.
    fn point_in_regions(&self, point: &Point, regions: &[ShardId]) -> bool;
}
