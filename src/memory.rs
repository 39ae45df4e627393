//! In-memory storage collaborator.
//!
//! Shards are plain lists of [`FeatureRecord`]s plus a few relations
//! (explicit adjacency links, locality boundaries, the region names a
//! shard belongs to). Indices are built once when a shard is created.
//! The whole corpus can be loaded from JSON.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::Path,
    sync::Arc,
};

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    cbv::Cbv,
    error::{Error, Result},
    geometry::{Point, Rect},
    model::SearchType,
    storage::{
        DataSource, FeatureRecord, LayerFeature, Shard, ShardHandle, ShardId,
        ShardInfo, TokenCandidates,
    },
};

/// Query tokens at least this long also match names one edit away.
const MIN_FUZZY_TOKEN_LEN: usize = 5;

/// Serializable contents of one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryShardData {
    pub info: ShardInfo,
    #[serde(default)]
    pub features: Vec<FeatureRecord>,
    /// Explicit locality boundaries, by feature id.
    #[serde(default)]
    pub boundaries: Vec<(u32, Rect)>,
    /// Adjacency links as `(child, parent)` feature ids.
    #[serde(default)]
    pub links: Vec<(u32, u32)>,
    /// Names of the administrative regions this shard belongs to.
    #[serde(default)]
    pub affiliations: Vec<String>,
}

impl MemoryShardData {
    pub fn new(info: ShardInfo) -> Self {
        Self {
            info,
            features: Vec::new(),
            boundaries: Vec::new(),
            links: Vec::new(),
            affiliations: Vec::new(),
        }
    }

    pub fn with_feature(mut self, feature: FeatureRecord) -> Self {
        self.features.push(feature);
        self
    }

    pub fn with_link(mut self, child: u32, parent: u32) -> Self {
        self.links.push((child, parent));
        self
    }

    pub fn with_boundary(mut self, id: u32, rect: Rect) -> Self {
        self.boundaries.push((id, rect));
        self
    }

    pub fn with_affiliation(mut self, name: impl Into<String>) -> Self {
        self.affiliations.push(name.into());
        self
    }
}

fn normalize_postcode(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn normalize_house_number(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Edit distance between two strings, in chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut dp: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut prev = dp[0];
        dp[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let temp = dp[j + 1];
            dp[j + 1] = if ca == cb {
                prev
            } else {
                1 + prev.min(dp[j]).min(dp[j + 1])
            };
            prev = temp;
        }
    }
    dp[b.len()]
}

pub struct MemoryShard {
    info: ShardInfo,
    affiliations: Vec<String>,
    features: BTreeMap<u32, FeatureRecord>,
    tokens: BTreeMap<String, RoaringBitmap>,
    categories: HashMap<String, RoaringBitmap>,
    postcodes: HashMap<String, RoaringBitmap>,
    boundaries: HashMap<u32, Rect>,
    links: HashSet<(u32, u32)>,
}

impl MemoryShard {
    pub fn new(data: MemoryShardData) -> Self {
        let mut tokens: BTreeMap<String, RoaringBitmap> = BTreeMap::new();
        let mut categories: HashMap<String, RoaringBitmap> = HashMap::new();
        let mut postcodes: HashMap<String, RoaringBitmap> = HashMap::new();

        for feature in &data.features {
            for (_, name) in &feature.names {
                for token in name.split_whitespace() {
                    tokens
                        .entry(token.to_lowercase())
                        .or_default()
                        .insert(feature.id);
                }
            }
            categories
                .entry(feature.search_type.category_key().to_string())
                .or_default()
                .insert(feature.id);
            for category in &feature.categories {
                categories
                    .entry(category.clone())
                    .or_default()
                    .insert(feature.id);
            }
            for postcode in &feature.postcodes {
                postcodes
                    .entry(normalize_postcode(postcode))
                    .or_default()
                    .insert(feature.id);
            }
        }

        debug!(
            shard = %data.info.name,
            features = data.features.len(),
            tokens = tokens.len(),
            "built in-memory shard"
        );

        Self {
            features: data.features.into_iter().map(|f| (f.id, f)).collect(),
            boundaries: data.boundaries.into_iter().collect(),
            links: data.links.into_iter().collect(),
            affiliations: data.affiliations,
            info: data.info,
            tokens,
            categories,
            postcodes,
        }
    }

    fn extent(&self, id: u32) -> Option<Rect> {
        self.boundaries
            .get(&id)
            .copied()
            .or_else(|| self.features.get(&id).and_then(|f| f.rect))
    }

    fn center(&self, id: u32) -> Option<Point> {
        self.features.get(&id).map(|f| f.center)
    }

    fn is_linked(&self, a: u32, b: u32) -> bool {
        self.links.contains(&(a, b)) || self.links.contains(&(b, a))
    }
}

impl Shard for MemoryShard {
    fn info(&self) -> &ShardInfo {
        &self.info
    }

    fn retrieve_candidates(
        &self,
        token: &str,
        is_prefix: bool,
    ) -> TokenCandidates {
        let token = token.to_lowercase();
        let exact = self.tokens.get(&token).cloned().unwrap_or_default();
        let mut all = exact.clone();

        if is_prefix {
            for (_, ids) in self
                .tokens
                .range(token.clone()..)
                .take_while(|(key, _)| key.starts_with(&token))
            {
                all |= ids;
            }
        }

        let len = token.chars().count();
        if len >= MIN_FUZZY_TOKEN_LEN {
            for (key, ids) in &self.tokens {
                if key.chars().count().abs_diff(len) <= 1
                    && levenshtein(key, &token) == 1
                {
                    all |= ids;
                }
            }
        }

        TokenCandidates::new(Cbv::from_bitmap(all), Cbv::from_bitmap(exact))
    }

    fn retrieve_category(&self, category: &str) -> Cbv {
        self.categories
            .get(category)
            .cloned()
            .map_or(Cbv::empty(), Cbv::from_bitmap)
    }

    fn retrieve_postcode(&self, postcode: &str) -> Cbv {
        self.postcodes
            .get(&normalize_postcode(postcode))
            .cloned()
            .map_or(Cbv::empty(), Cbv::from_bitmap)
    }

    /// Scale is ignored: every feature is visible at every scale.
    fn retrieve_in_rect(&self, rect: &Rect, _scale: u8) -> Cbv {
        self.features
            .values()
            .filter(|f| {
                rect.contains(&f.center)
                    || f.rect.is_some_and(|r| r.intersects(rect))
            })
            .map(|f| f.id)
            .collect()
    }

    fn feature(&self, id: u32) -> Option<FeatureRecord> {
        self.features.get(&id).cloned()
    }

    fn locality_boundary(&self, id: u32) -> Option<Rect> {
        self.boundaries.get(&id).copied()
    }

    /// Linked features are adjacent. Anything is also adjacent to a
    /// suburb or locality whose extent contains its center.
    fn is_adjacent(&self, child: LayerFeature, parent: LayerFeature) -> bool {
        if self.is_linked(child.id, parent.id) {
            return true;
        }
        match parent.search_type {
            SearchType::Suburb | SearchType::Village | SearchType::City => {
                match (self.extent(parent.id), self.center(child.id)) {
                    (Some(extent), Some(center)) => extent.contains(&center),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    fn houses_on_street(&self, street: u32, house_number: &str) -> Vec<u32> {
        let wanted = normalize_house_number(house_number);
        self.features
            .values()
            .filter(|f| {
                f.search_type == SearchType::Building
                    && f.house_number
                        .as_deref()
                        .is_some_and(|hn| normalize_house_number(hn) == wanted)
                    && self.is_linked(f.id, street)
            })
            .map(|f| f.id)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MemorySourceData {
    shards: Vec<MemoryShardData>,
}

/// A [`DataSource`] over in-memory shards.
#[derive(Default)]
pub struct MemorySource {
    shards: BTreeMap<ShardId, Arc<MemoryShard>>,
}

impl MemorySource {
    pub fn new(shards: impl IntoIterator<Item = MemoryShardData>) -> Self {
        let shards = shards
            .into_iter()
            .map(|data| (data.info.id, Arc::new(MemoryShard::new(data))))
            .collect();
        Self { shards }
    }

    /// Parses `{"shards": [...]}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let data: MemorySourceData = serde_json::from_str(json)?;
        Ok(Self::new(data.shards))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn shard_by_name(&self, name: &str) -> Result<ShardHandle> {
        self.shards
            .values()
            .find(|s| s.info.name == name)
            .map(|s| Arc::clone(s) as ShardHandle)
            .ok_or_else(|| Error::NotFound {
                kind: "shard",
                name: name.to_string(),
            })
    }
}

impl DataSource for MemorySource {
    fn shard_infos(&self) -> Vec<ShardInfo> {
        self.shards.values().map(|s| s.info.clone()).collect()
    }

    fn acquire(&self, id: ShardId) -> Option<ShardHandle> {
        self.shards.get(&id).map(|s| Arc::clone(s) as ShardHandle)
    }

    fn matched_regions(&self, affiliation: &str) -> Vec<ShardId> {
        self.shards
            .values()
            .filter(|s| {
                !s.info.is_world()
                    && s.affiliations
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(affiliation))
            })
            .map(|s| s.info.id)
            .collect()
    }

    fn point_in_regions(&self, point: &Point, regions: &[ShardId]) -> bool {
        regions.iter().any(|id| {
            self.shards
                .get(id)
                .is_some_and(|s| s.info.rect.contains(point))
        })
    }
}
