//! Per-shard adjacency tests between features of neighbouring layers.

use std::collections::HashMap;

use tracing::trace;

use crate::{
    cbv::Cbv,
    model::SearchType,
    storage::{LayerFeature, ShardHandle, ShardId},
};

/// Caches the storage collaborator's adjacency and house-number answers for
/// one shard. Kept by the geocoder across queries; the shard handle itself
/// is only held between [`set_context`](Self::set_context) and
/// [`on_query_finished`](Self::on_query_finished).
pub struct FeaturesLayerMatcher {
    shard_id: ShardId,
    shard: Option<ShardHandle>,
    adjacency: HashMap<(LayerFeature, LayerFeature), bool>,
    houses: HashMap<(u32, String), Vec<u32>>,
    postcodes: Option<Cbv>,
}

impl FeaturesLayerMatcher {
    pub fn new(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            shard: None,
            adjacency: HashMap::new(),
            houses: HashMap::new(),
            postcodes: None,
        }
    }

    pub fn set_context(&mut self, shard: ShardHandle) {
        debug_assert_eq!(shard.info().id, self.shard_id);
        self.shard = Some(shard);
    }

    /// Restricts buildings and POIs to those carrying a matched postcode.
    pub fn set_postcodes(&mut self, postcodes: Option<Cbv>) {
        self.postcodes = postcodes;
    }

    /// Releases the shard handle; cached answers are kept.
    pub fn on_query_finished(&mut self) {
        self.shard = None;
        self.postcodes = None;
    }

    fn passes_postcodes(&self, feature: LayerFeature) -> bool {
        match (&self.postcodes, feature.search_type) {
            (Some(postcodes), SearchType::Poi | SearchType::Building) => {
                postcodes.has_bit(feature.id)
            }
            _ => true,
        }
    }

    /// Whether `child` (inner layer) lies on or in `parent` (outer layer).
    pub fn is_adjacent(
        &mut self,
        child: LayerFeature,
        parent: LayerFeature,
    ) -> bool {
        if !self.passes_postcodes(child) {
            return false;
        }
        if let Some(&cached) = self.adjacency.get(&(child, parent)) {
            return cached;
        }
        let Some(shard) = &self.shard else {
            return false;
        };
        let adjacent = shard.is_adjacent(child, parent);
        self.adjacency.insert((child, parent), adjacent);
        adjacent
    }

    /// Buildings on `street` with the given house number.
    pub fn houses_on_street(
        &mut self,
        street: u32,
        house_number: &str,
    ) -> Vec<u32> {
        let key = (street, house_number.to_string());
        let houses = match self.houses.get(&key) {
            Some(houses) => houses.clone(),
            None => {
                let Some(shard) = &self.shard else {
                    return Vec::new();
                };
                let houses = shard.houses_on_street(street, house_number);
                trace!(
                    shard = self.shard_id,
                    street,
                    house_number,
                    found = houses.len(),
                    "looked up houses"
                );
                self.houses.insert(key, houses.clone());
                houses
            }
        };
        houses
            .into_iter()
            .filter(|&id| {
                let building = LayerFeature::new(SearchType::Building, id);
                self.passes_postcodes(building)
            })
            .collect()
    }

    pub fn num_cached(&self) -> usize {
        self.adjacency.len() + self.houses.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        geometry::{Point, Rect},
        memory::{MemoryShard, MemoryShardData},
        storage::{FeatureRecord, ShardInfo},
    };

    fn handle() -> ShardHandle {
        let info =
            ShardInfo::country(3, "Test", Rect::new(0.0, 0.0, 10.0, 10.0));
        let feature =
            |id, ty, y| FeatureRecord::new(id, ty, Point::new(1.0, y));
        let house = |id, y| {
            feature(id, SearchType::Building, y).with_house_number("5")
        };
        Arc::new(MemoryShard::new(
            MemoryShardData::new(info)
                .with_feature(feature(1, SearchType::Street, 1.0))
                .with_feature(house(2, 2.0))
                .with_feature(house(3, 3.0))
                .with_link(2, 1)
                .with_link(3, 1),
        ))
    }

    #[test]
    fn answers_are_cached_across_queries() {
        let mut matcher = FeaturesLayerMatcher::new(3);
        matcher.set_context(handle());
        let street = LayerFeature::new(SearchType::Street, 1);
        let building = LayerFeature::new(SearchType::Building, 2);

        assert!(matcher.is_adjacent(building, street));
        assert_eq!(matcher.houses_on_street(1, "5"), vec![2, 3]);
        assert_eq!(matcher.num_cached(), 2);

        matcher.on_query_finished();
        assert!(matcher.is_adjacent(building, street));
        assert_eq!(matcher.houses_on_street(1, "5"), vec![2, 3]);
        assert!(matcher.houses_on_street(1, "7").is_empty());
    }

    #[test]
    fn postcodes_restrict_buildings() {
        let mut matcher = FeaturesLayerMatcher::new(3);
        matcher.set_context(handle());
        matcher.set_postcodes(Some(Cbv::from_ids([3])));

        let street = LayerFeature::new(SearchType::Street, 1);
        let building = LayerFeature::new(SearchType::Building, 2);
        assert!(!matcher.is_adjacent(building, street));
        assert_eq!(matcher.houses_on_street(1, "5"), vec![3]);
    }
}
