use std::collections::BTreeMap;

use crate::{
    geometry::{Point, Rect},
    model::{LocalityType, RegionType, SearchType},
    storage::{FeatureId, ShardId},
    token_range::TokenRange,
};

/// A provisional match of a token range to a locality feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Locality {
    pub feature: FeatureId,
    pub range: TokenRange,
    /// Fraction of the range's candidates that survived the locality filter.
    pub probability: f64,
}

impl Locality {
    pub fn new(
        feature: FeatureId,
        range: TokenRange,
        probability: f64,
    ) -> Self {
        Self {
            feature,
            range,
            probability,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub locality: Locality,
    pub region_type: RegionType,
    pub center: Point,
    /// Shards the region spans.
    pub ids: Vec<ShardId>,
    pub default_name: String,
    pub exact_match: bool,
}

impl Region {
    pub fn search_type(&self) -> SearchType {
        self.region_type.search_type()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct City {
    pub locality: Locality,
    pub locality_type: LocalityType,
    pub rect: Rect,
    pub default_name: String,
    pub exact_match: bool,
}

impl City {
    pub fn search_type(&self) -> SearchType {
        self.locality_type.search_type()
    }
}

/// Matched regions and cities keyed by token range, walked in range order.
///
/// Filled once per query from the world shard (plus villages per shard) and
/// only read during a shard's pass; the context keeps plain references into
/// it.
#[derive(Debug, Clone, Default)]
pub struct LocalityTables {
    pub states: BTreeMap<TokenRange, Vec<Region>>,
    pub countries: BTreeMap<TokenRange, Vec<Region>>,
    pub cities: BTreeMap<TokenRange, Vec<City>>,
}

impl LocalityTables {
    pub fn regions(
        &self,
        ty: RegionType,
    ) -> &BTreeMap<TokenRange, Vec<Region>> {
        match ty {
            RegionType::State => &self.states,
            RegionType::Country => &self.countries,
        }
    }

    pub fn add_region(&mut self, region: Region) {
        let table = match region.region_type {
            RegionType::State => &mut self.states,
            RegionType::Country => &mut self.countries,
        };
        table.entry(region.locality.range).or_default().push(region);
    }

    pub fn add_city(&mut self, city: City) {
        self.cities
            .entry(city.locality.range)
            .or_default()
            .push(city);
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.countries.clear();
        self.cities.clear();
    }

    pub fn num_regions(&self, ty: RegionType) -> usize {
        self.regions(ty).values().map(Vec::len).sum()
    }

    pub fn num_cities(&self) -> usize {
        self.cities.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city(begin: usize, end: usize, feature: u32) -> City {
        City {
            locality: Locality::new(
                FeatureId::new(0, feature),
                TokenRange::new(begin, end),
                1.0,
            ),
            locality_type: LocalityType::City,
            rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            default_name: String::new(),
            exact_match: true,
        }
    }

    #[test]
    fn cities_are_grouped_and_ordered_by_range() {
        let mut tables = LocalityTables::default();
        tables.add_city(city(1, 2, 10));
        tables.add_city(city(0, 1, 11));
        tables.add_city(city(1, 2, 12));

        let ranges: Vec<_> = tables.cities.keys().copied().collect();
        assert_eq!(ranges, vec![TokenRange::new(0, 1), TokenRange::new(1, 2)]);
        assert_eq!(tables.num_cities(), 3);

        tables.clear();
        assert_eq!(tables.num_cities(), 0);
    }

    #[test]
    fn regions_go_to_their_table() {
        let mut tables = LocalityTables::default();
        tables.add_region(Region {
            locality: Locality::new(
                FeatureId::new(0, 1),
                TokenRange::new(0, 1),
                1.0,
            ),
            region_type: RegionType::Country,
            center: Point::default(),
            ids: vec![1],
            default_name: "France".into(),
            exact_match: true,
        });
        assert_eq!(tables.num_regions(RegionType::Country), 1);
        assert_eq!(tables.num_regions(RegionType::State), 0);
    }
}
