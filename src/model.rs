//! Search types and the mappings between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a matched feature, ordered innermost first.
///
/// The order matters: the path finder walks layers sorted by this type,
/// from the innermost (`Poi`) to the outermost one.
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
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Poi,
    Building,
    Street,
    Suburb,
    Unclassified,
    Village,
    City,
    State,
    Country,
}

impl SearchType {
    pub const ALL: [SearchType; 9] = [
        Self::Poi,
        Self::Building,
        Self::Street,
        Self::Suburb,
        Self::Unclassified,
        Self::Village,
        Self::City,
        Self::State,
        Self::Country,
    ];

    pub fn bit(self) -> u32 {
        1 << self as u32
    }

    /// Category key the storage layer indexes every feature of this type
    /// under. Used to load the street, suburb and village sets of a shard.
    pub fn category_key(self) -> &'static str {
        match self {
            Self::Poi => "type:poi",
            Self::Building => "type:building",
            Self::Street => "type:street",
            Self::Suburb => "type:suburb",
            Self::Unclassified => "type:unclassified",
            Self::Village => "type:village",
            Self::City => "type:city",
            Self::State => "type:state",
            Self::Country => "type:country",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Poi => "POI",
            Self::Building => "BUILDING",
            Self::Street => "STREET",
            Self::Suburb => "SUBURB",
            Self::Unclassified => "UNCLASSIFIED",
            Self::Village => "VILLAGE",
            Self::City => "CITY",
            Self::State => "STATE",
            Self::Country => "COUNTRY",
        };
        f.write_str(name)
    }
}

/// Administrative regions, ordered narrowest first.
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
#[serde(rename_all = "snake_case")]
pub enum RegionType {
    State,
    Country,
}

impl RegionType {
    pub fn search_type(self) -> SearchType {
        match self {
            Self::State => SearchType::State,
            Self::Country => SearchType::Country,
        }
    }

    /// The next narrower region type, if any.
    pub fn narrower(self) -> Option<RegionType> {
        match self {
            Self::Country => Some(Self::State),
            Self::State => None,
        }
    }

    pub fn from_search_type(ty: SearchType) -> Option<RegionType> {
        match ty {
            SearchType::State => Some(Self::State),
            SearchType::Country => Some(Self::Country),
            SearchType::Poi
            | SearchType::Building
            | SearchType::Street
            | SearchType::Suburb
            | SearchType::Unclassified
            | SearchType::Village
            | SearchType::City => None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LocalityType {
    City,
    Town,
    Village,
}

impl LocalityType {
    pub fn search_type(self) -> SearchType {
        match self {
            Self::City | Self::Town => SearchType::City,
            Self::Village => SearchType::Village,
        }
    }

    /// Population assumed when a feature carries none.
    pub fn default_population(self) -> u64 {
        match self {
            Self::City => 100_000,
            Self::Town => 10_000,
            Self::Village => 100,
        }
    }

    pub fn from_search_type(ty: SearchType) -> Option<LocalityType> {
        match ty {
            SearchType::City => Some(Self::City),
            SearchType::Village => Some(Self::Village),
            SearchType::Poi
            | SearchType::Building
            | SearchType::Street
            | SearchType::Suburb
            | SearchType::Unclassified
            | SearchType::State
            | SearchType::Country => None,
        }
    }
}

/// What a query token has been consumed as.
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
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Search(SearchType),
    Postcode,
}

impl From<SearchType> for TokenType {
    fn from(ty: SearchType) -> Self {
        Self::Search(ty)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search(ty) => ty.fmt(f),
            Self::Postcode => f.write_str("POSTCODE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_types_are_ordered_innermost_first() {
        let mut types = SearchType::ALL.to_vec();
        types.reverse();
        types.sort();
        assert_eq!(types, SearchType::ALL.to_vec());
        assert!(SearchType::Poi < SearchType::Street);
        assert!(SearchType::City < SearchType::Country);
    }

    #[test]
    fn bits_are_distinct() {
        let mask = SearchType::ALL.iter().fold(0u32, |mask, ty| {
            assert_eq!(mask & ty.bit(), 0);
            mask | ty.bit()
        });
        assert_eq!(mask.count_ones() as usize, SearchType::ALL.len());
    }

    #[test]
    fn region_chain_narrows_to_state() {
        assert_eq!(RegionType::Country.narrower(), Some(RegionType::State));
        assert_eq!(RegionType::State.narrower(), None);
        assert_eq!(
            RegionType::from_search_type(SearchType::State),
            Some(RegionType::State)
        );
        assert_eq!(RegionType::from_search_type(SearchType::City), None);
    }

    #[test]
    fn towns_are_searched_as_cities() {
        assert_eq!(LocalityType::Town.search_type(), SearchType::City);
        assert_eq!(LocalityType::Village.search_type(), SearchType::Village);
    }
}
