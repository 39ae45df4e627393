use std::fmt;

use crate::{model::SearchType, token_range::TokenRange};

/// One hypothesis of the current interpretation: a token range bound to a
/// search type, with the candidate features for it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturesLayer {
    pub search_type: SearchType,
    pub range: TokenRange,
    /// Sorted ascending.
    pub sorted_features: Vec<u32>,
    pub subquery: String,
    pub last_token_is_prefix: bool,
    /// Set for building layers whose features are resolved lazily, by house
    /// number, once the street is known.
    pub has_delayed_features: bool,
}

impl FeaturesLayer {
    pub fn new(
        search_type: SearchType,
        range: TokenRange,
        sorted_features: Vec<u32>,
        subquery: String,
        last_token_is_prefix: bool,
    ) -> Self {
        debug_assert!(sorted_features.is_sorted());
        Self {
            search_type,
            range,
            sorted_features,
            subquery,
            last_token_is_prefix,
            has_delayed_features: false,
        }
    }

    pub fn with_delayed_features(mut self, delayed: bool) -> Self {
        self.has_delayed_features = delayed;
        self
    }
}

impl fmt::Display for FeaturesLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeaturesLayer [{} {} \"{}\" features={}{}]",
            self.search_type,
            self.range,
            self.subquery,
            self.sorted_features.len(),
            if self.has_delayed_features {
                " delayed"
            } else {
                ""
            }
        )
    }
}

/// Checks a stack of layers for consistency:
///
/// - no two layers share a search type;
/// - a building layer, when a street layer is present, is token-adjacent to
///   it;
/// - a building layer made only of a house number needs a street layer.
pub fn is_layer_sequence_sane(layers: &[FeaturesLayer]) -> bool {
    debug_assert!(!layers.is_empty());

    let mut mask = 0u32;
    let mut building = None;
    let mut street = None;

    for layer in layers {
        let bit = layer.search_type.bit();
        if mask & bit != 0 {
            return false;
        }
        mask |= bit;

        match layer.search_type {
            SearchType::Building => building = Some(layer),
            SearchType::Street => street = Some(layer),
            _ => {}
        }
    }

    match (building, street) {
        (Some(b), Some(s)) => b.range.is_adjacent_to(&s.range),
        (Some(b), None) => !b.has_delayed_features,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(ty: SearchType, begin: usize, end: usize) -> FeaturesLayer {
        FeaturesLayer::new(
            ty,
            TokenRange::new(begin, end),
            vec![1],
            String::new(),
            false,
        )
    }

    #[test]
    fn rejects_duplicate_types() {
        let layers = [
            layer(SearchType::Poi, 0, 1),
            layer(SearchType::Poi, 1, 2),
        ];
        assert!(!is_layer_sequence_sane(&layers));
    }

    #[test]
    fn building_must_touch_street() {
        let adjacent = [
            layer(SearchType::Street, 1, 4),
            layer(SearchType::Building, 0, 1),
        ];
        assert!(is_layer_sequence_sane(&adjacent));

        let apart = [
            layer(SearchType::Street, 2, 4),
            layer(SearchType::Poi, 1, 2),
            layer(SearchType::Building, 0, 1),
        ];
        assert!(!is_layer_sequence_sane(&apart));
    }

    #[test]
    fn delayed_building_needs_street() {
        let alone =
            [layer(SearchType::Building, 0, 1).with_delayed_features(true)];
        assert!(!is_layer_sequence_sane(&alone));

        let indexed = [layer(SearchType::Building, 0, 1)];
        assert!(is_layer_sequence_sane(&indexed));
    }

    #[test]
    fn poi_without_street_is_fine() {
        let layers = [layer(SearchType::Poi, 0, 2)];
        assert!(is_layer_sequence_sane(&layers));
    }
}
