//! Finding consistent feature combinations across a stack of layers.
//!
//! Layers are walked from the outermost (e.g. a street) to the innermost
//! (e.g. a POI). A feature of an inner layer is reachable when it is
//! adjacent to some reachable feature of the next outer layer. Every
//! reachable feature of the innermost layer yields one
//! [`IntersectionResult`], carrying the chain of parents that made it
//! reachable.

use tracing::trace;

use crate::{
    cancel::Cancellable,
    error::Result,
    features_layer::FeaturesLayer,
    layer_matcher::FeaturesLayerMatcher,
    model::SearchType,
    storage::LayerFeature,
};

/// One geometrically consistent path: at most one feature per type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntersectionResult {
    pub poi: Option<u32>,
    pub building: Option<u32>,
    pub street: Option<u32>,
    pub suburb: Option<u32>,
}

impl IntersectionResult {
    fn set(&mut self, search_type: SearchType, id: u32) {
        match search_type {
            SearchType::Poi => self.poi = Some(id),
            SearchType::Building => self.building = Some(id),
            SearchType::Street => self.street = Some(id),
            SearchType::Suburb => self.suburb = Some(id),
            SearchType::Unclassified
            | SearchType::Village
            | SearchType::City
            | SearchType::State
            | SearchType::Country => {}
        }
    }

    /// The feature of the innermost matched type.
    pub fn innermost_result(&self) -> Option<u32> {
        self.poi.or(self.building).or(self.street).or(self.suburb)
    }
}

#[derive(Debug, Clone, Copy)]
struct Vertex {
    id: u32,
    /// Index of the parent vertex in the next outer level.
    parent: Option<usize>,
}

pub struct PathFinder<'c> {
    cancel: &'c dyn Cancellable,
    max_paths: usize,
}

impl<'c> PathFinder<'c> {
    pub fn new(cancel: &'c dyn Cancellable, max_paths: usize) -> Self {
        Self { cancel, max_paths }
    }

    /// Calls `f` for every reachable path through `layers`, which must be
    /// sorted innermost first.
    pub fn for_each_reachable_vertex(
        &self,
        matcher: &mut FeaturesLayerMatcher,
        layers: &[&FeaturesLayer],
        mut f: impl FnMut(IntersectionResult) -> Result<()>,
    ) -> Result<()> {
        debug_assert!(
            layers.windows(2).all(|w| w[0].search_type < w[1].search_type)
        );
        let Some((outermost, inner)) = layers.split_last() else {
            return Ok(());
        };
        if outermost.has_delayed_features {
            return Ok(());
        }

        let mut levels: Vec<Vec<Vertex>> = Vec::with_capacity(layers.len());
        levels.push(
            outermost
                .sorted_features
                .iter()
                .take(self.max_paths)
                .map(|&id| Vertex { id, parent: None })
                .collect(),
        );

        let mut parent_layer = *outermost;
        for &layer in inner.iter().rev() {
            self.cancel.bail_if_cancelled()?;
            let parents = levels.last().map(Vec::as_slice).unwrap_or_default();
            let level = self.reachable(matcher, layer, parent_layer, parents)?;
            trace!(
                layer = %layer,
                reachable = level.len(),
                "path finder level"
            );
            if level.is_empty() {
                return Ok(());
            }
            levels.push(level);
            parent_layer = layer;
        }

        // `levels` runs outermost first; `layers` innermost first.
        let Some(innermost) = levels.last() else {
            return Ok(());
        };
        for vertex in innermost {
            let mut result = IntersectionResult::default();
            let mut cursor = Some(*vertex);
            for (depth, layer) in layers.iter().enumerate() {
                let Some(v) = cursor else { break };
                result.set(layer.search_type, v.id);
                let current = levels.len() - depth - 1;
                cursor = match (v.parent, current.checked_sub(1)) {
                    (Some(p), Some(level)) => Some(levels[level][p]),
                    _ => None,
                };
            }
            f(result)?;
        }
        Ok(())
    }

    fn reachable(
        &self,
        matcher: &mut FeaturesLayerMatcher,
        layer: &FeaturesLayer,
        parent_layer: &FeaturesLayer,
        parents: &[Vertex],
    ) -> Result<Vec<Vertex>> {
        let mut level = Vec::new();

        if layer.has_delayed_features {
            // Buildings known only by house number can only hang off a
            // street.
            if parent_layer.search_type != SearchType::Street {
                return Ok(level);
            }
            for (index, parent) in parents.iter().enumerate() {
                self.cancel.bail_if_cancelled()?;
                for id in matcher.houses_on_street(parent.id, &layer.subquery) {
                    level.push(Vertex {
                        id,
                        parent: Some(index),
                    });
                    if level.len() >= self.max_paths {
                        return Ok(level);
                    }
                }
            }
            return Ok(level);
        }

        for &id in &layer.sorted_features {
            self.cancel.bail_if_cancelled()?;
            let child = LayerFeature::new(layer.search_type, id);
            for (index, parent) in parents.iter().enumerate() {
                let parent_feature =
                    LayerFeature::new(parent_layer.search_type, parent.id);
                if matcher.is_adjacent(child, parent_feature) {
                    level.push(Vertex {
                        id,
                        parent: Some(index),
                    });
                    if level.len() >= self.max_paths {
                        return Ok(level);
                    }
                }
            }
        }
        Ok(level)
    }
}
