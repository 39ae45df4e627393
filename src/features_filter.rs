//! Restricting candidate sets to a geographic area.

use crate::cbv::Cbv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPolicy {
    /// Hard intersection with the allowed set.
    Locality,
    /// Intersection, falling back to the first `threshold` candidates when
    /// the intersection is empty.
    Viewport,
}

/// Wraps a fixed "allowed" set and a size threshold.
#[derive(Debug, Clone)]
pub struct FeaturesFilter {
    allowed: Cbv,
    threshold: u64,
    policy: FilterPolicy,
}

impl FeaturesFilter {
    /// Filter for searching inside a locality: every candidate set is
    /// restricted to `allowed`.
    pub fn locality(allowed: Cbv) -> Self {
        Self {
            allowed,
            threshold: 0,
            policy: FilterPolicy::Locality,
        }
    }

    /// Filter for searching around the pivot: sets larger than `threshold`
    /// are restricted to `allowed`, but never emptied.
    pub fn viewport(allowed: Cbv, threshold: u64) -> Self {
        Self {
            allowed,
            threshold,
            policy: FilterPolicy::Viewport,
        }
    }

    pub fn need_to_filter(&self, cbv: &Cbv) -> bool {
        cbv.is_full() || cbv.pop_count() > self.threshold
    }

    pub fn filter(&self, cbv: &Cbv) -> Cbv {
        let filtered = self.allowed.intersect(cbv);
        match self.policy {
            FilterPolicy::Locality => filtered,
            FilterPolicy::Viewport if filtered.is_empty() => {
                cbv.take(self.threshold)
            }
            FilterPolicy::Viewport => filtered,
        }
    }

    /// Filters `cbv` only when [`need_to_filter`](Self::need_to_filter)
    /// says so.
    pub fn apply(&self, cbv: &Cbv) -> Cbv {
        if self.need_to_filter(cbv) {
            self.filter(cbv)
        } else {
            cbv.clone()
        }
    }
}
