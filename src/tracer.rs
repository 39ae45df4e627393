//! Optional instrumentation of the matching branches taken by a query.
//!
//! A [`Tracer`] records branch enter/leave events in the order the geocoder
//! walks them, the token-type assignment behind every emitted result, and
//! the state each shard context was left in. It is cheap to share by
//! reference: recording goes through interior mutability so the geocoder
//! can keep a tracer alongside its own mutable state.

use std::{cell::RefCell, fmt};

use crate::{model::TokenType, storage::FeatureId, storage::ShardId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    GoEverywhere,
    GoInViewport,
    MatchRegions,
    MatchCities,
    MatchAroundPivot,
    MatchPostcodes,
    MatchStreets,
    MatchSuburbs,
    MatchPoisAndBuildings,
    MatchUnclassified,
    FindPaths,
    Relaxed,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Enter(Branch),
    Leave(Branch),
    Emit(Provenance),
    /// A shard pass ended; reports what its context still held.
    ShardDone {
        shard: ShardId,
        residual_layers: usize,
        residual_marks: usize,
    },
}

/// Why a result was emitted: the active branches and which token was
/// consumed as what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub feature: FeatureId,
    pub branches: Vec<Branch>,
    pub tokens: Vec<Option<TokenType>>,
}

#[derive(Debug, Default)]
struct TracerState {
    events: Vec<TraceEvent>,
    stack: Vec<Branch>,
}

#[derive(Debug, Default)]
pub struct Tracer {
    state: RefCell<TracerState>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records entering `branch`; leaving is recorded when the returned
    /// guard is dropped.
    pub fn enter(&self, branch: Branch) -> BranchGuard<'_> {
        let mut state = self.state.borrow_mut();
        state.events.push(TraceEvent::Enter(branch));
        state.stack.push(branch);
        BranchGuard {
            tracer: self,
            branch,
        }
    }

    pub fn record_emit(
        &self,
        feature: FeatureId,
        tokens: &[Option<TokenType>],
    ) {
        let mut state = self.state.borrow_mut();
        let provenance = Provenance {
            feature,
            branches: state.stack.clone(),
            tokens: tokens.to_vec(),
        };
        state.events.push(TraceEvent::Emit(provenance));
    }

    pub fn record_shard_done(
        &self,
        shard: ShardId,
        residual_layers: usize,
        residual_marks: usize,
    ) {
        self.state.borrow_mut().events.push(TraceEvent::ShardDone {
            shard,
            residual_layers,
            residual_marks,
        });
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.state.borrow().events.clone()
    }

    pub fn provenance(&self) -> Vec<Provenance> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Emit(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether `branch` has been left at least once.
    pub fn has_left(&self, branch: Branch) -> bool {
        self.state
            .borrow()
            .events
            .iter()
            .any(|event| *event == TraceEvent::Leave(branch))
    }

    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.events.clear();
        state.stack.clear();
    }
}

pub struct BranchGuard<'t> {
    tracer: &'t Tracer,
    branch: Branch,
}

impl Drop for BranchGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.tracer.state.borrow_mut();
        let top = state.stack.pop();
        debug_assert_eq!(top, Some(self.branch));
        state.events.push(TraceEvent::Leave(self.branch));
    }
}

/// Enters `branch` on an optional tracer.
pub fn trace(
    tracer: Option<&Tracer>,
    branch: Branch,
) -> Option<BranchGuard<'_>> {
    tracer.map(|t| t.enter(branch))
}
