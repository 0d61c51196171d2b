//! Pipeline state cache
//!
//! Deduplicates equal descriptions so each distinct pipeline state is created
//! once and referred to by a small id afterwards.

use std::collections::HashMap;
use std::fmt;

use crate::render::pipeline::{PipelineState, PipelineStateDescription};
use crate::render::{RenderError, RenderResult};

/// Index of a cached [`PipelineState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineStateId(u32);

impl PipelineStateId {
    /// Create an id from its cache index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Cache index
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PipelineStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline#{}", self.0)
    }
}

/// Cache of immutable pipeline states
#[derive(Debug, Default)]
pub struct PipelineStateCache {
    states: Vec<PipelineState>,
    lookup: HashMap<PipelineState, PipelineStateId>,
}

impl PipelineStateCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the state equal to `description`, creating it on first request
    pub fn get_or_create(&mut self, description: PipelineStateDescription) -> PipelineStateId {
        let state = PipelineState::new(description);
        if let Some(&id) = self.lookup.get(&state) {
            return id;
        }

        let index = u32::try_from(self.states.len()).unwrap_or(u32::MAX);
        let id = PipelineStateId(index);
        log::debug!("Created {id} (hash {:016x})", state.hash_value());
        self.states.push(state.clone());
        self.lookup.insert(state, id);
        id
    }

    /// Cached state for `id`
    pub fn get(&self, id: PipelineStateId) -> RenderResult<&PipelineState> {
        self.states
            .get(id.0 as usize)
            .ok_or(RenderError::UnknownPipelineState(id.0))
    }

    /// Number of distinct states
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no state was created yet
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
