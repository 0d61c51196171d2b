//! Render stages
//!
//! A stage is a named pass (opaque, transparent, shadow caster...). Stages
//! sharing an effect slot name share the same effect permutation slot in
//! every render feature.

use std::fmt;

use crate::render::pipeline::RenderOutputDescription;
use crate::render::sort::SortMode;

/// Index of a registered render stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderStageId(u32);

impl RenderStageId {
    /// Create a stage id from its registration index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Registration index
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw index
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RenderStageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

/// A named rendering pass
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStage {
    /// Display name
    pub name: String,
    /// Effect permutation slot this stage resolves effects into
    pub effect_slot_name: String,
    /// Ordering of nodes within the stage, `None` keeps extraction order
    pub sort_mode: Option<SortMode>,
    /// Render target layout the stage draws into
    pub output: RenderOutputDescription,
}

impl RenderStage {
    /// Create a stage using `effect_slot_name`, unsorted, drawing to the default output
    pub fn new(name: impl Into<String>, effect_slot_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            effect_slot_name: effect_slot_name.into(),
            sort_mode: None,
            output: RenderOutputDescription::default(),
        }
    }

    /// Set the sort mode
    #[must_use]
    pub fn with_sort_mode(mut self, sort_mode: SortMode) -> Self {
        self.sort_mode = Some(sort_mode);
        self
    }

    /// Set the output description
    #[must_use]
    pub fn with_output(mut self, output: RenderOutputDescription) -> Self {
        self.output = output;
        self
    }
}
