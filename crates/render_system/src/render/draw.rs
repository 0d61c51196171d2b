//! Draw-phase interface to the graphics backend
//!
//! The render system never talks to a native API. It hands bound state to a
//! [`CommandList`] implementor, which records or submits it.

use serde::{Deserialize, Serialize};

use crate::render::descriptor::{DescriptorEntry, DescriptorSet};
use crate::render::pipeline::PipelineState;

/// Draw call parameters of a render object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DrawArguments {
    /// Vertices drawn when `index_count` is zero
    pub vertex_count: u32,
    /// Indices drawn, zero for non-indexed draws
    pub index_count: u32,
    /// Instances drawn, zero is treated as one
    pub instance_count: u32,
}

impl DrawArguments {
    /// Non-indexed draw
    pub const fn vertices(vertex_count: u32) -> Self {
        Self { vertex_count, index_count: 0, instance_count: 1 }
    }

    /// Indexed draw
    pub const fn indexed(index_count: u32) -> Self {
        Self { vertex_count: 0, index_count, instance_count: 1 }
    }

    /// Set the instance count
    #[must_use]
    pub const fn instanced(mut self, instance_count: u32) -> Self {
        self.instance_count = instance_count;
        self
    }

    /// Whether this is an indexed draw
    pub const fn is_indexed(&self) -> bool {
        self.index_count > 0
    }
}

/// Well-known descriptor set binding slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorSetSlot {
    /// Resources shared by every draw of the frame
    PerFrame,
    /// Resources shared by every draw of an effect permutation in one view
    PerView,
    /// Resources of a single (object, effect permutation) pair
    PerDraw,
}

impl DescriptorSetSlot {
    /// Binding index used by the backend
    pub const fn index(self) -> u32 {
        match self {
            Self::PerFrame => 0,
            Self::PerView => 1,
            Self::PerDraw => 2,
        }
    }
}

/// Sink for the bound state produced by the draw phase
pub trait CommandList {
    /// Bind a pipeline state. Only called when it differs from the previous draw.
    fn set_pipeline_state(&mut self, pipeline_state: &PipelineState);

    /// Bind a descriptor set with its current entries
    fn set_descriptor_set(&mut self, slot: DescriptorSetSlot, set: &DescriptorSet, entries: &[DescriptorEntry]);

    /// Issue a draw call
    fn draw(&mut self, arguments: &DrawArguments);
}
