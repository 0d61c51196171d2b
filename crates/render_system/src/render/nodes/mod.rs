//! Per-frame node types and the references that address them

pub mod references;
mod object_nodes;
mod render_node;

pub use object_nodes::{EffectObjectNode, ObjectNode, ViewObjectNode};
pub use references::{
    ConstantBufferOffsetSlot, EffectObjectNodeReference, EffectPermutationSlot, EffectViewNodeReference,
    ObjectNodeReference, RenderNodeReference, StaticEffectObjectNodeReference, StaticObjectNodeReference,
    ViewNodeReference, ViewObjectNodeReference,
};
pub use render_node::{RenderNode, RenderNodeState, SkipReason};
