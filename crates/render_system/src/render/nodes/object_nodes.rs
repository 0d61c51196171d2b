//! Object, view-object and effect-object nodes
//!
//! All three live for exactly one frame and are cleared by the owning
//! feature's reset. They refer to render objects by handle, never by borrow.

use crate::render::descriptor::DescriptorSet;
use crate::render::nodes::{ObjectNodeReference, StaticEffectObjectNodeReference, ViewNodeReference};
use crate::render::object::RenderObjectId;

/// One visible object for the current frame, shared by every view that sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectNode {
    /// Object this node was extracted from
    pub render_object: RenderObjectId,
}

impl ObjectNode {
    /// Create an object node
    pub const fn new(render_object: RenderObjectId) -> Self {
        Self { render_object }
    }
}

/// One object as seen from one view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewObjectNode {
    /// Object this node was extracted from
    pub render_object: RenderObjectId,
    /// View the object is visible in
    pub view: ViewNodeReference,
    /// View-independent node of the same object
    pub object_node: ObjectNodeReference,
}

impl ViewObjectNode {
    /// Create a view object node
    pub const fn new(
        render_object: RenderObjectId,
        view: ViewNodeReference,
        object_node: ObjectNodeReference,
    ) -> Self {
        Self { render_object, view, object_node }
    }
}

/// One (object, effect permutation) pair used this frame.
///
/// Holds the per-draw descriptor set and constant-buffer range shared by
/// every render node of that pair, whatever the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectObjectNode {
    /// Static slot holding the resolved effect
    pub render_effect: StaticEffectObjectNodeReference,
    /// Per-frame node of the owning object
    pub object_node: ObjectNodeReference,
    /// Per-draw descriptor set, if the effect declares any entries
    pub descriptor_set: Option<DescriptorSet>,
    /// Per-draw constant-buffer offset, if the effect declares constants
    pub constant_buffer_offset: Option<usize>,
}

impl EffectObjectNode {
    /// Create an effect object node without bound resources
    pub const fn new(render_effect: StaticEffectObjectNodeReference, object_node: ObjectNodeReference) -> Self {
        Self {
            render_effect,
            object_node,
            descriptor_set: None,
            constant_buffer_offset: None,
        }
    }
}
