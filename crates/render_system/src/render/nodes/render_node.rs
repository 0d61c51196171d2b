//! Render node and its per-frame lifecycle
//!
//! ```text
//! Unresolved ──> Allocated ──> Prepared ──> Drawn
//!     │              │
//!     └──────────────┴──> Skipped
//! ```
//!
//! Every node is discarded at the next frame reset.

use std::fmt;

use crate::render::descriptor::DescriptorSet;
use crate::render::nodes::{
    EffectObjectNode, EffectObjectNodeReference, StaticEffectObjectNodeReference, ViewNodeReference,
    ViewObjectNodeReference,
};
use crate::render::object::RenderObjectId;
use crate::render::pipeline::PipelineStateId;
use crate::render::stage::RenderStageId;
use crate::render::{RenderError, RenderResult};

/// Why a render node will not be drawn this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The effect failed to compile and no fallback was available
    EffectUnavailable,
    /// A per-frame arena ran out of space
    AllocationExhausted,
    /// The render object was removed after extraction
    ObjectRemoved,
}

/// Lifecycle state of a [`RenderNode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderNodeState {
    /// Extracted; effect not resolved yet
    Unresolved,
    /// Effect resolved; resources not bound yet
    Allocated,
    /// Descriptor sets, constant buffer and pipeline state bound
    Prepared,
    /// Consumed by the draw phase
    Drawn,
    /// Dropped for this frame
    Skipped(SkipReason),
}

impl fmt::Display for RenderNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => write!(f, "unresolved"),
            Self::Allocated => write!(f, "allocated"),
            Self::Prepared => write!(f, "prepared"),
            Self::Drawn => write!(f, "drawn"),
            Self::Skipped(reason) => write!(f, "skipped ({reason:?})"),
        }
    }
}

/// Fully resolved (object × view × effect × stage) draw unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderNode {
    /// Object being drawn
    pub render_object: RenderObjectId,
    /// View the node is drawn in
    pub view: ViewNodeReference,
    /// Per-view node of the object
    pub view_object_node: ViewObjectNodeReference,
    /// Stage the node is drawn in
    pub render_stage: RenderStageId,
    /// Static slot of the resolved effect
    pub render_effect: StaticEffectObjectNodeReference,
    /// Per-frame (object, effect) node carrying the per-draw resources
    pub effect_object_node: EffectObjectNodeReference,
    /// Per-frame descriptor set of the node's effect
    pub frame_descriptor_set: Option<DescriptorSet>,
    /// Per-view descriptor set for the node's effect permutation
    pub view_descriptor_set: Option<DescriptorSet>,
    /// Per-draw descriptor set
    pub descriptor_set: Option<DescriptorSet>,
    /// Per-draw constant-buffer offset
    pub constant_buffer_offset: Option<usize>,
    /// Pipeline state bound for the draw call
    pub pipeline_state: Option<PipelineStateId>,
    state: RenderNodeState,
}

impl RenderNode {
    /// Create an unresolved render node
    pub const fn new(
        render_object: RenderObjectId,
        view: ViewNodeReference,
        view_object_node: ViewObjectNodeReference,
        render_stage: RenderStageId,
    ) -> Self {
        Self {
            render_object,
            view,
            view_object_node,
            render_stage,
            render_effect: StaticEffectObjectNodeReference::INVALID,
            effect_object_node: EffectObjectNodeReference::INVALID,
            frame_descriptor_set: None,
            view_descriptor_set: None,
            descriptor_set: None,
            constant_buffer_offset: None,
            pipeline_state: None,
            state: RenderNodeState::Unresolved,
        }
    }

    /// Current lifecycle state
    pub const fn state(&self) -> RenderNodeState {
        self.state
    }

    /// Whether the draw phase may consume this node
    pub fn is_drawable(&self) -> bool {
        self.state == RenderNodeState::Prepared
    }

    /// Record the resolved effect: `Unresolved -> Allocated`
    pub fn mark_allocated(&mut self, render_effect: StaticEffectObjectNodeReference) -> RenderResult<()> {
        self.transition(RenderNodeState::Unresolved, RenderNodeState::Allocated)?;
        self.render_effect = render_effect;
        Ok(())
    }

    /// Bind resources and pipeline state: `Allocated -> Prepared`
    pub fn mark_prepared(
        &mut self,
        effect_object_node_reference: EffectObjectNodeReference,
        effect_object_node: &EffectObjectNode,
        frame_descriptor_set: Option<DescriptorSet>,
        view_descriptor_set: Option<DescriptorSet>,
        pipeline_state: PipelineStateId,
    ) -> RenderResult<()> {
        self.transition(RenderNodeState::Allocated, RenderNodeState::Prepared)?;
        self.effect_object_node = effect_object_node_reference;
        self.descriptor_set = effect_object_node.descriptor_set;
        self.constant_buffer_offset = effect_object_node.constant_buffer_offset;
        self.frame_descriptor_set = frame_descriptor_set;
        self.view_descriptor_set = view_descriptor_set;
        self.pipeline_state = Some(pipeline_state);
        Ok(())
    }

    /// Record that the draw call was issued: `Prepared -> Drawn`
    pub fn mark_drawn(&mut self) -> RenderResult<()> {
        self.transition(RenderNodeState::Prepared, RenderNodeState::Drawn)
    }

    /// Drop the node for this frame. Only nodes not yet prepared can be skipped.
    pub fn mark_skipped(&mut self, reason: SkipReason) -> RenderResult<()> {
        match self.state {
            RenderNodeState::Unresolved | RenderNodeState::Allocated => {
                self.state = RenderNodeState::Skipped(reason);
                Ok(())
            }
            from => Err(RenderError::InvalidStateTransition {
                from,
                to: RenderNodeState::Skipped(reason),
            }),
        }
    }

    fn transition(&mut self, expected: RenderNodeState, to: RenderNodeState) -> RenderResult<()> {
        if self.state != expected {
            return Err(RenderError::InvalidStateTransition { from: self.state, to });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::descriptor::DescriptorPool;
    use crate::render::nodes::ObjectNodeReference;
    use crate::render::pipeline::PipelineStateId;
    use slotmap::KeyData;

    fn node() -> RenderNode {
        RenderNode::new(
            RenderObjectId::from(KeyData::from_ffi(1)),
            ViewNodeReference::new(0),
            ViewObjectNodeReference::new(0),
            RenderStageId::new(0),
        )
    }

    #[test]
    fn test_full_lifecycle() {
        let mut pool = DescriptorPool::with_capacity(8);
        let set = pool.allocate_range(2).unwrap();
        let frame_set = pool.allocate_range(1).unwrap();

        let mut node = node();
        assert_eq!(node.state(), RenderNodeState::Unresolved);

        let effect = StaticEffectObjectNodeReference::new(3);
        node.mark_allocated(effect).unwrap();
        assert_eq!(node.state(), RenderNodeState::Allocated);
        assert_eq!(node.render_effect, effect);
        assert!(!node.is_drawable());

        let mut effect_node = EffectObjectNode::new(effect, ObjectNodeReference::new(0));
        effect_node.descriptor_set = Some(set);
        effect_node.constant_buffer_offset = Some(256);
        node.mark_prepared(EffectObjectNodeReference::new(0), &effect_node, Some(frame_set), None, PipelineStateId::new(1))
            .unwrap();
        assert!(node.is_drawable());
        assert_eq!(node.descriptor_set, Some(set));
        assert_eq!(node.frame_descriptor_set, Some(frame_set));
        assert_eq!(node.view_descriptor_set, None);
        assert_eq!(node.constant_buffer_offset, Some(256));
        assert_eq!(node.pipeline_state, Some(PipelineStateId::new(1)));

        node.mark_drawn().unwrap();
        assert_eq!(node.state(), RenderNodeState::Drawn);
        assert!(!node.is_drawable());
    }

    #[test]
    fn test_out_of_order_transitions_are_rejected() {
        let mut node = node();

        assert_eq!(
            node.mark_drawn(),
            Err(RenderError::InvalidStateTransition {
                from: RenderNodeState::Unresolved,
                to: RenderNodeState::Drawn,
            })
        );

        node.mark_allocated(StaticEffectObjectNodeReference::new(0)).unwrap();
        assert!(node.mark_allocated(StaticEffectObjectNodeReference::new(0)).is_err());
    }

    #[test]
    fn test_skipped_node_is_never_drawn() {
        let mut node = node();
        node.mark_skipped(SkipReason::EffectUnavailable).unwrap();

        assert_eq!(node.state(), RenderNodeState::Skipped(SkipReason::EffectUnavailable));
        assert!(!node.is_drawable());
        assert!(node.mark_drawn().is_err());
        assert!(node.mark_skipped(SkipReason::AllocationExhausted).is_err());
    }
}
