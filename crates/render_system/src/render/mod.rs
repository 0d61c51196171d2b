//! # Render-node indexing and per-frame allocation
//!
//! This module maps (object × view × effect permutation × stage) tuples onto
//! flat per-frame arrays, bump-allocates descriptor-set and constant-buffer
//! memory for the frame, derives immutable pipeline states and iterates the
//! resulting render nodes per stage to issue draw calls.
//!
//! ## Architecture
//!
//! ```text
//! RenderSystem
//!   ├── RenderObject (slot map, stable across frames)
//!   ├── RenderStage / RenderView (views own per-stage node lists)
//!   ├── RootRenderFeature (one per feature, owns every node array)
//!   │     ├── static:    StaticObjectNode -> RenderEffect[index * slots + slot]
//!   │     └── per frame: ObjectNode, ViewObjectNode, RenderNode, EffectObjectNode
//!   ├── DescriptorPool / ConstantBufferPool (bump arenas, reset every frame)
//!   └── PipelineStateCache (deduplicated immutable pipeline states)
//! ```
//!
//! ## Frame flow
//!
//! `reset` -> `set_visible_objects` -> `extract` -> `prepare` -> `draw`
//!
//! Failures that only concern one object (effect compilation, pool exhaustion)
//! skip the affected render nodes and are logged. Structural misuse (unknown
//! view, out-of-range reference) is returned as a [`RenderError`].

pub mod nodes;
pub mod object;
pub mod stage;
pub mod view;
pub mod sort;
pub mod effect;
pub mod descriptor;
pub mod pipeline;
pub mod feature;
pub mod draw;
pub mod system;

#[cfg(test)]
mod tests;

pub use descriptor::{
    ConstantBufferPool, ConstantBufferWriter, DescriptorEntry, DescriptorPool, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBuilder, DescriptorSetLayoutCache, DescriptorTypeCount, EffectParameterClass,
    ResourceHandle,
};
pub use draw::{CommandList, DescriptorSetSlot, DrawArguments};
pub use effect::{
    ConstantBufferMember, EffectBytecode, EffectBytecodeCache, EffectBytecodeId, EffectCompiler,
    RenderEffect, RenderEffectState,
};
pub use feature::{ConstantBufferOffsetSlots, RenderFeature, RenderFeatureId, RootRenderFeature, ViewEffectResources};
pub use nodes::{
    ConstantBufferOffsetSlot, EffectObjectNode, EffectObjectNodeReference, EffectPermutationSlot, EffectViewNodeReference,
    ObjectNode, ObjectNodeReference, RenderNode, RenderNodeReference, RenderNodeState, SkipReason,
    StaticEffectObjectNodeReference, StaticObjectNodeReference, ViewNodeReference, ViewObjectNode,
    ViewObjectNodeReference,
};
pub use object::{ActiveRenderStage, RenderObject, RenderObjectId};
pub use pipeline::{PipelineState, PipelineStateCache, PipelineStateDescription, PipelineStateId};
pub use sort::{SortKey, SortMode};
pub use stage::{RenderStage, RenderStageId};
pub use system::{DrawStats, FrameStats, RenderSystem};
pub use view::{RenderNodeFeatureReference, RenderView, RenderViewStage};

use thiserror::Error;

/// Arena an allocation was requested from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Descriptor-set entry arena
    Descriptor,
    /// Constant-buffer byte arena
    ConstantBuffer,
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Descriptor => write!(f, "descriptor pool"),
            Self::ConstantBuffer => write!(f, "constant buffer pool"),
        }
    }
}

/// Errors produced by the render-node layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// A per-frame arena cannot satisfy a request.
    ///
    /// The offset is left untouched; the caller drops the node for this frame
    /// and the pool is grown before the next one.
    #[error("{pool} exhausted: requested {requested}, {available} of {capacity} available")]
    AllocationExhausted {
        /// Pool that ran out
        pool: PoolKind,
        /// Requested size
        requested: usize,
        /// Space left before the request
        available: usize,
        /// Total pool capacity
        capacity: usize,
    },

    /// A node reference does not address an element of its array
    #[error("invalid {kind} reference {index} (array length {len})")]
    InvalidNodeReference {
        /// Reference type name
        kind: &'static str,
        /// Raw index carried by the reference
        index: u32,
        /// Length of the addressed array
        len: usize,
    },

    /// Permutation slot outside of the registered slot count
    #[error("effect permutation slot {slot} out of range for slot count {slot_count}")]
    InvalidPermutationSlot {
        /// Requested slot
        slot: u32,
        /// Registered slot count
        slot_count: u32,
    },

    /// Derived effect index does not fit the reference type
    #[error("effect reference overflow: index {index} * slot count {slot_count}")]
    EffectReferenceOverflow {
        /// Base node index
        index: u32,
        /// Registered slot count
        slot_count: u32,
    },

    /// A render feature cannot register more permutation slots
    #[error("too many effect permutation slots (max {max})")]
    TooManyPermutationSlots {
        /// Configured maximum
        max: usize,
    },

    /// A descriptor set handle was retained past a pool reset
    #[error("stale descriptor set from generation {set_generation} (pool is at {pool_generation})")]
    StaleDescriptorSet {
        /// Generation the set was allocated in
        set_generation: u64,
        /// Current pool generation
        pool_generation: u64,
    },

    /// Entry index outside of a descriptor set
    #[error("descriptor entry {index} out of range for set of {len} entries")]
    InvalidDescriptorEntry {
        /// Requested entry
        index: usize,
        /// Set length
        len: usize,
    },

    /// Constant-buffer range outside of the allocated region
    #[error("constant buffer range {offset}..{end} outside of allocated {allocated} bytes")]
    InvalidConstantBufferRange {
        /// Range start
        offset: usize,
        /// Range end
        end: usize,
        /// Bytes allocated this frame
        allocated: usize,
    },

    /// Render node lifecycle misuse
    #[error("invalid render node transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state
        from: RenderNodeState,
        /// Requested state
        to: RenderNodeState,
    },

    /// The effect compiler rejected an effect
    #[error("effect '{effect}' failed to compile: {reason}")]
    EffectCompilationFailed {
        /// Effect name
        effect: String,
        /// Compiler message
        reason: String,
    },

    /// The view does not render the requested stage
    #[error("view {view} has no stage {stage}")]
    ViewStageNotFound {
        /// View index
        view: u32,
        /// Stage index
        stage: u32,
    },

    /// Render object handle is not registered
    #[error("unknown render object")]
    UnknownRenderObject,

    /// Render feature id is not registered
    #[error("unknown render feature {0}")]
    UnknownRenderFeature(u32),

    /// Render stage id is not registered
    #[error("unknown render stage {0}")]
    UnknownRenderStage(u32),

    /// Render view is not registered
    #[error("unknown render view {0}")]
    UnknownRenderView(u32),

    /// Pipeline state id is not present in the cache
    #[error("unknown pipeline state {0}")]
    UnknownPipelineState(u32),
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;
