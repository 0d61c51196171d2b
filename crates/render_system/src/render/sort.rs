//! Render node ordering within a stage
//!
//! Nodes are ordered by a packed `u64` key and sorted stably, so nodes with
//! equal keys keep their extraction order.

use serde::{Deserialize, Serialize};

use crate::render::view::RenderNodeFeatureReference;

/// How a stage orders its render nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortMode {
    /// Nearest first, to maximise early depth rejection
    FrontToBack,
    /// Farthest first, for blending
    BackToFront,
    /// Group by pipeline state, then by effect, to minimise state changes
    StateChange,
}

/// Sort key of one render node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    /// Packed ordering value, ascending
    pub value: u64,
    /// Node the key belongs to
    pub node: RenderNodeFeatureReference,
}

impl SortMode {
    /// Packed key for a node at view-space `depth`.
    ///
    /// `pipeline_state` and `effect` only matter for [`SortMode::StateChange`];
    /// nodes without a pipeline state sort last.
    pub fn compute_key(self, depth: f32, pipeline_state: Option<u32>, effect: u32) -> u64 {
        let depth_bits = u64::from(sortable_float_bits(depth));
        match self {
            Self::FrontToBack => depth_bits,
            Self::BackToFront => u64::from(u32::MAX) - depth_bits,
            Self::StateChange => {
                let pipeline = pipeline_state.unwrap_or(u32::MAX);
                (u64::from(pipeline) << 32) | u64::from(effect)
            }
        }
    }
}

/// Sort keys in place by ascending value, keeping the order of equal keys
pub fn sort_keys(keys: &mut [SortKey]) {
    keys.sort_by_key(|key| key.value);
}

/// Map an `f32` to a `u32` with the same total ordering
fn sortable_float_bits(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x8000_0000 == 0 {
        bits | 0x8000_0000
    } else {
        !bits
    }
}
