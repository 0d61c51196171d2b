//! Render views
//!
//! A view is one camera or light frustum rendered during the frame. It lists
//! the stages it renders and, per stage, the render nodes extracted for it.

use crate::foundation::math::Mat4;
use crate::render::feature::RenderFeatureId;
use crate::render::nodes::RenderNodeReference;
use crate::render::object::RenderObjectId;
use crate::render::stage::RenderStageId;

/// A render node tagged with the feature that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderNodeFeatureReference {
    /// Owning feature
    pub feature: RenderFeatureId,
    /// Node within the feature
    pub node: RenderNodeReference,
    /// Object the node draws
    pub object: RenderObjectId,
}

/// Nodes of one stage rendered from one view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderViewStage {
    /// Stage rendered
    pub stage: RenderStageId,
    /// Nodes in extraction order
    pub render_nodes: Vec<RenderNodeFeatureReference>,
    /// Nodes in draw order, filled by the prepare phase
    pub sorted_render_nodes: Vec<RenderNodeFeatureReference>,
}

impl RenderViewStage {
    /// Empty node lists for `stage`
    pub const fn new(stage: RenderStageId) -> Self {
        Self {
            stage,
            render_nodes: Vec::new(),
            sorted_render_nodes: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.render_nodes.clear();
        self.sorted_render_nodes.clear();
    }
}

/// A camera, shadow or reflection view
#[derive(Debug, Clone)]
pub struct RenderView {
    /// Display name
    pub name: String,
    /// World to view transform, used for depth sorting
    pub view_matrix: Mat4,
    pub(crate) stages: Vec<RenderViewStage>,
    pub(crate) visible_objects: Vec<RenderObjectId>,
}

impl RenderView {
    /// Create a view rendering no stage yet
    pub fn new(name: impl Into<String>, view_matrix: Mat4) -> Self {
        Self {
            name: name.into(),
            view_matrix,
            stages: Vec::new(),
            visible_objects: Vec::new(),
        }
    }

    /// Render `stage` from this view
    #[must_use]
    pub fn with_stage(mut self, stage: RenderStageId) -> Self {
        self.add_stage(stage);
        self
    }

    /// Render `stage` from this view. Adding a stage twice has no effect.
    pub fn add_stage(&mut self, stage: RenderStageId) {
        if self.stage(stage).is_none() {
            self.stages.push(RenderViewStage::new(stage));
        }
    }

    /// Node lists of `stage`, if this view renders it
    pub fn stage(&self, stage: RenderStageId) -> Option<&RenderViewStage> {
        self.stages.iter().find(|view_stage| view_stage.stage == stage)
    }

    pub(crate) fn stage_mut(&mut self, stage: RenderStageId) -> Option<&mut RenderViewStage> {
        self.stages.iter_mut().find(|view_stage| view_stage.stage == stage)
    }

    /// Stages rendered by this view
    pub fn stages(&self) -> &[RenderViewStage] {
        &self.stages
    }

    /// Objects visible in this view for the current frame
    pub fn visible_objects(&self) -> &[RenderObjectId] {
        &self.visible_objects
    }

    /// Whether the view renders `stage`
    pub fn renders_stage(&self, stage: RenderStageId) -> bool {
        self.stage(stage).is_some()
    }

    pub(crate) fn reset(&mut self) {
        self.visible_objects.clear();
        for stage in &mut self.stages {
            stage.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_registration_is_idempotent() {
        let opaque = RenderStageId::new(0);
        let mut view = RenderView::new("Main", Mat4::identity()).with_stage(opaque);
        view.add_stage(opaque);

        assert_eq!(view.stages().len(), 1);
        assert!(view.renders_stage(opaque));
        assert!(!view.renders_stage(RenderStageId::new(1)));
    }
}
