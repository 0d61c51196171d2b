//! Render objects
//!
//! A render object is owned by the scene side and registered with the render
//! system, which hands back a [`RenderObjectId`] that stays valid across frames
//! until the object is removed. Nodes refer to objects by this id only.

use crate::foundation::collections::new_key_type;
use crate::foundation::math::Point3;
use crate::render::draw::DrawArguments;
use crate::render::feature::RenderFeatureId;
use crate::render::nodes::StaticObjectNodeReference;
use crate::render::stage::RenderStageId;

new_key_type! {
    /// Stable handle of a registered render object
    pub struct RenderObjectId;
}

/// Participation of an object in one render stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveRenderStage {
    /// Whether the object is drawn in this stage
    pub active: bool,
    /// Effect to resolve for this stage
    pub effect_name: String,
}

impl ActiveRenderStage {
    /// Active stage using `effect_name`
    pub fn new(effect_name: impl Into<String>) -> Self {
        Self {
            active: true,
            effect_name: effect_name.into(),
        }
    }
}

/// A renderable unit (mesh, particle system, sprite batch...)
#[derive(Debug, Clone)]
pub struct RenderObject {
    /// Feature responsible for this object
    pub feature: RenderFeatureId,
    /// Stage participation, indexed by [`RenderStageId`]
    pub active_stages: Vec<ActiveRenderStage>,
    /// World-space centre used for depth sorting
    pub bounding_center: Point3,
    /// Draw call parameters
    pub draw: DrawArguments,
    /// Disabled objects are ignored during extraction
    pub enabled: bool,
    pub(crate) static_node: StaticObjectNodeReference,
}

impl RenderObject {
    /// Create an enabled object handled by `feature`, active in no stage
    pub fn new(feature: RenderFeatureId) -> Self {
        Self {
            feature,
            active_stages: Vec::new(),
            bounding_center: Point3::origin(),
            draw: DrawArguments::default(),
            enabled: true,
            static_node: StaticObjectNodeReference::INVALID,
        }
    }

    /// Activate `stage` with the given effect
    #[must_use]
    pub fn with_stage(mut self, stage: RenderStageId, effect_name: impl Into<String>) -> Self {
        self.set_stage(stage, effect_name);
        self
    }

    /// Set the world-space bounding centre
    #[must_use]
    pub fn with_bounding_center(mut self, center: Point3) -> Self {
        self.bounding_center = center;
        self
    }

    /// Set the draw arguments
    #[must_use]
    pub fn with_draw(mut self, draw: DrawArguments) -> Self {
        self.draw = draw;
        self
    }

    /// Activate `stage` with the given effect, replacing any previous effect
    pub fn set_stage(&mut self, stage: RenderStageId, effect_name: impl Into<String>) {
        let index = stage.index();
        if self.active_stages.len() <= index {
            self.active_stages.resize_with(index + 1, ActiveRenderStage::default);
        }
        self.active_stages[index] = ActiveRenderStage::new(effect_name);
    }

    /// Stop drawing the object in `stage`
    pub fn deactivate_stage(&mut self, stage: RenderStageId) {
        if let Some(active) = self.active_stages.get_mut(stage.index()) {
            active.active = false;
        }
    }

    /// Effect used in `stage`, if the object is active there
    pub fn active_effect(&self, stage: RenderStageId) -> Option<&str> {
        self.active_stages
            .get(stage.index())
            .filter(|active| active.active)
            .map(|active| active.effect_name.as_str())
    }

    /// Slot of this object in its feature's static arrays
    pub const fn static_node(&self) -> StaticObjectNodeReference {
        self.static_node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_activation() {
        let opaque = RenderStageId::new(0);
        let shadow = RenderStageId::new(2);
        let mut object = RenderObject::new(RenderFeatureId::new(0))
            .with_stage(shadow, "ShadowCaster");

        assert_eq!(object.active_effect(opaque), None);
        assert_eq!(object.active_effect(shadow), Some("ShadowCaster"));
        assert_eq!(object.active_stages.len(), 3);

        object.set_stage(opaque, "Standard");
        object.deactivate_stage(shadow);
        assert_eq!(object.active_effect(opaque), Some("Standard"));
        assert_eq!(object.active_effect(shadow), None);
        assert!(!object.static_node().is_valid());
    }
}
