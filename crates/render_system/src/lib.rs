//! # Render System
//!
//! Render-node indexing and per-frame allocation for a data-oriented renderer.
//!
//! ## Features
//!
//! - **Index-derived addressing**: per-object effect permutations live at
//!   `object * slot_count + slot`, with no hash lookups in the frame loop
//! - **Resource groups**: per-frame, per-view and per-draw descriptor sets,
//!   with constant-buffer members addressed through named offset slots
//! - **Per-frame arenas**: descriptor and constant-buffer bump allocators,
//!   reset every frame and grown when a frame ran out of space
//! - **Render-node state machine**: every node moves through
//!   `Unresolved -> Allocated -> Prepared -> Drawn`, or is skipped
//! - **Pipeline state cache**: immutable, deduplicated fixed-function state
//! - **Configuration**: TOML or RON through serde
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_system::prelude::*;
//!
//! struct Compiler;
//!
//! impl EffectCompiler for Compiler {
//!     fn compile(&self, effect_name: &str) -> Result<EffectBytecode, String> {
//!         Ok(EffectBytecode::new(
//!             effect_name,
//!             DescriptorSetLayoutBuilder::new(),
//!             DescriptorSetLayoutBuilder::new(),
//!             0,
//!         ))
//!     }
//! }
//!
//! struct Meshes;
//!
//! impl RenderFeature for Meshes {
//!     fn name(&self) -> &str {
//!         "Meshes"
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut system = RenderSystem::new(RenderSystemConfig::default(), Box::new(Compiler))?;
//!     let opaque = system.add_render_stage(RenderStage::new("Opaque", "Main"))?;
//!     let meshes = system.add_render_feature(Box::new(Meshes))?;
//!     let main_view = system.add_view(RenderView::new("Main", Mat4::identity()).with_stage(opaque))?;
//!
//!     let teapot = system.add_render_object(
//!         RenderObject::new(meshes).with_stage(opaque, "Teapot").with_draw(DrawArguments::indexed(36)),
//!     )?;
//!
//!     system.reset();
//!     system.set_visible_objects(main_view, [teapot])?;
//!     system.extract()?;
//!     let stats = system.prepare()?;
//!     println!("{} render nodes prepared", stats.prepared);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod render;

/// Common imports for render system users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, RenderSystemConfig},
        foundation::math::{Mat4, Point3, Vec3},
        render::{
            CommandList, ConstantBufferOffsetSlot, ConstantBufferOffsetSlots, ConstantBufferWriter,
            DescriptorEntry, DescriptorSet, DescriptorSetLayout,
            DescriptorSetLayoutBuilder, DescriptorSetSlot, DrawArguments, DrawStats,
            EffectBytecode, EffectCompiler, EffectParameterClass, FrameStats, PipelineState,
            PipelineStateDescription, RenderError, RenderFeature, RenderFeatureId, RenderObject,
            RenderObjectId, RenderResult, RenderStage, RenderStageId, RenderSystem, RenderView,
            SortMode, ViewNodeReference,
        },
    };
}
