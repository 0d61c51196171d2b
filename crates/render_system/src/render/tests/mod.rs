//! Frame-level tests of the render-node layer
//!
//! Shared fixtures: a compiler producing small fixed layouts, a mesh feature
//! and a command list recording everything it receives.

mod resource_groups;

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::RenderSystemConfig;
use crate::foundation::math::{look_at, Mat4, Point3, Vec3};
use crate::render::descriptor::{
    ConstantBufferWriter, DescriptorEntry, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    EffectParameterClass, ResourceHandle,
};
use crate::render::draw::{CommandList, DescriptorSetSlot, DrawArguments};
use crate::render::effect::{EffectBytecode, EffectBytecodeCache, EffectCompiler};
use crate::render::feature::{ConstantBufferOffsetSlots, RenderFeature, RenderFeatureId, RootRenderFeature};
use crate::render::nodes::{ConstantBufferOffsetSlot, RenderNode, ViewNodeReference};
use crate::render::object::{RenderObject, RenderObjectId};
use crate::render::pipeline::{BlendStateDescription, PipelineState, PipelineStateDescription, PixelFormat, RenderOutputDescription};
use crate::render::sort::SortMode;
use crate::render::stage::{RenderStage, RenderStageId};
use crate::render::system::{FrameStats, RenderSystem};
use crate::render::view::RenderView;

/// Per-draw constant buffer size produced by [`TestCompiler`]
const CONSTANT_BUFFER_SIZE: usize = 64;

/// Per-view constant buffer size of `Scene*` effects
const VIEW_CONSTANT_BUFFER_SIZE: usize = 32;

/// Offset of `EyeDepth` in the per-view constants of `Scene*` effects
const EYE_DEPTH_OFFSET: usize = 4;

/// Texture bound by [`MeshFeature`]
const MESH_TEXTURE: ResourceHandle = ResourceHandle(7);

/// Per-frame texture bound by [`MeshFeature`]
const ENVIRONMENT_TEXTURE: ResourceHandle = ResourceHandle(9);

/// Compiles every effect except those named `Broken*`.
///
/// - every effect has a `Depth` per-draw constant at offset 0
/// - `*Unlit` effects have no per-view bindings
/// - `Scene*` effects add a per-frame `Environment` texture, per-view
///   constants with `EyeDepth` and a per-draw `Tint` at offset 16
/// - `*Bindless` effects declare their per-draw constant buffer binding with
///   no descriptors
struct TestCompiler {
    compilations: Rc<Cell<usize>>,
}

impl EffectCompiler for TestCompiler {
    fn compile(&self, effect_name: &str) -> Result<EffectBytecode, String> {
        self.compilations.set(self.compilations.get() + 1);
        if effect_name.starts_with("Broken") {
            return Err(format!("syntax error in {effect_name}"));
        }

        let per_view_layout = if effect_name.ends_with("Unlit") {
            DescriptorSetLayoutBuilder::new()
        } else {
            DescriptorSetLayoutBuilder::new().with_binding("PerView", EffectParameterClass::ConstantBuffer, 1)
        };
        let per_draw_layout = if effect_name.ends_with("Bindless") {
            DescriptorSetLayoutBuilder::new()
                .with_binding("Texture", EffectParameterClass::ShaderResourceView, 1)
                .with_binding("PerDraw", EffectParameterClass::ConstantBuffer, 0)
        } else {
            DescriptorSetLayoutBuilder::new()
                .with_binding("PerDraw", EffectParameterClass::ConstantBuffer, 1)
                .with_binding("Texture", EffectParameterClass::ShaderResourceView, 1)
        };

        let bytecode = EffectBytecode::new(effect_name, per_view_layout, per_draw_layout, CONSTANT_BUFFER_SIZE)
            .with_draw_constant_buffer_member("Depth", 0);
        if !effect_name.starts_with("Scene") {
            return Ok(bytecode);
        }
        Ok(bytecode
            .with_per_frame_layout(
                DescriptorSetLayoutBuilder::new().with_binding("Environment", EffectParameterClass::ShaderResourceView, 1),
            )
            .with_per_view_constant_buffer(VIEW_CONSTANT_BUFFER_SIZE)
            .with_view_constant_buffer_member("EyeDepth", EYE_DEPTH_OFFSET)
            .with_draw_constant_buffer_member("Tint", 16))
    }
}

/// Alpha-blends in the transparent stage and writes the object depth into
/// its constants
struct MeshFeature {
    fallback: Option<String>,
    depth: ConstantBufferOffsetSlot,
    eye_depth: ConstantBufferOffsetSlot,
}

impl MeshFeature {
    fn new(fallback: Option<String>) -> Self {
        Self {
            fallback,
            depth: ConstantBufferOffsetSlot::new(0),
            eye_depth: ConstantBufferOffsetSlot::new(0),
        }
    }
}

impl RenderFeature for MeshFeature {
    fn name(&self) -> &str {
        "Meshes"
    }

    fn initialize(&mut self, slots: &mut ConstantBufferOffsetSlots) {
        self.depth = slots.create_draw_slot("Depth");
        self.eye_depth = slots.create_view_slot("EyeDepth");
    }

    fn process_pipeline_state(&self, _object: &RenderObject, stage: &RenderStage, description: &mut PipelineStateDescription) {
        if stage.name == "Transparent" {
            description.blend_state = BlendStateDescription::alpha_blend();
        }
    }

    fn write_draw_constants(&self, object: &RenderObject, constants: &mut ConstantBufferWriter<'_>) {
        constants.write(self.depth, &object.bounding_center.z);
    }

    fn write_view_constants(&self, view: &RenderView, constants: &mut ConstantBufferWriter<'_>) {
        constants.write(self.eye_depth, &view.view_matrix[(2, 3)]);
    }

    fn write_frame_resources(&self, layout: &DescriptorSetLayout, entries: &mut [DescriptorEntry]) {
        if let Some(offset) = layout.offset_of("Environment") {
            entries[offset] = DescriptorEntry::ShaderResource(ENVIRONMENT_TEXTURE);
        }
    }

    fn write_draw_resources(&self, _object: &RenderObject, layout: &DescriptorSetLayout, entries: &mut [DescriptorEntry]) {
        if let Some(offset) = layout.offset_of("Texture") {
            entries[offset] = DescriptorEntry::ShaderResource(MESH_TEXTURE);
        }
    }

    fn fallback_effect(&self, _object: &RenderObject, _effect_name: &str) -> Option<String> {
        self.fallback.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    SetPipelineState(PipelineState),
    SetDescriptorSet(DescriptorSetSlot, DescriptorSet, Vec<DescriptorEntry>),
    Draw(DrawArguments),
}

#[derive(Debug, Default)]
struct RecordingCommandList {
    commands: Vec<Command>,
}

impl RecordingCommandList {
    fn draws(&self) -> usize {
        self.commands.iter().filter(|command| matches!(command, Command::Draw(_))).count()
    }

    fn descriptor_sets(&self, slot: DescriptorSetSlot) -> Vec<(DescriptorSet, Vec<DescriptorEntry>)> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::SetDescriptorSet(bound, set, entries) if *bound == slot => Some((*set, entries.clone())),
                _ => None,
            })
            .collect()
    }
}

impl CommandList for RecordingCommandList {
    fn set_pipeline_state(&mut self, pipeline_state: &PipelineState) {
        self.commands.push(Command::SetPipelineState(pipeline_state.clone()));
    }

    fn set_descriptor_set(&mut self, slot: DescriptorSetSlot, set: &DescriptorSet, entries: &[DescriptorEntry]) {
        self.commands.push(Command::SetDescriptorSet(slot, *set, entries.to_vec()));
    }

    fn draw(&mut self, arguments: &DrawArguments) {
        self.commands.push(Command::Draw(*arguments));
    }
}

/// Three stages over two permutation slots, one mesh feature and two views.
///
/// - `opaque`: slot "Main", front to back
/// - `transparent`: slot "Main", back to front
/// - `shadow`: slot "ShadowCaster", by state, depth only
///
/// The main view looks down -z from (0, 0, 10) and renders opaque and
/// transparent; the shadow view renders shadow.
struct TestScene {
    system: RenderSystem,
    meshes: RenderFeatureId,
    opaque: RenderStageId,
    transparent: RenderStageId,
    shadow: RenderStageId,
    main_view: ViewNodeReference,
    shadow_view: ViewNodeReference,
    compilations: Rc<Cell<usize>>,
}

impl TestScene {
    fn new() -> Self {
        Self::build(RenderSystemConfig::default(), None)
    }

    fn with_config(config: RenderSystemConfig) -> Self {
        Self::build(config, None)
    }

    fn with_fallback(fallback: &str) -> Self {
        Self::build(RenderSystemConfig::default(), Some(fallback.to_string()))
    }

    fn build(config: RenderSystemConfig, fallback: Option<String>) -> Self {
        let compilations = Rc::new(Cell::new(0));
        let compiler = TestCompiler { compilations: Rc::clone(&compilations) };
        let mut system =
            RenderSystem::with_bytecode_cache(config, Box::new(compiler), Arc::new(EffectBytecodeCache::new()))
                .unwrap();

        let opaque = system
            .add_render_stage(RenderStage::new("Opaque", "Main").with_sort_mode(SortMode::FrontToBack))
            .unwrap();
        let transparent = system
            .add_render_stage(RenderStage::new("Transparent", "Main").with_sort_mode(SortMode::BackToFront))
            .unwrap();
        let shadow = system
            .add_render_stage(
                RenderStage::new("ShadowCaster", "ShadowCaster")
                    .with_sort_mode(SortMode::StateChange)
                    .with_output(RenderOutputDescription::depth_only(PixelFormat::D32Float)),
            )
            .unwrap();

        let meshes = system.add_render_feature(Box::new(MeshFeature::new(fallback))).unwrap();

        let camera = look_at(&Point3::new(0.0, 0.0, 10.0), &Point3::origin(), &Vec3::y());
        let main_view = system
            .add_view(RenderView::new("Main", camera).with_stage(opaque).with_stage(transparent))
            .unwrap();
        let shadow_view = system
            .add_view(RenderView::new("Shadow", Mat4::identity()).with_stage(shadow))
            .unwrap();

        Self {
            system,
            meshes,
            opaque,
            transparent,
            shadow,
            main_view,
            shadow_view,
            compilations,
        }
    }

    /// Opaque shadow-casting mesh at depth `10 - z` in the main view
    fn add_mesh(&mut self, effect: &str, z: f32) -> RenderObjectId {
        let object = RenderObject::new(self.meshes)
            .with_stage(self.opaque, effect)
            .with_stage(self.shadow, effect)
            .with_bounding_center(Point3::new(0.0, 0.0, z))
            .with_draw(DrawArguments::indexed(36));
        self.system.add_render_object(object).unwrap()
    }

    /// Mesh drawn only in the transparent stage
    fn add_transparent_mesh(&mut self, effect: &str, z: f32) -> RenderObjectId {
        let object = RenderObject::new(self.meshes)
            .with_stage(self.transparent, effect)
            .with_bounding_center(Point3::new(0.0, 0.0, z))
            .with_draw(DrawArguments::vertices(6));
        self.system.add_render_object(object).unwrap()
    }

    /// Reset and make `objects` visible in both views
    fn begin_frame(&mut self, objects: &[RenderObjectId]) {
        self.system.reset();
        self.system.set_visible_objects(self.main_view, objects.iter().copied()).unwrap();
        self.system.set_visible_objects(self.shadow_view, objects.iter().copied()).unwrap();
    }

    /// Start a frame where only the main view sees `objects`, then extract and prepare
    fn prepare_main_view(&mut self, objects: &[RenderObjectId]) -> FrameStats {
        self.system.reset();
        self.system.set_visible_objects(self.main_view, objects.iter().copied()).unwrap();
        self.system.extract().unwrap();
        self.system.prepare().unwrap()
    }

    fn feature(&self) -> &RootRenderFeature {
        self.system.feature(self.meshes).unwrap()
    }

    fn render_nodes(&self) -> Vec<RenderNode> {
        self.feature().render_nodes().map(|(_, node)| *node).collect()
    }

    /// Objects of `stage` in `view`, in sorted order
    fn sorted_objects(&self, view: ViewNodeReference, stage: RenderStageId) -> Vec<RenderObjectId> {
        self.system
            .view(view)
            .unwrap()
            .stage(stage)
            .unwrap()
            .sorted_render_nodes
            .iter()
            .map(|reference| reference.object)
            .collect()
    }
}
