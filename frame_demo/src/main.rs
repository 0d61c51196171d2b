//! Headless frame loop over the render system
//!
//! Builds a small scene (opaque, transparent and shadow stages over two
//! views), runs a few frames against a command list that only logs what it
//! is given, and reports the per-frame counters.
//!
//! Usage: `frame_demo [config.toml|config.ron]`

use render_system::foundation::logging;
use render_system::prelude::*;
use render_system::render::pipeline::{BlendStateDescription, PixelFormat, RenderOutputDescription};
use render_system::render::ResourceHandle;

/// Per-draw constants: object centre and a padding word
const DRAW_CONSTANTS_SIZE: usize = 16;

/// Per-view constants: the view matrix, column-major
const VIEW_CONSTANTS_SIZE: usize = 64;

const ALBEDO_TEXTURE: ResourceHandle = ResourceHandle(1);
const SKY_TEXTURE: ResourceHandle = ResourceHandle(2);

/// Produces fixed layouts for every effect; `Missing*` effects fail to compile
struct DemoCompiler;

impl EffectCompiler for DemoCompiler {
    fn compile(&self, effect_name: &str) -> Result<EffectBytecode, String> {
        if effect_name.starts_with("Missing") {
            return Err(format!("no source for effect {effect_name}"));
        }

        let per_frame = DescriptorSetLayoutBuilder::new().with_binding("Sky", EffectParameterClass::ShaderResourceView, 1);
        let per_view = DescriptorSetLayoutBuilder::new()
            .with_binding("Camera", EffectParameterClass::ConstantBuffer, 1);
        let per_draw = DescriptorSetLayoutBuilder::new()
            .with_binding("PerDraw", EffectParameterClass::ConstantBuffer, 1)
            .with_binding("Albedo", EffectParameterClass::ShaderResourceView, 1);

        Ok(EffectBytecode::new(effect_name, per_view, per_draw, DRAW_CONSTANTS_SIZE)
            .with_per_frame_layout(per_frame)
            .with_per_view_constant_buffer(VIEW_CONSTANTS_SIZE)
            .with_view_constant_buffer_member("View", 0)
            .with_draw_constant_buffer_member("Center", 0))
    }
}

#[derive(Default)]
struct MeshRenderFeature {
    center: ConstantBufferOffsetSlot,
    view: ConstantBufferOffsetSlot,
}

impl RenderFeature for MeshRenderFeature {
    fn name(&self) -> &str {
        "Meshes"
    }

    fn initialize(&mut self, slots: &mut ConstantBufferOffsetSlots) {
        self.center = slots.create_draw_slot("Center");
        self.view = slots.create_view_slot("View");
    }

    fn process_pipeline_state(&self, _object: &RenderObject, stage: &RenderStage, description: &mut PipelineStateDescription) {
        if stage.name == "Transparent" {
            description.blend_state = BlendStateDescription::alpha_blend();
        }
    }

    fn write_draw_constants(&self, object: &RenderObject, constants: &mut ConstantBufferWriter<'_>) {
        let center = [object.bounding_center.x, object.bounding_center.y, object.bounding_center.z, 0.0_f32];
        constants.write(self.center, &center);
    }

    fn write_view_constants(&self, view: &RenderView, constants: &mut ConstantBufferWriter<'_>) {
        if let Ok(matrix) = <[f32; 16]>::try_from(view.view_matrix.as_slice()) {
            constants.write(self.view, &matrix);
        }
    }

    fn write_frame_resources(&self, layout: &DescriptorSetLayout, entries: &mut [DescriptorEntry]) {
        if let Some(entry) = layout.offset_of("Sky").and_then(|offset| entries.get_mut(offset)) {
            *entry = DescriptorEntry::ShaderResource(SKY_TEXTURE);
        }
    }

    fn write_draw_resources(&self, _object: &RenderObject, layout: &DescriptorSetLayout, entries: &mut [DescriptorEntry]) {
        if let Some(entry) = layout.offset_of("Albedo").and_then(|offset| entries.get_mut(offset)) {
            *entry = DescriptorEntry::ShaderResource(ALBEDO_TEXTURE);
        }
    }

    fn fallback_effect(&self, _object: &RenderObject, _effect_name: &str) -> Option<String> {
        Some("Unlit".to_string())
    }
}

/// Logs every command instead of submitting it
#[derive(Default)]
struct LoggingCommandList {
    commands: usize,
}

impl CommandList for LoggingCommandList {
    fn set_pipeline_state(&mut self, pipeline_state: &PipelineState) {
        self.commands += 1;
        log::debug!("bind pipeline state {:016x}", pipeline_state.hash_value());
    }

    fn set_descriptor_set(&mut self, slot: DescriptorSetSlot, set: &DescriptorSet, entries: &[DescriptorEntry]) {
        self.commands += 1;
        log::debug!("bind {slot:?} set at {} ({} entries)", set.offset(), entries.len());
    }

    fn draw(&mut self, arguments: &DrawArguments) {
        self.commands += 1;
        log::debug!("draw {arguments:?}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_with_level(logging::LevelFilter::Info);

    log::info!("Starting render system frame demo");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading configuration from {path}");
            RenderSystemConfig::load_from_file(&path)?
        }
        None => RenderSystemConfig::default(),
    };

    let mut system = RenderSystem::new(config, Box::new(DemoCompiler))?;

    let opaque = system.add_render_stage(RenderStage::new("Opaque", "Main").with_sort_mode(SortMode::FrontToBack))?;
    let transparent =
        system.add_render_stage(RenderStage::new("Transparent", "Main").with_sort_mode(SortMode::BackToFront))?;
    let shadow = system.add_render_stage(
        RenderStage::new("ShadowCaster", "ShadowCaster")
            .with_sort_mode(SortMode::StateChange)
            .with_output(RenderOutputDescription::depth_only(PixelFormat::D32Float)),
    )?;

    let meshes = system.add_render_feature(Box::new(MeshRenderFeature::default()))?;

    let camera = render_system::foundation::math::look_at(&Point3::new(0.0, 2.0, 10.0), &Point3::origin(), &Vec3::y());
    let main_view = system.add_view(RenderView::new("Main", camera).with_stage(opaque).with_stage(transparent))?;
    let shadow_view = system.add_view(RenderView::new("Sun", Mat4::identity()).with_stage(shadow))?;

    let mut objects = Vec::new();
    for (index, effect) in ["Lit", "Metal", "Lit", "MissingShader"].iter().enumerate() {
        let offset = f32::from(u8::try_from(index).unwrap_or(u8::MAX));
        let object = RenderObject::new(meshes)
            .with_stage(opaque, *effect)
            .with_stage(shadow, *effect)
            .with_bounding_center(Point3::new(offset * 1.5, 0.0, -offset))
            .with_draw(DrawArguments::indexed(36));
        objects.push(system.add_render_object(object)?);
    }
    let glass = system.add_render_object(
        RenderObject::new(meshes)
            .with_stage(transparent, "Glass")
            .with_bounding_center(Point3::new(0.0, 0.0, 2.0))
            .with_draw(DrawArguments::vertices(6)),
    )?;
    objects.push(glass);

    for frame in 0..3 {
        if frame == 2 {
            let removed = objects.remove(0);
            system.remove_render_object(removed)?;
            log::info!("Removed {removed:?} before frame {frame}");
        }

        system.reset();
        system.set_visible_objects(main_view, objects.iter().copied())?;
        system.set_visible_objects(shadow_view, objects.iter().copied())?;

        let mut commands = LoggingCommandList::default();
        let draw = system.render_frame(&mut commands)?;
        let stats = system.stats();

        log::info!(
            "Frame {}: {} render nodes, {} prepared, {} skipped (effect {}, allocation {}), {} effects resolved",
            stats.frame,
            stats.render_nodes,
            stats.prepared,
            stats.skipped(),
            stats.skipped_effect,
            stats.skipped_allocation,
            stats.effects_resolved,
        );
        log::info!(
            "Frame {}: {} draw calls, {} pipeline binds, {} commands, {} pipeline states cached",
            stats.frame,
            draw.draw_calls,
            draw.pipeline_binds,
            commands.commands,
            system.pipeline_state_count(),
        );
        log::info!(
            "Frame {}: descriptor pool {}/{}, constant buffer {}/{} bytes",
            stats.frame,
            system.descriptor_pool().allocated(),
            system.descriptor_pool().capacity(),
            system.constant_buffers().allocated(),
            system.constant_buffers().capacity(),
        );
    }

    log::info!("Frame demo finished");
    Ok(())
}
