//! Frame orchestration
//!
//! [`RenderSystem`] owns the registered objects, stages, views and features
//! together with the frame arenas, and drives the frame phases:
//!
//! 1. [`RenderSystem::reset`] starts a frame and grows exhausted arenas
//! 2. [`RenderSystem::set_visible_objects`] receives visibility per view
//! 3. [`RenderSystem::extract`] builds object, view-object and render nodes
//! 4. [`RenderSystem::prepare`] resolves effects, allocates and sorts
//! 5. [`RenderSystem::draw`] emits commands for one (view, stage)

use std::ops::AddAssign;
use std::sync::Arc;

use crate::config::{ConfigError, RenderSystemConfig};
use crate::foundation::collections::{NodeIndex, SlotMap};
use crate::foundation::math::view_depth;
use crate::foundation::time::Stopwatch;
use crate::render::descriptor::{ConstantBufferPool, DescriptorPool, DescriptorSet, DescriptorSetLayoutCache};
use crate::render::draw::{CommandList, DescriptorSetSlot};
use crate::render::effect::{EffectBytecodeCache, EffectCompiler};
use crate::render::feature::{PrepareContext, RenderFeature, RenderFeatureId, RootRenderFeature};
use crate::render::nodes::ViewNodeReference;
use crate::render::object::{RenderObject, RenderObjectId};
use crate::render::pipeline::{PipelineState, PipelineStateCache, PipelineStateId};
use crate::render::sort::{sort_keys, SortKey};
use crate::render::stage::{RenderStage, RenderStageId};
use crate::render::view::{RenderNodeFeatureReference, RenderView};
use crate::render::{RenderError, RenderResult};

/// Counters of the current frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number
    pub frame: u64,
    /// Registered views
    pub views: usize,
    /// Object nodes created by extraction
    pub object_nodes: usize,
    /// View object nodes created by extraction
    pub view_object_nodes: usize,
    /// Render nodes created by extraction
    pub render_nodes: usize,
    /// Effect object nodes created by preparation
    pub effect_object_nodes: usize,
    /// Effects compiled or loaded from the bytecode cache
    pub effects_resolved: usize,
    /// Render nodes ready to draw
    pub prepared: usize,
    /// Render nodes dropped because their effect is unusable
    pub skipped_effect: usize,
    /// Render nodes dropped because an arena ran out of space
    pub skipped_allocation: usize,
    /// Render nodes dropped because their object was removed mid-frame
    pub skipped_removed: usize,
    /// Distinct pipeline states known after preparation
    pub pipeline_states: usize,
}

impl FrameStats {
    /// Total nodes dropped this frame
    pub const fn skipped(&self) -> usize {
        self.skipped_effect + self.skipped_allocation + self.skipped_removed
    }
}

/// Counters of one or more draw passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Draw calls issued
    pub draw_calls: usize,
    /// Pipeline state changes
    pub pipeline_binds: usize,
    /// Nodes not drawable this frame
    pub skipped: usize,
}

impl AddAssign for DrawStats {
    fn add_assign(&mut self, other: Self) {
        self.draw_calls += other.draw_calls;
        self.pipeline_binds += other.pipeline_binds;
        self.skipped += other.skipped;
    }
}

/// Owner of every render object, view, feature and frame arena
pub struct RenderSystem {
    config: RenderSystemConfig,
    frame: u64,
    objects: SlotMap<RenderObjectId, RenderObject>,
    stages: Vec<RenderStage>,
    views: Vec<RenderView>,
    features: Vec<RootRenderFeature>,
    compiler: Box<dyn EffectCompiler>,
    bytecode_cache: Arc<EffectBytecodeCache>,
    layouts: DescriptorSetLayoutCache,
    descriptor_pool: DescriptorPool,
    constant_buffers: ConstantBufferPool,
    pipeline_states: PipelineStateCache,
    stats: FrameStats,
}

impl std::fmt::Debug for RenderSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSystem")
            .field("frame", &self.frame)
            .field("objects", &self.objects.len())
            .field("stages", &self.stages.len())
            .field("views", &self.views.len())
            .field("features", &self.features)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl RenderSystem {
    /// Create a render system sharing the process-wide bytecode cache
    pub fn new(config: RenderSystemConfig, compiler: Box<dyn EffectCompiler>) -> Result<Self, ConfigError> {
        Self::with_bytecode_cache(config, compiler, EffectBytecodeCache::shared())
    }

    /// Create a render system with its own bytecode cache
    pub fn with_bytecode_cache(
        config: RenderSystemConfig,
        compiler: Box<dyn EffectCompiler>,
        bytecode_cache: Arc<EffectBytecodeCache>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let descriptor_pool = DescriptorPool::with_capacity(config.descriptor_pool.initial_capacity);
        let constant_buffers =
            ConstantBufferPool::new(config.constant_buffer.capacity_bytes, config.constant_buffer.alignment);
        log::info!(
            "Render system created ({} descriptor entries, {} constant bytes)",
            descriptor_pool.capacity(),
            constant_buffers.capacity()
        );

        Ok(Self {
            config,
            frame: 0,
            objects: SlotMap::with_key(),
            stages: Vec::new(),
            views: Vec::new(),
            features: Vec::new(),
            compiler,
            bytecode_cache,
            layouts: DescriptorSetLayoutCache::new(),
            descriptor_pool,
            constant_buffers,
            pipeline_states: PipelineStateCache::new(),
            stats: FrameStats::default(),
        })
    }

    /// Register a stage and its effect slot with every feature
    pub fn add_render_stage(&mut self, stage: RenderStage) -> RenderResult<RenderStageId> {
        let max = self.config.max_effect_permutation_slots;
        let fits = |feature: &RootRenderFeature| {
            feature.effect_permutation_slot(&stage.effect_slot_name).is_some()
                || (feature.effect_permutation_slot_count() as usize) < max
        };
        if !self.features.iter().all(fits) {
            return Err(RenderError::TooManyPermutationSlots { max });
        }

        let id = RenderStageId::new(u32::try_from(self.stages.len()).unwrap_or(u32::MAX));
        for feature in &mut self.features {
            feature.register_stage(id, &stage.effect_slot_name)?;
        }
        log::info!("Registered render stage '{}' as {id} (effect slot '{}')", stage.name, stage.effect_slot_name);
        self.stages.push(stage);
        Ok(id)
    }

    /// Register a feature. Every stage registered so far gets a slot in it.
    pub fn add_render_feature(&mut self, feature: Box<dyn RenderFeature>) -> RenderResult<RenderFeatureId> {
        let id = RenderFeatureId::new(u32::try_from(self.features.len()).unwrap_or(u32::MAX));
        let mut root = RootRenderFeature::new(id, feature, self.config.max_effect_permutation_slots);
        for (stage_index, stage) in self.stages.iter().enumerate() {
            let stage_id = RenderStageId::new(u32::try_from(stage_index).unwrap_or(u32::MAX));
            root.register_stage(stage_id, &stage.effect_slot_name)?;
        }

        log::info!("Registered render feature '{}' as {id}", root.name());
        self.features.push(root);
        Ok(id)
    }

    /// Register a view. Its stages must already be registered.
    pub fn add_view(&mut self, view: RenderView) -> RenderResult<ViewNodeReference> {
        if let Some(unknown) = view.stages().iter().find(|view_stage| view_stage.stage.index() >= self.stages.len()) {
            return Err(RenderError::UnknownRenderStage(unknown.stage.raw()));
        }

        let reference = ViewNodeReference::from_index(self.views.len());
        log::info!("Registered view '{}' as {reference}", view.name);
        self.views.push(view);
        Ok(reference)
    }

    /// Register an object with its feature
    pub fn add_render_object(&mut self, object: RenderObject) -> RenderResult<RenderObjectId> {
        let feature = self
            .features
            .get_mut(object.feature.index())
            .ok_or(RenderError::UnknownRenderFeature(object.feature.raw()))?;

        let id = self.objects.insert_with_key(|id| {
            let mut object = object;
            object.static_node = feature.add_object(id);
            object
        });
        log::debug!("Added render object {id:?} to '{}'", feature.name());
        Ok(id)
    }

    /// Unregister an object and return it.
    ///
    /// Render nodes already extracted for it this frame are skipped.
    pub fn remove_render_object(&mut self, id: RenderObjectId) -> RenderResult<RenderObject> {
        let object = self.objects.remove(id).ok_or(RenderError::UnknownRenderObject)?;
        let feature = self
            .features
            .get_mut(object.feature.index())
            .ok_or(RenderError::UnknownRenderFeature(object.feature.raw()))?;

        if let Some(moved) = feature.remove_object(object.static_node)? {
            if let Some(moved_object) = self.objects.get_mut(moved) {
                moved_object.static_node = object.static_node;
            }
        }
        log::debug!("Removed render object {id:?} from '{}'", feature.name());
        Ok(object)
    }

    /// Registered object
    pub fn render_object(&self, id: RenderObjectId) -> Option<&RenderObject> {
        self.objects.get(id)
    }

    /// Registered object, mutably. Its feature must not change.
    pub fn render_object_mut(&mut self, id: RenderObjectId) -> Option<&mut RenderObject> {
        self.objects.get_mut(id)
    }

    /// Number of registered objects
    pub fn render_object_count(&self) -> usize {
        self.objects.len()
    }

    /// Registered view
    pub fn view(&self, view: ViewNodeReference) -> RenderResult<&RenderView> {
        self.views.get(view.index()).ok_or(RenderError::UnknownRenderView(view.raw()))
    }

    /// Registered view, mutably
    pub fn view_mut(&mut self, view: ViewNodeReference) -> RenderResult<&mut RenderView> {
        self.views.get_mut(view.index()).ok_or(RenderError::UnknownRenderView(view.raw()))
    }

    /// Registered stage
    pub fn stage(&self, stage: RenderStageId) -> RenderResult<&RenderStage> {
        self.stages.get(stage.index()).ok_or(RenderError::UnknownRenderStage(stage.raw()))
    }

    /// Registered feature
    pub fn feature(&self, feature: RenderFeatureId) -> RenderResult<&RootRenderFeature> {
        self.features.get(feature.index()).ok_or(RenderError::UnknownRenderFeature(feature.raw()))
    }

    /// Registered feature, mutably
    pub fn feature_mut(&mut self, feature: RenderFeatureId) -> RenderResult<&mut RootRenderFeature> {
        self.features.get_mut(feature.index()).ok_or(RenderError::UnknownRenderFeature(feature.raw()))
    }

    /// Replace the visible objects of `view` for this frame
    pub fn set_visible_objects(
        &mut self,
        view: ViewNodeReference,
        objects: impl IntoIterator<Item = RenderObjectId>,
    ) -> RenderResult<()> {
        let render_view = self.view_mut(view)?;
        render_view.visible_objects.clear();
        render_view.visible_objects.extend(objects);
        Ok(())
    }

    /// Start a new frame.
    ///
    /// An arena that ran out of space last frame is grown to its observed
    /// demand times the configured growth factor before being reset.
    pub fn reset(&mut self) {
        self.frame += 1;

        if self.config.auto_grow_pools {
            if self.descriptor_pool.is_exhausted() {
                let config = &self.config.descriptor_pool;
                let capacity = grown_capacity(self.descriptor_pool.peak_demand(), config.growth_factor, config.max_capacity);
                log::debug!("Descriptor pool exhausted in frame {}, growing to {capacity}", self.frame - 1);
                self.descriptor_pool.grow_to(capacity);
            }
            if self.constant_buffers.is_exhausted() {
                let config = &self.config.constant_buffer;
                let capacity =
                    grown_capacity(self.constant_buffers.peak_demand(), config.growth_factor, config.max_capacity_bytes);
                log::debug!("Constant buffer exhausted in frame {}, growing to {capacity}", self.frame - 1);
                self.constant_buffers.grow_to(capacity);
            }
        }

        self.descriptor_pool.reset();
        self.constant_buffers.reset();
        for feature in &mut self.features {
            feature.reset();
        }
        for view in &mut self.views {
            view.reset();
        }
        self.stats = FrameStats {
            frame: self.frame,
            views: self.views.len(),
            ..FrameStats::default()
        };
    }

    /// Build the per-frame nodes of every visible, enabled object.
    ///
    /// Runs once per frame, after visibility is set.
    pub fn extract(&mut self) -> RenderResult<()> {
        let stopwatch = Stopwatch::start_new();

        for (view_index, view) in self.views.iter_mut().enumerate() {
            let view_reference = ViewNodeReference::from_index(view_index);
            let RenderView { stages, visible_objects, .. } = view;

            for &object_id in visible_objects.iter() {
                let Some(object) = self.objects.get(object_id) else {
                    log::trace!("{view_reference}: visible object {object_id:?} is not registered");
                    continue;
                };
                if !object.enabled {
                    continue;
                }
                let feature = self
                    .features
                    .get_mut(object.feature.index())
                    .ok_or(RenderError::UnknownRenderFeature(object.feature.raw()))?;

                let object_node = feature.get_or_create_object_node(object_id, object)?;
                let view_object_node = feature.create_view_object_node(view_reference, object_id, object_node);

                for view_stage in stages.iter_mut() {
                    if object.active_effect(view_stage.stage).is_none() {
                        continue;
                    }
                    let node = feature.create_render_node(object_id, view_reference, view_object_node, view_stage.stage);
                    view_stage.render_nodes.push(RenderNodeFeatureReference {
                        feature: object.feature,
                        node,
                        object: object_id,
                    });
                }
            }
        }

        for feature in &self.features {
            self.stats.object_nodes += feature.object_node_count();
            self.stats.view_object_nodes += feature.view_object_node_count();
            self.stats.render_nodes += feature.render_node_count();
        }
        log::debug!(
            "Frame {} extract: {} render nodes in {:.3} ms",
            self.frame,
            self.stats.render_nodes,
            stopwatch.elapsed_ms()
        );
        Ok(())
    }

    /// Resolve effects, allocate resources and sort every view stage
    pub fn prepare(&mut self) -> RenderResult<FrameStats> {
        let stopwatch = Stopwatch::start_new();

        let mut context = PrepareContext {
            frame: self.frame,
            objects: &self.objects,
            stages: &self.stages,
            views: &self.views,
            compiler: self.compiler.as_ref(),
            bytecode_cache: self.bytecode_cache.as_ref(),
            layouts: &mut self.layouts,
            descriptor_pool: &mut self.descriptor_pool,
            constant_buffers: &mut self.constant_buffers,
            pipeline_states: &mut self.pipeline_states,
            stats: &mut self.stats,
        };
        for feature in &mut self.features {
            feature.prepare_effect_permutations(&mut context)?;
        }
        for feature in &mut self.features {
            feature.prepare(&mut context)?;
        }

        Self::sort_view_stages(&mut self.views, &self.stages, &self.features, &self.objects)?;

        self.stats.effect_object_nodes = self.features.iter().map(RootRenderFeature::effect_object_node_count).sum();
        self.stats.pipeline_states = self.pipeline_states.len();
        log::debug!(
            "Frame {} prepare: {} prepared, {} skipped in {:.3} ms",
            self.frame,
            self.stats.prepared,
            self.stats.skipped(),
            stopwatch.elapsed_ms()
        );
        Ok(self.stats.clone())
    }

    fn sort_view_stages(
        views: &mut [RenderView],
        stages: &[RenderStage],
        features: &[RootRenderFeature],
        objects: &SlotMap<RenderObjectId, RenderObject>,
    ) -> RenderResult<()> {
        let mut keys = Vec::new();
        for view in views.iter_mut() {
            let view_matrix = view.view_matrix;
            for view_stage in &mut view.stages {
                let stage = stages
                    .get(view_stage.stage.index())
                    .ok_or(RenderError::UnknownRenderStage(view_stage.stage.raw()))?;

                let Some(sort_mode) = stage.sort_mode else {
                    view_stage.sorted_render_nodes.clone_from(&view_stage.render_nodes);
                    continue;
                };

                keys.clear();
                for &reference in &view_stage.render_nodes {
                    let feature = features
                        .get(reference.feature.index())
                        .ok_or(RenderError::UnknownRenderFeature(reference.feature.raw()))?;
                    let node = feature.render_node(reference.node)?;
                    let depth = objects
                        .get(reference.object)
                        .map_or(0.0, |object| view_depth(&view_matrix, &object.bounding_center));
                    let value = sort_mode.compute_key(
                        depth,
                        node.pipeline_state.map(PipelineStateId::raw),
                        node.render_effect.raw(),
                    );
                    keys.push(SortKey { value, node: reference });
                }
                sort_keys(&mut keys);

                view_stage.sorted_render_nodes.clear();
                view_stage.sorted_render_nodes.extend(keys.iter().map(|key| key.node));
            }
        }
        Ok(())
    }

    /// Emit the commands of one (view, stage) pair in sorted order
    pub fn draw(
        &mut self,
        view: ViewNodeReference,
        stage: RenderStageId,
        command_list: &mut dyn CommandList,
    ) -> RenderResult<DrawStats> {
        let not_found = RenderError::ViewStageNotFound {
            view: view.raw(),
            stage: stage.raw(),
        };
        let view_stage = self
            .views
            .get(view.index())
            .and_then(|render_view| render_view.stage(stage))
            .ok_or(not_found)?;

        let mut stats = DrawStats::default();
        let mut bound_pipeline_state: Option<PipelineStateId> = None;
        let mut bound_frame_set: Option<DescriptorSet> = None;
        let mut bound_view_set: Option<DescriptorSet> = None;

        for reference in &view_stage.sorted_render_nodes {
            let feature = self
                .features
                .get_mut(reference.feature.index())
                .ok_or(RenderError::UnknownRenderFeature(reference.feature.raw()))?;
            let node = *feature.render_node(reference.node)?;

            let (Some(object), Some(pipeline_state), true) =
                (self.objects.get(reference.object), node.pipeline_state, node.is_drawable())
            else {
                stats.skipped += 1;
                continue;
            };

            if bound_pipeline_state != Some(pipeline_state) {
                command_list.set_pipeline_state(self.pipeline_states.get(pipeline_state)?);
                bound_pipeline_state = Some(pipeline_state);
                stats.pipeline_binds += 1;
            }
            if let Some(set) = node.frame_descriptor_set {
                if bound_frame_set != Some(set) {
                    command_list.set_descriptor_set(DescriptorSetSlot::PerFrame, &set, self.descriptor_pool.entries(&set)?);
                    bound_frame_set = Some(set);
                }
            }
            if let Some(set) = node.view_descriptor_set {
                if bound_view_set != Some(set) {
                    command_list.set_descriptor_set(DescriptorSetSlot::PerView, &set, self.descriptor_pool.entries(&set)?);
                    bound_view_set = Some(set);
                }
            }
            if let Some(set) = node.descriptor_set {
                command_list.set_descriptor_set(DescriptorSetSlot::PerDraw, &set, self.descriptor_pool.entries(&set)?);
            }

            command_list.draw(&object.draw);
            feature.render_node_mut(reference.node)?.mark_drawn()?;
            stats.draw_calls += 1;
        }

        Ok(stats)
    }

    /// Extract, prepare and draw every stage of every view
    pub fn render_frame(&mut self, command_list: &mut dyn CommandList) -> RenderResult<DrawStats> {
        self.extract()?;
        self.prepare()?;

        let passes: Vec<(ViewNodeReference, RenderStageId)> = self
            .views
            .iter()
            .enumerate()
            .flat_map(|(index, view)| {
                let reference = ViewNodeReference::from_index(index);
                view.stages().iter().map(move |view_stage| (reference, view_stage.stage))
            })
            .collect();

        let mut stats = DrawStats::default();
        for (view, stage) in passes {
            stats += self.draw(view, stage, command_list)?;
        }
        log::trace!("Frame {} drew {} calls", self.frame, stats.draw_calls);
        Ok(stats)
    }

    /// Force every effect to resolve again on its next use
    pub fn invalidate_effects(&mut self) {
        for feature in &mut self.features {
            feature.invalidate_effects();
        }
    }

    /// Current frame number
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Counters of the current frame
    pub const fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Active configuration
    pub const fn config(&self) -> &RenderSystemConfig {
        &self.config
    }

    /// Frame descriptor arena
    pub const fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }

    /// Frame constant-buffer arena
    pub const fn constant_buffers(&self) -> &ConstantBufferPool {
        &self.constant_buffers
    }

    /// Cached pipeline state
    pub fn pipeline_state(&self, id: PipelineStateId) -> RenderResult<&PipelineState> {
        self.pipeline_states.get(id)
    }

    /// Distinct pipeline states created so far
    pub fn pipeline_state_count(&self) -> usize {
        self.pipeline_states.len()
    }

    /// Bytecode cache in use
    pub fn bytecode_cache(&self) -> &Arc<EffectBytecodeCache> {
        &self.bytecode_cache
    }
}

/// `demand * growth_factor` rounded up, never below `demand` and never above `max_capacity`
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn grown_capacity(demand: usize, growth_factor: f32, max_capacity: usize) -> usize {
    let grown = (demand as f64 * f64::from(growth_factor)).ceil();
    let grown = if grown.is_finite() && grown < max_capacity as f64 {
        grown as usize
    } else {
        max_capacity
    };
    grown.max(demand).min(max_capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grown_capacity() {
        assert_eq!(grown_capacity(100, 1.5, 1000), 150);
        assert_eq!(grown_capacity(3, 1.5, 1000), 5);
        assert_eq!(grown_capacity(10, 1.0, 1000), 10);
        assert_eq!(grown_capacity(0, 2.0, 1000), 0);
    }

    #[test]
    fn test_grown_capacity_stays_within_the_limit() {
        assert_eq!(grown_capacity(100, 1.5, 120), 120);
        assert_eq!(grown_capacity(100, f32::INFINITY, 4096), 4096);
        assert_eq!(grown_capacity(100, f32::NAN, 4096), 4096);
        assert_eq!(grown_capacity(usize::MAX, 1.5, 1 << 20), 1 << 20);
        assert_eq!(grown_capacity(usize::MAX, 1.0, usize::MAX), usize::MAX);
    }

    #[test]
    fn test_draw_stats_accumulate() {
        let mut total = DrawStats::default();
        total += DrawStats { draw_calls: 2, pipeline_binds: 1, skipped: 0 };
        total += DrawStats { draw_calls: 3, pipeline_binds: 2, skipped: 1 };
        assert_eq!(total, DrawStats { draw_calls: 5, pipeline_binds: 3, skipped: 1 });
    }
}
