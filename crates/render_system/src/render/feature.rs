//! Render features
//!
//! A [`RenderFeature`] is the type-specific part of rendering (meshes,
//! particles, sprites) and only supplies hooks. The [`RootRenderFeature`]
//! wrapping it owns every node array for the objects of that feature:
//!
//! - static arrays, alive while objects stay registered: the object list and
//!   the effect store addressed by `static_node * slot_count + slot`
//! - per-frame arrays, cleared by [`RootRenderFeature::reset`]: object,
//!   view-object, render and effect-object nodes, the per-view resources
//!   addressed by `view * slot_count + slot` and one per-frame set per layout
//!
//! Resources are bound in three groups: per frame, per view and per draw.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::foundation::collections::{NodeArray, NodeIndex, SlotMap};
use crate::render::descriptor::{
    ConstantBufferPool, ConstantBufferWriter, DescriptorEntry, DescriptorPool, DescriptorSet,
    DescriptorSetLayout, DescriptorSetLayoutCache, EffectParameterClass,
};
use crate::render::effect::{EffectBytecode, EffectBytecodeCache, EffectCompiler, RenderEffect, RenderEffectState};
use crate::render::nodes::{
    ConstantBufferOffsetSlot, EffectObjectNode, EffectObjectNodeReference, EffectPermutationSlot,
    EffectViewNodeReference, ObjectNode, ObjectNodeReference, RenderNode, RenderNodeReference,
    RenderNodeState, SkipReason, StaticEffectObjectNodeReference, StaticObjectNodeReference,
    ViewNodeReference, ViewObjectNode, ViewObjectNodeReference,
};
use crate::render::object::{RenderObject, RenderObjectId};
use crate::render::pipeline::{PipelineStateCache, PipelineStateDescription, PipelineStateId};
use crate::render::stage::{RenderStage, RenderStageId};
use crate::render::system::FrameStats;
use crate::render::view::RenderView;
use crate::render::{RenderError, RenderResult};

/// Index of a registered render feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderFeatureId(u32);

impl RenderFeatureId {
    /// Create a feature id from its registration index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Registration index
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw index
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RenderFeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feature#{}", self.0)
    }
}

/// Type-specific hooks of a render feature
pub trait RenderFeature {
    /// Display name
    fn name(&self) -> &str;

    /// Called once on registration, before any effect is resolved.
    ///
    /// Slots created here are resolved for every effect the feature uses and
    /// show up in the writers handed to the constant hooks.
    fn initialize(&mut self, _slots: &mut ConstantBufferOffsetSlots) {}

    /// Adjust the fixed-function state of `object` in `stage`.
    ///
    /// Called once per (effect, stage) with the defaults and the effect
    /// bytecode already set. The stage output is applied afterwards.
    fn process_pipeline_state(
        &self,
        _object: &RenderObject,
        _stage: &RenderStage,
        _description: &mut PipelineStateDescription,
    ) {
    }

    /// Fill the per-draw constant buffer of `object`
    fn write_draw_constants(&self, _object: &RenderObject, _constants: &mut ConstantBufferWriter<'_>) {}

    /// Fill the per-view constant buffer of an effect permutation in `view`
    fn write_view_constants(&self, _view: &RenderView, _constants: &mut ConstantBufferWriter<'_>) {}

    /// Fill the entries of a per-frame descriptor set
    fn write_frame_resources(&self, _layout: &DescriptorSetLayout, _entries: &mut [DescriptorEntry]) {}

    /// Fill per-draw descriptor entries of `object`.
    ///
    /// The first constant-buffer binding already points at the range written
    /// by [`Self::write_draw_constants`].
    fn write_draw_resources(&self, _object: &RenderObject, _layout: &DescriptorSetLayout, _entries: &mut [DescriptorEntry]) {}

    /// Effect to use when `effect_name` fails to compile, if any
    fn fallback_effect(&self, _object: &RenderObject, _effect_name: &str) -> Option<String> {
        None
    }
}

/// Everything the per-frame preparation of a feature reads or allocates from
pub struct PrepareContext<'a> {
    /// Current frame number
    pub frame: u64,
    /// Registered render objects
    pub objects: &'a SlotMap<RenderObjectId, RenderObject>,
    /// Registered stages, indexed by [`RenderStageId`]
    pub stages: &'a [RenderStage],
    /// Registered views, indexed by [`ViewNodeReference`]
    pub views: &'a [RenderView],
    /// Effect compiler
    pub compiler: &'a dyn EffectCompiler,
    /// Compiled bytecode shared across features
    pub bytecode_cache: &'a EffectBytecodeCache,
    /// Descriptor layouts shared across features
    pub layouts: &'a mut DescriptorSetLayoutCache,
    /// Frame descriptor arena
    pub descriptor_pool: &'a mut DescriptorPool,
    /// Frame constant-buffer arena
    pub constant_buffers: &'a mut ConstantBufferPool,
    /// Pipeline states shared across features
    pub pipeline_states: &'a mut PipelineStateCache,
    /// Frame counters
    pub stats: &'a mut FrameStats,
}

/// Names of the constant-buffer members a feature writes, in slot order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantBufferOffsetSlots {
    view: Vec<String>,
    draw: Vec<String>,
}

impl ConstantBufferOffsetSlots {
    /// Slot for the per-view member `name`, created if new
    pub fn create_view_slot(&mut self, name: &str) -> ConstantBufferOffsetSlot {
        get_or_push(&mut self.view, name)
    }

    /// Slot for the per-draw member `name`, created if new
    pub fn create_draw_slot(&mut self, name: &str) -> ConstantBufferOffsetSlot {
        get_or_push(&mut self.draw, name)
    }

    /// Per-view member names in slot order
    pub fn view_slots(&self) -> &[String] {
        &self.view
    }

    /// Per-draw member names in slot order
    pub fn draw_slots(&self) -> &[String] {
        &self.draw
    }
}

fn get_or_push(names: &mut Vec<String>, name: &str) -> ConstantBufferOffsetSlot {
    let index = names.iter().position(|existing| existing == name).unwrap_or_else(|| {
        names.push(name.to_string());
        names.len() - 1
    });
    ConstantBufferOffsetSlot::new(u32::try_from(index).unwrap_or(u32::MAX))
}

/// Per-view resources of one (view, permutation slot) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewEffectResources {
    /// [`EffectBytecode::per_view_signature`] of the effect they were built for
    pub signature: u64,
    /// Per-view descriptor set, if the effect has per-view bindings
    pub descriptor_set: Option<DescriptorSet>,
    /// Per-view constant-buffer offset, if the effect has per-view constants
    pub constant_buffer_offset: Option<usize>,
}

/// Everything prepare needs from a resolved effect
struct ResolvedEffect {
    bytecode: Arc<EffectBytecode>,
    per_frame_layout: Arc<DescriptorSetLayout>,
    per_view_layout: Arc<DescriptorSetLayout>,
    per_draw_layout: Arc<DescriptorSetLayout>,
    view_constant_offsets: Vec<Option<usize>>,
    draw_constant_offsets: Vec<Option<usize>>,
    pipeline_state: Option<PipelineStateId>,
}

impl ResolvedEffect {
    fn new(effect: &RenderEffect, stage: RenderStageId) -> Option<Self> {
        Some(Self {
            bytecode: Arc::clone(effect.bytecode()?),
            per_frame_layout: Arc::clone(effect.per_frame_layout()?),
            per_view_layout: Arc::clone(effect.per_view_layout()?),
            per_draw_layout: Arc::clone(effect.per_draw_layout()?),
            view_constant_offsets: effect.view_constant_offsets().to_vec(),
            draw_constant_offsets: effect.draw_constant_offsets().to_vec(),
            pipeline_state: effect.pipeline_state(stage),
        })
    }
}

/// Owner of every node array of one render feature
pub struct RootRenderFeature {
    id: RenderFeatureId,
    feature: Box<dyn RenderFeature>,
    max_permutation_slots: usize,
    effect_permutation_slots: Vec<String>,
    stage_slots: Vec<Option<EffectPermutationSlot>>,
    cbuffer_offset_slots: ConstantBufferOffsetSlots,

    static_objects: Vec<RenderObjectId>,
    render_effects: Vec<Option<RenderEffect>>,

    object_nodes: NodeArray<ObjectNodeReference, ObjectNode>,
    view_object_nodes: NodeArray<ViewObjectNodeReference, ViewObjectNode>,
    render_nodes: NodeArray<RenderNodeReference, RenderNode>,
    effect_object_nodes: NodeArray<EffectObjectNodeReference, EffectObjectNode>,
    frame_object_nodes: NodeArray<StaticObjectNodeReference, ObjectNodeReference>,
    frame_effect_object_nodes: NodeArray<StaticEffectObjectNodeReference, EffectObjectNodeReference>,
    view_resources: NodeArray<EffectViewNodeReference, Option<ViewEffectResources>>,
    frame_descriptor_sets: HashMap<u64, DescriptorSet>,
}

impl fmt::Debug for RootRenderFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootRenderFeature")
            .field("id", &self.id)
            .field("name", &self.feature.name())
            .field("effect_permutation_slots", &self.effect_permutation_slots)
            .field("static_objects", &self.static_objects.len())
            .field("render_nodes", &self.render_nodes.len())
            .finish_non_exhaustive()
    }
}

impl RootRenderFeature {
    /// Wrap `feature`, allowing at most `max_permutation_slots` slots
    pub fn new(id: RenderFeatureId, mut feature: Box<dyn RenderFeature>, max_permutation_slots: usize) -> Self {
        let mut cbuffer_offset_slots = ConstantBufferOffsetSlots::default();
        feature.initialize(&mut cbuffer_offset_slots);

        Self {
            id,
            feature,
            max_permutation_slots,
            effect_permutation_slots: Vec::new(),
            stage_slots: Vec::new(),
            cbuffer_offset_slots,
            static_objects: Vec::new(),
            render_effects: Vec::new(),
            object_nodes: NodeArray::new(),
            view_object_nodes: NodeArray::new(),
            render_nodes: NodeArray::new(),
            effect_object_nodes: NodeArray::new(),
            frame_object_nodes: NodeArray::new(),
            frame_effect_object_nodes: NodeArray::new(),
            view_resources: NodeArray::new(),
            frame_descriptor_sets: HashMap::new(),
        }
    }

    /// Feature id
    pub const fn id(&self) -> RenderFeatureId {
        self.id
    }

    /// Display name of the wrapped feature
    pub fn name(&self) -> &str {
        self.feature.name()
    }

    /// Number of effects cached per object
    pub fn effect_permutation_slot_count(&self) -> u32 {
        // Bounded by `max_permutation_slots`, which is validated config.
        u32::try_from(self.effect_permutation_slots.len()).unwrap_or(u32::MAX)
    }

    /// Slot named `name`, created if new.
    ///
    /// Adding a slot re-lays out the static effect store so every object
    /// keeps its existing effects at their new derived positions.
    pub fn create_effect_permutation_slot(&mut self, name: &str) -> RenderResult<EffectPermutationSlot> {
        if let Some(slot) = self.effect_permutation_slot(name) {
            return Ok(slot);
        }
        if self.effect_permutation_slots.len() >= self.max_permutation_slots {
            return Err(RenderError::TooManyPermutationSlots {
                max: self.max_permutation_slots,
            });
        }

        let old_slot_count = self.effect_permutation_slots.len();
        self.effect_permutation_slots.push(name.to_string());
        self.relayout_render_effects(old_slot_count, old_slot_count + 1);

        let slot = EffectPermutationSlot::new(self.effect_permutation_slot_count() - 1);
        log::debug!("{}: created effect permutation {slot} '{name}'", self.name());
        Ok(slot)
    }

    /// Existing slot named `name`
    pub fn effect_permutation_slot(&self, name: &str) -> Option<EffectPermutationSlot> {
        self.effect_permutation_slots
            .iter()
            .position(|slot_name| slot_name == name)
            .and_then(|index| u32::try_from(index).ok())
            .map(EffectPermutationSlot::new)
    }

    /// Bind `stage` to the slot named after its effect slot name
    pub(crate) fn register_stage(&mut self, stage: RenderStageId, effect_slot_name: &str) -> RenderResult<EffectPermutationSlot> {
        let slot = self.create_effect_permutation_slot(effect_slot_name)?;
        if self.stage_slots.len() <= stage.index() {
            self.stage_slots.resize(stage.index() + 1, None);
        }
        self.stage_slots[stage.index()] = Some(slot);
        Ok(slot)
    }

    /// Permutation slot `stage` resolves its effects into
    pub fn stage_slot(&self, stage: RenderStageId) -> Option<EffectPermutationSlot> {
        self.stage_slots.get(stage.index()).copied().flatten()
    }

    /// Slot for the per-view constant-buffer member `name`, created if new.
    ///
    /// Effects already resolved pick up the new slot immediately.
    pub fn create_view_cbuffer_offset_slot(&mut self, name: &str) -> ConstantBufferOffsetSlot {
        let slot = self.cbuffer_offset_slots.create_view_slot(name);
        self.resolve_constant_offsets();
        slot
    }

    /// Slot for the per-draw constant-buffer member `name`, created if new.
    ///
    /// Effects already resolved pick up the new slot immediately.
    pub fn create_draw_cbuffer_offset_slot(&mut self, name: &str) -> ConstantBufferOffsetSlot {
        let slot = self.cbuffer_offset_slots.create_draw_slot(name);
        self.resolve_constant_offsets();
        slot
    }

    /// Constant-buffer member slots registered so far
    pub const fn cbuffer_offset_slots(&self) -> &ConstantBufferOffsetSlots {
        &self.cbuffer_offset_slots
    }

    /// Offset of the per-view member behind `slot` in the effect at `effect`
    pub fn view_cbuffer_offset(
        &self,
        effect: StaticEffectObjectNodeReference,
        slot: ConstantBufferOffsetSlot,
    ) -> Option<usize> {
        let effect = self.render_effect(effect).ok()?;
        effect.view_constant_offsets().get(slot.index()).copied().flatten()
    }

    /// Offset of the per-draw member behind `slot` in the effect at `effect`
    pub fn draw_cbuffer_offset(
        &self,
        effect: StaticEffectObjectNodeReference,
        slot: ConstantBufferOffsetSlot,
    ) -> Option<usize> {
        let effect = self.render_effect(effect).ok()?;
        effect.draw_constant_offsets().get(slot.index()).copied().flatten()
    }

    fn resolve_constant_offsets(&mut self) {
        let slots = &self.cbuffer_offset_slots;
        for effect in self.render_effects.iter_mut().flatten() {
            effect.resolve_constant_offsets(slots.view_slots(), slots.draw_slots());
        }
    }

    fn relayout_render_effects(&mut self, old_slot_count: usize, new_slot_count: usize) {
        let object_count = self.static_objects.len();
        let mut old_effects = std::mem::take(&mut self.render_effects).into_iter();
        let mut effects = Vec::with_capacity(object_count * new_slot_count);
        for _ in 0..object_count {
            for slot in 0..new_slot_count {
                effects.push(if slot < old_slot_count { old_effects.next().flatten() } else { None });
            }
        }
        self.render_effects = effects;
        // Derived positions changed; per-frame lookups are recreated on demand.
        self.frame_effect_object_nodes.clear();
        self.view_resources.clear();
    }

    /// Register an object with this feature
    pub(crate) fn add_object(&mut self, object: RenderObjectId) -> StaticObjectNodeReference {
        let reference = StaticObjectNodeReference::from_index(self.static_objects.len());
        self.static_objects.push(object);
        self.render_effects
            .resize_with(self.static_objects.len() * self.effect_permutation_slots.len(), || None);
        reference
    }

    /// Unregister the object at `static_node`.
    ///
    /// The last object is moved into the freed slot to keep the arrays dense;
    /// its id is returned so the caller can update its static node.
    pub(crate) fn remove_object(&mut self, static_node: StaticObjectNodeReference) -> RenderResult<Option<RenderObjectId>> {
        let len = self.static_objects.len();
        let index = static_node.index();
        if index >= len {
            return Err(RenderError::InvalidNodeReference {
                kind: StaticObjectNodeReference::KIND,
                index: static_node.raw(),
                len,
            });
        }
        let last = len - 1;
        let slot_count = self.effect_permutation_slots.len();

        self.static_objects.swap_remove(index);
        if index != last {
            for slot in 0..slot_count {
                self.render_effects.swap(index * slot_count + slot, last * slot_count + slot);
            }
        }
        self.render_effects.truncate(last * slot_count);

        // Per-frame lookups follow the same move.
        self.frame_object_nodes.resize(len, ObjectNodeReference::INVALID);
        self.frame_object_nodes.swap_remove(index);
        self.frame_effect_object_nodes.resize(len * slot_count, EffectObjectNodeReference::INVALID);
        self.frame_effect_object_nodes.swap_remove_block(index, slot_count);

        Ok((index != last).then(|| self.static_objects[index]))
    }

    /// Per-frame object node of `object`, created on first request this frame
    pub fn get_or_create_object_node(&mut self, id: RenderObjectId, object: &RenderObject) -> RenderResult<ObjectNodeReference> {
        let static_node = object.static_node();
        if static_node.index() >= self.static_objects.len() {
            return Err(RenderError::InvalidNodeReference {
                kind: StaticObjectNodeReference::KIND,
                index: static_node.raw(),
                len: self.static_objects.len(),
            });
        }
        if self.frame_object_nodes.len() < self.static_objects.len() {
            self.frame_object_nodes.resize(self.static_objects.len(), ObjectNodeReference::INVALID);
        }

        let existing = *self.frame_object_nodes.get(static_node)?;
        if existing.is_valid() {
            return Ok(existing);
        }

        let reference = self.object_nodes.push(ObjectNode::new(id));
        self.frame_object_nodes.set(static_node, reference)?;
        Ok(reference)
    }

    /// New node for `object` seen from `view`
    pub fn create_view_object_node(
        &mut self,
        view: ViewNodeReference,
        object: RenderObjectId,
        object_node: ObjectNodeReference,
    ) -> ViewObjectNodeReference {
        self.view_object_nodes.push(ViewObjectNode::new(object, view, object_node))
    }

    /// New unresolved render node
    pub fn create_render_node(
        &mut self,
        object: RenderObjectId,
        view: ViewNodeReference,
        view_object_node: ViewObjectNodeReference,
        stage: RenderStageId,
    ) -> RenderNodeReference {
        self.render_nodes.push(RenderNode::new(object, view, view_object_node, stage))
    }

    /// Resolve the effect of every unresolved render node.
    ///
    /// Nodes whose effect is usable move to `Allocated`. Nodes whose effect
    /// failed without a fallback are skipped for this frame.
    pub fn prepare_effect_permutations(&mut self, context: &mut PrepareContext<'_>) -> RenderResult<()> {
        let slot_count = self.effect_permutation_slot_count();
        let objects = context.objects;

        for index in 0..self.render_nodes.len() {
            let reference = RenderNodeReference::from_index(index);
            let mut node = *self.render_nodes.get(reference)?;
            if node.state() != RenderNodeState::Unresolved {
                continue;
            }

            let Some(object) = objects.get(node.render_object) else {
                node.mark_skipped(SkipReason::ObjectRemoved)?;
                context.stats.skipped_removed += 1;
                self.render_nodes.set(reference, node)?;
                continue;
            };

            let slot = self
                .stage_slot(node.render_stage)
                .ok_or(RenderError::UnknownRenderStage(node.render_stage.raw()))?;
            let static_effect = object.static_node().try_create_effect_reference(slot_count, slot)?;

            let usable = match object.active_effect(node.render_stage) {
                Some(effect_name) => {
                    let len = self.render_effects.len();
                    let entry = self.render_effects.get_mut(static_effect.index()).ok_or(
                        RenderError::InvalidNodeReference {
                            kind: StaticEffectObjectNodeReference::KIND,
                            index: static_effect.raw(),
                            len,
                        },
                    )?;
                    Self::resolve_effect(
                        entry,
                        self.feature.as_ref(),
                        &self.cbuffer_offset_slots,
                        object,
                        effect_name,
                        context,
                    )
                }
                None => false,
            };

            if usable {
                node.mark_allocated(static_effect)?;
            } else {
                node.mark_skipped(SkipReason::EffectUnavailable)?;
                context.stats.skipped_effect += 1;
            }
            self.render_nodes.set(reference, node)?;
        }

        Ok(())
    }

    fn resolve_effect(
        entry: &mut Option<RenderEffect>,
        feature: &dyn RenderFeature,
        slots: &ConstantBufferOffsetSlots,
        object: &RenderObject,
        effect_name: &str,
        context: &mut PrepareContext<'_>,
    ) -> bool {
        if entry.as_ref().is_some_and(|effect| effect.effect_name != effect_name) {
            *entry = None;
        }
        let effect = entry.get_or_insert_with(|| RenderEffect::new(effect_name));

        if !effect.mark_as_used(context.frame) || effect.is_resolved() {
            return effect.is_valid();
        }

        match context.bytecode_cache.get_or_compile(effect_name, context.compiler) {
            Ok(bytecode) => {
                Self::install_bytecode(effect, bytecode, RenderEffectState::Normal, slots, context.layouts);
                context.stats.effects_resolved += 1;
            }
            Err(err) => {
                log::warn!("{}: {err}", feature.name());
                let fallback = feature
                    .fallback_effect(object, effect_name)
                    .map(|fallback| context.bytecode_cache.get_or_compile(&fallback, context.compiler));
                match fallback {
                    Some(Ok(bytecode)) => {
                        log::warn!("{}: drawing '{effect_name}' with fallback '{}'", feature.name(), bytecode.name);
                        Self::install_bytecode(effect, bytecode, RenderEffectState::Error, slots, context.layouts);
                    }
                    Some(Err(fallback_err)) => {
                        log::warn!("{}: fallback failed: {fallback_err}", feature.name());
                        effect.set_error();
                    }
                    None => effect.set_error(),
                }
            }
        }

        effect.is_valid()
    }

    fn install_bytecode(
        effect: &mut RenderEffect,
        bytecode: Arc<EffectBytecode>,
        state: RenderEffectState,
        slots: &ConstantBufferOffsetSlots,
        layouts: &mut DescriptorSetLayoutCache,
    ) {
        let layouts = [
            layouts.get_or_create(&bytecode.per_frame_layout),
            layouts.get_or_create(&bytecode.per_view_layout),
            layouts.get_or_create(&bytecode.per_draw_layout),
        ];
        effect.set_bytecode(bytecode, layouts, state);
        effect.resolve_constant_offsets(slots.view_slots(), slots.draw_slots());
    }

    /// Bind resources and pipeline state to every allocated render node.
    ///
    /// Per-draw resources are allocated once per (object, permutation) pair,
    /// per-view resources once per (view, permutation) pair and per-frame
    /// sets once per layout. A node whose allocation does not fit is skipped
    /// for this frame.
    pub fn prepare(&mut self, context: &mut PrepareContext<'_>) -> RenderResult<()> {
        let slot_count = self.effect_permutation_slot_count();
        let objects = context.objects;
        let stages = context.stages;
        if self.frame_effect_object_nodes.len() < self.render_effects.len() {
            self.frame_effect_object_nodes
                .resize(self.render_effects.len(), EffectObjectNodeReference::INVALID);
        }
        let view_slots = context.views.len() * self.effect_permutation_slots.len();
        if self.view_resources.len() < view_slots {
            self.view_resources.resize(view_slots, None);
        }

        for index in 0..self.render_nodes.len() {
            let reference = RenderNodeReference::from_index(index);
            let mut node = *self.render_nodes.get(reference)?;
            if node.state() != RenderNodeState::Allocated {
                continue;
            }

            let Some(object) = objects.get(node.render_object) else {
                node.mark_skipped(SkipReason::ObjectRemoved)?;
                context.stats.skipped_removed += 1;
                self.render_nodes.set(reference, node)?;
                continue;
            };
            let stage = stages
                .get(node.render_stage.index())
                .ok_or(RenderError::UnknownRenderStage(node.render_stage.raw()))?;
            let slot = self
                .stage_slot(node.render_stage)
                .ok_or(RenderError::UnknownRenderStage(node.render_stage.raw()))?;
            // Static positions move when an object is removed or a slot is added mid-frame.
            node.render_effect = object.static_node().try_create_effect_reference(slot_count, slot)?;

            let resolved = self
                .render_effect(node.render_effect)
                .ok()
                .and_then(|effect| ResolvedEffect::new(effect, node.render_stage));
            let Some(resolved) = resolved else {
                node.mark_skipped(SkipReason::EffectUnavailable)?;
                context.stats.skipped_effect += 1;
                self.render_nodes.set(reference, node)?;
                continue;
            };

            // Per (object, permutation) resources, shared by every view
            let mut effect_object_node = *self.frame_effect_object_nodes.get(node.render_effect)?;
            if !effect_object_node.is_valid() {
                let object_node = self.view_object_nodes.get(node.view_object_node)?.object_node;
                match Self::allocate_draw_resources(self.feature.as_ref(), object, &resolved, context) {
                    Ok((descriptor_set, constant_buffer_offset)) => {
                        let mut created = EffectObjectNode::new(node.render_effect, object_node);
                        created.descriptor_set = descriptor_set;
                        created.constant_buffer_offset = constant_buffer_offset;
                        effect_object_node = self.effect_object_nodes.push(created);
                        self.frame_effect_object_nodes.set(node.render_effect, effect_object_node)?;
                    }
                    Err(err @ RenderError::AllocationExhausted { .. }) => {
                        self.skip_exhausted(reference, node, &err, context)?;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            // Per (view, permutation) resources, shared by every object in the view
            let view_resources = match self.view_resources_for(node.view, slot, &resolved, context) {
                Ok(view_resources) => view_resources,
                Err(err @ RenderError::AllocationExhausted { .. }) => {
                    self.skip_exhausted(reference, node, &err, context)?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            // Per-frame resources, shared by every effect with the same layout
            let frame_descriptor_set = match self.frame_descriptor_set(&resolved.per_frame_layout, context) {
                Ok(set) => set,
                Err(err @ RenderError::AllocationExhausted { .. }) => {
                    self.skip_exhausted(reference, node, &err, context)?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let pipeline_state = match resolved.pipeline_state {
                Some(pipeline_state) => pipeline_state,
                None => {
                    let mut description = PipelineStateDescription::default();
                    description.effect_bytecode = Some(resolved.bytecode.id);
                    self.feature.process_pipeline_state(object, stage, &mut description);
                    description.output = stage.output.clone();

                    let pipeline_state = context.pipeline_states.get_or_create(description);
                    self.render_effect_mut(node.render_effect)?
                        .set_pipeline_state(node.render_stage, pipeline_state);
                    pipeline_state
                }
            };

            let bound = *self.effect_object_nodes.get(effect_object_node)?;
            node.mark_prepared(
                effect_object_node,
                &bound,
                frame_descriptor_set,
                view_resources.and_then(|resources| resources.descriptor_set),
                pipeline_state,
            )?;
            context.stats.prepared += 1;
            self.render_nodes.set(reference, node)?;
        }

        Ok(())
    }

    fn allocate_draw_resources(
        feature: &dyn RenderFeature,
        object: &RenderObject,
        resolved: &ResolvedEffect,
        context: &mut PrepareContext<'_>,
    ) -> RenderResult<(Option<DescriptorSet>, Option<usize>)> {
        let size = resolved.bytecode.per_draw_constant_buffer_size;
        let constant_buffer_offset = if size > 0 {
            let offset = context.constant_buffers.allocate(size)?;
            let bytes = context.constant_buffers.bytes_mut(offset, size)?;
            feature.write_draw_constants(object, &mut ConstantBufferWriter::new(bytes, &resolved.draw_constant_offsets));
            Some(offset)
        } else {
            None
        };

        let layout = &resolved.per_draw_layout;
        if layout.element_count() == 0 {
            return Ok((None, constant_buffer_offset));
        }

        let set = context.descriptor_pool.allocate_set(layout)?;
        let entries = context.descriptor_pool.entries_mut(&set)?;
        if let Some(offset) = constant_buffer_offset {
            bind_constant_buffer(layout, entries, offset, size);
        }
        feature.write_draw_resources(object, layout, entries);

        Ok((Some(set), constant_buffer_offset))
    }

    /// Per-view resources of `view` for the effect in `resolved`.
    ///
    /// The first effect of a (view, slot) pair creates them and every effect
    /// with the same per-view signature shares them. An effect with a
    /// different signature gets resources of its own.
    fn view_resources_for(
        &mut self,
        view: ViewNodeReference,
        slot: EffectPermutationSlot,
        resolved: &ResolvedEffect,
        context: &mut PrepareContext<'_>,
    ) -> RenderResult<Option<ViewEffectResources>> {
        let bytecode = &resolved.bytecode;
        let layout = &resolved.per_view_layout;
        let size = bytecode.per_view_constant_buffer_size;
        if layout.element_count() == 0 && size == 0 {
            return Ok(None);
        }

        let view_effect = view.try_create_effect_reference(self.effect_permutation_slot_count(), slot)?;
        let existing = *self.view_resources.get(view_effect)?;
        let signature = bytecode.per_view_signature();
        if let Some(resources) = existing.filter(|resources| resources.signature == signature) {
            return Ok(Some(resources));
        }

        let render_view = context
            .views
            .get(view.index())
            .ok_or(RenderError::UnknownRenderView(view.raw()))?;
        let constant_buffer_offset = if size > 0 {
            let offset = context.constant_buffers.allocate(size)?;
            let bytes = context.constant_buffers.bytes_mut(offset, size)?;
            self.feature
                .write_view_constants(render_view, &mut ConstantBufferWriter::new(bytes, &resolved.view_constant_offsets));
            Some(offset)
        } else {
            None
        };
        let descriptor_set = if layout.element_count() > 0 {
            let set = context.descriptor_pool.allocate_set(layout)?;
            if let Some(offset) = constant_buffer_offset {
                bind_constant_buffer(layout, context.descriptor_pool.entries_mut(&set)?, offset, size);
            }
            Some(set)
        } else {
            None
        };

        let resources = ViewEffectResources {
            signature,
            descriptor_set,
            constant_buffer_offset,
        };
        if existing.is_none() {
            self.view_resources.set(view_effect, Some(resources))?;
        } else {
            log::debug!(
                "{}: '{}' does not match the per-view resources of {view_effect}; allocated its own",
                self.name(),
                bytecode.name
            );
        }
        Ok(Some(resources))
    }

    /// Per-frame set for `layout`, allocated and filled on first request
    fn frame_descriptor_set(
        &mut self,
        layout: &DescriptorSetLayout,
        context: &mut PrepareContext<'_>,
    ) -> RenderResult<Option<DescriptorSet>> {
        if layout.element_count() == 0 {
            return Ok(None);
        }
        if let Some(set) = self.frame_descriptor_sets.get(&layout.hash_value()) {
            return Ok(Some(*set));
        }

        let set = context.descriptor_pool.allocate_set(layout)?;
        self.feature
            .write_frame_resources(layout, context.descriptor_pool.entries_mut(&set)?);
        self.frame_descriptor_sets.insert(layout.hash_value(), set);
        Ok(Some(set))
    }

    fn skip_exhausted(
        &mut self,
        reference: RenderNodeReference,
        mut node: RenderNode,
        err: &RenderError,
        context: &mut PrepareContext<'_>,
    ) -> RenderResult<()> {
        log::warn!("{}: dropping {reference} this frame: {err}", self.name());
        node.mark_skipped(SkipReason::AllocationExhausted)?;
        context.stats.skipped_allocation += 1;
        self.render_nodes.set(reference, node)
    }

    /// Clear every per-frame array. Static objects and their effects are kept.
    pub fn reset(&mut self) {
        self.object_nodes.clear();
        self.view_object_nodes.clear();
        self.render_nodes.clear();
        self.effect_object_nodes.clear();
        self.frame_object_nodes.clear();
        self.frame_effect_object_nodes.clear();
        self.view_resources.clear();
        self.frame_descriptor_sets.clear();
    }

    /// Force every effect to resolve again on its next use
    pub fn invalidate_effects(&mut self) {
        for effect in self.render_effects.iter_mut().flatten() {
            effect.invalidate();
        }
    }

    /// Effect stored at `reference`
    pub fn render_effect(&self, reference: StaticEffectObjectNodeReference) -> RenderResult<&RenderEffect> {
        self.render_effects
            .get(reference.index())
            .and_then(Option::as_ref)
            .ok_or(RenderError::InvalidNodeReference {
                kind: StaticEffectObjectNodeReference::KIND,
                index: reference.raw(),
                len: self.render_effects.len(),
            })
    }

    fn render_effect_mut(&mut self, reference: StaticEffectObjectNodeReference) -> RenderResult<&mut RenderEffect> {
        let len = self.render_effects.len();
        self.render_effects
            .get_mut(reference.index())
            .and_then(Option::as_mut)
            .ok_or(RenderError::InvalidNodeReference {
                kind: StaticEffectObjectNodeReference::KIND,
                index: reference.raw(),
                len,
            })
    }

    /// Render node at `reference`
    pub fn render_node(&self, reference: RenderNodeReference) -> RenderResult<&RenderNode> {
        self.render_nodes.get(reference)
    }

    pub(crate) fn render_node_mut(&mut self, reference: RenderNodeReference) -> RenderResult<&mut RenderNode> {
        self.render_nodes.get_mut(reference)
    }

    /// Object node at `reference`
    pub fn object_node(&self, reference: ObjectNodeReference) -> RenderResult<&ObjectNode> {
        self.object_nodes.get(reference)
    }

    /// View object node at `reference`
    pub fn view_object_node(&self, reference: ViewObjectNodeReference) -> RenderResult<&ViewObjectNode> {
        self.view_object_nodes.get(reference)
    }

    /// Effect object node at `reference`
    pub fn effect_object_node(&self, reference: EffectObjectNodeReference) -> RenderResult<&EffectObjectNode> {
        self.effect_object_nodes.get(reference)
    }

    /// Per-view resources at `reference`, if allocated this frame
    pub fn view_resources(&self, reference: EffectViewNodeReference) -> Option<ViewEffectResources> {
        self.view_resources.get(reference).ok().copied().flatten()
    }

    /// Per-view descriptor set at `reference`, if allocated this frame
    pub fn view_descriptor_set(&self, reference: EffectViewNodeReference) -> Option<DescriptorSet> {
        self.view_resources(reference).and_then(|resources| resources.descriptor_set)
    }

    /// Render nodes of the current frame
    pub fn render_nodes(&self) -> impl Iterator<Item = (RenderNodeReference, &RenderNode)> {
        self.render_nodes.iter()
    }

    /// View object nodes of the current frame
    pub fn view_object_nodes(&self) -> impl Iterator<Item = (ViewObjectNodeReference, &ViewObjectNode)> {
        self.view_object_nodes.iter()
    }

    /// Effect object nodes of the current frame
    pub fn effect_object_nodes(&self) -> impl Iterator<Item = (EffectObjectNodeReference, &EffectObjectNode)> {
        self.effect_object_nodes.iter()
    }

    /// Number of object nodes this frame
    pub fn object_node_count(&self) -> usize {
        self.object_nodes.len()
    }

    /// Number of view object nodes this frame
    pub fn view_object_node_count(&self) -> usize {
        self.view_object_nodes.len()
    }

    /// Number of render nodes this frame
    pub fn render_node_count(&self) -> usize {
        self.render_nodes.len()
    }

    /// Number of effect object nodes this frame
    pub fn effect_object_node_count(&self) -> usize {
        self.effect_object_nodes.len()
    }

    /// Number of registered objects
    pub fn static_object_count(&self) -> usize {
        self.static_objects.len()
    }

    /// Object registered at `reference`
    pub fn static_object(&self, reference: StaticObjectNodeReference) -> Option<RenderObjectId> {
        self.static_objects.get(reference.index()).copied()
    }
}

/// Point the first constant-buffer binding of `layout` at `offset..offset + size`
fn bind_constant_buffer(layout: &DescriptorSetLayout, entries: &mut [DescriptorEntry], offset: usize, size: usize) {
    let first = layout
        .bindings()
        .find(|(_, binding)| binding.class == EffectParameterClass::ConstantBuffer)
        .map(|(first, _)| first);
    if let Some(entry) = first.and_then(|first| entries.get_mut(first)) {
        *entry = DescriptorEntry::ConstantBufferRange { offset, size };
    }
}
