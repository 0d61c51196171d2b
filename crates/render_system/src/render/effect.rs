//! Effects: compiled bytecode, the compiler seam and per-object effect slots
//!
//! Compilation itself belongs to the shader pipeline; the render system only
//! sees it through [`EffectCompiler`]. Compiled bytecode is shared through an
//! [`EffectBytecodeCache`], either a private instance or the process-wide one
//! returned by [`EffectBytecodeCache::shared`].

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::render::descriptor::{DescriptorSetLayout, DescriptorSetLayoutBuilder};
use crate::render::pipeline::PipelineStateId;
use crate::render::stage::RenderStageId;
use crate::render::{RenderError, RenderResult};

/// Content hash of an [`EffectBytecode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectBytecodeId(u64);

impl EffectBytecodeId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EffectBytecodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Named member of an effect constant buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantBufferMember {
    /// Parameter key
    pub name: String,
    /// Byte offset from the start of the buffer
    pub offset: usize,
}

/// Output of the effect compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectBytecode {
    /// Content hash
    pub id: EffectBytecodeId,
    /// Effect name the bytecode was compiled from
    pub name: String,
    /// Bindings shared by every draw of the effect within one frame
    pub per_frame_layout: DescriptorSetLayoutBuilder,
    /// Bindings shared by every draw of the effect within one view
    pub per_view_layout: DescriptorSetLayoutBuilder,
    /// Bindings of one (object, effect) pair
    pub per_draw_layout: DescriptorSetLayoutBuilder,
    /// Size of the per-view constant buffer in bytes
    pub per_view_constant_buffer_size: usize,
    /// Size of the per-draw constant buffer in bytes
    pub per_draw_constant_buffer_size: usize,
    /// Members of the per-view constant buffer
    pub per_view_constant_buffer_members: Vec<ConstantBufferMember>,
    /// Members of the per-draw constant buffer
    pub per_draw_constant_buffer_members: Vec<ConstantBufferMember>,
}

impl EffectBytecode {
    /// Bytecode for `name`, identified by a hash of its contents.
    ///
    /// The per-frame layout starts empty and there is no per-view constant
    /// buffer; the `with_*` methods add them.
    pub fn new(
        name: impl Into<String>,
        per_view_layout: DescriptorSetLayoutBuilder,
        per_draw_layout: DescriptorSetLayoutBuilder,
        per_draw_constant_buffer_size: usize,
    ) -> Self {
        Self {
            id: EffectBytecodeId(0),
            name: name.into(),
            per_frame_layout: DescriptorSetLayoutBuilder::new(),
            per_view_layout,
            per_draw_layout,
            per_view_constant_buffer_size: 0,
            per_draw_constant_buffer_size,
            per_view_constant_buffer_members: Vec::new(),
            per_draw_constant_buffer_members: Vec::new(),
        }
        .rehash()
    }

    /// Set the bindings shared by the whole frame
    #[must_use]
    pub fn with_per_frame_layout(mut self, per_frame_layout: DescriptorSetLayoutBuilder) -> Self {
        self.per_frame_layout = per_frame_layout;
        self.rehash()
    }

    /// Set the size of the per-view constant buffer
    #[must_use]
    pub fn with_per_view_constant_buffer(mut self, size: usize) -> Self {
        self.per_view_constant_buffer_size = size;
        self.rehash()
    }

    /// Declare a per-view constant-buffer member at `offset`
    #[must_use]
    pub fn with_view_constant_buffer_member(mut self, name: impl Into<String>, offset: usize) -> Self {
        self.per_view_constant_buffer_members.push(ConstantBufferMember { name: name.into(), offset });
        self.rehash()
    }

    /// Declare a per-draw constant-buffer member at `offset`
    #[must_use]
    pub fn with_draw_constant_buffer_member(mut self, name: impl Into<String>, offset: usize) -> Self {
        self.per_draw_constant_buffer_members.push(ConstantBufferMember { name: name.into(), offset });
        self.rehash()
    }

    /// Offset of the per-view constant-buffer member `name`
    pub fn view_constant_offset(&self, name: &str) -> Option<usize> {
        member_offset(&self.per_view_constant_buffer_members, name)
    }

    /// Offset of the per-draw constant-buffer member `name`
    pub fn draw_constant_offset(&self, name: &str) -> Option<usize> {
        member_offset(&self.per_draw_constant_buffer_members, name)
    }

    /// Hash of everything the per-view resources of this effect depend on.
    ///
    /// Effects with equal signatures can share one per-view set and constant buffer.
    pub fn per_view_signature(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.per_view_layout.hash(&mut hasher);
        self.per_view_constant_buffer_size.hash(&mut hasher);
        self.per_view_constant_buffer_members.hash(&mut hasher);
        hasher.finish()
    }

    fn rehash(mut self) -> Self {
        let mut hasher = DefaultHasher::new();
        self.name.hash(&mut hasher);
        self.per_frame_layout.hash(&mut hasher);
        self.per_view_layout.hash(&mut hasher);
        self.per_draw_layout.hash(&mut hasher);
        self.per_view_constant_buffer_size.hash(&mut hasher);
        self.per_draw_constant_buffer_size.hash(&mut hasher);
        self.per_view_constant_buffer_members.hash(&mut hasher);
        self.per_draw_constant_buffer_members.hash(&mut hasher);
        self.id = EffectBytecodeId(hasher.finish());
        self
    }
}

fn member_offset(members: &[ConstantBufferMember], name: &str) -> Option<usize> {
    members.iter().find(|member| member.name == name).map(|member| member.offset)
}

/// Shader/effect compiler
pub trait EffectCompiler {
    /// Compile `effect_name`, returning a message on failure
    fn compile(&self, effect_name: &str) -> Result<EffectBytecode, String>;
}

/// Compiled bytecode keyed by effect name.
///
/// Only successful compilations are stored; a failed effect is compiled again
/// on the next request.
#[derive(Debug, Default)]
pub struct EffectBytecodeCache {
    entries: RwLock<HashMap<String, Arc<EffectBytecode>>>,
}

impl EffectBytecodeCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache, created on first use
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<EffectBytecodeCache>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
    }

    /// Cached bytecode for `effect_name`
    pub fn get(&self, effect_name: &str) -> Option<Arc<EffectBytecode>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(effect_name)
            .cloned()
    }

    /// Cached bytecode for `effect_name`, compiling it on first request
    pub fn get_or_compile(
        &self,
        effect_name: &str,
        compiler: &dyn EffectCompiler,
    ) -> RenderResult<Arc<EffectBytecode>> {
        if let Some(bytecode) = self.get(effect_name) {
            return Ok(bytecode);
        }

        let bytecode = compiler
            .compile(effect_name)
            .map_err(|reason| RenderError::EffectCompilationFailed {
                effect: effect_name.to_string(),
                reason,
            })?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have compiled the same effect meanwhile; keep the first.
        let bytecode = entries
            .entry(effect_name.to_string())
            .or_insert_with(|| Arc::new(bytecode));
        log::debug!("Cached effect bytecode '{}' ({})", effect_name, bytecode.id);
        Ok(Arc::clone(bytecode))
    }

    /// Number of cached effects
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached effect
    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Compilation status of a [`RenderEffect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderEffectState {
    /// Compiled bytecode is in use
    Normal,
    /// Compilation failed; a fallback effect may be in use
    Error,
}

/// Effect resolved for one (object, permutation slot) pair.
///
/// Lives in the feature's static effect array and survives across frames
/// until the object's effect name changes or the effect is invalidated.
#[derive(Debug, Clone)]
pub struct RenderEffect {
    /// Requested effect
    pub effect_name: String,
    state: RenderEffectState,
    bytecode: Option<Arc<EffectBytecode>>,
    per_frame_layout: Option<Arc<DescriptorSetLayout>>,
    per_view_layout: Option<Arc<DescriptorSetLayout>>,
    per_draw_layout: Option<Arc<DescriptorSetLayout>>,
    view_constant_offsets: Vec<Option<usize>>,
    draw_constant_offsets: Vec<Option<usize>>,
    pipeline_states: Vec<(RenderStageId, PipelineStateId)>,
    last_used_frame: Option<u64>,
}

impl RenderEffect {
    /// Unresolved effect for `effect_name`
    pub fn new(effect_name: impl Into<String>) -> Self {
        Self {
            effect_name: effect_name.into(),
            state: RenderEffectState::Normal,
            bytecode: None,
            per_frame_layout: None,
            per_view_layout: None,
            per_draw_layout: None,
            view_constant_offsets: Vec::new(),
            draw_constant_offsets: Vec::new(),
            pipeline_states: Vec::new(),
            last_used_frame: None,
        }
    }

    /// Compilation status
    pub const fn state(&self) -> RenderEffectState {
        self.state
    }

    /// Bytecode in use, either compiled or fallback
    pub fn bytecode(&self) -> Option<&Arc<EffectBytecode>> {
        self.bytecode.as_ref()
    }

    /// Whether render nodes using this effect can be drawn
    pub const fn is_valid(&self) -> bool {
        self.bytecode.is_some()
    }

    /// Whether resolution was already attempted and nothing more will happen
    /// until [`Self::invalidate`]
    pub const fn is_resolved(&self) -> bool {
        self.bytecode.is_some() || matches!(self.state, RenderEffectState::Error)
    }

    /// Mark the effect as used in `frame`. Returns `true` for the first use in that frame.
    pub fn mark_as_used(&mut self, frame: u64) -> bool {
        if self.last_used_frame == Some(frame) {
            return false;
        }
        self.last_used_frame = Some(frame);
        true
    }

    /// Whether the effect was used in `frame`
    pub fn is_used_during_frame(&self, frame: u64) -> bool {
        self.last_used_frame == Some(frame)
    }

    /// Install compiled bytecode and its per-frame, per-view and per-draw layouts
    pub fn set_bytecode(
        &mut self,
        bytecode: Arc<EffectBytecode>,
        [per_frame_layout, per_view_layout, per_draw_layout]: [Arc<DescriptorSetLayout>; 3],
        state: RenderEffectState,
    ) {
        self.bytecode = Some(bytecode);
        self.per_frame_layout = Some(per_frame_layout);
        self.per_view_layout = Some(per_view_layout);
        self.per_draw_layout = Some(per_draw_layout);
        self.view_constant_offsets.clear();
        self.draw_constant_offsets.clear();
        self.pipeline_states.clear();
        self.state = state;
    }

    /// Record a failed compilation with no fallback
    pub fn set_error(&mut self) {
        self.clear_bytecode();
        self.state = RenderEffectState::Error;
    }

    /// Forget bytecode and pipeline states so the effect resolves again
    pub fn invalidate(&mut self) {
        self.clear_bytecode();
        self.state = RenderEffectState::Normal;
    }

    fn clear_bytecode(&mut self) {
        self.bytecode = None;
        self.per_frame_layout = None;
        self.per_view_layout = None;
        self.per_draw_layout = None;
        self.view_constant_offsets.clear();
        self.draw_constant_offsets.clear();
        self.pipeline_states.clear();
    }

    /// Resolve every named constant-buffer slot against the installed bytecode.
    ///
    /// `view_slots` and `draw_slots` are the member names in slot order.
    pub fn resolve_constant_offsets(&mut self, view_slots: &[String], draw_slots: &[String]) {
        let Some(bytecode) = &self.bytecode else {
            return;
        };
        self.view_constant_offsets = view_slots.iter().map(|name| bytecode.view_constant_offset(name)).collect();
        self.draw_constant_offsets = draw_slots.iter().map(|name| bytecode.draw_constant_offset(name)).collect();
    }

    /// Per-view member offsets, indexed by slot
    pub fn view_constant_offsets(&self) -> &[Option<usize>] {
        &self.view_constant_offsets
    }

    /// Per-draw member offsets, indexed by slot
    pub fn draw_constant_offsets(&self) -> &[Option<usize>] {
        &self.draw_constant_offsets
    }

    /// Per-frame descriptor layout
    pub fn per_frame_layout(&self) -> Option<&Arc<DescriptorSetLayout>> {
        self.per_frame_layout.as_ref()
    }

    /// Per-view descriptor layout
    pub fn per_view_layout(&self) -> Option<&Arc<DescriptorSetLayout>> {
        self.per_view_layout.as_ref()
    }

    /// Per-draw descriptor layout
    pub fn per_draw_layout(&self) -> Option<&Arc<DescriptorSetLayout>> {
        self.per_draw_layout.as_ref()
    }

    /// Pipeline state derived for `stage`, if any
    pub fn pipeline_state(&self, stage: RenderStageId) -> Option<PipelineStateId> {
        self.pipeline_states
            .iter()
            .find(|(cached_stage, _)| *cached_stage == stage)
            .map(|&(_, pipeline_state)| pipeline_state)
    }

    /// Remember the pipeline state derived for `stage`
    pub fn set_pipeline_state(&mut self, stage: RenderStageId, pipeline_state: PipelineStateId) {
        match self.pipeline_states.iter_mut().find(|(cached_stage, _)| *cached_stage == stage) {
            Some(entry) => entry.1 = pipeline_state,
            None => self.pipeline_states.push((stage, pipeline_state)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::descriptor::EffectParameterClass;
    use std::cell::Cell;

    struct CountingCompiler {
        calls: Cell<usize>,
    }

    impl EffectCompiler for CountingCompiler {
        fn compile(&self, effect_name: &str) -> Result<EffectBytecode, String> {
            self.calls.set(self.calls.get() + 1);
            if effect_name == "Broken" {
                return Err("syntax error".to_string());
            }
            Ok(EffectBytecode::new(
                effect_name,
                DescriptorSetLayoutBuilder::new(),
                DescriptorSetLayoutBuilder::new().with_binding("PerDraw", EffectParameterClass::ConstantBuffer, 1),
                64,
            ))
        }
    }

    #[test]
    fn test_cache_compiles_once() {
        let cache = EffectBytecodeCache::new();
        let compiler = CountingCompiler { calls: Cell::new(0) };

        let first = cache.get_or_compile("Standard", &compiler).unwrap();
        let second = cache.get_or_compile("Standard", &compiler).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiler.calls.get(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cache = EffectBytecodeCache::new();
        let compiler = CountingCompiler { calls: Cell::new(0) };

        let err = cache.get_or_compile("Broken", &compiler).unwrap_err();
        assert_eq!(
            err,
            RenderError::EffectCompilationFailed {
                effect: "Broken".to_string(),
                reason: "syntax error".to_string(),
            }
        );
        assert!(cache.get_or_compile("Broken", &compiler).is_err());
        assert_eq!(compiler.calls.get(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shared_cache_is_a_single_instance() {
        assert!(Arc::ptr_eq(&EffectBytecodeCache::shared(), &EffectBytecodeCache::shared()));
    }

    #[test]
    fn test_bytecode_id_depends_on_content() {
        let layout = DescriptorSetLayoutBuilder::new();
        let a = EffectBytecode::new("A", layout.clone(), layout.clone(), 16);
        let b = EffectBytecode::new("A", layout.clone(), layout.clone(), 32);

        assert_eq!(a.id, EffectBytecode::new("A", layout.clone(), layout, 16).id);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_member_offsets_are_part_of_the_content() {
        let layout = DescriptorSetLayoutBuilder::new();
        let plain = EffectBytecode::new("A", layout.clone(), layout.clone(), 32);
        let with_member = plain.clone().with_draw_constant_buffer_member("World", 16);
        let with_frame = plain
            .clone()
            .with_per_frame_layout(layout.clone().with_binding("Time", EffectParameterClass::ConstantBuffer, 1));

        assert_ne!(plain.id, with_member.id);
        assert_ne!(plain.id, with_frame.id);
        assert_eq!(with_member.draw_constant_offset("World"), Some(16));
        assert_eq!(with_member.draw_constant_offset("Color"), None);
        assert_eq!(with_member.view_constant_offset("World"), None);
    }

    #[test]
    fn test_constant_offsets_follow_slot_order() {
        let bytecode = EffectBytecode::new("Lit", DescriptorSetLayoutBuilder::new(), DescriptorSetLayoutBuilder::new(), 32)
            .with_per_view_constant_buffer(64)
            .with_view_constant_buffer_member("ViewProjection", 0)
            .with_draw_constant_buffer_member("World", 0)
            .with_draw_constant_buffer_member("Color", 16);
        let layout = Arc::new(DescriptorSetLayout::new(&DescriptorSetLayoutBuilder::new()));
        let mut effect = RenderEffect::new("Lit");
        effect.set_bytecode(
            Arc::new(bytecode),
            [Arc::clone(&layout), Arc::clone(&layout), layout],
            RenderEffectState::Normal,
        );

        let view_slots = vec!["Eye".to_string(), "ViewProjection".to_string()];
        let draw_slots = vec!["Color".to_string(), "World".to_string()];
        effect.resolve_constant_offsets(&view_slots, &draw_slots);

        assert_eq!(effect.view_constant_offsets(), &[None, Some(0)]);
        assert_eq!(effect.draw_constant_offsets(), &[Some(16), Some(0)]);

        effect.invalidate();
        assert!(effect.draw_constant_offsets().is_empty());
        assert!(effect.per_frame_layout().is_none());
    }

    #[test]
    fn test_mark_as_used_once_per_frame() {
        let mut effect = RenderEffect::new("Standard");
        assert!(effect.mark_as_used(1));
        assert!(!effect.mark_as_used(1));
        assert!(effect.is_used_during_frame(1));
        assert!(!effect.is_used_during_frame(2));
        assert!(effect.mark_as_used(2));
    }

    #[test]
    fn test_error_state_and_invalidate() {
        let mut effect = RenderEffect::new("Broken");
        assert!(!effect.is_resolved());

        effect.set_error();
        assert_eq!(effect.state(), RenderEffectState::Error);
        assert!(effect.is_resolved());
        assert!(!effect.is_valid());

        effect.invalidate();
        assert_eq!(effect.state(), RenderEffectState::Normal);
        assert!(!effect.is_resolved());
    }

    #[test]
    fn test_pipeline_state_per_stage() {
        let mut effect = RenderEffect::new("Standard");
        let opaque = RenderStageId::new(0);
        let transparent = RenderStageId::new(1);

        effect.set_pipeline_state(opaque, PipelineStateId::new(4));
        effect.set_pipeline_state(transparent, PipelineStateId::new(5));
        effect.set_pipeline_state(opaque, PipelineStateId::new(6));

        assert_eq!(effect.pipeline_state(opaque), Some(PipelineStateId::new(6)));
        assert_eq!(effect.pipeline_state(transparent), Some(PipelineStateId::new(5)));
        assert_eq!(effect.pipeline_state(RenderStageId::new(2)), None);
    }
}
