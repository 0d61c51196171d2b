//! Descriptor-set layouts
//!
//! A layout is the immutable schema of one descriptor set: an ordered list of
//! (parameter key, class, array size) entries. Each entry occupies
//! `array_size` consecutive descriptor slots, so a set of a given layout
//! needs [`DescriptorSetLayout::element_count`] pool entries.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Kind of resource bound in a descriptor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectParameterClass {
    /// Constant (uniform) buffer range
    ConstantBuffer,
    /// Read-only texture or buffer view
    ShaderResourceView,
    /// Sampler state
    Sampler,
    /// Read-write texture or buffer view
    UnorderedAccessView,
}

/// One binding of a layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutEntry {
    /// Effect parameter key
    pub key: String,
    /// Resource class
    pub class: EffectParameterClass,
    /// Number of consecutive descriptors
    pub array_size: u32,
}

/// Ordered list of bindings a [`DescriptorSetLayout`] is created from
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutBuilder {
    entries: Vec<DescriptorSetLayoutEntry>,
}

impl DescriptorSetLayoutBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a binding
    #[must_use]
    pub fn with_binding(mut self, key: impl Into<String>, class: EffectParameterClass, array_size: u32) -> Self {
        self.add_binding(key, class, array_size);
        self
    }

    /// Append a binding
    pub fn add_binding(&mut self, key: impl Into<String>, class: EffectParameterClass, array_size: u32) {
        self.entries.push(DescriptorSetLayoutEntry {
            key: key.into(),
            class,
            array_size,
        });
    }

    /// Bindings in declaration order
    pub fn entries(&self) -> &[DescriptorSetLayoutEntry] {
        &self.entries
    }

    /// Whether no binding was declared
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stable hash of the binding list
    pub fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Immutable descriptor-set schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayout {
    entries: Vec<DescriptorSetLayoutEntry>,
    offsets: Vec<usize>,
    element_count: usize,
    hash: u64,
}

impl DescriptorSetLayout {
    /// Build a layout from `builder`
    pub fn new(builder: &DescriptorSetLayoutBuilder) -> Self {
        let mut offsets = Vec::with_capacity(builder.entries.len());
        let mut element_count = 0usize;
        for entry in &builder.entries {
            offsets.push(element_count);
            element_count += entry.array_size as usize;
        }

        Self {
            entries: builder.entries.clone(),
            offsets,
            element_count,
            hash: builder.hash_value(),
        }
    }

    /// Total number of descriptors in a set of this layout
    pub const fn element_count(&self) -> usize {
        self.element_count
    }

    /// Bindings in declaration order
    pub fn entries(&self) -> &[DescriptorSetLayoutEntry] {
        &self.entries
    }

    /// First descriptor index of the binding named `key`.
    ///
    /// `None` when there is no such binding or it holds no descriptors.
    pub fn offset_of(&self, key: &str) -> Option<usize> {
        self.bindings().find(|(_, entry)| entry.key == key).map(|(offset, _)| offset)
    }

    /// Bindings with their first descriptor index.
    ///
    /// Bindings with an array size of zero own no descriptor and are left out,
    /// so every yielded offset is a valid index into a set of this layout.
    pub fn bindings(&self) -> impl Iterator<Item = (usize, &DescriptorSetLayoutEntry)> {
        self.offsets
            .iter()
            .copied()
            .zip(self.entries.iter())
            .filter(|(_, entry)| entry.array_size > 0)
    }

    /// Hash of the builder this layout was created from
    pub const fn hash_value(&self) -> u64 {
        self.hash
    }
}

/// Creates each distinct layout once and shares it afterwards
#[derive(Debug, Default)]
pub struct DescriptorSetLayoutCache {
    layouts: HashMap<DescriptorSetLayoutBuilder, Arc<DescriptorSetLayout>>,
}

impl DescriptorSetLayoutCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout for `builder`, created on first request
    pub fn get_or_create(&mut self, builder: &DescriptorSetLayoutBuilder) -> Arc<DescriptorSetLayout> {
        if let Some(layout) = self.layouts.get(builder) {
            return Arc::clone(layout);
        }

        let layout = Arc::new(DescriptorSetLayout::new(builder));
        log::debug!(
            "Created descriptor set layout {:016x} ({} descriptors)",
            layout.hash_value(),
            layout.element_count()
        );
        self.layouts.insert(builder.clone(), Arc::clone(&layout));
        layout
    }

    /// Number of distinct layouts created
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    /// Whether no layout was created yet
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}
