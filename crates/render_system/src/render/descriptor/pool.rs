//! Per-frame descriptor arena
//!
//! All descriptor types share one contiguous array sized from the requested
//! per-type counts. Sets are handed out by bumping an offset and are only
//! valid until the next [`DescriptorPool::reset`]; every set carries the pool
//! generation it was allocated in, so a handle kept past a reset is rejected
//! instead of reading cleared data.

use crate::render::descriptor::{DescriptorSetLayout, EffectParameterClass};
use crate::render::{PoolKind, RenderError, RenderResult};

/// Opaque backend resource (texture view, buffer, sampler)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub u64);

/// Contents of one descriptor slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DescriptorEntry {
    /// Nothing bound
    #[default]
    Empty,
    /// Range of the frame's constant-buffer arena
    ConstantBufferRange {
        /// Byte offset in the arena
        offset: usize,
        /// Byte length
        size: usize,
    },
    /// Read-only view
    ShaderResource(ResourceHandle),
    /// Sampler state
    Sampler(ResourceHandle),
    /// Read-write view
    UnorderedAccess(ResourceHandle),
}

/// Requested number of descriptors of one class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorTypeCount {
    /// Descriptor class
    pub class: EffectParameterClass,
    /// Number of descriptors
    pub count: usize,
}

impl DescriptorTypeCount {
    /// Create a count entry
    pub const fn new(class: EffectParameterClass, count: usize) -> Self {
        Self { class, count }
    }
}

/// Range of pool entries allocated for the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSet {
    offset: usize,
    len: usize,
    generation: u64,
}

impl DescriptorSet {
    /// First pool entry
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Number of entries
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the set has no entries
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pool generation the set was allocated in
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Bump allocator over a flat descriptor array
#[derive(Debug, Clone)]
pub struct DescriptorPool {
    entries: Vec<DescriptorEntry>,
    offset: usize,
    requested: usize,
    generation: u64,
}

impl DescriptorPool {
    /// Create a pool holding the sum of `counts`
    pub fn new(counts: &[DescriptorTypeCount]) -> Self {
        let capacity = counts.iter().map(|count| count.count).sum();
        Self::with_capacity(capacity)
    }

    /// Create a pool of `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: vec![DescriptorEntry::Empty; capacity],
            offset: 0,
            requested: 0,
            generation: 0,
        }
    }

    /// Total number of entries
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Entries handed out this frame
    pub const fn allocated(&self) -> usize {
        self.offset
    }

    /// Entries still available this frame
    pub fn remaining(&self) -> usize {
        self.capacity() - self.offset
    }

    /// Incremented by every reset
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Entries requested this frame, including requests that failed
    pub const fn peak_demand(&self) -> usize {
        self.requested
    }

    /// Whether a request failed since the last reset
    pub fn is_exhausted(&self) -> bool {
        self.requested > self.capacity()
    }

    /// Reserve `size` entries and return the offset of the first one.
    ///
    /// Fails with [`RenderError::AllocationExhausted`] when the request does
    /// not fit; the offset is left unchanged in that case.
    pub fn allocate(&mut self, size: usize) -> RenderResult<usize> {
        self.requested = self.requested.saturating_add(size);

        let capacity = self.capacity();
        match self.offset.checked_add(size) {
            Some(end) if end <= capacity => {
                let offset = self.offset;
                self.offset = end;
                Ok(offset)
            }
            _ => Err(RenderError::AllocationExhausted {
                pool: PoolKind::Descriptor,
                requested: size,
                available: capacity - self.offset,
                capacity,
            }),
        }
    }

    /// Allocate a set of `len` entries
    pub fn allocate_range(&mut self, len: usize) -> RenderResult<DescriptorSet> {
        let offset = self.allocate(len)?;
        Ok(DescriptorSet {
            offset,
            len,
            generation: self.generation,
        })
    }

    /// Allocate a set sized for `layout`
    pub fn allocate_set(&mut self, layout: &DescriptorSetLayout) -> RenderResult<DescriptorSet> {
        self.allocate_range(layout.element_count())
    }

    /// Entries of `set`
    pub fn entries(&self, set: &DescriptorSet) -> RenderResult<&[DescriptorEntry]> {
        self.check_generation(set)?;
        Ok(&self.entries[set.offset..set.offset + set.len])
    }

    /// Mutable entries of `set`
    pub fn entries_mut(&mut self, set: &DescriptorSet) -> RenderResult<&mut [DescriptorEntry]> {
        self.check_generation(set)?;
        Ok(&mut self.entries[set.offset..set.offset + set.len])
    }

    /// Write entry `index` of `set`
    pub fn set_entry(&mut self, set: &DescriptorSet, index: usize, entry: DescriptorEntry) -> RenderResult<()> {
        let len = set.len;
        let slot = self
            .entries_mut(set)?
            .get_mut(index)
            .ok_or(RenderError::InvalidDescriptorEntry { index, len })?;
        *slot = entry;
        Ok(())
    }

    /// Raw entry at pool position `offset`
    pub fn entry(&self, offset: usize) -> Option<&DescriptorEntry> {
        self.entries.get(offset)
    }

    /// Return to an empty pool: offset zero, every entry cleared, generation bumped
    pub fn reset(&mut self) {
        self.entries[..self.offset].fill(DescriptorEntry::Empty);
        self.offset = 0;
        self.requested = 0;
        self.generation += 1;
    }

    /// Grow to `capacity` entries. Sets allocated this frame stay valid.
    pub fn grow_to(&mut self, capacity: usize) {
        if capacity > self.entries.len() {
            log::debug!("Growing descriptor pool {} -> {} entries", self.entries.len(), capacity);
            self.entries.resize(capacity, DescriptorEntry::Empty);
        }
    }

    fn check_generation(&self, set: &DescriptorSet) -> RenderResult<()> {
        if set.generation == self.generation {
            Ok(())
        } else {
            Err(RenderError::StaleDescriptorSet {
                set_generation: set.generation,
                pool_generation: self.generation,
            })
        }
    }
}

/// Two pools are equal when their entries and allocation offset are equal
impl PartialEq for DescriptorPool {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.entries == other.entries
    }
}

impl Eq for DescriptorPool {}
