//! Specialized collection types
//!
//! Node arrays are plain vectors addressed by typed node references. Every
//! lookup is bounds-checked and reports an out-of-range reference as a
//! [`RenderError::InvalidNodeReference`] instead of panicking.

use std::marker::PhantomData;

pub use slotmap::{new_key_type, SlotMap};

use crate::render::{RenderError, RenderResult};

/// A copyable index type addressing one node array
pub trait NodeIndex: Copy {
    /// Human-readable name used in error messages
    const KIND: &'static str;

    /// Build a reference from an array position
    fn from_index(index: usize) -> Self;

    /// Raw index carried by the reference
    fn raw(self) -> u32;
}

/// Flat array of per-frame nodes addressed by `R`
#[derive(Debug, Clone)]
pub struct NodeArray<R, T> {
    items: Vec<T>,
    _reference: PhantomData<fn() -> R>,
}

impl<R: NodeIndex, T> NodeArray<R, T> {
    /// Create an empty node array
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            _reference: PhantomData,
        }
    }

    /// Create an empty node array with preallocated storage
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            _reference: PhantomData,
        }
    }

    /// Append a node and return its reference
    pub fn push(&mut self, item: T) -> R {
        let reference = R::from_index(self.items.len());
        self.items.push(item);
        reference
    }

    /// Get a node by reference
    pub fn get(&self, reference: R) -> RenderResult<&T> {
        let len = self.items.len();
        self.items
            .get(reference.raw() as usize)
            .ok_or_else(|| Self::out_of_range(reference, len))
    }

    /// Get a mutable node by reference
    pub fn get_mut(&mut self, reference: R) -> RenderResult<&mut T> {
        let len = self.items.len();
        self.items
            .get_mut(reference.raw() as usize)
            .ok_or_else(|| Self::out_of_range(reference, len))
    }

    /// Replace the node at `reference`
    pub fn set(&mut self, reference: R, item: T) -> RenderResult<()> {
        *self.get_mut(reference)? = item;
        Ok(())
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the array holds no nodes
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every node, keeping the allocation for the next frame
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterate nodes together with their references
    pub fn iter(&self) -> impl Iterator<Item = (R, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(index, item)| (R::from_index(index), item))
    }

    /// Nodes as a slice, in reference order
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Remove the node at `index`, moving the last node into its place
    pub fn swap_remove(&mut self, index: usize) -> Option<T> {
        (index < self.items.len()).then(|| self.items.swap_remove(index))
    }

    /// Remove block `index` of `block_len` consecutive nodes, moving the
    /// last block into its place
    pub fn swap_remove_block(&mut self, index: usize, block_len: usize) {
        let block_count = if block_len == 0 { 0 } else { self.items.len() / block_len };
        if index >= block_count {
            return;
        }
        let last = block_count - 1;
        if index != last {
            for offset in 0..block_len {
                self.items.swap(index * block_len + offset, last * block_len + offset);
            }
        }
        self.items.truncate(last * block_len);
    }

    fn out_of_range(reference: R, len: usize) -> RenderError {
        RenderError::InvalidNodeReference {
            kind: R::KIND,
            index: reference.raw(),
            len,
        }
    }
}

impl<R: NodeIndex, T: Clone> NodeArray<R, T> {
    /// Resize to `len` nodes, filling new slots with `value`
    pub fn resize(&mut self, len: usize, value: T) {
        self.items.resize(len, value);
    }
}

impl<R: NodeIndex, T> Default for NodeArray<R, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::nodes::ObjectNodeReference;

    #[test]
    fn test_push_returns_dense_references() {
        let mut array: NodeArray<ObjectNodeReference, &str> = NodeArray::new();
        let a = array.push("a");
        let b = array.push("b");

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(*array.get(b).unwrap(), "b");
        assert_eq!(array.iter().map(|(r, _)| r).collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_out_of_range_reference_is_an_error() {
        let mut array: NodeArray<ObjectNodeReference, u32> = NodeArray::new();
        array.push(7);

        let err = array.get(ObjectNodeReference::new(3)).unwrap_err();
        assert_eq!(
            err,
            RenderError::InvalidNodeReference { kind: "object node", index: 3, len: 1 }
        );
        assert!(array.get(ObjectNodeReference::INVALID).is_err());
        assert!(array.get_mut(ObjectNodeReference::INVALID).is_err());
    }

    #[test]
    fn test_swap_remove_block_moves_last_block() {
        let mut array: NodeArray<ObjectNodeReference, u32> = NodeArray::new();
        for value in 0..6 {
            array.push(value);
        }

        // Three blocks of two: [0 1] [2 3] [4 5]
        array.swap_remove_block(0, 2);
        assert_eq!(array.as_slice(), &[4, 5, 2, 3]);

        array.swap_remove_block(1, 2);
        assert_eq!(array.as_slice(), &[4, 5]);

        array.swap_remove_block(3, 2);
        assert_eq!(array.as_slice(), &[4, 5]);
    }

    #[test]
    fn test_clear_keeps_nothing() {
        let mut array: NodeArray<ObjectNodeReference, u32> = NodeArray::with_capacity(4);
        array.push(1);
        array.push(2);
        array.clear();

        assert!(array.is_empty());
        assert!(array.get(ObjectNodeReference::new(0)).is_err());
    }
}
