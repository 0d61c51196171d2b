//! Node references
//!
//! Every node lives in a flat array owned by its render feature and is
//! addressed by a small copyable index. References derived for an effect
//! permutation are computed as `index * slot_count + slot`, giving each
//! (node, permutation slot) pair a dense, unique array position without a
//! hash lookup. Slots an object never uses simply stay empty.

use std::fmt;

use crate::foundation::collections::NodeIndex;
use crate::render::{RenderError, RenderResult};

macro_rules! node_reference {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Reference that addresses nothing
            pub const INVALID: Self = Self(u32::MAX);

            /// Create a reference from a raw array index
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Array position addressed by this reference
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Whether this is not [`Self::INVALID`]
            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl NodeIndex for $name {
            const KIND: &'static str = $kind;

            fn from_index(index: usize) -> Self {
                let raw = u32::try_from(index).unwrap_or(u32::MAX);
                assert!(raw != u32::MAX, "{} index {index} exceeds the addressable range", $kind);
                Self(raw)
            }

            fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}#{}", $kind, self.0)
                } else {
                    write!(f, "{}#invalid", $kind)
                }
            }
        }
    };
}

node_reference!(
    /// Per-frame object node, one per visible object regardless of view
    ObjectNodeReference, "object node"
);
node_reference!(
    /// Object slot that lives as long as the object is registered with a feature
    StaticObjectNodeReference, "static object node"
);
node_reference!(
    /// Position of a view in the render system's view list
    ViewNodeReference, "view node"
);
node_reference!(
    /// Per-frame node for one object seen from one view
    ViewObjectNodeReference, "view object node"
);
node_reference!(
    /// Per-frame node for one (object, effect permutation) pair in use
    EffectObjectNodeReference, "effect object node"
);
node_reference!(
    /// Static (object, effect permutation) slot holding the object's [`RenderEffect`](crate::render::RenderEffect)
    StaticEffectObjectNodeReference, "static effect object node"
);
node_reference!(
    /// Per-frame (view, effect permutation) slot
    EffectViewNodeReference, "effect view node"
);
node_reference!(
    /// Per-frame render node, the fully resolved draw unit
    RenderNodeReference, "render node"
);

/// Index of one effect permutation among those registered by a render feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectPermutationSlot(u32);

impl EffectPermutationSlot {
    /// Create a slot from its index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Slot index
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EffectPermutationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Index of a named constant-buffer member registered by a render feature.
///
/// Each effect resolves the name to the member's byte offset in its own
/// constant buffer, or to nothing when it has no such member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstantBufferOffsetSlot(u32);

impl ConstantBufferOffsetSlot {
    /// Create a slot from its index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Slot index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ConstantBufferOffsetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cbuffer offset#{}", self.0)
    }
}

fn derive_effect_index(
    kind: &'static str,
    index: u32,
    slot_count: u32,
    slot: EffectPermutationSlot,
) -> RenderResult<u32> {
    if index == u32::MAX {
        return Err(RenderError::InvalidNodeReference { kind, index, len: 0 });
    }
    if slot.0 >= slot_count {
        return Err(RenderError::InvalidPermutationSlot { slot: slot.0, slot_count });
    }
    index
        .checked_mul(slot_count)
        .and_then(|base| base.checked_add(slot.0))
        .filter(|&derived| derived != u32::MAX)
        .ok_or(RenderError::EffectReferenceOverflow { index, slot_count })
}

impl StaticObjectNodeReference {
    /// Address of this object's effect for `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= slot_count` or the reference is invalid. Use
    /// [`Self::try_create_effect_reference`] where the inputs are not known
    /// to be in range.
    pub fn create_effect_reference(
        self,
        slot_count: u32,
        slot: EffectPermutationSlot,
    ) -> StaticEffectObjectNodeReference {
        match self.try_create_effect_reference(slot_count, slot) {
            Ok(reference) => reference,
            Err(err) => panic!("{err}"),
        }
    }

    /// Checked variant of [`Self::create_effect_reference`]
    pub fn try_create_effect_reference(
        self,
        slot_count: u32,
        slot: EffectPermutationSlot,
    ) -> RenderResult<StaticEffectObjectNodeReference> {
        derive_effect_index(Self::KIND, self.0, slot_count, slot)
            .map(StaticEffectObjectNodeReference)
    }
}

impl StaticEffectObjectNodeReference {
    /// Static object node this effect slot belongs to.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` is zero.
    pub const fn object_reference(self, slot_count: u32) -> StaticObjectNodeReference {
        match self.try_object_reference(slot_count) {
            Some(reference) => reference,
            None => panic!("object reference requested with zero permutation slots"),
        }
    }

    /// Static object node this effect slot belongs to, `None` if `slot_count` is zero
    pub const fn try_object_reference(self, slot_count: u32) -> Option<StaticObjectNodeReference> {
        match self.0.checked_div(slot_count) {
            Some(index) => Some(StaticObjectNodeReference(index)),
            None => None,
        }
    }

    /// Permutation slot within the owning object.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` is zero.
    pub const fn permutation_slot(self, slot_count: u32) -> EffectPermutationSlot {
        match self.try_permutation_slot(slot_count) {
            Some(slot) => slot,
            None => panic!("permutation slot requested with zero permutation slots"),
        }
    }

    /// Permutation slot within the owning object, `None` if `slot_count` is zero
    pub const fn try_permutation_slot(self, slot_count: u32) -> Option<EffectPermutationSlot> {
        match self.0.checked_rem(slot_count) {
            Some(slot) => Some(EffectPermutationSlot(slot)),
            None => None,
        }
    }
}

impl ViewNodeReference {
    /// Address of this view's data for `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= slot_count` or the reference is invalid.
    pub fn create_effect_reference(
        self,
        slot_count: u32,
        slot: EffectPermutationSlot,
    ) -> EffectViewNodeReference {
        match self.try_create_effect_reference(slot_count, slot) {
            Ok(reference) => reference,
            Err(err) => panic!("{err}"),
        }
    }

    /// Checked variant of [`Self::create_effect_reference`]
    pub fn try_create_effect_reference(
        self,
        slot_count: u32,
        slot: EffectPermutationSlot,
    ) -> RenderResult<EffectViewNodeReference> {
        derive_effect_index(Self::KIND, self.0, slot_count, slot).map(EffectViewNodeReference)
    }
}

impl EffectViewNodeReference {
    /// View this slot belongs to.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` is zero.
    pub const fn view_reference(self, slot_count: u32) -> ViewNodeReference {
        match self.try_view_reference(slot_count) {
            Some(reference) => reference,
            None => panic!("view reference requested with zero permutation slots"),
        }
    }

    /// View this slot belongs to, `None` if `slot_count` is zero
    pub const fn try_view_reference(self, slot_count: u32) -> Option<ViewNodeReference> {
        match self.0.checked_div(slot_count) {
            Some(index) => Some(ViewNodeReference(index)),
            None => None,
        }
    }

    /// Permutation slot within the view.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` is zero.
    pub const fn permutation_slot(self, slot_count: u32) -> EffectPermutationSlot {
        match self.try_permutation_slot(slot_count) {
            Some(slot) => slot,
            None => panic!("permutation slot requested with zero permutation slots"),
        }
    }

    /// Permutation slot within the view, `None` if `slot_count` is zero
    pub const fn try_permutation_slot(self, slot_count: u32) -> Option<EffectPermutationSlot> {
        match self.0.checked_rem(slot_count) {
            Some(slot) => Some(EffectPermutationSlot(slot)),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_effect_reference_is_unique_and_recoverable() {
        let mut seen = HashSet::new();
        for slot_count in 1..=5u32 {
            seen.clear();
            for index in 0..16u32 {
                for slot in 0..slot_count {
                    let slot = EffectPermutationSlot::new(slot);
                    let effect = StaticObjectNodeReference::new(index)
                        .create_effect_reference(slot_count, slot);

                    assert!(seen.insert(effect), "collision at {index}/{slot}");
                    assert_eq!(effect.object_reference(slot_count).index(), index as usize);
                    assert_eq!(effect.permutation_slot(slot_count), slot);
                }
            }
            // Dense: every index below count * slots is used exactly once
            assert_eq!(seen.len(), 16 * slot_count as usize);
            assert!(seen.iter().all(|r| r.index() < 16 * slot_count as usize));
        }
    }

    #[test]
    fn test_view_effect_reference() {
        let view = ViewNodeReference::new(3);
        let effect = view.create_effect_reference(4, EffectPermutationSlot::new(2));

        assert_eq!(effect.index(), 14);
        assert_eq!(effect.view_reference(4), view);
        assert_eq!(effect.permutation_slot(4), EffectPermutationSlot::new(2));
    }

    #[test]
    fn test_zero_slot_count_has_no_owner() {
        let effect = StaticEffectObjectNodeReference::new(5);
        assert_eq!(effect.try_object_reference(0), None);
        assert_eq!(effect.try_permutation_slot(0), None);
        assert_eq!(effect.try_object_reference(2), Some(StaticObjectNodeReference::new(2)));
        assert_eq!(effect.try_permutation_slot(2), Some(EffectPermutationSlot::new(1)));

        let view_effect = EffectViewNodeReference::new(5);
        assert_eq!(view_effect.try_view_reference(0), None);
        assert_eq!(view_effect.try_permutation_slot(0), None);
        assert_eq!(view_effect.try_view_reference(5), Some(ViewNodeReference::new(1)));
    }

    #[test]
    #[should_panic(expected = "zero permutation slots")]
    fn test_object_reference_panics_without_slots() {
        let _ = StaticEffectObjectNodeReference::new(3).object_reference(0);
    }

    #[test]
    fn test_slot_out_of_range_is_rejected() {
        let reference = StaticObjectNodeReference::new(1);
        let err = reference
            .try_create_effect_reference(2, EffectPermutationSlot::new(2))
            .unwrap_err();

        assert_eq!(err, RenderError::InvalidPermutationSlot { slot: 2, slot_count: 2 });
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_create_effect_reference_panics_on_bad_slot() {
        let _ = ViewNodeReference::new(0).create_effect_reference(1, EffectPermutationSlot::new(1));
    }

    #[test]
    fn test_invalid_reference_and_overflow() {
        assert!(StaticObjectNodeReference::INVALID
            .try_create_effect_reference(2, EffectPermutationSlot::new(0))
            .is_err());

        let err = StaticObjectNodeReference::new(u32::MAX / 2)
            .try_create_effect_reference(4, EffectPermutationSlot::new(1))
            .unwrap_err();
        assert!(matches!(err, RenderError::EffectReferenceOverflow { .. }));
    }

    #[test]
    fn test_default_is_invalid() {
        assert!(!RenderNodeReference::default().is_valid());
        assert!(RenderNodeReference::new(0).is_valid());
        assert_eq!(ObjectNodeReference::new(4).to_string(), "object node#4");
        assert_eq!(ObjectNodeReference::INVALID.to_string(), "object node#invalid");
    }
}
