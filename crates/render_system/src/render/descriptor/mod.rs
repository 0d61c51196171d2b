//! Descriptor-set layouts and the per-frame arenas resources are bound from

mod buffer;
mod layout;
mod pool;

pub use buffer::{ConstantBufferPool, ConstantBufferWriter};
pub use layout::{
    DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetLayoutCache,
    DescriptorSetLayoutEntry, EffectParameterClass,
};
pub use pool::{DescriptorEntry, DescriptorPool, DescriptorSet, DescriptorTypeCount, ResourceHandle};
