//! Per-frame constant-buffer arena
//!
//! Same bump discipline as the descriptor pool, over bytes. Every allocation
//! starts on a multiple of the configured alignment.

use bytemuck::Pod;

use crate::render::nodes::ConstantBufferOffsetSlot;
use crate::render::{PoolKind, RenderError, RenderResult};

/// Bump allocator over the frame's constant data
#[derive(Debug, Clone)]
pub struct ConstantBufferPool {
    data: Vec<u8>,
    alignment: usize,
    offset: usize,
    requested: usize,
    exhausted: bool,
    generation: u64,
}

impl ConstantBufferPool {
    /// Create an arena of `capacity` bytes.
    ///
    /// `alignment` is rounded up to a power of two.
    pub fn new(capacity: usize, alignment: usize) -> Self {
        Self {
            data: vec![0; capacity],
            alignment: alignment.max(1).next_power_of_two(),
            offset: 0,
            requested: 0,
            exhausted: false,
            generation: 0,
        }
    }

    /// Arena size in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Allocation alignment in bytes
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Bytes handed out this frame, including alignment padding
    pub const fn allocated(&self) -> usize {
        self.offset
    }

    /// End offset this frame would have reached had every request succeeded,
    /// alignment padding included
    pub const fn peak_demand(&self) -> usize {
        self.requested
    }

    /// Whether a request failed since the last reset
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Incremented by every reset
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Reserve `size` bytes and return their aligned offset
    pub fn allocate(&mut self, size: usize) -> RenderResult<usize> {
        self.requested = self
            .align_up(self.requested)
            .and_then(|start| start.checked_add(size))
            .unwrap_or(usize::MAX);

        let capacity = self.capacity();
        let start = self.align_up(self.offset);
        match start.and_then(|start| Some((start, start.checked_add(size)?))) {
            Some((start, end)) if end <= capacity => {
                self.offset = end;
                Ok(start)
            }
            _ => {
                self.exhausted = true;
                Err(RenderError::AllocationExhausted {
                    pool: PoolKind::ConstantBuffer,
                    requested: size,
                    available: start.map_or(0, |start| capacity.saturating_sub(start)),
                    capacity,
                })
            }
        }
    }

    /// Copy `value` into the arena at `offset`
    pub fn write<T: Pod>(&mut self, offset: usize, value: &T) -> RenderResult<()> {
        self.write_bytes(offset, bytemuck::bytes_of(value))
    }

    /// Copy raw bytes into the arena at `offset`
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> RenderResult<()> {
        self.bytes_mut(offset, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Allocated bytes `offset..offset + len`
    pub fn bytes(&self, offset: usize, len: usize) -> RenderResult<&[u8]> {
        let end = self.check_range(offset, len)?;
        Ok(&self.data[offset..end])
    }

    /// Mutable allocated bytes `offset..offset + len`
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> RenderResult<&mut [u8]> {
        let end = self.check_range(offset, len)?;
        Ok(&mut self.data[offset..end])
    }

    /// Read a value back from the arena
    pub fn read<T: Pod>(&self, offset: usize) -> RenderResult<T> {
        let bytes = self.bytes(offset, std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Everything written this frame, for upload by the backend
    pub fn used_data(&self) -> &[u8] {
        &self.data[..self.offset]
    }

    /// Zero the used range and start over
    pub fn reset(&mut self) {
        self.data[..self.offset].fill(0);
        self.offset = 0;
        self.requested = 0;
        self.exhausted = false;
        self.generation += 1;
    }

    /// Grow to `capacity` bytes. Offsets handed out this frame stay valid.
    pub fn grow_to(&mut self, capacity: usize) {
        if capacity > self.data.len() {
            log::debug!("Growing constant buffer pool {} -> {} bytes", self.data.len(), capacity);
            self.data.resize(capacity, 0);
        }
    }

    fn align_up(&self, value: usize) -> Option<usize> {
        value
            .checked_add(self.alignment - 1)
            .map(|padded| padded & !(self.alignment - 1))
    }

    fn check_range(&self, offset: usize, len: usize) -> RenderResult<usize> {
        match offset.checked_add(len) {
            Some(end) if end <= self.offset => Ok(end),
            _ => Err(RenderError::InvalidConstantBufferRange {
                offset,
                end: offset.saturating_add(len),
                allocated: self.offset,
            }),
        }
    }
}

/// One constant-buffer allocation handed to a render feature, with the
/// member offsets its effect resolved for each [`ConstantBufferOffsetSlot`]
#[derive(Debug)]
pub struct ConstantBufferWriter<'a> {
    bytes: &'a mut [u8],
    offsets: &'a [Option<usize>],
}

impl<'a> ConstantBufferWriter<'a> {
    /// Wrap `bytes`; `offsets` is indexed by slot
    pub fn new(bytes: &'a mut [u8], offsets: &'a [Option<usize>]) -> Self {
        Self { bytes, offsets }
    }

    /// Size of the allocation in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the allocation is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw bytes of the allocation
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.bytes
    }

    /// Byte offset of the member behind `slot`, if the effect declares it
    pub fn offset(&self, slot: ConstantBufferOffsetSlot) -> Option<usize> {
        self.offsets.get(slot.index()).copied().flatten()
    }

    /// Write `value` at the member behind `slot`.
    ///
    /// Returns `false` and writes nothing when the effect has no such member
    /// or the value would run past the allocation.
    pub fn write<T: Pod>(&mut self, slot: ConstantBufferOffsetSlot, value: &T) -> bool {
        let bytes = bytemuck::bytes_of(value);
        let target = self
            .offset(slot)
            .and_then(|offset| Some(offset..offset.checked_add(bytes.len())?))
            .and_then(|range| self.bytes.get_mut(range));
        match target {
            Some(target) => {
                target.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    struct PerDraw {
        world: [f32; 4],
        color: [f32; 4],
    }

    #[test]
    fn test_allocations_are_aligned() {
        let mut pool = ConstantBufferPool::new(1024, 256);
        assert_eq!(pool.allocate(32), Ok(0));
        assert_eq!(pool.allocate(100), Ok(256));
        assert_eq!(pool.allocate(4), Ok(512));
        assert_eq!(pool.allocated(), 516);
    }

    #[test]
    fn test_alignment_is_rounded_to_power_of_two() {
        assert_eq!(ConstantBufferPool::new(64, 48).alignment(), 64);
        assert_eq!(ConstantBufferPool::new(64, 0).alignment(), 1);
    }

    #[test]
    fn test_exhaustion() {
        let mut pool = ConstantBufferPool::new(512, 256);
        pool.allocate(200).unwrap();
        pool.allocate(200).unwrap();

        let err = pool.allocate(1).unwrap_err();
        assert!(matches!(
            err,
            RenderError::AllocationExhausted { pool: PoolKind::ConstantBuffer, requested: 1, .. }
        ));
        assert_eq!(pool.allocated(), 456);
        assert!(pool.is_exhausted());
        assert_eq!(pool.peak_demand(), 513);

        pool.reset();
        assert!(!pool.is_exhausted());
        assert_eq!(pool.peak_demand(), 0);
    }

    #[test]
    fn test_tail_allocation_smaller_than_alignment_fits() {
        let mut pool = ConstantBufferPool::new(300, 256);
        assert_eq!(pool.allocate(40), Ok(0));
        assert_eq!(pool.allocate(40), Ok(256));

        assert_eq!(pool.allocated(), 296);
        assert_eq!(pool.peak_demand(), 296);
        assert!(!pool.is_exhausted());
    }

    #[test]
    fn test_oversized_request_saturates_demand() {
        let mut pool = ConstantBufferPool::new(64, 16);
        assert!(pool.allocate(usize::MAX).is_err());
        assert!(pool.is_exhausted());
        assert_eq!(pool.peak_demand(), usize::MAX);
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_write_and_read_back() {
        let mut pool = ConstantBufferPool::new(512, 16);
        let offset = pool.allocate(std::mem::size_of::<PerDraw>()).unwrap();
        let value = PerDraw {
            world: [1.0, 2.0, 3.0, 1.0],
            color: [0.5, 0.25, 0.0, 1.0],
        };

        pool.write(offset, &value).unwrap();
        assert_eq!(pool.read::<PerDraw>(offset).unwrap(), value);

        pool.reset();
        assert!(pool.read::<PerDraw>(offset).is_err());
        assert_eq!(pool.generation(), 1);
    }

    #[test]
    fn test_write_outside_allocation_is_rejected() {
        let mut pool = ConstantBufferPool::new(512, 16);
        pool.allocate(8).unwrap();

        assert_eq!(
            pool.write_bytes(4, &[0; 8]),
            Err(RenderError::InvalidConstantBufferRange { offset: 4, end: 12, allocated: 8 })
        );
    }

    #[test]
    fn test_writer_places_members_at_resolved_offsets() {
        let mut bytes = [0u8; 16];
        let offsets = [Some(4), None, Some(14)];
        let mut writer = ConstantBufferWriter::new(&mut bytes, &offsets);

        assert_eq!(writer.offset(ConstantBufferOffsetSlot::new(0)), Some(4));
        assert_eq!(writer.offset(ConstantBufferOffsetSlot::new(7)), None);
        assert!(writer.write(ConstantBufferOffsetSlot::new(0), &1.5_f32));
        assert!(!writer.write(ConstantBufferOffsetSlot::new(1), &2.0_f32));
        // Member at 14 cannot hold four bytes
        assert!(!writer.write(ConstantBufferOffsetSlot::new(2), &3.0_f32));
        assert!(!writer.write(ConstantBufferOffsetSlot::new(9), &3.0_f32));

        approx::assert_relative_eq!(bytemuck::pod_read_unaligned::<f32>(&bytes[4..8]), 1.5);
        assert!(bytes[8..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_reset_zeroes_used_range() {
        let mut pool = ConstantBufferPool::new(64, 16);
        let offset = pool.allocate(4).unwrap();
        pool.write(offset, &0xffff_ffffu32).unwrap();
        pool.reset();

        let offset = pool.allocate(4).unwrap();
        assert_eq!(pool.read::<u32>(offset).unwrap(), 0);
    }
}
