// Uniform / storage buffer handler
//
// Keeps a host-mapped copy of one uniform block and only writes bytes that
// actually changed, so buffers that are pushed every frame with the same
// values don't cause redundant uploads.

use anyhow::Result;
use std::collections::HashSet;
use crate::backend::buffer::{BufferAllocator, BufferKind, HostBuffer};
use super::block::UniformBlock;

/// Where the handler stands relative to its backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// The backing buffer is missing or has the wrong size; `update` must
    /// reallocate it before writes land.
    Reset,
    /// Bytes were written since the last `update`.
    Changed,
    Unchanged,
}

/// Dirty-tracked writer over a mapped uniform or storage buffer.
pub struct BufferHandler<B: HostBuffer> {
    kind: BufferKind,
    block: Option<UniformBlock>,
    multipipeline: bool,
    size: usize,
    bound: bool,
    buffer: Option<B>,
    status: BufferStatus,
    truncated: HashSet<String>,
}

impl<B: HostBuffer> BufferHandler<B> {
    /// A handler with no block; it stays inert until `update` binds one.
    pub fn new(kind: BufferKind) -> Self {
        Self {
            kind,
            block: None,
            multipipeline: false,
            size: 0,
            bound: false,
            buffer: None,
            status: BufferStatus::Reset,
            truncated: HashSet::new(),
        }
    }

    /// A handler sized for `block`. No buffer exists until the first `update`.
    pub fn with_block(kind: BufferKind, block: UniformBlock) -> Self {
        let mut handler = Self::new(kind);
        handler.size = block.size();
        handler.block = Some(block);
        handler
    }

    /// Share the handler between pipeline variants: once a block is held,
    /// `update` keeps it instead of rebinding to whatever block it is given.
    pub fn multipipeline(mut self, enabled: bool) -> Self {
        self.multipipeline = enabled;
        self
    }

    /// Writes a whole payload. A payload of a different size than the tracked
    /// one only records the new size and marks the handler `Reset`.
    pub fn push_bytes(&mut self, data: &[u8]) {
        if data.len() != self.size {
            log::debug!(
                "Buffer handler resized {} -> {} bytes, waiting for reallocation",
                self.size,
                data.len()
            );
            self.size = data.len();
            self.status = BufferStatus::Reset;
            return;
        }

        if self.block.is_none() {
            return;
        }

        let Some(region) = self.mapped_region() else {
            return;
        };
        if region.len() != data.len() {
            return;
        }

        if region != data {
            region.copy_from_slice(data);
            self.mark_changed();
        }
    }

    /// Writes `size` bytes of `object` at a byte offset.
    pub fn push_at<T: bytemuck::Pod>(&mut self, object: &T, offset: usize, size: usize) {
        if self.block.is_none() {
            return;
        }

        let bytes = bytemuck::bytes_of(object);
        let size = size.min(bytes.len());

        let Some(region) = self.mapped_region() else {
            return;
        };
        let region_len = region.len();
        let Some(target) = offset.checked_add(size).and_then(|end| region.get_mut(offset..end)) else {
            log::warn!(
                "Dropped write of {} bytes at offset {} (buffer holds {} bytes)",
                size,
                offset,
                region_len
            );
            return;
        };

        if target != &bytes[..size] {
            target.copy_from_slice(&bytes[..size]);
            self.mark_changed();
        }
    }

    /// Writes a named member of the bound block.
    ///
    /// With `size == 0` the written size is the smaller of the host type and
    /// the member's declared size. Missing blocks or members are ignored so
    /// shader variants with fewer parameters can share host code.
    pub fn push<T: bytemuck::Pod>(&mut self, name: &str, object: &T, size: usize) {
        let Some(block) = &self.block else {
            return;
        };
        let Some(uniform) = block.uniform(name) else {
            log::trace!("Block '{}' has no member '{}'", block.name(), name);
            return;
        };
        let (offset, declared) = (uniform.offset, uniform.size);

        let size = if size == 0 {
            let host = std::mem::size_of::<T>();
            if host > declared && self.truncated.insert(name.to_string()) {
                log::warn!(
                    "Uniform '{}' declares {} bytes but host value has {}; truncating",
                    name,
                    declared,
                    host
                );
            }
            host.min(declared)
        } else {
            size
        };

        self.push_at(object, offset, size);
    }

    /// Synchronises the backing buffer with `block`.
    ///
    /// Returns `true` when a new buffer was allocated (rebind to another
    /// block, pending `Reset`, or no buffer yet), meaning descriptor sets
    /// pointing at the old buffer must be rewritten. Otherwise settles a
    /// `Changed` status back to `Unchanged` and returns `false`.
    pub fn update<A>(&mut self, allocator: &A, block: Option<&UniformBlock>) -> Result<bool>
    where
        A: BufferAllocator<Buffer = B>,
    {
        let held = self.multipipeline && self.block.is_some();
        let layout_changed = !held && self.block.as_ref() != block;
        let missing_buffer = self.block.is_some() && self.buffer.is_none();

        if self.status == BufferStatus::Reset || layout_changed || missing_buffer {
            if layout_changed {
                let follows_block = self.size == 0
                    || self.block.as_ref().is_some_and(|old| old.size() == self.size);
                if let Some(new_block) = block {
                    if follows_block {
                        self.size = new_block.size();
                    }
                }
                self.block = block.cloned();
            }
            self.release();

            if self.block.is_some() && self.size > 0 {
                self.buffer = Some(allocator.allocate(self.kind, self.size)?);
            }

            log::debug!(
                "Buffer handler bound to {:?} ({} bytes)",
                self.block.as_ref().map(|b| b.name()),
                self.size
            );
            self.status = BufferStatus::Changed;
            return Ok(true);
        }

        if self.status == BufferStatus::Changed {
            self.status = BufferStatus::Unchanged;
        }
        Ok(false)
    }

    pub fn status(&self) -> BufferStatus {
        self.status
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn is_multipipeline(&self) -> bool {
        self.multipipeline
    }

    pub fn block(&self) -> Option<&UniformBlock> {
        self.block.as_ref()
    }

    pub fn buffer(&self) -> Option<&B> {
        self.buffer.as_ref()
    }

    fn mapped_region(&mut self) -> Option<&mut [u8]> {
        let buffer = self.buffer.as_mut()?;
        if !self.bound {
            if let Err(e) = buffer.map() {
                log::error!("Failed to map handler buffer: {:#}", e);
                return None;
            }
            self.bound = true;
        }
        buffer.mapped_mut()
    }

    fn mark_changed(&mut self) {
        // A pending reallocation wins over a plain write.
        if self.status != BufferStatus::Reset {
            self.status = BufferStatus::Changed;
        }
    }

    fn release(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            if self.bound {
                buffer.unmap();
            }
        }
        self.bound = false;
    }
}

impl<B: HostBuffer> Drop for BufferHandler<B> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffer::{HostAllocator, HostMemory};
    use ash::vk;
    use glam::{Vec2, Vec4};

    fn block() -> UniformBlock {
        UniformBlock::new("UboObject", 0, vk::ShaderStageFlags::ALL)
            .with_uniform("colour", 0, 16)
            .with_uniform("borderSizes", 16, 8)
            .with_size(32)
    }

    fn ready_handler() -> BufferHandler<HostMemory> {
        let block = block();
        let mut handler = BufferHandler::with_block(BufferKind::Uniform, block.clone());
        assert!(handler.update(&HostAllocator, Some(&block)).unwrap());
        assert!(!handler.update(&HostAllocator, Some(&block)).unwrap());
        assert_eq!(handler.status(), BufferStatus::Unchanged);
        handler
    }

    fn bytes(handler: &BufferHandler<HostMemory>) -> Vec<u8> {
        handler.buffer().unwrap().bytes().to_vec()
    }

    #[test]
    fn test_starts_reset_without_buffer() {
        let handler: BufferHandler<HostMemory> = BufferHandler::with_block(BufferKind::Uniform, block());
        assert_eq!(handler.status(), BufferStatus::Reset);
        assert!(handler.buffer().is_none());
        assert!(!handler.is_bound());
    }

    #[test]
    fn test_identical_push_stays_unchanged() {
        let mut handler = ready_handler();

        handler.push_bytes(&[3; 32]);
        assert_eq!(handler.status(), BufferStatus::Changed);
        handler.update(&HostAllocator, Some(&block())).unwrap();
        assert_eq!(handler.status(), BufferStatus::Unchanged);

        handler.push_bytes(&[3; 32]);
        assert_eq!(handler.status(), BufferStatus::Unchanged);
        assert_eq!(bytes(&handler), vec![3; 32]);
    }

    #[test]
    fn test_zero_push_into_fresh_buffer_is_unchanged() {
        let mut handler = ready_handler();
        handler.push_bytes(&[0; 32]);
        assert_eq!(handler.status(), BufferStatus::Unchanged);
    }

    #[test]
    fn test_size_mismatch_resets_without_writing() {
        let mut handler = ready_handler();

        handler.push_bytes(&[0; 48]);
        assert_eq!(handler.status(), BufferStatus::Reset);
        assert_eq!(handler.size(), 48);
        assert_eq!(bytes(&handler), vec![0; 32]);

        // Same content, still a different size.
        let mut other = ready_handler();
        other.push_bytes(&[9; 16]);
        assert_eq!(other.status(), BufferStatus::Reset);
    }

    #[test]
    fn test_reset_reallocates_with_new_size() {
        let mut handler = ready_handler();
        handler.push_bytes(&[1; 64]);

        assert!(handler.update(&HostAllocator, Some(&block())).unwrap());
        assert_eq!(handler.status(), BufferStatus::Changed);
        assert_eq!(handler.buffer().unwrap().size(), 64);
        assert!(!handler.is_bound());

        handler.push_bytes(&[1; 64]);
        assert_eq!(bytes(&handler), vec![1; 64]);
    }

    #[test]
    fn test_maps_lazily_once() {
        let mut handler = ready_handler();
        assert!(!handler.is_bound());

        handler.push("colour", &Vec4::ONE, 0);
        handler.push("colour", &Vec4::ZERO, 0);
        handler.push_bytes(&[2; 32]);

        assert!(handler.is_bound());
        assert_eq!(handler.buffer().unwrap().map_count(), 1);
    }

    #[test]
    fn test_named_push_writes_at_member_offset() {
        let mut handler = ready_handler();
        handler.push("borderSizes", &Vec2::new(1.0, 2.0), 0);

        let data = bytes(&handler);
        assert_eq!(&data[16..24], bytemuck::bytes_of(&Vec2::new(1.0, 2.0)));
        assert!(data[..16].iter().all(|&b| b == 0));
        assert_eq!(handler.status(), BufferStatus::Changed);
    }

    #[test]
    fn test_named_push_truncates_to_declared_size() {
        let mut handler = ready_handler();
        let value = Vec4::new(1.0, 2.0, 3.0, 4.0);
        handler.push("borderSizes", &value, 0);

        let data = bytes(&handler);
        assert_eq!(&data[16..24], &bytemuck::bytes_of(&value)[..8]);
        assert!(data[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_named_push_honours_size_override() {
        let mut handler = ready_handler();
        handler.push("colour", &Vec4::new(5.0, 6.0, 7.0, 8.0), 4);

        let data = bytes(&handler);
        assert_eq!(&data[..4], bytemuck::bytes_of(&5.0f32));
        assert!(data[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unknown_member_is_noop() {
        let mut handler = ready_handler();
        handler.push_bytes(&[4; 32]);
        handler.update(&HostAllocator, Some(&block())).unwrap();
        let before = bytes(&handler);

        handler.push("doesNotExist", &Vec4::ONE, 0);

        assert_eq!(handler.status(), BufferStatus::Unchanged);
        assert_eq!(bytes(&handler), before);
    }

    #[test]
    fn test_push_without_block_is_noop() {
        let mut handler: BufferHandler<HostMemory> = BufferHandler::new(BufferKind::Storage);
        handler.push("colour", &Vec4::ONE, 0);
        handler.push_at(&Vec4::ONE, 0, 16);

        assert_eq!(handler.status(), BufferStatus::Reset);
        assert!(!handler.is_bound());
    }

    #[test]
    fn test_out_of_range_write_is_dropped() {
        let mut handler = ready_handler();
        handler.push_at(&Vec4::ONE, 24, 16);

        assert_eq!(handler.status(), BufferStatus::Unchanged);
        assert_eq!(bytes(&handler), vec![0; 32]);
    }

    #[test]
    fn test_overflowing_offset_is_dropped() {
        let mut handler = ready_handler();
        handler.push_at(&1.0f32, usize::MAX, 4);
        handler.push_at(&1.0f32, usize::MAX - 2, 4);

        assert_eq!(handler.status(), BufferStatus::Unchanged);
        assert_eq!(bytes(&handler), vec![0; 32]);
    }

    #[test]
    fn test_rebind_to_other_block_reports_change() {
        let mut handler = ready_handler();
        let bigger = UniformBlock::new("UboScene", 1, vk::ShaderStageFlags::VERTEX)
            .with_uniform("projection", 0, 64);

        assert!(handler.update(&HostAllocator, Some(&bigger)).unwrap());
        assert_eq!(handler.size(), 64);
        assert_eq!(handler.block().unwrap().name(), "UboScene");
        assert_eq!(handler.buffer().unwrap().size(), 64);

        assert!(!handler.update(&HostAllocator, Some(&bigger)).unwrap());
    }

    #[test]
    fn test_multipipeline_keeps_held_block() {
        let block = block();
        let mut handler: BufferHandler<HostMemory> =
            BufferHandler::with_block(BufferKind::Uniform, block.clone()).multipipeline(true);
        assert!(handler.update(&HostAllocator, Some(&block)).unwrap());

        let variant = UniformBlock::new("UboScene", 1, vk::ShaderStageFlags::VERTEX)
            .with_uniform("projection", 0, 64);
        assert!(!handler.update(&HostAllocator, Some(&variant)).unwrap());
        assert!(!handler.update(&HostAllocator, None).unwrap());
        assert_eq!(handler.block().unwrap().name(), "UboObject");
        assert_eq!(handler.buffer().unwrap().size(), 32);

        // A pending resize still reallocates, against the held block.
        handler.push_bytes(&[1; 48]);
        assert!(handler.update(&HostAllocator, Some(&variant)).unwrap());
        assert_eq!(handler.block().unwrap().name(), "UboObject");
        assert_eq!(handler.buffer().unwrap().size(), 48);
    }

    #[test]
    fn test_multipipeline_binds_first_block() {
        let mut handler: BufferHandler<HostMemory> = BufferHandler::new(BufferKind::Storage).multipipeline(true);
        assert!(handler.is_multipipeline());

        assert!(handler.update(&HostAllocator, Some(&block())).unwrap());
        assert_eq!(handler.size(), 32);
        assert_eq!(handler.block().unwrap().name(), "UboObject");
    }

    #[test]
    fn test_unbinding_block_drops_buffer() {
        let mut handler = ready_handler();
        assert!(handler.update(&HostAllocator, None).unwrap());
        assert!(handler.buffer().is_none());
        assert!(!handler.update(&HostAllocator, None).unwrap());
        assert_eq!(handler.status(), BufferStatus::Unchanged);
    }
}
