// Descriptor set layouts, pools and writes
//
// Every pipeline owns one pool sized from its declared bindings. Running
// out of sets means the sizing was wrong, so exhaustion is reported as a
// configuration error rather than retried.

use anyhow::{Context, Result};
use ash::vk;

/// Descriptor sets are duplicated per frame in flight.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 2;

/// One binding a shader declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stage_flags: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    pub fn uniform_buffer(binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            stage_flags,
        }
    }

    pub fn storage_buffer(binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
            stage_flags,
        }
    }

    pub fn combined_image_sampler(binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            stage_flags,
        }
    }

    pub fn layout_binding(&self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(1)
            .stage_flags(self.stage_flags)
            .build()
    }
}

/// How many sets a pool must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizing {
    pub sets_per_frame: u32,
    pub frames_in_flight: u32,
}

impl Default for PoolSizing {
    fn default() -> Self {
        Self {
            sets_per_frame: 1,
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
        }
    }
}

impl PoolSizing {
    pub fn max_sets(&self) -> u32 {
        self.sets_per_frame.max(1) * self.frames_in_flight.max(1)
    }
}

/// Pool sizes per descriptor type, in order of first declaration.
pub fn pool_sizes(bindings: &[DescriptorBinding], sizing: PoolSizing) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();

    for binding in bindings {
        match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
            Some(size) => size.descriptor_count += sizing.max_sets(),
            None => sizes.push(vk::DescriptorPoolSize {
                ty: binding.descriptor_type,
                descriptor_count: sizing.max_sets(),
            }),
        }
    }

    sizes
}

/// A pending update to one binding of a set.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorWrite {
    Buffer {
        binding: u32,
        descriptor_type: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
    Image {
        binding: u32,
        info: vk::DescriptorImageInfo,
    },
}

pub fn create_set_layout(device: &ash::Device, bindings: &[DescriptorBinding]) -> Result<vk::DescriptorSetLayout> {
    let layout_bindings: Vec<_> = bindings.iter().map(DescriptorBinding::layout_binding).collect();
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
        .bindings(&layout_bindings);

    unsafe {
        device.create_descriptor_set_layout(&layout_info, None)
            .context("Failed to create descriptor set layout")
    }
}

pub fn create_pool(device: &ash::Device, bindings: &[DescriptorBinding], sizing: PoolSizing) -> Result<vk::DescriptorPool> {
    let sizes = pool_sizes(bindings, sizing);
    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .pool_sizes(&sizes)
        .max_sets(sizing.max_sets());

    unsafe {
        device.create_descriptor_pool(&pool_info, None)
            .context("Failed to create descriptor pool")
    }
}

pub fn allocate_set(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
) -> Result<vk::DescriptorSet> {
    let layouts = [layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&layouts);

    let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) };
    match sets {
        Ok(sets) => sets.into_iter().next().context("Descriptor set allocation returned nothing"),
        Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
            anyhow::bail!("Descriptor pool exhausted; pool sizing does not cover this allocation")
        }
        Err(e) => Err(e).context("Failed to allocate descriptor set"),
    }
}

pub fn write_set(device: &ash::Device, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
    let vk_writes: Vec<vk::WriteDescriptorSet> = writes
        .iter()
        .map(|write| match write {
            DescriptorWrite::Buffer { binding, descriptor_type, info } => {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*descriptor_type)
                    .buffer_info(std::slice::from_ref(info))
                    .build()
            }
            DescriptorWrite::Image { binding, info } => {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info))
                    .build()
            }
        })
        .collect();

    unsafe {
        device.update_descriptor_sets(&vk_writes, &[]);
    }
}
