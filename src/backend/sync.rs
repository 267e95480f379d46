// Command recording and submission for offscreen frames
//
// One `FrameSync` per frame in flight: a command pool, its primary command
// buffer and the fence signalled when the GPU has finished with both.
// `wait` only blocks while a submission is pending, so a failed submit never
// leaves the slot waiting on a fence nothing will signal.

use ash::vk;
use anyhow::{Context, Result};
use std::cell::Cell;
use std::sync::Arc;
use super::VulkanDevice;

pub struct FrameSync {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub in_flight_fence: vk::Fence,
    pending: Cell<bool>,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        unsafe {
            let command_pool = device.device.create_command_pool(&pool_info, None)
                .context("Failed to create command pool")?;

            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = match device.device.allocate_command_buffers(&alloc_info) {
                Ok(buffers) => buffers[0],
                Err(e) => {
                    device.device.destroy_command_pool(command_pool, None);
                    return Err(e).context("Failed to allocate command buffer");
                }
            };

            let in_flight_fence = match device.device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.device.destroy_command_pool(command_pool, None);
                    return Err(e).context("Failed to create fence");
                }
            };

            Ok(Self {
                command_pool,
                command_buffer,
                in_flight_fence,
                pending: Cell::new(false),
                device: Arc::clone(device),
            })
        }
    }

    /// Wait until the GPU is done with this frame's resources.
    pub fn wait(&self) -> Result<()> {
        if !self.pending.get() {
            return Ok(());
        }
        unsafe {
            self.device.device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX)?;
        }
        self.pending.set(false);
        Ok(())
    }

    /// A submission is on the queue and hasn't been waited for.
    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Wait for the previous submission, then start recording.
    pub fn begin(&self) -> Result<vk::CommandBuffer> {
        self.wait()?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.device.reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())?;
            self.device.device.begin_command_buffer(self.command_buffer, &begin_info)?;
        }
        Ok(self.command_buffer)
    }

    /// Finish recording and submit to the graphics queue.
    pub fn submit(&self) -> Result<()> {
        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();

        unsafe {
            self.device.device.end_command_buffer(self.command_buffer)?;
        }
        track_submission(&self.pending, || unsafe {
            self.device.device.reset_fences(&[self.in_flight_fence])?;
            self.device.device
                .queue_submit(self.device.graphics_queue, &[submit_info], self.in_flight_fence)
                .context("Failed to submit frame")
        })
    }
}

/// Runs `submit` and marks the fence pending only if it went through.
fn track_submission(pending: &Cell<bool>, submit: impl FnOnce() -> Result<()>) -> Result<()> {
    pending.set(false);
    submit()?;
    pending.set(true);
    Ok(())
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_fence(self.in_flight_fence, None);
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
