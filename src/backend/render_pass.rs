// Render pass creation and render target description
//
// Pipelines are compiled against a render pass. The `RenderTarget` carries
// what a pipeline needs to know about it: the pass handle, how many colour
// attachments it writes and the sample count.

use anyhow::{Context, Result};
use ash::vk;
use super::VulkanDevice;

/// Attachments of a single-subpass render pass.
#[derive(Debug, Clone)]
pub struct AttachmentLayout {
    pub color_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
    /// Layout colour attachments end in (PRESENT_SRC_KHR for swapchains).
    pub final_color_layout: vk::ImageLayout,
}

impl AttachmentLayout {
    /// One colour attachment sampled afterwards, plus optional depth.
    pub fn offscreen(format: vk::Format, depth_format: Option<vk::Format>) -> Self {
        Self {
            color_formats: vec![format],
            depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            final_color_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// A G-buffer with several colour attachments and depth.
    pub fn deferred(color_formats: Vec<vk::Format>, depth_format: vk::Format) -> Self {
        Self {
            color_formats,
            depth_format: Some(depth_format),
            samples: vk::SampleCountFlags::TYPE_1,
            final_color_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

/// What a pipeline is compiled against.
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub color_attachments: u32,
    pub samples: vk::SampleCountFlags,
}

impl RenderTarget {
    pub fn new(render_pass: vk::RenderPass, layout: &AttachmentLayout) -> Self {
        Self {
            render_pass,
            subpass: 0,
            color_attachments: layout.color_formats.len() as u32,
            samples: layout.samples,
        }
    }
}

/// Create a render pass for the given attachments
pub fn create_render_pass(device: &VulkanDevice, layout: &AttachmentLayout) -> Result<vk::RenderPass> {
    let mut attachments: Vec<vk::AttachmentDescription> = layout
        .color_formats
        .iter()
        .map(|&format| {
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(layout.samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(layout.final_color_layout)
                .build()
        })
        .collect();

    let color_refs: Vec<vk::AttachmentReference> = (0..layout.color_formats.len() as u32)
        .map(|attachment| vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        })
        .collect();

    let depth_ref = layout.depth_format.map(|format| {
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(layout.samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );
        vk::AttachmentReference {
            attachment: color_refs.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    });

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    let subpass = subpass.build();

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .build();

    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe {
        device.device.create_render_pass(&render_pass_info, None)
            .context("Failed to create render pass")
    }
}
