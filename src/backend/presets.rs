// Fixed-function presets per pipeline kind
//
// The kind of a pipeline decides depth testing, culling, blending and fill
// mode. These are plain data; `Pipeline::create` turns them into Vulkan
// create-info structs.

use anyhow::Result;
use ash::vk;

/// Which preset a pipeline is compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Depth-tested, back-face culled, alpha blended geometry.
    Polygon,
    /// Overlays (UI, text): no depth, no culling, alpha blended.
    NoDepthTest,
    /// Deferred geometry pass writing every colour attachment of the target.
    Mrt,
    /// Full-screen passes sampling several textures.
    MultiTexture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    Alpha,
}

/// Fixed-function parameters selected by a `PipelineKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatePreset {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub cull_mode: vk::CullModeFlags,
    pub polygon_mode: vk::PolygonMode,
    pub blend: BlendMode,
    pub color_attachments: u32,
}

impl PipelineKind {
    /// The preset for this kind; `target_color_attachments` only matters for `Mrt`.
    pub fn preset(self, target_color_attachments: u32) -> StatePreset {
        match self {
            PipelineKind::Polygon => StatePreset {
                depth_test: true,
                depth_write: true,
                depth_compare: vk::CompareOp::LESS_OR_EQUAL,
                cull_mode: vk::CullModeFlags::BACK,
                polygon_mode: vk::PolygonMode::FILL,
                blend: BlendMode::Alpha,
                color_attachments: 1,
            },
            PipelineKind::NoDepthTest => StatePreset {
                depth_test: false,
                depth_write: false,
                depth_compare: vk::CompareOp::ALWAYS,
                cull_mode: vk::CullModeFlags::NONE,
                polygon_mode: vk::PolygonMode::FILL,
                blend: BlendMode::Alpha,
                color_attachments: 1,
            },
            PipelineKind::Mrt => StatePreset {
                depth_test: true,
                depth_write: true,
                depth_compare: vk::CompareOp::LESS_OR_EQUAL,
                cull_mode: vk::CullModeFlags::BACK,
                polygon_mode: vk::PolygonMode::FILL,
                blend: BlendMode::Opaque,
                color_attachments: target_color_attachments.max(1),
            },
            PipelineKind::MultiTexture => StatePreset {
                depth_test: false,
                depth_write: false,
                depth_compare: vk::CompareOp::ALWAYS,
                cull_mode: vk::CullModeFlags::BACK,
                polygon_mode: vk::PolygonMode::FILL,
                blend: BlendMode::Opaque,
                color_attachments: 1,
            },
        }
    }
}

impl StatePreset {
    /// Blend state is emitted per attachment, so the counts must agree with
    /// the subpass the pipeline is compiled against.
    pub fn check_target(&self, target_color_attachments: u32) -> Result<()> {
        if self.color_attachments != target_color_attachments {
            anyhow::bail!(
                "Preset writes {} colour attachment(s) but the target has {}",
                self.color_attachments,
                target_color_attachments
            );
        }
        Ok(())
    }

    pub fn rasterization_state(&self) -> vk::PipelineRasterizationStateCreateInfo {
        vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .build()
    }

    pub fn depth_stencil_state(&self) -> vk::PipelineDepthStencilStateCreateInfo {
        vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .build()
    }

    /// One blend attachment state per colour attachment.
    pub fn blend_attachments(&self) -> Vec<vk::PipelineColorBlendAttachmentState> {
        let attachment = match self.blend {
            BlendMode::Opaque => vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build(),
            BlendMode::Alpha => vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build(),
        };

        vec![attachment; self.color_attachments as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_is_depth_tested_and_culled() {
        let preset = PipelineKind::Polygon.preset(1);

        assert!(preset.depth_test && preset.depth_write);
        assert_eq!(preset.depth_compare, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(preset.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(preset.blend, BlendMode::Alpha);
    }

    #[test]
    fn test_no_depth_test_disables_depth_and_culling() {
        let preset = PipelineKind::NoDepthTest.preset(4);

        assert!(!preset.depth_test && !preset.depth_write);
        assert_eq!(preset.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(preset.color_attachments, 1);
    }

    #[test]
    fn test_single_attachment_kinds_reject_mrt_target() {
        for kind in [PipelineKind::Polygon, PipelineKind::NoDepthTest, PipelineKind::MultiTexture] {
            let err = kind.preset(3).check_target(3).unwrap_err();
            assert!(err.to_string().contains("target has 3"));
            assert!(kind.preset(1).check_target(1).is_ok());
        }
        assert!(PipelineKind::Mrt.preset(3).check_target(3).is_ok());
    }

    #[test]
    fn test_mrt_follows_target_attachments() {
        let preset = PipelineKind::Mrt.preset(3);

        assert_eq!(preset.color_attachments, 3);
        assert_eq!(preset.blend_attachments().len(), 3);
        assert!(preset.blend_attachments().iter().all(|a| a.blend_enable == vk::FALSE));
    }

    #[test]
    fn test_multi_texture_is_opaque_without_depth() {
        let preset = PipelineKind::MultiTexture.preset(2);

        assert!(!preset.depth_test);
        assert_eq!(preset.blend, BlendMode::Opaque);
        assert_eq!(preset.color_attachments, 1);
    }

    #[test]
    fn test_alpha_blend_factors() {
        let attachments = PipelineKind::NoDepthTest.preset(1).blend_attachments();
        let blend = attachments[0];

        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blend.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    }

    #[test]
    fn test_rasterization_state_from_preset() {
        let raster = PipelineKind::Polygon.preset(1).rasterization_state();

        assert_eq!(raster.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(raster.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(raster.line_width, 1.0);
    }
}
