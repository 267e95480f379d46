// Fonts renderer
//
// Draws `TextObject`s with one NoDepthTest pipeline. Every text gets its own
// descriptor set and uniform handler; meshes are uploaded again only when a
// text's layout revision moves. Callers must have waited for the previous
// frame's fence before `prepare`, since buffers are rewritten in place.

use anyhow::{Context, Result};
use ash::vk;
use glam::{Vec2, Vec4};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use crate::backend::{
    BufferKind, DescriptorBinding, DescriptorWrite, GpuBuffer, GpuMesh, HostBuffer, Pipeline, PipelineKind,
    PoolSizing, RenderTarget, ShaderProgram, VertexInput, VulkanDevice,
};
use crate::text::{TextId, TextObject};
use crate::uniforms::{BufferHandler, UniformBlock};

/// Name of the per-text uniform block in the font shaders.
pub const OBJECT_BLOCK: &str = "UboObject";

const UNIFORM_BINDING: u32 = 0;
const ATLAS_BINDING: u32 = 1;

/// Layout of `UboObject` as declared by `shaders/font.vert` and `font.frag`.
pub fn object_block() -> UniformBlock {
    UniformBlock::new(OBJECT_BLOCK, UNIFORM_BINDING, vk::ShaderStageFlags::ALL)
        .with_uniform("transform", 0, 16)
        .with_uniform("colour", 16, 16)
        .with_uniform("borderColour", 32, 16)
        .with_uniform("borderSizes", 48, 8)
        .with_uniform("edgeData", 56, 8)
}

/// Write a text's draw parameters into its uniform handler.
pub fn push_object_uniforms<B: HostBuffer>(uniforms: &mut BufferHandler<B>, text: &TextObject) {
    let position = text.position();
    let size = text.font_size();

    uniforms.push("transform", &Vec4::new(position.x, position.y, size, size), 0);
    uniforms.push("colour", &text.text_colour(), 0);
    uniforms.push("borderColour", &text.border_colour(), 0);
    uniforms.push("borderSizes", &Vec2::new(text.total_border_size(), text.glow_size()), 0);
    uniforms.push("edgeData", &Vec2::new(text.edge_start(), text.antialias_size()), 0);
}

struct TextDrawData {
    set: vk::DescriptorSet,
    uniforms: BufferHandler<GpuBuffer>,
    mesh: Option<GpuMesh>,
    revision: u64,
    atlas_written: bool,
}

pub struct FontsRenderer {
    device: Arc<VulkanDevice>,
    pipeline: Pipeline,
    block: UniformBlock,
    atlas: Option<vk::DescriptorImageInfo>,
    entries: HashMap<TextId, TextDrawData>,
    max_texts: usize,
}

impl FontsRenderer {
    /// Build the fonts pipeline. `program` must declare the `UboObject` block.
    pub fn new(
        device: &Arc<VulkanDevice>,
        target: &RenderTarget,
        program: ShaderProgram,
        max_texts: u32,
        frames_in_flight: u32,
    ) -> Result<Self> {
        let block = program
            .uniform_block(OBJECT_BLOCK)
            .cloned()
            .with_context(|| format!("Font shaders do not declare '{}'", OBJECT_BLOCK))?;

        let descriptors = vec![
            DescriptorBinding::uniform_buffer(UNIFORM_BINDING, block.stage_flags()),
            DescriptorBinding::combined_image_sampler(ATLAS_BINDING, vk::ShaderStageFlags::FRAGMENT),
        ];

        // One extra set for the pipeline's own primary set.
        let sizing = PoolSizing {
            sets_per_frame: max_texts + 1,
            frames_in_flight,
        };

        let mut pipeline = Pipeline::new("fonts", PipelineKind::NoDepthTest, program, descriptors)
            .with_pool_sizing(sizing)
            .with_push_constants(vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: std::mem::size_of::<Vec2>() as u32,
            });
        let vertex_input = VertexInput::interleaved(&[vk::Format::R32G32_SFLOAT, vk::Format::R32G32_SFLOAT])?;
        pipeline.create(device, target, vertex_input)?;

        Ok(Self {
            device: Arc::clone(device),
            pipeline,
            block,
            atlas: None,
            entries: HashMap::new(),
            max_texts: max_texts as usize,
        })
    }

    /// Point every text at a new glyph atlas.
    pub fn set_atlas(&mut self, view: vk::ImageView, sampler: vk::Sampler) {
        self.atlas = Some(vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });
        for entry in self.entries.values_mut() {
            entry.atlas_written = false;
        }
    }

    /// Sync GPU state with `texts`: uniforms, descriptors and meshes.
    /// Texts not in the list lose their GPU resources.
    pub fn prepare(&mut self, texts: &[&TextObject]) -> Result<()> {
        let live: HashSet<TextId> = texts.iter().map(|t| t.id()).collect();
        let pipeline = &self.pipeline;
        let mut freed = Vec::new();
        self.entries.retain(|id, entry| {
            let keep = live.contains(id);
            if !keep {
                freed.push(entry.set);
            }
            keep
        });
        for set in freed {
            pipeline.free_descriptor_set(set)?;
        }

        for text in texts {
            let available = self.max_texts.saturating_sub(self.entries.len());
            let entry = match self.entries.entry(text.id()) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => {
                    if available == 0 {
                        anyhow::bail!("Fonts renderer is limited to {} texts", self.max_texts);
                    }
                    let set = self.pipeline.allocate_descriptor_set()?;
                    log::debug!("Allocated draw data for text {:?}", text.id());
                    vacant.insert(TextDrawData {
                        set,
                        uniforms: BufferHandler::with_block(BufferKind::Uniform, self.block.clone()),
                        mesh: None,
                        revision: 0,
                        atlas_written: false,
                    })
                }
            };

            let rebuilt = entry.uniforms.update(&self.device, Some(&self.block))?;
            push_object_uniforms(&mut entry.uniforms, text);

            if rebuilt || !entry.atlas_written {
                let mut writes = Vec::with_capacity(2);
                if let Some(buffer) = entry.uniforms.buffer() {
                    writes.push(DescriptorWrite::Buffer {
                        binding: UNIFORM_BINDING,
                        descriptor_type: BufferKind::Uniform.descriptor_type(),
                        info: buffer.descriptor_info(),
                    });
                }
                if let Some(info) = self.atlas {
                    writes.push(DescriptorWrite::Image {
                        binding: ATLAS_BINDING,
                        info,
                    });
                    entry.atlas_written = true;
                }
                self.pipeline.write_descriptors(entry.set, &writes);
            }

            if entry.revision != text.mesh_revision() {
                let mesh = text.mesh();
                entry.mesh = if mesh.is_empty() {
                    None
                } else {
                    Some(GpuMesh::upload(&self.device, mesh.vertices())?)
                };
                entry.revision = text.mesh_revision();
                log::trace!("Uploaded {} glyphs for text {:?}", mesh.glyph_count(), text.id());
            }
        }

        Ok(())
    }

    /// Record draws for `texts` inside an active render pass.
    pub fn record(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D, texts: &[&TextObject]) {
        if self.atlas.is_none() {
            log::trace!("No font atlas bound, skipping text draw");
            return;
        }

        self.pipeline.bind(cmd);
        self.pipeline.set_extent(cmd, extent);

        let screen_size = Vec2::new(extent.width as f32, extent.height as f32);
        self.pipeline.push_constants(cmd, vk::ShaderStageFlags::VERTEX, 0, bytemuck::bytes_of(&screen_size));

        for text in texts {
            let Some(entry) = self.entries.get(&text.id()) else {
                continue;
            };
            let Some(mesh) = &entry.mesh else {
                continue;
            };
            self.pipeline.bind_descriptor_set(cmd, entry.set);
            mesh.cmd_render(&self.device.device, cmd);
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn text_count(&self) -> usize {
        self.entries.len()
    }

    /// Release all text resources and the pipeline.
    pub fn cleanup(&mut self) {
        // Sets go away with the pool.
        self.entries.clear();
        self.pipeline.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HostAllocator, HostMemory};
    use crate::text::{Driver, FontMetrics, TextAlign};

    fn text() -> TextObject {
        let mut text = TextObject::new("ab", Arc::new(FontMetrics::ascii_grid()), 2.0, 4.0, TextAlign::Left);
        text.set_position(Vec2::new(10.0, 20.0));
        text.set_text_colour(Vec4::new(1.0, 0.5, 0.25, 1.0));
        text
    }

    fn handler() -> BufferHandler<HostMemory> {
        let block = object_block();
        let mut handler = BufferHandler::with_block(BufferKind::Uniform, block.clone());
        handler.update(&HostAllocator, Some(&block)).unwrap();
        handler
    }

    fn floats(handler: &BufferHandler<HostMemory>) -> Vec<f32> {
        handler
            .buffer()
            .unwrap()
            .bytes()
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes(chunk.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_object_block_layout() {
        let block = object_block();
        assert_eq!(block.size(), 64);
        assert_eq!(block.uniform("edgeData").map(|u| u.offset), Some(56));
    }

    #[test]
    fn test_push_writes_transform_and_colour() {
        let mut uniforms = handler();
        push_object_uniforms(&mut uniforms, &text());

        let values = floats(&uniforms);
        assert_eq!(&values[0..4], &[10.0, 20.0, 2.0, 2.0]);
        assert_eq!(&values[4..8], &[1.0, 0.5, 0.25, 1.0]);
    }

    #[test]
    fn test_push_writes_border_sizes() {
        let mut text = text();
        text.set_glowing(Driver::constant(0.3));

        let mut uniforms = handler();
        push_object_uniforms(&mut uniforms, &text);

        let values = floats(&uniforms);
        assert_eq!(values[12], text.total_border_size());
        assert_eq!(values[13], 0.3);
        assert_eq!(values[14], text.edge_start());
        assert_eq!(values[15], text.antialias_size());
    }

    #[test]
    fn test_repeated_push_is_unchanged() {
        let text = text();
        let mut uniforms = handler();
        push_object_uniforms(&mut uniforms, &text);
        uniforms.update(&HostAllocator, Some(&object_block())).unwrap();

        push_object_uniforms(&mut uniforms, &text);
        assert_eq!(uniforms.status(), crate::uniforms::BufferStatus::Unchanged);
    }
}
