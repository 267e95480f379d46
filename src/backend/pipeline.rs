// Graphics pipeline creation and management
//
// A `Pipeline` is built from configuration only, then compiled once against
// a device and render target. Compiling creates, in order: the descriptor
// set layout, the pipeline layout, the descriptor pool + primary set, and
// the graphics pipeline itself. `cleanup` releases all of it.
//
// Failures here are configuration mistakes (bad SPIR-V, exceeding device
// limits, undersized pools). They are returned as errors and callers are
// expected to abort rather than retry.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;
use std::sync::Arc;
use super::descriptor::{self, DescriptorBinding, DescriptorWrite, PoolSizing};
use super::presets::{PipelineKind, StatePreset};
use super::render_pass::RenderTarget;
use super::shader::{self, ShaderProgram};
use super::VulkanDevice;

const ENTRY_POINT: &CStr = c"main";

const DYNAMIC_STATES: [vk::DynamicState; 3] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::LINE_WIDTH,
];

/// Vertex buffer bindings and attributes.
#[derive(Debug, Clone, Default)]
pub struct VertexInput {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInput {
    /// One per-vertex binding with tightly packed attributes at locations 0..n.
    pub fn interleaved(formats: &[vk::Format]) -> Result<Self> {
        let mut attributes = Vec::with_capacity(formats.len());
        let mut offset = 0;

        for (location, &format) in formats.iter().enumerate() {
            attributes.push(
                vk::VertexInputAttributeDescription::builder()
                    .binding(0)
                    .location(location as u32)
                    .format(format)
                    .offset(offset)
                    .build(),
            );
            offset += format_size(format)
                .with_context(|| format!("Unsupported vertex attribute format {:?}", format))?;
        }

        let binding = vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(offset)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build();

        Ok(Self {
            bindings: vec![binding],
            attributes,
        })
    }
}

/// Byte size of the 32-bit float vertex formats.
fn format_size(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::R32_SFLOAT => Some(4),
        vk::Format::R32G32_SFLOAT => Some(8),
        vk::Format::R32G32B32_SFLOAT => Some(12),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        vk::Format::R8G8B8A8_UNORM => Some(4),
        _ => None,
    }
}

/// Check a pipeline configuration against the device's limits.
pub fn validate_limits(
    program: &ShaderProgram,
    descriptors: &[DescriptorBinding],
    vertex_input: &VertexInput,
    push_constants: &[vk::PushConstantRange],
    color_attachments: u32,
    limits: &vk::PhysicalDeviceLimits,
) -> Result<()> {
    if program.stages.is_empty() {
        anyhow::bail!("Pipeline has no shader stages");
    }

    if color_attachments > limits.max_color_attachments {
        anyhow::bail!(
            "{} colour attachments exceed the device limit of {}",
            color_attachments,
            limits.max_color_attachments
        );
    }

    if vertex_input.bindings.len() as u32 > limits.max_vertex_input_bindings {
        anyhow::bail!(
            "{} vertex bindings exceed the device limit of {}",
            vertex_input.bindings.len(),
            limits.max_vertex_input_bindings
        );
    }

    if vertex_input.attributes.len() as u32 > limits.max_vertex_input_attributes {
        anyhow::bail!(
            "{} vertex attributes exceed the device limit of {}",
            vertex_input.attributes.len(),
            limits.max_vertex_input_attributes
        );
    }

    let mut seen = HashSet::new();
    for binding in descriptors {
        if !seen.insert(binding.binding) {
            anyhow::bail!("Descriptor binding {} declared twice", binding.binding);
        }
    }

    let count = |ty: vk::DescriptorType| descriptors.iter().filter(|d| d.descriptor_type == ty).count() as u32;
    let per_stage = [
        (vk::DescriptorType::UNIFORM_BUFFER, limits.max_per_stage_descriptor_uniform_buffers, "uniform buffers"),
        (vk::DescriptorType::STORAGE_BUFFER, limits.max_per_stage_descriptor_storage_buffers, "storage buffers"),
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, limits.max_per_stage_descriptor_samplers, "samplers"),
    ];
    for (ty, limit, label) in per_stage {
        let declared = count(ty);
        if declared > limit {
            anyhow::bail!("{} {} exceed the per-stage device limit of {}", declared, label, limit);
        }
    }

    for range in push_constants {
        if range.offset + range.size > limits.max_push_constants_size {
            anyhow::bail!(
                "Push constant range {}..{} exceeds the device limit of {} bytes",
                range.offset,
                range.offset + range.size,
                limits.max_push_constants_size
            );
        }
    }

    Ok(())
}

/// Vulkan objects owned by a created pipeline.
struct Compiled {
    device: Arc<VulkanDevice>,
    preset: StatePreset,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    pipeline: vk::Pipeline,
}

impl Compiled {
    fn empty(device: &Arc<VulkanDevice>, preset: StatePreset) -> Self {
        Self {
            device: Arc::clone(device),
            preset,
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pool: vk::DescriptorPool::null(),
            set: vk::DescriptorSet::null(),
            pipeline: vk::Pipeline::null(),
        }
    }

    /// Destroying null handles is a no-op, so partial builds clean up too.
    fn destroy(&self) {
        let device = &self.device.device;
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// A graphics pipeline with its descriptor layout, pool and primary set.
pub struct Pipeline {
    name: String,
    kind: PipelineKind,
    program: ShaderProgram,
    descriptors: Vec<DescriptorBinding>,
    push_constants: Vec<vk::PushConstantRange>,
    sizing: PoolSizing,
    vertex_input: VertexInput,
    compiled: Option<Compiled>,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        kind: PipelineKind,
        program: ShaderProgram,
        descriptors: Vec<DescriptorBinding>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            program,
            descriptors,
            push_constants: Vec::new(),
            sizing: PoolSizing::default(),
            vertex_input: VertexInput::default(),
            compiled: None,
        }
    }

    pub fn with_pool_sizing(mut self, sizing: PoolSizing) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn with_push_constants(mut self, range: vk::PushConstantRange) -> Self {
        self.push_constants.push(range);
        self
    }

    /// Compile the pipeline. Must be paired with exactly one `cleanup`.
    pub fn create(
        &mut self,
        device: &Arc<VulkanDevice>,
        target: &RenderTarget,
        vertex_input: VertexInput,
    ) -> Result<()> {
        if self.compiled.is_some() {
            anyhow::bail!("Pipeline '{}' is already created", self.name);
        }

        let preset = self.kind.preset(target.color_attachments);
        preset
            .check_target(target.color_attachments)
            .with_context(|| format!("Pipeline '{}' ({:?}) does not match its target", self.name, self.kind))?;
        validate_limits(
            &self.program,
            &self.descriptors,
            &vertex_input,
            &self.push_constants,
            preset.color_attachments,
            &device.properties.limits,
        )
        .with_context(|| format!("Pipeline '{}' does not fit the device", self.name))?;

        let mut compiled = Compiled::empty(device, preset);
        if let Err(e) = self.build(&mut compiled, target, &vertex_input) {
            compiled.destroy();
            return Err(e).with_context(|| format!("Failed to create pipeline '{}'", self.name));
        }

        log::info!(
            "Created pipeline '{}' ({:?}, {} stages, {} descriptors)",
            self.name,
            self.kind,
            self.program.stages.len(),
            self.descriptors.len()
        );

        self.vertex_input = vertex_input;
        self.compiled = Some(compiled);
        Ok(())
    }

    fn build(&self, compiled: &mut Compiled, target: &RenderTarget, vertex_input: &VertexInput) -> Result<()> {
        let device = &compiled.device.device;

        compiled.set_layout = descriptor::create_set_layout(device, &self.descriptors)?;

        let set_layouts = [compiled.set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&self.push_constants);
        compiled.pipeline_layout = unsafe {
            device.create_pipeline_layout(&layout_info, None)
                .context("Failed to create pipeline layout")?
        };

        compiled.pool = descriptor::create_pool(device, &self.descriptors, self.sizing)?;
        compiled.set = descriptor::allocate_set(device, compiled.pool, compiled.set_layout)?;

        compiled.pipeline = self.compile(compiled, target, vertex_input)?;
        Ok(())
    }

    fn compile(&self, compiled: &Compiled, target: &RenderTarget, vertex_input: &VertexInput) -> Result<vk::Pipeline> {
        let device = &compiled.device;
        let preset = &compiled.preset;

        let mut modules = Vec::with_capacity(self.program.stages.len());
        for stage in &self.program.stages {
            match shader::create_shader_module(device, stage) {
                Ok(module) => modules.push(module),
                Err(e) => {
                    destroy_modules(&device.device, &modules);
                    return Err(e);
                }
            }
        }

        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = self.program.stages
            .iter()
            .zip(&modules)
            .map(|(stage, &module)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.stage)
                    .module(module)
                    .name(ENTRY_POINT)
                    .build()
            })
            .collect();

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_input.bindings)
            .vertex_attribute_descriptions(&vertex_input.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic; only the counts are fixed here.
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = preset.rasterization_state();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(target.samples);

        let depth_stencil = preset.depth_stencil_state();

        let blend_attachments = preset.blend_attachments();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&DYNAMIC_STATES);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(compiled.pipeline_layout)
            .render_pass(target.render_pass)
            .subpass(target.subpass)
            .build();

        let pipelines = unsafe {
            device.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        };
        destroy_modules(&device.device, &modules);

        let pipelines = pipelines
            .map_err(|(_, e)| e)
            .context("Failed to create graphics pipeline")?;

        pipelines.into_iter().next().context("No graphics pipeline returned")
    }

    /// Release every Vulkan object created by `create`.
    pub fn cleanup(&mut self) {
        match self.compiled.take() {
            Some(compiled) => {
                compiled.destroy();
                log::debug!("Cleaned up pipeline '{}'", self.name);
            }
            None => log::warn!("Cleanup of pipeline '{}' that was never created", self.name),
        }
    }

    /// Record the pipeline bind and its primary descriptor set.
    pub fn bind(&self, cmd: vk::CommandBuffer) {
        if let Some(compiled) = &self.compiled {
            unsafe {
                compiled.device.device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, compiled.pipeline);
            }
            self.bind_descriptor_set(cmd, compiled.set);
        }
    }

    /// Record a descriptor set bind against this pipeline's layout.
    pub fn bind_descriptor_set(&self, cmd: vk::CommandBuffer, set: vk::DescriptorSet) {
        if let Some(compiled) = &self.compiled {
            unsafe {
                compiled.device.device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    compiled.pipeline_layout,
                    0,
                    &[set],
                    &[],
                );
            }
        }
    }

    /// Record a push constant update against this pipeline's layout.
    pub fn push_constants(&self, cmd: vk::CommandBuffer, stage_flags: vk::ShaderStageFlags, offset: u32, bytes: &[u8]) {
        if let Some(compiled) = &self.compiled {
            unsafe {
                compiled.device.device.cmd_push_constants(cmd, compiled.pipeline_layout, stage_flags, offset, bytes);
            }
        }
    }

    /// Record the dynamic viewport and scissor covering `extent`.
    pub fn set_extent(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        if let Some(compiled) = &self.compiled {
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            unsafe {
                compiled.device.device.cmd_set_viewport(cmd, 0, &[viewport]);
                compiled.device.device.cmd_set_scissor(cmd, 0, &[scissor]);
                compiled.device.device.cmd_set_line_width(cmd, 1.0);
            }
        }
    }

    /// Allocate another set from this pipeline's pool.
    pub fn allocate_descriptor_set(&self) -> Result<vk::DescriptorSet> {
        let compiled = self.compiled.as_ref()
            .with_context(|| format!("Pipeline '{}' is not created", self.name))?;
        descriptor::allocate_set(&compiled.device.device, compiled.pool, compiled.set_layout)
            .with_context(|| format!("Pipeline '{}'", self.name))
    }

    /// Return a set obtained from `allocate_descriptor_set` to the pool.
    pub fn free_descriptor_set(&self, set: vk::DescriptorSet) -> Result<()> {
        let Some(compiled) = &self.compiled else {
            return Ok(());
        };
        unsafe { compiled.device.device.free_descriptor_sets(compiled.pool, &[set]) }
            .with_context(|| format!("Failed to free descriptor set of pipeline '{}'", self.name))
    }

    pub fn write_descriptors(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        if let Some(compiled) = &self.compiled {
            descriptor::write_set(&compiled.device.device, set, writes);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn descriptors(&self) -> &[DescriptorBinding] {
        &self.descriptors
    }

    pub fn vertex_input(&self) -> &VertexInput {
        &self.vertex_input
    }

    pub fn is_created(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn preset(&self) -> Option<StatePreset> {
        self.compiled.as_ref().map(|c| c.preset)
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.compiled.as_ref().map_or(vk::Pipeline::null(), |c| c.pipeline)
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.compiled.as_ref().map_or(vk::PipelineLayout::null(), |c| c.pipeline_layout)
    }

    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.compiled.as_ref().map_or(vk::DescriptorPool::null(), |c| c.pool)
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.compiled.as_ref().map_or(vk::DescriptorSet::null(), |c| c.set)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.compiled.is_some() {
            log::warn!("Pipeline '{}' dropped without cleanup", self.name);
            self.cleanup();
        }
    }
}

fn destroy_modules(device: &ash::Device, modules: &[vk::ShaderModule]) {
    for &module in modules {
        unsafe { device.destroy_shader_module(module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::shader::ShaderStage;

    fn limits() -> vk::PhysicalDeviceLimits {
        vk::PhysicalDeviceLimits {
            max_color_attachments: 4,
            max_vertex_input_bindings: 2,
            max_vertex_input_attributes: 4,
            max_per_stage_descriptor_uniform_buffers: 2,
            max_per_stage_descriptor_storage_buffers: 1,
            max_per_stage_descriptor_samplers: 2,
            max_push_constants_size: 128,
            ..Default::default()
        }
    }

    fn program() -> ShaderProgram {
        let stage = ShaderStage {
            stage: vk::ShaderStageFlags::VERTEX,
            name: "font.vert".to_string(),
            code: vec![0x0723_0203],
        };
        ShaderProgram::new().with_stage(stage)
    }

    fn text_input() -> VertexInput {
        VertexInput::interleaved(&[vk::Format::R32G32_SFLOAT, vk::Format::R32G32_SFLOAT]).unwrap()
    }

    #[test]
    fn test_interleaved_offsets_and_stride() {
        let input = text_input();

        assert_eq!(input.bindings.len(), 1);
        assert_eq!(input.bindings[0].stride, 16);
        assert_eq!(input.attributes[0].offset, 0);
        assert_eq!(input.attributes[1].offset, 8);
        assert_eq!(input.attributes[1].location, 1);
    }

    #[test]
    fn test_interleaved_rejects_unknown_format() {
        assert!(VertexInput::interleaved(&[vk::Format::BC1_RGB_UNORM_BLOCK]).is_err());
    }

    #[test]
    fn test_valid_configuration_passes() {
        let descriptors = [
            DescriptorBinding::uniform_buffer(0, vk::ShaderStageFlags::ALL),
            DescriptorBinding::combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT),
        ];
        let result = validate_limits(&program(), &descriptors, &text_input(), &[], 1, &limits());
        assert!(result.is_ok());
    }

    #[test]
    fn test_rejects_missing_stages() {
        let result = validate_limits(&ShaderProgram::new(), &[], &text_input(), &[], 1, &limits());
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_too_many_color_attachments() {
        let err = validate_limits(&program(), &[], &text_input(), &[], 5, &limits()).unwrap_err();
        assert!(err.to_string().contains("colour attachments"));
    }

    #[test]
    fn test_rejects_too_many_attributes() {
        let formats = [vk::Format::R32_SFLOAT; 5];
        let input = VertexInput::interleaved(&formats).unwrap();
        assert!(validate_limits(&program(), &[], &input, &[], 1, &limits()).is_err());
    }

    #[test]
    fn test_rejects_duplicate_bindings() {
        let descriptors = [
            DescriptorBinding::uniform_buffer(0, vk::ShaderStageFlags::ALL),
            DescriptorBinding::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
        ];
        let err = validate_limits(&program(), &descriptors, &text_input(), &[], 1, &limits()).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_rejects_too_many_storage_buffers() {
        let descriptors = [
            DescriptorBinding::storage_buffer(0, vk::ShaderStageFlags::VERTEX),
            DescriptorBinding::storage_buffer(1, vk::ShaderStageFlags::VERTEX),
        ];
        let err = validate_limits(&program(), &descriptors, &text_input(), &[], 1, &limits()).unwrap_err();
        assert!(err.to_string().contains("storage buffers"));
    }

    #[test]
    fn test_rejects_oversized_push_constants() {
        let range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 64,
            size: 128,
        };
        assert!(validate_limits(&program(), &[], &text_input(), &[range], 1, &limits()).is_err());
    }

    #[test]
    fn test_uncreated_pipeline_exposes_null_handles() {
        let mut pipeline = Pipeline::new("fonts", PipelineKind::NoDepthTest, program(), Vec::new());

        assert!(!pipeline.is_created());
        assert_eq!(pipeline.pipeline(), vk::Pipeline::null());
        assert_eq!(pipeline.layout(), vk::PipelineLayout::null());
        assert!(pipeline.preset().is_none());
        assert!(pipeline.allocate_descriptor_set().is_err());

        // Cleanup without create is tolerated.
        pipeline.cleanup();
    }
}
