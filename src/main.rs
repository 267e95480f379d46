// =============================================================================
// GLYPH PIPELINE - Headless text rendering demo
// =============================================================================
//
// Renders laid-out text into an offscreen colour target:
//
// FRAME FLOW:
// 1. Update text objects (pending relayouts, border/glow drivers)
// 2. Prepare the fonts renderer (uniform pushes, descriptor writes, meshes)
// 3. Record the render pass with one draw per text
// 4. Submit and move to the next frame slot
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use glam::{Vec2, Vec4};
use glyph_pipeline::backend::{
    image, render_pass, AttachmentLayout, FrameSync, GpuImage, RenderTarget, ShaderProgram, ShaderStage,
    VulkanDevice,
};
use glyph_pipeline::logging::init_logging;
use glyph_pipeline::renderer::object_block;
use glyph_pipeline::text::{Driver, DriverKind, FontMetrics, TextObject};
use glyph_pipeline::{Config, FontsRenderer};
use std::sync::Arc;
use std::time::Instant;

const TARGET_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const FRAMES_TO_RENDER: usize = 4;

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config.debug);
    log::info!("Starting glyph pipeline");
    log::info!(
        "Target: {}x{}, {} frames in flight",
        config.pipeline.target_width,
        config.pipeline.target_height,
        config.pipeline.max_frames_in_flight
    );

    let mut app = App::new(config)?;
    app.run()?;
    Ok(())
}

/// Offscreen renderer state.
///
/// Raw handles are destroyed in `Drop`; owned wrappers after that, in field
/// order, with the device last.
struct App {
    config: Config,
    texts: Vec<TextObject>,
    renderer: FontsRenderer,
    frames: Vec<FrameSync>,
    current_frame: usize,

    framebuffer: vk::Framebuffer,
    render_pass: vk::RenderPass,
    sampler: vk::Sampler,
    target: GpuImage,
    atlas: GpuImage,
    atlas_ready: bool,

    device: Arc<VulkanDevice>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let font = Arc::new(load_font(&config)?);

        let mut title = TextObject::new(
            config.text.sample.clone(),
            Arc::clone(&font),
            config.text.font_size,
            config.text.max_line_width,
            config.text.align,
        )
        .with_tracking(config.text.tracking);
        title.set_position(Vec2::new(16.0, 16.0));
        title.set_text_colour(Vec4::new(1.0, 1.0, 1.0, 1.0));
        title.set_border(Driver::new(DriverKind::Sinwave { min: 0.05, max: 0.15 }, 2.0));

        let mut status = TextObject::new("loading", font, config.text.font_size * 0.5, config.text.max_line_width, config.text.align);
        status.set_position(Vec2::new(16.0, config.pipeline.target_height as f32 - 48.0));
        status.set_glowing(Driver::new(DriverKind::Fade { start: 0.2, end: 0.8, peak: 0.3 }, 1.0));

        log::info!(
            "Laid out sample text: {} lines, bounds {:?}",
            title.number_of_lines(),
            title.bounding()
        );

        let device = VulkanDevice::new(&config.device.app_name, config.device.validation_layers)?;

        let extent = vk::Extent2D {
            width: config.pipeline.target_width,
            height: config.pipeline.target_height,
        };
        let target = GpuImage::new(
            &device,
            extent,
            TARGET_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            "text target",
        )?;
        // Solid atlas until glyph images are uploaded; every quad samples opaque.
        let atlas = GpuImage::new(
            &device,
            vk::Extent2D { width: 1, height: 1 },
            TARGET_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            "font atlas",
        )?;
        let sampler = image::create_sampler(&device)?;

        let layout = AttachmentLayout::offscreen(TARGET_FORMAT, None);
        let render_pass = render_pass::create_render_pass(&device, &layout)?;
        let framebuffer = image::create_framebuffer(&device, render_pass, &[target.view()], extent)?;

        let program = ShaderProgram::new()
            .with_stage(ShaderStage::load(vk::ShaderStageFlags::VERTEX, &config.shaders.font_vertex)?)
            .with_stage(ShaderStage::load(vk::ShaderStageFlags::FRAGMENT, &config.shaders.font_fragment)?)
            .with_uniform_block(object_block());

        let target_info = RenderTarget::new(render_pass, &layout);
        let mut renderer = FontsRenderer::new(
            &device,
            &target_info,
            program,
            config.pipeline.max_texts,
            config.pipeline.max_frames_in_flight,
        )?;
        renderer.set_atlas(atlas.view(), sampler);

        let frames = (0..config.pipeline.max_frames_in_flight)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            texts: vec![title, status],
            renderer,
            frames,
            current_frame: 0,
            framebuffer,
            render_pass,
            sampler,
            target,
            atlas,
            atlas_ready: false,
            device,
        })
    }

    fn run(&mut self) -> Result<()> {
        let mut last_frame = Instant::now();

        for frame in 0..FRAMES_TO_RENDER {
            let now = Instant::now();
            let delta = (now - last_frame).as_secs_f32();
            last_frame = now;

            if frame == 1 {
                self.texts[1].set_text(format!("rendered {} frames", frame));
            }
            self.render_frame(delta)
                .with_context(|| format!("Failed to render frame {}", frame))?;
        }

        self.device.wait_idle()?;
        log::info!("Rendered {} frames of {} texts", FRAMES_TO_RENDER, self.renderer.text_count());
        Ok(())
    }

    fn render_frame(&mut self, delta: f32) -> Result<()> {
        for text in &mut self.texts {
            text.update(delta);
        }

        // Text uniforms and meshes are shared by all frame slots.
        for frame in &self.frames {
            frame.wait()?;
        }
        let sync = &self.frames[self.current_frame];
        let cmd = sync.begin()?;

        let texts: Vec<&TextObject> = self.texts.iter().collect();
        self.renderer.prepare(&texts)?;

        if !self.atlas_ready {
            self.atlas.cmd_clear(cmd, [1.0; 4], vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            self.atlas_ready = true;
        }

        let extent = self.target.extent();
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.config.pipeline.clear_color,
            },
        }];
        let pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.device.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);
        }
        self.renderer.record(cmd, extent, &texts);
        unsafe {
            self.device.device.cmd_end_render_pass(cmd);
        }

        sync.submit()?;
        self.current_frame = (self.current_frame + 1) % self.frames.len();
        Ok(())
    }
}

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up...");
        let _ = self.device.wait_idle();

        self.renderer.cleanup();
        unsafe {
            self.device.device.destroy_framebuffer(self.framebuffer, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
            self.device.device.destroy_sampler(self.sampler, None);
        }
    }
}

fn load_font(config: &Config) -> Result<FontMetrics> {
    match &config.text.font_file {
        Some(path) => FontMetrics::load_fnt(path),
        None => {
            log::info!("No font file configured, using the built-in ASCII grid");
            Ok(FontMetrics::ascii_grid())
        }
    }
}
