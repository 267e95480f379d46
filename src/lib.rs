// Vulkan pipelines, dirty-tracked uniform buffers and distance-field text
//
// `backend` wraps the device, buffers, descriptors and pipelines.
// `uniforms` keeps host copies of shader uniform blocks in sync with GPU
// buffers. `text` lays strings out into glyph quads, and `renderer` draws
// them through a NoDepthTest pipeline.

pub mod backend;
pub mod config;
pub mod logging;
pub mod renderer;
pub mod text;
pub mod uniforms;

pub use config::Config;
pub use renderer::FontsRenderer;
