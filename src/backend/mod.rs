// Vulkan backend: device, buffers, shaders, descriptors and pipelines

pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod presets;
pub mod render_pass;
pub mod shader;
pub mod sync;

pub use buffer::{BufferAllocator, BufferKind, GpuBuffer, GpuMesh, HostAllocator, HostBuffer, HostMemory};
pub use descriptor::{DescriptorBinding, DescriptorWrite, PoolSizing, MAX_FRAMES_IN_FLIGHT};
pub use device::VulkanDevice;
pub use image::GpuImage;
pub use pipeline::{Pipeline, VertexInput};
pub use presets::{PipelineKind, StatePreset};
pub use render_pass::{AttachmentLayout, RenderTarget};
pub use shader::{ShaderProgram, ShaderStage};
pub use sync::FrameSync;
