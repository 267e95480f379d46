// Uniform binding: reflected block layouts and the dirty-tracked handlers
// that write into them.

pub mod block;
pub mod handler;

pub use block::{Uniform, UniformBlock};
pub use handler::{BufferHandler, BufferStatus};
