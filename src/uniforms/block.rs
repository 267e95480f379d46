// Uniform block reflection
//
// A uniform block is the host-side view of a shader's `uniform`/`buffer`
// block: its binding, total byte size and the offset/size of every member.
// These tables come from the shader reflector and are consumed read-only.

use ash::vk;

/// One member of a uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uniform {
    pub name: String,
    pub offset: usize,
    pub size: usize,
}

/// A named block of uniforms bound at one descriptor binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlock {
    name: String,
    binding: u32,
    size: usize,
    stage_flags: vk::ShaderStageFlags,
    uniforms: Vec<Uniform>,
}

impl UniformBlock {
    pub fn new(name: impl Into<String>, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        Self {
            name: name.into(),
            binding,
            size: 0,
            stage_flags,
            uniforms: Vec::new(),
        }
    }

    /// Adds a member. The block grows to cover it if needed.
    pub fn with_uniform(mut self, name: impl Into<String>, offset: usize, size: usize) -> Self {
        self.size = self.size.max(offset + size);
        self.uniforms.push(Uniform {
            name: name.into(),
            offset,
            size,
        });
        self
    }

    /// Overrides the block size (std140 tail padding).
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = self.size.max(size);
        self
    }

    /// Looks up a member by name.
    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        self.stage_flags
    }

    pub fn uniforms(&self) -> &[Uniform] {
        &self.uniforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_block() -> UniformBlock {
        UniformBlock::new("UboObject", 0, vk::ShaderStageFlags::ALL)
            .with_uniform("transform", 0, 16)
            .with_uniform("colour", 16, 16)
            .with_uniform("borderSizes", 32, 8)
    }

    #[test]
    fn test_lookup_returns_offset_and_size() {
        let block = object_block();
        let colour = block.uniform("colour").unwrap();

        assert_eq!(colour.offset, 16);
        assert_eq!(colour.size, 16);
    }

    #[test]
    fn test_lookup_missing_member() {
        assert!(object_block().uniform("edgeData").is_none());
    }

    #[test]
    fn test_size_covers_members_and_padding() {
        let block = object_block();
        assert_eq!(block.size(), 40);

        let padded = block.with_size(48);
        assert_eq!(padded.size(), 48);
    }
}
