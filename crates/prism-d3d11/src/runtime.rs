//! Runtime-owned state the linker installs resources into.
//!
//! The runtime owns the uniform byte arena, the texture registry (shared
//! across every loaded effect, keyed by unique name), the sampler-state
//! cache and the constant-buffer list. The linker only appends; existing
//! entries are never mutated, so reloading one effect cannot disturb
//! another.

use prism_ir::TextureFormat;

use crate::device::{BufferHandle, RtvHandle, SamplerStateHandle, SrvHandle, TextureHandle};

/// What a registered texture is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureReference {
    /// A device texture owned by the registry entry.
    #[default]
    Owned,
    /// The runtime's backbuffer (textures declared with semantic `COLOR`).
    BackBuffer,
    /// The runtime's depth buffer (semantic `DEPTH`).
    DepthBuffer,
}

/// One entry of the texture registry.
///
/// `srv`/`rtv` hold the linear view at index 0 and the sRGB view at
/// index 1; formats without an sRGB variant share one view across both
/// slots. Render-target views are created lazily and cached here.
#[derive(Debug, Clone, Default)]
pub struct TextureEntry {
    pub unique_name: String,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub format: TextureFormat,
    pub reference: TextureReference,
    pub texture: Option<TextureHandle>,
    pub srv: [Option<SrvHandle>; 2],
    pub rtv: [Option<RtvHandle>; 2],
}

/// The runtime surface the linker runs against.
#[derive(Debug, Default)]
pub struct RuntimeEnv {
    pub frame_width: u32,
    pub frame_height: u32,
    /// Linear and sRGB render-target views of the backbuffer.
    pub backbuffer_rtv: [Option<RtvHandle>; 2],
    /// Linear and sRGB shader-resource views of the backbuffer.
    pub backbuffer_srv: [Option<SrvHandle>; 2],
    pub depth_srv: Option<SrvHandle>,
    /// Byte arena backing every effect's uniforms.
    pub uniform_storage: Vec<u8>,
    pub textures: Vec<TextureEntry>,
    /// Sampler states interned by descriptor hash.
    pub sampler_states: Vec<(u32, SamplerStateHandle)>,
    pub constant_buffers: Vec<BufferHandle>,
}

impl RuntimeEnv {
    pub fn find_texture(&self, unique_name: &str) -> Option<&TextureEntry> {
        self.textures
            .iter()
            .find(|entry| entry.unique_name == unique_name)
    }

    pub fn find_texture_mut(&mut self, unique_name: &str) -> Option<&mut TextureEntry> {
        self.textures
            .iter_mut()
            .find(|entry| entry.unique_name == unique_name)
    }

    pub fn find_sampler_state(&self, hash: u32) -> Option<SamplerStateHandle> {
        self.sampler_states
            .iter()
            .find(|(known, _)| *known == hash)
            .map(|(_, state)| *state)
    }
}

/// 32-bit FNV-1a over `bytes`. Collisions are benign: a colliding sampler
/// descriptor only allocates a redundant state object.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811c_9dc5u32;
    for &byte in bytes {
        hash = (hash ^ u32::from(byte)).wrapping_mul(16_777_619);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_reference_values() {
        // Well-known FNV-1a test vectors.
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn texture_registry_lookup_by_name() {
        let mut env = RuntimeEnv::default();
        env.textures.push(TextureEntry {
            unique_name: "V_tex".to_owned(),
            width: 4,
            height: 4,
            ..Default::default()
        });

        assert!(env.find_texture("V_tex").is_some());
        assert!(env.find_texture("missing").is_none());
    }
}
