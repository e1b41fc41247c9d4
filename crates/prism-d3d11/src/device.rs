//! The device contract the linker allocates resources through.
//!
//! The descriptor structs mirror the D3D11 layouts (the sampler descriptor
//! byte-for-byte, since its raw bytes are hashed); the trait itself is
//! implemented by the runtime over its real device. Keeping it a trait also
//! makes every linker path exercisable with the recording device in
//! [`crate::test_utils`].

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use prism_ir::TextureFormat;

/// Windows-style result code; negative values are failures. Rendered in
/// hexadecimal in the error log.
pub type HResult = i32;

pub fn failed(hr: HResult) -> bool {
    hr < 0
}

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

handle_type!(TextureHandle);
handle_type!(SrvHandle);
handle_type!(RtvHandle);
handle_type!(SamplerStateHandle);
handle_type!(BufferHandle);
handle_type!(ShaderHandle);
handle_type!(DepthStencilStateHandle);
handle_type!(BlendStateHandle);
handle_type!(QueryHandle);

/// DXGI formats the effect system touches. Color formats map to their
/// typeless family so linear and sRGB views can share one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DxgiFormat {
    #[default]
    Unknown,
    R8Unorm,
    R16Float,
    R32Float,
    Rg8Unorm,
    Rg16Unorm,
    Rg16Float,
    Rg32Float,
    Rgba8Typeless,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Unorm,
    Rgba16Float,
    Rgba32Float,
    Bc1Typeless,
    Bc1Unorm,
    Bc1UnormSrgb,
    Bc2Typeless,
    Bc2Unorm,
    Bc2UnormSrgb,
    Bc3Typeless,
    Bc3Unorm,
    Bc3UnormSrgb,
    Bc4Unorm,
    Bc5Unorm,
}

pub fn format_from_texture(format: TextureFormat) -> DxgiFormat {
    match format {
        TextureFormat::R8 => DxgiFormat::R8Unorm,
        TextureFormat::R16F => DxgiFormat::R16Float,
        TextureFormat::R32F => DxgiFormat::R32Float,
        TextureFormat::Rg8 => DxgiFormat::Rg8Unorm,
        TextureFormat::Rg16 => DxgiFormat::Rg16Unorm,
        TextureFormat::Rg16F => DxgiFormat::Rg16Float,
        TextureFormat::Rg32F => DxgiFormat::Rg32Float,
        TextureFormat::Rgba8 => DxgiFormat::Rgba8Typeless,
        TextureFormat::Rgba16 => DxgiFormat::Rgba16Unorm,
        TextureFormat::Rgba16F => DxgiFormat::Rgba16Float,
        TextureFormat::Rgba32F => DxgiFormat::Rgba32Float,
        TextureFormat::Dxt1 => DxgiFormat::Bc1Typeless,
        TextureFormat::Dxt3 => DxgiFormat::Bc2Typeless,
        TextureFormat::Dxt5 => DxgiFormat::Bc3Typeless,
        TextureFormat::Latc1 => DxgiFormat::Bc4Unorm,
        TextureFormat::Latc2 => DxgiFormat::Bc5Unorm,
        TextureFormat::Unknown => DxgiFormat::Unknown,
    }
}

/// sRGB view format for a resource format, or the format itself when no
/// sRGB variant exists.
pub fn make_format_srgb(format: DxgiFormat) -> DxgiFormat {
    match format {
        DxgiFormat::Rgba8Typeless | DxgiFormat::Rgba8Unorm => DxgiFormat::Rgba8UnormSrgb,
        DxgiFormat::Bc1Typeless | DxgiFormat::Bc1Unorm => DxgiFormat::Bc1UnormSrgb,
        DxgiFormat::Bc2Typeless | DxgiFormat::Bc2Unorm => DxgiFormat::Bc2UnormSrgb,
        DxgiFormat::Bc3Typeless | DxgiFormat::Bc3Unorm => DxgiFormat::Bc3UnormSrgb,
        other => other,
    }
}

pub fn make_format_normal(format: DxgiFormat) -> DxgiFormat {
    match format {
        DxgiFormat::Rgba8Typeless | DxgiFormat::Rgba8UnormSrgb => DxgiFormat::Rgba8Unorm,
        DxgiFormat::Bc1Typeless | DxgiFormat::Bc1UnormSrgb => DxgiFormat::Bc1Unorm,
        DxgiFormat::Bc2Typeless | DxgiFormat::Bc2UnormSrgb => DxgiFormat::Bc2Unorm,
        DxgiFormat::Bc3Typeless | DxgiFormat::Bc3UnormSrgb => DxgiFormat::Bc3Unorm,
        other => other,
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BindFlags: u32 {
        const VERTEX_BUFFER   = 0x1;
        const INDEX_BUFFER    = 0x2;
        const CONSTANT_BUFFER = 0x4;
        const SHADER_RESOURCE = 0x8;
        const RENDER_TARGET   = 0x20;
        const DEPTH_STENCIL   = 0x40;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MiscFlags: u32 {
        const GENERATE_MIPS = 0x1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuAccessFlags: u32 {
        const WRITE = 0x10000;
        const READ  = 0x20000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Usage {
    #[default]
    Default,
    Immutable,
    Dynamic,
    Staging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture2dDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_size: u32,
    pub format: DxgiFormat,
    pub sample_count: u32,
    pub usage: Usage,
    pub bind_flags: BindFlags,
    pub misc_flags: MiscFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrvDesc {
    pub format: DxgiFormat,
    pub mip_levels: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtvDesc {
    pub format: DxgiFormat,
    pub multisampled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferDesc {
    pub byte_width: u32,
    pub usage: Usage,
    pub bind_flags: BindFlags,
    pub cpu_access_flags: CpuAccessFlags,
}

/// Raw D3D11_SAMPLER_DESC layout. The linker hashes these 52 bytes with
/// FNV-1a to intern sampler states, so field order and width must not
/// change.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SamplerStateDesc {
    pub filter: u32,
    pub address_u: u32,
    pub address_v: u32,
    pub address_w: u32,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison_func: u32,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

/// D3D11_COMPARISON_NEVER.
pub const COMPARISON_NEVER: u32 = 1;
/// D3D11_COMPARISON_ALWAYS.
pub const COMPARISON_ALWAYS: u32 = 8;

/// D3D11_BLEND values, translated from the effect-syntax literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Blend {
    Zero = 1,
    One = 2,
    SrcColor = 3,
    InvSrcColor = 4,
    SrcAlpha = 5,
    InvSrcAlpha = 6,
    DestAlpha = 7,
    InvDestAlpha = 8,
    DestColor = 9,
    InvDestColor = 10,
}

pub fn blend_from_literal(value: u32) -> Blend {
    match value {
        0 => Blend::Zero,
        2 => Blend::SrcColor,
        4 => Blend::InvSrcColor,
        3 => Blend::SrcAlpha,
        5 => Blend::InvSrcAlpha,
        6 => Blend::DestAlpha,
        7 => Blend::InvDestAlpha,
        8 => Blend::DestColor,
        9 => Blend::InvDestColor,
        _ => Blend::One,
    }
}

/// D3D11_STENCIL_OP values, translated from the effect-syntax literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StencilOp {
    Keep = 1,
    Zero = 2,
    Replace = 3,
    IncrSat = 4,
    DecrSat = 5,
    Invert = 6,
    Incr = 7,
    Decr = 8,
}

pub fn stencil_op_from_literal(value: u32) -> StencilOp {
    match value {
        0 => StencilOp::Zero,
        3 => StencilOp::Replace,
        4 => StencilOp::IncrSat,
        5 => StencilOp::DecrSat,
        6 => StencilOp::Invert,
        7 => StencilOp::Incr,
        8 => StencilOp::Decr,
        _ => StencilOp::Keep,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilStateDesc {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_func: u32,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_func: u32,
    pub stencil_pass_op: StencilOp,
    pub stencil_fail_op: StencilOp,
    pub stencil_depth_fail_op: StencilOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendStateDesc {
    pub blend_enable: bool,
    pub src_blend: Blend,
    pub dest_blend: Blend,
    pub blend_op: u32,
    pub src_blend_alpha: Blend,
    pub dest_blend_alpha: Blend,
    pub blend_op_alpha: u32,
    pub render_target_write_mask: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Timestamp,
    TimestampDisjoint,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            min_depth: 0.0,
            max_depth: 0.0,
        }
    }
}

/// Resource-creation surface of the runtime's device.
///
/// The runtime guarantees single-threaded access for the duration of one
/// link call.
pub trait Device {
    fn create_texture2d(&mut self, desc: &Texture2dDesc) -> Result<TextureHandle, HResult>;
    fn create_shader_resource_view(
        &mut self,
        texture: TextureHandle,
        desc: &SrvDesc,
    ) -> Result<SrvHandle, HResult>;
    fn create_render_target_view(
        &mut self,
        texture: TextureHandle,
        desc: &RtvDesc,
    ) -> Result<RtvHandle, HResult>;
    fn create_sampler_state(&mut self, desc: &SamplerStateDesc)
        -> Result<SamplerStateHandle, HResult>;
    fn create_buffer(
        &mut self,
        desc: &BufferDesc,
        initial_data: &[u8],
    ) -> Result<BufferHandle, HResult>;
    fn create_vertex_shader(&mut self, bytecode: &[u8]) -> Result<ShaderHandle, HResult>;
    fn create_pixel_shader(&mut self, bytecode: &[u8]) -> Result<ShaderHandle, HResult>;
    fn create_depth_stencil_state(
        &mut self,
        desc: &DepthStencilStateDesc,
    ) -> Result<DepthStencilStateHandle, HResult>;
    fn create_blend_state(&mut self, desc: &BlendStateDesc) -> Result<BlendStateHandle, HResult>;
    fn create_query(&mut self, kind: QueryKind) -> Result<QueryHandle, HResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_desc_is_exactly_52_bytes() {
        assert_eq!(std::mem::size_of::<SamplerStateDesc>(), 52);
    }

    #[test]
    fn srgb_formats_round_trip() {
        assert_eq!(
            make_format_srgb(DxgiFormat::Rgba8Typeless),
            DxgiFormat::Rgba8UnormSrgb
        );
        assert_eq!(
            make_format_normal(DxgiFormat::Rgba8UnormSrgb),
            DxgiFormat::Rgba8Unorm
        );
        // No sRGB variant: both directions are the identity.
        assert_eq!(make_format_srgb(DxgiFormat::R32Float), DxgiFormat::R32Float);
        assert_eq!(make_format_normal(DxgiFormat::R32Float), DxgiFormat::R32Float);
    }

    #[test]
    fn literal_translations_default_sensibly() {
        assert_eq!(blend_from_literal(1), Blend::One);
        assert_eq!(blend_from_literal(999), Blend::One);
        assert_eq!(stencil_op_from_literal(1), StencilOp::Keep);
        assert_eq!(stencil_op_from_literal(999), StencilOp::Keep);
    }
}
