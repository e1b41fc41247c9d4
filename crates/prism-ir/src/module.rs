use crate::{Constant, Id, Type};

/// Texel format of an effect texture.
///
/// The set matches what effect files can declare; the linker maps it onto
/// the device's format enumeration (and picks sRGB variants where they
/// exist).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFormat {
    #[default]
    Unknown,
    R8,
    R16F,
    R32F,
    Rg8,
    Rg16,
    Rg16F,
    Rg32F,
    Rgba8,
    Rgba16,
    Rgba16F,
    Rgba32F,
    Dxt1,
    Dxt3,
    Dxt5,
    Latc1,
    Latc2,
}

/// Sampler filtering mode. Discriminants are the D3D11 filter codes the
/// effect syntax exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum TextureFilter {
    MinMagMipPoint = 0x00,
    MinMagPointMipLinear = 0x01,
    MinPointMagLinearMipPoint = 0x04,
    MinPointMagMipLinear = 0x05,
    MinLinearMagMipPoint = 0x10,
    MinLinearMagPointMipLinear = 0x11,
    MinMagLinearMipPoint = 0x14,
    #[default]
    MinMagMipLinear = 0x15,
    Anisotropic = 0x55,
}

/// Texture addressing mode. Discriminants are the D3D11 values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum AddressMode {
    Wrap = 1,
    Mirror = 2,
    #[default]
    Clamp = 3,
    Border = 4,
    MirrorOnce = 5,
}

/// Value of a `<key = value>` annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Int(i32),
    Uint(u32),
    Float(f32),
    String(String),
}

/// Ordered key -> value annotation map. Annotation counts are tiny, so a
/// vector beats a hash map here.
pub type AnnotationMap = Vec<(String, AnnotationValue)>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: Type,
    /// Empty when the member carries no semantic.
    pub semantic: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructDesc {
    pub id: Id,
    pub name: String,
    pub unique_name: String,
    pub members: Vec<StructMember>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionDesc {
    pub id: Id,
    pub name: String,
    pub unique_name: String,
    /// Parameters reuse the struct-member shape: name + type + semantic.
    pub params: Vec<StructMember>,
    pub return_type: Type,
    pub return_semantic: String,
    pub entry_block: Id,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureDesc {
    pub id: Id,
    pub name: String,
    pub unique_name: String,
    /// `COLOR` and `DEPTH` bind runtime-owned views instead of allocating.
    pub semantic: String,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub format: TextureFormat,
    pub annotations: AnnotationMap,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplerDesc {
    pub id: Id,
    pub name: String,
    pub unique_name: String,
    /// Name of the texture this sampler reads; textures must be defined
    /// before the samplers that reference them.
    pub texture_name: String,
    pub filter: TextureFilter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub min_lod: f32,
    pub max_lod: f32,
    pub lod_bias: f32,
    /// Sample through the texture's sRGB view.
    pub srgb: bool,
    /// Backend-neutral binding assigned during lowering.
    pub set: u32,
    pub binding: u32,
    pub annotations: AnnotationMap,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformDesc {
    pub name: String,
    pub ty: Type,
    /// Size and offset in bytes inside the module's uniform block.
    pub size: u32,
    pub offset: u32,
    /// Member index inside the synthesized uniform block.
    pub member_index: u32,
    /// Id of the block type (SPIR-V) or the block pseudo-entity (HLSL).
    pub block_id: Id,
    pub initializer: Option<Constant>,
    pub annotations: AnnotationMap,
}

/// One draw invocation of a technique.
///
/// Blend and stencil fields carry the integer encodings from the effect
/// syntax; the linker translates them to device enums.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassDesc {
    pub vs_entry_point: String,
    pub ps_entry_point: String,
    pub render_target_names: [String; 8],
    pub srgb_write_enable: bool,
    pub clear_render_targets: bool,
    pub blend_enable: bool,
    pub blend_op: u32,
    pub blend_op_alpha: u32,
    pub src_blend: u32,
    pub dest_blend: u32,
    pub src_blend_alpha: u32,
    pub dest_blend_alpha: u32,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_comparison_func: u32,
    pub stencil_reference_value: u32,
    pub stencil_op_pass: u32,
    pub stencil_op_fail: u32,
    pub stencil_op_depth_fail: u32,
    pub color_write_mask: u8,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechniqueDesc {
    pub name: String,
    pub passes: Vec<PassDesc>,
    pub annotations: AnnotationMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    pub name: String,
    pub stage: ShaderStage,
}

/// A compiled effect module: backend artifacts plus the entity lists the
/// linker consumes. Exactly one of `hlsl`/`spirv` is populated depending on
/// which generator produced the module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub hlsl: String,
    pub spirv: Vec<u32>,
    pub textures: Vec<TextureDesc>,
    pub samplers: Vec<SamplerDesc>,
    pub uniforms: Vec<UniformDesc>,
    pub techniques: Vec<TechniqueDesc>,
    pub entry_points: Vec<EntryPoint>,
    /// 16-byte-rounded size of the uniform block, zero when the module has
    /// no uniforms.
    pub total_uniform_size: u32,
}
