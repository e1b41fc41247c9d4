/// Intrinsic functions shared by both backends.
///
/// The id space is one enum; each backend owns a dispatch table keyed by it
/// (GLSL.std.450 / core SPIR-V ops on one side, HLSL spellings on the
/// other). Overloads resolve by argument type at emit time, so `Abs` covers
/// both the float and the signed-integer form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Abs,
    All,
    Any,
    Acos,
    Asin,
    Atan,
    Atan2,
    Ceil,
    Clamp,
    Cos,
    Cosh,
    Cross,
    Ddx,
    Ddy,
    Degrees,
    Distance,
    Dot,
    Exp,
    Exp2,
    Floor,
    Fmod,
    Frac,
    Length,
    Lerp,
    Log,
    Log2,
    Mad,
    Max,
    Min,
    /// `mul(a, b)` — matrix forms; scalar/vector products go through the
    /// `*` operator instead.
    Mul,
    Normalize,
    Pow,
    Radians,
    Rcp,
    Reflect,
    Refract,
    Round,
    Rsqrt,
    Saturate,
    Sign,
    Sin,
    Sinh,
    SmoothStep,
    Sqrt,
    Step,
    Tan,
    Tanh,
    Transpose,
    /// `tex2D(sampler, coord)`
    Tex2d,
    /// `tex2Dlod(sampler, float4(coord, 0, lod))`
    Tex2dLod,
    /// `tex2Dfetch(sampler, texel)` — unfiltered integer-coordinate load.
    Tex2dFetch,
    /// `tex2Dsize(sampler, lod)` — mip dimensions query.
    Tex2dSize,
}
