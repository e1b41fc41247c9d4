//! D3D11 effect linker.
//!
//! Consumes a compiled effect [`prism_ir::Module`] (HLSL text plus entity
//! lists), compiles its entry points through the vendor HLSL compiler and
//! installs textures, views, samplers, the uniform constant buffer and
//! per-pass pipeline state onto the runtime's device. The device and the
//! compiler library are injected as traits; see [`device::Device`] and
//! [`d3dcompiler::CompilerLoader`].
//!
//! The linker runs on the runtime's render thread and is synchronous: one
//! call, one module, errors accumulated into a single `error:`/`warning:`
//! log.

pub mod d3dcompiler;
pub mod device;
pub mod linker;
pub mod runtime;
pub mod test_utils;

pub use d3dcompiler::{CompileFlags, CompilerLoadError, CompilerLoader, HlslCompiler};
pub use device::{Device, HResult};
pub use linker::{link_effect, EffectLinker, LinkResult, LinkedPass, LinkedTechnique};
pub use runtime::{RuntimeEnv, TextureEntry, TextureReference};
