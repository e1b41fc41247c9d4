//! Vendor HLSL compiler access.
//!
//! The linker does not load `d3dcompiler_*.dll` itself; the runtime hands
//! it a [`CompilerLoader`] that can materialize a compiler for a given
//! library version. The linker asks for version 47 and falls back to 43,
//! matching the DirectX end-user runtime distribution.

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// D3DCOMPILE_* flags the linker passes through.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompileFlags: u32 {
        /// D3DCOMPILE_ENABLE_STRICTNESS
        const ENABLE_STRICTNESS = 1 << 11;
    }
}

/// One loaded vendor compiler.
pub trait HlslCompiler {
    /// Compile `source` at `entry_point` for a target profile such as
    /// `vs_5_0`. On failure the returned string is the compiler's error
    /// log, appended verbatim to the effect log.
    fn compile(
        &self,
        source: &str,
        entry_point: &str,
        target: &str,
        flags: CompileFlags,
    ) -> Result<Vec<u8>, String>;
}

/// Loads vendor compiler libraries by version number.
pub trait CompilerLoader {
    fn load(&self, version: u32) -> Option<Box<dyn HlslCompiler>>;
}

/// Library versions the linker will accept, in preference order.
pub const COMPILER_VERSIONS: [u32; 2] = [47, 43];

#[derive(Debug, Error)]
#[error(
    "unable to load the D3D compiler library; make sure you have the DirectX \
     end-user runtime (June 2010) installed or a newer version of the library \
     in the application directory"
)]
pub struct CompilerLoadError;

/// Load the most preferred available compiler. The returned handle is
/// dropped at the end of the link call on every path.
pub fn load_compiler(
    loader: &dyn CompilerLoader,
) -> Result<(u32, Box<dyn HlslCompiler>), CompilerLoadError> {
    for version in COMPILER_VERSIONS {
        if let Some(compiler) = loader.load(version) {
            return Ok((version, compiler));
        }
    }
    Err(CompilerLoadError)
}
