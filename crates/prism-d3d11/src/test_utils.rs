//! Recording fakes for exercising the linker without a GPU.
//!
//! [`FakeDevice`] hands out monotonically increasing handles and records
//! every descriptor it sees; [`FakeLoader`] simulates the vendor compiler
//! libraries, producing deterministic pseudo-bytecode or a configurable
//! per-entry-point failure log.

use std::cell::RefCell;
use std::rc::Rc;

use crate::d3dcompiler::{CompileFlags, CompilerLoader, HlslCompiler};
use crate::device::{
    BlendStateDesc, BlendStateHandle, BufferDesc, BufferHandle, DepthStencilStateDesc,
    DepthStencilStateHandle, Device, HResult, QueryHandle, QueryKind, RtvDesc, RtvHandle,
    SamplerStateDesc, SamplerStateHandle, ShaderHandle, SrvDesc, SrvHandle, Texture2dDesc,
    TextureHandle,
};
use crate::runtime::RuntimeEnv;

/// E_FAIL, the stock failure code the fakes report.
pub const E_FAIL: HResult = 0x8000_4005u32 as HResult;

#[derive(Debug, Default)]
pub struct FakeDevice {
    next_handle: u64,
    pub textures: Vec<Texture2dDesc>,
    pub srvs: Vec<(TextureHandle, SrvDesc)>,
    pub rtvs: Vec<(TextureHandle, RtvDesc)>,
    pub samplers: Vec<SamplerStateDesc>,
    pub buffers: Vec<(BufferDesc, Vec<u8>)>,
    pub vertex_shaders: Vec<Vec<u8>>,
    pub pixel_shaders: Vec<Vec<u8>>,
    pub depth_stencil_states: Vec<DepthStencilStateDesc>,
    pub blend_states: Vec<BlendStateDesc>,
    pub queries: Vec<QueryKind>,
    /// Fail the next texture creation with [`E_FAIL`].
    pub fail_texture_creation: bool,
    /// Fail every render-target-view creation with [`E_FAIL`].
    pub fail_rtv_creation: bool,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl Device for FakeDevice {
    fn create_texture2d(&mut self, desc: &Texture2dDesc) -> Result<TextureHandle, HResult> {
        if self.fail_texture_creation {
            self.fail_texture_creation = false;
            return Err(E_FAIL);
        }
        self.textures.push(*desc);
        Ok(TextureHandle(self.next()))
    }

    fn create_shader_resource_view(
        &mut self,
        texture: TextureHandle,
        desc: &SrvDesc,
    ) -> Result<SrvHandle, HResult> {
        self.srvs.push((texture, *desc));
        Ok(SrvHandle(self.next()))
    }

    fn create_render_target_view(
        &mut self,
        texture: TextureHandle,
        desc: &RtvDesc,
    ) -> Result<RtvHandle, HResult> {
        if self.fail_rtv_creation {
            return Err(E_FAIL);
        }
        self.rtvs.push((texture, *desc));
        Ok(RtvHandle(self.next()))
    }

    fn create_sampler_state(
        &mut self,
        desc: &SamplerStateDesc,
    ) -> Result<SamplerStateHandle, HResult> {
        self.samplers.push(*desc);
        Ok(SamplerStateHandle(self.next()))
    }

    fn create_buffer(
        &mut self,
        desc: &BufferDesc,
        initial_data: &[u8],
    ) -> Result<BufferHandle, HResult> {
        self.buffers.push((*desc, initial_data.to_vec()));
        Ok(BufferHandle(self.next()))
    }

    fn create_vertex_shader(&mut self, bytecode: &[u8]) -> Result<ShaderHandle, HResult> {
        self.vertex_shaders.push(bytecode.to_vec());
        Ok(ShaderHandle(self.next()))
    }

    fn create_pixel_shader(&mut self, bytecode: &[u8]) -> Result<ShaderHandle, HResult> {
        self.pixel_shaders.push(bytecode.to_vec());
        Ok(ShaderHandle(self.next()))
    }

    fn create_depth_stencil_state(
        &mut self,
        desc: &DepthStencilStateDesc,
    ) -> Result<DepthStencilStateHandle, HResult> {
        self.depth_stencil_states.push(*desc);
        Ok(DepthStencilStateHandle(self.next()))
    }

    fn create_blend_state(&mut self, desc: &BlendStateDesc) -> Result<BlendStateHandle, HResult> {
        self.blend_states.push(*desc);
        Ok(BlendStateHandle(self.next()))
    }

    fn create_query(&mut self, kind: QueryKind) -> Result<QueryHandle, HResult> {
        self.queries.push(kind);
        Ok(QueryHandle(self.next()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileRecord {
    pub entry_point: String,
    pub target: String,
}

/// Compiler stub: bytecode is the entry point name prefixed with the
/// target profile, which keeps shader identity observable in tests.
pub struct FakeCompiler {
    fail_entry_points: Vec<String>,
    records: Rc<RefCell<Vec<CompileRecord>>>,
}

impl HlslCompiler for FakeCompiler {
    fn compile(
        &self,
        _source: &str,
        entry_point: &str,
        target: &str,
        _flags: CompileFlags,
    ) -> Result<Vec<u8>, String> {
        self.records.borrow_mut().push(CompileRecord {
            entry_point: entry_point.to_owned(),
            target: target.to_owned(),
        });
        if self.fail_entry_points.iter().any(|e| e == entry_point) {
            return Err(format!(
                "effect.fx(1,1): error X3501: '{entry_point}': entrypoint not found"
            ));
        }
        Ok(format!("{target}:{entry_point}").into_bytes())
    }
}

/// Loader stub advertising a configurable set of library versions.
#[derive(Default)]
pub struct FakeLoader {
    pub available_versions: Vec<u32>,
    pub fail_entry_points: Vec<String>,
    pub loaded_versions: RefCell<Vec<u32>>,
    pub records: Rc<RefCell<Vec<CompileRecord>>>,
}

impl FakeLoader {
    pub fn with_versions(versions: &[u32]) -> Self {
        Self {
            available_versions: versions.to_vec(),
            ..Self::default()
        }
    }
}

impl CompilerLoader for FakeLoader {
    fn load(&self, version: u32) -> Option<Box<dyn HlslCompiler>> {
        self.loaded_versions.borrow_mut().push(version);
        if !self.available_versions.contains(&version) {
            return None;
        }
        Some(Box::new(FakeCompiler {
            fail_entry_points: self.fail_entry_points.clone(),
            records: Rc::clone(&self.records),
        }))
    }
}

/// A runtime environment with a 1920x1080 framebuffer and distinct
/// backbuffer/depth view handles.
pub fn test_env() -> RuntimeEnv {
    RuntimeEnv {
        frame_width: 1920,
        frame_height: 1080,
        backbuffer_rtv: [Some(RtvHandle(9000)), Some(RtvHandle(9001))],
        backbuffer_srv: [Some(SrvHandle(9100)), Some(SrvHandle(9101))],
        depth_srv: Some(SrvHandle(9200)),
        ..RuntimeEnv::default()
    }
}
