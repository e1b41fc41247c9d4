//! Links a compiled effect module against a device.
//!
//! Entry points are compiled to bytecode first so every diagnostic surfaces
//! in one pass, then textures, samplers, uniforms and techniques are
//! visited in IR order. Errors accumulate into a single log; the module is
//! marked failed only by IR errors, fatal device errors and a missing
//! vendor compiler (render-target, sampler and pipeline-state failures
//! downgrade to warnings and skip what they affect).

use std::collections::HashMap;

use prism_ir::{
    Module, PassDesc, SamplerDesc, ShaderStage, TechniqueDesc, TextureDesc, UniformDesc,
};
use tracing::debug;

use crate::d3dcompiler::{load_compiler, CompileFlags, CompilerLoader, HlslCompiler};
use crate::device::{
    blend_from_literal, format_from_texture, make_format_normal, make_format_srgb,
    stencil_op_from_literal, BindFlags, BlendStateDesc, BlendStateHandle, BufferDesc,
    CpuAccessFlags, DepthStencilStateDesc, DepthStencilStateHandle, Device, MiscFlags, QueryHandle,
    QueryKind, RtvDesc, RtvHandle, SamplerStateDesc, SamplerStateHandle, ShaderHandle, SrvDesc,
    SrvHandle, Texture2dDesc, Usage, Viewport, COMPARISON_ALWAYS, COMPARISON_NEVER,
};
use crate::runtime::{fnv1a_32, RuntimeEnv, TextureEntry, TextureReference};

/// What a bound shader resource ultimately reads, used for read/write
/// hazard detection inside one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SrvSource {
    BackBuffer,
    DepthBuffer,
    Texture(String),
}

#[derive(Debug, Clone)]
struct SrvBinding {
    srv: SrvHandle,
    source: SrvSource,
}

/// One ready-to-dispatch pass.
#[derive(Debug, Clone, Default)]
pub struct LinkedPass {
    pub vertex_shader: Option<ShaderHandle>,
    pub pixel_shader: Option<ShaderHandle>,
    /// Shader-resource views by sampler binding; entries are `None` where
    /// unbound or nulled out by hazard detection.
    pub shader_resources: Vec<Option<SrvHandle>>,
    pub render_targets: [Option<RtvHandle>; 8],
    pub render_target_resources: [Option<SrvHandle>; 8],
    pub viewport: Viewport,
    pub clear_render_targets: bool,
    pub depth_stencil_state: Option<DepthStencilStateHandle>,
    pub blend_state: Option<BlendStateHandle>,
    pub stencil_reference: u32,
}

/// One linked technique with its GPU timing queries.
#[derive(Debug, Clone, Default)]
pub struct LinkedTechnique {
    pub name: String,
    pub passes: Vec<LinkedPass>,
    pub timestamp_query_begin: Option<QueryHandle>,
    pub timestamp_query_end: Option<QueryHandle>,
    pub timestamp_disjoint: Option<QueryHandle>,
    /// Index into the runtime's constant-buffer list, when the effect has
    /// uniforms.
    pub uniform_storage_index: Option<usize>,
    pub uniform_storage_offset: u32,
}

pub struct EffectLinker<'a> {
    module: &'a Module,
    device: &'a mut dyn Device,
    loader: &'a dyn CompilerLoader,
    env: &'a mut RuntimeEnv,

    errors: String,
    success: bool,

    uniform_storage_offset: u32,
    constant_buffer_size: u32,

    vs_entry_points: HashMap<String, ShaderHandle>,
    ps_entry_points: HashMap<String, ShaderHandle>,
    sampler_bindings: Vec<Option<SamplerStateHandle>>,
    texture_bindings: Vec<Option<SrvBinding>>,

    techniques: Vec<LinkedTechnique>,
}

impl<'a> EffectLinker<'a> {
    pub fn new(
        module: &'a Module,
        device: &'a mut dyn Device,
        loader: &'a dyn CompilerLoader,
        env: &'a mut RuntimeEnv,
    ) -> Self {
        Self {
            module,
            device,
            loader,
            env,
            errors: String::new(),
            success: true,
            uniform_storage_offset: 0,
            constant_buffer_size: 0,
            vs_entry_points: HashMap::new(),
            ps_entry_points: HashMap::new(),
            sampler_bindings: Vec::new(),
            texture_bindings: Vec::new(),
            techniques: Vec::new(),
        }
    }

    /// Runs the full link. Returns `false` when the effect failed; the log
    /// is populated either way.
    pub fn run(&mut self) -> bool {
        let compiler = match load_compiler(self.loader) {
            Ok((version, compiler)) => {
                debug!(version, "loaded vendor HLSL compiler");
                compiler
            }
            Err(error) => {
                self.errors.push_str(&error.to_string());
                self.errors.push('\n');
                self.success = false;
                return false;
            }
        };

        let entry_points = self.module.entry_points.clone();
        for entry in &entry_points {
            self.compile_entry_point(compiler.as_ref(), &entry.name, entry.stage);
        }
        drop(compiler);

        // No point allocating resources when a shader failed to compile.
        if !self.success {
            return false;
        }

        self.uniform_storage_offset = self.env.uniform_storage.len() as u32;

        for texture in &self.module.textures.clone() {
            self.visit_texture(texture);
        }
        for sampler in &self.module.samplers.clone() {
            self.visit_sampler(sampler);
        }
        for uniform in &self.module.uniforms.clone() {
            self.visit_uniform(uniform);
        }
        for technique in &self.module.techniques.clone() {
            self.visit_technique(technique);
        }

        if self.constant_buffer_size != 0 {
            self.constant_buffer_size = (self.constant_buffer_size + 15) & !15;
            let total = (self.uniform_storage_offset + self.constant_buffer_size) as usize;
            self.env.uniform_storage.resize(total, 0);

            let desc = BufferDesc {
                byte_width: self.constant_buffer_size,
                usage: Usage::Dynamic,
                bind_flags: BindFlags::CONSTANT_BUFFER,
                cpu_access_flags: CpuAccessFlags::WRITE,
            };
            let initial = &self.env.uniform_storage[self.uniform_storage_offset as usize..total];
            match self.device.create_buffer(&desc, initial) {
                Ok(buffer) => self.env.constant_buffers.push(buffer),
                Err(hr) => {
                    self.error(format!(
                        "'ID3D11Device::CreateBuffer' failed with error code {hr:#010x}!"
                    ));
                }
            }
        }

        self.success
    }

    pub fn errors(&self) -> &str {
        &self.errors
    }

    pub fn into_techniques(self) -> Vec<LinkedTechnique> {
        self.techniques
    }

    pub fn techniques(&self) -> &[LinkedTechnique] {
        &self.techniques
    }

    fn error(&mut self, message: impl AsRef<str>) {
        self.success = false;
        self.errors.push_str("error: ");
        self.errors.push_str(message.as_ref());
        self.errors.push('\n');
    }

    fn warning(&mut self, message: impl AsRef<str>) {
        self.errors.push_str("warning: ");
        self.errors.push_str(message.as_ref());
        self.errors.push('\n');
    }

    fn compile_entry_point(
        &mut self,
        compiler: &dyn HlslCompiler,
        entry_point: &str,
        stage: ShaderStage,
    ) {
        let target = match stage {
            ShaderStage::Vertex => "vs_5_0",
            ShaderStage::Pixel => "ps_5_0",
        };
        debug!(entry_point, target, "compiling entry point");

        let bytecode = match compiler.compile(
            &self.module.hlsl,
            entry_point,
            target,
            CompileFlags::ENABLE_STRICTNESS,
        ) {
            Ok(bytecode) => bytecode,
            Err(log) => {
                self.errors.push_str(&log);
                if !log.ends_with('\n') {
                    self.errors.push('\n');
                }
                self.error("internal shader compilation failed");
                return;
            }
        };

        let created = match stage {
            ShaderStage::Vertex => self.device.create_vertex_shader(&bytecode),
            ShaderStage::Pixel => self.device.create_pixel_shader(&bytecode),
        };
        match created {
            Ok(shader) => {
                match stage {
                    ShaderStage::Vertex => {
                        self.vs_entry_points.insert(entry_point.to_owned(), shader)
                    }
                    ShaderStage::Pixel => {
                        self.ps_entry_points.insert(entry_point.to_owned(), shader)
                    }
                };
            }
            Err(hr) => {
                self.error(format!("'CreateShader' failed with error code {hr:#010x}!"));
            }
        }
    }

    fn visit_texture(&mut self, info: &TextureDesc) {
        if let Some(existing) = self.env.find_texture(&info.unique_name) {
            if info.semantic.is_empty()
                && (existing.width != info.width
                    || existing.height != info.height
                    || existing.levels != info.levels
                    || existing.format != info.format)
            {
                let name = info.unique_name.clone();
                self.error(format!(
                    "a texture named '{name}' was already created with different dimensions; \
                     textures are shared across all effects, so either rename the variable or \
                     adjust the dimensions so they match"
                ));
            }
            return;
        }

        let mut entry = TextureEntry {
            unique_name: info.unique_name.clone(),
            width: info.width,
            height: info.height,
            levels: info.levels,
            format: info.format,
            ..TextureEntry::default()
        };

        match info.semantic.as_str() {
            "COLOR" => {
                entry.width = self.env.frame_width;
                entry.height = self.env.frame_height;
                entry.reference = TextureReference::BackBuffer;
                entry.srv = self.env.backbuffer_srv;
            }
            "DEPTH" => {
                entry.width = self.env.frame_width;
                entry.height = self.env.frame_height;
                entry.reference = TextureReference::DepthBuffer;
                entry.srv = [self.env.depth_srv, self.env.depth_srv];
            }
            "" => {
                let format = format_from_texture(info.format);
                let desc = Texture2dDesc {
                    width: info.width,
                    height: info.height,
                    mip_levels: info.levels,
                    array_size: 1,
                    format,
                    sample_count: 1,
                    usage: Usage::Default,
                    bind_flags: BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET,
                    misc_flags: MiscFlags::GENERATE_MIPS,
                };

                let texture = match self.device.create_texture2d(&desc) {
                    Ok(texture) => texture,
                    Err(hr) => {
                        self.error(format!(
                            "'ID3D11Device::CreateTexture2D' failed with error code {hr:#010x}!"
                        ));
                        return;
                    }
                };
                entry.texture = Some(texture);

                let mut srv_desc = SrvDesc {
                    format: make_format_normal(format),
                    mip_levels: desc.mip_levels,
                };
                entry.srv[0] = match self.device.create_shader_resource_view(texture, &srv_desc) {
                    Ok(srv) => Some(srv),
                    Err(hr) => {
                        self.error(format!(
                            "'ID3D11Device::CreateShaderResourceView' failed with error code {hr:#010x}!"
                        ));
                        return;
                    }
                };

                srv_desc.format = make_format_srgb(format);
                if srv_desc.format != format {
                    entry.srv[1] =
                        match self.device.create_shader_resource_view(texture, &srv_desc) {
                            Ok(srv) => Some(srv),
                            Err(hr) => {
                                self.error(format!(
                                    "'ID3D11Device::CreateShaderResourceView' failed with error code {hr:#010x}!"
                                ));
                                return;
                            }
                        };
                } else {
                    entry.srv[1] = entry.srv[0];
                }
            }
            other => {
                self.error(format!("invalid texture semantic '{other}'"));
                return;
            }
        }

        self.env.textures.push(entry);
    }

    fn visit_sampler(&mut self, info: &SamplerDesc) {
        let Some(texture) = self.env.find_texture(&info.texture_name) else {
            return;
        };
        let srv = texture.srv[usize::from(info.srgb)];
        let source = match texture.reference {
            TextureReference::BackBuffer => SrvSource::BackBuffer,
            TextureReference::DepthBuffer => SrvSource::DepthBuffer,
            TextureReference::Owned => SrvSource::Texture(texture.unique_name.clone()),
        };

        let desc = SamplerStateDesc {
            filter: info.filter as u32,
            address_u: info.address_u as u32,
            address_v: info.address_v as u32,
            address_w: info.address_w as u32,
            mip_lod_bias: info.lod_bias,
            max_anisotropy: 1,
            comparison_func: COMPARISON_NEVER,
            border_color: [0.0; 4],
            min_lod: info.min_lod,
            max_lod: info.max_lod,
        };

        let hash = fnv1a_32(bytemuck::bytes_of(&desc));
        let state = match self.env.find_sampler_state(hash) {
            Some(state) => state,
            None => match self.device.create_sampler_state(&desc) {
                Ok(state) => {
                    self.env.sampler_states.push((hash, state));
                    state
                }
                Err(hr) => {
                    self.warning(format!(
                        "'ID3D11Device::CreateSamplerState' failed with error code {hr:#010x}!"
                    ));
                    return;
                }
            },
        };

        let slot = info.binding as usize;
        if self.sampler_bindings.len() <= slot {
            self.sampler_bindings.resize(slot + 1, None);
            self.texture_bindings.resize(slot + 1, None);
        }
        self.sampler_bindings[slot] = Some(state);
        self.texture_bindings[slot] = srv.map(|srv| SrvBinding { srv, source });
    }

    fn visit_uniform(&mut self, info: &UniformDesc) {
        let storage_offset = (self.uniform_storage_offset + info.offset) as usize;
        let size = info.size as usize;

        self.constant_buffer_size = self.constant_buffer_size.max(info.offset + info.size);

        if storage_offset + size > self.env.uniform_storage.len() {
            let grown = (self.env.uniform_storage.len() + 128).max(storage_offset + size);
            self.env.uniform_storage.resize(grown, 0);
        }

        let slot = &mut self.env.uniform_storage[storage_offset..storage_offset + size];
        slot.fill(0);
        if let Some(initializer) = &info.initializer {
            let bytes = initializer.lane_bytes();
            let count = size.min(bytes.len());
            slot[..count].copy_from_slice(&bytes[..count]);
        }
    }

    fn visit_technique(&mut self, info: &TechniqueDesc) {
        let mut technique = LinkedTechnique {
            name: info.name.clone(),
            ..LinkedTechnique::default()
        };

        technique.timestamp_query_begin = self.device.create_query(QueryKind::Timestamp).ok();
        technique.timestamp_query_end = self.device.create_query(QueryKind::Timestamp).ok();
        technique.timestamp_disjoint = self
            .device
            .create_query(QueryKind::TimestampDisjoint)
            .ok();

        if self.constant_buffer_size != 0 {
            technique.uniform_storage_index = Some(self.env.constant_buffers.len());
            technique.uniform_storage_offset = self.uniform_storage_offset;
        }

        for pass_info in &info.passes {
            match self.build_pass(pass_info) {
                Some(pass) => technique.passes.push(pass),
                None => return,
            }
        }

        debug!(technique = %technique.name, passes = technique.passes.len(), "linked technique");
        self.techniques.push(technique);
    }

    fn build_pass(&mut self, info: &PassDesc) -> Option<LinkedPass> {
        let mut pass = LinkedPass {
            vertex_shader: self.vs_entry_points.get(&info.vs_entry_point).copied(),
            pixel_shader: self.ps_entry_points.get(&info.ps_entry_point).copied(),
            clear_render_targets: info.clear_render_targets,
            stencil_reference: info.stencil_reference_value,
            ..LinkedPass::default()
        };
        if pass.vertex_shader.is_none() {
            self.error(format!(
                "vertex entry point '{}' is missing from the compiled module",
                info.vs_entry_point
            ));
            return None;
        }
        if pass.pixel_shader.is_none() {
            self.error(format!(
                "pixel entry point '{}' is missing from the compiled module",
                info.ps_entry_point
            ));
            return None;
        }

        pass.viewport.max_depth = 1.0;

        let bindings = self.texture_bindings.clone();

        let target_index = usize::from(info.srgb_write_enable);
        pass.render_targets[0] = self.env.backbuffer_rtv[target_index];
        pass.render_target_resources[0] = self.env.backbuffer_srv[target_index];
        let mut written: Vec<SrvSource> = Vec::new();
        // The backbuffer only stays a hazard while it remains bound as RT0.
        if info.render_target_names[0].is_empty() {
            written.push(SrvSource::BackBuffer);
        }

        for (slot, render_target) in info.render_target_names.iter().enumerate() {
            if render_target.is_empty() {
                continue;
            }

            let Some(entry) = self.env.find_texture(render_target) else {
                self.error(format!("render target texture '{render_target}' not found"));
                return None;
            };
            let (width, height, texture_format) = (entry.width, entry.height, entry.format);

            if pass.viewport.width != 0.0
                && pass.viewport.height != 0.0
                && (width != pass.viewport.width as u32 || height != pass.viewport.height as u32)
            {
                self.error("cannot use multiple render targets with differently sized textures");
                return None;
            }
            pass.viewport.width = width as f32;
            pass.viewport.height = height as f32;

            let dxgi_format = format_from_texture(texture_format);
            let rtv_desc = RtvDesc {
                format: if info.srgb_write_enable {
                    make_format_srgb(dxgi_format)
                } else {
                    make_format_normal(dxgi_format)
                },
                multisampled: false,
            };

            let (texture, cached_rtv, srv) = {
                let entry = self.env.find_texture(render_target).expect("checked above");
                (entry.texture, entry.rtv[target_index], entry.srv[target_index])
            };

            let rtv = match cached_rtv {
                Some(rtv) => Some(rtv),
                None => match texture {
                    Some(texture) => match self.device.create_render_target_view(texture, &rtv_desc)
                    {
                        Ok(rtv) => {
                            if let Some(entry) = self.env.find_texture_mut(render_target) {
                                entry.rtv[target_index] = Some(rtv);
                            }
                            Some(rtv)
                        }
                        Err(hr) => {
                            self.warning(format!(
                                "'ID3D11Device::CreateRenderTargetView' failed with error code {hr:#010x}!"
                            ));
                            None
                        }
                    },
                    None => None,
                },
            };

            pass.render_targets[slot] = rtv;
            pass.render_target_resources[slot] = srv;
            written.push(SrvSource::Texture(render_target.clone()));
        }

        if pass.viewport.width == 0.0 && pass.viewport.height == 0.0 {
            pass.viewport.width = self.env.frame_width as f32;
            pass.viewport.height = self.env.frame_height as f32;
        }

        let depth_stencil_desc = DepthStencilStateDesc {
            depth_enable: false,
            depth_write: false,
            depth_func: COMPARISON_ALWAYS,
            stencil_enable: info.stencil_enable,
            stencil_read_mask: info.stencil_read_mask,
            stencil_write_mask: info.stencil_write_mask,
            stencil_func: info.stencil_comparison_func,
            stencil_pass_op: stencil_op_from_literal(info.stencil_op_pass),
            stencil_fail_op: stencil_op_from_literal(info.stencil_op_fail),
            stencil_depth_fail_op: stencil_op_from_literal(info.stencil_op_depth_fail),
        };
        pass.depth_stencil_state = match self.device.create_depth_stencil_state(&depth_stencil_desc)
        {
            Ok(state) => Some(state),
            Err(hr) => {
                self.warning(format!(
                    "'ID3D11Device::CreateDepthStencilState' failed with error code {hr:#010x}!"
                ));
                None
            }
        };

        let blend_desc = BlendStateDesc {
            blend_enable: info.blend_enable,
            src_blend: blend_from_literal(info.src_blend),
            dest_blend: blend_from_literal(info.dest_blend),
            blend_op: info.blend_op,
            src_blend_alpha: blend_from_literal(info.src_blend_alpha),
            dest_blend_alpha: blend_from_literal(info.dest_blend_alpha),
            blend_op_alpha: info.blend_op_alpha,
            render_target_write_mask: info.color_write_mask,
        };
        pass.blend_state = match self.device.create_blend_state(&blend_desc) {
            Ok(state) => Some(state),
            Err(hr) => {
                self.warning(format!(
                    "'ID3D11Device::CreateBlendState' failed with error code {hr:#010x}!"
                ));
                None
            }
        };

        // Null out shader resources that alias a render target of this
        // pass: reading and writing one texture in a single draw is
        // undefined.
        pass.shader_resources = bindings
            .iter()
            .map(|binding| {
                let binding = binding.as_ref()?;
                if written.contains(&binding.source) {
                    None
                } else {
                    Some(binding.srv)
                }
            })
            .collect();

        Some(pass)
    }
}

/// Convenience wrapper: link `module` and return the techniques together
/// with the accumulated log.
pub struct LinkResult {
    pub ok: bool,
    pub log: String,
    pub techniques: Vec<LinkedTechnique>,
}

pub fn link_effect(
    module: &Module,
    device: &mut dyn Device,
    loader: &dyn CompilerLoader,
    env: &mut RuntimeEnv,
) -> LinkResult {
    let mut linker = EffectLinker::new(module, device, loader, env);
    let ok = linker.run();
    let log = linker.errors().to_owned();
    LinkResult {
        ok,
        log,
        techniques: linker.into_techniques(),
    }
}
