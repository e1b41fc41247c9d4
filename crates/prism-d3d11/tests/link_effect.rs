//! End-to-end linker tests against the recording fake device.

use pretty_assertions::assert_eq;
use prism_d3d11::device::{DxgiFormat, QueryKind, Usage};
use prism_d3d11::linker::link_effect;
use prism_d3d11::test_utils::{test_env, FakeDevice, FakeLoader};
use prism_ir::{
    Constant, EntryPoint, Module, PassDesc, SamplerDesc, ShaderStage, TechniqueDesc, TextureDesc,
    TextureFormat, UniformDesc,
};

fn module_with_entry_points() -> Module {
    Module {
        hlsl: "float4 VS() : SV_POSITION { return 0; }\nfloat4 PS() : SV_TARGET { return 0; }\n"
            .to_owned(),
        entry_points: vec![
            EntryPoint {
                name: "VS".to_owned(),
                stage: ShaderStage::Vertex,
            },
            EntryPoint {
                name: "PS".to_owned(),
                stage: ShaderStage::Pixel,
            },
        ],
        ..Module::default()
    }
}

fn simple_pass() -> PassDesc {
    PassDesc {
        vs_entry_point: "VS".to_owned(),
        ps_entry_point: "PS".to_owned(),
        ..PassDesc::default()
    }
}

fn texture(name: &str, width: u32, height: u32) -> TextureDesc {
    TextureDesc {
        name: name.to_owned(),
        unique_name: name.to_owned(),
        width,
        height,
        levels: 1,
        format: TextureFormat::Rgba8,
        ..TextureDesc::default()
    }
}

fn sampler(name: &str, texture_name: &str, binding: u32, srgb: bool) -> SamplerDesc {
    SamplerDesc {
        name: name.to_owned(),
        unique_name: name.to_owned(),
        texture_name: texture_name.to_owned(),
        binding,
        srgb,
        ..SamplerDesc::default()
    }
}

#[test]
fn prefers_compiler_47_and_falls_back_to_43() {
    let module = module_with_entry_points();
    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[43]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);

    assert!(result.ok, "log: {}", result.log);
    assert_eq!(*loader.loaded_versions.borrow(), vec![47, 43]);
    assert_eq!(device.vertex_shaders.len(), 1);
    assert_eq!(device.pixel_shaders.len(), 1);
    assert_eq!(device.vertex_shaders[0], b"vs_5_0:VS".to_vec());
}

#[test]
fn missing_compiler_library_is_fatal() {
    let module = module_with_entry_points();
    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);

    assert!(!result.ok);
    assert!(result.log.contains("unable to load the D3D compiler library"));
    assert!(device.vertex_shaders.is_empty());
}

#[test]
fn every_entry_point_reports_its_diagnostics() {
    let module = module_with_entry_points();
    let mut device = FakeDevice::new();
    let mut loader = FakeLoader::with_versions(&[47]);
    loader.fail_entry_points = vec!["PS".to_owned()];
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);

    assert!(!result.ok);
    assert!(result.log.contains("X3501"));
    assert!(result.log.contains("error: internal shader compilation failed"));
    // The vertex shader still compiled, so its diagnostics (none) and the
    // pixel failure both surfaced in one pass.
    let records = loader.records.borrow();
    assert_eq!(records.len(), 2);
    // Resource setup is skipped entirely after a compile failure.
    assert!(device.textures.is_empty());
}

#[test]
fn single_float4_uniform_builds_a_16_byte_cbuffer() {
    let mut module = module_with_entry_points();
    module.uniforms.push(UniformDesc {
        name: "c".to_owned(),
        size: 16,
        offset: 0,
        initializer: Some(Constant::from_floats(&[1.0, 2.0, 3.0, 4.0])),
        ..UniformDesc::default()
    });
    module.total_uniform_size = 16;

    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);
    assert!(result.ok, "log: {}", result.log);

    assert_eq!(env.uniform_storage.len(), 16);
    assert_eq!(&env.uniform_storage[0..4], 1.0f32.to_le_bytes().as_slice());

    assert_eq!(device.buffers.len(), 1);
    let (desc, initial) = &device.buffers[0];
    assert_eq!(desc.byte_width, 16);
    assert_eq!(desc.usage, Usage::Dynamic);
    assert_eq!(initial.len(), 16);
    assert_eq!(&initial[12..16], 4.0f32.to_le_bytes().as_slice());
    assert_eq!(env.constant_buffers.len(), 1);
}

#[test]
fn uniform_arena_offsets_stack_across_effects() {
    let mut module = module_with_entry_points();
    module.uniforms.push(UniformDesc {
        name: "c".to_owned(),
        size: 4,
        offset: 0,
        ..UniformDesc::default()
    });

    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    assert!(link_effect(&module, &mut device, &loader, &mut env).ok);
    // 4 bytes round to one 16-byte register.
    assert_eq!(env.uniform_storage.len(), 16);

    assert!(link_effect(&module, &mut device, &loader, &mut env).ok);
    assert_eq!(env.uniform_storage.len(), 32);
    assert_eq!(env.constant_buffers.len(), 2);
}

#[test]
fn two_samplers_on_one_texture_share_state_and_split_views() {
    let mut module = module_with_entry_points();
    module.textures.push(texture("V_tex", 64, 64));
    module.samplers.push(sampler("s_linear", "V_tex", 0, false));
    module.samplers.push(sampler("s_srgb", "V_tex", 1, true));
    module.techniques.push(TechniqueDesc {
        name: "T".to_owned(),
        passes: vec![simple_pass()],
        ..TechniqueDesc::default()
    });

    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);
    assert!(result.ok, "log: {}", result.log);

    // Identical descriptors intern to one sampler state.
    assert_eq!(device.samplers.len(), 1);
    assert_eq!(env.sampler_states.len(), 1);

    // The texture carries distinct linear and sRGB views.
    let entry = env.find_texture("V_tex").unwrap();
    assert_ne!(entry.srv[0], entry.srv[1]);
    let formats: Vec<DxgiFormat> = device.srvs.iter().map(|(_, desc)| desc.format).collect();
    assert_eq!(
        formats,
        vec![DxgiFormat::Rgba8Unorm, DxgiFormat::Rgba8UnormSrgb]
    );

    // Each sampler binding resolves the view matching its srgb flag.
    let pass = &result.techniques[0].passes[0];
    assert_eq!(pass.shader_resources[0], entry.srv[0]);
    assert_eq!(pass.shader_resources[1], entry.srv[1]);
}

#[test]
fn srv_bound_to_a_pass_render_target_is_nulled() {
    let mut module = module_with_entry_points();
    module.textures.push(texture("V_target", 128, 128));
    module.textures.push(texture("V_other", 128, 128));
    module.samplers.push(sampler("s0", "V_target", 0, false));
    module.samplers.push(sampler("s1", "V_other", 1, false));

    let mut pass = simple_pass();
    pass.render_target_names[0] = "V_target".to_owned();
    module.techniques.push(TechniqueDesc {
        name: "T".to_owned(),
        passes: vec![pass],
        ..TechniqueDesc::default()
    });

    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);
    assert!(result.ok, "log: {}", result.log);

    let pass = &result.techniques[0].passes[0];
    // Sampled and written in the same pass: the binding is nulled.
    assert_eq!(pass.shader_resources[0], None);
    // The unrelated texture stays bound.
    assert!(pass.shader_resources[1].is_some());
    // The render target picked up a lazily created RTV and the viewport
    // matches the target size.
    assert!(pass.render_targets[0].is_some());
    assert_eq!(pass.viewport.width, 128.0);
    assert_eq!(pass.viewport.height, 128.0);
}

#[test]
fn backbuffer_sampled_while_being_rt0_is_nulled() {
    let mut module = module_with_entry_points();
    let mut color = texture("V_color", 0, 0);
    color.semantic = "COLOR".to_owned();
    module.textures.push(color);
    module.samplers.push(sampler("s0", "V_color", 0, false));
    module.techniques.push(TechniqueDesc {
        name: "T".to_owned(),
        passes: vec![simple_pass()],
        ..TechniqueDesc::default()
    });

    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);
    assert!(result.ok, "log: {}", result.log);

    // No device texture was allocated for the COLOR semantic.
    assert!(device.textures.is_empty());
    let entry = env.find_texture("V_color").unwrap();
    assert_eq!(entry.width, 1920);
    assert_eq!(entry.srv[0], env.backbuffer_srv[0]);

    // The default RT0 is the backbuffer, so the binding is a hazard.
    let pass = &result.techniques[0].passes[0];
    assert_eq!(pass.shader_resources[0], None);
}

#[test]
fn texture_redeclaration_merges_or_fails() {
    let mut module = module_with_entry_points();
    module.textures.push(texture("V_shared", 32, 32));

    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    assert!(link_effect(&module, &mut device, &loader, &mut env).ok);
    assert_eq!(device.textures.len(), 1);

    // Identical redeclaration is a merge: no new resources, no errors.
    let again = link_effect(&module, &mut device, &loader, &mut env);
    assert!(again.ok, "log: {}", again.log);
    assert_eq!(device.textures.len(), 1);
    assert_eq!(env.textures.len(), 1);

    // Any differing field is a hard error.
    let mut conflicting = module_with_entry_points();
    conflicting.textures.push(texture("V_shared", 64, 32));
    let conflict = link_effect(&conflicting, &mut device, &loader, &mut env);
    assert!(!conflict.ok);
    assert!(conflict.log.contains("error: "));
    assert!(conflict.log.contains("different dimensions"));
}

#[test]
fn mismatched_render_target_sizes_fail_the_technique() {
    let mut module = module_with_entry_points();
    module.textures.push(texture("V_a", 128, 128));
    module.textures.push(texture("V_b", 64, 64));

    let mut pass = simple_pass();
    pass.render_target_names[0] = "V_a".to_owned();
    pass.render_target_names[1] = "V_b".to_owned();
    module.techniques.push(TechniqueDesc {
        name: "T".to_owned(),
        passes: vec![pass],
        ..TechniqueDesc::default()
    });

    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);
    assert!(!result.ok);
    assert!(result.log.contains("differently sized"));
    assert!(result.techniques.is_empty());
}

#[test]
fn viewport_falls_back_to_framebuffer_dimensions() {
    let mut module = module_with_entry_points();
    module.techniques.push(TechniqueDesc {
        name: "T".to_owned(),
        passes: vec![simple_pass()],
        ..TechniqueDesc::default()
    });

    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);
    assert!(result.ok, "log: {}", result.log);

    let technique = &result.techniques[0];
    let pass = &technique.passes[0];
    assert_eq!(pass.viewport.width, 1920.0);
    assert_eq!(pass.viewport.height, 1080.0);
    assert_eq!(pass.viewport.max_depth, 1.0);
    // RT0 defaults to the linear backbuffer view.
    assert_eq!(pass.render_targets[0], env.backbuffer_rtv[0]);

    // Per-technique GPU timing queries.
    assert_eq!(
        device.queries,
        vec![
            QueryKind::Timestamp,
            QueryKind::Timestamp,
            QueryKind::TimestampDisjoint
        ]
    );
}

#[test]
fn rtv_failure_downgrades_to_a_warning() {
    let mut module = module_with_entry_points();
    module.textures.push(texture("V_target", 16, 16));
    let mut pass = simple_pass();
    pass.render_target_names[0] = "V_target".to_owned();
    module.techniques.push(TechniqueDesc {
        name: "T".to_owned(),
        passes: vec![pass],
        ..TechniqueDesc::default()
    });

    let mut device = FakeDevice::new();
    device.fail_rtv_creation = true;
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);
    // The module still links; the pass just lost its RTV.
    assert!(result.ok, "log: {}", result.log);
    assert!(result.log.contains("warning: "));
    assert!(result.log.contains("0x80004005"));
    assert_eq!(result.techniques[0].passes[0].render_targets[0], None);
}

#[test]
fn fatal_texture_failure_marks_the_effect_failed() {
    let mut module = module_with_entry_points();
    module.textures.push(texture("V_tex", 8, 8));

    let mut device = FakeDevice::new();
    device.fail_texture_creation = true;
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);
    assert!(!result.ok);
    assert!(result.log.contains("error: 'ID3D11Device::CreateTexture2D'"));
    assert!(result.log.contains("0x80004005"));
}

#[test]
fn links_a_module_produced_by_the_hlsl_generator() {
    use prism_codegen::hlsl::HlslCodegen;
    use prism_codegen::Codegen;
    use prism_ir::{BaseType, SourceLocation, Type};

    let mut codegen = HlslCodegen::new();
    codegen.define_uniform(
        &SourceLocation::default(),
        UniformDesc {
            name: "intensity".to_owned(),
            ty: Type::vector(BaseType::Float, 4),
            ..UniformDesc::default()
        },
    );

    let mut module = Module::default();
    codegen.write_result(&mut module);
    module.entry_points = module_with_entry_points().entry_points;
    module.hlsl += &module_with_entry_points().hlsl;

    let mut device = FakeDevice::new();
    let loader = FakeLoader::with_versions(&[47]);
    let mut env = test_env();

    let result = link_effect(&module, &mut device, &loader, &mut env);
    assert!(result.ok, "log: {}", result.log);
    assert_eq!(device.buffers[0].0.byte_width, 16);
}
