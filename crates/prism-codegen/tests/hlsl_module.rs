//! Text-level tests over emitted HLSL modules.

use pretty_assertions::assert_eq;
use prism_codegen::hlsl::HlslCodegen;
use prism_codegen::{BinaryOp, Codegen, ControlFlags, UnaryOp};
use prism_ir::{
    BaseType, Constant, Expression, FunctionDesc, Intrinsic, Module, SamplerDesc, SourceLocation,
    StructDesc, StructMember, TextureDesc, Type, UniformDesc,
};

fn loc() -> SourceLocation {
    SourceLocation::default()
}

fn write_module(codegen: &mut HlslCodegen) -> Module {
    let mut module = Module::default();
    codegen.write_result(&mut module);
    module
}

fn begin_void_function(codegen: &mut HlslCodegen, name: &str) -> FunctionDesc {
    let func = FunctionDesc {
        id: codegen.make_id(),
        name: name.to_owned(),
        unique_name: name.to_owned(),
        entry_block: codegen.make_id(),
        return_type: Type::void(),
        ..Default::default()
    };
    codegen.enter_function(func.id, &func.return_type);
    codegen.define_function(&loc(), func.clone());
    codegen.enter_block(func.entry_block);
    func
}

#[test]
fn empty_effect_emits_empty_source() {
    let mut codegen = HlslCodegen::new();
    let module = write_module(&mut codegen);
    assert_eq!(module.hlsl, "");
    assert_eq!(module.total_uniform_size, 0);
}

#[test]
fn struct_members_carry_semantics() {
    let mut codegen = HlslCodegen::new();
    let id = codegen.make_id();
    codegen.define_struct(
        &loc(),
        StructDesc {
            id,
            name: "VsOut".to_owned(),
            unique_name: "VsOut".to_owned(),
            members: vec![
                StructMember {
                    name: "pos".to_owned(),
                    ty: Type::vector(BaseType::Float, 4),
                    semantic: "SV_POSITION".to_owned(),
                },
                StructMember {
                    name: "uv".to_owned(),
                    ty: Type::vector(BaseType::Float, 2),
                    semantic: "TEXCOORD0".to_owned(),
                },
            ],
        },
    );

    let module = write_module(&mut codegen);
    assert!(module.hlsl.contains("struct VsOut"));
    assert!(module.hlsl.contains("float4 pos : SV_POSITION;"));
    assert!(module.hlsl.contains("float2 uv : TEXCOORD0;"));
}

#[test]
fn uniforms_use_d3d_register_packing() {
    let mut codegen = HlslCodegen::new();

    for (name, ty) in [
        ("a", Type::float()),
        ("b", Type::vector(BaseType::Float, 3)),
        ("c", Type::float()),
        ("d", Type::vector(BaseType::Float, 4)),
    ] {
        codegen.define_uniform(
            &loc(),
            UniformDesc {
                name: name.to_owned(),
                ty,
                ..Default::default()
            },
        );
    }

    let module = write_module(&mut codegen);

    // a packs at 0, b fits in the same register at 4, c starts the next
    // register, d must not straddle and lands on the one after.
    let offsets: Vec<u32> = module.uniforms.iter().map(|u| u.offset).collect();
    assert_eq!(offsets, vec![0, 4, 16, 32]);
    assert_eq!(module.total_uniform_size, 48);

    assert!(module.hlsl.contains("uniform float a;"));
    assert!(module.hlsl.contains("uniform float3 b;"));
}

#[test]
fn sampler_declarations_expand_to_texture_and_state() {
    let mut codegen = HlslCodegen::new();

    codegen.define_texture(
        &loc(),
        TextureDesc {
            name: "tex".to_owned(),
            unique_name: "V_tex".to_owned(),
            width: 16,
            height: 16,
            levels: 1,
            ..Default::default()
        },
    );
    codegen.define_sampler(
        &loc(),
        SamplerDesc {
            name: "samp".to_owned(),
            unique_name: "V_samp".to_owned(),
            texture_name: "V_tex".to_owned(),
            ..Default::default()
        },
    );

    let module = write_module(&mut codegen);

    assert!(module
        .hlsl
        .starts_with("struct __sampler2D { Texture2D t; SamplerState s; };"));
    assert!(module.hlsl.contains("Texture2D __V_samp_t : register(t0);"));
    assert!(module.hlsl.contains("SamplerState __V_samp_s : register(s0);"));
    assert!(module
        .hlsl
        .contains("static const __sampler2D V_samp = { __V_samp_t, __V_samp_s };"));
    assert_eq!(module.samplers[0].binding, 0);
}

#[test]
fn expressions_become_const_bindings() {
    let mut codegen = HlslCodegen::new();
    begin_void_function(&mut codegen, "main");

    let one = codegen.emit_constant(&Type::float(), &Constant::scalar_f32(1.0));
    let two = codegen.emit_constant(&Type::float(), &Constant::scalar_f32(2.0));
    let sum = codegen.emit_binary_op(
        &SourceLocation::new("effect.fx", 42, 5),
        BinaryOp::Add,
        &Type::float(),
        &Type::float(),
        one,
        two,
    );
    let neg = codegen.emit_unary_op(&loc(), UnaryOp::Negate, &Type::float(), sum);
    codegen.emit_ternary_op(&loc(), &Type::float(), one, neg, sum);
    codegen.leave_block_and_return(0);
    codegen.leave_function();

    let module = write_module(&mut codegen);

    assert!(module.hlsl.contains(&format!("const float _{one} = (1.0);")));
    assert!(module.hlsl.contains("#line 42 \"effect.fx\""));
    assert!(module
        .hlsl
        .contains(&format!("const float _{sum} = _{one} + _{two};")));
    assert!(module.hlsl.contains(&format!("const float _{neg} = -_{sum};")));
    assert!(module
        .hlsl
        .contains(&format!("= _{one} ? _{neg} : _{sum};")));
    assert!(module.hlsl.contains("return;"));
}

#[test]
fn access_chains_render_as_subscripts_and_swizzles() {
    let mut codegen = HlslCodegen::new();
    begin_void_function(&mut codegen, "main");

    let vec_ty = Type::vector(BaseType::Float, 4);
    let base = codegen.define_variable(&loc(), &vec_ty, Some("value"), false, 0);

    let mut chain = Expression::lvalue(loc(), base, vec_ty);
    chain.add_swizzle(&[2, 0]);
    let loaded = codegen.emit_load(&chain);

    let mut store_chain = Expression::lvalue(loc(), base, vec_ty);
    store_chain.add_swizzle(&[1]);
    codegen.emit_store(&store_chain, loaded, &Type::float());

    codegen.leave_block_and_return(0);
    codegen.leave_function();

    let module = write_module(&mut codegen);
    assert!(module.hlsl.contains(&format!("const float2 _{loaded} = value.zx;")));
    assert!(module.hlsl.contains(&format!("value.y = _{loaded};")));
}

#[test]
fn if_statement_stitches_blocks_with_attributes() {
    let mut codegen = HlslCodegen::new();
    let func = begin_void_function(&mut codegen, "main");

    let condition = codegen.emit_constant(&Type::bool_(), &Constant::scalar_bool(true));
    let true_block = codegen.make_id();
    let false_block = codegen.make_id();
    let merge_block = codegen.make_id();

    codegen.leave_block_and_branch_conditional(condition, true_block, false_block);

    codegen.enter_block(true_block);
    codegen.emit_constant(&Type::float(), &Constant::scalar_f32(1.0));
    codegen.leave_block_and_branch(merge_block);

    codegen.enter_block(false_block);
    codegen.emit_constant(&Type::float(), &Constant::scalar_f32(2.0));
    codegen.leave_block_and_branch(merge_block);

    codegen.emit_if(
        &loc(),
        condition,
        func.entry_block,
        true_block,
        false_block,
        merge_block,
        ControlFlags::DONT_FLATTEN,
    );
    codegen.enter_block(merge_block);
    codegen.leave_block_and_return(0);
    codegen.leave_function();

    let module = write_module(&mut codegen);
    assert!(module.hlsl.contains(&format!("[branch] if (_{condition})")));
    assert!(module.hlsl.contains("else"));
    assert!(module.hlsl.contains("return;"));
}

#[test]
fn while_loop_lifts_condition_out_of_the_condition_block() {
    let mut codegen = HlslCodegen::new();
    let func = begin_void_function(&mut codegen, "main");

    let header = codegen.make_id();
    let condition_block = codegen.make_id();
    let body = codegen.make_id();
    let continue_block = codegen.make_id();
    let merge = codegen.make_id();

    codegen.leave_block_and_branch(header);
    codegen.enter_block(header);
    codegen.leave_block_and_branch(condition_block);

    codegen.enter_block(condition_block);
    let condition = codegen.emit_constant(&Type::bool_(), &Constant::scalar_bool(true));
    codegen.leave_block_and_branch_conditional(condition, body, merge);

    codegen.enter_block(body);
    codegen.emit_constant(&Type::float(), &Constant::scalar_f32(3.0));
    codegen.leave_block_and_branch(continue_block);

    codegen.enter_block(continue_block);
    codegen.leave_block_and_branch(header);

    codegen.emit_loop(
        &loc(),
        condition,
        func.entry_block,
        header,
        condition_block,
        body,
        continue_block,
        merge,
        ControlFlags::DONT_UNROLL,
    );
    codegen.enter_block(merge);
    codegen.leave_block_and_return(0);
    codegen.leave_function();

    let module = write_module(&mut codegen);

    // The pre-loop copy declares the condition mutable; the in-loop tail
    // re-assigns it.
    assert!(module.hlsl.contains(&format!("bool _{condition} = (true);")));
    assert!(module.hlsl.contains(&format!("[loop] while (_{condition})")));
    assert!(module.hlsl.contains(&format!("_{condition} = (true);")));
}

#[test]
fn switch_groups_shared_case_labels() {
    let mut codegen = HlslCodegen::new();
    let func = begin_void_function(&mut codegen, "main");

    let selector = codegen.emit_constant(&Type::int(), &Constant::scalar_i32(2));
    let shared = codegen.make_id();
    let merge = codegen.make_id();

    codegen.leave_block_and_switch(selector);
    codegen.enter_block(shared);
    codegen.emit_constant(&Type::float(), &Constant::scalar_f32(9.0));
    codegen.leave_block_and_branch(merge);

    codegen.emit_switch(
        &loc(),
        selector,
        func.entry_block,
        merge,
        &[1, shared, 3, shared],
        merge,
        ControlFlags::empty(),
    );
    codegen.enter_block(merge);
    codegen.leave_block_and_return(0);
    codegen.leave_function();

    let module = write_module(&mut codegen);
    assert!(module.hlsl.contains(&format!("switch (_{selector})")));
    assert!(module.hlsl.contains("case 1:\ncase 3:\n"));
    assert!(module.hlsl.contains("break;"));
    // Default equals the merge block, so no default clause is emitted.
    assert!(!module.hlsl.contains("default:"));
}

#[test]
fn phi_lifts_short_circuit_into_a_guarded_assignment() {
    let mut codegen = HlslCodegen::new();
    let func = begin_void_function(&mut codegen, "main");

    // lhs && rhs: evaluate rhs only when lhs holds.
    let lhs = codegen.emit_constant(&Type::bool_(), &Constant::scalar_bool(true));
    let rhs_block = codegen.make_id();
    let merge = codegen.make_id();

    codegen.leave_block_and_branch_conditional(lhs, rhs_block, merge);

    codegen.enter_block(rhs_block);
    let rhs = codegen.emit_constant(&Type::bool_(), &Constant::scalar_bool(false));
    codegen.leave_block_and_branch(merge);

    codegen.enter_block(merge);
    let phi = codegen.emit_phi(&Type::bool_(), lhs, func.entry_block, rhs, rhs_block);

    codegen.leave_block_and_return(0);
    codegen.leave_function();

    let module = write_module(&mut codegen);
    assert!(module.hlsl.contains(&format!("bool _{phi} = _{lhs};")));
    assert!(module.hlsl.contains(&format!("if (_{lhs})")));
    assert!(module.hlsl.contains(&format!("_{phi} = _{rhs};")));
}

#[test]
fn intrinsics_spell_hlsl_names_and_sampler_forms() {
    let mut codegen = HlslCodegen::new();

    codegen.define_texture(
        &loc(),
        TextureDesc {
            unique_name: "V_tex".to_owned(),
            width: 8,
            height: 8,
            levels: 1,
            ..Default::default()
        },
    );
    let sampler = codegen.define_sampler(
        &loc(),
        SamplerDesc {
            unique_name: "V_samp".to_owned(),
            texture_name: "V_tex".to_owned(),
            ..Default::default()
        },
    );

    begin_void_function(&mut codegen, "main");

    let float4 = Type::vector(BaseType::Float, 4);
    let coord = codegen.emit_constant(
        &Type::vector(BaseType::Float, 2),
        &Constant::from_floats(&[0.5, 0.5]),
    );

    let sampler_arg = Expression::rvalue(loc(), sampler, Type::sampler());
    let coord_arg = Expression::rvalue(loc(), coord, Type::vector(BaseType::Float, 2));
    codegen.emit_call_intrinsic(&loc(), Intrinsic::Tex2d, &float4, &[sampler_arg, coord_arg]);

    let one = codegen.emit_constant(&Type::float(), &Constant::scalar_f32(1.0));
    let value = Expression::rvalue(loc(), one, Type::float());
    codegen.emit_call_intrinsic(&loc(), Intrinsic::Saturate, &Type::float(), &[value]);

    codegen.leave_block_and_return(0);
    codegen.leave_function();

    let module = write_module(&mut codegen);
    assert!(module.hlsl.contains(".t.Sample("));
    assert!(module.hlsl.contains(".s, "));
    assert!(module.hlsl.contains("saturate("));
}

#[test]
fn functions_carry_parameter_and_return_semantics() {
    let mut codegen = HlslCodegen::new();

    let func = FunctionDesc {
        id: codegen.make_id(),
        name: "PS_Main".to_owned(),
        unique_name: "PS_Main".to_owned(),
        entry_block: codegen.make_id(),
        return_type: Type::vector(BaseType::Float, 4),
        return_semantic: "SV_TARGET".to_owned(),
        ..Default::default()
    };

    codegen.enter_function(func.id, &func.return_type);
    codegen.define_parameter(
        &loc(),
        StructMember {
            name: "uv".to_owned(),
            ty: Type::vector(BaseType::Float, 2),
            semantic: "TEXCOORD0".to_owned(),
        },
    );
    codegen.define_function(&loc(), func.clone());
    codegen.enter_block(func.entry_block);
    let zero = codegen.emit_constant(&Type::vector(BaseType::Float, 4), &Constant::default());
    codegen.leave_block_and_return(zero);
    codegen.leave_function();

    let entry = codegen.create_entry_point(&func, true);
    assert_eq!(entry, func.id);

    let module = write_module(&mut codegen);
    assert!(module
        .hlsl
        .contains("float4 PS_Main(float2 uv : TEXCOORD0) : SV_TARGET"));
    assert_eq!(module.entry_points.len(), 1);
    assert_eq!(module.entry_points[0].name, "PS_Main");
}
