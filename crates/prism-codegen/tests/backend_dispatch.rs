//! Both backends driven through the [`new_codegen`] factory.
//!
//! The frontend selects its backend once and talks to a `dyn Codegen` from
//! then on; this exercises that seam with one IR sketch against both
//! generators.

use prism_codegen::{new_codegen, BackendKind, Codegen};
use prism_ir::{
    BaseType, Constant, FunctionDesc, Module, SourceLocation, Type, UniformDesc,
};

fn loc() -> SourceLocation {
    SourceLocation::default()
}

/// One uniform plus a minimal void function, fed through the trait object.
fn lower_sketch(codegen: &mut dyn Codegen) -> Module {
    codegen.define_uniform(
        &loc(),
        UniformDesc {
            name: "intensity".to_owned(),
            ty: Type::vector(BaseType::Float, 4),
            ..UniformDesc::default()
        },
    );

    let func = FunctionDesc {
        id: codegen.make_id(),
        name: "main".to_owned(),
        unique_name: "main".to_owned(),
        entry_block: codegen.make_id(),
        return_type: Type::void(),
        ..FunctionDesc::default()
    };
    codegen.enter_function(func.id, &func.return_type);
    codegen.define_function(&loc(), func.clone());
    codegen.enter_block(func.entry_block);
    codegen.emit_constant(&Type::float(), &Constant::scalar_f32(1.0));
    codegen.leave_block_and_return(0);
    codegen.leave_function();

    let mut module = Module::default();
    codegen.write_result(&mut module);
    module
}

#[test]
fn factory_builds_both_backends() {
    for kind in [BackendKind::Spirv, BackendKind::Hlsl] {
        let mut codegen = new_codegen(kind);
        let module = lower_sketch(codegen.as_mut());

        // The entity lists pass through identically regardless of backend.
        assert_eq!(module.uniforms.len(), 1);
        assert_eq!(module.uniforms[0].offset, 0);
        assert_eq!(module.uniforms[0].size, 16);
        assert_eq!(module.total_uniform_size, 16);

        match kind {
            BackendKind::Spirv => {
                assert_eq!(module.spirv[0], spirv::MAGIC_NUMBER);
                assert!(module.hlsl.is_empty());
            }
            BackendKind::Hlsl => {
                assert!(module.spirv.is_empty());
                assert!(module.hlsl.contains("uniform float4 intensity;"));
                assert!(module.hlsl.contains("void main()"));
            }
        }
    }
}
