//! Property tests for interning and uniform layout invariants.

use proptest::prelude::*;

use prism_codegen::spirv::SpirvCodegen;
use prism_codegen::Codegen;
use prism_ir::{BaseType, Constant, Module, SourceLocation, Type, UniformDesc};

fn numeric_base() -> impl Strategy<Value = BaseType> {
    prop_oneof![
        Just(BaseType::Bool),
        Just(BaseType::Int),
        Just(BaseType::Uint),
        Just(BaseType::Float),
    ]
}

fn value_type() -> impl Strategy<Value = Type> {
    (numeric_base(), 1u32..=4).prop_map(|(base, rows)| {
        if rows == 1 {
            Type::scalar(base)
        } else {
            Type::vector(base, rows)
        }
    })
}

fn uniform_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        (1u32..=4).prop_map(|rows| {
            if rows == 1 {
                Type::float()
            } else {
                Type::vector(BaseType::Float, rows)
            }
        }),
        Just(Type::int()),
        Just(Type::uint()),
        Just(Type::matrix(BaseType::Float, 4, 4)),
        (1i32..=8).prop_map(|len| {
            let mut ty = Type::vector(BaseType::Float, 4);
            ty.array_length = len;
            ty
        }),
    ]
}

/// Alignment required for a uniform of `size` bytes, per the std140-style
/// rules the backend applies.
fn alignment_for_size(size: u32) -> u32 {
    match size {
        4 => 4,
        8 => 8,
        12 => 16,
        _ => 16,
    }
}

proptest! {
    #[test]
    fn constant_interning_is_idempotent(ty in value_type(), lanes in proptest::array::uniform4(any::<u32>())) {
        let mut codegen = SpirvCodegen::new();
        let data = Constant::from_uints(&lanes[..ty.components() as usize]);

        let first = codegen.emit_constant(&ty, &data);
        let second = codegen.emit_constant(&ty, &data);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn repeated_modules_stay_self_consistent(tys in proptest::collection::vec(value_type(), 1..8)) {
        // Emitting one constant per type twice must not grow the module:
        // every declaration is interned.
        let mut codegen = SpirvCodegen::new();
        for ty in &tys {
            codegen.emit_constant(ty, &Constant::default());
        }
        let mut module_a = Module::default();
        codegen.write_result(&mut module_a);

        for ty in &tys {
            codegen.emit_constant(ty, &Constant::default());
        }
        let mut module_b = Module::default();
        codegen.write_result(&mut module_b);

        prop_assert_eq!(module_a.spirv, module_b.spirv);
    }

    #[test]
    fn uniform_offsets_are_aligned_and_contained(tys in proptest::collection::vec(uniform_type(), 1..16)) {
        let mut codegen = SpirvCodegen::new();
        for (index, ty) in tys.iter().enumerate() {
            codegen.define_uniform(
                &SourceLocation::default(),
                UniformDesc {
                    name: format!("u{index}"),
                    ty: *ty,
                    ..Default::default()
                },
            );
        }

        let mut module = Module::default();
        codegen.write_result(&mut module);

        prop_assert_eq!(module.total_uniform_size % 16, 0);

        let mut previous_end = 0u32;
        for uniform in &module.uniforms {
            prop_assert_eq!(uniform.offset % alignment_for_size(uniform.size), 0);
            prop_assert!(uniform.offset >= previous_end);
            prop_assert!(uniform.offset + uniform.size <= module.total_uniform_size);
            previous_end = uniform.offset + uniform.size;
        }
    }
}
