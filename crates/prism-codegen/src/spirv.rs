//! SPIR-V code generator.
//!
//! Produces a logical-addressing Shader module: header, capabilities,
//! `SPV_GOOGLE_hlsl_functionality1`, the GLSL.std.450 import, memory model,
//! entry points, debug info, annotations, types/constants/global variables
//! and function bodies, in that order. Types and constants are interned so
//! structurally equal declarations share one id; uniforms are packed into a
//! lazily created `$Globals` block.

mod instruction;
mod layout;

use std::collections::BTreeMap;

use prism_ir::{
    BaseType, ChainOp, Constant, EntryPoint, Expression, FunctionDesc, Id, Intrinsic, Module,
    Qualifiers, SamplerDesc, ShaderStage, SourceLocation, StructDesc, StructMember, TechniqueDesc,
    TextureDesc, Type, UniformDesc,
};
use spirv::{
    AddressingModel, BuiltIn, Capability, Decoration, Dim, ExecutionModel, FunctionControl, GLOp,
    ImageFormat, ImageOperands, LoopControl, MemoryModel, Op, SelectionControl, StorageClass,
};

use self::instruction::{write_block, Instruction};
use self::layout::uniform_size_align;
use crate::{align_up, BinaryOp, Codegen, CodegenState, ControlFlags, UnaryOp};

#[derive(Debug, Default)]
struct FunctionBlocks {
    declaration: Vec<Instruction>,
    variables: Vec<Instruction>,
    definition: Vec<Instruction>,
    return_type: Type,
    param_types: Vec<Type>,
}

/// SPIR-V implementation of the [`Codegen`] contract.
///
/// One instance serves one compile; the `$Globals` block, interning tables
/// and binding counters are interior state and must not be shared.
pub struct SpirvCodegen {
    state: CodegenState,

    capabilities: Vec<Capability>,
    entries: Vec<Instruction>,
    debug_a: Vec<Instruction>,
    debug_b: Vec<Instruction>,
    annotations: Vec<Instruction>,
    types_and_constants: Vec<Instruction>,
    variables: Vec<Instruction>,

    functions: Vec<FunctionBlocks>,
    current_function: Option<usize>,
    /// Per-block instruction buffers, keyed by label id. Structure hints
    /// fold constituent blocks into their merge block's buffer.
    blocks: BTreeMap<Id, Vec<Instruction>>,
    last_block: Id,

    type_lookup: Vec<(Type, Id)>,
    function_type_lookup: Vec<(Type, Vec<Type>, Id)>,
    constant_lookup: Vec<(Type, Constant, Id)>,
    string_lookup: Vec<(String, Id)>,
    semantic_locations: Vec<(String, u32)>,

    next_sampler_binding: u32,
    next_semantic_location: u32,

    glsl_ext: Id,
    global_ubo_type: Id,
    global_ubo_variable: Id,
    global_ubo_offset: u32,
}

impl Default for SpirvCodegen {
    fn default() -> Self {
        Self::new()
    }
}

impl SpirvCodegen {
    pub fn new() -> Self {
        let mut state = CodegenState::new();
        let glsl_ext = state.make_id();
        Self {
            state,
            capabilities: Vec::new(),
            entries: Vec::new(),
            debug_a: Vec::new(),
            debug_b: Vec::new(),
            annotations: Vec::new(),
            types_and_constants: Vec::new(),
            variables: Vec::new(),
            functions: Vec::new(),
            current_function: None,
            blocks: BTreeMap::new(),
            last_block: 0,
            type_lookup: Vec::new(),
            function_type_lookup: Vec::new(),
            constant_lookup: Vec::new(),
            string_lookup: Vec::new(),
            semantic_locations: Vec::new(),
            next_sampler_binding: 0,
            next_semantic_location: 10,
            glsl_ext,
            global_ubo_type: 0,
            global_ubo_variable: 0,
            global_ubo_offset: 0,
        }
    }

    fn push_current(&mut self, ins: Instruction) {
        if !self.state.is_in_block() {
            // Instructions after a terminator are dropped until the next
            // enter_block.
            return;
        }
        self.blocks
            .entry(self.state.current_block)
            .or_default()
            .push(ins);
    }

    fn take_block(&mut self, block: Id) -> Vec<Instruction> {
        self.blocks.remove(&block).unwrap_or_default()
    }

    fn add_capability(&mut self, capability: Capability) {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
    }

    fn source_string(&mut self, path: &str) -> Id {
        if let Some((_, id)) = self.string_lookup.iter().find(|(s, _)| s == path) {
            return *id;
        }
        let id = self.state.make_id();
        self.debug_a
            .push(Instruction::new(Op::String).with_result(id).add_string(path));
        self.string_lookup.push((path.to_owned(), id));
        id
    }

    fn line_instruction(&mut self, loc: &SourceLocation) -> Option<Instruction> {
        if loc.is_empty() {
            return None;
        }
        let file = self.source_string(&loc.source);
        Some(
            Instruction::new(Op::Line)
                .add(file)
                .add(loc.line)
                .add(loc.column),
        )
    }

    fn add_location(&mut self, loc: &SourceLocation) {
        if let Some(line) = self.line_instruction(loc) {
            self.push_current(line);
        }
    }

    fn add_name(&mut self, id: Id, name: &str) {
        self.debug_b
            .push(Instruction::new(Op::Name).add(id).add_string(name));
    }

    fn add_member_name(&mut self, id: Id, member_index: u32, name: &str) {
        self.debug_b.push(
            Instruction::new(Op::MemberName)
                .add(id)
                .add(member_index)
                .add_string(name),
        );
    }

    fn add_decoration(&mut self, id: Id, decoration: Decoration, values: &[u32]) {
        self.annotations.push(
            Instruction::new(Op::Decorate)
                .add(id)
                .add(decoration as u32)
                .add_all(values.iter().copied()),
        );
    }

    fn add_member_decoration(
        &mut self,
        id: Id,
        member_index: u32,
        decoration: Decoration,
        values: &[u32],
    ) {
        self.annotations.push(
            Instruction::new(Op::MemberDecorate)
                .add(id)
                .add(member_index)
                .add(decoration as u32)
                .add_all(values.iter().copied()),
        );
    }

    fn add_builtin(&mut self, id: Id, builtin: BuiltIn) {
        self.add_decoration(id, Decoration::BuiltIn, &[builtin as u32]);
    }

    /// Interned type conversion. Structurally equal types (and pointer
    /// types with the same storage-relevant qualifiers) share one id.
    fn convert_type(&mut self, info: &Type) -> Id {
        if let Some((_, id)) = self.type_lookup.iter().find(|(t, _)| t.layout_eq(info)) {
            return *id;
        }

        let type_id;
        if info.is_pointer {
            let mut elem = *info;
            elem.is_pointer = false;
            elem.is_input = false;
            elem.is_output = false;
            let elem_id = self.convert_type(&elem);

            let mut storage = StorageClass::Function;
            if info.is_input {
                storage = StorageClass::Input;
            }
            if info.is_output {
                storage = StorageClass::Output;
            }
            if info.has(Qualifiers::STATIC) {
                storage = StorageClass::Private;
            }
            if info.has(Qualifiers::UNIFORM) {
                storage = if info.is_texture() || info.is_sampler() {
                    StorageClass::UniformConstant
                } else {
                    StorageClass::Uniform
                };
            }

            type_id = self.state.make_id();
            self.types_and_constants.push(
                Instruction::new(Op::TypePointer)
                    .with_result(type_id)
                    .add(storage as u32)
                    .add(elem_id),
            );
        } else if info.is_array() {
            let elem_id = self.convert_type(&info.array_element());

            if info.array_length > 0 {
                let length =
                    self.emit_constant(&Type::uint(), &Constant::scalar_u32(info.array_length as u32));
                type_id = self.state.make_id();
                self.types_and_constants.push(
                    Instruction::new(Op::TypeArray)
                        .with_result(type_id)
                        .add(elem_id)
                        .add(length),
                );
            } else {
                type_id = self.state.make_id();
                self.types_and_constants.push(
                    Instruction::new(Op::TypeRuntimeArray)
                        .with_result(type_id)
                        .add(elem_id),
                );
            }
        } else if info.is_matrix() {
            // An MxN matrix becomes M column vectors of N elements; 1xN
            // collapses to the column vector type itself.
            let mut column = *info;
            column.rows = info.cols;
            column.cols = 1;
            let column_id = self.convert_type(&column);

            if info.rows == 1 {
                self.type_lookup.push((*info, column_id));
                return column_id;
            }

            type_id = self.state.make_id();
            self.types_and_constants.push(
                Instruction::new(Op::TypeMatrix)
                    .with_result(type_id)
                    .add(column_id)
                    .add(info.rows),
            );
        } else if info.is_vector() {
            let mut scalar = *info;
            scalar.rows = 1;
            scalar.cols = 1;
            let scalar_id = self.convert_type(&scalar);

            type_id = self.state.make_id();
            self.types_and_constants.push(
                Instruction::new(Op::TypeVector)
                    .with_result(type_id)
                    .add(scalar_id)
                    .add(info.rows),
            );
        } else {
            match info.base {
                BaseType::Void => {
                    type_id = self.state.make_id();
                    self.types_and_constants
                        .push(Instruction::new(Op::TypeVoid).with_result(type_id));
                }
                BaseType::Bool => {
                    type_id = self.state.make_id();
                    self.types_and_constants
                        .push(Instruction::new(Op::TypeBool).with_result(type_id));
                }
                BaseType::Int => {
                    type_id = self.state.make_id();
                    self.types_and_constants.push(
                        Instruction::new(Op::TypeInt)
                            .with_result(type_id)
                            .add(32)
                            .add(1),
                    );
                }
                BaseType::Uint => {
                    type_id = self.state.make_id();
                    self.types_and_constants.push(
                        Instruction::new(Op::TypeInt)
                            .with_result(type_id)
                            .add(32)
                            .add(0),
                    );
                }
                BaseType::Float => {
                    type_id = self.state.make_id();
                    self.types_and_constants.push(
                        Instruction::new(Op::TypeFloat)
                            .with_result(type_id)
                            .add(32),
                    );
                }
                BaseType::Struct => {
                    // Struct types are declared by define_struct; their id
                    // is the definition id.
                    return info.definition;
                }
                BaseType::Texture => {
                    let sampled = self.convert_type(&Type::float());
                    type_id = self.state.make_id();
                    self.types_and_constants.push(
                        Instruction::new(Op::TypeImage)
                            .with_result(type_id)
                            .add(sampled)
                            .add(Dim::Dim2D as u32)
                            .add(0) // not a depth image
                            .add(0) // not arrayed
                            .add(0) // not multi-sampled
                            .add(1) // used with a sampler
                            .add(ImageFormat::Unknown as u32),
                    );
                }
                BaseType::Sampler => {
                    let image =
                        self.convert_type(&Type::texture().with_qualifiers(Qualifiers::UNIFORM));
                    type_id = self.state.make_id();
                    self.types_and_constants.push(
                        Instruction::new(Op::TypeSampledImage)
                            .with_result(type_id)
                            .add(image),
                    );
                }
                BaseType::String => return 0,
            }
        }

        self.type_lookup.push((*info, type_id));
        type_id
    }

    fn convert_function_type(&mut self, return_type: &Type, param_types: &[Type]) -> Id {
        if let Some((_, _, id)) = self
            .function_type_lookup
            .iter()
            .find(|(ret, params, _)| ret == return_type && params.as_slice() == param_types)
        {
            return *id;
        }

        let return_id = self.convert_type(return_type);
        let param_ids: Vec<Id> = param_types.iter().map(|p| self.convert_type(p)).collect();

        let id = self.state.make_id();
        self.types_and_constants.push(
            Instruction::new(Op::TypeFunction)
                .with_result(id)
                .add(return_id)
                .add_all(param_ids),
        );
        self.function_type_lookup
            .push((*return_type, param_types.to_vec(), id));
        id
    }

    fn define_variable_raw(
        &mut self,
        id: Id,
        loc: &SourceLocation,
        ty: &Type,
        name: Option<&str>,
        storage: StorageClass,
        initializer: Id,
    ) {
        let mut ty = *ty;
        ty.is_pointer = true;
        // Keep the pointer type's storage class in sync with the variable.
        match storage {
            StorageClass::Private => ty.qualifiers |= Qualifiers::STATIC,
            StorageClass::Uniform | StorageClass::UniformConstant => {
                ty.qualifiers |= Qualifiers::UNIFORM
            }
            StorageClass::Input => ty.is_input = true,
            StorageClass::Output => ty.is_output = true,
            _ => {}
        }

        let type_id = self.convert_type(&ty);
        let line = self.line_instruction(loc);

        let mut ins = Instruction::new(Op::Variable)
            .with_type(type_id)
            .with_result(id)
            .add(storage as u32);
        if initializer != 0 {
            ins = ins.add(initializer);
        }

        let buffer = if storage == StorageClass::Function {
            match self.current_function {
                Some(index) => &mut self.functions[index].variables,
                None => &mut self.variables,
            }
        } else {
            &mut self.variables
        };
        if let Some(line) = line {
            buffer.push(line);
        }
        buffer.push(ins);

        if let Some(name) = name {
            if !name.is_empty() {
                self.add_name(id, name);
            }
        }
    }

    fn create_global_ubo(&mut self) {
        let members = self
            .state
            .uniforms
            .iter()
            .map(|u| StructMember {
                name: u.name.clone(),
                ty: u.ty,
                semantic: String::new(),
            })
            .collect();
        let info = StructDesc {
            id: self.global_ubo_type,
            name: "$Globals".to_owned(),
            unique_name: "$Globals".to_owned(),
            members,
        };
        self.define_struct(&SourceLocation::default(), info);

        self.add_decoration(self.global_ubo_type, Decoration::Block, &[]);
        self.add_decoration(self.global_ubo_type, Decoration::Binding, &[0]);
        self.add_decoration(self.global_ubo_type, Decoration::DescriptorSet, &[0]);

        let mut ty = Type::void();
        ty.base = BaseType::Struct;
        ty.qualifiers = Qualifiers::UNIFORM;
        ty.definition = self.global_ubo_type;
        self.define_variable_raw(
            self.global_ubo_variable,
            &SourceLocation::default(),
            &ty,
            Some("$Globals"),
            StorageClass::Uniform,
            0,
        );
    }

    fn semantic_to_builtin(semantic: &str, is_pixel_stage: bool) -> Option<BuiltIn> {
        match semantic {
            "SV_POSITION" => Some(if is_pixel_stage {
                BuiltIn::FragCoord
            } else {
                BuiltIn::Position
            }),
            "SV_POINTSIZE" => Some(BuiltIn::PointSize),
            "SV_DEPTH" => Some(BuiltIn::FragDepth),
            "VERTEXID" | "SV_VERTEXID" => Some(BuiltIn::VertexId),
            _ => None,
        }
    }

    fn location_for_semantic(&mut self, semantic: &str) -> u32 {
        for prefix in ["SV_TARGET", "COLOR", "TEXCOORD"] {
            if let Some(rest) = semantic.strip_prefix(prefix) {
                return rest.parse().unwrap_or(0);
            }
        }
        if let Some((_, location)) = self
            .semantic_locations
            .iter()
            .find(|(known, _)| known == semantic)
        {
            return *location;
        }
        let location = self.next_semantic_location;
        self.next_semantic_location += 1;
        self.semantic_locations.push((semantic.to_owned(), location));
        location
    }

    /// Create one stage-interface variable with its builtin or location
    /// decoration and interpolation qualifiers.
    fn create_interface_variable(
        &mut self,
        member: &StructMember,
        is_pixel_stage: bool,
        output: bool,
        interface_ids: &mut Vec<Id>,
    ) -> Id {
        let mut ty = member.ty;
        ty.is_pointer = true;
        if output {
            ty.is_output = true;
        } else {
            ty.is_input = true;
        }

        let id = self.state.make_id();
        let storage = if output {
            StorageClass::Output
        } else {
            StorageClass::Input
        };
        self.define_variable_raw(id, &SourceLocation::default(), &ty, None, storage, 0);

        if let Some(builtin) = Self::semantic_to_builtin(&member.semantic, is_pixel_stage) {
            self.add_builtin(id, builtin);
        } else {
            let location = self.location_for_semantic(&member.semantic);
            self.add_decoration(id, Decoration::Location, &[location]);
        }

        if member.ty.has(Qualifiers::NOPERSPECTIVE) {
            self.add_decoration(id, Decoration::NoPerspective, &[]);
        }
        if member.ty.has(Qualifiers::CENTROID) {
            self.add_decoration(id, Decoration::Centroid, &[]);
        }
        if member.ty.has(Qualifiers::NOINTERPOLATION) {
            self.add_decoration(id, Decoration::Flat, &[]);
        }

        interface_ids.push(id);
        id
    }

    fn struct_members(&self, ty: &Type) -> Vec<StructMember> {
        self.state
            .find_struct(ty.definition)
            .map(|s| s.members.clone())
            .unwrap_or_default()
    }

    fn op_load(&mut self, ty: &Type, pointer: Id) -> Id {
        let mut value_ty = *ty;
        value_ty.is_pointer = false;
        let type_id = self.convert_type(&value_ty);
        let result = self.state.make_id();
        self.push_current(
            Instruction::new(Op::Load)
                .with_type(type_id)
                .with_result(result)
                .add(pointer),
        );
        result
    }

    fn op_store(&mut self, pointer: Id, value: Id) {
        self.push_current(Instruction::new(Op::Store).add(pointer).add(value));
    }

    fn value_instruction(&mut self, op: Op, ty: &Type, operands: &[u32]) -> Id {
        let type_id = self.convert_type(ty);
        let result = self.state.make_id();
        self.push_current(
            Instruction::new(op)
                .with_type(type_id)
                .with_result(result)
                .add_all(operands.iter().copied()),
        );
        result
    }

    fn splat_constant(&mut self, ty: &Type, value: f32) -> Id {
        let mut data = Constant::default();
        for lane in 0..ty.components().max(1) as usize {
            match ty.base {
                BaseType::Float => data.set_float(lane, value),
                _ => data.set_uint(lane, value as u32),
            }
        }
        self.emit_constant(ty, &data)
    }

    fn glsl_inst(&mut self, glop: GLOp, ty: &Type, args: &[u32]) -> Id {
        let glsl_ext = self.glsl_ext;
        let type_id = self.convert_type(ty);
        let result = self.state.make_id();
        self.push_current(
            Instruction::new(Op::ExtInst)
                .with_type(type_id)
                .with_result(result)
                .add(glsl_ext)
                .add(glop as u32)
                .add_all(args.iter().copied()),
        );
        result
    }

    /// Store `value` into a fresh function-local temporary and return the
    /// pointer id, so dynamic indexing can go through an access chain.
    fn spill_to_temporary(&mut self, ty: &Type, value: Id) -> Id {
        let mut ty = *ty;
        ty.qualifiers &= !(Qualifiers::STATIC | Qualifiers::UNIFORM);
        ty.is_input = false;
        ty.is_output = false;

        let id = self.state.make_id();
        self.define_variable_raw(
            id,
            &SourceLocation::default(),
            &ty,
            None,
            StorageClass::Function,
            0,
        );
        self.op_store(id, value);
        id
    }

    fn selection_control(flags: ControlFlags) -> u32 {
        let mut control = SelectionControl::NONE;
        if flags.contains(ControlFlags::FLATTEN) {
            control |= SelectionControl::FLATTEN;
        }
        if flags.contains(ControlFlags::DONT_FLATTEN) {
            control |= SelectionControl::DONT_FLATTEN;
        }
        control.bits()
    }

    fn loop_control(flags: ControlFlags) -> u32 {
        let mut control = LoopControl::NONE;
        if flags.contains(ControlFlags::UNROLL) {
            control |= LoopControl::UNROLL;
        }
        if flags.contains(ControlFlags::DONT_UNROLL) {
            control |= LoopControl::DONT_UNROLL;
        }
        control.bits()
    }

    /// Apply one post-load cast step to `value`.
    fn lower_cast(&mut self, from: &Type, to: &Type, mut value: Id) -> Id {
        if from.base != to.base {
            let mut converted = *from;
            converted.base = to.base;

            if from.is_boolean() {
                // bool -> numeric through a constant select.
                let mut true_data = Constant::default();
                for lane in 0..to.components().max(1) as usize {
                    true_data.set_uint(
                        lane,
                        if to.is_floating_point() {
                            0x3f80_0000
                        } else {
                            1
                        },
                    );
                }
                let true_constant = self.emit_constant(&converted, &true_data);
                let false_constant = self.emit_constant(&converted, &Constant::default());
                value =
                    self.value_instruction(Op::Select, &converted, &[value, true_constant, false_constant]);
            } else {
                match to.base {
                    BaseType::Bool => {
                        let zero = self.emit_constant(from, &Constant::default());
                        let op = if from.is_floating_point() {
                            Op::FOrdNotEqual
                        } else {
                            Op::INotEqual
                        };
                        value = self.value_instruction(op, &converted, &[value, zero]);
                    }
                    BaseType::Int => {
                        let op = if from.is_floating_point() {
                            Op::ConvertFToS
                        } else {
                            Op::Bitcast
                        };
                        value = self.value_instruction(op, &converted, &[value]);
                    }
                    BaseType::Uint => {
                        let op = if from.is_floating_point() {
                            Op::ConvertFToU
                        } else {
                            Op::Bitcast
                        };
                        value = self.value_instruction(op, &converted, &[value]);
                    }
                    BaseType::Float => {
                        let op = if from.is_signed() {
                            Op::ConvertSToF
                        } else {
                            Op::ConvertUToF
                        };
                        value = self.value_instruction(op, &converted, &[value]);
                    }
                    _ => {}
                }
            }
        }

        if to.components() > from.components() {
            let copies = (to.components() / from.components().max(1)).max(1);
            let operands: Vec<u32> = std::iter::repeat(value).take(copies as usize).collect();
            value = self.value_instruction(Op::CompositeConstruct, to, &operands);
        } else if from.components() > to.components() {
            if to.is_scalar() {
                value = self.value_instruction(Op::CompositeExtract, to, &[value, 0]);
            } else {
                let mut operands = vec![value, value];
                operands.extend(0..to.components());
                value = self.value_instruction(Op::VectorShuffle, to, &operands);
            }
        }

        value
    }

    /// Fold the leading run of index operations of an addressable chain
    /// into one `OpAccessChain`. Returns the resulting pointer, the pointee
    /// type and the number of chain ops consumed.
    fn lower_access_chain(&mut self, chain: &Expression) -> (Id, Type, usize) {
        let mut pointer = chain.base;
        let mut consumed = 0;
        let mut pointee = chain.ops.first().map_or(chain.ty, |op| *op.source_type());

        if matches!(chain.ops.first(), Some(ChainOp::Index { .. })) {
            let mut indices = Vec::new();
            for op in &chain.ops {
                let ChainOp::Index { index, from, to } = op else {
                    break;
                };
                // A 1xN matrix already collapsed to a vector, so its row
                // index is skipped.
                if !(from.rows == 1 && from.cols > 1) {
                    indices.push(*index);
                }
                pointee = *to;
                consumed += 1;
            }

            if !indices.is_empty() {
                let mut pointer_ty = pointee;
                pointer_ty.is_pointer = true;
                let type_id = self.convert_type(&pointer_ty);
                let result = self.state.make_id();
                self.push_current(
                    Instruction::new(Op::AccessChain)
                        .with_type(type_id)
                        .with_result(result)
                        .add(pointer)
                        .add_all(indices),
                );
                pointer = result;
            }
        }

        (pointer, pointee, consumed)
    }
}

impl Codegen for SpirvCodegen {
    fn make_id(&mut self) -> Id {
        self.state.make_id()
    }

    fn define_struct(&mut self, loc: &SourceLocation, mut info: StructDesc) -> Id {
        if info.id == 0 {
            info.id = self.state.make_id();
        }

        let member_tys: Vec<Type> = info.members.iter().map(|m| m.ty).collect();
        let member_types: Vec<Id> = member_tys.iter().map(|ty| self.convert_type(ty)).collect();

        if let Some(line) = self.line_instruction(loc) {
            self.types_and_constants.push(line);
        }
        self.types_and_constants.push(
            Instruction::new(Op::TypeStruct)
                .with_result(info.id)
                .add_all(member_types),
        );

        if !info.unique_name.is_empty() {
            let name = info.unique_name.clone();
            self.add_name(info.id, &name);
        }
        for index in 0..info.members.len() {
            let name = info.members[index].name.clone();
            self.add_member_name(info.id, index as u32, &name);
        }

        let id = info.id;
        self.state.structs.push(info);
        id
    }

    fn define_texture(&mut self, _loc: &SourceLocation, mut info: TextureDesc) -> Id {
        if info.id == 0 {
            info.id = self.state.make_id();
        }
        let id = info.id;
        self.state.textures.push(info);
        id
    }

    fn define_sampler(&mut self, loc: &SourceLocation, mut info: SamplerDesc) -> Id {
        if info.id == 0 {
            info.id = self.state.make_id();
        }
        info.set = 1;
        info.binding = self.next_sampler_binding;
        self.next_sampler_binding += 1;

        let ty = Type::sampler().with_qualifiers(Qualifiers::EXTERN | Qualifiers::UNIFORM);
        let unique_name = info.unique_name.clone();
        self.define_variable_raw(
            info.id,
            loc,
            &ty,
            Some(&unique_name),
            StorageClass::UniformConstant,
            0,
        );

        self.add_decoration(info.id, Decoration::Binding, &[info.binding]);
        self.add_decoration(info.id, Decoration::DescriptorSet, &[info.set]);

        let id = info.id;
        self.state.samplers.push(info);
        id
    }

    fn define_uniform(&mut self, _loc: &SourceLocation, mut info: UniformDesc) -> Id {
        if self.global_ubo_type == 0 {
            self.global_ubo_type = self.state.make_id();
        }
        if self.global_ubo_variable == 0 {
            self.global_ubo_variable = self.state.make_id();
        }

        let (size, alignment) = uniform_size_align(&info.ty);
        info.size = size;
        info.offset = align_up(self.global_ubo_offset, alignment);
        self.global_ubo_offset = info.offset + size;

        info.member_index = self.state.uniforms.len() as u32;
        info.block_id = self.global_ubo_type;

        self.add_member_decoration(
            self.global_ubo_type,
            info.member_index,
            Decoration::Offset,
            &[info.offset],
        );

        self.state.uniforms.push(info);
        self.global_ubo_variable
    }

    fn define_variable(
        &mut self,
        loc: &SourceLocation,
        ty: &Type,
        name: Option<&str>,
        global: bool,
        initializer: Id,
    ) -> Id {
        let id = self.state.make_id();
        let storage = if global {
            StorageClass::Private
        } else {
            StorageClass::Function
        };
        self.define_variable_raw(id, loc, ty, name, storage, initializer);
        id
    }

    fn define_parameter(&mut self, loc: &SourceLocation, param: StructMember) -> Id {
        let id = self.state.make_id();

        if let Some(index) = self.current_function {
            let type_id = self.convert_type(&param.ty);
            let line = self.line_instruction(loc);
            let function = &mut self.functions[index];
            function.param_types.push(param.ty);
            if let Some(line) = line {
                function.declaration.push(line);
            }
            function.declaration.push(
                Instruction::new(Op::FunctionParameter)
                    .with_type(type_id)
                    .with_result(id),
            );
        }

        self.add_name(id, &param.name);
        id
    }

    fn define_function(&mut self, _loc: &SourceLocation, info: FunctionDesc) -> Id {
        let id = info.id;
        if !info.name.is_empty() {
            let name = info.name.clone();
            self.add_name(id, &name);
        }
        self.state.functions.push(info);
        id
    }

    fn define_technique(&mut self, info: TechniqueDesc) -> Id {
        self.state.techniques.push(info);
        0
    }

    fn create_entry_point(&mut self, func: &FunctionDesc, is_pixel_stage: bool) -> Id {
        let func = func.clone();
        let no_loc = SourceLocation::default();

        let definition = self.state.make_id();
        let entry_block = self.state.make_id();

        self.enter_function(definition, &Type::void());
        self.enter_block(entry_block);

        let mut call_params: Vec<Expression> = Vec::new();
        let mut interface_ids: Vec<Id> = Vec::new();

        // Inputs: one function-local per parameter, fed from one interface
        // variable per parameter (or per member for struct parameters).
        for param in &func.params {
            let local = self.state.make_id();
            self.define_variable_raw(
                local,
                &no_loc,
                &param.ty,
                None,
                StorageClass::Function,
                0,
            );
            call_params.push(Expression::lvalue(no_loc.clone(), local, param.ty));

            if param.ty.has(Qualifiers::OUT) {
                if param.ty.is_struct() {
                    for member in self.struct_members(&param.ty) {
                        self.create_interface_variable(
                            &member,
                            is_pixel_stage,
                            true,
                            &mut interface_ids,
                        );
                    }
                } else {
                    self.create_interface_variable(param, is_pixel_stage, true, &mut interface_ids);
                }
            } else if param.ty.is_struct() {
                let members = self.struct_members(&param.ty);
                let mut elements = Vec::with_capacity(members.len());
                for member in &members {
                    let input =
                        self.create_interface_variable(member, is_pixel_stage, false, &mut interface_ids);
                    elements.push(self.op_load(&member.ty, input));
                }
                let composite =
                    self.value_instruction(Op::CompositeConstruct, &param.ty, &elements);
                self.op_store(local, composite);
            } else {
                let input =
                    self.create_interface_variable(param, is_pixel_stage, false, &mut interface_ids);
                let value = self.op_load(&param.ty, input);
                self.op_store(local, value);
            }
        }

        let call_result = self.emit_call(&no_loc, func.id, &func.return_type, &call_params);

        // Copy out parameters back to their interface variables.
        let mut io_index = 0usize;
        for (param_index, param) in func.params.iter().enumerate() {
            let member_count = if param.ty.is_struct() {
                self.struct_members(&param.ty).len()
            } else {
                1
            };

            if param.ty.has(Qualifiers::OUT) {
                let value = self.op_load(&param.ty, call_params[param_index].base);
                if param.ty.is_struct() {
                    for (member_index, member) in self.struct_members(&param.ty).iter().enumerate()
                    {
                        let member_value = self.value_instruction(
                            Op::CompositeExtract,
                            &member.ty,
                            &[value, member_index as u32],
                        );
                        self.op_store(interface_ids[io_index], member_value);
                        io_index += 1;
                    }
                } else {
                    self.op_store(interface_ids[io_index], value);
                    io_index += 1;
                }
            } else {
                io_index += member_count;
            }
        }

        // Return values become output interface variables.
        if func.return_type.is_struct() {
            for (member_index, member) in
                self.struct_members(&func.return_type).iter().enumerate()
            {
                let output =
                    self.create_interface_variable(member, is_pixel_stage, true, &mut interface_ids);
                let member_value = self.value_instruction(
                    Op::CompositeExtract,
                    &member.ty,
                    &[call_result, member_index as u32],
                );
                self.op_store(output, member_value);
            }
        } else if !func.return_type.is_void() {
            let member = StructMember {
                name: String::new(),
                ty: func.return_type,
                semantic: func.return_semantic.clone(),
            };
            let output =
                self.create_interface_variable(&member, is_pixel_stage, true, &mut interface_ids);
            self.op_store(output, call_result);
        }

        self.leave_block_and_return(0);

        let entry_point = FunctionDesc {
            id: definition,
            name: func.name.clone(),
            unique_name: func.name.clone(),
            params: Vec::new(),
            return_type: Type::void(),
            return_semantic: String::new(),
            entry_block,
        };
        self.define_function(&no_loc, entry_point);
        self.leave_function();

        let model = if is_pixel_stage {
            ExecutionModel::Fragment
        } else {
            ExecutionModel::Vertex
        };
        self.entries.push(
            Instruction::new(Op::EntryPoint)
                .add(model as u32)
                .add(definition)
                .add_string(&func.name)
                .add_all(interface_ids),
        );

        self.state.entry_points.push(EntryPoint {
            name: func.name,
            stage: if is_pixel_stage {
                ShaderStage::Pixel
            } else {
                ShaderStage::Vertex
            },
        });

        definition
    }

    fn emit_constant(&mut self, ty: &Type, data: &Constant) -> Id {
        if let Some((_, _, id)) = self
            .constant_lookup
            .iter()
            .find(|(t, c, _)| t.layout_eq(ty) && c == data)
        {
            return *id;
        }

        let result;
        if ty.is_array() {
            let element_ty = ty.array_element();

            let mut elements: Vec<Id> = data
                .array_data
                .iter()
                .map(|element| self.emit_constant(&element_ty, element))
                .collect();
            for _ in elements.len()..ty.array_length.max(0) as usize {
                elements.push(self.emit_constant(&element_ty, &Constant::default()));
            }

            let type_id = self.convert_type(ty);
            result = self.state.make_id();
            self.types_and_constants.push(
                Instruction::new(Op::ConstantComposite)
                    .with_type(type_id)
                    .with_result(result)
                    .add_all(elements),
            );
        } else if ty.is_struct() {
            let type_id = self.convert_type(ty);
            result = self.state.make_id();
            self.types_and_constants.push(
                Instruction::new(Op::ConstantNull)
                    .with_type(type_id)
                    .with_result(result),
            );
        } else if ty.is_matrix() {
            let mut rows = [0u32; 4];
            let mut row_ty = *ty;
            row_ty.rows = ty.cols;
            row_ty.cols = 1;

            for row in 0..ty.rows as usize {
                let mut row_data = Constant::default();
                for column in 0..ty.cols as usize {
                    row_data.set_uint(column, data.as_uint(row * ty.cols as usize + column));
                }
                rows[row] = self.emit_constant(&row_ty, &row_data);
            }

            if ty.rows == 1 {
                result = rows[0];
            } else {
                let type_id = self.convert_type(ty);
                result = self.state.make_id();
                self.types_and_constants.push(
                    Instruction::new(Op::ConstantComposite)
                        .with_type(type_id)
                        .with_result(result)
                        .add_all(rows[..ty.rows as usize].iter().copied()),
                );
            }
        } else if ty.is_vector() {
            let mut scalar_ty = *ty;
            scalar_ty.rows = 1;

            let mut components = [0u32; 4];
            for lane in 0..ty.rows as usize {
                let mut scalar_data = Constant::default();
                scalar_data.set_uint(0, data.as_uint(lane));
                components[lane] = self.emit_constant(&scalar_ty, &scalar_data);
            }

            let type_id = self.convert_type(ty);
            result = self.state.make_id();
            self.types_and_constants.push(
                Instruction::new(Op::ConstantComposite)
                    .with_type(type_id)
                    .with_result(result)
                    .add_all(components[..ty.rows as usize].iter().copied()),
            );
        } else if ty.is_boolean() {
            let op = if data.as_uint(0) != 0 {
                Op::ConstantTrue
            } else {
                Op::ConstantFalse
            };
            let type_id = self.convert_type(ty);
            result = self.state.make_id();
            self.types_and_constants
                .push(Instruction::new(op).with_type(type_id).with_result(result));
        } else {
            let type_id = self.convert_type(ty);
            result = self.state.make_id();
            self.types_and_constants.push(
                Instruction::new(Op::Constant)
                    .with_type(type_id)
                    .with_result(result)
                    .add(data.as_uint(0)),
            );
        }

        self.constant_lookup.push((*ty, data.clone(), result));
        result
    }

    fn emit_unary_op(&mut self, loc: &SourceLocation, op: UnaryOp, ty: &Type, value: Id) -> Id {
        self.add_location(loc);

        match op {
            UnaryOp::LogicalNot => self.value_instruction(Op::LogicalNot, ty, &[value]),
            UnaryOp::BitwiseNot => self.value_instruction(Op::Not, ty, &[value]),
            UnaryOp::Negate => {
                let negate = if ty.is_floating_point() {
                    Op::FNegate
                } else {
                    Op::SNegate
                };
                self.value_instruction(negate, ty, &[value])
            }
            UnaryOp::PreIncrement | UnaryOp::PreDecrement => {
                let one = self.splat_constant(ty, 1.0);
                let arith = match (op, ty.is_floating_point()) {
                    (UnaryOp::PreIncrement, true) => Op::FAdd,
                    (UnaryOp::PreIncrement, false) => Op::IAdd,
                    (_, true) => Op::FSub,
                    (_, false) => Op::ISub,
                };
                self.value_instruction(arith, ty, &[value, one])
            }
        }
    }

    fn emit_binary_op(
        &mut self,
        loc: &SourceLocation,
        op: BinaryOp,
        res_type: &Type,
        operand_type: &Type,
        lhs: Id,
        rhs: Id,
    ) -> Id {
        let ty = operand_type;
        let spirv_op = match op {
            BinaryOp::Add => {
                if ty.is_floating_point() {
                    Op::FAdd
                } else {
                    Op::IAdd
                }
            }
            BinaryOp::Sub => {
                if ty.is_floating_point() {
                    Op::FSub
                } else {
                    Op::ISub
                }
            }
            BinaryOp::Mul => {
                if ty.is_floating_point() {
                    Op::FMul
                } else {
                    Op::IMul
                }
            }
            BinaryOp::Div => {
                if ty.is_floating_point() {
                    Op::FDiv
                } else if ty.is_signed() {
                    Op::SDiv
                } else {
                    Op::UDiv
                }
            }
            BinaryOp::Rem => {
                if ty.is_floating_point() {
                    Op::FRem
                } else if ty.is_signed() {
                    Op::SRem
                } else {
                    Op::UMod
                }
            }
            BinaryOp::BitAnd => Op::BitwiseAnd,
            BinaryOp::BitOr => Op::BitwiseOr,
            BinaryOp::BitXor => Op::BitwiseXor,
            BinaryOp::ShiftLeft => Op::ShiftLeftLogical,
            BinaryOp::ShiftRight => {
                if ty.is_signed() {
                    Op::ShiftRightArithmetic
                } else {
                    Op::ShiftRightLogical
                }
            }
            BinaryOp::Less => {
                if ty.is_floating_point() {
                    Op::FOrdLessThan
                } else if ty.is_signed() {
                    Op::SLessThan
                } else {
                    Op::ULessThan
                }
            }
            BinaryOp::Greater => {
                if ty.is_floating_point() {
                    Op::FOrdGreaterThan
                } else if ty.is_signed() {
                    Op::SGreaterThan
                } else {
                    Op::UGreaterThan
                }
            }
            BinaryOp::LessEqual => {
                if ty.is_floating_point() {
                    Op::FOrdLessThanEqual
                } else if ty.is_signed() {
                    Op::SLessThanEqual
                } else {
                    Op::ULessThanEqual
                }
            }
            BinaryOp::GreaterEqual => {
                if ty.is_floating_point() {
                    Op::FOrdGreaterThanEqual
                } else if ty.is_signed() {
                    Op::SGreaterThanEqual
                } else {
                    Op::UGreaterThanEqual
                }
            }
            BinaryOp::Equal => {
                if ty.is_floating_point() {
                    Op::FOrdEqual
                } else if ty.is_integral() {
                    Op::IEqual
                } else {
                    Op::LogicalEqual
                }
            }
            BinaryOp::NotEqual => {
                if ty.is_integral() {
                    Op::INotEqual
                } else if ty.is_floating_point() {
                    Op::FOrdNotEqual
                } else {
                    Op::LogicalNotEqual
                }
            }
            BinaryOp::LogicalAnd => Op::LogicalAnd,
            BinaryOp::LogicalOr => Op::LogicalOr,
        };

        self.add_location(loc);
        let result = self.value_instruction(spirv_op, res_type, &[lhs, rhs]);

        if res_type.has(Qualifiers::PRECISE) {
            self.add_decoration(result, Decoration::NoContraction, &[]);
        }

        result
    }

    fn emit_ternary_op(
        &mut self,
        loc: &SourceLocation,
        ty: &Type,
        condition: Id,
        true_value: Id,
        false_value: Id,
    ) -> Id {
        self.add_location(loc);
        self.value_instruction(Op::Select, ty, &[condition, true_value, false_value])
    }

    fn emit_phi(
        &mut self,
        ty: &Type,
        lhs_value: Id,
        lhs_block: Id,
        rhs_value: Id,
        rhs_block: Id,
    ) -> Id {
        // Fold both predecessor blocks ahead of the already-entered merge
        // block, then place the phi right after the merge label.
        let current = self.state.current_block;
        let mut region = self.take_block(lhs_block);
        region.extend(self.take_block(rhs_block));
        let merge = self.take_block(current);
        region.extend(merge);
        self.blocks.insert(current, region);

        self.value_instruction(Op::Phi, ty, &[lhs_value, lhs_block, rhs_value, rhs_block])
    }

    fn emit_call(
        &mut self,
        loc: &SourceLocation,
        function: Id,
        res_type: &Type,
        args: &[Expression],
    ) -> Id {
        self.add_location(loc);
        let mut operands = vec![function];
        operands.extend(args.iter().map(|arg| arg.base));
        self.value_instruction(Op::FunctionCall, res_type, &operands)
    }

    fn emit_call_intrinsic(
        &mut self,
        loc: &SourceLocation,
        intrinsic: Intrinsic,
        res_type: &Type,
        args: &[Expression],
    ) -> Id {
        self.add_location(loc);

        let arg_types: Vec<Type> = args.iter().map(|arg| arg.ty).collect();
        let values: Vec<Id> = args.iter().map(|arg| self.emit_load(arg)).collect();
        let float = res_type.is_floating_point();
        let signed = res_type.is_signed();

        match intrinsic {
            Intrinsic::Abs => {
                let op = if float { GLOp::FAbs } else { GLOp::SAbs };
                self.glsl_inst(op, res_type, &values)
            }
            Intrinsic::Acos => self.glsl_inst(GLOp::Acos, res_type, &values),
            Intrinsic::Asin => self.glsl_inst(GLOp::Asin, res_type, &values),
            Intrinsic::Atan => self.glsl_inst(GLOp::Atan, res_type, &values),
            Intrinsic::Atan2 => self.glsl_inst(GLOp::Atan2, res_type, &values),
            Intrinsic::Ceil => self.glsl_inst(GLOp::Ceil, res_type, &values),
            Intrinsic::Floor => self.glsl_inst(GLOp::Floor, res_type, &values),
            Intrinsic::Round => self.glsl_inst(GLOp::Round, res_type, &values),
            Intrinsic::Frac => self.glsl_inst(GLOp::Fract, res_type, &values),
            Intrinsic::Degrees => self.glsl_inst(GLOp::Degrees, res_type, &values),
            Intrinsic::Radians => self.glsl_inst(GLOp::Radians, res_type, &values),
            Intrinsic::Sin => self.glsl_inst(GLOp::Sin, res_type, &values),
            Intrinsic::Cos => self.glsl_inst(GLOp::Cos, res_type, &values),
            Intrinsic::Tan => self.glsl_inst(GLOp::Tan, res_type, &values),
            Intrinsic::Sinh => self.glsl_inst(GLOp::Sinh, res_type, &values),
            Intrinsic::Cosh => self.glsl_inst(GLOp::Cosh, res_type, &values),
            Intrinsic::Tanh => self.glsl_inst(GLOp::Tanh, res_type, &values),
            Intrinsic::Exp => self.glsl_inst(GLOp::Exp, res_type, &values),
            Intrinsic::Exp2 => self.glsl_inst(GLOp::Exp2, res_type, &values),
            Intrinsic::Log => self.glsl_inst(GLOp::Log, res_type, &values),
            Intrinsic::Log2 => self.glsl_inst(GLOp::Log2, res_type, &values),
            Intrinsic::Pow => self.glsl_inst(GLOp::Pow, res_type, &values),
            Intrinsic::Sqrt => self.glsl_inst(GLOp::Sqrt, res_type, &values),
            Intrinsic::Rsqrt => self.glsl_inst(GLOp::InverseSqrt, res_type, &values),
            Intrinsic::Rcp => {
                let one = self.splat_constant(res_type, 1.0);
                self.value_instruction(Op::FDiv, res_type, &[one, values[0]])
            }
            Intrinsic::Clamp => {
                let op = if float {
                    GLOp::FClamp
                } else if signed {
                    GLOp::SClamp
                } else {
                    GLOp::UClamp
                };
                self.glsl_inst(op, res_type, &values)
            }
            Intrinsic::Saturate => {
                let zero = self.splat_constant(res_type, 0.0);
                let one = self.splat_constant(res_type, 1.0);
                self.glsl_inst(GLOp::FClamp, res_type, &[values[0], zero, one])
            }
            Intrinsic::Min => {
                let op = if float {
                    GLOp::FMin
                } else if signed {
                    GLOp::SMin
                } else {
                    GLOp::UMin
                };
                self.glsl_inst(op, res_type, &values)
            }
            Intrinsic::Max => {
                let op = if float {
                    GLOp::FMax
                } else if signed {
                    GLOp::SMax
                } else {
                    GLOp::UMax
                };
                self.glsl_inst(op, res_type, &values)
            }
            Intrinsic::Sign => {
                let op = if float { GLOp::FSign } else { GLOp::SSign };
                self.glsl_inst(op, res_type, &values)
            }
            Intrinsic::Lerp => self.glsl_inst(GLOp::FMix, res_type, &values),
            Intrinsic::Mad => self.glsl_inst(GLOp::Fma, res_type, &values),
            Intrinsic::Step => self.glsl_inst(GLOp::Step, res_type, &values),
            Intrinsic::SmoothStep => self.glsl_inst(GLOp::SmoothStep, res_type, &values),
            Intrinsic::Length => self.glsl_inst(GLOp::Length, res_type, &values),
            Intrinsic::Distance => self.glsl_inst(GLOp::Distance, res_type, &values),
            Intrinsic::Cross => self.glsl_inst(GLOp::Cross, res_type, &values),
            Intrinsic::Normalize => self.glsl_inst(GLOp::Normalize, res_type, &values),
            Intrinsic::Reflect => self.glsl_inst(GLOp::Reflect, res_type, &values),
            Intrinsic::Refract => self.glsl_inst(GLOp::Refract, res_type, &values),
            Intrinsic::All => self.value_instruction(Op::All, res_type, &values),
            Intrinsic::Any => self.value_instruction(Op::Any, res_type, &values),
            Intrinsic::Dot => self.value_instruction(Op::Dot, res_type, &values),
            Intrinsic::Transpose => self.value_instruction(Op::Transpose, res_type, &values),
            Intrinsic::Ddx => self.value_instruction(Op::DPdx, res_type, &values),
            Intrinsic::Ddy => self.value_instruction(Op::DPdy, res_type, &values),
            Intrinsic::Fmod => {
                let op = if arg_types[0].is_floating_point() {
                    Op::FRem
                } else if arg_types[0].is_signed() {
                    Op::SRem
                } else {
                    Op::UMod
                };
                self.value_instruction(op, res_type, &values)
            }
            Intrinsic::Mul => {
                let (a, b) = (&arg_types[0], &arg_types[1]);
                if a.is_matrix() && b.is_matrix() {
                    self.value_instruction(Op::MatrixTimesMatrix, res_type, &values)
                } else if a.is_matrix() && b.is_vector() {
                    self.value_instruction(Op::MatrixTimesVector, res_type, &values)
                } else if a.is_vector() && b.is_matrix() {
                    self.value_instruction(Op::VectorTimesMatrix, res_type, &values)
                } else if a.is_matrix() && b.is_scalar() {
                    self.value_instruction(Op::MatrixTimesScalar, res_type, &values)
                } else if a.is_scalar() && b.is_matrix() {
                    self.value_instruction(Op::MatrixTimesScalar, res_type, &[values[1], values[0]])
                } else if a.is_vector() && b.is_scalar() {
                    self.value_instruction(Op::VectorTimesScalar, res_type, &values)
                } else if a.is_scalar() && b.is_vector() {
                    self.value_instruction(Op::VectorTimesScalar, res_type, &[values[1], values[0]])
                } else {
                    self.value_instruction(Op::FMul, res_type, &values)
                }
            }
            Intrinsic::Tex2d => self.value_instruction(
                Op::ImageSampleImplicitLod,
                res_type,
                &[values[0], values[1]],
            ),
            Intrinsic::Tex2dLod => {
                let float2 = Type::vector(BaseType::Float, 2);
                let xy =
                    self.value_instruction(Op::VectorShuffle, &float2, &[values[1], values[1], 0, 1]);
                let lod =
                    self.value_instruction(Op::CompositeExtract, &Type::float(), &[values[1], 3]);
                let type_id = self.convert_type(res_type);
                let result = self.state.make_id();
                self.push_current(
                    Instruction::new(Op::ImageSampleExplicitLod)
                        .with_type(type_id)
                        .with_result(result)
                        .add(values[0])
                        .add(xy)
                        .add(ImageOperands::LOD.bits())
                        .add(lod),
                );
                result
            }
            Intrinsic::Tex2dFetch => {
                let image_ty = Type::texture();
                let image = self.value_instruction(Op::Image, &image_ty, &[values[0]]);

                let coord_ty = arg_types[1];
                let int2 = Type::vector(BaseType::Int, 2);
                let (xy, lod) = if coord_ty.components() >= 4 {
                    let xy = self
                        .value_instruction(Op::VectorShuffle, &int2, &[values[1], values[1], 0, 1]);
                    let lod =
                        self.value_instruction(Op::CompositeExtract, &Type::int(), &[values[1], 3]);
                    (xy, lod)
                } else {
                    let lod = self.emit_constant(&Type::int(), &Constant::default());
                    (values[1], lod)
                };

                let type_id = self.convert_type(res_type);
                let result = self.state.make_id();
                self.push_current(
                    Instruction::new(Op::ImageFetch)
                        .with_type(type_id)
                        .with_result(result)
                        .add(image)
                        .add(xy)
                        .add(ImageOperands::LOD.bits())
                        .add(lod),
                );
                result
            }
            Intrinsic::Tex2dSize => {
                self.add_capability(Capability::ImageQuery);
                let image_ty = Type::texture();
                let image = self.value_instruction(Op::Image, &image_ty, &[values[0]]);
                self.value_instruction(Op::ImageQuerySizeLod, res_type, &[image, values[1]])
            }
        }
    }

    fn emit_construct(&mut self, loc: &SourceLocation, ty: &Type, args: &mut [Expression]) -> Id {
        self.add_location(loc);

        if ty.is_matrix() {
            // Flatten the arguments to scalars, group them into row
            // vectors, then build the matrix from those.
            let mut scalars = Vec::with_capacity(ty.components() as usize);
            for arg in args.iter() {
                if arg.ty.is_scalar() {
                    let mut scalar = arg.clone();
                    scalar.add_cast(Type::scalar(ty.base));
                    scalars.push(self.emit_load(&scalar));
                } else {
                    for component in 0..arg.ty.components() {
                        let mut scalar = arg.clone();
                        let lane = if arg.ty.is_matrix() && arg.ty.rows > 1 {
                            let row = component / arg.ty.cols;
                            let column = component % arg.ty.cols;
                            (row * 4 + column) as i8
                        } else {
                            component as i8
                        };
                        scalar.add_swizzle(&[lane]);
                        scalar.add_cast(Type::scalar(ty.base));
                        scalars.push(self.emit_load(&scalar));
                    }
                }
            }

            let mut row_ty = *ty;
            row_ty.rows = ty.cols;
            row_ty.cols = 1;

            let mut rows = Vec::with_capacity(ty.rows as usize);
            for row in 0..ty.rows as usize {
                let components =
                    &scalars[row * ty.cols as usize..row * ty.cols as usize + ty.cols as usize];
                rows.push(self.value_instruction(Op::CompositeConstruct, &row_ty, components));
            }

            self.value_instruction(Op::CompositeConstruct, ty, &rows)
        } else {
            let mut values = Vec::with_capacity(args.len());
            for arg in args.iter_mut() {
                let mut target = arg.ty;
                target.base = ty.base;
                arg.add_cast(target);
                values.push(self.emit_load(arg));
            }
            self.value_instruction(Op::CompositeConstruct, ty, &values)
        }
    }

    fn emit_load(&mut self, chain: &Expression) -> Id {
        if chain.is_constant {
            return self.emit_constant(&chain.ty, &chain.constant);
        }

        self.add_location(&chain.location);

        let mut result = chain.base;
        let mut op_index = 0;

        if chain.is_lvalue {
            let (pointer, pointee, consumed) = self.lower_access_chain(chain);
            op_index = consumed;
            result = self.op_load(&pointee, pointer);
        }

        while op_index < chain.ops.len() {
            match &chain.ops[op_index] {
                ChainOp::Cast { from, to } => {
                    result = self.lower_cast(from, to, result);
                }
                ChainOp::Index { index, from, to } => {
                    if from.is_vector() && to.is_scalar() {
                        let mut target = *to;
                        target.is_pointer = false;
                        result =
                            self.value_instruction(Op::VectorExtractDynamic, &target, &[result, *index]);
                    } else {
                        // Dynamic index into a composite value: spill to a
                        // temporary and go through an access chain.
                        let pointer = self.spill_to_temporary(from, result);
                        let mut element_ptr_ty = *to;
                        element_ptr_ty.is_pointer = true;
                        element_ptr_ty.qualifiers &= !(Qualifiers::STATIC | Qualifiers::UNIFORM);
                        let type_id = self.convert_type(&element_ptr_ty);
                        let element_ptr = self.state.make_id();
                        self.push_current(
                            Instruction::new(Op::AccessChain)
                                .with_type(type_id)
                                .with_result(element_ptr)
                                .add(pointer)
                                .add(*index),
                        );
                        result = self.op_load(to, element_ptr);
                    }
                }
                ChainOp::Swizzle { lanes, from, to } => {
                    if to.is_vector() {
                        if from.is_matrix() {
                            let mut scalar_ty = *to;
                            scalar_ty.rows = 1;
                            scalar_ty.cols = 1;

                            let mut components = Vec::new();
                            for &lane in lanes.iter().take_while(|&&lane| lane >= 0) {
                                let row = lane as u32 / 4;
                                let column = lane as u32 % 4;
                                let mut operands = vec![result];
                                if from.rows > 1 {
                                    operands.push(row);
                                }
                                operands.push(column);
                                components.push(self.value_instruction(
                                    Op::CompositeExtract,
                                    &scalar_ty,
                                    &operands,
                                ));
                            }
                            result =
                                self.value_instruction(Op::CompositeConstruct, to, &components);
                        } else {
                            let mut operands = vec![result, result];
                            operands.extend(
                                lanes
                                    .iter()
                                    .take_while(|&&lane| lane >= 0)
                                    .map(|&lane| lane as u32),
                            );
                            result = self.value_instruction(Op::VectorShuffle, to, &operands);
                        }
                    } else {
                        // Single-component swizzle on a vector or matrix.
                        let mut operands = vec![result];
                        if from.is_matrix() && from.rows > 1 {
                            operands.push(lanes[0] as u32 / 4);
                            operands.push(lanes[0] as u32 % 4);
                        } else {
                            operands.push(lanes[0] as u32);
                        }
                        result = self.value_instruction(Op::CompositeExtract, to, &operands);
                    }
                }
            }
            op_index += 1;
        }

        result
    }

    fn emit_store(&mut self, chain: &Expression, value: Id, value_type: &Type) {
        self.add_location(&chain.location);

        let (target, pointee, mut op_index) = self.lower_access_chain(chain);
        let mut value = value;

        while op_index < chain.ops.len() {
            if let ChainOp::Swizzle { lanes, from, to } = &chain.ops[op_index] {
                let current = self.op_load(&pointee, target);

                if from.is_vector() && value_type.is_vector() {
                    // Merge the written lanes over the current value.
                    let mut shuffle = [0u32, 1, 2, 3];
                    for (i, &lane) in lanes.iter().take_while(|&&lane| lane >= 0).enumerate() {
                        shuffle[lane as usize] = from.rows + i as u32;
                    }
                    let mut operands = vec![current, value];
                    operands.extend_from_slice(&shuffle[..from.rows as usize]);
                    let mut merged_ty = pointee;
                    merged_ty.is_pointer = false;
                    value = self.value_instruction(Op::VectorShuffle, &merged_ty, &operands);
                } else if to.is_scalar() {
                    let mut operands = vec![value, current];
                    if from.is_matrix() && from.rows > 1 {
                        operands.push(lanes[0] as u32 / 4);
                        operands.push(lanes[0] as u32 % 4);
                    } else {
                        operands.push(lanes[0] as u32);
                    }
                    let mut merged_ty = pointee;
                    merged_ty.is_pointer = false;
                    value = self.value_instruction(Op::CompositeInsert, &merged_ty, &operands);
                }
            }
            op_index += 1;
        }

        self.op_store(target, value);
    }

    fn emit_if(
        &mut self,
        loc: &SourceLocation,
        _condition: Id,
        prev_block: Id,
        true_block: Id,
        false_block: Id,
        merge_block: Id,
        flags: ControlFlags,
    ) {
        let mut region = self.take_block(prev_block);
        debug_assert!(!region.is_empty());

        // The selection merge goes right before the conditional branch that
        // terminates the previous block.
        let merge_at = region.len().saturating_sub(1);
        if let Some(line) = self.line_instruction(loc) {
            region.insert(merge_at, line);
        }
        let merge_at = region.len().saturating_sub(1);
        region.insert(
            merge_at,
            Instruction::new(Op::SelectionMerge)
                .add(merge_block)
                .add(Self::selection_control(flags)),
        );

        region.extend(self.take_block(true_block));
        region.extend(self.take_block(false_block));
        region.extend(self.take_block(merge_block));
        self.blocks.insert(merge_block, region);
    }

    fn emit_loop(
        &mut self,
        loc: &SourceLocation,
        _condition: Id,
        prev_block: Id,
        header_block: Id,
        condition_block: Id,
        loop_block: Id,
        continue_block: Id,
        merge_block: Id,
        flags: ControlFlags,
    ) {
        let mut region = self.take_block(prev_block);
        let mut header = self.take_block(header_block);

        // The header block is label + branch; the loop merge goes between
        // the two.
        if !header.is_empty() {
            region.push(header.remove(0));
        }
        if let Some(line) = self.line_instruction(loc) {
            region.push(line);
        }
        region.push(
            Instruction::new(Op::LoopMerge)
                .add(merge_block)
                .add(continue_block)
                .add(Self::loop_control(flags)),
        );
        region.extend(header);

        if condition_block != 0 {
            region.extend(self.take_block(condition_block));
        }
        region.extend(self.take_block(loop_block));
        region.extend(self.take_block(continue_block));
        region.extend(self.take_block(merge_block));
        self.blocks.insert(merge_block, region);
    }

    fn emit_switch(
        &mut self,
        loc: &SourceLocation,
        _selector: Id,
        prev_block: Id,
        default_label: Id,
        case_literal_and_labels: &[Id],
        merge_block: Id,
        flags: ControlFlags,
    ) {
        let mut region = self.take_block(prev_block);
        debug_assert!(!region.is_empty());

        let merge_at = region.len().saturating_sub(1);
        if let Some(line) = self.line_instruction(loc) {
            region.insert(merge_at, line);
        }
        let merge_at = region.len().saturating_sub(1);
        region.insert(
            merge_at,
            Instruction::new(Op::SelectionMerge)
                .add(merge_block)
                .add(Self::selection_control(flags)),
        );

        // The OpSwitch terminator was emitted with just the selector; patch
        // the default label and the case pairs onto it now.
        if let Some(switch) = region.last_mut() {
            debug_assert_eq!(switch.op, Op::Switch);
            switch.operands.push(default_label);
            switch
                .operands
                .extend_from_slice(case_literal_and_labels);
        }

        let mut appended = Vec::new();
        for pair in case_literal_and_labels.chunks(2) {
            let label = pair[1];
            if !appended.contains(&label) {
                region.extend(self.take_block(label));
                appended.push(label);
            }
        }
        if default_label != merge_block && !appended.contains(&default_label) {
            region.extend(self.take_block(default_label));
        }

        region.extend(self.take_block(merge_block));
        self.blocks.insert(merge_block, region);
    }

    fn set_block(&mut self, block: Id) {
        self.state.current_block = block;
    }

    fn enter_block(&mut self, block: Id) {
        self.state.current_block = block;
        self.blocks
            .entry(block)
            .or_default()
            .push(Instruction::new(Op::Label).with_result(block));
    }

    fn leave_block_and_kill(&mut self) {
        if !self.state.is_in_block() {
            return;
        }
        self.push_current(Instruction::new(Op::Kill));
        self.last_block = self.state.current_block;
        self.state.current_block = 0;
    }

    fn leave_block_and_return(&mut self, value: Id) {
        if !self.state.is_in_block() {
            return;
        }

        let return_type = self
            .current_function
            .map(|index| self.functions[index].return_type)
            .unwrap_or_else(Type::void);

        if return_type.is_void() {
            self.push_current(Instruction::new(Op::Return));
        } else {
            let value = if value == 0 {
                let type_id = self.convert_type(&return_type);
                let undef = self.state.make_id();
                self.types_and_constants.push(
                    Instruction::new(Op::Undef)
                        .with_type(type_id)
                        .with_result(undef),
                );
                undef
            } else {
                value
            };
            self.push_current(Instruction::new(Op::ReturnValue).add(value));
        }

        self.last_block = self.state.current_block;
        self.state.current_block = 0;
    }

    fn leave_block_and_switch(&mut self, selector: Id) {
        if !self.state.is_in_block() {
            return;
        }
        // Default and case labels are patched in later by emit_switch.
        self.push_current(Instruction::new(Op::Switch).add(selector));
        self.last_block = self.state.current_block;
        self.state.current_block = 0;
    }

    fn leave_block_and_branch(&mut self, target: Id) {
        if !self.state.is_in_block() {
            return;
        }
        self.push_current(Instruction::new(Op::Branch).add(target));
        self.last_block = self.state.current_block;
        self.state.current_block = 0;
    }

    fn leave_block_and_branch_conditional(&mut self, condition: Id, true_target: Id, false_target: Id) {
        if !self.state.is_in_block() {
            return;
        }
        self.push_current(
            Instruction::new(Op::BranchConditional)
                .add(condition)
                .add(true_target)
                .add(false_target),
        );
        self.last_block = self.state.current_block;
        self.state.current_block = 0;
    }

    fn enter_function(&mut self, id: Id, return_type: &Type) {
        let return_type_id = self.convert_type(return_type);

        let mut function = FunctionBlocks {
            return_type: *return_type,
            ..FunctionBlocks::default()
        };
        function.declaration.push(
            Instruction::new(Op::Function)
                .with_type(return_type_id)
                .with_result(id)
                .add(FunctionControl::NONE.bits()),
        );

        self.functions.push(function);
        self.current_function = Some(self.functions.len() - 1);
    }

    fn leave_function(&mut self) {
        let Some(index) = self.current_function else {
            return;
        };

        let body = self.take_block(self.last_block);
        let return_type = self.functions[index].return_type;
        let param_types = self.functions[index].param_types.clone();
        let function_type = self.convert_function_type(&return_type, &param_types);

        let function = &mut self.functions[index];
        function.definition = body;
        function.definition.push(Instruction::new(Op::FunctionEnd));
        // The full function type is only known once every parameter has
        // been defined.
        function.declaration[0].operands.push(function_type);

        self.current_function = None;
    }

    fn write_result(&mut self, module: &mut Module) {
        if self.global_ubo_type != 0 {
            self.create_global_ubo();
        }

        module.samplers = self.state.samplers.clone();
        module.textures = self.state.textures.clone();
        module.uniforms = self.state.uniforms.clone();
        module.techniques = self.state.techniques.clone();
        module.entry_points = self.state.entry_points.clone();
        module.total_uniform_size = align_up(self.global_ubo_offset, 16);

        let out = &mut module.spirv;
        out.clear();

        out.push(spirv::MAGIC_NUMBER);
        out.push(((spirv::MAJOR_VERSION as u32) << 16) | ((spirv::MINOR_VERSION as u32) << 8));
        out.push(0); // generator magic
        out.push(self.state.id_bound());
        out.push(0); // instruction schema

        for capability in [Capability::Matrix, Capability::Shader]
            .iter()
            .chain(self.capabilities.iter())
        {
            Instruction::new(Op::Capability)
                .add(*capability as u32)
                .write_words(out);
        }

        Instruction::new(Op::Extension)
            .add_string("SPV_GOOGLE_hlsl_functionality1")
            .write_words(out);
        Instruction::new(Op::ExtInstImport)
            .with_result(self.glsl_ext)
            .add_string("GLSL.std.450")
            .write_words(out);
        Instruction::new(Op::MemoryModel)
            .add(AddressingModel::Logical as u32)
            .add(MemoryModel::GLSL450 as u32)
            .write_words(out);

        write_block(out, &self.entries);
        write_block(out, &self.debug_a);
        write_block(out, &self.debug_b);
        write_block(out, &self.annotations);
        write_block(out, &self.types_and_constants);
        write_block(out, &self.variables);

        for function in &self.functions {
            if function.definition.is_empty() {
                continue;
            }

            write_block(out, &function.declaration);

            // The first label moves in front of the local variables.
            function.definition[0].write_words(out);
            write_block(out, &function.variables);
            for ins in &function.definition[1..] {
                ins.write_words(out);
            }
        }
    }
}
