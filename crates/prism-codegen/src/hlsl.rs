//! HLSL 5.0 code generator.
//!
//! Emits the module as a single source string built from per-block string
//! buffers. Every value becomes a `const T _id = expr;` binding, control
//! flow is stitched back into native `if`/`while`/`do`/`switch` statements
//! by the structure hints, and `#line` directives preserve the mapping back
//! to effect source. Samplers are expressed through a `__sampler2D`
//! aggregate so the vendor compiler sees plain `Texture2D`/`SamplerState`
//! registers.

use std::collections::{BTreeMap, HashMap};

use prism_ir::{
    BaseType, ChainOp, Constant, EntryPoint, Expression, FunctionDesc, Id, Intrinsic, Module,
    SamplerDesc, ShaderStage, SourceLocation, StructDesc, StructMember, TechniqueDesc, TextureDesc,
    Type, UniformDesc,
};

use crate::{align_up, BinaryOp, Codegen, CodegenState, ControlFlags, UnaryOp};

/// Pseudo-id of the implicit `$Globals` constant buffer.
const GLOBALS_ID: Id = 0xffff_ffff;

/// HLSL implementation of the [`Codegen`] contract.
pub struct HlslCodegen {
    state: CodegenState,
    blocks: BTreeMap<Id, String>,
    names: HashMap<Id, String>,
    /// Conditional-branch record per block, used to reconstruct the guard
    /// of short-circuit merges in `emit_phi`.
    branches: HashMap<Id, (Id, Id, Id)>,
    last_block: Id,
    cbuffer_offset: u32,
    next_sampler_register: u32,
    pending_return_type: String,
    pending_params: Vec<String>,
}

impl Default for HlslCodegen {
    fn default() -> Self {
        Self::new()
    }
}

impl HlslCodegen {
    pub fn new() -> Self {
        Self {
            state: CodegenState::new(),
            blocks: BTreeMap::new(),
            names: HashMap::new(),
            branches: HashMap::new(),
            last_block: 0,
            cbuffer_offset: 0,
            next_sampler_register: 0,
            pending_return_type: String::new(),
            pending_params: Vec::new(),
        }
    }

    fn code(&mut self) -> &mut String {
        self.blocks.entry(self.state.current_block).or_default()
    }

    fn take_block(&mut self, block: Id) -> String {
        self.blocks.remove(&block).unwrap_or_default()
    }

    fn id_to_name(&self, id: Id) -> String {
        match self.names.get(&id) {
            Some(name) => name.clone(),
            None => format!("_{id}"),
        }
    }

    fn write_type(&self, ty: &Type) -> String {
        let mut s = String::new();
        match ty.base {
            BaseType::Void => s.push_str("void"),
            BaseType::Bool => s.push_str("bool"),
            BaseType::Int => s.push_str("int"),
            BaseType::Uint => s.push_str("uint"),
            BaseType::Float => s.push_str("float"),
            BaseType::Sampler => s.push_str("__sampler2D"),
            BaseType::Texture => s.push_str("Texture2D"),
            BaseType::Struct => {
                let name = self
                    .state
                    .find_struct(ty.definition)
                    .map(|info| {
                        if info.unique_name.is_empty() {
                            info.name.clone()
                        } else {
                            info.unique_name.clone()
                        }
                    })
                    .unwrap_or_else(|| format!("_struct_{}", ty.definition));
                s.push_str(&name);
            }
            BaseType::String => {}
        }
        if ty.rows > 1 {
            s.push_str(&ty.rows.to_string());
        }
        if ty.cols > 1 {
            s.push('x');
            s.push_str(&ty.cols.to_string());
        }
        s
    }

    fn write_scalar(ty: BaseType, data: &Constant, lane: usize) -> String {
        match ty {
            BaseType::Bool => {
                if data.as_uint(lane) != 0 {
                    "true".to_owned()
                } else {
                    "false".to_owned()
                }
            }
            BaseType::Int => data.as_int(lane).to_string(),
            BaseType::Uint => data.as_uint(lane).to_string(),
            _ => format!("{:?}", data.as_float(lane)),
        }
    }

    fn write_constant(&self, ty: &Type, data: &Constant) -> String {
        if ty.is_array() {
            let element_ty = ty.array_element();
            let elements: Vec<String> = data
                .array_data
                .iter()
                .map(|element| self.write_constant(&element_ty, element))
                .collect();
            return format!("{{ {} }}", elements.join(", "));
        }

        let mut s = String::new();
        if !ty.is_scalar() {
            s.push_str(&self.write_type(ty));
        }
        s.push('(');
        for column in 0..ty.cols.max(1) {
            for row in 0..ty.rows.max(1) {
                if !(column == 0 && row == 0) {
                    s.push_str(", ");
                }
                let lane = (column * ty.rows.max(1) + row) as usize;
                s.push_str(&Self::write_scalar(ty.base, data, lane));
            }
        }
        s.push(')');
        s
    }

    fn write_location(loc: &SourceLocation) -> String {
        if loc.is_empty() {
            return String::new();
        }
        format!("#line {} \"{}\"\n", loc.line, loc.source)
    }

    fn write_swizzle(text: &mut String, lanes: &[i8; 4], from: &Type) {
        text.push('.');
        for &lane in lanes.iter().take_while(|&&lane| lane >= 0) {
            if from.is_matrix() && from.rows > 1 {
                text.push_str(&format!("_m{}{}", lane / 4, lane % 4));
            } else {
                text.push(b"xyzw"[lane as usize] as char);
            }
        }
    }

    fn chain_text(&self, chain: &Expression) -> String {
        let mut text = self.id_to_name(chain.base);
        for op in &chain.ops {
            match op {
                ChainOp::Cast { to, .. } => {
                    text = format!("(({}){})", self.write_type(to), text);
                }
                ChainOp::Index { index, .. } => {
                    text.push('[');
                    text.push_str(&self.id_to_name(*index));
                    text.push(']');
                }
                ChainOp::Swizzle { lanes, from, .. } => {
                    Self::write_swizzle(&mut text, lanes, from);
                }
            }
        }
        text
    }

    /// D3D constant-buffer packing: 4-byte aligned, a value never straddles
    /// a 16-byte register, matrices take one register per column and array
    /// elements stride in registers.
    fn cbuffer_size_align(ty: &Type) -> (u32, u32) {
        if ty.is_array() {
            let element = ty.array_element();
            let (element_size, _) = Self::cbuffer_size_align(&element);
            let stride = align_up(element_size, 16);
            let count = ty.array_length.max(1) as u32;
            return (stride * (count - 1) + element_size, 16);
        }
        if ty.is_matrix() {
            return ((ty.cols - 1) * 16 + ty.rows.max(1) * 4, 16);
        }
        (ty.rows.max(1) * 4, 4)
    }

    fn binary_op_token(op: BinaryOp) -> &'static str {
        match op {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }

    fn intrinsic_name(intrinsic: Intrinsic) -> &'static str {
        match intrinsic {
            Intrinsic::Abs => "abs",
            Intrinsic::All => "all",
            Intrinsic::Any => "any",
            Intrinsic::Acos => "acos",
            Intrinsic::Asin => "asin",
            Intrinsic::Atan => "atan",
            Intrinsic::Atan2 => "atan2",
            Intrinsic::Ceil => "ceil",
            Intrinsic::Clamp => "clamp",
            Intrinsic::Cos => "cos",
            Intrinsic::Cosh => "cosh",
            Intrinsic::Cross => "cross",
            Intrinsic::Ddx => "ddx",
            Intrinsic::Ddy => "ddy",
            Intrinsic::Degrees => "degrees",
            Intrinsic::Distance => "distance",
            Intrinsic::Dot => "dot",
            Intrinsic::Exp => "exp",
            Intrinsic::Exp2 => "exp2",
            Intrinsic::Floor => "floor",
            Intrinsic::Fmod => "fmod",
            Intrinsic::Frac => "frac",
            Intrinsic::Length => "length",
            Intrinsic::Lerp => "lerp",
            Intrinsic::Log => "log",
            Intrinsic::Log2 => "log2",
            Intrinsic::Mad => "mad",
            Intrinsic::Max => "max",
            Intrinsic::Min => "min",
            Intrinsic::Mul => "mul",
            Intrinsic::Normalize => "normalize",
            Intrinsic::Pow => "pow",
            Intrinsic::Radians => "radians",
            Intrinsic::Rcp => "rcp",
            Intrinsic::Reflect => "reflect",
            Intrinsic::Refract => "refract",
            Intrinsic::Round => "round",
            Intrinsic::Rsqrt => "rsqrt",
            Intrinsic::Saturate => "saturate",
            Intrinsic::Sign => "sign",
            Intrinsic::Sin => "sin",
            Intrinsic::Sinh => "sinh",
            Intrinsic::SmoothStep => "smoothstep",
            Intrinsic::Sqrt => "sqrt",
            Intrinsic::Step => "step",
            Intrinsic::Tan => "tan",
            Intrinsic::Tanh => "tanh",
            Intrinsic::Transpose => "transpose",
            Intrinsic::Tex2d | Intrinsic::Tex2dLod | Intrinsic::Tex2dFetch
            | Intrinsic::Tex2dSize => "",
        }
    }
}

impl Codegen for HlslCodegen {
    fn make_id(&mut self) -> Id {
        self.state.make_id()
    }

    fn define_struct(&mut self, loc: &SourceLocation, mut info: StructDesc) -> Id {
        if info.id == 0 {
            info.id = self.state.make_id();
        }

        let mut text = Self::write_location(loc);
        let name = if info.unique_name.is_empty() {
            info.name.clone()
        } else {
            info.unique_name.clone()
        };
        text.push_str(&format!("struct {name}\n{{\n"));
        for member in &info.members {
            text.push_str(&format!(
                "    {} {}",
                self.write_type(&member.ty),
                member.name
            ));
            if !member.semantic.is_empty() {
                text.push_str(&format!(" : {}", member.semantic));
            }
            text.push_str(";\n");
        }
        text.push_str("};\n");
        self.code().push_str(&text);

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
        info.set = 0;
        info.binding = self.next_sampler_register;
        self.next_sampler_register += 1;

        let register = info.binding;
        let name = info.unique_name.clone();
        let text = format!(
            "{}Texture2D __{name}_t : register(t{register});\n\
             SamplerState __{name}_s : register(s{register});\n\
             static const __sampler2D {name} = {{ __{name}_t, __{name}_s }};\n",
            Self::write_location(loc),
        );
        self.code().push_str(&text);

        self.names.insert(info.id, name);

        let id = info.id;
        self.state.samplers.push(info);
        id
    }

    fn define_uniform(&mut self, loc: &SourceLocation, mut info: UniformDesc) -> Id {
        let (size, alignment) = Self::cbuffer_size_align(&info.ty);
        let mut offset = align_up(self.cbuffer_offset, alignment);
        // A value must not straddle a 16-byte register.
        if size <= 16 && offset / 16 != (offset + size - 1) / 16 {
            offset = align_up(offset, 16);
        }
        info.size = size;
        info.offset = offset;
        self.cbuffer_offset = offset + size;

        info.member_index = self.state.uniforms.len() as u32;
        info.block_id = GLOBALS_ID;

        let text = format!(
            "{}uniform {} {};\n",
            Self::write_location(loc),
            self.write_type(&info.ty),
            info.name
        );
        self.code().push_str(&text);

        self.names.insert(GLOBALS_ID, "_Globals".to_owned());
        self.state.uniforms.push(info);
        GLOBALS_ID
    }

    fn define_variable(
        &mut self,
        loc: &SourceLocation,
        ty: &Type,
        name: Option<&str>,
        _global: bool,
        initializer: Id,
    ) -> Id {
        let id = self.state.make_id();
        if let Some(name) = name {
            if !name.is_empty() {
                self.names.insert(id, name.to_owned());
            }
        }

        let mut text = Self::write_location(loc);
        text.push_str(&format!("{} {}", self.write_type(ty), self.id_to_name(id)));
        if initializer != 0 {
            text.push_str(&format!(" = {}", self.id_to_name(initializer)));
        }
        text.push_str(";\n");
        self.code().push_str(&text);

        id
    }

    fn define_parameter(&mut self, _loc: &SourceLocation, param: StructMember) -> Id {
        let id = self.state.make_id();
        if !param.name.is_empty() {
            self.names.insert(id, param.name.clone());
        }

        let mut text = format!("{} {}", self.write_type(&param.ty), self.id_to_name(id));
        if !param.semantic.is_empty() {
            text.push_str(&format!(" : {}", param.semantic));
        }
        self.pending_params.push(text);

        id
    }

    fn define_function(&mut self, loc: &SourceLocation, info: FunctionDesc) -> Id {
        let name = if info.unique_name.is_empty() {
            info.name.clone()
        } else {
            info.unique_name.clone()
        };
        self.names.insert(info.id, name.clone());

        let mut text = Self::write_location(loc);
        text.push_str(&format!(
            "{} {}({})",
            self.pending_return_type,
            name,
            self.pending_params.join(", ")
        ));
        if !info.return_semantic.is_empty() {
            text.push_str(&format!(" : {}", info.return_semantic));
        }
        text.push('\n');
        self.code().push_str(&text);

        let id = info.id;
        self.state.functions.push(info);
        id
    }

    fn define_technique(&mut self, info: TechniqueDesc) -> Id {
        self.state.techniques.push(info);
        0
    }

    fn create_entry_point(&mut self, func: &FunctionDesc, is_pixel_stage: bool) -> Id {
        // The user function already carries its semantics; the vendor
        // compiler is pointed at it directly.
        self.state.entry_points.push(EntryPoint {
            name: func.name.clone(),
            stage: if is_pixel_stage {
                ShaderStage::Pixel
            } else {
                ShaderStage::Vertex
            },
        });
        func.id
    }

    fn emit_constant(&mut self, ty: &Type, data: &Constant) -> Id {
        let id = self.state.make_id();
        let text = format!(
            "const {} {} = {};\n",
            self.write_type(ty),
            self.id_to_name(id),
            self.write_constant(ty, data)
        );
        self.code().push_str(&text);
        id
    }

    fn emit_unary_op(&mut self, loc: &SourceLocation, op: UnaryOp, ty: &Type, value: Id) -> Id {
        let id = self.state.make_id();
        let value = self.id_to_name(value);
        let expr = match op {
            UnaryOp::LogicalNot => format!("!{value}"),
            UnaryOp::Negate => format!("-{value}"),
            UnaryOp::BitwiseNot => format!("~{value}"),
            UnaryOp::PreIncrement => format!("{value} + 1"),
            UnaryOp::PreDecrement => format!("{value} - 1"),
        };

        let text = format!(
            "{}const {} {} = {};\n",
            Self::write_location(loc),
            self.write_type(ty),
            self.id_to_name(id),
            expr
        );
        self.code().push_str(&text);
        id
    }

    fn emit_binary_op(
        &mut self,
        loc: &SourceLocation,
        op: BinaryOp,
        res_type: &Type,
        _operand_type: &Type,
        lhs: Id,
        rhs: Id,
    ) -> Id {
        let id = self.state.make_id();
        let text = format!(
            "{}const {} {} = {} {} {};\n",
            Self::write_location(loc),
            self.write_type(res_type),
            self.id_to_name(id),
            self.id_to_name(lhs),
            Self::binary_op_token(op),
            self.id_to_name(rhs)
        );
        self.code().push_str(&text);
        id
    }

    fn emit_ternary_op(
        &mut self,
        loc: &SourceLocation,
        ty: &Type,
        condition: Id,
        true_value: Id,
        false_value: Id,
    ) -> Id {
        let id = self.state.make_id();
        let text = format!(
            "{}const {} {} = {} ? {} : {};\n",
            Self::write_location(loc),
            self.write_type(ty),
            self.id_to_name(id),
            self.id_to_name(condition),
            self.id_to_name(true_value),
            self.id_to_name(false_value)
        );
        self.code().push_str(&text);
        id
    }

    fn emit_phi(
        &mut self,
        ty: &Type,
        lhs_value: Id,
        lhs_block: Id,
        rhs_value: Id,
        rhs_block: Id,
    ) -> Id {
        let id = self.state.make_id();

        // Recover the guard from the branch that left the lhs block, then
        // lift the short-circuit into explicit control flow.
        let guard = match self.branches.get(&lhs_block) {
            Some(&(condition, _, false_target)) if false_target == rhs_block => {
                format!("!{}", self.id_to_name(condition))
            }
            Some(&(condition, _, _)) => self.id_to_name(condition),
            None => self.id_to_name(lhs_value),
        };

        let mut text = self.take_block(lhs_block);
        text.push_str(&format!(
            "{} {} = {};\n",
            self.write_type(ty),
            self.id_to_name(id),
            self.id_to_name(lhs_value)
        ));
        text.push_str(&format!("if ({guard})\n{{\n"));
        text.push_str(&self.take_block(rhs_block));
        text.push_str(&format!(
            "{} = {};\n}}\n",
            self.id_to_name(id),
            self.id_to_name(rhs_value)
        ));

        let merge = self.take_block(self.state.current_block);
        text.push_str(&merge);
        let current = self.state.current_block;
        self.blocks.insert(current, text);

        id
    }

    fn emit_call(
        &mut self,
        loc: &SourceLocation,
        function: Id,
        res_type: &Type,
        args: &[Expression],
    ) -> Id {
        let id = self.state.make_id();
        let arg_names: Vec<String> = args.iter().map(|arg| self.id_to_name(arg.base)).collect();

        let text = format!(
            "{}const {} {} = {}({});\n",
            Self::write_location(loc),
            self.write_type(res_type),
            self.id_to_name(id),
            self.id_to_name(function),
            arg_names.join(", ")
        );
        self.code().push_str(&text);
        id
    }

    fn emit_call_intrinsic(
        &mut self,
        loc: &SourceLocation,
        intrinsic: Intrinsic,
        res_type: &Type,
        args: &[Expression],
    ) -> Id {
        let arg_names: Vec<String> = args
            .iter()
            .map(|arg| {
                let value = self.emit_load(arg);
                self.id_to_name(value)
            })
            .collect();

        let id = self.state.make_id();
        let result = self.id_to_name(id);
        let result_ty = self.write_type(res_type);
        let location = Self::write_location(loc);

        let text = match intrinsic {
            Intrinsic::Tex2d => format!(
                "{location}const {result_ty} {result} = {s}.t.Sample({s}.s, {c});\n",
                s = arg_names[0],
                c = arg_names[1],
            ),
            Intrinsic::Tex2dLod => format!(
                "{location}const {result_ty} {result} = \
                 {s}.t.SampleLevel({s}.s, {c}.xy, {c}.w);\n",
                s = arg_names[0],
                c = arg_names[1],
            ),
            Intrinsic::Tex2dFetch => format!(
                "{location}const {result_ty} {result} = {s}.t.Load(int3({c}.xy, {c}.w));\n",
                s = arg_names[0],
                c = arg_names[1],
            ),
            Intrinsic::Tex2dSize => {
                format!(
                    "{location}uint {result}_w, {result}_h, {result}_l;\n\
                     {s}.t.GetDimensions({lod}, {result}_w, {result}_h, {result}_l);\n\
                     const {result_ty} {result} = int2({result}_w, {result}_h);\n",
                    s = arg_names[0],
                    lod = arg_names[1],
                )
            }
            _ => format!(
                "{location}const {result_ty} {result} = {}({});\n",
                Self::intrinsic_name(intrinsic),
                arg_names.join(", ")
            ),
        };
        self.code().push_str(&text);
        id
    }

    fn emit_construct(&mut self, loc: &SourceLocation, ty: &Type, args: &mut [Expression]) -> Id {
        let arg_names: Vec<String> = args
            .iter()
            .map(|arg| {
                if arg.is_constant {
                    self.write_constant(&arg.ty, &arg.constant)
                } else if arg.ops.is_empty() {
                    self.id_to_name(arg.base)
                } else {
                    let value = self.emit_load(arg);
                    self.id_to_name(value)
                }
            })
            .collect();

        let id = self.state.make_id();
        let text = format!(
            "{}const {} {} = {}({});\n",
            Self::write_location(loc),
            self.write_type(ty),
            self.id_to_name(id),
            self.write_type(ty),
            arg_names.join(", ")
        );
        self.code().push_str(&text);
        id
    }

    fn emit_load(&mut self, chain: &Expression) -> Id {
        let id = self.state.make_id();

        let rhs = if chain.is_constant {
            self.write_constant(&chain.ty, &chain.constant)
        } else {
            self.chain_text(chain)
        };

        let text = format!(
            "{}const {} {} = {};\n",
            Self::write_location(&chain.location),
            self.write_type(&chain.ty),
            self.id_to_name(id),
            rhs
        );
        self.code().push_str(&text);
        id
    }

    fn emit_store(&mut self, chain: &Expression, value: Id, _value_type: &Type) {
        let mut target = self.id_to_name(chain.base);
        for op in &chain.ops {
            match op {
                ChainOp::Index { index, .. } => {
                    target.push('[');
                    target.push_str(&self.id_to_name(*index));
                    target.push(']');
                }
                ChainOp::Swizzle { lanes, from, .. } => {
                    Self::write_swizzle(&mut target, lanes, from);
                }
                ChainOp::Cast { .. } => {}
            }
        }

        let text = format!(
            "{}{} = {};\n",
            Self::write_location(&chain.location),
            target,
            self.id_to_name(value)
        );
        self.code().push_str(&text);
    }

    fn emit_if(
        &mut self,
        loc: &SourceLocation,
        condition: Id,
        prev_block: Id,
        true_block: Id,
        false_block: Id,
        merge_block: Id,
        flags: ControlFlags,
    ) {
        let mut text = self.take_block(prev_block);
        text.push_str(&Self::write_location(loc));

        if flags.contains(ControlFlags::FLATTEN) {
            text.push_str("[flatten] ");
        }
        if flags.contains(ControlFlags::DONT_FLATTEN) {
            text.push_str("[branch] ");
        }

        let true_text = self.take_block(true_block);
        let false_text = self.take_block(false_block);
        text.push_str(&format!(
            "if ({})\n{{\n{}}}\nelse\n{{\n{}}}\n",
            self.id_to_name(condition),
            true_text,
            false_text
        ));

        text.push_str(&self.take_block(merge_block));
        self.blocks.insert(merge_block, text);
    }

    fn emit_loop(
        &mut self,
        loc: &SourceLocation,
        condition: Id,
        prev_block: Id,
        _header_block: Id,
        condition_block: Id,
        loop_block: Id,
        continue_block: Id,
        merge_block: Id,
        flags: ControlFlags,
    ) {
        let mut text = self.take_block(prev_block);

        let condition_name = self.id_to_name(condition);
        let condition_text = if condition_block != 0 {
            self.take_block(condition_block)
        } else {
            String::new()
        };
        let loop_text = self.take_block(loop_block);
        let continue_text = self.take_block(continue_block);

        let mut attributes = String::new();
        if flags.contains(ControlFlags::UNROLL) {
            attributes.push_str("[unroll] ");
        }
        if flags.contains(ControlFlags::DONT_UNROLL) {
            attributes.push_str("[loop] ");
        }

        let const_binding = format!("const bool {condition_name} =");

        if condition_block == 0 {
            // Do-while: the condition is evaluated at the tail of the body,
            // so its binding turns into an assignment to a hoisted local.
            let mut body = loop_text;
            body.push_str(&continue_text);
            let body = body.replacen(&const_binding, &format!("{condition_name} ="), 1);

            text.push_str(&Self::write_location(loc));
            text.push_str(&format!("bool {condition_name};\n"));
            text.push_str(&attributes);
            text.push_str(&format!(
                "do\n{{\n{body}}}\nwhile ({condition_name});\n"
            ));
        } else {
            // While: evaluate the condition once ahead of the loop with a
            // mutable binding, then re-evaluate it at the loop tail.
            let head = condition_text.replacen(&const_binding, &format!("bool {condition_name} ="), 1);
            let tail = condition_text.replacen(&const_binding, &format!("{condition_name} ="), 1);

            text.push_str(&head);
            text.push_str(&Self::write_location(loc));
            text.push_str(&attributes);
            text.push_str(&format!(
                "while ({condition_name})\n{{\n{loop_text}{continue_text}{tail}}}\n"
            ));
        }

        text.push_str(&self.take_block(merge_block));
        self.blocks.insert(merge_block, text);
    }

    fn emit_switch(
        &mut self,
        loc: &SourceLocation,
        selector: Id,
        prev_block: Id,
        default_label: Id,
        case_literal_and_labels: &[Id],
        merge_block: Id,
        flags: ControlFlags,
    ) {
        let mut text = self.take_block(prev_block);
        text.push_str(&Self::write_location(loc));

        if flags.contains(ControlFlags::FLATTEN) {
            text.push_str("[flatten] ");
        }
        if flags.contains(ControlFlags::DONT_FLATTEN) {
            text.push_str("[branch] ");
        }

        text.push_str(&format!("switch ({})\n{{\n", self.id_to_name(selector)));

        // Literals sharing one label fold into one case body.
        let mut labels: Vec<(Id, Vec<Id>)> = Vec::new();
        for pair in case_literal_and_labels.chunks(2) {
            let (literal, label) = (pair[0], pair[1]);
            match labels.iter_mut().find(|(known, _)| *known == label) {
                Some((_, literals)) => literals.push(literal),
                None => labels.push((label, vec![literal])),
            }
        }

        for (label, literals) in labels {
            for literal in literals {
                text.push_str(&format!("case {literal}:\n"));
            }
            text.push_str(&format!("{{\n{}break;\n}}\n", self.take_block(label)));
        }

        if default_label != merge_block {
            text.push_str(&format!(
                "default:\n{{\n{}break;\n}}\n",
                self.take_block(default_label)
            ));
        }

        text.push_str("}\n");
        text.push_str(&self.take_block(merge_block));
        self.blocks.insert(merge_block, text);
    }

    fn set_block(&mut self, block: Id) {
        self.state.current_block = block;
    }

    fn enter_block(&mut self, block: Id) {
        self.state.current_block = block;
    }

    fn leave_block_and_kill(&mut self) {
        if !self.state.is_in_block() {
            return;
        }
        self.code().push_str("discard;\n");
        self.last_block = self.state.current_block;
        self.state.current_block = 0;
    }

    fn leave_block_and_return(&mut self, value: Id) {
        if !self.state.is_in_block() {
            return;
        }
        let text = if value != 0 {
            format!("return {};\n", self.id_to_name(value))
        } else {
            "return;\n".to_owned()
        };
        self.code().push_str(&text);
        self.last_block = self.state.current_block;
        self.state.current_block = 0;
    }

    fn leave_block_and_switch(&mut self, _selector: Id) {
        if !self.state.is_in_block() {
            return;
        }
        self.last_block = self.state.current_block;
        self.state.current_block = 0;
    }

    fn leave_block_and_branch(&mut self, _target: Id) {
        if !self.state.is_in_block() {
            return;
        }
        self.last_block = self.state.current_block;
        self.state.current_block = 0;
    }

    fn leave_block_and_branch_conditional(&mut self, condition: Id, true_target: Id, false_target: Id) {
        if !self.state.is_in_block() {
            return;
        }
        self.branches.insert(
            self.state.current_block,
            (condition, true_target, false_target),
        );
        self.last_block = self.state.current_block;
        self.state.current_block = 0;
    }

    fn enter_function(&mut self, _id: Id, return_type: &Type) {
        self.pending_return_type = self.write_type(return_type);
        self.pending_params.clear();
    }

    fn leave_function(&mut self) {
        let body = self.take_block(self.last_block);
        self.code().push_str(&format!("{{\n{body}}}\n\n"));
    }

    fn write_result(&mut self, module: &mut Module) {
        module.samplers = self.state.samplers.clone();
        module.textures = self.state.textures.clone();
        module.uniforms = self.state.uniforms.clone();
        module.techniques = self.state.techniques.clone();
        module.entry_points = self.state.entry_points.clone();
        module.total_uniform_size = align_up(self.cbuffer_offset, 16);

        let body = self.blocks.get(&0).cloned().unwrap_or_default();
        let mut out = String::new();
        if !self.state.samplers.is_empty() {
            out.push_str("struct __sampler2D { Texture2D t; SamplerState s; };\n\n");
        }
        out.push_str(&body);
        module.hlsl = out;
    }
}
