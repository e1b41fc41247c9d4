//! Code generators for the prism effect IR.
//!
//! The frontend drives a [`Codegen`] implementation with define/emit events
//! while it walks its parse tree; the generator accumulates backend state
//! and finally serializes a [`Module`] in [`Codegen::write_result`]. Two
//! generators exist: [`spirv::SpirvCodegen`] producing a binary SPIR-V
//! word stream and [`hlsl::HlslCodegen`] producing HLSL 5.0 source text.
//!
//! # Block contract
//!
//! The frontend guarantees a structured CFG: every selection has a single
//! merge block and every loop a single header/continue/merge. Blocks are
//! built through [`Codegen::enter_block`] and terminated through the
//! `leave_block_and_*` family; instructions emitted while no block is open
//! are ignored. The structure hints [`Codegen::emit_if`],
//! [`Codegen::emit_loop`] and [`Codegen::emit_switch`] are invoked once per
//! construct, after every constituent block has been terminated and before
//! the merge block is entered; they fold the constituent blocks into the
//! merge block's buffer. [`Codegen::emit_phi`] is the one exception: it is
//! invoked right after entering the merge block of a short-circuit
//! expression and folds the two predecessor blocks itself.

pub mod hlsl;
pub mod spirv;

use bitflags::bitflags;
use prism_ir::{
    Constant, EntryPoint, Expression, FunctionDesc, Id, Intrinsic, Module, SamplerDesc,
    SourceLocation, StructDesc, StructMember, TechniqueDesc, TextureDesc, Type, UniformDesc,
};

bitflags! {
    /// Optimization hints attached to selection and loop constructs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ControlFlags: u32 {
        const FLATTEN      = 1 << 0;
        const DONT_FLATTEN = 1 << 1;
        const UNROLL       = 1 << 2;
        const DONT_UNROLL  = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    LogicalNot,
    Negate,
    BitwiseNot,
    PreIncrement,
    PreDecrement,
}

/// Binary operators. Compound-assignment forms fold to these before they
/// reach a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    LogicalAnd,
    LogicalOr,
}

/// State every generator carries: the id allocator, the current block and
/// the entity lists that are copied into the output module.
#[derive(Debug, Default)]
pub struct CodegenState {
    next_id: Id,
    pub current_block: Id,
    pub structs: Vec<StructDesc>,
    pub textures: Vec<TextureDesc>,
    pub samplers: Vec<SamplerDesc>,
    pub uniforms: Vec<UniformDesc>,
    pub techniques: Vec<TechniqueDesc>,
    pub functions: Vec<FunctionDesc>,
    pub entry_points: Vec<EntryPoint>,
}

impl CodegenState {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn make_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Final id bound: one past the highest id handed out.
    pub fn id_bound(&self) -> Id {
        self.next_id
    }

    pub fn is_in_block(&self) -> bool {
        self.current_block != 0
    }

    pub fn find_struct(&self, id: Id) -> Option<&StructDesc> {
        self.structs.iter().find(|s| s.id == id)
    }
}

/// The code-generator contract.
///
/// Each `define_*` operation registers an entity and returns the id the
/// frontend uses to reference it later; `emit_*` operations produce the id
/// of a typed SSA value in the current block. One generator instance
/// serves exactly one compile.
pub trait Codegen {
    /// Allocate a fresh id. Entity descriptors carry their id when passed
    /// to `define_*`, so frontends allocate through this first.
    fn make_id(&mut self) -> Id;

    fn define_struct(&mut self, loc: &SourceLocation, info: StructDesc) -> Id;
    fn define_texture(&mut self, loc: &SourceLocation, info: TextureDesc) -> Id;
    fn define_sampler(&mut self, loc: &SourceLocation, info: SamplerDesc) -> Id;
    /// Registers a uniform and lays it out inside the generator's uniform
    /// block. Returns the id of the enclosing block; the caller addresses
    /// the value by member index afterwards.
    fn define_uniform(&mut self, loc: &SourceLocation, info: UniformDesc) -> Id;
    fn define_variable(
        &mut self,
        loc: &SourceLocation,
        ty: &Type,
        name: Option<&str>,
        global: bool,
        initializer: Id,
    ) -> Id;
    fn define_parameter(&mut self, loc: &SourceLocation, param: StructMember) -> Id;
    fn define_function(&mut self, loc: &SourceLocation, info: FunctionDesc) -> Id;
    fn define_technique(&mut self, info: TechniqueDesc) -> Id;

    /// Wrap the user function `func` as a stage entry point. The SPIR-V
    /// generator synthesizes interface variables and a glue function; the
    /// HLSL generator returns `func.id` unchanged.
    fn create_entry_point(&mut self, func: &FunctionDesc, is_pixel_stage: bool) -> Id;

    fn emit_constant(&mut self, ty: &Type, data: &Constant) -> Id;
    fn emit_unary_op(&mut self, loc: &SourceLocation, op: UnaryOp, ty: &Type, value: Id) -> Id;
    fn emit_binary_op(
        &mut self,
        loc: &SourceLocation,
        op: BinaryOp,
        res_type: &Type,
        operand_type: &Type,
        lhs: Id,
        rhs: Id,
    ) -> Id;
    fn emit_ternary_op(
        &mut self,
        loc: &SourceLocation,
        ty: &Type,
        condition: Id,
        true_value: Id,
        false_value: Id,
    ) -> Id;
    /// Merge of a short-circuit expression; see the module-level block
    /// contract for the required call position.
    fn emit_phi(
        &mut self,
        ty: &Type,
        lhs_value: Id,
        lhs_block: Id,
        rhs_value: Id,
        rhs_block: Id,
    ) -> Id;
    fn emit_call(
        &mut self,
        loc: &SourceLocation,
        function: Id,
        res_type: &Type,
        args: &[Expression],
    ) -> Id;
    fn emit_call_intrinsic(
        &mut self,
        loc: &SourceLocation,
        intrinsic: Intrinsic,
        res_type: &Type,
        args: &[Expression],
    ) -> Id;
    fn emit_construct(&mut self, loc: &SourceLocation, ty: &Type, args: &mut [Expression]) -> Id;

    /// Read through an access chain, producing the chain's value.
    fn emit_load(&mut self, chain: &Expression) -> Id;
    /// Write `value` (of `value_type`) through an addressable access chain.
    fn emit_store(&mut self, chain: &Expression, value: Id, value_type: &Type);

    #[allow(clippy::too_many_arguments)]
    fn emit_if(
        &mut self,
        loc: &SourceLocation,
        condition: Id,
        prev_block: Id,
        true_block: Id,
        false_block: Id,
        merge_block: Id,
        flags: ControlFlags,
    );
    #[allow(clippy::too_many_arguments)]
    fn emit_loop(
        &mut self,
        loc: &SourceLocation,
        condition: Id,
        prev_block: Id,
        header_block: Id,
        condition_block: Id,
        loop_block: Id,
        continue_block: Id,
        merge_block: Id,
        flags: ControlFlags,
    );
    #[allow(clippy::too_many_arguments)]
    fn emit_switch(
        &mut self,
        loc: &SourceLocation,
        selector: Id,
        prev_block: Id,
        default_label: Id,
        case_literal_and_labels: &[Id],
        merge_block: Id,
        flags: ControlFlags,
    );

    fn set_block(&mut self, block: Id);
    fn enter_block(&mut self, block: Id);
    fn leave_block_and_kill(&mut self);
    /// `value == 0` returns an undefined value for non-void functions.
    fn leave_block_and_return(&mut self, value: Id);
    /// Terminates with a switch on `selector`; default and case labels are
    /// supplied later by [`Codegen::emit_switch`].
    fn leave_block_and_switch(&mut self, selector: Id);
    fn leave_block_and_branch(&mut self, target: Id);
    fn leave_block_and_branch_conditional(&mut self, condition: Id, true_target: Id, false_target: Id);

    fn enter_function(&mut self, id: Id, return_type: &Type);
    fn leave_function(&mut self);

    /// Freeze the generator and serialize everything into `module`.
    fn write_result(&mut self, module: &mut Module);
}

/// Backend selector for [`new_codegen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Spirv,
    Hlsl,
}

pub fn new_codegen(kind: BackendKind) -> Box<dyn Codegen> {
    match kind {
        BackendKind::Spirv => Box::new(spirv::SpirvCodegen::new()),
        BackendKind::Hlsl => Box::new(hlsl::HlslCodegen::new()),
    }
}

pub(crate) fn align_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two() || alignment % 4 == 0);
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}
