use smallvec::SmallVec;

use crate::{Constant, Id, SourceLocation, Type};

/// One step of an access chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOp {
    /// Value conversion between `from` and `to` (base change and/or
    /// component-count change).
    Cast { from: Type, to: Type },
    /// Dynamic subscript by the value named by `index`.
    Index { index: Id, from: Type, to: Type },
    /// Component selection. `lanes` holds up to four source component
    /// indices; unused slots are -1. For matrix sources a lane encodes
    /// `row * 4 + col`.
    Swizzle {
        lanes: [i8; 4],
        from: Type,
        to: Type,
    },
}

impl ChainOp {
    pub fn result_type(&self) -> &Type {
        match self {
            ChainOp::Cast { to, .. } | ChainOp::Index { to, .. } | ChainOp::Swizzle { to, .. } => {
                to
            }
        }
    }

    pub fn source_type(&self) -> &Type {
        match self {
            ChainOp::Cast { from, .. }
            | ChainOp::Index { from, .. }
            | ChainOp::Swizzle { from, .. } => from,
        }
    }
}

/// An addressing expression: a base value plus a short chain of cast,
/// index and swizzle steps.
///
/// `is_lvalue` marks addressable chains (loads go through a pointer,
/// stores are legal). `is_constant` marks folded literals; such chains
/// carry their value in `constant` and an unused `base`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    pub base: Id,
    pub ty: Type,
    pub constant: Constant,
    pub is_lvalue: bool,
    pub is_constant: bool,
    pub location: SourceLocation,
    pub ops: SmallVec<[ChainOp; 4]>,
}

impl Expression {
    /// An addressable reference to the variable or pointer named by `base`.
    pub fn lvalue(location: SourceLocation, base: Id, ty: Type) -> Self {
        Self {
            base,
            ty,
            is_lvalue: true,
            location,
            ..Self::default()
        }
    }

    /// A plain SSA value.
    pub fn rvalue(location: SourceLocation, base: Id, ty: Type) -> Self {
        Self {
            base,
            ty,
            location,
            ..Self::default()
        }
    }

    /// A folded literal.
    pub fn literal(location: SourceLocation, ty: Type, constant: Constant) -> Self {
        Self {
            ty,
            constant,
            is_constant: true,
            location,
            ..Self::default()
        }
    }

    /// Append a conversion to `to`. Constant chains are folded in place;
    /// value chains get a `Cast` op. Casting to the current type is a
    /// no-op.
    pub fn add_cast(&mut self, to: Type) {
        if self.ty == to {
            return;
        }

        if self.is_constant {
            if self.ty.base != to.base {
                self.constant.cast(&self.ty, to.base);
            }
            if to.components() > self.ty.components() && self.ty.is_scalar() {
                self.constant.splat(to.components());
            }
        } else {
            self.ops.push(ChainOp::Cast { from: self.ty, to });
        }

        self.ty = to;
    }

    /// Append a dynamic subscript by the SSA value `index`. The element
    /// type keeps the lvalue-ness of the chain: on an addressable chain it
    /// becomes a pointer the backend can fold into an access chain.
    pub fn add_index(&mut self, index: Id) {
        let from = self.ty;
        let mut to = from.index_element();
        to.is_pointer = self.is_lvalue;

        self.ops.push(ChainOp::Index { index, from, to });
        self.ty = to;
    }

    /// Append a component selection. `lanes` holds 1..=4 source component
    /// indices. Constant chains fold the shuffle immediately.
    pub fn add_swizzle(&mut self, lanes: &[i8]) {
        debug_assert!(!lanes.is_empty() && lanes.len() <= 4);

        let mut padded = [-1i8; 4];
        padded[..lanes.len()].copy_from_slice(lanes);

        let from = self.ty;
        let mut to = from;
        to.rows = lanes.len() as u32;
        to.cols = 1;
        to.is_pointer = false;

        if self.is_constant {
            let mut folded = Constant::default();
            for (slot, &lane) in lanes.iter().enumerate() {
                folded.set_uint(slot, self.constant.as_uint(lane as usize));
            }
            folded.string_data = std::mem::take(&mut self.constant.string_data);
            self.constant = folded;
        } else {
            self.ops.push(ChainOp::Swizzle {
                lanes: padded,
                from,
                to,
            });
        }

        self.ty = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BaseType;

    #[test]
    fn cast_on_constant_folds() {
        let mut e = Expression::literal(
            SourceLocation::default(),
            Type::float(),
            Constant::scalar_f32(1.5),
        );
        e.add_cast(Type::int());
        assert!(e.ops.is_empty());
        assert_eq!(e.constant.as_int(0), 1);
        assert_eq!(e.ty, Type::int());
    }

    #[test]
    fn cast_on_constant_splats_scalar_to_vector() {
        let mut e = Expression::literal(
            SourceLocation::default(),
            Type::float(),
            Constant::scalar_f32(2.0),
        );
        e.add_cast(Type::vector(BaseType::Float, 4));
        assert_eq!(e.constant.as_float(3), 2.0);
    }

    #[test]
    fn index_keeps_lvalue_as_pointer() {
        let mut arr = Type::vector(BaseType::Float, 4);
        arr.array_length = 8;

        let mut e = Expression::lvalue(SourceLocation::default(), 7, arr);
        e.add_index(42);

        assert_eq!(e.ops.len(), 1);
        assert!(e.ty.is_pointer);
        assert!(e.ty.is_vector());
        assert!(!e.ty.is_array());
    }

    #[test]
    fn swizzle_narrows_type() {
        let mut e = Expression::rvalue(
            SourceLocation::default(),
            3,
            Type::vector(BaseType::Float, 4),
        );
        e.add_swizzle(&[2, 0]);
        assert_eq!(e.ty.rows, 2);
        match &e.ops[0] {
            ChainOp::Swizzle { lanes, .. } => assert_eq!(lanes, &[2, 0, -1, -1]),
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn swizzle_on_constant_shuffles_lanes() {
        let mut e = Expression::literal(
            SourceLocation::default(),
            Type::vector(BaseType::Float, 3),
            Constant::from_floats(&[1.0, 2.0, 3.0]),
        );
        e.add_swizzle(&[2]);
        assert!(e.ops.is_empty());
        assert_eq!(e.constant.as_float(0), 3.0);
        assert!(e.ty.is_scalar());
    }
}
