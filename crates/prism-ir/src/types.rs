use bitflags::bitflags;

use crate::Id;

/// Base tag of a value type.
///
/// `Struct` types additionally carry the id of their [`crate::StructDesc`]
/// in [`Type::definition`]. `String` only occurs in annotation values and
/// uniform initializers; it never reaches a backend as a runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BaseType {
    #[default]
    Void,
    Bool,
    Int,
    Uint,
    Float,
    Struct,
    Texture,
    Sampler,
    String,
}

bitflags! {
    /// Storage and interpolation qualifiers attached to a type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Qualifiers: u32 {
        const STATIC          = 1 << 0;
        const UNIFORM         = 1 << 1;
        const EXTERN          = 1 << 2;
        const IN              = 1 << 3;
        const OUT             = 1 << 4;
        const CONST           = 1 << 5;
        const PRECISE         = 1 << 6;
        const NOPERSPECTIVE   = 1 << 7;
        const CENTROID        = 1 << 8;
        const NOINTERPOLATION = 1 << 9;
        const INOUT           = Self::IN.bits() | Self::OUT.bits();
    }
}

/// A value type.
///
/// Scalars have `rows == cols == 1`, vectors `rows > 1, cols == 1`,
/// matrices `rows >= 1, cols > 1` (a 1xN matrix is layout-compatible with a
/// vector and the SPIR-V backend collapses it to one). Textures, samplers
/// and void carry `rows == cols == 0`.
///
/// `is_pointer`/`is_input`/`is_output` only matter during SPIR-V lowering,
/// where they select the storage class of `OpTypePointer` declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Type {
    pub base: BaseType,
    pub rows: u32,
    pub cols: u32,
    /// 0 = not an array, negative = unsized array.
    pub array_length: i32,
    pub qualifiers: Qualifiers,
    pub is_pointer: bool,
    pub is_input: bool,
    pub is_output: bool,
    /// Id of the struct definition when `base == BaseType::Struct`.
    pub definition: Id,
}

impl Type {
    pub const fn scalar(base: BaseType) -> Self {
        Self {
            base,
            rows: 1,
            cols: 1,
            array_length: 0,
            qualifiers: Qualifiers::empty(),
            is_pointer: false,
            is_input: false,
            is_output: false,
            definition: 0,
        }
    }

    pub const fn vector(base: BaseType, rows: u32) -> Self {
        let mut ty = Self::scalar(base);
        ty.rows = rows;
        ty
    }

    pub const fn matrix(base: BaseType, rows: u32, cols: u32) -> Self {
        let mut ty = Self::scalar(base);
        ty.rows = rows;
        ty.cols = cols;
        ty
    }

    pub const fn void() -> Self {
        let mut ty = Self::scalar(BaseType::Void);
        ty.rows = 0;
        ty.cols = 0;
        ty
    }

    pub const fn bool_() -> Self {
        Self::scalar(BaseType::Bool)
    }

    pub const fn int() -> Self {
        Self::scalar(BaseType::Int)
    }

    pub const fn uint() -> Self {
        Self::scalar(BaseType::Uint)
    }

    pub const fn float() -> Self {
        Self::scalar(BaseType::Float)
    }

    pub const fn texture() -> Self {
        let mut ty = Self::scalar(BaseType::Texture);
        ty.rows = 0;
        ty.cols = 0;
        ty
    }

    pub const fn sampler() -> Self {
        let mut ty = Self::scalar(BaseType::Sampler);
        ty.rows = 0;
        ty.cols = 0;
        ty
    }

    pub fn with_qualifiers(mut self, qualifiers: Qualifiers) -> Self {
        self.qualifiers = qualifiers;
        self
    }

    pub fn has(&self, qualifier: Qualifiers) -> bool {
        self.qualifiers.contains(qualifier)
    }

    /// Number of scalar components (1 for scalars, `rows` for vectors,
    /// `rows * cols` for matrices).
    pub fn components(&self) -> u32 {
        self.rows * self.cols
    }

    pub fn is_void(&self) -> bool {
        self.base == BaseType::Void
    }

    pub fn is_boolean(&self) -> bool {
        self.base == BaseType::Bool
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.base,
            BaseType::Bool | BaseType::Int | BaseType::Uint | BaseType::Float
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(self.base, BaseType::Int | BaseType::Uint)
    }

    /// Signed in the sense of operator selection: `int` picks S-variants,
    /// `float` picks F-variants.
    pub fn is_signed(&self) -> bool {
        matches!(self.base, BaseType::Int | BaseType::Float)
    }

    pub fn is_floating_point(&self) -> bool {
        self.base == BaseType::Float
    }

    pub fn is_struct(&self) -> bool {
        self.base == BaseType::Struct
    }

    pub fn is_texture(&self) -> bool {
        self.base == BaseType::Texture
    }

    pub fn is_sampler(&self) -> bool {
        self.base == BaseType::Sampler
    }

    pub fn is_array(&self) -> bool {
        self.array_length != 0
    }

    pub fn is_unsized_array(&self) -> bool {
        self.array_length < 0
    }

    pub fn is_scalar(&self) -> bool {
        !self.is_array() && !self.is_matrix() && !self.is_vector() && self.is_numeric()
    }

    pub fn is_vector(&self) -> bool {
        self.rows > 1 && self.cols == 1
    }

    pub fn is_matrix(&self) -> bool {
        self.rows >= 1 && self.cols > 1
    }

    /// Element type obtained by stripping one array dimension.
    pub fn array_element(&self) -> Self {
        let mut ty = *self;
        ty.array_length = 0;
        ty
    }

    /// Result type of indexing one step into this type: array element, row
    /// vector of a matrix, or scalar component of a vector.
    pub fn index_element(&self) -> Self {
        let mut ty = *self;
        if self.is_array() {
            ty.array_length = 0;
        } else if self.is_matrix() {
            ty.rows = self.cols;
            ty.cols = 1;
        } else {
            ty.rows = 1;
            ty.cols = 1;
        }
        ty
    }

    /// Interning key equality: same shape and storage, ignoring qualifiers
    /// that do not affect layout. Pointer types additionally compare the
    /// storage-class-relevant qualifier subset.
    pub fn layout_eq(&self, other: &Self) -> bool {
        let storage = Qualifiers::STATIC | Qualifiers::UNIFORM;
        self.base == other.base
            && self.rows == other.rows
            && self.cols == other.cols
            && self.array_length == other.array_length
            && self.definition == other.definition
            && self.is_pointer == other.is_pointer
            && self.is_input == other.is_input
            && self.is_output == other.is_output
            && (!self.is_pointer
                || (self.qualifiers & storage) == (other.qualifiers & storage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_predicates() {
        assert!(Type::float().is_scalar());
        assert!(!Type::float().is_vector());

        let v3 = Type::vector(BaseType::Float, 3);
        assert!(v3.is_vector());
        assert!(!v3.is_scalar());
        assert_eq!(v3.components(), 3);

        let m = Type::matrix(BaseType::Float, 4, 4);
        assert!(m.is_matrix());
        assert_eq!(m.components(), 16);

        // A 1xN matrix still counts as a matrix; the SPIR-V backend
        // collapses it to the column vector type.
        let m1 = Type::matrix(BaseType::Float, 1, 3);
        assert!(m1.is_matrix());
        assert!(!m1.is_vector());
    }

    #[test]
    fn index_element_types() {
        let m = Type::matrix(BaseType::Float, 4, 4);
        let row = m.index_element();
        assert!(row.is_vector());
        assert_eq!(row.rows, 4);

        let v = Type::vector(BaseType::Int, 2);
        assert!(v.index_element().is_scalar());

        let mut arr = Type::vector(BaseType::Float, 4);
        arr.array_length = 3;
        let elem = arr.index_element();
        assert!(!elem.is_array());
        assert!(elem.is_vector());
    }

    #[test]
    fn layout_eq_distinguishes_pointer_storage() {
        let mut a = Type::float();
        a.is_pointer = true;
        let mut b = a;
        assert!(a.layout_eq(&b));

        b.qualifiers = Qualifiers::UNIFORM;
        assert!(!a.layout_eq(&b));

        // Non-pointer types ignore qualifiers entirely.
        let c = Type::float();
        let d = Type::float().with_qualifiers(Qualifiers::CONST);
        assert!(c.layout_eq(&d));
    }
}
