//! The type system: primitive kinds, pointers, structs, functions.
//!
//! A closed set of builtin kinds plus struct/function composites. Types
//! are interned into a `TypeTable` by structural equality so that `TypeId`
//! comparison is the single source of truth for "are these the same type"
//! throughout the checker and backend — the same interning pattern
//! `crate::interner` applies to strings, applied here to types.

use std::collections::HashMap;

use crate::interner::InternedStr;
use crate::symbol::SymId;

/// Interned handle for a [`Type`]. Two `TypeId`s are equal iff the
/// underlying `Type` values are structurally equal.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct TypeId(pub u32);

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Signed/unsigned integer width, used by both `Type::Int` and literal
/// overflow range-checking.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }

    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum FloatWidth {
    W32,
    W64,
}

impl FloatWidth {
    pub fn bytes(self) -> u32 {
        match self {
            FloatWidth::W32 => 4,
            FloatWidth::W64 => 8,
        }
    }
}

/// A structural type. Struct and function types carry a `SymId`
/// rather than an inline field list; the field list itself lives on the
/// `Symbol`/namespace scope so that recursive struct definitions (a struct
/// containing a pointer to itself) don't require a recursive `Type`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    Void,
    Bool,
    Int(IntWidth, bool),
    Float(FloatWidth),
    Pointer(TypeId),
    Struct(SymId, InternedStr),
    Function { params: Vec<TypeId>, ret: TypeId, variadic: bool },
}

impl Type {
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(..))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Size in bytes on the x64 target, used for struct layout and
    /// register-class selection.
    pub fn size_of(&self, table: &TypeTable) -> u32 {
        match self {
            Type::Void => 0,
            Type::Bool => 1,
            Type::Int(w, _) => w.bytes(),
            Type::Float(w) => w.bytes(),
            Type::Pointer(_) => 8,
            Type::Struct(_, _) => table.struct_size(self).unwrap_or(0),
            Type::Function { .. } => 8,
        }
    }
}

/// Interning table mapping structural [`Type`] values to stable [`TypeId`]s.
#[derive(Default)]
pub struct TypeTable {
    types: Vec<Type>,
    index: HashMap<Type, TypeId>,
    /// struct TypeId -> (field type, byte offset) list, populated once the
    /// checker has computed layout.
    struct_layouts: HashMap<TypeId, Vec<(InternedStr, TypeId, u32)>>,
    struct_sizes: HashMap<TypeId, u32>,
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = Self::default();
        for builtin in [
            Type::Void,
            Type::Bool,
            Type::Int(IntWidth::W8, true),
            Type::Int(IntWidth::W16, true),
            Type::Int(IntWidth::W32, true),
            Type::Int(IntWidth::W64, true),
            Type::Int(IntWidth::W8, false),
            Type::Int(IntWidth::W16, false),
            Type::Int(IntWidth::W32, false),
            Type::Int(IntWidth::W64, false),
            Type::Float(FloatWidth::W32),
            Type::Float(FloatWidth::W64),
        ] {
            table.intern(builtin);
        }
        table
    }

    pub fn intern(&mut self, ty: Type) -> TypeId {
        if let Some(id) = self.index.get(&ty) {
            return *id;
        }
        let id = TypeId(self.types.len() as u32);
        self.index.insert(ty.clone(), id);
        self.types.push(ty);
        id
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn void(&self) -> TypeId {
        self.index[&Type::Void]
    }

    pub fn bool_(&self) -> TypeId {
        self.index[&Type::Bool]
    }

    pub fn int(&self, width: IntWidth, signed: bool) -> TypeId {
        self.index[&Type::Int(width, signed)]
    }

    pub fn i32_(&self) -> TypeId {
        self.int(IntWidth::W32, true)
    }

    pub fn i64_(&self) -> TypeId {
        self.int(IntWidth::W64, true)
    }

    pub fn define_struct_layout(
        &mut self,
        id: TypeId,
        fields: Vec<(InternedStr, TypeId, u32)>,
        size: u32,
    ) {
        self.struct_layouts.insert(id, fields);
        self.struct_sizes.insert(id, size);
    }

    pub fn struct_field_offset(&self, id: TypeId, name: InternedStr) -> Option<(TypeId, u32)> {
        self.struct_layouts
            .get(&id)?
            .iter()
            .find(|(field_name, _, _)| *field_name == name)
            .map(|(_, ty, off)| (*ty, *off))
    }

    fn struct_size(&self, ty: &Type) -> Option<u32> {
        match ty {
            Type::Struct(_, _) => {
                let id = *self.index.get(ty)?;
                self.struct_sizes.get(&id).copied()
            }
            _ => None,
        }
    }

    /// How many `Pointer` wraps sit around a type; `0` for anything that
    /// isn't itself a pointer. Two types whose levels differ have no
    /// implicit conversion between them regardless of what they point at.
    pub fn pointer_level(&self, id: TypeId) -> u32 {
        match self.get(id) {
            Type::Pointer(inner) => 1 + self.pointer_level(*inner),
            _ => 0,
        }
    }

    /// Cast-cost scoring used by overload resolution: `None` means no
    /// implicit conversion exists, lower is preferred. Only integer widening
    /// and narrowing within a matching sign, and same-width sign changes,
    /// have a cost; everything else (int/float conversions, bool/int,
    /// mismatched pointer levels, differing-sign width changes) is invalid.
    pub fn cast_cost(&self, from: TypeId, to: TypeId) -> Option<u32> {
        if from == to {
            return Some(0);
        }
        if self.pointer_level(from) != self.pointer_level(to) {
            return None;
        }
        match (self.get(from), self.get(to)) {
            (Type::Int(fw, fs), Type::Int(tw, ts)) => {
                let (from_bytes, to_bytes) = (fw.bytes(), tw.bytes());
                match from_bytes.cmp(&to_bytes) {
                    std::cmp::Ordering::Less if fs == ts => Some(to_bytes - from_bytes),
                    std::cmp::Ordering::Greater if fs == ts => Some(2 * (from_bytes - to_bytes)),
                    std::cmp::Ordering::Equal if fs != ts => Some(15),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// The "bigger" of two types for binary-operand balancing: pointers
    /// dominate non-pointers, otherwise the wider type wins, and a tie in
    /// width is broken in favor of the signed operand.
    pub fn larger(&self, a: TypeId, b: TypeId) -> TypeId {
        let (level_a, level_b) = (self.pointer_level(a), self.pointer_level(b));
        if level_a != level_b {
            return if level_a > level_b { a } else { b };
        }
        let bits_of = |id: TypeId| match self.get(id) {
            Type::Int(w, _) => w.bits(),
            Type::Float(w) => w.bytes() * 8,
            Type::Bool => 1,
            Type::Pointer(_) => 64,
            _ => 0,
        };
        let (bits_a, bits_b) = (bits_of(a), bits_of(b));
        if bits_a != bits_b {
            return if bits_a > bits_b { a } else { b };
        }
        match (self.get(a), self.get(b)) {
            (Type::Int(_, false), Type::Int(_, true)) => b,
            _ => a,
        }
    }

    /// Default argument promotion applied to a variadic tail argument:
    /// integers narrower than 32 bits widen to `i32`, pointers and wider
    /// types pass through unchanged, and `void` has no promotion.
    pub fn promote(&self, a: TypeId) -> Option<TypeId> {
        match self.get(a) {
            Type::Void => None,
            Type::Int(w, signed) if w.bits() < 32 => Some(self.int(IntWidth::W32, *signed)),
            _ => Some(a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use string_interner::Symbol as _;

    #[test]
    fn builtins_are_stable_and_unique() {
        let table = TypeTable::new();
        assert_ne!(table.void(), table.bool_());
        assert_ne!(table.i32_(), table.i64_());
    }

    #[test]
    fn interning_deduplicates_pointers() {
        let mut table = TypeTable::new();
        let i32_ty = table.i32_();
        let p1 = table.intern(Type::Pointer(i32_ty));
        let p2 = table.intern(Type::Pointer(i32_ty));
        assert_eq!(p1, p2);
    }

    #[test]
    fn widening_costs_the_byte_difference() {
        let table = TypeTable::new();
        let i32_ty = table.i32_();
        let i64_ty = table.i64_();
        assert_eq!(table.cast_cost(i32_ty, i64_ty), Some(4));
    }

    #[test]
    fn narrowing_is_legal_at_twice_the_byte_difference() {
        let table = TypeTable::new();
        let i32_ty = table.i32_();
        let i64_ty = table.i64_();
        assert_eq!(table.cast_cost(i64_ty, i32_ty), Some(8));
    }

    #[test]
    fn same_width_sign_change_costs_fifteen() {
        let table = TypeTable::new();
        let i32_ty = table.i32_();
        let u32_ty = table.int(IntWidth::W32, false);
        assert_eq!(table.cast_cost(u32_ty, i32_ty), Some(15));
    }

    #[test]
    fn widening_across_a_sign_change_is_rejected() {
        let table = TypeTable::new();
        let u32_ty = table.int(IntWidth::W32, false);
        let i64_ty = table.i64_();
        assert!(table.cast_cost(u32_ty, i64_ty).is_none());
    }

    #[test]
    fn mismatched_pointer_levels_are_rejected() {
        let mut table = TypeTable::new();
        let i32_ty = table.i32_();
        let ptr_ty = table.intern(Type::Pointer(i32_ty));
        assert!(table.cast_cost(ptr_ty, i32_ty).is_none());
    }

    #[test]
    fn int_to_float_has_no_implicit_conversion() {
        let mut table = TypeTable::new();
        let i32_ty = table.i32_();
        let f64_ty = table.intern(Type::Float(FloatWidth::W64));
        assert!(table.cast_cost(i32_ty, f64_ty).is_none());
    }

    #[test]
    fn larger_prefers_wider_then_signed_on_ties() {
        let table = TypeTable::new();
        let i32_ty = table.i32_();
        let i64_ty = table.i64_();
        let u32_ty = table.int(IntWidth::W32, false);
        assert_eq!(table.larger(i32_ty, i64_ty), i64_ty);
        assert_eq!(table.larger(u32_ty, i32_ty), i32_ty);
    }

    #[test]
    fn promote_widens_narrow_ints_and_rejects_void() {
        let table = TypeTable::new();
        let i8_ty = table.int(IntWidth::W8, true);
        assert_eq!(table.promote(i8_ty), Some(table.i32_()));
        assert_eq!(table.promote(table.i64_()), Some(table.i64_()));
        assert_eq!(table.promote(table.void()), None);
    }

    #[test]
    fn struct_layout_lookup() {
        let mut table = TypeTable::new();
        let i32_ty = table.i32_();
        let strukt = table.intern(Type::Struct(SymId(1), InternedStr::try_from_usize(0).unwrap()));
        let field_name = InternedStr::try_from_usize(1).unwrap();
        table.define_struct_layout(strukt, vec![(field_name, i32_ty, 0)], 4);
        assert_eq!(table.struct_field_offset(strukt, field_name), Some((i32_ty, 0)));
    }
}
