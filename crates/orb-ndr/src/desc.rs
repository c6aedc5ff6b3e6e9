//! Self-describing type descriptors
//!
//! A descriptor is a reusable plan for one wire type. It carries no data of
//! its own; it is bound to a [`Value`](crate::Value) tree at the moment a
//! marshal or unmarshal call runs. Descriptor trees are built per call from
//! plain heap values and dropped when the call completes — nothing retains
//! a descriptor across calls.

/// Fixed-size primitive kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl PrimKind {
    /// Wire size in bytes; also the alignment requirement.
    pub fn size(self) -> usize {
        match self {
            PrimKind::U8 | PrimKind::I8 => 1,
            PrimKind::U16 | PrimKind::I16 => 2,
            PrimKind::U32 | PrimKind::I32 | PrimKind::F32 => 4,
            PrimKind::U64 | PrimKind::I64 | PrimKind::F64 => 8,
        }
    }
}

/// One node of a descriptor tree.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeDesc {
    /// Fixed-size primitive, aligned to its own size.
    Prim(PrimKind),
    /// Enumerated value, 16 bits on the wire.
    Enum,
    /// Structure with a fixed layout; fields render in order.
    Struct(Vec<TypeDesc>),
    /// Structure whose final member is a conformant array. The element
    /// count is committed at the front of the structure, before any field
    /// renders.
    ConformantStruct {
        fields: Vec<TypeDesc>,
        tail: Box<TypeDesc>,
    },
    /// Array with a compile-time element count; no header.
    FixedArray { elem: Box<TypeDesc>, len: usize },
    /// Array preceded by its u32 element count.
    ConformantArray(Box<TypeDesc>),
    /// Array preceded by {max, offset, actual} conformance/variance.
    ConformantVaryingArray(Box<TypeDesc>),
    /// Call-by-reference pointer: never null, no wire representation of
    /// the pointer itself.
    RefPtr(Box<TypeDesc>),
    /// Nullable pointer: 4-byte referent token, pointee deferred.
    UniquePtr(Box<TypeDesc>),
    /// Narrow (byte) string with {max, offset, actual} header and NUL.
    CString,
    /// Wide (u16) string with {max, offset, actual} header and NUL.
    WString,
    /// Remote-interface pointer: a counted, pre-encoded reference record.
    Interface,
    /// Tagged-union value; delegated to the variant leaf codec.
    Variant,
    /// Dynamically-typed array of tagged-union values.
    VarArray,
}

impl TypeDesc {
    /// Convenience constructor for a unique pointer node.
    pub fn unique(inner: TypeDesc) -> Self {
        TypeDesc::UniquePtr(Box::new(inner))
    }

    /// Convenience constructor for a reference pointer node.
    pub fn by_ref(inner: TypeDesc) -> Self {
        TypeDesc::RefPtr(Box::new(inner))
    }

    /// Convenience constructor for a conformant array node.
    pub fn conformant(elem: TypeDesc) -> Self {
        TypeDesc::ConformantArray(Box::new(elem))
    }

    /// Alignment requirement of this node's fixed representation.
    pub fn align(&self) -> usize {
        match self {
            TypeDesc::Prim(p) => p.size(),
            TypeDesc::Enum => 2,
            TypeDesc::Struct(fields) => {
                fields.iter().map(TypeDesc::align).max().unwrap_or(1)
            }
            TypeDesc::ConformantStruct { fields, tail } => fields
                .iter()
                .map(TypeDesc::align)
                .chain([tail.align(), 4])
                .max()
                .unwrap_or(4),
            TypeDesc::FixedArray { elem, .. } => elem.align(),
            TypeDesc::ConformantArray(elem) => elem.align().max(4),
            TypeDesc::ConformantVaryingArray(elem) => elem.align().max(4),
            // Only the referent token renders in place.
            TypeDesc::RefPtr(inner) => inner.align(),
            TypeDesc::UniquePtr(_) => 4,
            TypeDesc::CString | TypeDesc::WString => 4,
            TypeDesc::Interface => 4,
            TypeDesc::Variant => 8,
            TypeDesc::VarArray => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prim_sizes() {
        assert_eq!(PrimKind::U8.size(), 1);
        assert_eq!(PrimKind::I16.size(), 2);
        assert_eq!(PrimKind::F32.size(), 4);
        assert_eq!(PrimKind::U64.size(), 8);
    }

    #[test]
    fn test_struct_align_is_widest_member() {
        let desc = TypeDesc::Struct(vec![
            TypeDesc::Prim(PrimKind::U8),
            TypeDesc::Prim(PrimKind::U64),
            TypeDesc::Prim(PrimKind::U16),
        ]);
        assert_eq!(desc.align(), 8);
    }

    #[test]
    fn test_pointer_align_is_token() {
        let desc = TypeDesc::unique(TypeDesc::Prim(PrimKind::U64));
        assert_eq!(desc.align(), 4);
    }
}
