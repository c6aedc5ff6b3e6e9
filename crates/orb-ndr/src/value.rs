//! Runtime values descriptors bind to
//!
//! The engine does not touch raw memory; a descriptor is bound to a
//! [`Value`] tree for the duration of one marshal or unmarshal call. The
//! tree is plain heap data and is dropped when the call returns.

use bytes::Bytes;

use crate::variant::Variant;

/// A value bound to a [`TypeDesc`](crate::TypeDesc) node.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Enumerated value (16 bits on the wire).
    Enum(u16),
    /// Struct fields in declaration order. For a conformant struct the
    /// trailing array is the last element, as `Value::Array`.
    Struct(Vec<Value>),
    /// Array elements (fixed, conformant, or conformant-varying).
    Array(Vec<Value>),
    /// Pointer cell. `None` is legal only under a unique pointer.
    Pointer(Option<Box<Value>>),
    /// Narrow string.
    Str(String),
    /// Wide string.
    WStr(String),
    /// Raw byte payload; the fast path for conformant `u8` arrays. May
    /// alias the input buffer when decoded from an inbound request.
    Payload(Bytes),
    /// Pre-encoded reference record for a remote-interface pointer.
    Interface(Bytes),
    /// Tagged-union leaf.
    Variant(Variant),
    /// Dynamically-typed array leaf.
    VarArray(Vec<Variant>),
}

impl Value {
    /// Short kind name used in mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::U8(_) => "u8",
            Value::I8(_) => "i8",
            Value::U16(_) => "u16",
            Value::I16(_) => "i16",
            Value::U32(_) => "u32",
            Value::I32(_) => "i32",
            Value::U64(_) => "u64",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Enum(_) => "enum",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
            Value::Pointer(_) => "pointer",
            Value::Str(_) => "string",
            Value::WStr(_) => "wstring",
            Value::Payload(_) => "payload",
            Value::Interface(_) => "interface",
            Value::Variant(_) => "variant",
            Value::VarArray(_) => "vararray",
        }
    }

    /// Non-null pointer cell.
    pub fn some(inner: Value) -> Self {
        Value::Pointer(Some(Box::new(inner)))
    }

    /// Null pointer cell.
    pub fn null() -> Self {
        Value::Pointer(None)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}
