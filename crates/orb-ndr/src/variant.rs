//! Leaf codecs for tagged-union values and dynamically-typed arrays
//!
//! These are the serialization primitives the engine calls into for the
//! `Variant` and `VarArray` descriptor leaves. A tagged value is a u16
//! discriminant followed by its aligned payload; a dynamically-typed array
//! is a u32 count followed by that many tagged values.

use crate::error::{NdrError, Result, MAX_WIRE_ELEMENTS};
use crate::stream::{MarshalStream, UnmarshalStream};

/// Discriminant values for [`Variant`].
mod tag {
    pub const EMPTY: u16 = 0;
    pub const BOOL: u16 = 1;
    pub const I32: u16 = 2;
    pub const I64: u16 = 3;
    pub const F64: u16 = 4;
    pub const STR: u16 = 5;
}

/// A dynamically-typed (tagged-union) value.
#[derive(Clone, Debug, PartialEq)]
pub enum Variant {
    Empty,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
}

impl Variant {
    fn tag(&self) -> u16 {
        match self {
            Variant::Empty => tag::EMPTY,
            Variant::Bool(_) => tag::BOOL,
            Variant::I32(_) => tag::I32,
            Variant::I64(_) => tag::I64,
            Variant::F64(_) => tag::F64,
            Variant::Str(_) => tag::STR,
        }
    }
}

/// Encode one tagged value.
pub fn encode_variant(v: &Variant, s: &mut MarshalStream) -> Result<()> {
    s.align(2)?;
    s.put_u16(v.tag())?;
    match v {
        Variant::Empty => Ok(()),
        Variant::Bool(b) => s.put_u8(u8::from(*b)),
        Variant::I32(n) => {
            s.align(4)?;
            s.put_i32(*n)
        }
        Variant::I64(n) => {
            s.align(8)?;
            s.put_i64(*n)
        }
        Variant::F64(x) => {
            s.align(8)?;
            s.put_f64(*x)
        }
        Variant::Str(text) => {
            s.align(4)?;
            let bytes = text.as_bytes();
            s.put_u32(bytes.len() as u32)?;
            s.put_slice(bytes)
        }
    }
}

/// Decode one tagged value; an unknown discriminant is a bad-type error.
pub fn decode_variant(s: &mut UnmarshalStream) -> Result<Variant> {
    s.align(2)?;
    let t = s.get_u16()?;
    match t {
        tag::EMPTY => Ok(Variant::Empty),
        tag::BOOL => Ok(Variant::Bool(s.get_u8()? != 0)),
        tag::I32 => {
            s.align(4)?;
            Ok(Variant::I32(s.get_i32()?))
        }
        tag::I64 => {
            s.align(8)?;
            Ok(Variant::I64(s.get_i64()?))
        }
        tag::F64 => {
            s.align(8)?;
            Ok(Variant::F64(s.get_f64()?))
        }
        tag::STR => {
            s.align(4)?;
            let len = s.get_u32()? as usize;
            if len > MAX_WIRE_ELEMENTS {
                return Err(NdrError::CountLimitExceeded {
                    requested: len,
                    limit: MAX_WIRE_ELEMENTS,
                });
            }
            let bytes = s.copy_bytes(len)?;
            let text = String::from_utf8(bytes)
                .map_err(|e| NdrError::InvalidString(e.to_string()))?;
            Ok(Variant::Str(text))
        }
        other => Err(NdrError::BadDiscriminant(other)),
    }
}

/// Encode a dynamically-typed array.
pub fn encode_var_array(items: &[Variant], s: &mut MarshalStream) -> Result<()> {
    s.align(4)?;
    s.put_u32(items.len() as u32)?;
    for item in items {
        encode_variant(item, s)?;
    }
    Ok(())
}

/// Decode a dynamically-typed array.
pub fn decode_var_array(s: &mut UnmarshalStream) -> Result<Vec<Variant>> {
    s.align(4)?;
    let count = s.get_u32()? as usize;
    if count > MAX_WIRE_ELEMENTS {
        return Err(NdrError::CountLimitExceeded {
            requested: count,
            limit: MAX_WIRE_ELEMENTS,
        });
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(decode_variant(s)?);
    }
    Ok(items)
}
