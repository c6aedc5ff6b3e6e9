//! Two-phase marshal/unmarshal engine
//!
//! Every descriptor node renders in two phases. Phase 1 writes (or reads)
//! the node's fixed-size representation; a pointer-valued member emits only
//! its 4-byte referent token and parks the pointee on a deferral queue.
//! Phase 2 drains the queue in FIFO order, recursing into pointees and
//! variable-length payloads. The split commits a conformant array's element
//! count before its elements render, and keeps a pointee out of the byte
//! stream until every sibling of its pointer has been processed.

use crate::desc::{PrimKind, TypeDesc};
use crate::error::{NdrError, Result, MAX_WIRE_ELEMENTS};
use crate::stream::{MarshalStream, UnmarshalStream};
use crate::value::Value;
use crate::variant;

/// Marshal `value` as described by `desc` into `stream`.
pub fn marshal(desc: &TypeDesc, value: &Value, stream: &mut MarshalStream) -> Result<()> {
    let mut deferred: Vec<(&TypeDesc, &Value)> = Vec::new();
    marshal_fixed(desc, value, stream, &mut deferred)?;
    let mut i = 0;
    while i < deferred.len() {
        let (d, v) = deferred[i];
        marshal_fixed(d, v, stream, &mut deferred)?;
        i += 1;
    }
    Ok(())
}

/// Unmarshal one value described by `desc` from `stream`.
pub fn unmarshal(desc: &TypeDesc, stream: &mut UnmarshalStream) -> Result<Value> {
    let mut pending: Vec<(&TypeDesc, Vec<Step>)> = Vec::new();
    let mut root = decode_fixed(desc, stream, &mut Vec::new(), &mut pending)?;

    let mut i = 0;
    while i < pending.len() {
        let (d, path) = (pending[i].0, pending[i].1.clone());
        let mut nested: Vec<(&TypeDesc, Vec<Step>)> = Vec::new();
        let pointee = decode_fixed(d, stream, &mut Vec::new(), &mut nested)?;
        for (nd, rel) in nested {
            let mut full = path.clone();
            full.push(Step::Deref);
            full.extend(rel);
            pending.push((nd, full));
        }
        fill_pointer(&mut root, &path, pointee)?;
        i += 1;
    }
    Ok(root)
}

/// Navigation step into a value tree under construction.
#[derive(Clone, Debug)]
enum Step {
    Field(usize),
    Elem(usize),
    Deref,
}

fn mismatch(expected: &'static str, got: &Value) -> NdrError {
    NdrError::DescriptorMismatch {
        expected,
        got: got.kind(),
    }
}

fn check_count(count: usize) -> Result<usize> {
    if count > MAX_WIRE_ELEMENTS {
        return Err(NdrError::CountLimitExceeded {
            requested: count,
            limit: MAX_WIRE_ELEMENTS,
        });
    }
    Ok(count)
}

fn marshal_fixed<'a>(
    desc: &'a TypeDesc,
    value: &'a Value,
    s: &mut MarshalStream,
    deferred: &mut Vec<(&'a TypeDesc, &'a Value)>,
) -> Result<()> {
    match (desc, value) {
        (TypeDesc::Prim(kind), v) => marshal_prim(*kind, v, s),
        (TypeDesc::Enum, Value::Enum(n)) => {
            s.align(2)?;
            s.put_u16(*n)
        }
        (TypeDesc::Struct(fields), Value::Struct(values)) => {
            if fields.len() != values.len() {
                return Err(mismatch("struct", value));
            }
            s.align(desc.align())?;
            for (fd, fv) in fields.iter().zip(values) {
                marshal_fixed(fd, fv, s, deferred)?;
            }
            Ok(())
        }
        (TypeDesc::ConformantStruct { fields, tail }, Value::Struct(values)) => {
            if values.len() != fields.len() + 1 {
                return Err(mismatch("conformant struct", value));
            }
            let (tail_value, field_values) = values.split_last().expect("non-empty");
            s.align(desc.align())?;
            // Element count of the trailing array commits before any
            // field renders.
            let count = match tail_value {
                Value::Array(elems) => elems.len(),
                Value::Payload(bytes) => bytes.len(),
                other => return Err(mismatch("array tail", other)),
            };
            s.put_u32(count as u32)?;
            for (fd, fv) in fields.iter().zip(field_values) {
                marshal_fixed(fd, fv, s, deferred)?;
            }
            marshal_elements(tail, tail_value, s, deferred)
        }
        (TypeDesc::FixedArray { elem, len }, Value::Array(elems)) => {
            if elems.len() != *len {
                return Err(mismatch("fixed array", value));
            }
            for ev in elems {
                marshal_fixed(elem, ev, s, deferred)?;
            }
            Ok(())
        }
        (TypeDesc::ConformantArray(elem), v) => {
            s.align(elem.align().max(4))?;
            let count = element_count(v)?;
            s.put_u32(count as u32)?;
            marshal_elements(elem, v, s, deferred)
        }
        (TypeDesc::ConformantVaryingArray(elem), v) => {
            s.align(elem.align().max(4))?;
            let count = element_count(v)?;
            s.put_u32(count as u32)?; // max
            s.put_u32(0)?; // offset
            s.put_u32(count as u32)?; // actual
            marshal_elements(elem, v, s, deferred)
        }
        (TypeDesc::RefPtr(inner), Value::Pointer(cell)) => {
            // Call-by-reference: the pointer itself never renders and the
            // pointee follows inline.
            let pointee = cell.as_deref().ok_or(NdrError::NullRefPointer)?;
            marshal_fixed(inner, pointee, s, deferred)
        }
        (TypeDesc::UniquePtr(inner), Value::Pointer(cell)) => {
            s.align(4)?;
            match cell {
                None => s.put_u32(0),
                Some(pointee) => {
                    let token = s.next_referent();
                    s.put_u32(token)?;
                    deferred.push((inner, pointee));
                    Ok(())
                }
            }
        }
        (TypeDesc::CString, Value::Str(text)) => {
            s.align(4)?;
            let with_nul = text.len() + 1;
            s.put_u32(with_nul as u32)?; // max
            s.put_u32(0)?; // offset
            s.put_u32(with_nul as u32)?; // actual
            s.put_slice(text.as_bytes())?;
            s.put_u8(0)
        }
        (TypeDesc::WString, Value::WStr(text)) => {
            s.align(4)?;
            let units: Vec<u16> = text.encode_utf16().collect();
            let with_nul = units.len() + 1;
            s.put_u32(with_nul as u32)?;
            s.put_u32(0)?;
            s.put_u32(with_nul as u32)?;
            for unit in units {
                s.put_u16(unit)?;
            }
            s.put_u16(0)
        }
        (TypeDesc::Interface, Value::Interface(record)) => {
            s.align(4)?;
            s.put_u32(record.len() as u32)?;
            s.put_slice(record)
        }
        (TypeDesc::Variant, Value::Variant(v)) => {
            s.align(8)?;
            variant::encode_variant(v, s)
        }
        (TypeDesc::VarArray, Value::VarArray(items)) => variant::encode_var_array(items, s),
        (_, got) => Err(mismatch(desc_name(desc), got)),
    }
}

fn marshal_prim(kind: PrimKind, value: &Value, s: &mut MarshalStream) -> Result<()> {
    s.align(kind.size())?;
    match (kind, value) {
        (PrimKind::U8, Value::U8(v)) => s.put_u8(*v),
        (PrimKind::I8, Value::I8(v)) => s.put_i8(*v),
        (PrimKind::U16, Value::U16(v)) => s.put_u16(*v),
        (PrimKind::I16, Value::I16(v)) => s.put_i16(*v),
        (PrimKind::U32, Value::U32(v)) => s.put_u32(*v),
        (PrimKind::I32, Value::I32(v)) => s.put_i32(*v),
        (PrimKind::U64, Value::U64(v)) => s.put_u64(*v),
        (PrimKind::I64, Value::I64(v)) => s.put_i64(*v),
        (PrimKind::F32, Value::F32(v)) => s.put_f32(*v),
        (PrimKind::F64, Value::F64(v)) => s.put_f64(*v),
        (_, got) => Err(mismatch("primitive", got)),
    }
}

fn element_count(value: &Value) -> Result<usize> {
    match value {
        Value::Array(elems) => Ok(elems.len()),
        Value::Payload(bytes) => Ok(bytes.len()),
        other => Err(mismatch("array", other)),
    }
}

fn marshal_elements<'a>(
    elem: &'a TypeDesc,
    value: &'a Value,
    s: &mut MarshalStream,
    deferred: &mut Vec<(&'a TypeDesc, &'a Value)>,
) -> Result<()> {
    match value {
        Value::Payload(bytes) => {
            if !matches!(elem, TypeDesc::Prim(PrimKind::U8)) {
                return Err(mismatch("u8 payload", value));
            }
            s.put_slice(bytes)
        }
        Value::Array(elems) => {
            for ev in elems {
                marshal_fixed(elem, ev, s, deferred)?;
            }
            Ok(())
        }
        other => Err(mismatch("array", other)),
    }
}

fn decode_fixed<'a>(
    desc: &'a TypeDesc,
    s: &mut UnmarshalStream,
    path: &mut Vec<Step>,
    pending: &mut Vec<(&'a TypeDesc, Vec<Step>)>,
) -> Result<Value> {
    match desc {
        TypeDesc::Prim(kind) => decode_prim(*kind, s),
        TypeDesc::Enum => {
            s.align(2)?;
            Ok(Value::Enum(s.get_u16()?))
        }
        TypeDesc::Struct(fields) => {
            s.align(desc.align())?;
            let mut values = Vec::with_capacity(fields.len());
            for (i, fd) in fields.iter().enumerate() {
                path.push(Step::Field(i));
                values.push(decode_fixed(fd, s, path, pending)?);
                path.pop();
            }
            Ok(Value::Struct(values))
        }
        TypeDesc::ConformantStruct { fields, tail } => {
            s.align(desc.align())?;
            let count = check_count(s.get_u32()? as usize)?;
            let mut values = Vec::with_capacity(fields.len() + 1);
            for (i, fd) in fields.iter().enumerate() {
                path.push(Step::Field(i));
                values.push(decode_fixed(fd, s, path, pending)?);
                path.pop();
            }
            path.push(Step::Field(fields.len()));
            let tail_value = decode_elements(tail, count, s, path, pending)?;
            path.pop();
            values.push(tail_value);
            Ok(Value::Struct(values))
        }
        TypeDesc::FixedArray { elem, len } => {
            let mut elems = Vec::with_capacity(*len);
            for i in 0..*len {
                path.push(Step::Elem(i));
                elems.push(decode_fixed(elem, s, path, pending)?);
                path.pop();
            }
            Ok(Value::Array(elems))
        }
        TypeDesc::ConformantArray(elem) => {
            s.align(elem.align().max(4))?;
            let count = check_count(s.get_u32()? as usize)?;
            decode_elements(elem, count, s, path, pending)
        }
        TypeDesc::ConformantVaryingArray(elem) => {
            s.align(elem.align().max(4))?;
            let max = s.get_u32()?;
            let offset = s.get_u32()?;
            let actual = s.get_u32()?;
            if offset != 0 || u64::from(offset) + u64::from(actual) > u64::from(max) {
                return Err(NdrError::ConformanceMismatch {
                    max_count: max,
                    offset,
                    actual_count: actual,
                });
            }
            let count = check_count(actual as usize)?;
            decode_elements(elem, count, s, path, pending)
        }
        TypeDesc::RefPtr(inner) => {
            path.push(Step::Deref);
            let pointee = decode_fixed(inner, s, path, pending)?;
            path.pop();
            Ok(Value::some(pointee))
        }
        TypeDesc::UniquePtr(inner) => {
            s.align(4)?;
            let token = s.get_u32()?;
            if token == 0 {
                Ok(Value::null())
            } else {
                pending.push((inner, path.clone()));
                Ok(Value::null()) // filled when the deferral drains
            }
        }
        TypeDesc::CString => {
            let bytes = decode_string_payload(s, 1)?;
            let mut raw = bytes;
            if raw.last() == Some(&0) {
                raw.pop();
            }
            let text =
                String::from_utf8(raw).map_err(|e| NdrError::InvalidString(e.to_string()))?;
            Ok(Value::Str(text))
        }
        TypeDesc::WString => {
            let raw = decode_string_payload(s, 2)?;
            let mut units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| match s.order() {
                    crate::stream::ByteOrder::LittleEndian => {
                        u16::from_le_bytes([pair[0], pair[1]])
                    }
                    crate::stream::ByteOrder::BigEndian => u16::from_be_bytes([pair[0], pair[1]]),
                })
                .collect();
            if units.last() == Some(&0) {
                units.pop();
            }
            let text = String::from_utf16(&units)
                .map_err(|e| NdrError::InvalidString(e.to_string()))?;
            Ok(Value::WStr(text))
        }
        TypeDesc::Interface => {
            s.align(4)?;
            let len = check_count(s.get_u32()? as usize)?;
            Ok(Value::Interface(s.take_bytes(len)?))
        }
        TypeDesc::Variant => {
            s.align(8)?;
            Ok(Value::Variant(variant::decode_variant(s)?))
        }
        TypeDesc::VarArray => Ok(Value::VarArray(variant::decode_var_array(s)?)),
    }
}

fn decode_prim(kind: PrimKind, s: &mut UnmarshalStream) -> Result<Value> {
    s.align(kind.size())?;
    Ok(match kind {
        PrimKind::U8 => Value::U8(s.get_u8()?),
        PrimKind::I8 => Value::I8(s.get_i8()?),
        PrimKind::U16 => Value::U16(s.get_u16()?),
        PrimKind::I16 => Value::I16(s.get_i16()?),
        PrimKind::U32 => Value::U32(s.get_u32()?),
        PrimKind::I32 => Value::I32(s.get_i32()?),
        PrimKind::U64 => Value::U64(s.get_u64()?),
        PrimKind::I64 => Value::I64(s.get_i64()?),
        PrimKind::F32 => Value::F32(s.get_f32()?),
        PrimKind::F64 => Value::F64(s.get_f64()?),
    })
}

fn decode_elements<'a>(
    elem: &'a TypeDesc,
    count: usize,
    s: &mut UnmarshalStream,
    path: &mut Vec<Step>,
    pending: &mut Vec<(&'a TypeDesc, Vec<Step>)>,
) -> Result<Value> {
    if matches!(elem, TypeDesc::Prim(PrimKind::U8)) {
        // Byte payloads alias the input buffer when the phase permits.
        return Ok(Value::Payload(s.take_bytes(count)?));
    }
    let mut elems = Vec::with_capacity(count);
    for i in 0..count {
        path.push(Step::Elem(i));
        elems.push(decode_fixed(elem, s, path, pending)?);
        path.pop();
    }
    Ok(Value::Array(elems))
}

/// Read a {max, offset, actual} string header and its raw payload.
fn decode_string_payload(s: &mut UnmarshalStream, unit: usize) -> Result<Vec<u8>> {
    s.align(4)?;
    let max = s.get_u32()?;
    let offset = s.get_u32()?;
    let actual = s.get_u32()?;
    if offset != 0 {
        return Err(NdrError::InvalidString("non-zero string offset".into()));
    }
    if actual > max {
        return Err(NdrError::ConformanceMismatch {
            max_count: max,
            offset,
            actual_count: actual,
        });
    }
    let units = check_count(actual as usize)?;
    s.copy_bytes(units * unit)
}

fn fill_pointer(root: &mut Value, path: &[Step], pointee: Value) -> Result<()> {
    let mut cur = root;
    for step in path {
        cur = match (step, cur) {
            (Step::Field(i), Value::Struct(fields)) => fields
                .get_mut(*i)
                .ok_or(NdrError::DescriptorMismatch {
                    expected: "struct field",
                    got: "missing",
                })?,
            (Step::Elem(i), Value::Array(elems)) => elems
                .get_mut(*i)
                .ok_or(NdrError::DescriptorMismatch {
                    expected: "array element",
                    got: "missing",
                })?,
            (Step::Deref, Value::Pointer(Some(inner))) => inner.as_mut(),
            (_, got) => {
                return Err(NdrError::DescriptorMismatch {
                    expected: "pointer path",
                    got: got.kind(),
                })
            }
        };
    }
    match cur {
        Value::Pointer(cell) => {
            *cell = Some(Box::new(pointee));
            Ok(())
        }
        got => Err(NdrError::DescriptorMismatch {
            expected: "pointer",
            got: got.kind(),
        }),
    }
}

fn desc_name(desc: &TypeDesc) -> &'static str {
    match desc {
        TypeDesc::Prim(_) => "primitive",
        TypeDesc::Enum => "enum",
        TypeDesc::Struct(_) => "struct",
        TypeDesc::ConformantStruct { .. } => "conformant struct",
        TypeDesc::FixedArray { .. } => "fixed array",
        TypeDesc::ConformantArray(_) => "conformant array",
        TypeDesc::ConformantVaryingArray(_) => "conformant varying array",
        TypeDesc::RefPtr(_) => "ref pointer",
        TypeDesc::UniquePtr(_) => "unique pointer",
        TypeDesc::CString => "string",
        TypeDesc::WString => "wstring",
        TypeDesc::Interface => "interface",
        TypeDesc::Variant => "variant",
        TypeDesc::VarArray => "vararray",
    }
}
