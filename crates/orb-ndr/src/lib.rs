//! Descriptor-driven marshaling engine
//!
//! This crate renders argument data to and from the runtime's
//! self-describing binary wire format. A [`TypeDesc`] tree is a reusable
//! plan for one wire type; it is bound to a [`Value`] tree at the moment a
//! call is marshaled or unmarshaled and dropped when the call completes.
//!
//! # Wire format
//!
//! - Primitives align to their natural size (1, 2, 4, or 8 bytes)
//! - Structures align to their widest member
//! - Conformant element counts precede the data they describe
//! - Strings are conformant varying arrays with a NUL terminator
//! - Pointers render in two phases: referent token first, pointee after
//!   the enclosing node's siblings
//!
//! Byte order is corrected only when a stream's declared representation
//! differs from the local one.

mod desc;
mod engine;
mod error;
mod stream;
mod value;
pub mod variant;

pub use desc::{PrimKind, TypeDesc};
pub use engine::{marshal, unmarshal};
pub use error::{NdrError, Result, MAX_WIRE_ELEMENTS};
pub use stream::{
    align_padding, ByteOrder, MarshalStream, Phase, UnmarshalStream, DEFAULT_STREAM_LIMIT,
};
pub use value::Value;
pub use variant::Variant;

/// Re-export bytes for convenience
pub use bytes::{Buf, BufMut, Bytes, BytesMut};
