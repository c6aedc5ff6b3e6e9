//! Core runtime data types
//!
//! Identifiers, reference records, resolver addresses, call frame headers,
//! and the error taxonomy.

pub mod addr;
pub mod call;
pub mod error;
pub mod identifiers;
pub mod objref;

pub use addr::{protocol_id, DualStringArray, SecurityBinding, StringBinding};
pub use call::{CallHeader, Extension, ProtocolVersion, ReplyHeader};
pub use error::{wire_status, OrbError, Result};
pub use identifiers::{
    generate_causality_id, Clsid, Iid, Ipid, Oid, OidAllocator, Oxid, SetId,
};
pub use objref::{ref_flags, std_flags, RefRecord, StdRef, REF_SIGNATURE};

/// Upper bound on batch sizes accepted from the wire (interface queries,
/// reference-count changes, ping deltas).
pub const MAX_BATCH: usize = 1024;
