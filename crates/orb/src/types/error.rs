//! Runtime error taxonomy

use thiserror::Error;

use super::identifiers::{Clsid, Iid, Ipid, Oid, Oxid, SetId};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, OrbError>;

/// Runtime errors
///
/// Single-entity lookups fail fast with a specific kind and no side
/// effects. Batch operations never abort on the first failure; they
/// aggregate and report a verdict instead.
#[derive(Error, Debug)]
pub enum OrbError {
    /// Unknown object identifier
    #[error("invalid identifier: OID {0}")]
    ObjectNotFound(Oid),

    /// Unknown exporter identifier
    #[error("invalid identifier: OXID {0}")]
    ExporterNotFound(Oxid),

    /// Unknown interface-pointer identifier
    #[error("invalid identifier: IPID {0}")]
    InterfaceNotFound(Ipid),

    /// Unknown ping set
    #[error("invalid identifier: ping set {0}")]
    SetNotFound(SetId),

    /// The object does not expose the requested interface
    #[error("no such interface: {0}")]
    NoSuchInterface(Iid),

    /// Method number exceeds the interface's dispatch table
    #[error("method {opnum} out of range (table holds {count})")]
    MethodOutOfRange { opnum: u16, count: usize },

    /// Wire data failed to marshal or unmarshal; covers truncation and
    /// the marshal stream's out-of-memory ceiling
    #[error("wire error: {0}")]
    Wire(#[from] orb_ndr::NdrError),

    /// Malformed frame at the runtime layer (bad signature, bad flags)
    #[error("wire format invalid: {0}")]
    InvalidFrame(String),

    /// Calling channel failed authentication
    #[error("access denied")]
    AccessDenied,

    /// No factory registered for the class
    #[error("class not registered: {0}")]
    ClassNotRegistered(Clsid),

    /// Every sub-operation of a batch failed
    #[error("not supported: all requested interfaces failed")]
    NotSupported,

    /// Some but not all sub-operations of a batch failed
    #[error("partial success: {failed} of {total} sub-operations failed")]
    Partial { failed: usize, total: usize },

    /// The transport failed the round trip; never retried internally,
    /// surfaced so the caller can decide
    #[error("transport failure: {0}")]
    Transport(String),

    /// Remote side reported a status this runtime has no richer shape for
    #[error("remote fault: 0x{0:08x}")]
    Fault(u32),
}

/// Status codes carried in reply frames.
pub mod wire_status {
    /// Success
    pub const OK: u32 = 0x0000_0000;
    /// Batch succeeded for some but not all elements
    pub const PARTIAL: u32 = 0x0008_0012;
    /// Interface not supported
    pub const NO_INTERFACE: u32 = 0x8000_4002;
    /// Unspecified failure
    pub const FAIL: u32 = 0x8000_4005;
    /// Unknown OID/OXID/IPID
    pub const INVALID_IDENTIFIER: u32 = 0x8001_0114;
    /// Class not registered with the coordinator
    pub const CLASS_NOT_REGISTERED: u32 = 0x8004_0154;
    /// Caller failed channel authentication
    pub const ACCESS_DENIED: u32 = 0x8007_0005;
    /// Method number past the end of the dispatch table
    pub const OPNUM_OUT_OF_RANGE: u32 = 0x8007_06D1;
    /// Allocation failed while rendering the reply
    pub const OUT_OF_MEMORY: u32 = 0x8007_000E;
}

impl OrbError {
    /// Reconstruct an error from a reply frame's status code.
    pub fn from_wire_status(status: u32) -> OrbError {
        match status {
            wire_status::ACCESS_DENIED => OrbError::AccessDenied,
            wire_status::NO_INTERFACE => OrbError::NotSupported,
            other => OrbError::Fault(other),
        }
    }

    /// Map an error to the status code its reply frame carries.
    pub fn to_wire_status(&self) -> u32 {
        match self {
            OrbError::ObjectNotFound(_)
            | OrbError::ExporterNotFound(_)
            | OrbError::InterfaceNotFound(_)
            | OrbError::SetNotFound(_) => wire_status::INVALID_IDENTIFIER,
            OrbError::NoSuchInterface(_) | OrbError::NotSupported => wire_status::NO_INTERFACE,
            OrbError::MethodOutOfRange { .. } => wire_status::OPNUM_OUT_OF_RANGE,
            OrbError::Wire(orb_ndr::NdrError::OutOfMemory { .. }) => wire_status::OUT_OF_MEMORY,
            OrbError::AccessDenied => wire_status::ACCESS_DENIED,
            OrbError::ClassNotRegistered(_) => wire_status::CLASS_NOT_REGISTERED,
            OrbError::Partial { .. } => wire_status::PARTIAL,
            _ => wire_status::FAIL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            OrbError::ObjectNotFound(Oid::new(1)).to_wire_status(),
            wire_status::INVALID_IDENTIFIER
        );
        assert_eq!(OrbError::AccessDenied.to_wire_status(), wire_status::ACCESS_DENIED);
        assert_eq!(
            OrbError::Partial { failed: 1, total: 3 }.to_wire_status(),
            wire_status::PARTIAL
        );
    }
}
