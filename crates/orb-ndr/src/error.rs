//! Marshaling engine error types

use thiserror::Error;

/// Upper bound on element counts read from the wire before allocating.
///
/// A hostile or corrupt count field must not drive `Vec::with_capacity`
/// into an enormous allocation; anything above this limit is rejected as
/// invalid wire data.
pub const MAX_WIRE_ELEMENTS: usize = 1 << 20;

/// Marshaling and unmarshaling errors
#[derive(Debug, Error)]
pub enum NdrError {
    /// Read cursor ran past the end of the input buffer
    #[error("wire format invalid: needed {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// Marshal stream would grow past its configured ceiling
    #[error("out of memory: stream would grow to {requested} bytes, limit {limit}")]
    OutOfMemory { requested: usize, limit: usize },

    /// Tagged-union carried a discriminant the codec does not know
    #[error("bad type: unknown union discriminant {0}")]
    BadDiscriminant(u16),

    /// String payload failed validation (encoding, terminator, offset)
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// A reference pointer was bound to a null value
    #[error("reference pointer bound to null")]
    NullRefPointer,

    /// Descriptor and bound value disagree on shape
    #[error("descriptor mismatch: expected {expected}, got {got}")]
    DescriptorMismatch {
        expected: &'static str,
        got: &'static str,
    },

    /// Element count from the wire exceeds the allocation bound
    #[error("wire element count {requested} exceeds limit {limit}")]
    CountLimitExceeded { requested: usize, limit: usize },

    /// Varying header is inconsistent (offset + actual > max)
    #[error("conformance mismatch: max {max_count}, offset {offset}, actual {actual_count}")]
    ConformanceMismatch {
        max_count: u32,
        offset: u32,
        actual_count: u32,
    },
}

/// Result type for marshaling operations
pub type Result<T> = std::result::Result<T, NdrError>;
