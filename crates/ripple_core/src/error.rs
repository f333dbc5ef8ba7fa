//! Error types for ripple_core

use thiserror::Error;

/// Errors raised by the viewmodel, runloop and array adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The keypath string could not be normalized
    #[error("invalid keypath: {0:?}")]
    InvalidKeypath(String),

    /// An array method was invoked on a value that is not an array
    #[error("array method `{method}` called on non-array at `{keypath}`")]
    NotAnArray { keypath: String, method: &'static str },

    /// A write addressed an array index too far past the end of the array
    #[error("index `{index}` at `{keypath}` is out of range for an array of length {len}")]
    IndexOutOfRange {
        keypath: String,
        index: String,
        len: usize,
    },

    /// A write was attempted on a computation without a setter
    #[error("computed property `{0}` is read-only")]
    ReadOnlyComputation(String),

    /// A write was attempted outside of a `start`/`end` bracket
    #[error("mutation of `{0}` outside of a runloop cycle")]
    NoActiveCycle(String),

    /// `end` was called without a matching `start`
    #[error("runloop end called with no open cycle")]
    UnbalancedEnd,

    /// A runloop cycle was still open where none is allowed
    #[error("runloop cycle left open (depth {0})")]
    CycleLeftOpen(u32),
}

/// Result type for ripple_core operations
pub type Result<T> = std::result::Result<T, CoreError>;
