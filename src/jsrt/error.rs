//! Host Engine Error Codes
//!
//! Every host engine operation reports failure through `JsError`. Callers
//! propagate the first failure unchanged; there are no retries and no
//! partial results.

use thiserror::Error;

/// Errors reported by host engine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JsError {
    /// An argument was not valid for the requested operation
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The operation requires an object value
    #[error("argument is not an object")]
    NotAnObject,

    /// The operation requires a function value
    #[error("argument is not a function")]
    NotAFunction,

    /// The referenced value has been collected or never existed
    #[error("invalid handle: the referenced value is no longer live")]
    InvalidHandle,

    /// No context is current on this runtime
    #[error("no context is current")]
    NoCurrentContext,

    /// An index was outside the representable range
    #[error("index out of range")]
    OutOfRange,

    /// A script-visible exception is pending in the runtime
    #[error("script exception pending")]
    ScriptException,

    /// An internal-field slot index was not reserved for the object
    #[error("internal field index {0} is not reserved")]
    NoInternalField(usize),

    /// The configured heap slot limit was reached
    #[error("engine heap limit reached")]
    OutOfMemory,
}

/// Result type for host engine operations
pub type JsResult<T> = Result<T, JsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            JsError::InvalidArgument("bad descriptor").to_string(),
            "invalid argument: bad descriptor"
        );
        assert_eq!(JsError::NoCurrentContext.to_string(), "no context is current");
        assert_eq!(
            JsError::NoInternalField(3).to_string(),
            "internal field index 3 is not reserved"
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(JsError::NotAnObject, JsError::NotAnObject);
        assert_ne!(JsError::NotAnObject, JsError::NotAFunction);
    }
}
