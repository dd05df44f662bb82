// Error types for the gdbind runtime.

use std::fmt;
use std::panic::Location;

use gdbind_ffi::{CallError, CallErrorType, InterfaceVersion, OK, VariantType};

/// Errors surfaced to callers of the binding.
#[derive(Debug, Clone, PartialEq)]
pub enum BindError {
    /// Variant decoded as the wrong kind, or a downcast to an unrelated class.
    TypeMismatch { expected: String, actual: String },
    /// A registry pin outlived its slot.
    UseAfterFree,
    /// Instance method called on a nil handle.
    NilDeref { method: &'static str },
    AbiVersionMismatch {
        engine: InterfaceVersion,
        binding: InterfaceVersion,
    },
    /// The engine returned an `Error` code other than `OK`.
    Engine(i64),
    /// A Variant call failed before reaching the method body.
    CallFailed { method: String, error: CallErrorType },
    MethodNotFound { class: &'static str, method: String },
    ClassNotFound(String),
    AlreadyInitialized,
    AlreadyRegistered(String),
    ClassNotRegistered(String),
    InvalidLifecycle { from: &'static str, to: &'static str },
    /// The host instance is already borrowed by a call further up the stack.
    AlreadyBound(&'static str),
    IndexOutOfRange { index: usize, len: usize },
    NotInitialized,
}

impl BindError {
    pub fn variant_mismatch(expected: VariantType, actual: VariantType) -> Self {
        BindError::TypeMismatch {
            expected: expected.name().to_owned(),
            actual: actual.name().to_owned(),
        }
    }

    pub fn class_mismatch(expected: &str, actual: &str) -> Self {
        BindError::TypeMismatch {
            expected: expected.to_owned(),
            actual: actual.to_owned(),
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: expected {expected}, got {actual}")
            }
            BindError::UseAfterFree => write!(f, "use of a released engine handle"),
            BindError::NilDeref { method } => write!(f, "method `{method}` called on a nil handle"),
            BindError::AbiVersionMismatch { engine, binding } => write!(
                f,
                "extension interface {engine} is not compatible with binding {binding}"
            ),
            BindError::Engine(code) => write!(f, "engine error code {code}"),
            BindError::CallFailed { method, error } => {
                write!(f, "call to `{method}` failed: {error:?}")
            }
            BindError::MethodNotFound { class, method } => {
                write!(f, "method not found: {class}::{method}")
            }
            BindError::ClassNotFound(name) => write!(f, "class not found: {name}"),
            BindError::AlreadyInitialized => {
                write!(f, "interface already bound to a different table")
            }
            BindError::AlreadyRegistered(name) => write!(f, "class already registered: {name}"),
            BindError::ClassNotRegistered(name) => write!(f, "class not registered: {name}"),
            BindError::InvalidLifecycle { from, to } => {
                write!(f, "invalid instance lifecycle transition {from} -> {to}")
            }
            BindError::AlreadyBound(class) => write!(f, "instance of {class} is already bound"),
            BindError::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            BindError::NotInitialized => write!(f, "gdbind interface not initialized"),
        }
    }
}

impl std::error::Error for BindError {}

/// Convenience alias used throughout the runtime.
pub type BindResult<T> = Result<T, BindError>;

/// Map an engine `Error` return value. `OK` maps to `Ok(())`.
pub fn check_engine(code: i64) -> BindResult<()> {
    if code == OK {
        Ok(())
    } else {
        Err(BindError::Engine(code))
    }
}

/// Map the call-error struct filled by Variant calls.
pub fn check_call_error(err: &CallError, method: &str) -> BindResult<()> {
    if err.is_ok() {
        Ok(())
    } else {
        Err(BindError::CallFailed {
            method: method.to_owned(),
            error: err.error,
        })
    }
}

// ---------------------------------------------------------------------------
// Fatal errors
// ---------------------------------------------------------------------------

/// Panic payload for memory-safety violations. `ffi_boundary` aborts the
/// process when it sees one instead of returning a default value.
#[derive(Debug)]
pub struct FatalError {
    pub error: BindError,
    pub location: &'static Location<'static>,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal: {} at {}", self.error, self.location)
    }
}

/// Raise a fatal error. Never returns.
#[cold]
pub fn fatal(error: BindError, location: &'static Location<'static>) -> ! {
    std::panic::panic_any(FatalError { error, location })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_ok_maps_to_ok() {
        assert!(check_engine(OK).is_ok());
        assert_eq!(check_engine(31), Err(BindError::Engine(31)));
    }

    #[test]
    fn call_errors_keep_method_name() {
        let err = CallError {
            error: CallErrorType::InvalidMethod,
            argument: 0,
            expected: 0,
        };
        let e = check_call_error(&err, "frobnicate").unwrap_err();
        assert_eq!(e.to_string(), "call to `frobnicate` failed: InvalidMethod");
        assert!(check_call_error(&CallError::OK, "x").is_ok());
    }

    #[test]
    fn mismatch_names_use_engine_spelling() {
        let e = BindError::variant_mismatch(VariantType::Int, VariantType::String);
        assert_eq!(e.to_string(), "type mismatch: expected int, got String");
    }

    #[test]
    fn fatal_payload_carries_location() {
        let payload = std::panic::catch_unwind(|| fatal(BindError::UseAfterFree, Location::caller()))
            .unwrap_err();
        let fatal = payload.downcast_ref::<FatalError>().unwrap();
        assert_eq!(fatal.error, BindError::UseAfterFree);
        assert!(fatal.to_string().contains("error.rs"));
    }
}
