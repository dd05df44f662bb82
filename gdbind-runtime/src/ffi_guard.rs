// FFI boundary guard: wraps host callbacks so a panic never unwinds into
// engine C code.

use crate::error::FatalError;
use crate::logging::{LOG_ERROR, log_message};

/// Execute `f` and catch any panic, returning `default` on failure.
///
/// Every `extern "C"` function the engine calls wraps its body in this guard.
/// Ordinary panics are logged and turned into `default`. A [`FatalError`]
/// (use-after-free) is logged and aborts the process.
pub fn ffi_boundary<F, R>(default: R, f: F) -> R
where
    F: FnOnce() -> R + std::panic::UnwindSafe,
{
    match std::panic::catch_unwind(f) {
        Ok(value) => value,
        Err(payload) => {
            if let Some(fatal) = payload.downcast_ref::<FatalError>() {
                log_message(LOG_ERROR, &format!("[gdbind] {fatal}"), file!(), line!());
                std::process::abort();
            }
            log_message(LOG_ERROR, &panic_message(&payload), file!(), line!());
            default
        }
    }
}

/// Extract a human-readable message from a panic payload.
fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("[gdbind] Rust panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("[gdbind] Rust panic: {s}")
    } else {
        "[gdbind] Rust panic (unknown payload)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffi_boundary_returns_value_on_success() {
        assert_eq!(ffi_boundary(0i32, || 42), 42);
    }

    #[test]
    fn ffi_boundary_returns_default_on_panic() {
        let result = ffi_boundary(-1i32, || panic!("override failed"));
        assert_eq!(result, -1);
    }

    #[test]
    fn panic_messages_are_prefixed() {
        let payload = std::panic::catch_unwind(|| panic!("{}", "boom")).unwrap_err();
        assert_eq!(panic_message(&payload), "[gdbind] Rust panic: boom");
    }
}
