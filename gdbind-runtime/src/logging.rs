// Logging bridge to the engine's log sink.

pub use gdbind_ffi::{LOG_ERROR, LOG_INFO, LOG_WARNING};

use crate::api::{api, is_api_initialized};

/// Log a message through the engine.
///
/// Usage:
/// ```ignore
/// glog!(LOG_INFO, "registered {} classes", n);
/// glog!(LOG_WARNING, "something suspicious");
/// glog!(LOG_ERROR, "fatal: {err}");
/// ```
#[macro_export]
macro_rules! glog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logging::log_message($level, &format!($($arg)*), file!(), line!());
    }};
}

/// Forward one message. Before the interface is bound, falls back to stderr.
pub fn log_message(level: u8, msg: &str, file: &str, line: u32) {
    if is_api_initialized() {
        // SAFETY: the logging sub-table is valid once the interface is bound.
        unsafe {
            ((*api().logging).log)(
                level,
                msg.as_ptr(),
                msg.len() as u32,
                file.as_ptr(),
                file.len() as u32,
                line,
            );
        }
    } else {
        eprintln!("[gdbind] {msg}");
    }
}
