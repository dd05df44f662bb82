// Global interface table storage. Bound once by the entry point, then read-only.

use std::sync::OnceLock;

use gdbind_ffi::{INTERFACE_VERSION, InterfaceTable, LibraryPtr};

use crate::error::{BindError, BindResult};

/// Wrapper so the raw table pointer can live inside a OnceLock.
/// SAFETY: the engine creates the table before calling the entry point and
/// keeps it alive until the library is unloaded. Access is read-only.
struct InterfaceRef {
    table: *const InterfaceTable,
    library: LibraryPtr,
}
unsafe impl Send for InterfaceRef {}
unsafe impl Sync for InterfaceRef {}

static INTERFACE: OnceLock<InterfaceRef> = OnceLock::new();

/// Validate the engine's interface version and store the table.
///
/// Binding the same table twice is a no-op, so an engine that re-runs the
/// entry point after a soft reload keeps working. A different table is
/// refused.
pub fn init_api(table: *const InterfaceTable, library: LibraryPtr) -> BindResult<()> {
    if table.is_null() {
        return Err(BindError::NotInitialized);
    }
    // SAFETY: non-null, and the engine guarantees the version header is readable.
    let engine = unsafe { (*table).version };
    if !engine.is_compatible_with(&INTERFACE_VERSION) {
        return Err(BindError::AbiVersionMismatch {
            engine,
            binding: INTERFACE_VERSION,
        });
    }
    let bound = INTERFACE.get_or_init(|| InterfaceRef { table, library });
    if std::ptr::eq(bound.table, table) {
        Ok(())
    } else {
        Err(BindError::AlreadyInitialized)
    }
}

/// Access the global interface table. Panics if called before `init_api`.
#[inline(always)]
pub fn api() -> &'static InterfaceTable {
    // SAFETY: validated non-null in init_api; the engine keeps it alive.
    unsafe { &*INTERFACE.get().expect("gdbind interface not initialized").table }
}

/// The library pointer the engine passed to the entry point.
#[inline]
pub fn library() -> LibraryPtr {
    INTERFACE
        .get()
        .map(|r| r.library)
        .unwrap_or(LibraryPtr(std::ptr::null_mut()))
}

#[inline]
pub fn is_api_initialized() -> bool {
    INTERFACE.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdbind_ffi::InterfaceVersion;

    #[test]
    fn null_table_is_refused() {
        let err = init_api(std::ptr::null(), LibraryPtr(std::ptr::null_mut())).unwrap_err();
        assert!(matches!(err, BindError::NotInitialized));
    }

    #[test]
    fn older_engine_minor_is_incompatible() {
        let engine = InterfaceVersion {
            major: INTERFACE_VERSION.major,
            minor: INTERFACE_VERSION.minor - 1,
            patch: 9,
        };
        assert!(!engine.is_compatible_with(&INTERFACE_VERSION));
        let newer = InterfaceVersion {
            minor: INTERFACE_VERSION.minor + 1,
            ..INTERFACE_VERSION
        };
        assert!(newer.is_compatible_with(&INTERFACE_VERSION));
    }
}
