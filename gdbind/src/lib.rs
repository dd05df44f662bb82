// gdbind: user-facing library crate. Users depend on this and use
// `gdbind::entry!(symbol)` to generate the library entry point in their own
// cdylib crate.

// Re-exports for proc macro path resolution and user access.
pub use gdbind_ffi as ffi;
pub use gdbind_flags as flags;
pub use gdbind_macros::{gdclass, gdclass_impl};
pub use gdbind_runtime as runtime;

// For proc macro generated inventory::submit! invocations.
#[doc(hidden)]
pub extern crate inventory as __inventory;

pub mod prelude;

// Re-export glam for convenience.
pub use glam;

use std::ffi::c_void;
use std::panic::AssertUnwindSafe;

use ffi::{Initialization, InitializationLevel, InterfaceTable, LibraryPtr};
use runtime::{LOG_ERROR, LOG_INFO, extension, ffi_boundary, glog};

// ---------------------------------------------------------------------------
// Init-level callbacks (handed to the engine by `init`)
// ---------------------------------------------------------------------------

/// The minimum level travels through the userdata pointer.
fn level_from_userdata(userdata: *mut c_void) -> InitializationLevel {
    InitializationLevel::ALL
        .get(userdata as usize)
        .copied()
        .unwrap_or(InitializationLevel::Core)
}

/// The engine starts calling at the minimum level, so classes declared for
/// earlier levels come up together with it.
unsafe extern "C" fn initialize_level(userdata: *mut c_void, level: InitializationLevel) {
    ffi_boundary((), AssertUnwindSafe(|| {
        let count: usize = if level == level_from_userdata(userdata) {
            InitializationLevel::ALL
                .into_iter()
                .filter(|l| *l <= level)
                .map(extension::register_level)
                .sum()
        } else {
            extension::register_level(level)
        };
        glog!(LOG_INFO, "[gdbind] {level:?} up ({count} classes)");
    }))
}

unsafe extern "C" fn deinitialize_level(userdata: *mut c_void, level: InitializationLevel) {
    ffi_boundary((), AssertUnwindSafe(|| {
        let count = extension::unregister_level(level);
        glog!(LOG_INFO, "[gdbind] {level:?} down ({count} classes)");
        // Leaving the minimum level: anything registered below it goes with
        // the runtime.
        if level == level_from_userdata(userdata) {
            runtime::deinitialize_core();
        }
    }))
}

// ---------------------------------------------------------------------------
// Entry (called from entry!() generated code)
// ---------------------------------------------------------------------------

/// Bind the engine interface and fill in the initialization callbacks.
///
/// Returns `false` when the interface is missing, its version is
/// incompatible, or a different interface is already bound.
///
/// # Safety
/// `interface` must be null or the engine's live interface table, and
/// `r_initialization` null or writable.
pub unsafe fn init(
    interface: *const InterfaceTable,
    library: LibraryPtr,
    r_initialization: *mut Initialization,
    minimum_level: InitializationLevel,
) -> bool {
    ffi_boundary(false, AssertUnwindSafe(|| {
        if r_initialization.is_null() {
            glog!(LOG_ERROR, "[gdbind] entry point called without an initialization struct");
            return false;
        }
        if let Err(e) = runtime::init_api(interface, library) {
            glog!(LOG_ERROR, "[gdbind] cannot bind the engine interface: {e}");
            return false;
        }
        // SAFETY: checked non-null; the engine owns the struct for the call.
        unsafe {
            r_initialization.write(Initialization {
                minimum_initialization_level: minimum_level,
                userdata: minimum_level as usize as *mut c_void,
                initialize: Some(initialize_level),
                deinitialize: Some(deinitialize_level),
            });
        }
        glog!(
            LOG_INFO,
            "[gdbind] library initialized (interface {}, minimum level {minimum_level:?})",
            ffi::INTERFACE_VERSION
        );
        true
    }))
}

/// Generates the library entry point the engine looks up by name.
///
/// Place this once in your cdylib crate's `lib.rs`:
/// ```ignore
/// gdbind::entry!(my_extension_init);
/// gdbind::entry!(my_extension_init, level = Servers);
/// ```
///
/// The minimum level defaults to `Scene`. Classes submitted by `#[gdclass]`
/// register when their level comes up and unregister in reverse on the way
/// down; leaving the minimum level tears the runtime down.
#[macro_export]
macro_rules! entry {
    ($name:ident) => {
        $crate::entry!($name, level = Scene);
    };
    ($name:ident, level = $level:ident) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name(
            interface: *const $crate::ffi::InterfaceTable,
            library: $crate::ffi::LibraryPtr,
            r_initialization: *mut $crate::ffi::Initialization,
        ) -> bool {
            unsafe {
                $crate::init(
                    interface,
                    library,
                    r_initialization,
                    $crate::ffi::InitializationLevel::$level,
                )
            }
        }
    };
}
