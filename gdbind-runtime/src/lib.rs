// gdbind-runtime: safe Rust API over the engine's extension interface.
// All unsafe interface calls are confined to this crate. Generated code and
// user code interact only with the safe types exported here.

pub mod api;
pub mod error;
pub mod logging;
pub mod ffi_guard;
pub mod sync;
pub mod registry;
pub mod call_frame;
pub mod marshal;
pub mod variant;
pub mod builtin;
pub mod class;
pub mod gd;
pub mod method_bind;
pub mod classes;
pub mod extension;

mod builtin_fns;

#[cfg(any(test, feature = "mock-engine"))]
pub mod testing;

// Re-export the primary public API surface.
pub use api::{api, init_api, is_api_initialized};
pub use error::{BindError, BindResult, check_engine};
pub use logging::{LOG_ERROR, LOG_INFO, LOG_WARNING};
pub use ffi_guard::ffi_boundary;
pub use registry::{Pin, PointerRegistry, registry};
pub use call_frame::CallFrame;
pub use variant::{FromVariant, ToVariant, Variant, VariantKind};
pub use class::{ClassRecord, EngineClass, HasParent, Refcount};
pub use gd::Gd;
pub use method_bind::{DynamicCall, MethodSpec};
pub use extension::{
    Base, ClassBuilder, ClassDescriptor, ClassImplRegistration, ClassRegistration, ExtensionClass,
    live_instances,
};

// Re-export interface types needed by generated code.
pub use gdbind_ffi::{InitializationLevel, ObjectPtr, VariantType};

/// Tear down everything the core level set up: unregister remaining
/// classes, release every registry slot, forget cached method ids and drop
/// host closures. Pins minted before this call are refused afterwards.
pub fn deinitialize_core() {
    let classes = extension::unregister_all();
    let released = registry().cycle();
    class::reset_caches();
    builtin::clear_closures();
    crate::glog!(
        LOG_INFO,
        "[gdbind] core deinitialized ({classes} classes unregistered, {released} slots released)"
    );
}
