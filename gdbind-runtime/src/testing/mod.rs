//! In-process mock engine behind the extension interface table.
//!
//! It implements every sub-table the bindings call: objects with reference
//! counts and instance ids, a small native class database (Object,
//! RefCounted, Resource, CapsuleShape3D, Image, Node, Node3D, Geometry2D),
//! pooled builtins with engine-side lifetimes, Variant operators, and
//! extension class registration with virtual dispatch.
//!
//! Tests take a [`session`] first. It binds the table on first use, resets
//! the object table, and serializes tests: the mock keeps process-wide state,
//! like the real engine.

mod builtins;
mod cells;
mod objects;
mod variants;

use std::ffi::c_void;
use std::sync::{Mutex, MutexGuard, Once};

use gdbind_ffi::{
    BuiltinApi, ClassDbApi, ConstTypePtr, ExtensionApi, INTERFACE_VERSION, InterfaceTable,
    InterfaceVersion, LibraryPtr, LoggingApi, ObjectApi, ObjectPtr, TypePtr, VariantApi,
    VariantPtr,
};

use crate::api::init_api;
use crate::sync::lock_or_recover;

// ---------------------------------------------------------------------------
// Interface table
// ---------------------------------------------------------------------------

static OBJECT_API: ObjectApi = ObjectApi {
    construct: objects::construct,
    destroy: objects::destroy,
    get_class_name: objects::get_class_name,
    cast_to: objects::cast_to,
    get_instance_id: objects::get_instance_id,
    get_instance_from_id: objects::get_instance_from_id,
    set_instance: objects::set_instance,
    reference: objects::reference,
    unreference: objects::unreference,
    get_reference_count: objects::get_reference_count,
    global_get_singleton: objects::global_get_singleton,
};

static CLASSDB_API: ClassDbApi = ClassDbApi {
    get_method_bind: objects::get_method_bind,
    get_class_tag: objects::get_class_tag,
    is_parent_class: objects::is_parent_class,
    method_bind_ptrcall: objects::method_bind_ptrcall,
    method_bind_call: objects::method_bind_call,
};

static VARIANT_API: VariantApi = VariantApi {
    new_copy: variants::new_copy,
    new_nil: variants::new_nil,
    destroy: variants::destroy,
    get_type: variants::get_type,
    evaluate: variants::evaluate,
    hash: variants::hash,
    booleanize: variants::booleanize,
    stringify: variants::stringify,
    call: variants::call,
    get_from_type_constructor: variants::get_from_type_constructor,
    get_to_type_constructor: variants::get_to_type_constructor,
};

static BUILTIN_API: BuiltinApi = BuiltinApi {
    get_ptr_constructor: builtins::get_ptr_constructor,
    get_ptr_destructor: builtins::get_ptr_destructor,
    get_ptr_builtin_method: builtins::get_ptr_builtin_method,
    get_ptr_operator_evaluator: builtins::get_ptr_operator_evaluator,
    string_new_with_utf8_chars_and_len: builtins::string_new_with_utf8_chars_and_len,
    string_to_utf8_chars: builtins::string_to_utf8_chars,
    string_name_new_with_utf8_chars_and_len: builtins::string_name_new_with_utf8_chars_and_len,
    array_operator_index: builtins::array_operator_index,
    array_set_typed: builtins::array_set_typed,
    dictionary_operator_index: builtins::dictionary_operator_index,
    packed_array_operator_index: builtins::packed_array_operator_index,
    callable_custom_create: builtins::callable_custom_create,
    callable_custom_get_userdata: builtins::callable_custom_get_userdata,
};

static EXTENSION_API: ExtensionApi = ExtensionApi {
    register_class: objects::register_class,
    register_property: objects::register_property,
    register_signal: objects::register_signal,
    unregister_class: objects::unregister_class,
};

static LOGGING_API: LoggingApi = LoggingApi { log };

static TABLE: InterfaceTable = InterfaceTable {
    version: INTERFACE_VERSION,
    object: &OBJECT_API,
    classdb: &CLASSDB_API,
    variant: &VARIANT_API,
    builtins: &BUILTIN_API,
    extension: &EXTENSION_API,
    logging: &LOGGING_API,
};

static LIBRARY_ANCHOR: u8 = 0;

/// The mock's interface table.
pub fn interface() -> *const InterfaceTable {
    &TABLE
}

/// A copy of the table that reports `version`, for handshake tests.
pub fn interface_with_version(version: InterfaceVersion) -> *const InterfaceTable {
    Box::leak(Box::new(InterfaceTable {
        version,
        object: &OBJECT_API,
        classdb: &CLASSDB_API,
        variant: &VARIANT_API,
        builtins: &BUILTIN_API,
        extension: &EXTENSION_API,
        logging: &LOGGING_API,
    }))
}

/// The library handle the mock passes to entry points.
pub fn library() -> LibraryPtr {
    LibraryPtr(&LIBRARY_ANCHOR as *const u8 as *mut c_void)
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

static LOGS: Mutex<Vec<(u8, String)>> = Mutex::new(Vec::new());

unsafe extern "C" fn log(
    level: u8,
    msg: *const u8,
    msg_len: u32,
    _file: *const u8,
    _file_len: u32,
    _line: u32,
) {
    let text = if msg.is_null() {
        String::new()
    } else {
        let bytes = unsafe { std::slice::from_raw_parts(msg, msg_len as usize) };
        String::from_utf8_lossy(bytes).into_owned()
    };
    eprintln!("[engine:{level}] {text}");
    lock_or_recover(&LOGS).push((level, text));
}

/// Messages logged since the session started, oldest first.
pub fn take_logs() -> Vec<(u8, String)> {
    std::mem::take(&mut *lock_or_recover(&LOGS))
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

static SESSION: Mutex<()> = Mutex::new(());
static BIND: Once = Once::new();

/// Exclusive use of the mock engine for one test.
#[must_use]
pub struct Session {
    _guard: MutexGuard<'static, ()>,
}

/// Bind the mock (once per process) and start from a clean engine: no
/// extension classes, no objects besides singletons, no queued calls.
pub fn session() -> Session {
    let guard = lock_or_recover(&SESSION);
    BIND.call_once(|| {
        if let Err(e) = init_api(interface(), library()) {
            eprintln!("[gdbind] mock engine not bound: {e}");
        }
    });
    crate::extension::unregister_all();
    objects::reset();
    lock_or_recover(&LOGS).clear();
    Session { _guard: guard }
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

/// Live pooled builtin payloads (interned names excluded).
pub fn live_builtins() -> usize {
    cells::live()
}

/// Method bind lookups the engine has served so far.
pub fn method_bind_lookups() -> usize {
    objects::method_bind_lookups()
}

/// Objects still alive, singletons excluded.
pub fn leaked_objects() -> usize {
    objects::leaked_objects()
}

/// How many times the object with this id was destroyed.
pub fn times_destroyed(instance_id: u64) -> usize {
    objects::times_destroyed(instance_id)
}

/// Construct an object by class name, the way a scene load does.
pub fn instantiate(class: &str) -> ObjectPtr {
    let name = cells::intern(class);
    unsafe { objects::construct(&name as *const u64 as *const c_void) }
}

/// Destroy an object immediately.
pub fn free_object(object: ObjectPtr) {
    unsafe { objects::destroy(object) }
}

/// Reference count of a refcounted object, 0 otherwise.
pub fn reference_count(object: ObjectPtr) -> i32 {
    unsafe { objects::get_reference_count(object) }
}

/// Run one physics frame on `object`: dispatch `_physics_process(delta)` if
/// its class overrides it. Returns whether the engine dispatched the call.
pub fn physics_tick(object: ObjectPtr, delta: f64) -> bool {
    let args = [&delta as *const f64 as ConstTypePtr];
    objects::call_virtual(object, "_physics_process", &args, std::ptr::null_mut())
}

/// Return slot contents before a virtual call writes them.
pub const UNWRITTEN_RETURN: i64 = 0x5EED_5EED;

/// Dispatch an argument-less virtual returning `int`. The slot starts out
/// as [`UNWRITTEN_RETURN`]; `None` when the class does not override `name`.
pub fn int_virtual(object: ObjectPtr, name: &str) -> Option<i64> {
    let mut slot = UNWRITTEN_RETURN;
    objects::call_virtual(object, name, &[], &mut slot as *mut i64 as TypePtr).then_some(slot)
}

/// Run queued deferred calls and frees until the queue stays empty.
/// Returns how many ran.
pub fn flush_deferred() -> usize {
    objects::flush_deferred()
}

/// Properties the class registered with the engine.
pub fn class_properties(class: &str) -> Vec<String> {
    objects::class_properties(class)
}

/// Signals the class registered with the engine.
pub fn class_signals(class: &str) -> Vec<String> {
    objects::class_signals(class)
}

pub fn is_class_registered(class: &str) -> bool {
    objects::is_class_registered(class)
}

/// Overwrite the Variant at `dst` with a new String variant.
///
/// # Safety
/// `dst` must point at writable Variant storage holding no live payload.
pub unsafe fn write_string_variant(dst: VariantPtr, text: &str) {
    unsafe { std::ptr::write_unaligned(dst as *mut gdbind_ffi::OpaqueVariant, cells::from_text(text)) };
}
