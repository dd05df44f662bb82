// Callbacks the engine makes into the library: the entry point, the
// per-level init/deinit hooks, and the per-class creation table.

use std::ffi::c_void;

use crate::api_table::InterfaceTable;
use crate::handles::*;

/// The engine brings subsystems up in this order and down in reverse.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InitializationLevel {
    Core = 0,
    Servers = 1,
    Scene = 2,
    Editor = 3,
}

impl InitializationLevel {
    pub const ALL: [InitializationLevel; 4] = [
        InitializationLevel::Core,
        InitializationLevel::Servers,
        InitializationLevel::Scene,
        InitializationLevel::Editor,
    ];
}

pub type InitializeFn = unsafe extern "C" fn(userdata: *mut c_void, level: InitializationLevel);

/// Filled by the library inside its entry point.
#[repr(C)]
pub struct Initialization {
    /// Earliest level at which any of the library's registrations need the engine.
    pub minimum_initialization_level: InitializationLevel,
    pub userdata: *mut c_void,
    /// Called once per level on the way up.
    pub initialize: Option<InitializeFn>,
    /// Called once per level on the way down, in reverse order.
    pub deinitialize: Option<InitializeFn>,
}

/// Signature of the symbol the engine looks up when loading the library.
pub type EntryPointFn = unsafe extern "C" fn(
    interface: *const InterfaceTable,
    library: LibraryPtr,
    r_initialization: *mut Initialization,
) -> bool;

// ---------------------------------------------------------------------------
// Extension class callbacks
// ---------------------------------------------------------------------------

pub type ClassSetFn = unsafe extern "C" fn(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    value: ConstVariantPtr,
) -> bool;
pub type ClassGetFn = unsafe extern "C" fn(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    r_ret: VariantPtr,
) -> bool;
pub type ClassNotificationFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, what: i32, reversed: bool);
pub type ClassToStringFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, r_is_valid: *mut bool, r_out: StringPtr);
pub type ClassReferenceFn = unsafe extern "C" fn(instance: ClassInstancePtr);
pub type ClassCreateInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void) -> ObjectPtr;
pub type ClassFreeInstanceFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, instance: ClassInstancePtr);
/// Returns null when the class does not override `name`.
pub type ClassGetVirtualCallDataFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, name: ConstStringNamePtr) -> *mut c_void;
pub type ClassCallVirtualWithDataFn = unsafe extern "C" fn(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    virtual_call_userdata: *mut c_void,
    args: *const ConstTypePtr,
    r_ret: TypePtr,
);

/// Registration record for one extension class. The engine copies it.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ClassCreationInfo {
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_exposed: bool,
    pub set_func: Option<ClassSetFn>,
    pub get_func: Option<ClassGetFn>,
    pub notification_func: Option<ClassNotificationFn>,
    pub to_string_func: Option<ClassToStringFn>,
    pub reference_func: Option<ClassReferenceFn>,
    pub unreference_func: Option<ClassReferenceFn>,
    pub create_instance_func: Option<ClassCreateInstanceFn>,
    pub free_instance_func: Option<ClassFreeInstanceFn>,
    pub get_virtual_call_data_func: Option<ClassGetVirtualCallDataFn>,
    pub call_virtual_with_data_func: Option<ClassCallVirtualWithDataFn>,
    pub class_userdata: *mut c_void,
}

unsafe impl Send for ClassCreationInfo {}
unsafe impl Sync for ClassCreationInfo {}
