// Descriptor structs passed to the extension registration calls.

use std::ffi::c_void;

use crate::error::CallError;
use crate::handles::*;
use crate::variant_type::VariantType;

/// Describes one property or signal argument.
/// All pointers are borrowed for the duration of the registration call.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PropertyInfo {
    pub ty: VariantType,
    pub name: StringNamePtr,
    /// For Object properties: the class name. Otherwise an empty StringName.
    pub class_name: StringNamePtr,
    /// One of the `PROPERTY_HINT_*` constants.
    pub hint: u32,
    pub hint_string: StringPtr,
    /// Bitwise OR of `PROPERTY_USAGE_*` constants.
    pub usage: u32,
}

pub type CallableCallFn = unsafe extern "C" fn(
    userdata: *mut c_void,
    args: *const ConstVariantPtr,
    arg_count: i64,
    r_ret: VariantPtr,
    r_error: *mut CallError,
);
pub type CallableIsValidFn = unsafe extern "C" fn(userdata: *mut c_void) -> bool;
pub type CallableFreeFn = unsafe extern "C" fn(userdata: *mut c_void);
pub type CallableHashFn = unsafe extern "C" fn(userdata: *mut c_void) -> u32;

/// A host-implemented Callable. The engine owns the copy and calls
/// `free_func` once, when the last Callable sharing it is destroyed.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CallableCustomInfo {
    pub callable_userdata: *mut c_void,
    /// Library token, lets `callable_custom_get_userdata` verify ownership.
    pub token: *mut c_void,
    /// Object the callable is bound to, or 0.
    pub object_id: u64,
    pub call_func: Option<CallableCallFn>,
    pub is_valid_func: Option<CallableIsValidFn>,
    pub free_func: Option<CallableFreeFn>,
    pub hash_func: Option<CallableHashFn>,
}

unsafe impl Send for CallableCustomInfo {}
unsafe impl Sync for CallableCustomInfo {}
