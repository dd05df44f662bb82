use std::ffi::{c_char, c_void};

use crate::callbacks::ClassCreationInfo;
use crate::class_types::{CallableCustomInfo, PropertyInfo};
use crate::error::CallError;
use crate::handles::*;
use crate::variant_type::{VariantOperator, VariantType};

// ---------------------------------------------------------------------------
// Interface version
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterfaceVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// The interface layout this crate was written against.
pub const INTERFACE_VERSION: InterfaceVersion = InterfaceVersion {
    major: 4,
    minor: 3,
    patch: 0,
};

impl InterfaceVersion {
    /// Same major, and the engine is at least as new as the binding.
    /// Patch releases never change the table layout.
    pub fn is_compatible_with(&self, binding: &InterfaceVersion) -> bool {
        self.major == binding.major && self.minor >= binding.minor
    }
}

impl std::fmt::Display for InterfaceVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ---------------------------------------------------------------------------
// Main interface table
// ---------------------------------------------------------------------------

/// The function table the engine hands to the library entry point.
/// Every sub-table pointer is non-null for a compatible engine.
#[repr(C)]
pub struct InterfaceTable {
    pub version: InterfaceVersion,
    pub object: *const ObjectApi,
    pub classdb: *const ClassDbApi,
    pub variant: *const VariantApi,
    pub builtins: *const BuiltinApi,
    pub extension: *const ExtensionApi,
    pub logging: *const LoggingApi,
}

unsafe impl Send for InterfaceTable {}
unsafe impl Sync for InterfaceTable {}

// ---------------------------------------------------------------------------
// ObjectApi
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct ObjectApi {
    /// Construct an object of the named class (native or extension).
    /// Returns null if the class is unknown or not instantiable.
    pub construct: unsafe extern "C" fn(class_name: ConstStringNamePtr) -> ObjectPtr,

    /// Destroy an object immediately.
    pub destroy: unsafe extern "C" fn(obj: ObjectPtr),

    /// Write the object's class name into an uninitialized StringName.
    pub get_class_name: unsafe extern "C" fn(
        obj: ObjectPtr,
        library: LibraryPtr,
        r_class_name: UninitStringNamePtr,
    ) -> bool,

    /// Returns `obj` if it is an instance of the tagged class, else null.
    pub cast_to: unsafe extern "C" fn(obj: ObjectPtr, class_tag: *mut c_void) -> ObjectPtr,

    pub get_instance_id: unsafe extern "C" fn(obj: ObjectPtr) -> u64,
    pub get_instance_from_id: unsafe extern "C" fn(instance_id: u64) -> ObjectPtr,

    /// Attach a host instance to a freshly constructed base object.
    pub set_instance: unsafe extern "C" fn(
        obj: ObjectPtr,
        class_name: ConstStringNamePtr,
        instance: ClassInstancePtr,
    ),

    // -- RefCounted --

    /// Increment the reference count. Returns false for non-refcounted objects.
    pub reference: unsafe extern "C" fn(obj: ObjectPtr) -> bool,
    /// Decrement the reference count. Returns true when the count hit zero
    /// and the caller must destroy the object.
    pub unreference: unsafe extern "C" fn(obj: ObjectPtr) -> bool,
    pub get_reference_count: unsafe extern "C" fn(obj: ObjectPtr) -> i32,

    pub global_get_singleton: unsafe extern "C" fn(name: ConstStringNamePtr) -> ObjectPtr,
}

// ---------------------------------------------------------------------------
// ClassDbApi
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct ClassDbApi {
    /// Resolve a bound method. Null if the class has no such method or the
    /// hash does not match the engine's signature.
    pub get_method_bind: unsafe extern "C" fn(
        class_name: ConstStringNamePtr,
        method_name: ConstStringNamePtr,
        hash: i64,
    ) -> MethodBindPtr,

    /// Opaque tag for `ObjectApi::cast_to`. Null for unknown classes.
    pub get_class_tag: unsafe extern "C" fn(class_name: ConstStringNamePtr) -> *mut c_void,

    /// True if `class_name` is `parent` or inherits from it.
    pub is_parent_class: unsafe extern "C" fn(
        class_name: ConstStringNamePtr,
        parent: ConstStringNamePtr,
    ) -> bool,

    /// Pointer-per-argument call. `args` holds one pointer per parameter;
    /// `r_ret` is null for void methods.
    pub method_bind_ptrcall: unsafe extern "C" fn(
        method: MethodBindPtr,
        instance: ObjectPtr,
        args: *const ConstTypePtr,
        r_ret: TypePtr,
    ),

    /// Variant call, used for vararg methods.
    pub method_bind_call: unsafe extern "C" fn(
        method: MethodBindPtr,
        instance: ObjectPtr,
        args: *const ConstVariantPtr,
        arg_count: i64,
        r_ret: UninitVariantPtr,
        r_error: *mut CallError,
    ),
}

// ---------------------------------------------------------------------------
// VariantApi
// ---------------------------------------------------------------------------

pub type VariantFromTypeConstructorFunc =
    unsafe extern "C" fn(r_variant: UninitVariantPtr, value: TypePtr);
pub type TypeFromVariantConstructorFunc =
    unsafe extern "C" fn(r_value: UninitTypePtr, variant: VariantPtr);

#[repr(C)]
pub struct VariantApi {
    pub new_copy: unsafe extern "C" fn(r_dest: UninitVariantPtr, src: ConstVariantPtr),
    pub new_nil: unsafe extern "C" fn(r_dest: UninitVariantPtr),
    pub destroy: unsafe extern "C" fn(variant: VariantPtr),
    pub get_type: unsafe extern "C" fn(variant: ConstVariantPtr) -> VariantType,

    pub evaluate: unsafe extern "C" fn(
        op: VariantOperator,
        a: ConstVariantPtr,
        b: ConstVariantPtr,
        r_result: UninitVariantPtr,
        r_valid: *mut bool,
    ),
    pub hash: unsafe extern "C" fn(variant: ConstVariantPtr) -> i64,
    pub booleanize: unsafe extern "C" fn(variant: ConstVariantPtr) -> bool,
    pub stringify: unsafe extern "C" fn(variant: ConstVariantPtr, r_str: UninitStringPtr),

    /// Call a builtin method on a variant by name.
    pub call: unsafe extern "C" fn(
        variant: VariantPtr,
        method: ConstStringNamePtr,
        args: *const ConstVariantPtr,
        arg_count: i64,
        r_ret: UninitVariantPtr,
        r_error: *mut CallError,
    ),

    pub get_from_type_constructor:
        unsafe extern "C" fn(ty: VariantType) -> Option<VariantFromTypeConstructorFunc>,
    pub get_to_type_constructor:
        unsafe extern "C" fn(ty: VariantType) -> Option<TypeFromVariantConstructorFunc>,
}

// ---------------------------------------------------------------------------
// BuiltinApi
// ---------------------------------------------------------------------------

pub type PtrConstructor = unsafe extern "C" fn(r_base: UninitTypePtr, args: *const ConstTypePtr);
pub type PtrDestructor = unsafe extern "C" fn(base: TypePtr);
pub type PtrBuiltInMethod = unsafe extern "C" fn(
    base: TypePtr,
    args: *const ConstTypePtr,
    r_ret: TypePtr,
    arg_count: i32,
);
pub type PtrOperatorEvaluator =
    unsafe extern "C" fn(left: ConstTypePtr, right: ConstTypePtr, r_result: TypePtr);

/// Constructor indices shared by every pooled builtin.
pub const CTOR_DEFAULT: i32 = 0;
pub const CTOR_COPY: i32 = 1;
/// `String(StringName)`, `StringName(String)`, `NodePath(String)`,
/// `Callable(Object, StringName)`, `Signal(Object, StringName)`.
pub const CTOR_FROM_FIRST: i32 = 2;
/// `String(NodePath)`.
pub const CTOR_FROM_SECOND: i32 = 3;

#[repr(C)]
pub struct BuiltinApi {
    pub get_ptr_constructor:
        unsafe extern "C" fn(ty: VariantType, index: i32) -> Option<PtrConstructor>,
    pub get_ptr_destructor: unsafe extern "C" fn(ty: VariantType) -> Option<PtrDestructor>,
    pub get_ptr_builtin_method: unsafe extern "C" fn(
        ty: VariantType,
        method: ConstStringNamePtr,
        hash: i64,
    ) -> Option<PtrBuiltInMethod>,
    pub get_ptr_operator_evaluator: unsafe extern "C" fn(
        op: VariantOperator,
        a: VariantType,
        b: VariantType,
    ) -> Option<PtrOperatorEvaluator>,

    // -- strings --

    pub string_new_with_utf8_chars_and_len:
        unsafe extern "C" fn(r_dest: UninitStringPtr, contents: *const c_char, len: i64),
    /// Copy UTF-8 into `r_text` (up to `max_len` bytes). Returns the full
    /// length; pass a null buffer to query it.
    pub string_to_utf8_chars:
        unsafe extern "C" fn(string: ConstStringPtr, r_text: *mut c_char, max_len: i64) -> i64,
    pub string_name_new_with_utf8_chars_and_len:
        unsafe extern "C" fn(r_dest: UninitStringNamePtr, contents: *const c_char, len: i64),

    // -- containers --

    /// Pointer to the element Variant. Invalidated by any mutation of the array.
    pub array_operator_index: unsafe extern "C" fn(array: TypePtr, index: i64) -> VariantPtr,
    pub array_set_typed: unsafe extern "C" fn(
        array: TypePtr,
        ty: VariantType,
        class_name: ConstStringNamePtr,
        script: ConstVariantPtr,
    ),
    /// Pointer to the value for `key`, inserting Nil if absent.
    pub dictionary_operator_index:
        unsafe extern "C" fn(dictionary: TypePtr, key: ConstVariantPtr) -> VariantPtr,
    /// Pointer to the element storage of a packed array. Elements are
    /// contiguous, so index 0 addresses the whole buffer.
    pub packed_array_operator_index:
        unsafe extern "C" fn(ty: VariantType, array: TypePtr, index: i64) -> TypePtr,

    // -- callables --

    pub callable_custom_create:
        unsafe extern "C" fn(r_callable: UninitTypePtr, info: *const CallableCustomInfo),
    pub callable_custom_get_userdata:
        unsafe extern "C" fn(callable: ConstTypePtr, token: *mut c_void) -> *mut c_void,
}

// ---------------------------------------------------------------------------
// ExtensionApi
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct ExtensionApi {
    pub register_class: unsafe extern "C" fn(
        library: LibraryPtr,
        class_name: ConstStringNamePtr,
        parent_class_name: ConstStringNamePtr,
        info: *const ClassCreationInfo,
    ) -> bool,
    pub register_property: unsafe extern "C" fn(
        library: LibraryPtr,
        class_name: ConstStringNamePtr,
        info: *const PropertyInfo,
    ),
    pub register_signal: unsafe extern "C" fn(
        library: LibraryPtr,
        class_name: ConstStringNamePtr,
        signal_name: ConstStringNamePtr,
        args: *const PropertyInfo,
        arg_count: i64,
    ),
    pub unregister_class:
        unsafe extern "C" fn(library: LibraryPtr, class_name: ConstStringNamePtr),
}

// ---------------------------------------------------------------------------
// LoggingApi
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct LoggingApi {
    /// `level`: 0 = info, 1 = warning, 2 = error.
    pub log: unsafe extern "C" fn(
        level: u8,
        msg: *const u8,
        msg_len: u32,
        file: *const u8,
        file_len: u32,
        line: u32,
    ),
}
