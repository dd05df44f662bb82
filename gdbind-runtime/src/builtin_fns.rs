// Cached builtin-type function pointers: constructors, destructors, builtin
// methods, and the Variant <-> type converters. Resolved on first use.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use gdbind_ffi::{
    ConstTypePtr, PtrBuiltInMethod, PtrConstructor, PtrDestructor, TypeFromVariantConstructorFunc,
    TypePtr, VariantFromTypeConstructorFunc, VariantType,
};

use crate::api::api;
use crate::builtin::StringName;
use crate::error::{BindError, BindResult};
use crate::sync::{read_or_recover, write_or_recover};

type PerType<F> = [Option<F>; VariantType::COUNT];

static DESTRUCTORS: OnceLock<PerType<PtrDestructor>> = OnceLock::new();
static FROM_TYPE: OnceLock<PerType<VariantFromTypeConstructorFunc>> = OnceLock::new();
static TO_TYPE: OnceLock<PerType<TypeFromVariantConstructorFunc>> = OnceLock::new();
static CONSTRUCTORS: OnceLock<RwLock<HashMap<(VariantType, i32), PtrConstructor>>> =
    OnceLock::new();
static METHODS: OnceLock<RwLock<HashMap<(VariantType, &'static str), PtrBuiltInMethod>>> =
    OnceLock::new();

fn per_type<F>(lookup: impl Fn(VariantType) -> Option<F>) -> PerType<F> {
    std::array::from_fn(|i| VariantType::from_u32(i as u32).and_then(&lookup))
}

pub(crate) fn destructor(ty: VariantType) -> Option<PtrDestructor> {
    DESTRUCTORS.get_or_init(|| {
        // SAFETY: builtins sub-table is valid after init.
        per_type(|t| unsafe { ((*api().builtins).get_ptr_destructor)(t) })
    })[ty as usize]
}

pub(crate) fn variant_from_type(ty: VariantType) -> BindResult<VariantFromTypeConstructorFunc> {
    FROM_TYPE.get_or_init(|| {
        per_type(|t| unsafe { ((*api().variant).get_from_type_constructor)(t) })
    })[ty as usize]
        .ok_or(BindError::MethodNotFound {
            class: ty.name(),
            method: "from_type".into(),
        })
}

pub(crate) fn type_from_variant(ty: VariantType) -> BindResult<TypeFromVariantConstructorFunc> {
    TO_TYPE.get_or_init(|| {
        per_type(|t| unsafe { ((*api().variant).get_to_type_constructor)(t) })
    })[ty as usize]
        .ok_or(BindError::MethodNotFound {
            class: ty.name(),
            method: "to_type".into(),
        })
}

pub(crate) fn constructor(ty: VariantType, index: i32) -> BindResult<PtrConstructor> {
    let table = CONSTRUCTORS.get_or_init(|| RwLock::new(HashMap::new()));
    if let Some(f) = read_or_recover(table).get(&(ty, index)) {
        return Ok(*f);
    }
    // SAFETY: builtins sub-table is valid after init.
    let found = unsafe { ((*api().builtins).get_ptr_constructor)(ty, index) }.ok_or_else(|| {
        BindError::MethodNotFound {
            class: ty.name(),
            method: format!("constructor #{index}"),
        }
    })?;
    Ok(*write_or_recover(table).entry((ty, index)).or_insert(found))
}

pub(crate) fn builtin_method(
    ty: VariantType,
    name: &'static str,
    hash: i64,
) -> BindResult<PtrBuiltInMethod> {
    let table = METHODS.get_or_init(|| RwLock::new(HashMap::new()));
    if let Some(f) = read_or_recover(table).get(&(ty, name)) {
        return Ok(*f);
    }
    let method_name = StringName::from(name);
    let token = method_name.token();
    // SAFETY: the StringName token stays alive for the duration of the lookup.
    let found = unsafe {
        ((*api().builtins).get_ptr_builtin_method)(ty, token.as_ptr(), hash)
    }
    .ok_or_else(|| BindError::MethodNotFound {
        class: ty.name(),
        method: name.to_owned(),
    })?;
    Ok(*write_or_recover(table).entry((ty, name)).or_insert(found))
}

/// Call a resolved builtin method on `base`.
///
/// # Safety
/// `base` must point at a live token of the method's type, every argument
/// pointer must match the method signature, and `ret` must be null or
/// sized for the return type.
pub(crate) unsafe fn call_builtin(
    method: PtrBuiltInMethod,
    base: TypePtr,
    args: &[ConstTypePtr],
    ret: TypePtr,
) {
    unsafe { method(base, args.as_ptr(), ret, args.len() as i32) }
}
