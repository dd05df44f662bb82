// BuiltinApi of the mock engine: constructors, destructors, builtin methods,
// strings, containers and custom callables.

use std::ffi::{c_char, c_void};
use std::ptr;

use gdbind_ffi::{
    CTOR_COPY, CTOR_DEFAULT, CTOR_FROM_FIRST, CTOR_FROM_SECOND, CallError, CallErrorType,
    CallableCustomInfo, ConstStringNamePtr, ConstStringPtr, ConstTypePtr, ConstVariantPtr,
    ERR_INVALID_PARAMETER, ObjectPtr, OK, OpaqueVariant, PtrBuiltInMethod, PtrConstructor,
    PtrDestructor, PtrOperatorEvaluator, TypePtr, UninitStringNamePtr, UninitStringPtr,
    UninitTypePtr, VariantOperator, VariantPtr, VariantType,
};

use super::cells::{
    self, Body, CallableBody, alloc, copy_word, elem_size, intern, packed_bytes, packed_words,
    release_word, text_of, variant_copy, variant_release,
};
use super::objects;
use super::variants::{self, per_type};

unsafe fn word_at(args: *const ConstTypePtr, index: usize) -> u64 {
    unsafe { ptr::read_unaligned(*args.add(index) as *const u64) }
}

unsafe fn arg_at<T: Copy>(args: *const ConstTypePtr, index: usize) -> T {
    unsafe { ptr::read_unaligned(*args.add(index) as *const T) }
}

unsafe fn put<T>(r_ret: TypePtr, value: T) {
    if !r_ret.is_null() {
        unsafe { ptr::write_unaligned(r_ret as *mut T, value) };
    }
}

unsafe fn base_word(base: ConstTypePtr) -> u64 {
    if base.is_null() {
        return 0;
    }
    unsafe { ptr::read_unaligned(base as *const u64) }
}

// ---------------------------------------------------------------------------
// Constructors and destructor
// ---------------------------------------------------------------------------

fn default_body(ty: VariantType) -> Option<Body> {
    Some(match ty {
        VariantType::String => Body::Text(String::new()),
        VariantType::NodePath => Body::Path(String::new()),
        VariantType::Array => Body::Array {
            items: Vec::new(),
            typed: VariantType::Nil,
            class: String::new(),
        },
        VariantType::Dictionary => Body::Dict(Vec::new()),
        VariantType::Callable => Body::Callable(CallableBody::Null),
        VariantType::Signal => Body::Signal {
            object_id: 0,
            name: String::new(),
        },
        t if t.is_packed_array() => Body::Packed {
            ty: t,
            len: 0,
            words: Vec::new(),
        },
        _ => return None,
    })
}

unsafe extern "C" fn default_ctor<const T: u32>(r_base: UninitTypePtr, _args: *const ConstTypePtr) {
    let word = match VariantType::from_u32(T) {
        Some(VariantType::StringName) => intern(""),
        Some(ty) => default_body(ty).map_or(0, alloc),
        None => 0,
    };
    unsafe { put(r_base, word) };
}

static DEFAULT_CTORS: [PtrConstructor; VariantType::COUNT] = per_type!(default_ctor);

unsafe extern "C" fn copy_ctor(r_base: UninitTypePtr, args: *const ConstTypePtr) {
    unsafe { put(r_base, copy_word(word_at(args, 0))) };
}

unsafe extern "C" fn string_from_name(r_base: UninitTypePtr, args: *const ConstTypePtr) {
    let text = unsafe { text_of(word_at(args, 0)) };
    unsafe { put(r_base, alloc(Body::Text(text))) };
}

unsafe extern "C" fn name_from_string(r_base: UninitTypePtr, args: *const ConstTypePtr) {
    let text = unsafe { text_of(word_at(args, 0)) };
    unsafe { put(r_base, intern(&text)) };
}

unsafe extern "C" fn path_from_string(r_base: UninitTypePtr, args: *const ConstTypePtr) {
    let text = unsafe { text_of(word_at(args, 0)) };
    unsafe { put(r_base, alloc(Body::Path(text))) };
}

unsafe extern "C" fn callable_from_method(r_base: UninitTypePtr, args: *const ConstTypePtr) {
    let object: ObjectPtr = unsafe { arg_at(args, 0) };
    let method = unsafe { text_of(word_at(args, 1)) };
    let object_id = objects::instance_id_of(object);
    unsafe { put(r_base, alloc(Body::Callable(CallableBody::Method { object_id, method }))) };
}

unsafe extern "C" fn signal_from_method(r_base: UninitTypePtr, args: *const ConstTypePtr) {
    let object: ObjectPtr = unsafe { arg_at(args, 0) };
    let name = unsafe { text_of(word_at(args, 1)) };
    let object_id = objects::instance_id_of(object);
    unsafe { put(r_base, alloc(Body::Signal { object_id, name })) };
}

unsafe extern "C" fn destroy_payload(base: TypePtr) {
    unsafe {
        release_word(base_word(base));
        put(base, 0u64);
    }
}

pub(super) unsafe extern "C" fn get_ptr_constructor(
    ty: VariantType,
    index: i32,
) -> Option<PtrConstructor> {
    if !ty.has_destructor() {
        return None;
    }
    match (ty, index) {
        (_, CTOR_DEFAULT) => Some(DEFAULT_CTORS[ty as usize]),
        (_, CTOR_COPY) => Some(copy_ctor),
        (VariantType::String, CTOR_FROM_FIRST) | (VariantType::String, CTOR_FROM_SECOND) => {
            Some(string_from_name)
        }
        (VariantType::StringName, CTOR_FROM_FIRST) => Some(name_from_string),
        (VariantType::NodePath, CTOR_FROM_FIRST) => Some(path_from_string),
        (VariantType::Callable, CTOR_FROM_FIRST) => Some(callable_from_method),
        (VariantType::Signal, CTOR_FROM_FIRST) => Some(signal_from_method),
        _ => None,
    }
}

pub(super) unsafe extern "C" fn get_ptr_destructor(ty: VariantType) -> Option<PtrDestructor> {
    ty.has_destructor().then_some(destroy_payload as PtrDestructor)
}

pub(super) unsafe extern "C" fn get_ptr_operator_evaluator(
    _op: VariantOperator,
    _a: VariantType,
    _b: VariantType,
) -> Option<PtrOperatorEvaluator> {
    None
}

// ---------------------------------------------------------------------------
// Builtin methods
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Group {
    Text,
    Path,
    Array,
    Dict,
    Packed,
    Callable,
    Signal,
}

fn group_of(ty: VariantType) -> Option<Group> {
    Some(match ty {
        VariantType::String => Group::Text,
        VariantType::NodePath => Group::Path,
        VariantType::Array => Group::Array,
        VariantType::Dictionary => Group::Dict,
        VariantType::Callable => Group::Callable,
        VariantType::Signal => Group::Signal,
        t if t.is_packed_array() => Group::Packed,
        _ => return None,
    })
}

static METHODS: [(Group, &str, i64, PtrBuiltInMethod); 28] = [
    (Group::Text, "length", 3173160232, size),
    (Group::Text, "is_empty", 3918633141, is_empty),
    (Group::Path, "is_empty", 3918633141, is_empty),
    (Group::Array, "size", 3173160232, size),
    (Group::Array, "push_back", 3316032543, array_push_back),
    (Group::Array, "insert", 3176316662, array_insert),
    (Group::Array, "remove_at", 2823966027, remove_at),
    (Group::Array, "clear", 3218959716, clear),
    (Group::Array, "get_typed_builtin", 3173160232, get_typed_builtin),
    (Group::Dict, "size", 3173160232, size),
    (Group::Dict, "has", 3680194679, dict_has),
    (Group::Dict, "erase", 1776646889, dict_erase),
    (Group::Dict, "clear", 3218959716, clear),
    (Group::Dict, "keys", 4144163970, dict_keys),
    (Group::Dict, "values", 4144163970, dict_values),
    (Group::Packed, "size", 3173160232, size),
    (Group::Packed, "resize", 848867239, packed_resize),
    (Group::Packed, "set", 1255681007, packed_set),
    (Group::Packed, "push_back", 694024632, packed_push_back),
    (Group::Packed, "insert", 1487296672, packed_insert),
    (Group::Packed, "remove_at", 2823966027, remove_at),
    (Group::Packed, "clear", 3218959716, clear),
    (Group::Callable, "callv", 413578926, callable_callv),
    (Group::Callable, "is_valid", 3918633141, callable_is_valid),
    (Group::Callable, "get_object_id", 3173160232, get_object_id),
    (Group::Callable, "get_method", 1825232092, get_target_name),
    (Group::Signal, "get_object_id", 3173160232, get_object_id),
    (Group::Signal, "get_name", 1825232092, get_target_name),
];

pub(super) unsafe extern "C" fn get_ptr_builtin_method(
    ty: VariantType,
    method: ConstStringNamePtr,
    hash: i64,
) -> Option<PtrBuiltInMethod> {
    let group = group_of(ty)?;
    let name = unsafe { cells::text_at(method) };
    METHODS
        .iter()
        .find(|(g, n, h, _)| *g == group && *n == name && *h == hash)
        .map(|entry| entry.3)
}

unsafe extern "C" fn size(base: TypePtr, _args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    unsafe { put(r_ret, variants::container_len(base_word(base)) as i64) };
}

unsafe extern "C" fn is_empty(base: TypePtr, _args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    unsafe { put(r_ret, text_of(base_word(base)).is_empty()) };
}

unsafe extern "C" fn array_push_back(base: TypePtr, args: *const ConstTypePtr, _r_ret: TypePtr, _argc: i32) {
    let value = unsafe { variant_copy(&arg_at::<OpaqueVariant>(args, 0)) };
    if let Some(p) = unsafe { cells::payload(base_word(base)) } {
        if let Body::Array { items, .. } = &mut *p.body.borrow_mut() {
            items.push(value);
        }
    }
}

unsafe extern "C" fn array_insert(base: TypePtr, args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let position: i64 = unsafe { arg_at(args, 0) };
    let mut value = unsafe { variant_copy(&arg_at::<OpaqueVariant>(args, 1)) };
    let mut code = ERR_INVALID_PARAMETER;
    if let Some(p) = unsafe { cells::payload(base_word(base)) } {
        if let Body::Array { items, .. } = &mut *p.body.borrow_mut() {
            if position >= 0 && position as usize <= items.len() {
                items.insert(position as usize, value);
                value = OpaqueVariant::ZERO;
                code = OK;
            }
        }
    }
    unsafe {
        variant_release(&mut value);
        put(r_ret, code);
    }
}

unsafe extern "C" fn remove_at(base: TypePtr, args: *const ConstTypePtr, _r_ret: TypePtr, _argc: i32) {
    let index: i64 = unsafe { arg_at(args, 0) };
    let Some(p) = (unsafe { cells::payload(base_word(base)) }) else {
        return;
    };
    let Ok(index) = usize::try_from(index) else {
        return;
    };
    let mut removed_variant = None;
    let mut removed_word = None;
    match &mut *p.body.borrow_mut() {
        Body::Array { items, .. } if index < items.len() => removed_variant = Some(items.remove(index)),
        Body::Packed { ty, len, words } if index < *len => {
            if *ty == VariantType::PackedStringArray {
                removed_word = Some(words.remove(index));
            } else {
                let size = elem_size(*ty);
                let mut bytes = packed_bytes(words, *len, size);
                bytes.drain(index * size..(index + 1) * size);
                *words = packed_words(&bytes);
            }
            *len -= 1;
        }
        _ => {}
    }
    unsafe {
        if let Some(mut v) = removed_variant {
            variant_release(&mut v);
        }
        if let Some(word) = removed_word {
            release_word(word);
        }
    }
}

unsafe extern "C" fn clear(base: TypePtr, _args: *const ConstTypePtr, _r_ret: TypePtr, _argc: i32) {
    let Some(p) = (unsafe { cells::payload(base_word(base)) }) else {
        return;
    };
    let mut variants = Vec::new();
    let mut words = Vec::new();
    match &mut *p.body.borrow_mut() {
        Body::Array { items, .. } => variants = std::mem::take(items),
        Body::Dict(pairs) => {
            for (k, v) in std::mem::take(pairs) {
                variants.push(k);
                variants.push(v);
            }
        }
        Body::Packed { ty, len, words: data } => {
            let data = std::mem::take(data);
            if *ty == VariantType::PackedStringArray {
                words = data;
            }
            *len = 0;
        }
        _ => {}
    }
    for mut v in variants {
        unsafe { variant_release(&mut v) };
    }
    for word in words {
        unsafe { release_word(word) };
    }
}

unsafe extern "C" fn get_typed_builtin(base: TypePtr, _args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let typed = match unsafe { cells::payload(base_word(base)) } {
        Some(p) => match &*p.body.borrow() {
            Body::Array { typed, .. } => *typed,
            _ => VariantType::Nil,
        },
        None => VariantType::Nil,
    };
    unsafe { put(r_ret, typed as i64) };
}

/// Index of `key` in a dictionary cell.
unsafe fn find_key(word: u64, key: &OpaqueVariant) -> Option<usize> {
    let p = unsafe { cells::payload(word) }?;
    match &*p.body.borrow() {
        Body::Dict(pairs) => pairs.iter().position(|(k, _)| unsafe { variants::equal(k, key) }),
        _ => None,
    }
}

unsafe extern "C" fn dict_has(base: TypePtr, args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let key: OpaqueVariant = unsafe { arg_at(args, 0) };
    unsafe { put(r_ret, find_key(base_word(base), &key).is_some()) };
}

unsafe extern "C" fn dict_erase(base: TypePtr, args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let key: OpaqueVariant = unsafe { arg_at(args, 0) };
    let word = unsafe { base_word(base) };
    let removed = unsafe { find_key(word, &key) }.and_then(|index| {
        let p = unsafe { cells::payload(word) }?;
        match &mut *p.body.borrow_mut() {
            Body::Dict(pairs) => Some(pairs.remove(index)),
            _ => None,
        }
    });
    let found = removed.is_some();
    if let Some((mut k, mut v)) = removed {
        unsafe {
            variant_release(&mut k);
            variant_release(&mut v);
        }
    }
    unsafe { put(r_ret, found) };
}

unsafe fn dict_column(base: TypePtr, r_ret: TypePtr, keys: bool) {
    let items = match unsafe { cells::payload(base_word(base)) } {
        Some(p) => match &*p.body.borrow() {
            Body::Dict(pairs) => pairs
                .iter()
                .map(|(k, v)| unsafe { variant_copy(if keys { k } else { v }) })
                .collect(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    };
    let array = alloc(Body::Array {
        items,
        typed: VariantType::Nil,
        class: String::new(),
    });
    unsafe { put(r_ret, array) };
}

unsafe extern "C" fn dict_keys(base: TypePtr, _args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    unsafe { dict_column(base, r_ret, true) };
}

unsafe extern "C" fn dict_values(base: TypePtr, _args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    unsafe { dict_column(base, r_ret, false) };
}

/// Storage bytes of one element passed the way the host passes it: narrow
/// integers and floats arrive widened, structs and strings by pointer.
unsafe fn element_bytes(ty: VariantType, arg: ConstTypePtr) -> Vec<u8> {
    unsafe {
        match ty {
            VariantType::PackedByteArray => vec![ptr::read_unaligned(arg as *const i64) as u8],
            VariantType::PackedInt32Array => (ptr::read_unaligned(arg as *const i64) as i32)
                .to_ne_bytes()
                .to_vec(),
            VariantType::PackedFloat32Array => (ptr::read_unaligned(arg as *const f64) as f32)
                .to_ne_bytes()
                .to_vec(),
            VariantType::PackedStringArray => {
                copy_word(ptr::read_unaligned(arg as *const u64)).to_ne_bytes().to_vec()
            }
            t => std::slice::from_raw_parts(arg as *const u8, elem_size(t)).to_vec(),
        }
    }
}

unsafe extern "C" fn packed_resize(base: TypePtr, args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let Ok(new_len) = usize::try_from(unsafe { arg_at::<i64>(args, 0) }) else {
        unsafe { put(r_ret, ERR_INVALID_PARAMETER) };
        return;
    };
    let mut dropped = Vec::new();
    if let Some(p) = unsafe { cells::payload(base_word(base)) } {
        if let Body::Packed { ty, len, words } = &mut *p.body.borrow_mut() {
            if *ty == VariantType::PackedStringArray {
                while words.len() > new_len {
                    dropped.extend(words.pop());
                }
                while words.len() < new_len {
                    words.push(alloc(Body::Text(String::new())));
                }
            } else {
                let size = elem_size(*ty);
                let mut bytes = packed_bytes(words, *len, size);
                bytes.resize(new_len * size, 0);
                *words = packed_words(&bytes);
            }
            *len = new_len;
        }
    }
    for word in dropped {
        unsafe { release_word(word) };
    }
    unsafe { put(r_ret, OK) };
}

unsafe extern "C" fn packed_set(base: TypePtr, args: *const ConstTypePtr, _r_ret: TypePtr, _argc: i32) {
    let index: i64 = unsafe { arg_at(args, 0) };
    let Some(p) = (unsafe { cells::payload(base_word(base)) }) else {
        return;
    };
    let ty = match &*p.body.borrow() {
        Body::Packed { ty, .. } => *ty,
        _ => return,
    };
    let element = unsafe { element_bytes(ty, *args.add(1)) };
    let mut replaced = None;
    if let Body::Packed { len, words, .. } = &mut *p.body.borrow_mut() {
        match usize::try_from(index) {
            Ok(index) if index < *len => {
                if ty == VariantType::PackedStringArray {
                    let word = u64::from_ne_bytes(element[..8].try_into().unwrap_or([0; 8]));
                    replaced = Some(std::mem::replace(&mut words[index], word));
                } else {
                    let size = elem_size(ty);
                    let mut bytes = packed_bytes(words, *len, size);
                    bytes[index * size..(index + 1) * size].copy_from_slice(&element);
                    *words = packed_words(&bytes);
                }
            }
            _ if ty == VariantType::PackedStringArray => {
                replaced = Some(u64::from_ne_bytes(element[..8].try_into().unwrap_or([0; 8])))
            }
            _ => {}
        }
    }
    if let Some(word) = replaced {
        unsafe { release_word(word) };
    }
}

unsafe extern "C" fn packed_push_back(base: TypePtr, args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let Some(p) = (unsafe { cells::payload(base_word(base)) }) else {
        return;
    };
    let ty = match &*p.body.borrow() {
        Body::Packed { ty, .. } => *ty,
        _ => return,
    };
    let element = unsafe { element_bytes(ty, *args.add(0)) };
    if let Body::Packed { len, words, .. } = &mut *p.body.borrow_mut() {
        let size = elem_size(ty);
        let mut bytes = packed_bytes(words, *len, size);
        bytes.extend_from_slice(&element);
        *words = packed_words(&bytes);
        *len += 1;
    }
    unsafe { put(r_ret, false) };
}

unsafe extern "C" fn packed_insert(base: TypePtr, args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let position: i64 = unsafe { arg_at(args, 0) };
    let Some(p) = (unsafe { cells::payload(base_word(base)) }) else {
        return;
    };
    let ty = match &*p.body.borrow() {
        Body::Packed { ty, .. } => *ty,
        _ => return,
    };
    let element = unsafe { element_bytes(ty, *args.add(1)) };
    let mut code = ERR_INVALID_PARAMETER;
    if let Body::Packed { len, words, .. } = &mut *p.body.borrow_mut() {
        match usize::try_from(position) {
            Ok(index) if index <= *len => {
                let size = elem_size(ty);
                let mut bytes = packed_bytes(words, *len, size);
                bytes.splice(index * size..index * size, element.iter().copied());
                *words = packed_words(&bytes);
                *len += 1;
                code = OK;
            }
            _ => {}
        }
    }
    if code != OK && ty == VariantType::PackedStringArray {
        let word = u64::from_ne_bytes(element[..8].try_into().unwrap_or([0; 8]));
        unsafe { release_word(word) };
    }
    unsafe { put(r_ret, code) };
}

/// Call the callable in cell `word` with borrowed arguments.
pub(super) unsafe fn invoke_callable(
    word: u64,
    args: &[OpaqueVariant],
) -> Result<OpaqueVariant, CallErrorType> {
    enum Target {
        Method(u64, String),
        Custom(CallableCustomInfo),
    }
    let target = match unsafe { cells::payload(word) } {
        Some(p) => match &*p.body.borrow() {
            Body::Callable(CallableBody::Method { object_id, method }) => {
                Target::Method(*object_id, method.clone())
            }
            Body::Callable(CallableBody::Custom(info)) => Target::Custom(*info),
            _ => return Err(CallErrorType::InvalidMethod),
        },
        None => return Err(CallErrorType::InstanceIsNull),
    };
    match target {
        Target::Method(object_id, method) => objects::call_method(object_id, &method, args),
        Target::Custom(info) => {
            let Some(call) = info.call_func else {
                return Err(CallErrorType::InvalidMethod);
            };
            let ptrs: Vec<ConstVariantPtr> = args
                .iter()
                .map(|a| a as *const OpaqueVariant as ConstVariantPtr)
                .collect();
            let mut out = OpaqueVariant::ZERO;
            let mut error = CallError::OK;
            unsafe {
                call(
                    info.callable_userdata,
                    ptrs.as_ptr(),
                    ptrs.len() as i64,
                    out.as_mut_ptr(),
                    &mut error,
                )
            };
            if error.is_ok() {
                Ok(out)
            } else {
                unsafe { variant_release(&mut out) };
                Err(error.error)
            }
        }
    }
}

unsafe extern "C" fn callable_callv(base: TypePtr, args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let array = unsafe { word_at(args, 0) };
    let mut call_args: Vec<OpaqueVariant> = match unsafe { cells::payload(array) } {
        Some(p) => match &*p.body.borrow() {
            Body::Array { items, .. } => items.iter().map(|i| unsafe { variant_copy(i) }).collect(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    };
    let result = unsafe { invoke_callable(base_word(base), &call_args) }.unwrap_or(OpaqueVariant::ZERO);
    for a in call_args.iter_mut() {
        unsafe { variant_release(a) };
    }
    unsafe { put(r_ret, result) };
}

unsafe extern "C" fn callable_is_valid(base: TypePtr, _args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let target = match unsafe { cells::payload(base_word(base)) } {
        Some(p) => match &*p.body.borrow() {
            Body::Callable(CallableBody::Method { object_id, .. }) => Ok(*object_id),
            Body::Callable(CallableBody::Custom(info)) => Err(Some(*info)),
            _ => Err(None),
        },
        None => Err(None),
    };
    let valid = match target {
        Ok(object_id) => objects::is_live(object_id),
        Err(Some(info)) => info
            .is_valid_func
            .is_none_or(|f| unsafe { f(info.callable_userdata) }),
        Err(None) => false,
    };
    unsafe { put(r_ret, valid) };
}

unsafe extern "C" fn get_object_id(base: TypePtr, _args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let id = match unsafe { cells::payload(base_word(base)) } {
        Some(p) => match &*p.body.borrow() {
            Body::Callable(CallableBody::Method { object_id, .. }) => *object_id,
            Body::Callable(CallableBody::Custom(info)) => info.object_id,
            Body::Signal { object_id, .. } => *object_id,
            _ => 0,
        },
        None => 0,
    };
    unsafe { put(r_ret, id as i64) };
}

unsafe extern "C" fn get_target_name(base: TypePtr, _args: *const ConstTypePtr, r_ret: TypePtr, _argc: i32) {
    let name = match unsafe { cells::payload(base_word(base)) } {
        Some(p) => match &*p.body.borrow() {
            Body::Callable(CallableBody::Method { method, .. }) => method.clone(),
            Body::Signal { name, .. } => name.clone(),
            _ => String::new(),
        },
        None => String::new(),
    };
    unsafe { put(r_ret, intern(&name)) };
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

unsafe fn utf8(contents: *const c_char, len: i64) -> String {
    if contents.is_null() || len <= 0 {
        return String::new();
    }
    let bytes = unsafe { std::slice::from_raw_parts(contents as *const u8, len as usize) };
    String::from_utf8_lossy(bytes).into_owned()
}

pub(super) unsafe extern "C" fn string_new_with_utf8_chars_and_len(
    r_dest: UninitStringPtr,
    contents: *const c_char,
    len: i64,
) {
    let text = unsafe { utf8(contents, len) };
    unsafe { put(r_dest, alloc(Body::Text(text))) };
}

pub(super) unsafe extern "C" fn string_to_utf8_chars(
    string: ConstStringPtr,
    r_text: *mut c_char,
    max_len: i64,
) -> i64 {
    let text = unsafe { text_of(base_word(string)) };
    let bytes = text.as_bytes();
    if !r_text.is_null() {
        let n = bytes.len().min(max_len.max(0) as usize);
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), r_text as *mut u8, n) };
    }
    bytes.len() as i64
}

pub(super) unsafe extern "C" fn string_name_new_with_utf8_chars_and_len(
    r_dest: UninitStringNamePtr,
    contents: *const c_char,
    len: i64,
) {
    let text = unsafe { utf8(contents, len) };
    unsafe { put(r_dest, intern(&text)) };
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

pub(super) unsafe extern "C" fn array_operator_index(array: TypePtr, index: i64) -> VariantPtr {
    let Some(p) = (unsafe { cells::payload(base_word(array)) }) else {
        return ptr::null_mut();
    };
    match &mut *p.body.borrow_mut() {
        Body::Array { items, .. } => match usize::try_from(index) {
            Ok(i) if i < items.len() => items[i].as_mut_ptr(),
            _ => ptr::null_mut(),
        },
        _ => ptr::null_mut(),
    }
}

pub(super) unsafe extern "C" fn array_set_typed(
    array: TypePtr,
    ty: VariantType,
    class_name: ConstStringNamePtr,
    _script: ConstVariantPtr,
) {
    let class = unsafe { cells::text_at(class_name) };
    if let Some(p) = unsafe { cells::payload(base_word(array)) } {
        if let Body::Array { typed, class: slot, .. } = &mut *p.body.borrow_mut() {
            *typed = ty;
            *slot = class;
        }
    }
}

pub(super) unsafe extern "C" fn dictionary_operator_index(
    dictionary: TypePtr,
    key: ConstVariantPtr,
) -> VariantPtr {
    let word = unsafe { base_word(dictionary) };
    let key: OpaqueVariant = unsafe { ptr::read_unaligned(key as *const OpaqueVariant) };
    let found = unsafe { find_key(word, &key) };
    let fresh = match found {
        Some(_) => None,
        None => Some(unsafe { variant_copy(&key) }),
    };
    let Some(p) = (unsafe { cells::payload(word) }) else {
        return ptr::null_mut();
    };
    match &mut *p.body.borrow_mut() {
        Body::Dict(pairs) => {
            let index = match (found, fresh) {
                (Some(index), _) => index,
                (None, Some(key)) => {
                    pairs.push((key, OpaqueVariant::ZERO));
                    pairs.len() - 1
                }
                (None, None) => return ptr::null_mut(),
            };
            pairs[index].1.as_mut_ptr()
        }
        _ => ptr::null_mut(),
    }
}

pub(super) unsafe extern "C" fn packed_array_operator_index(
    _ty: VariantType,
    array: TypePtr,
    index: i64,
) -> TypePtr {
    let Some(p) = (unsafe { cells::payload(base_word(array)) }) else {
        return ptr::null_mut();
    };
    match &mut *p.body.borrow_mut() {
        Body::Packed { ty, len, words } => match usize::try_from(index) {
            Ok(i) if i < *len => unsafe {
                (words.as_mut_ptr() as *mut u8).add(i * elem_size(*ty)) as TypePtr
            },
            _ => ptr::null_mut(),
        },
        _ => ptr::null_mut(),
    }
}

// ---------------------------------------------------------------------------
// Custom callables
// ---------------------------------------------------------------------------

pub(super) unsafe extern "C" fn callable_custom_create(
    r_callable: UninitTypePtr,
    info: *const CallableCustomInfo,
) {
    if info.is_null() {
        return;
    }
    let info = unsafe { *info };
    unsafe { put(r_callable, alloc(Body::Callable(CallableBody::Custom(info)))) };
}

pub(super) unsafe extern "C" fn callable_custom_get_userdata(
    callable: ConstTypePtr,
    token: *mut c_void,
) -> *mut c_void {
    match unsafe { cells::payload(base_word(callable)) } {
        Some(p) => match &*p.body.borrow() {
            Body::Callable(CallableBody::Custom(info)) if info.token == token => info.callable_userdata,
            _ => ptr::null_mut(),
        },
        None => ptr::null_mut(),
    }
}
