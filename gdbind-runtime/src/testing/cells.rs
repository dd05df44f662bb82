// Payload cells behind pooled builtin tokens, and the mock Variant layout.
//
// Word 0 of a pooled token is the address of a heap `Payload`. Arrays,
// dictionaries and callables are shared between copies; every other kind is
// copied deeply. StringNames are interned and never freed.
//
// A Variant is `[tag, w1, w2]`. Scalars and math kinds up to 16 bytes are
// stored inline; wider math kinds live in a boxed `[u64; 8]`; pooled kinds
// store their token word in w1; objects store their address in w1.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use gdbind_ffi::{CallableCustomInfo, ObjectPtr, Opaque, OpaqueVariant, VariantType};

use super::objects;
use crate::sync::lock_or_recover;

pub(super) enum CallableBody {
    Null,
    Method { object_id: u64, method: String },
    Custom(CallableCustomInfo),
}

pub(super) enum Body {
    Text(String),
    Name(String),
    Path(String),
    Array {
        items: Vec<OpaqueVariant>,
        typed: VariantType,
        class: String,
    },
    /// Insertion-ordered pairs.
    Dict(Vec<(OpaqueVariant, OpaqueVariant)>),
    /// `len` elements of `elem_size(ty)` bytes, packed into words.
    Packed {
        ty: VariantType,
        len: usize,
        words: Vec<u64>,
    },
    Callable(CallableBody),
    Signal { object_id: u64, name: String },
}

pub(super) struct Payload {
    refs: Cell<usize>,
    pub(super) body: RefCell<Body>,
}

static LIVE: AtomicUsize = AtomicUsize::new(0);
static NAMES: OnceLock<Mutex<HashMap<String, u64>>> = OnceLock::new();

/// Live (non-interned) payload cells.
pub(super) fn live() -> usize {
    LIVE.load(Ordering::SeqCst)
}

pub(super) fn alloc(body: Body) -> u64 {
    LIVE.fetch_add(1, Ordering::SeqCst);
    Box::into_raw(Box::new(Payload {
        refs: Cell::new(1),
        body: RefCell::new(body),
    })) as u64
}

/// The interned StringName cell for `text`.
pub(super) fn intern(text: &str) -> u64 {
    let mut names = lock_or_recover(NAMES.get_or_init(Default::default));
    if let Some(word) = names.get(text) {
        return *word;
    }
    let word = Box::into_raw(Box::new(Payload {
        refs: Cell::new(1),
        body: RefCell::new(Body::Name(text.to_owned())),
    })) as u64;
    names.insert(text.to_owned(), word);
    word
}

/// # Safety
/// `word` must be zero or a cell address from `alloc`/`intern` that has not
/// been released.
pub(super) unsafe fn payload<'a>(word: u64) -> Option<&'a Payload> {
    (word != 0).then(|| unsafe { &*(word as *const Payload) })
}

/// Text of a String, StringName or NodePath cell.
pub(super) unsafe fn text_of(word: u64) -> String {
    match unsafe { payload(word) } {
        Some(p) => match &*p.body.borrow() {
            Body::Text(s) | Body::Name(s) | Body::Path(s) => s.clone(),
            _ => String::new(),
        },
        None => String::new(),
    }
}

/// Text of the StringName/String token `ptr` points at.
pub(super) unsafe fn text_at(ptr: *const c_void) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { text_of(*(ptr as *const u64)) }
}

/// A second owner for the cell: shared kinds add a reference, others copy.
pub(super) unsafe fn copy_word(word: u64) -> u64 {
    let Some(p) = (unsafe { payload(word) }) else {
        return 0;
    };
    let copy = match &*p.body.borrow() {
        Body::Name(_) => return word,
        Body::Array { .. } | Body::Dict(_) | Body::Callable(_) => {
            p.refs.set(p.refs.get() + 1);
            return word;
        }
        Body::Text(s) => Body::Text(s.clone()),
        Body::Path(s) => Body::Path(s.clone()),
        Body::Signal { object_id, name } => Body::Signal {
            object_id: *object_id,
            name: name.clone(),
        },
        Body::Packed { ty, len, words } => {
            let words = if *ty == VariantType::PackedStringArray {
                words.iter().map(|w| unsafe { copy_word(*w) }).collect()
            } else {
                words.clone()
            };
            Body::Packed {
                ty: *ty,
                len: *len,
                words,
            }
        }
    };
    alloc(copy)
}

/// Drop one owner; the last one frees the cell and everything it holds.
pub(super) unsafe fn release_word(word: u64) {
    let Some(p) = (unsafe { payload(word) }) else {
        return;
    };
    if matches!(&*p.body.borrow(), Body::Name(_)) {
        return;
    }
    let Some(refs) = p.refs.get().checked_sub(1) else {
        return;
    };
    p.refs.set(refs);
    if refs > 0 {
        return;
    }
    let cell = unsafe { Box::from_raw(word as *mut Payload) };
    LIVE.fetch_sub(1, Ordering::SeqCst);
    match cell.body.into_inner() {
        Body::Array { items, .. } => {
            for mut item in items {
                unsafe { variant_release(&mut item) };
            }
        }
        Body::Dict(pairs) => {
            for (mut k, mut v) in pairs {
                unsafe {
                    variant_release(&mut k);
                    variant_release(&mut v);
                }
            }
        }
        Body::Packed {
            ty: VariantType::PackedStringArray,
            words,
            ..
        } => {
            for w in words {
                unsafe { release_word(w) };
            }
        }
        Body::Callable(CallableBody::Custom(info)) => {
            if let Some(free) = info.free_func {
                unsafe { free(info.callable_userdata) };
            }
        }
        _ => {}
    }
}

/// Same target: one cell, one bound method, or one custom userdata.
pub(super) unsafe fn same_callable(a: u64, b: u64) -> bool {
    if a == b {
        return true;
    }
    let (Some(pa), Some(pb)) = (unsafe { payload(a) }, unsafe { payload(b) }) else {
        return false;
    };
    match (&*pa.body.borrow(), &*pb.body.borrow()) {
        (
            Body::Callable(CallableBody::Method { object_id: ia, method: ma }),
            Body::Callable(CallableBody::Method { object_id: ib, method: mb }),
        ) => ia == ib && ma == mb,
        (Body::Callable(CallableBody::Custom(x)), Body::Callable(CallableBody::Custom(y))) => {
            x.callable_userdata == y.callable_userdata
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Packed element storage
// ---------------------------------------------------------------------------

pub(super) fn elem_size(ty: VariantType) -> usize {
    match ty {
        VariantType::PackedByteArray => 1,
        VariantType::PackedInt32Array | VariantType::PackedFloat32Array => 4,
        VariantType::PackedVector3Array => 12,
        VariantType::PackedColorArray | VariantType::PackedVector4Array => 16,
        _ => 8,
    }
}

pub(super) fn packed_bytes(words: &[u64], len: usize, size: usize) -> Vec<u8> {
    let all = unsafe { std::slice::from_raw_parts(words.as_ptr() as *const u8, words.len() * 8) };
    all[..(len * size).min(all.len())].to_vec()
}

pub(super) fn packed_words(bytes: &[u8]) -> Vec<u64> {
    let mut words = vec![0u64; bytes.len().div_ceil(8)];
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), words.as_mut_ptr() as *mut u8, bytes.len())
    };
    words
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

type Wide = [u64; 8];

pub(super) fn tag(v: &OpaqueVariant) -> VariantType {
    VariantType::from_u32(v.0[0] as u32).unwrap_or(VariantType::Nil)
}

/// Byte size of value kinds the host passes as plain structs.
pub(super) fn plain_size(ty: VariantType) -> Option<usize> {
    match ty {
        VariantType::Vector2 | VariantType::Vector2i | VariantType::Rid => Some(8),
        VariantType::Vector3 | VariantType::Vector3i => Some(12),
        VariantType::Rect2
        | VariantType::Rect2i
        | VariantType::Vector4
        | VariantType::Vector4i
        | VariantType::Plane
        | VariantType::Quaternion
        | VariantType::Color => Some(16),
        VariantType::Transform2D | VariantType::Aabb => Some(24),
        VariantType::Basis => Some(36),
        VariantType::Transform3D => Some(48),
        VariantType::Projection => Some(64),
        _ => None,
    }
}

fn is_boxed(ty: VariantType) -> bool {
    plain_size(ty).is_some_and(|size| size > 16)
}

pub(super) fn object_of(v: &OpaqueVariant) -> ObjectPtr {
    ObjectPtr::from_addr(v.0[1] as usize)
}

pub(super) fn from_bool(b: bool) -> OpaqueVariant {
    variant_of(VariantType::Bool, b as u64)
}

pub(super) fn from_int(i: i64) -> OpaqueVariant {
    variant_of(VariantType::Int, i as u64)
}

pub(super) fn from_float(f: f64) -> OpaqueVariant {
    variant_of(VariantType::Float, f.to_bits())
}

pub(super) fn from_text(text: &str) -> OpaqueVariant {
    variant_of(VariantType::String, alloc(Body::Text(text.to_owned())))
}

pub(super) fn from_name(text: &str) -> OpaqueVariant {
    variant_of(VariantType::StringName, intern(text))
}

/// Variant holding a plain value `value` of kind `ty`.
pub(super) fn from_plain<T: Copy>(ty: VariantType, value: &T) -> OpaqueVariant {
    unsafe { encode(ty, value as *const T as *const c_void) }
}

pub(super) fn variant_of(ty: VariantType, w1: u64) -> OpaqueVariant {
    Opaque([ty as u64, w1, 0])
}

pub(super) fn as_int(v: &OpaqueVariant) -> Option<i64> {
    match tag(v) {
        VariantType::Int => Some(v.0[1] as i64),
        VariantType::Float => Some(f64::from_bits(v.0[1]) as i64),
        VariantType::Bool => Some(v.0[1] as i64),
        _ => None,
    }
}

pub(super) fn as_float(v: &OpaqueVariant) -> Option<f64> {
    match tag(v) {
        VariantType::Int => Some(v.0[1] as i64 as f64),
        VariantType::Float => Some(f64::from_bits(v.0[1])),
        _ => None,
    }
}

pub(super) fn is_text(ty: VariantType) -> bool {
    matches!(ty, VariantType::String | VariantType::StringName | VariantType::NodePath)
}

pub(super) unsafe fn as_text(v: &OpaqueVariant) -> Option<String> {
    is_text(tag(v)).then(|| unsafe { text_of(v.0[1]) })
}

/// Bytes of an inline or boxed plain value.
pub(super) unsafe fn plain_bytes(v: &OpaqueVariant) -> Vec<u8> {
    let ty = tag(v);
    let Some(size) = plain_size(ty) else {
        return Vec::new();
    };
    let src = if is_boxed(ty) {
        v.0[1] as *const u8
    } else {
        v.0[1..].as_ptr() as *const u8
    };
    if src.is_null() {
        return vec![0; size];
    }
    unsafe { std::slice::from_raw_parts(src, size) }.to_vec()
}

pub(super) unsafe fn variant_copy(v: &OpaqueVariant) -> OpaqueVariant {
    let ty = tag(v);
    let mut out = *v;
    match ty {
        t if t.has_destructor() => out.0[1] = unsafe { copy_word(v.0[1]) },
        VariantType::Object => objects::retain(object_of(v)),
        t if is_boxed(t) && v.0[1] != 0 => {
            let wide: Wide = unsafe { *(v.0[1] as *const Wide) };
            out.0[1] = Box::into_raw(Box::new(wide)) as u64;
        }
        _ => {}
    }
    out
}

pub(super) unsafe fn variant_release(v: &mut OpaqueVariant) {
    match tag(v) {
        t if t.has_destructor() => unsafe { release_word(v.0[1]) },
        VariantType::Object => objects::release(object_of(v)),
        t if is_boxed(t) && v.0[1] != 0 => drop(unsafe { Box::from_raw(v.0[1] as *mut Wide) }),
        _ => {}
    }
    *v = OpaqueVariant::ZERO;
}

/// Build a Variant of kind `ty` from the host representation at `value`.
/// Pooled payloads and objects gain their own owner.
pub(super) unsafe fn encode(ty: VariantType, value: *const c_void) -> OpaqueVariant {
    if ty == VariantType::Nil || value.is_null() {
        return OpaqueVariant::ZERO;
    }
    let mut out = variant_of(ty, 0);
    match ty {
        VariantType::Bool => out.0[1] = unsafe { *(value as *const bool) } as u64,
        VariantType::Int | VariantType::Float => {
            out.0[1] = unsafe { std::ptr::read_unaligned(value as *const u64) }
        }
        VariantType::Object => {
            let object = unsafe { std::ptr::read_unaligned(value as *const ObjectPtr) };
            objects::retain(object);
            out.0[1] = object.to_addr() as u64;
        }
        t if t.has_destructor() => {
            out.0[1] = unsafe { copy_word(std::ptr::read_unaligned(value as *const u64)) }
        }
        t => match plain_size(t) {
            Some(size) if size <= 16 => unsafe {
                std::ptr::copy_nonoverlapping(
                    value as *const u8,
                    out.0[1..].as_mut_ptr() as *mut u8,
                    size,
                )
            },
            Some(size) => {
                let mut wide: Wide = [0; 8];
                unsafe {
                    std::ptr::copy_nonoverlapping(value as *const u8, wide.as_mut_ptr() as *mut u8, size)
                };
                out.0[1] = Box::into_raw(Box::new(wide)) as u64;
            }
            None => {}
        },
    }
    out
}

/// Write the host representation of `v` (kind `ty`) to `r_value`. Pooled
/// payloads are copied for the host; objects are written without a reference.
pub(super) unsafe fn decode(ty: VariantType, v: &OpaqueVariant, r_value: *mut c_void) {
    if r_value.is_null() {
        return;
    }
    match ty {
        VariantType::Bool => unsafe { *(r_value as *mut bool) = v.0[1] != 0 },
        VariantType::Int | VariantType::Float | VariantType::Object => unsafe {
            std::ptr::write_unaligned(r_value as *mut u64, v.0[1])
        },
        t if t.has_destructor() => unsafe {
            std::ptr::write_unaligned(r_value as *mut u64, copy_word(v.0[1]))
        },
        _ => {
            let bytes = unsafe { plain_bytes(v) };
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), r_value as *mut u8, bytes.len()) };
        }
    }
}
