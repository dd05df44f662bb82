// VariantApi of the mock engine: copy, destroy, operators, stringify and the
// per-type from/to constructors.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ptr;

use gdbind_ffi::{
    CallError, CallErrorType, ConstStringNamePtr, ConstVariantPtr, OpaqueVariant, TypePtr,
    TypeFromVariantConstructorFunc, UninitStringPtr, UninitTypePtr, UninitVariantPtr,
    VariantFromTypeConstructorFunc, VariantOperator, VariantPtr, VariantType,
};

use super::builtins::invoke_callable;
use super::cells::{
    self, Body, as_float, as_int, as_text, from_bool, from_float, from_int, is_text, tag,
    variant_copy, variant_release,
};
use super::objects;

unsafe fn read(v: ConstVariantPtr) -> OpaqueVariant {
    if v.is_null() {
        return OpaqueVariant::ZERO;
    }
    unsafe { ptr::read_unaligned(v as *const OpaqueVariant) }
}

unsafe fn write(dst: UninitVariantPtr, v: OpaqueVariant) {
    if !dst.is_null() {
        unsafe { ptr::write_unaligned(dst as *mut OpaqueVariant, v) };
    }
}

pub(super) unsafe extern "C" fn new_copy(r_dest: UninitVariantPtr, src: ConstVariantPtr) {
    unsafe {
        let src = read(src);
        write(r_dest, variant_copy(&src));
    }
}

pub(super) unsafe extern "C" fn new_nil(r_dest: UninitVariantPtr) {
    unsafe { write(r_dest, OpaqueVariant::ZERO) };
}

pub(super) unsafe extern "C" fn destroy(variant: VariantPtr) {
    if variant.is_null() {
        return;
    }
    unsafe {
        let mut v = read(variant);
        variant_release(&mut v);
        write(variant, v);
    }
}

pub(super) unsafe extern "C" fn get_type(variant: ConstVariantPtr) -> VariantType {
    tag(&unsafe { read(variant) })
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Deep value equality. Int and Float compare numerically; the string kinds
/// compare by text.
pub(super) unsafe fn equal(a: &OpaqueVariant, b: &OpaqueVariant) -> bool {
    let (ta, tb) = (tag(a), tag(b));
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return x == y;
    }
    if is_text(ta) && is_text(tb) {
        return unsafe { as_text(a) == as_text(b) };
    }
    if ta != tb {
        return false;
    }
    match ta {
        VariantType::Nil => true,
        VariantType::Bool | VariantType::Object => a.0[1] == b.0[1],
        VariantType::Callable => unsafe { cells::same_callable(a.0[1], b.0[1]) },
        t if t.has_destructor() => unsafe { containers_equal(a.0[1], b.0[1]) },
        _ => unsafe { cells::plain_bytes(a) == cells::plain_bytes(b) },
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

impl PartialEq for Num {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Num::Int(x), Num::Int(y)) => x == y,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl Num {
    fn as_f64(&self) -> f64 {
        match *self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn numeric(v: &OpaqueVariant) -> Option<Num> {
    match tag(v) {
        VariantType::Int => as_int(v).map(Num::Int),
        VariantType::Float => as_float(v).map(Num::Float),
        _ => None,
    }
}

unsafe fn containers_equal(a: u64, b: u64) -> bool {
    if a == b {
        return true;
    }
    let (Some(pa), Some(pb)) = (unsafe { cells::payload(a) }, unsafe { cells::payload(b) }) else {
        return false;
    };
    let (ba, bb) = (pa.body.borrow(), pb.body.borrow());
    match (&*ba, &*bb) {
        (Body::Array { items: x, .. }, Body::Array { items: y, .. }) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| unsafe { equal(p, q) })
        }
        (Body::Dict(x), Body::Dict(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.iter()
                        .any(|(k2, v2)| unsafe { equal(k, k2) && equal(v, v2) })
                })
        }
        (
            Body::Packed { ty: tx, len: lx, words: wx },
            Body::Packed { ty: ty_, len: ly, words: wy },
        ) => {
            if tx != ty_ || lx != ly {
                return false;
            }
            if *tx == VariantType::PackedStringArray {
                wx.iter()
                    .zip(wy)
                    .all(|(p, q)| unsafe { cells::text_of(*p) == cells::text_of(*q) })
            } else {
                let size = cells::elem_size(*tx);
                cells::packed_bytes(wx, *lx, size) == cells::packed_bytes(wy, *ly, size)
            }
        }
        (
            Body::Signal { object_id: ox, name: nx },
            Body::Signal { object_id: oy, name: ny },
        ) => ox == oy && nx == ny,
        _ => false,
    }
}

unsafe fn evaluate_op(op: VariantOperator, a: &OpaqueVariant, b: &OpaqueVariant) -> Option<OpaqueVariant> {
    match op {
        VariantOperator::Equal => return Some(from_bool(unsafe { equal(a, b) })),
        VariantOperator::NotEqual => return Some(from_bool(!unsafe { equal(a, b) })),
        _ => {}
    }
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return match (op, x, y) {
            (VariantOperator::Add, Num::Int(x), Num::Int(y)) => Some(from_int(x.wrapping_add(y))),
            (VariantOperator::Subtract, Num::Int(x), Num::Int(y)) => Some(from_int(x.wrapping_sub(y))),
            (VariantOperator::Multiply, Num::Int(x), Num::Int(y)) => Some(from_int(x.wrapping_mul(y))),
            (VariantOperator::Add, x, y) => Some(from_float(x.as_f64() + y.as_f64())),
            (VariantOperator::Subtract, x, y) => Some(from_float(x.as_f64() - y.as_f64())),
            (VariantOperator::Multiply, x, y) => Some(from_float(x.as_f64() * y.as_f64())),
            (VariantOperator::Divide, _, Num::Int(0)) => None,
            (VariantOperator::Divide, Num::Int(x), Num::Int(y)) => Some(from_int(x / y)),
            (VariantOperator::Divide, x, y) => Some(from_float(x.as_f64() / y.as_f64())),
            (VariantOperator::Less, x, y) => Some(from_bool(x.as_f64() < y.as_f64())),
            (VariantOperator::LessEqual, x, y) => Some(from_bool(x.as_f64() <= y.as_f64())),
            (VariantOperator::Greater, x, y) => Some(from_bool(x.as_f64() > y.as_f64())),
            (VariantOperator::GreaterEqual, x, y) => Some(from_bool(x.as_f64() >= y.as_f64())),
            _ => None,
        };
    }
    let (Some(x), Some(y)) = (unsafe { as_text(a) }, unsafe { as_text(b) }) else {
        return None;
    };
    match op {
        VariantOperator::Add => Some(cells::from_text(&(x + &y))),
        VariantOperator::Less => Some(from_bool(x < y)),
        VariantOperator::Greater => Some(from_bool(x > y)),
        _ => None,
    }
}

pub(super) unsafe extern "C" fn evaluate(
    op: VariantOperator,
    a: ConstVariantPtr,
    b: ConstVariantPtr,
    r_result: UninitVariantPtr,
    r_valid: *mut bool,
) {
    let result = unsafe { evaluate_op(op, &read(a), &read(b)) };
    let valid = result.is_some();
    unsafe {
        write(r_result, result.unwrap_or(OpaqueVariant::ZERO));
        if !r_valid.is_null() {
            *r_valid = valid;
        }
    }
}

pub(super) unsafe extern "C" fn hash(variant: ConstVariantPtr) -> i64 {
    let v = unsafe { read(variant) };
    let mut hasher = DefaultHasher::new();
    (tag(&v) as u32).hash(&mut hasher);
    unsafe { display(&v, false) }.hash(&mut hasher);
    hasher.finish() as i64
}

pub(super) unsafe extern "C" fn booleanize(variant: ConstVariantPtr) -> bool {
    let v = unsafe { read(variant) };
    match tag(&v) {
        VariantType::Nil => false,
        VariantType::Bool | VariantType::Int => v.0[1] != 0,
        VariantType::Float => as_float(&v).is_some_and(|f| f != 0.0),
        VariantType::Object => !cells::object_of(&v).is_null(),
        t if is_text(t) => unsafe { !cells::text_of(v.0[1]).is_empty() },
        VariantType::Array | VariantType::Dictionary => unsafe { container_len(v.0[1]) > 0 },
        _ => true,
    }
}

pub(super) unsafe fn container_len(word: u64) -> usize {
    match unsafe { cells::payload(word) } {
        Some(p) => match &*p.body.borrow() {
            Body::Array { items, .. } => items.len(),
            Body::Dict(pairs) => pairs.len(),
            Body::Packed { len, .. } => *len,
            Body::Text(s) | Body::Name(s) | Body::Path(s) => s.chars().count(),
            _ => 0,
        },
        None => 0,
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

fn float_text(f: f64) -> String {
    format!("{f}")
}

/// Text form of a Variant. Strings nested in containers are quoted.
pub(super) unsafe fn display(v: &OpaqueVariant, nested: bool) -> String {
    let ty = tag(v);
    match ty {
        VariantType::Nil => "<null>".to_owned(),
        VariantType::Bool => (v.0[1] != 0).to_string(),
        VariantType::Int => (v.0[1] as i64).to_string(),
        VariantType::Float => float_text(f64::from_bits(v.0[1])),
        t if is_text(t) => {
            let text = unsafe { cells::text_of(v.0[1]) };
            if nested { format!("\"{text}\"") } else { text }
        }
        VariantType::Object => objects::describe(cells::object_of(v)),
        VariantType::Vector2 | VariantType::Vector3 | VariantType::Vector4 | VariantType::Color => {
            let bytes = unsafe { cells::plain_bytes(v) };
            let parts: Vec<String> = bytes
                .chunks_exact(4)
                .map(|c| float_text(f32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as f64))
                .collect();
            format!("({})", parts.join(", "))
        }
        VariantType::Array | VariantType::Dictionary => unsafe { display_container(v.0[1]) },
        other => other.name().to_owned(),
    }
}

unsafe fn display_container(word: u64) -> String {
    let Some(p) = (unsafe { cells::payload(word) }) else {
        return String::new();
    };
    match &*p.body.borrow() {
        Body::Array { items, .. } => {
            let parts: Vec<String> = items.iter().map(|i| unsafe { display(i, true) }).collect();
            format!("[{}]", parts.join(", "))
        }
        Body::Dict(pairs) if pairs.is_empty() => "{ }".to_owned(),
        Body::Dict(pairs) => {
            let parts: Vec<String> = pairs
                .iter()
                .map(|(k, v)| unsafe { format!("{}: {}", display(k, true), display(v, true)) })
                .collect();
            format!("{{ {} }}", parts.join(", "))
        }
        _ => String::new(),
    }
}

pub(super) unsafe extern "C" fn stringify(variant: ConstVariantPtr, r_str: UninitStringPtr) {
    let text = unsafe { display(&read(variant), false) };
    if !r_str.is_null() {
        unsafe { ptr::write_unaligned(r_str as *mut u64, cells::alloc(Body::Text(text))) };
    }
}

// ---------------------------------------------------------------------------
// Calls by name
// ---------------------------------------------------------------------------

pub(super) unsafe fn read_args(args: *const ConstVariantPtr, count: i64) -> Vec<OpaqueVariant> {
    if args.is_null() {
        return Vec::new();
    }
    (0..count.max(0) as usize)
        .map(|i| unsafe { read(*args.add(i)) })
        .collect()
}

pub(super) unsafe fn finish_call(
    outcome: Result<OpaqueVariant, CallErrorType>,
    r_ret: UninitVariantPtr,
    r_error: *mut CallError,
) {
    let error = match outcome {
        Ok(value) => {
            unsafe { write(r_ret, value) };
            CallErrorType::Ok
        }
        Err(error) => {
            unsafe { write(r_ret, OpaqueVariant::ZERO) };
            error
        }
    };
    if !r_error.is_null() {
        unsafe {
            *r_error = CallError {
                error,
                argument: 0,
                expected: 0,
            }
        };
    }
}

pub(super) unsafe extern "C" fn call(
    variant: VariantPtr,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    arg_count: i64,
    r_ret: UninitVariantPtr,
    r_error: *mut CallError,
) {
    let v = unsafe { read(variant) };
    let method = unsafe { cells::text_at(method) };
    let args = unsafe { read_args(args, arg_count) };
    let ty = tag(&v);
    let outcome = match method.as_str() {
        "length" if is_text(ty) => Ok(from_int(unsafe { container_len(v.0[1]) } as i64)),
        "size" if matches!(ty, VariantType::Array | VariantType::Dictionary) || ty.is_packed_array() => {
            Ok(from_int(unsafe { container_len(v.0[1]) } as i64))
        }
        "call" if ty == VariantType::Callable => unsafe { invoke_callable(v.0[1], &args) },
        _ => Err(CallErrorType::InvalidMethod),
    };
    unsafe { finish_call(outcome, r_ret, r_error) };
}

// ---------------------------------------------------------------------------
// Per-type constructors
// ---------------------------------------------------------------------------

unsafe extern "C" fn from_type<const T: u32>(r_variant: UninitVariantPtr, value: TypePtr) {
    let Some(ty) = VariantType::from_u32(T) else {
        return;
    };
    unsafe { write(r_variant, cells::encode(ty, value)) };
}

unsafe extern "C" fn to_type<const T: u32>(r_value: UninitTypePtr, variant: VariantPtr) {
    let Some(ty) = VariantType::from_u32(T) else {
        return;
    };
    unsafe { cells::decode(ty, &read(variant), r_value) };
}

macro_rules! per_type {
    ($f:ident) => {
        [
            $f::<0>, $f::<1>, $f::<2>, $f::<3>, $f::<4>, $f::<5>, $f::<6>, $f::<7>, $f::<8>,
            $f::<9>, $f::<10>, $f::<11>, $f::<12>, $f::<13>, $f::<14>, $f::<15>, $f::<16>,
            $f::<17>, $f::<18>, $f::<19>, $f::<20>, $f::<21>, $f::<22>, $f::<23>, $f::<24>,
            $f::<25>, $f::<26>, $f::<27>, $f::<28>, $f::<29>, $f::<30>, $f::<31>, $f::<32>,
            $f::<33>, $f::<34>, $f::<35>, $f::<36>, $f::<37>, $f::<38>,
        ]
    };
}
pub(super) use per_type;

static FROM_TYPE: [VariantFromTypeConstructorFunc; VariantType::COUNT] = per_type!(from_type);
static TO_TYPE: [TypeFromVariantConstructorFunc; VariantType::COUNT] = per_type!(to_type);

pub(super) unsafe extern "C" fn get_from_type_constructor(
    ty: VariantType,
) -> Option<VariantFromTypeConstructorFunc> {
    (ty != VariantType::Nil).then(|| FROM_TYPE[ty as usize])
}

pub(super) unsafe extern "C" fn get_to_type_constructor(
    ty: VariantType,
) -> Option<TypeFromVariantConstructorFunc> {
    (ty != VariantType::Nil).then(|| TO_TYPE[ty as usize])
}
