// Variant: the engine's tagged-union value, held through the pointer registry.
//
// Encoding goes through the engine's from-type constructors and decoding
// through its to-type constructors, so payload shapes always match the
// engine bit for bit. Decoding checks the tag first and never converts
// between kinds.

use std::fmt;

use gdbind_ffi::{
    CallError, ConstVariantPtr, OpaqueVariant, TypePtr, UninitTypePtr, VariantOperator,
    VariantPtr, VariantType,
};

use crate::api::api;
use crate::builtin::{BuiltinValue, GString, StringName};
use crate::builtin_fns;
use crate::error::{BindError, BindResult, check_call_error};
use crate::logging::LOG_ERROR;
use crate::registry::{PayloadKind, Pin, pack, registry, unpack};

/// Host value convertible into a Variant of a fixed kind.
pub trait ToVariant {
    fn to_variant(&self) -> Variant;
}

/// Host value decodable from a Variant. Fails with `TypeMismatch` when the
/// Variant's tag is not the kind `Self` maps to.
pub trait FromVariant: Sized {
    fn try_from_variant(variant: &Variant) -> BindResult<Self>;
}

/// Static Variant kind of a host type.
pub trait VariantKind {
    const VARIANT_TYPE: VariantType;
}

/// An owned engine Variant. Nil needs no engine allocation and holds no slot.
pub struct Variant {
    pin: Option<Pin>,
}

impl Variant {
    #[inline]
    pub const fn nil() -> Self {
        Variant { pin: None }
    }

    /// Take ownership of an engine-constructed Variant token.
    ///
    /// # Safety
    /// `token` must be a live Variant the caller owns and will not destroy.
    pub(crate) unsafe fn from_owned_token(token: OpaqueVariant) -> Self {
        // SAFETY: token is a valid Variant per the contract above.
        let ty = unsafe { ((*api().variant).get_type)(token.as_ptr()) };
        if ty == VariantType::Nil {
            return Variant::nil();
        }
        Variant {
            pin: Some(registry().adopt(PayloadKind::Variant, pack(token))),
        }
    }

    /// Copy a Variant the engine still owns.
    ///
    /// # Safety
    /// `ptr` must point at a live Variant.
    pub(crate) unsafe fn from_borrowed_ptr(ptr: ConstVariantPtr) -> Self {
        let mut token = OpaqueVariant::ZERO;
        unsafe {
            ((*api().variant).new_copy)(token.as_mut_ptr(), ptr);
            Variant::from_owned_token(token)
        }
    }

    /// Borrowed view of the token. All-zero is Nil.
    #[track_caller]
    pub(crate) fn token(&self) -> OpaqueVariant {
        match self.pin {
            None => OpaqueVariant::ZERO,
            Some(pin) => unpack(registry().get(pin)),
        }
    }

    /// Give the payload to the engine: destroy what `dst` holds, then move
    /// this Variant's token in.
    ///
    /// # Safety
    /// `dst` must point at an initialized Variant owned by the engine.
    pub(crate) unsafe fn write_to(self, dst: VariantPtr) {
        unsafe {
            ((*api().variant).destroy)(dst);
            self.move_into(dst);
        }
    }

    /// Move the token into uninitialized (zeroed) memory.
    ///
    /// # Safety
    /// `dst` must be valid for a 24-byte write and hold no live Variant.
    pub(crate) unsafe fn move_into(self, dst: TypePtr) {
        let token = match self.pin {
            None => OpaqueVariant::ZERO,
            Some(pin) => match registry().transfer_to_engine(pin) {
                Ok(packed) => unpack(packed),
                Err(_) => OpaqueVariant::ZERO,
            },
        };
        std::mem::forget(self);
        unsafe { std::ptr::write(dst as *mut OpaqueVariant, token) };
    }

    pub fn get_type(&self) -> VariantType {
        match self.pin {
            None => VariantType::Nil,
            Some(_) => {
                let token = self.token();
                // SAFETY: token is a live Variant owned by the registry.
                unsafe { ((*api().variant).get_type)(token.as_ptr()) }
            }
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        self.pin.is_none() || self.get_type() == VariantType::Nil
    }

    /// Decode into `T`, checking the tag.
    #[inline]
    pub fn to<T: FromVariant>(&self) -> BindResult<T> {
        T::try_from_variant(self)
    }

    /// The engine's string form of the value.
    pub fn stringify(&self) -> GString {
        let token = self.token();
        let mut out = gdbind_ffi::OpaqueString::ZERO;
        unsafe {
            ((*api().variant).stringify)(token.as_ptr(), out.as_mut_ptr());
            GString::from_owned_token(out)
        }
    }

    pub fn hash_value(&self) -> i64 {
        let token = self.token();
        unsafe { ((*api().variant).hash)(token.as_ptr()) }
    }

    pub fn booleanize(&self) -> bool {
        let token = self.token();
        unsafe { ((*api().variant).booleanize)(token.as_ptr()) }
    }

    /// Apply an engine operator. `None` if the operator is not defined for
    /// the operand kinds.
    pub fn evaluate(&self, op: VariantOperator, rhs: &Variant) -> Option<Variant> {
        let a = self.token();
        let b = rhs.token();
        let mut out = OpaqueVariant::ZERO;
        let mut valid = false;
        unsafe {
            ((*api().variant).evaluate)(op, a.as_ptr(), b.as_ptr(), out.as_mut_ptr(), &mut valid);
            let result = Variant::from_owned_token(out);
            valid.then_some(result)
        }
    }

    /// Call a builtin method of the held value by name.
    pub fn call(&mut self, method: &str, args: &[Variant]) -> BindResult<Variant> {
        let name = StringName::from(method);
        let name_token = name.token();
        let arg_tokens: Vec<OpaqueVariant> = args.iter().map(Variant::token).collect();
        let arg_ptrs: Vec<ConstVariantPtr> = arg_tokens.iter().map(|t| t.as_ptr()).collect();
        let mut out = OpaqueVariant::ZERO;
        let mut error = CallError::OK;
        let invoke = |base: VariantPtr, out: &mut OpaqueVariant, error: &mut CallError| unsafe {
            ((*api().variant).call)(
                base,
                name_token.as_ptr(),
                arg_ptrs.as_ptr(),
                arg_ptrs.len() as i64,
                out.as_mut_ptr(),
                error,
            )
        };
        match self.pin {
            None => {
                let mut nil = OpaqueVariant::ZERO;
                invoke(nil.as_mut_ptr(), &mut out, &mut error);
            }
            Some(pin) => registry().update(pin, |tok| invoke(tok.as_mut_ptr(), &mut out, &mut error)),
        }
        let result = unsafe { Variant::from_owned_token(out) };
        check_call_error(&error, method)?;
        Ok(result)
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::nil()
    }
}

impl Clone for Variant {
    fn clone(&self) -> Self {
        match self.pin {
            None => Variant::nil(),
            Some(_) => {
                let token = self.token();
                unsafe { Variant::from_borrowed_ptr(token.as_ptr()) }
            }
        }
    }
}

impl Drop for Variant {
    fn drop(&mut self) {
        if let Some(pin) = self.pin.take() {
            registry().end(pin);
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.evaluate(VariantOperator::Equal, other)
            .is_some_and(|v| v.booleanize())
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringify())
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Variant")
            .field(&self.get_type())
            .field(&self.stringify().to_string())
            .finish()
    }
}

impl ToVariant for Variant {
    fn to_variant(&self) -> Variant {
        self.clone()
    }
}

impl FromVariant for Variant {
    fn try_from_variant(variant: &Variant) -> BindResult<Self> {
        Ok(variant.clone())
    }
}

// ---------------------------------------------------------------------------
// Builtin encode/decode through the engine's type constructors
// ---------------------------------------------------------------------------

/// Encode a builtin through `variant_from_type`. The engine copies pooled
/// payloads, so `value` keeps its own reference.
pub(crate) fn encode_builtin<T: BuiltinValue>(value: &T) -> Variant {
    let repr = value.to_repr();
    match builtin_fns::variant_from_type(T::VARIANT_TYPE) {
        Ok(ctor) => {
            let mut token = OpaqueVariant::ZERO;
            unsafe {
                ctor(token.as_mut_ptr(), &repr as *const T::Repr as TypePtr);
                Variant::from_owned_token(token)
            }
        }
        Err(e) => {
            crate::glog!(LOG_ERROR, "[gdbind] cannot encode {}: {e}", T::VARIANT_TYPE.name());
            Variant::nil()
        }
    }
}

/// Decode a builtin through `type_from_variant` after checking the tag.
pub(crate) fn decode_builtin<T: BuiltinValue>(variant: &Variant) -> BindResult<T> {
    let actual = variant.get_type();
    if actual != T::VARIANT_TYPE {
        return Err(BindError::variant_mismatch(T::VARIANT_TYPE, actual));
    }
    let ctor = builtin_fns::type_from_variant(T::VARIANT_TYPE)?;
    // SAFETY: AbiValue guarantees the zero pattern is a valid Repr.
    let mut repr: T::Repr = unsafe { std::mem::zeroed() };
    let mut token = variant.token();
    let value = unsafe {
        ctor(&mut repr as *mut T::Repr as UninitTypePtr, token.as_mut_ptr());
        T::from_owned_repr(repr)
    };
    value.validate()?;
    Ok(value)
}

// ---------------------------------------------------------------------------
// Scalars narrower than the engine's int/float
// ---------------------------------------------------------------------------

macro_rules! widened_scalar {
    ($($t:ty => $wide:ty),* $(,)?) => {$(
        impl VariantKind for $t {
            const VARIANT_TYPE: VariantType = <$wide as VariantKind>::VARIANT_TYPE;
        }

        impl ToVariant for $t {
            fn to_variant(&self) -> Variant {
                (*self as $wide).to_variant()
            }
        }

        impl FromVariant for $t {
            /// Narrowing wraps (two's complement), like the engine's own casts.
            fn try_from_variant(variant: &Variant) -> BindResult<Self> {
                <$wide>::try_from_variant(variant).map(|v| v as $t)
            }
        }
    )*};
}

widened_scalar!(
    i8 => i64, i16 => i64, i32 => i64,
    u8 => i64, u16 => i64, u32 => i64, u64 => i64,
    f32 => f64,
);

// ---------------------------------------------------------------------------
// Nil, Option, and Rust strings
// ---------------------------------------------------------------------------

impl<T: ToVariant> ToVariant for Option<T> {
    fn to_variant(&self) -> Variant {
        match self {
            Some(v) => v.to_variant(),
            None => Variant::nil(),
        }
    }
}

impl<T: FromVariant> FromVariant for Option<T> {
    fn try_from_variant(variant: &Variant) -> BindResult<Self> {
        if variant.is_nil() {
            Ok(None)
        } else {
            T::try_from_variant(variant).map(Some)
        }
    }
}

impl<T: ToVariant + ?Sized> ToVariant for &T {
    fn to_variant(&self) -> Variant {
        (**self).to_variant()
    }
}

impl ToVariant for str {
    fn to_variant(&self) -> Variant {
        GString::from(self).to_variant()
    }
}

impl ToVariant for String {
    fn to_variant(&self) -> Variant {
        self.as_str().to_variant()
    }
}

impl FromVariant for String {
    fn try_from_variant(variant: &Variant) -> BindResult<Self> {
        GString::try_from_variant(variant).map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn integers_round_trip() {
        let _engine = testing::session();
        let v = 42i64.to_variant();
        assert_eq!(v.get_type(), VariantType::Int);
        assert_eq!(v.to::<i64>(), Ok(42));
        assert_eq!((-1i32).to_variant().to::<i32>(), Ok(-1));
    }

    #[test]
    fn narrowing_wraps() {
        let _engine = testing::session();
        let v = 300i64.to_variant();
        assert_eq!(v.to::<u8>(), Ok(44));
        assert_eq!((-1i64).to_variant().to::<u32>(), Ok(u32::MAX));
    }

    #[test]
    fn floats_widen_to_f64() {
        let _engine = testing::session();
        let v = 0.5f32.to_variant();
        assert_eq!(v.get_type(), VariantType::Float);
        assert_eq!(v.to::<f64>(), Ok(0.5));
    }

    #[test]
    fn string_decoded_as_int_is_a_mismatch() {
        let _engine = testing::session();
        let v = "hello".to_variant();
        let err = v.to::<i64>().unwrap_err();
        assert_eq!(err, BindError::variant_mismatch(VariantType::Int, VariantType::String));
        assert_eq!(v.to::<String>().as_deref(), Ok("hello"));
    }

    #[test]
    fn nil_maps_to_none() {
        let _engine = testing::session();
        let nil = Variant::nil();
        assert!(nil.is_nil());
        assert_eq!(nil.to::<Option<i64>>(), Ok(None));
        assert!(nil.to::<i64>().is_err());
        assert_eq!(Some(3i64).to_variant().to::<Option<i64>>(), Ok(Some(3)));
    }

    #[test]
    fn clone_and_drop_release_every_slot() {
        let _engine = testing::session();
        let before = registry().live_count();
        {
            let a = "shared".to_variant();
            let b = a.clone();
            assert_eq!(a, b);
            assert_eq!(registry().live_count(), before + 2);
        }
        assert_eq!(registry().live_count(), before);
    }

    #[test]
    fn operators_and_stringify() {
        let _engine = testing::session();
        let sum = 2i64
            .to_variant()
            .evaluate(VariantOperator::Add, &3i64.to_variant())
            .unwrap();
        assert_eq!(sum.to::<i64>(), Ok(5));
        assert_eq!(true.to_variant().stringify().to_string(), "true");
        assert!(!Variant::nil().booleanize());
    }

    #[test]
    fn variant_call_reaches_builtin_methods() {
        let _engine = testing::session();
        let mut s = "four".to_variant();
        assert_eq!(s.call("length", &[]).unwrap().to::<i64>(), Ok(4));
        let err = s.call("no_such_method", &[]).unwrap_err();
        assert!(matches!(err, BindError::CallFailed { .. }));
    }
}
