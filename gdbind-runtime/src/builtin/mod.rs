// Builtin value kinds: plain math types copied by value, and pooled engine
// payloads (strings, containers, callables) held through registry pins.

use std::mem::size_of;

use gdbind_ffi::{CTOR_DEFAULT, ConstTypePtr, Opaque, TypePtr, VariantType};

use crate::builtin_fns;
use crate::call_frame::AbiValue;
use crate::error::BindResult;
use crate::logging::LOG_ERROR;
use crate::registry::{PayloadKind, Pin, pack, registry, unpack};

/// A builtin kind with a fixed engine representation.
pub trait BuiltinValue: Sized {
    const VARIANT_TYPE: VariantType;
    /// Bytes the engine reads and writes for this kind.
    type Repr: AbiValue;

    /// Borrowed view. For pooled kinds the token stays owned by the registry.
    fn to_repr(&self) -> Self::Repr;

    /// Take ownership of a payload the engine constructed for the host.
    ///
    /// # Safety
    /// `repr` must be a live payload of this kind that nobody else releases.
    unsafe fn from_owned_repr(repr: Self::Repr) -> Self;

    /// Copy a payload the engine still owns.
    ///
    /// # Safety
    /// `repr` must be a live payload of this kind.
    unsafe fn from_borrowed_repr(repr: &Self::Repr) -> Self;

    /// Hand the payload to the engine without releasing it.
    fn into_owned_repr(self) -> Self::Repr;

    /// `Some` for kinds the registry tracks.
    fn payload_kind() -> Option<PayloadKind> {
        None
    }

    /// Value written back when host code fails to produce one.
    fn zero() -> Self;

    /// Extra check after a tag-matched decode (typed containers).
    fn validate(&self) -> BindResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pooled tokens
// ---------------------------------------------------------------------------

/// Registry-pinned token of one pooled builtin kind, `W` words wide.
pub(crate) struct Pooled<const W: usize> {
    pin: Pin,
    ty: VariantType,
}

impl<const W: usize> Pooled<W> {
    /// # Safety
    /// `token` must be an owned, live payload of type `ty`.
    pub(crate) unsafe fn adopt(ty: VariantType, token: Opaque<W>) -> Self {
        Pooled {
            pin: registry().adopt(PayloadKind::Builtin(ty), pack(token)),
            ty,
        }
    }

    /// # Safety
    /// `token` must be a live payload of type `ty`.
    pub(crate) unsafe fn acquire(ty: VariantType, token: Opaque<W>) -> Self {
        Pooled {
            pin: registry().acquire(PayloadKind::Builtin(ty), pack(token)),
            ty,
        }
    }

    /// Run engine constructor `index` of `ty`.
    pub(crate) fn construct(ty: VariantType, index: i32, args: &[ConstTypePtr]) -> BindResult<Self> {
        let ctor = builtin_fns::constructor(ty, index)?;
        let mut token = Opaque::<W>::ZERO;
        // SAFETY: args match the constructor's declared parameters.
        unsafe {
            ctor(token.as_mut_ptr(), args.as_ptr());
            Ok(Pooled::adopt(ty, token))
        }
    }

    pub(crate) fn new_default(ty: VariantType) -> Self {
        Pooled::construct(ty, CTOR_DEFAULT, &[]).unwrap_or_else(|e| {
            crate::glog!(LOG_ERROR, "[gdbind] default {} failed: {e}", ty.name());
            // SAFETY: a zero token is never dereferenced by a destructor.
            unsafe { Pooled::adopt(ty, Opaque::ZERO) }
        })
    }

    #[track_caller]
    #[inline]
    pub(crate) fn token(&self) -> Opaque<W> {
        unpack(registry().get(self.pin))
    }

    /// Mutate the token in place; writes back a reallocated token.
    #[track_caller]
    pub(crate) fn update<R>(&mut self, f: impl FnOnce(&mut Opaque<W>) -> R) -> R {
        registry().update(self.pin, |packed| {
            let mut token = unpack::<W>(*packed);
            let result = f(&mut token);
            *packed = pack(token);
            result
        })
    }

    /// Call a builtin method that does not modify the receiver.
    pub(crate) fn call<R: AbiValue>(
        &self,
        name: &'static str,
        hash: i64,
        args: &[ConstTypePtr],
    ) -> BindResult<R> {
        let method = builtin_fns::builtin_method(self.ty, name, hash)?;
        let mut token = self.token();
        Ok(unsafe { invoke(method, &mut token, args) })
    }

    /// Call a builtin method that may modify (and reallocate) the receiver.
    pub(crate) fn call_mut<R: AbiValue>(
        &mut self,
        name: &'static str,
        hash: i64,
        args: &[ConstTypePtr],
    ) -> BindResult<R> {
        let method = builtin_fns::builtin_method(self.ty, name, hash)?;
        Ok(self.update(|token| unsafe { invoke(method, token, args) }))
    }

    /// Call a builtin method returning another pooled kind.
    pub(crate) fn call_pooled<const RW: usize>(
        &self,
        name: &'static str,
        hash: i64,
        ret_ty: VariantType,
        args: &[ConstTypePtr],
    ) -> BindResult<Pooled<RW>> {
        let token: Opaque<RW> = self.call(name, hash, args)?;
        Ok(unsafe { Pooled::adopt(ret_ty, token) })
    }

    /// Give the payload to the engine.
    pub(crate) fn into_engine(self) -> Opaque<W> {
        let token = registry()
            .transfer_to_engine(self.pin)
            .map(unpack)
            .unwrap_or(Opaque::ZERO);
        std::mem::forget(self);
        token
    }

    /// Give the pin to a call frame, which ends it when the call returns.
    pub(crate) fn into_pin(self) -> Pin {
        let pin = self.pin;
        std::mem::forget(self);
        pin
    }

    /// Same engine payload (identity, not value).
    pub(crate) fn is_same(&self, other: &Self) -> bool {
        self.token() == other.token()
    }
}

unsafe fn invoke<R: AbiValue, const W: usize>(
    method: gdbind_ffi::PtrBuiltInMethod,
    token: &mut Opaque<W>,
    args: &[ConstTypePtr],
) -> R {
    // SAFETY: AbiValue guarantees the zero pattern is valid.
    let mut ret: R = unsafe { std::mem::zeroed() };
    let ret_ptr = if size_of::<R>() == 0 {
        std::ptr::null_mut()
    } else {
        &mut ret as *mut R as TypePtr
    };
    unsafe { builtin_fns::call_builtin(method, token.as_mut_ptr(), args, ret_ptr) };
    ret
}

impl<const W: usize> Clone for Pooled<W> {
    fn clone(&self) -> Self {
        unsafe { Pooled::acquire(self.ty, self.token()) }
    }
}

impl<const W: usize> Drop for Pooled<W> {
    fn drop(&mut self) {
        registry().end(self.pin);
    }
}

/// Pointer to a value for an engine argument list.
#[inline]
pub(crate) fn arg<T>(value: &T) -> ConstTypePtr {
    value as *const T as ConstTypePtr
}

// ---------------------------------------------------------------------------
// Impl generators
// ---------------------------------------------------------------------------

/// Plain value kinds: the host value is its own engine representation.
macro_rules! plain_values {
    ($($t:ty => $vt:ident),* $(,)?) => {$(
        impl $crate::builtin::BuiltinValue for $t {
            const VARIANT_TYPE: gdbind_ffi::VariantType = gdbind_ffi::VariantType::$vt;
            type Repr = $t;

            #[inline]
            fn to_repr(&self) -> $t {
                *self
            }

            #[inline]
            unsafe fn from_owned_repr(repr: $t) -> Self {
                repr
            }

            #[inline]
            unsafe fn from_borrowed_repr(repr: &$t) -> Self {
                *repr
            }

            #[inline]
            fn into_owned_repr(self) -> $t {
                self
            }

            fn zero() -> Self {
                <$t>::default()
            }
        }

        impl $crate::variant::VariantKind for $t {
            const VARIANT_TYPE: gdbind_ffi::VariantType = gdbind_ffi::VariantType::$vt;
        }

        builtin_conversions!([] $t);
    )*};
}

/// Pooled newtypes over [`Pooled`].
macro_rules! pooled_values {
    ($($name:ident => $vt:ident, $words:literal);* $(;)?) => {$(
        impl $crate::builtin::BuiltinValue for $name {
            const VARIANT_TYPE: gdbind_ffi::VariantType = gdbind_ffi::VariantType::$vt;
            type Repr = gdbind_ffi::Opaque<$words>;

            #[inline]
            fn to_repr(&self) -> Self::Repr {
                self.0.token()
            }

            unsafe fn from_owned_repr(repr: Self::Repr) -> Self {
                $name(unsafe { $crate::builtin::Pooled::adopt(Self::VARIANT_TYPE, repr) })
            }

            unsafe fn from_borrowed_repr(repr: &Self::Repr) -> Self {
                $name(unsafe { $crate::builtin::Pooled::acquire(Self::VARIANT_TYPE, *repr) })
            }

            fn into_owned_repr(self) -> Self::Repr {
                self.0.into_engine()
            }

            fn payload_kind() -> Option<$crate::registry::PayloadKind> {
                Some($crate::registry::PayloadKind::Builtin(Self::VARIANT_TYPE))
            }

            fn zero() -> Self {
                $name($crate::builtin::Pooled::new_default(Self::VARIANT_TYPE))
            }
        }

        impl $crate::variant::VariantKind for $name {
            const VARIANT_TYPE: gdbind_ffi::VariantType = gdbind_ffi::VariantType::$vt;
        }

        impl Default for $name {
            fn default() -> Self {
                <$name as $crate::builtin::BuiltinValue>::zero()
            }
        }

        builtin_conversions!([] $name);
    )*};
}

/// Variant and ptrcall marshaling for any `BuiltinValue`.
macro_rules! builtin_conversions {
    ($([$($gen:tt)*] $t:ty),* $(,)?) => {$(
        impl<$($gen)*> $crate::variant::ToVariant for $t {
            fn to_variant(&self) -> $crate::variant::Variant {
                $crate::variant::encode_builtin(self)
            }
        }

        impl<$($gen)*> $crate::variant::FromVariant for $t {
            fn try_from_variant(
                variant: &$crate::variant::Variant,
            ) -> $crate::error::BindResult<Self> {
                $crate::variant::decode_builtin(variant)
            }
        }

        impl<$($gen)*> $crate::marshal::PtrArg for $t {
            fn push_arg(&self, frame: &mut $crate::call_frame::CallFrame) {
                frame.arg($crate::builtin::BuiltinValue::to_repr(self));
            }
        }

        impl<$($gen)*> $crate::marshal::PtrReturn for $t {
            type Slot = <$t as $crate::builtin::BuiltinValue>::Repr;

            fn reserve(
                frame: &mut $crate::call_frame::CallFrame,
            ) -> $crate::call_frame::RetSlot<Self::Slot> {
                match <$t as $crate::builtin::BuiltinValue>::payload_kind() {
                    Some(kind) => frame.ret_owned(kind),
                    None => frame.ret_slot(),
                }
            }

            fn take(
                frame: &mut $crate::call_frame::CallFrame,
                slot: &$crate::call_frame::RetSlot<Self::Slot>,
                _ownership: $crate::marshal::ReturnOwnership,
            ) -> Self {
                // Builtin returns are always constructed for the caller.
                unsafe {
                    <$t as $crate::builtin::BuiltinValue>::from_owned_repr(frame.take_owned(slot))
                }
            }
        }

        impl<$($gen)*> $crate::marshal::PtrLift for $t {
            unsafe fn lift(ptr: gdbind_ffi::ConstTypePtr) -> Self {
                unsafe {
                    <$t as $crate::builtin::BuiltinValue>::from_borrowed_repr(
                        &*(ptr as *const <$t as $crate::builtin::BuiltinValue>::Repr),
                    )
                }
            }
        }

        impl<$($gen)*> $crate::marshal::PtrLower for $t {
            fn zero() -> Self {
                <$t as $crate::builtin::BuiltinValue>::zero()
            }

            unsafe fn lower(self, ret: gdbind_ffi::TypePtr) {
                let repr = $crate::builtin::BuiltinValue::into_owned_repr(self);
                unsafe {
                    std::ptr::write(ret as *mut <$t as $crate::builtin::BuiltinValue>::Repr, repr)
                };
            }
        }
    )*};
}

mod array;
mod callable;
mod dictionary;
mod math;
mod packed;
mod string;

pub use array::{Array, ArrayElement, ArrayIter};
pub use callable::{Callable, Signal};
pub use dictionary::{Dictionary, DictionaryIter};
pub use math::*;
pub use packed::{
    PackedArray, PackedByteArray, PackedColorArray, PackedElement, PackedFloat32Array,
    PackedFloat64Array, PackedInt32Array, PackedInt64Array, PackedStringArray,
    PackedVector2Array, PackedVector3Array, PackedVector4Array,
};
pub use string::{GString, NodePath, StringName};

plain_values!(bool => Bool, i64 => Int, f64 => Float);

pub(crate) use callable::clear_closures;
pub use callable::live_closures;
