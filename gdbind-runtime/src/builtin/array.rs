// Array<T>: engine Array, typed when T is a concrete kind.
// Element access goes through the engine index operator; the Array payload is
// shared between clones, like the engine's own reference semantics.

use std::fmt;
use std::marker::PhantomData;

use gdbind_ffi::{Opaque, OpaqueVariant, VariantType};

use super::{BuiltinValue, Pooled, StringName, arg};
use crate::api::api;
use crate::error::{BindError, BindResult, check_engine};
use crate::logging::LOG_WARNING;
use crate::registry::PayloadKind;
use crate::variant::{FromVariant, ToVariant, Variant, VariantKind};

const SIZE_HASH: i64 = 3173160232;
const PUSH_BACK_HASH: i64 = 3316032543;
const INSERT_HASH: i64 = 3176316662;
const REMOVE_AT_HASH: i64 = 2823966027;
const CLEAR_HASH: i64 = 3218959716;
const GET_TYPED_BUILTIN_HASH: i64 = 3173160232;

/// A type that can be an Array element.
pub trait ArrayElement: ToVariant + FromVariant + 'static {
    /// Engine element type of `Array<Self>`; `Nil` means untyped.
    fn element_type() -> VariantType;

    /// Class constraint for object elements.
    fn element_class() -> Option<&'static str> {
        None
    }
}

impl ArrayElement for Variant {
    fn element_type() -> VariantType {
        VariantType::Nil
    }
}

macro_rules! array_elements {
    ($($t:ty),* $(,)?) => {$(
        impl ArrayElement for $t {
            fn element_type() -> VariantType {
                <$t as VariantKind>::VARIANT_TYPE
            }
        }
    )*};
}

array_elements!(
    bool, i64, i32, f64, f32,
    super::GString, super::StringName, super::NodePath,
    super::Vector2, super::Vector2i, super::Vector3, super::Vector3i,
    super::Vector4, super::Vector4i, super::Rect2, super::Rect2i,
    super::Transform2D, super::Transform3D, super::Basis, super::Quaternion,
    super::Plane, super::Aabb, super::Color, super::Rid, super::Projection,
    super::Dictionary, super::Callable, super::Signal,
);

impl<T: ArrayElement> ArrayElement for Array<T> {
    fn element_type() -> VariantType {
        VariantType::Array
    }
}

// ---------------------------------------------------------------------------
// Array
// ---------------------------------------------------------------------------

pub struct Array<T: ArrayElement = Variant> {
    raw: Pooled<1>,
    _marker: PhantomData<T>,
}

impl<T: ArrayElement> Array<T> {
    /// An empty array, typed to `T` unless `T` is `Variant`.
    pub fn new() -> Self {
        let mut raw = Pooled::new_default(VariantType::Array);
        let ty = T::element_type();
        if ty != VariantType::Nil {
            let class = StringName::from(T::element_class().unwrap_or(""));
            let class_token = class.token();
            let script = OpaqueVariant::ZERO;
            raw.update(|token| unsafe {
                ((*api().builtins).array_set_typed)(
                    token.as_mut_ptr(),
                    ty,
                    class_token.as_ptr(),
                    script.as_ptr(),
                )
            });
        }
        Array::from_raw(raw)
    }

    pub(crate) fn from_raw(raw: Pooled<1>) -> Self {
        Array {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.raw.call::<i64>("size", SIZE_HASH, &[]).unwrap_or(0).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type the engine enforces for this array.
    pub fn typed_element(&self) -> VariantType {
        self.raw
            .call::<i64>("get_typed_builtin", GET_TYPED_BUILTIN_HASH, &[])
            .ok()
            .and_then(|t| VariantType::from_u32(t as u32))
            .unwrap_or(VariantType::Nil)
    }

    fn check_index(&self, index: usize, len: usize) -> BindResult<()> {
        if index < len {
            Ok(())
        } else {
            Err(BindError::IndexOutOfRange { index, len })
        }
    }

    /// Copy of the element Variant at `index`.
    fn element(&self, index: usize) -> BindResult<Variant> {
        self.check_index(index, self.len())?;
        let mut token = self.raw.token();
        unsafe {
            let ptr = ((*api().builtins).array_operator_index)(token.as_mut_ptr(), index as i64);
            Ok(Variant::from_borrowed_ptr(ptr))
        }
    }

    pub fn try_get(&self, index: usize) -> BindResult<T> {
        T::try_from_variant(&self.element(index)?)
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.try_get(index).ok()
    }

    pub fn set(&mut self, index: usize, value: &T) -> BindResult<()> {
        self.check_index(index, self.len())?;
        let variant = value.to_variant();
        self.raw.update(|token| unsafe {
            let ptr = ((*api().builtins).array_operator_index)(token.as_mut_ptr(), index as i64);
            variant.write_to(ptr);
        });
        Ok(())
    }

    pub fn push(&mut self, value: &T) {
        let variant = value.to_variant();
        let token = variant.token();
        if let Err(e) = self.raw.call_mut::<()>("push_back", PUSH_BACK_HASH, &[arg(&token)]) {
            crate::glog!(crate::logging::LOG_ERROR, "[gdbind] Array::push: {e}");
        }
    }

    /// Insert before `index`; `index == len` appends.
    pub fn insert(&mut self, index: usize, value: &T) -> BindResult<()> {
        let len = self.len();
        if index > len {
            return Err(BindError::IndexOutOfRange { index, len });
        }
        let variant = value.to_variant();
        let token = variant.token();
        let position = index as i64;
        let code = self
            .raw
            .call_mut::<i64>("insert", INSERT_HASH, &[arg(&position), arg(&token)])?;
        check_engine(code)
    }

    pub fn remove(&mut self, index: usize) -> BindResult<T> {
        let removed = self.try_get(index)?;
        let position = index as i64;
        self.raw
            .call_mut::<()>("remove_at", REMOVE_AT_HASH, &[arg(&position)])?;
        Ok(removed)
    }

    pub fn clear(&mut self) {
        let _ = self.raw.call_mut::<()>("clear", CLEAR_HASH, &[]);
    }

    /// Iterate by index. Stops early if the array's length changes
    /// underneath (another handle shares the payload).
    pub fn iter(&self) -> ArrayIter<'_, T> {
        ArrayIter {
            array: self,
            index: 0,
            len: self.len(),
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// Both handles share one engine payload.
    pub fn is_same(&self, other: &Array<T>) -> bool {
        self.raw.is_same(&other.raw)
    }
}

impl<T: ArrayElement> Clone for Array<T> {
    fn clone(&self) -> Self {
        Array::from_raw(self.raw.clone())
    }
}

impl<T: ArrayElement> Default for Array<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ArrayElement> FromIterator<T> for Array<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut array = Array::new();
        array.extend(iter);
        array
    }
}

impl<T: ArrayElement> Extend<T> for Array<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(&item);
        }
    }
}

impl<T: ArrayElement> PartialEq for Array<T> {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other) || self.to_variant() == other.to_variant()
    }
}

impl<T: ArrayElement> fmt::Debug for Array<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Array({})", self.to_variant())
    }
}

pub struct ArrayIter<'a, T: ArrayElement> {
    array: &'a Array<T>,
    index: usize,
    len: usize,
}

impl<T: ArrayElement> Iterator for ArrayIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.index >= self.len {
            return None;
        }
        if self.array.len() != self.len {
            crate::glog!(LOG_WARNING, "[gdbind] Array modified during iteration");
            self.index = self.len;
            return None;
        }
        let item = self.array.get(self.index);
        self.index += 1;
        item
    }
}

impl<'a, T: ArrayElement> IntoIterator for &'a Array<T> {
    type Item = T;
    type IntoIter = ArrayIter<'a, T>;

    fn into_iter(self) -> ArrayIter<'a, T> {
        self.iter()
    }
}

impl<T: ArrayElement> BuiltinValue for Array<T> {
    const VARIANT_TYPE: VariantType = VariantType::Array;
    type Repr = Opaque<1>;

    fn to_repr(&self) -> Opaque<1> {
        self.raw.token()
    }

    unsafe fn from_owned_repr(repr: Opaque<1>) -> Self {
        Array::from_raw(unsafe { Pooled::adopt(VariantType::Array, repr) })
    }

    unsafe fn from_borrowed_repr(repr: &Opaque<1>) -> Self {
        Array::from_raw(unsafe { Pooled::acquire(VariantType::Array, *repr) })
    }

    fn into_owned_repr(self) -> Opaque<1> {
        self.raw.into_engine()
    }

    fn payload_kind() -> Option<PayloadKind> {
        Some(PayloadKind::Builtin(VariantType::Array))
    }

    fn zero() -> Self {
        Array::new()
    }

    /// `Array<T>` only accepts engine arrays typed exactly `T`.
    fn validate(&self) -> BindResult<()> {
        let want = T::element_type();
        if want == VariantType::Nil {
            return Ok(());
        }
        let got = self.typed_element();
        if got == want {
            Ok(())
        } else {
            Err(BindError::TypeMismatch {
                expected: format!("Array[{}]", want.name()),
                actual: format!("Array[{}]", got.name()),
            })
        }
    }
}

impl<T: ArrayElement> VariantKind for Array<T> {
    const VARIANT_TYPE: VariantType = VariantType::Array;
}

builtin_conversions!([T: ArrayElement] Array<T>);

/// Build an untyped `Array` from heterogeneous values.
#[macro_export]
macro_rules! varray {
    ($($value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut array = $crate::builtin::Array::<$crate::variant::Variant>::new();
        $( array.push(&$crate::variant::ToVariant::to_variant(&$value)); )*
        array
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::Vector2;
    use crate::testing;

    #[test]
    fn push_get_set_remove() {
        let _engine = testing::session();
        let mut a: Array<i64> = Array::new();
        assert_eq!(a.typed_element(), VariantType::Int);
        a.push(&1);
        a.push(&2);
        a.insert(0, &0).unwrap();
        assert_eq!(a.to_vec(), vec![0, 1, 2]);
        a.set(1, &10).unwrap();
        assert_eq!(a.get(1), Some(10));
        assert_eq!(a.remove(0), Ok(0));
        assert_eq!(a.len(), 2);
        assert_eq!(a.get(5), None);
        assert_eq!(
            a.set(5, &0),
            Err(BindError::IndexOutOfRange { index: 5, len: 2 })
        );
        a.clear();
        assert!(a.is_empty());
    }

    #[test]
    fn clones_share_the_payload() {
        let _engine = testing::session();
        let mut a: Array<Vector2> = [Vector2::ZERO].into_iter().collect();
        let b = a.clone();
        assert!(a.is_same(&b));
        a.push(&Vector2::ONE);
        assert_eq!(b.len(), 2);
        let c: Array<Vector2> = [Vector2::ZERO, Vector2::ONE].into_iter().collect();
        assert!(!a.is_same(&c));
        assert_eq!(a, c);
    }

    #[test]
    fn iteration_stops_when_a_sharer_mutates() {
        let _engine = testing::session();
        let a: Array<i64> = (0..4).collect();
        let mut other = a.clone();
        let mut seen = Vec::new();
        for (i, v) in a.iter().enumerate() {
            seen.push(v);
            if i == 1 {
                other.push(&99);
            }
        }
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn typed_decode_rejects_other_element_types() {
        let _engine = testing::session();
        let ints: Array<i64> = [1, 2].into_iter().collect();
        let v = ints.to_variant();
        assert!(v.to::<Array<i64>>().is_ok());
        assert!(v.to::<Array>().is_ok());
        assert!(matches!(
            v.to::<Array<f64>>(),
            Err(BindError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn varray_mixes_kinds() {
        let _engine = testing::session();
        let a = varray![1, "two", true];
        assert_eq!(a.len(), 3);
        assert_eq!(a.get(1).unwrap().to::<String>().as_deref(), Ok("two"));
        assert_eq!(a.typed_element(), VariantType::Nil);
    }
}
