// Packed arrays: contiguous engine buffers of one element kind, copy-on-write
// between clones.

use std::fmt;
use std::marker::PhantomData;

use gdbind_ffi::{ConstTypePtr, Opaque, VariantType};

use super::{BuiltinValue, Color, GString, Pooled, Vector2, Vector3, Vector4, arg};
use crate::api::api;
use crate::error::{BindError, BindResult};
use crate::registry::PayloadKind;
use crate::variant::VariantKind;

const SIZE_HASH: i64 = 3173160232;
const RESIZE_HASH: i64 = 848867239;
const SET_HASH: i64 = 1255681007;
const PUSH_BACK_HASH: i64 = 694024632;
const INSERT_HASH: i64 = 1487296672;
const REMOVE_AT_HASH: i64 = 2823966027;
const CLEAR_HASH: i64 = 3218959716;

/// Element kind of a packed array.
///
/// # Safety
/// `read` must match the engine's element storage for `ARRAY_TYPE`, and
/// `TRIVIAL` may only be true when that storage is bit-identical to `Self`.
pub unsafe trait PackedElement: Sized + 'static {
    const ARRAY_TYPE: VariantType;
    /// Storage is `Self` verbatim, so whole buffers can be copied at once.
    const TRIVIAL: bool;

    /// # Safety
    /// `ptr` must point at one live element of `ARRAY_TYPE` storage.
    unsafe fn read(ptr: ConstTypePtr) -> Self;

    /// Run `f` with a pointer to this value in the engine's argument form.
    fn with_arg<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R;
}

macro_rules! packed_elements {
    ($($t:ty => $vt:ident as $wide:ty),* $(,)?) => {$(
        unsafe impl PackedElement for $t {
            const ARRAY_TYPE: VariantType = VariantType::$vt;
            const TRIVIAL: bool = true;

            unsafe fn read(ptr: ConstTypePtr) -> Self {
                unsafe { *(ptr as *const $t) }
            }

            fn with_arg<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
                let wide = *self as $wide;
                f(arg(&wide))
            }
        }
    )*};
}

packed_elements!(
    u8 => PackedByteArray as i64,
    i32 => PackedInt32Array as i64,
    i64 => PackedInt64Array as i64,
    f32 => PackedFloat32Array as f64,
    f64 => PackedFloat64Array as f64,
);

macro_rules! packed_structs {
    ($($t:ty => $vt:ident),* $(,)?) => {$(
        unsafe impl PackedElement for $t {
            const ARRAY_TYPE: VariantType = VariantType::$vt;
            const TRIVIAL: bool = true;

            // Engine buffers only promise float alignment; glam's Vec4 wants 16.
            unsafe fn read(ptr: ConstTypePtr) -> Self {
                unsafe { std::ptr::read_unaligned(ptr as *const $t) }
            }

            fn with_arg<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
                f(arg(self))
            }
        }
    )*};
}

packed_structs!(
    Vector2 => PackedVector2Array,
    Vector3 => PackedVector3Array,
    Color => PackedColorArray,
    Vector4 => PackedVector4Array,
);

unsafe impl PackedElement for GString {
    const ARRAY_TYPE: VariantType = VariantType::PackedStringArray;
    const TRIVIAL: bool = false;

    unsafe fn read(ptr: ConstTypePtr) -> Self {
        unsafe { GString::from_borrowed_repr(&*(ptr as *const Opaque<1>)) }
    }

    fn with_arg<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
        let token = self.token();
        f(arg(&token))
    }
}

// ---------------------------------------------------------------------------
// PackedArray
// ---------------------------------------------------------------------------

pub struct PackedArray<T: PackedElement> {
    raw: Pooled<2>,
    _marker: PhantomData<T>,
}

pub type PackedByteArray = PackedArray<u8>;
pub type PackedInt32Array = PackedArray<i32>;
pub type PackedInt64Array = PackedArray<i64>;
pub type PackedFloat32Array = PackedArray<f32>;
pub type PackedFloat64Array = PackedArray<f64>;
pub type PackedStringArray = PackedArray<GString>;
pub type PackedVector2Array = PackedArray<Vector2>;
pub type PackedVector3Array = PackedArray<Vector3>;
pub type PackedColorArray = PackedArray<Color>;
pub type PackedVector4Array = PackedArray<Vector4>;

impl<T: PackedElement> PackedArray<T> {
    pub fn new() -> Self {
        Self::from_raw(Pooled::new_default(T::ARRAY_TYPE))
    }

    fn from_raw(raw: Pooled<2>) -> Self {
        PackedArray {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn from_slice(items: &[T]) -> Self {
        let mut array = Self::new();
        if T::TRIVIAL {
            if items.is_empty() || array.resize(items.len()).is_err() {
                return array;
            }
            array.raw.update(|token| unsafe {
                let dst = ((*api().builtins).packed_array_operator_index)(
                    T::ARRAY_TYPE,
                    token.as_mut_ptr(),
                    0,
                );
                std::ptr::copy_nonoverlapping(
                    items.as_ptr() as *const u8,
                    dst as *mut u8,
                    std::mem::size_of_val(items),
                );
            });
        } else {
            for item in items {
                array.push(item);
            }
        }
        array
    }

    pub fn len(&self) -> usize {
        self.raw.call::<i64>("size", SIZE_HASH, &[]).unwrap_or(0).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resize(&mut self, len: usize) -> BindResult<()> {
        let len = len as i64;
        let code = self.raw.call_mut::<i64>("resize", RESIZE_HASH, &[arg(&len)])?;
        crate::error::check_engine(code)
    }

    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len() {
            return None;
        }
        let mut token = self.raw.token();
        unsafe {
            let ptr = ((*api().builtins).packed_array_operator_index)(
                T::ARRAY_TYPE,
                token.as_mut_ptr(),
                index as i64,
            );
            Some(T::read(ptr))
        }
    }

    pub fn set(&mut self, index: usize, value: &T) -> BindResult<()> {
        let len = self.len();
        if index >= len {
            return Err(BindError::IndexOutOfRange { index, len });
        }
        let position = index as i64;
        value.with_arg(|v| self.raw.call_mut::<()>("set", SET_HASH, &[arg(&position), v]))
    }

    pub fn push(&mut self, value: &T) {
        let _ = value.with_arg(|v| self.raw.call_mut::<bool>("push_back", PUSH_BACK_HASH, &[v]));
    }

    /// Insert before `index`; `index == len()` appends.
    pub fn insert(&mut self, index: usize, value: &T) -> BindResult<()> {
        let len = self.len();
        if index > len {
            return Err(BindError::IndexOutOfRange { index, len });
        }
        let position = index as i64;
        let code = value.with_arg(|v| {
            self.raw
                .call_mut::<i64>("insert", INSERT_HASH, &[arg(&position), v])
        })?;
        crate::error::check_engine(code)
    }

    pub fn remove(&mut self, index: usize) -> BindResult<T> {
        let removed = self.get(index).ok_or(BindError::IndexOutOfRange {
            index,
            len: self.len(),
        })?;
        let position = index as i64;
        self.raw
            .call_mut::<()>("remove_at", REMOVE_AT_HASH, &[arg(&position)])?;
        Ok(removed)
    }

    pub fn clear(&mut self) {
        let _ = self.raw.call_mut::<()>("clear", CLEAR_HASH, &[]);
    }

    pub fn to_vec(&self) -> Vec<T> {
        let len = self.len();
        if len == 0 {
            return Vec::new();
        }
        let mut token = self.raw.token();
        let base = unsafe {
            ((*api().builtins).packed_array_operator_index)(T::ARRAY_TYPE, token.as_mut_ptr(), 0)
        };
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            // SAFETY: elements are contiguous from index 0.
            out.push(unsafe { T::read((base as *const T).add(i) as ConstTypePtr) });
        }
        out
    }

    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.to_vec().into_iter()
    }
}

impl<T: PackedElement> Clone for PackedArray<T> {
    fn clone(&self) -> Self {
        Self::from_raw(self.raw.clone())
    }
}

impl<T: PackedElement> Default for PackedArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PackedElement> FromIterator<T> for PackedArray<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let items: Vec<T> = iter.into_iter().collect();
        Self::from_slice(&items)
    }
}

impl<T: PackedElement + PartialEq> PartialEq for PackedArray<T> {
    fn eq(&self, other: &Self) -> bool {
        self.to_vec() == other.to_vec()
    }
}

impl<T: PackedElement + fmt::Debug> fmt::Debug for PackedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

impl<T: PackedElement> BuiltinValue for PackedArray<T> {
    const VARIANT_TYPE: VariantType = T::ARRAY_TYPE;
    type Repr = Opaque<2>;

    fn to_repr(&self) -> Opaque<2> {
        self.raw.token()
    }

    unsafe fn from_owned_repr(repr: Opaque<2>) -> Self {
        Self::from_raw(unsafe { Pooled::adopt(T::ARRAY_TYPE, repr) })
    }

    unsafe fn from_borrowed_repr(repr: &Opaque<2>) -> Self {
        Self::from_raw(unsafe { Pooled::acquire(T::ARRAY_TYPE, *repr) })
    }

    fn into_owned_repr(self) -> Opaque<2> {
        self.raw.into_engine()
    }

    fn payload_kind() -> Option<PayloadKind> {
        Some(PayloadKind::Builtin(T::ARRAY_TYPE))
    }

    fn zero() -> Self {
        Self::new()
    }
}

impl<T: PackedElement> VariantKind for PackedArray<T> {
    const VARIANT_TYPE: VariantType = T::ARRAY_TYPE;
}

builtin_conversions!([T: PackedElement] PackedArray<T>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::variant::ToVariant;

    #[test]
    fn bulk_copy_in_and_out() {
        let _engine = testing::session();
        let bytes = PackedByteArray::from_slice(&[1, 2, 3, 250]);
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes.to_vec(), vec![1, 2, 3, 250]);
        assert_eq!(bytes.get(3), Some(250));
        assert_eq!(bytes.get(4), None);

        let points: PackedVector2Array = [Vector2::X, Vector2::Y].into_iter().collect();
        assert_eq!(points.to_vec(), vec![Vector2::X, Vector2::Y]);
    }

    #[test]
    fn narrow_elements_go_through_wide_arguments() {
        let _engine = testing::session();
        let mut ints = PackedInt32Array::new();
        ints.push(&-5);
        ints.push(&7);
        ints.set(0, &9).unwrap();
        assert_eq!(ints.to_vec(), vec![9, 7]);
        let mut floats = PackedFloat32Array::new();
        floats.push(&0.5);
        assert_eq!(floats.get(0), Some(0.5));
    }

    #[test]
    fn clones_copy_on_write() {
        let _engine = testing::session();
        let mut a = PackedInt64Array::from_slice(&[1, 2]);
        let b = a.clone();
        a.push(&3);
        assert_eq!(a.len(), 3);
        assert_eq!(b.to_vec(), vec![1, 2]);
        assert_eq!(a.remove(0), Ok(1));
    }

    #[test]
    fn strings_are_pooled_elements() {
        let _engine = testing::session();
        let names: PackedStringArray =
            ["a", "bc"].into_iter().map(GString::from).collect();
        assert_eq!(names.len(), 2);
        assert_eq!(names.get(1).unwrap().to_string(), "bc");
        let v = names.to_variant();
        assert_eq!(v.get_type(), VariantType::PackedStringArray);
        assert_eq!(v.to::<PackedStringArray>().unwrap().len(), 2);
        assert!(v.to::<PackedByteArray>().is_err());
    }

    #[test]
    fn vector4_elements_edit_and_cross_variants() {
        let _engine = testing::session();
        let a = Vector4::new(1.0, 2.0, 3.0, 4.0);
        let b = Vector4::new(-1.0, 0.5, 0.0, 8.0);
        let mut quads = PackedVector4Array::new();
        quads.push(&a);
        quads.push(&b);
        quads.insert(1, &Vector4::ONE).unwrap();
        assert_eq!(quads.len(), 3);
        assert_eq!(quads.get(1), Some(Vector4::ONE));
        assert_eq!(
            quads.insert(9, &a),
            Err(BindError::IndexOutOfRange { index: 9, len: 3 })
        );

        assert_eq!(quads.remove(0), Ok(a));
        assert_eq!(quads.iter().collect::<Vec<_>>(), vec![Vector4::ONE, b]);

        let v = quads.to_variant();
        assert_eq!(v.get_type(), VariantType::PackedVector4Array);
        let back = v.to::<PackedVector4Array>().unwrap();
        assert_eq!(back, quads);
        assert!(v.to::<PackedColorArray>().is_err());
    }

    #[test]
    fn strings_insert_at_the_front() {
        let _engine = testing::session();
        let mut names: PackedStringArray = ["b"].into_iter().map(GString::from).collect();
        names.insert(0, &GString::from("a")).unwrap();
        names.insert(2, &GString::from("c")).unwrap();
        let text: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        assert_eq!(text, ["a", "b", "c"]);
    }
}
