// Gd<T>: typed handle to an engine object.
//
// Every Gd<T> has the same repr(C) layout regardless of T, so a handle to a
// subclass can be reinterpreted as a handle to any ancestor. Refcounted
// objects are held through a registry pin that owns one engine reference;
// manually managed objects are re-validated by instance id on every access.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::panic::Location;

use gdbind_ffi::{ConstTypePtr, ObjectPtr, TypePtr, UninitTypePtr, VariantType};

use crate::api::api;
use crate::builtin::{ArrayElement, StringName};
use crate::builtin_fns;
use crate::call_frame::{CallFrame, RetSlot};
use crate::class::{self, EngineClass, HasParent, Refcount};
use crate::classes::{Object, RefCounted};
use crate::error::{BindError, BindResult, fatal};
use crate::logging::{LOG_ERROR, LOG_WARNING};
use crate::marshal::{PtrArg, PtrLift, PtrLower, PtrReturn, ReturnOwnership};
use crate::registry::{PayloadKind, Pin, pack_object, registry};
use crate::variant::{FromVariant, ToVariant, Variant, VariantKind};

/// Class-independent part of every handle.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawHandle {
    object: ObjectPtr,
    instance_id: u64,
    /// Present for refcounted objects: the slot owns one engine reference.
    pin: Option<Pin>,
}

impl RawHandle {
    const NIL: RawHandle = RawHandle {
        object: ObjectPtr::NULL,
        instance_id: 0,
        pin: None,
    };
}

/// A handle to an engine object of class `T` (or a subclass).
///
/// - `Gd::<T>::NIL` refers to nothing; instance methods on it fail with
///   `NilDeref`.
/// - Refcounted: `Clone` adds an engine reference, `Drop` removes it.
/// - Manually managed: `Clone` copies the handle; [`free`](Self::free)
///   destroys the object and every copy notices on next use.
/// - `!Send`/`!Sync`: objects are used on the engine's main thread.
#[repr(C)]
pub struct Gd<T: EngineClass> {
    raw: RawHandle,
    _marker: PhantomData<*const T>,
}

const _: () = assert!(std::mem::size_of::<RawHandle>() == 24);
const _: () = assert!(std::mem::size_of::<Gd<Object>>() == std::mem::size_of::<RawHandle>());

impl<T: EngineClass> Gd<T> {
    pub const NIL: Self = Gd {
        raw: RawHandle::NIL,
        _marker: PhantomData,
    };

    /// Construct a new instance through the engine. Logs and returns `NIL`
    /// when the engine refuses.
    pub fn new() -> Self {
        Self::try_new().unwrap_or_else(|e| {
            crate::glog!(LOG_ERROR, "[gdbind] {}::new: {e}", T::CLASS_NAME);
            Self::NIL
        })
    }

    pub fn try_new() -> BindResult<Self> {
        let name = StringName::from(T::CLASS_NAME);
        let token = name.token();
        // SAFETY: object sub-table is valid after init; the name outlives the call.
        let object = unsafe { ((*api().object).construct)(token.as_ptr()) };
        if object.is_null() {
            return Err(BindError::ClassNotFound(T::CLASS_NAME.to_owned()));
        }
        // A freshly constructed object starts with one reference owned by us.
        Ok(unsafe { Self::from_owned_ptr(object) })
    }

    /// Wrap an object whose reference (if refcounted) was handed to the host.
    ///
    /// # Safety
    /// `object` must be null or a live instance of `T` or a subclass.
    pub unsafe fn from_owned_ptr(object: ObjectPtr) -> Self {
        Self::wrap(object, |obj| registry().adopt(PayloadKind::Object, pack_object(obj)))
    }

    /// Wrap an object the engine keeps a reference to; adds our own.
    ///
    /// # Safety
    /// `object` must be null or a live instance of `T` or a subclass.
    pub unsafe fn from_loaned_ptr(object: ObjectPtr) -> Self {
        Self::wrap(object, |obj| registry().acquire(PayloadKind::Object, pack_object(obj)))
    }

    fn wrap(object: ObjectPtr, pin: impl FnOnce(ObjectPtr) -> Pin) -> Self {
        if object.is_null() {
            return Self::NIL;
        }
        let instance_id = unsafe { ((*api().object).get_instance_id)(object) };
        let pin = is_refcounted(T::class_record(), object, instance_id).then(|| pin(object));
        Gd {
            raw: RawHandle {
                object,
                instance_id,
                pin,
            },
            _marker: PhantomData,
        }
    }

    /// Look up a live object by instance id. `NIL` if it is gone or not a `T`.
    pub fn from_instance_id(instance_id: u64) -> Self {
        if instance_id == 0 {
            return Self::NIL;
        }
        let object = unsafe { ((*api().object).get_instance_from_id)(instance_id) };
        if !class::instance_of(object, instance_id, T::class_record()) {
            return Self::NIL;
        }
        unsafe { Self::from_loaned_ptr(object) }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        self.raw.object.is_null()
    }

    #[inline]
    pub fn instance_id(&self) -> u64 {
        self.raw.instance_id
    }

    pub fn is_refcounted(&self) -> bool {
        self.raw.pin.is_some()
    }

    /// False for nil handles and for objects that have been destroyed.
    pub fn is_instance_valid(&self) -> bool {
        match self.raw.pin {
            _ if self.is_nil() => false,
            Some(pin) => registry().is_live(pin),
            None => unsafe {
                !((*api().object).get_instance_from_id)(self.raw.instance_id).is_null()
            },
        }
    }

    /// Engine pointer for a call. Null for nil handles.
    ///
    /// A destroyed object is a fatal use-after-free.
    #[track_caller]
    pub fn object_ptr(&self) -> ObjectPtr {
        if self.is_nil() {
            return ObjectPtr::NULL;
        }
        match self.raw.pin {
            Some(pin) => registry().get(pin).object(),
            None => {
                let live = unsafe { ((*api().object).get_instance_from_id)(self.raw.instance_id) };
                if live != self.raw.object {
                    fatal(BindError::UseAfterFree, Location::caller());
                }
                live
            }
        }
    }

    /// Receiver for an instance method: `NilDeref` on a nil handle.
    #[track_caller]
    pub fn receiver(&self, method: &'static str) -> BindResult<ObjectPtr> {
        if self.is_nil() {
            Err(BindError::NilDeref { method })
        } else {
            Ok(self.object_ptr())
        }
    }

    /// Reinterpret as another class. Sound only when the object is a `U`.
    fn retype<U: EngineClass>(self) -> Gd<U> {
        let this = ManuallyDrop::new(self);
        Gd {
            raw: this.raw,
            _marker: PhantomData,
        }
    }

    pub fn upcast_object(self) -> Gd<Object> {
        self.retype()
    }

    /// Whether the object is a `U` or inherits from it.
    pub fn is_class<U: EngineClass>(&self) -> bool {
        !self.is_nil()
            && class::instance_of(self.object_ptr(), self.raw.instance_id, U::class_record())
    }

    /// Downcast (or sidecast); `NIL` when the object is not a `U`.
    pub fn cast<U: EngineClass>(self) -> Gd<U> {
        self.try_cast().unwrap_or(Gd::NIL)
    }

    pub fn try_cast<U: EngineClass>(self) -> BindResult<Gd<U>> {
        if self.is_nil() {
            return Ok(Gd::NIL);
        }
        if self.is_class::<U>() {
            Ok(self.retype())
        } else {
            Err(BindError::class_mismatch(U::CLASS_NAME, &self.dynamic_class_name()))
        }
    }

    /// Class name the engine reports for the object.
    pub fn dynamic_class_name(&self) -> String {
        if self.is_nil() {
            return "Nil".to_owned();
        }
        class::engine_class_name(self.object_ptr())
            .map(|n| n.to_string())
            .unwrap_or_else(|| T::CLASS_NAME.to_owned())
    }

    /// Destroy a manually managed object now.
    ///
    /// For refcounted objects this only drops this handle's reference.
    pub fn free(self) {
        if self.is_nil() {
            return;
        }
        if self.is_refcounted() {
            crate::glog!(
                LOG_WARNING,
                "[gdbind] free() on refcounted {}; dropping the reference instead",
                T::CLASS_NAME
            );
            return;
        }
        let object = self.object_ptr();
        class::forget_instance(self.raw.instance_id);
        unsafe { ((*api().object).destroy)(object) };
    }

    /// Hand this handle's reference to the engine.
    fn into_engine(self) -> ObjectPtr {
        let this = ManuallyDrop::new(self);
        match this.raw.pin {
            Some(pin) => registry()
                .transfer_to_engine(pin)
                .map(|t| t.object())
                .unwrap_or(ObjectPtr::NULL),
            None => this.raw.object,
        }
    }
}

fn is_refcounted(record: &'static class::ClassRecord, object: ObjectPtr, instance_id: u64) -> bool {
    match record.refcount() {
        Refcount::Counted => true,
        Refcount::Manual => false,
        Refcount::Dynamic | Refcount::Inherited => {
            class::instance_of(object, instance_id, RefCounted::class_record())
        }
    }
}

impl<T: HasParent> Gd<T> {
    /// View as the direct parent class. Same object, same reference.
    #[inline]
    pub fn upcast(self) -> Gd<T::Parent> {
        self.retype()
    }
}

impl<T: HasParent> Deref for Gd<T> {
    type Target = Gd<T::Parent>;

    #[inline]
    fn deref(&self) -> &Gd<T::Parent> {
        // SAFETY: Gd<T> is repr(C) over RawHandle for every T.
        unsafe { &*(self as *const Gd<T> as *const Gd<T::Parent>) }
    }
}

impl<T: EngineClass> Clone for Gd<T> {
    fn clone(&self) -> Self {
        let pin = self
            .raw
            .pin
            .map(|pin| registry().acquire(PayloadKind::Object, registry().get(pin)));
        Gd {
            raw: RawHandle { pin, ..self.raw },
            _marker: PhantomData,
        }
    }
}

impl<T: EngineClass> Drop for Gd<T> {
    fn drop(&mut self) {
        if let Some(pin) = self.raw.pin.take() {
            registry().end(pin);
        }
    }
}

impl<T: EngineClass> Default for Gd<T> {
    fn default() -> Self {
        Self::NIL
    }
}

impl<T: EngineClass> PartialEq for Gd<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw.instance_id == other.raw.instance_id
    }
}

impl<T: EngineClass> Eq for Gd<T> {}

impl<T: EngineClass> Hash for Gd<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.instance_id.hash(state);
    }
}

impl<T: EngineClass> fmt::Debug for Gd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            return write!(f, "Gd<{}>(nil)", T::CLASS_NAME);
        }
        f.debug_struct(&format!("Gd<{}>", T::CLASS_NAME))
            .field("instance_id", &self.raw.instance_id)
            .field("refcounted", &self.is_refcounted())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Marshaling
// ---------------------------------------------------------------------------

impl<T: EngineClass> PtrArg for Gd<T> {
    fn push_arg(&self, frame: &mut CallFrame) {
        frame.arg(self.object_ptr());
    }
}

impl<T: EngineClass> PtrReturn for Gd<T> {
    type Slot = ObjectPtr;

    fn reserve(frame: &mut CallFrame) -> RetSlot<ObjectPtr> {
        frame.ret_slot()
    }

    fn take(frame: &mut CallFrame, slot: &RetSlot<ObjectPtr>, ownership: ReturnOwnership) -> Self {
        let object = frame.get(slot);
        unsafe {
            match ownership {
                ReturnOwnership::Transferred => Gd::from_owned_ptr(object),
                ReturnOwnership::Loaned => Gd::from_loaned_ptr(object),
            }
        }
    }
}

impl<T: EngineClass> PtrLift for Gd<T> {
    unsafe fn lift(ptr: ConstTypePtr) -> Self {
        unsafe { Gd::from_loaned_ptr(*(ptr as *const ObjectPtr)) }
    }
}

impl<T: EngineClass> PtrLower for Gd<T> {
    fn zero() -> Self {
        Self::NIL
    }

    unsafe fn lower(self, ret: TypePtr) {
        let object = self.into_engine();
        unsafe { std::ptr::write(ret as *mut ObjectPtr, object) };
    }
}

impl<T: EngineClass> VariantKind for Gd<T> {
    const VARIANT_TYPE: VariantType = VariantType::Object;
}

impl<T: EngineClass> ToVariant for Gd<T> {
    /// The Variant holds its own reference.
    fn to_variant(&self) -> Variant {
        let mut object = self.object_ptr();
        match builtin_fns::variant_from_type(VariantType::Object) {
            Ok(ctor) => {
                let mut token = gdbind_ffi::OpaqueVariant::ZERO;
                unsafe {
                    ctor(token.as_mut_ptr(), &mut object as *mut ObjectPtr as TypePtr);
                    Variant::from_owned_token(token)
                }
            }
            Err(e) => {
                crate::glog!(LOG_ERROR, "[gdbind] cannot encode {}: {e}", T::CLASS_NAME);
                Variant::nil()
            }
        }
    }
}

impl<T: EngineClass> FromVariant for Gd<T> {
    fn try_from_variant(variant: &Variant) -> BindResult<Self> {
        let actual = variant.get_type();
        if actual != VariantType::Object {
            return Err(BindError::variant_mismatch(VariantType::Object, actual));
        }
        let ctor = builtin_fns::type_from_variant(VariantType::Object)?;
        let mut object = ObjectPtr::NULL;
        let mut token = variant.token();
        unsafe { ctor(&mut object as *mut ObjectPtr as UninitTypePtr, token.as_mut_ptr()) };
        // The Variant keeps its reference; the handle takes its own.
        let any = unsafe { Gd::<Object>::from_loaned_ptr(object) };
        any.try_cast()
    }
}

impl<T: EngineClass> ArrayElement for Gd<T> {
    fn element_type() -> VariantType {
        VariantType::Object
    }

    fn element_class() -> Option<&'static str> {
        Some(T::CLASS_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{Node, Node3D, Resource};
    use crate::testing;

    #[test]
    fn every_handle_has_the_same_layout() {
        assert_eq!(std::mem::size_of::<Gd<Node3D>>(), 24);
        assert_eq!(std::mem::size_of::<Gd<Resource>>(), 24);
        assert_eq!(std::mem::align_of::<Gd<Node3D>>(), std::mem::align_of::<Gd<Object>>());
    }

    #[test]
    fn refcounted_handles_hold_exactly_one_reference_each() {
        let _engine = testing::session();
        let res = Gd::<Resource>::new();
        assert!(res.is_refcounted());
        assert_eq!(res.get_reference_count(), Ok(1));
        let copy = res.clone();
        assert_eq!(res.get_reference_count(), Ok(2));
        drop(copy);
        assert_eq!(res.get_reference_count(), Ok(1));
        let id = res.instance_id();
        drop(res);
        assert!(Gd::<Object>::from_instance_id(id).is_nil());
    }

    #[test]
    fn upcast_and_deref_address_the_same_object() {
        let _engine = testing::session();
        let node = Gd::<Node3D>::new();
        let id = node.instance_id();
        let as_node: &Gd<Node> = &node;
        assert_eq!(as_node.instance_id(), id);
        let object = node.clone().upcast().upcast_object();
        assert_eq!(object.instance_id(), id);
        assert_eq!(object.dynamic_class_name(), "Node3D");
        node.free();
    }

    #[test]
    fn casts_check_the_dynamic_class() {
        let _engine = testing::session();
        let object = Gd::<Node3D>::new().upcast_object();
        assert!(object.is_class::<Node>());
        assert!(!object.is_class::<Resource>());
        let err = object.clone().try_cast::<Resource>().unwrap_err();
        assert_eq!(err, BindError::class_mismatch("Resource", "Node3D"));
        assert!(object.clone().cast::<Resource>().is_nil());
        let back = object.cast::<Node3D>();
        assert!(!back.is_nil());
        back.free();
    }

    #[test]
    fn freed_manual_object_is_detected() {
        let _engine = testing::session();
        let node = Gd::<Node>::new();
        let alias = node.clone();
        node.free();
        assert!(!alias.is_instance_valid());
        let payload = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| alias.object_ptr()))
            .unwrap_err();
        let fatal = payload.downcast_ref::<crate::error::FatalError>().unwrap();
        assert_eq!(fatal.error, BindError::UseAfterFree);
    }

    #[test]
    fn nil_handles_refuse_instance_methods() {
        let _engine = testing::session();
        let nil = Gd::<Node3D>::NIL;
        assert!(nil.is_nil());
        assert!(!nil.is_instance_valid());
        assert_eq!(nil.object_ptr(), ObjectPtr::NULL);
        assert_eq!(
            nil.get_position(),
            Err(BindError::NilDeref { method: "get_position" })
        );
        assert!(nil.cast::<Node>().is_nil());
    }

    #[test]
    fn object_variants_keep_their_own_reference() {
        let _engine = testing::session();
        let res = Gd::<Resource>::new();
        let v = res.to_variant();
        assert_eq!(v.get_type(), VariantType::Object);
        assert_eq!(res.get_reference_count(), Ok(2));
        let back = v.to::<Gd<RefCounted>>().unwrap();
        assert_eq!(back.instance_id(), res.instance_id());
        assert!(v.to::<Gd<Node>>().is_err());
        drop(v);
        drop(back);
        assert_eq!(res.get_reference_count(), Ok(1));
    }

    #[test]
    fn object_handles_detect_refcounting_per_instance() {
        let _engine = testing::session();
        let res = Gd::<Resource>::new().upcast().upcast().upcast_object();
        assert!(res.is_refcounted());
        let node = Gd::<Node>::new().upcast_object();
        assert!(!node.is_refcounted());
        node.free();
    }
}
