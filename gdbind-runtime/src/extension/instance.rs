// Host-side instance storage for extension classes.
//
// Each engine object of an extension class owns one heap `InstanceStorage<T>`.
// The engine only ever sees a pointer to its header, which carries the
// lifecycle state and the type-erased drop, so code that does not know `T`
// (trampolines, teardown) can still check and release it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

use gdbind_ffi::ObjectPtr;

use super::ExtensionClass;
use crate::class::{self, ClassRecord, EngineClass};
use crate::error::{BindError, BindResult};
use crate::gd::Gd;
use crate::logging::LOG_ERROR;
use crate::sync::lock_or_recover;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Stages of one extension instance, in the only order they may occur.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    Uninitialized = 0,
    Constructed = 1,
    Registered = 2,
    Finalizing = 3,
    Destroyed = 4,
}

impl Lifecycle {
    pub fn name(self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Constructed => "constructed",
            Lifecycle::Registered => "registered",
            Lifecycle::Finalizing => "finalizing",
            Lifecycle::Destroyed => "destroyed",
        }
    }

    fn from_u8(raw: u8) -> Lifecycle {
        match raw {
            0 => Lifecycle::Uninitialized,
            1 => Lifecycle::Constructed,
            2 => Lifecycle::Registered,
            3 => Lifecycle::Finalizing,
            _ => Lifecycle::Destroyed,
        }
    }

    fn previous(self) -> Option<Lifecycle> {
        match self {
            Lifecycle::Uninitialized => None,
            other => Some(Lifecycle::from_u8(other as u8 - 1)),
        }
    }
}

/// Atomic lifecycle cell. Transitions are single forward steps; skipping a
/// stage or going back fails with `InvalidLifecycle`.
pub struct LifecycleState(AtomicU8);

impl LifecycleState {
    pub const fn new() -> Self {
        LifecycleState(AtomicU8::new(Lifecycle::Uninitialized as u8))
    }

    pub fn get(&self) -> Lifecycle {
        Lifecycle::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn advance(&self, to: Lifecycle) -> BindResult<()> {
        let refuse = |actual: u8| BindError::InvalidLifecycle {
            from: Lifecycle::from_u8(actual).name(),
            to: to.name(),
        };
        let Some(from) = to.previous() else {
            return Err(refuse(self.0.load(Ordering::Acquire)));
        };
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(drop)
            .map_err(refuse)
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LifecycleState({})", self.get().name())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Type-independent prefix of every instance allocation.
#[repr(C)]
pub(crate) struct InstanceHeader {
    pub(crate) lifecycle: LifecycleState,
    pub(crate) object: ObjectPtr,
    pub(crate) instance_id: u64,
    pub(crate) record: &'static ClassRecord,
    pub(super) drop_storage: unsafe fn(*mut InstanceHeader),
}

#[repr(C)]
struct InstanceStorage<T> {
    header: InstanceHeader,
    value: RefCell<Option<T>>,
}

/// Allocate storage for a fresh engine object and run `T::init`.
///
/// Returns the header in the `Constructed` state.
///
/// # Safety
/// `object` must be the live engine object the instance will be attached to.
pub(crate) unsafe fn create_storage<T: ExtensionClass>(
    object: ObjectPtr,
    instance_id: u64,
    record: &'static ClassRecord,
) -> *mut InstanceHeader {
    let storage = Box::new(InstanceStorage::<T> {
        header: InstanceHeader {
            lifecycle: LifecycleState::new(),
            object,
            instance_id,
            record,
            drop_storage: drop_storage::<T>,
        },
        value: RefCell::new(None),
    });
    let value = T::init(Base::new(object, instance_id));
    *storage.value.borrow_mut() = Some(value);
    let constructed = storage.header.lifecycle.advance(Lifecycle::Constructed);
    debug_assert!(constructed.is_ok(), "{}: {constructed:?}", T::CLASS_NAME);
    Box::into_raw(storage) as *mut InstanceHeader
}

unsafe fn drop_storage<T: ExtensionClass>(header: *mut InstanceHeader) {
    let storage = header as *mut InstanceStorage<T>;
    let value = match unsafe { (*storage).value.try_borrow_mut() } {
        Ok(mut slot) => slot.take(),
        Err(_) => {
            crate::glog!(
                LOG_ERROR,
                "[gdbind] {} freed while bound; leaking its storage",
                T::CLASS_NAME
            );
            return;
        }
    };
    drop(value);
    let destroyed = unsafe { (*storage).header.lifecycle.advance(Lifecycle::Destroyed) };
    unsafe { drop(Box::from_raw(storage)) };
    debug_assert!(destroyed.is_ok(), "{}: {destroyed:?}", T::CLASS_NAME);
}

/// Finalize and free one instance.
///
/// # Safety
/// `header` must come from `create_storage` and not have been released.
pub(crate) unsafe fn release(header: *mut InstanceHeader) -> BindResult<()> {
    let (object, instance_id, drop_fn) = unsafe {
        let h = &*header;
        h.lifecycle.advance(Lifecycle::Finalizing)?;
        (h.object, h.instance_id, h.drop_storage)
    };
    untrack(object);
    class::forget_instance(instance_id);
    unsafe { drop_fn(header) };
    Ok(())
}

/// Run `f` on the instance with exclusive access.
///
/// # Safety
/// `header` must be a live header of a `T` instance.
pub(crate) unsafe fn with_mut<T: ExtensionClass, R>(
    header: *mut InstanceHeader,
    f: impl FnOnce(&mut T) -> R,
) -> BindResult<R> {
    let storage = unsafe { &*(header as *const InstanceStorage<T>) };
    require_registered(&storage.header)?;
    let mut slot = storage
        .value
        .try_borrow_mut()
        .map_err(|_| BindError::AlreadyBound(T::CLASS_NAME))?;
    let value = slot.as_mut().ok_or(BindError::UseAfterFree)?;
    Ok(f(value))
}

/// Run `f` on the instance with shared access.
///
/// # Safety
/// `header` must be a live header of a `T` instance.
pub(crate) unsafe fn with_ref<T: ExtensionClass, R>(
    header: *mut InstanceHeader,
    f: impl FnOnce(&T) -> R,
) -> BindResult<R> {
    let storage = unsafe { &*(header as *const InstanceStorage<T>) };
    require_registered(&storage.header)?;
    let slot = storage
        .value
        .try_borrow()
        .map_err(|_| BindError::AlreadyBound(T::CLASS_NAME))?;
    let value = slot.as_ref().ok_or(BindError::UseAfterFree)?;
    Ok(f(value))
}

fn require_registered(header: &InstanceHeader) -> BindResult<()> {
    match header.lifecycle.get() {
        Lifecycle::Registered => Ok(()),
        other => Err(BindError::InvalidLifecycle {
            from: other.name(),
            to: Lifecycle::Registered.name(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Live instance map, keyed by engine object address
// ---------------------------------------------------------------------------

struct Tracked {
    class: &'static str,
    header: *mut InstanceHeader,
}

// SAFETY: headers are only dereferenced on the engine's main thread; the map
// just carries the addresses.
unsafe impl Send for Tracked {}

static INSTANCES: OnceLock<Mutex<HashMap<usize, Tracked>>> = OnceLock::new();

fn instances() -> &'static Mutex<HashMap<usize, Tracked>> {
    INSTANCES.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn track(object: ObjectPtr, header: *mut InstanceHeader, class: &'static str) {
    lock_or_recover(instances()).insert(object.to_addr(), Tracked { class, header });
}

fn untrack(object: ObjectPtr) {
    lock_or_recover(instances()).remove(&object.to_addr());
}

/// Header of the `T` instance attached to `object`.
pub(crate) fn lookup<T: EngineClass>(object: ObjectPtr) -> BindResult<*mut InstanceHeader> {
    match lock_or_recover(instances()).get(&object.to_addr()) {
        Some(entry) if entry.class == T::CLASS_NAME => Ok(entry.header),
        Some(entry) => Err(BindError::class_mismatch(T::CLASS_NAME, entry.class)),
        None => Err(BindError::UseAfterFree),
    }
}

/// Live host instances of `class`.
pub fn live_instances(class: &str) -> usize {
    lock_or_recover(instances())
        .values()
        .filter(|entry| entry.class == class)
        .count()
}

// ---------------------------------------------------------------------------
// Base, and typed access through Gd<T>
// ---------------------------------------------------------------------------

/// The engine object an extension instance is attached to.
pub struct Base<T: EngineClass> {
    object: ObjectPtr,
    instance_id: u64,
    _marker: PhantomData<*const T>,
}

impl<T: EngineClass> Base<T> {
    fn new(object: ObjectPtr, instance_id: u64) -> Self {
        Base {
            object,
            instance_id,
            _marker: PhantomData,
        }
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// A handle to the engine object. For refcounted classes this adds a
    /// reference, so keeping the result inside the instance leaks it.
    pub fn to_gd(&self) -> Gd<T> {
        // SAFETY: the base object outlives the instance attached to it.
        unsafe { Gd::from_loaned_ptr(self.object) }
    }
}

impl<T: EngineClass> fmt::Debug for Base<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Base<{}>(#{})", T::CLASS_NAME, self.instance_id)
    }
}

impl<T: ExtensionClass> Gd<T> {
    /// Run `f` with shared access to the host instance.
    pub fn bind<R>(&self, f: impl FnOnce(&T) -> R) -> BindResult<R> {
        let header = lookup::<T>(self.checked_receiver("bind")?)?;
        unsafe { with_ref::<T, R>(header, f) }
    }

    /// Run `f` with exclusive access to the host instance. Fails with
    /// `AlreadyBound` while another borrow is active further up the stack.
    pub fn bind_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> BindResult<R> {
        let header = lookup::<T>(self.checked_receiver("bind_mut")?)?;
        unsafe { with_mut::<T, R>(header, f) }
    }

    /// Binding a destroyed object is an ordinary error; only raw pointer
    /// access to one is fatal.
    fn checked_receiver(&self, method: &'static str) -> BindResult<ObjectPtr> {
        if !self.is_nil() && !self.is_instance_valid() {
            return Err(BindError::UseAfterFree);
        }
        self.receiver(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_one_step_at_a_time() {
        let state = LifecycleState::new();
        assert_eq!(state.get(), Lifecycle::Uninitialized);
        state.advance(Lifecycle::Constructed).unwrap();
        state.advance(Lifecycle::Registered).unwrap();
        assert_eq!(
            state.advance(Lifecycle::Destroyed),
            Err(BindError::InvalidLifecycle {
                from: "registered",
                to: "destroyed"
            })
        );
        state.advance(Lifecycle::Finalizing).unwrap();
        state.advance(Lifecycle::Destroyed).unwrap();
        assert_eq!(state.get(), Lifecycle::Destroyed);
    }

    #[test]
    fn lifecycle_never_goes_back() {
        let state = LifecycleState::new();
        state.advance(Lifecycle::Constructed).unwrap();
        assert!(state.advance(Lifecycle::Constructed).is_err());
        assert!(state.advance(Lifecycle::Uninitialized).is_err());
        assert_eq!(state.get(), Lifecycle::Constructed);
    }
}
