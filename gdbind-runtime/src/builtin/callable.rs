// Callable and Signal, plus the registry of host closures that back custom
// callables. The engine owns a custom callable; it calls `free_func` once
// when the last copy goes away, which unregisters the closure.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use gdbind_ffi::{
    CTOR_FROM_FIRST, CallError, CallErrorType, CallableCustomInfo, ConstVariantPtr, Opaque,
    OpaqueVariant, VariantPtr, VariantType,
};

use super::{Array, Pooled, StringName, arg};
use crate::api::{api, library};
use crate::class::EngineClass;
use crate::classes::{ConnectMode, Object};
use crate::error::{BindError, BindResult};
use crate::ffi_guard::ffi_boundary;
use crate::gd::Gd;
use crate::sync::lock_or_recover;
use crate::variant::{ToVariant, Variant};

const CALLV_HASH: i64 = 413578926;
const IS_VALID_HASH: i64 = 3918633141;
const GET_OBJECT_ID_HASH: i64 = 3173160232;
const GET_METHOD_HASH: i64 = 1825232092;
const GET_NAME_HASH: i64 = 1825232092;

// ---------------------------------------------------------------------------
// Closure registry
// ---------------------------------------------------------------------------

type Closure = Option<Box<dyn FnMut(&[Variant]) -> Variant + Send>>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static CLOSURES: OnceLock<Mutex<HashMap<u64, Closure>>> = OnceLock::new();

fn closures() -> &'static Mutex<HashMap<u64, Closure>> {
    CLOSURES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn register_closure(f: impl FnMut(&[Variant]) -> Variant + Send + 'static) -> u64 {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    lock_or_recover(closures()).insert(id, Some(Box::new(f)));
    id
}

fn unregister_closure(id: u64) {
    lock_or_recover(closures()).remove(&id);
}

/// Drop every registered closure. Runs at core deinitialization. Ids keep
/// counting up, so a stale userdata never reaches a newer closure.
pub(crate) fn clear_closures() {
    if let Some(reg) = CLOSURES.get() {
        lock_or_recover(reg).clear();
    }
}

/// Number of closures the engine still holds.
pub fn live_closures() -> usize {
    CLOSURES.get().map_or(0, |reg| lock_or_recover(reg).len())
}

/// Take the closure out, run it without the lock, put it back unless it
/// was unregistered meanwhile.
fn invoke_closure(id: u64, args: &[Variant]) -> Option<Variant> {
    let mut closure = lock_or_recover(closures())
        .get_mut(&id)
        .and_then(|slot| slot.take())?;
    let result = closure(args);
    let mut reg = lock_or_recover(closures());
    if let Some(slot) = reg.get_mut(&id) {
        if slot.is_none() {
            *slot = Some(closure);
        }
    }
    Some(result)
}

unsafe extern "C" fn call_closure(
    userdata: *mut c_void,
    args: *const ConstVariantPtr,
    arg_count: i64,
    r_ret: VariantPtr,
    r_error: *mut CallError,
) {
    let id = userdata as u64;
    let ok = ffi_boundary(false, || {
        let args: Vec<Variant> = (0..arg_count.max(0) as usize)
            .map(|i| unsafe { Variant::from_borrowed_ptr(*args.add(i)) })
            .collect();
        match invoke_closure(id, &args) {
            Some(result) => {
                unsafe { result.write_to(r_ret) };
                true
            }
            None => false,
        }
    });
    if !r_error.is_null() {
        let error = if ok { CallErrorType::Ok } else { CallErrorType::InvalidMethod };
        unsafe {
            *r_error = CallError {
                error,
                argument: 0,
                expected: 0,
            }
        };
    }
}

unsafe extern "C" fn closure_is_valid(userdata: *mut c_void) -> bool {
    lock_or_recover(closures()).contains_key(&(userdata as u64))
}

unsafe extern "C" fn free_closure(userdata: *mut c_void) {
    unregister_closure(userdata as u64);
}

unsafe extern "C" fn hash_closure(userdata: *mut c_void) -> u32 {
    let id = userdata as u64;
    (id ^ (id >> 32)) as u32
}

// ---------------------------------------------------------------------------
// Callable
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Callable(pub(crate) Pooled<2>);

impl Callable {
    /// `object.method` as a callable.
    pub fn from_object_method<T: EngineClass>(object: &Gd<T>, method: &str) -> BindResult<Self> {
        let obj = object.object_ptr();
        let name = StringName::from(method);
        let name_token = name.token();
        Pooled::construct(VariantType::Callable, CTOR_FROM_FIRST, &[arg(&obj), arg(&name_token)])
            .map(Callable)
    }

    /// A callable backed by a host closure.
    pub fn from_fn(f: impl FnMut(&[Variant]) -> Variant + Send + 'static) -> Self {
        let id = register_closure(f);
        let info = CallableCustomInfo {
            callable_userdata: id as *mut c_void,
            token: library().0,
            object_id: 0,
            call_func: Some(call_closure),
            is_valid_func: Some(closure_is_valid),
            free_func: Some(free_closure),
            hash_func: Some(hash_closure),
        };
        let mut token = Opaque::<2>::ZERO;
        unsafe {
            ((*api().builtins).callable_custom_create)(token.as_mut_ptr(), &info);
            Callable(Pooled::adopt(VariantType::Callable, token))
        }
    }

    pub fn is_valid(&self) -> bool {
        self.0.call::<bool>("is_valid", IS_VALID_HASH, &[]).unwrap_or(false)
    }

    /// Instance id of the bound object, 0 for unbound callables.
    pub fn object_id(&self) -> u64 {
        self.0.call::<i64>("get_object_id", GET_OBJECT_ID_HASH, &[]).unwrap_or(0) as u64
    }

    pub fn method_name(&self) -> BindResult<StringName> {
        self.0
            .call_pooled::<1>("get_method", GET_METHOD_HASH, VariantType::StringName, &[])
            .map(StringName)
    }

    pub fn callv(&self, args: &Array) -> BindResult<Variant> {
        let array = super::BuiltinValue::to_repr(args);
        let token: OpaqueVariant = self.0.call("callv", CALLV_HASH, &[arg(&array)])?;
        Ok(unsafe { Variant::from_owned_token(token) })
    }

    pub fn call(&self, args: &[Variant]) -> BindResult<Variant> {
        let array: Array = args.iter().cloned().collect();
        self.callv(&array)
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        self.to_variant() == other.to_variant()
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.to_variant())
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A named signal on one object.
#[derive(Clone)]
pub struct Signal(pub(crate) Pooled<2>);

impl Signal {
    pub fn new<T: EngineClass>(object: &Gd<T>, name: &str) -> BindResult<Self> {
        let obj = object.object_ptr();
        let name = StringName::from(name);
        let name_token = name.token();
        Pooled::construct(VariantType::Signal, CTOR_FROM_FIRST, &[arg(&obj), arg(&name_token)])
            .map(Signal)
    }

    pub fn object_id(&self) -> u64 {
        self.0.call::<i64>("get_object_id", GET_OBJECT_ID_HASH, &[]).unwrap_or(0) as u64
    }

    pub fn name(&self) -> BindResult<StringName> {
        self.0
            .call_pooled::<1>("get_name", GET_NAME_HASH, VariantType::StringName, &[])
            .map(StringName)
    }

    fn owner(&self) -> BindResult<Gd<Object>> {
        let owner = Gd::<Object>::from_instance_id(self.object_id());
        if owner.is_nil() {
            return Err(BindError::NilDeref { method: "Signal::owner" });
        }
        Ok(owner)
    }

    /// Emit synchronously: every non-deferred connection runs before this returns.
    pub fn emit(&self, args: &[Variant]) -> BindResult<()> {
        let name = self.name()?;
        self.owner()?.emit_signal(&name.to_string(), args)
    }

    pub fn connect(&self, callable: &Callable, mode: ConnectMode) -> BindResult<()> {
        let name = self.name()?;
        self.owner()?.connect(&name.to_string(), callable, mode)
    }

    pub fn is_null(&self) -> bool {
        self.object_id() == 0
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signal({})", self.to_variant())
    }
}

pooled_values! {
    Callable => Callable, 2;
    Signal => Signal, 2;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn closure_callable_runs_and_is_freed_once() {
        let _engine = testing::session();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let before = live_closures();
        {
            let double = Callable::from_fn(move |args| {
                seen.fetch_add(1, Ordering::SeqCst);
                let x = args.first().and_then(|v| v.to::<i64>().ok()).unwrap_or(0);
                (x * 2).to_variant()
            });
            assert!(double.is_valid());
            let copy = double.clone();
            let result = copy.call(&[21i64.to_variant()]).unwrap();
            assert_eq!(result.to::<i64>(), Ok(42));
            assert_eq!(live_closures(), before + 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(live_closures(), before);
    }

    #[test]
    fn object_method_callable_binds_the_instance() {
        let _engine = testing::session();
        let obj = Gd::<Object>::new();
        obj.set_meta("answer", &42i64.to_variant()).unwrap();
        let get_meta = Callable::from_object_method(&obj, "get_meta").unwrap();
        assert_eq!(get_meta.object_id(), obj.instance_id());
        assert_eq!(get_meta.method_name().unwrap().to_string(), "get_meta");
        let value = get_meta.call(&["answer".to_variant()]).unwrap();
        assert_eq!(value.to::<i64>(), Ok(42));
        obj.free();
    }

    #[test]
    fn signal_emit_reaches_connected_closure() {
        let _engine = testing::session();
        let obj = Gd::<Object>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let on_fire = Callable::from_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Variant::nil()
        });
        let signal = Signal::new(&obj, "fired").unwrap();
        assert_eq!(signal.name().unwrap().to_string(), "fired");
        signal.connect(&on_fire, ConnectMode::Immediate).unwrap();
        signal.emit(&[]).unwrap();
        signal.emit(&[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        obj.free();
    }
}
