// ExtensionClass: host-defined subclasses of engine classes.
//
// A class is described once (virtual overrides, properties, signals) and
// handed to the engine together with a table of trampolines. From then on the
// engine creates, dispatches to and frees instances through those
// trampolines. Unregistering marks the class first, so nothing reaches host
// code while the engine tears the class down.

mod instance;
mod trampolines;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use gdbind_ffi::{
    ConstTypePtr, InitializationLevel, OpaqueString, OpaqueStringName, PROPERTY_HINT_NONE,
    PROPERTY_USAGE_DEFAULT, PropertyInfo, TypePtr, VariantType,
};

use crate::api::{api, library};
use crate::builtin::{GString, StringName};
use crate::class::{ClassRecord, EngineClass, HasParent};
use crate::error::{BindError, BindResult};
use crate::ffi_guard::ffi_boundary;
use crate::logging::{LOG_ERROR, LOG_INFO, LOG_WARNING};
use crate::marshal::{PtrLiftArgs, PtrLower};
use crate::sync::{lock_or_recover, read_or_recover, write_or_recover};
use crate::variant::{FromVariant, ToVariant, Variant, VariantKind};

pub(crate) use instance::InstanceHeader;
pub use instance::{Base, Lifecycle, LifecycleState, live_instances};

/// A host struct that backs instances of a new engine class.
///
/// `#[gdclass]` implements this; hand-written impls work the same way.
pub trait ExtensionClass: HasParent + Sized + 'static {
    /// Init level at which auto-registration registers the class.
    const INIT_LEVEL: InitializationLevel = InitializationLevel::Scene;

    /// Build the host state for a freshly constructed engine object.
    fn init(base: Base<Self>) -> Self;

    /// Describe virtual overrides, properties and signals.
    fn register(_builder: &mut ClassBuilder<'_, Self>) {}
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

type CreateFn = unsafe fn(gdbind_ffi::ObjectPtr, u64, &'static ClassRecord) -> *mut InstanceHeader;
pub(crate) type VirtualFn = Arc<dyn Fn(*mut InstanceHeader, *const ConstTypePtr, TypePtr) + Send + Sync>;
type GetterFn = Arc<dyn Fn(*mut InstanceHeader) -> BindResult<Variant> + Send + Sync>;
type SetterFn = Arc<dyn Fn(*mut InstanceHeader, &Variant) -> BindResult<()> + Send + Sync>;
type NotifyFn = Arc<dyn Fn(*mut InstanceHeader, i32) -> BindResult<()> + Send + Sync>;
type DisplayFn = Arc<dyn Fn(*mut InstanceHeader) -> BindResult<String> + Send + Sync>;
type HookFn = Arc<dyn Fn(*mut InstanceHeader) -> BindResult<()> + Send + Sync>;

pub(crate) struct VirtualEntry {
    pub(crate) name: &'static str,
    pub(crate) call: VirtualFn,
    /// Writes the zero value of the return type.
    pub(crate) zero: fn(TypePtr),
}

/// What the engine caches for an overridden virtual. Interned per class and
/// name for the life of the process, so a cached cookie still names its
/// return type after the class is unregistered.
pub(crate) struct VirtualCookie {
    pub(crate) class: &'static str,
    pub(crate) name: &'static str,
    pub(crate) zero: fn(TypePtr),
}

static COOKIES: RwLock<Vec<&'static VirtualCookie>> = RwLock::new(Vec::new());

pub(crate) fn intern_cookie(class: &'static str, entry: &VirtualEntry) -> &'static VirtualCookie {
    let find = |cookies: &[&'static VirtualCookie]| {
        cookies
            .iter()
            .copied()
            .find(|c| c.class == class && c.name == entry.name)
    };
    if let Some(cookie) = find(read_or_recover(&COOKIES).as_slice()) {
        return cookie;
    }
    let mut cookies = write_or_recover(&COOKIES);
    if let Some(cookie) = find(cookies.as_slice()) {
        return cookie;
    }
    let cookie: &'static VirtualCookie = Box::leak(Box::new(VirtualCookie {
        class,
        name: entry.name,
        zero: entry.zero,
    }));
    cookies.push(cookie);
    cookie
}

/// The interned cookie behind `data`, if the engine handed back one of ours.
pub(crate) fn cookie_from(data: *mut std::ffi::c_void) -> Option<&'static VirtualCookie> {
    read_or_recover(&COOKIES)
        .iter()
        .copied()
        .find(|c| std::ptr::eq(*c, data as *const VirtualCookie))
}

fn write_zero<R: PtrLower>(ret: TypePtr) {
    if !ret.is_null() {
        // SAFETY: the engine hands a slot sized for the virtual's return type.
        unsafe { R::zero().lower(ret) };
    }
}

pub(crate) struct PropertyEntry {
    pub(crate) name: &'static str,
    ty: VariantType,
    hint: u32,
    hint_string: &'static str,
    usage: u32,
    pub(crate) get: GetterFn,
    pub(crate) set: Option<SetterFn>,
}

pub(crate) struct SignalEntry {
    name: &'static str,
    args: Vec<(&'static str, VariantType)>,
}

/// Everything the engine needs to know about one extension class.
pub struct ClassDescriptor {
    name: &'static str,
    parent: &'static str,
    record: &'static ClassRecord,
    is_abstract: bool,
    create: CreateFn,
    pub(crate) virtuals: Vec<VirtualEntry>,
    pub(crate) properties: Vec<PropertyEntry>,
    signals: Vec<SignalEntry>,
    pub(crate) notification: Option<NotifyFn>,
    pub(crate) display: Option<DisplayFn>,
    pub(crate) on_reference: Option<HookFn>,
    pub(crate) on_unreference: Option<HookFn>,
}

impl ClassDescriptor {
    /// An empty descriptor for `T`: no virtuals, properties or signals yet.
    pub fn of<T: ExtensionClass>() -> Self {
        ClassDescriptor {
            name: T::CLASS_NAME,
            parent: <T::Parent as EngineClass>::CLASS_NAME,
            record: T::class_record(),
            is_abstract: false,
            create: instance::create_storage::<T>,
            virtuals: Vec::new(),
            properties: Vec::new(),
            signals: Vec::new(),
            notification: None,
            display: None,
            on_reference: None,
            on_unreference: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> &'static str {
        self.parent
    }

    pub fn virtual_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.virtuals.iter().map(|v| v.name)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.properties.iter().map(|p| p.name)
    }

    pub fn signal_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.signals.iter().map(|s| s.name)
    }
}

/// Registration-time data the class record holds while registered.
pub struct ExtensionData {
    pub(crate) descriptor: ClassDescriptor,
    unregistering: AtomicBool,
}

impl ExtensionData {
    pub(crate) fn is_unregistering(&self) -> bool {
        self.unregistering.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// ClassBuilder
// ---------------------------------------------------------------------------

/// Typed view of a descriptor. Erases each host callback into the shape the
/// trampolines call.
pub struct ClassBuilder<'a, T: ExtensionClass> {
    descriptor: &'a mut ClassDescriptor,
    _marker: PhantomData<fn(T)>,
}

impl<'a, T: ExtensionClass> ClassBuilder<'a, T> {
    pub fn new(descriptor: &'a mut ClassDescriptor) -> Self {
        debug_assert_eq!(descriptor.name, T::CLASS_NAME);
        ClassBuilder {
            descriptor,
            _marker: PhantomData,
        }
    }

    /// The engine may not instantiate the class directly.
    pub fn abstract_class(&mut self) -> &mut Self {
        self.descriptor.is_abstract = true;
        self
    }

    /// Override the engine virtual `name` (e.g. `"_physics_process"`).
    ///
    /// A panicking override writes the zero value of `R`.
    pub fn virtual_method<A, R>(&mut self, name: &'static str, f: fn(&mut T, A) -> R) -> &mut Self
    where
        A: PtrLiftArgs + 'static,
        R: PtrLower + 'static,
    {
        let call: VirtualFn = Arc::new(move |header: *mut InstanceHeader, args: *const ConstTypePtr, ret: TypePtr| {
            let done = ffi_boundary(false, std::panic::AssertUnwindSafe(|| {
                let lifted = unsafe { A::lift_args(args) };
                match unsafe { instance::with_mut::<T, R>(header, |this| f(this, lifted)) } {
                    Ok(result) => {
                        if !ret.is_null() {
                            unsafe { result.lower(ret) };
                        }
                        true
                    }
                    Err(e) => {
                        crate::glog!(LOG_WARNING, "[gdbind] {}::{name}: {e}", T::CLASS_NAME);
                        false
                    }
                }
            }));
            if !done {
                write_zero::<R>(ret);
            }
        });
        self.descriptor.virtuals.retain(|v| v.name != name);
        self.descriptor.virtuals.push(VirtualEntry {
            name,
            call,
            zero: write_zero::<R>,
        });
        self
    }

    /// Read-write property with the default editor hint.
    pub fn property<V>(&mut self, name: &'static str, get: fn(&T) -> V, set: fn(&mut T, V)) -> &mut Self
    where
        V: ToVariant + FromVariant + VariantKind + 'static,
    {
        self.hinted_property(name, PROPERTY_HINT_NONE, "", get, set)
    }

    /// Read-write property with an editor hint (`PROPERTY_HINT_*`).
    pub fn hinted_property<V>(
        &mut self,
        name: &'static str,
        hint: u32,
        hint_string: &'static str,
        get: fn(&T) -> V,
        set: fn(&mut T, V),
    ) -> &mut Self
    where
        V: ToVariant + FromVariant + VariantKind + 'static,
    {
        let setter: SetterFn = Arc::new(move |header: *mut InstanceHeader, value: &Variant| {
            let value = V::try_from_variant(value)?;
            unsafe { instance::with_mut::<T, ()>(header, |this| set(this, value)) }
        });
        self.push_property::<V>(name, hint, hint_string, get, Some(setter))
    }

    /// Property the engine can read but not write.
    pub fn read_only_property<V>(&mut self, name: &'static str, get: fn(&T) -> V) -> &mut Self
    where
        V: ToVariant + VariantKind + 'static,
    {
        self.push_property::<V>(name, PROPERTY_HINT_NONE, "", get, None)
    }

    fn push_property<V>(
        &mut self,
        name: &'static str,
        hint: u32,
        hint_string: &'static str,
        get: fn(&T) -> V,
        set: Option<SetterFn>,
    ) -> &mut Self
    where
        V: ToVariant + VariantKind + 'static,
    {
        let getter: GetterFn = Arc::new(move |header: *mut InstanceHeader| unsafe {
            instance::with_ref::<T, Variant>(header, |this| get(this).to_variant())
        });
        self.descriptor.properties.retain(|p| p.name != name);
        self.descriptor.properties.push(PropertyEntry {
            name,
            ty: V::VARIANT_TYPE,
            hint,
            hint_string,
            usage: PROPERTY_USAGE_DEFAULT,
            get: getter,
            set,
        });
        self
    }

    /// Declare a signal and its argument profile.
    pub fn signal(&mut self, name: &'static str, args: &[(&'static str, VariantType)]) -> &mut Self {
        self.descriptor.signals.retain(|s| s.name != name);
        self.descriptor.signals.push(SignalEntry {
            name,
            args: args.to_vec(),
        });
        self
    }

    /// Called for every engine notification sent to an instance.
    pub fn on_notification(&mut self, f: fn(&mut T, i32)) -> &mut Self {
        self.descriptor.notification = Some(Arc::new(move |header: *mut InstanceHeader, what: i32| unsafe {
            instance::with_mut::<T, ()>(header, |this| f(this, what))
        }));
        self
    }

    /// Text the engine shows when it stringifies an instance.
    pub fn to_display(&mut self, f: fn(&T) -> String) -> &mut Self {
        self.descriptor.display = Some(Arc::new(move |header: *mut InstanceHeader| unsafe {
            instance::with_ref::<T, String>(header, f)
        }));
        self
    }

    /// Called when the engine adds a reference to a refcounted instance.
    pub fn on_reference(&mut self, f: fn(&T)) -> &mut Self {
        self.descriptor.on_reference = Some(Arc::new(move |header: *mut InstanceHeader| unsafe {
            instance::with_ref::<T, ()>(header, f)
        }));
        self
    }

    /// Called when the engine drops a reference to a refcounted instance.
    pub fn on_unreference(&mut self, f: fn(&T)) -> &mut Self {
        self.descriptor.on_unreference = Some(Arc::new(move |header: *mut InstanceHeader| unsafe {
            instance::with_ref::<T, ()>(header, f)
        }));
        self
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

static REGISTERED: Mutex<Vec<&'static ClassRecord>> = Mutex::new(Vec::new());

/// Describe `T` and register it with the engine.
///
/// Virtuals and signals declared in a `#[gdclass_impl]` block are collected
/// from inventory and added after `T::register`.
pub fn register<T: ExtensionClass>() -> BindResult<()> {
    let mut descriptor = ClassDescriptor::of::<T>();
    T::register(&mut ClassBuilder::new(&mut descriptor));
    for item in inventory::iter::<ClassImplRegistration> {
        if item.class == T::CLASS_NAME {
            (item.register)(&mut descriptor);
        }
    }
    register_descriptor(descriptor)
}

pub fn register_descriptor(descriptor: ClassDescriptor) -> BindResult<()> {
    let record = descriptor.record;
    let name = descriptor.name;
    if record.extension().is_some() {
        return Err(BindError::AlreadyRegistered(name.to_owned()));
    }

    let info = trampolines::creation_info(record, descriptor.is_abstract);
    let class = StringName::from(name);
    let parent = StringName::from(descriptor.parent);
    let class_token = class.token();
    let parent_token = parent.token();
    let extension = unsafe { &*api().extension };
    // SAFETY: the info struct and both names outlive the call.
    let accepted = unsafe {
        (extension.register_class)(library(), class_token.as_ptr(), parent_token.as_ptr(), &info)
    };
    if !accepted {
        crate::glog!(
            LOG_ERROR,
            "[gdbind] engine refused class {name} (parent {})",
            descriptor.parent
        );
        return Err(BindError::ClassNotFound(descriptor.parent.to_owned()));
    }

    for property in &descriptor.properties {
        let prop_name = StringName::from(property.name);
        let empty_class = StringName::from("");
        let hint_string = GString::from(property.hint_string);
        let (mut n, mut c, mut h): (OpaqueStringName, OpaqueStringName, OpaqueString) =
            (prop_name.token(), empty_class.token(), hint_string.token());
        let info = PropertyInfo {
            ty: property.ty,
            name: n.as_mut_ptr(),
            class_name: c.as_mut_ptr(),
            hint: property.hint,
            hint_string: h.as_mut_ptr(),
            usage: property.usage,
        };
        unsafe { (extension.register_property)(library(), class_token.as_ptr(), &info) };
    }

    for signal in &descriptor.signals {
        let signal_name = StringName::from(signal.name);
        let empty_class = StringName::from("");
        let empty_hint = GString::new();
        let names: Vec<StringName> = signal.args.iter().map(|(n, _)| StringName::from(*n)).collect();
        let mut tokens: Vec<(OpaqueStringName, OpaqueStringName, OpaqueString)> = names
            .iter()
            .map(|n| (n.token(), empty_class.token(), empty_hint.token()))
            .collect();
        let infos: Vec<PropertyInfo> = tokens
            .iter_mut()
            .zip(&signal.args)
            .map(|((n, c, h), (_, ty))| PropertyInfo {
                ty: *ty,
                name: n.as_mut_ptr(),
                class_name: c.as_mut_ptr(),
                hint: PROPERTY_HINT_NONE,
                hint_string: h.as_mut_ptr(),
                usage: PROPERTY_USAGE_DEFAULT,
            })
            .collect();
        let signal_token = signal_name.token();
        unsafe {
            (extension.register_signal)(
                library(),
                class_token.as_ptr(),
                signal_token.as_ptr(),
                infos.as_ptr(),
                infos.len() as i64,
            )
        };
    }

    crate::glog!(
        LOG_INFO,
        "[gdbind] registered {name} : {} ({} virtuals, {} properties, {} signals)",
        descriptor.parent,
        descriptor.virtuals.len(),
        descriptor.properties.len(),
        descriptor.signals.len()
    );
    record.set_extension(Some(Arc::new(ExtensionData {
        descriptor,
        unregistering: AtomicBool::new(false),
    })));
    lock_or_recover(&REGISTERED).push(record);
    Ok(())
}

/// Unregister `T`. Dispatch and construction are refused from the first
/// step on; instances that are still alive keep their host state until the
/// engine frees them.
pub fn unregister<T: ExtensionClass>() -> BindResult<()> {
    unregister_record(T::class_record())
}

/// Unregister a class by name.
pub fn unregister_named(name: &str) -> BindResult<()> {
    let record = lock_or_recover(&REGISTERED)
        .iter()
        .copied()
        .find(|r| r.name() == name)
        .ok_or_else(|| BindError::ClassNotRegistered(name.to_owned()))?;
    unregister_record(record)
}

fn unregister_record(record: &'static ClassRecord) -> BindResult<()> {
    let name = record.name();
    let data = record
        .extension()
        .ok_or_else(|| BindError::ClassNotRegistered(name.to_owned()))?;
    if data.unregistering.swap(true, Ordering::AcqRel) {
        return Err(BindError::ClassNotRegistered(name.to_owned()));
    }

    let class = StringName::from(name);
    let class_token = class.token();
    unsafe { ((*api().extension).unregister_class)(library(), class_token.as_ptr()) };

    record.set_extension(None);
    lock_or_recover(&REGISTERED).retain(|r| !std::ptr::eq(*r, record));
    drop(data);
    crate::glog!(
        LOG_INFO,
        "[gdbind] unregistered {name} ({} instances still alive)",
        live_instances(name)
    );
    Ok(())
}

/// Unregister every class that is still registered, newest first. Runs at
/// core deinitialization. Returns how many were unregistered.
pub fn unregister_all() -> usize {
    lock_or_recover(&AUTO_REGISTERED).clear();
    let records: Vec<&'static ClassRecord> = lock_or_recover(&REGISTERED).clone();
    records
        .into_iter()
        .rev()
        .filter(|record| unregister_record(record).is_ok())
        .count()
}

/// Whether `T` is currently registered with the engine.
pub fn is_registered<T: ExtensionClass>() -> bool {
    T::class_record()
        .extension()
        .is_some_and(|data| !data.is_unregistering())
}

// ---------------------------------------------------------------------------
// Auto-registration through inventory
// ---------------------------------------------------------------------------

/// Submitted by `#[gdclass]` for every class.
pub struct ClassRegistration {
    pub class: &'static str,
    pub level: InitializationLevel,
    pub register: fn() -> BindResult<()>,
    pub unregister: fn() -> BindResult<()>,
}

inventory::collect!(ClassRegistration);

/// Submitted by `#[gdclass_impl]`: adds virtuals and signals to the
/// descriptor of `class` while it is being built.
pub struct ClassImplRegistration {
    pub class: &'static str,
    pub register: fn(&mut ClassDescriptor),
}

inventory::collect!(ClassImplRegistration);

/// Auto-registered classes, in the order they were registered.
static AUTO_REGISTERED: Mutex<Vec<&'static ClassRegistration>> = Mutex::new(Vec::new());

/// Register every submitted class of `level`. Returns how many succeeded.
pub fn register_level(level: InitializationLevel) -> usize {
    let mut count = 0;
    for item in inventory::iter::<ClassRegistration> {
        if item.level != level {
            continue;
        }
        match (item.register)() {
            Ok(()) => {
                lock_or_recover(&AUTO_REGISTERED).push(item);
                count += 1;
            }
            Err(e) => crate::glog!(LOG_ERROR, "[gdbind] cannot register {}: {e}", item.class),
        }
    }
    if count > 0 {
        crate::glog!(LOG_INFO, "[gdbind] {level:?}: registered {count} classes");
    }
    count
}

/// Unregister the classes `register_level(level)` registered, newest first.
pub fn unregister_level(level: InitializationLevel) -> usize {
    let items: Vec<&'static ClassRegistration> = {
        let mut registered = lock_or_recover(&AUTO_REGISTERED);
        let (matching, rest): (Vec<_>, Vec<_>) =
            registered.drain(..).partition(|item| item.level == level);
        *registered = rest;
        matching
    };
    let mut count = 0;
    for item in items.into_iter().rev() {
        match (item.unregister)() {
            Ok(()) => count += 1,
            Err(e) => crate::glog!(LOG_WARNING, "[gdbind] cannot unregister {}: {e}", item.class),
        }
    }
    count
}

#[cfg(test)]
mod tests;
