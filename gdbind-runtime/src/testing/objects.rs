// Objects, the class database, method binds and extension classes of the
// mock engine.
//
// The engine table is one mutex. Nothing that can re-enter the engine (host
// callbacks, releasing a Variant or a pooled token) runs while it is held.

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use gdbind_ffi::{
    CONNECT_DEFERRED, CallError, CallErrorType, ClassCreationInfo, ClassInstancePtr,
    ConstStringNamePtr, ConstTypePtr, ConstVariantPtr, LibraryPtr, MethodBindPtr, OK, ObjectPtr,
    OpaqueVariant, PropertyInfo, TypePtr, UninitStringNamePtr, UninitVariantPtr, VariantType,
};
use glam::{Vec2, Vec3};

use super::builtins::invoke_callable;
use super::cells::{
    self, Body, alloc, as_float, as_text, copy_word, from_float, from_int, from_name, from_plain,
    intern, release_word, tag, variant_copy, variant_release,
};
use super::variants::{finish_call, read_args};
use crate::sync::lock_or_recover;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct ClassEntry {
    parent: Option<String>,
    refcounted: bool,
    instantiable: bool,
    extension: Option<ClassCreationInfo>,
    properties: Vec<String>,
    signals: Vec<String>,
}

struct Connection {
    signal: String,
    callable: u64,
    deferred: bool,
}

struct Attached {
    info: ClassCreationInfo,
    instance: ClassInstancePtr,
    /// Virtual call data per method name, as the engine caches it.
    virtuals: HashMap<String, usize>,
}

struct Obj {
    class: String,
    refcount: Option<i32>,
    singleton: bool,
    name: String,
    position: Vec3,
    radius: f64,
    height: f64,
    image_size: (i64, i64),
    meta: Vec<(String, OpaqueVariant)>,
    connections: Vec<Connection>,
    attached: Option<Attached>,
}

enum Deferred {
    Free(u64),
    Callable {
        callable: u64,
        args: Vec<OpaqueVariant>,
    },
    Method {
        id: u64,
        method: String,
        args: Vec<OpaqueVariant>,
    },
}

struct Engine {
    objects: HashMap<u64, Obj>,
    classes: HashMap<String, ClassEntry>,
    tags: Vec<String>,
    deferred: Vec<Deferred>,
    destroyed: HashMap<u64, usize>,
    next_id: u64,
}

/// (name, parent, refcounted, instantiable)
const NATIVE_CLASSES: [(&str, Option<&str>, bool, bool); 9] = [
    ("Object", None, false, true),
    ("RefCounted", Some("Object"), true, true),
    ("Resource", Some("RefCounted"), true, true),
    ("Shape3D", Some("Resource"), true, false),
    ("CapsuleShape3D", Some("Shape3D"), true, true),
    ("Image", Some("Resource"), true, true),
    ("Node", Some("Object"), false, true),
    ("Node3D", Some("Node"), false, true),
    ("Geometry2D", Some("Object"), false, false),
];

const SINGLETONS: [&str; 1] = ["Geometry2D"];

impl Engine {
    fn new() -> Self {
        let mut engine = Engine {
            objects: HashMap::new(),
            classes: HashMap::new(),
            tags: Vec::new(),
            deferred: Vec::new(),
            destroyed: HashMap::new(),
            next_id: 1,
        };
        for (name, parent, refcounted, instantiable) in NATIVE_CLASSES {
            engine.classes.insert(
                name.to_owned(),
                ClassEntry {
                    parent: parent.map(str::to_owned),
                    refcounted,
                    instantiable,
                    extension: None,
                    properties: Vec::new(),
                    signals: Vec::new(),
                },
            );
            engine.tags.push(name.to_owned());
        }
        for name in SINGLETONS {
            let object = engine.spawn(name);
            if let Some(o) = engine.objects.get_mut(&id_of(object)) {
                o.singleton = true;
            }
        }
        engine
    }

    fn inherits(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);
        for _ in 0..64 {
            let Some(name) = current else {
                return false;
            };
            if name == ancestor {
                return true;
            }
            current = self.classes.get(name).and_then(|c| c.parent.as_deref());
        }
        false
    }

    fn object_inherits(&self, id: u64, ancestor: &str) -> bool {
        self.objects
            .get(&id)
            .is_some_and(|o| self.inherits(&o.class, ancestor))
    }

    /// A native object of `class` with its engine defaults.
    fn spawn(&mut self, class: &str) -> ObjectPtr {
        let id = self.next_id;
        self.next_id += 1;
        let refcounted = self.inherits(class, "RefCounted");
        self.objects.insert(
            id,
            Obj {
                class: class.to_owned(),
                refcount: refcounted.then_some(1),
                singleton: false,
                name: String::new(),
                position: Vec3::ZERO,
                radius: 0.5,
                height: 2.0,
                image_size: (0, 0),
                meta: Vec::new(),
                connections: Vec::new(),
                attached: None,
            },
        );
        ptr_of(id)
    }
}

static ENGINE: OnceLock<Mutex<Engine>> = OnceLock::new();
static LOOKUPS: AtomicUsize = AtomicUsize::new(0);

fn engine() -> MutexGuard<'static, Engine> {
    lock_or_recover(ENGINE.get_or_init(|| Mutex::new(Engine::new())))
}

pub(super) fn ptr_of(id: u64) -> ObjectPtr {
    ObjectPtr::from_addr((id as usize) << 4)
}

pub(super) fn id_of(object: ObjectPtr) -> u64 {
    (object.to_addr() >> 4) as u64
}

pub(super) fn is_live(id: u64) -> bool {
    id != 0 && engine().objects.contains_key(&id)
}

pub(super) fn instance_id_of(object: ObjectPtr) -> u64 {
    let id = id_of(object);
    if is_live(id) { id } else { 0 }
}

pub(super) fn method_bind_lookups() -> usize {
    LOOKUPS.load(Ordering::SeqCst)
}

/// Add the reference a Variant holds on a refcounted object.
pub(super) fn retain(object: ObjectPtr) {
    unsafe { reference(object) };
}

/// Drop a Variant's reference, destroying the object at zero.
pub(super) fn release(object: ObjectPtr) {
    if unsafe { unreference(object) } {
        unsafe { destroy(object) };
    }
}

/// `<Class#id>`, or the extension's own text when it provides one.
pub(super) fn describe(object: ObjectPtr) -> String {
    let id = id_of(object);
    let found = {
        let engine = engine();
        engine.objects.get(&id).map(|o| {
            let hook = o
                .attached
                .as_ref()
                .and_then(|a| a.info.to_string_func.map(|f| (f, a.instance)));
            (o.class.clone(), hook)
        })
    };
    let Some((class, hook)) = found else {
        return "<Freed Object>".to_owned();
    };
    if let Some((to_string, instance)) = hook {
        let mut valid = false;
        let mut word = 0u64;
        unsafe { to_string(instance, &mut valid, &mut word as *mut u64 as *mut c_void) };
        if valid {
            let text = unsafe { cells::text_of(word) };
            unsafe { release_word(word) };
            return text;
        }
    }
    format!("<{class}#{id}>")
}

// ---------------------------------------------------------------------------
// ObjectApi
// ---------------------------------------------------------------------------

pub(super) unsafe extern "C" fn construct(class_name: ConstStringNamePtr) -> ObjectPtr {
    let class = unsafe { cells::text_at(class_name) };
    let info = {
        let mut engine = engine();
        let Some(entry) = engine.classes.get(&class) else {
            return ObjectPtr::NULL;
        };
        if !entry.instantiable {
            return ObjectPtr::NULL;
        }
        match entry.extension {
            Some(info) => info,
            None => return engine.spawn(&class),
        }
    };
    // Extension classes build their base object through the host.
    match info.create_instance_func {
        Some(create) => unsafe { create(info.class_userdata) },
        None => ObjectPtr::NULL,
    }
}

pub(super) unsafe extern "C" fn destroy(object: ObjectPtr) {
    let id = id_of(object);
    let attached = {
        let mut engine = engine();
        match engine.objects.get_mut(&id) {
            Some(o) => o.attached.take(),
            None => return,
        }
    };
    if let Some(a) = attached {
        if let Some(free) = a.info.free_instance_func {
            unsafe { free(a.info.class_userdata, a.instance) };
        }
    }
    let removed = {
        let mut engine = engine();
        let removed = engine.objects.remove(&id);
        if removed.is_some() {
            *engine.destroyed.entry(id).or_default() += 1;
        }
        removed
    };
    if let Some(o) = removed {
        for (_, mut value) in o.meta {
            unsafe { variant_release(&mut value) };
        }
        for c in o.connections {
            unsafe { release_word(c.callable) };
        }
    }
}

pub(super) unsafe extern "C" fn get_class_name(
    object: ObjectPtr,
    _library: LibraryPtr,
    r_class_name: UninitStringNamePtr,
) -> bool {
    let class = engine().objects.get(&id_of(object)).map(|o| o.class.clone());
    match class {
        Some(class) if !r_class_name.is_null() => {
            unsafe { ptr::write_unaligned(r_class_name as *mut u64, intern(&class)) };
            true
        }
        _ => false,
    }
}

pub(super) unsafe extern "C" fn cast_to(object: ObjectPtr, class_tag: *mut c_void) -> ObjectPtr {
    let engine = engine();
    let Some(class) = (class_tag as usize)
        .checked_sub(1)
        .and_then(|index| engine.tags.get(index))
    else {
        return ObjectPtr::NULL;
    };
    if engine.object_inherits(id_of(object), class) { object } else { ObjectPtr::NULL }
}

pub(super) unsafe extern "C" fn get_instance_id(object: ObjectPtr) -> u64 {
    instance_id_of(object)
}

pub(super) unsafe extern "C" fn get_instance_from_id(instance_id: u64) -> ObjectPtr {
    if is_live(instance_id) { ptr_of(instance_id) } else { ObjectPtr::NULL }
}

pub(super) unsafe extern "C" fn set_instance(
    object: ObjectPtr,
    class_name: ConstStringNamePtr,
    instance: ClassInstancePtr,
) {
    let class = unsafe { cells::text_at(class_name) };
    let mut engine = engine();
    let Some(info) = engine.classes.get(&class).and_then(|c| c.extension) else {
        return;
    };
    if let Some(o) = engine.objects.get_mut(&id_of(object)) {
        o.class = class;
        o.attached = Some(Attached {
            info,
            instance,
            virtuals: HashMap::new(),
        });
    }
}

type RefHook = Option<(unsafe extern "C" fn(ClassInstancePtr), ClassInstancePtr)>;

fn adjust_refcount(object: ObjectPtr, delta: i32) -> Option<(i32, RefHook)> {
    let mut engine = engine();
    let o = engine.objects.get_mut(&id_of(object))?;
    let count = o.refcount.as_mut()?;
    *count += delta;
    let count = *count;
    let hook = o.attached.as_ref().and_then(|a| {
        let f = if delta > 0 { a.info.reference_func } else { a.info.unreference_func };
        f.map(|f| (f, a.instance))
    });
    Some((count, hook))
}

pub(super) unsafe extern "C" fn reference(object: ObjectPtr) -> bool {
    let Some((_, hook)) = adjust_refcount(object, 1) else {
        return false;
    };
    if let Some((f, instance)) = hook {
        unsafe { f(instance) };
    }
    true
}

pub(super) unsafe extern "C" fn unreference(object: ObjectPtr) -> bool {
    let Some((count, hook)) = adjust_refcount(object, -1) else {
        return false;
    };
    if let Some((f, instance)) = hook {
        unsafe { f(instance) };
    }
    count == 0
}

pub(super) unsafe extern "C" fn get_reference_count(object: ObjectPtr) -> i32 {
    engine()
        .objects
        .get(&id_of(object))
        .and_then(|o| o.refcount)
        .unwrap_or(0)
}

pub(super) unsafe extern "C" fn global_get_singleton(name: ConstStringNamePtr) -> ObjectPtr {
    let name = unsafe { cells::text_at(name) };
    engine()
        .objects
        .iter()
        .find(|(_, o)| o.singleton && o.class == name)
        .map_or(ObjectPtr::NULL, |(id, _)| ptr_of(*id))
}

// ---------------------------------------------------------------------------
// Method binds
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Bound {
    GetClass,
    IsClass,
    Get,
    Set,
    SetMeta,
    GetMeta,
    HasMeta,
    Connect,
    IsConnected,
    EmitSignal,
    Call,
    CallDeferred,
    Notification,
    GetReferenceCount,
    GetRadius,
    SetRadius,
    GetHeight,
    SetHeight,
    CreateEmpty,
    ImageWidth,
    ImageHeight,
    GetName,
    SetName,
    QueueFree,
    GetPosition,
    SetPosition,
    BoundingRect,
    IsPointInPolygon,
}

static BINDS: [(&str, &str, i64, Bound); 28] = [
    ("Object", "get_class", 201670096, Bound::GetClass),
    ("Object", "is_class", 3927539163, Bound::IsClass),
    ("Object", "get", 2760726917, Bound::Get),
    ("Object", "set", 3776071444, Bound::Set),
    ("Object", "set_meta", 3776071444, Bound::SetMeta),
    ("Object", "get_meta", 3990617847, Bound::GetMeta),
    ("Object", "has_meta", 2619796661, Bound::HasMeta),
    ("Object", "connect", 1518946055, Bound::Connect),
    ("Object", "is_connected", 768136979, Bound::IsConnected),
    ("Object", "emit_signal", 4047867050, Bound::EmitSignal),
    ("Object", "call", 3400424181, Bound::Call),
    ("Object", "call_deferred", 3400424181, Bound::CallDeferred),
    ("Object", "notification", 4023243586, Bound::Notification),
    ("RefCounted", "get_reference_count", 3905245786, Bound::GetReferenceCount),
    ("CapsuleShape3D", "get_radius", 1740695150, Bound::GetRadius),
    ("CapsuleShape3D", "set_radius", 373806689, Bound::SetRadius),
    ("CapsuleShape3D", "get_height", 1740695150, Bound::GetHeight),
    ("CapsuleShape3D", "set_height", 373806689, Bound::SetHeight),
    ("Image", "create_empty", 986942177, Bound::CreateEmpty),
    ("Image", "get_width", 3905245786, Bound::ImageWidth),
    ("Image", "get_height", 3905245786, Bound::ImageHeight),
    ("Node", "get_name", 2002593661, Bound::GetName),
    ("Node", "set_name", 3304788590, Bound::SetName),
    ("Node", "queue_free", 3218959716, Bound::QueueFree),
    ("Node3D", "get_position", 3360562783, Bound::GetPosition),
    ("Node3D", "set_position", 3460891852, Bound::SetPosition),
    ("Geometry2D", "bounding_rect", 2217498227, Bound::BoundingRect),
    ("Geometry2D", "is_point_in_polygon", 738277916, Bound::IsPointInPolygon),
];

fn bound_of(method: MethodBindPtr) -> Option<Bound> {
    (method.0 as usize)
        .checked_sub(1)
        .and_then(|index| BINDS.get(index))
        .map(|entry| entry.3)
}

pub(super) unsafe extern "C" fn get_method_bind(
    class_name: ConstStringNamePtr,
    method_name: ConstStringNamePtr,
    hash: i64,
) -> MethodBindPtr {
    LOOKUPS.fetch_add(1, Ordering::SeqCst);
    let class = unsafe { cells::text_at(class_name) };
    let method = unsafe { cells::text_at(method_name) };
    let engine = engine();
    let found = BINDS
        .iter()
        .position(|(owner, name, _, _)| *name == method && engine.inherits(&class, owner));
    match found {
        Some(index) if BINDS[index].2 == hash => MethodBindPtr((index + 1) as *const c_void),
        _ => MethodBindPtr(ptr::null()),
    }
}

pub(super) unsafe extern "C" fn get_class_tag(class_name: ConstStringNamePtr) -> *mut c_void {
    let class = unsafe { cells::text_at(class_name) };
    engine()
        .tags
        .iter()
        .position(|t| *t == class)
        .map_or(ptr::null_mut(), |index| (index + 1) as *mut c_void)
}

pub(super) unsafe extern "C" fn is_parent_class(
    class_name: ConstStringNamePtr,
    parent: ConstStringNamePtr,
) -> bool {
    let class = unsafe { cells::text_at(class_name) };
    let parent = unsafe { cells::text_at(parent) };
    engine().inherits(&class, &parent)
}

unsafe fn arg<T: Copy>(args: *const ConstTypePtr, index: usize) -> T {
    unsafe { ptr::read_unaligned(*args.add(index) as *const T) }
}

unsafe fn text_arg(args: *const ConstTypePtr, index: usize) -> String {
    unsafe { cells::text_at(*args.add(index)) }
}

unsafe fn put<T>(r_ret: TypePtr, value: T) {
    if !r_ret.is_null() {
        unsafe { ptr::write_unaligned(r_ret as *mut T, value) };
    }
}

pub(super) unsafe extern "C" fn method_bind_ptrcall(
    method: MethodBindPtr,
    instance: ObjectPtr,
    args: *const ConstTypePtr,
    r_ret: TypePtr,
) {
    let Some(bound) = bound_of(method) else {
        return;
    };
    let id = id_of(instance);
    unsafe {
        match bound {
            Bound::GetClass => {
                let class = engine().objects.get(&id).map(|o| o.class.clone()).unwrap_or_default();
                put(r_ret, alloc(Body::Text(class)));
            }
            Bound::IsClass => {
                let class = text_arg(args, 0);
                put(r_ret, engine().object_inherits(id, &class));
            }
            Bound::Get => put(r_ret, get_property(id, &text_arg(args, 0))),
            Bound::Set => {
                set_property(id, &text_arg(args, 0), &arg::<OpaqueVariant>(args, 1));
            }
            Bound::SetMeta => {
                let value = variant_copy(&arg::<OpaqueVariant>(args, 1));
                set_meta(id, text_arg(args, 0), value);
            }
            Bound::GetMeta => {
                let value = get_meta(id, &text_arg(args, 0))
                    .unwrap_or_else(|| variant_copy(&arg::<OpaqueVariant>(args, 1)));
                put(r_ret, value);
            }
            Bound::HasMeta => put(r_ret, get_meta_raw(id, &text_arg(args, 0)).is_some()),
            Bound::Connect => {
                let signal = text_arg(args, 0);
                let callable = copy_word(arg::<u64>(args, 1));
                let flags: i64 = arg(args, 2);
                connect(id, signal, callable, flags & CONNECT_DEFERRED as i64 != 0);
                put(r_ret, OK);
            }
            Bound::IsConnected => {
                put(r_ret, is_connected(id, &text_arg(args, 0), arg::<u64>(args, 1)));
            }
            Bound::EmitSignal | Bound::Call | Bound::CallDeferred => {}
            Bound::Notification => {
                let what: i64 = arg(args, 0);
                let reversed: bool = arg(args, 1);
                notify(id, what as i32, reversed);
            }
            Bound::GetReferenceCount => {
                put(r_ret, get_reference_count(instance) as i64);
            }
            Bound::GetRadius => put(r_ret, with_object(id, |o| o.radius).unwrap_or_default()),
            Bound::GetHeight => put(r_ret, with_object(id, |o| o.height).unwrap_or_default()),
            Bound::SetRadius => {
                let radius: f64 = arg(args, 0);
                with_object(id, |o| o.radius = radius);
            }
            Bound::SetHeight => {
                let height: f64 = arg(args, 0);
                with_object(id, |o| o.height = height);
            }
            Bound::CreateEmpty => {
                let size = (arg::<i64>(args, 0), arg::<i64>(args, 1));
                let mut engine = engine();
                let image = engine.spawn("Image");
                if let Some(o) = engine.objects.get_mut(&id_of(image)) {
                    o.image_size = size;
                }
                put(r_ret, image);
            }
            Bound::ImageWidth => put(r_ret, with_object(id, |o| o.image_size.0).unwrap_or_default()),
            Bound::ImageHeight => put(r_ret, with_object(id, |o| o.image_size.1).unwrap_or_default()),
            Bound::GetName => {
                let name = with_object(id, |o| o.name.clone()).unwrap_or_default();
                put(r_ret, intern(&name));
            }
            Bound::SetName => {
                let name = text_arg(args, 0);
                with_object(id, |o| o.name = name);
            }
            Bound::QueueFree => engine().deferred.push(Deferred::Free(id)),
            Bound::GetPosition => {
                put(r_ret, with_object(id, |o| o.position).unwrap_or_default());
            }
            Bound::SetPosition => {
                let position: Vec3 = arg(args, 0);
                with_object(id, |o| o.position = position);
            }
            Bound::BoundingRect => {
                let points = array_points(arg::<u64>(args, 0));
                put(r_ret, bounding_rect(&points));
            }
            Bound::IsPointInPolygon => {
                let point: Vec2 = arg(args, 0);
                let polygon = packed_points(arg::<u64>(args, 1));
                put(r_ret, point_in_polygon(point, &polygon));
            }
        }
    }
}

pub(super) unsafe extern "C" fn method_bind_call(
    method: MethodBindPtr,
    instance: ObjectPtr,
    args: *const ConstVariantPtr,
    arg_count: i64,
    r_ret: UninitVariantPtr,
    r_error: *mut CallError,
) {
    let args = unsafe { read_args(args, arg_count) };
    let id = id_of(instance);
    let first = args.first().and_then(|v| unsafe { as_text(v) });
    let rest = args.get(1..).unwrap_or_default();
    let outcome = match (bound_of(method), first) {
        (Some(_), _) if !is_live(id) => Err(CallErrorType::InstanceIsNull),
        (Some(Bound::EmitSignal), Some(signal)) => {
            emit(id, &signal, rest);
            Ok(from_int(OK))
        }
        (Some(Bound::Call), Some(method)) => call_method(id, &method, rest),
        (Some(Bound::CallDeferred), Some(method)) => {
            let args = rest.iter().map(|a| unsafe { variant_copy(a) }).collect();
            engine().deferred.push(Deferred::Method { id, method, args });
            Ok(OpaqueVariant::ZERO)
        }
        (Some(Bound::EmitSignal | Bound::Call | Bound::CallDeferred), None) => {
            Err(CallErrorType::TooFewArguments)
        }
        _ => Err(CallErrorType::InvalidMethod),
    };
    unsafe { finish_call(outcome, r_ret, r_error) };
}

fn with_object<R>(id: u64, f: impl FnOnce(&mut Obj) -> R) -> Option<R> {
    engine().objects.get_mut(&id).map(f)
}

// ---------------------------------------------------------------------------
// Properties, metadata, signals
// ---------------------------------------------------------------------------

fn get_property(id: u64, name: &str) -> OpaqueVariant {
    let hook = with_object(id, |o| {
        o.attached
            .as_ref()
            .and_then(|a| a.info.get_func.map(|f| (f, a.instance)))
    })
    .flatten();
    if let Some((get, instance)) = hook {
        let word = intern(name);
        let mut out = OpaqueVariant::ZERO;
        if unsafe { get(instance, &word as *const u64 as ConstStringNamePtr, out.as_mut_ptr()) } {
            return out;
        }
        unsafe { variant_release(&mut out) };
    }
    let engine = engine();
    let Some(o) = engine.objects.get(&id) else {
        return OpaqueVariant::ZERO;
    };
    let is = |ancestor: &str| engine.inherits(&o.class, ancestor);
    match name {
        "name" if is("Node") => from_name(&o.name),
        "position" if is("Node3D") => from_plain(VariantType::Vector3, &o.position),
        "radius" if is("CapsuleShape3D") => from_float(o.radius),
        "height" if is("CapsuleShape3D") => from_float(o.height),
        _ => OpaqueVariant::ZERO,
    }
}

fn set_property(id: u64, name: &str, value: &OpaqueVariant) -> bool {
    let hook = with_object(id, |o| {
        o.attached
            .as_ref()
            .and_then(|a| a.info.set_func.map(|f| (f, a.instance)))
    })
    .flatten();
    if let Some((set, instance)) = hook {
        let word = intern(name);
        let handled = unsafe {
            set(
                instance,
                &word as *const u64 as ConstStringNamePtr,
                value as *const OpaqueVariant as ConstVariantPtr,
            )
        };
        if handled {
            return true;
        }
    }
    let text = unsafe { as_text(value) };
    let number = as_float(value);
    let vector = (tag(value) == VariantType::Vector3).then(|| unsafe {
        let bytes = cells::plain_bytes(value);
        ptr::read_unaligned(bytes.as_ptr() as *const Vec3)
    });
    let mut engine = engine();
    let Some(class) = engine.objects.get(&id).map(|o| o.class.clone()) else {
        return false;
    };
    let is_node = engine.inherits(&class, "Node");
    let is_node3d = engine.inherits(&class, "Node3D");
    let is_capsule = engine.inherits(&class, "CapsuleShape3D");
    let Some(o) = engine.objects.get_mut(&id) else {
        return false;
    };
    match (name, text, number, vector) {
        ("name", Some(text), _, _) if is_node => o.name = text,
        ("position", _, _, Some(v)) if is_node3d => o.position = v,
        ("radius", _, Some(r), _) if is_capsule => o.radius = r,
        ("height", _, Some(h), _) if is_capsule => o.height = h,
        _ => return false,
    }
    true
}

fn get_meta_raw(id: u64, key: &str) -> Option<OpaqueVariant> {
    engine()
        .objects
        .get(&id)
        .and_then(|o| o.meta.iter().find(|(k, _)| k == key).map(|(_, v)| *v))
}

/// Copy of the stored metadata value.
fn get_meta(id: u64, key: &str) -> Option<OpaqueVariant> {
    get_meta_raw(id, key).map(|v| unsafe { variant_copy(&v) })
}

/// Store an owned value, releasing whatever it replaces.
fn set_meta(id: u64, key: String, value: OpaqueVariant) {
    let old = with_object(id, |o| match o.meta.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => Some(std::mem::replace(&mut slot.1, value)),
        None => {
            o.meta.push((key, value));
            None
        }
    });
    let mut old = match old {
        Some(replaced) => replaced,
        None => Some(value),
    };
    if let Some(v) = old.as_mut() {
        unsafe { variant_release(v) };
    }
}

fn connect(id: u64, signal: String, callable: u64, deferred: bool) {
    let rejected = with_object(id, |o| {
        o.connections.push(Connection {
            signal,
            callable,
            deferred,
        })
    })
    .is_none();
    if rejected {
        unsafe { release_word(callable) };
    }
}

fn is_connected(id: u64, signal: &str, callable: u64) -> bool {
    let candidates: Vec<u64> = with_object(id, |o| {
        o.connections
            .iter()
            .filter(|c| c.signal == signal)
            .map(|c| c.callable)
            .collect()
    })
    .unwrap_or_default();
    candidates
        .into_iter()
        .any(|c| unsafe { cells::same_callable(c, callable) })
}

fn emit(id: u64, signal: &str, args: &[OpaqueVariant]) {
    // Copies are taken under the lock; a handler may disconnect or free the emitter.
    let targets: Vec<(u64, bool)> = with_object(id, |o| {
        o.connections
            .iter()
            .filter(|c| c.signal == signal)
            .map(|c| (unsafe { copy_word(c.callable) }, c.deferred))
            .collect()
    })
    .unwrap_or_default();
    for (callable, deferred) in targets {
        if deferred {
            let args = args.iter().map(|a| unsafe { variant_copy(a) }).collect();
            engine().deferred.push(Deferred::Callable { callable, args });
            continue;
        }
        if let Ok(mut result) = unsafe { invoke_callable(callable, args) } {
            unsafe { variant_release(&mut result) };
        }
        unsafe { release_word(callable) };
    }
}

fn notify(id: u64, what: i32, reversed: bool) {
    let hook = with_object(id, |o| {
        o.attached
            .as_ref()
            .and_then(|a| a.info.notification_func.map(|f| (f, a.instance)))
    })
    .flatten();
    if let Some((f, instance)) = hook {
        unsafe { f(instance, what, reversed) };
    }
}

/// Dynamic call by method name, as `Object.call` and bound callables do it.
pub(super) fn call_method(
    id: u64,
    method: &str,
    args: &[OpaqueVariant],
) -> Result<OpaqueVariant, CallErrorType> {
    if !is_live(id) {
        return Err(CallErrorType::InstanceIsNull);
    }
    let text = |index: usize| {
        args.get(index)
            .and_then(|v| unsafe { as_text(v) })
            .ok_or(CallErrorType::InvalidArgument)
    };
    let value = |index: usize| args.get(index).ok_or(CallErrorType::TooFewArguments);
    let is_node = engine().object_inherits(id, "Node");
    match method {
        "get_meta" => {
            let key = text(0)?;
            Ok(get_meta(id, &key)
                .or_else(|| args.get(1).map(|d| unsafe { variant_copy(d) }))
                .unwrap_or(OpaqueVariant::ZERO))
        }
        "set_meta" => {
            let key = text(0)?;
            let v = unsafe { variant_copy(value(1)?) };
            set_meta(id, key, v);
            Ok(OpaqueVariant::ZERO)
        }
        "has_meta" => Ok(cells::from_bool(get_meta_raw(id, &text(0)?).is_some())),
        "get" => Ok(get_property(id, &text(0)?)),
        "set" => {
            let key = text(0)?;
            set_property(id, &key, value(1)?);
            Ok(OpaqueVariant::ZERO)
        }
        "get_class" => {
            let class = with_object(id, |o| o.class.clone()).unwrap_or_default();
            Ok(cells::from_text(&class))
        }
        "get_name" if is_node => Ok(get_property(id, "name")),
        "set_name" if is_node => {
            set_property(id, "name", value(0)?);
            Ok(OpaqueVariant::ZERO)
        }
        "queue_free" if is_node => {
            engine().deferred.push(Deferred::Free(id));
            Ok(OpaqueVariant::ZERO)
        }
        "emit_signal" => {
            let signal = text(0)?;
            emit(id, &signal, &args[1..]);
            Ok(from_int(OK))
        }
        _ => Err(CallErrorType::InvalidMethod),
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

unsafe fn array_points(word: u64) -> Vec<Vec2> {
    let Some(p) = (unsafe { cells::payload(word) }) else {
        return Vec::new();
    };
    match &*p.body.borrow() {
        Body::Array { items, .. } => items
            .iter()
            .filter(|v| tag(v) == VariantType::Vector2)
            .map(|v| unsafe { ptr::read_unaligned(v.0[1..].as_ptr() as *const Vec2) })
            .collect(),
        _ => Vec::new(),
    }
}

unsafe fn packed_points(word: u64) -> Vec<Vec2> {
    let Some(p) = (unsafe { cells::payload(word) }) else {
        return Vec::new();
    };
    match &*p.body.borrow() {
        Body::Packed {
            ty: VariantType::PackedVector2Array,
            len,
            words,
        } => (0..*len)
            .map(|i| unsafe { ptr::read_unaligned((words.as_ptr() as *const Vec2).add(i)) })
            .collect(),
        _ => Vec::new(),
    }
}

/// `[position, size]` of the smallest rectangle holding every point.
fn bounding_rect(points: &[Vec2]) -> [Vec2; 2] {
    let Some(first) = points.first() else {
        return [Vec2::ZERO, Vec2::ZERO];
    };
    let (min, max) = points
        .iter()
        .fold((*first, *first), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
    [min, max - min]
}

fn point_in_polygon(point: Vec2, polygon: &[Vec2]) -> bool {
    let mut inside = false;
    let n = polygon.len();
    for i in 0..n {
        let (a, b) = (polygon[i], polygon[(i + n - 1) % n]);
        if (a.y > point.y) != (b.y > point.y)
            && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
        {
            inside = !inside;
        }
    }
    inside
}

// ---------------------------------------------------------------------------
// ExtensionApi
// ---------------------------------------------------------------------------

pub(super) unsafe extern "C" fn register_class(
    _library: LibraryPtr,
    class_name: ConstStringNamePtr,
    parent_class_name: ConstStringNamePtr,
    info: *const ClassCreationInfo,
) -> bool {
    if info.is_null() {
        return false;
    }
    let class = unsafe { cells::text_at(class_name) };
    let parent = unsafe { cells::text_at(parent_class_name) };
    let info = unsafe { *info };
    let mut engine = engine();
    if engine.classes.contains_key(&class) {
        return false;
    }
    let Some(refcounted) = engine.classes.get(&parent).map(|p| p.refcounted) else {
        return false;
    };
    engine.classes.insert(
        class.clone(),
        ClassEntry {
            parent: Some(parent),
            refcounted,
            instantiable: !info.is_abstract,
            extension: Some(info),
            properties: Vec::new(),
            signals: Vec::new(),
        },
    );
    if !engine.tags.contains(&class) {
        engine.tags.push(class);
    }
    true
}

pub(super) unsafe extern "C" fn register_property(
    _library: LibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const PropertyInfo,
) {
    if info.is_null() {
        return;
    }
    let class = unsafe { cells::text_at(class_name) };
    let name = unsafe { cells::text_at((*info).name) };
    if let Some(entry) = engine().classes.get_mut(&class) {
        entry.properties.push(name);
    }
}

pub(super) unsafe extern "C" fn register_signal(
    _library: LibraryPtr,
    class_name: ConstStringNamePtr,
    signal_name: ConstStringNamePtr,
    _args: *const PropertyInfo,
    _arg_count: i64,
) {
    let class = unsafe { cells::text_at(class_name) };
    let signal = unsafe { cells::text_at(signal_name) };
    if let Some(entry) = engine().classes.get_mut(&class) {
        entry.signals.push(signal);
    }
}

pub(super) unsafe extern "C" fn unregister_class(_library: LibraryPtr, class_name: ConstStringNamePtr) {
    let class = unsafe { cells::text_at(class_name) };
    engine().classes.remove(&class);
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

pub(super) fn call_virtual(
    object: ObjectPtr,
    name: &str,
    args: &[ConstTypePtr],
    r_ret: TypePtr,
) -> bool {
    let id = id_of(object);
    let Some((info, instance, cached)) = with_object(id, |o| {
        o.attached
            .as_ref()
            .map(|a| (a.info, a.instance, a.virtuals.get(name).copied()))
    })
    .flatten() else {
        return false;
    };
    let word = intern(name);
    let name_ptr = &word as *const u64 as ConstStringNamePtr;
    let data = match cached {
        Some(data) => data,
        None => {
            let data = info
                .get_virtual_call_data_func
                .map_or(0, |f| unsafe { f(info.class_userdata, name_ptr) } as usize);
            with_object(id, |o| {
                if let Some(a) = o.attached.as_mut() {
                    a.virtuals.insert(name.to_owned(), data);
                }
            });
            data
        }
    };
    let Some(call) = info.call_virtual_with_data_func else {
        return false;
    };
    if data == 0 {
        return false;
    }
    unsafe { call(instance, name_ptr, data as *mut c_void, args.as_ptr(), r_ret) };
    true
}

pub(super) fn flush_deferred() -> usize {
    let mut ran = 0;
    loop {
        let batch = std::mem::take(&mut engine().deferred);
        if batch.is_empty() {
            return ran;
        }
        for item in batch {
            ran += 1;
            match item {
                Deferred::Free(id) => {
                    if is_live(id) {
                        unsafe { destroy(ptr_of(id)) };
                    }
                }
                Deferred::Callable { callable, mut args } => {
                    if let Ok(mut result) = unsafe { invoke_callable(callable, &args) } {
                        unsafe { variant_release(&mut result) };
                    }
                    unsafe { release_word(callable) };
                    release_all(&mut args);
                }
                Deferred::Method { id, method, mut args } => {
                    if let Ok(mut result) = call_method(id, &method, &args) {
                        unsafe { variant_release(&mut result) };
                    }
                    release_all(&mut args);
                }
            }
        }
    }
}

fn release_all(args: &mut [OpaqueVariant]) {
    for a in args {
        unsafe { variant_release(a) };
    }
}

/// Destroy every non-singleton object, drop queued work, and forget
/// extension classes.
pub(super) fn reset() {
    let ids: Vec<u64> = engine()
        .objects
        .iter()
        .filter(|(_, o)| !o.singleton)
        .map(|(id, _)| *id)
        .collect();
    for id in ids {
        unsafe { destroy(ptr_of(id)) };
    }
    let queued = std::mem::take(&mut engine().deferred);
    for item in queued {
        match item {
            Deferred::Free(_) => {}
            Deferred::Callable { callable, mut args } => {
                unsafe { release_word(callable) };
                release_all(&mut args);
            }
            Deferred::Method { mut args, .. } => release_all(&mut args),
        }
    }
    engine().classes.retain(|_, c| c.extension.is_none());
}

pub(super) fn leaked_objects() -> usize {
    engine().objects.values().filter(|o| !o.singleton).count()
}

pub(super) fn times_destroyed(instance_id: u64) -> usize {
    engine().destroyed.get(&instance_id).copied().unwrap_or(0)
}

pub(super) fn class_properties(class: &str) -> Vec<String> {
    engine()
        .classes
        .get(class)
        .map(|c| c.properties.clone())
        .unwrap_or_default()
}

pub(super) fn class_signals(class: &str) -> Vec<String> {
    engine()
        .classes
        .get(class)
        .map(|c| c.signals.clone())
        .unwrap_or_default()
}

pub(super) fn is_class_registered(class: &str) -> bool {
    engine().classes.contains_key(class)
}
