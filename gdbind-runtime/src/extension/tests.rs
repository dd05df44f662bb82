use std::cell::Cell;

use gdbind_ffi::{InitializationLevel, NOTIFICATION_READY, VariantType};

use super::*;
use crate::classes::{Node, Node3D, Object, Resource};
use crate::gd::Gd;
use crate::testing;
use crate::variant::ToVariant;

// ---------------------------------------------------------------------------
// Test classes
// ---------------------------------------------------------------------------

/// Counts physics frames; overrides one virtual.
struct Ticker {
    base: Base<Ticker>,
    ticks: u32,
    last_delta: f64,
    speed: f64,
    notifications: Vec<i32>,
}

impl EngineClass for Ticker {
    const CLASS_NAME: &'static str = "Ticker";

    fn class_record() -> &'static ClassRecord {
        static RECORD: ClassRecord = ClassRecord::new(
            "Ticker",
            Some(<Node3D as EngineClass>::class_record as fn() -> &'static ClassRecord),
            crate::class::Refcount::Inherited,
        );
        &RECORD
    }
}

impl HasParent for Ticker {
    type Parent = Node3D;
}

impl ExtensionClass for Ticker {
    fn init(base: Base<Self>) -> Self {
        Ticker {
            base,
            ticks: 0,
            last_delta: 0.0,
            speed: 1.0,
            notifications: Vec::new(),
        }
    }

    fn register(builder: &mut ClassBuilder<'_, Self>) {
        builder
            .virtual_method("_physics_process", |this: &mut Ticker, (delta,): (f64,)| {
                this.ticks += 1;
                this.last_delta = delta;
            })
            .virtual_method("_get_score", |this: &mut Ticker, (): ()| i64::from(this.ticks) * 10)
            .property("speed", |this: &Ticker| this.speed, |this: &mut Ticker, v: f64| this.speed = v)
            .read_only_property("ticks", |this: &Ticker| this.ticks)
            .signal("ticked", &[("count", VariantType::Int)])
            .on_notification(|this: &mut Ticker, what| this.notifications.push(what))
            .to_display(|this: &Ticker| format!("Ticker({})", this.ticks));
    }
}

/// Refcounted subclass with hooks on every reference change.
struct Barrel {
    radius: f64,
    references: Cell<u32>,
    unreferences: Cell<u32>,
}

impl EngineClass for Barrel {
    const CLASS_NAME: &'static str = "Barrel";

    fn class_record() -> &'static ClassRecord {
        static RECORD: ClassRecord = ClassRecord::new(
            "Barrel",
            Some(<Resource as EngineClass>::class_record as fn() -> &'static ClassRecord),
            crate::class::Refcount::Inherited,
        );
        &RECORD
    }
}

impl HasParent for Barrel {
    type Parent = Resource;
}

impl ExtensionClass for Barrel {
    fn init(_base: Base<Self>) -> Self {
        Barrel {
            radius: 0.5,
            references: Cell::new(0),
            unreferences: Cell::new(0),
        }
    }

    fn register(builder: &mut ClassBuilder<'_, Self>) {
        builder
            .property("radius", |this: &Barrel| this.radius, |this: &mut Barrel, v: f64| this.radius = v)
            .on_reference(|this: &Barrel| this.references.set(this.references.get() + 1))
            .on_unreference(|this: &Barrel| this.unreferences.set(this.unreferences.get() + 1));
    }
}

/// Registered through inventory at the Servers level.
struct Beacon;

impl EngineClass for Beacon {
    const CLASS_NAME: &'static str = "Beacon";

    fn class_record() -> &'static ClassRecord {
        static RECORD: ClassRecord = ClassRecord::new(
            "Beacon",
            Some(<Node as EngineClass>::class_record as fn() -> &'static ClassRecord),
            crate::class::Refcount::Inherited,
        );
        &RECORD
    }
}

impl HasParent for Beacon {
    type Parent = Node;
}

impl ExtensionClass for Beacon {
    const INIT_LEVEL: InitializationLevel = InitializationLevel::Servers;

    fn init(_base: Base<Self>) -> Self {
        Beacon
    }

    fn register(builder: &mut ClassBuilder<'_, Self>) {
        builder.abstract_class();
    }
}

inventory::submit! {
    ClassRegistration {
        class: "Beacon",
        level: InitializationLevel::Servers,
        register: register::<Beacon>,
        unregister: unregister::<Beacon>,
    }
}

fn new_ticker() -> Gd<Ticker> {
    let object = testing::instantiate("Ticker");
    assert!(!object.is_null());
    unsafe { Gd::from_owned_ptr(object) }
}

fn logged(needle: &str) -> bool {
    testing::take_logs().iter().any(|(_, text)| text.contains(needle))
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn register_twice_is_refused() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    assert!(is_registered::<Ticker>());
    assert!(testing::is_class_registered("Ticker"));

    let err = register::<Ticker>().unwrap_err();
    assert_eq!(err, BindError::AlreadyRegistered("Ticker".into()));
}

#[test]
fn register_reports_members_to_engine() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let mut properties = testing::class_properties("Ticker");
    properties.sort();
    assert_eq!(properties, ["speed", "ticks"]);
    assert_eq!(testing::class_signals("Ticker"), ["ticked"]);
}

#[test]
fn descriptor_lists_what_register_declared() {
    let mut descriptor = ClassDescriptor::of::<Ticker>();
    Ticker::register(&mut ClassBuilder::new(&mut descriptor));
    assert_eq!(descriptor.name(), "Ticker");
    assert_eq!(descriptor.parent(), "Node3D");
    assert_eq!(descriptor.virtual_names().collect::<Vec<_>>(), ["_physics_process", "_get_score"]);
    assert_eq!(descriptor.signal_names().count(), 1);
}

#[test]
fn unregister_unknown_class_fails() {
    let _engine = testing::session();
    assert_eq!(
        unregister::<Ticker>().unwrap_err(),
        BindError::ClassNotRegistered("Ticker".into())
    );
    assert!(matches!(unregister_named("Nope"), Err(BindError::ClassNotRegistered(_))));
}

#[test]
fn auto_registration_by_level() {
    let _engine = testing::session();
    assert_eq!(register_level(InitializationLevel::Core), 0);
    assert_eq!(register_level(InitializationLevel::Servers), 1);
    assert!(is_registered::<Beacon>());

    // Abstract: the engine will not build one.
    assert!(testing::instantiate("Beacon").is_null());

    assert_eq!(unregister_level(InitializationLevel::Servers), 1);
    assert!(!is_registered::<Beacon>());
    assert!(!testing::is_class_registered("Beacon"));
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[test]
fn engine_dispatches_virtual_to_host_state() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let ticker = new_ticker();
    assert_eq!(live_instances("Ticker"), 1);

    for _ in 0..3 {
        assert!(testing::physics_tick(ticker.object_ptr(), 0.25));
    }
    let (ticks, delta) = ticker.bind(|t| (t.ticks, t.last_delta)).unwrap();
    assert_eq!(ticks, 3);
    assert_eq!(delta, 0.25);
    assert_eq!(ticker.dynamic_class_name(), "Ticker");
}

#[test]
fn base_points_back_at_the_engine_object() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let ticker = new_ticker();
    let base = ticker.bind(|t| t.base.to_gd()).unwrap();
    assert_eq!(base, ticker);
    assert_eq!(base.instance_id(), ticker.instance_id());
}

#[test]
fn properties_go_through_host_accessors() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let ticker = new_ticker();

    ticker.set("speed", &4.5f64.to_variant()).unwrap();
    assert_eq!(ticker.bind(|t| t.speed).unwrap(), 4.5);
    assert_eq!(ticker.get("speed").unwrap().to::<f64>().unwrap(), 4.5);

    // Native properties of the parent still work.
    ticker.set_name("Clock").unwrap();
    assert_eq!(ticker.get_name().unwrap().to_string(), "Clock");
}

#[test]
fn notifications_and_display_reach_the_instance() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let ticker = new_ticker();
    ticker.notify(NOTIFICATION_READY).unwrap();
    testing::physics_tick(ticker.object_ptr(), 0.1);

    assert_eq!(ticker.bind(|t| t.notifications.clone()).unwrap(), [NOTIFICATION_READY]);
    assert_eq!(ticker.to_variant().to_string(), "Ticker(1)");
}

#[test]
fn nested_exclusive_borrow_is_refused() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let ticker = new_ticker();

    let inner = ticker.bind_mut(|_| ticker.bind(|t| t.ticks)).unwrap();
    assert_eq!(inner, Err(BindError::AlreadyBound("Ticker")));
}

#[test]
fn dispatch_during_borrow_is_dropped() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let ticker = new_ticker();

    ticker
        .bind_mut(|t| {
            testing::physics_tick(ticker.object_ptr(), 1.0);
            t.ticks += 10;
        })
        .unwrap();
    assert_eq!(ticker.bind(|t| t.ticks).unwrap(), 10);
    assert!(logged("already bound"));
}

// ---------------------------------------------------------------------------
// Unregistration and teardown
// ---------------------------------------------------------------------------

#[test]
fn unregistered_class_refuses_dispatch() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let ticker = new_ticker();
    testing::physics_tick(ticker.object_ptr(), 0.5);

    unregister::<Ticker>().unwrap();
    assert!(!is_registered::<Ticker>());
    assert!(!testing::is_class_registered("Ticker"));
    testing::take_logs();

    // The engine still holds the cached cookie; the host refuses it.
    testing::physics_tick(ticker.object_ptr(), 0.5);
    assert!(logged("refused"));
    assert_eq!(live_instances("Ticker"), 1);

    assert_eq!(
        unregister::<Ticker>().unwrap_err(),
        BindError::ClassNotRegistered("Ticker".into())
    );
    assert!(testing::instantiate("Ticker").is_null());
}

#[test]
fn refused_virtual_still_zeroes_its_return() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let ticker = new_ticker();
    testing::physics_tick(ticker.object_ptr(), 0.5);
    testing::physics_tick(ticker.object_ptr(), 0.5);
    assert_eq!(testing::int_virtual(ticker.object_ptr(), "_get_score"), Some(20));

    unregister::<Ticker>().unwrap();
    assert_eq!(testing::int_virtual(ticker.object_ptr(), "_get_score"), Some(0));
    assert!(logged("refused"));

    // The engine keeps its cookie across re-registration.
    register::<Ticker>().unwrap();
    assert_eq!(testing::int_virtual(ticker.object_ptr(), "_get_score"), Some(20));
    ticker.free();
}

#[test]
fn fresh_storage_starts_constructed() {
    let header = unsafe {
        instance::create_storage::<Ticker>(gdbind_ffi::ObjectPtr::NULL, 0, Ticker::class_record())
    };
    assert_eq!(unsafe { (*header).lifecycle.get() }, Lifecycle::Constructed);

    // Dropping without finalizing skips a lifecycle state.
    let dropped = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
        ((*header).drop_storage)(header)
    }));
    assert_eq!(dropped.is_err(), cfg!(debug_assertions));
}

#[test]
fn free_releases_host_state_once() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let ticker = new_ticker();
    let id = ticker.instance_id();
    let copy = ticker.clone();

    ticker.free();
    assert_eq!(testing::times_destroyed(id), 1);
    assert_eq!(live_instances("Ticker"), 0);
    assert!(!copy.is_instance_valid());
    assert_eq!(copy.bind(|t| t.ticks).unwrap_err(), BindError::UseAfterFree);
    assert_eq!(copy.bind_mut(|t| t.ticks += 1).unwrap_err(), BindError::UseAfterFree);

    // Raw pointer access to the dead object is still fatal.
    let payload = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| copy.object_ptr()))
        .unwrap_err();
    let fatal = payload.downcast_ref::<crate::error::FatalError>().unwrap();
    assert_eq!(fatal.error, BindError::UseAfterFree);
}

#[test]
fn refcounted_subclass_follows_handle_lifetime() {
    let _engine = testing::session();
    register::<Barrel>().unwrap();

    let first = Gd::<Barrel>::new();
    assert!(first.is_refcounted());
    let id = first.instance_id();
    assert_eq!(first.get_reference_count().unwrap(), 1);
    assert_eq!(first.get("radius").unwrap().to::<f64>().unwrap(), 0.5);

    let second = first.clone();
    assert_eq!(second.get_reference_count().unwrap(), 2);
    assert_eq!(first.bind(|c| c.references.get()).unwrap(), 1);

    drop(first);
    assert_eq!(second.bind(|c| c.unreferences.get()).unwrap(), 1);
    assert_eq!(testing::times_destroyed(id), 0);

    drop(second);
    assert_eq!(testing::times_destroyed(id), 1);
    assert_eq!(live_instances("Barrel"), 0);
}

#[test]
fn unregister_all_tears_down_newest_first() {
    let _engine = testing::session();
    register::<Barrel>().unwrap();
    register::<Ticker>().unwrap();
    assert_eq!(unregister_all(), 2);
    assert!(!is_registered::<Barrel>());
    assert!(!is_registered::<Ticker>());
    assert_eq!(unregister_all(), 0);
}

#[test]
fn upcast_handle_still_sees_extension_class() {
    let _engine = testing::session();
    register::<Ticker>().unwrap();
    let object: Gd<Object> = new_ticker().upcast().upcast().upcast();
    assert_eq!(object.get_class().unwrap().to_string(), "Ticker");
    assert!(object.try_cast::<Ticker>().is_ok());
}
