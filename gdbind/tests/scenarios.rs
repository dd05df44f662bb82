// End-to-end runs against the mock engine: macro-declared classes, the entry
// point handshake, and the builtin bridge as a user crate sees them.

use std::mem::MaybeUninit;
use std::sync::{Arc, Mutex};

use gdbind::ffi::{INTERFACE_VERSION, Initialization, InitializationLevel, InterfaceVersion, PROPERTY_HINT_RANGE};
use gdbind::prelude::*;
use gdbind::runtime::classes::hashes;
use gdbind::runtime::{ClassRecord, extension, testing};

gdbind::entry!(scenario_entry);

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

#[gdclass(parent = Resource)]
struct Sphere {
    #[export]
    #[init(default = 0.5)]
    radius: f64,

    #[export(hint = PROPERTY_HINT_RANGE, hint_string = "0,1,0.01")]
    #[init(default = 1.0)]
    opacity: f64,
}

#[gdclass(parent = Node3D)]
struct MyNode {
    #[base]
    base: Base<MyNode>,

    #[export]
    #[init(default = 2.0)]
    speed: f64,

    #[export(read_only)]
    ticks: i64,

    notifications: Vec<i32>,
}

#[gdclass_impl]
impl MyNode {
    #[gdvirtual]
    fn _physics_process(&mut self, _delta: f64) {
        self.ticks += 1;
        if self.ticks % 5 == 0 {
            let _ = self.ticked(self.ticks);
        }
    }

    /// Every fifth physics frame.
    #[signal]
    fn ticked(&self, count: i64);

    #[notification]
    fn on_notification(&mut self, what: i32) {
        self.notifications.push(what);
    }

    #[display]
    fn describe(&self) -> String {
        format!("MyNode({})", self.ticks)
    }

    fn distance(&self) -> f64 {
        self.speed * self.ticks as f64
    }
}

#[gdclass(parent = Node, level = Servers, is_abstract)]
struct Waypoint;

// ---------------------------------------------------------------------------
// Extension classes
// ---------------------------------------------------------------------------

#[test]
fn exported_default_reads_back_and_releases_once() {
    let _engine = testing::session();
    extension::register::<Sphere>().unwrap();

    let sphere = Gd::<Sphere>::new();
    let id = sphere.instance_id();
    assert_eq!(sphere.get("radius").unwrap().to::<f64>(), Ok(0.5));
    assert_eq!(sphere.bind(|s| s.opacity).unwrap(), 1.0);

    sphere.set("radius", &2.0f64.to_variant()).unwrap();
    assert_eq!(sphere.bind(|s| s.radius).unwrap(), 2.0);

    drop(sphere);
    assert_eq!(testing::times_destroyed(id), 1);
    assert_eq!(testing::leaked_objects(), 0);
}

#[test]
fn exported_fields_become_engine_properties() {
    let _engine = testing::session();
    extension::register::<Sphere>().unwrap();
    extension::register::<MyNode>().unwrap();

    let mut sphere = testing::class_properties("Sphere");
    sphere.sort();
    assert_eq!(sphere, ["opacity", "radius"]);

    let mut node = testing::class_properties("MyNode");
    node.sort();
    assert_eq!(node, ["speed", "ticks"]);
    assert_eq!(testing::class_signals("MyNode"), ["ticked"]);
}

#[test]
fn physics_virtual_counts_until_unregistered() {
    let _engine = testing::session();
    extension::register::<MyNode>().unwrap();
    let node = Gd::<MyNode>::new();

    for _ in 0..10 {
        assert!(testing::physics_tick(node.object_ptr(), 1.0 / 60.0));
    }
    assert_eq!(node.bind(|n| n.ticks).unwrap(), 10);
    assert_eq!(node.bind(|n| n.distance()).unwrap(), 20.0);

    extension::unregister::<MyNode>().unwrap();
    testing::physics_tick(node.object_ptr(), 1.0 / 60.0);
    assert_eq!(node.bind(|n| n.ticks).unwrap(), 10);
    node.free();
}

#[test]
fn signal_emitter_reaches_connected_callables() {
    let _engine = testing::session();
    extension::register::<MyNode>().unwrap();
    let node = Gd::<MyNode>::new();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = Callable::from_fn(move |args| {
        if let Some(count) = args.first().and_then(|v| v.to::<i64>().ok()) {
            sink.lock().unwrap().push(count);
        }
        Variant::nil()
    });
    node.connect("ticked", &listener, ConnectMode::Immediate).unwrap();

    for _ in 0..12 {
        testing::physics_tick(node.object_ptr(), 0.1);
    }
    assert_eq!(*seen.lock().unwrap(), [5, 10]);

    node.bind(|n| n.ticked(99)).unwrap().unwrap();
    assert_eq!(seen.lock().unwrap().last(), Some(&99));
    node.free();
}

#[test]
fn notification_and_display_hooks() {
    let _engine = testing::session();
    extension::register::<MyNode>().unwrap();
    let node = Gd::<MyNode>::new();

    node.notify(gdbind::ffi::NOTIFICATION_READY).unwrap();
    testing::physics_tick(node.object_ptr(), 0.5);
    assert_eq!(
        node.bind(|n| n.notifications.clone()).unwrap(),
        [gdbind::ffi::NOTIFICATION_READY]
    );
    assert_eq!(node.to_variant().to_string(), "MyNode(1)");
    node.free();
}

#[test]
fn read_only_property_rejects_writes_from_the_engine() {
    let _engine = testing::session();
    extension::register::<MyNode>().unwrap();
    let node = Gd::<MyNode>::new();

    node.set("speed", &3.0f64.to_variant()).unwrap();
    assert_eq!(node.get("speed").unwrap().to::<f64>(), Ok(3.0));

    let _ = node.set("ticks", &7i64.to_variant());
    assert_eq!(node.bind(|n| n.ticks).unwrap(), 0);
    node.free();
}

#[test]
fn classes_come_up_and_down_with_their_level() {
    let _engine = testing::session();
    assert_eq!(extension::register_level(InitializationLevel::Core), 0);
    assert_eq!(extension::register_level(InitializationLevel::Servers), 1);
    assert!(testing::is_class_registered("Waypoint"));
    assert!(testing::instantiate("Waypoint").is_null());

    assert_eq!(extension::register_level(InitializationLevel::Scene), 2);
    assert!(extension::is_registered::<Sphere>());
    assert!(extension::is_registered::<MyNode>());

    assert_eq!(extension::unregister_level(InitializationLevel::Scene), 2);
    assert_eq!(extension::unregister_level(InitializationLevel::Servers), 1);
    assert!(!testing::is_class_registered("MyNode"));
    assert!(!testing::is_class_registered("Waypoint"));
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[test]
fn entry_point_fills_initialization() {
    let _engine = testing::session();
    let mut init = MaybeUninit::<Initialization>::uninit();
    let ok = unsafe { scenario_entry(testing::interface(), testing::library(), init.as_mut_ptr()) };
    assert!(ok);

    let init = unsafe { init.assume_init() };
    assert_eq!(init.minimum_initialization_level, InitializationLevel::Scene);
    let (Some(up), Some(down)) = (init.initialize, init.deinitialize) else {
        panic!("entry point left the callbacks empty");
    };

    // The engine only drives levels from the library's minimum upward.
    let levels = [InitializationLevel::Scene, InitializationLevel::Editor];
    unsafe {
        for level in levels {
            up(init.userdata, level);
        }
    }
    assert!(testing::is_class_registered("Sphere"));
    assert!(testing::is_class_registered("MyNode"));
    assert!(testing::is_class_registered("Waypoint"));

    unsafe {
        for level in levels.into_iter().rev() {
            down(init.userdata, level);
        }
    }
    assert!(!testing::is_class_registered("Sphere"));
    assert!(!testing::is_class_registered("Waypoint"));
    assert!(
        testing::take_logs()
            .iter()
            .any(|(_, text)| text.contains("Scene down"))
    );
}

#[test]
fn entry_point_refuses_incompatible_interface() {
    let _engine = testing::session();
    let older = InterfaceVersion {
        major: INTERFACE_VERSION.major,
        minor: INTERFACE_VERSION.minor - 1,
        patch: 0,
    };
    let mut init = MaybeUninit::<Initialization>::uninit();
    let ok = unsafe {
        scenario_entry(
            testing::interface_with_version(older),
            testing::library(),
            init.as_mut_ptr(),
        )
    };
    assert!(!ok);

    let ok = unsafe {
        scenario_entry(std::ptr::null(), testing::library(), init.as_mut_ptr())
    };
    assert!(!ok);

    let ok = unsafe {
        scenario_entry(testing::interface(), testing::library(), std::ptr::null_mut())
    };
    assert!(!ok);
}

// ---------------------------------------------------------------------------
// Engine classes and values
// ---------------------------------------------------------------------------

#[test]
fn bounding_rect_of_a_triangle() {
    let _engine = testing::session();
    let points: Array<Vector2> = [Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0)]
        .into_iter()
        .collect();
    let rect = Geometry2D::singleton().unwrap().bounding_rect(&points).unwrap();
    assert_eq!(rect, Rect2::new(Vector2::ZERO, Vector2::ONE));
}

#[test]
fn nested_dictionary_survives_object_metadata() {
    let _engine = testing::session();
    let mut dict = Dictionary::new();
    dict.set("a", 1i64);
    dict.set("b", varray![true, false]);

    let holder = Gd::<Object>::new();
    holder.set_meta("payload", &dict.to_variant()).unwrap();
    let back: Dictionary = holder.get_meta("payload").unwrap().to().unwrap();

    assert_eq!(back, dict);
    assert_eq!(back.get_as::<i64>("a"), Ok(1));
    let flags: Array<Variant> = back.get_as("b").unwrap();
    assert_eq!(flags.len(), 2);
    assert_eq!(flags.get(0).map(|v| v.to::<bool>()), Some(Ok(true)));
    assert_eq!(flags.get(1).map(|v| v.to::<bool>()), Some(Ok(false)));
    holder.free();
}

#[test]
fn static_constructor_result_is_released() {
    let _engine = testing::session();
    let image = Image::create_empty(8, 8, false, ImageFormat::Rgba8).unwrap();
    assert_eq!(image.get_width(), Ok(8));
    drop(image);
    assert_eq!(testing::leaked_objects(), 0);
}

#[test]
fn string_does_not_decode_as_int() {
    let _engine = testing::session();
    let text = "forty-two".to_variant();
    assert_eq!(
        text.to::<i64>(),
        Err(BindError::TypeMismatch {
            expected: "int".into(),
            actual: "String".into(),
        })
    );
}

#[test]
fn values_round_trip_through_variant() {
    let _engine = testing::session();
    assert_eq!(42i64.to_variant().to::<i64>(), Ok(42));
    assert_eq!(true.to_variant().to::<bool>(), Ok(true));
    assert_eq!(0.25f64.to_variant().to::<f64>(), Ok(0.25));
    assert_eq!("héllo".to_variant().to::<String>().as_deref(), Ok("héllo"));
    let v = Vector3::new(1.0, -2.0, 3.5);
    assert_eq!(v.to_variant().to::<Vector3>(), Ok(v));
    let c = Color::rgba(0.1, 0.2, 0.3, 0.5);
    assert_eq!(c.to_variant().to::<Color>(), Ok(c));
}

#[test]
fn dropped_values_leave_no_engine_payloads() {
    let _engine = testing::session();
    let baseline = testing::live_builtins();
    {
        let text = GString::from("scratch");
        let copy = text.clone();
        let mut list = varray![1i64, "two", 3.0f64];
        list.push(&copy.to_variant());
        let mut dict = Dictionary::new();
        dict.set("list", list.clone());
        assert!(testing::live_builtins() > baseline);
    }
    assert_eq!(testing::live_builtins(), baseline);
}

#[test]
fn ancestor_methods_agree_through_upcasts() {
    let _engine = testing::session();
    let node = Gd::<Node3D>::new();
    node.set_name("Probe").unwrap();

    let as_node: Gd<Node> = node.clone().upcast();
    assert_eq!(as_node.get_name(), node.get_name());
    assert_eq!(node.clone().upcast_object().get_class(), as_node.get_class());
    assert_eq!(as_node.instance_id(), node.instance_id());
    node.free();
}

#[test]
fn method_binds_resolve_once() {
    let _engine = testing::session();
    let node = Gd::<Node>::new();
    node.get_name().unwrap();
    let lookups = testing::method_bind_lookups();
    for _ in 0..3 {
        node.get_name().unwrap();
    }
    assert_eq!(testing::method_bind_lookups(), lookups);

    let record: &'static ClassRecord = <Node as EngineClass>::class_record();
    let first = record.method("get_name", hashes::NODE_GET_NAME).unwrap();
    let second = record.method("get_name", hashes::NODE_GET_NAME).unwrap();
    assert_eq!(first, second);
    node.free();
}
