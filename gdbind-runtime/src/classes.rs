// Hand-declared engine classes and their bound methods.
//
// Each class is a marker type with a static ClassRecord; methods live on
// `Gd<Class>` and are inherited through the Deref chain.

use gdbind_ffi::{CONNECT_DEFERRED, ObjectPtr};

use crate::api::api;
use crate::builtin::{
    Array, Callable, GString, PackedVector2Array, Rect2, StringName, Vector2, Vector3,
};
use crate::class::EngineClass;
use crate::error::{BindError, BindResult, check_engine};
use crate::gd::Gd;
use crate::method_bind::{DynamicCall, MethodSpec, ptrcall, ptrcall_static};
use crate::variant::Variant;

/// Declares a marker type, its class record and its parent link.
#[macro_export]
macro_rules! engine_class {
    ($(#[$meta:meta])* $name:ident, $refcount:ident) => {
        $(#[$meta])*
        pub struct $name;

        impl $crate::class::EngineClass for $name {
            const CLASS_NAME: &'static str = stringify!($name);

            fn class_record() -> &'static $crate::class::ClassRecord {
                static RECORD: $crate::class::ClassRecord = $crate::class::ClassRecord::new(
                    stringify!($name),
                    None,
                    $crate::class::Refcount::$refcount,
                );
                &RECORD
            }
        }
    };
    ($(#[$meta:meta])* $name:ident : $parent:ty, $refcount:ident) => {
        $(#[$meta])*
        pub struct $name;

        impl $crate::class::EngineClass for $name {
            const CLASS_NAME: &'static str = stringify!($name);

            fn class_record() -> &'static $crate::class::ClassRecord {
                static RECORD: $crate::class::ClassRecord = $crate::class::ClassRecord::new(
                    stringify!($name),
                    Some(<$parent as $crate::class::EngineClass>::class_record
                        as fn() -> &'static $crate::class::ClassRecord),
                    $crate::class::Refcount::$refcount,
                );
                &RECORD
            }
        }

        impl $crate::class::HasParent for $name {
            type Parent = $parent;
        }
    };
}

engine_class!(
    /// Root of the class tree.
    Object, Dynamic
);
engine_class!(RefCounted: Object, Counted);
engine_class!(Resource: RefCounted, Counted);
engine_class!(Shape3D: Resource, Counted);
engine_class!(CapsuleShape3D: Shape3D, Counted);
engine_class!(Image: Resource, Counted);
engine_class!(Node: Object, Manual);
engine_class!(Node3D: Node, Manual);
engine_class!(
    /// Engine singleton; obtain it with [`Geometry2D::singleton`].
    Geometry2D: Object, Manual
);

/// Method hashes the engine publishes for each signature.
pub mod hashes {
    pub const OBJECT_GET_CLASS: i64 = 201670096;
    pub const OBJECT_IS_CLASS: i64 = 3927539163;
    pub const OBJECT_GET: i64 = 2760726917;
    pub const OBJECT_SET: i64 = 3776071444;
    pub const OBJECT_SET_META: i64 = 3776071444;
    pub const OBJECT_GET_META: i64 = 3990617847;
    pub const OBJECT_HAS_META: i64 = 2619796661;
    pub const OBJECT_CONNECT: i64 = 1518946055;
    pub const OBJECT_IS_CONNECTED: i64 = 768136979;
    pub const OBJECT_EMIT_SIGNAL: i64 = 4047867050;
    pub const OBJECT_CALL: i64 = 3400424181;
    pub const OBJECT_CALL_DEFERRED: i64 = 3400424181;
    pub const OBJECT_NOTIFICATION: i64 = 4023243586;
    pub const REFCOUNTED_GET_REFERENCE_COUNT: i64 = 3905245786;
    pub const CAPSULE_SHAPE_3D_GET_RADIUS: i64 = 1740695150;
    pub const CAPSULE_SHAPE_3D_SET_RADIUS: i64 = 373806689;
    pub const CAPSULE_SHAPE_3D_GET_HEIGHT: i64 = 1740695150;
    pub const CAPSULE_SHAPE_3D_SET_HEIGHT: i64 = 373806689;
    pub const IMAGE_CREATE_EMPTY: i64 = 986942177;
    pub const IMAGE_GET_WIDTH: i64 = 3905245786;
    pub const IMAGE_GET_HEIGHT: i64 = 3905245786;
    pub const NODE_GET_NAME: i64 = 2002593661;
    pub const NODE_SET_NAME: i64 = 3304788590;
    pub const NODE_QUEUE_FREE: i64 = 3218959716;
    pub const NODE3D_GET_POSITION: i64 = 3360562783;
    pub const NODE3D_SET_POSITION: i64 = 3460891852;
    pub const GEOMETRY_2D_BOUNDING_RECT: i64 = 2217498227;
    pub const GEOMETRY_2D_IS_POINT_IN_POLYGON: i64 = 738277916;
}

macro_rules! bound {
    ($class:ident :: $method:ident, $hash:ident) => {
        &MethodSpec::new($class::class_record, stringify!($method), hashes::$hash)
    };
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

/// How a signal connection delivers emissions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectMode {
    /// The target runs inside `emit_signal`, on the emitting thread.
    #[default]
    Immediate,
    /// The call is queued and runs when the engine flushes deferred calls.
    Deferred,
}

impl ConnectMode {
    fn flags(self) -> u32 {
        match self {
            ConnectMode::Immediate => 0,
            ConnectMode::Deferred => CONNECT_DEFERRED,
        }
    }
}

impl Gd<Object> {
    /// Engine class name of the instance.
    pub fn get_class(&self) -> BindResult<GString> {
        ptrcall(bound!(Object::get_class, OBJECT_GET_CLASS), self.receiver("get_class")?, ())
    }

    pub fn is_class_named(&self, class: &str) -> BindResult<bool> {
        ptrcall(bound!(Object::is_class, OBJECT_IS_CLASS), self.receiver("is_class")?, (class,))
    }

    /// Property value by name.
    pub fn get(&self, property: &str) -> BindResult<Variant> {
        let name = StringName::from(property);
        ptrcall(bound!(Object::get, OBJECT_GET), self.receiver("get")?, (&name,))
    }

    pub fn set(&self, property: &str, value: &Variant) -> BindResult<()> {
        let name = StringName::from(property);
        ptrcall(bound!(Object::set, OBJECT_SET), self.receiver("set")?, (&name, value))
    }

    pub fn set_meta(&self, key: &str, value: &Variant) -> BindResult<()> {
        let name = StringName::from(key);
        ptrcall(bound!(Object::set_meta, OBJECT_SET_META), self.receiver("set_meta")?, (&name, value))
    }

    /// Metadata for `key`, Nil when absent.
    pub fn get_meta(&self, key: &str) -> BindResult<Variant> {
        let name = StringName::from(key);
        let default = Variant::nil();
        ptrcall(
            bound!(Object::get_meta, OBJECT_GET_META),
            self.receiver("get_meta")?,
            (&name, &default),
        )
    }

    pub fn has_meta(&self, key: &str) -> BindResult<bool> {
        let name = StringName::from(key);
        ptrcall(bound!(Object::has_meta, OBJECT_HAS_META), self.receiver("has_meta")?, (&name,))
    }

    /// Connect `callable` to `signal`. Deferred connections run from the
    /// engine's deferred-call queue instead of inside the emit.
    pub fn connect(&self, signal: &str, callable: &Callable, mode: ConnectMode) -> BindResult<()> {
        let name = StringName::from(signal);
        let code: i64 = ptrcall(
            bound!(Object::connect, OBJECT_CONNECT),
            self.receiver("connect")?,
            (&name, callable, mode.flags()),
        )?;
        check_engine(code)
    }

    pub fn is_connected(&self, signal: &str, callable: &Callable) -> BindResult<bool> {
        let name = StringName::from(signal);
        ptrcall(
            bound!(Object::is_connected, OBJECT_IS_CONNECTED),
            self.receiver("is_connected")?,
            (&name, callable),
        )
    }

    /// Emit synchronously. Every immediate connection has run when this returns.
    pub fn emit_signal(&self, signal: &str, args: &[Variant]) -> BindResult<()> {
        let code = self
            .dynamic("emit_signal", hashes::OBJECT_EMIT_SIGNAL)?
            .arg(&StringName::from(signal))
            .args(args)
            .call()?;
        check_engine(code.to::<i64>()?)
    }

    /// Call a method by name with Variant arguments.
    pub fn call(&self, method: &str, args: &[Variant]) -> BindResult<Variant> {
        self.dynamic("call", hashes::OBJECT_CALL)?
            .arg(&StringName::from(method))
            .args(args)
            .call()
    }

    /// Queue a call for the engine's next deferred flush.
    pub fn call_deferred(&self, method: &str, args: &[Variant]) -> BindResult<()> {
        self.dynamic("call_deferred", hashes::OBJECT_CALL_DEFERRED)?
            .arg(&StringName::from(method))
            .args(args)
            .call()
            .map(drop)
    }

    /// Send a notification through the class hierarchy.
    pub fn notify(&self, what: i32) -> BindResult<()> {
        ptrcall(
            bound!(Object::notification, OBJECT_NOTIFICATION),
            self.receiver("notification")?,
            (what, false),
        )
    }

    fn dynamic(&self, method: &'static str, hash: i64) -> BindResult<DynamicCall> {
        DynamicCall::new(self, Object::class_record(), method, hash)
    }
}

// ---------------------------------------------------------------------------
// RefCounted, Resource, shapes, Image
// ---------------------------------------------------------------------------

impl Gd<RefCounted> {
    pub fn get_reference_count(&self) -> BindResult<i32> {
        ptrcall(
            bound!(RefCounted::get_reference_count, REFCOUNTED_GET_REFERENCE_COUNT),
            self.receiver("get_reference_count")?,
            (),
        )
    }
}

impl Gd<CapsuleShape3D> {
    pub fn get_radius(&self) -> BindResult<f32> {
        ptrcall(
            bound!(CapsuleShape3D::get_radius, CAPSULE_SHAPE_3D_GET_RADIUS),
            self.receiver("get_radius")?,
            (),
        )
    }

    pub fn set_radius(&self, radius: f32) -> BindResult<()> {
        ptrcall(
            bound!(CapsuleShape3D::set_radius, CAPSULE_SHAPE_3D_SET_RADIUS),
            self.receiver("set_radius")?,
            (radius,),
        )
    }

    pub fn get_height(&self) -> BindResult<f32> {
        ptrcall(
            bound!(CapsuleShape3D::get_height, CAPSULE_SHAPE_3D_GET_HEIGHT),
            self.receiver("get_height")?,
            (),
        )
    }

    pub fn set_height(&self, height: f32) -> BindResult<()> {
        ptrcall(
            bound!(CapsuleShape3D::set_height, CAPSULE_SHAPE_3D_SET_HEIGHT),
            self.receiver("set_height")?,
            (height,),
        )
    }
}

/// Pixel formats accepted by [`Image::create_empty`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum ImageFormat {
    L8 = 0,
    La8 = 1,
    R8 = 2,
    Rg8 = 3,
    Rgb8 = 4,
    Rgba8 = 5,
}

impl crate::marshal::PtrArg for ImageFormat {
    fn push_arg(&self, frame: &mut crate::call_frame::CallFrame) {
        frame.arg(*self as i64);
    }
}

impl Image {
    /// A blank image. The caller owns the only reference.
    pub fn create_empty(
        width: i32,
        height: i32,
        use_mipmaps: bool,
        format: ImageFormat,
    ) -> BindResult<Gd<Image>> {
        ptrcall_static(
            &bound!(Image::create_empty, IMAGE_CREATE_EMPTY).transfers(),
            (width, height, use_mipmaps, format),
        )
    }
}

impl Gd<Image> {
    pub fn get_width(&self) -> BindResult<i32> {
        ptrcall(bound!(Image::get_width, IMAGE_GET_WIDTH), self.receiver("get_width")?, ())
    }

    pub fn get_height(&self) -> BindResult<i32> {
        ptrcall(bound!(Image::get_height, IMAGE_GET_HEIGHT), self.receiver("get_height")?, ())
    }
}

// ---------------------------------------------------------------------------
// Node, Node3D
// ---------------------------------------------------------------------------

impl Gd<Node> {
    pub fn get_name(&self) -> BindResult<StringName> {
        ptrcall(bound!(Node::get_name, NODE_GET_NAME), self.receiver("get_name")?, ())
    }

    pub fn set_name(&self, name: &str) -> BindResult<()> {
        let name = StringName::from(name);
        ptrcall(bound!(Node::set_name, NODE_SET_NAME), self.receiver("set_name")?, (&name,))
    }

    /// Destroy the node at the engine's next deferred flush.
    pub fn queue_free(&self) -> BindResult<()> {
        ptrcall(bound!(Node::queue_free, NODE_QUEUE_FREE), self.receiver("queue_free")?, ())
    }
}

impl Gd<Node3D> {
    pub fn get_position(&self) -> BindResult<Vector3> {
        ptrcall(bound!(Node3D::get_position, NODE3D_GET_POSITION), self.receiver("get_position")?, ())
    }

    pub fn set_position(&self, position: Vector3) -> BindResult<()> {
        ptrcall(
            bound!(Node3D::set_position, NODE3D_SET_POSITION),
            self.receiver("set_position")?,
            (position,),
        )
    }
}

// ---------------------------------------------------------------------------
// Geometry2D
// ---------------------------------------------------------------------------

impl Geometry2D {
    pub fn singleton() -> BindResult<Gd<Geometry2D>> {
        let name = StringName::from(Self::CLASS_NAME);
        let token = name.token();
        let object: ObjectPtr = unsafe { ((*api().object).global_get_singleton)(token.as_ptr()) };
        if object.is_null() {
            return Err(BindError::ClassNotFound(Self::CLASS_NAME.to_owned()));
        }
        Ok(unsafe { Gd::from_loaned_ptr(object) })
    }
}

impl Gd<Geometry2D> {
    /// Smallest axis-aligned rectangle containing every point.
    pub fn bounding_rect(&self, points: &Array<Vector2>) -> BindResult<Rect2> {
        ptrcall(
            bound!(Geometry2D::bounding_rect, GEOMETRY_2D_BOUNDING_RECT),
            self.receiver("bounding_rect")?,
            (points,),
        )
    }

    pub fn is_point_in_polygon(&self, point: Vector2, polygon: &PackedVector2Array) -> BindResult<bool> {
        ptrcall(
            bound!(Geometry2D::is_point_in_polygon, GEOMETRY_2D_IS_POINT_IN_POLYGON),
            self.receiver("is_point_in_polygon")?,
            (point, polygon),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::variant::ToVariant;

    #[test]
    fn inherited_methods_resolve_through_deref() {
        let _engine = testing::session();
        let node = Gd::<Node3D>::new();
        node.set_name("Player").unwrap();
        assert_eq!(node.get_name().unwrap().to_string(), "Player");
        assert_eq!(node.get_class().unwrap().to_string(), "Node3D");
        assert!(node.is_class_named("Node").unwrap());
        node.set_position(Vector3::new(0.0, 1.5, 0.0)).unwrap();
        assert_eq!(node.get_position().unwrap().y, 1.5);
        node.free();
    }

    #[test]
    fn capsule_defaults_and_setters() {
        let _engine = testing::session();
        let capsule = Gd::<CapsuleShape3D>::new();
        assert_eq!(capsule.get_radius(), Ok(0.5));
        assert_eq!(capsule.get_height(), Ok(2.0));
        capsule.set_radius(0.25).unwrap();
        assert_eq!(capsule.get_radius(), Ok(0.25));
        assert_eq!(capsule.get_reference_count(), Ok(1));
    }

    #[test]
    fn static_constructor_transfers_ownership() {
        let _engine = testing::session();
        let image = Image::create_empty(4, 2, false, ImageFormat::Rgba8).unwrap();
        assert_eq!(image.get_width(), Ok(4));
        assert_eq!(image.get_height(), Ok(2));
        assert_eq!(image.get_reference_count(), Ok(1));
        drop(image);
        assert_eq!(testing::leaked_objects(), 0);
    }

    #[test]
    fn geometry_singleton_computes_bounds() {
        let _engine = testing::session();
        let geometry = Geometry2D::singleton().unwrap();
        let points: Array<Vector2> =
            [Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0)]
                .into_iter()
                .collect();
        let rect = geometry.bounding_rect(&points).unwrap();
        assert_eq!(rect, Rect2::new(Vector2::ZERO, Vector2::ONE));
        let square = PackedVector2Array::from_slice(&[
            Vector2::new(0.0, 0.0),
            Vector2::new(2.0, 0.0),
            Vector2::new(2.0, 2.0),
            Vector2::new(0.0, 2.0),
        ]);
        assert_eq!(geometry.is_point_in_polygon(Vector2::ONE, &square), Ok(true));
        assert_eq!(geometry.is_point_in_polygon(Vector2::new(3.0, 1.0), &square), Ok(false));
    }

    #[test]
    fn metadata_and_properties() {
        let _engine = testing::session();
        let obj = Gd::<Object>::new();
        assert!(!obj.has_meta("k").unwrap());
        assert!(obj.get_meta("k").unwrap().is_nil());
        obj.set_meta("k", &"v".to_variant()).unwrap();
        assert!(obj.has_meta("k").unwrap());
        assert_eq!(obj.get_meta("k").unwrap().to::<String>().as_deref(), Ok("v"));
        obj.free();

        let node = Gd::<Node>::new();
        node.clone().upcast_object().set("name", &"Renamed".to_variant()).unwrap();
        assert_eq!(node.get_name().unwrap().to_string(), "Renamed");
        node.free();
    }

    #[test]
    fn deferred_connections_wait_for_the_flush() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let _engine = testing::session();
        let obj = Gd::<Object>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let (now, later) = (hits.clone(), hits.clone());
        let immediate = Callable::from_fn(move |_| {
            now.fetch_add(1, Ordering::SeqCst);
            Variant::nil()
        });
        let deferred = Callable::from_fn(move |_| {
            later.fetch_add(10, Ordering::SeqCst);
            Variant::nil()
        });
        obj.connect("changed", &immediate, ConnectMode::Immediate).unwrap();
        obj.connect("changed", &deferred, ConnectMode::Deferred).unwrap();
        assert!(obj.is_connected("changed", &deferred).unwrap());
        obj.emit_signal("changed", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        testing::flush_deferred();
        assert_eq!(hits.load(Ordering::SeqCst), 11);
        obj.free();
    }

    #[test]
    fn queue_free_runs_on_flush() {
        let _engine = testing::session();
        let node = Gd::<Node>::new();
        node.queue_free().unwrap();
        assert!(node.is_instance_valid());
        testing::flush_deferred();
        assert!(!node.is_instance_valid());
    }
}
