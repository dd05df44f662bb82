// Prelude: one-import access to the most commonly used gdbind types.
//
// Usage: `use gdbind::prelude::*;`

// Core runtime types
pub use gdbind_runtime::{
    Base, BindError, BindResult, ClassBuilder, EngineClass, ExtensionClass, FromVariant, Gd,
    HasParent, ToVariant, Variant, VariantKind, VariantType, glog, LOG_ERROR, LOG_INFO,
    LOG_WARNING,
};

// Builtin values
pub use gdbind_runtime::builtin::{
    Aabb, Array, Basis, Callable, Color, Dictionary, GString, NodePath, PackedByteArray,
    PackedColorArray, PackedFloat32Array, PackedFloat64Array, PackedInt32Array, PackedInt64Array,
    PackedStringArray, PackedVector2Array, PackedVector3Array, PackedVector4Array, Plane,
    Quaternion, Rect2, Rect2i, Signal, StringName, Transform2D, Transform3D, Vector2, Vector2i,
    Vector3, Vector3i, Vector4, Vector4i,
};
pub use gdbind_runtime::varray;

// Hand-declared engine classes
pub use gdbind_runtime::classes::{
    CapsuleShape3D, ConnectMode, Geometry2D, Image, ImageFormat, Node, Node3D, Object, RefCounted,
    Resource, Shape3D,
};

// Proc macros
pub use gdbind_macros::{gdclass, gdclass_impl};
