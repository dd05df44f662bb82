// Math value kinds. Vectors, quaternions and projections are glam types with
// the engine's f32 layout; the rest are plain repr(C) structs.

use glam::{IVec2, IVec3, IVec4, Mat4, Quat, Vec2, Vec3, Vec4};

use crate::call_frame::AbiValue;

pub type Vector2 = Vec2;
pub type Vector2i = IVec2;
pub type Vector3 = Vec3;
pub type Vector3i = IVec3;
pub type Vector4 = Vec4;
pub type Vector4i = IVec4;
pub type Quaternion = Quat;
/// Four column vectors, like the engine's `Projection`.
pub type Projection = Mat4;

// ---------------------------------------------------------------------------
// Rect2 / Rect2i
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect2 {
    pub position: Vector2,
    pub size: Vector2,
}

impl Rect2 {
    pub const fn new(position: Vector2, size: Vector2) -> Self {
        Rect2 { position, size }
    }

    /// Smallest rect containing every point. Empty input gives the zero rect.
    pub fn from_points(points: impl IntoIterator<Item = Vector2>) -> Self {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return Rect2::default();
        };
        iter.fold(Rect2::new(first, Vector2::ZERO), Rect2::expand)
    }

    pub fn end(&self) -> Vector2 {
        self.position + self.size
    }

    pub fn expand(self, point: Vector2) -> Self {
        let begin = self.position.min(point);
        let end = self.end().max(point);
        Rect2::new(begin, end - begin)
    }

    pub fn has_point(&self, point: Vector2) -> bool {
        point.cmpge(self.position).all() && point.cmplt(self.end()).all()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect2i {
    pub position: Vector2i,
    pub size: Vector2i,
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

/// Two basis columns and an origin.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform2D {
    pub x: Vector2,
    pub y: Vector2,
    pub origin: Vector2,
}

impl Transform2D {
    pub const IDENTITY: Transform2D = Transform2D {
        x: Vec2::X,
        y: Vec2::Y,
        origin: Vec2::ZERO,
    };

    pub fn xform(&self, v: Vector2) -> Vector2 {
        self.x * v.x + self.y * v.y + self.origin
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Row-major 3x3, as the engine stores it.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Basis {
    pub rows: [Vector3; 3],
}

impl Basis {
    pub const IDENTITY: Basis = Basis {
        rows: [Vec3::X, Vec3::Y, Vec3::Z],
    };

    pub fn xform(&self, v: Vector3) -> Vector3 {
        Vec3::new(self.rows[0].dot(v), self.rows[1].dot(v), self.rows[2].dot(v))
    }
}

impl Default for Basis {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Transform3D {
    pub basis: Basis,
    pub origin: Vector3,
}

impl Transform3D {
    pub const IDENTITY: Transform3D = Transform3D {
        basis: Basis::IDENTITY,
        origin: Vec3::ZERO,
    };

    pub fn from_translation(origin: Vector3) -> Self {
        Transform3D {
            basis: Basis::IDENTITY,
            origin,
        }
    }

    pub fn xform(&self, v: Vector3) -> Vector3 {
        self.basis.xform(v) + self.origin
    }
}

// ---------------------------------------------------------------------------
// Plane / AABB / Color / RID
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Plane {
    pub normal: Vector3,
    pub d: f32,
}

impl Plane {
    pub fn distance_to(&self, point: Vector3) -> f32 {
        self.normal.dot(point) - self.d
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub position: Vector3,
    pub size: Vector3,
}

impl Aabb {
    pub fn end(&self) -> Vector3 {
        self.position + self.size
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Color { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Color { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::rgba(0.0, 0.0, 0.0, 0.0)
    }
}

/// Server-side resource id. Zero is invalid.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid(pub u64);

impl Rid {
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

// ---------------------------------------------------------------------------
// ABI and Variant impls
// ---------------------------------------------------------------------------

unsafe impl AbiValue for Vec2 {}
unsafe impl AbiValue for IVec2 {}
unsafe impl AbiValue for Vec3 {}
unsafe impl AbiValue for IVec3 {}
unsafe impl AbiValue for Vec4 {}
unsafe impl AbiValue for IVec4 {}
unsafe impl AbiValue for Quat {}
unsafe impl AbiValue for Mat4 {}
unsafe impl AbiValue for Rect2 {}
unsafe impl AbiValue for Rect2i {}
unsafe impl AbiValue for Transform2D {}
unsafe impl AbiValue for Basis {}
unsafe impl AbiValue for Transform3D {}
unsafe impl AbiValue for Plane {}
unsafe impl AbiValue for Aabb {}
unsafe impl AbiValue for Color {}
unsafe impl AbiValue for Rid {}

plain_values!(
    Vec2 => Vector2,
    IVec2 => Vector2i,
    Rect2 => Rect2,
    Rect2i => Rect2i,
    Vec3 => Vector3,
    IVec3 => Vector3i,
    Transform2D => Transform2D,
    Vec4 => Vector4,
    IVec4 => Vector4i,
    Plane => Plane,
    Quat => Quaternion,
    Aabb => Aabb,
    Basis => Basis,
    Transform3D => Transform3D,
    Mat4 => Projection,
    Color => Color,
    Rid => Rid,
);

const _: () = assert!(std::mem::size_of::<Rect2>() == 16);
const _: () = assert!(std::mem::size_of::<Transform2D>() == 24);
const _: () = assert!(std::mem::size_of::<Basis>() == 36);
const _: () = assert!(std::mem::size_of::<Transform3D>() == 48);
const _: () = assert!(std::mem::size_of::<Aabb>() == 24);
const _: () = assert!(std::mem::size_of::<Color>() == 16);
const _: () = assert!(std::mem::size_of::<Projection>() == 64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::variant::ToVariant;

    #[test]
    fn rect_from_points_is_the_bounding_box() {
        let r = Rect2::from_points([Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)]);
        assert_eq!(r, Rect2::new(Vec2::ZERO, Vec2::ONE));
        assert_eq!(Rect2::from_points([]), Rect2::default());
        assert!(r.has_point(Vec2::new(0.5, 0.5)));
        assert!(!r.has_point(Vec2::new(1.0, 0.5)));
    }

    #[test]
    fn transforms_apply_basis_then_origin() {
        let t = Transform3D::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(t.xform(Vec3::X), Vec3::new(2.0, 2.0, 3.0));
        assert_eq!(Transform2D::IDENTITY.xform(Vec2::new(4.0, 5.0)), Vec2::new(4.0, 5.0));
    }

    #[test]
    fn math_values_keep_their_tag_and_bits() {
        let _engine = testing::session();
        let color = Color::rgb(0.25, 0.5, 0.75);
        let v = color.to_variant();
        assert_eq!(v.get_type(), gdbind_ffi::VariantType::Color);
        assert_eq!(v.to::<Color>(), Ok(color));

        let t = Transform3D::from_translation(Vec3::new(7.0, 8.0, 9.0));
        assert_eq!(t.to_variant().to::<Transform3D>(), Ok(t));
        assert!(t.to_variant().to::<Basis>().is_err());
    }
}
