// Variant tags and operators. Order and values are fixed by the engine ABI.

/// Tag of the engine's universal value type.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum VariantType {
    #[default]
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

impl VariantType {
    pub const COUNT: usize = 39;

    const ALL: [VariantType; Self::COUNT] = [
        VariantType::Nil,
        VariantType::Bool,
        VariantType::Int,
        VariantType::Float,
        VariantType::String,
        VariantType::Vector2,
        VariantType::Vector2i,
        VariantType::Rect2,
        VariantType::Rect2i,
        VariantType::Vector3,
        VariantType::Vector3i,
        VariantType::Transform2D,
        VariantType::Vector4,
        VariantType::Vector4i,
        VariantType::Plane,
        VariantType::Quaternion,
        VariantType::Aabb,
        VariantType::Basis,
        VariantType::Transform3D,
        VariantType::Projection,
        VariantType::Color,
        VariantType::StringName,
        VariantType::NodePath,
        VariantType::Rid,
        VariantType::Object,
        VariantType::Callable,
        VariantType::Signal,
        VariantType::Dictionary,
        VariantType::Array,
        VariantType::PackedByteArray,
        VariantType::PackedInt32Array,
        VariantType::PackedInt64Array,
        VariantType::PackedFloat32Array,
        VariantType::PackedFloat64Array,
        VariantType::PackedStringArray,
        VariantType::PackedVector2Array,
        VariantType::PackedVector3Array,
        VariantType::PackedColorArray,
        VariantType::PackedVector4Array,
    ];

    /// Decode a raw tag. Unknown tags yield `None`.
    #[inline]
    pub fn from_u32(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn all() -> impl Iterator<Item = VariantType> {
        Self::ALL.into_iter()
    }

    /// True for the ten `Packed*Array` kinds.
    #[inline]
    pub fn is_packed_array(self) -> bool {
        (self as u32) >= VariantType::PackedByteArray as u32
    }

    /// Kinds whose payload is an engine allocation with a destructor.
    pub fn has_destructor(self) -> bool {
        matches!(
            self,
            VariantType::String
                | VariantType::StringName
                | VariantType::NodePath
                | VariantType::Callable
                | VariantType::Signal
                | VariantType::Dictionary
                | VariantType::Array
        ) || self.is_packed_array()
    }

    /// Width in machine words of the builtin token (0 for inline kinds).
    pub fn token_words(self) -> usize {
        match self {
            VariantType::String
            | VariantType::StringName
            | VariantType::NodePath
            | VariantType::Dictionary
            | VariantType::Array
            | VariantType::Object => 1,
            VariantType::Callable | VariantType::Signal => 2,
            t if t.is_packed_array() => 2,
            _ => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VariantType::Nil => "Nil",
            VariantType::Bool => "bool",
            VariantType::Int => "int",
            VariantType::Float => "float",
            VariantType::String => "String",
            VariantType::Vector2 => "Vector2",
            VariantType::Vector2i => "Vector2i",
            VariantType::Rect2 => "Rect2",
            VariantType::Rect2i => "Rect2i",
            VariantType::Vector3 => "Vector3",
            VariantType::Vector3i => "Vector3i",
            VariantType::Transform2D => "Transform2D",
            VariantType::Vector4 => "Vector4",
            VariantType::Vector4i => "Vector4i",
            VariantType::Plane => "Plane",
            VariantType::Quaternion => "Quaternion",
            VariantType::Aabb => "AABB",
            VariantType::Basis => "Basis",
            VariantType::Transform3D => "Transform3D",
            VariantType::Projection => "Projection",
            VariantType::Color => "Color",
            VariantType::StringName => "StringName",
            VariantType::NodePath => "NodePath",
            VariantType::Rid => "RID",
            VariantType::Object => "Object",
            VariantType::Callable => "Callable",
            VariantType::Signal => "Signal",
            VariantType::Dictionary => "Dictionary",
            VariantType::Array => "Array",
            VariantType::PackedByteArray => "PackedByteArray",
            VariantType::PackedInt32Array => "PackedInt32Array",
            VariantType::PackedInt64Array => "PackedInt64Array",
            VariantType::PackedFloat32Array => "PackedFloat32Array",
            VariantType::PackedFloat64Array => "PackedFloat64Array",
            VariantType::PackedStringArray => "PackedStringArray",
            VariantType::PackedVector2Array => "PackedVector2Array",
            VariantType::PackedVector3Array => "PackedVector3Array",
            VariantType::PackedColorArray => "PackedColorArray",
            VariantType::PackedVector4Array => "PackedVector4Array",
        }
    }
}

/// Operators accepted by `variant.evaluate` and the ptr operator evaluators.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariantOperator {
    Equal = 0,
    NotEqual = 1,
    Less = 2,
    LessEqual = 3,
    Greater = 4,
    GreaterEqual = 5,
    Add = 6,
    Subtract = 7,
    Multiply = 8,
    Divide = 9,
    Negate = 10,
    Positive = 11,
    Module = 12,
    Power = 13,
    ShiftLeft = 14,
    ShiftRight = 15,
    BitAnd = 16,
    BitOr = 17,
    BitXor = 18,
    BitNegate = 19,
    And = 20,
    Or = 21,
    Xor = 22,
    Not = 23,
    In = 24,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_u32() {
        for ty in VariantType::all() {
            assert_eq!(VariantType::from_u32(ty.as_u32()), Some(ty));
        }
        assert_eq!(VariantType::from_u32(VariantType::COUNT as u32), None);
    }

    #[test]
    fn packed_arrays_are_the_tail_of_the_enum() {
        let packed: Vec<_> = VariantType::all().filter(|t| t.is_packed_array()).collect();
        assert_eq!(packed.len(), 10);
        assert_eq!(packed[0], VariantType::PackedByteArray);
        assert_eq!(packed[9], VariantType::PackedVector4Array);
    }

    #[test]
    fn token_widths_match_engine_layout() {
        assert_eq!(VariantType::String.token_words(), 1);
        assert_eq!(VariantType::Callable.token_words(), 2);
        assert_eq!(VariantType::PackedColorArray.token_words(), 2);
        assert_eq!(VariantType::Vector3.token_words(), 0);
    }
}
