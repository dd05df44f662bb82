// Engine reflection flag constants.
//
// Mirrors PropertyHint, PropertyUsageFlags, MethodFlags, Object::ConnectFlags
// and the core Error enum as published in the engine's extension API dump.

// ---------------------------------------------------------------------------
// PropertyHint (PROPERTY_HINT_*): u32
// ---------------------------------------------------------------------------

/// No hint for the edited property.
pub const PROPERTY_HINT_NONE: u32 = 0;
/// Numeric range, hint string `"min,max[,step]"`.
pub const PROPERTY_HINT_RANGE: u32 = 1;
/// Integer or string enum, hint string `"A,B,C"`.
pub const PROPERTY_HINT_ENUM: u32 = 2;
/// String that suggests values but accepts anything.
pub const PROPERTY_HINT_ENUM_SUGGESTION: u32 = 3;
/// Float edited as an exponential easing curve.
pub const PROPERTY_HINT_EXP_EASING: u32 = 4;
/// Vector components linked in the inspector.
pub const PROPERTY_HINT_LINK: u32 = 5;
/// Integer bit flags, hint string `"A,B,C"`.
pub const PROPERTY_HINT_FLAGS: u32 = 6;
pub const PROPERTY_HINT_LAYERS_2D_RENDER: u32 = 7;
pub const PROPERTY_HINT_LAYERS_2D_PHYSICS: u32 = 8;
pub const PROPERTY_HINT_LAYERS_2D_NAVIGATION: u32 = 9;
pub const PROPERTY_HINT_LAYERS_3D_RENDER: u32 = 10;
pub const PROPERTY_HINT_LAYERS_3D_PHYSICS: u32 = 11;
pub const PROPERTY_HINT_LAYERS_3D_NAVIGATION: u32 = 12;
/// Path to a file inside the project.
pub const PROPERTY_HINT_FILE: u32 = 13;
/// Path to a directory inside the project.
pub const PROPERTY_HINT_DIR: u32 = 14;
pub const PROPERTY_HINT_GLOBAL_FILE: u32 = 15;
pub const PROPERTY_HINT_GLOBAL_DIR: u32 = 16;
/// Object property restricted to a resource class, hint string is the class name.
pub const PROPERTY_HINT_RESOURCE_TYPE: u32 = 17;
pub const PROPERTY_HINT_MULTILINE_TEXT: u32 = 18;
pub const PROPERTY_HINT_EXPRESSION: u32 = 19;
pub const PROPERTY_HINT_PLACEHOLDER_TEXT: u32 = 20;
pub const PROPERTY_HINT_COLOR_NO_ALPHA: u32 = 21;

// ---------------------------------------------------------------------------
// PropertyUsageFlags (PROPERTY_USAGE_*): u32
// ---------------------------------------------------------------------------

pub const PROPERTY_USAGE_NONE: u32 = 0;
/// Serialized when the owner is saved.
pub const PROPERTY_USAGE_STORAGE: u32 = 1 << 1;
/// Shown in the inspector.
pub const PROPERTY_USAGE_EDITOR: u32 = 1 << 2;
pub const PROPERTY_USAGE_INTERNAL: u32 = 1 << 3;
pub const PROPERTY_USAGE_CHECKABLE: u32 = 1 << 4;
pub const PROPERTY_USAGE_CHECKED: u32 = 1 << 5;
/// Starts an inspector group; the property itself holds no value.
pub const PROPERTY_USAGE_GROUP: u32 = 1 << 6;
pub const PROPERTY_USAGE_CATEGORY: u32 = 1 << 7;
pub const PROPERTY_USAGE_SUBGROUP: u32 = 1 << 8;
pub const PROPERTY_USAGE_CLASS_IS_BITFIELD: u32 = 1 << 9;
pub const PROPERTY_USAGE_NO_INSTANCE_STATE: u32 = 1 << 10;
pub const PROPERTY_USAGE_RESTART_IF_CHANGED: u32 = 1 << 11;
pub const PROPERTY_USAGE_SCRIPT_VARIABLE: u32 = 1 << 12;
pub const PROPERTY_USAGE_STORE_IF_NULL: u32 = 1 << 13;
/// Storage + editor, the usage given to plain exported properties.
pub const PROPERTY_USAGE_DEFAULT: u32 = PROPERTY_USAGE_STORAGE | PROPERTY_USAGE_EDITOR;

// ---------------------------------------------------------------------------
// MethodFlags (METHOD_FLAG_*): u32
// ---------------------------------------------------------------------------

pub const METHOD_FLAG_NORMAL: u32 = 1;
pub const METHOD_FLAG_EDITOR: u32 = 1 << 1;
pub const METHOD_FLAG_CONST: u32 = 1 << 2;
/// Method can be overridden by an extension class.
pub const METHOD_FLAG_VIRTUAL: u32 = 1 << 3;
pub const METHOD_FLAG_VARARG: u32 = 1 << 4;
pub const METHOD_FLAG_STATIC: u32 = 1 << 5;
pub const METHOD_FLAGS_DEFAULT: u32 = METHOD_FLAG_NORMAL;

// ---------------------------------------------------------------------------
// Object::ConnectFlags (CONNECT_*): u32
// ---------------------------------------------------------------------------

/// Delivery goes through the engine's deferred-call queue (end of frame).
pub const CONNECT_DEFERRED: u32 = 1;
pub const CONNECT_PERSIST: u32 = 1 << 1;
/// Disconnect after the first emission.
pub const CONNECT_ONE_SHOT: u32 = 1 << 2;
pub const CONNECT_REFERENCE_COUNTED: u32 = 1 << 3;

// ---------------------------------------------------------------------------
// Object / Node notifications used by the runtime
// ---------------------------------------------------------------------------

pub const NOTIFICATION_POSTINITIALIZE: i32 = 0;
pub const NOTIFICATION_PREDELETE: i32 = 1;
pub const NOTIFICATION_READY: i32 = 13;
pub const NOTIFICATION_PHYSICS_PROCESS: i32 = 16;

// ---------------------------------------------------------------------------
// Error (global scope): i64 on the wire
// ---------------------------------------------------------------------------

pub const OK: i64 = 0;
pub const FAILED: i64 = 1;
pub const ERR_UNAVAILABLE: i64 = 2;
pub const ERR_UNCONFIGURED: i64 = 3;
pub const ERR_UNAUTHORIZED: i64 = 4;
pub const ERR_PARAMETER_RANGE_ERROR: i64 = 5;
pub const ERR_OUT_OF_MEMORY: i64 = 6;
pub const ERR_FILE_NOT_FOUND: i64 = 7;
pub const ERR_INVALID_DATA: i64 = 30;
pub const ERR_INVALID_PARAMETER: i64 = 31;
pub const ERR_ALREADY_EXISTS: i64 = 32;
pub const ERR_DOES_NOT_EXIST: i64 = 33;

// ---------------------------------------------------------------------------
// Log levels for the logging sub-table
// ---------------------------------------------------------------------------

pub const LOG_INFO: u8 = 0;
pub const LOG_WARNING: u8 = 1;
pub const LOG_ERROR: u8 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_usage_is_storage_and_editor() {
        assert_eq!(PROPERTY_USAGE_DEFAULT, 6);
        assert_eq!(PROPERTY_USAGE_DEFAULT & PROPERTY_USAGE_GROUP, 0);
    }

    #[test]
    fn method_flags_are_distinct_bits() {
        let all = [
            METHOD_FLAG_NORMAL,
            METHOD_FLAG_EDITOR,
            METHOD_FLAG_CONST,
            METHOD_FLAG_VIRTUAL,
            METHOD_FLAG_VARARG,
            METHOD_FLAG_STATIC,
        ];
        let mut seen = 0u32;
        for f in all {
            assert_eq!(f.count_ones(), 1);
            assert_eq!(seen & f, 0);
            seen |= f;
        }
    }
}
