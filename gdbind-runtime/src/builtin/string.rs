// The three engine string kinds. They are distinct types; converting
// between them always goes through an explicit engine constructor.

use std::ffi::c_char;
use std::fmt;
use std::hash::{Hash, Hasher};

use gdbind_ffi::{CTOR_FROM_FIRST, CTOR_FROM_SECOND, Opaque, VariantType};

use super::{Pooled, arg};
use crate::api::api;
use crate::error::BindResult;

const LENGTH_HASH: i64 = 3173160232;
const IS_EMPTY_HASH: i64 = 3918633141;

// ---------------------------------------------------------------------------
// GString
// ---------------------------------------------------------------------------

/// Engine `String`: copy-on-write UTF-32 text.
#[derive(Clone)]
pub struct GString(pub(crate) Pooled<1>);

impl GString {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Safety
    /// `token` must be an owned, live String payload.
    pub(crate) unsafe fn from_owned_token(token: Opaque<1>) -> Self {
        GString(unsafe { Pooled::adopt(VariantType::String, token) })
    }

    #[track_caller]
    pub(crate) fn token(&self) -> Opaque<1> {
        self.0.token()
    }

    /// Length in characters, as the engine counts them.
    pub fn len(&self) -> usize {
        self.0.call::<i64>("length", LENGTH_HASH, &[]).unwrap_or(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0.call::<bool>("is_empty", IS_EMPTY_HASH, &[]).unwrap_or(true)
    }

    pub fn to_string_name(&self) -> BindResult<StringName> {
        let token = self.token();
        Pooled::construct(VariantType::StringName, CTOR_FROM_FIRST, &[arg(&token)]).map(StringName)
    }

    pub fn to_node_path(&self) -> BindResult<NodePath> {
        let token = self.token();
        Pooled::construct(VariantType::NodePath, CTOR_FROM_FIRST, &[arg(&token)]).map(NodePath)
    }

    /// UTF-8 copy of the engine text.
    fn utf8(&self) -> String {
        let token = self.token();
        let strings = unsafe { &*api().builtins };
        // A null buffer queries the length.
        let len = unsafe { (strings.string_to_utf8_chars)(token.as_ptr(), std::ptr::null_mut(), 0) };
        if len <= 0 {
            return String::new();
        }
        let mut buf = vec![0u8; len as usize];
        let written = unsafe {
            (strings.string_to_utf8_chars)(token.as_ptr(), buf.as_mut_ptr() as *mut c_char, len)
        };
        buf.truncate(written.clamp(0, len) as usize);
        String::from_utf8(buf).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
    }
}

impl From<&str> for GString {
    fn from(s: &str) -> Self {
        let mut token = Opaque::<1>::ZERO;
        unsafe {
            ((*api().builtins).string_new_with_utf8_chars_and_len)(
                token.as_mut_ptr(),
                s.as_ptr() as *const c_char,
                s.len() as i64,
            );
            GString::from_owned_token(token)
        }
    }
}

impl From<&String> for GString {
    fn from(s: &String) -> Self {
        GString::from(s.as_str())
    }
}

impl fmt::Display for GString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.utf8())
    }
}

impl fmt::Debug for GString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GString({:?})", self.utf8())
    }
}

impl PartialEq for GString {
    fn eq(&self, other: &Self) -> bool {
        self.0.is_same(&other.0) || self.utf8() == other.utf8()
    }
}

impl Eq for GString {}

impl PartialEq<str> for GString {
    fn eq(&self, other: &str) -> bool {
        self.utf8() == other
    }
}

impl PartialEq<&str> for GString {
    fn eq(&self, other: &&str) -> bool {
        self.utf8() == *other
    }
}

// ---------------------------------------------------------------------------
// StringName
// ---------------------------------------------------------------------------

/// Engine `StringName`: interned, so equal names share one token.
#[derive(Clone)]
pub struct StringName(pub(crate) Pooled<1>);

impl StringName {
    #[track_caller]
    pub(crate) fn token(&self) -> Opaque<1> {
        self.0.token()
    }

    /// # Safety
    /// `token` must be an owned, live StringName payload.
    pub(crate) unsafe fn from_owned_token(token: Opaque<1>) -> Self {
        StringName(unsafe { Pooled::adopt(VariantType::StringName, token) })
    }

    pub fn to_gstring(&self) -> BindResult<GString> {
        let token = self.token();
        Pooled::construct(VariantType::String, CTOR_FROM_FIRST, &[arg(&token)]).map(GString)
    }
}

impl From<&str> for StringName {
    fn from(s: &str) -> Self {
        let mut token = Opaque::<1>::ZERO;
        unsafe {
            ((*api().builtins).string_name_new_with_utf8_chars_and_len)(
                token.as_mut_ptr(),
                s.as_ptr() as *const c_char,
                s.len() as i64,
            );
            StringName::from_owned_token(token)
        }
    }
}

impl PartialEq for StringName {
    fn eq(&self, other: &Self) -> bool {
        self.0.is_same(&other.0)
    }
}

impl Eq for StringName {}

impl Hash for StringName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token().hash(state);
    }
}

impl fmt::Display for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_gstring() {
            Ok(s) => fmt::Display::fmt(&s, f),
            Err(_) => f.write_str("<StringName>"),
        }
    }
}

impl fmt::Debug for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&\"{self}\"")
    }
}

// ---------------------------------------------------------------------------
// NodePath
// ---------------------------------------------------------------------------

/// Engine `NodePath`: a pre-parsed path through the scene tree.
#[derive(Clone)]
pub struct NodePath(pub(crate) Pooled<1>);

impl NodePath {
    pub fn is_empty(&self) -> bool {
        self.0.call::<bool>("is_empty", IS_EMPTY_HASH, &[]).unwrap_or(true)
    }

    pub fn to_gstring(&self) -> BindResult<GString> {
        let token = self.0.token();
        Pooled::construct(VariantType::String, CTOR_FROM_SECOND, &[arg(&token)]).map(GString)
    }
}

impl From<&str> for NodePath {
    fn from(s: &str) -> Self {
        GString::from(s)
            .to_node_path()
            .unwrap_or_else(|_| NodePath::default())
    }
}

impl PartialEq for NodePath {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_gstring() {
            Ok(s) => fmt::Display::fmt(&s, f),
            Err(_) => f.write_str("<NodePath>"),
        }
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath(\"{self}\")")
    }
}

pooled_values! {
    GString => String, 1;
    StringName => StringName, 1;
    NodePath => NodePath, 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::variant::ToVariant;

    #[test]
    fn gstring_round_trips_utf8() {
        let _engine = testing::session();
        let s = GString::from("héllo wörld");
        assert_eq!(s.to_string(), "héllo wörld");
        assert_eq!(s.len(), 11);
        assert!(!s.is_empty());
        assert!(GString::new().is_empty());
    }

    #[test]
    fn string_names_are_interned() {
        let _engine = testing::session();
        let a = StringName::from("position");
        let b = StringName::from("position");
        let c = StringName::from("rotation");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "position");
    }

    #[test]
    fn conversions_are_explicit_and_lossless() {
        let _engine = testing::session();
        let s = GString::from("root/child");
        let path = s.to_node_path().unwrap();
        assert_eq!(path.to_gstring().unwrap(), s);
        let name = s.to_string_name().unwrap();
        assert_eq!(name.to_gstring().unwrap().to_string(), "root/child");
    }

    #[test]
    fn string_kinds_keep_distinct_variant_tags() {
        let _engine = testing::session();
        assert_eq!(GString::from("a").to_variant().get_type(), VariantType::String);
        assert_eq!(StringName::from("a").to_variant().get_type(), VariantType::StringName);
        assert_eq!(NodePath::from("a").to_variant().get_type(), VariantType::NodePath);
        let err = StringName::from("a").to_variant().to::<GString>().unwrap_err();
        assert!(matches!(err, crate::error::BindError::TypeMismatch { .. }));
    }

    #[test]
    fn clones_share_and_release() {
        let _engine = testing::session();
        let before = testing::live_builtins();
        {
            let a = GString::from("shared");
            let b = a.clone();
            assert_eq!(a, b);
        }
        assert_eq!(testing::live_builtins(), before);
    }
}
