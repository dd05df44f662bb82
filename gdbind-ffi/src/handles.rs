use std::ffi::c_void;

/// Opaque pointer to an engine object. The host never dereferences it.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectPtr(pub *mut c_void);

impl ObjectPtr {
    pub const NULL: ObjectPtr = ObjectPtr(std::ptr::null_mut());

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Address used as a map key by host-side registries.
    #[inline]
    pub fn to_addr(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn from_addr(addr: usize) -> Self {
        ObjectPtr(addr as *mut c_void)
    }
}

impl Default for ObjectPtr {
    fn default() -> Self {
        ObjectPtr::NULL
    }
}

/// Host-side instance pointer handed to the engine by `object_set_instance`
/// and passed back to every extension-class callback.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClassInstancePtr(pub *mut c_void);

/// Bound engine method, resolved once through the class database.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MethodBindPtr(pub *const c_void);

impl MethodBindPtr {
    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Identifies this library to the engine (passed to the entry point).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LibraryPtr(pub *mut c_void);

/// Pointer to an initialized value of some builtin type.
pub type TypePtr = *mut c_void;
/// Pointer to an initialized, read-only value of some builtin type.
pub type ConstTypePtr = *const c_void;
/// Pointer to memory the callee must construct a value into.
pub type UninitTypePtr = *mut c_void;

pub type VariantPtr = *mut c_void;
pub type ConstVariantPtr = *const c_void;
pub type UninitVariantPtr = *mut c_void;

pub type StringNamePtr = *mut c_void;
pub type ConstStringNamePtr = *const c_void;
pub type UninitStringNamePtr = *mut c_void;

pub type StringPtr = *mut c_void;
pub type ConstStringPtr = *const c_void;
pub type UninitStringPtr = *mut c_void;

// ---------------------------------------------------------------------------
// Builtin tokens
// ---------------------------------------------------------------------------

/// Fixed-size opaque payload of a builtin value, `WORDS` machine words wide.
/// The bytes belong to the engine; copying them does not copy the value.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Opaque<const WORDS: usize>(pub [u64; WORDS]);

impl<const WORDS: usize> Opaque<WORDS> {
    pub const ZERO: Self = Opaque([0; WORDS]);

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    #[inline]
    pub fn as_ptr(&self) -> ConstTypePtr {
        self as *const Self as ConstTypePtr
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> TypePtr {
        self as *mut Self as TypePtr
    }
}

impl<const WORDS: usize> Default for Opaque<WORDS> {
    fn default() -> Self {
        Self::ZERO
    }
}

pub type OpaqueString = Opaque<1>;
pub type OpaqueStringName = Opaque<1>;
pub type OpaqueNodePath = Opaque<1>;
pub type OpaqueArray = Opaque<1>;
pub type OpaqueDictionary = Opaque<1>;
pub type OpaqueCallable = Opaque<2>;
pub type OpaqueSignal = Opaque<2>;
pub type OpaquePackedArray = Opaque<2>;
/// Tag in the low 32 bits of word 0, payload in words 1 and 2.
pub type OpaqueVariant = Opaque<3>;

// Tokens are raw identifiers. They can move between threads; use is
// confined to the engine's main thread unless a method says otherwise.
unsafe impl Send for ObjectPtr {}
unsafe impl Sync for ObjectPtr {}
unsafe impl Send for ClassInstancePtr {}
unsafe impl Sync for ClassInstancePtr {}
unsafe impl Send for MethodBindPtr {}
unsafe impl Sync for MethodBindPtr {}
unsafe impl Send for LibraryPtr {}
unsafe impl Sync for LibraryPtr {}
