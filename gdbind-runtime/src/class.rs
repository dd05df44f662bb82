// Class hierarchy: the static record behind every engine or extension class,
// and the marker traits that tie handle types to it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use gdbind_ffi::{MethodBindPtr, ObjectPtr};

use crate::api::api;
use crate::builtin::StringName;
use crate::error::{BindError, BindResult};
use crate::extension::ExtensionData;
use crate::sync::{lock_or_recover, read_or_recover, write_or_recover};

/// Implemented for every engine class and every extension class.
///
/// The record is a `static`, so lookups never allocate after the first
/// method resolution.
pub trait EngineClass: 'static {
    const CLASS_NAME: &'static str;

    fn class_record() -> &'static ClassRecord;
}

/// Declares the immediate parent class.
///
/// Enables the blanket `Deref` on `Gd<T>`, so inherited methods resolve
/// through the Deref chain. `Object` does NOT implement this trait.
pub trait HasParent: EngineClass {
    type Parent: EngineClass;
}

// ---------------------------------------------------------------------------
// ClassRecord
// ---------------------------------------------------------------------------

/// Whether instances carry an engine reference count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refcount {
    /// Inherits `RefCounted`.
    Counted,
    /// Lifetime is managed manually (`free`) or by the scene tree.
    Manual,
    /// Not known statically (`Object` handles); asked per instance.
    Dynamic,
    /// Same as the parent class. Used by extension classes.
    Inherited,
}

pub struct ClassRecord {
    name: &'static str,
    parent: Option<fn() -> &'static ClassRecord>,
    refcount: Refcount,
    methods: OnceLock<RwLock<HashMap<(&'static str, i64), MethodBindPtr>>>,
    extension: RwLock<Option<Arc<ExtensionData>>>,
}

static TOUCHED: Mutex<Vec<&'static ClassRecord>> = Mutex::new(Vec::new());

impl ClassRecord {
    pub const fn new(
        name: &'static str,
        parent: Option<fn() -> &'static ClassRecord>,
        refcount: Refcount,
    ) -> Self {
        ClassRecord {
            name,
            parent,
            refcount,
            methods: OnceLock::new(),
            extension: RwLock::new(None),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn parent(&self) -> Option<&'static ClassRecord> {
        self.parent.map(|f| f())
    }

    /// Never returns `Inherited`.
    pub fn refcount(&self) -> Refcount {
        match self.refcount {
            Refcount::Inherited => self.parent().map_or(Refcount::Dynamic, |p| p.refcount()),
            other => other,
        }
    }

    /// This class, then each ancestor up to `Object`.
    pub fn ancestry(&'static self) -> impl Iterator<Item = &'static ClassRecord> {
        std::iter::successors(Some(self), |r| r.parent())
    }

    /// True if `self` is `other` or inherits from it, by static records only.
    pub fn inherits(&'static self, other: &ClassRecord) -> bool {
        self.ancestry().any(|r| r.name == other.name)
    }

    /// Resolve a bound method once; later calls return the cached id.
    /// Entries are keyed by name and hash, so a hash the engine rejected
    /// never reaches a bind cached under the right one.
    ///
    /// Read lock first, then a write lock that keeps whichever id was
    /// published first, so every caller observes the same `MethodBindPtr`.
    pub fn method(&'static self, method: &'static str, hash: i64) -> BindResult<MethodBindPtr> {
        let table = self.methods.get_or_init(|| {
            lock_or_recover(&TOUCHED).push(self);
            RwLock::new(HashMap::new())
        });
        let key = (method, hash);
        if let Some(bind) = read_or_recover(table).get(&key) {
            return Ok(*bind);
        }
        let class_name = StringName::from(self.name);
        let method_name = StringName::from(method);
        let class_token = class_name.token();
        let method_token = method_name.token();
        // SAFETY: classdb sub-table is valid after init; tokens live across the call.
        let bind = unsafe {
            ((*api().classdb).get_method_bind)(class_token.as_ptr(), method_token.as_ptr(), hash)
        };
        if bind.is_null() {
            return Err(BindError::MethodNotFound {
                class: self.name,
                method: method.to_owned(),
            });
        }
        Ok(*write_or_recover(table).entry(key).or_insert(bind))
    }

    pub fn cached_method_count(&self) -> usize {
        self.methods.get().map_or(0, |t| read_or_recover(t).len())
    }

    pub(crate) fn extension(&self) -> Option<Arc<ExtensionData>> {
        read_or_recover(&self.extension).clone()
    }

    pub(crate) fn set_extension(&self, data: Option<Arc<ExtensionData>>) {
        *write_or_recover(&self.extension) = data;
    }

    /// Engine tag for `cast_to`.
    pub(crate) fn class_tag(&self) -> *mut std::ffi::c_void {
        let name = StringName::from(self.name);
        let token = name.token();
        unsafe { ((*api().classdb).get_class_tag)(token.as_ptr()) }
    }
}

impl std::fmt::Debug for ClassRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRecord")
            .field("name", &self.name)
            .field("parent", &self.parent().map(|p| p.name))
            .field("refcount", &self.refcount)
            .finish()
    }
}

/// Forget every cached method id and downcast result. Runs at core
/// deinitialization; ids from a previous engine session are meaningless.
pub(crate) fn reset_caches() {
    for record in lock_or_recover(&TOUCHED).drain(..) {
        if let Some(table) = record.methods.get() {
            write_or_recover(table).clear();
        }
    }
    write_or_recover(downcasts()).clear();
}

// ---------------------------------------------------------------------------
// Downcast cache
// ---------------------------------------------------------------------------

type DowncastKey = (u64, &'static str);

static DOWNCASTS: OnceLock<RwLock<HashMap<DowncastKey, bool>>> = OnceLock::new();

fn downcasts() -> &'static RwLock<HashMap<DowncastKey, bool>> {
    DOWNCASTS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Whether the live object is an instance of `target` (or a subclass),
/// asked of the engine's class database once per (instance, class).
pub(crate) fn instance_of(object: ObjectPtr, instance_id: u64, target: &'static ClassRecord) -> bool {
    if object.is_null() {
        return false;
    }
    let key = (instance_id, target.name);
    if let Some(hit) = read_or_recover(downcasts()).get(&key) {
        return *hit;
    }
    let result = engine_class_name(object)
        .map(|class| {
            let parent = StringName::from(target.name);
            let class_token = class.token();
            let parent_token = parent.token();
            unsafe {
                ((*api().classdb).is_parent_class)(class_token.as_ptr(), parent_token.as_ptr())
            }
        })
        .unwrap_or(false);
    write_or_recover(downcasts()).insert(key, result);
    result
}

/// Drop cached results for an instance that is going away.
pub(crate) fn forget_instance(instance_id: u64) {
    write_or_recover(downcasts()).retain(|(id, _), _| *id != instance_id);
}

#[cfg(test)]
pub(crate) fn cached_downcasts() -> usize {
    read_or_recover(downcasts()).len()
}

/// The engine's class name for a live object.
pub(crate) fn engine_class_name(object: ObjectPtr) -> Option<StringName> {
    let mut token = gdbind_ffi::OpaqueStringName::ZERO;
    let ok = unsafe {
        ((*api().object).get_class_name)(object, crate::api::library(), token.as_mut_ptr())
    };
    ok.then(|| unsafe { StringName::from_owned_token(token) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{CapsuleShape3D, Node, Node3D, Object, RefCounted, Resource};
    use crate::gd::Gd;
    use crate::testing;

    #[test]
    fn ancestry_walks_to_object() {
        let names: Vec<_> = CapsuleShape3D::class_record()
            .ancestry()
            .map(ClassRecord::name)
            .collect();
        assert_eq!(
            names,
            ["CapsuleShape3D", "Shape3D", "Resource", "RefCounted", "Object"]
        );
        assert!(Node3D::class_record().inherits(Node::class_record()));
        assert!(!Node3D::class_record().inherits(Resource::class_record()));
    }

    #[test]
    fn refcount_kind_is_known_statically_below_object() {
        assert_eq!(Object::class_record().refcount(), Refcount::Dynamic);
        assert_eq!(RefCounted::class_record().refcount(), Refcount::Counted);
        assert_eq!(Resource::class_record().refcount(), Refcount::Counted);
        assert_eq!(Node::class_record().refcount(), Refcount::Manual);
    }

    #[test]
    fn method_ids_are_resolved_once_and_stable() {
        let _engine = testing::session();
        let record = Node3D::class_record();
        let first = record.method("get_position", crate::classes::hashes::NODE3D_GET_POSITION).unwrap();
        let lookups = testing::method_bind_lookups();
        let second = record.method("get_position", crate::classes::hashes::NODE3D_GET_POSITION).unwrap();
        assert_eq!(first, second);
        assert_eq!(testing::method_bind_lookups(), lookups);
    }

    #[test]
    fn unknown_method_or_wrong_hash_is_not_found() {
        let _engine = testing::session();
        let err = Node3D::class_record().method("no_such_method", 1).unwrap_err();
        assert_eq!(
            err,
            BindError::MethodNotFound {
                class: "Node3D",
                method: "no_such_method".into()
            }
        );
        assert!(Node3D::class_record().method("get_position", 12345).is_err());
    }

    #[test]
    fn destroyed_refcounted_objects_leave_no_downcasts() {
        let _engine = testing::session();
        let baseline = cached_downcasts();
        let resources: Vec<_> = (0..100).map(|_| Gd::<Resource>::new()).collect();
        for resource in &resources {
            assert!(resource.is_class::<RefCounted>());
            assert!(!resource.is_class::<Node>());
        }
        assert!(cached_downcasts() >= baseline + 200);
        drop(resources);
        assert_eq!(testing::leaked_objects(), 0);
        assert_eq!(cached_downcasts(), baseline);
    }

    #[test]
    fn cached_bind_does_not_cover_a_wrong_hash() {
        let _engine = testing::session();
        let record = Node3D::class_record();
        record.method("get_position", crate::classes::hashes::NODE3D_GET_POSITION).unwrap();
        let lookups = testing::method_bind_lookups();
        let err = record.method("get_position", 12345).unwrap_err();
        assert_eq!(
            err,
            BindError::MethodNotFound {
                class: "Node3D",
                method: "get_position".into()
            }
        );
        assert_eq!(testing::method_bind_lookups(), lookups + 1);
        // A refused hash is never cached.
        assert!(record.method("get_position", 12345).is_err());
        assert_eq!(testing::method_bind_lookups(), lookups + 2);
    }
}
