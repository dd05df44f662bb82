// The extern "C" callbacks the engine holds for every extension class.
//
// Class-level callbacks receive the class record as userdata; instance-level
// callbacks receive the instance header. Every body runs inside
// `ffi_boundary`, and every dispatch is refused once the class is marked as
// unregistering.

use std::ffi::c_void;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use gdbind_ffi::{
    ClassCreationInfo, ClassInstancePtr, ConstStringNamePtr, ConstTypePtr, ConstVariantPtr,
    ObjectPtr, OpaqueStringName, StringPtr, TypePtr, VariantPtr,
};

use super::instance::{self, InstanceHeader};
use super::{ExtensionData, VirtualCookie};
use crate::api::api;
use crate::builtin::{BuiltinValue, GString, StringName};
use crate::class::ClassRecord;
use crate::error::{BindError, BindResult};
use crate::ffi_guard::ffi_boundary;
use crate::logging::{LOG_ERROR, LOG_WARNING};
use crate::variant::Variant;

pub(super) fn creation_info(record: &'static ClassRecord, is_abstract: bool) -> ClassCreationInfo {
    ClassCreationInfo {
        is_virtual: false,
        is_abstract,
        is_exposed: true,
        set_func: Some(set_property),
        get_func: Some(get_property),
        notification_func: Some(notification),
        to_string_func: Some(to_string),
        reference_func: Some(reference),
        unreference_func: Some(unreference),
        create_instance_func: Some(create_instance),
        free_instance_func: Some(free_instance),
        get_virtual_call_data_func: Some(get_virtual_call_data),
        call_virtual_with_data_func: Some(call_virtual_with_data),
        class_userdata: record as *const ClassRecord as *mut c_void,
    }
}

/// Extension data of a class that may still be dispatched to.
fn active(record: &'static ClassRecord, what: &str) -> Option<Arc<ExtensionData>> {
    match record.extension() {
        Some(data) if !data.is_unregistering() => Some(data),
        Some(_) => {
            crate::glog!(
                LOG_WARNING,
                "[gdbind] {}: {what} refused, class is unregistering",
                record.name()
            );
            None
        }
        None => {
            crate::glog!(
                LOG_WARNING,
                "[gdbind] {}: {what} refused, class is not registered",
                record.name()
            );
            None
        }
    }
}

unsafe fn record_of(class_userdata: *mut c_void) -> &'static ClassRecord {
    unsafe { &*(class_userdata as *const ClassRecord) }
}

unsafe fn header_of(instance: ClassInstancePtr) -> *mut InstanceHeader {
    instance.0 as *mut InstanceHeader
}

/// Text of a StringName the engine passes by pointer.
unsafe fn name_text(name: ConstStringNamePtr) -> String {
    let token = unsafe { *(name as *const OpaqueStringName) };
    unsafe { StringName::from_borrowed_repr(&token) }.to_string()
}

// ---------------------------------------------------------------------------
// Construction and teardown
// ---------------------------------------------------------------------------

unsafe extern "C" fn create_instance(class_userdata: *mut c_void) -> ObjectPtr {
    ffi_boundary(ObjectPtr::NULL, AssertUnwindSafe(|| {
        let record = unsafe { record_of(class_userdata) };
        let Some(data) = active(record, "create_instance") else {
            return ObjectPtr::NULL;
        };
        instantiate(&data).unwrap_or_else(|e| {
            crate::glog!(LOG_ERROR, "[gdbind] cannot create {}: {e}", record.name());
            ObjectPtr::NULL
        })
    }))
}

/// Construct the parent object, attach fresh host state, and hand the
/// object to the engine.
fn instantiate(data: &ExtensionData) -> BindResult<ObjectPtr> {
    let descriptor = &data.descriptor;
    let object_api = unsafe { &*api().object };
    let parent = StringName::from(descriptor.parent);
    let parent_token = parent.token();
    let object = unsafe { (object_api.construct)(parent_token.as_ptr()) };
    if object.is_null() {
        return Err(BindError::ClassNotFound(descriptor.parent.to_owned()));
    }
    let instance_id = unsafe { (object_api.get_instance_id)(object) };

    let create = descriptor.create;
    let record = descriptor.record;
    let header = ffi_boundary(std::ptr::null_mut(), AssertUnwindSafe(|| unsafe {
        create(object, instance_id, record)
    }));
    if header.is_null() {
        // init panicked; the parent object has no owner now.
        unsafe { (object_api.destroy)(object) };
        return Err(BindError::InvalidLifecycle {
            from: instance::Lifecycle::Uninitialized.name(),
            to: instance::Lifecycle::Constructed.name(),
        });
    }

    let class = StringName::from(descriptor.name);
    let class_token = class.token();
    unsafe {
        (object_api.set_instance)(object, class_token.as_ptr(), ClassInstancePtr(header as *mut c_void));
        (*header).lifecycle.advance(instance::Lifecycle::Registered)?;
    }
    instance::track(object, header, descriptor.name);
    Ok(object)
}

unsafe extern "C" fn free_instance(_class_userdata: *mut c_void, instance: ClassInstancePtr) {
    ffi_boundary((), AssertUnwindSafe(|| {
        if instance.0.is_null() {
            return;
        }
        if let Err(e) = unsafe { instance::release(header_of(instance)) } {
            crate::glog!(LOG_ERROR, "[gdbind] free_instance: {e}");
        }
    }))
}

// ---------------------------------------------------------------------------
// Virtual dispatch
// ---------------------------------------------------------------------------

/// Non-null cookie for an overridden virtual, null when the class does not
/// override `name`. The engine caches the answer per class.
unsafe extern "C" fn get_virtual_call_data(
    class_userdata: *mut c_void,
    name: ConstStringNamePtr,
) -> *mut c_void {
    ffi_boundary(std::ptr::null_mut(), AssertUnwindSafe(|| {
        let record = unsafe { record_of(class_userdata) };
        let Some(data) = active(record, "get_virtual_call_data") else {
            return std::ptr::null_mut();
        };
        let name = unsafe { name_text(name) };
        data.descriptor
            .virtuals
            .iter()
            .find(|v| v.name == name)
            .map_or(std::ptr::null_mut(), |entry| {
                super::intern_cookie(record.name(), entry) as *const VirtualCookie as *mut c_void
            })
    }))
}

unsafe extern "C" fn call_virtual_with_data(
    instance: ClassInstancePtr,
    _name: ConstStringNamePtr,
    data: *mut c_void,
    args: *const ConstTypePtr,
    r_ret: TypePtr,
) {
    ffi_boundary((), AssertUnwindSafe(|| {
        let header = unsafe { header_of(instance) };
        let record = unsafe { (*header).record };
        // Without a cookie the return type is unknown, so nothing is written.
        let Some(cookie) = super::cookie_from(data) else {
            crate::glog!(LOG_ERROR, "[gdbind] {}: unknown virtual cookie", record.name());
            return;
        };
        let Some(extension) = active(record, "virtual call") else {
            (cookie.zero)(r_ret);
            return;
        };
        let Some(entry) = extension
            .descriptor
            .virtuals
            .iter()
            .find(|v| v.name == cookie.name)
        else {
            crate::glog!(
                LOG_ERROR,
                "[gdbind] {}: {} is no longer overridden",
                record.name(),
                cookie.name
            );
            (cookie.zero)(r_ret);
            return;
        };
        let call = entry.call.clone();
        drop(extension);
        call(header, args, r_ret);
    }))
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

unsafe extern "C" fn set_property(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    value: ConstVariantPtr,
) -> bool {
    ffi_boundary(false, AssertUnwindSafe(|| {
        let header = unsafe { header_of(instance) };
        let record = unsafe { (*header).record };
        let Some(extension) = active(record, "set") else {
            return false;
        };
        let name = unsafe { name_text(name) };
        let Some(setter) = extension
            .descriptor
            .properties
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.set.clone())
        else {
            return false;
        };
        drop(extension);
        let value = unsafe { Variant::from_borrowed_ptr(value) };
        if let Err(e) = setter(header, &value) {
            crate::glog!(LOG_WARNING, "[gdbind] {}.{name} = {value}: {e}", record.name());
        }
        true
    }))
}

unsafe extern "C" fn get_property(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    r_ret: VariantPtr,
) -> bool {
    ffi_boundary(false, AssertUnwindSafe(|| {
        let header = unsafe { header_of(instance) };
        let record = unsafe { (*header).record };
        let Some(extension) = active(record, "get") else {
            return false;
        };
        let name = unsafe { name_text(name) };
        let Some(getter) = extension
            .descriptor
            .properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.get.clone())
        else {
            return false;
        };
        drop(extension);
        match getter(header) {
            Ok(value) => {
                unsafe { value.write_to(r_ret) };
                true
            }
            Err(e) => {
                crate::glog!(LOG_WARNING, "[gdbind] {}.{name}: {e}", record.name());
                false
            }
        }
    }))
}

// ---------------------------------------------------------------------------
// Notifications, display, references
// ---------------------------------------------------------------------------

unsafe extern "C" fn notification(instance: ClassInstancePtr, what: i32, _reversed: bool) {
    ffi_boundary((), AssertUnwindSafe(|| {
        let header = unsafe { header_of(instance) };
        let record = unsafe { (*header).record };
        let Some(notify) = active(record, "notification").and_then(|d| d.descriptor.notification.clone())
        else {
            return;
        };
        if let Err(e) = notify(header, what) {
            crate::glog!(LOG_WARNING, "[gdbind] {} notification {what}: {e}", record.name());
        }
    }))
}

unsafe extern "C" fn to_string(instance: ClassInstancePtr, r_is_valid: *mut bool, r_out: StringPtr) {
    ffi_boundary((), AssertUnwindSafe(|| {
        let header = unsafe { header_of(instance) };
        let record = unsafe { (*header).record };
        let Some(display) = record.extension().and_then(|d| d.descriptor.display.clone()) else {
            return;
        };
        if let Ok(text) = display(header) {
            let repr = GString::from(text.as_str()).into_owned_repr();
            unsafe {
                std::ptr::write(r_out as *mut gdbind_ffi::OpaqueString, repr);
                *r_is_valid = true;
            }
        }
    }))
}

unsafe extern "C" fn reference(instance: ClassInstancePtr) {
    run_hook(instance, "reference", |d| d.descriptor.on_reference.clone());
}

unsafe extern "C" fn unreference(instance: ClassInstancePtr) {
    run_hook(instance, "unreference", |d| d.descriptor.on_unreference.clone());
}

fn run_hook(
    instance: ClassInstancePtr,
    what: &'static str,
    pick: impl FnOnce(&ExtensionData) -> Option<super::HookFn>,
) {
    ffi_boundary((), AssertUnwindSafe(|| {
        let header = unsafe { header_of(instance) };
        let record = unsafe { (*header).record };
        let Some(hook) = record.extension().and_then(|d| pick(&d)) else {
            return;
        };
        match hook(header) {
            Ok(()) | Err(BindError::AlreadyBound(_)) => {}
            Err(e) => crate::glog!(LOG_WARNING, "[gdbind] {} {what}: {e}", record.name()),
        }
    }))
}
