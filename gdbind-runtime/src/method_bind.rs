// MethodBinder: calls bound engine methods.
//
// The fast path is the pointer call: resolve the method once per class,
// marshal every argument into a stack CallFrame, reserve the return slot,
// call, then wrap the result according to who owns it. The frame is freed on
// every exit path. `DynamicCall` is the Variant-based path used for vararg
// methods and for names only known at runtime.

use gdbind_ffi::{CallError, ConstVariantPtr, ObjectPtr, OpaqueVariant};

use crate::api::api;
use crate::call_frame::CallFrame;
use crate::class::{ClassRecord, EngineClass};
use crate::error::{BindError, BindResult, check_call_error};
use crate::gd::Gd;
use crate::marshal::{PtrArgs, PtrReturn, ReturnOwnership};
use crate::variant::{ToVariant, Variant};

/// Identity of one bound method: the pair the engine resolves, plus who owns
/// what it returns.
#[derive(Clone, Copy, Debug)]
pub struct MethodSpec {
    pub class: fn() -> &'static ClassRecord,
    pub name: &'static str,
    pub hash: i64,
    pub ownership: ReturnOwnership,
}

impl MethodSpec {
    pub const fn new(class: fn() -> &'static ClassRecord, name: &'static str, hash: i64) -> Self {
        MethodSpec {
            class,
            name,
            hash,
            ownership: ReturnOwnership::Loaned,
        }
    }

    /// The returned object or payload is handed to the caller.
    pub const fn transfers(mut self) -> Self {
        self.ownership = ReturnOwnership::Transferred;
        self
    }
}

/// Call an instance method. `receiver` must come from `Gd::receiver`.
pub fn ptrcall<A: PtrArgs, R: PtrReturn>(
    target: &MethodSpec,
    receiver: ObjectPtr,
    args: A,
) -> BindResult<R> {
    if receiver.is_null() {
        return Err(BindError::NilDeref { method: target.name });
    }
    invoke(target, receiver, args)
}

/// Call a static method (no receiver).
pub fn ptrcall_static<A: PtrArgs, R: PtrReturn>(target: &MethodSpec, args: A) -> BindResult<R> {
    invoke(target, ObjectPtr::NULL, args)
}

fn invoke<A: PtrArgs, R: PtrReturn>(target: &MethodSpec, receiver: ObjectPtr, args: A) -> BindResult<R> {
    let bind = (target.class)().method(target.name, target.hash)?;
    let mut frame = CallFrame::new();
    args.push_args(&mut frame);
    let slot = R::reserve(&mut frame);
    {
        let ptrs = frame.arg_ptrs();
        // SAFETY: the frame holds one pointer per declared parameter and a
        // return slot sized for R; both outlive the call.
        unsafe {
            ((*api().classdb).method_bind_ptrcall)(bind, receiver, ptrs.as_ptr(), frame.addr(&slot));
        }
    }
    Ok(R::take(&mut frame, &slot, target.ownership))
}

// ---------------------------------------------------------------------------
// DynamicCall
// ---------------------------------------------------------------------------

/// Variant call through `method_bind_call`.
///
/// ```ignore
/// let result = DynamicCall::new(&node, Object::class_record(), "call", hashes::OBJECT_CALL)?
///     .arg(&StringName::from("set_name"))
///     .arg(&"Player")
///     .call()?;
/// ```
pub struct DynamicCall {
    receiver: ObjectPtr,
    record: &'static ClassRecord,
    method: &'static str,
    hash: i64,
    args: Vec<Variant>,
}

impl DynamicCall {
    pub fn new<T: EngineClass>(
        object: &Gd<T>,
        record: &'static ClassRecord,
        method: &'static str,
        hash: i64,
    ) -> BindResult<Self> {
        Ok(DynamicCall {
            receiver: object.receiver(method)?,
            record,
            method,
            hash,
            args: Vec::new(),
        })
    }

    pub fn arg(mut self, value: &impl ToVariant) -> Self {
        self.args.push(value.to_variant());
        self
    }

    pub fn args(mut self, values: &[Variant]) -> Self {
        self.args.extend_from_slice(values);
        self
    }

    pub fn call(self) -> BindResult<Variant> {
        let bind = self.record.method(self.method, self.hash)?;
        let tokens: Vec<OpaqueVariant> = self.args.iter().map(Variant::token).collect();
        let ptrs: Vec<ConstVariantPtr> = tokens.iter().map(|t| t.as_ptr()).collect();
        let mut out = OpaqueVariant::ZERO;
        let mut error = CallError::OK;
        let result = unsafe {
            ((*api().classdb).method_bind_call)(
                bind,
                self.receiver,
                ptrs.as_ptr(),
                ptrs.len() as i64,
                out.as_mut_ptr(),
                &mut error,
            );
            Variant::from_owned_token(out)
        };
        check_call_error(&error, self.method)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::Vector3;
    use crate::classes::{Node3D, Object, hashes};
    use crate::testing;

    const GET_POSITION: MethodSpec =
        MethodSpec::new(Node3D::class_record, "get_position", hashes::NODE3D_GET_POSITION);
    const SET_POSITION: MethodSpec =
        MethodSpec::new(Node3D::class_record, "set_position", hashes::NODE3D_SET_POSITION);

    #[test]
    fn ptrcall_round_trips_a_struct_argument() {
        let _engine = testing::session();
        let node = Gd::<Node3D>::new();
        let receiver = node.receiver("set_position").unwrap();
        ptrcall::<_, ()>(&SET_POSITION, receiver, (Vector3::new(1.0, 2.0, 3.0),)).unwrap();
        let pos: Vector3 = ptrcall(&GET_POSITION, receiver, ()).unwrap();
        assert_eq!(pos, Vector3::new(1.0, 2.0, 3.0));
        node.free();
    }

    #[test]
    fn null_receiver_is_nil_deref() {
        let _engine = testing::session();
        let err = ptrcall::<_, Vector3>(&GET_POSITION, ObjectPtr::NULL, ()).unwrap_err();
        assert_eq!(err, BindError::NilDeref { method: "get_position" });
    }

    #[test]
    fn string_arguments_do_not_outlive_the_call() {
        let _engine = testing::session();
        let node = Gd::<Node3D>::new();
        let before = testing::live_builtins();
        node.set_name("Player").unwrap();
        assert_eq!(testing::live_builtins(), before);
        let bogus = MethodSpec::new(Node3D::class_record, "set_name", 1);
        let receiver = node.receiver("set_name").unwrap();
        assert!(matches!(
            ptrcall::<_, ()>(&bogus, receiver, ("x",)),
            Err(BindError::MethodNotFound { .. })
        ));
        assert_eq!(testing::live_builtins(), before);
        node.free();
    }

    #[test]
    fn dynamic_call_reaches_vararg_methods() {
        let _engine = testing::session();
        let obj = Gd::<Object>::new();
        obj.set_meta("n", &5i64.to_variant()).unwrap();
        let got = DynamicCall::new(&obj, Object::class_record(), "call", hashes::OBJECT_CALL)
            .unwrap()
            .arg(&crate::builtin::StringName::from("get_meta"))
            .arg(&crate::builtin::StringName::from("n"))
            .call()
            .unwrap();
        assert_eq!(got.to::<i64>(), Ok(5));
        let bad = DynamicCall::new(&obj, Object::class_record(), "call", hashes::OBJECT_CALL)
            .unwrap()
            .arg(&crate::builtin::StringName::from("missing_method"))
            .call();
        assert!(matches!(bad, Err(BindError::CallFailed { .. })));
        obj.free();
    }
}
