// Pointer-call marshaling: how host values become frame arguments, how return
// slots are reserved and read, and how virtual-call arguments coming from the
// engine are lifted back into host values.

use gdbind_ffi::{ConstTypePtr, OpaqueVariant, TypePtr};

use crate::builtin::GString;
use crate::call_frame::{CallFrame, RetSlot};
use crate::registry::PayloadKind;
use crate::variant::Variant;

/// Who owns an object or payload returned by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnOwnership {
    /// The engine handed its reference to the caller; the host adopts it.
    Transferred,
    /// The engine keeps its reference; the host acquires its own.
    Loaned,
}

/// A host value that can be written into a call frame as one argument.
pub trait PtrArg {
    fn push_arg(&self, frame: &mut CallFrame);
}

impl<T: PtrArg + ?Sized> PtrArg for &T {
    fn push_arg(&self, frame: &mut CallFrame) {
        (**self).push_arg(frame);
    }
}

/// A full argument list, as a tuple.
pub trait PtrArgs {
    const COUNT: usize;
    fn push_args(&self, frame: &mut CallFrame);
}

/// A host type an engine call can return.
pub trait PtrReturn: Sized {
    type Slot: crate::call_frame::AbiValue;

    fn reserve(frame: &mut CallFrame) -> RetSlot<Self::Slot>;

    /// Read the engine's result out of the frame.
    fn take(frame: &mut CallFrame, slot: &RetSlot<Self::Slot>, ownership: ReturnOwnership) -> Self;
}

/// Lift an argument the engine passes to a host override.
pub trait PtrLift: Sized {
    /// # Safety
    /// `ptr` must point at a live value of this type's engine representation.
    unsafe fn lift(ptr: ConstTypePtr) -> Self;
}

/// Argument tuple lifted from an engine pointer vector.
pub trait PtrLiftArgs: Sized {
    const COUNT: usize;

    /// # Safety
    /// `args` must hold `COUNT` pointers, each valid for its element type.
    unsafe fn lift_args(args: *const ConstTypePtr) -> Self;
}

/// Write a host override's result into the engine's return slot.
pub trait PtrLower: Sized {
    /// Returned when the override panicked.
    fn zero() -> Self;

    /// # Safety
    /// `ret` must be zeroed memory sized for this type, or null for `()`.
    unsafe fn lower(self, ret: TypePtr);
}

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

impl PtrReturn for () {
    type Slot = ();

    fn reserve(frame: &mut CallFrame) -> RetSlot<()> {
        frame.nil_ret()
    }

    fn take(_frame: &mut CallFrame, _slot: &RetSlot<()>, _ownership: ReturnOwnership) {}
}

impl PtrLower for () {
    fn zero() {}

    unsafe fn lower(self, _ret: TypePtr) {}
}

// ---------------------------------------------------------------------------
// Scalars narrower than the engine's i64/f64
// ---------------------------------------------------------------------------

macro_rules! widened {
    ($($t:ty => $wide:ty),* $(,)?) => {$(
        impl PtrArg for $t {
            fn push_arg(&self, frame: &mut CallFrame) {
                frame.arg(*self as $wide);
            }
        }

        impl PtrReturn for $t {
            type Slot = $wide;

            fn reserve(frame: &mut CallFrame) -> RetSlot<$wide> {
                frame.ret_slot()
            }

            fn take(frame: &mut CallFrame, slot: &RetSlot<$wide>, _ownership: ReturnOwnership) -> Self {
                frame.get(slot) as $t
            }
        }

        impl PtrLift for $t {
            unsafe fn lift(ptr: ConstTypePtr) -> Self {
                unsafe { *(ptr as *const $wide) as $t }
            }
        }

        impl PtrLower for $t {
            fn zero() -> Self {
                0 as $t
            }

            unsafe fn lower(self, ret: TypePtr) {
                unsafe { std::ptr::write(ret as *mut $wide, self as $wide) };
            }
        }
    )*};
}

widened!(
    i8 => i64, i16 => i64, i32 => i64,
    u8 => i64, u16 => i64, u32 => i64, u64 => i64,
    f32 => f64,
);

// ---------------------------------------------------------------------------
// Variant
// ---------------------------------------------------------------------------

impl PtrArg for Variant {
    fn push_arg(&self, frame: &mut CallFrame) {
        frame.arg(self.token());
    }
}

impl PtrReturn for Variant {
    type Slot = OpaqueVariant;

    fn reserve(frame: &mut CallFrame) -> RetSlot<OpaqueVariant> {
        frame.ret_owned(PayloadKind::Variant)
    }

    fn take(frame: &mut CallFrame, slot: &RetSlot<OpaqueVariant>, _ownership: ReturnOwnership) -> Self {
        unsafe { Variant::from_owned_token(frame.take_owned(slot)) }
    }
}

impl PtrLift for Variant {
    unsafe fn lift(ptr: ConstTypePtr) -> Self {
        unsafe { Variant::from_borrowed_ptr(ptr) }
    }
}

impl PtrLower for Variant {
    fn zero() -> Self {
        Variant::nil()
    }

    unsafe fn lower(self, ret: TypePtr) {
        unsafe { self.move_into(ret) };
    }
}

// ---------------------------------------------------------------------------
// Rust strings: converted to a temporary engine String held by the frame
// ---------------------------------------------------------------------------

impl PtrArg for str {
    fn push_arg(&self, frame: &mut CallFrame) {
        let temp = GString::from(self);
        frame.arg(temp.token());
        frame.hold(temp.0.into_pin());
    }
}

impl PtrArg for String {
    fn push_arg(&self, frame: &mut CallFrame) {
        self.as_str().push_arg(frame);
    }
}

// ---------------------------------------------------------------------------
// Tuples
// ---------------------------------------------------------------------------

macro_rules! tuples {
    ($count:expr; $($name:ident $idx:tt),*) => {
        impl<$($name: PtrArg),*> PtrArgs for ($($name,)*) {
            const COUNT: usize = $count;

            #[allow(unused_variables)]
            fn push_args(&self, frame: &mut CallFrame) {
                $( self.$idx.push_arg(frame); )*
            }
        }

        impl<$($name: PtrLift),*> PtrLiftArgs for ($($name,)*) {
            const COUNT: usize = $count;

            #[allow(unused_variables, clippy::unused_unit)]
            unsafe fn lift_args(args: *const ConstTypePtr) -> Self {
                unsafe { ($($name::lift(*args.add($idx)),)*) }
            }
        }
    };
}

tuples!(0;);
tuples!(1; A 0);
tuples!(2; A 0, B 1);
tuples!(3; A 0, B 1, C 2);
tuples!(4; A 0, B 1, C 2, D 3);
tuples!(5; A 0, B 1, C 2, D 3, E 4);
tuples!(6; A 0, B 1, C 2, D 3, E 4, F 5);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn narrow_ints_are_written_as_i64() {
        let mut frame = CallFrame::new();
        (7i32, 2.5f32, true).push_args(&mut frame);
        let ptrs = frame.arg_ptrs();
        assert_eq!(ptrs.len(), 3);
        unsafe {
            assert_eq!(*(ptrs.as_ptr().read() as *const i64), 7);
            assert_eq!(*(ptrs.as_ptr().add(1).read() as *const f64), 2.5);
        }
    }

    #[test]
    fn lift_args_reads_each_pointer() {
        let a = 3i64;
        let b = 0.25f64;
        let ptrs = [&a as *const i64 as ConstTypePtr, &b as *const f64 as ConstTypePtr];
        let (x, y): (i32, f32) = unsafe { PtrLiftArgs::lift_args(ptrs.as_ptr()) };
        assert_eq!((x, y), (3, 0.25));
    }

    #[test]
    fn str_arguments_are_released_with_the_frame() {
        let _engine = testing::session();
        let before = testing::live_builtins();
        {
            let mut frame = CallFrame::new();
            ("temporary",).push_args(&mut frame);
            assert_eq!(testing::live_builtins(), before + 1);
        }
        assert_eq!(testing::live_builtins(), before);
    }

    #[test]
    fn unconsumed_variant_return_is_released() {
        let _engine = testing::session();
        let before = testing::live_builtins();
        {
            let mut frame = CallFrame::new();
            let slot = <Variant as PtrReturn>::reserve(&mut frame);
            unsafe { testing::write_string_variant(frame.addr(&slot), "dropped") };
            assert_eq!(testing::live_builtins(), before + 1);
        }
        assert_eq!(testing::live_builtins(), before);
    }
}
