// CallFrame: fixed-capacity argument/return buffer for one engine call.
//
// The engine expects one pointer per argument. The frame writes each value
// in place at an aligned cursor inside an inline buffer and hands out the
// pointer vector on demand, so no call allocates.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};

use gdbind_ffi::{ConstTypePtr, ObjectPtr, Opaque, TypePtr};

use crate::registry::{PackedToken, PayloadKind, Pin, registry, release_token};

/// Bytes available for arguments and the return slot. Sized for the
/// widest engine signature (a handful of Transform3D/Projection values).
pub const FRAME_CAPACITY: usize = 512;
pub const MAX_ARGS: usize = 16;
pub const MAX_TEMPS: usize = 8;

const NIL_SLOT: u16 = u16::MAX;

/// A value that can be written bytewise into a frame and handed to the engine.
///
/// # Safety
/// The type must have the engine's exact ABI size and layout, contain no
/// host-side ownership (no Drop, no pointers the host frees), and the
/// all-zero bit pattern must be a valid value.
pub unsafe trait AbiValue: Copy + 'static {}

macro_rules! abi_value {
    ($($t:ty),* $(,)?) => { $( unsafe impl AbiValue for $t {} )* };
}

abi_value!((), bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, ObjectPtr);

unsafe impl<const N: usize> AbiValue for Opaque<N> {}

#[repr(C, align(16))]
struct FrameBuffer([u8; FRAME_CAPACITY]);

/// Typed reservation inside a frame for the engine's return value.
#[derive(Debug)]
pub struct RetSlot<T> {
    offset: u16,
    _marker: PhantomData<fn() -> T>,
}

/// Engine-expected pointer vector, borrowed from the frame it points into.
pub struct ArgVector<'a> {
    ptrs: [ConstTypePtr; MAX_ARGS],
    len: usize,
    _frame: PhantomData<&'a CallFrame>,
}

impl ArgVector<'_> {
    #[inline]
    pub fn as_ptr(&self) -> *const ConstTypePtr {
        self.ptrs.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Stack-bound argument buffer. Dropping the frame is `free`: it releases
/// every temporary it holds and any owned return value nobody consumed,
/// on every exit path including unwinding.
pub struct CallFrame {
    buf: UnsafeCell<FrameBuffer>,
    cursor: usize,
    offsets: [u16; MAX_ARGS],
    argc: usize,
    temps: [Option<Pin>; MAX_TEMPS],
    temp_count: usize,
    owned_ret: Option<(u16, PayloadKind)>,
}

impl CallFrame {
    pub fn new() -> Self {
        CallFrame {
            buf: UnsafeCell::new(FrameBuffer([0; FRAME_CAPACITY])),
            cursor: 0,
            offsets: [0; MAX_ARGS],
            argc: 0,
            temps: [None; MAX_TEMPS],
            temp_count: 0,
            owned_ret: None,
        }
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        self.buf.get() as *mut u8
    }

    /// Reserve `size_of::<T>()` bytes aligned for `T`. Overflow is a bug.
    fn reserve<T>(&mut self) -> u16 {
        let align = align_of::<T>();
        assert!(align <= 16, "frame values are at most 16-byte aligned");
        let start = (self.cursor + align - 1) & !(align - 1);
        let end = start + size_of::<T>();
        assert!(
            end <= FRAME_CAPACITY,
            "call frame overflow: {end} bytes > {FRAME_CAPACITY}"
        );
        self.cursor = end;
        start as u16
    }

    /// Copy `value` to the cursor and record its address as the next argument.
    pub fn arg<T: AbiValue>(&mut self, value: T) {
        assert!(self.argc < MAX_ARGS, "call frame holds at most {MAX_ARGS} arguments");
        let offset = self.reserve::<T>();
        // SAFETY: offset..offset+size is inside the buffer and aligned for T.
        unsafe { std::ptr::write(self.base().add(offset as usize) as *mut T, value) };
        self.offsets[self.argc] = offset;
        self.argc += 1;
    }

    /// Keep a registry pin alive for the duration of the call.
    pub fn hold(&mut self, pin: Pin) {
        assert!(self.temp_count < MAX_TEMPS, "call frame holds at most {MAX_TEMPS} temporaries");
        self.temps[self.temp_count] = Some(pin);
        self.temp_count += 1;
    }

    /// Reserve a return slot aligned for `T`.
    pub fn ret_slot<T: AbiValue>(&mut self) -> RetSlot<T> {
        RetSlot {
            offset: self.reserve::<T>(),
            _marker: PhantomData,
        }
    }

    /// Reserve a return slot the engine constructs an owned payload into.
    /// Unless [`take_owned`](Self::take_owned) consumes it, freeing the frame
    /// releases the payload.
    pub fn ret_owned<T: AbiValue>(&mut self, kind: PayloadKind) -> RetSlot<T> {
        debug_assert!(size_of::<T>() <= size_of::<PackedToken>());
        let slot = self.ret_slot::<T>();
        self.owned_ret = Some((slot.offset, kind));
        slot
    }

    /// Return slot for void methods. Its address is null.
    pub fn nil_ret(&mut self) -> RetSlot<()> {
        RetSlot {
            offset: NIL_SLOT,
            _marker: PhantomData,
        }
    }

    /// One pointer per argument, in push order.
    pub fn arg_ptrs(&self) -> ArgVector<'_> {
        let mut ptrs = [std::ptr::null(); MAX_ARGS];
        for (i, off) in self.offsets[..self.argc].iter().enumerate() {
            // SAFETY: offsets were produced by reserve() and are in bounds.
            ptrs[i] = unsafe { self.base().add(*off as usize) } as ConstTypePtr;
        }
        ArgVector {
            ptrs,
            len: self.argc,
            _frame: PhantomData,
        }
    }

    /// Address for the engine to write the return value into.
    pub fn addr<T>(&self, slot: &RetSlot<T>) -> TypePtr {
        if slot.offset == NIL_SLOT {
            return std::ptr::null_mut();
        }
        // SAFETY: in bounds, see reserve().
        unsafe { self.base().add(slot.offset as usize) as TypePtr }
    }

    /// Read the value the engine wrote.
    pub fn get<T: AbiValue>(&self, slot: &RetSlot<T>) -> T {
        if slot.offset == NIL_SLOT {
            // SAFETY: AbiValue guarantees the zero pattern is valid; only () lands here.
            return unsafe { std::mem::zeroed() };
        }
        // SAFETY: aligned, in bounds, zero-initialized at minimum.
        unsafe { std::ptr::read(self.base().add(slot.offset as usize) as *const T) }
    }

    /// Read an owned return value and take responsibility for releasing it.
    pub fn take_owned<T: AbiValue>(&mut self, slot: &RetSlot<T>) -> T {
        if matches!(self.owned_ret, Some((off, _)) if off == slot.offset) {
            self.owned_ret = None;
        }
        self.get(slot)
    }

    #[inline]
    pub fn arg_count(&self) -> usize {
        self.argc
    }

    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.cursor
    }
}

impl Default for CallFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallFrame {
    fn drop(&mut self) {
        if let Some((offset, kind)) = self.owned_ret.take() {
            let mut token = PackedToken::ZERO;
            let words = kind.words();
            // SAFETY: ret_owned reserved at least `words` u64s at `offset`.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.base().add(offset as usize) as *const u64,
                    token.0.as_mut_ptr(),
                    words,
                );
            }
            if !token.is_zero() {
                release_token(kind, &mut token);
            }
        }
        for pin in self.temps[..self.temp_count].iter().flatten() {
            registry().end(*pin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_are_aligned_and_addressable() {
        let mut frame = CallFrame::new();
        frame.arg(true);
        frame.arg(7i64);
        frame.arg(2.5f64);
        let ptrs = frame.arg_ptrs();
        assert_eq!(ptrs.len(), 3);
        unsafe {
            assert!(*(ptrs.as_ptr().read() as *const bool));
            let p1 = ptrs.as_ptr().add(1).read();
            assert_eq!(p1 as usize % 8, 0);
            assert_eq!(*(p1 as *const i64), 7);
            assert_eq!(*(ptrs.as_ptr().add(2).read() as *const f64), 2.5);
        }
        assert_eq!(frame.used_bytes(), 24);
    }

    #[test]
    fn return_slot_reads_back_what_engine_writes() {
        let mut frame = CallFrame::new();
        frame.arg(1i64);
        let slot = frame.ret_slot::<f64>();
        unsafe { *(frame.addr(&slot) as *mut f64) = 0.5 };
        assert_eq!(frame.get(&slot), 0.5);
    }

    #[test]
    fn nil_return_has_null_address() {
        let mut frame = CallFrame::new();
        let slot = frame.nil_ret();
        assert!(frame.addr(&slot).is_null());
        frame.get(&slot);
    }

    #[test]
    fn multiword_tokens_fit() {
        let mut frame = CallFrame::new();
        frame.arg(Opaque::<3>([1, 2, 3]));
        let ptrs = frame.arg_ptrs();
        let read = unsafe { *(ptrs.as_ptr().read() as *const Opaque<3>) };
        assert_eq!(read.0, [1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "call frame overflow")]
    fn overflow_is_a_bug() {
        let mut frame = CallFrame::new();
        for _ in 0..FRAME_CAPACITY / 64 {
            frame.arg(Opaque::<8>([0; 8]));
        }
        frame.arg(0u8);
    }
}
