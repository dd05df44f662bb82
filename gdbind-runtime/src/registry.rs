// PointerRegistry: identity and liveness of every engine payload the host holds.
//
// Opaque tokens (strings, containers, variants, refcounted objects) live in
// generation-checked slots. Host values embed a `Pin` instead of the raw
// token; a pin whose slot has been ended never resolves again.

use std::ffi::c_void;
use std::num::NonZeroU32;
use std::panic::Location;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use gdbind_ffi::{CTOR_COPY, ObjectPtr, Opaque, TypePtr, VariantType};

use crate::api::api;
use crate::builtin_fns;
use crate::error::{BindError, BindResult, fatal};
use crate::logging::LOG_ERROR;
use crate::sync::{read_or_recover, write_or_recover};

// ---------------------------------------------------------------------------
// Kinds and ownership
// ---------------------------------------------------------------------------

/// How a payload kind is shared with the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Acquisition adds a reference, release removes one.
    RefCounted,
    /// Acquisition is a cheap copy; the engine shares storage until a write.
    CopyOnWrite,
    /// The host holds the only reference and must destroy it.
    Unique,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// A refcounted engine object.
    Object,
    /// A pooled builtin: String, StringName, NodePath, Array, Dictionary,
    /// Callable, Signal or one of the packed arrays.
    Builtin(VariantType),
    Variant,
}

impl PayloadKind {
    pub fn ownership(self) -> Ownership {
        match self {
            PayloadKind::Object => Ownership::RefCounted,
            PayloadKind::Builtin(VariantType::Array)
            | PayloadKind::Builtin(VariantType::Dictionary)
            | PayloadKind::Builtin(VariantType::Callable) => Ownership::RefCounted,
            PayloadKind::Builtin(_) => Ownership::CopyOnWrite,
            PayloadKind::Variant => Ownership::Unique,
        }
    }

    /// Token width in machine words.
    pub fn words(self) -> usize {
        match self {
            PayloadKind::Object => 1,
            PayloadKind::Builtin(ty) => ty.token_words(),
            PayloadKind::Variant => 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Tokens and pins
// ---------------------------------------------------------------------------

/// Compact storage form of any token: up to three machine words.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PackedToken(pub [u64; 3]);

impl PackedToken {
    pub const ZERO: PackedToken = PackedToken([0; 3]);

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 3]
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> TypePtr {
        self.0.as_mut_ptr() as TypePtr
    }

    #[inline]
    pub fn object(&self) -> ObjectPtr {
        ObjectPtr(self.0[0] as usize as *mut c_void)
    }
}

/// Package an `N`-word token into the registry's storage form.
#[inline]
pub fn pack<const N: usize>(token: Opaque<N>) -> PackedToken {
    const { assert!(N <= 3, "tokens are at most three words") };
    let mut out = PackedToken::ZERO;
    out.0[..N].copy_from_slice(&token.0);
    out
}

/// Inverse of [`pack`].
#[inline]
pub fn unpack<const N: usize>(packed: PackedToken) -> Opaque<N> {
    const { assert!(N <= 3, "tokens are at most three words") };
    let mut out = Opaque::<N>::ZERO;
    out.0.copy_from_slice(&packed.0[..N]);
    out
}

#[inline]
pub fn pack_object(obj: ObjectPtr) -> PackedToken {
    PackedToken([obj.to_addr() as u64, 0, 0])
}

/// Opaque handle to a registry slot. The generation encodes the registry
/// epoch in its top byte, so pins minted before a `cycle()` never resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pin {
    index: u32,
    generation: NonZeroU32,
}

const EPOCH_SHIFT: u32 = 24;
const COUNTER_MASK: u32 = (1 << EPOCH_SHIFT) - 1;

fn next_generation(prev: u32, epoch: u32) -> NonZeroU32 {
    let mut counter = prev.wrapping_add(1) & COUNTER_MASK;
    if counter == 0 {
        counter = 1;
    }
    NonZeroU32::new((epoch << EPOCH_SHIFT) | counter).unwrap_or(NonZeroU32::MIN)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Slot {
    generation: NonZeroU32,
    live: Option<(PayloadKind, PackedToken)>,
}

struct Slots {
    entries: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

pub struct PointerRegistry {
    slots: RwLock<Slots>,
    epoch: AtomicU32,
}

static REGISTRY: PointerRegistry = PointerRegistry::new();

/// The process-wide registry.
#[inline]
pub fn registry() -> &'static PointerRegistry {
    &REGISTRY
}

impl PointerRegistry {
    pub const fn new() -> Self {
        PointerRegistry {
            slots: RwLock::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
            epoch: AtomicU32::new(0),
        }
    }

    fn insert(&self, kind: PayloadKind, token: PackedToken) -> Pin {
        let epoch = self.epoch.load(Ordering::Acquire) & 0xFF;
        let mut slots = write_or_recover(&self.slots);
        slots.live += 1;
        if let Some(index) = slots.free.pop() {
            let slot = &mut slots.entries[index as usize];
            slot.generation = next_generation(slot.generation.get(), epoch);
            slot.live = Some((kind, token));
            return Pin {
                index,
                generation: slot.generation,
            };
        }
        let generation = next_generation(0, epoch);
        let index = slots.entries.len() as u32;
        slots.entries.push(Slot {
            generation,
            live: Some((kind, token)),
        });
        Pin { index, generation }
    }

    /// `new`: acquire the token under the kind's ownership rule (adding a
    /// reference or taking a COW copy) and track it in a fresh slot.
    /// The caller keeps its own token.
    pub fn acquire(&self, kind: PayloadKind, token: PackedToken) -> Pin {
        let owned = acquire_token(kind, token);
        self.insert(kind, owned)
    }

    /// Track a token whose ownership was transferred to the host.
    /// No reference is added.
    pub fn adopt(&self, kind: PayloadKind, token: PackedToken) -> Pin {
        self.insert(kind, token)
    }

    /// Raw token for a call about to consume it. The engine must not retain
    /// or mutate it beyond the call.
    ///
    /// A pin whose slot was ended is a fatal programmer error.
    #[track_caller]
    #[inline]
    pub fn get(&self, pin: Pin) -> PackedToken {
        match self.try_get(pin) {
            Ok(token) => token,
            Err(e) => fatal(e, Location::caller()),
        }
    }

    pub fn try_get(&self, pin: Pin) -> BindResult<PackedToken> {
        let slots = read_or_recover(&self.slots);
        match slots.entries.get(pin.index as usize) {
            Some(Slot {
                generation,
                live: Some((_, token)),
            }) if *generation == pin.generation => Ok(*token),
            _ => Err(BindError::UseAfterFree),
        }
    }

    pub fn kind(&self, pin: Pin) -> BindResult<PayloadKind> {
        let slots = read_or_recover(&self.slots);
        match slots.entries.get(pin.index as usize) {
            Some(Slot {
                generation,
                live: Some((kind, _)),
            }) if *generation == pin.generation => Ok(*kind),
            _ => Err(BindError::UseAfterFree),
        }
    }

    #[inline]
    pub fn is_live(&self, pin: Pin) -> bool {
        self.try_get(pin).is_ok()
    }

    /// Run an engine mutation against the token and store the result.
    ///
    /// The token is copied out, `f` runs without the lock held (the engine
    /// may re-enter host code), and the possibly reallocated token is
    /// written back. COW kinds change token identity on write.
    #[track_caller]
    pub fn update<R>(&self, pin: Pin, f: impl FnOnce(&mut PackedToken) -> R) -> R {
        let mut token = self.get(pin);
        let result = f(&mut token);
        let mut slots = write_or_recover(&self.slots);
        match slots.entries.get_mut(pin.index as usize) {
            Some(Slot {
                generation,
                live: Some((_, stored)),
            }) if *generation == pin.generation => *stored = token,
            _ => {
                drop(slots);
                fatal(BindError::UseAfterFree, Location::caller());
            }
        }
        result
    }

    fn take(&self, pin: Pin) -> Option<(PayloadKind, PackedToken)> {
        let epoch = self.epoch.load(Ordering::Acquire) & 0xFF;
        let mut slots = write_or_recover(&self.slots);
        let slot = slots.entries.get_mut(pin.index as usize)?;
        if slot.generation != pin.generation {
            return None;
        }
        let live = slot.live.take()?;
        slot.generation = next_generation(slot.generation.get(), epoch);
        slots.free.push(pin.index);
        slots.live -= 1;
        Some(live)
    }

    /// Release the slot through the engine destructor for its kind.
    /// Ending an already-ended pin does nothing.
    pub fn end(&self, pin: Pin) {
        if let Some((kind, mut token)) = self.take(pin) {
            release_token(kind, &mut token);
        }
    }

    /// Give the token back to the engine without releasing it.
    pub fn transfer_to_engine(&self, pin: Pin) -> BindResult<PackedToken> {
        self.take(pin)
            .map(|(_, token)| token)
            .ok_or(BindError::UseAfterFree)
    }

    /// End every live slot, latest first. Returns how many were released.
    pub fn drain(&self) -> usize {
        let epoch = self.epoch.load(Ordering::Acquire) & 0xFF;
        let taken: Vec<(PayloadKind, PackedToken)> = {
            let mut slots = write_or_recover(&self.slots);
            let mut out = Vec::with_capacity(slots.live);
            let mut freed = Vec::new();
            for (index, slot) in slots.entries.iter_mut().enumerate().rev() {
                if let Some(live) = slot.live.take() {
                    slot.generation = next_generation(slot.generation.get(), epoch);
                    freed.push(index as u32);
                    out.push(live);
                }
            }
            slots.free.extend(freed);
            slots.live = 0;
            out
        };
        let count = taken.len();
        for (kind, mut token) in taken {
            release_token(kind, &mut token);
        }
        count
    }

    /// Drain, then start a new epoch. Every pin minted before the cycle is
    /// refused from now on, even if its slot index is reused.
    pub fn cycle(&self) -> usize {
        let released = self.drain();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        released
    }

    pub fn live_count(&self) -> usize {
        read_or_recover(&self.slots).live
    }
}

impl Default for PointerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Engine-side acquire/release
// ---------------------------------------------------------------------------

fn acquire_token(kind: PayloadKind, token: PackedToken) -> PackedToken {
    match kind {
        PayloadKind::Variant => token,
        PayloadKind::Object => {
            // SAFETY: object sub-table is valid after init; the pointer is live.
            unsafe { ((*api().object).reference)(token.object()) };
            token
        }
        PayloadKind::Builtin(ty) => match builtin_fns::constructor(ty, CTOR_COPY) {
            Ok(copy) => {
                let mut out = PackedToken::ZERO;
                let args = [token.0.as_ptr() as *const c_void];
                // SAFETY: copy constructor reads one token and writes one.
                unsafe { copy(out.as_mut_ptr(), args.as_ptr()) };
                out
            }
            Err(e) => {
                crate::glog!(LOG_ERROR, "[gdbind] cannot acquire {}: {e}", ty.name());
                PackedToken::ZERO
            }
        },
    }
}

/// Run the engine destructor for one token. Only the registry and the call
/// frame's unconsumed-return path call this.
pub(crate) fn release_token(kind: PayloadKind, token: &mut PackedToken) {
    match kind {
        PayloadKind::Object => {
            let obj = token.object();
            if obj.is_null() {
                return;
            }
            // SAFETY: the slot held one reference to a live object.
            unsafe {
                let object = &*api().object;
                if (object.unreference)(obj) {
                    crate::class::forget_instance((object.get_instance_id)(obj));
                    (object.destroy)(obj);
                }
            }
        }
        PayloadKind::Builtin(ty) => match builtin_fns::destructor(ty) {
            // SAFETY: the token was constructed by the engine for this type.
            Some(dtor) => unsafe { dtor(token.as_mut_ptr()) },
            None => crate::glog!(LOG_ERROR, "[gdbind] no destructor for {}", ty.name()),
        },
        PayloadKind::Variant => unsafe { ((*api().variant).destroy)(token.as_mut_ptr()) },
    }
    *token = PackedToken::ZERO;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn variant_token(value: i64) -> PackedToken {
        PackedToken([VariantType::Int as u64, value as u64, 0])
    }

    #[test]
    fn pack_unpack_preserve_words() {
        let two = Opaque::<2>([7, 9]);
        let packed = pack(two);
        assert_eq!(packed.0, [7, 9, 0]);
        assert_eq!(unpack::<2>(packed), two);
    }

    #[test]
    fn generations_skip_zero_and_carry_epoch() {
        let g = next_generation(COUNTER_MASK, 3);
        assert_eq!(g.get() & COUNTER_MASK, 1);
        assert_eq!(g.get() >> EPOCH_SHIFT, 3);
    }

    #[test]
    fn ended_pin_never_resolves_again() {
        let _engine = testing::session();
        let reg = PointerRegistry::new();
        let pin = reg.adopt(PayloadKind::Variant, variant_token(5));
        assert_eq!(reg.get(pin).0[1], 5);
        reg.end(pin);
        reg.end(pin);
        assert_eq!(reg.try_get(pin), Err(BindError::UseAfterFree));

        // Reusing the slot index does not revive the old pin.
        let fresh = reg.adopt(PayloadKind::Variant, variant_token(6));
        assert_eq!(fresh.index, pin.index);
        assert!(reg.try_get(pin).is_err());
        assert_eq!(reg.get(fresh).0[1], 6);
        reg.end(fresh);
    }

    #[test]
    fn get_on_ended_slot_is_fatal() {
        let _engine = testing::session();
        let reg = PointerRegistry::new();
        let pin = reg.adopt(PayloadKind::Variant, variant_token(1));
        reg.end(pin);
        let payload = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| reg.get(pin)))
            .unwrap_err();
        let fatal = payload.downcast_ref::<crate::error::FatalError>().unwrap();
        assert_eq!(fatal.error, BindError::UseAfterFree);
        assert!(fatal.location.file().ends_with("registry.rs"));
    }

    #[test]
    fn cycle_refuses_prior_epoch_and_drains() {
        let _engine = testing::session();
        let reg = PointerRegistry::new();
        let a = reg.adopt(PayloadKind::Variant, variant_token(1));
        let b = reg.adopt(PayloadKind::Variant, variant_token(2));
        assert_eq!(reg.live_count(), 2);
        assert_eq!(reg.cycle(), 2);
        assert_eq!(reg.live_count(), 0);
        assert!(!reg.is_live(a));
        assert!(!reg.is_live(b));
        let c = reg.adopt(PayloadKind::Variant, variant_token(3));
        assert_ne!(c.generation, a.generation);
        assert_ne!(c.generation, b.generation);
        reg.end(c);
    }

    #[test]
    fn transfer_to_engine_skips_release() {
        let _engine = testing::session();
        let reg = PointerRegistry::new();
        let pin = reg.adopt(PayloadKind::Variant, variant_token(4));
        let token = reg.transfer_to_engine(pin).unwrap();
        assert_eq!(token.0[1], 4);
        assert_eq!(reg.live_count(), 0);
        assert_eq!(reg.transfer_to_engine(pin), Err(BindError::UseAfterFree));
    }

    #[test]
    fn update_writes_back_the_new_token() {
        let _engine = testing::session();
        let reg = PointerRegistry::new();
        let pin = reg.adopt(PayloadKind::Variant, variant_token(10));
        reg.update(pin, |tok| tok.0[1] = 11);
        assert_eq!(reg.get(pin).0[1], 11);
        reg.end(pin);
    }

    #[test]
    fn ownership_rules_per_kind() {
        assert_eq!(PayloadKind::Object.ownership(), Ownership::RefCounted);
        assert_eq!(
            PayloadKind::Builtin(VariantType::PackedByteArray).ownership(),
            Ownership::CopyOnWrite
        );
        assert_eq!(PayloadKind::Variant.ownership(), Ownership::Unique);
        assert_eq!(PayloadKind::Builtin(VariantType::Signal).words(), 2);
    }
}
