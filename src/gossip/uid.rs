//! Node UID type and process-wide allocator.
//!
//! A `Uid` is unique per process. It is handed out by one of two
//! monotonic regimes (`Tiny`, for simulation/test graphs kept small
//! and readable in assertions; `Normal`, for production fleets), never
//! reused, and never equal to the reserved anonymous-broadcast value.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

/// UID reserved for anonymous broadcast. Never allocated to a real
/// node.
pub const ANONYMOUS: Uid = Uid(0);

/// A node UID, unique per process.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct Uid(u64);

impl Uid {
    /// Builds a `Uid` from a raw integer, bypassing the allocator.
    /// Used to address a known remote peer (Proxy Nodes), and in
    /// tests.
    pub const fn from_raw(raw: u64) -> Self {
        Uid(raw)
    }

    /// Returns whether this is the anonymous-broadcast UID.
    pub fn is_anonymous(self) -> bool {
        self == ANONYMOUS
    }
}

impl From<u64> for Uid {
    #[inline]
    fn from(raw: u64) -> Uid {
        Uid(raw)
    }
}

impl From<Uid> for u64 {
    #[inline]
    fn from(uid: Uid) -> u64 {
        uid.0
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocation regime for new UIDs.
///
/// `Tiny` starts at 1 and increments by 1, keeping UIDs readable in
/// simulation and test assertions. `Normal` starts from a
/// process-randomized high base, so that UIDs minted by independent
/// processes are unlikely to collide when exchanged out of band — two
/// processes both in `Normal` regime draw their starting point from
/// `OsRng`, rather than both counting up from the same constant.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Regime {
    Tiny,
    Normal,
}

struct Allocator {
    regime: Regime,
    next: AtomicU64,
}

/// Lower bound of the `Normal` regime's range, keeping it clear of
/// `Tiny`'s low integers even after the randomized offset is added.
const NORMAL_FLOOR: u64 = 1 << 32;

static ALLOCATOR: Mutex<Option<Allocator>> = Mutex::new(None);

/// Resets the allocator to its initial state, regime `Normal`. Called
/// from `crate::gossip::init`.
pub(crate) fn init() {
    set_regime(Regime::Normal);
}

/// Draws a random offset added to `NORMAL_FLOOR` so that two processes
/// both starting in `Normal` regime don't mint identical sequences.
fn randomized_normal_base() -> u64 {
    NORMAL_FLOOR + u64::from(OsRng.next_u32())
}

/// Switches the UID allocation regime. Already-allocated UIDs are
/// unaffected; only subsequent `allocate` calls change range.
pub fn set_regime(regime: Regime) {
    let next = match regime {
        Regime::Tiny => 1,
        Regime::Normal => randomized_normal_base(),
    };
    *ALLOCATOR.lock() = Some(Allocator {
        regime,
        next: AtomicU64::new(next),
    });
}

/// Returns the current allocation regime.
pub fn regime() -> Regime {
    ALLOCATOR
        .lock()
        .as_ref()
        .map(|a| a.regime)
        .unwrap_or(Regime::Normal)
}

/// Allocates a fresh, never-before-returned UID under the current
/// regime. Monotonic within a regime; skips `ANONYMOUS`.
pub fn allocate() -> Uid {
    let mut guard = ALLOCATOR.lock();
    let allocator = guard.get_or_insert_with(|| Allocator {
        regime: Regime::Normal,
        next: AtomicU64::new(randomized_normal_base()),
    });
    loop {
        let candidate = allocator.next.fetch_add(1, Ordering::Relaxed);
        if candidate != 0 {
            return Uid(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_regime_is_monotonic_and_skips_zero() {
        set_regime(Regime::Tiny);
        let a = allocate();
        let b = allocate();
        assert!(u64::from(a) < u64::from(b));
        assert!(!a.is_anonymous());
    }

    #[test]
    fn normal_regime_starts_high() {
        set_regime(Regime::Normal);
        let a = allocate();
        assert!(u64::from(a) >= NORMAL_FLOOR);
    }

    #[test]
    fn normal_regime_base_varies_across_resets() {
        set_regime(Regime::Normal);
        let a = allocate();
        set_regime(Regime::Normal);
        let b = allocate();
        // Both draw a fresh random offset; vanishingly unlikely to collide.
        assert_ne!(a, b);
    }
}
