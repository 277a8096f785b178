// Per-peer 62-bit monotonic stamp generator (§4.1). `stage` mints a fresh odd
// reservation strictly greater than anything this clock has issued so far.
// Commit stamps are minted by [`transaction_stamp`], which runs a small
// rendezvous over every clock a transaction touches (the sender's own, every
// recipient's, and the owner clock of any node it transmits a handle to) so
// that they all agree on one even value and none of them ever issues a stamp
// twice — including the degenerate case where two unrelated transactions on
// the same peer would otherwise both want "whatever the clock already reads".

use crate::Stamp;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Clock(AtomicU64);

impl Clock {
    pub fn new() -> Self {
        Clock(AtomicU64::new(0))
    }

    pub fn current(&self) -> Stamp {
        Stamp(self.0.load(Ordering::Acquire))
    }

    /// Mint the next staging stamp: odd, strictly greater than every value this
    /// clock has issued so far.
    pub fn stage(&self) -> Stamp {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            let next = if cur % 2 == 0 { cur + 1 } else { cur + 2 };
            match self
                .0
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Stamp(next),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Move this clock to exactly `target`. Succeeds (and the clock ends up at
    /// `target`) iff no one has advanced this clock past `target` already; on
    /// failure returns the clock's actual, higher, current value so the caller
    /// can propose a new, larger target to every clock in the rendezvous.
    fn try_advance_to_exactly(&self, target: Stamp) -> Result<Stamp, Stamp> {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            if cur > target.0 {
                return Err(Stamp(cur));
            }
            if cur == target.0 {
                return Ok(Stamp(cur));
            }
            match self.0.compare_exchange_weak(
                cur,
                target.0,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(target),
                Err(actual) => cur = actual,
            }
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

/// Compute the single transaction stamp for a send touching several clocks,
/// and leave every one of them advanced to exactly that value (§4.1). Never
/// returns a value any of the given clocks has produced or been set to
/// before, since every other caller of these clocks only ever moves them
/// forward too.
pub fn transaction_stamp<'a>(clocks: impl IntoIterator<Item = &'a Clock>) -> Stamp {
    let clocks: Vec<&Clock> = clocks.into_iter().collect();
    let mut target = propose(&clocks);
    loop {
        let mut retry = false;
        for c in &clocks {
            if let Err(higher) = c.try_advance_to_exactly(target) {
                target = target.max(higher).next_strictly_even();
                retry = true;
            }
        }
        if !retry {
            // Every clock that saw a stale `target` on this pass needs a
            // second chance to land on the final, now-settled value.
            for c in &clocks {
                let _ = c.try_advance_to_exactly(target);
            }
            return target;
        }
    }
}

fn propose(clocks: &[&Clock]) -> Stamp {
    let max = clocks
        .iter()
        .map(|c| c.current())
        .max()
        .unwrap_or(Stamp::ZERO);
    max.next_strictly_even()
}

impl Stamp {
    /// The smallest even value strictly greater than `self`. Zero (the node
    /// "alive" sentinel, §4.1) is never returned as a transaction stamp.
    fn next_strictly_even(self) -> Stamp {
        let bumped = self.0 + 1;
        Stamp(if bumped % 2 == 0 { bumped } else { bumped + 1 })
    }
}
