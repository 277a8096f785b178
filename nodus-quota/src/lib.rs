#![allow(dead_code)]

// Per-user quota accounting (§4.7). Three layers: a process-wide `User`
// singleton per uid holding the user's global remaining budget (G) for
// messages, handles and fds; a `PeerQuota` per peer holding that peer's local
// remaining budget (L) for the same three resources plus memory (which has
// no global cap); and, inside the peer quota, one `ResourceCounters` per user
// recording that user's current share (S) of the peer's local budget. A
// charge only succeeds if it leaves the user with at least as much L
// remaining as they already hold (the "never more than half of what's left"
// fairness rule), so one user can never starve every other sender to a peer.

use nodus_base::{Kind, Resource, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

/// An amount to charge or discharge across all four tracked resources. Zero
/// fields are no-ops; charging and discharging both process only the
/// resources present so that, e.g., a pure handle transfer never touches the
/// message counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Charge {
    pub memory: i64,
    pub messages: i64,
    pub handles: i64,
    pub fds: i64,
}

impl Charge {
    pub fn memory(bytes: usize) -> Charge {
        Charge {
            memory: bytes as i64,
            ..Default::default()
        }
    }

    fn entries(self) -> [(Resource, i64); 4] {
        [
            (Resource::Memory, self.memory),
            (Resource::Messages, self.messages),
            (Resource::Handles, self.handles),
            (Resource::Fds, self.fds),
        ]
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ResourceCounters {
    memory: i64,
    messages: i64,
    handles: i64,
    fds: i64,
}

impl ResourceCounters {
    fn get(&self, res: Resource) -> i64 {
        match res {
            Resource::Memory => self.memory,
            Resource::Messages => self.messages,
            Resource::Handles => self.handles,
            Resource::Fds => self.fds,
        }
    }

    fn add(&mut self, res: Resource, amount: i64) {
        let field = match res {
            Resource::Memory => &mut self.memory,
            Resource::Messages => &mut self.messages,
            Resource::Handles => &mut self.handles,
            Resource::Fds => &mut self.fds,
        };
        *field += amount;
    }
}

/// Historical per-peer maxima (§4.8): a peer's local message/handle/fd
/// budgets, before any of it has been shared out to connecting senders.
pub const DEFAULT_LOCAL_MESSAGES: i64 = 64;
pub const DEFAULT_LOCAL_HANDLES: i64 = 256;
pub const DEFAULT_LOCAL_FDS: i64 = 16;

/// The hard maxima a freshly created [`User`] starts with, and the local
/// per-peer budgets a freshly created [`PeerQuota`] starts with.
#[derive(Clone, Copy, Debug)]
pub struct QuotaLimits {
    pub global_messages: i64,
    pub global_handles: i64,
    pub global_fds: i64,
    pub local_messages: i64,
    pub local_handles: i64,
    pub local_fds: i64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        QuotaLimits {
            global_messages: DEFAULT_LOCAL_MESSAGES * 16,
            global_handles: DEFAULT_LOCAL_HANDLES * 16,
            global_fds: DEFAULT_LOCAL_FDS * 16,
            local_messages: DEFAULT_LOCAL_MESSAGES,
            local_handles: DEFAULT_LOCAL_HANDLES,
            local_fds: DEFAULT_LOCAL_FDS,
        }
    }
}

/// A single uid's process-wide global remaining budget (G). One instance is
/// shared by every peer the uid owns, via [`UserRegistry`].
#[derive(Debug)]
pub struct User {
    uid: u32,
    dense_id: u32,
    global_messages: AtomicI64,
    global_handles: AtomicI64,
    global_fds: AtomicI64,
}

impl User {
    fn new(uid: u32, dense_id: u32, limits: QuotaLimits) -> User {
        User {
            uid,
            dense_id,
            global_messages: AtomicI64::new(limits.global_messages),
            global_handles: AtomicI64::new(limits.global_handles),
            global_fds: AtomicI64::new(limits.global_fds),
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn dense_id(&self) -> u32 {
        self.dense_id
    }

    fn global(&self, res: Resource) -> Option<&AtomicI64> {
        match res {
            Resource::Memory => None,
            Resource::Messages => Some(&self.global_messages),
            Resource::Handles => Some(&self.global_handles),
            Resource::Fds => Some(&self.global_fds),
        }
    }

    /// Try to take `amount` off this resource's global remaining budget,
    /// honoring the fairness rule: refuse if doing so would leave less
    /// remaining than twice the user's own existing share `held` plus this
    /// charge (`G − C ≥ S + 2C`), so a user can never hold more than half of
    /// what's left even counting the charge currently in flight.
    fn try_charge_global(&self, res: Resource, amount: i64, held: i64) -> bool {
        let Some(counter) = self.global(res) else {
            return true;
        };
        let mut cur = counter.load(Ordering::Relaxed);
        loop {
            if cur - amount < held + 2 * amount {
                return false;
            }
            match counter.compare_exchange_weak(
                cur,
                cur - amount,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    fn refund_global(&self, res: Resource, amount: i64) {
        if let Some(counter) = self.global(res) {
            counter.fetch_add(amount, Ordering::AcqRel);
        }
    }
}

/// Process-wide table of `User` singletons, one per uid, each assigned a
/// small dense id on first sight so per-peer quota stats can live in a plain
/// array-like map instead of being keyed by the full uid.
#[derive(Default)]
pub struct UserRegistry {
    by_uid: crossbeam_skiplist::SkipMap<u32, std::sync::Arc<User>>,
    next_dense_id: AtomicU32,
    limits: QuotaLimits,
}

impl UserRegistry {
    pub fn new(limits: QuotaLimits) -> UserRegistry {
        UserRegistry {
            by_uid: crossbeam_skiplist::SkipMap::new(),
            next_dense_id: AtomicU32::new(0),
            limits,
        }
    }

    pub fn lookup(&self, uid: u32) -> std::sync::Arc<User> {
        if let Some(entry) = self.by_uid.get(&uid) {
            return entry.value().clone();
        }
        let id = self.next_dense_id.fetch_add(1, Ordering::Relaxed);
        let candidate = std::sync::Arc::new(User::new(uid, id, self.limits));
        let entry = self.by_uid.get_or_insert(uid, candidate);
        entry.value().clone()
    }
}

/// One peer's local remaining budget (L) plus, per user, that user's current
/// share (S) of it. Memory's local budget is seeded from the peer's pool
/// capacity since memory has no independent quota configuration; see
/// [`PeerQuota::new`].
pub struct PeerQuota {
    limits: QuotaLimits,
    local_memory_capacity: i64,
    state: Mutex<PeerQuotaState>,
}

#[derive(Default)]
struct PeerQuotaState {
    local_remaining: ResourceCounters,
    // Keeps the user alive alongside its share so `reset` can refund the
    // global budget without the caller having to remember every user that
    // ever charged this peer.
    per_user: HashMap<u32, (Arc<User>, ResourceCounters)>,
}

impl PeerQuota {
    pub fn new(limits: QuotaLimits, local_memory_capacity: usize) -> PeerQuota {
        PeerQuota {
            limits,
            local_memory_capacity: local_memory_capacity as i64,
            state: Mutex::new(PeerQuotaState {
                local_remaining: ResourceCounters {
                    memory: local_memory_capacity as i64,
                    messages: limits.local_messages,
                    handles: limits.local_handles,
                    fds: limits.local_fds,
                },
                per_user: HashMap::new(),
            }),
        }
    }

    /// Charge `amount` against `user`'s share of this peer's local budget,
    /// and (for every resource but memory) against the user's global budget.
    /// All-or-nothing: if any single resource would breach its bound, the
    /// resources already charged earlier in this call are rolled back.
    pub fn charge(&self, user: &Arc<User>, amount: Charge) -> Result<()> {
        let mut state = self.state.lock();
        let mut applied: Vec<(Resource, i64)> = Vec::new();
        for (res, want) in amount.entries() {
            if want == 0 {
                continue;
            }
            let held = state
                .per_user
                .get(&user.dense_id())
                .map(|(_, c)| c.get(res))
                .unwrap_or(0);
            let local = state.local_remaining.get(res);
            let fits_locally = local >= want && local - want >= held + want;
            let fits_globally = fits_locally && user.try_charge_global(res, want, held);
            if !fits_globally {
                self.rollback_locked(&mut state, user, &applied);
                return Err(Kind::Quota(res).into());
            }
            state.local_remaining.add(res, -want);
            state
                .per_user
                .entry(user.dense_id())
                .or_insert_with(|| (user.clone(), ResourceCounters::default()))
                .1
                .add(res, want);
            applied.push((res, want));
        }
        Ok(())
    }

    fn rollback_locked(&self, state: &mut PeerQuotaState, user: &Arc<User>, applied: &[(Resource, i64)]) {
        for &(res, want) in applied {
            state.local_remaining.add(res, want);
            if let Some((_, c)) = state.per_user.get_mut(&user.dense_id()) {
                c.add(res, -want);
            }
            user.refund_global(res, want);
        }
    }

    /// Give `amount` back unconditionally, both locally and globally.
    pub fn discharge(&self, user: &Arc<User>, amount: Charge) {
        let mut state = self.state.lock();
        for (res, want) in amount.entries() {
            if want == 0 {
                continue;
            }
            state.local_remaining.add(res, want);
            state
                .per_user
                .entry(user.dense_id())
                .or_insert_with(|| (user.clone(), ResourceCounters::default()))
                .1
                .add(res, -want);
            user.refund_global(res, want);
        }
    }

    /// Move `amount` from in-flight to settled. For memory, messages and
    /// handles this is a no-op: the charge against both the peer's local
    /// budget `L` and the sending user's share `S` of it stays exactly as
    /// `charge` left it, since the resource is now owed to the receiver
    /// until something drains its queue, and nothing here does that on its
    /// behalf. Fds are the exception — once installed they're accounted for
    /// by whatever external mechanism owns the fd table, so both `L` and the
    /// user's global budget are refunded and `S` drops back out.
    pub fn commit(&self, user: &Arc<User>, amount: Charge) {
        let mut state = self.state.lock();
        for (res, want) in amount.entries() {
            if want == 0 || res != Resource::Fds {
                continue;
            }
            state
                .per_user
                .entry(user.dense_id())
                .or_insert_with(|| (user.clone(), ResourceCounters::default()))
                .1
                .add(res, -want);
            state.local_remaining.add(res, want);
            user.refund_global(res, want);
        }
    }

    /// `peer_reset` (§6): give back every outstanding share in full, to every
    /// user that holds one, and restore the local budget to what a freshly
    /// constructed peer would have. Unlike [`Self::commit`], this refunds
    /// handles and messages globally too — the peer is being wiped, so
    /// nothing is left "owed" to any receiver.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for (_, (user, counters)) in state.per_user.drain() {
            for res in [Resource::Messages, Resource::Handles, Resource::Fds] {
                let owed = counters.get(res);
                if owed != 0 {
                    user.refund_global(res, owed);
                }
            }
        }
        state.local_remaining = ResourceCounters {
            memory: self.local_memory_capacity,
            messages: self.limits.local_messages,
            handles: self.limits.local_handles,
            fds: self.limits.local_fds,
        };
    }

    pub fn local_remaining(&self, res: Resource) -> i64 {
        self.state.lock().local_remaining.get(res)
    }

    pub fn share_of(&self, user: &Arc<User>, res: Resource) -> i64 {
        self.state
            .lock()
            .per_user
            .get(&user.dense_id())
            .map(|(_, c)| c.get(res))
            .unwrap_or(0)
    }
}
