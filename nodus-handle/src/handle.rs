// §4.4's reference model: three independent counters per handle — `ref`
// (object lifetime), `n_inflight` (copies in transit, -1 before install),
// and `n_user` (copies a caller is actively holding). A `Handle` is either
// the node's one embedded owner or an independently allocated `RemoteHandle`
// (§9's design note); both expose the same operations.

use nodus_base::{Id, Kind, Result, INVALID};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::node::{Node, NodeKey};
use crate::peer::PeerInner;

const UNINSTALLED: i64 = -1;

pub struct RemoteHandle {
    pub node: Arc<Node>,
    pub(crate) holder: Mutex<Option<Weak<PeerInner>>>,
    id: AtomicU64,
    obj_ref: AtomicU32,
    n_inflight: AtomicI64,
    n_user: AtomicU32,
}

impl RemoteHandle {
    /// Build a detached remote handle copy of `node`: no id, no holder, and
    /// not yet linked into the node's own handle list (§4.6's "allocate a
    /// fresh, unattached copy"). [`Peer::install`](crate::Peer::install)
    /// finishes attaching it.
    pub fn new(node: Arc<Node>) -> Arc<RemoteHandle> {
        Arc::new(RemoteHandle {
            node,
            holder: Mutex::new(None),
            id: AtomicU64::new(INVALID.0),
            obj_ref: AtomicU32::new(1),
            n_inflight: AtomicI64::new(UNINSTALLED),
            n_user: AtomicU32::new(0),
        })
    }

    pub fn id(&self) -> Id {
        Id(self.id.load(Ordering::Acquire))
    }

    pub(crate) fn set_id(&self, id: Id) {
        self.id.store(id.0, Ordering::Release);
    }

    pub fn is_installed(&self) -> bool {
        !self.id().is_invalid()
    }

    pub fn obj_ref_count(&self) -> u32 {
        self.obj_ref.load(Ordering::Acquire)
    }

    pub fn ref_acquire(&self) -> bool {
        let mut cur = self.obj_ref.load(Ordering::Relaxed);
        loop {
            if cur == 0 {
                return false;
            }
            match self.obj_ref.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Returns true iff this call brought the count to zero.
    pub fn ref_release(&self) -> bool {
        let prev = self.obj_ref.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "ref_release on a handle already at zero");
        prev == 1
    }

    pub fn n_inflight(&self) -> i64 {
        self.n_inflight.load(Ordering::Acquire)
    }

    /// Installing always hands the caller one owned in-flight pin, whether
    /// that's this freshly published copy or (per `Peer::install`'s sibling
    /// branch) an extra pin acquired on an existing one — so the baseline
    /// here mirrors an owner's: installed starts at exactly one, not zero.
    pub(crate) fn mark_installed(&self) {
        self.n_inflight.store(1, Ordering::Release);
    }

    pub fn acquire_inflight(&self) -> Result<()> {
        let mut cur = self.n_inflight.load(Ordering::Relaxed);
        loop {
            if cur < 0 {
                return Err(Kind::Stale.into());
            }
            match self.n_inflight.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Floors at zero rather than at `UNINSTALLED` (-1): once installed, a
    /// handle never goes back to looking uninstalled just because it was
    /// released one time too many.
    pub fn release_inflight(&self) {
        let mut cur = self.n_inflight.load(Ordering::Relaxed);
        loop {
            let next = if cur <= 0 { 0 } else { cur - 1 };
            match self.n_inflight.compare_exchange_weak(
                cur,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn n_user(&self) -> u32 {
        self.n_user.load(Ordering::Acquire)
    }

    pub fn acquire_user(&self) -> u32 {
        self.n_user.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn release_user(&self) -> u32 {
        self.n_user.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub(crate) fn set_holder(&self, peer: Option<Weak<PeerInner>>) {
        *self.holder.lock() = peer;
    }

    pub fn holder(&self) -> Option<Weak<PeerInner>> {
        self.holder.lock().clone()
    }
}

/// Either the one embedded owner of a node, or an independently allocated
/// remote reference to someone else's node.
pub enum Handle {
    Owner(Arc<Node>),
    Remote(Arc<RemoteHandle>),
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        match self {
            Handle::Owner(n) => Handle::Owner(n.clone()),
            Handle::Remote(h) => Handle::Remote(h.clone()),
        }
    }
}

impl Handle {
    pub fn node(&self) -> Arc<Node> {
        match self {
            Handle::Owner(node) => node.clone(),
            Handle::Remote(h) => h.node.clone(),
        }
    }

    pub fn node_key(&self) -> NodeKey {
        self.node().key
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, Handle::Owner(_))
    }

    pub fn id(&self) -> Id {
        match self {
            Handle::Owner(node) => node.state.lock().owner_id,
            Handle::Remote(h) => h.id(),
        }
    }

    pub(crate) fn set_id(&self, id: Id) {
        match self {
            Handle::Owner(node) => node.state.lock().owner_id = id,
            Handle::Remote(h) => h.set_id(id),
        }
    }

    pub fn holder(&self) -> Option<Weak<PeerInner>> {
        match self {
            Handle::Owner(node) => node.state.lock().owner_holder.clone(),
            Handle::Remote(h) => h.holder(),
        }
    }

    pub(crate) fn set_holder(&self, peer: Option<Weak<PeerInner>>) {
        match self {
            Handle::Owner(node) => node.state.lock().owner_holder = peer,
            Handle::Remote(h) => h.set_holder(peer),
        }
    }

    pub fn n_inflight(&self) -> i64 {
        match self {
            Handle::Owner(node) => node.state.lock().owner_n_inflight,
            Handle::Remote(h) => h.n_inflight(),
        }
    }

    /// §4.4: owners can always reacquire an in-flight reference, since the
    /// resource is theirs regardless of how many copies are currently in
    /// transit elsewhere.
    pub fn acquire_inflight(&self) -> Result<()> {
        match self {
            Handle::Owner(node) => {
                node.state.lock().owner_n_inflight += 1;
                Ok(())
            }
            Handle::Remote(h) => h.acquire_inflight(),
        }
    }

    pub fn release_inflight(&self) {
        match self {
            Handle::Owner(node) => {
                let mut s = node.state.lock();
                s.owner_n_inflight = (s.owner_n_inflight - 1).max(0);
            }
            Handle::Remote(h) => h.release_inflight(),
        }
    }

    pub fn n_user(&self) -> u32 {
        match self {
            Handle::Owner(node) => node.state.lock().owner_n_user,
            Handle::Remote(h) => h.n_user(),
        }
    }

    pub fn acquire_user(&self) -> u32 {
        match self {
            Handle::Owner(node) => {
                let mut s = node.state.lock();
                s.owner_n_user += 1;
                s.owner_n_user
            }
            Handle::Remote(h) => h.acquire_user(),
        }
    }

    pub fn release_user(&self) -> u32 {
        match self {
            Handle::Owner(node) => {
                let mut s = node.state.lock();
                s.owner_n_user = s.owner_n_user.saturating_sub(1);
                s.owner_n_user
            }
            Handle::Remote(h) => h.release_user(),
        }
    }

    pub fn ref_acquire(&self) -> bool {
        match self {
            Handle::Owner(node) => {
                let mut s = node.state.lock();
                if s.owner_ref == 0 {
                    false
                } else {
                    s.owner_ref += 1;
                    true
                }
            }
            Handle::Remote(h) => h.ref_acquire(),
        }
    }

    /// Drop one reference; returns true iff this was the last one.
    pub fn ref_release(&self) -> bool {
        match self {
            Handle::Owner(node) => {
                let mut s = node.state.lock();
                debug_assert!(s.owner_ref >= 1, "ref_release on an owner already at zero");
                s.owner_ref = s.owner_ref.saturating_sub(1);
                s.owner_ref == 0
            }
            Handle::Remote(h) => h.ref_release(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Weak as StdWeak;
    use test_log::test;

    fn owner_node() -> Arc<Node> {
        Node::new(StdWeak::new())
    }

    #[test]
    fn test_owner_ref_release_reaches_zero_after_one_drop() {
        let node = owner_node();
        let handle = Handle::Owner(node);
        assert!(handle.ref_release());
    }

    #[test]
    fn test_owner_inflight_always_acquirable() {
        let node = owner_node();
        let handle = Handle::Owner(node);
        let before = handle.n_inflight();
        handle.acquire_inflight().unwrap();
        handle.acquire_inflight().unwrap();
        assert_eq!(handle.n_inflight(), before + 2);
    }

    #[test]
    fn test_remote_inflight_rejected_before_install() {
        let remote = RemoteHandle::new(owner_node());
        assert!(remote.acquire_inflight().is_err());
        remote.mark_installed();
        assert!(remote.acquire_inflight().is_ok());
    }

    #[test]
    fn test_remote_ref_acquire_fails_once_zero() {
        let remote = RemoteHandle::new(owner_node());
        assert!(remote.ref_release());
        assert!(!remote.ref_acquire());
    }

    #[test]
    fn test_handle_clone_shares_the_same_remote() {
        let remote = RemoteHandle::new(owner_node());
        let a = Handle::Remote(remote);
        let b = a.clone();
        a.acquire_user();
        assert_eq!(b.n_inflight(), a.n_inflight());
    }
}
