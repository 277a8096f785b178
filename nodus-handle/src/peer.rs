// The container owning a lock, a clock, a queue, the handle tables, a
// receive pool and a backreference to a user (§3). Lookups by id or by node
// identity never take the peer lock (§4.3) — `crossbeam_skiplist::SkipMap`
// gives wait-free concurrent reads for both tables without a hand-rolled
// seqlock (§5.1); the lock only serializes installs, releases and the
// destruction protocol against each other.

use crossbeam_skiplist::SkipMap;
use nodus_base::{Id, Kind, Result};
use nodus_clock::Clock;
use nodus_pool::Pool;
use nodus_queue::Queue;
use nodus_quota::{PeerQuota, QuotaLimits, User};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::handle::{Handle, RemoteHandle};
use crate::node::{Node, NodeKey};

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// A small, process-wide, monotonic identifier used in tracing spans and in
/// the (now unreachable, see DESIGN.md) tie-break rule between two
/// notifications that would otherwise land on the same receiver stamp.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PeerId(pub u64);

pub struct PeerInner {
    pub id: PeerId,
    pub(crate) lock: Mutex<()>,
    pub(crate) clock: Clock,
    pub(crate) queue: Queue,
    pool: Arc<dyn Pool>,
    user: Arc<User>,
    quota: PeerQuota,
    handle_ids: AtomicU64,
    pub(crate) by_id: SkipMap<Id, Handle>,
    pub(crate) by_node: SkipMap<NodeKey, Handle>,
    initialized: AtomicBool,
    shutdown: AtomicBool,
}

/// A cheap, cloneable reference to a peer. Every clone shares the same
/// underlying tables, clock and queue.
pub struct Peer(pub(crate) Arc<PeerInner>);

impl Clone for Peer {
    fn clone(&self) -> Self {
        Peer(self.0.clone())
    }
}

impl Peer {
    pub fn new(user: Arc<User>, pool: Arc<dyn Pool>, limits: QuotaLimits) -> Peer {
        let capacity = pool.capacity();
        Peer(Arc::new(PeerInner {
            id: PeerId(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed)),
            lock: Mutex::new(()),
            clock: Clock::new(),
            queue: Queue::new(),
            pool,
            user,
            quota: PeerQuota::new(limits, capacity),
            handle_ids: AtomicU64::new(0),
            by_id: SkipMap::new(),
            by_node: SkipMap::new(),
            initialized: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> PeerId {
        self.0.id
    }

    pub fn clock(&self) -> &Clock {
        &self.0.clock
    }

    pub fn queue(&self) -> &Queue {
        &self.0.queue
    }

    pub fn pool(&self) -> &Arc<dyn Pool> {
        &self.0.pool
    }

    pub fn quota(&self) -> &PeerQuota {
        &self.0.quota
    }

    pub fn user(&self) -> &Arc<User> {
        &self.0.user
    }

    pub fn downgrade(&self) -> Weak<PeerInner> {
        Arc::downgrade(&self.0)
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.shutdown.load(Ordering::Acquire)
    }

    fn next_id(&self) -> Id {
        let n = self.0.handle_ids.fetch_add(1, Ordering::Relaxed) + 1;
        Id::from_counter(n)
    }

    /// `peer_init` (§6): must be called exactly once before any other
    /// command on this peer.
    pub fn peer_init(&self) -> Result<()> {
        if self.0.initialized.swap(true, Ordering::AcqRel) {
            return Err(Kind::AlreadyInit.into());
        }
        Ok(())
    }

    fn require_init(&self) -> Result<()> {
        if !self.0.initialized.load(Ordering::Acquire) {
            return Err(Kind::NotInit.into());
        }
        if self.0.shutdown.load(Ordering::Acquire) {
            return Err(Kind::Shutdown.into());
        }
        Ok(())
    }

    /// Create a brand-new node owned by this peer, with its owner handle
    /// installed immediately: there is no sibling to race against a node
    /// nobody else has ever heard of (§4.3 step 1's trivial case).
    pub fn create_node(&self) -> Result<(Arc<Node>, Id)> {
        self.require_init()?;
        let _g = self.0.lock.lock();
        let node = Node::new(self.downgrade());
        let handle = Handle::Owner(node.clone());
        let id = self.next_id();
        handle.set_id(id);
        self.0.by_id.insert(id, handle.clone());
        self.0.by_node.insert(node.key, handle);
        Ok((node, id))
    }

    /// Build a fresh node+owner-handle pair without installing it into this
    /// peer's own tables yet (§4.6's "not yet attached" transfer-level new
    /// handle).
    pub fn new_detached_node(&self) -> Arc<Node> {
        Node::new(self.downgrade())
    }

    /// §4.6 install step 1: attach a transfer-level new node to the
    /// sender's own tables, assigning it its id.
    pub fn install_new_owner(&self, node: &Arc<Node>) -> Result<Id> {
        let _g = self.0.lock.lock();
        if node.is_dead() {
            return Err(Kind::NoSuch.into());
        }
        let handle = Handle::Owner(node.clone());
        let id = self.next_id();
        handle.set_id(id);
        self.0.by_id.insert(id, handle.clone());
        self.0.by_node.insert(node.key, handle);
        Ok(id)
    }

    /// §4.3: resolve an id to its handle without taking the peer lock. A
    /// miss is authoritative — ids are monotonic and never reused, so it can
    /// only mean this peer never held that id.
    pub fn lookup_by_id(&self, id: Id) -> Option<Handle> {
        if id.is_invalid() {
            return None;
        }
        self.0.by_id.get(&id).map(|e| e.value().clone())
    }

    /// §4.3: resolve a node to whichever handle this peer already holds for
    /// it, if any — used to detect a sibling handle when installing a
    /// transferred reference. A handle observed with a zero ref count is
    /// mid-finalize; by construction every finalizer removes the map entry
    /// in the same locked section that drops the count to zero, so this
    /// loop is a defensive recheck rather than a real steady-state path.
    pub fn lookup_by_node(&self, key: NodeKey) -> Option<Handle> {
        loop {
            let entry = self.0.by_node.get(&key)?;
            let handle = entry.value().clone();
            if handle_is_live(&handle) {
                return Some(handle);
            }
        }
    }

    /// Install a freshly constructed, not-yet-installed remote handle into
    /// this peer's tables, detecting whether a sibling handle to the same
    /// node already exists (§4.3 step 2). Returns the id the caller should
    /// now treat as authoritative: the new handle's own id, or the
    /// sibling's, whichever applies.
    pub fn install(&self, remote: Arc<RemoteHandle>) -> Id {
        let _g = self.0.lock.lock();
        if let Some(sibling) = self.0.by_node.get(&remote.node.key) {
            // `remote` itself is discarded unpublished; the caller still
            // walks away owning one reference, acquired on the sibling it
            // gets back instead (§4.3 step 2, §8's round-trip law).
            let handle = sibling.value().clone();
            handle.acquire_inflight().expect("live sibling handle");
            handle.ref_acquire();
            return handle.id();
        }
        let id = self.next_id();
        remote.set_id(id);
        remote.mark_installed();
        remote.set_holder(Some(self.downgrade()));
        remote.node.link_remote(remote.clone());
        let handle = Handle::Remote(remote);
        self.0.by_id.insert(id, handle.clone());
        self.0.by_node.insert(handle.node_key(), handle);
        id
    }

    /// [`Self::install`], then immediately claim the result on the caller's
    /// behalf: unlike a transfer's inflight install, an id returned straight
    /// to a caller (`peer_clone`, the preserved handle in `peer_reset`) has
    /// no separate delivery step, so the one pin `install` already grants
    /// is marked user-held right away instead of waiting for a `recv`.
    pub fn install_claimed(&self, remote: Arc<RemoteHandle>) -> Id {
        let id = self.install(remote);
        let handle = self.lookup_by_id(id).expect("just installed");
        handle.acquire_user();
        id
    }

    /// `handle_release` (§6): decrement `n_user`. Reaching zero cascades into
    /// one `release_inflight` of the same handle (§4.4); reaching zero there
    /// in turn unlinks it — or, for the node's owner, hands off to the
    /// destruction protocol, exactly as if `node_destroy` had been called
    /// (§4.5's "natural, last-inflight-dropped" trigger).
    pub fn handle_release(&self, id: Id) -> Result<()> {
        self.require_init()?;
        let handle = self.lookup_by_id(id).ok_or_else(|| nodus_base::Error::from(Kind::NoSuch))?;
        if handle.release_user() > 0 {
            return Ok(());
        }
        handle.release_inflight();
        if handle.n_inflight() > 0 {
            return Ok(());
        }
        match &handle {
            Handle::Owner(node) => {
                if node.is_dead() {
                    Ok(())
                } else {
                    crate::destroy::run(node.clone(), self)
                }
            }
            Handle::Remote(_) => {
                let _g = self.0.lock.lock();
                self.0.by_id.remove(&id);
                self.0.by_node.remove(&handle.node_key());
                handle.ref_release();
                Ok(())
            }
        }
    }

    /// `node_destroy` (§6): the owner explicitly tears down a node it still
    /// holds a reference to, regardless of how many references remain.
    pub fn node_destroy(&self, id: Id) -> Result<()> {
        self.require_init()?;
        let handle = self.lookup_by_id(id).ok_or_else(|| nodus_base::Error::from(Kind::NoSuch))?;
        let Handle::Owner(node) = &handle else {
            return Err(Kind::NotOwner.into());
        };
        crate::destroy::run(node.clone(), self)
    }

    /// Confirm a handle this peer holds still resolves to itself — mostly
    /// useful as an existence check, since `by_id` is keyed by the very id
    /// it returns. Not the `peer_query` device-layer command (§6), which
    /// reports the pool size instead; that lives on `nodus::Peer`.
    pub fn query_handle(&self, id: Id) -> Result<Id> {
        self.require_init()?;
        self.lookup_by_id(id)
            .map(|h| h.id())
            .ok_or_else(|| Kind::NoSuch.into())
    }

    /// `peer_reset` (§6): drop every handle and queued entry as if this
    /// peer had just been created, without tearing down the `Peer` object.
    /// `peer_reset` (§6): detach every handle this peer currently holds,
    /// exactly as if `handle_release` had dropped it to zero on each — nodes
    /// this peer owns are destroyed (§4.5), remote handles are unlinked from
    /// their node's list — then discard this peer's own tables and queue.
    pub fn peer_reset(&self) {
        let entries: Vec<Handle> = {
            let _g = self.0.lock.lock();
            let snapshot = self.0.by_id.iter().map(|e| e.value().clone()).collect();
            while self.0.by_id.pop_front().is_some() {}
            while self.0.by_node.pop_front().is_some() {}
            snapshot
        };
        for handle in entries {
            match &handle {
                Handle::Owner(node) => {
                    if !node.is_dead() {
                        let _ = crate::destroy::run(node.clone(), self);
                    }
                }
                Handle::Remote(remote) => {
                    remote.node.unlink_remote(remote);
                    remote.set_holder(None);
                    remote.ref_release();
                }
            }
        }
        self.0.queue.flush();
    }

    pub fn shutdown(&self) {
        self.0.shutdown.store(true, Ordering::Release);
    }

    /// `peer_clone` (§6): create a fresh node owned by `self` and a remote
    /// handle to it already installed in `sibling`, without going through a
    /// full transfer/inflight batch. Used by tests and the demonstration
    /// binary to stand up two peers that already know about each other.
    pub fn peer_clone(&self, sibling: &Peer) -> Result<(Id, Id)> {
        self.require_init()?;
        sibling.require_init()?;
        let (node, owner_id) = self.create_node()?;
        let remote = RemoteHandle::new(node);
        let remote_id = sibling.install_claimed(remote);
        Ok((owner_id, remote_id))
    }
}

fn handle_is_live(handle: &Handle) -> bool {
    match handle {
        Handle::Owner(node) => !node.is_dead(),
        Handle::Remote(h) => h.obj_ref_count() > 0,
    }
}
