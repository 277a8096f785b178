// An addressable destination, owned by exactly one peer (§3). A node's
// owner handle is never a separate allocation from the node itself — its
// three reference counters and backreference live directly on `NodeState` —
// so a node and its owner can never form an `Arc` cycle (§9's design note).

use nodus_base::{Id, INVALID};
use nodus_clock::Stamp;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::handle::RemoteHandle;
use crate::peer::{Peer, PeerInner};

static NEXT_NODE_KEY: AtomicU64 = AtomicU64::new(1);

/// Stands in for "the identity of a node's owner handle" (§3's glossary
/// entry): a small, monotonic, process-wide key assigned once at node
/// creation, used as the key of every peer's by-node index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeKey(u64);

pub(crate) const NODE_ALIVE: Stamp = Stamp(0);
pub(crate) const NODE_DESTROYING: Stamp = Stamp(1);

pub struct Node {
    pub key: NodeKey,
    pub(crate) state: Mutex<NodeState>,
}

pub(crate) struct NodeState {
    pub timestamp: Stamp,
    pub owner_holder: Option<Weak<PeerInner>>,
    pub owner_id: Id,
    pub owner_ref: u32,
    pub owner_n_inflight: i64,
    pub owner_n_user: u32,
    pub remotes: Vec<Arc<RemoteHandle>>,
}

impl Node {
    pub(crate) fn new(owner_holder: Weak<PeerInner>) -> Arc<Node> {
        let key = NodeKey(NEXT_NODE_KEY.fetch_add(1, Ordering::Relaxed));
        Arc::new(Node {
            key,
            state: Mutex::new(NodeState {
                timestamp: NODE_ALIVE,
                owner_holder: Some(owner_holder),
                owner_id: INVALID,
                owner_ref: 1,
                owner_n_inflight: 1,
                owner_n_user: 1,
                remotes: Vec::new(),
            }),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().timestamp == NODE_ALIVE
    }

    pub fn is_destroying(&self) -> bool {
        self.state.lock().timestamp == NODE_DESTROYING
    }

    pub fn is_dead(&self) -> bool {
        let t = self.state.lock().timestamp;
        t != NODE_ALIVE && t != NODE_DESTROYING
    }

    /// The stamp at which this node died, once it has (§8: every receiver's
    /// `Destroyed` notification carries this same value).
    pub fn death_stamp(&self) -> Option<Stamp> {
        let t = self.state.lock().timestamp;
        if t != NODE_ALIVE && t != NODE_DESTROYING {
            Some(t)
        } else {
            None
        }
    }

    /// Handles currently linked to this node: every remote plus the one
    /// embedded owner (§8's handle-count invariant).
    pub fn handle_count(&self) -> usize {
        let state = self.state.lock();
        state.remotes.len() + if state.owner_ref > 0 { 1 } else { 0 }
    }

    /// The node's current owner peer, if it is still reachable (§4.6's
    /// install steps need to take whichever peer currently owns a node's
    /// lock, which may be neither the sender nor the receiver of a transfer).
    pub fn owner_peer(&self) -> Option<Peer> {
        self.state
            .lock()
            .owner_holder
            .as_ref()
            .and_then(|w| w.upgrade())
            .map(Peer)
    }

    /// Every peer currently holding a live handle to this node, paired with
    /// that peer's own id for it (§4.5's destruction fan-out snapshots the
    /// same set; a `send` addressed at this node multicasts to it too).
    pub fn recipients(&self) -> Vec<(Peer, Id)> {
        let state = self.state.lock();
        let mut out = Vec::with_capacity(state.remotes.len() + 1);
        if state.owner_ref > 0 {
            if let Some(owner) = state.owner_holder.as_ref().and_then(|w| w.upgrade()) {
                out.push((Peer(owner), state.owner_id));
            }
        }
        for remote in &state.remotes {
            if let Some(holder) = remote.holder().and_then(|w| w.upgrade()) {
                out.push((Peer(holder), remote.id()));
            }
        }
        out
    }

    pub fn is_owned_by(&self, peer: &Peer) -> bool {
        self.state
            .lock()
            .owner_holder
            .as_ref()
            .and_then(|w| w.upgrade())
            .map(|p| Arc::ptr_eq(&p, &peer.0))
            .unwrap_or(false)
    }

    pub(crate) fn link_remote(&self, handle: Arc<RemoteHandle>) {
        self.state.lock().remotes.push(handle);
    }

    pub(crate) fn unlink_remote(&self, target: &Arc<RemoteHandle>) {
        let mut state = self.state.lock();
        state.remotes.retain(|h| !Arc::ptr_eq(h, target));
    }
}
