// The three-phase node destruction protocol (§4.5). Phase A marks the node
// destroying and snapshots its current remote handles under the owning
// peer's lock, so no new handle can be installed to it afterward. Phase B
// stages a `Destroyed` notification in every live receiver's queue, then
// rendezvous every touched clock — including the owner's — on one commit
// stamp via [`nodus_clock::transaction_stamp`], and relinks every staged
// entry to it, so every receiver observes the destruction at the same
// logical instant. Phase C drops the owning peer's lock before touching any
// receiver peer's lock (never holding two peer locks at once) and unlinks
// the node from every table that still references it.

use nodus_base::{Kind, Result};
use nodus_clock::{transaction_stamp, Clock};
use nodus_queue::Entry;
use std::sync::Arc;

use crate::node::{Node, NODE_ALIVE, NODE_DESTROYING};
use crate::peer::Peer;

pub(crate) fn run(node: Arc<Node>, owner_peer: &Peer) -> Result<()> {
    let (remotes, owner_id) = {
        let _g = owner_peer.0.lock.lock();
        let mut state = node.state.lock();
        if state.timestamp != NODE_ALIVE {
            return Err(Kind::InProgress.into());
        }
        state.timestamp = NODE_DESTROYING;
        (state.remotes.clone(), state.owner_id)
    };

    let mut staged = Vec::with_capacity(remotes.len());
    for remote in &remotes {
        let Some(peer_weak) = remote.holder() else {
            continue;
        };
        let Some(peer) = peer_weak.upgrade() else {
            continue;
        };
        let stamp = peer.clock.stage();
        peer.queue.link(stamp, Entry::destroyed(remote.id()));
        staged.push((peer, stamp));
    }

    let clocks: Vec<&Clock> = std::iter::once(&owner_peer.0.clock)
        .chain(staged.iter().map(|(p, _)| &p.clock))
        .collect();
    let commit = transaction_stamp(clocks);
    for (peer, stamp) in &staged {
        peer.queue.relink(*stamp, commit);
    }

    {
        let _g = owner_peer.0.lock.lock();
        owner_peer.0.by_id.remove(&owner_id);
        owner_peer.0.by_node.remove(&node.key);
        let mut state = node.state.lock();
        state.timestamp = commit;
        state.owner_holder = None;
        state.owner_ref = 0;
        state.remotes.clear();
    }
    for remote in &remotes {
        if let Some(peer) = remote.holder().and_then(|w| w.upgrade()) {
            let _g = peer.lock.lock();
            peer.by_id.remove(&remote.id());
            peer.by_node.remove(&node.key);
        }
        remote.set_holder(None);
    }
    Ok(())
}
