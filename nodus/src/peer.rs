// The façade tying every subsystem crate together into the command surface
// of §6. A `nodus::Peer` is a thin wrapper around `nodus_handle::Peer` (which
// already carries the clock, queue, handle tables, pool and quota); this
// module adds the two operations that need several of those collaborators at
// once — `send` and `recv` — plus straight delegation for everything else.

use std::sync::Arc;

use nodus_base::{Id, Kind, Result};
use nodus_clock::{transaction_stamp, Clock, Stamp};
use nodus_handle::{Handle, Peer as HPeer};
use nodus_pool::{MemPool, Slice};
use nodus_queue::{Entry, Payload};
use nodus_quota::{Charge, UserRegistry};
use nodus_transfer::{
    finish_transfer, inflight_instantiate, install_inflight, install_transfer,
    release_to_inflight, transfer_instantiate, Inflight, InflightEntry,
};
use tracing::{debug, trace, warn};

use crate::config::PeerConfig;

/// What `recv` (§6) hands back: either a message, with its payload bytes
/// already copied out of the pool and any handles it carried resolved to
/// this peer's own ids, or a notification that one of this peer's ids died.
#[derive(Clone, Debug)]
pub enum ReceivedMessage {
    Message {
        stamp: Stamp,
        src: Id,
        dst: Id,
        handles: Vec<Id>,
        slice: Slice,
        payload: Vec<u8>,
    },
    Destroyed {
        stamp: Stamp,
        dst: Id,
    },
}

/// A cheap, cloneable handle to one peer's whole state (clock, queue,
/// handle tables, pool, quota). Every clone observes the same peer.
#[derive(Clone)]
pub struct Peer {
    pub(crate) handle: HPeer,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer").field("id", &self.handle.id()).finish()
    }
}

impl Peer {
    pub fn new(uid: u32, registry: &UserRegistry, config: &PeerConfig) -> Peer {
        let user = registry.lookup(uid);
        let pool = Arc::new(MemPool::new(config.pool_size));
        Peer {
            handle: HPeer::new(user, pool, config.quota),
        }
    }

    /// `peer_init` (§6): must be called once before any other command.
    pub fn peer_init(&self) -> Result<()> {
        self.handle.peer_init()
    }

    /// `peer_query` (§6): report the pool size this peer was created with.
    /// Distinct from `nodus_handle::Peer::query_handle`, which resolves a
    /// single id and is not a listed device-layer command.
    pub fn peer_query(&self) -> usize {
        self.handle.pool().capacity()
    }

    /// Not itself a listed §6 command — the table's commands all assume at
    /// least one node already exists. This is how the very first one gets
    /// created, the same way `peer_clone` creates one for a sibling.
    pub fn create_node(&self) -> Result<Id> {
        let (_, id) = self.handle.create_node()?;
        Ok(id)
    }

    /// `peer_clone` (§6): allocate a sibling peer and one cross-linked
    /// node/handle pair — `self` owns the new node, `sibling` gets a remote
    /// handle to it.
    pub fn peer_clone(&self, sibling: &Peer) -> Result<(Id, Id)> {
        self.handle.peer_clone(&sibling.handle)
    }

    /// `node_destroy` (§6).
    pub fn node_destroy(&self, id: Id) -> Result<()> {
        self.handle.node_destroy(id)
    }

    /// `handle_release` (§6).
    pub fn handle_release(&self, id: Id) -> Result<()> {
        self.handle.handle_release(id)
    }

    /// `slice_release` (§6): forwarded straight to the pool.
    pub fn slice_release(&self, slice: Slice) -> Result<()> {
        self.handle.pool().release(slice)
    }

    /// `peer_reset` (§6): flush every handle and queued entry and zero this
    /// peer's quota shares, optionally keeping one handle attached under a
    /// freshly assigned id (S6).
    pub fn peer_reset(&self, preserve: Option<Id>) -> Result<Option<Id>> {
        let kept_node = match preserve {
            Some(id) => Some(self.handle.lookup_by_id(id).ok_or_else(|| nodus_base::Error::from(Kind::NoSuch))?.node()),
            None => None,
        };
        self.handle.peer_reset();
        self.handle.quota().reset();
        let Some(node) = kept_node else {
            return Ok(None);
        };
        if node.is_owned_by(&self.handle) {
            Ok(Some(self.handle.install_new_owner(&node)?))
        } else {
            let remote = nodus_handle::RemoteHandle::new(node);
            Ok(Some(self.handle.install_claimed(remote)))
        }
    }

    /// `send` (§6 + §4.6): address `target` (one of this peer's own ids for
    /// a node) and multicast `payload` to every peer currently holding a
    /// live handle to that node, optionally carrying along handles named by
    /// `transfer_ids` from this peer's own table.
    pub fn send(&self, target: Id, transfer_ids: &[Id], payload: &[u8]) -> Result<()> {
        let target_handle = self.handle.lookup_by_id(target).ok_or_else(|| nodus_base::Error::from(Kind::NoSuch))?;
        let node = target_handle.node();
        let recipients = node.recipients();
        if recipients.is_empty() {
            return Err(Kind::NoSuch.into());
        }

        let transfer = transfer_instantiate(&self.handle, transfer_ids);
        install_transfer(&self.handle, &transfer)?;
        let sender_user = self.handle.user().clone();

        let mut staged: Vec<Staged> = Vec::with_capacity(recipients.len());
        for (peer, dst_id) in &recipients {
            let mut inflight = inflight_instantiate(peer, &self.handle, &transfer);
            let slice = match peer.pool().alloc(payload) {
                Ok(s) => s,
                Err(e) => {
                    rollback(&staged, &sender_user);
                    finish_transfer(&transfer);
                    return Err(e);
                }
            };
            let charge = Charge {
                memory: payload.len() as i64,
                messages: 1,
                handles: inflight.n_new as i64,
                fds: 0,
            };
            if let Err(e) = peer.quota().charge(&sender_user, charge) {
                let _ = peer.pool().release(slice);
                rollback(&staged, &sender_user);
                finish_transfer(&transfer);
                warn!(target: "nodus", peer = peer.id().0, "send rejected by quota");
                return Err(e);
            }
            install_inflight(peer, &mut inflight);
            let stamp = peer.clock().stage();
            peer.queue()
                .link(stamp, Entry::message(slice, target, *dst_id, Vec::new()));
            trace!(target: "nodus", peer = peer.id().0, stamp = %stamp, "staged");
            staged.push(Staged {
                peer: peer.clone(),
                dst_id: *dst_id,
                stamp,
                slice,
                charge,
                inflight,
            });
        }

        let clocks: Vec<&Clock> = std::iter::once(self.handle.clock())
            .chain(staged.iter().map(|s| s.peer.clock()))
            .collect();
        let tx_stamp = transaction_stamp(clocks);
        debug!(target: "nodus", peer = self.handle.id().0, stamp = %tx_stamp, recipients = staged.len(), "send");

        for s in &staged {
            let ids = resolve_ids(&s.inflight, tx_stamp);
            s.peer.queue().patch(
                s.stamp,
                Entry::message(s.slice, target, s.dst_id, ids),
            );
            s.peer.queue().relink(s.stamp, tx_stamp);
            s.peer.quota().commit(&sender_user, s.charge);
        }
        finish_transfer(&transfer);
        Ok(())
    }

    /// `recv` (§6): dequeue one committed entry and copy its payload out of
    /// the pool, if there is one ready.
    pub fn recv(&self) -> Option<ReceivedMessage> {
        let (stamp, entry) = self.handle.queue().dequeue()?;
        Some(match entry.payload {
            Payload::Message {
                slice,
                src,
                dst,
                handles,
            } => ReceivedMessage::Message {
                stamp,
                src,
                dst,
                handles,
                slice,
                payload: self.handle.pool().read(slice),
            },
            Payload::Destroyed { dst } => ReceivedMessage::Destroyed { stamp, dst },
        })
    }
}

struct Staged {
    peer: HPeer,
    dst_id: Id,
    stamp: Stamp,
    slice: Slice,
    charge: Charge,
    inflight: Inflight,
}

fn rollback(staged: &[Staged], sender_user: &Arc<nodus_quota::User>) {
    for s in staged {
        s.peer.queue().unlink(s.stamp);
        s.peer.quota().discharge(sender_user, s.charge);
        let _ = s.peer.pool().release(s.slice);
    }
}

fn resolve_ids(inflight: &Inflight, tx_stamp: Stamp) -> Vec<Id> {
    inflight
        .entries
        .iter()
        .map(|entry| match entry {
            InflightEntry::Existing(h) => release_to_inflight(h, tx_stamp),
            InflightEntry::New(remote) => {
                release_to_inflight(&Handle::Remote(remote.clone()), tx_stamp)
            }
            InflightEntry::Null => nodus_base::INVALID,
        })
        .collect()
}
