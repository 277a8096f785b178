#![allow(dead_code)]

// Transfer and inflight batches (§4.6): the machinery that carries handles
// across a send. A `Transfer` is built once, on the sender, from the ids
// user space supplied. An `Inflight` is then derived from it once per
// recipient. Install and commit are free functions rather than methods on
// either type because they need both the transfer/inflight data and a
// `Peer` to act on.
//
// The spec's four-step install procedure exists to avoid ever holding two
// peer locks at once, by splitting "attach to the node's handle list" (needs
// the node's *owner* peer) from "attach to the receiver's own tables" (needs
// the *receiver* peer). Here a node's handle list is guarded by the node's
// own internal lock rather than literally being "the owner peer's lock", so
// those two steps collapse into the two calls below without ever taking two
// `Peer` locks in the same call stack — see DESIGN.md.

use nodus_base::{Id, Result, INVALID};
use nodus_clock::Stamp;
use nodus_handle::{Handle, Node, Peer, RemoteHandle};
use std::sync::Arc;
use tracing::debug;

pub enum TransferEntry {
    New(Arc<Node>),
    Existing(Handle),
    Null,
}

/// A single batch of ids held by the sender for one send (§4.6).
pub struct Transfer {
    pub entries: Vec<TransferEntry>,
    pub n_new: usize,
}

/// Import user-supplied ids on `sender`: an id with the ALLOCATE flag set
/// allocates a fresh, unattached node+owner-handle; an ordinary id is looked
/// up and pinned in flight, or resolved to [`TransferEntry::Null`] if stale.
pub fn transfer_instantiate(sender: &Peer, ids: &[Id]) -> Transfer {
    let mut entries = Vec::with_capacity(ids.len());
    let mut n_new = 0;
    for &id in ids {
        if id.is_allocate_request() {
            entries.push(TransferEntry::New(sender.new_detached_node()));
            n_new += 1;
        } else {
            match sender.lookup_by_id(id) {
                Some(handle) if handle.acquire_inflight().is_ok() => {
                    entries.push(TransferEntry::Existing(handle))
                }
                _ => entries.push(TransferEntry::Null),
            }
        }
    }
    Transfer { entries, n_new }
}

pub enum InflightEntry {
    Existing(Handle),
    New(Arc<RemoteHandle>),
    Null,
}

/// A per-receiver batch derived from a [`Transfer`] (§4.6).
pub struct Inflight {
    pub entries: Vec<InflightEntry>,
    /// Total newly allocated handles on this receiver.
    pub n_new: usize,
    /// Of those, the ones whose node the *sender* already owns — these are
    /// attached to the node's handle list without needing any third peer's
    /// cooperation, since the sender is already the attach-authoritative
    /// peer for its own nodes (§4.6 install step 2's reading; see
    /// DESIGN.md for why the spec's wording is resolved this way).
    pub n_new_local: usize,
}

pub fn inflight_instantiate(receiver: &Peer, sender: &Peer, transfer: &Transfer) -> Inflight {
    let mut entries = Vec::with_capacity(transfer.entries.len());
    let mut n_new = 0;
    let mut n_new_local = 0;
    for entry in &transfer.entries {
        let node = match entry {
            TransferEntry::New(node) => node.clone(),
            TransferEntry::Existing(handle) => handle.node(),
            TransferEntry::Null => {
                entries.push(InflightEntry::Null);
                continue;
            }
        };
        match receiver.lookup_by_node(node.key) {
            Some(handle) if handle.acquire_inflight().is_ok() => {
                entries.push(InflightEntry::Existing(handle));
            }
            _ => {
                let is_sender_owned = node.is_owned_by(sender);
                let remote = RemoteHandle::new(node);
                n_new += 1;
                if is_sender_owned {
                    n_new_local += 1;
                }
                entries.push(InflightEntry::New(remote));
            }
        }
    }
    Inflight {
        entries,
        n_new,
        n_new_local,
    }
}

/// §4.6 install, steps 1+2/3 collapsed (see module docs): attach every
/// transfer-level new node to the sender's own tables.
pub fn install_transfer(sender: &Peer, transfer: &Transfer) -> Result<()> {
    for entry in &transfer.entries {
        if let TransferEntry::New(node) = entry {
            sender.install_new_owner(node)?;
        }
    }
    Ok(())
}

/// Release the sender-side inflight pin `transfer_instantiate` took on every
/// already-existing handle named in the batch. Called once the whole send
/// has committed (or been abandoned) — the pin exists only to keep those
/// handles alive while their per-recipient `Inflight`s are being resolved,
/// independently of how many recipients there turn out to be.
pub fn finish_transfer(transfer: &Transfer) {
    for entry in &transfer.entries {
        if let TransferEntry::Existing(handle) = entry {
            handle.release_inflight();
        }
    }
}

/// §4.6 install step 4: install every attached-but-uninstalled inflight
/// handle into the receiver's own tables. A handle that turns out to share
/// a node with one the receiver already holds comes back installed under
/// the existing sibling's id instead of its own — the entry is rewritten to
/// `Existing` around whichever handle is now actually live for that id, so
/// later resolution never operates on an uninstalled, unpublished stand-in.
pub fn install_inflight(receiver: &Peer, inflight: &mut Inflight) {
    debug!(
        target: "nodus",
        peer = receiver.id().0,
        n_new = inflight.n_new,
        n_new_local = inflight.n_new_local,
        "install"
    );
    for entry in &mut inflight.entries {
        if let InflightEntry::New(remote) = entry {
            let id = receiver.install(remote.clone());
            let handle = receiver.lookup_by_id(id).expect("just installed");
            *entry = InflightEntry::Existing(handle);
        }
    }
}

/// Resolve one inflight entry's final handle id at commit time (§4.1, §4.6).
/// A node that had already died by `tx_stamp` is delivered as `INVALID`
/// rather than its real id, per §4.5's ordering guarantee.
///
/// Every entry reaching here owns exactly one in-flight pin taken for this
/// delivery (either the baseline pin a fresh install starts with, or the
/// one `inflight_instantiate` explicitly acquired on an already-installed
/// handle). The handle's first-ever delivery promotes that pin straight
/// into the user hold (`0 ≤ n_user ≤ n_inflight` stays satisfied at `1, 1`);
/// any later delivery of the same id is just this message re-mentioning a
/// reference the receiver already holds, so it grants no new hold and this
/// delivery's pin is simply released instead.
pub fn release_to_inflight(handle: &Handle, tx_stamp: Stamp) -> Id {
    let id = match handle.node().death_stamp() {
        Some(death) if tx_stamp >= death => INVALID,
        _ => handle.id(),
    };
    if handle.n_user() == 0 {
        handle.acquire_user();
    } else {
        handle.release_inflight();
    }
    id
}

#[cfg(test)]
mod test {
    use super::*;
    use nodus_pool::MemPool;
    use nodus_quota::{QuotaLimits, UserRegistry};
    use test_log::test;

    fn peer() -> Peer {
        let user = UserRegistry::new(QuotaLimits::default()).lookup(1);
        let p = Peer::new(user, Arc::new(MemPool::new(4096)), QuotaLimits::default());
        p.peer_init().unwrap();
        p
    }

    #[test]
    fn test_transfer_allocate_flag_produces_new_entry() {
        let sender = peer();
        let id = Id(1 << 1); // ALLOCATE_FLAG, no counter bits
        let transfer = transfer_instantiate(&sender, &[id]);
        assert_eq!(transfer.n_new, 1);
        assert!(matches!(transfer.entries[0], TransferEntry::New(_)));
    }

    #[test]
    fn test_transfer_stale_id_resolves_to_null() {
        let sender = peer();
        let transfer = transfer_instantiate(&sender, &[Id::from_counter(999)]);
        assert!(matches!(transfer.entries[0], TransferEntry::Null));
    }

    #[test]
    fn test_full_send_path_installs_on_receiver_and_commits() {
        let sender = peer();
        let receiver = peer();
        let allocate_id = Id(1 << 1);
        let transfer = transfer_instantiate(&sender, &[allocate_id]);
        install_transfer(&sender, &transfer).unwrap();

        let mut inflight = inflight_instantiate(&receiver, &sender, &transfer);
        assert_eq!(inflight.n_new, 1);
        install_inflight(&receiver, &mut inflight);

        let tx_stamp = sender.clock().stage().round_up_to_even();
        let InflightEntry::Existing(handle) = &inflight.entries[0] else {
            panic!("install_inflight should have resolved this to a live handle");
        };
        let final_id = release_to_inflight(handle, tx_stamp);
        assert!(!final_id.is_invalid());
        assert_eq!(receiver.lookup_by_id(final_id).unwrap().id(), final_id);
    }

    #[test]
    fn test_release_to_inflight_returns_invalid_once_tx_stamp_is_past_death() {
        let owner = peer();
        let receiver = peer();
        let (owner_id, _) = owner.peer_clone(&receiver).unwrap();
        let handle = owner.lookup_by_id(owner_id).unwrap();
        owner.node_destroy(owner_id).unwrap();
        let death = handle.node().death_stamp().unwrap();

        let in_flight_before_death = Stamp(death.0 - 1);
        assert!(!release_to_inflight(&handle, in_flight_before_death).is_invalid());

        handle.acquire_inflight().unwrap();
        let after_death = Stamp(death.0 + 2);
        assert!(release_to_inflight(&handle, after_death).is_invalid());
    }

    #[test]
    fn test_finish_transfer_releases_the_sender_side_pin_on_existing_handles() {
        let sender = peer();
        let receiver = peer();
        let (owner_id, _) = sender.peer_clone(&receiver).unwrap();
        let handle = sender.lookup_by_id(owner_id).unwrap();
        let before = handle.n_inflight();

        let transfer = transfer_instantiate(&sender, &[owner_id]);
        assert_eq!(handle.n_inflight(), before + 1);

        finish_transfer(&transfer);
        assert_eq!(handle.n_inflight(), before);
    }

    #[test]
    fn test_second_delivery_of_same_handle_grants_no_new_hold() {
        let sender = peer();
        let receiver = peer();
        let (_, remote_id) = sender.peer_clone(&receiver).unwrap();
        let handle = receiver.lookup_by_id(remote_id).unwrap();
        // `remote_id` is already user-held from `peer_clone`; simulate a
        // second delivery's own in-flight pin arriving on top of that.
        handle.acquire_inflight().unwrap();
        let before_user = handle.n_user();
        let before_inflight = handle.n_inflight();
        let _ = release_to_inflight(&handle, Stamp(2));
        assert_eq!(handle.n_user(), before_user, "a repeat delivery grants no new hold");
        assert_eq!(
            handle.n_inflight(),
            before_inflight - 1,
            "only this delivery's own pin is released"
        );
    }
}
