#![allow(dead_code)]

// Each peer's queue is a search tree keyed by stamp (§4.2). The minimum-keyed
// entry is the "front"; if it is staged (odd), the whole queue is blocked —
// later, already-committed entries exist in the tree but are not readable
// until the blocking staged entry is relinked or unlinked out of the way.
// `crossbeam_skiplist::SkipMap` gives the ordered, concurrently-readable tree
// this asks for without a hand-rolled seqlock (§5.1).

use crossbeam_skiplist::SkipMap;
use nodus_base::Id;
use nodus_clock::Stamp;
use nodus_pool::Slice;

/// What a queue entry carries: either a message addressed at a handle, or a
/// destruction notification telling the receiver that one of its handle ids
/// is now permanently dead.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    Message {
        slice: Slice,
        src: Id,
        dst: Id,
        /// This recipient's own ids for whatever handles rode along with the
        /// message (§4.6's transfer/inflight batches), in the same order the
        /// sender's transfer batch listed them. `INVALID` marks an entry that
        /// was stale or raced a destruction by commit time.
        handles: Vec<Id>,
    },
    Destroyed {
        dst: Id,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub payload: Payload,
}

impl Entry {
    pub fn message(slice: Slice, src: Id, dst: Id, handles: Vec<Id>) -> Entry {
        Entry {
            payload: Payload::Message {
                slice,
                src,
                dst,
                handles,
            },
        }
    }

    pub fn destroyed(dst: Id) -> Entry {
        Entry {
            payload: Payload::Destroyed { dst },
        }
    }
}

#[derive(Default)]
pub struct Queue {
    map: SkipMap<Stamp, Entry>,
}

impl Queue {
    pub fn new() -> Self {
        Queue {
            map: SkipMap::new(),
        }
    }

    /// Insert a new entry at `stamp` (which may be odd, i.e. staged). Returns
    /// true iff the queue's front now points at this entry — staging entries
    /// never become the front.
    pub fn link(&self, stamp: Stamp, entry: Entry) -> bool {
        self.map.insert(stamp, entry);
        stamp.is_even() && self.front_key() == Some(stamp)
    }

    /// Move an entry currently at an odd (staged) stamp to `new_stamp`
    /// (typically even). Returns true iff the front became readable as a
    /// result.
    pub fn relink(&self, old_stamp: Stamp, new_stamp: Stamp) -> bool {
        let Some(removed) = self.map.remove(&old_stamp) else {
            return false;
        };
        self.map.insert(new_stamp, removed.value().clone());
        self.front_is_committed()
    }

    /// Overwrite the entry currently at `stamp` in place, without changing
    /// its position. Used to patch a message's resolved handle ids in once
    /// a transaction's commit stamp is known, just before [`Self::relink`]
    /// makes it readable (§4.6's commit step).
    pub fn patch(&self, stamp: Stamp, entry: Entry) {
        self.map.insert(stamp, entry);
    }

    /// Remove an entry outright (used to drop a staged entry whose
    /// transaction never committed). Returns true iff removing it exposed a
    /// committed successor.
    pub fn unlink(&self, stamp: Stamp) -> bool {
        let removed = self.map.remove(&stamp).is_some();
        removed && self.front_is_committed()
    }

    /// The committed front, without consuming it.
    pub fn peek(&self) -> Option<(Stamp, Entry)> {
        let front = self.map.front()?;
        if front.key().is_even() {
            Some((*front.key(), front.value().clone()))
        } else {
            None
        }
    }

    /// Dequeue the committed front. Never returns a staged entry, even if
    /// later (higher-stamped) entries in the tree are committed — a staged
    /// entry at the front blocks everything behind it.
    pub fn dequeue(&self) -> Option<(Stamp, Entry)> {
        let front = self.map.front()?;
        if !front.key().is_even() {
            return None;
        }
        let stamp = *front.key();
        let entry = front.value().clone();
        front.remove();
        Some((stamp, entry))
    }

    /// Release every entry, staged and committed alike (used by `peer_reset`).
    pub fn flush(&self) {
        while self.map.pop_front().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    fn front_key(&self) -> Option<Stamp> {
        self.map.front().map(|e| *e.key())
    }

    fn front_is_committed(&self) -> bool {
        matches!(self.front_key(), Some(s) if s.is_even())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nodus_base::INVALID;
    use test_log::test;

    fn msg() -> Entry {
        Entry::message(Slice { offset: 0, len: 0 }, INVALID, INVALID, Vec::new())
    }

    #[test]
    fn test_link_committed_becomes_front_when_queue_empty() {
        let q = Queue::new();
        assert!(q.link(Stamp(2), msg()));
    }

    #[test]
    fn test_staged_entry_never_becomes_front() {
        let q = Queue::new();
        assert!(!q.link(Stamp(3), msg()));
        assert_eq!(q.peek(), None);
    }

    #[test]
    fn test_staged_front_blocks_later_committed_entries() {
        let q = Queue::new();
        q.link(Stamp(3), msg());
        q.link(Stamp(4), msg());
        // The odd stamp 3 sorts before the even stamp 4, so it blocks peek
        // even though 4 is committed.
        assert_eq!(q.peek(), None);
    }

    #[test]
    fn test_relink_to_even_unblocks_front() {
        let q = Queue::new();
        q.link(Stamp(3), msg());
        q.link(Stamp(6), msg());
        assert_eq!(q.peek(), None);
        let unblocked = q.relink(Stamp(3), Stamp(4));
        assert!(unblocked);
        let (stamp, _) = q.peek().unwrap();
        assert_eq!(stamp, Stamp(4));
    }

    #[test]
    fn test_unlink_blocking_staged_front_exposes_successor() {
        let q = Queue::new();
        q.link(Stamp(3), msg());
        q.link(Stamp(4), msg());
        assert!(q.unlink(Stamp(3)));
        assert_eq!(q.peek().unwrap().0, Stamp(4));
    }

    #[test]
    fn test_dequeue_never_returns_odd_stamp() {
        let q = Queue::new();
        q.link(Stamp(5), msg());
        assert_eq!(q.dequeue(), None);
        q.relink(Stamp(5), Stamp(6));
        let (stamp, _) = q.dequeue().unwrap();
        assert!(stamp.is_even());
    }

    #[test]
    fn test_dequeue_orders_by_increasing_commit_stamp() {
        let q = Queue::new();
        q.link(Stamp(8), msg());
        q.link(Stamp(2), msg());
        q.link(Stamp(4), msg());
        let first = q.dequeue().unwrap().0;
        let second = q.dequeue().unwrap().0;
        let third = q.dequeue().unwrap().0;
        assert_eq!([first, second, third], [Stamp(2), Stamp(4), Stamp(8)]);
    }

    #[test]
    fn test_patch_overwrites_value_without_moving_stamp() {
        let q = Queue::new();
        q.link(Stamp(4), msg());
        let patched = Entry::message(Slice { offset: 0, len: 0 }, INVALID, INVALID, vec![INVALID]);
        q.patch(Stamp(4), patched.clone());
        assert_eq!(q.peek(), Some((Stamp(4), patched)));
    }

    #[test]
    fn test_flush_releases_staged_and_committed() {
        let q = Queue::new();
        q.link(Stamp(3), msg());
        q.link(Stamp(4), msg());
        q.link(Stamp(5), msg());
        q.flush();
        assert!(q.is_empty());
        assert_eq!(q.peek(), None);
    }
}
