// Cross-crate scenarios exercising the full `nodus::Peer` surface end to
// end, rather than any one crate's internals in isolation.

use nodus::{Command, PeerConfig, QuotaLimits, ReceivedMessage, Reply, UserRegistry};
use test_log::test;

fn registry() -> UserRegistry {
    UserRegistry::new(QuotaLimits::default())
}

fn peer(uid: u32, registry: &UserRegistry, config: &PeerConfig) -> nodus::Peer {
    let p = nodus::Peer::new(uid, registry, config);
    p.peer_init().unwrap();
    p
}

/// S1 — a peer sending to its own node receives its own message back, with
/// both source and destination equal to the handle it sent through.
#[test]
fn test_s1_basic_self_send() {
    let reg = registry();
    let a = peer(1, &reg, &PeerConfig::default());
    let owner_id = a.create_node().unwrap();

    a.send(owner_id, &[], b"hi").unwrap();

    match a.recv().unwrap() {
        ReceivedMessage::Message { src, dst, payload, .. } => {
            assert_eq!(src, owner_id);
            assert_eq!(dst, owner_id);
            assert_eq!(payload, b"hi");
        }
        other => panic!("expected a message, got {other:?}"),
    }
}

/// S2 — a handle transferred twice resolves to the same id on the receiver;
/// once fully released, a third transfer allocates a fresh one.
#[test]
fn test_s2_repeated_transfer_then_release_reallocates() {
    let reg = registry();
    let a = peer(1, &reg, &PeerConfig::default());
    let b = peer(2, &reg, &PeerConfig::default());
    let (owner_id, _) = a.peer_clone(&b).unwrap();

    // A and B need an established channel before anything can be sent
    // between them at all: B owns it, A holds a remote to it, so sending on
    // that remote reaches B (and, as a degenerate multicast member, A too).
    let (_, a_remote_to_b) = b.peer_clone(&a).unwrap();

    a.send(a_remote_to_b, &[owner_id], b"").unwrap();
    let first_id = match b.recv().unwrap() {
        ReceivedMessage::Message { handles, .. } => handles[0],
        other => panic!("expected a message, got {other:?}"),
    };
    assert!(!first_id.is_invalid());

    a.send(a_remote_to_b, &[owner_id], b"").unwrap();
    let second_id = match b.recv().unwrap() {
        ReceivedMessage::Message { handles, .. } => handles[0],
        other => panic!("expected a message, got {other:?}"),
    };
    assert_eq!(first_id, second_id, "same node delivered twice keeps the same id");

    b.handle_release(first_id).unwrap();

    a.send(a_remote_to_b, &[owner_id], b"").unwrap();
    let third_id = match b.recv().unwrap() {
        ReceivedMessage::Message { handles, .. } => handles[0],
        other => panic!("expected a message, got {other:?}"),
    };
    assert_ne!(third_id, first_id, "a fresh id is allocated once the old one is fully released");
}

/// S4 — a single sender's share of a peer's local message budget is capped
/// at roughly half of what remains, so no one sender can starve another.
#[test]
fn test_s4_quota_fairness_between_two_senders() {
    let reg = registry();
    let r_config = PeerConfig {
        quota: QuotaLimits { local_messages: 8, ..QuotaLimits::default() },
        ..PeerConfig::default()
    };
    let r = peer(10, &reg, &r_config);
    let u1 = peer(1, &reg, &PeerConfig::default());
    let u2 = peer(2, &reg, &PeerConfig::default());

    let (_, u1_remote) = r.peer_clone(&u1).unwrap();
    let (_, u2_remote) = r.peer_clone(&u2).unwrap();

    for _ in 0..4 {
        u1.send(u1_remote, &[], b"m").unwrap();
    }
    assert!(u1.send(u1_remote, &[], b"m").is_err(), "5th message should exceed U1's fair share");

    u2.send(u2_remote, &[], b"m").unwrap();

    assert!(
        u1.send(u1_remote, &[], b"m").is_err(),
        "U1 still can't push a 5th message even though only 5 of 8 are in use"
    );
}

/// S6 — resetting a peer drops every handle but one preserved id, which
/// keeps referring to the same node under a freshly assigned id, and empties
/// the queue.
#[test]
fn test_s6_peer_reset_preserves_one_handle() {
    let reg = registry();
    let a = peer(1, &reg, &PeerConfig::default());
    let b = peer(2, &reg, &PeerConfig::default());

    let (_, kept_remote) = a.peer_clone(&b).unwrap();
    let (_, other_remote) = a.peer_clone(&b).unwrap();
    b.send(kept_remote, &[], b"staged before reset").unwrap();

    let kept_node = b.dispatch(Command::CreateNode).is_ok(); // exercise dispatch too
    assert!(kept_node);

    let new_id = b.peer_reset(Some(kept_remote)).unwrap();
    assert!(new_id.is_some());
    assert_ne!(new_id.unwrap(), kept_remote, "reset assigns a fresh id even to the preserved handle");

    assert!(b.recv().is_none(), "the queue is emptied by reset");
    let _ = other_remote;
}

/// Reply and Command round-trip through `dispatch` for the handful of
/// commands not already covered above (peer_query, slice_release).
#[test]
fn test_dispatch_peer_query_reports_pool_size() {
    let reg = registry();
    let config = PeerConfig { pool_size: 4096, ..PeerConfig::default() };
    let a = peer(1, &reg, &config);
    assert!(matches!(a.dispatch(Command::PeerQuery).unwrap(), Reply::PoolSize(4096)));
}
