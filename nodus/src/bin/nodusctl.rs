//! Drives a pair of in-process peers through `Peer::dispatch`, the same
//! entry point a hypothetical device layer would call. There is no real
//! transport here — both peers live in this one process — but every command
//! goes through the dispatch table rather than the convenience methods, so
//! this doubles as a smoke test of the whole command surface end to end.

use clap::{Parser, Subcommand};
use nodus::{Command, PeerConfig, Reply, UserRegistry};

#[derive(Parser)]
#[command(name = "nodusctl")]
#[command(about = "Exercise the peer command surface with a canned scenario")]
struct Cli {
    #[command(subcommand)]
    scenario: Option<Scenario>,
}

#[derive(Subcommand)]
enum Scenario {
    /// Clone a sibling peer, send it a message, and receive it back.
    Clone,
    /// Send a peer a message addressed at its own node.
    SelfSend,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.scenario.unwrap_or(Scenario::Clone) {
        Scenario::Clone => run_clone_scenario(),
        Scenario::SelfSend => run_self_send_scenario(),
    }
}

fn run_clone_scenario() {
    let registry = UserRegistry::new(Default::default());
    let a = nodus::Peer::new(1, &registry, &PeerConfig::default());
    let b = nodus::Peer::new(2, &registry, &PeerConfig::default());
    a.dispatch(Command::PeerInit).unwrap();
    b.dispatch(Command::PeerInit).unwrap();

    let (owner_id, remote_id) = match a.dispatch(Command::PeerClone { sibling: b.clone() }).unwrap() {
        Reply::Cloned { owner_id, remote_id } => (owner_id, remote_id),
        other => panic!("unexpected reply from peer_clone: {other:?}"),
    };
    println!("a owns {owner_id:?}, b holds a remote {remote_id:?} to the same node");

    a.dispatch(Command::Send {
        target: owner_id,
        transfer_ids: Vec::new(),
        payload: b"hello from a".to_vec(),
    })
    .unwrap();

    match b.dispatch(Command::Recv).unwrap() {
        Reply::Received(Some(nodus::ReceivedMessage::Message { payload, .. })) => {
            println!("b received: {}", String::from_utf8_lossy(&payload));
        }
        other => println!("b received nothing ({other:?})"),
    }
}

fn run_self_send_scenario() {
    let registry = UserRegistry::new(Default::default());
    let a = nodus::Peer::new(1, &registry, &PeerConfig::default());
    a.dispatch(Command::PeerInit).unwrap();
    let owner_id = match a.dispatch(Command::CreateNode).unwrap() {
        Reply::Node(id) => id,
        other => panic!("unexpected reply from create_node: {other:?}"),
    };

    a.dispatch(Command::Send {
        target: owner_id,
        transfer_ids: Vec::new(),
        payload: b"echo".to_vec(),
    })
    .unwrap();

    match a.dispatch(Command::Recv).unwrap() {
        Reply::Received(Some(nodus::ReceivedMessage::Message { src, dst, payload, .. })) => {
            println!(
                "a received its own echo: src={src:?} dst={dst:?} payload={}",
                String::from_utf8_lossy(&payload)
            );
        }
        other => println!("a received nothing ({other:?})"),
    }
}
