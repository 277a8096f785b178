// §6's command table, reified as one enum pair so a hypothetical device
// layer (or, here, `nodusctl`) can drive every peer operation through a
// single entry point instead of one method call per command.

use nodus_base::{Id, Result};
use nodus_pool::Slice;

use crate::peer::{Peer, ReceivedMessage};

#[derive(Clone, Debug)]
pub enum Command {
    PeerInit,
    PeerQuery,
    CreateNode,
    PeerClone { sibling: Peer },
    NodeDestroy { id: Id },
    HandleRelease { id: Id },
    SliceRelease { slice: Slice },
    PeerReset { preserve: Option<Id> },
    Send { target: Id, transfer_ids: Vec<Id>, payload: Vec<u8> },
    Recv,
}

#[derive(Clone, Debug)]
pub enum Reply {
    Unit,
    PoolSize(usize),
    Node(Id),
    Cloned { owner_id: Id, remote_id: Id },
    Preserved(Option<Id>),
    Received(Option<ReceivedMessage>),
}

impl Peer {
    /// Service one command, matching the table in §6 row for row. Kept
    /// separate from the individual methods above so embedders that only
    /// need one or two commands aren't forced to route through this.
    pub fn dispatch(&self, command: Command) -> Result<Reply> {
        match command {
            Command::PeerInit => {
                self.peer_init()?;
                Ok(Reply::Unit)
            }
            Command::PeerQuery => Ok(Reply::PoolSize(self.peer_query())),
            Command::CreateNode => Ok(Reply::Node(self.create_node()?)),
            Command::PeerClone { sibling } => {
                let (owner_id, remote_id) = self.peer_clone(&sibling)?;
                Ok(Reply::Cloned { owner_id, remote_id })
            }
            Command::NodeDestroy { id } => {
                self.node_destroy(id)?;
                Ok(Reply::Unit)
            }
            Command::HandleRelease { id } => {
                self.handle_release(id)?;
                Ok(Reply::Unit)
            }
            Command::SliceRelease { slice } => {
                self.slice_release(slice)?;
                Ok(Reply::Unit)
            }
            Command::PeerReset { preserve } => Ok(Reply::Preserved(self.peer_reset(preserve)?)),
            Command::Send { target, transfer_ids, payload } => {
                self.send(target, &transfer_ids, &payload)?;
                Ok(Reply::Unit)
            }
            Command::Recv => Ok(Reply::Received(self.recv())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nodus_quota::UserRegistry;
    use test_log::test;

    use crate::config::PeerConfig;

    fn peer(registry: &UserRegistry) -> Peer {
        let p = Peer::new(1, registry, &PeerConfig::default());
        p.peer_init().unwrap();
        p
    }

    #[test]
    fn test_dispatch_create_node_then_peer_query() {
        let registry = UserRegistry::new(Default::default());
        let p = peer(&registry);
        assert!(matches!(p.dispatch(Command::CreateNode).unwrap(), Reply::Node(_)));
        assert!(matches!(
            p.dispatch(Command::PeerQuery).unwrap(),
            Reply::PoolSize(_)
        ));
    }

    #[test]
    fn test_dispatch_peer_clone_round_trips_ids() {
        let registry = UserRegistry::new(Default::default());
        let a = peer(&registry);
        let b = peer(&registry);
        match a.dispatch(Command::PeerClone { sibling: b.clone() }).unwrap() {
            Reply::Cloned { owner_id, remote_id } => {
                assert!(!owner_id.is_invalid());
                assert!(!remote_id.is_invalid());
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_recv_on_empty_peer_is_none() {
        let registry = UserRegistry::new(Default::default());
        let p = peer(&registry);
        assert!(matches!(
            p.dispatch(Command::Recv).unwrap(),
            Reply::Received(None)
        ));
    }
}
