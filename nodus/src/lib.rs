//! Wires `nodus-clock`, `nodus-queue`, `nodus-pool`, `nodus-handle`,
//! `nodus-transfer` and `nodus-quota` into the single `Peer` type and
//! command surface described in §6.

mod command;
mod config;
mod peer;

pub use command::{Command, Reply};
pub use config::{PeerConfig, DEFAULT_POOL_SIZE};
pub use peer::{Peer, ReceivedMessage};

pub use nodus_base::{Error, Id, Kind, Resource, Result, INVALID};
pub use nodus_pool::Slice;
pub use nodus_quota::{QuotaLimits, UserRegistry};
