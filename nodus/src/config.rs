// `peer_init`'s input (§6) plus the per-user budgets a fresh peer starts
// with (§4.8). Plain, `Clone + Debug`, constructed programmatically by
// whatever embeds this crate; the demonstration binary is the only thing
// that ever builds one from argv.

use nodus_quota::QuotaLimits;

/// Receive-pool capacity, in bytes. The historical default leaves room for a
/// few dozen small messages without forcing every demo or test to size one.
pub const DEFAULT_POOL_SIZE: usize = 1 << 16;

#[derive(Clone, Copy, Debug)]
pub struct PeerConfig {
    pub pool_size: usize,
    pub quota: QuotaLimits,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            pool_size: DEFAULT_POOL_SIZE,
            quota: QuotaLimits::default(),
        }
    }
}
