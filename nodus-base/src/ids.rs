// Handle id encoding (§6). A 64-bit id is a strictly increasing per-peer
// counter shifted left by two, with the low two bits reserved as flags.
//
// Bit 0 (MANAGED)  is set on every id this system hands out.
// Bit 1 (ALLOCATE) is set only in a user-supplied input id, to ask a SEND to
//                  allocate a fresh node+owner-handle instead of resolving an
//                  existing one; it never appears in an id the system returns.

/// A handle id as seen across the peer boundary: opaque, ordered, never reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Id(pub u64);

const MANAGED_FLAG: u64 = 1 << 0;
const ALLOCATE_FLAG: u64 = 1 << 1;
const COUNTER_SHIFT: u32 = 2;

/// Sentinel distinct from any id this system will ever allocate.
pub const INVALID: Id = Id(u64::MAX);

impl Id {
    /// Build the id a peer hands out for the `n`th handle it has ever allocated
    /// (n starting at 1). Ids are never recycled, so `n` is the peer's running
    /// `handle_ids` counter.
    pub fn from_counter(n: u64) -> Id {
        Id((n << COUNTER_SHIFT) | MANAGED_FLAG)
    }

    pub fn is_invalid(self) -> bool {
        self == INVALID
    }

    pub fn is_managed(self) -> bool {
        self.0 & MANAGED_FLAG != 0
    }

    /// True iff a user-supplied id is requesting allocation of a fresh node
    /// rather than referring to an existing handle (§4.6's `transfer_instantiate`).
    pub fn is_allocate_request(self) -> bool {
        self.0 & ALLOCATE_FLAG != 0
    }

    pub fn counter(self) -> u64 {
        self.0 >> COUNTER_SHIFT
    }
}

impl Default for Id {
    fn default() -> Self {
        INVALID
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_monotonic_ids_are_distinct_and_ordered() {
        let a = Id::from_counter(1);
        let b = Id::from_counter(2);
        assert!(a < b);
        assert_ne!(a, b);
        assert!(a.is_managed());
        assert!(!a.is_invalid());
    }

    #[test]
    fn test_invalid_is_never_a_real_id() {
        for n in 0..1000u64 {
            assert_ne!(Id::from_counter(n), INVALID);
        }
    }

    #[test]
    fn test_allocate_flag_is_input_only() {
        let requested = Id(ALLOCATE_FLAG);
        assert!(requested.is_allocate_request());
        assert!(!requested.is_managed());

        let allocated = Id::from_counter(5);
        assert!(!allocated.is_allocate_request());
    }
}
