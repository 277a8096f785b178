/// A 64-bit sequence value drawn from a peer's [`crate::Clock`]. Odd values are
/// staging (not yet visible to a receiver); even values are committed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Stamp(pub u64);

impl Stamp {
    pub const ZERO: Stamp = Stamp(0);

    pub fn is_odd(self) -> bool {
        self.0 % 2 == 1
    }

    pub fn is_even(self) -> bool {
        self.0 % 2 == 0
    }

    pub fn next_odd(self) -> Stamp {
        if self.is_even() {
            Stamp(self.0 + 1)
        } else {
            Stamp(self.0 + 2)
        }
    }

    pub fn round_up_to_even(self) -> Stamp {
        if self.is_even() {
            self
        } else {
            Stamp(self.0 + 1)
        }
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.0, if self.is_odd() { "s" } else { "c" })
    }
}
