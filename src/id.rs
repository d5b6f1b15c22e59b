use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use thiserror::Error;

/// Default number of bits of the identifier space (ring of 1024 positions).
pub const DEFAULT_BITS: u8 = 10;

/// Largest supported ring width. Identifiers travel as bencode integers, which are signed 64 bit.
pub const MAX_BITS: u8 = 63;

/// Position on the identifier ring.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(u64);

impl Id {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Id> for u64 {
    fn from(id: Id) -> u64 {
        id.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error)]
#[error("ring width must be between 1 and 63 bits, got {0}")]
pub struct BitsError(pub u8);

/// The identifier space `[0, 2^m)`, fixed for the lifetime of a ring.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct IdSpace {
    bits: u8,
}

impl IdSpace {
    pub fn new(bits: u8) -> Result<Self, BitsError> {
        if bits == 0 || bits > MAX_BITS {
            return Err(BitsError(bits));
        }

        Ok(Self { bits })
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of positions on the ring (`2^m`).
    pub fn size(&self) -> u64 {
        1 << self.bits
    }

    pub fn contains_id(&self, id: Id) -> bool {
        id.0 < self.size()
    }

    /// Hash the given bytes with SHA-1 and reduce the digest modulo `2^m`.
    pub fn hash(&self, bytes: &[u8]) -> Id {
        let digest = Sha1::digest(bytes);
        // Reducing a big-endian digest modulo 2^m keeps only its lowest m bits, which all live in
        // the trailing 8 bytes.
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&digest[digest.len() - 8..]);
        Id(u64::from_be_bytes(tail) & self.mask())
    }

    /// `(id + 2^(index-1)) mod 2^m` for a 1-based finger index.
    pub fn finger_target(&self, id: Id, index: usize) -> Id {
        debug_assert!(index >= 1 && index <= self.bits as usize);
        Id(id.0.wrapping_add(1 << (index - 1)) & self.mask())
    }

    fn mask(&self) -> u64 {
        self.size() - 1
    }
}

impl Default for IdSpace {
    fn default() -> Self {
        Self {
            bits: DEFAULT_BITS,
        }
    }
}

/// Is `x` within the ring interval `(lo, hi]`?
///
/// The interval wraps around zero when `hi <= lo`, and `lo == hi` denotes the whole ring.
pub fn contains(lo: Id, hi: Id, x: Id) -> bool {
    if hi > lo {
        lo < x && x <= hi
    } else {
        x > lo || x <= hi
    }
}

/// Is `x` within the open ring interval `(lo, hi)`?
pub fn contains_open(lo: Id, hi: Id, x: Id) -> bool {
    x != hi && contains(lo, hi, x)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Walk clockwise from `lo` and see whether `x` shows up before passing `hi`.
    fn reference_contains(size: u64, lo: u64, hi: u64, x: u64) -> bool {
        let span = (hi + size - lo) % size;
        let span = if span == 0 { size } else { span };
        let offset = (x + size - lo) % size;
        (offset != 0 && offset <= span) || (span == size && offset == 0)
    }

    #[test]
    fn contains_matches_modular_reference() {
        let size = 16;

        for lo in 0..size {
            for hi in 0..size {
                for x in 0..size {
                    assert_eq!(
                        contains(Id(lo), Id(hi), Id(x)),
                        reference_contains(size, lo, hi, x),
                        "contains({}, {}, {})",
                        lo,
                        hi,
                        x
                    );
                }
            }
        }
    }

    #[test]
    fn contains_plain_interval() {
        assert!(contains(Id(5), Id(10), Id(10)));
        assert!(contains(Id(5), Id(10), Id(6)));
        assert!(!contains(Id(5), Id(10), Id(5)));
        assert!(!contains(Id(5), Id(10), Id(11)));
    }

    #[test]
    fn contains_wraparound() {
        assert!(contains(Id(10), Id(5), Id(15)));
        assert!(contains(Id(10), Id(5), Id(0)));
        assert!(contains(Id(10), Id(5), Id(5)));
        assert!(!contains(Id(10), Id(5), Id(10)));
        assert!(!contains(Id(10), Id(5), Id(7)));
    }

    #[test]
    fn contains_degenerate_is_whole_ring() {
        for x in 0..16 {
            assert!(contains(Id(7), Id(7), Id(x)));
        }
    }

    #[test]
    fn contains_open_excludes_upper_bound() {
        assert!(!contains_open(Id(5), Id(10), Id(10)));
        assert!(contains_open(Id(5), Id(10), Id(9)));
        assert!(!contains_open(Id(7), Id(7), Id(7)));
        assert!(contains_open(Id(7), Id(7), Id(3)));
    }

    #[test]
    fn hash_is_deterministic_and_in_range() {
        let space = IdSpace::new(10).unwrap();
        let a = space.hash(b"127.0.0.1:5000");
        let b = space.hash(b"127.0.0.1:5000");

        assert_eq!(a, b);
        assert!(space.contains_id(a));

        let wide = IdSpace::new(MAX_BITS).unwrap();
        assert_ne!(wide.hash(b"127.0.0.1:5000"), wide.hash(b"127.0.0.1:5001"));
    }

    #[test]
    fn finger_targets_wrap() {
        let space = IdSpace::new(4).unwrap();

        assert_eq!(space.finger_target(Id(5), 1), Id(6));
        assert_eq!(space.finger_target(Id(5), 4), Id(13));
        assert_eq!(space.finger_target(Id(14), 3), Id(2));
    }

    #[test]
    fn rejects_invalid_bits() {
        assert!(IdSpace::new(0).is_err());
        assert!(IdSpace::new(MAX_BITS + 1).is_err());
        assert_eq!(IdSpace::new(MAX_BITS).unwrap().bits(), MAX_BITS);
    }
}
