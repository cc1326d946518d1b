//! Small cryptographic helpers.

use rand::RngCore;
use rand::rngs::OsRng;

/// A cryptographically random, non-zero 64-bit id.
pub fn rand64() -> u64 {
    loop {
        let value = OsRng.next_u64();
        if value != 0 {
            return value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand64_nonzero_and_distinct() {
        let a = rand64();
        let b = rand64();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
    }
}
