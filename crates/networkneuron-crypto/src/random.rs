//! Secure randomness for nonces and identifiers

use sodiumoxide::randombytes;

/// Fill a buffer of `n` cryptographically secure random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    randombytes::randombytes(n)
}

/// A random 16-byte identifier (session, route, transaction ids).
pub fn random_id16() -> [u8; 16] {
    let bytes = randombytes::randombytes(16);
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_length_and_variation() {
        crate::init().unwrap();

        let a = random_bytes(32);
        let b = random_bytes(32);

        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_id16() {
        crate::init().unwrap();
        assert_ne!(random_id16(), random_id16());
    }
}
