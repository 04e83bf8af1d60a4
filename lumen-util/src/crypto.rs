use rand::Rng;
use sha2::{Digest as _, Sha256};

pub const ALPHA_NUM: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generate a random string of `len` characters picked from `charset`.
///
/// Not suitable for secrets, only for temporary names and identifiers.
pub fn pseudorandom_string(charset: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| charset[rng.random_range(0..charset.len())] as char)
        .collect()
}

pub fn sha256_hex_digest<D: AsRef<[u8]>>(data: D) -> String {
    let mut hasher = Sha256::default();
    hasher.update(data.as_ref());
    let digest = hasher.finalize();
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_generates_strings_from_the_charset() {
        let s = pseudorandom_string(b"ab", 16);
        assert_eq!(s.len(), 16);
        assert!(s.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn it_calculates_sha256_digests() {
        assert_eq!(
            sha256_hex_digest(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
