/// Number of hex characters kept from the SHA-256 digest. CDNs recompute and compare
/// exactly this many characters, so it is part of the wire format.
pub const SIGNATURE_LEN: usize = 16;

/// Hash the signing input with SHA-256 and return the first [SIGNATURE_LEN] lowercase
/// hex characters of the digest.
pub fn truncated_sha256_hex(data: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, data);
    // Each byte is two hex characters, so only half the digest needs encoding.
    hex::encode(&digest.as_ref()[..SIGNATURE_LEN / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest_prefix() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad
        assert_eq!(truncated_sha256_hex(b"abc"), "ba7816bf8f01cfea");
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        assert_eq!(truncated_sha256_hex(b""), "e3b0c44298fc1c14");
    }

    #[test]
    fn test_length_and_charset() {
        let sig = truncated_sha256_hex(b"/image.jpg:secret");
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(sig.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
