//! Utility functions for identifiers and digests

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// sha256 digest of captured signature data, recorded on the audit trail
/// in place of the image itself.
pub fn signature_digest(image: &str) -> String {
    sha256::digest(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_are_unique() {
        let a = new_uuid_to_bech32("se_").unwrap();
        let b = new_uuid_to_bech32("se_").unwrap();
        assert!(a.starts_with("se_1"));
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(signature_digest("data:image/png;base64,AAA"), signature_digest("data:image/png;base64,AAA"));
        assert_eq!(signature_digest("x").len(), 64);
    }
}
