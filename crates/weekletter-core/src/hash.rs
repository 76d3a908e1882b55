use sha2::{Digest, Sha256};

/// Stable digest of a document body: lowercase hex SHA-256 of the raw bytes.
///
/// No normalisation is applied, so whitespace edits upstream count as a
/// content change.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_hashes_identically() {
        assert_eq!(content_hash("Tur i skoven"), content_hash("Tur i skoven"));
    }

    #[test]
    fn any_edit_changes_the_hash() {
        assert_ne!(content_hash("Tur i skoven"), content_hash("Tur i skoven "));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let h = content_hash("");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
