//! Content-addressed object keys.

use sha2::{Digest, Sha256};

/// Prefix shared by every attachment object key.
pub const KEY_PREFIX: &str = "attachments/";

/// Derive the object key for `bytes` stored under `filename`.
///
/// `attachments/<sha256 hex><extension>`. Identical bytes with the same
/// extension always map to the same key.
#[must_use]
pub fn derive_key(bytes: &[u8], filename: &str) -> String {
    format!("{KEY_PREFIX}{}{}", content_hash(bytes), extension(filename))
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Extension of the last path segment including the dot, or `""`.
///
/// Dotfiles like `.env` have no extension.
#[must_use]
pub fn extension(filename: &str) -> &str {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[pos..],
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_empty_content_hash() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_derive_key_layout() {
        let key = derive_key(b"hello", "greeting.txt");
        assert_eq!(
            key,
            "attachments/2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.txt"
        );
    }

    #[test]
    fn test_same_bytes_different_extension() {
        assert_ne!(derive_key(b"x", "a.png"), derive_key(b"x", "a.jpg"));
        assert_eq!(derive_key(b"x", "a.png"), derive_key(b"x", "b.png"));
    }

    #[rstest]
    #[case("report.pdf", ".pdf")]
    #[case("archive.tar.gz", ".gz")]
    #[case("Photo.JPG", ".JPG")]
    #[case("README", "")]
    #[case(".env", "")]
    #[case("dir.d/file", "")]
    #[case("dir/file.txt", ".txt")]
    #[case("C:\\docs\\memo.docx", ".docx")]
    #[case("trailing.", ".")]
    #[case("", "")]
    fn test_extension(#[case] filename: &str, #[case] expected: &str) {
        assert_eq!(extension(filename), expected);
    }
}
