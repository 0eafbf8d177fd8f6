// tb-io/src/checksum.rs
use std::path::Path;

use sha2::{Digest, Sha256};
use tb_common::error::{Result, TbError};
use tracing::debug;

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let bytes_copied = std::io::copy(&mut reader, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());
    debug!(
        "Calculated SHA256 for {}: {} ({} bytes read)",
        path.display(),
        actual,
        bytes_copied
    );
    Ok(actual)
}

pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    debug!("Verifying checksum for: {}", path.display());
    let actual = sha256_file(path)?;
    debug!("Expected SHA256:   {}", expected);

    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(TbError::ChecksumMismatch(format!(
            "{}: expected {}, got {}",
            path.display(),
            expected,
            actual
        )))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    // sha256("hello")
    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn matching_checksum_passes_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        verify_checksum(&path, HELLO).unwrap();
        verify_checksum(&path, &HELLO.to_uppercase()).unwrap();
        assert_eq!(sha256_bytes(b"hello"), HELLO);
    }

    #[test]
    fn mismatch_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "tampered").unwrap();
        let err = verify_checksum(&path, HELLO).unwrap_err();
        assert!(matches!(err, TbError::ChecksumMismatch(_)));
    }
}
