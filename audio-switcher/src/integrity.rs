//! Content-hash verification of the controller executable.
//!
//! The controller is pinned by the SHA-256 digest of its bytes. Every
//! invocation re-checks the file so a binary swapped mid-session is refused
//! before its output is parsed or it is asked to change audio routing.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors while reading the file to be hashed.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Short read on {}: expected {expected} bytes, got {actual}", path.display())]
    ShortRead {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

/// Why a controller binary was not trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustFailure {
    #[error("no trusted controller digest has been recorded")]
    NotConfigured,

    #[error("controller executable not found")]
    Missing,

    #[error("controller executable could not be read")]
    Unreadable,

    #[error("controller digest mismatch (expected {expected}, found {actual})")]
    Mismatch { expected: String, actual: String },
}

/// Persisted trust anchor for the controller executable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityRecord {
    /// Lowercase hex digest, empty when not configured
    pub expected_hash: String,
}

impl IntegrityRecord {
    pub fn new(expected_hash: impl Into<String>) -> Self {
        Self {
            expected_hash: expected_hash.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.expected_hash.trim().is_empty()
    }
}

/// Compute the hex SHA-256 digest of the file at `path`.
///
/// Reads exactly the length reported by the file's metadata and fails if the
/// file yields fewer bytes than that.
pub fn compute_digest(path: &Path) -> Result<String, IntegrityError> {
    let io_err = |source| IntegrityError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let expected = file.metadata().map_err(io_err)?.len();

    let mut hasher = Sha256::new();
    let mut reader = file.take(expected);
    let mut buf = [0u8; 64 * 1024];
    let mut actual: u64 = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_err(e)),
        };
        hasher.update(&buf[..n]);
        actual += n as u64;
    }

    if actual != expected {
        return Err(IntegrityError::ShortRead {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check `path` against `expected_hash`, reporting why trust was refused.
pub fn check(path: &Path, expected_hash: &str) -> Result<(), TrustFailure> {
    let expected = expected_hash.trim();
    if expected.is_empty() {
        return Err(TrustFailure::NotConfigured);
    }

    if !path.is_file() {
        return Err(TrustFailure::Missing);
    }

    let actual = match compute_digest(path) {
        Ok(digest) => digest,
        Err(e) => {
            warn!("Could not hash controller: {}", e);
            return Err(TrustFailure::Unreadable);
        }
    };

    if actual.eq_ignore_ascii_case(expected) {
        debug!("Controller digest verified for {}", path.display());
        Ok(())
    } else {
        warn!(
            "Controller digest mismatch for {}: expected {}, found {}",
            path.display(),
            expected,
            actual
        );
        Err(TrustFailure::Mismatch {
            expected: expected.to_ascii_lowercase(),
            actual,
        })
    }
}

/// True only when `expected_hash` is non-empty and matches the file.
///
/// Never fails: a missing or unreadable file simply is not trusted.
pub fn verify(path: &Path, expected_hash: &str) -> bool {
    check(path, expected_hash).is_ok()
}

/// Compute the digest an administrator should pin for `path`.
pub fn record_digest(path: &Path) -> Result<String, IntegrityError> {
    compute_digest(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "abc.bin", b"abc");
        assert_eq!(
            compute_digest(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_is_deterministic_and_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "controller.exe", b"MZ\x90\x00controller body");
        let first = compute_digest(&path).unwrap();
        let second = compute_digest(&path).unwrap();
        assert_eq!(first, second);

        write_file(&dir, "controller.exe", b"MZ\x90\x00controller bodY");
        let changed = compute_digest(&path).unwrap();
        assert_ne!(first, changed);
    }

    #[test]
    fn test_verify_rejects_empty_expected_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.exe", b"");
        assert!(!verify(&path, ""));
        assert!(!verify(&path, "   "));
        assert_eq!(check(&path, ""), Err(TrustFailure::NotConfigured));
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "c.exe", b"abc");
        let digest = record_digest(&path).unwrap();
        assert!(verify(&path, &digest));
        assert!(verify(&path, &digest.to_ascii_uppercase()));
    }

    #[test]
    fn test_verify_missing_file_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.exe");
        assert!(!verify(&path, "00"));
        assert_eq!(check(&path, "00"), Err(TrustFailure::Missing));
        assert!(matches!(
            compute_digest(&path),
            Err(IntegrityError::Io { .. })
        ));
    }

    #[test]
    fn test_mismatch_reports_both_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "c.exe", b"abc");
        match check(&path, "DEADBEEF") {
            Err(TrustFailure::Mismatch { expected, actual }) => {
                assert_eq!(expected, "deadbeef");
                assert!(actual.starts_with("ba7816bf"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
