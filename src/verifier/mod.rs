//! Post-read classification of a record buffer against its expected
//! identity (C3).
//!
//! Used two ways: by [`crate::recovery`] while scanning a file for
//! corruption, and by [`crate::wal::Wal`]'s optional post-fsync
//! verification path. Both callers hand this module a buffer that was just
//! read back from disk and an `expected_sequence`; this module never
//! touches a file descriptor itself.


use thiserror::Error;

use crate::record;

/// Outcome of verifying a buffer against an expected sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The buffer decodes, matches `expected_sequence`, and its checksum
    /// verifies.
    Success,
    /// The buffer decodes and matches `expected_sequence` but its checksum
    /// does not verify. Remediation differs from a structural failure: the
    /// bytes are present but wrong, so the other copy should be consulted.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Anything else: too short, bad magic, bad length, or a sequence that
    /// does not match what was expected. A torn header is
    /// indistinguishable from a wrong sector, so both collapse here.
    IoError,
}

/// Errors specific to driving verification itself, as opposed to the
/// classification result ([`VerifyOutcome`]) the verification produces.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerifyError {
    #[error("verify read failed: errno {0}")]
    ReadFailed(i32),
}

/// Classifies `buffer` against `expected_sequence`.
///
/// Checks, in order: buffer large enough for a header and well-framed via
/// [`record::decode`]; `header.sequence == expected_sequence`; checksum
/// verifies. Any structural failure (including a sequence mismatch)
/// collapses to [`VerifyOutcome::IoError`]; only a checksum failure on an
/// otherwise well-framed, correctly sequenced record is reported as
/// [`VerifyOutcome::ChecksumMismatch`].
pub fn verify(buffer: &[u8], expected_sequence: u64) -> VerifyOutcome {
    let view = match record::decode(buffer) {
        Ok(view) => view,
        Err(_) => return VerifyOutcome::IoError,
    };
    if view.sequence != expected_sequence {
        return VerifyOutcome::IoError;
    }
    if record::verify_checksum(&view) {
        VerifyOutcome::Success
    } else {
        let expected = record::checksum(view.sequence, view.length, view.payload);
        VerifyOutcome::ChecksumMismatch { expected, actual: view.checksum }
    }
}
