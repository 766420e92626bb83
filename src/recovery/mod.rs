//! Startup scan and reconciliation (C5).
//!
//! Scans each file independently through [`crate::record`], then
//! reconciles the two per-file record lists into the single
//! [`RecoveryState`] [`crate::wal::Wal::open`] adopts before any append.
//! Depends on C1 ([`crate::record`]) for framing and C3
//! ([`crate::verifier::verify`]) to classify each scanned record as valid,
//! checksum-mismatched, or framing-broken — the same classification the
//! post-fsync verification path in [`crate::wal`] uses; knows nothing about
//! the ring or file descriptors beyond a `std::fs::File` it reads
//! sequentially.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::io::{self, Read};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::record::{self, ALIGNMENT, HEADER_SIZE};
use crate::verifier::{self, VerifyOutcome};

/// Errors raised while scanning or reconciling, as opposed to the implied
/// truncation a corrupt/short record produces (that is not an error — it is
/// the mechanism by which `scan_file` finds the end of the log).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecoveryError {
    #[error("failed to read WAL file during scan: {0}")]
    ReadFailed(#[source] io::Error),
}

/// One record recovered from a single file's scan, payload owned by the
/// caller (spec §4.5).
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    pub sequence: u64,
    pub payload: Vec<u8>,
}

/// (highest_sequence, next_write_offset, valid_record_count) — spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryState {
    pub highest_sequence: u64,
    pub next_write_offset: u64,
    pub valid_record_count: u64,
}

/// The result [`crate::wal::Wal::open`] adopts: the recovery state plus the
/// reconciled records in ascending sequence order, ready for
/// [`crate::wal::Wal::replay`].
#[derive(Debug, Clone, Default)]
pub struct Recovered {
    pub state: RecoveryState,
    pub records: Vec<(u64, Vec<u8>)>,
}

/// Reads `file` sequentially from its current position (callers seek to 0
/// first) and returns every well-framed, checksum-valid record found before
/// the first gap.
///
/// Stops — without error — on: a short header read, a framing error from
/// [`record::decode`]-equivalent header parsing, a short payload read, or a
/// checksum mismatch. Any of these is treated as "end of log": a torn
/// suffix left by a crash mid-write is indistinguishable from an unwritten
/// tail, so the log is assumed contiguous and scanning never resumes past
/// the first bad record.
pub fn scan_file(file: &mut std::fs::File) -> Result<Vec<ScannedRecord>, RecoveryError> {
    let mut records = Vec::new();
    let mut header_buf = [0u8; HEADER_SIZE];

    loop {
        match read_exact_or_eof(file, &mut header_buf).map_err(RecoveryError::ReadFailed)? {
            ReadOutcome::Eof => {
                trace!(count = records.len(), "scan reached clean end of file");
                break;
            }
            ReadOutcome::Short => {
                debug!(count = records.len(), "scan stopped on short header read");
                break;
            }
            ReadOutcome::Full => {}
        }

        let header = match record::parse_header(&header_buf) {
            Ok(header) => header,
            Err(err) => {
                debug!(error = %err, count = records.len(), "scan stopped on framing error");
                break;
            }
        };

        let mut payload = vec![0u8; header.length as usize];
        match read_exact_or_eof(file, &mut payload).map_err(RecoveryError::ReadFailed)? {
            ReadOutcome::Full => {}
            _ => {
                debug!(
                    sequence = header.sequence,
                    count = records.len(),
                    "scan stopped on short payload read"
                );
                break;
            }
        }

        let mut framed = Vec::with_capacity(HEADER_SIZE + payload.len());
        framed.extend_from_slice(&header_buf);
        framed.extend_from_slice(&payload);
        match verifier::verify(&framed, header.sequence) {
            VerifyOutcome::Success => {}
            VerifyOutcome::ChecksumMismatch { expected, actual } => {
                warn!(
                    sequence = header.sequence,
                    expected,
                    actual,
                    "scan stopped on checksum mismatch"
                );
                break;
            }
            VerifyOutcome::IoError => {
                debug!(
                    sequence = header.sequence,
                    count = records.len(),
                    "scan stopped: verifier rejected record framing"
                );
                break;
            }
        }

        let padded = record::padded_size(header.length as usize);
        let consumed = HEADER_SIZE + header.length as usize;
        skip_padding(file, padded - consumed).map_err(RecoveryError::ReadFailed)?;

        trace!(sequence = header.sequence, len = header.length, "scan found record");
        records.push(ScannedRecord { sequence: header.sequence, payload });
    }

    Ok(records)
}

enum ReadOutcome {
    Full,
    Short,
    Eof,
}

/// Reads until `buf` is full, `Eof` if nothing at all was read, `Short` if
/// some but not all bytes were available.
fn read_exact_or_eof(file: &mut std::fs::File, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(if filled == 0 {
        ReadOutcome::Eof
    } else if filled == buf.len() {
        ReadOutcome::Full
    } else {
        ReadOutcome::Short
    })
}

fn skip_padding(file: &mut std::fs::File, pad: usize) -> io::Result<()> {
    if pad == 0 {
        return Ok(());
    }
    let mut remaining = pad;
    let mut sink = [0u8; ALIGNMENT];
    while remaining > 0 {
        let want = remaining.min(sink.len());
        match file.read(&mut sink[..want]) {
            Ok(0) => break,
            Ok(n) => remaining -= n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Reconciles a primary and secondary file's independently-scanned record
/// lists into a single [`Recovered`].
///
/// Builds sequence→record maps for both lists, then walks sequences
/// upward from 1: the first sequence present in neither map truncates
/// `highest_sequence` to one less and stops (contiguity requirement — spec
/// §3). The winning record for `next_write_offset` accounting is the
/// primary's when present, else the secondary's; since both files receive
/// identical bytes for a given sequence in normal operation, the padded
/// sizes agree whenever both copies exist.
pub fn reconcile(primary: Vec<ScannedRecord>, secondary: Vec<ScannedRecord>) -> Recovered {
    let primary_map: BTreeMap<u64, Vec<u8>> =
        primary.into_iter().map(|r| (r.sequence, r.payload)).collect();
    let secondary_map: BTreeMap<u64, Vec<u8>> =
        secondary.into_iter().map(|r| (r.sequence, r.payload)).collect();

    let union_max = primary_map.keys().chain(secondary_map.keys()).copied().max().unwrap_or(0);

    let mut highest_sequence = 0u64;
    let mut next_write_offset = 0u64;
    let mut records = Vec::new();

    for sequence in 1..=union_max.max(1) {
        if sequence > union_max {
            break;
        }
        let winner = match primary_map.get(&sequence) {
            Some(payload) => payload,
            None => match secondary_map.get(&sequence) {
                Some(payload) => payload,
                None => {
                    debug!(sequence, "reconcile found gap, truncating log here");
                    break;
                }
            },
        };
        highest_sequence = sequence;
        next_write_offset += record::padded_size(winner.len()) as u64;
        records.push((sequence, winner.clone()));
    }

    let valid_record_count = highest_sequence;
    debug!(highest_sequence, next_write_offset, valid_record_count, "reconcile complete");

    Recovered {
        state: RecoveryState { highest_sequence, next_write_offset, valid_record_count },
        records,
    }
}
