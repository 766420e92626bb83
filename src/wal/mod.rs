//! Dual-file WAL orchestrator (C4).
//!
//! Owns the two file handles, the [`IoEngine`] ring, sequence assignment,
//! and the pending-operation list. This is the only public entry point of
//! the crate — callers never touch [`crate::record`], [`crate::io_engine`],
//! [`crate::verifier`], or [`crate::recovery`] directly.
//!
//! # Buffer safety
//!
//! Every [`PendingOp`] owns its buffers as [`crate::record::AlignedBuffer`]
//! values. Moving a `PendingOp` around inside `self.pending` (e.g. on
//! `Vec` growth) only moves that 24-ish byte pointer+length pair — the
//! heap allocation the kernel has a raw pointer into never moves. An entry
//! is removed from `self.pending` only once `remaining_completions` has
//! counted down to zero, i.e. once every completion the kernel owes this
//! operation has actually been harvested; see [`Self::sweep_pending`].

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::{debug, info, trace, warn};

use crate::config::WalConfig;
use crate::error::WalError;
use crate::io_engine::{Completion, IoEngine, IoEngineError, Tag};
use crate::record::{self, AlignedBuffer, RecordError};
use crate::recovery::{self, RecoveryState};
use crate::verifier::{self, VerifyOutcome};

/// Lifecycle stage of a single in-flight append, spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Writing,
    Syncing,
    Verifying,
    Completed,
    Failed,
}

/// Total completions the kernel owes a pending operation: one write + one
/// fsync per file, plus one verify read per file when verification is on.
fn expected_completions(enable_verify: bool) -> u8 {
    if enable_verify { 6 } else { 4 }
}

/// One in-flight append, spec §3 "Pending operation".
struct PendingOp {
    sequence: u64,
    offset: u64,
    padded_size: usize,
    primary_buf: AlignedBuffer,
    secondary_buf: AlignedBuffer,
    verify_bufs: Option<(AlignedBuffer, AlignedBuffer)>,
    primary_fsync_done: bool,
    secondary_fsync_done: bool,
    primary_verify_done: bool,
    secondary_verify_done: bool,
    stage: Stage,
    remaining_completions: u8,
    error: Option<String>,
}

/// Read-only snapshot of WAL bookkeeping, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalStats {
    pub next_sequence: u64,
    pub write_offset: u64,
    pub pending_count: usize,
}

/// A crash-durable, dual-file write-ahead log.
///
/// Single-writer: `append`, `flush`, and `close` must not be called
/// concurrently with each other (spec §5). Not `Sync`; wrap in a mutex or
/// dedicate a writer task if multiple threads need access.
pub struct Wal {
    primary_file: File,
    secondary_file: File,
    primary_fd: RawFd,
    secondary_fd: RawFd,
    io: IoEngine,
    config: WalConfig,
    next_sequence: u64,
    write_offset: u64,
    pending: Vec<PendingOp>,
    poisoned: bool,
    recovered_records: Vec<(u64, Vec<u8>)>,
}

impl Wal {
    /// Opens (creating if absent) the primary and secondary files, scans
    /// and reconciles both through [`crate::recovery`], and adopts the
    /// resulting sequence/offset before returning. The reconciled records
    /// are stashed for [`Wal::replay`].
    pub fn open(
        primary_path: impl AsRef<Path>,
        secondary_path: impl AsRef<Path>,
        config: WalConfig,
    ) -> Result<Self, WalError> {
        let primary_path = primary_path.as_ref();
        let secondary_path = secondary_path.as_ref();

        let (mut primary_file, primary_direct) =
            open_wal_file(primary_path, config.require_direct_io)?;
        let (mut secondary_file, secondary_direct) =
            open_wal_file(secondary_path, config.require_direct_io)?;

        let primary_records = scan_from_start(&mut primary_file, primary_path)?;
        let secondary_records = scan_from_start(&mut secondary_file, secondary_path)?;
        let recovered = recovery::reconcile(primary_records, secondary_records);
        let RecoveryState { highest_sequence, next_write_offset, valid_record_count } =
            recovered.state;

        let io = IoEngine::new(config.ring_entries)?;

        info!(
            primary = %primary_path.display(),
            secondary = %secondary_path.display(),
            primary_direct_io = primary_direct,
            secondary_direct_io = secondary_direct,
            highest_sequence,
            valid_record_count,
            write_offset = next_write_offset,
            "WAL opened"
        );

        let primary_fd = primary_file.as_raw_fd();
        let secondary_fd = secondary_file.as_raw_fd();

        Ok(Self {
            primary_file,
            secondary_file,
            primary_fd,
            secondary_fd,
            io,
            config,
            next_sequence: highest_sequence + 1,
            write_offset: next_write_offset,
            pending: Vec::new(),
            poisoned: false,
            recovered_records: recovered.records,
        })
    }

    /// Returns a read-only snapshot of the WAL's current bookkeeping.
    pub fn stats(&self) -> WalStats {
        WalStats {
            next_sequence: self.next_sequence,
            write_offset: self.write_offset,
            pending_count: self.pending.len(),
        }
    }

    /// Assigns `payload` the next sequence, encodes it into primary and
    /// secondary buffers, and submits both write→fsync chains to the ring.
    ///
    /// Returns the assigned sequence once the kernel has accepted the
    /// submission — this is **not** a durability guarantee, only a
    /// reservation (spec §4.4); call [`Wal::flush`] to wait for durability.
    ///
    /// Allocation failures are returned before `next_sequence` is
    /// consumed, so a failed `append` never creates a gap in the sequence
    /// space. Likewise, the ring must have guaranteed room for the whole
    /// primary+secondary write→fsync chain (and, with verification
    /// enabled, the later verify-read chain too — see
    /// [`Wal::submit_verify_reads`]) before any part of it is submitted or
    /// the pending entry is pushed; otherwise a partially-submitted chain
    /// would leave a pending operation that can never collect all the
    /// completions it expects, hanging `flush` forever. If the ring can't
    /// take the whole chain, `append` fails with
    /// [`IoEngineError::RingFull`] without consuming a sequence.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64, WalError> {
        if self.poisoned {
            return Err(WalError::OperationFailed {
                sequence: self.next_sequence,
                detail: "WAL is poisoned by a prior failed operation; reopen to recover".into(),
            });
        }
        if payload.len() as u64 > self.config.max_payload_len as u64 {
            return Err(WalError::Record(RecordError::PayloadTooLarge(payload.len())));
        }

        let required_sqes = expected_completions(self.config.enable_verify) as usize;
        if self.io.free_submission_slots() < required_sqes {
            return Err(WalError::IoEngine(IoEngineError::RingFull));
        }

        let sequence = self.next_sequence;
        let padded_size = record::padded_size(payload.len());

        let mut primary_buf =
            AlignedBuffer::try_zeroed(padded_size).map_err(WalError::AllocationFailed)?;
        let mut secondary_buf =
            AlignedBuffer::try_zeroed(padded_size).map_err(WalError::AllocationFailed)?;
        let verify_bufs = if self.config.enable_verify {
            let a = AlignedBuffer::try_zeroed(padded_size).map_err(WalError::AllocationFailed)?;
            let b = AlignedBuffer::try_zeroed(padded_size).map_err(WalError::AllocationFailed)?;
            Some((a, b))
        } else {
            None
        };

        record::encode_into(primary_buf.as_mut_slice(), sequence, payload)
            .map_err(WalError::Record)?;
        secondary_buf.as_mut_slice().copy_from_slice(primary_buf.as_slice());

        // All allocations succeeded: commit the sequence reservation.
        self.next_sequence += 1;
        let offset = self.write_offset;

        let op = PendingOp {
            sequence,
            offset,
            padded_size,
            primary_buf,
            secondary_buf,
            verify_bufs,
            primary_fsync_done: false,
            secondary_fsync_done: false,
            primary_verify_done: false,
            secondary_verify_done: false,
            stage: Stage::Writing,
            remaining_completions: expected_completions(self.config.enable_verify),
            error: None,
        };
        // The `free_submission_slots` check above guarantees the ring has
        // room for both chains, so the pending entry is only pushed now,
        // once nothing can stop this operation from being able to collect
        // every completion `remaining_completions` expects.
        self.pending.push(op);
        let idx = self.pending.len() - 1;

        let primary_fd = self.primary_fd;
        let secondary_fd = self.secondary_fd;

        let primary_submit = {
            let buf = self.pending[idx].primary_buf.as_slice();
            // SAFETY: the buffer lives inside `self.pending[idx]` until its
            // completions are harvested in `sweep_pending`, which only
            // removes entries once `remaining_completions` reaches zero.
            unsafe {
                self.io.submit_write_chain(
                    primary_fd,
                    buf,
                    offset,
                    sequence,
                    Tag::PrimaryWrite,
                    Tag::PrimaryFsync,
                )
            }
        };
        if let Err(err) = primary_submit {
            // Unreachable given the capacity check above; if it somehow
            // still happens there is no way to retract an SQE already
            // queued, so drop the zombie entry instead of leaving a
            // pending operation `flush` can never retire.
            self.pending.remove(idx);
            return Err(WalError::IoEngine(err));
        }

        let secondary_submit = {
            let buf = self.pending[idx].secondary_buf.as_slice();
            // SAFETY: see above.
            unsafe {
                self.io.submit_write_chain(
                    secondary_fd,
                    buf,
                    offset,
                    sequence,
                    Tag::SecondaryWrite,
                    Tag::SecondaryFsync,
                )
            }
        };
        if let Err(err) = secondary_submit {
            self.pending.remove(idx);
            return Err(WalError::IoEngine(err));
        }

        self.io.submit()?;
        self.pending[idx].stage = Stage::Syncing;

        self.write_offset += padded_size as u64;
        trace!(sequence, offset, padded_size, "append submitted");
        Ok(sequence)
    }

    /// Blocks until every pending operation reaches `completed` or
    /// `failed`. Returns `Err(WalError::OperationFailed)` if any operation
    /// failed, after every outstanding completion has been drained (so no
    /// buffer is ever freed while the kernel still holds a pointer into
    /// it) — and poisons the WAL, per spec §5.
    ///
    /// Poisoning applies to *any* error this returns, not just a per-op
    /// durability failure: a ring-level error from the kernel or an
    /// `UnknownSequence` protocol violation leaves bookkeeping in a state
    /// this WAL can no longer trust, so the caller's only remedy in every
    /// case is the same — close and reopen to recover.
    pub fn flush(&mut self) -> Result<(), WalError> {
        match self.flush_inner() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.poisoned = true;
                warn!(error = %err, "flush poisoned the WAL");
                Err(err)
            }
        }
    }

    fn flush_inner(&mut self) -> Result<(), WalError> {
        let mut first_failure: Option<WalError> = None;

        while !self.pending.is_empty() {
            self.io.submit_and_wait(1)?;
            let completions = self.io.process_completions()?;
            for completion in completions {
                self.apply_completion(completion)?;
            }
            if let Some(err) = self.sweep_pending() {
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Equivalent to `flush` followed by releasing the file descriptors,
    /// ring, and pending list (handled by `Drop`).
    pub fn close(mut self) -> Result<(), WalError> {
        self.flush()?;
        info!(stats = ?self.stats(), "WAL closed");
        Ok(())
    }

    /// Surfaces every reconciled record from startup recovery to
    /// `callback`, in strict ascending sequence order. Propagates whatever
    /// error `callback` returns.
    pub fn replay<F, E>(&self, mut callback: F) -> Result<(), WalError>
    where
        F: FnMut(u64, &[u8]) -> Result<(), E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        for (sequence, payload) in &self.recovered_records {
            callback(*sequence, payload)
                .map_err(|e| WalError::ReplayCallback(Box::new(e)))?;
        }
        Ok(())
    }

    fn apply_completion(&mut self, completion: Completion) -> Result<(), WalError> {
        let idx = self
            .pending
            .iter()
            .position(|op| op.sequence == completion.sequence)
            .ok_or(WalError::UnknownSequence(completion.sequence))?;

        if let Err(errno) = completion.result {
            let op = &mut self.pending[idx];
            op.stage = Stage::Failed;
            let detail = format!("{:?} failed: errno {errno}", completion.tag);
            op.error.get_or_insert(detail);
        }

        {
            let op = &mut self.pending[idx];
            op.remaining_completions = op.remaining_completions.saturating_sub(1);
            match completion.tag {
                Tag::PrimaryWrite | Tag::SecondaryWrite => {}
                Tag::PrimaryFsync => op.primary_fsync_done = true,
                Tag::SecondaryFsync => op.secondary_fsync_done = true,
                Tag::PrimaryVerify => op.primary_verify_done = true,
                Tag::SecondaryVerify => op.secondary_verify_done = true,
            }
        }

        if self.pending[idx].stage == Stage::Syncing
            && self.pending[idx].primary_fsync_done
            && self.pending[idx].secondary_fsync_done
        {
            if self.config.enable_verify {
                self.submit_verify_reads(idx)?;
                self.pending[idx].stage = Stage::Verifying;
            } else {
                self.pending[idx].stage = Stage::Completed;
            }
        }

        if self.pending[idx].stage == Stage::Verifying
            && self.pending[idx].primary_verify_done
            && self.pending[idx].secondary_verify_done
        {
            self.finish_verification(idx);
        }

        Ok(())
    }

    /// Submits both verify reads for the operation at `idx`.
    ///
    /// Like the write→fsync chain in [`Wal::append`], this is two entries
    /// that must land together: if the primary read is accepted but the
    /// ring then can't take the secondary one, `primary_verify_done` could
    /// never be matched by `secondary_verify_done` and the operation would
    /// never retire. Capacity for both is checked up front; if it isn't
    /// there, the operation fails cleanly instead of hanging `flush`.
    fn submit_verify_reads(&mut self, idx: usize) -> Result<(), WalError> {
        if self.io.free_submission_slots() < 2 {
            return Err(WalError::IoEngine(IoEngineError::RingFull));
        }

        let offset = self.pending[idx].offset;
        let padded_size = self.pending[idx].padded_size as u32;
        let sequence = self.pending[idx].sequence;

        {
            let primary_fd = self.primary_fd;
            let buf = self.pending[idx]
                .verify_bufs
                .as_mut()
                .expect("verify_bufs allocated when enable_verify is set")
                .0
                .as_mut_slice();
            // SAFETY: buffer lives inside `self.pending[idx]` until swept.
            unsafe {
                self.io.submit_verify_read(
                    primary_fd,
                    buf,
                    offset,
                    padded_size,
                    sequence,
                    Tag::PrimaryVerify,
                )?;
            }
        }
        {
            let secondary_fd = self.secondary_fd;
            let buf = self.pending[idx]
                .verify_bufs
                .as_mut()
                .expect("verify_bufs allocated when enable_verify is set")
                .1
                .as_mut_slice();
            // SAFETY: see above.
            unsafe {
                self.io.submit_verify_read(
                    secondary_fd,
                    buf,
                    offset,
                    padded_size,
                    sequence,
                    Tag::SecondaryVerify,
                )?;
            }
        }
        self.io.submit()?;
        Ok(())
    }

    fn finish_verification(&mut self, idx: usize) {
        let sequence = self.pending[idx].sequence;
        let (primary_ok, secondary_ok) = {
            let (primary_buf, secondary_buf) =
                self.pending[idx].verify_bufs.as_ref().expect("verify_bufs present");
            (
                verifier::verify(primary_buf.as_slice(), sequence) == VerifyOutcome::Success,
                verifier::verify(secondary_buf.as_slice(), sequence) == VerifyOutcome::Success,
            )
        };

        let op = &mut self.pending[idx];
        if primary_ok && secondary_ok {
            op.stage = Stage::Completed;
        } else {
            op.stage = Stage::Failed;
            op.error.get_or_insert_with(|| "post-fsync verification mismatch".to_string());
        }
    }

    /// Removes entries whose `remaining_completions` has reached zero —
    /// i.e. the kernel owes them nothing further, so their buffers may
    /// safely be dropped. Returns the first failure encountered, if any.
    fn sweep_pending(&mut self) -> Option<WalError> {
        let mut first_failure = None;
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].remaining_completions == 0 {
                let op = self.pending.remove(i);
                if op.stage == Stage::Failed && first_failure.is_none() {
                    first_failure = Some(WalError::OperationFailed {
                        sequence: op.sequence,
                        detail: op.error.unwrap_or_else(|| "unknown failure".to_string()),
                    });
                }
                debug!(pending_remaining = self.pending.len(), "pending operation retired");
            } else {
                i += 1;
            }
        }
        first_failure
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        warn!(pending = self.pending.len(), "WAL dropped with operations still in flight");
        if let Err(e) = self.flush() {
            warn!(error = %e, "flush during drop failed");
        }
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("next_sequence", &self.next_sequence)
            .field("write_offset", &self.write_offset)
            .field("pending_count", &self.pending.len())
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

fn scan_from_start(
    file: &mut File,
    path: &Path,
) -> Result<Vec<recovery::ScannedRecord>, WalError> {
    use std::io::Seek;
    file.seek(io::SeekFrom::Start(0)).map_err(|source| WalError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(recovery::scan_file(file)?)
}

/// Opens `path` with `O_CREAT | O_RDWR | O_DSYNC`, additionally attempting
/// `O_DIRECT`. Falls back to `O_DSYNC`-only when the filesystem rejects
/// `O_DIRECT`, unless `require_direct_io` is set, in which case that
/// failure is returned instead. Returns whether `O_DIRECT` ended up active.
fn open_wal_file(path: &Path, require_direct_io: bool) -> Result<(File, bool), WalError> {
    let attempt = |extra_flags: i32| {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .custom_flags(libc::O_DSYNC | extra_flags)
            .open(path)
    };

    match attempt(libc::O_DIRECT) {
        Ok(file) => Ok((file, true)),
        Err(e) if !require_direct_io && is_direct_io_unsupported(&e) => {
            warn!(path = %path.display(), "O_DIRECT unsupported, falling back to O_DSYNC only");
            let file = attempt(0)
                .map_err(|source| WalError::OpenFailed { path: path.to_path_buf(), source })?;
            Ok((file, false))
        }
        Err(source) => Err(WalError::OpenFailed { path: path.to_path_buf(), source }),
    }
}

fn is_direct_io_unsupported(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EINVAL) | Some(libc::ENOTSUP) | Some(libc::EOPNOTSUPP))
}
