//! Asynchronous submission/completion engine (C2).
//!
//! Wraps a single Linux `io_uring` instance and speaks only in tagged
//! 64-bit `user_data` values — it knows nothing about records, files, or
//! sequencing policy beyond the tag scheme below. [`crate::wal::Wal`] is the
//! only caller; it owns the pending-operation bookkeeping this module's
//! completions feed into.
//!
//! # user_data encoding
//!
//! `user_data = (sequence << 8) | tag`, giving 56 bits of sequence and an
//! 8-bit tag. Sequences above `2^56 - 1` cannot be represented; no realistic
//! WAL lifetime gets there.

#[cfg(test)]
mod tests;

use std::os::fd::RawFd;

use io_uring::{IoUring, opcode, squeue, types};
use thiserror::Error;

/// Low 8 bits of `user_data`; identifies which half of a pending operation
/// a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    PrimaryWrite = 0,
    PrimaryFsync = 1,
    PrimaryVerify = 2,
    SecondaryWrite = 3,
    SecondaryFsync = 4,
    SecondaryVerify = 5,
}

impl Tag {
    fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::PrimaryWrite,
            1 => Self::PrimaryFsync,
            2 => Self::PrimaryVerify,
            3 => Self::SecondaryWrite,
            4 => Self::SecondaryFsync,
            5 => Self::SecondaryVerify,
            _ => return None,
        })
    }
}

const SEQUENCE_SHIFT: u32 = 8;
const MAX_SEQUENCE: u64 = (1u64 << (64 - SEQUENCE_SHIFT)) - 1;

/// Packs `(sequence, tag)` into the 64-bit value stamped on a submission
/// queue entry.
///
/// # Panics
///
/// Panics if `sequence` exceeds `2^56 - 1`; see [`MAX_SEQUENCE`].
pub fn encode_user_data(sequence: u64, tag: Tag) -> u64 {
    assert!(sequence <= MAX_SEQUENCE, "sequence {sequence} exceeds 56-bit range");
    (sequence << SEQUENCE_SHIFT) | tag as u64
}

/// Unpacks a completion's `user_data` into `(sequence, tag)`.
///
/// Returns `None` if the low byte is not one of the six known tags — this
/// should never happen in correct operation and is treated as
/// [`IoEngineError::UnknownTag`] by callers.
pub fn decode_user_data(user_data: u64) -> Option<(u64, Tag)> {
    let tag = Tag::from_u8((user_data & 0xFF) as u8)?;
    Some((user_data >> SEQUENCE_SHIFT, tag))
}

/// A decoded completion, ready for [`crate::wal::Wal`] to apply to its
/// pending-operation list.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub sequence: u64,
    pub tag: Tag,
    /// `Ok(bytes_transferred)` or `Err(errno)`.
    pub result: Result<i32, i32>,
}

/// Errors raised by the ring itself, as opposed to errors reported through
/// completions (which are surfaced as [`Completion::result`]).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IoEngineError {
    #[error("failed to initialize io_uring with {entries} entries: {source}")]
    RingInitFailed { entries: u32, #[source] source: std::io::Error },

    #[error("submission queue is full")]
    RingFull,

    #[error("ring submit failed: {0}")]
    RingSubmitFailed(#[source] std::io::Error),

    #[error("completion carried an unrecognized tag byte {0:#x}")]
    UnknownTag(u8),
}

/// Owns the ring. One instance serves both the primary and secondary file
/// descriptors handed to it per call — C4 decides which fd goes with which
/// tag.
pub struct IoEngine {
    ring: IoUring,
}

impl IoEngine {
    /// Creates a ring with `entries` submission slots (spec.md's
    /// `ring_entries`, typically 64-256).
    pub fn new(entries: u32) -> Result<Self, IoEngineError> {
        let ring = IoUring::new(entries)
            .map_err(|source| IoEngineError::RingInitFailed { entries, source })?;
        Ok(Self { ring })
    }

    /// Reserves two adjacent submission entries: a `pwrite` of `buffer` at
    /// `offset` tagged `write_tag`, linked (`IOSQE_IO_LINK`) to an `fsync`
    /// tagged `fsync_tag`. The link guarantees the fsync only begins once
    /// the write has succeeded; a failed write cancels the fsync, which
    /// then surfaces its own (cancellation) completion.
    ///
    /// # Safety
    ///
    /// `buffer` must remain valid and at a stable address, and `fd` must
    /// remain open, until both the write and fsync completions for this
    /// `sequence` have been harvested via [`IoEngine::process_completions`].
    pub unsafe fn submit_write_chain(
        &mut self,
        fd: RawFd,
        buffer: &[u8],
        offset: u64,
        sequence: u64,
        write_tag: Tag,
        fsync_tag: Tag,
    ) -> Result<(), IoEngineError> {
        let write_sqe = opcode::Write::new(types::Fd(fd), buffer.as_ptr(), buffer.len() as u32)
            .offset(offset)
            .build()
            .user_data(encode_user_data(sequence, write_tag))
            .flags(squeue::Flags::IO_LINK);

        let fsync_sqe = opcode::Fsync::new(types::Fd(fd))
            .build()
            .user_data(encode_user_data(sequence, fsync_tag));

        let mut sq = self.ring.submission();
        if sq.len() + 2 > sq.capacity() {
            return Err(IoEngineError::RingFull);
        }
        // SAFETY: caller upholds buffer/fd validity for the completion's lifetime.
        unsafe {
            sq.push(&write_sqe).map_err(|_| IoEngineError::RingFull)?;
            sq.push(&fsync_sqe).map_err(|_| IoEngineError::RingFull)?;
        }
        Ok(())
    }

    /// Reserves one `pread` entry of `length` bytes at `offset` into
    /// `buffer`, tagged `tag`. Used by the optional post-fsync verification
    /// path.
    ///
    /// # Safety
    ///
    /// `buffer` must stay valid and unmoved, and `fd` open, until the
    /// completion for `(sequence, tag)` is harvested.
    pub unsafe fn submit_verify_read(
        &mut self,
        fd: RawFd,
        buffer: &mut [u8],
        offset: u64,
        length: u32,
        sequence: u64,
        tag: Tag,
    ) -> Result<(), IoEngineError> {
        let sqe = opcode::Read::new(types::Fd(fd), buffer.as_mut_ptr(), length)
            .offset(offset)
            .build()
            .user_data(encode_user_data(sequence, tag));

        let mut sq = self.ring.submission();
        if sq.is_full() {
            return Err(IoEngineError::RingFull);
        }
        // SAFETY: caller upholds buffer/fd validity for the completion's lifetime.
        unsafe { sq.push(&sqe).map_err(|_| IoEngineError::RingFull)? };
        Ok(())
    }

    /// Number of submission queue entries immediately free.
    ///
    /// Callers that need to submit a multi-entry chain atomically (e.g. a
    /// write→fsync pair for each of two files) should check this before
    /// pushing any part of the chain, since [`IoEngine::submit_write_chain`]
    /// and [`IoEngine::submit_verify_read`] only guard their own entries and
    /// have no way to undo a partially-submitted chain.
    pub fn free_submission_slots(&mut self) -> usize {
        let sq = self.ring.submission();
        sq.capacity() - sq.len()
    }

    /// Hands queued submissions to the kernel without waiting for any
    /// completion. Retries internally on `EINTR`.
    pub fn submit(&mut self) -> Result<(), IoEngineError> {
        loop {
            match self.ring.submit() {
                Ok(_) => return Ok(()),
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => return Err(IoEngineError::RingSubmitFailed(e)),
            }
        }
    }

    /// Hands queued submissions to the kernel and blocks until at least
    /// `want` completions are ready. Retries internally on `EINTR`.
    pub fn submit_and_wait(&mut self, want: usize) -> Result<(), IoEngineError> {
        loop {
            match self.ring.submit_and_wait(want) {
                Ok(_) => return Ok(()),
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => return Err(IoEngineError::RingSubmitFailed(e)),
            }
        }
    }

    /// Drains every ready completion queue entry, decoding each into a
    /// [`Completion`]. Does not block; call [`IoEngine::submit_and_wait`]
    /// first to ensure entries are present.
    pub fn process_completions(&mut self) -> Result<Vec<Completion>, IoEngineError> {
        let cq = self.ring.completion();
        let mut out = Vec::with_capacity(cq.len());
        for cqe in cq {
            let (sequence, tag) = decode_user_data(cqe.user_data())
                .ok_or(IoEngineError::UnknownTag((cqe.user_data() & 0xFF) as u8))?;
            let raw = cqe.result();
            let result = if raw < 0 { Err(-raw) } else { Ok(raw) };
            out.push(Completion { sequence, tag, result });
        }
        Ok(out)
    }
}

impl std::fmt::Debug for IoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoEngine").finish_non_exhaustive()
    }
}
