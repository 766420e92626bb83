//! On-disk record framing (C1).
//!
//! This module owns the byte-exact layout written by [`crate::wal`] and read
//! back by [`crate::recovery`] and [`crate::verifier`]. It has no knowledge
//! of files, the ring, or sequencing policy — it only turns `(sequence,
//! payload)` pairs into aligned, checksummed, padded buffers and back.
//!
//! # On-disk layout
//!
//! ```text
//! [MAGIC u32 LE][SEQUENCE u64 LE][LENGTH u32 LE][CHECKSUM u32 LE][PAYLOAD][PAD]
//! ```
//!
//! The header is a fixed 20 bytes. The whole record (header + payload) is
//! zero-padded up to the next [`ALIGNMENT`]-byte boundary so that it can be
//! written with O_DIRECT. The checksum is CRC-32C (Castagnoli) over
//! `sequence-LE(8) || length-LE(4) || payload`, computed by [`checksum`].


use std::alloc::{self, Layout};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crc32fast::Hasher as Crc32;
use thiserror::Error;

/// Magic constant identifying a record header (`b"WALR"`, little-endian u32).
pub const MAGIC: u32 = 0x5741_4C52;

/// Fixed size of the record header, in bytes.
pub const HEADER_SIZE: usize = 20;

/// Minimum direct-I/O block size; every record is padded up to a multiple
/// of this many bytes.
pub const ALIGNMENT: usize = 512;

/// Largest payload a record may carry (`2^32 - 1 - HEADER_SIZE`).
pub const MAX_PAYLOAD_LEN: u32 = u32::MAX - HEADER_SIZE as u32;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned while framing or parsing a record.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecordError {
    /// `encode` was asked to assign sequence 0, or `decode` read one back.
    #[error("sequence number must be non-zero")]
    InvalidSequence,

    /// Payload exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload of {0} bytes exceeds the maximum of {MAX_PAYLOAD_LEN} bytes")]
    PayloadTooLarge(usize),

    /// Buffer handed to `decode` is shorter than [`HEADER_SIZE`].
    #[error("buffer of {0} bytes is too small to hold a record header")]
    BufferTooSmall(usize),

    /// Header magic did not match [`MAGIC`].
    #[error("invalid magic bytes in record header")]
    InvalidMagic,

    /// Header declares more payload than the buffer actually holds.
    #[error("record declares {declared} bytes but buffer only has {available}")]
    InvalidLength { declared: usize, available: usize },

    /// Heap allocation for an aligned buffer failed.
    #[error("failed to allocate a {0}-byte aligned buffer")]
    AllocationFailed(usize),
}

// ------------------------------------------------------------------------------------------------
// Aligned buffer
// ------------------------------------------------------------------------------------------------

/// An owned, heap-allocated buffer aligned to [`ALIGNMENT`] bytes.
///
/// Direct I/O requires both the buffer address and its length to be a
/// multiple of the device block size. [`Wal`](crate::wal::Wal) allocates one
/// of these per file per in-flight append and hands its raw pointer to the
/// kernel via the ring; the buffer must not move or be resized while any
/// completion referring to it is outstanding, which is why this type has no
/// `resize`/`push` and why moving the `AlignedBuffer` itself (a pointer +
/// length pair) never touches the underlying allocation.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the buffer is uniquely owned and contains only plain bytes.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    fn layout(len: usize) -> Layout {
        Layout::from_size_align(len, ALIGNMENT).expect("len/align combination is always valid")
    }

    /// Allocates a zero-filled buffer of `len` bytes, `len` must be a
    /// positive multiple of [`ALIGNMENT`].
    ///
    /// # Panics
    ///
    /// Panics on allocator OOM, matching `Vec`'s behavior. Use
    /// [`AlignedBuffer::try_zeroed`] where an allocation failure must be
    /// reported to the caller instead (e.g. inside [`Wal::append`](crate::wal::Wal::append)).
    pub fn zeroed(len: usize) -> Self {
        Self::try_zeroed(len).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Allocates a zero-filled buffer of `len` bytes, returning
    /// [`RecordError::AllocationFailed`] instead of aborting the process.
    pub fn try_zeroed(len: usize) -> Result<Self, RecordError> {
        debug_assert!(len > 0 && len % ALIGNMENT == 0);
        let layout = Self::layout(len);
        // SAFETY: layout is non-zero-sized and validated above.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(RecordError::AllocationFailed(len))?;
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` was allocated for exactly `len` bytes and is uniquely owned.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: see `as_slice`; `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer").field("len", &self.len).finish()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe the exact allocation made in `try_zeroed`.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), Self::layout(self.len)) }
    }
}

// ------------------------------------------------------------------------------------------------
// Header parsing
// ------------------------------------------------------------------------------------------------

/// Raw header fields, parsed without regard to whether the payload bytes
/// are actually present in the buffer the header came from.
///
/// [`crate::recovery::scan_file`] reads the 20-byte header on its own before
/// deciding how many payload bytes to read next, so header parsing has to
/// be usable independently of the buffer-length check that full [`decode`]
/// performs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderFields {
    pub sequence: u64,
    pub length: u32,
    pub checksum: u32,
}

pub(crate) fn parse_header(bytes: &[u8]) -> Result<HeaderFields, RecordError> {
    if bytes.len() < HEADER_SIZE {
        return Err(RecordError::BufferTooSmall(bytes.len()));
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(RecordError::InvalidMagic);
    }
    let sequence = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
    if sequence == 0 {
        return Err(RecordError::InvalidSequence);
    }
    let length = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    let checksum = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    Ok(HeaderFields { sequence, length, checksum })
}

// ------------------------------------------------------------------------------------------------
// Record view
// ------------------------------------------------------------------------------------------------

/// A borrowed, decoded view over a record already present in a buffer.
///
/// Does not imply the checksum has been verified — call [`verify_checksum`]
/// separately.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    pub sequence: u64,
    pub length: u32,
    pub checksum: u32,
    pub payload: &'a [u8],
}

/// Rounds `header + payload_len` up to the next [`ALIGNMENT`]-byte boundary.
pub fn padded_size(payload_len: usize) -> usize {
    let total = HEADER_SIZE + payload_len;
    total.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// Computes the CRC-32C (Castagnoli) checksum over
/// `sequence-LE(8) || length-LE(4) || payload`.
pub fn checksum(sequence: u64, length: u32, payload: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(&sequence.to_le_bytes());
    hasher.update(&length.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Validates `sequence`/`payload.len()` against the constraints every
/// encode entry point enforces, without touching the allocator.
fn validate(sequence: u64, payload_len: usize) -> Result<(), RecordError> {
    if sequence == 0 {
        return Err(RecordError::InvalidSequence);
    }
    if payload_len as u64 > MAX_PAYLOAD_LEN as u64 {
        return Err(RecordError::PayloadTooLarge(payload_len));
    }
    Ok(())
}

/// Encodes `(sequence, payload)` into a freshly allocated, zero-padded,
/// 512-byte-aligned buffer.
pub fn encode(sequence: u64, payload: &[u8]) -> Result<AlignedBuffer, RecordError> {
    validate(sequence, payload.len())?;
    let mut buf = AlignedBuffer::try_zeroed(padded_size(payload.len()))?;
    encode_into(buf.as_mut_slice(), sequence, payload)?;
    Ok(buf)
}

/// Encodes `(sequence, payload)` directly into a caller-supplied buffer,
/// which must already be at least [`padded_size`]`(payload.len())` bytes
/// long. Used by [`Wal::append`](crate::wal::Wal::append) so the primary
/// buffer can be allocated once and the secondary filled by `memcpy`
/// instead of re-encoding.
pub fn encode_into(buf: &mut [u8], sequence: u64, payload: &[u8]) -> Result<(), RecordError> {
    validate(sequence, payload.len())?;
    let length = payload.len() as u32;
    let crc = checksum(sequence, length, payload);

    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[4..12].copy_from_slice(&sequence.to_le_bytes());
    buf[12..16].copy_from_slice(&length.to_le_bytes());
    buf[16..20].copy_from_slice(&crc.to_le_bytes());
    buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    for byte in &mut buf[HEADER_SIZE + payload.len()..] {
        *byte = 0;
    }
    Ok(())
}

/// Parses a record out of `buffer`. Does **not** verify the checksum; call
/// [`verify_checksum`] on the result to do that.
///
/// Validated in order: buffer large enough for the header, magic, sequence
/// non-zero, then declared length against the buffer's actual size. Safe to
/// call on arbitrary adversarial input — never panics, never reads past
/// `buffer`.
pub fn decode(buffer: &[u8]) -> Result<RecordView<'_>, RecordError> {
    let header = parse_header(buffer)?;
    let end = HEADER_SIZE
        .checked_add(header.length as usize)
        .filter(|&end| end <= buffer.len())
        .ok_or(RecordError::InvalidLength {
            declared: HEADER_SIZE.saturating_add(header.length as usize),
            available: buffer.len(),
        })?;
    Ok(RecordView {
        sequence: header.sequence,
        length: header.length,
        checksum: header.checksum,
        payload: &buffer[HEADER_SIZE..end],
    })
}

/// Recomputes the checksum of `record` and compares it against the one
/// stored in its header.
pub fn verify_checksum(record: &RecordView<'_>) -> bool {
    checksum(record.sequence, record.length, record.payload) == record.checksum
}
