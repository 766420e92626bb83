//! # duologwal
//!
//! A crash-durable, **dual-file** write-ahead log for data engines that
//! need ACID-style persistence on Linux. Every acknowledged record
//! survives arbitrary process, kernel, or single-device failure —
//! including Latent Sector Errors, where a disk reports a write as
//! successful but later cannot read the sector back.
//!
//! The crate sits below a higher-level engine (key-value store,
//! replication log, transaction manager) and exposes only an
//! append/flush/replay contract; it has no opinion about groups,
//! checkpoints, truncation policy, or compaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Wal (C4)                        │
//! │   sequence assignment · pending-op bookkeeping · flush   │
//! │        ┌───────────────┐      ┌───────────────┐          │
//! │        │ primary file  │      │ secondary file │         │
//! │        └───────┬───────┘      └────────┬───────┘         │
//! │                │   write → fsync (io_uring, linked)      │
//! │                ▼                       ▼                │
//! │        ┌──────────────────── IoEngine (C2) ───────────┐  │
//! │        └───────────────────────────────────────────────┘ │
//! └──────────────────────────────┬────────────────────────────┘
//!                                │ startup
//!                                ▼
//!                  ┌──────────────────────────────┐
//!                  │        recovery (C5)         │
//!                  │ scan both files → reconcile  │
//!                  └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`record`] | On-disk record framing, CRC-32C checksumming, aligned buffers (C1) |
//! | [`io_engine`] | `io_uring`-backed write→fsync chains and verify reads (C2) |
//! | [`verifier`] | Classifies a read-back buffer against its expected record (C3) |
//! | [`wal`] | Owns the two files, the ring, and the append/flush/replay contract (C4) |
//! | [`recovery`] | Startup scan and two-file reconciliation (C5) |
//! | [`config`] | [`config::WalConfig`] passed to [`wal::Wal::open`] |
//! | [`error`] | Crate-wide error composition |
//!
//! ## Guarantees
//!
//! - **Durability** — a record is only acknowledged once fsync has
//!   completed on *both* files (spec invariant 3).
//! - **Contiguity** — recovery stops at the first sequence missing from
//!   both files; nothing after a gap is ever replayed.
//! - **LSE tolerance** — if one file's copy of a record fails its
//!   checksum, the other copy still recovers it, provided the two paths
//!   are on independent physical devices.
//! - **Single writer** — a [`wal::Wal`] instance is owned by one writer;
//!   see the [`wal`] module docs for the concurrency model.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use duologwal::{Wal, WalConfig};
//!
//! let mut wal = Wal::open("/tmp/wal.primary", "/tmp/wal.secondary", WalConfig::default())?;
//!
//! let seq1 = wal.append(b"Hello, WAL!")?;
//! let seq2 = wal.append(b"This is record 2")?;
//! wal.flush()?;
//! assert_eq!((seq1, seq2), (1, 2));
//!
//! wal.close()?;
//!
//! // Reopen and replay.
//! let wal = Wal::open("/tmp/wal.primary", "/tmp/wal.secondary", WalConfig::default())?;
//! wal.replay(|sequence, payload| -> Result<(), std::convert::Infallible> {
//!     println!("{sequence}: {} bytes", payload.len());
//!     Ok(())
//! })?;
//! # Ok::<(), duologwal::WalError>(())
//! ```

#![allow(dead_code)]

pub mod config;
pub mod error;
pub mod io_engine;
pub mod record;
pub mod recovery;
pub mod verifier;
pub mod wal;

pub use config::WalConfig;
pub use error::WalError;
pub use wal::{Wal, WalStats};
