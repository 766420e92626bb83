//! Typed configuration passed to [`crate::wal::Wal::open`].
//!
//! Loading configuration from a file or environment is an external
//! collaborator (spec §1 non-goal); this module only defines the struct and
//! its defaults, the way the teacher crate's `EngineConfig` is a plain typed
//! struct handed to `Engine::open`.

use crate::record::MAX_PAYLOAD_LEN;

/// Configuration for a [`crate::wal::Wal`] instance.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Submission/completion ring queue depth. Typically 64-256.
    pub ring_entries: u32,

    /// Turns on the post-fsync verification path (spec §9 open question 4):
    /// after both fsyncs for a record complete, issue a read-back of each
    /// file and compare against what was written before signaling the
    /// operation complete. Off by default.
    pub enable_verify: bool,

    /// If `true`, [`crate::wal::Wal::open`] fails outright when `O_DIRECT`
    /// is not supported by the host filesystem instead of silently falling
    /// back to `O_DSYNC`-only.
    pub require_direct_io: bool,

    /// Upper bound on a single record's payload length. Defaults to the
    /// codec's maximum (`2^32 - 21`); callers may lower it, never raise it.
    pub max_payload_len: u32,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            ring_entries: 128,
            enable_verify: false,
            require_direct_io: false,
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }
}

impl WalConfig {
    /// Starts from [`WalConfig::default`] with `ring_entries` overridden —
    /// the common case of just choosing a queue depth.
    pub fn with_ring_entries(ring_entries: u32) -> Self {
        Self { ring_entries, ..Default::default() }
    }

    /// Builder-style toggle for the post-fsync verification path.
    pub fn verify(mut self, enable: bool) -> Self {
        self.enable_verify = enable;
        self
    }

    /// Builder-style toggle for requiring `O_DIRECT` rather than falling
    /// back to `O_DSYNC`-only.
    pub fn require_direct_io(mut self, require: bool) -> Self {
        self.require_direct_io = require;
        self
    }

    /// Builder-style override of the maximum payload length.
    pub fn max_payload_len(mut self, max: u32) -> Self {
        self.max_payload_len = max;
        self
    }
}
