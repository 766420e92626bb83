use tempfile::TempDir;

use crate::config::WalConfig;
use crate::wal::Wal;

/// Opens a fresh WAL rooted in a freshly created temp directory. The
/// `TempDir` must be kept alive by the caller for the WAL's lifetime.
pub fn open_fresh(dir: &TempDir, config: WalConfig) -> Wal {
    Wal::open(dir.path().join("primary.wal"), dir.path().join("secondary.wal"), config).unwrap()
}

pub fn paths(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    (dir.path().join("primary.wal"), dir.path().join("secondary.wal"))
}
