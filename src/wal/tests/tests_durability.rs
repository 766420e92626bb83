use tempfile::TempDir;

use crate::config::WalConfig;
use crate::wal::tests::helpers::paths;
use crate::wal::Wal;

#[test]
fn records_survive_close_and_reopen() {
    let dir = TempDir::new().unwrap();
    let (primary, secondary) = paths(&dir);

    {
        let mut wal = Wal::open(&primary, &secondary, WalConfig::default()).unwrap();
        wal.append(b"durable-one").unwrap();
        wal.append(b"durable-two").unwrap();
        wal.close().unwrap();
    }

    let reopened = Wal::open(&primary, &secondary, WalConfig::default()).unwrap();
    assert_eq!(reopened.stats().next_sequence, 3);

    let mut replayed = Vec::new();
    reopened
        .replay(|sequence, payload| -> Result<(), std::convert::Infallible> {
            replayed.push((sequence, payload.to_vec()));
            Ok(())
        })
        .unwrap();

    assert_eq!(replayed, vec![(1, b"durable-one".to_vec()), (2, b"durable-two".to_vec())]);
}

#[test]
fn appends_after_reopen_continue_the_sequence() {
    let dir = TempDir::new().unwrap();
    let (primary, secondary) = paths(&dir);

    {
        let mut wal = Wal::open(&primary, &secondary, WalConfig::default()).unwrap();
        wal.append(b"one").unwrap();
        wal.close().unwrap();
    }

    let mut wal = Wal::open(&primary, &secondary, WalConfig::default()).unwrap();
    let seq = wal.append(b"two").unwrap();
    assert_eq!(seq, 2);
    wal.flush().unwrap();
}

#[test]
fn verification_enabled_round_trip_still_durable() {
    let dir = TempDir::new().unwrap();
    let (primary, secondary) = paths(&dir);
    let config = WalConfig::default().verify(true);

    {
        let mut wal = Wal::open(&primary, &secondary, config.clone()).unwrap();
        wal.append(b"verified-payload").unwrap();
        wal.close().unwrap();
    }

    let reopened = Wal::open(&primary, &secondary, config).unwrap();
    let mut replayed = Vec::new();
    reopened
        .replay(|sequence, payload| -> Result<(), std::convert::Infallible> {
            replayed.push((sequence, payload.to_vec()));
            Ok(())
        })
        .unwrap();
    assert_eq!(replayed, vec![(1, b"verified-payload".to_vec())]);
}
