//! Scanning behavior: where a well-formed log ends, and where a torn or
//! corrupted suffix is treated as end-of-log rather than an error.

use std::io::{Seek, SeekFrom, Write};

use crate::record;
use crate::recovery::scan_file;

fn write_records(file: &mut std::fs::File, records: &[(u64, &[u8])]) {
    for (sequence, payload) in records {
        let buf = record::encode(*sequence, payload).unwrap();
        file.write_all(buf.as_slice()).unwrap();
    }
    file.seek(SeekFrom::Start(0)).unwrap();
}

#[test]
fn scan_empty_file_returns_no_records() {
    let mut file = tempfile::tempfile().unwrap();
    let records = scan_file(&mut file).unwrap();
    assert!(records.is_empty());
}

#[test]
fn scan_finds_sequential_well_formed_records() {
    let mut file = tempfile::tempfile().unwrap();
    write_records(&mut file, &[(1, b"alpha"), (2, b"beta"), (3, b"gamma")]);

    let records = scan_file(&mut file).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].sequence, 1);
    assert_eq!(records[0].payload, b"alpha");
    assert_eq!(records[2].sequence, 3);
    assert_eq!(records[2].payload, b"gamma");
}

#[test]
fn scan_stops_on_short_header() {
    let mut file = tempfile::tempfile().unwrap();
    write_records(&mut file, &[(1, b"alpha")]);
    // Append a truncated header for a second record.
    file.seek(SeekFrom::End(0)).unwrap();
    file.write_all(&[0u8; 6]).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let records = scan_file(&mut file).unwrap();
    assert_eq!(records.len(), 1);
}

#[test]
fn scan_stops_on_short_payload() {
    let mut file = tempfile::tempfile().unwrap();
    let buf = record::encode(1, b"full record").unwrap();
    // Only write the header plus a few payload bytes, never the full
    // padded record: simulates a crash mid-write.
    file.write_all(&buf.as_slice()[..record::HEADER_SIZE + 3]).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let records = scan_file(&mut file).unwrap();
    assert!(records.is_empty());
}

#[test]
fn scan_stops_on_checksum_mismatch_without_erroring() {
    let mut file = tempfile::tempfile().unwrap();
    let mut buf = record::encode(1, b"trustworthy").unwrap();
    buf.as_mut_slice()[record::HEADER_SIZE] ^= 0xFF;
    file.write_all(buf.as_slice()).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let records = scan_file(&mut file).unwrap();
    assert!(records.is_empty());
}

#[test]
fn scan_stops_before_corrupted_record_but_keeps_earlier_ones() {
    let mut file = tempfile::tempfile().unwrap();
    write_records(&mut file, &[(1, b"good"), (2, b"also good")]);

    let mut bad = record::encode(3, b"bad").unwrap();
    bad.as_mut_slice()[record::HEADER_SIZE] ^= 0xFF;
    file.seek(SeekFrom::End(0)).unwrap();
    file.write_all(bad.as_slice()).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let records = scan_file(&mut file).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].sequence, 2);
}
