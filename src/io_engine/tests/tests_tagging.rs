//! user_data packing/unpacking.

use crate::io_engine::*;

#[test]
fn roundtrip_every_tag() {
    let tags = [
        Tag::PrimaryWrite,
        Tag::PrimaryFsync,
        Tag::PrimaryVerify,
        Tag::SecondaryWrite,
        Tag::SecondaryFsync,
        Tag::SecondaryVerify,
    ];
    for tag in tags {
        for sequence in [1u64, 2, 1000, MAX_SEQUENCE] {
            let packed = encode_user_data(sequence, tag);
            let (seq, decoded_tag) = decode_user_data(packed).unwrap();
            assert_eq!(seq, sequence);
            assert_eq!(decoded_tag, tag);
        }
    }
}

#[test]
fn tag_occupies_low_byte() {
    let packed = encode_user_data(7, Tag::SecondaryFsync);
    assert_eq!(packed & 0xFF, Tag::SecondaryFsync as u64);
    assert_eq!(packed >> 8, 7);
}

#[test]
#[should_panic(expected = "56-bit range")]
fn sequence_beyond_56_bits_panics() {
    let _ = encode_user_data(MAX_SEQUENCE + 1, Tag::PrimaryWrite);
}

#[test]
fn unknown_tag_byte_decodes_to_none() {
    // Construct a user_data whose low byte is not one of the six known tags.
    let bogus = (5u64 << 8) | 0xFF;
    assert!(decode_user_data(bogus).is_none());
}

#[test]
fn distinct_tags_with_same_sequence_pack_distinctly() {
    let a = encode_user_data(3, Tag::PrimaryWrite);
    let b = encode_user_data(3, Tag::PrimaryFsync);
    assert_ne!(a, b);
}
