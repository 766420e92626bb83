//! Property-based tests for the record codec: round-trip, alignment, and
//! bit-flip corruption detection across a wide input space.
//!
//! Configure iteration count via the `PROPTEST_CASES` environment variable
//! (default: 256 — payload generation allocates up to a few KiB per case).

use proptest::prelude::*;

use duologwal::record::{self, ALIGNMENT, HEADER_SIZE};

fn cases(default: u32) -> u32 {
    std::env::var("PROPTEST_CASES").ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn config() -> ProptestConfig {
    ProptestConfig::with_cases(cases(256))
}

proptest! {
    #![proptest_config(config())]

    /// Invariant 1: decode(encode(sequence, payload)) recovers the inputs
    /// and checksum-verifies.
    #[test]
    fn codec_round_trip(sequence in 1u64..=u64::MAX, payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let buf = record::encode(sequence, &payload).unwrap();
        let view = record::decode(&buf).unwrap();
        prop_assert_eq!(view.sequence, sequence);
        prop_assert_eq!(view.payload, payload.as_slice());
        prop_assert!(record::verify_checksum(&view));
    }

    /// Invariant 2: every encoded buffer pads to a positive multiple of
    /// 512 bytes, with the tail past the payload zeroed.
    #[test]
    fn alignment_and_zero_padding(sequence in 1u64..=u64::MAX, payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let buf = record::encode(sequence, &payload).unwrap();
        prop_assert_eq!(buf.len() % ALIGNMENT, 0);
        prop_assert!(buf.len() > 0);
        let tail_start = HEADER_SIZE + payload.len();
        prop_assert!(buf.as_slice()[tail_start..].iter().all(|&b| b == 0));
    }

    /// Invariant 3: flipping any single bit within the meaningful prefix
    /// (header + payload) either breaks framing or fails the checksum —
    /// it is never silently accepted as the original record.
    #[test]
    fn single_bit_flip_is_detected(
        sequence in 1u64..=u64::MAX,
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        flip_byte_seed in any::<u32>(),
        flip_bit in 0u8..8,
    ) {
        let mut buf = record::encode(sequence, &payload).unwrap();
        let meaningful_len = HEADER_SIZE + payload.len();
        let flip_byte = (flip_byte_seed as usize) % meaningful_len;
        buf.as_mut_slice()[flip_byte] ^= 1 << flip_bit;

        match record::decode(&buf) {
            Err(_) => {}
            Ok(view) => prop_assert!(!record::verify_checksum(&view)),
        }
    }

    /// Decode must be total: any byte string either decodes cleanly or
    /// returns a framing error, and never panics or reads past the slice.
    #[test]
    fn decode_never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let _ = record::decode(&bytes);
    }
}
