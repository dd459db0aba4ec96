// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use dknw_client_rs::unicrypt::bits::{count_set_bits, reverse_bits, rotate_bits};

const SAMPLES: &[&[u8]] = &[
    b"",
    b"\x00",
    b"\xff",
    b"\x01\x80\x7f",
    b"Hello, World!",
    &[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x55, 0xAA],
];

#[test]
fn test_reverse_preserves_popcount() {
    for sample in SAMPLES {
        assert_eq!(
            count_set_bits(&reverse_bits(sample)),
            count_set_bits(sample),
            "popcount changed for {sample:02x?}"
        );
    }
}

#[test]
fn test_reverse_is_involution() {
    for sample in SAMPLES {
        assert_eq!(
            reverse_bits(&reverse_bits(sample)),
            sample.to_vec(),
            "double reversal differs for {sample:02x?}"
        );
    }
}

#[test]
fn test_rotate_identities() {
    for sample in SAMPLES {
        assert_eq!(rotate_bits(sample, 0), sample.to_vec());
        assert_eq!(rotate_bits(sample, sample.len() * 8), sample.to_vec());
    }
}

#[test]
fn test_rotate_composes() {
    let buf = [0x12u8, 0x34, 0x56, 0x78];
    let once = rotate_bits(&rotate_bits(&buf, 3), 7);
    assert_eq!(once, rotate_bits(&buf, 10));
}

#[test]
fn test_rotate_single_bit() {
    // One set bit keeps walking but never multiplies.
    let buf = [0x80u8, 0x00];
    for n in 0..16 {
        assert_eq!(count_set_bits(&rotate_bits(&buf, n)), 1, "rotation {n}");
    }
    // Left rotation by one carries the MSB out to the far end.
    assert_eq!(rotate_bits(&buf, 1), vec![0x00, 0x01]);
    assert_eq!(rotate_bits(&buf, 15), vec![0x40, 0x00]);
}
