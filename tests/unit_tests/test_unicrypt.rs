// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use dknw_client_rs::unicrypt::Unicrypt;
use hex_literal::hex;

#[test]
fn test_empty_input() {
    assert!(Unicrypt::new().encrypt(b"").is_empty());
}

#[test]
fn test_length_preserved() {
    for input in [b"".as_slice(), b"A", b"Hello", &[0u8; 1000]] {
        assert_eq!(Unicrypt::new().encrypt(input).len(), input.len());
    }
}

#[test]
fn test_deterministic_across_instances() {
    let input = b"Test message";
    let first = Unicrypt::new().encrypt(input);
    let second = Unicrypt::new().encrypt(input);
    assert_eq!(first, second);
}

#[test]
fn test_different_inputs_diverge() {
    let first = Unicrypt::new().encrypt(b"Message 1");
    let second = Unicrypt::new().encrypt(b"Message 2");
    assert_ne!(first, second);
}

// Reference vectors computed against the bundled table; any change to the
// S-box or the round structure shows up here.

#[test]
fn test_vector_single_zero_byte() {
    assert_eq!(Unicrypt::new().encrypt(&[0x00]), hex!("59"));
}

#[test]
fn test_vector_hello_world() {
    assert_eq!(
        Unicrypt::new().encrypt(b"Hello, World!"),
        hex!("6cebfc65c64962286050efe6fd")
    );
}

#[test]
fn test_vector_challenge_block() {
    let challenge = hex!("000102030405060708090a0b0c0d0e0f");
    assert_eq!(
        Unicrypt::new().encrypt(&challenge),
        hex!("9deef156540e575bfead98e00c7df179")
    );
}
