// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! XOR-171 autokey obfuscation used by TP-Link Kasa smartplugs.
//!
//! This is not encryption in any meaningful sense, just the scrambling
//! scheme HS110 devices (and Sense, which impersonates a client to them)
//! use on the wire. See [`encrypt`] and [`decrypt`].

const INITIAL_KEY: u8 = 171;

/// Obfuscates `plaintext`, prefixing the result with a 4-byte big-endian
/// length header (used by the TCP variant of the protocol; UDP callers
/// strip it before sending).
pub fn encrypt(plaintext: &str) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    let payload = plaintext.as_bytes();

    (payload.len() as u32)
        .to_be_bytes()
        .into_iter()
        .chain(payload.iter().map(|&b| {
            key ^= b;
            key
        }))
        .collect()
}

/// Reverses [`encrypt`]'s autokey cipher. Unlike `encrypt`, this does **not**
/// expect or consume a length prefix: datagrams from Sense carry none.
pub fn decrypt(ciphertext: &[u8]) -> String {
    let mut key = INITIAL_KEY;
    ciphertext
        .iter()
        .map(|&c| {
            let plain = c ^ key;
            key = c;
            plain as char
        })
        .collect()
}
