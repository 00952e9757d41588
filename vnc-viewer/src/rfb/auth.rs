//! VNC password authentication (security type 2).
//!
//! The server sends a 16-byte challenge; the client answers with the
//! challenge DES-encrypted (two ECB blocks) under the password, padded
//! or truncated to 8 bytes with every key byte bit-reversed.

use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};
use des::Des;

pub const CHALLENGE_LEN: usize = 16;

/// Compute the response to a VNC authentication challenge.
pub fn vnc_auth_response(challenge: &[u8; CHALLENGE_LEN], password: &str) -> [u8; CHALLENGE_LEN] {
    let cipher = Des::new(GenericArray::from_slice(&des_key(password)));
    let mut out = *challenge;
    for block in out.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

fn des_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    let bytes = password.as_bytes();
    let len = bytes.len().min(8);
    key[..len].copy_from_slice(&bytes[..len]);
    key.map(u8::reverse_bits)
}
