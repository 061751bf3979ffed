//! Assembles the plaintext/ciphertext/keystream vectors the attack needs,
//! validating the byte ranges spec'd by [`crate::attack::Attack`].

use std::collections::BTreeMap;

use bkcrack_core::{Error, Result};

use crate::attack::Attack;

/// Size in bytes of the ZipCrypto encryption header prefixed to every
/// traditionally-encrypted entry's ciphertext.
pub const HEADER_SIZE: usize = 12;

/// Known plaintext/ciphertext data used to carry out an attack.
///
/// `ciphertext` includes the 12-byte encryption header; `plaintext` and
/// `offset` are expressed relative to the ciphertext *after* that header, so
/// `offset` may be negative (as low as `-(HEADER_SIZE as i64)`) when the
/// known plaintext overlaps into the header itself.
#[derive(Debug, Clone)]
pub struct Data {
    /// Ciphertext bytes, including the 12-byte encryption header.
    pub ciphertext: Vec<u8>,
    /// Known plaintext bytes, contiguous.
    pub plaintext: Vec<u8>,
    /// `keystream[i] = ciphertext[cipher_start + i] ^ plaintext[i]`.
    pub keystream: Vec<u8>,
    /// Plaintext offset relative to the ciphertext without its header; may
    /// be negative.
    pub offset: i64,
    /// Absolute index into `ciphertext` of `plaintext[0]`,
    /// `HEADER_SIZE as i64 + offset` cast to `usize` (always non-negative,
    /// enforced at construction).
    pub cipher_start: usize,
    /// Extra known plaintext bytes at arbitrary absolute ciphertext
    /// positions, outside the contiguous plaintext window.
    pub extra_plaintext: BTreeMap<usize, u8>,
}

impl Data {
    /// Assemble a [`Data`] bundle, validating offsets and lengths per
    /// spec.md §4.E.
    pub fn new(
        ciphertext: Vec<u8>,
        plaintext: Vec<u8>,
        offset: i64,
        extra_plaintext: BTreeMap<usize, u8>,
    ) -> Result<Self> {
        let cipher_start_signed = HEADER_SIZE as i64 + offset;
        if cipher_start_signed < 0 {
            return Err(Error::data(format!(
                "offset {offset} is too small (minimum is {})",
                -(HEADER_SIZE as i64)
            )));
        }
        if plaintext.len() < Attack::ATTACK_SIZE {
            return Err(Error::data(format!(
                "plaintext size ({}) is smaller than the {} bytes required by the attack",
                plaintext.len(),
                Attack::ATTACK_SIZE
            )));
        }

        let cipher_start = cipher_start_signed as usize;
        let cipher_end = cipher_start + plaintext.len();
        if cipher_end > ciphertext.len() {
            return Err(Error::data(format!(
                "ciphertext ({} bytes) does not cover the plaintext window [{cipher_start}, {cipher_end})",
                ciphertext.len()
            )));
        }

        for &pos in extra_plaintext.keys() {
            if pos >= ciphertext.len() {
                return Err(Error::data(format!(
                    "extra plaintext position {pos} is out of range of the {}-byte ciphertext",
                    ciphertext.len()
                )));
            }
        }

        let keystream = plaintext
            .iter()
            .zip(&ciphertext[cipher_start..cipher_end])
            .map(|(&p, &c)| p ^ c)
            .collect();

        Ok(Self {
            ciphertext,
            plaintext,
            keystream,
            offset,
            cipher_start,
            extra_plaintext,
        })
    }
}
