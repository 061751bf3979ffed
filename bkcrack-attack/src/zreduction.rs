//! Enumerate and aggressively prune `Z_i[2,32)` candidates from successive
//! keystream bytes (spec.md §4.F).
//!
//! The last keystream byte fixes 14 bits of `Z` and leaves 18 free, so
//! generation starts from `64 * 2^16 = 2^22` candidates. Each reduction step
//! filters candidates against one more keystream byte going backward; a
//! "wait a little longer" heuristic stops the walk once a small-enough
//! candidate set has been seen and stayed small for a few more steps.

use bkcrack_core::crc::Crc32Tab;
use bkcrack_core::keystream::KeystreamTab;

use crate::attack::Attack;

/// Once the smallest tracked candidate set drops to this size or below,
/// keep reducing for `4 * size` further steps looking for something
/// smaller before giving up and using the best seen so far.
const WAIT_SIZE: usize = 1 << 8;
/// Ceiling on the candidate-set size used to seed "best so far" tracking.
const TRACK_SIZE: usize = 1 << 16;

/// Generates and reduces the space of `Z_i[2,32)` candidates implied by a
/// keystream.
pub struct Zreduction<'k> {
    keystream: &'k [u8],
    zi_2_32: Vec<u32>,
    index: usize,
}

impl<'k> Zreduction<'k> {
    /// Build a reduction over `keystream` (length at least
    /// [`Attack::ATTACK_SIZE`]).
    #[must_use]
    pub fn new(keystream: &'k [u8]) -> Self {
        Self {
            keystream,
            zi_2_32: Vec::new(),
            index: keystream.len().saturating_sub(1),
        }
    }

    /// Enumerate the `2^22` candidates implied by the last keystream byte
    /// alone.
    pub fn generate(&mut self) {
        self.index = self.keystream.len() - 1;
        self.zi_2_32.clear();
        self.zi_2_32.reserve(1 << 22);

        let last = *self.keystream.last().expect("keystream must be non-empty");
        for &zi_2_16 in KeystreamTab::inv(last) {
            for high in 0u32..(1 << 16) {
                self.zi_2_32.push(high << 16 | zi_2_16);
            }
        }
    }

    /// Walk backward through the keystream, pruning candidates against each
    /// byte in turn and tracking the smallest set seen.
    pub fn reduce(&mut self) {
        let mut tracking = false;
        let mut best_copy: Vec<u32> = Vec::new();
        let mut best_index = self.index;
        let mut best_size = TRACK_SIZE;

        let mut waiting = false;
        let mut wait: usize = 0;

        let mut i = self.index;
        while i >= Attack::CONTIGUOUS_SIZE {
            let mut zim1_10_32: Vec<u32> = self
                .zi_2_32
                .iter()
                .map(|&z| Crc32Tab::z_im1_10_32(z))
                .filter(|&v| KeystreamTab::has_filtered(self.keystream[i - 1], v))
                .collect();
            zim1_10_32.sort_unstable();
            zim1_10_32.dedup();

            let mut zim1_2_32: Vec<u32> = Vec::new();
            for &v in &zim1_10_32 {
                for &low in KeystreamTab::inv_filtered(self.keystream[i - 1], v) {
                    zim1_2_32.push(v | low);
                }
            }

            if zim1_2_32.len() <= best_size {
                tracking = true;
                best_index = i - 1;
                best_size = zim1_2_32.len();
                waiting = false;
            } else if tracking {
                if best_index == i {
                    // `self.zi_2_32` still holds the vector of size
                    // `best_size` recorded when `best_index` was set to
                    // `i - 1` on the previous iteration; save it before it
                    // is overwritten below.
                    best_copy = std::mem::take(&mut self.zi_2_32);
                    if best_size <= WAIT_SIZE {
                        waiting = true;
                        wait = best_size * 4;
                    }
                }
                if waiting {
                    wait -= 1;
                    if wait == 0 {
                        break;
                    }
                }
            }

            self.zi_2_32 = zim1_2_32;
            i -= 1;
        }

        if tracking {
            if best_index != Attack::CONTIGUOUS_SIZE - 1 {
                self.zi_2_32 = best_copy;
            }
            self.index = best_index;
        } else {
            self.index = Attack::CONTIGUOUS_SIZE - 1;
        }
    }

    /// Number of surviving `Z_i[2,32)` candidates.
    #[must_use]
    pub fn size(&self) -> usize {
        self.zi_2_32.len()
    }

    /// The surviving candidates.
    #[must_use]
    pub fn candidates(&self) -> &[u32] {
        &self.zi_2_32
    }

    /// Absolute keystream index the candidates correspond to.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Consume `self`, returning the candidate vector.
    #[must_use]
    pub fn into_candidates(self) -> Vec<u32> {
        self.zi_2_32
    }
}

/// Generate and reduce `Z_i[2,32)` candidates from `keystream`.
///
/// Returns the surviving candidates together with the absolute keystream
/// index they apply to.
#[must_use]
pub fn reduce_z(keystream: &[u8]) -> (Vec<u32>, usize) {
    let mut zr = Zreduction::new(keystream);
    zr.generate();
    zr.reduce();
    let index = zr.index();
    (zr.into_candidates(), index)
}
