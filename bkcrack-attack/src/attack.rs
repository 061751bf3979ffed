//! Recursive Z/Y/X-list completion and plaintext validation: the heart of
//! the Biham-Kocher attack (spec.md §4.G).
//!
//! One [`Attack`] instance handles a single `Z_i[2,32)` candidate produced
//! by [`crate::zreduction::Zreduction`]. `attack()` dispatches the whole
//! candidate vector over a `rayon` thread pool, one candidate per task.

use std::sync::Mutex;

use rayon::prelude::*;

use bkcrack_core::crc::Crc32Tab;
use bkcrack_core::keystream::KeystreamTab;
use bkcrack_core::mult::{MULT_INV, MultTab};
use bkcrack_core::progress::Progress;
use bkcrack_core::{Keys, mask, maxdiff};

use crate::data::Data;

#[inline]
fn lsb(x: u32) -> u8 {
    x as u8
}

#[inline]
fn msb(x: u32) -> u8 {
    (x >> 24) as u8
}

/// Per-candidate working state for the recursive Z/Y/X search.
///
/// `zlist`/`ylist`/`xlist` are indexed the way spec.md describes: only
/// `ylist[3..8)` and `xlist[4..8)` are ever written.
pub struct Attack<'d> {
    data: &'d Data,
    /// Index into `data.plaintext`/`data.keystream` such that working
    /// position `k` corresponds to absolute index `index + k`.
    index: usize,
    exhaustive: bool,
    solutions: &'d Mutex<Vec<Keys>>,
    progress: &'d Progress,
    zlist: [u32; Self::CONTIGUOUS_SIZE],
    ylist: [u32; Self::CONTIGUOUS_SIZE],
    xlist: [u32; Self::CONTIGUOUS_SIZE],
}

impl<'d> Attack<'d> {
    /// Number of contiguous known plaintext bytes the attack requires.
    pub const CONTIGUOUS_SIZE: usize = 8;
    /// Total number of known plaintext bytes (contiguous plus the 4 extra
    /// keystream bytes needed to index the reduction) the attack requires.
    pub const ATTACK_SIZE: usize = 12;

    /// Build an attack task for the Z-candidate found at absolute keystream
    /// `index`.
    #[must_use]
    pub fn new(
        data: &'d Data,
        index: usize,
        exhaustive: bool,
        solutions: &'d Mutex<Vec<Keys>>,
        progress: &'d Progress,
    ) -> Self {
        Self {
            data,
            index: index + 1 - Self::CONTIGUOUS_SIZE,
            exhaustive,
            solutions,
            progress,
            zlist: [0; Self::CONTIGUOUS_SIZE],
            ylist: [0; Self::CONTIGUOUS_SIZE],
            xlist: [0; Self::CONTIGUOUS_SIZE],
        }
    }

    /// Carry out the attack for one `Z_7[2,32)` candidate.
    pub fn carry_out(&mut self, z7_2_32: u32) {
        self.zlist[7] = z7_2_32;
        self.explore_zlists(7);
    }

    /// Stage 1: complete the Z-list backward from position 7 to 0.
    fn explore_zlists(&mut self, i: usize) {
        if i != 0 {
            let zim1_10_32 = Crc32Tab::z_im1_10_32(self.zlist[i]);

            for &zim1_2_16 in KeystreamTab::inv_filtered(self.data.keystream[self.index + i - 1], zim1_10_32) {
                self.zlist[i - 1] = zim1_10_32 | zim1_2_16;

                // Recover Zi[0,2) now that Z{i-1} is fully known.
                self.zlist[i] &= mask(2, 32);
                self.zlist[i] |= (Crc32Tab::crc32_inv(self.zlist[i], 0) ^ self.zlist[i - 1]) >> 8;

                if i < 7 {
                    self.ylist[i + 1] = Crc32Tab::y_i_24_32(self.zlist[i + 1], self.zlist[i]);
                }

                self.explore_zlists(i - 1);
            }
        } else {
            // The Z-list is complete; guess Y7[8,24) and enumerate the
            // matching Y7[0,8) bytes via the mult-inverse fiber.
            let mut y7_8_24: u32 = 0;
            let mut prod = (MultTab::mult_inv(msb(self.ylist[7])) << 24).wrapping_sub(MULT_INV);

            while y7_8_24 < 1 << 24 {
                for &y7_0_8 in MultTab::fiber3(msb(self.ylist[6]).wrapping_sub(msb(prod))) {
                    if prod
                        .wrapping_add(MultTab::mult_inv(y7_0_8))
                        .wrapping_sub(self.ylist[6] & mask(24, 32))
                        <= maxdiff(24)
                    {
                        self.ylist[7] = u32::from(y7_0_8) | y7_8_24 | (self.ylist[7] & mask(24, 32));
                        self.explore_ylists(7);
                    }
                }
                y7_8_24 = y7_8_24.wrapping_add(1 << 8);
                prod = prod.wrapping_add(MULT_INV << 8);
            }
        }
    }

    /// Stage 3: complete the Y-list backward from position 7 to 3.
    fn explore_ylists(&mut self, i: usize) {
        if i != 3 {
            let fy = self.ylist[i].wrapping_sub(1).wrapping_mul(MULT_INV);
            let ffy = fy.wrapping_sub(1).wrapping_mul(MULT_INV);

            for &xi_0_8 in MultTab::fiber2(msb(ffy.wrapping_sub(self.ylist[i - 2] & mask(24, 32)))) {
                let yim1 = fy.wrapping_sub(u32::from(xi_0_8));

                if ffy
                    .wrapping_sub(MultTab::mult_inv(xi_0_8))
                    .wrapping_sub(self.ylist[i - 2] & mask(24, 32))
                    <= maxdiff(24)
                    && msb(yim1) == msb(self.ylist[i - 1])
                {
                    self.ylist[i - 1] = yim1;
                    self.xlist[i] = u32::from(xi_0_8);
                    self.explore_ylists(i - 1);
                }
            }
        } else {
            self.test_xlist();
        }
    }

    /// Stage 4: reconstruct the X-list and validate against all known
    /// plaintext, publishing a solution on success.
    fn test_xlist(&mut self) {
        for i in 5..=7 {
            self.xlist[i] = (Crc32Tab::crc32(self.xlist[i - 1], self.data.plaintext[self.index + i - 1]) & mask(8, 32))
                | u32::from(lsb(self.xlist[i]));
        }

        let mut x = self.xlist[7];
        for i in (3..=6).rev() {
            x = Crc32Tab::crc32_inv(x, self.data.plaintext[self.index + i]);
        }

        // Consistency check against Y1[26,32) before paying for full
        // plaintext validation.
        let y1_26_32 = Crc32Tab::y_i_24_32(self.zlist[1], self.zlist[0]) & mask(26, 32);
        let check = self.ylist[3]
            .wrapping_sub(1)
            .wrapping_mul(MULT_INV)
            .wrapping_sub(u32::from(lsb(x)))
            .wrapping_sub(1)
            .wrapping_mul(MULT_INV)
            .wrapping_sub(y1_26_32);
        if check > maxdiff(26) {
            return;
        }

        let mut keys_forward = Keys::new(self.xlist[7], self.ylist[7], self.zlist[7]);
        keys_forward.update(self.data.plaintext[self.index + 7]);

        let cipher_start = self.data.cipher_start;
        for p_pos in (self.index + 8)..self.data.plaintext.len() {
            let c = self.data.ciphertext[cipher_start + p_pos];
            if c ^ keys_forward.keystream_byte() != self.data.plaintext[p_pos] {
                return;
            }
            keys_forward.update(self.data.plaintext[p_pos]);
        }
        let mut index_forward = cipher_start + self.data.plaintext.len();

        // Walk the backward cursor across every known plaintext byte before
        // the attack window, not just the 3 bytes the recursion pinned down
        // directly (positions `start+2 .. 0`, per spec.md stage 4).
        let mut keys_backward = Keys::new(x, self.ylist[3], self.zlist[3]);
        let mut index_backward = cipher_start + self.index + 3;
        for p_pos in (0..self.index + 3).rev() {
            index_backward -= 1;
            let c = self.data.ciphertext[index_backward];
            keys_backward.update_backward(c);
            if c ^ keys_backward.keystream_byte() != self.data.plaintext[p_pos] {
                return;
            }
        }

        // Validate extra known plaintext. Extras strictly before the
        // validated window are checked walking the backward cursor further
        // down, closest first; extras at or after the window are checked
        // walking the forward cursor further up, closest first. A single
        // ascending-only pass (as the position map would naturally yield)
        // is not sound here: it can hand an extra below `index_backward`
        // to the forward cursor once a closer extra has already pulled
        // `index_backward` past it. See spec's open question on extra
        // plaintext ordering.
        let mut below: Vec<(usize, u8)> = Vec::new();
        let mut above: Vec<(usize, u8)> = Vec::new();
        for (&pos, &expected) in &self.data.extra_plaintext {
            if pos < index_backward {
                below.push((pos, expected));
            } else {
                above.push((pos, expected));
            }
        }
        below.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        above.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        for (pos, expected) in below {
            while index_backward > pos {
                index_backward -= 1;
                keys_backward.update_backward(self.data.ciphertext[index_backward]);
            }
            let p = self.data.ciphertext[pos] ^ keys_backward.keystream_byte();
            if p != expected {
                return;
            }
        }
        for (pos, expected) in above {
            while index_forward < pos {
                let c = self.data.ciphertext[index_forward];
                let p = c ^ keys_forward.keystream_byte();
                keys_forward.update(p);
                index_forward += 1;
            }
            let p = self.data.ciphertext[pos] ^ keys_forward.keystream_byte();
            if p != expected {
                return;
            }
        }

        // All checks passed: rewind to the absolute start of the ciphertext
        // (position 0, i.e. before the encryption header) and publish.
        while index_backward > 0 {
            index_backward -= 1;
            keys_backward.update_backward(self.data.ciphertext[index_backward]);
        }

        self.solutions.lock().unwrap().push(keys_backward);
        if !self.exhaustive {
            self.progress.early_exit();
        }
    }
}

/// Iterate on `Z_i[2,32)` candidates, trying to find complete internal keys.
///
/// `candidates` are sharded over a `rayon` thread pool, one candidate per
/// task; each task owns its own [`Attack`] instance and polls `progress` for
/// cancellation at the top of its unit of work.
#[must_use]
pub fn attack(data: &Data, candidates: &[u32], index: usize, exhaustive: bool, progress: &Progress) -> Vec<Keys> {
    let solutions: Mutex<Vec<Keys>> = Mutex::new(Vec::new());
    progress.reset(candidates.len() as u64);

    candidates.par_iter().for_each(|&z7_2_32| {
        if progress.should_stop() {
            return;
        }
        Attack::new(data, index, exhaustive, &solutions, progress).carry_out(z7_2_32);
        progress.advance(1);
    });

    solutions.into_inner().unwrap()
}
