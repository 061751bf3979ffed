//! Recover a textual password from internal keys (spec.md §4.H).
//!
//! Given a target state `(X_6, Y_6, Z_6)` — the cipher state after
//! consuming the full password — this walks the password length space
//! (short passwords of 6 bytes or fewer directly, longer ones through a
//! prefix tree) and, at each candidate starting state, runs a backward
//! search structurally identical to [`crate::attack::Attack`]'s Y/X
//! recursion to reconstruct the last six password bytes.

use std::sync::Mutex;

use rayon::prelude::*;

use bkcrack_core::crc::Crc32Tab;
use bkcrack_core::mult::{MULT_INV, MultTab};
use bkcrack_core::progress::Progress;
use bkcrack_core::{Keys, mask, maxdiff};

#[inline]
fn lsb(x: u32) -> u8 {
    x as u8
}

#[inline]
fn msb(x: u32) -> u8 {
    (x >> 24) as u8
}

/// Per-task password search state.
///
/// Precomputes, over every `(p5, p4)` pair from the charset, the set of
/// `Z_0[16,32)` and `Z_{-1}[24,32)` values reachable from the target keys —
/// cheap membership tests used to prune password prefixes before paying for
/// the full backward recursion. `Clone` is cheap relative to rebuilding
/// these tables, so callers build one template and clone it per task.
#[derive(Clone)]
pub struct Recovery<'a> {
    charset: &'a [u8],
    /// `Z_0[16,32)` values reachable from the target keys over `charset^2`.
    z0_16_32: Vec<bool>,
    /// `Z_{-1}[24,32)` values reachable from the target keys over `charset^2`.
    zm1_24_32: Vec<bool>,
    x: [u32; 7],
    y: [u32; 7],
    z: [u32; 7],
    x0: u32,
    p: [u8; 6],
    prefix: Vec<u8>,
    erase: usize,
    solutions: &'a Mutex<Vec<String>>,
    exhaustive: bool,
    progress: &'a Progress,
}

impl<'a> Recovery<'a> {
    /// Build a recovery template for `keys`, the state after the password's
    /// last byte.
    #[must_use]
    pub fn new(keys: Keys, charset: &'a [u8], solutions: &'a Mutex<Vec<String>>, exhaustive: bool, progress: &'a Progress) -> Self {
        let mut x = [0u32; 7];
        let mut y = [0u32; 7];
        let mut z = [0u32; 7];
        x[6] = keys.x();
        y[6] = keys.y();
        z[6] = keys.z();

        y[5] = y[6].wrapping_sub(1).wrapping_mul(MULT_INV).wrapping_sub(u32::from(lsb(x[6])));
        z[5] = Crc32Tab::crc32_inv(z[6], msb(y[6]));
        z[4] = Crc32Tab::crc32_inv(z[5], msb(y[5]));

        let mut z0_16_32 = vec![false; 1 << 16];
        let mut zm1_24_32 = vec![false; 1 << 8];

        for &p5 in charset {
            let x5 = Crc32Tab::crc32_inv(x[6], p5);
            let y4 = y[5].wrapping_sub(1).wrapping_mul(MULT_INV).wrapping_sub(u32::from(lsb(x5)));
            let z3 = Crc32Tab::crc32_inv(z[4], msb(y4));

            for &p4 in charset {
                let x4 = Crc32Tab::crc32_inv(x5, p4);
                let y3 = y4.wrapping_sub(1).wrapping_mul(MULT_INV).wrapping_sub(u32::from(lsb(x4)));
                let z2 = Crc32Tab::crc32_inv(z3, msb(y3));
                let z1 = Crc32Tab::crc32_inv(z2, 0);
                let z0 = Crc32Tab::crc32_inv(z1, 0);

                z0_16_32[(z0 >> 16) as usize] = true;
                zm1_24_32[(Crc32Tab::crc32_inv(z0, 0) >> 24) as usize] = true;
            }
        }

        Self {
            charset,
            z0_16_32,
            zm1_24_32,
            x,
            y,
            z,
            x0: 0,
            p: [0; 6],
            prefix: Vec::new(),
            erase: 0,
            solutions,
            exhaustive,
            progress,
        }
    }

    /// Look for a password of length `6` or less, left-padding virtually
    /// with the charset's first character.
    pub fn recover_short_password(&mut self, length: usize) {
        let mut initial = Keys::default();
        for _ in 0..(6 - length) {
            initial.update_backward_plaintext(self.charset[0]);
        }

        self.prefix.clear();
        self.erase = 6 - length;
        self.recover(initial);
    }

    /// Look for a password of `length` (at least 7) starting with `prefix`.
    pub fn recover_long_password(&mut self, prefix: &[u8], length: usize) {
        self.prefix = prefix.to_vec();
        self.erase = 0;

        let initial = Keys::from_password(prefix);
        self.recover_long(initial, length - prefix.len());
    }

    /// Walk the prefix tree one character at a time until 6 bytes remain,
    /// then hand off to [`Recovery::recover`].
    fn recover_long(&mut self, initial: Keys, length: usize) {
        if self.progress.should_stop() {
            return;
        }

        if length == 7 {
            if !self.zm1_24_32[(initial.z() >> 24) as usize] {
                return;
            }

            self.prefix.push(self.charset[0]);
            for &pi in self.charset {
                let mut init = initial;
                init.update(pi);
                *self.prefix.last_mut().expect("just pushed") = pi;
                self.recover(init);
                if self.progress.should_stop() {
                    break;
                }
            }
            self.prefix.pop();
        } else {
            self.prefix.push(self.charset[0]);
            for &pi in self.charset {
                let mut init = initial;
                init.update(pi);
                *self.prefix.last_mut().expect("just pushed") = pi;
                self.recover_long(init, length - 1);
                if self.progress.should_stop() {
                    break;
                }
            }
            self.prefix.pop();
        }
    }

    /// Try to recover a 6-byte tail from `initial`, the state just before
    /// it.
    fn recover(&mut self, initial: Keys) {
        if !self.z0_16_32[(initial.z() >> 16) as usize] {
            return;
        }

        self.x[0] = initial.x();
        self.x0 = initial.x();
        self.y[0] = initial.y();
        self.z[0] = initial.z();

        for i in 1..=4 {
            self.y[i] = Crc32Tab::y_i_24_32(self.z[i], self.z[i - 1]);
            self.z[i] = Crc32Tab::crc32(self.z[i - 1], msb(self.y[i]));
        }

        self.recursion(5);
    }

    /// Recursively complete `Y[i-1..i]` pairs and the corresponding `X[i]`
    /// bytes, bottoming out at `i == 1` to reconstruct the password.
    fn recursion(&mut self, i: usize) {
        if i != 1 {
            let fy = self.y[i].wrapping_sub(1).wrapping_mul(MULT_INV);
            let ffy = fy.wrapping_sub(1).wrapping_mul(MULT_INV);

            for &xi_0_8 in MultTab::fiber2(msb(ffy.wrapping_sub(self.y[i - 2] & mask(24, 32)))) {
                let yim1 = fy.wrapping_sub(u32::from(xi_0_8));

                if ffy
                    .wrapping_sub(MultTab::mult_inv(xi_0_8))
                    .wrapping_sub(self.y[i - 2] & mask(24, 32))
                    <= maxdiff(24)
                    && msb(yim1) == msb(self.y[i - 1])
                {
                    self.y[i - 1] = yim1;
                    self.x[i] = u32::from(xi_0_8);
                    self.recursion(i - 1);
                }
            }
        } else {
            self.x[1] = self.y[1].wrapping_sub(1).wrapping_mul(MULT_INV).wrapping_sub(self.y[0]);
            if self.x[1] > 0xFF {
                return;
            }

            for i in (0..=5).rev() {
                let xi_xor_pi = Crc32Tab::crc32_inv(self.x[i + 1], 0);
                self.p[i] = lsb(xi_xor_pi ^ self.x[i]);
                self.x[i] = xi_xor_pi ^ u32::from(self.p[i]);
            }

            if self.x[0] == self.x0 {
                let mut password = self.prefix.clone();
                password.extend_from_slice(&self.p[self.erase..]);
                let password = String::from_utf8_lossy(&password).into_owned();

                self.solutions.lock().unwrap().push(password);
                if !self.exhaustive {
                    self.progress.early_exit();
                }
            }
        }
    }
}

/// Try to recover the password associated with `keys`, the internal state
/// reached after consuming the whole password.
///
/// Lengths in `[min_len, max_len]` are tried in increasing order. For
/// `length >= 10` the first two characters are brute-forced in parallel
/// over `rayon`, one `(p0, p1)` pair per task; shorter lengths run on the
/// calling thread. Returns every matching password found: there can be more
/// than one, since ZipCrypto's state is a many-to-one hash of the password.
#[must_use]
pub fn recover_password(keys: Keys, charset: &[u8], min_len: usize, max_len: usize, exhaustive: bool, progress: &Progress) -> Vec<String> {
    let solutions: Mutex<Vec<String>> = Mutex::new(Vec::new());
    let template = Recovery::new(keys, charset, &solutions, exhaustive, progress);

    for length in min_len..=max_len {
        if progress.should_stop() {
            break;
        }

        if length <= 6 {
            template.clone().recover_short_password(length);
        } else if length < 10 {
            template.clone().recover_long_password(&[], length);
        } else {
            let charset_size = charset.len();
            progress.reset((charset_size * charset_size) as u64);

            (0..charset_size * charset_size).into_par_iter().for_each(|idx| {
                if progress.should_stop() {
                    return;
                }
                let prefix = [charset[idx / charset_size], charset[idx % charset_size]];
                template.clone().recover_long_password(&prefix, length);
                progress.advance(1);
            });
        }
    }

    solutions.into_inner().unwrap()
}
