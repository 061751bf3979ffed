//! Multiplicative constant tables for the ZipCrypto key1 recurrence.
//!
//! key1 is updated by `key1' = (key1 + lsb(key0')) * MULT + 1`. Walking this
//! backward during the attack needs, for every byte `x`, the product
//! `x * MULT` and `x * MULT_INV`, plus two small "fiber" tables: the sets of
//! bytes whose `msb(x * MULT_INV)` land within one step of a target value.
//! These fibers are the backbone of the backward Y search (Biham-Kocher
//! stage 3 / attack stage 2-3).

use std::sync::OnceLock;

/// Multiplicative constant used by ZipCrypto's key1 recurrence.
pub const MULT: u32 = 0x0808_8405;

/// Multiplicative inverse of [`MULT`] modulo 2^32.
pub const MULT_INV: u32 = 0xD94F_A8CD;

#[inline]
fn msb(x: u32) -> u8 {
    (x >> 24) as u8
}

struct Tables {
    mult: [u32; 256],
    mult_inv: [u32; 256],
    fiber2: [Vec<u8>; 256],
    fiber3: [Vec<u8>; 256],
}

fn build() -> Tables {
    let mut mult = [0u32; 256];
    let mut mult_inv = [0u32; 256];
    let mut fiber2: [Vec<u8>; 256] = std::array::from_fn(|_| Vec::new());
    let mut fiber3: [Vec<u8>; 256] = std::array::from_fn(|_| Vec::new());

    let mut prod: u32 = 0;
    let mut prod_inv: u32 = 0;
    for x in 0..256u32 {
        mult[x as usize] = prod;
        mult_inv[x as usize] = prod_inv;

        let m = msb(prod_inv);
        fiber2[m as usize].push(x as u8);
        fiber2[m.wrapping_add(1) as usize].push(x as u8);

        fiber3[m.wrapping_sub(1) as usize].push(x as u8);
        fiber3[m as usize].push(x as u8);
        fiber3[m.wrapping_add(1) as usize].push(x as u8);

        prod = prod.wrapping_add(MULT);
        prod_inv = prod_inv.wrapping_add(MULT_INV);
    }

    Tables {
        mult,
        mult_inv,
        fiber2,
        fiber3,
    }
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(build)
}

/// Lookup tables for the multiplicative recurrence used by ZipCrypto.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultTab;

impl MultTab {
    /// `x * MULT`.
    #[inline]
    pub fn mult(x: u8) -> u32 {
        tables().mult[x as usize]
    }

    /// `x * MULT_INV`.
    #[inline]
    pub fn mult_inv(x: u8) -> u32 {
        tables().mult_inv[x as usize]
    }

    /// Bytes `x` such that `msb(x * MULT_INV)` is `target` or `target - 1`.
    #[inline]
    pub fn fiber2(target: u8) -> &'static [u8] {
        &tables().fiber2[target as usize]
    }

    /// Bytes `x` such that `msb(x * MULT_INV)` is `target - 1`, `target`, or
    /// `target + 1`.
    #[inline]
    pub fn fiber3(target: u8) -> &'static [u8] {
        &tables().fiber3[target as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mult_inverse_identity() {
        assert_eq!(MULT.wrapping_mul(MULT_INV), 1);
    }

    #[test]
    fn test_mult_tables_agree() {
        for x in 0..256u8 {
            assert_eq!(MultTab::mult(x), (x as u32).wrapping_mul(MULT));
            assert_eq!(MultTab::mult_inv(x), (x as u32).wrapping_mul(MULT_INV));
        }
    }

    #[test]
    fn test_fiber2_contains_exact_matches() {
        for target in 0..=255u8 {
            for &x in MultTab::fiber2(target) {
                let m = msb(MultTab::mult_inv(x));
                assert!(m == target || m == target.wrapping_sub(1));
            }
        }
    }

    #[test]
    fn test_fiber3_superset_of_fiber2() {
        for target in 0..=255u8 {
            for &x in MultTab::fiber2(target) {
                assert!(MultTab::fiber3(target).contains(&x));
            }
        }
    }

    #[test]
    fn test_fiber_every_byte_classified_somewhere() {
        // Every byte x must appear in fiber2(msb(x*MULT_INV)) and
        // fiber2(msb(x*MULT_INV) + 1) by construction.
        for x in 0..=255u8 {
            let m = msb(MultTab::mult_inv(x));
            assert!(MultTab::fiber2(m).contains(&x));
            assert!(MultTab::fiber2(m.wrapping_add(1)).contains(&x));
        }
    }
}
