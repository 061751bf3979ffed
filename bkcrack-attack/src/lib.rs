//! Z-reduction, key recovery and password recovery: the cryptanalytic core
//! that mounts the Biham-Kocher known-plaintext attack on ZipCrypto.
//!
//! Everything here is pure computation over byte slices already assembled
//! by a caller (typically `bkcrack-zip` for the ZIP boundary, or a test).
//! The only I/O-shaped dependency is [`bkcrack_core::progress::Progress`],
//! polled by workers to report progress and honor cancellation.

pub mod attack;
pub mod data;
pub mod password;
pub mod zreduction;

pub use attack::attack;
pub use data::Data;
pub use password::recover_password;
pub use zreduction::{Zreduction, reduce_z};
