//! A Zip64-aware central directory reader and ZipCrypto rekeying/deciphering
//! boundary, built on top of [`bkcrack_core::keys::Keys`].
//!
//! This crate knows nothing about cryptanalysis: it locates and parses zip
//! metadata, and moves ciphertext/plaintext bytes around once a [`Keys`]
//! value is already known.

pub mod crypto;
pub mod entry;
pub mod reader;

pub use bkcrack_core::Keys;
pub use crypto::{change_keys, decipher_stream};
pub use entry::{Compression, Encryption, ZipEntry};
pub use reader::{ZipEntries, find_entry_by_index, find_entry_by_name, locate_zip_entries, seek_to_entry_data};
