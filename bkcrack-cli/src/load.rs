//! Load known-plaintext and ciphertext bytes from plain files or zip entries,
//! mirroring `Arguments::loadData`/`file.cpp` from the original `bkcrack`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bkcrack_core::{Error, Result};
use bkcrack_zip::{Encryption, find_entry_by_index, find_entry_by_name};

/// Read at most `max_size` bytes from `path`.
pub fn load_file(path: &Path, max_size: usize) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file).take(max_size as u64);
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Read at most `max_size` bytes of a zip entry's raw (possibly encrypted,
/// possibly compressed) data, found by name.
pub fn load_zip_entry_by_name(archive: &Path, name: &str, expect_encrypted: bool, max_size: usize) -> Result<Vec<u8>> {
    let file = File::open(archive)?;
    let (mut reader, entry) = find_entry_by_name(BufReader::new(file), name)?;
    check_encryption(&entry.encryption, expect_encrypted, name)?;
    let size = (entry.packed_size as usize).min(max_size);
    let mut buf = vec![0u8; size];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read at most `max_size` bytes of a zip entry's raw data, found by index.
pub fn load_zip_entry_by_index(archive: &Path, index: usize, expect_encrypted: bool, max_size: usize) -> Result<Vec<u8>> {
    let file = File::open(archive)?;
    let (mut reader, entry) = find_entry_by_index(BufReader::new(file), index)?;
    check_encryption(&entry.encryption, expect_encrypted, &entry.name)?;
    let size = (entry.packed_size as usize).min(max_size);
    let mut buf = vec![0u8; size];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn check_encryption(encryption: &Encryption, expect_encrypted: bool, name: &str) -> Result<()> {
    match (expect_encrypted, encryption) {
        (true, Encryption::Traditional) | (false, _) => Ok(()),
        (true, _) => Err(Error::zip(format!("entry \"{name}\" is not protected by traditional PKWARE encryption"))),
    }
}
