//! Deciphering and rekeying utilities built on top of recovered [`Keys`].

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};

use bkcrack_core::progress::Progress;
use bkcrack_core::{Error, Keys, Result};

use crate::entry::Encryption;
use crate::reader::locate_zip_entries;

const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4b50;

fn read_u16<R: Read>(r: &mut R) -> std::io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Decipher `size` bytes of ZipCrypto-encrypted data from `input`, writing
/// the plaintext to `output`. The first `discard` bytes (typically the
/// 12-byte ZipCrypto header) are deciphered but not written, only used to
/// advance `keys`.
pub fn decipher_stream<R: Read, W: Write>(
    input: &mut R,
    size: usize,
    discard: usize,
    output: &mut W,
    mut keys: Keys,
) -> Result<()> {
    let mut buf = [0u8; 1];

    for _ in 0..discard.min(size) {
        input.read_exact(&mut buf)?;
        let p = buf[0] ^ keys.keystream_byte();
        keys.update(p);
    }

    for _ in discard.min(size)..size {
        input.read_exact(&mut buf)?;
        let p = buf[0] ^ keys.keystream_byte();
        keys.update(p);
        output.write_all(&[p])?;
    }

    Ok(())
}

/// Copy a whole zip archive from `input` to `output`, re-encrypting every
/// traditionally-encrypted entry's data under `new_keys` instead of
/// `old_keys`. Everything else (headers, names, compressed bytes,
/// unencrypted entries) is copied verbatim.
pub fn change_keys<R: Read + Seek, W: Write>(
    mut input: R,
    output: &mut W,
    old_keys: Keys,
    new_keys: Keys,
    progress: &Progress,
) -> Result<()> {
    // Collect encrypted entries' local header offset and packed size,
    // sorted by offset so we can stream the archive in a single forward
    // pass.
    let mut packed_size_by_local_offset: BTreeMap<u64, u64> = BTreeMap::new();
    for entry in locate_zip_entries(&mut input)? {
        let entry = entry?;
        if entry.encryption == Encryption::Traditional {
            packed_size_by_local_offset.insert(entry.offset, entry.packed_size);
        }
    }

    input.seek(SeekFrom::Start(0))?;
    let mut current_offset: u64 = 0;

    progress.advance(0);
    progress.set_total(packed_size_by_local_offset.len() as u64);

    for (&local_header_offset, &packed_size) in &packed_size_by_local_offset {
        if progress.should_stop() {
            return Err(Error::zip("rekeying was canceled"));
        }

        if current_offset < local_header_offset {
            copy_n(&mut input, output, local_header_offset - current_offset)?;
        }

        let mut sig_buf = [0u8; 4];
        input.read_exact(&mut sig_buf)?;
        if u32::from_le_bytes(sig_buf) != LOCAL_FILE_HEADER_SIG {
            return Err(Error::zip("could not find local file header"));
        }
        output.write_all(&sig_buf)?;

        copy_n(&mut input, output, 22)?;

        let filename_length = read_u16(&mut input)?;
        let extra_length = read_u16(&mut input)?;
        output.write_all(&filename_length.to_le_bytes())?;
        output.write_all(&extra_length.to_le_bytes())?;

        let header_tail = u64::from(filename_length) + u64::from(extra_length);
        if header_tail > 0 {
            copy_n(&mut input, output, header_tail)?;
        }

        let mut decrypt = old_keys;
        let mut encrypt = new_keys;
        let mut byte = [0u8; 1];
        for _ in 0..packed_size {
            input.read_exact(&mut byte)?;
            let p = byte[0] ^ decrypt.keystream_byte();
            let c = p ^ encrypt.keystream_byte();
            decrypt.update(p);
            encrypt.update(p);
            output.write_all(&[c])?;
        }

        current_offset = local_header_offset + 30 + header_tail + packed_size;
        progress.advance(1);
    }

    std::io::copy(&mut input, output)?;

    Ok(())
}

fn copy_n<R: Read, W: Write>(input: &mut R, output: &mut W, n: u64) -> std::io::Result<()> {
    let mut remaining = n;
    let mut buf = [0u8; 8192];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        input.read_exact(&mut buf[..chunk])?;
        output.write_all(&buf[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decipher_stream_recovers_plaintext() {
        let plaintext = b"the quick brown fox";
        let mut keys = Keys::from_password(b"pw");
        let header: Vec<u8> = (0..12u8).collect();
        let mut ciphertext = Vec::new();
        for &b in &header {
            ciphertext.push(b ^ keys.keystream_byte());
            keys.update(b);
        }
        for &b in plaintext {
            ciphertext.push(b ^ keys.keystream_byte());
            keys.update(b);
        }

        let mut input = std::io::Cursor::new(ciphertext.clone());
        let mut output = Vec::new();
        decipher_stream(&mut input, ciphertext.len(), 12, &mut output, Keys::from_password(b"pw")).unwrap();
        assert_eq!(output, plaintext);
    }

    #[test]
    fn test_decipher_stream_with_no_discard() {
        let plaintext = b"abc";
        let mut keys = Keys::from_password(b"x");
        let mut ciphertext = Vec::new();
        for &b in plaintext {
            ciphertext.push(b ^ keys.keystream_byte());
            keys.update(b);
        }

        let mut input = std::io::Cursor::new(ciphertext.clone());
        let mut output = Vec::new();
        decipher_stream(&mut input, ciphertext.len(), 0, &mut output, Keys::from_password(b"x")).unwrap();
        assert_eq!(output, plaintext);
    }

    fn write_le_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn write_le_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// A minimal single-entry archive with one `Traditional`-encrypted,
    /// stored entry, encrypted under `password`.
    fn build_encrypted_archive(name: &str, password: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let header = [0x17u8; 12];
        let mut keys = Keys::from_password(password);
        let mut packed = Vec::with_capacity(header.len() + plaintext.len());
        for &b in &header {
            packed.push(b ^ keys.keystream_byte());
            keys.update(b);
        }
        for &b in plaintext {
            packed.push(b ^ keys.keystream_byte());
            keys.update(b);
        }

        let mut buf = Vec::new();
        let local_header_offset = buf.len() as u32;
        write_le_u32(&mut buf, LOCAL_FILE_HEADER_SIG);
        write_le_u16(&mut buf, 20); // version needed
        write_le_u16(&mut buf, 1); // flags: encrypted
        write_le_u16(&mut buf, 0); // method: stored
        write_le_u16(&mut buf, 0); // time
        write_le_u16(&mut buf, 0); // date
        write_le_u32(&mut buf, 0); // crc32
        write_le_u32(&mut buf, packed.len() as u32);
        write_le_u32(&mut buf, plaintext.len() as u32);
        write_le_u16(&mut buf, name.len() as u16);
        write_le_u16(&mut buf, 0); // extra length
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&packed);

        let central_directory_offset = buf.len() as u32;
        write_le_u32(&mut buf, 0x0201_4b50); // central directory header signature
        write_le_u16(&mut buf, 20); // version made by
        write_le_u16(&mut buf, 20); // version needed
        write_le_u16(&mut buf, 1); // flags: encrypted
        write_le_u16(&mut buf, 0); // method
        write_le_u16(&mut buf, 0); // time
        write_le_u16(&mut buf, 0); // date
        write_le_u32(&mut buf, 0); // crc32
        write_le_u32(&mut buf, packed.len() as u32);
        write_le_u32(&mut buf, plaintext.len() as u32);
        write_le_u16(&mut buf, name.len() as u16);
        write_le_u16(&mut buf, 0); // extra length
        write_le_u16(&mut buf, 0); // comment length
        write_le_u16(&mut buf, 0); // disk number start
        write_le_u16(&mut buf, 0); // internal attributes
        write_le_u32(&mut buf, 0); // external attributes
        write_le_u32(&mut buf, local_header_offset);
        buf.extend_from_slice(name.as_bytes());

        let central_directory_size = buf.len() as u32 - central_directory_offset;

        write_le_u32(&mut buf, 0x0605_4b50); // end of central directory signature
        write_le_u16(&mut buf, 0);
        write_le_u16(&mut buf, 0);
        write_le_u16(&mut buf, 1);
        write_le_u16(&mut buf, 1);
        write_le_u32(&mut buf, central_directory_size);
        write_le_u32(&mut buf, central_directory_offset);
        write_le_u16(&mut buf, 0);

        buf
    }

    #[test]
    fn test_rekey_then_decipher_with_new_password_recovers_plaintext() {
        // spec.md §8 scenario 6: discovered keys let us rekey under a new
        // password, and decrypting the rekeyed archive with that new
        // password yields the original plaintext byte-for-byte.
        let plaintext = b"Hello world! This survives a rekey.";
        let old_password = b"bkcrack";
        let new_password = b"new-password";
        let archive = build_encrypted_archive("secret.bin", old_password, plaintext);

        let old_keys = Keys::from_password(old_password);
        let new_keys = Keys::from_password(new_password);

        let progress = Progress::new(0);
        let mut rekeyed = Vec::new();
        change_keys(std::io::Cursor::new(archive), &mut rekeyed, old_keys, new_keys, &progress).unwrap();

        let (mut reader, entry) = crate::reader::find_entry_by_name(std::io::Cursor::new(rekeyed), "secret.bin").unwrap();
        assert_eq!(entry.encryption, Encryption::Traditional);

        let mut output = Vec::new();
        decipher_stream(&mut reader, entry.packed_size as usize, 12, &mut output, new_keys).unwrap();
        assert_eq!(output, plaintext);
    }
}
