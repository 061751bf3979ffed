//! Metadata about a single entry of a zip central directory.

/// The encryption algorithm protecting an entry's data, as far as it can be
/// told from the central directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    /// The entry is not encrypted.
    None,
    /// Traditional PKWARE encryption (ZipCrypto), the target of this attack.
    Traditional,
    /// Any other encryption scheme (DES, RC2, 3DES, AES, Blowfish, Twofish,
    /// RC4 via the AE-x extra field, or strong encryption). Not attackable
    /// here.
    Unsupported,
}

/// The compression algorithm used to store an entry's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    Stored,
    /// DEFLATE.
    Deflate,
    /// Any other method, identified by its raw method id.
    Unknown(u16),
}

impl Compression {
    pub(crate) fn from_u16(method: u16) -> Self {
        match method {
            0 => Self::Stored,
            8 => Self::Deflate,
            other => Self::Unknown(other),
        }
    }
}

/// A single entry read from a zip central directory.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    /// The entry's file name.
    pub name: String,
    /// Encryption algorithm used for this entry's data.
    pub encryption: Encryption,
    /// Compression algorithm used for this entry's data.
    pub compression: Compression,
    /// CRC-32 of the uncompressed data, as recorded in the central
    /// directory.
    pub crc32: u32,
    /// Offset of the local file header, from the start of the archive.
    pub offset: u64,
    /// Size in bytes of the (possibly compressed, possibly encrypted) data.
    pub packed_size: u64,
    /// Size in bytes of the data once decompressed.
    pub uncompressed_size: u64,
    /// A single byte of known plaintext derived from the central directory
    /// record itself: the high byte of the last-modified DOS time if bit 3
    /// of the general purpose flags is set (data descriptor in use), or the
    /// high byte of the CRC-32 otherwise. Always the last byte of a
    /// traditionally-encrypted entry's 12-byte encryption header.
    pub check_byte: u8,
}
