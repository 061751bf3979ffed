//! `bkcrack`: mount the Biham-Kocher known-plaintext attack on ZipCrypto
//! from the command line, recover internal keys, decipher, rekey, and
//! recover a textual password.

mod charset;
mod load;
mod progress_bar;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use bkcrack_attack::data::Data;
use bkcrack_attack::{attack, recover_password, reduce_z};
use bkcrack_core::progress::Progress;
use bkcrack_core::Keys;
use bkcrack_zip::{change_keys, decipher_stream, locate_zip_entries};

use crate::charset::parse_charset;
use crate::progress_bar::with_progress_bar;

#[derive(Parser)]
#[command(name = "bkcrack")]
#[command(author, version, about = "Crack legacy zip encryption with Biham and Kocher's known-plaintext attack")]
#[command(long_about = "
bkcrack recovers the internal key triple of a ZipCrypto (traditional PKWARE
encryption) stream from known plaintext, then optionally deciphers, rekeys,
or recovers the textual password that produced the keys.

Examples:
  bkcrack -c cipher.bin -p plain.bin
  bkcrack -C secret.zip -c data.bin -P plain.zip -p data.bin -d deciphered.bin
  bkcrack -k 12345678 23456789 34567890 -C secret.zip -c data.bin -r 10 ?l
")]
struct Cli {
    /// File containing the ciphertext
    #[arg(short = 'c', long = "cipher-file")]
    cipher_file: Option<PathBuf>,
    /// Index of the ciphertext entry within --cipher-zip
    #[arg(long = "cipher-index")]
    cipher_index: Option<usize>,
    /// Zip archive containing the ciphertext entry
    #[arg(short = 'C', long = "cipher-zip")]
    cipher_zip: Option<PathBuf>,

    /// File containing the known plaintext
    #[arg(short = 'p', long = "plain-file")]
    plain_file: Option<PathBuf>,
    /// Index of the known-plaintext entry within --plain-zip
    #[arg(long = "plain-index")]
    plain_index: Option<usize>,
    /// Zip archive containing the known-plaintext entry
    #[arg(short = 'P', long = "plain-zip")]
    plain_zip: Option<PathBuf>,
    /// Maximum number of plaintext bytes to read
    #[arg(short = 't', long = "truncate")]
    truncate: Option<usize>,

    /// Known plaintext offset relative to ciphertext without the encryption
    /// header (may be negative)
    #[arg(short = 'o', long, default_value_t = 0)]
    offset: i64,

    /// Extra known plaintext as "position:hexbytes", e.g. "40:48656c6c6f";
    /// may be repeated
    #[arg(short = 'x', long = "extra")]
    extra: Vec<String>,

    /// Keep searching after the first solution instead of stopping early
    #[arg(short = 'e', long)]
    exhaustive: bool,

    /// Internal keys as three hexadecimal 32-bit words "X Y Z", skipping
    /// the known-plaintext attack
    #[arg(short = 'k', long, num_args = 3, value_names = ["X", "Y", "Z"])]
    keys: Option<Vec<String>>,

    /// File to write the deciphered plaintext to
    #[arg(short = 'd', long = "decipher")]
    decipher: Option<PathBuf>,

    /// Produce a copy of --cipher-zip encrypted under a new password:
    /// "outputzip newpassword"
    #[arg(short = 'U', long = "change-password", num_args = 2, value_names = ["OUTPUTZIP", "NEWPASSWORD"])]
    change_password: Option<Vec<String>>,

    /// Recover the password from the keys: "maxlength charset"
    #[arg(short = 'r', long = "recover-password", num_args = 2, value_names = ["MAXLENGTH", "CHARSET"])]
    recover_password: Option<Vec<String>>,
    /// Smallest password length to try for --recover-password
    #[arg(long = "min-length", default_value_t = 1)]
    min_length: usize,

    /// List the entries of a zip archive and exit
    #[arg(short = 'L', long = "list")]
    list: Option<PathBuf>,

    /// Number of threads to use (0 lets rayon pick)
    #[arg(short = 'j', long, default_value_t = 0)]
    jobs: usize,
}

const HEADER_SIZE: usize = bkcrack_attack::data::HEADER_SIZE;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(archive) = &cli.list {
        return list_archive(archive);
    }

    if cli.jobs > 0 {
        rayon::ThreadPoolBuilder::new().num_threads(cli.jobs).build_global().ok();
    }

    let progress = Arc::new(Progress::new(0));
    {
        let progress = Arc::clone(&progress);
        ctrlc::set_handler(move || progress.cancel()).ok();
    }

    let keys = if let Some(hex) = &cli.keys {
        parse_keys(hex)?
    } else {
        find_keys(&cli, &progress)?
    };

    let Some(keys) = keys else {
        println!("Could not find the keys.");
        return Ok(());
    };

    println!("Keys: {keys}");

    if let Some(decipher_path) = &cli.decipher {
        decipher_to_file(&cli, &keys, decipher_path)?;
        println!("Wrote deciphered text to {}", decipher_path.display());
    }

    if let Some(change) = &cli.change_password {
        let [output_zip, new_password] = &change[..] else { unreachable!("num_args = 2") };
        rekey_archive(&cli, &keys, output_zip, new_password, &progress)?;
        println!("Wrote {output_zip}");
    }

    if let Some(recover) = &cli.recover_password {
        let [max_length, charset_spec] = &recover[..] else { unreachable!("num_args = 2") };
        let max_length: usize = max_length.parse()?;
        let charset = parse_charset(charset_spec)?;

        progress.reset(0);
        let passwords = with_progress_bar("recovering password", &progress, || {
            recover_password(keys, &charset, cli.min_length, max_length, cli.exhaustive, &progress)
        });

        if passwords.is_empty() {
            println!("No password found.");
        } else {
            for password in &passwords {
                println!("Password: {password}");
            }
        }
    }

    Ok(())
}

fn parse_keys(hex: &[String]) -> Result<Option<Keys>, Box<dyn std::error::Error>> {
    let [x, y, z] = hex else { unreachable!("num_args = 3") };
    let parse = |s: &str| -> Result<u32, std::num::ParseIntError> { u32::from_str_radix(s, 16) };
    Ok(Some(Keys::new(parse(x)?, parse(y)?, parse(z)?)))
}

fn parse_extra(entries: &[String]) -> Result<BTreeMap<usize, u8>, Box<dyn std::error::Error>> {
    let mut extra = BTreeMap::new();
    for entry in entries {
        let (pos, hex) = entry
            .split_once(':')
            .ok_or_else(|| format!("expected \"position:hexbytes\", got \"{entry}\""))?;
        let mut pos: usize = pos.parse()?;
        if hex.len() % 2 != 0 {
            return Err(format!("expected an even number of hex digits, got \"{hex}\"").into());
        }
        for chunk in hex.as_bytes().chunks(2) {
            let byte_str = std::str::from_utf8(chunk)?;
            extra.insert(pos, u8::from_str_radix(byte_str, 16)?);
            pos += 1;
        }
    }
    Ok(extra)
}

fn load_plaintext(cli: &Cli) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let truncate = cli.truncate.unwrap_or(usize::MAX);
    if let Some(zip) = &cli.plain_zip {
        if let Some(name) = &cli.plain_file {
            Ok(load::load_zip_entry_by_name(zip, name, false, truncate)?)
        } else if let Some(index) = cli.plain_index {
            Ok(load::load_zip_entry_by_index(zip, index, false, truncate)?)
        } else {
            Err("-p or --plain-index parameter is missing (required by -P)".into())
        }
    } else if let Some(file) = &cli.plain_file {
        Ok(load::load_file(file, truncate)?)
    } else {
        Ok(Vec::new())
    }
}

fn load_ciphertext(cli: &Cli, needed: usize) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if let Some(zip) = &cli.cipher_zip {
        if let Some(name) = &cli.cipher_file {
            Ok(load::load_zip_entry_by_name(zip, name, true, needed)?)
        } else if let Some(index) = cli.cipher_index {
            Ok(load::load_zip_entry_by_index(zip, index, true, needed)?)
        } else {
            Err("-c or --cipher-index parameter is missing".into())
        }
    } else if let Some(file) = &cli.cipher_file {
        Ok(load::load_file(file, needed)?)
    } else {
        Err("-c or --cipher-index parameter is missing".into())
    }
}

fn find_keys(cli: &Cli, progress: &Arc<Progress>) -> Result<Option<Keys>, Box<dyn std::error::Error>> {
    let extra_plaintext = parse_extra(&cli.extra)?;

    let plaintext = load_plaintext(cli)?;

    let mut needed = HEADER_SIZE;
    if !plaintext.is_empty() {
        needed = needed.max((HEADER_SIZE as i64 + cli.offset + plaintext.len() as i64).max(0) as usize);
    }
    if let Some((&pos, _)) = extra_plaintext.last_key_value() {
        needed = needed.max(HEADER_SIZE + pos + 1);
    }

    let ciphertext = load_ciphertext(cli, needed)?;
    let data = Data::new(ciphertext, plaintext, cli.offset, extra_plaintext)?;

    println!("Generating and reducing Z values from {} known plaintext bytes...", data.keystream.len());
    let (candidates, index) = reduce_z(&data.keystream);
    println!("{} Z value(s) remaining at index {index}", candidates.len());

    let found = with_progress_bar("attack", progress, || attack(&data, &candidates, index, cli.exhaustive, progress));

    Ok(found.into_iter().next())
}

fn decipher_to_file(cli: &Cli, keys: &Keys, output: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    use std::fs::File;
    use std::io::{BufReader, BufWriter};

    let input_file = File::open(cli.cipher_file.as_ref().ok_or("-c or --cipher-index parameter is missing (required by -d)")?)?;
    let mut reader = BufReader::new(input_file);
    let metadata_len = reader.get_ref().metadata()?.len() as usize;
    let mut writer = BufWriter::new(File::create(output)?);
    decipher_stream(&mut reader, metadata_len, HEADER_SIZE, &mut writer, *keys)?;
    Ok(())
}

fn rekey_archive(cli: &Cli, keys: &Keys, output_zip: &str, new_password: &str, progress: &Progress) -> Result<(), Box<dyn std::error::Error>> {
    use std::fs::File;
    use std::io::{BufReader, BufWriter};

    let archive = cli.cipher_zip.as_ref().ok_or("-C parameter is missing (required by -U)")?;
    let input = BufReader::new(File::open(archive)?);
    let mut output = BufWriter::new(File::create(output_zip)?);

    let new_keys = Keys::from_password(new_password.as_bytes());
    progress.reset(0);
    with_progress_bar("rekeying", progress, || change_keys(input, &mut output, *keys, new_keys, progress))?;
    Ok(())
}

fn list_archive(archive: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    use std::fs::File;
    use std::io::BufReader;

    let reader = BufReader::new(File::open(archive)?);
    println!("{:>6}  {:<14} {:<10} Name", "Index", "Encryption", "Compression");
    for (index, entry) in locate_zip_entries(reader)?.enumerate() {
        let entry = entry?;
        println!("{:>6}  {:<14?} {:<10?} {}", index, entry.encryption, entry.compression, entry.name);
    }
    Ok(())
}
