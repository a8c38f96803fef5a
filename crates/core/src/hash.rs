//! Hash functions and incremental hashers.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha384, Sha512};

/// Textual prefix of BLAKE3 blob hashes.
pub const BLAKE3_PREFIX: &str = "B3Z:";

/// Textual prefix of BLAKE3 manifest hashes.
pub const BLAKE3_MANIFEST_PREFIX: &str = "B3ZM:";

/// The hash function with which a digest was computed.
///
/// Bare hexadecimal hashes select their function by length. The BLAKE3
/// variants are prefixed (`B3Z:` for blobs, `B3ZM:` for manifest objects)
/// and may use any byte length the producing hasher was configured with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashFunction {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Blake3,
    Blake3Manifest,
}

impl HashFunction {
    /// The prefix carried by the textual form of hashes of this function.
    pub fn prefix(&self) -> &'static str {
        match self {
            HashFunction::Blake3 => BLAKE3_PREFIX,
            HashFunction::Blake3Manifest => BLAKE3_MANIFEST_PREFIX,
            _ => "",
        }
    }

    /// Select a hash function for a bare hexadecimal hash of the given
    /// character length.
    fn from_hex_length(len: usize) -> crate::Result<HashFunction> {
        match len {
            32 => Ok(HashFunction::Md5),
            40 => Ok(HashFunction::Sha1),
            64 => Ok(HashFunction::Sha256),
            96 => Ok(HashFunction::Sha384),
            128 => Ok(HashFunction::Sha512),
            _ => Err(crate::Error::InvalidHash(format!(
                "hash of {len} characters matches no supported function"
            ))),
        }
    }

    /// Create an incremental hasher producing `hash_length` bytes of output.
    ///
    /// For the fixed-width functions `hash_length` must equal the function's
    /// output size; the BLAKE3 variants honor any requested length through
    /// extended output.
    pub fn hasher(&self, hash_length: usize) -> Hasher {
        match self {
            HashFunction::Md5 => Hasher::Md5(Md5::new()),
            HashFunction::Sha1 => Hasher::Sha1(Sha1::new()),
            HashFunction::Sha256 => Hasher::Sha256(Sha256::new()),
            HashFunction::Sha384 => Hasher::Sha384(Sha384::new()),
            HashFunction::Sha512 => Hasher::Sha512(Sha512::new()),
            HashFunction::Blake3 | HashFunction::Blake3Manifest => Hasher::Blake3 {
                hasher: Box::new(blake3::Hasher::new()),
                length: hash_length,
            },
        }
    }
}

/// Parse the textual form of a hash into its function and raw bytes.
pub(crate) fn parse_hash_string(hash: &str) -> crate::Result<(HashFunction, Vec<u8>)> {
    if let Some(hex) = hash.strip_prefix(BLAKE3_PREFIX) {
        let bytes = decode_hex(hex)?;
        if bytes.is_empty() {
            return Err(crate::Error::InvalidHash("empty BLAKE3 hash".to_string()));
        }
        return Ok((HashFunction::Blake3, bytes));
    }
    if let Some(hex) = hash.strip_prefix(BLAKE3_MANIFEST_PREFIX) {
        let bytes = decode_hex(hex)?;
        if bytes.is_empty() {
            return Err(crate::Error::InvalidHash(
                "empty BLAKE3 manifest hash".to_string(),
            ));
        }
        return Ok((HashFunction::Blake3Manifest, bytes));
    }
    let function = HashFunction::from_hex_length(hash.len())?;
    Ok((function, decode_hex(hash)?))
}

/// Incremental hasher for any supported hash function.
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake3 {
        hasher: Box<blake3::Hasher>,
        length: usize,
    },
}

impl Hasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
            Hasher::Blake3 { hasher, .. } => {
                hasher.update(data);
            }
        }
    }

    /// Finalize and return the raw hash bytes.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Md5(h) => h.finalize().to_vec(),
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
            Hasher::Blake3 { hasher, length } => {
                let mut out = vec![0u8; length];
                hasher.finalize_xof().fill(&mut out);
                out
            }
        }
    }
}

/// Encode bytes as lowercase hexadecimal.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decode a lowercase hexadecimal string.
pub fn decode_hex(s: &str) -> crate::Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(crate::Error::InvalidHash(format!(
            "odd number of hex characters: {}",
            s.len()
        )));
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = hex_value(pair[0])?;
            let lo = hex_value(pair[1])?;
            Ok(hi << 4 | lo)
        })
        .collect()
}

fn hex_value(c: u8) -> crate::Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(crate::Error::InvalidHash(format!(
            "invalid hex character: {:?}",
            c as char
        ))),
    }
}
