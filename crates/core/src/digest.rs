//! Blob identification for content-addressed storage.

use crate::hash::{self, HashFunction, Hasher};
use crate::manifest::{ManifestParser, CHUNK_NODE_SIZE_BYTES, PARENT_NODE_SIZE_BYTES};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Blocks no larger than this are recorded as chunk nodes in a manifest.
const SMALL_BLOCK_THRESHOLD: u64 = 1024;

/// The identity of an object stored in the Content Addressable Storage
/// (CAS) or Action Cache (AC).
///
/// Instances are guaranteed not to hold degenerate values: the hash has
/// been decoded and matched against its function, and the instance name has
/// been validated. Digests are frequently used as map keys and are cheap to
/// compare and hash.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    instance_name: String,
    hash_function: HashFunction,
    hash: Vec<u8>,
    size_bytes: u64,
}

impl Digest {
    /// Create a digest from an instance name, the textual form of a hash,
    /// and the object size in bytes.
    pub fn new(
        instance_name: impl Into<String>,
        hash: &str,
        size_bytes: u64,
    ) -> crate::Result<Digest> {
        let instance_name = instance_name.into();
        validate_instance_name(&instance_name)?;
        let (hash_function, hash) = hash::parse_hash_string(hash)?;
        Ok(Digest {
            instance_name,
            hash_function,
            hash,
            size_bytes,
        })
    }

    pub(crate) fn from_parts(
        instance_name: String,
        hash_function: HashFunction,
        hash: Vec<u8>,
        size_bytes: u64,
    ) -> Digest {
        Digest {
            instance_name,
            hash_function,
            hash,
            size_bytes,
        }
    }

    /// The instance name of the object.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// The hash function with which the object was hashed.
    pub fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    /// The raw hash bytes.
    pub fn hash_bytes(&self) -> &[u8] {
        &self.hash
    }

    /// The hash as lowercase hexadecimal, without any function prefix.
    pub fn hash_hex(&self) -> String {
        hash::encode_hex(&self.hash)
    }

    /// The textual form of the hash, including the function prefix for the
    /// BLAKE3 variants.
    pub fn hash_string(&self) -> String {
        format!("{}{}", self.hash_function.prefix(), self.hash_hex())
    }

    /// The size of the object, in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Create an incremental hasher using the same algorithm and output
    /// length as the one that produced this digest, so that data may be
    /// validated against it.
    pub fn hasher(&self) -> Hasher {
        self.hash_function.hasher(self.hash.len())
    }

    /// The digest function of this digest: a factory for new digests that
    /// use the same instance name and hash algorithm. Used to derive
    /// digests of objects related to an existing one.
    pub fn function(&self) -> DigestFunction {
        DigestFunction {
            instance_name: self.instance_name.clone(),
            hash_function: self.hash_function,
            hash_length: self.hash.len(),
        }
    }

    /// The resource path under which the object may be read through a
    /// byte-stream service: `{instance}/blobs/{hash}/{size}`.
    pub fn byte_stream_read_path(&self) -> String {
        join_path(&[
            &self.instance_name,
            "blobs",
            &self.hash_string(),
            &self.size_bytes.to_string(),
        ])
    }

    /// The resource path under which the object may be written through a
    /// byte-stream service:
    /// `{instance}/uploads/{uuid}/blobs/{hash}/{size}`.
    pub fn byte_stream_write_path(&self, upload_id: Uuid) -> String {
        join_path(&[
            &self.instance_name,
            "uploads",
            &upload_id.to_string(),
            "blobs",
            &self.hash_string(),
            &self.size_bytes.to_string(),
        ])
    }

    /// Parse a byte-stream read path of the form
    /// `{instance}/blobs/{hash}/{size}`.
    pub fn from_byte_stream_read_path(path: &str) -> crate::Result<Digest> {
        let fields: Vec<&str> = path.split('/').filter(|f| !f.is_empty()).collect();
        if fields.len() < 3 {
            return Err(crate::Error::InvalidResourceName(path.to_string()));
        }
        let split = fields.len() - 3;
        Self::from_byte_stream_fields(&fields[..split], &fields[split..])
    }

    /// Parse a byte-stream write path of the form
    /// `{instance}/uploads/{uuid}/blobs/{hash}/{size}/{path...}`.
    ///
    /// The instance name and the trailing path both have variable length,
    /// which is why instance names may not contain `uploads` components.
    pub fn from_byte_stream_write_path(path: &str) -> crate::Result<Digest> {
        let fields: Vec<&str> = path.split('/').filter(|f| !f.is_empty()).collect();
        if fields.len() < 5 {
            return Err(crate::Error::InvalidResourceName(path.to_string()));
        }
        let mut split = 0;
        while fields[split] != "uploads" {
            split += 1;
            if split > fields.len() - 5 {
                return Err(crate::Error::InvalidResourceName(path.to_string()));
            }
        }
        Uuid::parse_str(fields[split + 1])
            .map_err(|_| crate::Error::InvalidResourceName(path.to_string()))?;
        Self::from_byte_stream_fields(&fields[..split], &fields[split + 2..split + 5])
    }

    fn from_byte_stream_fields(header: &[&str], trailer: &[&str]) -> crate::Result<Digest> {
        if trailer[0] != "blobs" {
            return Err(crate::Error::InvalidResourceName(trailer.join("/")));
        }
        let size_bytes: u64 = trailer[2]
            .parse()
            .map_err(|_| crate::Error::InvalidSize(trailer[2].to_string()))?;
        Digest::new(header.join("/"), trailer[1], size_bytes)
    }

    /// Convert a BLAKE3 blob digest to the digest of its manifest object
    /// counterpart, along with a parser for that manifest. Manifest objects
    /// decompose large blobs into a series of fixed-size blocks, stored in
    /// the CAS as a concatenation of per-block digest records.
    ///
    /// Returns `None` for non-BLAKE3 digests and for blobs no larger than
    /// a single block, for which a manifest would be wasteful.
    pub fn to_manifest(&self, block_size_bytes: u64) -> Option<(Digest, ManifestParser)> {
        if self.hash_function != HashFunction::Blake3 {
            return None;
        }
        if self.size_bytes <= block_size_bytes {
            return None;
        }

        let block_count = self.size_bytes.div_ceil(block_size_bytes);
        let mut manifest_size_bytes = block_count * PARENT_NODE_SIZE_BYTES as u64;
        let last_block_size_bytes = self.size_bytes % block_size_bytes;
        if last_block_size_bytes > 0 && last_block_size_bytes <= SMALL_BLOCK_THRESHOLD {
            manifest_size_bytes += (CHUNK_NODE_SIZE_BYTES - PARENT_NODE_SIZE_BYTES) as u64;
        }

        let manifest_digest = Digest {
            instance_name: self.instance_name.clone(),
            hash_function: HashFunction::Blake3Manifest,
            hash: self.hash.clone(),
            size_bytes: manifest_size_bytes,
        };
        let parser = ManifestParser::new(
            self.instance_name.clone(),
            self.size_bytes,
            block_size_bytes,
            self.hash.len(),
        );
        Some((manifest_digest, parser))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.hash_string(),
            self.size_bytes,
            self.instance_name
        )
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

/// A factory for digests that share an instance name and hash algorithm.
///
/// Used when new digests need to be derived in the context of an existing
/// one, such as computing the digests of a large blob's blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DigestFunction {
    instance_name: String,
    hash_function: HashFunction,
    hash_length: usize,
}

impl DigestFunction {
    /// The instance name digests of this function carry.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// The hash function digests of this function use.
    pub fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    /// Create an incremental hasher for this function.
    pub fn hasher(&self) -> Hasher {
        self.hash_function.hasher(self.hash_length)
    }

    /// Compute the digest of a blob held in memory.
    pub fn compute_digest(&self, data: &[u8]) -> Digest {
        let mut hasher = self.hasher();
        hasher.update(data);
        Digest {
            instance_name: self.instance_name.clone(),
            hash_function: self.hash_function,
            hash: hasher.finalize(),
            size_bytes: data.len() as u64,
        }
    }
}

fn validate_instance_name(instance_name: &str) -> crate::Result<()> {
    for component in instance_name.split('/') {
        if component.is_empty() && !instance_name.is_empty() {
            return Err(crate::Error::InvalidInstanceName(format!(
                "empty path component in {instance_name:?}"
            )));
        }
        if component == "blobs" || component == "uploads" {
            return Err(crate::Error::InvalidInstanceName(format!(
                "instance name {instance_name:?} contains reserved component {component:?}"
            )));
        }
    }
    Ok(())
}

fn join_path(segments: &[&str]) -> String {
    let parts: Vec<&str> = segments.iter().copied().filter(|s| !s.is_empty()).collect();
    parts.join("/")
}
