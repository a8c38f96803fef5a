//! Manifest objects for block-decomposed BLAKE3 blobs.
//!
//! A manifest is the CAS counterpart of a large blob: a concatenation of
//! fixed-size records, one per block, each carrying the digest of that
//! block. Blocks larger than 1024 bytes occupy a parent-node record; a
//! final block of at most 1024 bytes occupies a chunk-node record.

use crate::digest::Digest;
use crate::hash::HashFunction;

/// Size of a manifest record describing a multi-chunk block.
pub const PARENT_NODE_SIZE_BYTES: usize = 64;

/// Size of a manifest record describing a final block of at most 1024
/// bytes.
pub const CHUNK_NODE_SIZE_BYTES: usize = 97;

const SMALL_BLOCK_THRESHOLD: u64 = 1024;

/// Extracts block digests from existing manifests and inserts block
/// digests into new ones.
///
/// Obtained through [`Digest::to_manifest`], which fixes the blob size,
/// block size, and hash geometry the parser operates under.
#[derive(Clone, Debug)]
pub struct ManifestParser {
    instance_name: String,
    blob_size_bytes: u64,
    block_size_bytes: u64,
    hash_length: usize,
}

impl ManifestParser {
    pub(crate) fn new(
        instance_name: String,
        blob_size_bytes: u64,
        block_size_bytes: u64,
        hash_length: usize,
    ) -> ManifestParser {
        ManifestParser {
            instance_name,
            blob_size_bytes,
            block_size_bytes,
            hash_length,
        }
    }

    fn block_count(&self) -> u64 {
        self.blob_size_bytes.div_ceil(self.block_size_bytes)
    }

    fn last_block_size_bytes(&self) -> u64 {
        let remainder = self.blob_size_bytes % self.block_size_bytes;
        if remainder == 0 {
            self.block_size_bytes
        } else {
            remainder
        }
    }

    fn record_size_bytes(&self, block_size_bytes: u64) -> usize {
        if block_size_bytes <= SMALL_BLOCK_THRESHOLD {
            CHUNK_NODE_SIZE_BYTES
        } else {
            PARENT_NODE_SIZE_BYTES
        }
    }

    /// The total size of a well-formed manifest for this blob.
    pub fn manifest_size_bytes(&self) -> u64 {
        (self.block_count() - 1) * PARENT_NODE_SIZE_BYTES as u64
            + self.record_size_bytes(self.last_block_size_bytes()) as u64
    }

    /// Look up the digest of the block containing the given byte offset of
    /// the blob. Returns the block's digest and the offset at which the
    /// block starts.
    pub fn block_digest_at(
        &self,
        manifest: &[u8],
        offset_bytes: u64,
    ) -> crate::Result<(Digest, u64)> {
        if manifest.len() as u64 != self.manifest_size_bytes() {
            return Err(crate::Error::InvalidManifest(format!(
                "manifest is {} bytes, expected {}",
                manifest.len(),
                self.manifest_size_bytes()
            )));
        }
        if offset_bytes >= self.blob_size_bytes {
            return Err(crate::Error::InvalidManifest(format!(
                "offset {} lies past blob of {} bytes",
                offset_bytes, self.blob_size_bytes
            )));
        }

        let index = offset_bytes / self.block_size_bytes;
        let block_offset = index * self.block_size_bytes;
        let block_size = if index == self.block_count() - 1 {
            self.last_block_size_bytes()
        } else {
            self.block_size_bytes
        };
        let record_start = (index as usize) * PARENT_NODE_SIZE_BYTES;
        let hash = manifest[record_start..record_start + self.hash_length].to_vec();
        let digest = Digest::from_parts(
            self.instance_name.clone(),
            HashFunction::Blake3,
            hash,
            block_size,
        );
        Ok((digest, block_offset))
    }

    /// Compute the digest of a block and append its record to a manifest
    /// under construction. Blocks must be appended in blob order; only the
    /// final block may be shorter than the block size.
    pub fn append_block_digest(&self, manifest: &mut Vec<u8>, block: &[u8]) -> Digest {
        let mut hasher = HashFunction::Blake3.hasher(self.hash_length);
        hasher.update(block);
        let hash = hasher.finalize();

        let record_size = self.record_size_bytes(block.len() as u64);
        let record_start = manifest.len();
        manifest.extend_from_slice(&hash);
        manifest.resize(record_start + record_size, 0);

        Digest::from_parts(
            self.instance_name.clone(),
            HashFunction::Blake3,
            hash,
            block.len() as u64,
        )
    }
}
