//! Digest data model for the depot remote-execution storage layer.
//!
//! This crate defines the identification of content-addressed objects used
//! across the other crates:
//! - Hash functions and incremental hashers
//! - The `Digest` value and derived digest functions
//! - Byte-stream resource path forms
//! - Manifest objects for block-decomposed BLAKE3 blobs

pub mod digest;
pub mod error;
pub mod hash;
pub mod manifest;

pub use digest::{Digest, DigestFunction};
pub use error::{Error, Result};
pub use hash::{HashFunction, Hasher};
pub use manifest::{ManifestParser, CHUNK_NODE_SIZE_BYTES, PARENT_NODE_SIZE_BYTES};
