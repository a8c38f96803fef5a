//! Buffer core of the depot remote-execution storage layer.
//!
//! A [`Buffer`] is the unit of exchange between storage backends and
//! consumers: a polymorphic handle to CAS or AC object contents that
//! validates integrity on delivery, stays lazy for streaming sources,
//! supports retry with stream stitching through [`ErrorHandler`], and can
//! be split for multiple consumers with `clone_copy` and `clone_stream`.

mod buffer;
mod chunk_reader;
mod cloning;
mod error;
mod error_handling;
mod message;
mod normalizing;
mod repair;
mod source;
mod validating;

pub use buffer::Buffer;
pub use chunk_reader::{
    ByteStream, BytesChunkReader, ChunkReader, ReaderChunkReader, StreamChunkReader,
};
pub use error::{Error, Result};
pub use error_handling::ErrorHandler;
pub use message::CacheMessage;
pub use normalizing::ChunkPolicy;
pub use repair::RepairStrategy;
pub use source::{DataIntegrityListener, Source};
