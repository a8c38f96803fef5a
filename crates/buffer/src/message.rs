//! Typed Action Cache messages.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;

/// A typed message stored in the Action Cache.
///
/// Blanket-implemented for any owned serde value. Messages travel over the
/// wire in JSON form.
pub trait CacheMessage: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<M: Serialize + DeserializeOwned + Clone + Send + Sync + 'static> CacheMessage for M {}

/// Serialize a message to its wire form.
pub(crate) fn marshal<M: CacheMessage>(message: &M) -> Result<Bytes> {
    let data = serde_json::to_vec(message).map_err(|err| Error::MarshalFailure(err.to_string()))?;
    Ok(Bytes::from(data))
}

/// Parse a message from its wire form.
pub(crate) fn unmarshal<M: CacheMessage>(data: &[u8]) -> Result<M> {
    serde_json::from_slice(data).map_err(|err| Error::UnmarshalFailure(err.to_string()))
}

/// Object-safe holder for an already-parsed message whose concrete type
/// has been erased.
pub(crate) trait ErasedMessage: Send + Sync {
    fn marshal(&self) -> Result<Bytes>;
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct TypedMessage<M: CacheMessage>(pub(crate) M);

impl<M: CacheMessage> ErasedMessage for TypedMessage<M> {
    fn marshal(&self) -> Result<Bytes> {
        marshal(&self.0)
    }

    fn as_any(&self) -> &dyn Any {
        &self.0
    }
}
