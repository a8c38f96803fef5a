//! Integrity notifications back to the origin of a buffer's data.

use crate::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives the integrity outcome of a single buffer's consumption.
///
/// Backends use this to learn whether a blob they handed out was actually
/// sound, for example to evict corrupted entries.
pub trait DataIntegrityListener: Send + Sync {
    /// The delivered data matched its digest, or parsed as a valid message.
    fn data_valid(&self);

    /// The delivered CAS data held the wrong number of bytes.
    fn size_mismatch(&self, expected_size_bytes: u64, actual_size_bytes: u64);

    /// The delivered CAS data hashed to the wrong checksum. Both checksums
    /// are lowercase hexadecimal.
    fn hash_mismatch(&self, expected: &str, actual: &str);

    /// The delivered Action Cache data failed to parse.
    fn parse_failure(&self, reason: &str);
}

/// The origin of a buffer's data, and the channel through which that
/// origin learns whether the delivered blob was sound.
///
/// At most one notification is delivered per buffer construction, no
/// matter how many validation layers or clone consumers observe the
/// outcome. Replacement buffers installed by an error handler carry their
/// own sources.
#[derive(Clone)]
pub struct Source {
    inner: Arc<SourceInner>,
}

struct SourceInner {
    listener: Option<Box<dyn DataIntegrityListener>>,
    notified: AtomicBool,
}

impl Source {
    /// Data fetched from a storage backend. The listener receives the
    /// integrity outcome once the buffer has been consumed.
    pub fn backend_provided(listener: impl DataIntegrityListener + 'static) -> Source {
        Source::new(Some(Box::new(listener)))
    }

    /// Data handed in by a caller. A mismatch indicates a caller-side
    /// error and no backend is interested in the outcome.
    pub fn user_provided() -> Source {
        Source::new(None)
    }

    fn new(listener: Option<Box<dyn DataIntegrityListener>>) -> Source {
        Source {
            inner: Arc::new(SourceInner {
                listener,
                notified: AtomicBool::new(false),
            }),
        }
    }

    fn first_notification(&self) -> Option<&dyn DataIntegrityListener> {
        if self.inner.notified.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.inner.listener.as_deref()
    }

    pub(crate) fn notify_data_valid(&self) {
        if let Some(listener) = self.first_notification() {
            listener.data_valid();
        }
    }

    pub(crate) fn notify_size_mismatch(
        &self,
        expected_size_bytes: u64,
        actual_size_bytes: u64,
    ) -> Error {
        if let Some(listener) = self.first_notification() {
            listener.size_mismatch(expected_size_bytes, actual_size_bytes);
        }
        Error::SizeMismatch {
            expected: expected_size_bytes,
            actual: actual_size_bytes,
        }
    }

    pub(crate) fn notify_hash_mismatch(&self, expected: String, actual: String) -> Error {
        if let Some(listener) = self.first_notification() {
            listener.hash_mismatch(&expected, &actual);
        }
        Error::HashMismatch { expected, actual }
    }

    pub(crate) fn notify_parse_failure(&self, reason: String) -> Error {
        if let Some(listener) = self.first_notification() {
            listener.parse_failure(&reason);
        }
        Error::UnmarshalFailure(reason)
    }
}
