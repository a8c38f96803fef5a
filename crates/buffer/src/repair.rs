//! Repair signaling for reparable CAS objects.

use crate::error::Error;
use depot_core::Digest;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

type RepairCallback = dyn Fn() -> Result<(), Error> + Send + Sync;

/// How a CAS buffer reacts to discovering that the data it carries is
/// corrupt.
///
/// A reparable strategy invokes its callback exactly once per buffer
/// construction, on the first size or checksum mismatch, no matter how
/// many consumers observe the failure. The integrity error still surfaces
/// to the consumer afterwards; repair happens out of band.
#[derive(Clone)]
pub struct RepairStrategy {
    inner: Option<Arc<RepairInner>>,
}

struct RepairInner {
    digest: Digest,
    callback: Box<RepairCallback>,
    triggered: AtomicBool,
}

impl RepairStrategy {
    /// Checksum failures surface without any attempt at repair.
    pub fn irreparable() -> RepairStrategy {
        RepairStrategy { inner: None }
    }

    /// Checksum failures invoke `callback` once before the integrity error
    /// surfaces, giving the backend a chance to replace the object.
    pub fn reparable(
        digest: Digest,
        callback: impl Fn() -> Result<(), Error> + Send + Sync + 'static,
    ) -> RepairStrategy {
        RepairStrategy {
            inner: Some(Arc::new(RepairInner {
                digest,
                callback: Box::new(callback),
                triggered: AtomicBool::new(false),
            })),
        }
    }

    pub(crate) fn on_integrity_failure(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        if inner.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = (inner.callback)() {
            warn!(digest = %inner.digest, error = %err, "failed to repair corrupted object");
        }
    }
}
