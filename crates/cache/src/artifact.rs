//! Cached artifacts and the reclamation queue
//!
//! A [`CachedArtifact`] is shared as `Arc<CachedArtifact>`. The cache map
//! only keeps a `Weak` to it, so the artifact lives exactly as long as some
//! caller (or the cache's retention ring) holds it. When the last strong
//! reference goes away the artifact posts a [`Reclaimed`] notice to the
//! [`ReclaimQueue`] it was registered on, and the next compaction pass
//! removes the dead map entry.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use formula_render::{Dimensions, Raster, Signature};
use parking_lot::Mutex;

use crate::key::SignatureKey;

/// Unique id of one rendered artifact
///
/// Re-rendering the same signature produces a new id, which lets
/// compaction tell a dead entry apart from its replacement.
pub type ArtifactId = u64;

static NEXT_ARTIFACT_ID: AtomicU64 = AtomicU64::new(1);

/// Notice posted when an artifact has been dropped
#[derive(Debug, Clone)]
pub struct Reclaimed {
    pub key: Arc<SignatureKey>,
    pub id: ArtifactId,
}

/// FIFO of reclamation notices, drained by compaction
#[derive(Debug, Default)]
pub struct ReclaimQueue {
    notices: Mutex<VecDeque<Reclaimed>>,
}

impl ReclaimQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, notice: Reclaimed) {
        self.notices.lock().push_back(notice);
    }

    /// Take every pending notice, oldest first
    pub fn drain(&self) -> Vec<Reclaimed> {
        self.notices.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.notices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A rendered formula owned by whoever currently holds it
pub struct CachedArtifact {
    id: ArtifactId,
    key: Arc<SignatureKey>,
    raster: Raster,
    dimensions: Dimensions,
    /// Second-chance bit for the retention ring
    referenced: AtomicBool,
    queue: Weak<ReclaimQueue>,
}

impl CachedArtifact {
    /// Wrap a freshly rendered raster, registering it on `queue`
    pub fn new(
        key: Arc<SignatureKey>,
        raster: Raster,
        dimensions: Dimensions,
        queue: &Arc<ReclaimQueue>,
    ) -> Self {
        Self {
            id: NEXT_ARTIFACT_ID.fetch_add(1, Ordering::Relaxed),
            key,
            raster,
            dimensions,
            referenced: AtomicBool::new(false),
            queue: Arc::downgrade(queue),
        }
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    /// The key this artifact was rendered for
    pub fn key(&self) -> &Arc<SignatureKey> {
        &self.key
    }

    pub fn signature(&self) -> &Signature {
        self.key.signature()
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    /// Dimensions reported by the renderer for this artifact
    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Bytes of pixel data held by this artifact
    pub fn byte_size(&self) -> usize {
        self.raster.byte_size()
    }

    pub(crate) fn mark_referenced(&self) {
        self.referenced.store(true, Ordering::Relaxed);
    }

    /// Clear the second-chance bit, returning its previous value
    pub(crate) fn take_referenced(&self) -> bool {
        self.referenced.swap(false, Ordering::Relaxed)
    }
}

impl fmt::Debug for CachedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedArtifact")
            .field("id", &self.id)
            .field("signature", self.key.signature())
            .field("dimensions", &self.dimensions)
            .field("bytes", &self.raster.byte_size())
            .finish()
    }
}

impl Drop for CachedArtifact {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.post(Reclaimed {
                key: Arc::clone(&self.key),
                id: self.id,
            });
        }
    }
}
