//! Render cache for typeset formulas
//!
//! [`RenderCache`] maps signature keys to weak references to rendered
//! artifacts. Artifacts stay alive while a caller holds them or while the
//! cache's retention ring pins them; once dropped they are pruned lazily by
//! compaction. The number of map entries is bounded by a capacity that is
//! enforced on every insert.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use formula_render::{Dimensions, PaintSink, Renderer, Signature, Transform};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::artifact::{ArtifactId, CachedArtifact, ReclaimQueue};
use crate::config::CacheConfig;
use crate::flight::{InFlight, Role};
use crate::key::SignatureKey;
use crate::memory_budget::MemoryPressure;
use crate::retention::Retention;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to a cache entry
///
/// Returned by [`RenderCache::get_or_create`]. The handle stays a valid
/// identity even if the artifact behind it is reclaimed and re-rendered.
/// A handle is only recognized by the cache that issued it.
///
/// After [`RenderCache::invalidate`] a handle should be discarded: its key
/// may still be cross-seeded with dimensions if it is used again.
#[derive(Debug, Clone)]
pub struct FormulaHandle {
    cache_id: u64,
    key: Arc<SignatureKey>,
}

impl FormulaHandle {
    pub fn key(&self) -> &SignatureKey {
        &self.key
    }

    pub fn signature(&self) -> &Signature {
        self.key.signature()
    }

    /// Memoized dimensions of the handle's key
    pub fn dimensions(&self) -> Option<Dimensions> {
        self.key.dimensions()
    }
}

/// How a caller addresses a cache entry
#[derive(Debug, Clone)]
pub enum Query<'a> {
    /// By signature parameters
    Params(Signature),
    /// By a handle from [`RenderCache::get_or_create`]
    Handle(&'a FormulaHandle),
}

impl From<Signature> for Query<'_> {
    fn from(signature: Signature) -> Self {
        Query::Params(signature)
    }
}

impl From<&Signature> for Query<'_> {
    fn from(signature: &Signature) -> Self {
        Query::Params(signature.clone())
    }
}

impl<'a> From<&'a FormulaHandle> for Query<'a> {
    fn from(handle: &'a FormulaHandle) -> Self {
        Query::Handle(handle)
    }
}

/// Result of resolving a query against the map
enum Lookup {
    Hit {
        key: Arc<SignatureKey>,
        artifact: Arc<CachedArtifact>,
    },
    Miss {
        key: Arc<SignatureKey>,
    },
    /// Handle issued by another cache
    Foreign,
}

/// Map value: the artifact id plus a non-owning reference to it
#[derive(Debug)]
struct Slot {
    id: ArtifactId,
    artifact: Weak<CachedArtifact>,
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Map entries, including dead ones not yet compacted
    pub entries: usize,

    /// Current capacity
    pub max_entries: usize,

    /// Artifacts pinned by the retention ring
    pub retained: usize,

    /// Raster bytes pinned by the retention ring
    pub retained_bytes: usize,

    /// Retention budget in bytes
    pub retention_budget: usize,

    /// Lookups that found a live artifact
    pub hits: u64,

    /// Lookups that found no live artifact
    pub misses: u64,

    /// Successful renderer calls
    pub renders: u64,

    /// Failed renderer calls
    pub render_failures: u64,

    /// Live entries removed to stay within capacity
    pub evictions: u64,

    /// Dead entries pruned from the reclamation queue
    pub reclaimed: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    renders: AtomicU64,
    render_failures: AtomicU64,
    evictions: AtomicU64,
    reclaimed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Bounded, concurrent render cache
///
/// # Example
///
/// ```
/// use formula_cache::RenderCache;
/// use formula_render::{
///     Dimensions, Raster, RenderError, RenderedFormula, Renderer, Signature,
/// };
///
/// struct Blank;
///
/// impl Renderer for Blank {
///     type Error = RenderError;
///
///     fn render(&self, signature: &Signature) -> Result<RenderedFormula, RenderError> {
///         let width = signature.source.len() as u32 * signature.size;
///         Ok(RenderedFormula::new(
///             Raster::transparent(width, signature.size),
///             Dimensions::new(width, signature.size, 0),
///         ))
///     }
/// }
///
/// let cache = RenderCache::new(Blank);
/// let handle = cache.get_or_create(Signature::new("x^2")).unwrap();
///
/// let dims = cache.dimensions(&handle).unwrap();
/// assert_eq!(dims, Dimensions::new(36, 12, 0));
///
/// let artifact = cache.artifact(&handle).unwrap().expect("own handle");
/// assert_eq!(artifact.raster().width, 36);
/// assert_eq!(cache.stats().renders, 1);
/// ```
pub struct RenderCache<R> {
    id: u64,
    renderer: R,
    entries: DashMap<Arc<SignatureKey>, Slot>,
    max_entries: AtomicUsize,
    reclaim: Arc<ReclaimQueue>,
    retention: Retention,
    in_flight: InFlight,
    single_flight: bool,
    counters: Counters,
}

impl<R: Renderer> RenderCache<R> {
    /// Create an unbounded cache with the default configuration
    pub fn new(renderer: R) -> Self {
        Self::with_config(renderer, CacheConfig::default())
    }

    /// Create a cache holding at most `max_entries` entries (at least 1)
    pub fn with_max_entries(renderer: R, max_entries: usize) -> Self {
        Self::with_config(renderer, CacheConfig::default().with_max_entries(max_entries))
    }

    pub fn with_config(renderer: R, config: CacheConfig) -> Self {
        Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            renderer,
            entries: DashMap::new(),
            max_entries: AtomicUsize::new(config.max_entries.max(1)),
            reclaim: Arc::new(ReclaimQueue::new()),
            retention: Retention::new(config.memory_budget()),
            in_flight: InFlight::new(),
            single_flight: config.single_flight,
            counters: Counters::default(),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Measured dimensions for a formula
    ///
    /// Renders on a miss to obtain them. A handle from another cache yields
    /// [`Dimensions::ZERO`].
    pub fn dimensions<'a>(&self, query: impl Into<Query<'a>>) -> Result<Dimensions, R::Error> {
        Ok(match self.obtain(query.into())? {
            Some((key, artifact)) => key.dimensions().unwrap_or_else(|| artifact.dimensions()),
            None => Dimensions::ZERO,
        })
    }

    /// Handle for a formula, rendering and inserting it on a miss
    pub fn get_or_create(&self, signature: Signature) -> Result<FormulaHandle, R::Error> {
        let key = Arc::new(SignatureKey::new(signature));
        let key = match self.lookup(&key) {
            Some(artifact) => self.hit(key, artifact).0,
            None => self.miss(key)?.0,
        };
        Ok(FormulaHandle {
            cache_id: self.id,
            key,
        })
    }

    /// The rendered artifact for a formula, rendering it on a miss
    ///
    /// `None` only for a handle issued by another cache.
    pub fn artifact<'a>(
        &self,
        query: impl Into<Query<'a>>,
    ) -> Result<Option<Arc<CachedArtifact>>, R::Error> {
        Ok(self.obtain(query.into())?.map(|(_, artifact)| artifact))
    }

    /// Resolve a formula and hand its raster to `sink` with the identity
    /// transform
    ///
    /// Returns `false` (painting nothing) for a handle from another cache.
    pub fn paint<'a, S>(&self, query: impl Into<Query<'a>>, sink: &mut S) -> Result<bool, R::Error>
    where
        S: PaintSink + ?Sized,
    {
        match self.artifact(query)? {
            Some(artifact) => {
                sink.draw_raster(artifact.raster(), Transform::IDENTITY);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove a formula's entry; absent entries and foreign handles are ignored
    pub fn invalidate<'a>(&self, query: impl Into<Query<'a>>) {
        let Some(probe) = self.probe(query.into()) else {
            return;
        };
        if let Some((key, slot)) = self.entries.remove(probe.as_ref()) {
            probe.cross_seed(&key);
            self.retention.release(slot.id);
            debug!(formula = %probe.signature(), "invalidated cache entry");
        }
    }

    /// Drop every entry
    ///
    /// Artifacts still held by callers stay valid.
    pub fn clear(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        let released = self.retention.clear();
        info!(entries = dropped, released, "cleared formula cache");
    }

    /// Set a new capacity (at least 1) and clear the cache
    pub fn reconfigure(&self, max_entries: usize) {
        let max_entries = max_entries.max(1);
        self.max_entries.store(max_entries, Ordering::Relaxed);
        info!(max_entries, "reconfigured formula cache");
        self.clear();
    }

    /// Prune reclaimed entries, then evict live ones until within capacity
    ///
    /// Returns the number of entries removed.
    pub fn compact(&self) -> usize {
        self.compact_to(self.max_entries())
    }

    /// Release every reference the cache pins on its own
    ///
    /// Artifacts not held elsewhere are dropped and pruned at the next
    /// compaction. Returns the number of references released.
    pub fn release_memory(&self) -> usize {
        let released = self.retention.clear();
        debug!(released, "released retained artifacts");
        released
    }

    /// Whether a live artifact is cached for the query (never renders)
    pub fn contains<'a>(&self, query: impl Into<Query<'a>>) -> bool {
        self.probe(query.into())
            .and_then(|key| self.lookup(&key))
            .is_some()
    }

    /// Number of map entries, including dead ones not yet compacted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries.load(Ordering::Relaxed)
    }

    /// Pressure on the retention budget
    pub fn memory_pressure(&self) -> MemoryPressure {
        self.retention.pressure()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            entries: self.entries.len(),
            max_entries: self.max_entries(),
            retained: self.retention.len(),
            retained_bytes: self.retention.bytes(),
            retention_budget: self.retention.budget(),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            renders: c.renders.load(Ordering::Relaxed),
            render_failures: c.render_failures.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            reclaimed: c.reclaimed.load(Ordering::Relaxed),
        }
    }

    /// Key to look up for a query; `None` for a foreign handle
    fn probe(&self, query: Query<'_>) -> Option<Arc<SignatureKey>> {
        match query {
            Query::Params(signature) => Some(Arc::new(SignatureKey::new(signature))),
            Query::Handle(handle) if handle.cache_id == self.id => Some(Arc::clone(&handle.key)),
            Query::Handle(handle) => {
                debug!(
                    formula = %handle.signature(),
                    "ignoring handle issued by another cache"
                );
                None
            }
        }
    }

    fn resolve(&self, query: Query<'_>) -> Lookup {
        let Some(key) = self.probe(query) else {
            return Lookup::Foreign;
        };
        match self.lookup(&key) {
            Some(artifact) => Lookup::Hit { key, artifact },
            None => Lookup::Miss { key },
        }
    }

    /// Live artifact for `probe`, cross-seeding dimensions with the stored key
    fn lookup(&self, probe: &Arc<SignatureKey>) -> Option<Arc<CachedArtifact>> {
        let slot = self.entries.get(probe.as_ref())?;
        probe.cross_seed(slot.key());
        let live = slot.artifact.upgrade();
        drop(slot);
        live
    }

    /// Resolve a query, rendering on a miss; `None` for a foreign handle
    fn obtain(
        &self,
        query: Query<'_>,
    ) -> Result<Option<(Arc<SignatureKey>, Arc<CachedArtifact>)>, R::Error> {
        match self.resolve(query) {
            Lookup::Foreign => Ok(None),
            Lookup::Hit { key, artifact } => Ok(Some(self.hit(key, artifact))),
            Lookup::Miss { key } => self.miss(key).map(Some),
        }
    }

    fn hit(
        &self,
        key: Arc<SignatureKey>,
        artifact: Arc<CachedArtifact>,
    ) -> (Arc<SignatureKey>, Arc<CachedArtifact>) {
        Counters::bump(&self.counters.hits, 1);
        artifact.mark_referenced();
        trace!(formula = %key.signature(), "formula cache hit");
        (key, artifact)
    }

    fn miss(
        &self,
        key: Arc<SignatureKey>,
    ) -> Result<(Arc<SignatureKey>, Arc<CachedArtifact>), R::Error> {
        Counters::bump(&self.counters.misses, 1);
        let artifact = self.fill(&key)?;
        Ok((key, artifact))
    }

    /// Produce an artifact for a key that just missed
    fn fill(&self, key: &Arc<SignatureKey>) -> Result<Arc<CachedArtifact>, R::Error> {
        if !self.single_flight {
            return self.render_and_insert(key);
        }

        loop {
            match self.in_flight.join(key) {
                Role::Leader(guard) => {
                    // Another leader may have finished between our miss and joining
                    if let Some(artifact) = self.lookup(key) {
                        guard.complete(Arc::clone(&artifact));
                        return Ok(artifact);
                    }
                    return match self.render_and_insert(key) {
                        Ok(artifact) => {
                            guard.complete(Arc::clone(&artifact));
                            Ok(artifact)
                        }
                        Err(err) => {
                            guard.fail();
                            Err(err)
                        }
                    };
                }
                Role::Follower(flight) => {
                    if let Some(artifact) = flight.wait() {
                        key.cross_seed(artifact.key());
                        artifact.mark_referenced();
                        return Ok(artifact);
                    }
                    // Leader failed; try again, possibly as the new leader
                }
            }
        }
    }

    fn render_and_insert(&self, key: &Arc<SignatureKey>) -> Result<Arc<CachedArtifact>, R::Error> {
        let signature = key.signature();
        debug!(formula = %signature, "rendering formula");

        let rendered = match self.renderer.render(signature) {
            Ok(rendered) => rendered,
            Err(err) => {
                Counters::bump(&self.counters.render_failures, 1);
                warn!(formula = %signature, error = %err, "formula render failed");
                return Err(err);
            }
        };
        Counters::bump(&self.counters.renders, 1);

        if !key.set_dimensions(rendered.dimensions) {
            trace!(formula = %signature, "dimensions already memoized");
        }

        let artifact = Arc::new(CachedArtifact::new(
            Arc::clone(key),
            rendered.raster,
            rendered.dimensions,
            &self.reclaim,
        ));

        self.make_room();
        self.entries.insert(
            Arc::clone(key),
            Slot {
                id: artifact.id(),
                artifact: Arc::downgrade(&artifact),
            },
        );
        self.retention.retain(Arc::clone(&artifact));

        Ok(artifact)
    }

    /// Prune reclaimed entries, then compact until one more entry fits
    fn make_room(&self) {
        self.drain_reclaimed();
        let max = self.max_entries();
        if self.entries.len() >= max {
            self.compact_to(max - 1);
        }
    }

    fn compact_to(&self, limit: usize) -> usize {
        let mut removed = self.drain_reclaimed();
        while self.entries.len() > limit {
            if !self.evict_one() {
                break;
            }
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, entries = self.entries.len(), limit, "compacted formula cache");
        }
        removed
    }

    /// Remove entries whose artifacts have been dropped
    fn drain_reclaimed(&self) -> usize {
        let removed = self
            .reclaim
            .drain()
            .into_iter()
            .filter(|notice| {
                self.entries
                    .remove_if(notice.key.as_ref(), |_, slot| slot.id == notice.id)
                    .is_some()
            })
            .count();
        Counters::bump(&self.counters.reclaimed, removed as u64);
        removed
    }

    /// Remove one live entry and drop the cache's reference to it
    ///
    /// Prefers the retention ring's clock victim; falls back to an arbitrary
    /// entry when nothing pinned is still mapped.
    fn evict_one(&self) -> bool {
        while let Some(victim) = self.retention.evict_victim() {
            let removed = self
                .entries
                .remove_if(victim.key().as_ref(), |_, slot| slot.id == victim.id())
                .is_some();
            if removed {
                Counters::bump(&self.counters.evictions, 1);
                debug!(formula = %victim.signature(), "evicted formula");
                return true;
            }
        }

        let Some(key) = self.entries.iter().next().map(|entry| Arc::clone(entry.key())) else {
            return false;
        };
        if let Some((_, slot)) = self.entries.remove(key.as_ref()) {
            self.retention.release(slot.id);
            Counters::bump(&self.counters.evictions, 1);
            debug!(formula = %key.signature(), "evicted formula");
        }
        true
    }
}

impl<R> fmt::Debug for RenderCache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCache")
            .field("id", &self.id)
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries.load(Ordering::Relaxed))
            .field("retained", &self.retention.len())
            .field("pending_reclaims", &self.reclaim.len())
            .field("rendering", &self.in_flight.len())
            .finish()
    }
}
