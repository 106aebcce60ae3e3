//! Formula Cache Library
//!
//! Bounded, concurrent, content-addressed cache of rendered formulas.
//!
//! Entries are keyed by [`SignatureKey`]: two keys are equal when their
//! signatures are, and a key's measured [`Dimensions`](formula_render::Dimensions)
//! are memoized once and shared between equal keys. The map holds only weak
//! references to [`CachedArtifact`]s; a retention ring bounded by a
//! [`MemoryBudget`] keeps recent artifacts alive, and compaction prunes
//! entries whose artifacts have been dropped.

pub mod artifact;
pub mod config;
mod flight;
pub mod key;
pub mod memory_budget;
pub mod render_cache;
mod retention;

pub use artifact::{ArtifactId, CachedArtifact, ReclaimQueue, Reclaimed};
pub use config::{CacheConfig, ConfigError};
pub use key::{merge_dimensions, SignatureKey};
pub use memory_budget::{MemoryBudget, MemoryBudgetConfig, MemoryPressure};
pub use render_cache::{CacheStats, FormulaHandle, Query, RenderCache};
