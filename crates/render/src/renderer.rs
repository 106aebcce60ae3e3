//! Renderer collaborator
//!
//! Parsing, box layout and rasterization live behind the [`Renderer`] trait.
//! The cache only ever sees a signature going in and a
//! [`RenderedFormula`] coming out.

use crate::raster::RenderedFormula;
use crate::signature::Signature;

/// Turns a formula signature into a raster and its measured box
///
/// Implementations must be callable from several threads at once for
/// distinct signatures. Rendering may be slow; that is what the cache
/// amortizes.
pub trait Renderer: Send + Sync {
    /// Error reported when a formula cannot be rendered
    type Error: std::error::Error + Send + Sync + 'static;

    /// Render a formula
    fn render(&self, signature: &Signature) -> Result<RenderedFormula, Self::Error>;
}

impl<R: Renderer + ?Sized> Renderer for &R {
    type Error = R::Error;

    fn render(&self, signature: &Signature) -> Result<RenderedFormula, Self::Error> {
        (**self).render(signature)
    }
}

impl<R: Renderer + ?Sized> Renderer for std::sync::Arc<R> {
    type Error = R::Error;

    fn render(&self, signature: &Signature) -> Result<RenderedFormula, Self::Error> {
        (**self).render(signature)
    }
}

/// General-purpose error type for renderer implementations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The formula source could not be parsed
    #[error("parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    /// Layout failed (unknown symbol, missing font, ...)
    #[error("layout error: {0}")]
    Layout(String),

    /// Rasterization failed
    #[error("raster error: {0}")]
    Raster(String),

    /// The converter that supplies formula source reported a failure
    #[error("converter error: {0}")]
    Converter(String),
}

/// Result alias for renderer implementations
pub type RenderResult<T> = Result<T, RenderError>;
