//! Formula Render Library
//!
//! Signature vocabulary, rendered output types and the renderer / paint
//! interfaces shared by the formula cache and its callers.

pub mod paint;
pub mod raster;
pub mod renderer;
pub mod signature;

pub use paint::{PaintSink, Transform};
pub use raster::{Dimensions, Raster, RenderedFormula};
pub use renderer::{RenderError, RenderResult, Renderer};
pub use signature::{FontVariant, FormulaStyle, Rgba, Signature};
