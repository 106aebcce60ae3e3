//! Paint sink interface
//!
//! Cached rasters are handed to an external painter together with the
//! transform to draw them with. Nothing in this crate rasterizes or
//! transforms pixels itself.

use crate::raster::Raster;

/// 2D affine transform `[a, b, c, d, e, f]`
///
/// Maps `(x, y)` to `(a*x + c*y + e, b*x + d*y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform(pub [f64; 6]);

impl Transform {
    pub const IDENTITY: Transform = Transform([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    /// Pure translation
    pub const fn translate(dx: f64, dy: f64) -> Self {
        Transform([1.0, 0.0, 0.0, 1.0, dx, dy])
    }

    /// Apply the transform to a point
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Destination for cached rasters
pub trait PaintSink {
    /// Draw `raster` with its top-left corner mapped through `transform`
    fn draw_raster(&mut self, raster: &Raster, transform: Transform);
}

impl<S: PaintSink + ?Sized> PaintSink for &mut S {
    fn draw_raster(&mut self, raster: &Raster, transform: Transform) {
        (**self).draw_raster(raster, transform);
    }
}
