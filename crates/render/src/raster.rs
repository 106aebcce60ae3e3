//! Rendered formula output
//!
//! The renderer produces an RGBA raster together with the formula's measured
//! box: width, height above the baseline, and depth below it.

/// Measured size of a typeset formula, in pixels
///
/// `height` is the extent above the baseline and `depth` the extent below
/// it, so the raster is `width x (height + depth)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Dimensions {
    /// All-zero dimensions
    pub const ZERO: Dimensions = Dimensions::new(0, 0, 0);

    /// Create dimensions from width, height and depth
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Total vertical extent (height + depth)
    pub fn total_height(&self) -> u32 {
        self.height.saturating_add(self.depth)
    }
}

/// Raster image data
///
/// Contains the raw RGBA pixel data for a rendered formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Pixel data in RGBA format (4 bytes per pixel, row-major)
    pub pixels: Vec<u8>,
}

impl Raster {
    /// Create a raster from existing pixel data
    ///
    /// Returns `None` when `pixels` does not hold exactly
    /// `width * height * 4` bytes.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        (pixels.len() == expected).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Create a fully transparent raster
    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize * 4],
        }
    }

    /// Get the size of the pixel data in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Check if the raster is fully opaque
    pub fn is_opaque(&self) -> bool {
        self.pixels.chunks_exact(4).all(|rgba| rgba[3] == 255)
    }

    /// RGBA value of the pixel at `(x, y)`, or `None` when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.pixels.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Everything a renderer returns for one signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFormula {
    /// The rasterized formula
    pub raster: Raster,

    /// The measured formula box
    pub dimensions: Dimensions,
}

impl RenderedFormula {
    pub fn new(raster: Raster, dimensions: Dimensions) -> Self {
        Self { raster, dimensions }
    }
}
