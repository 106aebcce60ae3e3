//! Formula signatures
//!
//! A signature is everything that determines what a rendered formula looks
//! like: the source text plus the style, font variant, size, inset and
//! foreground color it is rendered with.

use std::fmt;

/// Math layout style
///
/// Controls how large operators, fractions and scripts are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormulaStyle {
    /// Display style, used for formulas on their own line
    #[default]
    Display,

    /// Text style, used for formulas inline with running text
    Text,

    /// Script style (first level sub/superscripts)
    Script,

    /// Script-script style (nested sub/superscripts)
    ScriptScript,
}

/// Base font variant used for the formula's letters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontVariant {
    #[default]
    Serif,
    SansSerif,
    Bold,
    Italic,
    Roman,
    Typewriter,
}

/// Straight (non-premultiplied) RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::new(0, 0, 0, 255);

    /// Create a color from its components
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color from a `0xRRGGBB` value
    pub const fn from_rgb_u32(rgb: u32) -> Self {
        Self::new((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8, 255)
    }

    /// Components in `[r, g, b, a]` order
    pub const fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Everything that identifies a renderable formula
///
/// Two signatures are equal when every field matches. The renderer output is
/// expected to be a pure function of the signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Formula source text
    pub source: String,

    /// Layout style
    pub style: FormulaStyle,

    /// Base font variant
    pub variant: FontVariant,

    /// Font size in points (at least 1)
    pub size: u32,

    /// Blank border added around the rendered formula, in pixels
    pub inset: u32,

    /// Foreground color; `None` uses the renderer's default
    pub color: Option<Rgba>,
}

impl Signature {
    /// Create a signature with the given source and default parameters
    /// (display style, serif, 12pt, no inset, default color)
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            style: FormulaStyle::default(),
            variant: FontVariant::default(),
            size: 12,
            inset: 0,
            color: None,
        }
    }

    /// Set the layout style
    pub fn with_style(mut self, style: FormulaStyle) -> Self {
        self.style = style;
        self
    }

    /// Set the font variant
    pub fn with_variant(mut self, variant: FontVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Set the font size; sizes below 1 are clamped to 1
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size.max(1);
        self
    }

    /// Set the inset in pixels
    pub fn with_inset(mut self, inset: u32) -> Self {
        self.inset = inset;
        self
    }

    /// Set the foreground color
    pub fn with_color(mut self, color: Rgba) -> Self {
        self.color = Some(color);
        self
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} [{:?}, {:?}, {}pt, inset {}]",
            self.source, self.style, self.variant, self.size, self.inset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let sig = Signature::new("x^2");
        assert_eq!(sig.source, "x^2");
        assert_eq!(sig.style, FormulaStyle::Display);
        assert_eq!(sig.variant, FontVariant::Serif);
        assert_eq!(sig.size, 12);
        assert_eq!(sig.inset, 0);
        assert!(sig.color.is_none());
    }

    #[test]
    fn test_size_clamped_to_one() {
        let sig = Signature::new("x").with_size(0);
        assert_eq!(sig.size, 1);
    }

    #[test]
    fn test_equality_covers_every_field() {
        let base = Signature::new("a+b").with_size(10).with_inset(2);

        assert_eq!(base, base.clone());
        assert_ne!(base, base.clone().with_style(FormulaStyle::Text));
        assert_ne!(base, base.clone().with_variant(FontVariant::Bold));
        assert_ne!(base, base.clone().with_size(11));
        assert_ne!(base, base.clone().with_inset(3));
        assert_ne!(base, base.clone().with_color(Rgba::BLACK));
    }

    #[test]
    fn test_rgb_conversion() {
        let color = Rgba::from_rgb_u32(0x112233);
        assert_eq!(color.to_array(), [0x11, 0x22, 0x33, 0xff]);
    }
}
