//! Cache keys for formula signatures
//!
//! A [`SignatureKey`] identifies a render request and memoizes the formula's
//! measured dimensions. Dimensions are not part of the key's identity, but
//! whenever two equal keys meet at a lookup, the measured one seeds the
//! unmeasured one (see [`merge_dimensions`]).

use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use formula_render::{Dimensions, FontVariant, FormulaStyle, Rgba, Signature};

/// Combine the memoized dimensions of two equal keys
///
/// When exactly one side is measured, both sides come back measured with
/// that value. Otherwise both are returned unchanged; two keys measured with
/// different values keep their own.
pub fn merge_dimensions(
    a: Option<Dimensions>,
    b: Option<Dimensions>,
) -> (Option<Dimensions>, Option<Dimensions>) {
    match (a, b) {
        (None, Some(d)) | (Some(d), None) => (Some(d), Some(d)),
        unchanged => unchanged,
    }
}

/// Identity of a render request plus its memoized dimensions
///
/// `PartialEq` and `Hash` only look at the signature, and the hash only at
/// the source text, so keys for the same formula at different sizes or
/// styles share a bucket and are told apart by equality.
///
/// Dimensions are write-once: they are set by the render that measured the
/// key, or seeded from an equal key by [`SignatureKey::matches`] /
/// [`SignatureKey::cross_seed`].
#[derive(Debug, Clone)]
pub struct SignatureKey {
    signature: Signature,
    dimensions: OnceLock<Dimensions>,
}

impl SignatureKey {
    /// Create an unmeasured key for a signature
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            dimensions: OnceLock::new(),
        }
    }

    /// Create an unmeasured key from the individual signature fields
    pub fn build(
        source: impl Into<String>,
        style: FormulaStyle,
        variant: FontVariant,
        size: u32,
        inset: u32,
        color: Option<Rgba>,
    ) -> Self {
        let mut signature = Signature::new(source)
            .with_style(style)
            .with_variant(variant)
            .with_size(size)
            .with_inset(inset);
        signature.color = color;
        Self::new(signature)
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Memoized dimensions, `None` while unmeasured
    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions.get().copied()
    }

    pub fn is_measured(&self) -> bool {
        self.dimensions.get().is_some()
    }

    /// Record the dimensions measured by a render
    ///
    /// Returns `false` when the key was already measured (or seeded); the
    /// existing value is kept.
    pub fn set_dimensions(&self, dimensions: Dimensions) -> bool {
        self.dimensions.set(dimensions).is_ok()
    }

    /// Compare identities and cross-seed dimensions on a match
    ///
    /// Symmetric: whichever side is unmeasured picks up the other side's
    /// dimensions. Applied on every call, not just the first.
    pub fn matches(&self, other: &SignatureKey) -> bool {
        if self.signature != other.signature {
            return false;
        }
        self.cross_seed(other);
        true
    }

    /// Exchange dimensions with a key already known to be equal
    pub fn cross_seed(&self, other: &SignatureKey) {
        if std::ptr::eq(self, other) {
            return;
        }
        let (mine, theirs) = merge_dimensions(self.dimensions(), other.dimensions());
        if let Some(d) = mine {
            let _ = self.dimensions.set(d);
        }
        if let Some(d) = theirs {
            let _ = other.dimensions.set(d);
        }
    }
}

impl PartialEq for SignatureKey {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for SignatureKey {}

impl Hash for SignatureKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.source.hash(state);
    }
}

impl From<Signature> for SignatureKey {
    fn from(signature: Signature) -> Self {
        Self::new(signature)
    }
}
