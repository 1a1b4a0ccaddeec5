//! Structured parameter blob addressing
//!
//! Blob names on disk are `c1w`, `c1b` (stem), `c5w`, `c5b` (head), `fcw`,
//! `fcb` (classifier) and `s{stage}r{repeat}x{branch}{w|b}{index}` inside the
//! stages. Inside the crate a blob is always addressed by [`BlobKey`]; the
//! string form is produced only at the storage boundary.

use std::fmt;

/// Weight or bias half of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Weight,
    Bias,
}

impl BlobKind {
    fn tag(self) -> char {
        match self {
            BlobKind::Weight => 'w',
            BlobKind::Bias => 'b',
        }
    }
}

/// Path of an inverted residual block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    /// Stride path, only in downsampling blocks
    One,
    Two,
}

impl Branch {
    fn number(self) -> u8 {
        match self {
            Branch::One => 1,
            Branch::Two => 2,
        }
    }
}

/// A layer owning one weight blob and (usually) one bias blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// 3x3 stem convolution
    Stem,
    /// 1x1 head convolution
    Head,
    /// Final fully connected layer
    Classifier,
    /// Layer `index` of `branch` in block `repeat` of stage `stage` (from 2)
    Block {
        stage: usize,
        repeat: usize,
        branch: Branch,
        index: usize,
    },
}

/// Name of one parameter blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobKey {
    pub layer: Layer,
    pub kind: BlobKind,
}

impl BlobKey {
    pub const fn new(layer: Layer, kind: BlobKind) -> Self {
        Self { layer, kind }
    }

    pub const fn weight(layer: Layer) -> Self {
        Self::new(layer, BlobKind::Weight)
    }

    pub const fn bias(layer: Layer) -> Self {
        Self::new(layer, BlobKind::Bias)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind.tag();
        match self.layer {
            Layer::Stem => write!(f, "c1{kind}"),
            Layer::Head => write!(f, "c5{kind}"),
            Layer::Classifier => write!(f, "fc{kind}"),
            Layer::Block {
                stage,
                repeat,
                branch,
                index,
            } => write!(f, "s{stage}r{repeat}x{}{kind}{index}", branch.number()),
        }
    }
}
