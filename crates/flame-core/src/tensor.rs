//! Dense single-image tensors in packed NHWC layout
//!
//! Batch is always 1 and there is no row padding, so element `(y, x, c)` lives
//! at `(y * width + x) * channels + c`.

use std::fmt;

/// Tensor shape (height, width, channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Shape {
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Number of spatial positions (height × width)
    #[inline]
    pub const fn positions(&self) -> usize {
        self.height * self.width
    }

    /// Total element count
    #[inline]
    pub const fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same spatial size, different channel count
    pub const fn with_channels(&self, channels: usize) -> Self {
        Self::new(self.height, self.width, channels)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Owned NHWC tensor
///
/// `u8` tensors carry raw camera frames, `f32` tensors everything after
/// preprocessing. The backing storage is never shared with another tensor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tensor<T> {
    shape: Shape,
    data: Vec<T>,
}

impl<T: Copy + Default> Tensor<T> {
    /// Create a zero-filled tensor
    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![T::default(); shape.len()],
        }
    }

    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self::zeros(Shape::new(height, width, channels))
    }

    /// Wrap existing data; `None` if the length does not match the shape
    pub fn from_vec(shape: Shape, data: Vec<T>) -> Option<Self> {
        if data.len() != shape.len() {
            return None;
        }
        Some(Self { shape, data })
    }

    /// Change shape and reallocate; contents are reset to zero
    pub fn resize(&mut self, shape: Shape) {
        self.shape = shape;
        self.data.clear();
        self.data.resize(shape.len(), T::default());
    }
}

impl<T> Tensor<T> {
    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.shape.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.shape.width
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.shape.channels
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Channel vector at spatial position `(y, x)`
    #[inline]
    pub fn pixel(&self, y: usize, x: usize) -> &[T] {
        let c = self.shape.channels;
        let start = (y * self.shape.width + x) * c;
        &self.data[start..start + c]
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}
