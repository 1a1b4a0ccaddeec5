//! Intermediate buffer arena
//!
//! Every `f32` tensor of a model is owned here by value and addressed by
//! [`TensorId`]. Tensors are allocated during setup and never reshaped or
//! released afterwards, so ids handed to operators stay valid for the
//! lifetime of the arena.

use crate::tensor::{Shape, Tensor};
use std::fmt;

/// Index of a tensor inside an [`Arena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(usize);

impl TensorId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Owner of all intermediate tensors of one model
#[derive(Debug, Default)]
pub struct Arena {
    tensors: Vec<Tensor<f32>>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed tensor
    pub fn alloc(&mut self, shape: Shape) -> TensorId {
        let id = TensorId(self.tensors.len());
        self.tensors.push(Tensor::zeros(shape));
        id
    }

    #[inline]
    pub fn shape(&self, id: TensorId) -> Shape {
        self.tensors[id.0].shape()
    }

    #[inline]
    pub fn data(&self, id: TensorId) -> &[f32] {
        self.tensors[id.0].as_slice()
    }

    #[inline]
    pub fn data_mut(&mut self, id: TensorId) -> &mut [f32] {
        self.tensors[id.0].as_mut_slice()
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor<f32> {
        &self.tensors[id.0]
    }

    /// Run `f` with `output` detached from the arena
    ///
    /// The output tensor is moved out for the duration of the call and put
    /// back afterwards (also when `f` fails), so `f` can read any other
    /// tensor through the arena while writing the output.
    pub fn with_output<R>(&mut self, output: TensorId, f: impl FnOnce(&Arena, &mut [f32]) -> R) -> R {
        let mut taken = std::mem::take(&mut self.tensors[output.0]);
        let result = f(self, taken.as_mut_slice());
        self.tensors[output.0] = taken;
        result
    }

    /// Same as [`Arena::with_output`] for operators with two outputs
    pub fn with_outputs<R>(
        &mut self,
        first: TensorId,
        second: TensorId,
        f: impl FnOnce(&Arena, &mut [f32], &mut [f32]) -> R,
    ) -> R {
        debug_assert_ne!(first, second);
        let mut a = std::mem::take(&mut self.tensors[first.0]);
        let mut b = std::mem::take(&mut self.tensors[second.0]);
        let result = f(self, a.as_mut_slice(), b.as_mut_slice());
        self.tensors[first.0] = a;
        self.tensors[second.0] = b;
        result
    }

    /// Number of tensors
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total storage of all tensors in bytes
    pub fn footprint_bytes(&self) -> usize {
        self.tensors
            .iter()
            .map(|t| t.len() * std::mem::size_of::<f32>())
            .sum()
    }
}
