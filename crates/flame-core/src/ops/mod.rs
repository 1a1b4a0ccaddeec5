//! Tensor operators bound to arena tensors
//!
//! An operator is constructed by its `setup` function, which validates the
//! bound tensors against the parameter block and the kernel engine, and then
//! only ever replays the same computation in [`Operator::forward`]. Dropping
//! an operator releases its engine handle.

mod channel;
mod convolution;
mod fully_connected;
mod pooling;

pub use channel::{ChannelInterleave, ChannelSplit};
pub use convolution::{Convolution, DepthwiseConvolution};
pub use fully_connected::FullyConnected;
pub use pooling::{GlobalAveragePool, MaxPool};

pub use crate::kernels::{Activation, Window};

use crate::arena::{Arena, TensorId};
use crate::error::{FlameError, FlameResult};
use crate::tensor::Shape;

/// A bound computation over arena tensors
pub trait Operator: Send {
    /// Operator path used in logs and errors (e.g. `s3r0.branch2.conv0`)
    fn name(&self) -> &str;

    /// Execute into the bound output tensor(s)
    fn forward(&self, arena: &mut Arena) -> FlameResult<()>;
}

/// Parameter block of one primitive
///
/// Weights are allocated at their final length when the block is declared;
/// loading only overwrites values.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorParams {
    pub input_features: usize,
    pub output_features: usize,
    pub window: Window,
    pub activation: Activation,
    pub weights: Vec<f32>,
    pub bias: Option<Vec<f32>>,
}

impl OperatorParams {
    /// Dense convolution, weights `(output, kernel, kernel, input)`
    pub fn convolution(
        output_features: usize,
        input_features: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        activation: Activation,
    ) -> Self {
        Self {
            input_features,
            output_features,
            window: Window::square(kernel, stride, padding),
            activation,
            weights: vec![0.0; output_features * kernel * kernel * input_features],
            bias: Some(vec![0.0; output_features]),
        }
    }

    /// 1x1 stride-1 convolution
    pub fn pointwise(output_features: usize, input_features: usize, activation: Activation) -> Self {
        Self::convolution(output_features, input_features, 1, 1, 0, activation)
    }

    /// Depthwise convolution, weights `(channels, kernel, kernel)`
    pub fn depthwise(channels: usize, kernel: usize, stride: usize, padding: usize, activation: Activation) -> Self {
        Self {
            input_features: channels,
            output_features: channels,
            window: Window::square(kernel, stride, padding),
            activation,
            weights: vec![0.0; channels * kernel * kernel],
            bias: Some(vec![0.0; channels]),
        }
    }

    /// Fully connected, weights `(output, input)`
    pub fn fully_connected(output_features: usize, input_features: usize, activation: Activation) -> Self {
        Self {
            input_features,
            output_features,
            window: Window::square(1, 1, 0),
            activation,
            weights: vec![0.0; output_features * input_features],
            bias: Some(vec![0.0; output_features]),
        }
    }

    /// Drop the bias blob
    pub fn without_bias(mut self) -> Self {
        self.bias = None;
        self
    }

    /// Scalar parameter count (weights + bias)
    pub fn element_count(&self) -> usize {
        self.weights.len() + self.bias.as_ref().map_or(0, Vec::len)
    }
}

// =============================================================================
// Setup checks shared by the primitives
// =============================================================================

/// `shape` must carry exactly `expected` channels, and at least one
pub(crate) fn check_channels(op: &str, tensor: &str, shape: Shape, expected: usize) -> FlameResult<()> {
    if expected == 0 || shape.channels == 0 {
        return Err(FlameError::config(op, format!("{tensor} {shape} has no channels")));
    }
    if shape.channels != expected {
        return Err(FlameError::config(
            op,
            format!("{tensor} has {} channels ({shape}), expected {expected}", shape.channels),
        ));
    }
    Ok(())
}

/// Ask the engine for the output extent of `window` over `input`
pub(crate) fn window_output(op: &str, window: &Window, input: Shape) -> FlameResult<(usize, usize)> {
    window.output_size(input.height, input.width).ok_or_else(|| {
        FlameError::engine(
            op,
            format!(
                "unsupported window {}x{} stride {}x{} padding {}x{} dilation {}x{} over input {input}",
                window.kernel_height,
                window.kernel_width,
                window.stride_height,
                window.stride_width,
                window.padding_height,
                window.padding_width,
                window.dilation_height,
                window.dilation_width,
            ),
        )
    })
}

pub(crate) fn check_extent(op: &str, computed: (usize, usize), output: Shape) -> FlameResult<()> {
    if computed != (output.height, output.width) {
        return Err(FlameError::config(
            op,
            format!(
                "output tensor is {output}, computed spatial size is {}x{}",
                computed.0, computed.1
            ),
        ));
    }
    Ok(())
}

pub(crate) fn check_param_lengths(op: &str, params: &OperatorParams, weights: usize) -> FlameResult<()> {
    if params.weights.len() != weights {
        return Err(FlameError::config(
            op,
            format!("weight blob has {} elements, expected {weights}", params.weights.len()),
        ));
    }
    if let Some(bias) = &params.bias {
        if bias.len() != params.output_features {
            return Err(FlameError::config(
                op,
                format!("bias blob has {} elements, expected {}", bias.len(), params.output_features),
            ));
        }
    }
    Ok(())
}

/// Execution-time guard: bound tensors must still have their setup length
pub(crate) fn check_bound(op: &str, arena: &Arena, id: TensorId, shape: Shape) -> FlameResult<()> {
    let len = arena.data(id).len();
    if len != shape.len() {
        return Err(FlameError::engine(
            op,
            format!("bound tensor {id} holds {len} elements, bound as {shape}"),
        ));
    }
    Ok(())
}
