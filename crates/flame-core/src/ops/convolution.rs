//! Convolution and depthwise convolution

use super::{check_bound, check_channels, check_extent, check_param_lengths, window_output, Operator, OperatorParams};
use crate::arena::{Arena, TensorId};
use crate::engine::EngineHandle;
use crate::error::{FlameError, FlameResult};
use crate::kernels::{self, ConvKernel};
use crate::tensor::Shape;
use log::debug;
use std::sync::Arc;

fn reject_dilation(op: &str, params: &OperatorParams) -> FlameResult<()> {
    if params.window.dilation_height != 1 || params.window.dilation_width != 1 {
        return Err(FlameError::engine(op, "convolutions do not support dilation"));
    }
    Ok(())
}

fn kernel_of(params: &OperatorParams) -> ConvKernel<'_> {
    ConvKernel {
        weights: &params.weights,
        bias: params.bias.as_deref(),
        window: params.window,
        activation: params.activation,
    }
}

/// Dense 2D convolution with zero padding
pub struct Convolution {
    name: String,
    params: Arc<OperatorParams>,
    input: TensorId,
    output: TensorId,
    in_shape: Shape,
    out_shape: Shape,
    engine: EngineHandle,
}

impl Convolution {
    pub fn setup(
        name: impl Into<String>,
        arena: &Arena,
        input: TensorId,
        output: TensorId,
        params: Arc<OperatorParams>,
        engine: &EngineHandle,
    ) -> FlameResult<Self> {
        let name = name.into();
        let in_shape = arena.shape(input);
        let out_shape = arena.shape(output);
        let w = params.window;

        check_channels(&name, "input", in_shape, params.input_features)?;
        check_channels(&name, "output", out_shape, params.output_features)?;
        reject_dilation(&name, &params)?;
        let computed = window_output(&name, &w, in_shape)?;
        check_extent(&name, computed, out_shape)?;
        check_param_lengths(
            &name,
            &params,
            params.output_features * w.kernel_height * w.kernel_width * params.input_features,
        )?;

        debug!(
            "{name}: conv {}x{}/{} {in_shape} -> {out_shape} ({:?})",
            w.kernel_height, w.kernel_width, w.stride_height, params.activation
        );
        Ok(Self {
            name,
            params,
            input,
            output,
            in_shape,
            out_shape,
            engine: engine.clone(),
        })
    }

    pub fn output(&self) -> TensorId {
        self.output
    }
}

impl Operator for Convolution {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        check_bound(&self.name, arena, self.input, self.in_shape)?;
        check_bound(&self.name, arena, self.output, self.out_shape)?;
        let backend = self.engine.backend();
        let kernel = kernel_of(&self.params);
        arena.with_output(self.output, |arena, out| {
            kernels::conv2d_nhwc(backend, &kernel, arena.data(self.input), self.in_shape, out, self.out_shape);
        });
        Ok(())
    }
}

/// Per-channel 2D convolution with zero padding
pub struct DepthwiseConvolution {
    name: String,
    params: Arc<OperatorParams>,
    input: TensorId,
    output: TensorId,
    in_shape: Shape,
    out_shape: Shape,
    _engine: EngineHandle,
}

impl DepthwiseConvolution {
    pub fn setup(
        name: impl Into<String>,
        arena: &Arena,
        input: TensorId,
        output: TensorId,
        params: Arc<OperatorParams>,
        engine: &EngineHandle,
    ) -> FlameResult<Self> {
        let name = name.into();
        let in_shape = arena.shape(input);
        let out_shape = arena.shape(output);
        let w = params.window;

        if params.input_features != params.output_features {
            return Err(FlameError::config(
                &name,
                format!(
                    "depthwise parameters map {} channels to {}",
                    params.input_features, params.output_features
                ),
            ));
        }
        check_channels(&name, "input", in_shape, params.input_features)?;
        check_channels(&name, "output", out_shape, params.output_features)?;
        reject_dilation(&name, &params)?;
        let computed = window_output(&name, &w, in_shape)?;
        check_extent(&name, computed, out_shape)?;
        check_param_lengths(&name, &params, params.output_features * w.kernel_height * w.kernel_width)?;

        debug!(
            "{name}: dwconv {}x{}/{} {in_shape} -> {out_shape}",
            w.kernel_height, w.kernel_width, w.stride_height
        );
        Ok(Self {
            name,
            params,
            input,
            output,
            in_shape,
            out_shape,
            _engine: engine.clone(),
        })
    }

    pub fn output(&self) -> TensorId {
        self.output
    }
}

impl Operator for DepthwiseConvolution {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        check_bound(&self.name, arena, self.input, self.in_shape)?;
        check_bound(&self.name, arena, self.output, self.out_shape)?;
        let kernel = kernel_of(&self.params);
        arena.with_output(self.output, |arena, out| {
            kernels::depthwise_conv2d_nhwc(&kernel, arena.data(self.input), self.in_shape, out, self.out_shape);
        });
        Ok(())
    }
}
