//! The two parallel paths of an inverted residual block

use crate::arena::{Arena, TensorId};
use crate::engine::EngineHandle;
use crate::error::FlameResult;
use crate::ops::{
    window_output, Activation, Convolution, DepthwiseConvolution, Operator, OperatorParams,
};
use crate::tensor::Shape;
use std::sync::Arc;

/// Branch1 parameters: depthwise 3x3 (stride path) then pointwise
#[derive(Debug, Clone, PartialEq)]
pub struct Branch1Params {
    pub depthwise: Arc<OperatorParams>,
    pub pointwise: Arc<OperatorParams>,
}

impl Branch1Params {
    /// Parameters for a block producing `output_features` in total
    pub fn new(output_features: usize, input_features: usize, stride: usize) -> Self {
        let half = output_features / 2;
        Self {
            depthwise: Arc::new(OperatorParams::depthwise(input_features, 3, stride, 1, Activation::Identity)),
            pointwise: Arc::new(OperatorParams::pointwise(half, input_features, Activation::Relu)),
        }
    }

    /// Blocks in load order (`w0/b0`, `w1/b1`)
    pub fn layers(&self) -> [&Arc<OperatorParams>; 2] {
        [&self.depthwise, &self.pointwise]
    }

    pub(crate) fn layers_mut(&mut self) -> [&mut Arc<OperatorParams>; 2] {
        [&mut self.depthwise, &mut self.pointwise]
    }
}

/// Branch2 parameters: pointwise, depthwise 3x3, pointwise
#[derive(Debug, Clone, PartialEq)]
pub struct Branch2Params {
    pub reduce: Arc<OperatorParams>,
    pub depthwise: Arc<OperatorParams>,
    pub expand: Arc<OperatorParams>,
}

impl Branch2Params {
    /// With stride 1 the branch only sees the second half of the input
    pub fn new(output_features: usize, input_features: usize, stride: usize) -> Self {
        let half = output_features / 2;
        let reduce_in = if stride > 1 { input_features } else { half };
        Self {
            reduce: Arc::new(OperatorParams::pointwise(half, reduce_in, Activation::Relu)),
            depthwise: Arc::new(OperatorParams::depthwise(half, 3, stride, 1, Activation::Identity)),
            expand: Arc::new(OperatorParams::pointwise(half, half, Activation::Relu)),
        }
    }

    /// Blocks in load order (`w0/b0`, `w1/b1`, `w2/b2`)
    pub fn layers(&self) -> [&Arc<OperatorParams>; 3] {
        [&self.reduce, &self.depthwise, &self.expand]
    }

    pub(crate) fn layers_mut(&mut self) -> [&mut Arc<OperatorParams>; 3] {
        [&mut self.reduce, &mut self.depthwise, &mut self.expand]
    }
}

/// Allocate the output of a spatial operator over `input`
fn alloc_windowed(
    name: &str,
    arena: &mut Arena,
    input: TensorId,
    params: &OperatorParams,
) -> FlameResult<TensorId> {
    let (h, w) = window_output(name, &params.window, arena.shape(input))?;
    Ok(arena.alloc(Shape::new(h, w, params.output_features)))
}

/// Depthwise (strided) -> pointwise
pub struct Branch1 {
    name: String,
    depthwise: DepthwiseConvolution,
    pointwise: Convolution,
}

impl Branch1 {
    pub fn setup(
        name: impl Into<String>,
        arena: &mut Arena,
        input: TensorId,
        params: &Branch1Params,
        engine: &EngineHandle,
    ) -> FlameResult<Self> {
        let name = name.into();

        let dw_name = format!("{name}.conv0");
        let mid = alloc_windowed(&dw_name, arena, input, &params.depthwise)?;
        let depthwise =
            DepthwiseConvolution::setup(dw_name, arena, input, mid, params.depthwise.clone(), engine)?;

        let pw_name = format!("{name}.conv1");
        let out = alloc_windowed(&pw_name, arena, mid, &params.pointwise)?;
        let pointwise = Convolution::setup(pw_name, arena, mid, out, params.pointwise.clone(), engine)?;

        Ok(Self {
            name,
            depthwise,
            pointwise,
        })
    }

    pub fn output(&self) -> TensorId {
        self.pointwise.output()
    }
}

impl Operator for Branch1 {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        self.depthwise.forward(arena)?;
        self.pointwise.forward(arena)
    }
}

/// Pointwise -> depthwise (strided) -> pointwise
pub struct Branch2 {
    name: String,
    reduce: Convolution,
    depthwise: DepthwiseConvolution,
    expand: Convolution,
}

impl Branch2 {
    pub fn setup(
        name: impl Into<String>,
        arena: &mut Arena,
        input: TensorId,
        params: &Branch2Params,
        engine: &EngineHandle,
    ) -> FlameResult<Self> {
        let name = name.into();

        let reduce_name = format!("{name}.conv0");
        let t0 = alloc_windowed(&reduce_name, arena, input, &params.reduce)?;
        let reduce = Convolution::setup(reduce_name, arena, input, t0, params.reduce.clone(), engine)?;

        let dw_name = format!("{name}.conv1");
        let t1 = alloc_windowed(&dw_name, arena, t0, &params.depthwise)?;
        let depthwise = DepthwiseConvolution::setup(dw_name, arena, t0, t1, params.depthwise.clone(), engine)?;

        let expand_name = format!("{name}.conv2");
        let t2 = alloc_windowed(&expand_name, arena, t1, &params.expand)?;
        let expand = Convolution::setup(expand_name, arena, t1, t2, params.expand.clone(), engine)?;

        Ok(Self {
            name,
            reduce,
            depthwise,
            expand,
        })
    }

    pub fn output(&self) -> TensorId {
        self.expand.output()
    }
}

impl Operator for Branch2 {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        self.reduce.forward(arena)?;
        self.depthwise.forward(arena)?;
        self.expand.forward(arena)
    }
}
