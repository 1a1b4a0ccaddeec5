//! Inverted residual block
//!
//! A block has one of two topologies, chosen once at setup:
//!
//! - downsample (stride > 1): the input feeds both branch1 and branch2
//! - identity (stride 1): the input is split by channel, the first half passes
//!   through untouched and the second half goes through branch2
//!
//! Either way the two half-width results are woven together by a channel
//! interleave.

use super::branch::{Branch1, Branch1Params, Branch2, Branch2Params};
use crate::arena::{Arena, TensorId};
use crate::engine::EngineHandle;
use crate::error::{FlameError, FlameResult};
use crate::ops::{ChannelInterleave, ChannelSplit, Operator};
use log::debug;

/// Parameters of one block, derived from `(output, input, stride)`
#[derive(Debug, Clone, PartialEq)]
pub struct InvertedResidualParams {
    pub output_features: usize,
    pub input_features: usize,
    pub stride: usize,
    /// Present exactly when `stride > 1`
    pub branch1: Option<Branch1Params>,
    pub branch2: Branch2Params,
}

impl InvertedResidualParams {
    pub fn new(output_features: usize, input_features: usize, stride: usize) -> Self {
        let branch1 = (stride > 1).then(|| Branch1Params::new(output_features, input_features, stride));
        Self {
            output_features,
            input_features,
            stride,
            branch1,
            branch2: Branch2Params::new(output_features, input_features, stride),
        }
    }

    pub fn is_downsample(&self) -> bool {
        self.stride > 1
    }
}

enum BlockPath {
    Downsample { branch1: Branch1, branch2: Branch2 },
    Identity { split: ChannelSplit, branch2: Branch2 },
}

/// One stage unit
pub struct InvertedResidual {
    name: String,
    path: BlockPath,
    shuffle: ChannelInterleave,
}

impl InvertedResidual {
    pub fn setup(
        name: impl Into<String>,
        arena: &mut Arena,
        input: TensorId,
        params: &InvertedResidualParams,
        engine: &EngineHandle,
    ) -> FlameResult<Self> {
        let name = name.into();
        let in_shape = arena.shape(input);

        if in_shape.channels != params.input_features {
            return Err(FlameError::config(
                &name,
                format!("input {in_shape} has {} channels, expected {}", in_shape.channels, params.input_features),
            ));
        }
        if params.output_features == 0 || params.output_features % 2 != 0 {
            return Err(FlameError::config(
                &name,
                format!("output width {} cannot be split between two branches", params.output_features),
            ));
        }

        let (path, first, second) = match (params.stride, &params.branch1) {
            (0, _) => return Err(FlameError::engine(&name, "zero stride")),
            (1, None) => {
                if params.input_features != params.output_features {
                    return Err(FlameError::config(
                        &name,
                        format!(
                            "stride-1 block must preserve width, got {} -> {}",
                            params.input_features, params.output_features
                        ),
                    ));
                }
                let half = in_shape.with_channels(in_shape.channels / 2);
                let a = arena.alloc(half);
                let b = arena.alloc(half);
                let split = ChannelSplit::setup(format!("{name}.split"), arena, input, a, b)?;
                let branch2 = Branch2::setup(format!("{name}.branch2"), arena, b, &params.branch2, engine)?;
                let second = branch2.output();
                (BlockPath::Identity { split, branch2 }, a, second)
            }
            (_, Some(branch1_params)) if params.stride > 1 => {
                let branch1 = Branch1::setup(format!("{name}.branch1"), arena, input, branch1_params, engine)?;
                let branch2 = Branch2::setup(format!("{name}.branch2"), arena, input, &params.branch2, engine)?;
                let (first, second) = (branch1.output(), branch2.output());
                (BlockPath::Downsample { branch1, branch2 }, first, second)
            }
            (stride, branch1) => {
                return Err(FlameError::config(
                    &name,
                    format!(
                        "stride {stride} does not match branch1 {}",
                        if branch1.is_some() { "present" } else { "absent" }
                    ),
                ))
            }
        };

        let half_shape = arena.shape(first);
        let output = arena.alloc(half_shape.with_channels(params.output_features));
        let shuffle = ChannelInterleave::setup(format!("{name}.shuffle"), arena, first, second, output)?;

        debug!(
            "{name}: {} block {in_shape} -> {}",
            if params.is_downsample() { "downsample" } else { "identity" },
            arena.shape(output)
        );
        Ok(Self { name, path, shuffle })
    }

    pub fn output(&self) -> TensorId {
        self.shuffle.output()
    }

    pub fn is_downsample(&self) -> bool {
        matches!(self.path, BlockPath::Downsample { .. })
    }
}

impl Operator for InvertedResidual {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        match &self.path {
            BlockPath::Downsample { branch1, branch2 } => {
                branch1.forward(arena)?;
                branch2.forward(arena)?;
            }
            BlockPath::Identity { split, branch2 } => {
                split.forward(arena)?;
                branch2.forward(arena)?;
            }
        }
        self.shuffle.forward(arena)
    }
}
