//! Stage: a downsampling block followed by width-preserving blocks

use super::block::{InvertedResidual, InvertedResidualParams};
use crate::arena::{Arena, TensorId};
use crate::engine::EngineHandle;
use crate::error::{FlameError, FlameResult};
use crate::ops::Operator;

/// Blocks of one stage, in execution order
#[derive(Debug, Clone, PartialEq)]
pub struct StageParams {
    pub blocks: Vec<InvertedResidualParams>,
}

impl StageParams {
    /// `repeats` blocks mapping `input_features` to `output_features`
    pub fn new(repeats: usize, output_features: usize, input_features: usize) -> Self {
        let mut blocks = Vec::with_capacity(repeats);
        if repeats > 0 {
            blocks.push(InvertedResidualParams::new(output_features, input_features, 2));
        }
        for _ in 1..repeats {
            blocks.push(InvertedResidualParams::new(output_features, output_features, 1));
        }
        Self { blocks }
    }

    pub fn output_features(&self) -> Option<usize> {
        self.blocks.last().map(|b| b.output_features)
    }
}

pub struct Stage {
    name: String,
    blocks: Vec<InvertedResidual>,
}

impl Stage {
    /// Bind the blocks of stage `number` (stages are numbered from 2)
    pub fn setup(
        number: usize,
        arena: &mut Arena,
        input: TensorId,
        params: &StageParams,
        engine: &EngineHandle,
    ) -> FlameResult<Self> {
        let name = format!("s{number}");
        match params.blocks.first() {
            None => return Err(FlameError::config(&name, "stage has no blocks")),
            Some(first) if !first.is_downsample() => {
                return Err(FlameError::config(&name, "first block must downsample"))
            }
            Some(_) => {}
        }
        if let Some(repeat) = params.blocks.iter().skip(1).position(|b| b.is_downsample()) {
            return Err(FlameError::config(
                format!("{name}r{}", repeat + 1),
                "only the first block of a stage may downsample",
            ));
        }

        let mut blocks = Vec::with_capacity(params.blocks.len());
        let mut current = input;
        for (repeat, block_params) in params.blocks.iter().enumerate() {
            let block = InvertedResidual::setup(format!("{name}r{repeat}"), arena, current, block_params, engine)?;
            current = block.output();
            blocks.push(block);
        }
        Ok(Self { name, blocks })
    }

    pub fn output(&self) -> TensorId {
        // setup guarantees at least one block
        self.blocks[self.blocks.len() - 1].output()
    }

    pub fn blocks(&self) -> &[InvertedResidual] {
        &self.blocks
    }
}

impl Operator for Stage {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        for block in &self.blocks {
            block.forward(arena)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BackendPreference, Engine};
    use crate::tensor::Shape;

    #[test]
    fn test_stage_params_layout() {
        let stage = StageParams::new(4, 48, 24);
        assert_eq!(stage.blocks.len(), 4);
        assert_eq!(stage.blocks[0].stride, 2);
        assert_eq!(stage.blocks[0].input_features, 24);
        assert!(stage.blocks[1..].iter().all(|b| b.stride == 1 && b.input_features == 48));
        assert_eq!(stage.output_features(), Some(48));
    }

    #[test]
    fn test_stage_halves_once() {
        let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(16, 16, 8));
        let stage = Stage::setup(2, &mut arena, input, &StageParams::new(3, 16, 8), &engine).unwrap();
        assert_eq!(stage.blocks().len(), 3);
        assert_eq!(arena.shape(stage.output()), Shape::new(8, 8, 16));
        stage.forward(&mut arena).unwrap();
    }

    #[test]
    fn test_stage_rejects_late_downsample() {
        let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(16, 16, 8));
        let mut params = StageParams::new(2, 16, 8);
        params.blocks[1] = InvertedResidualParams::new(16, 16, 2);
        let err = Stage::setup(3, &mut arena, input, &params, &engine).err().unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("s3r1"));
    }
}
