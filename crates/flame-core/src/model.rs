//! The assembled fire classifier network
//!
//! `Model::setup` allocates every intermediate tensor and binds every operator
//! once: stem convolution, max pool, the stages, head convolution, global
//! average pool and the single-output classifier. `Model::forward` replays
//! that sequence unconditionally.
//!
//! A model mutates its arena on every forward pass, so it is `Send` but must
//! not be shared between threads without external locking. Several models can
//! share one [`ModelParams`]; the parameter blocks are reference-counted.

use crate::arena::{Arena, TensorId};
use crate::engine::{Engine, EngineHandle};
use crate::error::{FlameError, FlameResult};
use crate::ops::{Convolution, FullyConnected, GlobalAveragePool, MaxPool, Operator, Window};
use crate::params::ModelParams;
use crate::shufflenet::Stage;
use crate::tensor::{Shape, Tensor};
use log::info;

/// Stem max pool window
const STEM_POOL: Window = Window::square(3, 2, 1);

pub struct Model {
    arena: Arena,
    input: TensorId,
    stem: Convolution,
    pool: MaxPool,
    stages: Vec<Stage>,
    head: Convolution,
    gap: GlobalAveragePool,
    classifier: FullyConnected,
    engine: EngineHandle,
}

impl Model {
    /// Bind a model for `input` (H, W, 3) on the process-wide engine
    pub fn setup(params: &ModelParams, input: Shape) -> FlameResult<Self> {
        let engine = Engine::acquire()?;
        Self::setup_with_engine(params, input, &engine)
    }

    pub fn setup_with_engine(params: &ModelParams, input_shape: Shape, engine: &EngineHandle) -> FlameResult<Self> {
        let mut arena = Arena::new();
        let input = arena.alloc(input_shape);

        let (h, w) = crate::ops::window_output("c1", &params.stem.window, input_shape)?;
        let stem_out = arena.alloc(Shape::new(h, w, params.stem.output_features));
        let stem = Convolution::setup("c1", &arena, input, stem_out, params.stem.clone(), engine)?;

        let (h, w) = crate::ops::window_output("pool", &STEM_POOL, arena.shape(stem_out))?;
        let pool_out = arena.alloc(Shape::new(h, w, params.stem.output_features));
        let pool = MaxPool::setup("pool", &arena, stem_out, pool_out, STEM_POOL, engine)?;

        let mut current = pool_out;
        let mut stages = Vec::with_capacity(params.stages.len());
        for (i, stage_params) in params.stages.iter().enumerate() {
            let stage = Stage::setup(i + 2, &mut arena, current, stage_params, engine)?;
            current = stage.output();
            stages.push(stage);
        }

        let last = arena.shape(current);
        let head_out = arena.alloc(last.with_channels(params.head.output_features));
        let head = Convolution::setup("c5", &arena, current, head_out, params.head.clone(), engine)?;

        let gap_out = arena.alloc(Shape::new(1, 1, params.head.output_features));
        let gap = GlobalAveragePool::setup("gap", &arena, head_out, gap_out, engine)?;

        let fc_out = arena.alloc(Shape::new(1, 1, params.classifier.output_features));
        let classifier = FullyConnected::setup("fc", &arena, gap_out, fc_out, params.classifier.clone(), engine)?;

        let blocks: usize = stages.iter().map(|s| s.blocks().len()).sum();
        info!(
            "model ready: input {input_shape}, {} stages / {blocks} blocks, {} tensors ({:.1} MiB), backend={}",
            stages.len(),
            arena.len(),
            arena.footprint_bytes() as f64 / (1024.0 * 1024.0),
            engine.backend()
        );

        Ok(Self {
            arena,
            input,
            stem,
            pool,
            stages,
            head,
            gap,
            classifier,
            engine: engine.clone(),
        })
    }

    pub fn input_shape(&self) -> Shape {
        self.arena.shape(self.input)
    }

    /// Input tensor storage, written by the caller before [`Self::forward`]
    pub fn input_mut(&mut self) -> &mut [f32] {
        self.arena.data_mut(self.input)
    }

    /// Run the network on the current input and return the score
    pub fn forward(&mut self) -> FlameResult<f32> {
        let arena = &mut self.arena;
        run(&self.stem, arena)?;
        run(&self.pool, arena)?;
        for stage in &self.stages {
            run(stage, arena)?;
        }
        run(&self.head, arena)?;
        run(&self.gap, arena)?;
        run(&self.classifier, arena)?;

        arena
            .data(self.classifier.output())
            .first()
            .copied()
            .ok_or_else(|| FlameError::engine("fc", "classifier produced no output"))
    }

    /// Copy `input` in and run [`Self::forward`]
    pub fn forward_with(&mut self, input: &Tensor<f32>) -> FlameResult<f32> {
        if input.shape() != self.input_shape() {
            return Err(FlameError::config(
                "input",
                format!("tensor is {}, model was set up for {}", input.shape(), self.input_shape()),
            ));
        }
        self.input_mut().copy_from_slice(input.as_slice());
        self.forward()
    }

    /// Number of intermediate tensors (input included)
    pub fn tensor_count(&self) -> usize {
        self.arena.len()
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }
}

#[inline]
fn run(op: &dyn Operator, arena: &mut Arena) -> FlameResult<()> {
    #[cfg(feature = "op-timing")]
    let start = std::time::Instant::now();

    op.forward(arena)?;

    #[cfg(feature = "op-timing")]
    log::debug!("{}: {:?}", op.name(), start.elapsed());
    Ok(())
}
