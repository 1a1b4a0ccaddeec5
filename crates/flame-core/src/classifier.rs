//! Visual classifier surface used by the appliance

use crate::config::ClassifierConfig;
use crate::engine::{BackendPreference, Engine};
use crate::error::{FlameError, FlameResult};
use crate::model::Model;
use crate::params::ModelParams;
use crate::preprocess::Preprocess;
use crate::tensor::Tensor;
use log::info;
use std::fmt;

/// Frame-to-score classifier
pub trait VisualClassifier: Send {
    /// Build everything the classifier needs; called once
    fn setup(&mut self, config: &ClassifierConfig) -> FlameResult<()>;

    /// Score one RGB8 frame
    fn process(&mut self, frame: &Tensor<u8>) -> FlameResult<f32>;
}

/// Fire / no fire decision derived from a score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Fire,
    NoFire,
}

impl Verdict {
    /// Positive scores mean no fire
    pub fn from_score(score: f32) -> Self {
        if score > 0.0 {
            Verdict::NoFire
        } else {
            Verdict::Fire
        }
    }

    pub fn is_fire(self) -> bool {
        self == Verdict::Fire
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Fire => "FIRE",
            Verdict::NoFire => "NO FIRE",
        })
    }
}

struct Pipeline {
    preprocess: Preprocess,
    model: Model,
}

/// ShuffleNetV2 classifier: preprocess + model
#[derive(Default)]
pub struct ShuffleNetClassifier {
    pipeline: Option<Pipeline>,
}

impl ShuffleNetClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build directly from already loaded parameters
    pub fn with_params(params: &ModelParams, config: &ClassifierConfig) -> FlameResult<Self> {
        let mut classifier = Self::new();
        classifier.build(params, config)?;
        Ok(classifier)
    }

    pub fn is_ready(&self) -> bool {
        self.pipeline.is_some()
    }

    fn build(&mut self, params: &ModelParams, config: &ClassifierConfig) -> FlameResult<()> {
        let preference = BackendPreference::from_env_or(config.engine.backend)?;
        let engine = Engine::acquire_with(preference)?;
        let shape = config.input.shape();
        let preprocess = Preprocess::new(shape.height, shape.width)?;
        let model = Model::setup_with_engine(params, shape, &engine)?;
        self.pipeline = Some(Pipeline { preprocess, model });
        Ok(())
    }
}

impl VisualClassifier for ShuffleNetClassifier {
    fn setup(&mut self, config: &ClassifierConfig) -> FlameResult<()> {
        config.validate()?;
        let arch = &config.architecture;
        let mut params = ModelParams::new(&arch.stage_repeats, &arch.stage_widths)?;
        info!("loading classifier weights from {}", config.weights_dir.display());
        params.load_from_dir(&config.weights_dir)?;
        self.build(&params, config)
    }

    fn process(&mut self, frame: &Tensor<u8>) -> FlameResult<f32> {
        let pipeline = self
            .pipeline
            .as_mut()
            .ok_or_else(|| FlameError::config("classifier", "process called before setup"))?;
        pipeline.preprocess.run(frame, pipeline.model.input_mut())?;
        pipeline.model.forward()
    }
}
