//! Classifier configuration
//!
//! Loaded from TOML; every field has a default so an empty file describes the
//! reference fire classifier:
//!
//! ```toml
//! weights_dir = "model"
//!
//! [architecture]
//! stage_repeats = [4, 8, 4]
//! stage_widths = [24, 48, 96, 192, 64]
//!
//! [input]
//! height = 224
//! width = 224
//!
//! [engine]
//! backend = "auto"   # or "scalar"
//! ```

use crate::engine::BackendPreference;
use crate::error::{FlameError, FlameResult};
use crate::params::{validate_architecture, REFERENCE_STAGE_REPEATS, REFERENCE_STAGE_WIDTHS};
use crate::tensor::Shape;
use std::path::{Path, PathBuf};

/// Environment override for `weights_dir`
pub const MODEL_PATH_ENV: &str = "FLAME_MODEL_PATH";

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Directory of raw parameter blobs
    pub weights_dir: PathBuf,
    pub architecture: ArchitectureConfig,
    pub input: InputConfig,
    pub engine: EngineConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            weights_dir: PathBuf::from("model"),
            architecture: ArchitectureConfig::default(),
            input: InputConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ArchitectureConfig {
    /// Blocks per stage
    pub stage_repeats: Vec<usize>,
    /// Stem width, one width per stage, head width
    pub stage_widths: Vec<usize>,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            stage_repeats: REFERENCE_STAGE_REPEATS.to_vec(),
            stage_widths: REFERENCE_STAGE_WIDTHS.to_vec(),
        }
    }
}

/// Network input resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub height: usize,
    pub width: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            height: 224,
            width: 224,
        }
    }
}

impl InputConfig {
    pub fn shape(&self) -> Shape {
        Shape::new(self.height, self.width, 3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: BackendPreference,
}

impl ClassifierConfig {
    /// Parse and validate
    pub fn from_toml_str(text: &str) -> FlameResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> FlameResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> FlameResult<()> {
        validate_architecture(&self.architecture.stage_repeats, &self.architecture.stage_widths)?;
        if self.input.height == 0 || self.input.width == 0 {
            return Err(FlameError::config(
                "input",
                format!("resolution {}x{} must be non-zero", self.input.height, self.input.width),
            ));
        }
        Ok(())
    }

    /// Apply [`MODEL_PATH_ENV`] if set
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = std::env::var_os(MODEL_PATH_ENV) {
            log::info!("{MODEL_PATH_ENV} overrides weights_dir with {}", Path::new(&path).display());
            self.weights_dir = PathBuf::from(path);
        }
    }
}
