//! Error types for the inference engine
//!
//! Every failure is fatal to the current setup/load/forward call. The variants
//! follow the three failure classes of the engine (configuration, load, kernel
//! engine) plus the I/O and config-file errors that surface around them.

/// Engine errors
#[derive(thiserror::Error, Debug)]
pub enum FlameError {
    /// Shape/channel mismatch or invalid hyperparameter, detected at setup
    #[error("configuration error in {op}: {detail}")]
    Config { op: String, detail: String },

    /// Parameter blob could not be read
    #[error("failed to load parameter blob {blob}: {detail}")]
    Load { blob: String, detail: String },

    /// Parameter blob has the wrong byte length
    #[error("parameter blob {blob} size mismatch: expected {expected} bytes, got {actual} bytes")]
    BlobSize {
        blob: String,
        expected: u64,
        actual: u64,
    },

    /// The kernel engine rejected a construction or execution request
    #[error("kernel engine rejected {op}: {detail}")]
    Engine { op: String, detail: String },

    /// File I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl FlameError {
    pub(crate) fn config(op: impl Into<String>, detail: impl Into<String>) -> Self {
        FlameError::Config {
            op: op.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn engine(op: impl Into<String>, detail: impl Into<String>) -> Self {
        FlameError::Engine {
            op: op.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn load(blob: impl Into<String>, detail: impl Into<String>) -> Self {
        FlameError::Load {
            blob: blob.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error came from a configuration (shape) check
    pub fn is_config(&self) -> bool {
        matches!(self, FlameError::Config { .. })
    }

    /// Whether this error came from parameter loading
    pub fn is_load(&self) -> bool {
        matches!(self, FlameError::Load { .. } | FlameError::BlobSize { .. })
    }

    /// Whether the kernel engine raised this error
    pub fn is_engine(&self) -> bool {
        matches!(self, FlameError::Engine { .. })
    }
}

/// Result type for engine operations
pub type FlameResult<T> = Result<T, FlameError>;
