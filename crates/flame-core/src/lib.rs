//! flame-core: fire classifier inference engine
//!
//! A fixed ShuffleNetV2 network assembled from NHWC tensor operators:
//!
//! ```text
//! RGB8 frame -> Preprocess -> stem conv -> max pool -> stages -> head conv
//!            -> global average pool -> fully connected -> score
//! ```
//!
//! Parameters come from named raw `f32` blobs (see [`params`]), all buffers are
//! allocated once at [`Model::setup`], and [`Model::forward`] runs one frame
//! synchronously on the calling thread. A score `> 0` means no fire.

pub mod appliance;
pub mod arena;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod kernels;
pub mod model;
pub mod ops;
pub mod params;
pub mod preprocess;
pub mod shufflenet;
pub mod tensor;

pub use classifier::{ShuffleNetClassifier, Verdict, VisualClassifier};
pub use config::ClassifierConfig;
pub use engine::{Backend, BackendPreference, Engine, EngineHandle};
pub use error::{FlameError, FlameResult};
pub use model::Model;
pub use params::{BlobKey, BlobSource, DirectoryStore, MemoryStore, ModelParams};
pub use preprocess::Preprocess;
pub use tensor::{Shape, Tensor};
