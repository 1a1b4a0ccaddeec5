//! ShuffleNetV2 building blocks

mod block;
mod branch;
mod stage;

pub use block::{InvertedResidual, InvertedResidualParams};
pub use branch::{Branch1, Branch1Params, Branch2, Branch2Params};
pub use stage::{Stage, StageParams};
