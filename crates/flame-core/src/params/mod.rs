//! Model parameters and the blob loading protocol
//!
//! [`ModelParams`] is built once from the per-stage repeat counts and channel
//! widths, populated by [`ModelParams::load`], and then shared read-only by
//! every model bound to it.
//!
//! Load order is fixed: stem, head and classifier weight/bias, then for every
//! stage (numbered from 2) and every repeat (from 0) the branch1 pairs (stride
//! path only) followed by the three branch2 pairs.

mod key;
mod store;

pub use key::{BlobKey, BlobKind, Branch, Layer};
pub use store::{BlobSource, DirectoryStore, MemoryStore};

use crate::error::{FlameError, FlameResult};
use crate::ops::{Activation, OperatorParams};
use crate::shufflenet::StageParams;
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::path::Path;
use std::sync::Arc;

/// Stage repeat counts of the reference fire classifier
pub const REFERENCE_STAGE_REPEATS: [usize; 3] = [4, 8, 4];
/// Channel widths of the reference fire classifier (stem, stages..., head)
pub const REFERENCE_STAGE_WIDTHS: [usize; 5] = [24, 48, 96, 192, 64];
/// RGB input
pub const INPUT_CHANNELS: usize = 3;

/// Check that `(repeats, widths)` describe a buildable network
pub fn validate_architecture(stage_repeats: &[usize], stage_widths: &[usize]) -> FlameResult<()> {
    if stage_widths.len() != stage_repeats.len() + 2 {
        return Err(FlameError::config(
            "architecture",
            format!(
                "{} stage widths for {} stages (expected stem + one per stage + head)",
                stage_widths.len(),
                stage_repeats.len()
            ),
        ));
    }
    if let Some(stage) = stage_repeats.iter().position(|&r| r == 0) {
        return Err(FlameError::config("architecture", format!("stage s{} has zero repeats", stage + 2)));
    }
    if stage_widths.contains(&0) {
        return Err(FlameError::config("architecture", "channel widths must be non-zero"));
    }
    let stage_range = 1..stage_widths.len() - 1;
    if let Some(&odd) = stage_widths[stage_range].iter().find(|&&w| w % 2 != 0) {
        return Err(FlameError::config(
            "architecture",
            format!("stage width {odd} cannot be split between two branches"),
        ));
    }
    Ok(())
}

/// Every parameter block of the network
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    stage_repeats: Vec<usize>,
    stage_widths: Vec<usize>,
    pub stem: Arc<OperatorParams>,
    pub head: Arc<OperatorParams>,
    pub classifier: Arc<OperatorParams>,
    pub stages: Vec<StageParams>,
}

impl ModelParams {
    /// Declare (zero-valued) parameters for the given architecture
    pub fn new(stage_repeats: &[usize], stage_widths: &[usize]) -> FlameResult<Self> {
        validate_architecture(stage_repeats, stage_widths)?;

        let stem_width = stage_widths[0];
        let head_width = stage_widths[stage_widths.len() - 1];
        let last_stage_width = stage_widths[stage_widths.len() - 2];

        let stages = stage_repeats
            .iter()
            .enumerate()
            .map(|(i, &repeats)| StageParams::new(repeats, stage_widths[i + 1], stage_widths[i]))
            .collect();

        Ok(Self {
            stage_repeats: stage_repeats.to_vec(),
            stage_widths: stage_widths.to_vec(),
            stem: Arc::new(OperatorParams::convolution(stem_width, INPUT_CHANNELS, 3, 2, 1, Activation::Relu)),
            head: Arc::new(OperatorParams::pointwise(head_width, last_stage_width, Activation::Relu)),
            classifier: Arc::new(OperatorParams::fully_connected(1, head_width, Activation::Identity)),
            stages,
        })
    }

    /// Parameters of the reference fire classifier
    pub fn reference() -> FlameResult<Self> {
        Self::new(&REFERENCE_STAGE_REPEATS, &REFERENCE_STAGE_WIDTHS)
    }

    pub fn stage_repeats(&self) -> &[usize] {
        &self.stage_repeats
    }

    pub fn stage_widths(&self) -> &[usize] {
        &self.stage_widths
    }

    /// Layers in load order
    pub fn layers(&self) -> Vec<(Layer, &Arc<OperatorParams>)> {
        let mut layers = vec![
            (Layer::Stem, &self.stem),
            (Layer::Head, &self.head),
            (Layer::Classifier, &self.classifier),
        ];
        for (s, stage) in self.stages.iter().enumerate() {
            for (repeat, block) in stage.blocks.iter().enumerate() {
                let at = |branch, index| Layer::Block {
                    stage: s + 2,
                    repeat,
                    branch,
                    index,
                };
                if let Some(branch1) = &block.branch1 {
                    for (index, params) in branch1.layers().into_iter().enumerate() {
                        layers.push((at(Branch::One, index), params));
                    }
                }
                for (index, params) in block.branch2.layers().into_iter().enumerate() {
                    layers.push((at(Branch::Two, index), params));
                }
            }
        }
        layers
    }

    fn layers_mut(&mut self) -> Vec<(Layer, &mut Arc<OperatorParams>)> {
        let mut layers = vec![
            (Layer::Stem, &mut self.stem),
            (Layer::Head, &mut self.head),
            (Layer::Classifier, &mut self.classifier),
        ];
        for (s, stage) in self.stages.iter_mut().enumerate() {
            for (repeat, block) in stage.blocks.iter_mut().enumerate() {
                let at = |branch, index| Layer::Block {
                    stage: s + 2,
                    repeat,
                    branch,
                    index,
                };
                if let Some(branch1) = &mut block.branch1 {
                    for (index, params) in branch1.layers_mut().into_iter().enumerate() {
                        layers.push((at(Branch::One, index), params));
                    }
                }
                for (index, params) in block.branch2.layers_mut().into_iter().enumerate() {
                    layers.push((at(Branch::Two, index), params));
                }
            }
        }
        layers
    }

    /// Every blob with its element count, in load order
    pub fn manifest(&self) -> Vec<(BlobKey, usize)> {
        let mut manifest = Vec::new();
        for (layer, params) in self.layers() {
            manifest.push((BlobKey::weight(layer), params.weights.len()));
            if let Some(bias) = &params.bias {
                manifest.push((BlobKey::bias(layer), bias.len()));
            }
        }
        manifest
    }

    /// Total scalar parameter count
    pub fn element_count(&self) -> usize {
        self.layers().iter().map(|(_, p)| p.element_count()).sum()
    }

    /// Fill every blob from `source`
    ///
    /// The values are staged in a private copy and committed only after the
    /// last blob loaded; on error `self` is left exactly as it was.
    pub fn load<S: BlobSource + ?Sized>(&mut self, source: &mut S) -> FlameResult<()> {
        let mut staged = self.clone();
        let mut blobs = 0usize;
        for (layer, params) in staged.layers_mut() {
            let params = Arc::make_mut(params);

            let key = BlobKey::weight(layer).to_string();
            debug!("loading {key} ({} floats)", params.weights.len());
            source.fill(&key, &mut params.weights)?;
            blobs += 1;

            if let Some(bias) = params.bias.as_mut() {
                let key = BlobKey::bias(layer).to_string();
                debug!("loading {key} ({} floats)", bias.len());
                source.fill(&key, bias)?;
                blobs += 1;
            }
        }
        *self = staged;
        info!("loaded {blobs} parameter blobs ({} floats)", self.element_count());
        Ok(())
    }

    /// Load from a flat blob directory
    pub fn load_from_dir(&mut self, dir: impl AsRef<Path>) -> FlameResult<()> {
        self.load(&mut DirectoryStore::new(dir.as_ref()))
    }

    /// Write every blob into `dir` in the format [`DirectoryStore`] reads
    pub fn save_to_dir(&self, dir: impl AsRef<Path>) -> FlameResult<()> {
        let store = DirectoryStore::new(dir.as_ref());
        for (layer, params) in self.layers() {
            store.write(&BlobKey::weight(layer).to_string(), &params.weights)?;
            if let Some(bias) = &params.bias {
                store.write(&BlobKey::bias(layer).to_string(), bias)?;
            }
        }
        info!("saved {} parameter blobs to {}", self.manifest().len(), store.root().display());
        Ok(())
    }

    /// Fill with deterministic pseudo-random values scaled by fan-in
    pub fn randomize(&mut self, seed: u64) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        for (_, params) in self.layers_mut() {
            let params = Arc::make_mut(params);
            let fan_in = (params.weights.len() / params.output_features.max(1)).max(1);
            let scale = (1.0 / fan_in as f32).sqrt();
            for w in params.weights.iter_mut() {
                *w = rng.random_range(-scale..scale);
            }
            if let Some(bias) = params.bias.as_mut() {
                for b in bias.iter_mut() {
                    *b = rng.random_range(-0.05..0.05);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_architecture() {
        assert!(validate_architecture(&REFERENCE_STAGE_REPEATS, &REFERENCE_STAGE_WIDTHS).is_ok());
        assert!(validate_architecture(&[4, 8], &[24, 48, 96, 192, 64]).is_err());
        assert!(validate_architecture(&[4, 0, 4], &[24, 48, 96, 192, 64]).is_err());
        assert!(validate_architecture(&[1], &[24, 47, 64]).is_err());
        // stem and head widths may be odd
        assert!(validate_architecture(&[1], &[3, 8, 5]).is_ok());
    }

    #[test]
    fn test_reference_manifest_order() {
        let params = ModelParams::reference().unwrap();
        let names: Vec<String> = params.manifest().iter().map(|(k, _)| k.to_string()).collect();

        assert_eq!(&names[..8], ["c1w", "c1b", "c5w", "c5b", "fcw", "fcb", "s2r0x1w0", "s2r0x1b0"]);
        assert_eq!(
            &names[8..16],
            ["s2r0x1w1", "s2r0x1b1", "s2r0x2w0", "s2r0x2b0", "s2r0x2w1", "s2r0x2b1", "s2r0x2w2", "s2r0x2b2"]
        );
        // identity blocks carry no branch1
        assert_eq!(names[16], "s2r1x2w0");
        assert_eq!(names.last().map(String::as_str), Some("s4r3x2b2"));

        // 6 + 3 stages * (4 + 6) for the first block + 13 identity blocks * 6
        assert_eq!(names.len(), 6 + 3 * 10 + 13 * 6);
    }

    #[test]
    fn test_manifest_sizes() {
        let params = ModelParams::reference().unwrap();
        let manifest = params.manifest();
        let size = |name: &str| {
            manifest
                .iter()
                .find(|(k, _)| k.to_string() == name)
                .map(|(_, n)| *n)
                .unwrap()
        };
        assert_eq!(size("c1w"), 24 * 3 * 3 * 3);
        assert_eq!(size("c5w"), 64 * 192);
        assert_eq!(size("fcw"), 64);
        assert_eq!(size("fcb"), 1);
        assert_eq!(size("s2r0x1w0"), 24 * 9);
        assert_eq!(size("s2r0x1w1"), 24 * 24);
        assert_eq!(size("s3r1x2w0"), 48 * 48);
        assert_eq!(size("s4r0x2w1"), 96 * 9);
    }

    #[test]
    fn test_randomize_is_deterministic() {
        let mut a = ModelParams::new(&[1], &[4, 8, 4]).unwrap();
        let mut b = a.clone();
        a.randomize(7);
        b.randomize(7);
        assert_eq!(a, b);
        b.randomize(8);
        assert_ne!(a, b);
    }
}
