//! Frame preprocessing: bilinear resize and per-channel normalisation

use crate::error::{FlameError, FlameResult};
use crate::kernels;
use crate::tensor::{Shape, Tensor};

/// ImageNet channel means (R, G, B)
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (R, G, B)
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Turns an RGB8 frame of any size into the model's `f32` input
///
/// `out = (resized / 255 - mean[c]) / std[c]`
#[derive(Debug, Clone)]
pub struct Preprocess {
    output: Shape,
    resized: Tensor<u8>,
    scale: [f32; 3],
    offset: [f32; 3],
}

impl Preprocess {
    pub fn new(height: usize, width: usize) -> FlameResult<Self> {
        if height == 0 || width == 0 {
            return Err(FlameError::config(
                "preprocess",
                format!("output size {height}x{width} must be non-zero"),
            ));
        }
        let output = Shape::new(height, width, 3);
        // folded into one multiply-add per element
        let scale = [0usize, 1, 2].map(|c| 1.0 / (255.0 * STD[c]));
        let offset = [0usize, 1, 2].map(|c| -MEAN[c] / STD[c]);
        Ok(Self {
            output,
            resized: Tensor::zeros(output),
            scale,
            offset,
        })
    }

    pub fn output_shape(&self) -> Shape {
        self.output
    }

    /// Write the normalised frame into `out` (length of [`Self::output_shape`])
    pub fn run(&mut self, frame: &Tensor<u8>, out: &mut [f32]) -> FlameResult<()> {
        let in_shape = frame.shape();
        if in_shape.channels != 3 {
            return Err(FlameError::config(
                "preprocess",
                format!("frame {in_shape} is not 3-channel RGB"),
            ));
        }
        if in_shape.is_empty() {
            return Err(FlameError::config("preprocess", format!("empty frame {in_shape}")));
        }
        if out.len() != self.output.len() {
            return Err(FlameError::config(
                "preprocess",
                format!("destination holds {} values, expected {}", out.len(), self.output.len()),
            ));
        }

        kernels::resize_bilinear_u8(frame.as_slice(), in_shape, self.resized.as_mut_slice(), self.output);

        for (dst_px, src_px) in out.chunks_exact_mut(3).zip(self.resized.as_slice().chunks_exact(3)) {
            for c in 0..3 {
                dst_px[c] = src_px[c] as f32 * self.scale[c] + self.offset[c];
            }
        }
        Ok(())
    }

    /// Allocating variant of [`Self::run`]
    pub fn process(&mut self, frame: &Tensor<u8>) -> FlameResult<Tensor<f32>> {
        let mut out = Tensor::zeros(self.output);
        self.run(frame, out.as_mut_slice())?;
        Ok(out)
    }
}
