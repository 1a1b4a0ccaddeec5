//! Channel split and channel interleave (shuffle)
//!
//! Together these are the data movement that makes the two branches of a
//! block exchange information: the split hands each half of every pixel's
//! channels to a different path, the interleave weaves the two results back
//! together element by element.

use super::{check_bound, Operator};
use crate::arena::{Arena, TensorId};
use crate::error::{FlameError, FlameResult};
use crate::tensor::Shape;
use log::debug;

/// Split `(H, W, C)` into two `(H, W, C/2)` tensors
///
/// For every position the first `C/2` channels go to `first`, the rest to
/// `second`.
pub struct ChannelSplit {
    name: String,
    input: TensorId,
    first: TensorId,
    second: TensorId,
    in_shape: Shape,
    half_shape: Shape,
}

impl ChannelSplit {
    pub fn setup(
        name: impl Into<String>,
        arena: &Arena,
        input: TensorId,
        first: TensorId,
        second: TensorId,
    ) -> FlameResult<Self> {
        let name = name.into();
        let in_shape = arena.shape(input);
        let a = arena.shape(first);
        let b = arena.shape(second);

        if in_shape.channels == 0 || in_shape.channels % 2 != 0 {
            return Err(FlameError::config(
                &name,
                format!("cannot split {in_shape} into two non-empty halves"),
            ));
        }
        if a != b || a.channels + b.channels != in_shape.channels {
            return Err(FlameError::config(
                &name,
                format!("outputs {a} and {b} do not partition {in_shape}"),
            ));
        }
        if (a.height, a.width) != (in_shape.height, in_shape.width) {
            return Err(FlameError::config(
                &name,
                format!("outputs {a} differ spatially from input {in_shape}"),
            ));
        }
        if first == second {
            return Err(FlameError::config(&name, "both outputs bound to the same tensor"));
        }

        debug!("{name}: channel split {in_shape} -> 2 x {a}");
        Ok(Self {
            name,
            input,
            first,
            second,
            in_shape,
            half_shape: a,
        })
    }

    pub fn outputs(&self) -> (TensorId, TensorId) {
        (self.first, self.second)
    }
}

impl Operator for ChannelSplit {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        check_bound(&self.name, arena, self.input, self.in_shape)?;
        check_bound(&self.name, arena, self.first, self.half_shape)?;
        check_bound(&self.name, arena, self.second, self.half_shape)?;
        let half = self.half_shape.channels;
        arena.with_outputs(self.first, self.second, |arena, a, b| {
            let pixels = arena.data(self.input).chunks_exact(2 * half);
            for ((px, a_px), b_px) in pixels.zip(a.chunks_exact_mut(half)).zip(b.chunks_exact_mut(half)) {
                let (lo, hi) = px.split_at(half);
                a_px.copy_from_slice(lo);
                b_px.copy_from_slice(hi);
            }
        });
        Ok(())
    }
}

/// Weave two equal-shape tensors: `out[2i] = a[i]`, `out[2i + 1] = b[i]`
pub struct ChannelInterleave {
    name: String,
    first: TensorId,
    second: TensorId,
    output: TensorId,
    half_shape: Shape,
    out_shape: Shape,
}

impl ChannelInterleave {
    pub fn setup(
        name: impl Into<String>,
        arena: &Arena,
        first: TensorId,
        second: TensorId,
        output: TensorId,
    ) -> FlameResult<Self> {
        let name = name.into();
        let a = arena.shape(first);
        let b = arena.shape(second);
        let out_shape = arena.shape(output);

        if a != b {
            return Err(FlameError::config(
                &name,
                format!("inputs {a} and {b} differ in shape"),
            ));
        }
        if a.channels == 0 {
            return Err(FlameError::config(&name, format!("inputs {a} have no channels")));
        }
        if out_shape != a.with_channels(a.channels + b.channels) {
            return Err(FlameError::config(
                &name,
                format!("output is {out_shape}, expected {}", a.with_channels(a.channels + b.channels)),
            ));
        }
        if output == first || output == second {
            return Err(FlameError::config(&name, "output aliases an input"));
        }

        debug!("{name}: channel interleave 2 x {a} -> {out_shape}");
        Ok(Self {
            name,
            first,
            second,
            output,
            half_shape: a,
            out_shape,
        })
    }

    pub fn output(&self) -> TensorId {
        self.output
    }
}

impl Operator for ChannelInterleave {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        check_bound(&self.name, arena, self.first, self.half_shape)?;
        check_bound(&self.name, arena, self.second, self.half_shape)?;
        check_bound(&self.name, arena, self.output, self.out_shape)?;
        arena.with_output(self.output, |arena, out| {
            let a = arena.data(self.first);
            let b = arena.data(self.second);
            for ((pair, &x), &y) in out.chunks_exact_mut(2).zip(a).zip(b) {
                pair[0] = x;
                pair[1] = y;
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_takes_halves_per_position() {
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(1, 2, 4));
        let a = arena.alloc(Shape::new(1, 2, 2));
        let b = arena.alloc(Shape::new(1, 2, 2));
        arena
            .data_mut(input)
            .copy_from_slice(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

        let split = ChannelSplit::setup("split", &arena, input, a, b).unwrap();
        split.forward(&mut arena).unwrap();
        assert_eq!(arena.data(a), &[0.0, 1.0, 4.0, 5.0]);
        assert_eq!(arena.data(b), &[2.0, 3.0, 6.0, 7.0]);
    }

    #[test]
    fn test_interleave_alternates_elements() {
        let mut arena = Arena::new();
        let a = arena.alloc(Shape::new(1, 2, 2));
        let b = arena.alloc(Shape::new(1, 2, 2));
        let out = arena.alloc(Shape::new(1, 2, 4));
        arena.data_mut(a).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        arena.data_mut(b).copy_from_slice(&[-1.0, -2.0, -3.0, -4.0]);

        let shuffle = ChannelInterleave::setup("shuffle", &arena, a, b, out).unwrap();
        shuffle.forward(&mut arena).unwrap();
        assert_eq!(arena.data(out), &[1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 4.0, -4.0]);
    }

    #[test]
    fn test_split_rejects_odd_channels() {
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(2, 2, 5));
        let a = arena.alloc(Shape::new(2, 2, 2));
        let b = arena.alloc(Shape::new(2, 2, 3));
        let err = ChannelSplit::setup("split", &arena, input, a, b).err().unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_interleave_rejects_wrong_output() {
        let mut arena = Arena::new();
        let a = arena.alloc(Shape::new(2, 2, 3));
        let b = arena.alloc(Shape::new(2, 2, 3));
        let out = arena.alloc(Shape::new(2, 2, 5));
        let err = ChannelInterleave::setup("shuffle", &arena, a, b, out).err().unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("2x2x6"));
    }
}
