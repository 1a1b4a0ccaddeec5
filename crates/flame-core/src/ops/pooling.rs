//! Max pooling and global average pooling

use super::{check_bound, check_channels, check_extent, window_output, Operator, Window};
use crate::arena::{Arena, TensorId};
use crate::engine::EngineHandle;
use crate::error::{FlameError, FlameResult};
use crate::kernels;
use crate::tensor::Shape;
use log::debug;

/// Max pooling with optional dilation; padding never wins
pub struct MaxPool {
    name: String,
    window: Window,
    input: TensorId,
    output: TensorId,
    in_shape: Shape,
    out_shape: Shape,
    _engine: EngineHandle,
}

impl MaxPool {
    pub fn setup(
        name: impl Into<String>,
        arena: &Arena,
        input: TensorId,
        output: TensorId,
        window: Window,
        engine: &EngineHandle,
    ) -> FlameResult<Self> {
        let name = name.into();
        let in_shape = arena.shape(input);
        let out_shape = arena.shape(output);

        check_channels(&name, "output", out_shape, in_shape.channels)?;
        let computed = window_output(&name, &window, in_shape)?;
        // a window lying entirely in padding would have nothing to select
        let (ekh, ekw) = window.effective_kernel();
        if window.padding_height >= ekh || window.padding_width >= ekw {
            return Err(FlameError::engine(
                &name,
                format!(
                    "padding {}x{} must be smaller than the dilated window {ekh}x{ekw}",
                    window.padding_height, window.padding_width
                ),
            ));
        }
        check_extent(&name, computed, out_shape)?;

        debug!(
            "{name}: maxpool {}x{}/{} {in_shape} -> {out_shape}",
            window.kernel_height, window.kernel_width, window.stride_height
        );
        Ok(Self {
            name,
            window,
            input,
            output,
            in_shape,
            out_shape,
            _engine: engine.clone(),
        })
    }

    pub fn output(&self) -> TensorId {
        self.output
    }
}

impl Operator for MaxPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        check_bound(&self.name, arena, self.input, self.in_shape)?;
        check_bound(&self.name, arena, self.output, self.out_shape)?;
        arena.with_output(self.output, |arena, out| {
            kernels::max_pool2d_nhwc(&self.window, arena.data(self.input), self.in_shape, out, self.out_shape);
        });
        Ok(())
    }
}

/// Spatial mean, output `1x1xC`
pub struct GlobalAveragePool {
    name: String,
    input: TensorId,
    output: TensorId,
    in_shape: Shape,
    out_shape: Shape,
    _engine: EngineHandle,
}

impl GlobalAveragePool {
    pub fn setup(
        name: impl Into<String>,
        arena: &Arena,
        input: TensorId,
        output: TensorId,
        engine: &EngineHandle,
    ) -> FlameResult<Self> {
        let name = name.into();
        let in_shape = arena.shape(input);
        let out_shape = arena.shape(output);

        if in_shape.positions() == 0 {
            return Err(FlameError::engine(&name, format!("empty input {in_shape}")));
        }
        check_channels(&name, "output", out_shape, in_shape.channels)?;
        check_extent(&name, (1, 1), out_shape)?;

        debug!("{name}: global average pool {in_shape} -> {out_shape}");
        Ok(Self {
            name,
            input,
            output,
            in_shape,
            out_shape,
            _engine: engine.clone(),
        })
    }

    pub fn output(&self) -> TensorId {
        self.output
    }
}

impl Operator for GlobalAveragePool {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        check_bound(&self.name, arena, self.input, self.in_shape)?;
        check_bound(&self.name, arena, self.output, self.out_shape)?;
        arena.with_output(self.output, |arena, out| {
            kernels::global_average_pool_nhwc(arena.data(self.input), self.in_shape, out);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BackendPreference, Engine};

    #[test]
    fn test_maxpool_stem_shape() {
        let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(112, 112, 24));
        let output = arena.alloc(Shape::new(56, 56, 24));
        let pool = MaxPool::setup("pool", &arena, input, output, Window::square(3, 2, 1), &engine).unwrap();
        pool.forward(&mut arena).unwrap();
        assert_eq!(arena.shape(pool.output()), Shape::new(56, 56, 24));
    }

    #[test]
    fn test_maxpool_ignores_padding_for_negative_inputs() {
        let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(2, 2, 1));
        let output = arena.alloc(Shape::new(1, 1, 1));
        arena.data_mut(input).copy_from_slice(&[-4.0, -3.0, -2.0, -5.0]);
        let pool = MaxPool::setup("pool", &arena, input, output, Window::square(3, 2, 1), &engine).unwrap();
        pool.forward(&mut arena).unwrap();
        // a zero-padded max would report 0.0
        assert_eq!(arena.data(output), &[-2.0]);
    }

    #[test]
    fn test_maxpool_dilation() {
        let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(1, 5, 1));
        let output = arena.alloc(Shape::new(1, 3, 1));
        arena.data_mut(input).copy_from_slice(&[1.0, 9.0, 2.0, 8.0, 3.0]);
        let mut window = Window::square(1, 1, 0);
        window.kernel_width = 2;
        window.dilation_width = 2;
        let pool = MaxPool::setup("pool", &arena, input, output, window, &engine).unwrap();
        pool.forward(&mut arena).unwrap();
        // taps (0,2) (1,3) (2,4)
        assert_eq!(arena.data(output), &[2.0, 9.0, 3.0]);
    }

    #[test]
    fn test_maxpool_rejects_padding_covering_window() {
        let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(4, 4, 2));
        let output = arena.alloc(Shape::new(4, 4, 2));
        let err = MaxPool::setup("pool", &arena, input, output, Window::square(2, 2, 2), &engine)
            .err()
            .unwrap();
        assert!(err.is_engine());
    }

    #[test]
    fn test_global_average_7x7x64() {
        let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(7, 7, 64));
        let output = arena.alloc(Shape::new(1, 1, 64));
        for (i, v) in arena.data_mut(input).iter_mut().enumerate() {
            // channel c holds c at every position except one bump at position 0
            *v = (i % 64) as f32 + if i < 64 { 49.0 } else { 0.0 };
        }
        let gap = GlobalAveragePool::setup("gap", &arena, input, output, &engine).unwrap();
        gap.forward(&mut arena).unwrap();
        for (c, &v) in arena.data(gap.output()).iter().enumerate() {
            assert!((v - (c as f32 + 1.0)).abs() < 1e-4, "channel {c}: {v}");
        }
    }

    #[test]
    fn test_global_average_requires_1x1_output() {
        let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(7, 7, 8));
        let output = arena.alloc(Shape::new(7, 7, 8));
        let err = GlobalAveragePool::setup("gap", &arena, input, output, &engine).err().unwrap();
        assert!(err.is_config());
    }
}
