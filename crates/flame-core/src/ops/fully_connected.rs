//! Fully connected layer over a flattened input

use super::{check_bound, check_param_lengths, Operator, OperatorParams};
use crate::arena::{Arena, TensorId};
use crate::engine::EngineHandle;
use crate::error::{FlameError, FlameResult};
use crate::kernels;
use crate::tensor::Shape;
use log::debug;
use std::sync::Arc;

/// `out = act(W · in + b)`, input flattened, output `1x1xN`
pub struct FullyConnected {
    name: String,
    params: Arc<OperatorParams>,
    input: TensorId,
    output: TensorId,
    in_shape: Shape,
    out_shape: Shape,
    engine: EngineHandle,
}

impl FullyConnected {
    pub fn setup(
        name: impl Into<String>,
        arena: &Arena,
        input: TensorId,
        output: TensorId,
        params: Arc<OperatorParams>,
        engine: &EngineHandle,
    ) -> FlameResult<Self> {
        let name = name.into();
        let in_shape = arena.shape(input);
        let out_shape = arena.shape(output);

        if params.input_features == 0 {
            return Err(FlameError::config(&name, format!("input {in_shape} has no features")));
        }
        if in_shape.len() != params.input_features {
            return Err(FlameError::config(
                &name,
                format!("input {in_shape} has {} features, expected {}", in_shape.len(), params.input_features),
            ));
        }
        if out_shape.len() != params.output_features {
            return Err(FlameError::config(
                &name,
                format!("output {out_shape} has {} features, expected {}", out_shape.len(), params.output_features),
            ));
        }
        check_param_lengths(&name, &params, params.output_features * params.input_features)?;

        debug!(
            "{name}: fully connected {} -> {} ({:?})",
            params.input_features, params.output_features, params.activation
        );
        Ok(Self {
            name,
            params,
            input,
            output,
            in_shape,
            out_shape,
            engine: engine.clone(),
        })
    }

    pub fn output(&self) -> TensorId {
        self.output
    }
}

impl Operator for FullyConnected {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, arena: &mut Arena) -> FlameResult<()> {
        check_bound(&self.name, arena, self.input, self.in_shape)?;
        check_bound(&self.name, arena, self.output, self.out_shape)?;
        let backend = self.engine.backend();
        let params = &self.params;
        arena.with_output(self.output, |arena, out| {
            kernels::fully_connected(
                backend,
                &params.weights,
                params.bias.as_deref(),
                params.activation,
                arena.data(self.input),
                out,
            );
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BackendPreference, Engine};
    use crate::kernels::Activation;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_fc_64_to_1_is_dot_plus_bias() {
        let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x00f1_4e00);
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(1, 1, 64));
        let output = arena.alloc(Shape::new(1, 1, 1));

        let x: Vec<f32> = (0..64).map(|_| rng.random_range(-1.0..1.0)).collect();
        arena.data_mut(input).copy_from_slice(&x);
        let mut params = OperatorParams::fully_connected(1, 64, Activation::Identity);
        for w in params.weights.iter_mut() {
            *w = rng.random_range(-1.0..1.0);
        }
        params.bias = Some(vec![0.25]);
        let expected: f32 = 0.25 + params.weights.iter().zip(&x).map(|(w, v)| w * v).sum::<f32>();

        let fc = FullyConnected::setup("fc", &arena, input, output, Arc::new(params), &engine).unwrap();
        fc.forward(&mut arena).unwrap();
        let got = arena.data(fc.output())[0];
        assert!((got - expected).abs() < 1e-3, "{got} vs {expected}");
    }

    #[test]
    fn test_fc_rejects_feature_mismatch() {
        let engine = Engine::acquire_with(BackendPreference::Auto).unwrap();
        let mut arena = Arena::new();
        let input = arena.alloc(Shape::new(1, 1, 32));
        let output = arena.alloc(Shape::new(1, 1, 1));
        let params = Arc::new(OperatorParams::fully_connected(1, 64, Activation::Identity));
        let err = FullyConnected::setup("fc", &arena, input, output, params, &engine)
            .err()
            .unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("fc"));
    }
}
