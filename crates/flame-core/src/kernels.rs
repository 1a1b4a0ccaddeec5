//! Numeric kernels over packed NHWC buffers
//!
//! These are the tensor operators the network is assembled from. They take
//! plain slices plus geometry, never allocate on the hot path (the resize
//! kernel builds two small coordinate tables per call), and dispatch their
//! inner products on the engine [`Backend`].
//!
//! Callers validate shapes once at setup; the kernels only `debug_assert!` them.

use crate::engine::Backend;
use crate::tensor::Shape;

/// Fused activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// Output is left unclamped
    #[default]
    Identity,
    /// Output clamped to `[0, +inf)`
    Relu,
}

impl Activation {
    #[inline]
    fn apply(self, values: &mut [f32]) {
        if self == Activation::Relu {
            for v in values.iter_mut() {
                *v = v.max(0.0);
            }
        }
    }
}

/// Spatial window geometry shared by convolutions and pooling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub stride_height: usize,
    pub stride_width: usize,
    pub padding_height: usize,
    pub padding_width: usize,
    pub dilation_height: usize,
    pub dilation_width: usize,
}

impl Window {
    /// Square kernel with equal stride/padding on both axes and no dilation
    pub const fn square(kernel: usize, stride: usize, padding: usize) -> Self {
        Self {
            kernel_height: kernel,
            kernel_width: kernel,
            stride_height: stride,
            stride_width: stride,
            padding_height: padding,
            padding_width: padding,
            dilation_height: 1,
            dilation_width: 1,
        }
    }

    /// Dilated kernel extent along each axis
    pub fn effective_kernel(&self) -> (usize, usize) {
        (
            (self.kernel_height.saturating_sub(1)) * self.dilation_height + 1,
            (self.kernel_width.saturating_sub(1)) * self.dilation_width + 1,
        )
    }

    /// Output spatial size for an input of `height` × `width`
    ///
    /// `floor((in + 2·pad − effective_kernel) / stride) + 1` per axis; `None`
    /// when a stride/kernel/dilation is zero or the window does not fit.
    pub fn output_size(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        let (ekh, ekw) = self.effective_kernel();
        let oh = output_extent(
            height,
            self.kernel_height,
            ekh,
            self.stride_height,
            self.padding_height,
            self.dilation_height,
        )?;
        let ow = output_extent(
            width,
            self.kernel_width,
            ekw,
            self.stride_width,
            self.padding_width,
            self.dilation_width,
        )?;
        Some((oh, ow))
    }
}

fn output_extent(
    input: usize,
    kernel: usize,
    effective: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    if kernel == 0 || stride == 0 || dilation == 0 || input == 0 {
        return None;
    }
    let padded = input + 2 * padding;
    if padded < effective {
        return None;
    }
    Some((padded - effective) / stride + 1)
}

/// Input coordinate for output `o` and kernel tap `k`, `None` inside padding
#[inline]
fn tap(o: usize, k: usize, stride: usize, dilation: usize, padding: usize, limit: usize) -> Option<usize> {
    (o * stride + k * dilation)
        .checked_sub(padding)
        .filter(|&i| i < limit)
}

// =============================================================================
// Inner products
// =============================================================================

/// Inner product of two equal-length slices
///
/// `Backend::Avx2Fma` falls back to the scalar loop on a CPU without AVX2
/// and FMA, so a backend value built by hand can never reach the SIMD path.
#[inline]
pub fn dot(backend: Backend, a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    match backend {
        #[cfg(target_arch = "x86_64")]
        Backend::Avx2Fma if x86_64::available() => {
            // SAFETY: avx2 and fma were detected just above
            unsafe { x86_64::dot_avx2_fma(a, b) }
        }
        _ => dot_scalar(a, b),
    }
}

#[inline]
fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(target_arch = "x86_64")]
mod x86_64 {
    use std::arch::x86_64::*;

    /// Run-time check, cached by the standard library after the first call
    #[inline]
    pub(super) fn available() -> bool {
        is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
    }

    /// AVX2/FMA inner product with a scalar tail
    ///
    /// # Safety
    /// The caller must have checked [`available`].
    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn dot_avx2_fma(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let pa = a.as_ptr();
        let pb = b.as_ptr();
        let mut acc0 = _mm256_setzero_ps();
        let mut acc1 = _mm256_setzero_ps();
        let mut i = 0;
        while i + 16 <= n {
            acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), acc0);
            acc1 = _mm256_fmadd_ps(
                _mm256_loadu_ps(pa.add(i + 8)),
                _mm256_loadu_ps(pb.add(i + 8)),
                acc1,
            );
            i += 16;
        }
        while i + 8 <= n {
            acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), acc0);
            i += 8;
        }
        let acc = _mm256_add_ps(acc0, acc1);

        // 8 -> 4 -> 2 -> 1
        let hi = _mm256_extractf128_ps(acc, 1);
        let lo = _mm256_castps256_ps128(acc);
        let sum4 = _mm_add_ps(lo, hi);
        let sum2 = _mm_add_ps(sum4, _mm_movehl_ps(sum4, sum4));
        let sum1 = _mm_add_ss(sum2, _mm_shuffle_ps(sum2, sum2, 1));
        let mut sum = _mm_cvtss_f32(sum1);

        while i < n {
            sum += *pa.add(i) * *pb.add(i);
            i += 1;
        }
        sum
    }
}

// =============================================================================
// Convolutions
// =============================================================================

/// Weights and fused epilogue of a convolution-like kernel
#[derive(Debug, Clone, Copy)]
pub struct ConvKernel<'a> {
    pub weights: &'a [f32],
    pub bias: Option<&'a [f32]>,
    pub window: Window,
    pub activation: Activation,
}

#[inline]
fn init_with_bias(out: &mut [f32], bias: Option<&[f32]>) {
    match bias {
        Some(b) => out.copy_from_slice(b),
        None => out.fill(0.0),
    }
}

/// Dense 2D convolution, weights `(out, kh, kw, in)`, zero padding
pub fn conv2d_nhwc(
    backend: Backend,
    kernel: &ConvKernel<'_>,
    input: &[f32],
    in_shape: Shape,
    output: &mut [f32],
    out_shape: Shape,
) {
    let Window {
        kernel_height: kh,
        kernel_width: kw,
        stride_height: sh,
        stride_width: sw,
        padding_height: ph,
        padding_width: pw,
        dilation_height: dh,
        dilation_width: dw,
    } = kernel.window;
    let ic = in_shape.channels;
    let oc = out_shape.channels;
    debug_assert_eq!(input.len(), in_shape.len());
    debug_assert_eq!(output.len(), out_shape.len());
    debug_assert_eq!(kernel.weights.len(), oc * kh * kw * ic);

    // 1x1 / stride 1 / no padding: one inner product per output element
    if kh == 1 && kw == 1 && sh == 1 && sw == 1 && ph == 0 && pw == 0 {
        for (in_px, out_px) in input.chunks_exact(ic).zip(output.chunks_exact_mut(oc)) {
            for (o, (acc, w_row)) in out_px
                .iter_mut()
                .zip(kernel.weights.chunks_exact(ic))
                .enumerate()
            {
                let b = kernel.bias.map_or(0.0, |b| b[o]);
                *acc = b + dot(backend, in_px, w_row);
            }
            kernel.activation.apply(out_px);
        }
        return;
    }

    for oy in 0..out_shape.height {
        for ox in 0..out_shape.width {
            let base = (oy * out_shape.width + ox) * oc;
            let out_px = &mut output[base..base + oc];
            init_with_bias(out_px, kernel.bias);

            for ky in 0..kh {
                let Some(iy) = tap(oy, ky, sh, dh, ph, in_shape.height) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(ix) = tap(ox, kx, sw, dw, pw, in_shape.width) else {
                        continue;
                    };
                    let in_base = (iy * in_shape.width + ix) * ic;
                    let in_px = &input[in_base..in_base + ic];
                    for (o, acc) in out_px.iter_mut().enumerate() {
                        let w_base = ((o * kh + ky) * kw + kx) * ic;
                        *acc += dot(backend, in_px, &kernel.weights[w_base..w_base + ic]);
                    }
                }
            }
            kernel.activation.apply(out_px);
        }
    }
}

/// Depthwise 2D convolution, weights `(channels, kh, kw)`, zero padding
pub fn depthwise_conv2d_nhwc(
    kernel: &ConvKernel<'_>,
    input: &[f32],
    in_shape: Shape,
    output: &mut [f32],
    out_shape: Shape,
) {
    let w = kernel.window;
    let c = in_shape.channels;
    let taps = w.kernel_height * w.kernel_width;
    debug_assert_eq!(c, out_shape.channels);
    debug_assert_eq!(kernel.weights.len(), c * taps);

    for oy in 0..out_shape.height {
        for ox in 0..out_shape.width {
            let base = (oy * out_shape.width + ox) * c;
            let out_px = &mut output[base..base + c];
            init_with_bias(out_px, kernel.bias);

            for ky in 0..w.kernel_height {
                let Some(iy) = tap(oy, ky, w.stride_height, w.dilation_height, w.padding_height, in_shape.height) else {
                    continue;
                };
                for kx in 0..w.kernel_width {
                    let Some(ix) = tap(ox, kx, w.stride_width, w.dilation_width, w.padding_width, in_shape.width) else {
                        continue;
                    };
                    let in_base = (iy * in_shape.width + ix) * c;
                    let in_px = &input[in_base..in_base + c];
                    let t = ky * w.kernel_width + kx;
                    for (ch, (acc, &v)) in out_px.iter_mut().zip(in_px).enumerate() {
                        *acc += v * kernel.weights[ch * taps + t];
                    }
                }
            }
            kernel.activation.apply(out_px);
        }
    }
}

// =============================================================================
// Pooling / fully connected
// =============================================================================

/// Max pooling; padded positions never win
pub fn max_pool2d_nhwc(window: &Window, input: &[f32], in_shape: Shape, output: &mut [f32], out_shape: Shape) {
    let c = in_shape.channels;
    for oy in 0..out_shape.height {
        for ox in 0..out_shape.width {
            let base = (oy * out_shape.width + ox) * c;
            let out_px = &mut output[base..base + c];
            out_px.fill(f32::NEG_INFINITY);

            for ky in 0..window.kernel_height {
                let Some(iy) = tap(oy, ky, window.stride_height, window.dilation_height, window.padding_height, in_shape.height) else {
                    continue;
                };
                for kx in 0..window.kernel_width {
                    let Some(ix) = tap(ox, kx, window.stride_width, window.dilation_width, window.padding_width, in_shape.width) else {
                        continue;
                    };
                    let in_base = (iy * in_shape.width + ix) * c;
                    for (acc, &v) in out_px.iter_mut().zip(&input[in_base..in_base + c]) {
                        *acc = acc.max(v);
                    }
                }
            }
        }
    }
}

/// Mean over all spatial positions, one value per channel
pub fn global_average_pool_nhwc(input: &[f32], in_shape: Shape, output: &mut [f32]) {
    let c = in_shape.channels;
    debug_assert_eq!(output.len(), c);
    output.fill(0.0);
    for px in input.chunks_exact(c) {
        for (acc, &v) in output.iter_mut().zip(px) {
            *acc += v;
        }
    }
    let scale = 1.0 / in_shape.positions() as f32;
    for v in output.iter_mut() {
        *v *= scale;
    }
}

/// `out[o] = act(bias[o] + Σ_i w[o, i] · in[i])`, weights `(out, in)`
pub fn fully_connected(
    backend: Backend,
    weights: &[f32],
    bias: Option<&[f32]>,
    activation: Activation,
    input: &[f32],
    output: &mut [f32],
) {
    let in_features = input.len();
    debug_assert_eq!(weights.len(), in_features * output.len());
    for (o, (acc, w_row)) in output
        .iter_mut()
        .zip(weights.chunks_exact(in_features))
        .enumerate()
    {
        *acc = bias.map_or(0.0, |b| b[o]) + dot(backend, w_row, input);
    }
    activation.apply(output);
}

// =============================================================================
// Resize
// =============================================================================

/// Sample coordinate table for one axis (half-pixel centres, clamped)
fn bilinear_axis(input: usize, output: usize) -> Vec<(usize, usize, f32)> {
    let scale = input as f32 / output as f32;
    (0..output)
        .map(|o| {
            let src = ((o as f32 + 0.5) * scale - 0.5).max(0.0);
            let i0 = (src.floor() as usize).min(input - 1);
            let i1 = (i0 + 1).min(input - 1);
            let frac = (src - i0 as f32).clamp(0.0, 1.0);
            (i0, i1, frac)
        })
        .collect()
}

/// Bilinear resize of an 8-bit NHWC image, rounding to nearest
pub fn resize_bilinear_u8(input: &[u8], in_shape: Shape, output: &mut [u8], out_shape: Shape) {
    let c = in_shape.channels;
    debug_assert_eq!(c, out_shape.channels);
    debug_assert_eq!(input.len(), in_shape.len());
    debug_assert_eq!(output.len(), out_shape.len());

    let ys = bilinear_axis(in_shape.height, out_shape.height);
    let xs = bilinear_axis(in_shape.width, out_shape.width);
    let row = in_shape.width * c;

    for (oy, &(y0, y1, fy)) in ys.iter().enumerate() {
        for (ox, &(x0, x1, fx)) in xs.iter().enumerate() {
            let out_base = (oy * out_shape.width + ox) * c;
            for ch in 0..c {
                let p00 = input[y0 * row + x0 * c + ch] as f32;
                let p01 = input[y0 * row + x1 * c + ch] as f32;
                let p10 = input[y1 * row + x0 * c + ch] as f32;
                let p11 = input[y1 * row + x1 * c + ch] as f32;
                let top = p00 + (p01 - p00) * fx;
                let bottom = p10 + (p11 - p10) * fx;
                let v = top + (bottom - top) * fy;
                output[out_base + ch] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_size_formula() {
        // floor((56 + 2 - 3) / 2) + 1 = 28
        assert_eq!(Window::square(3, 2, 1).output_size(56, 56), Some((28, 28)));
        // stem: 224 -> 112
        assert_eq!(Window::square(3, 2, 1).output_size(224, 224), Some((112, 112)));
        // odd input rounds up through the +1
        assert_eq!(Window::square(3, 2, 1).output_size(7, 7), Some((4, 4)));
        assert_eq!(Window::square(1, 1, 0).output_size(7, 5), Some((7, 5)));
        // window does not fit
        assert_eq!(Window::square(5, 1, 0).output_size(3, 3), None);
        assert_eq!(Window::square(3, 0, 1).output_size(8, 8), None);
    }

    #[test]
    fn test_dilated_extent() {
        let mut w = Window::square(3, 1, 0);
        w.dilation_height = 2;
        w.dilation_width = 2;
        assert_eq!(w.effective_kernel(), (5, 5));
        assert_eq!(w.output_size(9, 9), Some((5, 5)));
    }

    #[test]
    fn test_dot_backends_agree() {
        let a: Vec<f32> = (0..37).map(|i| (i as f32 * 0.37).sin()).collect();
        let b: Vec<f32> = (0..37).map(|i| (i as f32 * 0.11).cos()).collect();
        let reference = dot_scalar(&a, &b);
        let engine = crate::engine::Engine::acquire_with(Default::default()).unwrap();
        let got = dot(engine.backend(), &a, &b);
        assert!((reference - got).abs() < 1e-4, "{reference} vs {got}");
    }

    #[test]
    fn test_avx2_backend_value_is_safe_on_any_cpu() {
        // built directly, without going through engine detection
        let forced = Backend::Avx2Fma;
        let a: Vec<f32> = (0..53).map(|i| (i as f32 * 0.29).sin()).collect();
        let b: Vec<f32> = (0..53).map(|i| (i as f32 * 0.07).cos()).collect();
        let reference = dot_scalar(&a, &b);
        let got = dot(forced, &a, &b);
        assert!((reference - got).abs() < 1e-4, "{reference} vs {got}");

        let weights: Vec<f32> = a.iter().chain(&b).copied().collect();
        let mut scalar_out = [0.0f32; 2];
        let mut forced_out = [0.0f32; 2];
        fully_connected(Backend::Scalar, &weights, Some(&[0.5, -0.5]), Activation::Identity, &b, &mut scalar_out);
        fully_connected(forced, &weights, Some(&[0.5, -0.5]), Activation::Identity, &b, &mut forced_out);
        for (s, f) in scalar_out.iter().zip(&forced_out) {
            assert!((s - f).abs() < 1e-4, "{s} vs {f}");
        }
    }

    #[test]
    fn test_relu_clamps_after_bias() {
        let kernel = ConvKernel {
            weights: &[1.0],
            bias: Some(&[-2.0]),
            window: Window::square(1, 1, 0),
            activation: Activation::Relu,
        };
        let input = [1.0, 3.0];
        let mut output = [9.0; 2];
        conv2d_nhwc(
            Backend::Scalar,
            &kernel,
            &input,
            Shape::new(1, 2, 1),
            &mut output,
            Shape::new(1, 2, 1),
        );
        // 1 - 2 = -1 -> 0; 3 - 2 = 1
        assert_eq!(output, [0.0, 1.0]);
    }

    #[test]
    fn test_resize_identity_and_constant() {
        let input: Vec<u8> = (0..4 * 4 * 3).map(|v| v as u8).collect();
        let mut output = vec![0u8; input.len()];
        resize_bilinear_u8(&input, Shape::new(4, 4, 3), &mut output, Shape::new(4, 4, 3));
        assert_eq!(input, output);

        let flat = vec![77u8; 5 * 7 * 3];
        let mut small = vec![0u8; 2 * 3 * 3];
        resize_bilinear_u8(&flat, Shape::new(5, 7, 3), &mut small, Shape::new(2, 3, 3));
        assert!(small.iter().all(|&v| v == 77));
    }

    #[test]
    fn test_resize_halves_by_averaging_pairs() {
        // 1x4 single channel -> 1x2: samples land at 0.5 and 2.5
        let input = [0u8, 100, 200, 250];
        let mut output = [0u8; 2];
        resize_bilinear_u8(&input, Shape::new(1, 4, 1), &mut output, Shape::new(1, 2, 1));
        assert_eq!(output, [50, 225]);
    }
}
