//! Complex FFT primitives with their vector-Jacobian products.
//!
//! All transforms act along the last axis of a [`ComplexTensor`] (or of a row-major
//! real buffer) and are batched over every leading axis. Plans come from
//! [`rustfft`]; operators that run the same length repeatedly hold an
//! [`FftPlan`] or [`RealFftPlan`] instead of re-planning per call.
//!
//! ## Conventions
//!
//! * `forward_fft` is unnormalised, `inverse_fft` carries the `1/len` factor.
//! * The real transforms return (or accept) the compact half spectrum of
//!   `len/2 + 1` bins. They are computed with a half-length complex FFT over the
//!   packed sequence `x[2j] + i·x[2j+1]`, followed by a twiddle split, which halves
//!   the work of a full complex transform.
//! * Gradients use the cotangent convention `ḡ = ∂L/∂Re z + i·∂L/∂Im z` for a real
//!   loss `L`. Under it the backward pass of a forward transform is a scaled
//!   inverse transform and vice versa, so no Jacobian is ever formed explicitly.

use crate::error::{KrylovError, KrylovErrorKind, ensure_dim};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// A dense complex tensor whose last axis is the transform axis.
#[derive(Clone, Debug, PartialEq)]
pub struct ComplexTensor {
    shape: Vec<usize>,
    data: Vec<Complex32>,
}

impl ComplexTensor {
    /// Wraps a row-major buffer, checking its length against `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<Complex32>) -> Result<Self, KrylovError> {
        let expected: usize = shape.iter().product();
        ensure_dim("ComplexTensor buffer length", expected, data.len())?;
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![Complex32::new(0.0, 0.0); len],
        }
    }

    /// Promotes a real row-major buffer to a complex tensor with zero imaginary part.
    pub fn from_real(shape: Vec<usize>, values: &[f32]) -> Result<Self, KrylovError> {
        let data = values.iter().map(|&re| Complex32::new(re, 0.0)).collect();
        Self::new(shape, data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[Complex32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [Complex32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<Complex32> {
        self.data
    }

    /// Length of the transform axis.
    pub fn last_len(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    /// Real parts of every element, in storage order.
    pub fn re(&self) -> Vec<f32> {
        self.data.iter().map(|c| c.re).collect()
    }

    /// The real inner product `Re Σ conj(self)·other`, i.e. the Euclidean inner
    /// product of the two tensors viewed as pairs of reals.
    pub fn real_inner(&self, other: &ComplexTensor) -> f32 {
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a.conj() * b).re)
            .sum()
    }

    fn scaled(mut self, factor: f32) -> Self {
        for value in &mut self.data {
            *value *= factor;
        }
        self
    }
}

/// A planned complex transform of a fixed length, applied row by row.
#[derive(Clone)]
pub struct FftPlan {
    len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for FftPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftPlan").field("len", &self.len).finish()
    }
}

impl FftPlan {
    pub fn new(planner: &mut FftPlanner<f32>, len: usize) -> Self {
        Self {
            len,
            forward: planner.plan_fft_forward(len),
            inverse: planner.plan_fft_inverse(len),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Unnormalised forward transform of every length-`len` chunk of `buffer`.
    pub fn forward_in_place(&self, buffer: &mut [Complex32]) {
        if !buffer.is_empty() {
            self.forward.process(buffer);
        }
    }

    /// Inverse transform of every chunk of `buffer`, normalised by `1/len`.
    pub fn inverse_in_place(&self, buffer: &mut [Complex32]) {
        if buffer.is_empty() {
            return;
        }
        self.inverse.process(buffer);
        let scale = 1.0 / self.len as f32;
        for value in buffer.iter_mut() {
            *value *= scale;
        }
    }
}

/// A planned real transform of even length `len`, producing `len/2 + 1` bins per row.
#[derive(Clone, Debug)]
pub struct RealFftPlan {
    len: usize,
    half: FftPlan,
    twiddles: Vec<Complex32>,
}

impl RealFftPlan {
    pub fn new(planner: &mut FftPlanner<f32>, len: usize) -> Result<Self, KrylovError> {
        if len < 2 || len % 2 != 0 {
            return Err(KrylovErrorKind::invalid_size(format!(
                "real FFT length must be even and at least 2, got {len}"
            ))
            .into());
        }
        let half = len / 2;
        // e^{-2πik/len}, computed in f64 and rounded once.
        let twiddles = (0..=half)
            .map(|k| {
                let theta = -2.0 * std::f64::consts::PI * k as f64 / len as f64;
                Complex32::new(theta.cos() as f32, theta.sin() as f32)
            })
            .collect();
        Ok(Self {
            len,
            half: FftPlan::new(planner, half),
            twiddles,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of spectrum bins per row.
    pub fn bins(&self) -> usize {
        self.len / 2 + 1
    }

    /// Half-spectrum transform of every length-`len` row of `x`.
    pub fn forward(&self, x: &[f32]) -> Vec<Complex32> {
        let h = self.len / 2;
        let rows = x.len() / self.len;
        let mut packed: Vec<Complex32> = x
            .chunks_exact(2)
            .map(|pair| Complex32::new(pair[0], pair[1]))
            .collect();
        self.half.forward_in_place(&mut packed);

        let mut out = Vec::with_capacity(rows * self.bins());
        let minus_half_i = Complex32::new(0.0, -0.5);
        for z in packed.chunks_exact(h) {
            for k in 0..=h {
                let zk = z[k % h];
                let zc = z[(h - k) % h].conj();
                let even = (zk + zc) * 0.5;
                let odd = (zk - zc) * minus_half_i;
                out.push(even + self.twiddles[k] * odd);
            }
        }
        out
    }

    /// Inverse of [`RealFftPlan::forward`] for every row of `len/2 + 1` bins.
    ///
    /// The imaginary parts of the DC and Nyquist bins are discarded, as for any
    /// spectrum of a real sequence.
    pub fn inverse(&self, spectrum: &[Complex32]) -> Vec<f32> {
        let h = self.len / 2;
        let bins = self.bins();
        let i = Complex32::new(0.0, 1.0);
        let mut packed = Vec::with_capacity(spectrum.len() / bins * h);
        for row in spectrum.chunks_exact(bins) {
            let bin = |k: usize| {
                if k == 0 || k == h {
                    Complex32::new(row[k].re, 0.0)
                } else {
                    row[k]
                }
            };
            for k in 0..h {
                let xk = bin(k);
                let xc = bin(h - k).conj();
                let even = (xk + xc) * 0.5;
                let odd = (xk - xc) * 0.5 * self.twiddles[k].conj();
                packed.push(even + i * odd);
            }
        }
        self.half.inverse_in_place(&mut packed);
        packed.iter().flat_map(|z| [z.re, z.im]).collect()
    }
}

fn plan_for(x: &ComplexTensor) -> Result<FftPlan, KrylovError> {
    let len = x.last_len();
    if len == 0 {
        return Err(KrylovErrorKind::invalid_size("FFT axis must be non-empty").into());
    }
    Ok(FftPlan::new(&mut FftPlanner::new(), len))
}

fn check_rows(len: usize, actual: usize, what: &str) -> Result<(), KrylovError> {
    if actual % len != 0 {
        return Err(KrylovErrorKind::shape_mismatch(what, len * (actual / len + 1), actual).into());
    }
    Ok(())
}

/// Unnormalised forward DFT along the last axis.
pub fn forward_fft(x: &ComplexTensor) -> Result<ComplexTensor, KrylovError> {
    let plan = plan_for(x)?;
    let mut out = x.clone();
    plan.forward_in_place(out.data_mut());
    Ok(out)
}

/// Inverse DFT along the last axis, normalised so that it undoes [`forward_fft`].
pub fn inverse_fft(x: &ComplexTensor) -> Result<ComplexTensor, KrylovError> {
    let plan = plan_for(x)?;
    let mut out = x.clone();
    plan.inverse_in_place(out.data_mut());
    Ok(out)
}

/// Half-spectrum DFT of each length-`len` row of the real buffer `x`.
///
/// Returns a `[rows, len/2 + 1]` tensor.
pub fn real_fft_fast(x: &[f32], len: usize) -> Result<ComplexTensor, KrylovError> {
    let plan = RealFftPlan::new(&mut FftPlanner::new(), len)?;
    check_rows(len, x.len(), "real FFT input length")?;
    let rows = x.len() / len;
    ComplexTensor::new(vec![rows, plan.bins()], plan.forward(x))
}

/// Real sequences of length `len` whose half spectra are the rows of `spectrum`.
pub fn inverse_real_fft_fast(spectrum: &ComplexTensor, len: usize) -> Result<Vec<f32>, KrylovError> {
    let plan = RealFftPlan::new(&mut FftPlanner::new(), len)?;
    ensure_dim("half-spectrum bins", plan.bins(), spectrum.last_len())?;
    Ok(plan.inverse(spectrum.data()))
}

/// VJP of [`forward_fft`]: `len · inverse_fft(ḡ)`.
pub fn forward_fft_backward(grad: &ComplexTensor) -> Result<ComplexTensor, KrylovError> {
    let len = grad.last_len() as f32;
    Ok(inverse_fft(grad)?.scaled(len))
}

/// VJP of [`inverse_fft`]: `forward_fft(ḡ) / len`.
pub fn inverse_fft_backward(grad: &ComplexTensor) -> Result<ComplexTensor, KrylovError> {
    let len = grad.last_len() as f32;
    Ok(forward_fft(grad)?.scaled(1.0 / len))
}

/// VJP of [`real_fft_fast`].
///
/// The half spectrum stands for a full Hermitian spectrum; every interior bin
/// appears twice (itself and its mirrored conjugate), so its cotangent is halved
/// before the real inverse transform mirrors it back.
pub fn real_fft_fast_backward(grad: &ComplexTensor, len: usize) -> Result<Vec<f32>, KrylovError> {
    let mut mirrored = grad.clone();
    let bins = mirrored.last_len();
    for row in mirrored.data_mut().chunks_exact_mut(bins.max(1)) {
        for value in row.iter_mut().take(bins.saturating_sub(1)).skip(1) {
            *value *= 0.5;
        }
    }
    let scale = len as f32;
    Ok(inverse_real_fft_fast(&mirrored, len)?
        .into_iter()
        .map(|v| v * scale)
        .collect())
}

/// VJP of [`inverse_real_fft_fast`].
///
/// Interior bins contribute twice to the real output, the DC and Nyquist bins once
/// (and only through their real parts).
pub fn inverse_real_fft_fast_backward(grad: &[f32], len: usize) -> Result<ComplexTensor, KrylovError> {
    let mut out = real_fft_fast(grad, len)?;
    let bins = out.last_len();
    let scale = 1.0 / len as f32;
    for row in out.data_mut().chunks_exact_mut(bins) {
        for (k, value) in row.iter_mut().enumerate() {
            let weight = if k == 0 || k == bins - 1 { 1.0 } else { 2.0 };
            *value *= weight * scale;
        }
    }
    Ok(out)
}

/// NumPy-style broadcast of two shapes.
fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, KrylovError> {
    let ndim = a.len().max(b.len());
    let mut out = vec![0; ndim];
    for axis in 0..ndim {
        let da = if axis + a.len() >= ndim { a[axis + a.len() - ndim] } else { 1 };
        let db = if axis + b.len() >= ndim { b[axis + b.len() - ndim] } else { 1 };
        out[axis] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (x, y) => {
                return Err(KrylovErrorKind::shape_mismatch(
                    format!("broadcast axis {axis}"),
                    x,
                    y,
                )
                .into());
            }
        };
    }
    Ok(out)
}

/// Strides of `shape` aligned to `out_shape`, zero along broadcast axes.
fn broadcast_strides(shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let offset = out_shape.len() - shape.len();
    let mut strides = vec![0; out_shape.len()];
    let mut stride = 1;
    for axis in (0..shape.len()).rev() {
        if shape[axis] != 1 {
            strides[axis + offset] = stride;
        }
        stride *= shape[axis];
    }
    strides
}

/// Visits every multi-index of `shape` in row-major order, passing the flat
/// offsets into two broadcast operands.
fn for_each_broadcast(
    shape: &[usize],
    strides_a: &[usize],
    strides_b: &[usize],
    mut visit: impl FnMut(usize, usize, usize),
) {
    let total: usize = shape.iter().product();
    let mut index = vec![0; shape.len()];
    let (mut off_a, mut off_b) = (0usize, 0usize);
    for flat in 0..total {
        visit(flat, off_a, off_b);
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            off_a += strides_a[axis];
            off_b += strides_b[axis];
            if index[axis] < shape[axis] {
                break;
            }
            off_a -= strides_a[axis] * shape[axis];
            off_b -= strides_b[axis] * shape[axis];
            index[axis] = 0;
        }
    }
}

/// Elementwise complex product with broadcasting.
pub fn complex_multiply(a: &ComplexTensor, b: &ComplexTensor) -> Result<ComplexTensor, KrylovError> {
    let shape = broadcast_shape(&a.shape, &b.shape)?;
    let strides_a = broadcast_strides(&a.shape, &shape);
    let strides_b = broadcast_strides(&b.shape, &shape);
    let mut out = ComplexTensor::zeros(shape.clone());
    for_each_broadcast(&shape, &strides_a, &strides_b, |flat, ia, ib| {
        out.data[flat] = a.data[ia] * b.data[ib];
    });
    Ok(out)
}

/// VJP of [`complex_multiply`]: `(Σ ḡ·conj(b), Σ ḡ·conj(a))`, each summed over the
/// axes along which its operand was broadcast.
pub fn complex_multiply_backward(
    a: &ComplexTensor,
    b: &ComplexTensor,
    grad: &ComplexTensor,
) -> Result<(ComplexTensor, ComplexTensor), KrylovError> {
    let shape = broadcast_shape(&a.shape, &b.shape)?;
    if grad.shape != shape {
        return Err(KrylovErrorKind::shape_mismatch(
            "complex multiply gradient size",
            shape.iter().product(),
            grad.data.len(),
        )
        .into());
    }
    let strides_a = broadcast_strides(&a.shape, &shape);
    let strides_b = broadcast_strides(&b.shape, &shape);
    let mut grad_a = ComplexTensor::zeros(a.shape.clone());
    let mut grad_b = ComplexTensor::zeros(b.shape.clone());
    for_each_broadcast(&shape, &strides_a, &strides_b, |flat, ia, ib| {
        grad_a.data[ia] += grad.data[flat] * b.data[ib].conj();
        grad_b.data[ib] += grad.data[flat] * a.data[ia].conj();
    });
    Ok((grad_a, grad_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn random_complex(shape: Vec<usize>, rng: &mut StdRng) -> ComplexTensor {
        let len = shape.iter().product();
        let data = (0..len)
            .map(|_| Complex32::new(rng.random::<f32>() - 0.5, rng.random::<f32>() - 0.5))
            .collect();
        ComplexTensor::new(shape, data).unwrap()
    }

    fn naive_dft(x: &[f32]) -> Vec<Complex32> {
        let n = x.len();
        (0..n)
            .map(|k| {
                let mut acc = num_complex::Complex64::new(0.0, 0.0);
                for (j, &value) in x.iter().enumerate() {
                    let theta = -2.0 * std::f64::consts::PI * (j * k) as f64 / n as f64;
                    acc += num_complex::Complex64::from_polar(value as f64, theta);
                }
                Complex32::new(acc.re as f32, acc.im as f32)
            })
            .collect()
    }

    #[test]
    fn test_inverse_fft_undoes_forward_fft() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = random_complex(vec![3, 2, 16], &mut rng);
        let round_trip = inverse_fft(&forward_fft(&x).unwrap()).unwrap();
        for (a, b) in x.data().iter().zip(round_trip.data()) {
            assert!((a - b).norm() < 1e-5);
        }
    }

    #[test]
    fn test_real_fft_matches_naive_dft() {
        let x: Vec<f32> = (0..16).map(|i| ((i * 7) % 5) as f32 - 1.5).collect();
        let spectrum = real_fft_fast(&x, 8).unwrap();
        assert_eq!(spectrum.shape(), &[2, 5]);
        for (row, chunk) in x.chunks(8).enumerate() {
            let expected = naive_dft(chunk);
            for k in 0..5 {
                let got = spectrum.data()[row * 5 + k];
                assert!((got - expected[k]).norm() < 1e-4, "bin {k}: {got} vs {}", expected[k]);
            }
        }
        let back = inverse_real_fft_fast(&spectrum, 8).unwrap();
        for (a, b) in x.iter().zip(&back) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_real_fft_rejects_odd_length() {
        let err = real_fft_fast(&[1.0, 2.0, 3.0], 3).unwrap_err();
        assert!(matches!(err.kind(), KrylovErrorKind::InvalidSize { .. }));
    }

    #[test]
    fn test_complex_fft_backward_is_adjoint() {
        let mut rng = StdRng::seed_from_u64(11);
        let x = random_complex(vec![2, 8], &mut rng);
        let g = random_complex(vec![2, 8], &mut rng);

        let lhs = forward_fft(&x).unwrap().real_inner(&g);
        let rhs = x.real_inner(&forward_fft_backward(&g).unwrap());
        assert!((lhs - rhs).abs() < 1e-4, "{lhs} vs {rhs}");

        let lhs = inverse_fft(&x).unwrap().real_inner(&g);
        let rhs = x.real_inner(&inverse_fft_backward(&g).unwrap());
        assert!((lhs - rhs).abs() < 1e-4, "{lhs} vs {rhs}");
    }

    #[test]
    fn test_real_fft_backward_is_adjoint() {
        let mut rng = StdRng::seed_from_u64(13);
        let len = 16;
        let x: Vec<f32> = (0..2 * len).map(|_| rng.random::<f32>() - 0.5).collect();
        let g = random_complex(vec![2, len / 2 + 1], &mut rng);

        let lhs = real_fft_fast(&x, len).unwrap().real_inner(&g);
        let grad_x = real_fft_fast_backward(&g, len).unwrap();
        let rhs: f32 = x.iter().zip(&grad_x).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-4, "{lhs} vs {rhs}");

        let y_grad: Vec<f32> = (0..2 * len).map(|_| rng.random::<f32>() - 0.5).collect();
        let out = inverse_real_fft_fast(&g, len).unwrap();
        let lhs: f32 = out.iter().zip(&y_grad).map(|(a, b)| a * b).sum();
        let rhs = g.real_inner(&inverse_real_fft_fast_backward(&y_grad, len).unwrap());
        assert!((lhs - rhs).abs() < 1e-4, "{lhs} vs {rhs}");
    }

    #[test]
    fn test_complex_multiply_broadcasts_outer_product() {
        let mut rng = StdRng::seed_from_u64(17);
        let a = random_complex(vec![3, 1, 4], &mut rng);
        let b = random_complex(vec![1, 2, 4], &mut rng);
        let out = complex_multiply(&a, &b).unwrap();
        assert_eq!(out.shape(), &[3, 2, 4]);
        for i in 0..3 {
            for r in 0..2 {
                for k in 0..4 {
                    let expected = a.data()[i * 4 + k] * b.data()[r * 4 + k];
                    assert_eq!(out.data()[(i * 2 + r) * 4 + k], expected);
                }
            }
        }
    }

    #[test]
    fn test_complex_multiply_rejects_incompatible_shapes() {
        let a = ComplexTensor::zeros(vec![3, 4]);
        let b = ComplexTensor::zeros(vec![2, 4]);
        assert!(complex_multiply(&a, &b).is_err());
    }

    #[test]
    fn test_complex_multiply_backward_is_adjoint() {
        let mut rng = StdRng::seed_from_u64(19);
        let a = random_complex(vec![3, 1, 4], &mut rng);
        let b = random_complex(vec![2, 4], &mut rng);
        let g = random_complex(vec![3, 2, 4], &mut rng);
        let (grad_a, grad_b) = complex_multiply_backward(&a, &b, &g).unwrap();
        assert_eq!(grad_a.shape(), a.shape());
        assert_eq!(grad_b.shape(), b.shape());

        // The product is linear in each operand separately.
        let lhs = complex_multiply(&a, &b).unwrap().real_inner(&g);
        assert!((lhs - a.real_inner(&grad_a)).abs() < 1e-4);
        assert!((lhs - b.real_inner(&grad_b)).abs() < 1e-4);
    }
}
