//! Krylov products for the f-circulant shift `Z_f`.
//!
//! `Z_f` moves every entry one slot down and wraps the last entry to the top, scaled
//! by `f`. Its Krylov matrices are Toeplitz-like, so both Krylov products reduce to
//! convolutions:
//!
//! * **f ≠ 0 (cyclic).** `Z_f = D⁻¹ F⁻¹ Λ F D` with `D = diag(η)`, where
//!   `η_k = |f|^{k/n}` for `f > 0` and `η_k = |f|^{k/n} e^{iπk/n}` for `f < 0`. Twisting
//!   the operands by `η` (or `η⁻¹`) turns the f-circular convolution into a plain
//!   circular one, computed with one length-n complex FFT per operand.
//! * **f = 0 (acyclic).** The products are linear convolutions, computed by zero
//!   padding to `2n` and using the packed real FFT (see [`super::convolution`]).
//!
//! The twist factors depend only on `(n, f)` and are computed once when the operator
//! is constructed; they are never mutated afterwards.

use super::convolution::Convolver;
use super::{KrylovOperator, check_forward_operands, check_transpose_operands};
use crate::error::{KrylovError, KrylovErrorKind, ensure_dim, ensure_power_of_two};
use crate::fft::{ComplexTensor, FftPlan, complex_multiply};
use crate::matrix::Tensor3;
use faer::{Mat, MatRef};
use num_complex::{Complex32, Complex64};
use rustfft::FftPlanner;

/// The diagonal scaling that turns f-circular convolution into circular convolution.
#[derive(Clone, Debug, PartialEq)]
pub struct Twist {
    eta: Vec<Complex32>,
    inv_eta: Vec<Complex32>,
}

impl Twist {
    /// Returns `None` for `f == 0`, which has no twisted diagonalisation.
    ///
    /// For `f < 0` the phase `e^{iπk/n}` equals bin `k` of the length-2n DFT of a unit
    /// impulse at index `2n - 1`.
    pub fn new(n: usize, f: f32) -> Option<Self> {
        if f == 0.0 {
            return None;
        }
        let magnitude = (f as f64).abs();
        let (eta, inv_eta) = (0..n)
            .map(|k| {
                let t = k as f64 / n as f64;
                let phase = if f > 0.0 { 0.0 } else { std::f64::consts::PI * t };
                let value = Complex64::from_polar(magnitude.powf(t), phase);
                let inverse = value.inv();
                (
                    Complex32::new(value.re as f32, value.im as f32),
                    Complex32::new(inverse.re as f32, inverse.im as f32),
                )
            })
            .unzip();
        Some(Self { eta, inv_eta })
    }

    pub fn eta(&self) -> &[Complex32] {
        &self.eta
    }

    pub fn inv_eta(&self) -> &[Complex32] {
        &self.inv_eta
    }
}

#[derive(Clone, Debug)]
enum Kernel {
    Cyclic { twist: Twist, plan: FftPlan },
    Acyclic { conv: Convolver },
}

/// The f-circulant shift `Z_f` of size n, planned for repeated Krylov products.
///
/// `batch_size` and `rank` record the operand shapes the operator was planned for;
/// [`crate::solvers::multiply_transpose`] and [`crate::solvers::multiply_krylov`]
/// check calls against them.
#[derive(Clone, Debug)]
pub struct ToeplitzOperator {
    n: usize,
    f: f32,
    batch_size: usize,
    rank: usize,
    kernel: Kernel,
}

impl ToeplitzOperator {
    /// Plans the Krylov products of `Z_f`.
    ///
    /// Fails with [`KrylovErrorKind::InvalidSize`] unless `n` is a power of two.
    pub fn new(n: usize, f: f32, batch_size: usize, rank: usize) -> Result<Self, KrylovError> {
        ensure_power_of_two(n)?;
        if !f.is_finite() {
            return Err(KrylovErrorKind::invalid_size(format!("f must be finite, got {f}")).into());
        }
        let mut planner = FftPlanner::new();
        let kernel = match Twist::new(n, f) {
            Some(twist) => Kernel::Cyclic {
                twist,
                plan: FftPlan::new(&mut planner, n),
            },
            None => Kernel::Acyclic {
                conv: Convolver::with_fft(&mut planner, n)?,
            },
        };
        log::debug!(
            "Planned Z_f operator: n={n}, f={f}, batch={batch_size}, rank={rank}, cyclic={}",
            matches!(kernel, Kernel::Cyclic { .. })
        );
        Ok(Self {
            n,
            f,
            batch_size,
            rank,
            kernel,
        })
    }

    pub fn f(&self) -> f32 {
        self.f
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The cached twist factors, if the operator is cyclic.
    pub fn twist(&self) -> Option<&Twist> {
        match &self.kernel {
            Kernel::Cyclic { twist, .. } => Some(twist),
            Kernel::Acyclic { .. } => None,
        }
    }
}

/// Copies the rows of `x` into a complex tensor of the given shape, scaling entry `j`
/// of every row by `weights[j]`.
fn twisted(x: &[f32], weights: &[Complex32], shape: Vec<usize>) -> Result<ComplexTensor, KrylovError> {
    let data = x
        .chunks_exact(weights.len())
        .flat_map(|row| row.iter().zip(weights).map(|(&a, &w)| w * a))
        .collect();
    ComplexTensor::new(shape, data)
}

fn reversed_rows(m: MatRef<'_, f32>) -> Vec<f32> {
    let mut out = Vec::with_capacity(m.nrows() * m.ncols());
    for i in 0..m.nrows() {
        for j in (0..m.ncols()).rev() {
            out.push(m[(i, j)]);
        }
    }
    out
}

impl KrylovOperator for ToeplitzOperator {
    fn dim(&self) -> usize {
        self.n
    }

    fn apply_vec(&self, x: &[f32]) -> Result<Vec<f32>, KrylovError> {
        let n = self.n;
        ensure_dim("length of the vector", n, x.len())?;
        let mut y = Vec::with_capacity(n);
        y.push(self.f * x[n - 1]);
        y.extend_from_slice(&x[..n - 1]);
        Ok(y)
    }

    fn krylov_transpose_multiply(
        &self,
        v: MatRef<'_, f32>,
        u: MatRef<'_, f32>,
    ) -> Result<Tensor3, KrylovError> {
        let n = self.n;
        check_transpose_operands(n, v, u)?;
        let (batch, rank) = (u.nrows(), v.nrows());
        let u_rows = super::rows_to_vec(u);
        let v_rows = super::rows_to_vec(v);

        match &self.kernel {
            Kernel::Cyclic { twist, plan } => {
                let mut u_hat = twisted(&u_rows, twist.inv_eta(), vec![batch, 1, n])?;
                plan.inverse_in_place(u_hat.data_mut());
                let mut v_hat = twisted(&v_rows, twist.eta(), vec![1, rank, n])?;
                plan.forward_in_place(v_hat.data_mut());

                let mut product = complex_multiply(&u_hat, &v_hat)?;
                plan.forward_in_place(product.data_mut());
                let data = product
                    .data()
                    .chunks_exact(n)
                    .flat_map(|row| row.iter().zip(twist.eta()).map(|(z, e)| (e * z).re))
                    .collect();
                Tensor3::from_vec(batch, rank, n, data)
            }
            Kernel::Acyclic { conv } => {
                // out[j] = Σ_i u[i + j] v[i] is entry n-1-j of rev(u) * v.
                let full = conv.outer(&reversed_rows(u), &v_rows);
                Ok(Tensor3::from_fn(batch, rank, n, |b, r, j| {
                    full[(b * rank + r) * 2 * n + n - 1 - j]
                }))
            }
        }
    }

    fn krylov_multiply(&self, v: MatRef<'_, f32>, w: &Tensor3) -> Result<Mat<f32>, KrylovError> {
        let n = self.n;
        check_forward_operands(n, v, w)?;
        let (batch, rank) = (w.batch(), w.rank());
        let v_rows = super::rows_to_vec(v);

        match &self.kernel {
            Kernel::Cyclic { twist, plan } => {
                let mut w_hat = twisted(w.as_slice(), twist.eta(), vec![batch, rank, n])?;
                plan.forward_in_place(w_hat.data_mut());
                let mut v_hat = twisted(&v_rows, twist.eta(), vec![rank, n])?;
                plan.forward_in_place(v_hat.data_mut());

                let product = complex_multiply(&w_hat, &v_hat)?;
                let mut summed = vec![Complex32::new(0.0, 0.0); batch * n];
                for (b, acc) in summed.chunks_exact_mut(n).enumerate() {
                    for r in 0..rank {
                        let row = &product.data()[(b * rank + r) * n..][..n];
                        for (dst, z) in acc.iter_mut().zip(row) {
                            *dst += z;
                        }
                    }
                }
                plan.inverse_in_place(&mut summed);
                Ok(Mat::from_fn(batch, n, |b, j| {
                    (summed[b * n + j] * twist.inv_eta()[j]).re
                }))
            }
            Kernel::Acyclic { conv } => {
                let full = conv.sum_over_rank(w.as_slice(), &v_rows, rank);
                Ok(Mat::from_fn(batch, n, |b, j| full[b * 2 * n + j]))
            }
        }
    }

    fn reflected(&self) -> Box<dyn KrylovOperator> {
        // J Z_fᵀ J = Z_f.
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::forward_fft;
    use faer::mat;

    fn assert_tensor_eq(t: &Tensor3, expected: &[&[&[f32]]]) {
        for (b, rows) in expected.iter().enumerate() {
            for (r, seq) in rows.iter().enumerate() {
                for (j, &value) in seq.iter().enumerate() {
                    let got = t.get(b, r, j);
                    assert!((got - value).abs() < 1e-4, "[{b}, {r}, {j}]: {got} vs {value}");
                }
            }
        }
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let err = ToeplitzOperator::new(6, 1.0, 1, 1).unwrap_err();
        assert_eq!(err.to_string(), "Invalid size: n must be a power of two, got 6");
    }

    #[test]
    fn test_negative_twist_matches_impulse_dft() {
        let n = 8;
        let mut impulse = vec![0.0; 2 * n];
        impulse[2 * n - 1] = 1.0;
        let dft = forward_fft(&ComplexTensor::from_real(vec![2 * n], &impulse).unwrap()).unwrap();
        let twist = Twist::new(n, -1.0).unwrap();
        for k in 0..n {
            assert!((twist.eta()[k] - dft.data()[k]).norm() < 1e-6);
        }
    }

    #[test]
    fn test_twist_magnitude_and_inverse() {
        let twist = Twist::new(4, 16.0).unwrap();
        assert!((twist.eta()[2].re - 4.0).abs() < 1e-5);
        for (e, ie) in twist.eta().iter().zip(twist.inv_eta()) {
            assert!((e * ie - Complex32::new(1.0, 0.0)).norm() < 1e-6);
        }
        assert!(Twist::new(4, 0.0).is_none());
    }

    #[test]
    fn test_skew_circulant_transpose_literal() {
        let op = ToeplitzOperator::new(4, -1.0, 2, 2).unwrap();
        let v: Mat<f32> = mat![[0.0, 1.0, 0.0, -1.0], [0.0, 1.0, 2.0, 3.0]];
        let u: Mat<f32> = mat![[1.0, 1.0, 1.0, 1.0], [0.0, 1.0, 2.0, 3.0]];
        let out = op.krylov_transpose_multiply(v.as_ref(), u.as_ref()).unwrap();
        assert_tensor_eq(
            &out,
            &[
                &[&[0.0, 2.0, 2.0, 0.0], &[6.0, 0.0, -4.0, -6.0]],
                &[&[-2.0, 2.0, 4.0, 2.0], &[14.0, 8.0, 0.0, -8.0]],
            ],
        );
    }

    #[test]
    fn test_circulant_rank_one_literals() {
        let op = ToeplitzOperator::new(4, 1.0, 2, 1).unwrap();
        let v: Mat<f32> = mat![[0.0, 1.0, 0.0, -1.0]];
        let u: Mat<f32> = mat![[1.0, 1.0, 1.0, 1.0], [0.0, 1.0, 2.0, 3.0]];

        let out = op.krylov_transpose_multiply(v.as_ref(), u.as_ref()).unwrap();
        assert_tensor_eq(&out, &[&[&[0.0, 0.0, 0.0, 0.0]], &[&[-2.0, 2.0, 2.0, -2.0]]]);

        let w = Tensor3::from_fn(2, 1, 4, |b, _, j| u[(b, j)]);
        let y = op.krylov_multiply(v.as_ref(), &w).unwrap();
        let expected = [[0.0, 0.0, 0.0, 0.0], [2.0, -2.0, -2.0, 2.0]];
        for b in 0..2 {
            for j in 0..4 {
                assert!((y[(b, j)] - expected[b][j]).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_circulant_transpose_symmetric_literal() {
        let op = ToeplitzOperator::new(4, 1.0, 2, 2).unwrap();
        let a: Mat<f32> = mat![[1.0, 1.0, 1.0, 1.0], [0.0, 1.0, 2.0, 3.0]];
        let out = op.krylov_transpose_multiply(a.as_ref(), a.as_ref()).unwrap();
        assert_tensor_eq(
            &out,
            &[
                &[&[4.0, 4.0, 4.0, 4.0], &[6.0, 6.0, 6.0, 6.0]],
                &[&[6.0, 6.0, 6.0, 6.0], &[14.0, 8.0, 6.0, 8.0]],
            ],
        );
    }

    #[test]
    fn test_products_match_dense_krylov_for_general_f() {
        use crate::algorithms::krylov::DenseKrylovOperator;
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut rng = StdRng::seed_from_u64(23);
        let n = 16;
        for f in [1.0f32, -1.0, 0.5, -2.0, 0.0] {
            let op = ToeplitzOperator::new(n, f, 3, 2).unwrap();
            let dense = DenseKrylovOperator::new(op.to_dense().unwrap()).unwrap();
            let v = Mat::from_fn(2, n, |_, _| rng.random::<f32>() - 0.5);
            let u = Mat::from_fn(3, n, |_, _| rng.random::<f32>() - 0.5);

            let fast = op.krylov_transpose_multiply(v.as_ref(), u.as_ref()).unwrap();
            let slow = dense.krylov_transpose_multiply(v.as_ref(), u.as_ref()).unwrap();
            for (a, b) in fast.as_slice().iter().zip(slow.as_slice()) {
                assert!((a - b).abs() < 1e-3, "f={f}: {a} vs {b}");
            }

            let fast = op.krylov_multiply(v.as_ref(), &slow).unwrap();
            let slow = dense.krylov_multiply(v.as_ref(), &slow).unwrap();
            assert!((fast.as_ref() - slow.as_ref()).norm_l2() <= 1e-3 * slow.norm_l2());
        }
    }
}
