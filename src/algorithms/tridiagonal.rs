//! Krylov products for tridiagonal operators, optionally closed by two corners.
//!
//! A tridiagonal `A` couples both neighbours, so its powers do not split into a
//! single crossing term the way the subdiagonal ones do. The products are computed
//! from explicit Krylov matrices, built with one O(n) application per column.
//! When the diagonal, the superdiagonal and the lower-left corner all vanish the
//! operator is subdiagonal, and the products go through
//! [`super::subdiagonal::SubdiagonalOperator`] instead.

use super::krylov::{build_krylov, explicit_multiply, explicit_transpose_multiply};
use super::subdiagonal::SubdiagonalOperator;
use super::{KrylovOperator, check_forward_operands, check_transpose_operands};
use crate::error::{KrylovError, KrylovErrorKind, ensure_dim, ensure_power_of_two};
use crate::matrix::Tensor3;
use faer::{Mat, MatRef};

/// The coefficients of a tridiagonal operator of size `n = diag.len()`.
///
/// `subd[i] = A[i+1, i]`, `diag[i] = A[i, i]`, `supd[i] = A[i, i+1]`, and
/// `corners = (A[0, n-1], A[n-1, 0])` when the recurrence is cyclic.
#[derive(Clone, Debug, PartialEq)]
pub struct TridiagonalCoefficients {
    pub subd: Vec<f32>,
    pub diag: Vec<f32>,
    pub supd: Vec<f32>,
    pub corners: Option<(f32, f32)>,
}

impl TridiagonalCoefficients {
    /// The subdiagonal shift of size `n` with unit subdiagonal and zero elsewhere.
    pub fn shift(n: usize) -> Self {
        Self {
            subd: vec![1.0; n.saturating_sub(1)],
            diag: vec![0.0; n],
            supd: vec![0.0; n.saturating_sub(1)],
            corners: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.diag.len()
    }

    /// Checks that the three bands agree on `n` and that `n` is a power of two.
    pub fn validate(&self) -> Result<usize, KrylovError> {
        let n = self.diag.len();
        ensure_power_of_two(n)?;
        ensure_dim("length of the subdiagonal", n - 1, self.subd.len())?;
        ensure_dim("length of the superdiagonal", n - 1, self.supd.len())?;
        Ok(n)
    }

    fn is_subdiagonal(&self) -> bool {
        self.diag.iter().all(|&d| d == 0.0)
            && self.supd.iter().all(|&s| s == 0.0)
            && self.corners.is_none_or(|(_, lower_left)| lower_left == 0.0)
    }
}

#[derive(Clone, Debug)]
pub struct TridiagonalOperator {
    coeffs: TridiagonalCoefficients,
    subdiagonal: Option<SubdiagonalOperator>,
}

impl TridiagonalOperator {
    pub fn new(coeffs: TridiagonalCoefficients) -> Result<Self, KrylovError> {
        let n = coeffs.validate()?;
        if n == 1 && coeffs.corners.is_some_and(|(a, b)| a != 0.0 || b != 0.0) {
            return Err(KrylovErrorKind::invalid_size(
                "a 1×1 operator has no off-diagonal corners",
            )
            .into());
        }
        let subdiagonal = if coeffs.is_subdiagonal() {
            let corner = coeffs.corners.map(|(upper_right, _)| upper_right);
            Some(SubdiagonalOperator::new(coeffs.subd.clone(), corner)?)
        } else {
            None
        };
        log::debug!(
            "Planned tridiagonal operator: n={n}, corners={:?}, subdiagonal path={}",
            coeffs.corners,
            subdiagonal.is_some()
        );
        Ok(Self {
            coeffs,
            subdiagonal,
        })
    }

    pub fn coefficients(&self) -> &TridiagonalCoefficients {
        &self.coeffs
    }

    fn krylov(&self, seed: &[f32]) -> Result<Mat<f32>, KrylovError> {
        build_krylov(|x| self.apply_vec(x), seed, self.dim())
    }
}

impl KrylovOperator for TridiagonalOperator {
    fn dim(&self) -> usize {
        self.coeffs.dim()
    }

    fn apply_vec(&self, x: &[f32]) -> Result<Vec<f32>, KrylovError> {
        let c = &self.coeffs;
        let n = c.dim();
        ensure_dim("length of the vector", n, x.len())?;
        let mut y: Vec<f32> = x.iter().zip(&c.diag).map(|(a, d)| a * d).collect();
        for i in 0..n - 1 {
            y[i + 1] += c.subd[i] * x[i];
            y[i] += c.supd[i] * x[i + 1];
        }
        if let Some((upper_right, lower_left)) = c.corners {
            y[0] += upper_right * x[n - 1];
            y[n - 1] += lower_left * x[0];
        }
        Ok(y)
    }

    fn krylov_transpose_multiply(
        &self,
        v: MatRef<'_, f32>,
        u: MatRef<'_, f32>,
    ) -> Result<Tensor3, KrylovError> {
        if let Some(op) = &self.subdiagonal {
            return op.krylov_transpose_multiply(v, u);
        }
        check_transpose_operands(self.dim(), v, u)?;
        explicit_transpose_multiply(|seed| self.krylov(seed), v, u)
    }

    fn krylov_multiply(&self, v: MatRef<'_, f32>, w: &Tensor3) -> Result<Mat<f32>, KrylovError> {
        if let Some(op) = &self.subdiagonal {
            return op.krylov_multiply(v, w);
        }
        check_forward_operands(self.dim(), v, w)?;
        explicit_multiply(|seed| self.krylov(seed), v, w)
    }

    fn reflected(&self) -> Box<dyn KrylovOperator> {
        let c = &self.coeffs;
        let reversed = |x: &[f32]| x.iter().rev().copied().collect::<Vec<_>>();
        Box::new(Self {
            coeffs: TridiagonalCoefficients {
                subd: reversed(&c.subd),
                diag: reversed(&c.diag),
                supd: reversed(&c.supd),
                corners: c.corners,
            },
            subdiagonal: self
                .subdiagonal
                .as_ref()
                .map(SubdiagonalOperator::reversed),
        })
    }
}
