//! Krylov products for a diagonal operator `A = diag(d)`.
//!
//! `Krylov(diag(d), v)` is `diag(v)` times the Vandermonde matrix `V[i, j] = d_i^j`,
//! so both products are a single dense product with `V` after an elementwise scaling.

use super::{KrylovOperator, check_forward_operands, check_transpose_operands};
use crate::error::{KrylovError, KrylovErrorKind, ensure_dim};
use crate::matrix::Tensor3;
use faer::{Mat, MatRef};

#[derive(Clone, Debug)]
pub struct DiagonalOperator {
    diag: Vec<f32>,
}

impl DiagonalOperator {
    pub fn new(diag: Vec<f32>) -> Result<Self, KrylovError> {
        if diag.is_empty() {
            return Err(KrylovErrorKind::invalid_size("diagonal operator must be non-empty").into());
        }
        Ok(Self { diag })
    }

    pub fn diag(&self) -> &[f32] {
        &self.diag
    }

    /// The n×n Vandermonde matrix `V[i, j] = d_i^j`.
    fn vandermonde(&self) -> Mat<f32> {
        let n = self.diag.len();
        let mut v = Mat::<f32>::zeros(n, n);
        for (i, &d) in self.diag.iter().enumerate() {
            let mut power = 1.0;
            for j in 0..n {
                v[(i, j)] = power;
                power *= d;
            }
        }
        v
    }
}

impl KrylovOperator for DiagonalOperator {
    fn dim(&self) -> usize {
        self.diag.len()
    }

    fn apply_vec(&self, x: &[f32]) -> Result<Vec<f32>, KrylovError> {
        ensure_dim("length of the vector", self.dim(), x.len())?;
        Ok(x.iter().zip(&self.diag).map(|(a, d)| a * d).collect())
    }

    fn krylov_transpose_multiply(
        &self,
        v: MatRef<'_, f32>,
        u: MatRef<'_, f32>,
    ) -> Result<Tensor3, KrylovError> {
        let n = self.dim();
        check_transpose_operands(n, v, u)?;
        let (batch, rank) = (u.nrows(), v.nrows());
        // out[b, r, :] = (u_b ⊙ v_r)ᵀ V
        let products = Mat::from_fn(batch * rank, n, |row, i| {
            u[(row / rank, i)] * v[(row % rank, i)]
        });
        let vandermonde = self.vandermonde();
        let out = products.as_ref() * vandermonde.as_ref();
        Ok(Tensor3::from_fn(batch, rank, n, |b, r, j| out[(b * rank + r, j)]))
    }

    fn krylov_multiply(&self, v: MatRef<'_, f32>, w: &Tensor3) -> Result<Mat<f32>, KrylovError> {
        let n = self.dim();
        check_forward_operands(n, v, w)?;
        let (batch, rank) = (w.batch(), w.rank());
        // Row (b, r) of W Vᵀ is Σ_j w[b, r, j] d^j.
        let w_mat = Mat::from_fn(batch * rank, n, |row, j| w.get(row / rank, row % rank, j));
        let vandermonde = self.vandermonde();
        let powers = w_mat.as_ref() * vandermonde.transpose();
        let mut out = Mat::<f32>::zeros(batch, n);
        for b in 0..batch {
            for r in 0..rank {
                for i in 0..n {
                    out[(b, i)] += v[(r, i)] * powers[(b * rank + r, i)];
                }
            }
        }
        Ok(out)
    }

    fn reflected(&self) -> Box<dyn KrylovOperator> {
        Box::new(Self {
            diag: self.diag.iter().rev().copied().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::krylov::DenseKrylovOperator;
    use faer::mat;

    #[test]
    fn test_transpose_product_literal() {
        let op = DiagonalOperator::new(vec![1.0, 2.0]).unwrap();
        let v: Mat<f32> = mat![[1.0, 1.0]];
        let u: Mat<f32> = mat![[1.0, 3.0]];
        // u·v = 1 + 3, u·Av = 1 + 6
        let out = op.krylov_transpose_multiply(v.as_ref(), u.as_ref()).unwrap();
        assert_eq!(out.seq(0, 0), &[4.0, 7.0]);
    }

    #[test]
    fn test_products_match_dense_krylov() {
        let op = DiagonalOperator::new(vec![0.5, -1.0, 1.5, 0.25]).unwrap();
        let dense = DenseKrylovOperator::new(op.to_dense().unwrap()).unwrap();
        let v: Mat<f32> = mat![[1.0, 2.0, -1.0, 0.5], [0.0, 1.0, 1.0, 1.0]];
        let u: Mat<f32> = mat![[1.0, 0.0, 2.0, -1.0], [0.5, 0.5, 0.5, 0.5], [1.0, 1.0, 0.0, 0.0]];

        let fast = op.krylov_transpose_multiply(v.as_ref(), u.as_ref()).unwrap();
        let slow = dense.krylov_transpose_multiply(v.as_ref(), u.as_ref()).unwrap();
        for (a, b) in fast.as_slice().iter().zip(slow.as_slice()) {
            assert!((a - b).abs() < 1e-4);
        }

        let fast = op.krylov_multiply(v.as_ref(), &slow).unwrap();
        let slow = dense.krylov_multiply(v.as_ref(), &slow).unwrap();
        assert!((fast.as_ref() - slow.as_ref()).norm_l2() < 1e-4 * slow.norm_l2().max(1.0));
    }
}
