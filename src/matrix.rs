//! Dense shapes that flow through the engine, and the vector action of explicit matrices.
//!
//! Explicit Krylov matrices only need `A` through its action on a vector. For dense
//! `faer` matrices that action is [`LinearOperator`]; the dense references in
//! [`crate::reference`] build their Krylov matrices through it.
//!
//! Batches of input vectors and the displacement factors `G`, `H` are plain
//! `faer::Mat<f32>` values with one vector per row. The only three-dimensional
//! quantity, the batch×rank×n output of a transpose-Krylov multiply, is held in
//! [`Tensor3`].

use crate::error::{KrylovError, KrylovErrorKind, ensure_dim};
use faer::{Mat, MatRef};

/// The action of a matrix on single vectors, as consumed by [`crate::algorithms::krylov::krylov_of`].
///
/// Implemented for borrowed and owned `faer` matrices. The structured operators
/// expose the same action through [`crate::algorithms::KrylovOperator::apply_vec`].
///
/// # Example
///
/// ```
/// use faer::mat;
/// use ldr_krylov::matrix::LinearOperator;
///
/// let a = mat![[0.0f32, 0.0], [2.0, 0.0]];
/// assert_eq!(a.apply_vec(&[1.0, 0.0]).unwrap(), vec![0.0, 2.0]);
/// assert!(a.apply_vec(&[1.0, 0.0, 0.0]).is_err());
/// ```
pub trait LinearOperator {
    fn nrows(&self) -> usize;

    fn ncols(&self) -> usize;

    /// Computes `A x`. Fails with `ShapeMismatch` unless `x.len() == ncols()`.
    fn apply_vec(&self, x: &[f32]) -> Result<Vec<f32>, KrylovError>;
}

impl LinearOperator for MatRef<'_, f32> {
    #[inline]
    fn nrows(&self) -> usize {
        self.nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn apply_vec(&self, x: &[f32]) -> Result<Vec<f32>, KrylovError> {
        ensure_dim("length of the vector", self.ncols(), x.len())?;
        let mut y = vec![0.0; self.nrows()];
        // Column-major storage, so walk one column at a time.
        for (j, &xj) in x.iter().enumerate() {
            for (i, yi) in y.iter_mut().enumerate() {
                *yi += self[(i, j)] * xj;
            }
        }
        Ok(y)
    }
}

impl LinearOperator for Mat<f32> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    #[inline]
    fn apply_vec(&self, x: &[f32]) -> Result<Vec<f32>, KrylovError> {
        self.as_ref().apply_vec(x)
    }
}

/// A dense batch×rank×n tensor in row-major order.
///
/// Entry `(b, r, j)` of a transpose-Krylov product is `u_bᵀ A^j v_r`; the length-n
/// sequence for a fixed `(b, r)` is contiguous and exposed through [`Tensor3::seq`].
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor3 {
    batch: usize,
    rank: usize,
    n: usize,
    data: Vec<f32>,
}

impl Tensor3 {
    pub fn zeros(batch: usize, rank: usize, n: usize) -> Self {
        Self {
            batch,
            rank,
            n,
            data: vec![0.0; batch * rank * n],
        }
    }

    pub fn from_fn(
        batch: usize,
        rank: usize,
        n: usize,
        mut f: impl FnMut(usize, usize, usize) -> f32,
    ) -> Self {
        let mut data = Vec::with_capacity(batch * rank * n);
        for b in 0..batch {
            for r in 0..rank {
                for j in 0..n {
                    data.push(f(b, r, j));
                }
            }
        }
        Self {
            batch,
            rank,
            n,
            data,
        }
    }

    /// Wraps a row-major buffer, checking its length against the shape.
    pub fn from_vec(batch: usize, rank: usize, n: usize, data: Vec<f32>) -> Result<Self, KrylovError> {
        if data.len() != batch * rank * n {
            return Err(
                KrylovErrorKind::shape_mismatch("Tensor3 buffer length", batch * rank * n, data.len())
                    .into(),
            );
        }
        Ok(Self {
            batch,
            rank,
            n,
            data,
        })
    }

    #[inline]
    pub fn batch(&self) -> usize {
        self.batch
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, b: usize, r: usize, j: usize) -> f32 {
        self.data[(b * self.rank + r) * self.n + j]
    }

    /// The length-n sequence stored at `(b, r)`.
    #[inline]
    pub fn seq(&self, b: usize, r: usize) -> &[f32] {
        let start = (b * self.rank + r) * self.n;
        &self.data[start..start + self.n]
    }

    #[inline]
    pub fn seq_mut(&mut self, b: usize, r: usize) -> &mut [f32] {
        let start = (b * self.rank + r) * self.n;
        &mut self.data[start..start + self.n]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Swaps the batch and rank axes.
    pub fn swap_batch_rank(&self) -> Tensor3 {
        Tensor3::from_fn(self.rank, self.batch, self.n, |r, b, j| self.get(b, r, j))
    }

    /// Reduces the rank axis by summation, giving a batch×n matrix.
    pub fn sum_over_rank(&self) -> Mat<f32> {
        let mut out = Mat::<f32>::zeros(self.batch, self.n);
        for b in 0..self.batch {
            for r in 0..self.rank {
                for (j, &value) in self.seq(b, r).iter().enumerate() {
                    out[(b, j)] += value;
                }
            }
        }
        out
    }

    /// Sum of elementwise products with another tensor of the same shape.
    pub fn dot(&self, other: &Tensor3) -> f32 {
        self.data.iter().zip(&other.data).map(|(a, b)| a * b).sum()
    }
}

/// Copies row `i` of `m` into a vector.
pub(crate) fn row_vec(m: MatRef<'_, f32>, i: usize) -> Vec<f32> {
    (0..m.ncols()).map(|j| m[(i, j)]).collect()
}

/// Returns `m` with every row reversed, i.e. `m·J` for the exchange matrix `J`.
pub(crate) fn reverse_rows(m: MatRef<'_, f32>) -> Mat<f32> {
    let n = m.ncols();
    Mat::from_fn(m.nrows(), n, |i, j| m[(i, n - 1 - j)])
}

/// Sum of elementwise products of two equally shaped matrices.
pub fn frobenius_dot(a: MatRef<'_, f32>, b: MatRef<'_, f32>) -> f32 {
    let mut acc = 0.0;
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            acc += a[(i, j)] * b[(i, j)];
        }
    }
    acc
}

// Unit tests for the vector action of dense matrices and the tensor helpers.
#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_apply_vec_matches_faer_product() {
        let matrix: Mat<f32> = mat![[2.0, -1.0, 0.0], [-1.0, 2.0, -1.0], [0.5, -1.0, 2.0]];
        let x = [1.0, 2.0, 3.0];
        let column = Mat::from_fn(3, 1, |i, _| x[i]);
        let expected = &matrix * &column;

        let owned = matrix.apply_vec(&x).unwrap();
        let borrowed = matrix.as_ref().apply_vec(&x).unwrap();
        assert_eq!(owned, borrowed);
        for i in 0..3 {
            assert!((owned[i] - expected[(i, 0)]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_apply_vec_of_rectangular_matrix() {
        let matrix: Mat<f32> = mat![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let operator: &dyn LinearOperator = &matrix;
        assert_eq!((operator.nrows(), operator.ncols()), (2, 3));
        assert_eq!(operator.apply_vec(&[1.0, 0.0, -1.0]).unwrap(), vec![-2.0, -2.0]);
    }

    #[test]
    fn test_apply_vec_rejects_wrong_length() {
        let matrix: Mat<f32> = mat![[1.0, 0.0], [0.0, 1.0]];
        let err = matrix.as_ref().apply_vec(&[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err.kind(),
            &KrylovErrorKind::ShapeMismatch {
                what: "length of the vector".to_string(),
                expected: 2,
                actual: 3,
            }
        );
    }

    #[test]
    fn test_tensor3_layout_and_reductions() {
        let t = Tensor3::from_fn(2, 3, 4, |b, r, j| (100 * b + 10 * r + j) as f32);
        assert_eq!(t.get(1, 2, 3), 123.0);
        assert_eq!(t.seq(1, 0), &[100.0, 101.0, 102.0, 103.0]);

        let swapped = t.swap_batch_rank();
        assert_eq!((swapped.batch(), swapped.rank(), swapped.n()), (3, 2, 4));
        assert_eq!(swapped.get(2, 1, 3), 123.0);

        let summed = t.sum_over_rank();
        assert_eq!(summed[(0, 1)], 1.0 + 11.0 + 21.0);
        assert_eq!(summed[(1, 0)], 100.0 + 110.0 + 120.0);
    }

    #[test]
    fn test_tensor3_from_vec_rejects_wrong_length() {
        let err = Tensor3::from_vec(2, 2, 2, vec![0.0; 7]).unwrap_err();
        assert!(matches!(err.kind(), KrylovErrorKind::ShapeMismatch { .. }));
    }

    #[test]
    fn test_reverse_rows() {
        let m: Mat<f32> = mat![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let r = reverse_rows(m.as_ref());
        let expected: Mat<f32> = mat![[3.0, 2.0, 1.0], [6.0, 5.0, 4.0]];
        assert_eq!(r, expected);
    }
}
