//! Fast Krylov products for the structured displacement operators.
//!
//! Most callers want the high-level functions in [`crate::solvers`]. The operators here
//! are for callers that reuse one operator across many products or need the two Krylov
//! halves separately.
//!
//! Every operator family implements [`KrylovOperator`], which exposes the two dual
//! products every displacement multiply is assembled from:
//!
//! - the transpose product `Krylov(A, v_r)ᵀ u_b`, a batch×rank×n tensor, and
//! - the forward product `Σ_r Krylov(A, v_r) w_{b,r}`, a batch×n matrix.
//!
//! | Family | Module | Cost per product |
//! |---|---|---|
//! | f-circulant `Z_f` | [`toeplitz`] | O(b·r·n log n) |
//! | subdiagonal (+corner) | [`subdiagonal`] | O(b·r·n log² n) |
//! | tridiagonal (+corners) | [`tridiagonal`] | O(r·n² + b·r·n²) |
//! | diagonal | [`diagonal`] | O(r·n² + b·r·n²) |
//! | dense | [`krylov`] | O(r·n³) |

use crate::error::{KrylovError, ensure_dim};
use crate::matrix::Tensor3;
use faer::{Mat, MatRef};

pub mod convolution;
pub mod diagonal;
pub mod krylov;
pub mod subdiagonal;
pub mod toeplitz;
pub mod tridiagonal;

/// An n×n operator `A` whose Krylov matrices can be multiplied without being formed.
///
/// Seeds `v` are passed as a rank×n matrix (one seed per row), inputs `u` as a
/// batch×n matrix (one input per row).
pub trait KrylovOperator: std::fmt::Debug {
    /// The dimension `n` of the operator.
    fn dim(&self) -> usize;

    /// Applies `A` to a single vector of length `n`.
    fn apply_vec(&self, x: &[f32]) -> Result<Vec<f32>, KrylovError>;

    /// Computes `out[b, r, j] = u_bᵀ A^j v_r` for `j` in `0..n`.
    fn krylov_transpose_multiply(
        &self,
        v: MatRef<'_, f32>,
        u: MatRef<'_, f32>,
    ) -> Result<Tensor3, KrylovError>;

    /// Computes `out_b = Σ_r Σ_j w[b, r, j] A^j v_r`.
    fn krylov_multiply(&self, v: MatRef<'_, f32>, w: &Tensor3) -> Result<Mat<f32>, KrylovError>;

    /// The persymmetric flip `J Aᵀ J` as an operator of the same family.
    ///
    /// For the structured families this reverses every coefficient array and keeps
    /// the corners, which is all the gradient of a Krylov product with respect to
    /// its seeds needs.
    fn reflected(&self) -> Box<dyn KrylovOperator>;

    /// The explicit n×n matrix of `A`, column `j` being `A e_j`.
    fn to_dense(&self) -> Result<Mat<f32>, KrylovError> {
        let n = self.dim();
        let mut out = Mat::<f32>::zeros(n, n);
        let mut e = vec![0.0; n];
        for j in 0..n {
            e[j] = 1.0;
            for (i, value) in self.apply_vec(&e)?.into_iter().enumerate() {
                out[(i, j)] = value;
            }
            e[j] = 0.0;
        }
        Ok(out)
    }
}

/// Checks the operands of a transpose-Krylov product against an operator of size `n`.
pub(crate) fn check_transpose_operands(
    n: usize,
    v: MatRef<'_, f32>,
    u: MatRef<'_, f32>,
) -> Result<(), KrylovError> {
    ensure_dim("length of the seeds v", n, v.ncols())?;
    ensure_dim("length of the inputs u", n, u.ncols())
}

/// Checks the operands of a forward Krylov product against an operator of size `n`.
pub(crate) fn check_forward_operands(
    n: usize,
    v: MatRef<'_, f32>,
    w: &Tensor3,
) -> Result<(), KrylovError> {
    ensure_dim("length of the seeds v", n, v.ncols())?;
    ensure_dim("rank of w", v.nrows(), w.rank())?;
    ensure_dim("length of w", n, w.n())
}

/// Copies the rows of `m` into one contiguous row-major buffer.
pub(crate) fn rows_to_vec(m: MatRef<'_, f32>) -> Vec<f32> {
    let mut out = Vec::with_capacity(m.nrows() * m.ncols());
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            out.push(m[(i, j)]);
        }
    }
    out
}
