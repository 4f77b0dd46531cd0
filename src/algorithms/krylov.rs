//! Explicit Krylov matrices.
//!
//! [`build_krylov`] materialises `K(A, v) = [v, Av, A²v, …]` by iterated application
//! of an arbitrary callable. It costs O(n) operator applications and O(n²) memory, so
//! it serves as the correctness oracle for the fast paths and as the engine behind
//! [`DenseKrylovOperator`], never as a performance path.

use super::{KrylovOperator, check_forward_operands, check_transpose_operands};
use crate::error::{KrylovError, KrylovErrorKind, ensure_dim};
use crate::matrix::{LinearOperator, Tensor3, row_vec};
use faer::{Accum, Mat, MatRef, Par, linalg::matmul::matmul};

/// Builds the n×`steps` matrix whose column `i` is `A^i v`.
///
/// # Arguments
/// * `apply_a`: Left multiplication by `A`. Must map length-n vectors to length-n vectors;
///   an error it returns is passed through unchanged.
/// * `v`: The seed vector.
/// * `steps`: The number of columns. Must satisfy `1 <= steps <= n`.
///
/// # Returns
/// The Krylov matrix, or an error if `v` is empty, `steps` is out of range, or
/// `apply_a` fails or changes the length of its argument.
pub fn build_krylov<F>(mut apply_a: F, v: &[f32], steps: usize) -> Result<Mat<f32>, KrylovError>
where
    F: FnMut(&[f32]) -> Result<Vec<f32>, KrylovError>,
{
    let n = v.len();
    if n == 0 {
        return Err(KrylovErrorKind::invalid_size("Krylov seed vector must be non-empty").into());
    }
    if steps == 0 || steps > n {
        return Err(KrylovErrorKind::invalid_size(format!(
            "Krylov steps must lie in 1..={n}, got {steps}"
        ))
        .into());
    }

    let mut k = Mat::<f32>::zeros(n, steps);
    let mut current = v.to_vec();
    for col in 0..steps {
        if col > 0 {
            current = apply_a(&current)?;
            ensure_dim("output length of the Krylov operator", n, current.len())?;
        }
        for (i, &value) in current.iter().enumerate() {
            k[(i, col)] = value;
        }
    }
    Ok(k)
}

/// Builds the Krylov matrix of a square [`LinearOperator`].
pub fn krylov_of<O: LinearOperator + ?Sized>(
    operator: &O,
    v: &[f32],
    steps: usize,
) -> Result<Mat<f32>, KrylovError> {
    ensure_dim("columns of a square operator", operator.nrows(), operator.ncols())?;
    ensure_dim("length of the Krylov seed", operator.ncols(), v.len())?;
    build_krylov(|x| operator.apply_vec(x), v, steps)
}

/// Transpose-Krylov product through one explicit Krylov matrix per seed.
///
/// `krylov` maps a seed to its n×n Krylov matrix; operands are assumed checked.
pub(crate) fn explicit_transpose_multiply<F>(
    mut krylov: F,
    v: MatRef<'_, f32>,
    u: MatRef<'_, f32>,
) -> Result<Tensor3, KrylovError>
where
    F: FnMut(&[f32]) -> Result<Mat<f32>, KrylovError>,
{
    let n = u.ncols();
    let mut out = Tensor3::zeros(u.nrows(), v.nrows(), n);
    for r in 0..v.nrows() {
        let k = krylov(&row_vec(v, r))?;
        // (n×n)ᵀ · (n×batch): column b holds u_bᵀ K.
        let kt_u = k.transpose() * u.transpose();
        for b in 0..u.nrows() {
            for (j, value) in out.seq_mut(b, r).iter_mut().enumerate() {
                *value = kt_u[(j, b)];
            }
        }
    }
    Ok(out)
}

/// Forward Krylov product through one explicit Krylov matrix per seed.
pub(crate) fn explicit_multiply<F>(
    mut krylov: F,
    v: MatRef<'_, f32>,
    w: &Tensor3,
) -> Result<Mat<f32>, KrylovError>
where
    F: FnMut(&[f32]) -> Result<Mat<f32>, KrylovError>,
{
    let (n, batch) = (w.n(), w.batch());
    let mut out_t = Mat::<f32>::zeros(n, batch);
    for r in 0..v.nrows() {
        let k = krylov(&row_vec(v, r))?;
        let w_r = Mat::from_fn(n, batch, |j, b| w.get(b, r, j));
        matmul(out_t.as_mut(), Accum::Add, k.as_ref(), w_r.as_ref(), 1.0, Par::Seq);
    }
    Ok(out_t.transpose().to_owned())
}

/// A dense matrix used as a Krylov operator by materialising every Krylov matrix.
///
/// Accepts any square matrix; used as the reference counterpart of the structured
/// families and as the generic operator in the displacement identities.
#[derive(Clone, Debug)]
pub struct DenseKrylovOperator {
    a: Mat<f32>,
}

impl DenseKrylovOperator {
    pub fn new(a: Mat<f32>) -> Result<Self, KrylovError> {
        if a.nrows() == 0 {
            return Err(KrylovErrorKind::invalid_size("dense operator must be non-empty").into());
        }
        ensure_dim("columns of a square operator", a.nrows(), a.ncols())?;
        Ok(Self { a })
    }

    pub fn matrix(&self) -> MatRef<'_, f32> {
        self.a.as_ref()
    }

    fn krylov(&self, seed: &[f32]) -> Result<Mat<f32>, KrylovError> {
        krylov_of(&self.a, seed, self.a.nrows())
    }
}

impl KrylovOperator for DenseKrylovOperator {
    fn dim(&self) -> usize {
        self.a.nrows()
    }

    fn apply_vec(&self, x: &[f32]) -> Result<Vec<f32>, KrylovError> {
        self.a.as_ref().apply_vec(x)
    }

    fn krylov_transpose_multiply(
        &self,
        v: MatRef<'_, f32>,
        u: MatRef<'_, f32>,
    ) -> Result<Tensor3, KrylovError> {
        check_transpose_operands(self.dim(), v, u)?;
        explicit_transpose_multiply(|seed| self.krylov(seed), v, u)
    }

    fn krylov_multiply(&self, v: MatRef<'_, f32>, w: &Tensor3) -> Result<Mat<f32>, KrylovError> {
        check_forward_operands(self.dim(), v, w)?;
        explicit_multiply(|seed| self.krylov(seed), v, w)
    }

    fn reflected(&self) -> Box<dyn KrylovOperator> {
        let n = self.dim();
        Box::new(Self {
            a: Mat::from_fn(n, n, |i, j| self.a[(n - 1 - j, n - 1 - i)]),
        })
    }

    fn to_dense(&self) -> Result<Mat<f32>, KrylovError> {
        Ok(self.a.clone())
    }
}
