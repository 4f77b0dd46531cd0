//! Dense reference implementations.
//!
//! Everything in this module materialises n×n matrices and runs in O(r·n³) time at
//! worst. These functions exist to validate the fast paths of [`crate::solvers`] and
//! are never called by them.

use crate::{
    algorithms::{
        KrylovOperator,
        krylov::{build_krylov, krylov_of},
        subdiagonal::SubdiagonalOperator,
        tridiagonal::{TridiagonalCoefficients, TridiagonalOperator},
    },
    error::{KrylovError, KrylovErrorKind, ensure_dim},
    matrix::row_vec,
};
use faer::{Accum, Mat, MatRef, Par, linalg::matmul::matmul, prelude::Solve};

/// Builds the n×m matrix whose column `i` is `Z_f^i v`, by repeated shift-and-scale.
pub fn krylov_construct(f: f32, v: &[f32], m: usize) -> Result<Mat<f32>, KrylovError> {
    let shift = |x: &[f32]| -> Result<Vec<f32>, KrylovError> {
        let n = x.len();
        let mut y = Vec::with_capacity(n);
        y.push(f * x[n - 1]);
        y.extend_from_slice(&x[..n - 1]);
        Ok(y)
    };
    build_krylov(shift, v, m)
}

fn check_factor_shapes(g: MatRef<'_, f32>, h: MatRef<'_, f32>, x: MatRef<'_, f32>) -> Result<usize, KrylovError> {
    if g.nrows() != h.nrows() || g.ncols() != h.ncols() {
        return Err(KrylovErrorKind::invalid_size("G and H must have matching rank and dimension").into());
    }
    ensure_dim("length of the input x", g.ncols(), x.ncols())?;
    Ok(g.ncols())
}

/// Accumulates `Σ_r K_a(G_r) K_b(H_r)ᵀ xᵀ` and returns its transpose, batch×n.
fn accumulate_products<Fa, Fb>(
    mut krylov_a: Fa,
    mut krylov_b: Fb,
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
) -> Result<Mat<f32>, KrylovError>
where
    Fa: FnMut(&[f32]) -> Result<Mat<f32>, KrylovError>,
    Fb: FnMut(&[f32]) -> Result<Mat<f32>, KrylovError>,
{
    let n = g.ncols();
    let mut out_t = Mat::<f32>::zeros(n, x.nrows());
    for r in 0..g.nrows() {
        let k_g = krylov_a(&row_vec(g, r))?;
        let k_h = krylov_b(&row_vec(h, r))?;
        let kh_x = k_h.transpose() * x.transpose();
        matmul(out_t.as_mut(), Accum::Add, k_g.as_ref(), kh_x.as_ref(), 1.0, Par::Seq);
    }
    Ok(out_t.transpose().to_owned())
}

/// Dense counterpart of [`crate::solvers::toeplitz_mult`].
pub fn toeplitz_mult_slow(
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
    cycle: bool,
) -> Result<Mat<f32>, KrylovError> {
    let n = check_factor_shapes(g, h, x)?;
    let (f_a, f_b) = if cycle { (1.0, -1.0) } else { (0.0, 0.0) };
    accumulate_products(
        |v| krylov_construct(f_a, v, n),
        |v| krylov_construct(f_b, v, n),
        g,
        h,
        x,
    )
}

/// Computes `Σ_r Krylov(A, G_r) Krylov(B, H_r)ᵀ x` for two explicit matrices.
pub fn dense_displacement_multiply(
    a: MatRef<'_, f32>,
    b: MatRef<'_, f32>,
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
) -> Result<Mat<f32>, KrylovError> {
    let n = check_factor_shapes(g, h, x)?;
    accumulate_products(|v| krylov_of(&a, v, n), |v| krylov_of(&b, v, n), g, h, x)
}

/// The explicit matrix `M = Σ_r Krylov(A, G_r) Krylov(B, H_r)ᵀ`.
pub fn dense_displacement_matrix(
    a: MatRef<'_, f32>,
    b: MatRef<'_, f32>,
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
) -> Result<Mat<f32>, KrylovError> {
    let n = g.ncols();
    let identity = Mat::<f32>::identity(n, n);
    Ok(dense_displacement_multiply(a, b, g, h, identity.as_ref())?
        .transpose()
        .to_owned())
}

/// Dense counterpart of [`crate::solvers::subdiagonal_multiply`].
pub fn subdiagonal_multiply_slow(
    subd_a: &[f32],
    subd_b: &[f32],
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
    corner_a: Option<f32>,
    corner_b: Option<f32>,
) -> Result<Mat<f32>, KrylovError> {
    let a = SubdiagonalOperator::new(subd_a.to_vec(), corner_a)?.to_dense()?;
    let b = SubdiagonalOperator::new(subd_b.to_vec(), corner_b)?.to_dense()?;
    dense_displacement_multiply(a.as_ref(), b.as_ref(), g, h, x)
}

/// Dense counterpart of [`crate::solvers::tridiagonal_multiply`].
pub fn tridiagonal_multiply_slow(
    a: &TridiagonalCoefficients,
    b: &TridiagonalCoefficients,
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
) -> Result<Mat<f32>, KrylovError> {
    let a = TridiagonalOperator::new(a.clone())?.to_dense()?;
    let b = TridiagonalOperator::new(b.clone())?.to_dense()?;
    dense_displacement_multiply(a.as_ref(), b.as_ref(), g, h, x)
}

/// Solves the Stein displacement equation `M − A M Bᵀ = (1 − f_A f_B) Gᵀ H` for `M`.
///
/// When `A^n = f_A I` and `B^n = f_B I`, the solution is the matrix applied by
/// [`crate::solvers::displacement_multiply`], which makes this an oracle independent
/// of any Krylov construction. The n²×n² Kronecker system
/// `(I − B ⊗ A) vec(M) = vec(RHS)` is solved by LU in double precision, so only small
/// `n` is practical. The system is singular when `f_A f_B` makes some product of
/// eigenvalues of `A` and `B` equal to one.
pub fn solve_displacement_dense(
    a: MatRef<'_, f32>,
    b: MatRef<'_, f32>,
    f_a: f32,
    f_b: f32,
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
) -> Result<Mat<f32>, KrylovError> {
    let n = a.nrows();
    ensure_dim("columns of a square operator", n, a.ncols())?;
    ensure_dim("dimension of operator B", n, b.nrows())?;
    ensure_dim("dimension of operator B", n, b.ncols())?;
    ensure_dim("length of G", n, g.ncols())?;
    if g.nrows() != h.nrows() || g.ncols() != h.ncols() {
        return Err(KrylovErrorKind::invalid_size("G and H must have matching rank and dimension").into());
    }

    let scale = 1.0 - f_a as f64 * f_b as f64;
    // vec() is column-major: M[i, j] sits at j·n + i.
    let system = Mat::<f64>::from_fn(n * n, n * n, |row, col| {
        let (p, i) = (row / n, row % n);
        let (q, j) = (col / n, col % n);
        let kron = b[(p, q)] as f64 * a[(i, j)] as f64;
        if row == col { 1.0 - kron } else { -kron }
    });
    let rhs = Mat::<f64>::from_fn(n * n, 1, |row, _| {
        let (j, i) = (row / n, row % n);
        let gh: f64 = (0..g.nrows())
            .map(|r| g[(r, i)] as f64 * h[(r, j)] as f64)
            .sum();
        scale * gh
    });
    let solution = system.partial_piv_lu().solve(&rhs);
    Ok(Mat::from_fn(n, n, |i, j| solution[(j * n + i, 0)] as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_krylov_construct_skew_shift() {
        let k = krylov_construct(-1.0, &[1.0, 2.0, 3.0], 3).unwrap();
        let expected: Mat<f32> = mat![[1.0, -3.0, -2.0], [2.0, 1.0, -3.0], [3.0, 2.0, 1.0]];
        assert_eq!(k, expected);
    }

    #[test]
    fn test_toeplitz_mult_slow_literals() {
        let g: Mat<f32> = mat![[0.0, 1.0, 0.0, -1.0], [0.0, 1.0, 2.0, 3.0]];
        let x: Mat<f32> = mat![[1.0, 1.0, 1.0, 1.0], [0.0, 1.0, 2.0, 3.0]];
        let cyclic = toeplitz_mult_slow(g.as_ref(), g.as_ref(), x.as_ref(), true).unwrap();
        let expected: Mat<f32> = mat![[-16.0, -20.0, -4.0, 16.0], [16.0, -8.0, 12.0, 64.0]];
        assert_eq!(cyclic, expected);
        let acyclic = toeplitz_mult_slow(g.as_ref(), g.as_ref(), x.as_ref(), false).unwrap();
        let expected: Mat<f32> = mat![[0.0, 6.0, 16.0, 26.0], [0.0, 12.0, 38.0, 66.0]];
        assert_eq!(acyclic, expected);
    }

    #[test]
    fn test_stein_solution_matches_krylov_sum() {
        let n = 4;
        let a = SubdiagonalOperator::new(vec![1.0, 0.5, 2.0], Some(1.0)).unwrap();
        let b = SubdiagonalOperator::new(vec![1.0, 1.0, 1.0], Some(-1.0)).unwrap();
        let g: Mat<f32> = mat![[1.0, 0.0, 2.0, -1.0]];
        let h: Mat<f32> = mat![[0.5, 1.0, 0.0, 1.0]];
        let (a_dense, b_dense) = (a.to_dense().unwrap(), b.to_dense().unwrap());

        let direct = dense_displacement_matrix(a_dense.as_ref(), b_dense.as_ref(), g.as_ref(), h.as_ref())
            .unwrap();
        let solved = solve_displacement_dense(
            a_dense.as_ref(),
            b_dense.as_ref(),
            a.power_scalar(),
            b.power_scalar(),
            g.as_ref(),
            h.as_ref(),
        )
        .unwrap();
        for i in 0..n {
            for j in 0..n {
                assert!((direct[(i, j)] - solved[(i, j)]).abs() < 1e-4);
            }
        }
    }
}
