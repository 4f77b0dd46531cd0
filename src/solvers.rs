//! This module provides the high-level API for multiplying by a matrix given through its
//! low displacement rank representation.
//!
//! A displacement-structured matrix is never stored. It is described by two operators
//! `A`, `B` and two rank×n factors `G`, `H`, and acts on a vector as
//!
//! ```text
//! M x = Σ_r Krylov(A, G_r) · Krylov(B, H_r)ᵀ · x
//! ```
//!
//! Every function here is a thin composition of the two Krylov products of
//! [`KrylovOperator`]: one transpose product against `H` and `x`, then one forward
//! product against `G`, summed over rank. Inputs `x` and outputs are batch×n matrices
//! with one vector per row.

use crate::{
    algorithms::{
        KrylovOperator, subdiagonal::SubdiagonalOperator, toeplitz::ToeplitzOperator,
        tridiagonal::TridiagonalOperator,
    },
    error::{KrylovError, KrylovErrorKind, ensure_dim},
    matrix::{Tensor3, reverse_rows},
};
use faer::{Mat, MatRef};

pub use crate::algorithms::tridiagonal::TridiagonalCoefficients;

/// Gradients of a real loss through [`displacement_multiply`].
#[derive(Clone, Debug, PartialEq)]
pub struct DisplacementGrads {
    pub grad_g: Mat<f32>,
    pub grad_h: Mat<f32>,
    pub grad_x: Mat<f32>,
}

/// Validates the factor shapes of a displacement product.
///
/// Returns `(rank, n)`.
fn check_factors(
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
) -> Result<(usize, usize), KrylovError> {
    if g.nrows() != h.nrows() || g.ncols() != h.ncols() {
        return Err(KrylovErrorKind::invalid_size(format!(
            "G and H must have matching rank and dimension, got {}×{} and {}×{}",
            g.nrows(),
            g.ncols(),
            h.nrows(),
            h.ncols()
        ))
        .into());
    }
    if g.ncols() == 0 {
        return Err(KrylovErrorKind::invalid_size("the matrix dimension n must be non-zero").into());
    }
    ensure_dim("length of the input x", g.ncols(), x.ncols())?;
    Ok((g.nrows(), g.ncols()))
}

/// Plans the f-circulant operator `Z_f` for operands of the given batch size and rank.
///
/// # Returns
/// The operator handle, or [`KrylovErrorKind::InvalidSize`] if `n` is not a power of two.
pub fn make_toeplitz_operator(
    n: usize,
    f: f32,
    batch_size: usize,
    rank: usize,
) -> Result<ToeplitzOperator, KrylovError> {
    ToeplitzOperator::new(n, f, batch_size, rank)
}

fn check_handle_shapes(
    op: &ToeplitzOperator,
    batch: usize,
    rank: usize,
) -> Result<(), KrylovError> {
    ensure_dim("batch size of the operand", op.batch_size(), batch)?;
    ensure_dim("rank of the seeds", op.rank(), rank)
}

/// Computes `Krylov(Z_f, v_r)ᵀ u_b` for every seed and input, a batch×rank×n tensor.
pub fn multiply_transpose(
    op: &ToeplitzOperator,
    v: MatRef<'_, f32>,
    u: MatRef<'_, f32>,
) -> Result<Tensor3, KrylovError> {
    check_handle_shapes(op, u.nrows(), v.nrows())?;
    op.krylov_transpose_multiply(v, u)
}

/// Computes `Σ_r Krylov(Z_f, v_r) w[b, r]`, a batch×n matrix.
pub fn multiply_krylov(
    op: &ToeplitzOperator,
    v: MatRef<'_, f32>,
    w: &Tensor3,
) -> Result<Mat<f32>, KrylovError> {
    check_handle_shapes(op, w.batch(), v.nrows())?;
    op.krylov_multiply(v, w)
}

/// A planned Toeplitz-like product `Σ_r Krylov(Z_f, G_r) Krylov(Z_e, H_r)ᵀ x`.
///
/// The cyclic variant uses `(f, e) = (1, -1)`, the acyclic one `(0, 0)`. Which twist
/// caches exist depends on the variant, so it is fixed at construction.
#[derive(Clone, Debug)]
pub struct ToeplitzLike {
    krylov_side: ToeplitzOperator,
    transpose_side: ToeplitzOperator,
    cycle: bool,
}

impl ToeplitzLike {
    pub fn new(n: usize, batch_size: usize, rank: usize, cycle: bool) -> Result<Self, KrylovError> {
        let (f, e) = if cycle { (1.0, -1.0) } else { (0.0, 0.0) };
        Ok(Self {
            krylov_side: make_toeplitz_operator(n, f, batch_size, rank)?,
            transpose_side: make_toeplitz_operator(n, e, batch_size, rank)?,
            cycle,
        })
    }

    pub fn n(&self) -> usize {
        self.krylov_side.dim()
    }

    pub fn cycle(&self) -> bool {
        self.cycle
    }

    /// The operator multiplying the `G` factor.
    pub fn krylov_side(&self) -> &ToeplitzOperator {
        &self.krylov_side
    }

    /// The operator multiplying the `H` factor.
    pub fn transpose_side(&self) -> &ToeplitzOperator {
        &self.transpose_side
    }
}

/// Multiplies `x` by the Toeplitz-like matrix with displacement factors `G`, `H`.
///
/// # Arguments
/// * `handle`: The planned operator pair.
/// * `g`, `h`: The rank×n displacement factors.
/// * `x`: The batch×n input.
///
/// # Returns
/// The batch×n product, or an error if the shapes disagree with each other or with
/// the handle.
pub fn multiply_forward(
    handle: &ToeplitzLike,
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
) -> Result<Mat<f32>, KrylovError> {
    check_factors(g, h, x)?;
    let transpose_out = multiply_transpose(&handle.transpose_side, h, x)?;
    multiply_krylov(&handle.krylov_side, g, &transpose_out)
}

/// Plans a [`ToeplitzLike`] handle for the given shapes and applies it once.
pub fn toeplitz_mult(
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
    cycle: bool,
) -> Result<Mat<f32>, KrylovError> {
    let (rank, n) = check_factors(g, h, x)?;
    let handle = ToeplitzLike::new(n, x.nrows(), rank, cycle)?;
    multiply_forward(&handle, g, h, x)
}

/// Multiplies `x` by the matrix with displacement factors `G`, `H` with respect to two
/// subdiagonal operators.
///
/// When `subd_a` and `subd_b` are the same slice and carry the same corner, a single
/// operator is planned and used for both roles.
pub fn subdiagonal_multiply(
    subd_a: &[f32],
    subd_b: &[f32],
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
    corner_a: Option<f32>,
    corner_b: Option<f32>,
) -> Result<Mat<f32>, KrylovError> {
    let (_, n) = check_factors(g, h, x)?;
    ensure_dim("length of subd_A", n - 1, subd_a.len())?;
    ensure_dim("length of subd_B", n - 1, subd_b.len())?;
    let a = SubdiagonalOperator::new(subd_a.to_vec(), corner_a)?;
    if std::ptr::eq(subd_a, subd_b) && corner_a == corner_b {
        return displacement_multiply(&a, &a, g, h, x);
    }
    let b = SubdiagonalOperator::new(subd_b.to_vec(), corner_b)?;
    displacement_multiply(&a, &b, g, h, x)
}

/// Multiplies `x` by the matrix with displacement factors `G`, `H` with respect to two
/// tridiagonal operators.
pub fn tridiagonal_multiply(
    a: &TridiagonalCoefficients,
    b: &TridiagonalCoefficients,
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
) -> Result<Mat<f32>, KrylovError> {
    let (_, n) = check_factors(g, h, x)?;
    ensure_dim("dimension of operator A", n, a.dim())?;
    ensure_dim("dimension of operator B", n, b.dim())?;
    let op_a = TridiagonalOperator::new(a.clone())?;
    if std::ptr::eq(a, b) {
        return displacement_multiply(&op_a, &op_a, g, h, x);
    }
    let op_b = TridiagonalOperator::new(b.clone())?;
    displacement_multiply(&op_a, &op_b, g, h, x)
}

/// Computes `Σ_r Krylov(A, G_r) · Krylov(B, H_r)ᵀ · x` for arbitrary Krylov operators.
pub fn displacement_multiply(
    a: &dyn KrylovOperator,
    b: &dyn KrylovOperator,
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
) -> Result<Mat<f32>, KrylovError> {
    let (_, n) = check_factors(g, h, x)?;
    ensure_dim("dimension of operator A", n, a.dim())?;
    ensure_dim("dimension of operator B", n, b.dim())?;
    let transpose_out = b.krylov_transpose_multiply(h, x)?;
    a.krylov_multiply(g, &transpose_out)
}

/// Back-propagates the cotangent `grad_out` of [`displacement_multiply`] to `G`, `H`
/// and `x`.
///
/// The product is linear in each of `G`, `H` and `x`, so each gradient is again a pair
/// of Krylov products:
///
/// * `∂x = Σ_r Krylov(B, H_r) Krylov(A, G_r)ᵀ ḡ`,
/// * `∂G_r = J Σ_b Krylov(A', J ḡ_b) z[b, r]` with `z = Krylov(B, H)ᵀ x`,
/// * `∂H_r = J Σ_b Krylov(B', J x_b) z̄[b, r]` with `z̄ = Krylov(A, G)ᵀ ḡ`,
///
/// where `J` reverses a vector and `A' = J Aᵀ J` is [`KrylovOperator::reflected`].
/// The operator coefficients are treated as constants.
pub fn displacement_multiply_backward(
    a: &dyn KrylovOperator,
    b: &dyn KrylovOperator,
    g: MatRef<'_, f32>,
    h: MatRef<'_, f32>,
    x: MatRef<'_, f32>,
    grad_out: MatRef<'_, f32>,
) -> Result<DisplacementGrads, KrylovError> {
    let (_, n) = check_factors(g, h, x)?;
    ensure_dim("batch size of the output gradient", x.nrows(), grad_out.nrows())?;
    ensure_dim("length of the output gradient", n, grad_out.ncols())?;

    let grad_x = displacement_multiply(b, a, h, g, grad_out)?;

    let z = b.krylov_transpose_multiply(h, x)?;
    let grad_g = seed_gradient(a, grad_out, &z)?;

    let z_bar = a.krylov_transpose_multiply(g, grad_out)?;
    let grad_h = seed_gradient(b, x, &z_bar)?;

    Ok(DisplacementGrads {
        grad_g,
        grad_h,
        grad_x,
    })
}

/// `J Σ_b Krylov(A', J c_b) weights[b, r]` for every `r`, i.e. the gradient of
/// `Σ_{b,r} c_bᵀ Krylov(A, v_r) weights[b, r]` with respect to the seeds `v_r`.
fn seed_gradient(
    op: &dyn KrylovOperator,
    cotangent: MatRef<'_, f32>,
    weights: &Tensor3,
) -> Result<Mat<f32>, KrylovError> {
    let reflected = op.reflected();
    let flipped = reverse_rows(cotangent);
    let out = reflected.krylov_multiply(flipped.as_ref(), &weights.swap_batch_rank())?;
    Ok(reverse_rows(out.as_ref()))
}
