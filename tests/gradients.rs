//! Integration tests for the backward pass of the displacement product.
//!
//! `y = Σ_r Krylov(A, G_r) Krylov(B, H_r)ᵀ x` is linear in each of `G`, `H` and `x`
//! separately. For a linear map `L` with gradient `∂`, the adjoint identity
//!
//! ```text
//! ⟨L(d), ḡ⟩ = ⟨d, ∂⟩
//! ```
//!
//! holds exactly for every direction `d` and cotangent `ḡ`, so each gradient is checked
//! against one extra forward product in a random direction, with no finite differences.

use anyhow::{Result, ensure};
use faer::Mat;
use ldr_krylov::{
    TridiagonalCoefficients, displacement_multiply, displacement_multiply_backward,
    algorithms::{
        KrylovOperator, diagonal::DiagonalOperator, krylov::DenseKrylovOperator,
        subdiagonal::SubdiagonalOperator, toeplitz::ToeplitzOperator,
        tridiagonal::TridiagonalOperator,
    },
    matrix::frobenius_dot,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;

fn gaussian(rows: usize, cols: usize, rng: &mut StdRng) -> Mat<f32> {
    Mat::from_fn(rows, cols, |_, _| rng.sample::<f32, _>(StandardNormal))
}

/// Checks `⟨L(d), ḡ⟩ = ⟨d, ∂⟩` relative to `‖L(d)‖·‖ḡ‖`, which bounds the rounding error
/// of either inner product.
fn ensure_adjoint(name: &str, image: &Mat<f32>, grad_out: &Mat<f32>, direction: &Mat<f32>, grad: &Mat<f32>) -> Result<()> {
    let forward = frobenius_dot(image.as_ref(), grad_out.as_ref());
    let backward = frobenius_dot(direction.as_ref(), grad.as_ref());
    let scale = (image.norm_l2() * grad_out.norm_l2()).max(1.0);
    ensure!(
        (forward - backward).abs() <= 1e-4 * scale,
        "{name}: ⟨L(d), ḡ⟩ = {forward} but ⟨d, ∂⟩ = {backward}"
    );
    Ok(())
}

fn check_adjoint_identities(a: &dyn KrylovOperator, b: &dyn KrylovOperator, rank: usize, batch: usize) -> Result<()> {
    let n = a.dim();
    let mut rng = StdRng::seed_from_u64(n as u64 * 31 + rank as u64);
    let g = gaussian(rank, n, &mut rng);
    let h = gaussian(rank, n, &mut rng);
    let x = gaussian(batch, n, &mut rng);
    let grad_out = gaussian(batch, n, &mut rng);

    let grads = displacement_multiply_backward(a, b, g.as_ref(), h.as_ref(), x.as_ref(), grad_out.as_ref())?;
    ensure!(grads.grad_g.nrows() == rank && grads.grad_g.ncols() == n, "grad_g has the wrong shape");
    ensure!(grads.grad_h.nrows() == rank && grads.grad_h.ncols() == n, "grad_h has the wrong shape");
    ensure!(grads.grad_x.nrows() == batch && grads.grad_x.ncols() == n, "grad_x has the wrong shape");

    let dx = gaussian(batch, n, &mut rng);
    let y = displacement_multiply(a, b, g.as_ref(), h.as_ref(), dx.as_ref())?;
    ensure_adjoint("x", &y, &grad_out, &dx, &grads.grad_x)?;

    let dg = gaussian(rank, n, &mut rng);
    let y = displacement_multiply(a, b, dg.as_ref(), h.as_ref(), x.as_ref())?;
    ensure_adjoint("G", &y, &grad_out, &dg, &grads.grad_g)?;

    let dh = gaussian(rank, n, &mut rng);
    let y = displacement_multiply(a, b, g.as_ref(), dh.as_ref(), x.as_ref())?;
    ensure_adjoint("H", &y, &grad_out, &dh, &grads.grad_h)?;
    Ok(())
}

/// A macro to generate one adjoint test for a pair of operators.
macro_rules! generate_gradient_test {
    ($test_name:ident, $ops:expr, rank = $rank:expr, batch = $batch:expr) => {
        #[test]
        fn $test_name() -> Result<()> {
            let (a, b) = $ops;
            check_adjoint_identities(&a, &b, $rank, $batch)
        }
    };
}

fn ramp(len: usize, start: f32, step: f32) -> Vec<f32> {
    (0..len).map(|i| start + step * i as f32).collect()
}

generate_gradient_test!(
    test_toeplitz_cycle_gradients,
    (
        ToeplitzOperator::new(16, 1.0, 3, 2)?,
        ToeplitzOperator::new(16, -1.0, 3, 2)?
    ),
    rank = 2,
    batch = 3
);

generate_gradient_test!(
    test_toeplitz_acyclic_gradients,
    (
        ToeplitzOperator::new(32, 0.0, 2, 3)?,
        ToeplitzOperator::new(32, 0.0, 2, 3)?
    ),
    rank = 3,
    batch = 2
);

generate_gradient_test!(
    test_general_f_gradients,
    (
        ToeplitzOperator::new(8, 0.5, 2, 1)?,
        ToeplitzOperator::new(8, -2.0, 2, 1)?
    ),
    rank = 1,
    batch = 2
);

generate_gradient_test!(
    test_subdiagonal_gradients,
    (
        SubdiagonalOperator::new(ramp(15, 0.9, 0.01), None)?,
        SubdiagonalOperator::new(ramp(15, 1.1, -0.01), None)?
    ),
    rank = 2,
    batch = 3
);

generate_gradient_test!(
    test_subdiagonal_corner_gradients,
    (
        SubdiagonalOperator::new(ramp(31, 0.95, 0.002), Some(0.6))?,
        SubdiagonalOperator::new(ramp(31, 1.0, -0.002), Some(-0.4))?
    ),
    rank = 3,
    batch = 2
);

generate_gradient_test!(
    test_tridiagonal_corner_gradients,
    (
        TridiagonalOperator::new(TridiagonalCoefficients {
            subd: ramp(7, 1.0, 0.02),
            diag: ramp(8, -0.1, 0.03),
            supd: ramp(7, 0.05, -0.01),
            corners: Some((0.5, 0.2)),
        })?,
        TridiagonalOperator::new(TridiagonalCoefficients::shift(8))?
    ),
    rank = 2,
    batch = 2
);

generate_gradient_test!(
    test_vandermonde_gradients,
    (
        ToeplitzOperator::new(8, 0.0, 2, 2)?,
        DiagonalOperator::new(ramp(8, 0.6, 0.1))?
    ),
    rank = 2,
    batch = 2
);

generate_gradient_test!(
    test_dense_gradients,
    (
        DenseKrylovOperator::new(Mat::from_fn(4, 4, |i, j| 0.25 * (i as f32 - j as f32).cos()))?,
        DenseKrylovOperator::new(Mat::from_fn(4, 4, |i, j| if i == j + 1 { 1.0 } else { 0.1 }))?
    ),
    rank = 1,
    batch = 3
);

#[test]
fn test_gradient_shapes_are_checked() -> Result<()> {
    let op = ToeplitzOperator::new(4, 1.0, 1, 1)?;
    let g = Mat::<f32>::zeros(1, 4);
    let x = Mat::<f32>::zeros(2, 4);
    let wrong = Mat::<f32>::zeros(3, 4);
    let result = displacement_multiply_backward(&op, &op, g.as_ref(), g.as_ref(), x.as_ref(), wrong.as_ref());
    ensure!(result.is_err(), "a cotangent with the wrong batch size was accepted");
    Ok(())
}
