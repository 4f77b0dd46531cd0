//! Fast Krylov-subspace multiplication for low displacement rank matrices.
//!
//! A matrix `M` has low displacement rank with respect to two operators `A`, `B` when it
//! can be written as
//!
//! ```text
//! M = Σ_r Krylov(A, G_r) · Krylov(B, H_r)ᵀ,      Krylov(A, v) = [v, Av, …, A^{n-1}v]
//! ```
//!
//! for two small rank×n factors `G`, `H`. This crate multiplies by such matrices without
//! ever forming `M` or its Krylov matrices, for the operators used by structured neural
//! network layers:
//!
//! | Operator | Product | Cost |
//! |---|---|---|
//! | f-circulant shift `Z_f` (Toeplitz-like) | FFT with a twist, or padded real FFT | O(b·r·n log n) |
//! | subdiagonal, optionally closed by a corner | divide-and-conquer over the recurrence | O(b·r·n log² n) |
//! | tridiagonal, optionally closed by corners | explicit Krylov matrices | O(b·r·n²) |
//!
//! Built on [`faer`] for the dense parts and [`rustfft`] for the transforms. Everything is
//! single precision, single threaded and deterministic.
//!
//! ## Modules
//!
//! - [`solvers`]: the high-level products and their backward pass.
//! - [`algorithms`]: the per-operator Krylov products behind them.
//! - [`fft`]: batched FFT primitives and their vector-Jacobian products.
//! - [`reference`]: dense O(n³) oracles for every fast path.
//! - [`validation`]: the fast-versus-reference harness.
//! - [`structured`]: structured linear layers configured from TOML.
//!
//! ## Example Usage
//!
//! Multiplying a batch of two vectors by a Toeplitz-like matrix of displacement rank 2,
//! and checking the result against the dense reference:
//!
//! ```rust
//! use faer::mat;
//! use ldr_krylov::{reference::toeplitz_mult_slow, toeplitz_mult};
//!
//! let g = mat![[0.0f32, 1.0, 0.0, -1.0], [0.0, 1.0, 2.0, 3.0]];
//! let x = mat![[1.0f32, 1.0, 1.0, 1.0], [0.0, 1.0, 2.0, 3.0]];
//!
//! let fast = toeplitz_mult(g.as_ref(), g.as_ref(), x.as_ref(), false).unwrap();
//! let slow = toeplitz_mult_slow(g.as_ref(), g.as_ref(), x.as_ref(), false).unwrap();
//!
//! assert!((fast.as_ref() - slow.as_ref()).norm_l2() < 1e-3);
//! assert!((fast[(1, 3)] - 66.0).abs() < 1e-3);
//! ```

pub mod algorithms;
pub mod error;
pub mod fft;
pub mod matrix;
pub mod reference;
pub mod solvers;
pub mod structured;
pub mod validation;

// Re-export the main API from solvers for convenient access.
pub use error::{KrylovError, KrylovErrorKind};
pub use matrix::Tensor3;
pub use solvers::{
    DisplacementGrads, ToeplitzLike, TridiagonalCoefficients, displacement_multiply,
    displacement_multiply_backward, make_toeplitz_operator, multiply_forward, multiply_krylov,
    multiply_transpose, subdiagonal_multiply, toeplitz_mult, tridiagonal_multiply,
};
