//! Fast-versus-reference comparison harness.
//!
//! Each [`Family`] pairs a fast product from [`crate::solvers`] with its dense
//! counterpart from [`crate::reference`]. [`RandomCase`] draws seeded operands for a
//! family, and [`validate_case`] runs both paths and reports the relative error,
//! failing with [`KrylovErrorKind::NumericTolerance`] when it exceeds the tolerance.
//! This is the only place in the crate that produces that error kind.

use crate::{
    error::{KrylovError, KrylovErrorKind},
    reference::{subdiagonal_multiply_slow, toeplitz_mult_slow, tridiagonal_multiply_slow},
    solvers::{TridiagonalCoefficients, subdiagonal_multiply, toeplitz_mult, tridiagonal_multiply},
};
use faer::{Mat, MatRef};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The default relative tolerance of a fast path against its reference.
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// The operator families with both a fast and a reference product.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    ToeplitzCycle,
    ToeplitzAcyclic,
    Subdiagonal,
    SubdiagonalCorner,
    Tridiagonal,
    TridiagonalCorner,
}

impl Family {
    pub const ALL: [Family; 6] = [
        Family::ToeplitzCycle,
        Family::ToeplitzAcyclic,
        Family::Subdiagonal,
        Family::SubdiagonalCorner,
        Family::Tridiagonal,
        Family::TridiagonalCorner,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Family::ToeplitzCycle => "toeplitz-cycle",
            Family::ToeplitzAcyclic => "toeplitz-acyclic",
            Family::Subdiagonal => "subdiagonal",
            Family::SubdiagonalCorner => "subdiagonal-corner",
            Family::Tridiagonal => "tridiagonal",
            Family::TridiagonalCorner => "tridiagonal-corner",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator coefficients of a [`RandomCase`].
#[derive(Clone, Debug)]
pub enum CaseOperators {
    Toeplitz {
        cycle: bool,
    },
    Subdiagonal {
        subd_a: Vec<f32>,
        subd_b: Vec<f32>,
        corner_a: Option<f32>,
        corner_b: Option<f32>,
    },
    Tridiagonal {
        a: TridiagonalCoefficients,
        b: TridiagonalCoefficients,
    },
}

/// Seeded operands for one displacement product.
#[derive(Clone, Debug)]
pub struct RandomCase {
    pub family: Family,
    pub g: Mat<f32>,
    pub h: Mat<f32>,
    pub x: Mat<f32>,
    pub operators: CaseOperators,
}

fn gaussian<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Mat<f32> {
    Mat::from_fn(rows, cols, |_, _| rng.sample::<f32, _>(StandardNormal))
}

/// Coefficients near one keep the powers `A^j` within a modest dynamic range.
fn near_one<R: Rng>(len: usize, rng: &mut R) -> Vec<f32> {
    (0..len).map(|_| 0.75 + 0.5 * rng.random::<f32>()).collect()
}

fn small<R: Rng>(len: usize, rng: &mut R) -> Vec<f32> {
    (0..len).map(|_| 0.1 * rng.sample::<f32, _>(StandardNormal)).collect()
}

fn random_tridiagonal<R: Rng>(n: usize, corners: bool, rng: &mut R) -> TridiagonalCoefficients {
    TridiagonalCoefficients {
        subd: near_one(n - 1, rng),
        diag: small(n, rng),
        supd: small(n - 1, rng),
        corners: corners.then(|| (0.5 + 0.5 * rng.random::<f32>(), 0.1 * rng.random::<f32>())),
    }
}

impl RandomCase {
    /// Draws Gaussian factors and inputs, and operator coefficients for `family`.
    ///
    /// Fails with [`KrylovErrorKind::InvalidSize`] unless `n` is a power of two and
    /// `rank`, `batch` are non-zero.
    pub fn generate<R: Rng>(
        family: Family,
        n: usize,
        rank: usize,
        batch: usize,
        rng: &mut R,
    ) -> Result<Self, KrylovError> {
        crate::error::ensure_power_of_two(n)?;
        if rank == 0 || batch == 0 {
            return Err(KrylovErrorKind::invalid_size("rank and batch size must be non-zero").into());
        }
        let g = gaussian(rank, n, rng);
        let h = gaussian(rank, n, rng);
        let x = gaussian(batch, n, rng);
        let operators = match family {
            Family::ToeplitzCycle => CaseOperators::Toeplitz { cycle: true },
            Family::ToeplitzAcyclic => CaseOperators::Toeplitz { cycle: false },
            Family::Subdiagonal | Family::SubdiagonalCorner => {
                let corner = family == Family::SubdiagonalCorner;
                CaseOperators::Subdiagonal {
                    subd_a: near_one(n - 1, rng),
                    subd_b: near_one(n - 1, rng),
                    corner_a: corner.then(|| rng.random::<f32>()),
                    corner_b: corner.then(|| -rng.random::<f32>()),
                }
            }
            Family::Tridiagonal | Family::TridiagonalCorner => {
                let corners = family == Family::TridiagonalCorner && n > 1;
                CaseOperators::Tridiagonal {
                    a: random_tridiagonal(n, corners, rng),
                    b: random_tridiagonal(n, corners, rng),
                }
            }
        };
        Ok(Self {
            family,
            g,
            h,
            x,
            operators,
        })
    }

    pub fn n(&self) -> usize {
        self.g.ncols()
    }

    pub fn rank(&self) -> usize {
        self.g.nrows()
    }

    pub fn batch(&self) -> usize {
        self.x.nrows()
    }

    /// The product through the fast path.
    pub fn fast(&self) -> Result<Mat<f32>, KrylovError> {
        let (g, h, x) = (self.g.as_ref(), self.h.as_ref(), self.x.as_ref());
        match &self.operators {
            CaseOperators::Toeplitz { cycle } => toeplitz_mult(g, h, x, *cycle),
            CaseOperators::Subdiagonal {
                subd_a,
                subd_b,
                corner_a,
                corner_b,
            } => subdiagonal_multiply(subd_a, subd_b, g, h, x, *corner_a, *corner_b),
            CaseOperators::Tridiagonal { a, b } => tridiagonal_multiply(a, b, g, h, x),
        }
    }

    /// The product through the dense reference.
    pub fn slow(&self) -> Result<Mat<f32>, KrylovError> {
        let (g, h, x) = (self.g.as_ref(), self.h.as_ref(), self.x.as_ref());
        match &self.operators {
            CaseOperators::Toeplitz { cycle } => toeplitz_mult_slow(g, h, x, *cycle),
            CaseOperators::Subdiagonal {
                subd_a,
                subd_b,
                corner_a,
                corner_b,
            } => subdiagonal_multiply_slow(subd_a, subd_b, g, h, x, *corner_a, *corner_b),
            CaseOperators::Tridiagonal { a, b } => tridiagonal_multiply_slow(a, b, g, h, x),
        }
    }

    fn context(&self) -> String {
        format!(
            "{} n={} rank={} batch={}",
            self.family,
            self.n(),
            self.rank(),
            self.batch()
        )
    }
}

/// `‖fast − reference‖_F / ‖reference‖_F`, accumulated in double precision.
///
/// A zero reference yields the absolute error instead.
pub fn relative_error(fast: MatRef<'_, f32>, reference: MatRef<'_, f32>) -> f64 {
    let mut diff = 0.0f64;
    let mut norm = 0.0f64;
    for j in 0..reference.ncols() {
        for i in 0..reference.nrows() {
            let (a, b) = (fast[(i, j)] as f64, reference[(i, j)] as f64);
            diff += (a - b) * (a - b);
            norm += b * b;
        }
    }
    if norm == 0.0 {
        diff.sqrt()
    } else {
        (diff / norm).sqrt()
    }
}

/// Compares two products and returns their relative error.
///
/// Fails with [`KrylovErrorKind::ShapeMismatch`] if the shapes differ, and with
/// [`KrylovErrorKind::NumericTolerance`] if the error exceeds `tolerance`.
pub fn check_close(
    context: &str,
    fast: MatRef<'_, f32>,
    reference: MatRef<'_, f32>,
    tolerance: f64,
) -> Result<f64, KrylovError> {
    crate::error::ensure_dim("rows of the compared products", reference.nrows(), fast.nrows())?;
    crate::error::ensure_dim("columns of the compared products", reference.ncols(), fast.ncols())?;
    let error = relative_error(fast, reference);
    if error.is_nan() || error > tolerance {
        return Err(KrylovErrorKind::NumericTolerance {
            context: context.to_string(),
            error,
            tolerance,
        }
        .into());
    }
    Ok(error)
}

/// Runs both paths of `case` and checks them against each other.
pub fn validate_case(case: &RandomCase, tolerance: f64) -> Result<f64, KrylovError> {
    let fast = case.fast()?;
    let slow = case.slow()?;
    let error = check_close(&case.context(), fast.as_ref(), slow.as_ref(), tolerance)?;
    log::debug!("{}: relative error {error:e}", case.context());
    Ok(error)
}
