//! This module defines the custom error types for the library.
//!
//! Every precondition the engine checks (power-of-two sizes, matching factor
//! shapes, batch and rank agreement between operands) is reported through a
//! single opaque error type, [`KrylovError`]. The computations themselves are
//! deterministic pure functions, so an error always means the call was malformed;
//! there is nothing to retry.
//!
//! Using the [`thiserror`] crate allows us to create idiomatic error types with minimal
//! boilerplate.
use thiserror::Error;

/// Represents all possible errors that can occur while building or applying a
/// displacement operator.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct KrylovError(#[from] KrylovErrorKind);

impl KrylovError {
    /// Returns the specific kind of failure.
    pub fn kind(&self) -> &KrylovErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub enum KrylovErrorKind {
    /// A size precondition does not hold, e.g. `n` is not a power of two or the
    /// displacement factors `G` and `H` disagree in shape.
    #[error("Invalid size: {reason}")]
    InvalidSize { reason: String },

    /// Two operands disagree on a batch, rank or length dimension.
    #[error("Shape mismatch in {what}: expected {expected}, got {actual}.")]
    ShapeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// A fast path deviates from its dense reference by more than the allowed
    /// relative error. Only produced by [`crate::validation`].
    #[error("Numeric tolerance exceeded for {context}: relative error {error:e} > {tolerance:e}")]
    NumericTolerance {
        context: String,
        error: f64,
        tolerance: f64,
    },

    /// A layer configuration names an unknown key or an option its class does not support.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Corner coefficients were supplied to an operator variant without corners.
    #[error("Corner coefficients are not supported by the {operator} operator.")]
    UnsupportedCorner { operator: String },
}

impl KrylovErrorKind {
    pub(crate) fn invalid_size(reason: impl Into<String>) -> Self {
        Self::InvalidSize {
            reason: reason.into(),
        }
    }

    pub(crate) fn shape_mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}

// Manually implement PartialEq for the public error type.
// We compare the inner `KrylovErrorKind`.
impl PartialEq for KrylovError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Fails with [`KrylovErrorKind::InvalidSize`] unless `n` is a nonzero power of two.
pub(crate) fn ensure_power_of_two(n: usize) -> Result<(), KrylovError> {
    if n == 0 || !n.is_power_of_two() {
        return Err(KrylovErrorKind::invalid_size(format!("n must be a power of two, got {n}")).into());
    }
    Ok(())
}

/// Fails with [`KrylovErrorKind::ShapeMismatch`] unless `actual == expected`.
pub(crate) fn ensure_dim(what: &str, expected: usize, actual: usize) -> Result<(), KrylovError> {
    if expected != actual {
        return Err(KrylovErrorKind::shape_mismatch(what, expected, actual).into());
    }
    Ok(())
}
