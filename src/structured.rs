//! Structured linear layers built on the displacement products.
//!
//! A [`StructuredLayer`] is a square `layer_size × layer_size` linear map (plus an
//! optional bias) whose weight matrix is never stored densely, except for the
//! [`StructuredClass::Unconstrained`] baseline. The class is a closed enum, the
//! options are a statically checked [`LayerConfig`], and the learnable parameters of
//! each class live in one variant of [`LayerParams`]. Gradient propagation through a
//! layer is [`crate::solvers::displacement_multiply_backward`].
//!
//! Layers are configured from TOML:
//!
//! ```toml
//! class = "sd"          # class_type or abbreviation
//! layer_size = 64
//! rank = 4
//! tie_operators = true
//! ```

use crate::{
    algorithms::{KrylovOperator, diagonal::DiagonalOperator, toeplitz::ToeplitzOperator},
    error::{KrylovError, KrylovErrorKind, ensure_dim, ensure_power_of_two},
    matrix::{Tensor3, reverse_rows},
    solvers::{
        TridiagonalCoefficients, displacement_multiply, subdiagonal_multiply, toeplitz_mult,
        tridiagonal_multiply,
    },
};
use faer::{Mat, MatRef};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::Deserialize;
use std::{fmt, str::FromStr};

/// The closed set of structured layer classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum StructuredClass {
    /// A dense weight matrix.
    Unconstrained,
    /// A circulant matrix given by its first column.
    Circulant,
    /// `Gᵀ H` with rank×n factors.
    LowRank,
    /// Toeplitz-like with respect to the acyclic shifts `(Z_0, Z_0)`.
    ToeplitzLike,
    /// Toeplitz-like with respect to the cyclic shifts `(Z_1, Z_{-1})`.
    ToeplitzLikeCorner,
    /// The cyclic Toeplitz-like product with its output reversed.
    Hankel,
    /// Displacement structure with respect to `(Z_0, diag(d))`, `d` learnable.
    Vandermonde,
    /// Learned subdiagonal operators.
    Subdiagonal,
    /// Learned subdiagonal operators closed by learnable corners.
    SubdiagonalCorner,
    /// Learned tridiagonal operators.
    Tridiagonal,
    /// Learned tridiagonal operators closed by learnable corners.
    TridiagonalCorner,
}

impl StructuredClass {
    pub const ALL: [StructuredClass; 11] = [
        StructuredClass::Unconstrained,
        StructuredClass::Circulant,
        StructuredClass::LowRank,
        StructuredClass::ToeplitzLike,
        StructuredClass::ToeplitzLikeCorner,
        StructuredClass::Hankel,
        StructuredClass::Vandermonde,
        StructuredClass::Subdiagonal,
        StructuredClass::SubdiagonalCorner,
        StructuredClass::Tridiagonal,
        StructuredClass::TridiagonalCorner,
    ];

    pub fn class_type(self) -> &'static str {
        match self {
            StructuredClass::Unconstrained => "unconstrained",
            StructuredClass::Circulant => "circulant",
            StructuredClass::LowRank => "low_rank",
            StructuredClass::ToeplitzLike => "toeplitz",
            StructuredClass::ToeplitzLikeCorner => "toeplitz_corner",
            StructuredClass::Hankel => "hankel",
            StructuredClass::Vandermonde => "vandermonde",
            StructuredClass::Subdiagonal => "subdiagonal",
            StructuredClass::SubdiagonalCorner => "subdiagonal_corner",
            StructuredClass::Tridiagonal => "tridiagonal",
            StructuredClass::TridiagonalCorner => "tridiagonal_corner",
        }
    }

    pub fn abbrev(self) -> &'static str {
        match self {
            StructuredClass::Unconstrained => "u",
            StructuredClass::Circulant => "c",
            StructuredClass::LowRank => "lr",
            StructuredClass::ToeplitzLike => "t",
            StructuredClass::ToeplitzLikeCorner => "tc",
            StructuredClass::Hankel => "h",
            StructuredClass::Vandermonde => "v",
            StructuredClass::Subdiagonal => "sd",
            StructuredClass::SubdiagonalCorner => "sdc",
            StructuredClass::Tridiagonal => "td",
            StructuredClass::TridiagonalCorner => "tdc",
        }
    }

    /// Whether the class is parameterised by rank×n factors `G`, `H`.
    pub fn has_factors(self) -> bool {
        !matches!(self, StructuredClass::Unconstrained | StructuredClass::Circulant)
    }

    /// Whether the displacement operators themselves are learnable.
    pub fn learns_operators(self) -> bool {
        matches!(
            self,
            StructuredClass::Subdiagonal
                | StructuredClass::SubdiagonalCorner
                | StructuredClass::Tridiagonal
                | StructuredClass::TridiagonalCorner
        )
    }

    pub fn has_corners(self) -> bool {
        matches!(
            self,
            StructuredClass::SubdiagonalCorner | StructuredClass::TridiagonalCorner
        )
    }

    /// Whether the product runs through an FFT or divide-and-conquer path.
    fn needs_power_of_two(self) -> bool {
        !matches!(self, StructuredClass::Unconstrained | StructuredClass::LowRank)
    }
}

impl fmt::Display for StructuredClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_type())
    }
}

impl FromStr for StructuredClass {
    type Err = KrylovError;

    /// Accepts either the class_type (`"subdiagonal"`) or the abbreviation (`"sd"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|class| class.class_type() == s || class.abbrev() == s)
            .ok_or_else(|| KrylovErrorKind::InvalidConfig(format!("unknown structured class `{s}`")).into())
    }
}

impl TryFrom<String> for StructuredClass {
    type Error = KrylovError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

fn default_rank() -> usize {
    1
}

fn default_bias() -> bool {
    true
}

/// Every option a structured layer recognises. Unknown keys are rejected.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerConfig {
    pub class: StructuredClass,
    pub layer_size: usize,
    /// Displacement rank of the factors `G`, `H`.
    #[serde(default = "default_rank")]
    pub rank: usize,
    /// Share one operator between the `A` and `B` roles.
    #[serde(default)]
    pub tie_operators: bool,
    #[serde(default = "default_bias")]
    pub bias: bool,
    /// Initial value of the corner coefficients.
    #[serde(default)]
    pub corner: Option<f32>,
}

impl LayerConfig {
    /// A configuration with the default options.
    pub fn new(class: StructuredClass, layer_size: usize) -> Self {
        Self {
            class,
            layer_size,
            rank: default_rank(),
            tie_operators: false,
            bias: default_bias(),
            corner: None,
        }
    }

    /// Parses and validates a TOML configuration.
    pub fn from_toml_str(s: &str) -> Result<Self, KrylovError> {
        let config: Self =
            toml::from_str(s).map_err(|e| KrylovErrorKind::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects options the class does not recognise and sizes its products cannot handle.
    pub fn validate(&self) -> Result<(), KrylovError> {
        let class = self.class;
        if self.layer_size == 0 {
            return Err(KrylovErrorKind::invalid_size("layer_size must be non-zero").into());
        }
        if class.needs_power_of_two() {
            ensure_power_of_two(self.layer_size)?;
        }
        if self.rank == 0 {
            return Err(KrylovErrorKind::InvalidConfig("rank must be at least 1".to_string()).into());
        }
        if self.rank != 1 && !class.has_factors() {
            return Err(KrylovErrorKind::InvalidConfig(format!(
                "the {class} class has no low-rank factors, got rank = {}",
                self.rank
            ))
            .into());
        }
        if self.tie_operators && !class.learns_operators() {
            return Err(KrylovErrorKind::InvalidConfig(format!(
                "the {class} class has no learnable operators to tie"
            ))
            .into());
        }
        if let Some(corner) = self.corner {
            match class {
                StructuredClass::Subdiagonal | StructuredClass::Tridiagonal => {
                    return Err(KrylovErrorKind::UnsupportedCorner {
                        operator: class.class_type().to_string(),
                    }
                    .into());
                }
                _ if !class.has_corners() => {
                    return Err(KrylovErrorKind::InvalidConfig(format!(
                        "the {class} class does not take a corner option"
                    ))
                    .into());
                }
                _ if !corner.is_finite() => {
                    return Err(KrylovErrorKind::InvalidConfig(format!(
                        "corner must be finite, got {corner}"
                    ))
                    .into());
                }
                _ => {}
            }
        }
        if class.has_corners() && self.layer_size < 2 {
            return Err(KrylovErrorKind::invalid_size(
                "corner classes need layer_size of at least 2",
            )
            .into());
        }
        Ok(())
    }
}

/// One owned operator used in both the `A` and `B` roles, or two independent ones.
///
/// A tied operator is a single value, so a gradient computed for either role lands
/// in the same place.
#[derive(Clone, Debug, PartialEq)]
pub enum OperatorPair<T> {
    Tied(T),
    Untied { a: T, b: T },
}

impl<T> OperatorPair<T> {
    /// Builds a tied pair from one call to `init`, or an untied one from two.
    pub fn new_with(tie: bool, mut init: impl FnMut() -> T) -> Self {
        if tie {
            OperatorPair::Tied(init())
        } else {
            OperatorPair::Untied {
                a: init(),
                b: init(),
            }
        }
    }

    pub fn a(&self) -> &T {
        match self {
            OperatorPair::Tied(op) => op,
            OperatorPair::Untied { a, .. } => a,
        }
    }

    pub fn b(&self) -> &T {
        match self {
            OperatorPair::Tied(op) => op,
            OperatorPair::Untied { b, .. } => b,
        }
    }

    pub fn is_tied(&self) -> bool {
        matches!(self, OperatorPair::Tied(_))
    }
}

/// The learnable parameters of a layer, one variant per family of classes.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerParams {
    Unconstrained {
        w: Mat<f32>,
    },
    Circulant {
        c: Vec<f32>,
    },
    LowRank {
        g: Mat<f32>,
        h: Mat<f32>,
    },
    ToeplitzLike {
        g: Mat<f32>,
        h: Mat<f32>,
        cycle: bool,
    },
    Hankel {
        g: Mat<f32>,
        h: Mat<f32>,
    },
    Vandermonde {
        g: Mat<f32>,
        h: Mat<f32>,
        diag: Vec<f32>,
    },
    Subdiagonal {
        g: Mat<f32>,
        h: Mat<f32>,
        subd: OperatorPair<Vec<f32>>,
        /// `(corner_A, corner_B)`; `None` for the class without corners.
        corners: Option<(f32, f32)>,
    },
    Tridiagonal {
        g: Mat<f32>,
        h: Mat<f32>,
        coeffs: OperatorPair<TridiagonalCoefficients>,
    },
}

/// A structured `layer_size × layer_size` linear layer.
#[derive(Clone, Debug, PartialEq)]
pub struct StructuredLayer {
    class: StructuredClass,
    layer_size: usize,
    rank: usize,
    params: LayerParams,
    bias: Option<Vec<f32>>,
}

fn gaussian<R: Rng>(rows: usize, cols: usize, std: f32, rng: &mut R) -> Mat<f32> {
    Mat::from_fn(rows, cols, |_, _| std * rng.sample::<f32, _>(StandardNormal))
}

impl StructuredLayer {
    /// Validates `config` and initialises the parameters of its class.
    ///
    /// Dense and circulant weights are Gaussian with standard deviation `√(1/n)`, the
    /// factors `G`, `H` Gaussian with `√(1/(r·n))`. Subdiagonals start at one,
    /// diagonals and superdiagonals at zero, corners at `config.corner` or zero, the
    /// Vandermonde diagonal at one and the bias at zero.
    pub fn new<R: Rng>(config: &LayerConfig, rng: &mut R) -> Result<Self, KrylovError> {
        config.validate()?;
        let (class, n, rank) = (config.class, config.layer_size, config.rank);
        let dense_std = (1.0 / n as f32).sqrt();
        let factor_std = (1.0 / (rank * n) as f32).sqrt();
        let corner = config.corner.unwrap_or(0.0);

        let params = match class {
            StructuredClass::Unconstrained => LayerParams::Unconstrained {
                w: gaussian(n, n, dense_std, rng),
            },
            StructuredClass::Circulant => LayerParams::Circulant {
                c: (0..n)
                    .map(|_| dense_std * rng.sample::<f32, _>(StandardNormal))
                    .collect(),
            },
            _ => {
                let g = gaussian(rank, n, factor_std, rng);
                let h = gaussian(rank, n, factor_std, rng);
                match class {
                    StructuredClass::LowRank => LayerParams::LowRank { g, h },
                    StructuredClass::ToeplitzLike | StructuredClass::ToeplitzLikeCorner => {
                        LayerParams::ToeplitzLike {
                            g,
                            h,
                            cycle: class == StructuredClass::ToeplitzLikeCorner,
                        }
                    }
                    StructuredClass::Hankel => LayerParams::Hankel { g, h },
                    StructuredClass::Vandermonde => LayerParams::Vandermonde {
                        g,
                        h,
                        diag: vec![1.0; n],
                    },
                    StructuredClass::Subdiagonal | StructuredClass::SubdiagonalCorner => {
                        LayerParams::Subdiagonal {
                            g,
                            h,
                            subd: OperatorPair::new_with(config.tie_operators, || vec![1.0; n - 1]),
                            corners: class.has_corners().then_some((corner, corner)),
                        }
                    }
                    _ => {
                        let corners = class.has_corners().then_some((corner, corner));
                        LayerParams::Tridiagonal {
                            g,
                            h,
                            coeffs: OperatorPair::new_with(config.tie_operators, || {
                                TridiagonalCoefficients {
                                    corners,
                                    ..TridiagonalCoefficients::shift(n)
                                }
                            }),
                        }
                    }
                }
            }
        };
        log::debug!(
            "Initialised {} layer: n={n}, rank={rank}, tied={}, bias={}",
            class.abbrev(),
            config.tie_operators,
            config.bias
        );
        Ok(Self {
            class,
            layer_size: n,
            rank,
            params,
            bias: config.bias.then(|| vec![0.0; n]),
        })
    }

    /// The short name of the layer: the abbreviation, followed by the rank for
    /// classes with low-rank factors.
    pub fn name(&self) -> String {
        if self.class.has_factors() {
            format!("{}{}", self.class.abbrev(), self.rank)
        } else {
            self.class.abbrev().to_string()
        }
    }

    pub fn class(&self) -> StructuredClass {
        self.class
    }

    pub fn layer_size(&self) -> usize {
        self.layer_size
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn params(&self) -> &LayerParams {
        &self.params
    }

    /// Mutable access for parameter updates. [`StructuredLayer::forward`] rejects
    /// parameters whose shapes no longer match the layer.
    pub fn params_mut(&mut self) -> &mut LayerParams {
        &mut self.params
    }

    pub fn bias(&self) -> Option<&[f32]> {
        self.bias.as_deref()
    }

    pub fn bias_mut(&mut self) -> Option<&mut Vec<f32>> {
        self.bias.as_mut()
    }

    /// Checks every parameter and the bias against `layer_size` and `rank`.
    fn check_params(&self) -> Result<(), KrylovError> {
        let (n, rank) = (self.layer_size, self.rank);
        let check_factors = |g: &Mat<f32>, h: &Mat<f32>| -> Result<(), KrylovError> {
            ensure_dim("rows of G", rank, g.nrows())?;
            ensure_dim("columns of G", n, g.ncols())?;
            ensure_dim("rows of H", rank, h.nrows())?;
            ensure_dim("columns of H", n, h.ncols())
        };
        match &self.params {
            LayerParams::Unconstrained { w } => {
                ensure_dim("rows of the weight matrix", n, w.nrows())?;
                ensure_dim("columns of the weight matrix", n, w.ncols())?;
            }
            LayerParams::Circulant { c } => ensure_dim("length of the circulant column", n, c.len())?,
            LayerParams::LowRank { g, h }
            | LayerParams::ToeplitzLike { g, h, .. }
            | LayerParams::Hankel { g, h } => check_factors(g, h)?,
            LayerParams::Vandermonde { g, h, diag } => {
                check_factors(g, h)?;
                ensure_dim("length of the Vandermonde diagonal", n, diag.len())?;
            }
            LayerParams::Subdiagonal { g, h, subd, .. } => {
                check_factors(g, h)?;
                ensure_dim("length of subd_A", n - 1, subd.a().len())?;
                ensure_dim("length of subd_B", n - 1, subd.b().len())?;
            }
            LayerParams::Tridiagonal { g, h, coeffs } => {
                check_factors(g, h)?;
                ensure_dim("dimension of the A coefficients", n, coeffs.a().validate()?)?;
                ensure_dim("dimension of the B coefficients", n, coeffs.b().validate()?)?;
            }
        }
        if let Some(bias) = &self.bias {
            ensure_dim("length of the bias", n, bias.len())?;
        }
        Ok(())
    }

    /// Applies the layer to a batch×n input, one vector per row.
    ///
    /// Fails with `ShapeMismatch` if the input width or any parameter shape disagrees
    /// with the layer.
    pub fn forward(&self, x: MatRef<'_, f32>) -> Result<Mat<f32>, KrylovError> {
        let n = self.layer_size;
        ensure_dim("input width of the layer", n, x.ncols())?;
        self.check_params()?;
        let mut out = match &self.params {
            LayerParams::Unconstrained { w } => x * w.as_ref(),
            LayerParams::Circulant { c } => circulant_multiply(c, x)?,
            LayerParams::LowRank { g, h } => {
                let xh = x * h.transpose();
                xh.as_ref() * g.as_ref()
            }
            LayerParams::ToeplitzLike { g, h, cycle } => {
                toeplitz_mult(g.as_ref(), h.as_ref(), x, *cycle)?
            }
            LayerParams::Hankel { g, h } => {
                let out = toeplitz_mult(g.as_ref(), h.as_ref(), x, true)?;
                reverse_rows(out.as_ref())
            }
            LayerParams::Vandermonde { g, h, diag } => {
                let shift = ToeplitzOperator::new(n, 0.0, x.nrows(), self.rank)?;
                let scaling = DiagonalOperator::new(diag.clone())?;
                displacement_multiply(&shift, &scaling, g.as_ref(), h.as_ref(), x)?
            }
            LayerParams::Subdiagonal {
                g,
                h,
                subd,
                corners,
            } => subdiagonal_multiply(
                subd.a(),
                subd.b(),
                g.as_ref(),
                h.as_ref(),
                x,
                corners.map(|(a, _)| a),
                corners.map(|(_, b)| b),
            )?,
            LayerParams::Tridiagonal { g, h, coeffs } => {
                tridiagonal_multiply(coeffs.a(), coeffs.b(), g.as_ref(), h.as_ref(), x)?
            }
        };
        if let Some(bias) = &self.bias {
            for i in 0..out.nrows() {
                for (j, &b) in bias.iter().enumerate() {
                    out[(i, j)] += b;
                }
            }
        }
        Ok(out)
    }
}

/// Multiplies every row of `x` by the circulant matrix with first column `c`.
///
/// `Krylov(Z_1, c)` is exactly that circulant matrix, so this is one forward Krylov
/// product with the inputs as weights.
fn circulant_multiply(c: &[f32], x: MatRef<'_, f32>) -> Result<Mat<f32>, KrylovError> {
    let (batch, n) = (x.nrows(), x.ncols());
    let shift = ToeplitzOperator::new(n, 1.0, batch, 1)?;
    let seed = Mat::from_fn(1, n, |_, j| c[j]);
    let weights = Tensor3::from_fn(batch, 1, n, |b, _, j| x[(b, j)]);
    shift.krylov_multiply(seed.as_ref(), &weights)
}
