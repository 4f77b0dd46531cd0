//! Divide-and-conquer Krylov products for subdiagonal operators.
//!
//! The operator `A` is zero except for its subdiagonal `A[i+1, i] = subd[i]` and an
//! optional corner `A[0, n-1] = c` that closes the shift into a cycle. Without the
//! corner `A` is nilpotent, and splitting it into two halves gives
//!
//! ```text
//! A = | A_L       0  |
//!     | s e₀eₗᵀ  A_R |      s = subd[h-1],  eₗ = last unit vector of the top half
//! ```
//!
//! so every power `A^j` is the block-diagonal power plus a single coupling term that
//! crosses the split once. Each block therefore reports a handful of boundary
//! sequences (its first-column and last-row Krylov traces, the product of its
//! subdiagonal) and the parent combines them with one linear convolution per level.
//! The corner is handled once at the top: within `n - 1` steps a vector can wrap
//! around at most once.
//!
//! Both products cost O(b·r·n log² n) with the FFT convolutions of
//! [`super::convolution`], and fall back to direct sums on small blocks.

use super::convolution::Convolver;
use super::{KrylovOperator, check_forward_operands, check_transpose_operands, rows_to_vec};
use crate::error::{KrylovError, ensure_dim, ensure_power_of_two};
use crate::matrix::Tensor3;
use faer::{Mat, MatRef};
use rustfft::FftPlanner;

/// A subdiagonal operator of size `n = subd.len() + 1`, optionally closed by a corner.
#[derive(Clone, Debug)]
pub struct SubdiagonalOperator {
    subd: Vec<f32>,
    corner: Option<f32>,
    /// `convolvers[k]` convolves sequences of length `2^k`.
    convolvers: Vec<Convolver>,
}

/// Boundary data of one block for the transpose product.
struct TransposeBlock {
    /// `u_bᵀ A^j v_r`, batch×rank×m.
    uv: Vec<f32>,
    /// `u_bᵀ A^j e₀`, batch×m.
    u_first: Vec<f32>,
    /// `eₗᵀ A^j v_r`, rank×m.
    v_last: Vec<f32>,
    /// Product of the block's subdiagonal entries.
    span: f32,
}

/// Boundary data of one block for the forward product.
struct ForwardBlock {
    /// `Σ_r Σ_j w[b, r, j] A^j v_r`, batch×m.
    y: Vec<f32>,
    /// `eₗᵀ A^j v_r`, rank×m.
    v_last: Vec<f32>,
    /// Entry `p` of `A^p e₀`, length m.
    prefix: Vec<f32>,
    span: f32,
}

impl SubdiagonalOperator {
    /// Creates the operator from its `n - 1` subdiagonal entries.
    ///
    /// Fails with [`crate::error::KrylovErrorKind::InvalidSize`] unless
    /// `subd.len() + 1` is a power of two.
    pub fn new(subd: Vec<f32>, corner: Option<f32>) -> Result<Self, KrylovError> {
        let n = subd.len() + 1;
        ensure_power_of_two(n)?;
        let mut planner = FftPlanner::new();
        let convolvers = (0..=n.trailing_zeros())
            .map(|k| Convolver::new(&mut planner, 1 << k))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("Planned subdiagonal operator: n={n}, corner={corner:?}");
        Ok(Self {
            subd,
            corner,
            convolvers,
        })
    }

    pub fn subd(&self) -> &[f32] {
        &self.subd
    }

    pub fn corner(&self) -> Option<f32> {
        self.corner
    }

    /// The scalar `f` with `A^n = f·I`: the corner times every subdiagonal entry.
    pub fn power_scalar(&self) -> f32 {
        self.corner.unwrap_or(0.0) * self.subd.iter().product::<f32>()
    }

    /// The operator with its subdiagonal reversed and the corner kept, `J Aᵀ J`.
    pub(crate) fn reversed(&self) -> Self {
        Self {
            subd: self.subd.iter().rev().copied().collect(),
            corner: self.corner,
            convolvers: self.convolvers.clone(),
        }
    }

    fn convolver(&self, m: usize) -> &Convolver {
        &self.convolvers[m.trailing_zeros() as usize]
    }

    fn transpose_block(
        &self,
        lo: usize,
        m: usize,
        u: &[f32],
        v: &[f32],
        dims: (usize, usize, usize),
    ) -> TransposeBlock {
        let (batch, rank, n) = dims;
        if m == 1 {
            let u_first: Vec<f32> = (0..batch).map(|b| u[b * n + lo]).collect();
            let v_last: Vec<f32> = (0..rank).map(|r| v[r * n + lo]).collect();
            let uv = u_first
                .iter()
                .flat_map(|&x| v_last.iter().map(move |&y| x * y))
                .collect();
            return TransposeBlock {
                uv,
                u_first,
                v_last,
                span: 1.0,
            };
        }

        let h = m / 2;
        let left = self.transpose_block(lo, h, u, v, dims);
        let right = self.transpose_block(lo + h, h, u, v, dims);
        let s = self.subd[lo + h - 1];
        if lo == 0 {
            log::trace!("subdiagonal transpose: combining blocks of size {h}");
        }

        // Terms of A^j that carry v across the split from the top half into the
        // bottom half contribute s·conv(u_first_R, v_last_L)[j - 1].
        let cross = self.convolver(h).outer(&right.u_first, &left.v_last);
        let mut uv = vec![0.0; batch * rank * m];
        for (pair, dst) in uv.chunks_exact_mut(m).enumerate() {
            let own = &left.uv[pair * h..][..h];
            let other = &right.uv[pair * h..][..h];
            for j in 0..h {
                dst[j] = own[j] + other[j];
            }
            let crossing = &cross[pair * 2 * h..][..2 * h];
            for j in 1..m {
                dst[j] += s * crossing[j - 1];
            }
        }

        let u_first = concat_scaled(&left.u_first, &right.u_first, h, s * left.span);
        let v_last = concat_scaled(&right.v_last, &left.v_last, h, s * right.span);
        TransposeBlock {
            uv,
            u_first,
            v_last,
            span: s * left.span * right.span,
        }
    }

    fn forward_block(
        &self,
        lo: usize,
        m: usize,
        v: &[f32],
        w: &Tensor3,
    ) -> ForwardBlock {
        let (batch, rank, n) = (w.batch(), w.rank(), w.n());
        if m == 1 {
            let v_last: Vec<f32> = (0..rank).map(|r| v[r * n + lo]).collect();
            let y = (0..batch)
                .map(|b| (0..rank).map(|r| w.get(b, r, 0) * v_last[r]).sum::<f32>())
                .collect();
            return ForwardBlock {
                y,
                v_last,
                prefix: vec![1.0],
                span: 1.0,
            };
        }

        let h = m / 2;
        let left = self.forward_block(lo, h, v, w);
        let right = self.forward_block(lo + h, h, v, w);
        let s = self.subd[lo + h - 1];
        if lo == 0 {
            log::trace!("subdiagonal forward: combining blocks of size {h}");
        }

        // The coefficients of powers 0..m, for every (b, r).
        let mut w_block = Vec::with_capacity(batch * rank * m);
        for b in 0..batch {
            for r in 0..rank {
                w_block.extend_from_slice(&w.seq(b, r)[..m]);
            }
        }
        let crossing = self.convolver(h).correlate_over_rank(&w_block, &left.v_last, rank);

        let mut y = Vec::with_capacity(batch * m);
        for b in 0..batch {
            y.extend_from_slice(&left.y[b * h..][..h]);
            for p in 0..h {
                y.push(right.y[b * h + p] + s * right.prefix[p] * crossing[b * h + p]);
            }
        }

        let mut prefix = left.prefix.clone();
        prefix.extend(right.prefix.iter().map(|x| s * left.span * x));
        ForwardBlock {
            y,
            v_last: concat_scaled(&right.v_last, &left.v_last, h, s * right.span),
            prefix,
            span: s * left.span * right.span,
        }
    }
}

/// Row-wise `[a_row, scale · b_row]` for two stacks of length-`h` rows.
fn concat_scaled(a: &[f32], b: &[f32], h: usize, scale: f32) -> Vec<f32> {
    let mut out = Vec::with_capacity(2 * a.len());
    for (ra, rb) in a.chunks_exact(h).zip(b.chunks_exact(h)) {
        out.extend_from_slice(ra);
        out.extend(rb.iter().map(|x| scale * x));
    }
    out
}

impl KrylovOperator for SubdiagonalOperator {
    fn dim(&self) -> usize {
        self.subd.len() + 1
    }

    fn apply_vec(&self, x: &[f32]) -> Result<Vec<f32>, KrylovError> {
        let n = self.dim();
        ensure_dim("length of the vector", n, x.len())?;
        let mut y = vec![0.0; n];
        if let Some(c) = self.corner {
            y[0] = c * x[n - 1];
        }
        for (i, &s) in self.subd.iter().enumerate() {
            y[i + 1] = s * x[i];
        }
        Ok(y)
    }

    fn krylov_transpose_multiply(
        &self,
        v: MatRef<'_, f32>,
        u: MatRef<'_, f32>,
    ) -> Result<Tensor3, KrylovError> {
        let n = self.dim();
        check_transpose_operands(n, v, u)?;
        let (batch, rank) = (u.nrows(), v.nrows());
        let u_rows = rows_to_vec(u);
        let v_rows = rows_to_vec(v);

        let top = self.transpose_block(0, n, &u_rows, &v_rows, (batch, rank, n));
        let mut out = top.uv;
        if let Some(c) = self.corner.filter(|_| n > 1) {
            let wrapped = self.convolver(n).outer(&top.u_first, &top.v_last);
            for (dst, src) in out.chunks_exact_mut(n).zip(wrapped.chunks_exact(2 * n)) {
                for j in 1..n {
                    dst[j] += c * src[j - 1];
                }
            }
        }
        Tensor3::from_vec(batch, rank, n, out)
    }

    fn krylov_multiply(&self, v: MatRef<'_, f32>, w: &Tensor3) -> Result<Mat<f32>, KrylovError> {
        let n = self.dim();
        check_forward_operands(n, v, w)?;
        let (batch, rank) = (w.batch(), w.rank());
        let v_rows = rows_to_vec(v);

        let top = self.forward_block(0, n, &v_rows, w);
        let mut y = top.y;
        if let Some(c) = self.corner.filter(|_| n > 1) {
            let mut padded = vec![0.0; batch * rank * 2 * n];
            for (dst, src) in padded.chunks_exact_mut(2 * n).zip(w.as_slice().chunks_exact(n)) {
                dst[..n].copy_from_slice(src);
            }
            let wrapped = self.convolver(n).correlate_over_rank(&padded, &top.v_last, rank);
            for (dst, src) in y.chunks_exact_mut(n).zip(wrapped.chunks_exact(n)) {
                for p in 0..n {
                    dst[p] += c * top.prefix[p] * src[p];
                }
            }
        }
        Ok(Mat::from_fn(batch, n, |b, j| y[b * n + j]))
    }

    fn reflected(&self) -> Box<dyn KrylovOperator> {
        Box::new(self.reversed())
    }
}
