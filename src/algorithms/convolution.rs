//! Acyclic convolution and correlation of short real sequences.
//!
//! A [`Convolver`] is bound to one sequence length `m` and computes linear
//! (non-circular) convolutions by zero padding to `2m` and going through the packed
//! real FFT of [`crate::fft::RealFftPlan`]. Below [`DIRECT_CUTOFF`] the FFT setup
//! costs more than it saves, so [`Convolver::new`] falls back to the O(m²) sum.
//!
//! All buffers are row-major; every method treats its inputs as a stack of
//! length-`m` (or `2m`) rows.

use crate::error::KrylovError;
use crate::fft::RealFftPlan;
use num_complex::Complex32;
use rustfft::FftPlanner;

/// Sequence length at and below which convolutions are summed directly.
pub const DIRECT_CUTOFF: usize = 16;

#[derive(Clone, Debug)]
pub struct Convolver {
    m: usize,
    plan: Option<RealFftPlan>,
}

impl Convolver {
    /// A convolver for length-`m` sequences that picks the direct or FFT path by size.
    pub fn new(planner: &mut FftPlanner<f32>, m: usize) -> Result<Self, KrylovError> {
        if m <= DIRECT_CUTOFF {
            Ok(Self { m, plan: None })
        } else {
            Self::with_fft(planner, m)
        }
    }

    /// A convolver for length-`m` sequences that always runs through the real FFT.
    pub fn with_fft(planner: &mut FftPlanner<f32>, m: usize) -> Result<Self, KrylovError> {
        Ok(Self {
            m,
            plan: Some(RealFftPlan::new(planner, 2 * m.max(1))?),
        })
    }

    pub fn len(&self) -> usize {
        self.m
    }

    pub fn is_empty(&self) -> bool {
        self.m == 0
    }

    pub fn uses_fft(&self) -> bool {
        self.plan.is_some()
    }

    /// Half spectra of the rows of `x` (each `row_len <= 2m` long), zero padded to `2m`.
    fn spectra(plan: &RealFftPlan, x: &[f32], row_len: usize) -> Vec<Complex32> {
        let len = plan.len();
        let rows = x.len() / row_len.max(1);
        let mut padded = vec![0.0; rows * len];
        for (dst, src) in padded.chunks_exact_mut(len).zip(x.chunks_exact(row_len)) {
            dst[..row_len].copy_from_slice(src);
        }
        plan.forward(&padded)
    }

    /// Convolves every row of `a` with every row of `b`.
    ///
    /// Returns a `rows_a × rows_b × 2m` buffer; entry `k` of each output row is
    /// `Σ_i a[i]·b[k-i]`, and the trailing entry is always zero.
    pub fn outer(&self, a: &[f32], b: &[f32]) -> Vec<f32> {
        let m = self.m;
        let rows_a = a.len() / m;
        let rows_b = b.len() / m;
        let Some(plan) = &self.plan else {
            let mut out = vec![0.0; rows_a * rows_b * 2 * m];
            for (ia, ra) in a.chunks_exact(m).enumerate() {
                for (ib, rb) in b.chunks_exact(m).enumerate() {
                    let dst = &mut out[(ia * rows_b + ib) * 2 * m..][..2 * m];
                    for (i, &x) in ra.iter().enumerate() {
                        for (j, &y) in rb.iter().enumerate() {
                            dst[i + j] += x * y;
                        }
                    }
                }
            }
            return out;
        };

        let bins = plan.bins();
        let fa = Self::spectra(plan, a, m);
        let fb = Self::spectra(plan, b, m);
        let mut product = Vec::with_capacity(rows_a * rows_b * bins);
        for sa in fa.chunks_exact(bins) {
            for sb in fb.chunks_exact(bins) {
                product.extend(sa.iter().zip(sb).map(|(x, y)| x * y));
            }
        }
        let mut out = plan.inverse(&product);
        for row in out.chunks_exact_mut(2 * m) {
            row[2 * m - 1] = 0.0;
        }
        out
    }

    /// `out[b] = Σ_r a[b, r] * c[r]` for `a` of shape `batch × rank × m` and `c` of
    /// shape `rank × m`, giving `batch × 2m` full linear convolutions.
    pub fn sum_over_rank(&self, a: &[f32], c: &[f32], rank: usize) -> Vec<f32> {
        let m = self.m;
        let batch = a.len() / (rank * m).max(1);
        let Some(plan) = &self.plan else {
            let mut out = vec![0.0; batch * 2 * m];
            for b in 0..batch {
                let dst = &mut out[b * 2 * m..][..2 * m];
                for (r, rc) in c.chunks_exact(m).enumerate() {
                    let ra = &a[(b * rank + r) * m..][..m];
                    for (i, &x) in ra.iter().enumerate() {
                        for (j, &y) in rc.iter().enumerate() {
                            dst[i + j] += x * y;
                        }
                    }
                }
            }
            return out;
        };

        let bins = plan.bins();
        let fa = Self::spectra(plan, a, m);
        let fc = Self::spectra(plan, c, m);
        let mut summed = vec![Complex32::new(0.0, 0.0); batch * bins];
        for (b, acc) in summed.chunks_exact_mut(bins).enumerate() {
            for (r, sc) in fc.chunks_exact(bins).enumerate() {
                let sa = &fa[(b * rank + r) * bins..][..bins];
                for ((dst, x), y) in acc.iter_mut().zip(sa).zip(sc) {
                    *dst += x * y;
                }
            }
        }
        plan.inverse(&summed)
    }

    /// Shifted correlation summed over rank.
    ///
    /// For `a` of shape `batch × rank × 2m` and `c` of shape `rank × m`, returns
    /// `batch × m` with `out[b][p] = Σ_r Σ_k a[b, r][p + 1 + k] · c[r][k]`.
    pub fn correlate_over_rank(&self, a: &[f32], c: &[f32], rank: usize) -> Vec<f32> {
        let m = self.m;
        let batch = a.len() / (rank * 2 * m).max(1);
        let Some(plan) = &self.plan else {
            let mut out = vec![0.0; batch * m];
            for b in 0..batch {
                let dst = &mut out[b * m..][..m];
                for (r, rc) in c.chunks_exact(m).enumerate() {
                    let ra = &a[(b * rank + r) * 2 * m..][..2 * m];
                    for (p, value) in dst.iter_mut().enumerate() {
                        *value += rc.iter().enumerate().map(|(k, &y)| ra[p + 1 + k] * y).sum::<f32>();
                    }
                }
            }
            return out;
        };

        // Convolving with the reversed rows puts the correlation at offset m; the
        // circular wrap of a length-2m transform lands past 3m-2 and never aliases it.
        let reversed: Vec<f32> = c
            .chunks_exact(m)
            .flat_map(|row| row.iter().rev().copied())
            .collect();
        let bins = plan.bins();
        let fa = Self::spectra(plan, a, 2 * m);
        let fc = Self::spectra(plan, &reversed, m);
        let mut summed = vec![Complex32::new(0.0, 0.0); batch * bins];
        for (b, acc) in summed.chunks_exact_mut(bins).enumerate() {
            for (r, sc) in fc.chunks_exact(bins).enumerate() {
                let sa = &fa[(b * rank + r) * bins..][..bins];
                for ((dst, x), y) in acc.iter_mut().zip(sa).zip(sc) {
                    *dst += x * y;
                }
            }
        }
        plan.inverse(&summed)
            .chunks_exact(2 * m)
            .flat_map(|row| row[m..].to_vec())
            .collect()
    }
}
