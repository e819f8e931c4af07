//! Radial reduction of per-particle spectra.
//!
//! Every half-plane Fourier sample is binned by integer radius; per bin we
//! keep the weighted predicted self-energy (`t_rad`) and the weighted
//! observed/predicted cross term (`s_rad`). These two sequences are all the
//! 1-D B-factor search needs.

use rayon::prelude::*;

use crate::math::{Image, Spectrum, radius_bin, wrapped_centered};

/// Weighted radial sums over a half-plane spectrum pair.
///
/// Immutable once reduction finishes; merging partial profiles is an
/// elementwise sum, so the reduced result does not depend on accumulation
/// order beyond floating-point rounding.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialProfile {
    /// Per-radius weighted predicted self-energy `Σ w·|pred|²`.
    pub t_rad: Vec<f64>,
    /// Per-radius weighted cross term `Σ w·Re(conj(pred)·obs)`.
    pub s_rad: Vec<f64>,
}

impl RadialProfile {
    pub fn new(sh: usize) -> Self {
        Self {
            t_rad: vec![0.0; sh],
            s_rad: vec![0.0; sh],
        }
    }

    /// Half-spectrum radius count.
    pub fn sh(&self) -> usize {
        self.t_rad.len()
    }

    /// Accumulate one particle's observed and predicted spectra.
    ///
    /// `obs` and `pred` share the half-plane shape `(sh, s)`; `weight` is a
    /// real-valued mask of the same shape. Samples whose radius bin falls
    /// outside `0..sh` are ignored.
    pub fn accumulate(&mut self, obs: &Spectrum, pred: &Spectrum, weight: &Image<f64>) {
        let sh = obs.width();
        let s = obs.height();
        debug_assert_eq!(pred.width(), sh);
        debug_assert_eq!(pred.height(), s);
        debug_assert_eq!(self.sh(), sh);

        for y in 0..s {
            let yy = wrapped_centered(y, s);
            for x in 0..sh {
                let r = radius_bin(x as i64, yy);
                if r >= sh {
                    continue;
                }

                let zo = obs.at(x, y);
                let zp = pred.at(x, y);
                let w = weight.at(x, y);

                self.t_rad[r] += w * (zp.re * zp.re + zp.im * zp.im);
                self.s_rad[r] += w * (zp.re * zo.re + zp.im * zo.im);
            }
        }
    }

    /// Elementwise sum of two partial profiles.
    pub fn merge(mut self, other: &Self) -> Self {
        debug_assert_eq!(self.sh(), other.sh());
        for r in 0..self.t_rad.len() {
            self.t_rad[r] += other.t_rad[r];
            self.s_rad[r] += other.s_rad[r];
        }
        self
    }
}

/// Reduce all particles of a micrograph into a single profile.
///
/// Workers accumulate into private profiles which are combined by an
/// associative fold after the parallel region; no locking.
pub fn accumulate_micrograph(
    obs: &[Spectrum],
    pred: &[Spectrum],
    weight: &Image<f64>,
    sh: usize,
) -> RadialProfile {
    obs.par_iter()
        .zip(pred.par_iter())
        .fold(
            || RadialProfile::new(sh),
            |mut acc, (o, p)| {
                acc.accumulate(o, p, weight);
                acc
            },
        )
        .reduce(|| RadialProfile::new(sh), |a, b| a.merge(&b))
}
