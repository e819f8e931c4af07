//! Configuration and result types.
//!
//! These types are intentionally lightweight and serializable so they can be:
//!
//! - filled in by an outer option-parsing layer
//! - used in-memory during fitting
//! - exported alongside results by outer persistence layers

use serde::{Deserialize, Serialize};

/// Which residual the B-factor search minimizes.
///
/// Production uses the linearized radial residual; the 2-D anisotropic
/// variant evaluates the full quadratic misfit on the 2-D spectral grid and
/// is considerably more expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResidualKind {
    /// Linearized residual on the 1-D radial profile.
    #[default]
    Radial,
    /// Full `Σ w·|obs − a·b_r·pred|²` residual on the 2-D grid.
    Anisotropic2D,
}

/// B-factor fitting configuration.
///
/// Bounds and the scale floor are in physical units (Å², unitless scale);
/// the search itself runs in internal pixel units derived from the box size
/// and pixel size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BFactorConfig {
    /// Minimal allowed B-factor.
    pub min_b: f64,
    /// Maximal allowed B-factor.
    pub max_b: f64,
    /// Minimal allowed scale factor (essential for outlier rejection).
    pub min_scale: f64,
    /// Inner frequency threshold for B-factor estimation [Å].
    pub kmin_angst: f64,
    /// Estimate one B-factor per micrograph instead of per particle.
    pub per_micrograph: bool,
}

impl Default for BFactorConfig {
    fn default() -> Self {
        Self {
            min_b: -30.0,
            max_b: 300.0,
            min_scale: 0.2,
            kmin_angst: 30.0,
            per_micrograph: false,
        }
    }
}

/// A fitted (B-factor, scale) pair.
///
/// `bfactor` is always in the caller's physical units (Å²); `scale` is
/// clamped to the configured minimum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub bfactor: f64,
    pub scale: f64,
}

/// Per-micrograph fit output: one `FitResult` per particle.
///
/// In per-micrograph mode every particle carries the same fit. This record
/// is the opaque sink consumed by outer persistence/diagnostic layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrographBFactors {
    /// Index of the micrograph in the caller's table.
    pub micrograph: usize,
    /// Fits ordered by particle index.
    pub fits: Vec<FitResult>,
}

/// How many motion-prior sigmas are searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamMode {
    /// Search velocity and divergence; acceleration stays fixed.
    Two,
    /// Search velocity, divergence and acceleration.
    Three,
}

/// Motion-prior standard deviations (velocity, divergence, acceleration).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigmaSet {
    pub vel: f64,
    pub div: f64,
    pub acc: f64,
}

/// Sentinel reported for the acceleration sigma when the 3-parameter search
/// drives it non-positive (acceleration prior disabled).
pub const SIGMA_ACC_DISABLED: f64 = -1.0;

/// Hyperparameter estimation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationConfig {
    /// 2- or 3-parameter search space.
    pub mode: ParamMode,
    /// Frequency cutoff for alignment [pixels]. Mutually exclusive with
    /// `k_cutoff_angst`.
    pub k_cutoff: Option<f64>,
    /// Frequency cutoff for alignment [Å]. Mutually exclusive with
    /// `k_cutoff`.
    pub k_cutoff_angst: Option<f64>,
    /// Threshold frequency for evaluation [pixels]. Defaults to the
    /// alignment cutoff when neither evaluation field is set.
    pub k_eval: Option<f64>,
    /// Threshold frequency for evaluation [Å].
    pub k_eval_angst: Option<f64>,
    /// Minimum number of particles on which to estimate the parameters.
    pub min_particles: usize,
    /// Initial sigma guesses (physical units).
    pub initial: SigmaSet,
    /// Initial simplex step (problem units, i.e. units of s_div).
    pub init_step: f64,
    /// Abort when the simplex diameter falls below this (problem units).
    pub conv: f64,
    /// Maximum number of simplex iterations.
    pub max_iters: usize,
    /// Limit allowed motion range [px]; non-positive disables cropping.
    pub max_range: i64,
    /// Random seed for micrograph selection.
    pub seed: u64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            mode: ParamMode::Two,
            k_cutoff: None,
            k_cutoff_angst: None,
            k_eval: None,
            k_eval_angst: None,
            min_particles: 1000,
            initial: SigmaSet {
                vel: 0.6,
                div: 3000.0,
                acc: 5.0,
            },
            init_step: 100.0,
            conv: 10.0,
            max_iters: 50,
            max_range: 50,
            seed: 23,
        }
    }
}

/// Estimation output: the tuned sigmas and the cross-validated score they
/// achieved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EstimationResult {
    pub sigmas: SigmaSet,
    pub score: f64,
}
