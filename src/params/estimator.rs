//! Hyperparameter estimation orchestration.
//!
//! Selects a reproducible micrograph subset, builds the alignment cache
//! once, drives the simplex search through the objective and rounds the
//! result onto the same resolution mesh as the search precision.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::align::{
    AlignmentCache, CacheParams, ObservationModel, ReferenceProjector, TrajectorySolver,
};
use crate::domain::{EstimationConfig, EstimationResult, ParamMode, SIGMA_ACC_DISABLED, SigmaSet};
use crate::error::AppError;
use crate::optim;
use crate::params::objective::{
    ACC_SCALE, DIV_SCALE, HyperparameterObjective, VEL_SCALE, sigmas_to_problem,
};

pub struct ParamEstimator<'a> {
    config: EstimationConfig,
    solver: &'a dyn TrajectorySolver,
    reference: &'a dyn ReferenceProjector,
    obs_model: &'a dyn ObservationModel,

    s: usize,
    k_cutoff: f64,
    k_eval: f64,
    selected: Vec<usize>,
    ready: bool,
}

impl<'a> ParamEstimator<'a> {
    pub fn new(
        config: EstimationConfig,
        solver: &'a dyn TrajectorySolver,
        reference: &'a dyn ReferenceProjector,
        obs_model: &'a dyn ObservationModel,
    ) -> Self {
        Self {
            config,
            solver,
            reference,
            obs_model,
            s: 0,
            k_cutoff: 0.0,
            k_eval: 0.0,
            selected: Vec::new(),
            ready: false,
        }
    }

    /// Validate the configuration, reconcile frequency units and select the
    /// micrograph subset.
    ///
    /// `particle_counts` gives the particle count of every available
    /// micrograph. All configuration problems are raised here, before any
    /// data is touched.
    pub fn init(&mut self, s: usize, particle_counts: &[usize]) -> Result<(), AppError> {
        if !self.solver.is_ready() {
            return Err(AppError::config(
                "ParamEstimator initialized before the trajectory solver",
            ));
        }

        self.s = s;

        self.k_cutoff = match (self.config.k_cutoff, self.config.k_cutoff_angst) {
            (Some(_), Some(_)) => {
                return Err(AppError::config(
                    "cutoff frequency can be provided in pixels or Angstrom, not both",
                ));
            }
            (Some(px), None) => px,
            (None, Some(a)) => self.obs_model.ang_to_pix(a, s),
            (None, None) => {
                return Err(AppError::config(
                    "parameter estimation requires a frequency cutoff",
                ));
            }
        };

        self.k_eval = match (self.config.k_eval, self.config.k_eval_angst) {
            (Some(_), Some(_)) => {
                return Err(AppError::config(
                    "evaluation frequency can be provided in pixels or Angstrom, not both",
                ));
            }
            (Some(px), None) => px,
            (None, Some(a)) => self.obs_model.ang_to_pix(a, s),
            (None, None) => self.k_cutoff,
        };

        self.selected = select_micrographs(
            particle_counts,
            self.config.min_particles,
            self.config.seed,
        );
        self.ready = true;

        Ok(())
    }

    /// Micrograph indices the estimation will run on, in visitation order.
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// Build the cache and run the simplex search.
    pub fn run(&self) -> Result<EstimationResult, AppError> {
        if !self.ready {
            return Err(AppError::config("ParamEstimator::run: not initialized"));
        }

        let initial = self.config.initial;
        let initial_px = (
            self.solver.normalize_sig_vel(initial.vel),
            self.solver.normalize_sig_acc(initial.acc),
            self.solver.normalize_sig_div(initial.div),
        );

        let mut cache = AlignmentCache::build(
            self.solver,
            self.reference,
            &self.selected,
            CacheParams {
                s: self.s,
                k_cutoff: self.k_cutoff,
                k_eval: self.k_eval,
                k_out: self.reference.k_out() as f64,
                max_range: self.config.max_range,
            },
            initial_px,
        );

        let mode = self.config.mode;
        let start = sigmas_to_problem(mode, initial);

        let mut objective =
            HyperparameterObjective::new(self.solver, &mut cache, mode, initial.acc);

        let (best, fmin) = optim::optimize(
            &mut objective,
            &start,
            self.config.init_step,
            self.config.conv,
            self.config.max_iters,
        );

        let opt = objective.problem_to_sigmas(&best);
        let conv = self.config.conv;

        // Round to half the convergence threshold: reported values land on
        // the same resolution mesh as the search precision.
        let round = |sig: f64, scale: f64| {
            conv * 0.5 * (2.0 * sig * scale / conv + 0.5).floor() / scale
        };

        let mut sigmas = SigmaSet {
            vel: round(opt.vel, VEL_SCALE),
            div: round(opt.div, DIV_SCALE),
            acc: round(opt.acc, ACC_SCALE),
        };

        match mode {
            // Acceleration was never searched; report the fixed input as-is.
            ParamMode::Two => sigmas.acc = initial.acc,
            // A non-positive optimum disables the acceleration prior.
            ParamMode::Three => {
                if opt.acc <= 0.0 {
                    sigmas.acc = SIGMA_ACC_DISABLED;
                }
            }
        }

        let score = -fmin;
        log::info!(
            "good parameters: s_vel {} s_div {} s_acc {} (score {score:.6})",
            sigmas.vel,
            sigmas.div,
            sigmas.acc
        );

        Ok(EstimationResult { sigmas, score })
    }
}

/// Seeded randomized subset selection.
///
/// One pseudo-random key per micrograph, visited in key order; micrographs
/// with fewer than 2 particles are skipped (motion estimation needs at least
/// two). Accumulation stops once the particle total reaches `min_particles`.
fn select_micrographs(particle_counts: &[usize], min_particles: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let keys: Vec<f64> = particle_counts.iter().map(|_| rng.r#gen()).collect();

    let mut order: Vec<usize> = (0..particle_counts.len()).collect();
    order.sort_by(|&a, &b| {
        keys[a]
            .partial_cmp(&keys[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut selected = Vec::new();
    let mut total = 0usize;

    for &m in &order {
        let pc = particle_counts[m];
        if pc < 2 {
            continue;
        }

        selected.push(m);
        total += pc;
        log::info!("selected micrograph {m} ({pc} particles, {total} total)");

        if total >= min_particles {
            break;
        }
    }

    if total < min_particles {
        log::warn!(
            "dataset does not contain {min_particles} particles in micrographs \
             with at least 2 particles ({total} found)"
        );
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    use crate::align::solver::{MicrographSkip, Orientation, PreparedMicrograph, Tracks};
    use crate::math::{Image, Spectrum};

    struct ZeroSolver {
        s: usize,
        fc: usize,
        counts: Vec<usize>,
        ready: bool,
    }

    impl TrajectorySolver for ZeroSolver {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn damage_weights(&self) -> Vec<Image<f32>> {
            let sh = self.s / 2 + 1;
            (0..self.fc)
                .map(|_| Image::from_fn(sh, self.s, |_, _| 1.0))
                .collect()
        }

        fn prep_micrograph(
            &self,
            g: usize,
            _band_weights: &[Image<f32>],
        ) -> Result<PreparedMicrograph, MicrographSkip> {
            let pc = self.counts[g];
            let sh = self.s / 2 + 1;
            Ok(PreparedMicrograph {
                movie: vec![vec![Spectrum::new(sh, self.s); self.fc]; pc],
                cc: vec![vec![Image::new(32, 32); self.fc]; pc],
                positions: vec![Vector2::zeros(); pc],
                tracks: vec![vec![Vector2::zeros(); self.fc]; pc],
                glob_comp: vec![Vector2::zeros(); self.fc],
            })
        }

        fn solve_tracks(
            &self,
            _cc: &[Vec<Image<f32>>],
            initial: &Tracks,
            _sig_vel_px: f64,
            _sig_acc_px: f64,
            _sig_div_px: f64,
            _positions: &[Vector2<f64>],
            _glob_comp: &[Vector2<f64>],
        ) -> Tracks {
            initial.clone()
        }

        fn normalize_sig_vel(&self, sig: f64) -> f64 {
            sig
        }
        fn normalize_sig_div(&self, sig: f64) -> f64 {
            sig
        }
        fn normalize_sig_acc(&self, sig: f64) -> f64 {
            sig
        }
    }

    struct ZeroReference {
        s: usize,
    }

    impl ReferenceProjector for ZeroReference {
        fn predict(&self, _g: usize, _p: usize, _orientation: Orientation) -> Spectrum {
            Spectrum::new(self.s / 2 + 1, self.s)
        }

        fn hollow_weight(&self, _kmin_px: f64) -> Image<f64> {
            Image::from_fn(self.s / 2 + 1, self.s, |_, _| 1.0)
        }

        fn k_out(&self) -> usize {
            self.s / 2
        }
    }

    struct UnitObsModel;

    impl ObservationModel for UnitObsModel {
        fn pixel_size(&self) -> f64 {
            1.0
        }

        fn ang_to_pix(&self, angst: f64, s: usize) -> f64 {
            s as f64 / angst
        }

        fn pix_to_ang(&self, px: f64, s: usize) -> f64 {
            s as f64 / px
        }
    }

    fn config_with_cutoff() -> EstimationConfig {
        EstimationConfig {
            k_cutoff: Some(5.0),
            ..EstimationConfig::default()
        }
    }

    fn solver(counts: Vec<usize>) -> ZeroSolver {
        ZeroSolver {
            s: 16,
            fc: 2,
            counts,
            ready: true,
        }
    }

    #[test]
    fn uninitialized_solver_is_a_config_error() {
        let mut sv = solver(vec![5]);
        sv.ready = false;
        let reference = ZeroReference { s: 16 };
        let mut est = ParamEstimator::new(config_with_cutoff(), &sv, &reference, &UnitObsModel);
        let err = est.init(16, &[5]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn conflicting_cutoff_units_are_rejected() {
        let sv = solver(vec![5]);
        let reference = ZeroReference { s: 16 };
        let config = EstimationConfig {
            k_cutoff: Some(5.0),
            k_cutoff_angst: Some(20.0),
            ..EstimationConfig::default()
        };
        let mut est = ParamEstimator::new(config, &sv, &reference, &UnitObsModel);
        assert_eq!(est.init(16, &[5]).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn missing_cutoff_is_rejected() {
        let sv = solver(vec![5]);
        let reference = ZeroReference { s: 16 };
        let mut est =
            ParamEstimator::new(EstimationConfig::default(), &sv, &reference, &UnitObsModel);
        assert_eq!(est.init(16, &[5]).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn selection_skips_tiny_micrographs_and_is_deterministic() {
        // Three micrographs with particle counts {1, 5, 10}; quota 12. The
        // single-particle micrograph is excluded (pc < 2), both others are
        // needed to reach the quota, in seeded visitation order.
        let counts = [1usize, 5, 10];
        let a = select_micrographs(&counts, 12, 23);
        let b = select_micrographs(&counts, 12, 23);

        assert_eq!(a, b);
        assert!(!a.contains(&0));
        assert_eq!(a.len(), 2);
        assert!(a.contains(&1) && a.contains(&2));
    }

    #[test]
    fn selection_stops_at_the_quota() {
        let counts = [10usize, 10, 10, 10];
        let sel = select_micrographs(&counts, 15, 7);
        assert_eq!(sel.len(), 2); // 10 < 15 ≤ 20
    }

    #[test]
    fn unmet_quota_still_selects_what_exists() {
        let counts = [3usize, 1];
        let sel = select_micrographs(&counts, 1000, 23);
        assert_eq!(sel, vec![0]);
    }

    #[test]
    fn flat_objective_reports_initials_and_zero_score() {
        // All-zero spectra: both self-energy sums stay 0, so every candidate
        // scores exactly 0 and the search cannot move off the initial point.
        let sv = solver(vec![4, 6]);
        let reference = ZeroReference { s: 16 };
        let mut est = ParamEstimator::new(config_with_cutoff(), &sv, &reference, &UnitObsModel);
        est.init(16, &[4, 6]).unwrap();

        let out = est.run().unwrap();
        assert_eq!(out.score, 0.0);
        assert!((out.sigmas.vel - 0.6).abs() < 1e-9);
        assert!((out.sigmas.div - 3000.0).abs() < 1e-9);
        // 2-parameter mode: acceleration reported as the fixed input.
        assert_eq!(out.sigmas.acc, 5.0);
    }

    #[test]
    fn two_param_mode_reports_fixed_acc_regardless_of_sign() {
        let sv = solver(vec![4]);
        let reference = ZeroReference { s: 16 };
        let config = EstimationConfig {
            k_cutoff: Some(5.0),
            initial: SigmaSet {
                vel: 0.6,
                div: 3000.0,
                acc: -4.0,
            },
            ..EstimationConfig::default()
        };
        let mut est = ParamEstimator::new(config, &sv, &reference, &UnitObsModel);
        est.init(16, &[4]).unwrap();

        let out = est.run().unwrap();
        assert_eq!(out.sigmas.acc, -4.0);
    }

    #[test]
    fn three_param_mode_disables_non_positive_acc() {
        let sv = solver(vec![4]);
        let reference = ZeroReference { s: 16 };
        let config = EstimationConfig {
            mode: ParamMode::Three,
            k_cutoff: Some(5.0),
            initial: SigmaSet {
                vel: 0.6,
                div: 3000.0,
                acc: -5.0,
            },
            ..EstimationConfig::default()
        };
        let mut est = ParamEstimator::new(config, &sv, &reference, &UnitObsModel);
        est.init(16, &[4]).unwrap();

        let out = est.run().unwrap();
        assert_eq!(out.sigmas.acc, SIGMA_ACC_DISABLED);
    }

    #[test]
    fn run_before_init_is_a_config_error() {
        let sv = solver(vec![4]);
        let reference = ZeroReference { s: 16 };
        let est = ParamEstimator::new(config_with_cutoff(), &sv, &reference, &UnitObsModel);
        assert_eq!(est.run().unwrap_err().exit_code(), 2);
    }
}
