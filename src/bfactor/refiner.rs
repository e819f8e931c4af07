//! Per-micrograph B-factor fitting driver.
//!
//! Holds the configured bounds and the frequency weight mask, converts
//! between physical and internal pixel units, and runs the per-particle (or
//! per-micrograph) search in parallel.

use rayon::prelude::*;

use crate::align::solver::{ObservationModel, ReferenceProjector};
use crate::bfactor::{
    DEFAULT_DEPTH, DEFAULT_STEPS, RadialProfile, accumulate_micrograph, find_bk_aniso_2d,
    find_bk_radial,
};
use crate::domain::{BFactorConfig, FitResult, MicrographBFactors, ResidualKind};
use crate::error::AppError;
use crate::math::{Image, Spectrum};

/// Map an internal-unit B-factor to physical units.
///
/// `sampling` is the box size times the pixel size (Å). The configured
/// minimum is subtracted so the reported value is a true physical B-factor,
/// not an internal offset.
pub fn to_physical_bfactor(b_px: f64, sampling: f64, min_b: f64) -> f64 {
    sampling * sampling * b_px - min_b
}

pub struct BFactorRefiner {
    config: BFactorConfig,
    residual: ResidualKind,
    s: usize,
    sh: usize,
    angpix: f64,
    freq_weight: Image<f64>,
    ready: bool,
}

impl BFactorRefiner {
    pub fn new(config: BFactorConfig) -> Self {
        Self {
            config,
            residual: ResidualKind::default(),
            s: 0,
            sh: 0,
            angpix: 0.0,
            freq_weight: Image::new(0, 0),
            ready: false,
        }
    }

    /// Select the residual strategy. Production uses the default
    /// (linearized radial); the 2-D variant applies in per-particle mode
    /// only.
    pub fn with_residual(mut self, residual: ResidualKind) -> Self {
        self.residual = residual;
        self
    }

    /// Bind the collaborators and precompute the frequency weight mask.
    /// Must run before [`Self::process_micrograph`].
    pub fn init(
        &mut self,
        s: usize,
        reference: &dyn ReferenceProjector,
        obs_model: &dyn ObservationModel,
    ) {
        self.s = s;
        self.sh = s / 2 + 1;
        self.angpix = obs_model.pixel_size();

        let kmin_px = obs_model.ang_to_pix(self.config.kmin_angst, s);
        self.freq_weight = reference.hollow_weight(kmin_px);

        self.ready = true;
    }

    /// Fit (B-factor, scale) for every particle of a micrograph.
    ///
    /// `obs` and `pred` are per-particle half-plane spectra of shape
    /// `(sh, s)`; predictions carry the CTF already (synthesis is a
    /// collaborator concern). Reported B-factors are in physical units.
    pub fn process_micrograph(
        &self,
        micrograph: usize,
        obs: &[Spectrum],
        pred: &[Spectrum],
    ) -> Result<MicrographBFactors, AppError> {
        if !self.ready {
            return Err(AppError::config(
                "BFactorRefiner::process_micrograph: refiner not initialized",
            ));
        }
        if obs.len() != pred.len() {
            return Err(AppError::data(format!(
                "observed/predicted particle counts differ ({} vs {})",
                obs.len(),
                pred.len()
            )));
        }

        let sampling = self.s as f64 * self.angpix;
        let min_b_px = self.config.min_b / (sampling * sampling);
        let max_b_px = self.config.max_b / (sampling * sampling);

        let fits = if self.config.per_micrograph {
            // One profile for the whole micrograph, one fit for every
            // particle. Worker-private profiles, merged after the parallel
            // region.
            let profile = accumulate_micrograph(obs, pred, &self.freq_weight, self.sh);
            let bk = find_bk_radial(
                &profile,
                min_b_px,
                max_b_px,
                self.config.min_scale,
                DEFAULT_STEPS,
                DEFAULT_DEPTH,
            );
            let fit = FitResult {
                bfactor: to_physical_bfactor(bk.b, sampling, self.config.min_b),
                scale: bk.a,
            };
            vec![fit; obs.len()]
        } else {
            obs.par_iter()
                .zip(pred.par_iter())
                .map(|(o, p)| {
                    let bk = match self.residual {
                        ResidualKind::Radial => {
                            let mut profile = RadialProfile::new(self.sh);
                            profile.accumulate(o, p, &self.freq_weight);
                            find_bk_radial(
                                &profile,
                                min_b_px,
                                max_b_px,
                                self.config.min_scale,
                                DEFAULT_STEPS,
                                DEFAULT_DEPTH,
                            )
                        }
                        ResidualKind::Anisotropic2D => find_bk_aniso_2d(
                            o,
                            p,
                            &self.freq_weight,
                            min_b_px,
                            max_b_px,
                            self.config.min_scale,
                            DEFAULT_STEPS,
                            DEFAULT_DEPTH,
                        ),
                    };
                    FitResult {
                        bfactor: to_physical_bfactor(bk.b, sampling, self.config.min_b),
                        scale: bk.a,
                    }
                })
                .collect()
        };

        log::debug!(
            "micrograph {micrograph}: fitted {} particle B-factors",
            fits.len()
        );

        Ok(MicrographBFactors { micrograph, fits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    use crate::align::solver::Orientation;
    use crate::math::wrapped_centered;

    struct FlatReference {
        s: usize,
    }

    impl ReferenceProjector for FlatReference {
        fn predict(&self, _g: usize, _p: usize, _orientation: Orientation) -> Spectrum {
            Spectrum::new(self.s / 2 + 1, self.s)
        }

        fn hollow_weight(&self, kmin_px: f64) -> Image<f64> {
            let s = self.s;
            Image::from_fn(s / 2 + 1, s, |x, y| {
                let yy = wrapped_centered(y, s);
                let r = ((x * x) as f64 + (yy * yy) as f64).sqrt();
                if r >= kmin_px { 1.0 } else { 0.0 }
            })
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
            s as f64 * self.pixel_size() / angst
        }

        fn pix_to_ang(&self, px: f64, s: usize) -> f64 {
            s as f64 * self.pixel_size() / px
        }
    }

    fn damped_pair(s: usize, b_px: f64, a: f64) -> (Spectrum, Spectrum) {
        let sh = s / 2 + 1;
        let pred = Spectrum::from_fn(sh, s, |x, y| {
            Complex64::new(1.0 + ((x + y) % 5) as f64 * 0.2, 0.3)
        });
        let obs = Spectrum::from_fn(sh, s, |x, y| {
            let yy = wrapped_centered(y, s);
            let r = (((x * x) as f64 + (yy * yy) as f64).sqrt() + 0.5).floor();
            pred.at(x, y) * a * (-b_px * r * r / 4.0).exp()
        });
        (obs, pred)
    }

    #[test]
    fn processing_before_init_is_a_config_error() {
        let refiner = BFactorRefiner::new(BFactorConfig::default());
        let err = refiner.process_micrograph(0, &[], &[]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn per_particle_fit_recovers_damping_in_physical_units() {
        let s = 48;
        let config = BFactorConfig::default();
        let mut refiner = BFactorRefiner::new(config.clone());
        refiner.init(s, &FlatReference { s }, &UnitObsModel);

        let sampling = s as f64; // angpix = 1
        let b_phys = 120.0;
        let b_px = (b_phys + config.min_b) / (sampling * sampling);
        let a_true = 0.9;

        let (obs, pred) = damped_pair(s, b_px, a_true);
        let out = refiner
            .process_micrograph(3, &[obs], &[pred])
            .unwrap();

        assert_eq!(out.micrograph, 3);
        assert_eq!(out.fits.len(), 1);

        let fit = out.fits[0];
        // reported = sampling²·b_px − min_b, which reconstructs b_phys here
        assert!((fit.bfactor - b_phys).abs() < 0.01);
        assert!((fit.scale - a_true).abs() < 1e-3);
    }

    #[test]
    fn per_micrograph_mode_gives_every_particle_the_same_fit() {
        let s = 32;
        let mut config = BFactorConfig::default();
        config.per_micrograph = true;
        let mut refiner = BFactorRefiner::new(config);
        refiner.init(s, &FlatReference { s }, &UnitObsModel);

        let b_px = 0.002;
        let pairs: Vec<_> = (0..4).map(|_| damped_pair(s, b_px, 0.8)).collect();
        let obs: Vec<_> = pairs.iter().map(|(o, _)| o.clone()).collect();
        let pred: Vec<_> = pairs.iter().map(|(_, p)| p.clone()).collect();

        let out = refiner.process_micrograph(0, &obs, &pred).unwrap();
        assert_eq!(out.fits.len(), 4);
        for f in &out.fits[1..] {
            assert_eq!(*f, out.fits[0]);
        }
    }

    #[test]
    fn mismatched_particle_lists_are_rejected() {
        let s = 16;
        let mut refiner = BFactorRefiner::new(BFactorConfig::default());
        refiner.init(s, &FlatReference { s }, &UnitObsModel);

        let (obs, _) = damped_pair(s, 0.001, 1.0);
        let err = refiner.process_micrograph(0, &[obs], &[]).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
