//! Memory-bounded alignment cache.
//!
//! Built once per estimation run; every hyperparameter trial afterwards is
//! served entirely from this cache. Movie data can run to tens of gigabytes,
//! so everything retained is reduced: spectra are stored as `Complex32` over
//! a band of Fourier samples (`k_min..k_out`), correlation maps as `f32`
//! cropped to the configured displacement window, and the full-resolution
//! loader buffers are dropped as soon as their reduced copies exist.

use nalgebra::{Vector2, Vector3};
use num_complex::Complex32;
use rayon::prelude::*;

use crate::align::solver::{Orientation, ReferenceProjector, Tracks, TrajectorySolver};
use crate::math::{Image, Spectrum, band_limit_weights, wrapped_centered};

/// Band of half-plane Fourier samples retained by the cache, plus the
/// per-frame damage weights sampled over it.
pub struct SpectralBand {
    s: usize,
    /// Centered sample coordinates `(x, yy)` with radius in `[k_min, k_out)`.
    samples: Vec<(i64, i64)>,
    /// Damage weight per frame per band sample.
    damage: Vec<Vec<f32>>,
}

impl SpectralBand {
    fn new(s: usize, k_min: f64, k_out: f64, damage_weights: &[Image<f32>]) -> Self {
        let sh = s / 2 + 1;
        let mut samples = Vec::new();
        for y in 0..s {
            let yy = wrapped_centered(y, s);
            for x in 0..sh {
                let r = ((x * x) as f64 + (yy * yy) as f64).sqrt();
                if r >= k_min && r < k_out {
                    samples.push((x as i64, yy));
                }
            }
        }

        let damage = damage_weights
            .iter()
            .map(|w| {
                samples
                    .iter()
                    .map(|&(x, yy)| {
                        let y = if yy >= 0 { yy } else { yy + s as i64 } as usize;
                        w.at(x as usize, y)
                    })
                    .collect()
            })
            .collect();

        Self { s, samples, damage }
    }

    /// Reduced-precision copy of a spectrum over the band.
    pub fn accelerate(&self, img: &Spectrum) -> Vec<Complex32> {
        self.samples
            .iter()
            .map(|&(x, yy)| {
                let y = if yy >= 0 { yy } else { yy + self.s as i64 } as usize;
                let z = img.at(x as usize, y);
                Complex32::new(z.re as f32, z.im as f32)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Cached state for one selected micrograph.
pub struct MicrographCache {
    /// Index of the micrograph in the caller's table.
    pub micrograph: usize,
    pub positions: Vec<Vector2<f64>>,
    /// Banded observed spectra, `[particle][frame]`.
    pub obs: Vec<Vec<Vec<Complex32>>>,
    /// Banded predicted spectra, `[particle]`.
    pub pred: Vec<Vec<Complex32>>,
    /// Cropped correlation maps, `[particle][frame]`.
    pub cc: Vec<Vec<Image<f32>>>,
    /// Baseline tracks from the initial solver run; trial inputs.
    pub initial_tracks: Tracks,
    /// Latest trial's tracks; the only field a trial overwrites.
    pub tracks: Tracks,
    pub glob_comp: Vec<Vector2<f64>>,
}

/// Geometry and band limits for a cache build.
#[derive(Debug, Clone, Copy)]
pub struct CacheParams {
    /// Spectrum box size.
    pub s: usize,
    /// Alignment frequency cutoff [px]; the band-pass envelope is centered
    /// here.
    pub k_cutoff: f64,
    /// Evaluation threshold [px]; the retained band starts at `k_eval + 2`.
    pub k_eval: f64,
    /// Outer resolution limit [px].
    pub k_out: f64,
    /// Maximum displacement range [px]; positive values crop correlation
    /// maps to `2·max_range` per axis.
    pub max_range: i64,
}

pub struct AlignmentCache {
    band: SpectralBand,
    entries: Vec<MicrographCache>,
}

impl AlignmentCache {
    /// Build the cache over `selected` micrographs.
    ///
    /// Sequential over micrographs (the solver is internally parallel);
    /// parallel over particles within each. Unloadable micrographs are
    /// skipped with a warning and the cache stays valid with fewer entries.
    pub fn build(
        solver: &dyn TrajectorySolver,
        reference: &dyn ReferenceProjector,
        selected: &[usize],
        params: CacheParams,
        initial_sigmas_px: (f64, f64, f64),
    ) -> Self {
        let damage = solver.damage_weights();

        // Band-pass the damage weights around the cutoff once; every later
        // trial reuses this filtered set through the solver.
        let align_weights: Vec<Image<f32>> = damage
            .iter()
            .map(|w| band_limit_weights(w, params.k_cutoff - 1.0, params.k_cutoff + 1.0))
            .collect();

        let band = SpectralBand::new(params.s, params.k_eval + 2.0, params.k_out, &damage);

        let (sig_v, sig_a, sig_d) = initial_sigmas_px;

        let mut entries = Vec::with_capacity(selected.len());
        let mut pctot = 0usize;

        for (i, &g) in selected.iter().enumerate() {
            let prepared = match solver.prep_micrograph(g, &align_weights) {
                Ok(prepared) => prepared,
                Err(skip) => {
                    log::warn!("unable to load micrograph #{g} ({skip}); skipping");
                    continue;
                }
            };

            let pc = prepared.movie.len();
            pctot += pc;
            log::info!(
                "caching micrograph {} / {}: {pc} particles [{pctot} total]",
                i + 1,
                selected.len(),
            );

            let movie = prepared.movie;
            let full_cc = prepared.cc;

            let crop = (params.max_range > 0).then(|| 2 * params.max_range as usize);

            let per_particle: Vec<_> = (0..pc)
                .into_par_iter()
                .map(|p| {
                    let obs_p: Vec<Vec<Complex32>> =
                        movie[p].iter().map(|f| band.accelerate(f)).collect();

                    let cc_p: Vec<Image<f32>> = full_cc[p]
                        .iter()
                        .map(|m| match crop {
                            Some(w) => m.crop_corner(w, w),
                            None => m.clone(),
                        })
                        .collect();

                    let pred_p = band.accelerate(&reference.predict(g, p, Orientation::Opposite));

                    (obs_p, cc_p, pred_p)
                })
                .collect();

            // Full-resolution buffers are the peak-memory driver; release
            // them before anything else runs.
            drop(movie);
            drop(full_cc);

            let mut obs = Vec::with_capacity(pc);
            let mut cc = Vec::with_capacity(pc);
            let mut pred = Vec::with_capacity(pc);
            for (obs_p, cc_p, pred_p) in per_particle {
                obs.push(obs_p);
                cc.push(cc_p);
                pred.push(pred_p);
            }

            // Baseline tracks from the caller-supplied starting sigmas.
            let initial_tracks = solver.solve_tracks(
                &cc,
                &prepared.tracks,
                sig_v,
                sig_a,
                sig_d,
                &prepared.positions,
                &prepared.glob_comp,
            );

            entries.push(MicrographCache {
                micrograph: g,
                positions: prepared.positions,
                obs,
                pred,
                cc,
                tracks: initial_tracks.clone(),
                initial_tracks,
                glob_comp: prepared.glob_comp,
            });
        }

        Self { band, entries }
    }

    pub fn entries(&self) -> &[MicrographCache] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-run the trajectory solver for entry `i` with candidate sigmas
    /// (pixel units), overwriting only that entry's `tracks` field.
    pub fn refresh_tracks(
        &mut self,
        solver: &dyn TrajectorySolver,
        i: usize,
        sig_vel_px: f64,
        sig_acc_px: f64,
        sig_div_px: f64,
    ) {
        let e = &mut self.entries[i];
        e.tracks = solver.solve_tracks(
            &e.cc,
            &e.initial_tracks,
            sig_vel_px,
            sig_acc_px,
            sig_div_px,
            &e.positions,
            &e.glob_comp,
        );
    }

    /// Accumulate the cross-validation triplet (cross term, self-energy of
    /// the prediction, self-energy of the observation) for entry `i`'s
    /// current tracks.
    ///
    /// The prediction is compared against each observed frame phase-shifted
    /// by its track displacement, damage-weighted per frame. Parallel over
    /// particles, reduced by elementwise sum.
    pub fn update_score(&self, i: usize) -> Vector3<f64> {
        let e = &self.entries[i];
        let s = self.band.s as f64;
        let two_pi = 2.0 * std::f64::consts::PI;

        e.obs
            .par_iter()
            .zip(e.pred.par_iter())
            .zip(e.tracks.par_iter())
            .fold(
                Vector3::zeros,
                |mut acc: Vector3<f64>, ((obs_p, pred_p), track_p)| {
                    for (f, (obs_f, shift)) in obs_p.iter().zip(track_p.iter()).enumerate() {
                        let damage_f = &self.band.damage[f];

                        for (j, &(x, yy)) in self.band.samples.iter().enumerate() {
                            let w = f64::from(damage_f[j]);
                            if w == 0.0 {
                                continue;
                            }

                            let phase =
                                -two_pi * (x as f64 * shift.x + yy as f64 * shift.y) / s;
                            let (sin, cos) = phase.sin_cos();

                            let zo = obs_f[j];
                            let zp = pred_p[j];
                            let (or, oi) = (f64::from(zo.re), f64::from(zo.im));
                            let (pr, pi) = (f64::from(zp.re), f64::from(zp.im));

                            // observation shifted by the track displacement
                            let sr = or * cos - oi * sin;
                            let si = or * sin + oi * cos;

                            acc.x += w * (pr * sr + pi * si);
                            acc.y += w * (pr * pr + pi * pi);
                            acc.z += w * (or * or + oi * oi);
                        }
                    }
                    acc
                },
            )
            .reduce(Vector3::zeros, |a, b| a + b)
    }
}
