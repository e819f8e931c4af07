//! Cross-validated objective over the alignment cache.
//!
//! The optimizer works in an unconstrained "problem" space related to the
//! physical sigmas by fixed per-parameter scale constants, chosen so a unit
//! optimizer step has comparable physical effect on parameters whose natural
//! magnitudes differ by orders of magnitude.

use nalgebra::Vector3;

use crate::align::{AlignmentCache, TrajectorySolver};
use crate::domain::{ParamMode, SigmaSet};
use crate::optim::ObjectiveFn;

/// Problem-space scale for the velocity sigma (natural magnitude ~1).
pub const VEL_SCALE: f64 = 1000.0;
/// Problem-space scale for the divergence sigma (natural magnitude ~1e3).
pub const DIV_SCALE: f64 = 1.0;
/// Problem-space scale for the acceleration sigma.
pub const ACC_SCALE: f64 = 10000.0;

/// Physical sigmas → problem coordinates for the given mode.
pub fn sigmas_to_problem(mode: ParamMode, sigmas: SigmaSet) -> Vec<f64> {
    match mode {
        ParamMode::Two => vec![sigmas.vel * VEL_SCALE, sigmas.div * DIV_SCALE],
        ParamMode::Three => vec![
            sigmas.vel * VEL_SCALE,
            sigmas.div * DIV_SCALE,
            sigmas.acc * ACC_SCALE,
        ],
    }
}

/// The function minimized by the simplex driver: the negated cross-validated
/// correlation of solver tracks produced with the candidate sigmas.
pub struct HyperparameterObjective<'a> {
    solver: &'a dyn TrajectorySolver,
    cache: &'a mut AlignmentCache,
    mode: ParamMode,
    /// Acceleration sigma used in 2-parameter mode.
    fixed_acc: f64,
}

impl<'a> HyperparameterObjective<'a> {
    pub fn new(
        solver: &'a dyn TrajectorySolver,
        cache: &'a mut AlignmentCache,
        mode: ParamMode,
        fixed_acc: f64,
    ) -> Self {
        Self {
            solver,
            cache,
            mode,
            fixed_acc,
        }
    }

    /// Problem coordinates → physical sigmas.
    pub fn problem_to_sigmas(&self, x: &[f64]) -> SigmaSet {
        SigmaSet {
            vel: x[0] / VEL_SCALE,
            div: x[1] / DIV_SCALE,
            acc: match self.mode {
                ParamMode::Two => self.fixed_acc,
                ParamMode::Three => x[2] / ACC_SCALE,
            },
        }
    }

    /// Evaluate the cross-validated score for one candidate.
    ///
    /// Re-runs the trajectory solver per cached micrograph (overwriting each
    /// entry's trial track) and accumulates the score triplet additively.
    /// The final scalar is `cross / sqrt(self1·self2)`, or 0 when either
    /// self-energy vanishes.
    pub fn score(&mut self, sigmas: &SigmaSet) -> f64 {
        let sig_v = self.solver.normalize_sig_vel(sigmas.vel);
        let sig_d = self.solver.normalize_sig_div(sigmas.div);
        let sig_a = self.solver.normalize_sig_acc(sigmas.acc);

        let mut tsc = Vector3::zeros();
        for i in 0..self.cache.len() {
            self.cache.refresh_tracks(self.solver, i, sig_v, sig_a, sig_d);
            tsc += self.cache.update_score(i);
        }

        let wg = tsc.y * tsc.z;
        let score = if wg > 0.0 { tsc.x / wg.sqrt() } else { 0.0 };

        log::debug!(
            "evaluated s_vel={:.6} s_div={:.6} s_acc={:.6}: score {score:.6}",
            sigmas.vel,
            sigmas.div,
            sigmas.acc
        );

        score
    }
}

impl ObjectiveFn for HyperparameterObjective<'_> {
    fn eval(&mut self, x: &[f64]) -> f64 {
        let sigmas = self.problem_to_sigmas(x);
        -self.score(&sigmas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_mapping_round_trips() {
        let sigmas = SigmaSet {
            vel: 0.6,
            div: 3000.0,
            acc: 5.0,
        };

        for mode in [ParamMode::Two, ParamMode::Three] {
            let x = sigmas_to_problem(mode, sigmas);
            assert_eq!(x.len(), if mode == ParamMode::Two { 2 } else { 3 });
            assert!((x[0] - 600.0).abs() < 1e-12);
            assert!((x[1] - 3000.0).abs() < 1e-12);
            if mode == ParamMode::Three {
                assert!((x[2] - 50000.0).abs() < 1e-12);
            }
        }
    }
}
