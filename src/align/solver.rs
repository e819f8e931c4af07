//! Collaborator interfaces.
//!
//! Everything this crate needs from the refinement pipeline is expressed as
//! a trait here, so the fitting engines stay testable with mock
//! implementations and never touch movie I/O, CTF synthesis or FFTs
//! directly.

use nalgebra::Vector2;

use crate::math::{Image, Spectrum};

/// Orientation convention requested from the reference projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Original,
    Opposite,
}

/// Why a micrograph could not be loaded.
///
/// Returned by [`TrajectorySolver::prep_micrograph`] instead of an error
/// type: a skipped micrograph is recovered from locally (warn and continue),
/// never propagated as a failure.
#[derive(Debug, Clone)]
pub enum MicrographSkip {
    /// Movie or metadata could not be read.
    Io(String),
    /// Data was present but inconsistent or unusable.
    Data(String),
}

impl std::fmt::Display for MicrographSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MicrographSkip::Io(m) => write!(f, "I/O error: {m}"),
            MicrographSkip::Data(m) => write!(f, "data error: {m}"),
        }
    }
}

/// Full-resolution per-micrograph data produced by the trajectory solver's
/// loader. Transient: reduced-precision copies go into the cache and these
/// buffers are released immediately afterwards.
pub struct PreparedMicrograph {
    /// Observed spectra, `[particle][frame]`.
    pub movie: Vec<Vec<Spectrum>>,
    /// Correlation maps, `[particle][frame]`.
    pub cc: Vec<Vec<Image<f32>>>,
    /// Initial particle positions.
    pub positions: Vec<Vector2<f64>>,
    /// Initial per-particle/frame tracks.
    pub tracks: Vec<Vec<Vector2<f64>>>,
    /// Per-frame global-motion placeholder.
    pub glob_comp: Vec<Vector2<f64>>,
}

/// A per-particle/frame displacement track.
pub type Tracks = Vec<Vec<Vector2<f64>>>;

/// The external motion/trajectory solver.
pub trait TrajectorySolver {
    /// Whether the solver has been initialized by the outer pipeline.
    fn is_ready(&self) -> bool;

    /// Per-frame radiation-damage weight masks (half-plane shape).
    fn damage_weights(&self) -> Vec<Image<f32>>;

    /// Load movie frames and correlation maps for micrograph `g`, using the
    /// given band-limited weighting masks.
    fn prep_micrograph(
        &self,
        g: usize,
        band_weights: &[Image<f32>],
    ) -> Result<PreparedMicrograph, MicrographSkip>;

    /// Refine tracks from cached correlation maps and the given sigmas
    /// (internal pixel units).
    fn solve_tracks(
        &self,
        cc: &[Vec<Image<f32>>],
        initial: &Tracks,
        sig_vel_px: f64,
        sig_acc_px: f64,
        sig_div_px: f64,
        positions: &[Vector2<f64>],
        glob_comp: &[Vector2<f64>],
    ) -> Tracks;

    /// Physical sigma → internal pixel units.
    fn normalize_sig_vel(&self, sig: f64) -> f64;
    fn normalize_sig_div(&self, sig: f64) -> f64;
    fn normalize_sig_acc(&self, sig: f64) -> f64;
}

/// The reference-projection collaborator.
///
/// `Sync` because predictions are requested from inside parallel
/// per-particle regions.
pub trait ReferenceProjector: Sync {
    /// Predicted complex spectrum for particle `p` of micrograph `g`.
    fn predict(&self, g: usize, p: usize, orientation: Orientation) -> Spectrum;

    /// High-pass frequency weight mask, zero below `kmin_px`.
    fn hollow_weight(&self, kmin_px: f64) -> Image<f64>;

    /// Outer resolution limit of the reference [pixels].
    fn k_out(&self) -> usize;
}

/// The observation-model collaborator: pixel size and frequency unit
/// conversions.
pub trait ObservationModel {
    /// Pixel size [Å].
    fn pixel_size(&self) -> f64;

    /// Å → pixel radius for a box of size `s`.
    fn ang_to_pix(&self, angst: f64, s: usize) -> f64;

    /// Pixel radius → Å for a box of size `s`.
    fn pix_to_ang(&self, px: f64, s: usize) -> f64;
}
