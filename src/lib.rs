//! `motionfit` library crate.
//!
//! Parameter fitting for a cryo-EM refinement pipeline, split into two
//! independent engines:
//!
//! - `bfactor`: per-particle B-factor/scale fitting from radial amplitude
//!   profiles, via a deterministic recursive grid-refinement search with a
//!   closed-form scale sub-solve
//! - `params`: motion-prior hyperparameter tuning, a Nelder-Mead simplex
//!   search driven against a precomputed, memory-bounded alignment cache
//!   (`align`)
//!
//! The expensive collaborators (trajectory solver, reference projections,
//! observation model) are consumed through the traits in `align::solver`,
//! so the core stays testable with mock data.

pub mod align;
pub mod bfactor;
pub mod domain;
pub mod error;
pub mod math;
pub mod optim;
pub mod params;
