//! Motion-prior hyperparameter estimation.
//!
//! Responsibilities:
//!
//! - map optimizer coordinates to physical sigmas and score candidates
//!   against the alignment cache (`objective`)
//! - select micrographs, build the cache once and drive the simplex search
//!   (`estimator`)

pub mod estimator;
pub mod objective;

pub use estimator::*;
pub use objective::*;
