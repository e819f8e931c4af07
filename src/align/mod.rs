//! Alignment data caching and collaborator interfaces.
//!
//! The trajectory solver, reference projections and observation model are
//! expensive external components; `solver` defines the narrow traits through
//! which they are consumed, and `cache` holds the memory-bounded per-run
//! snapshot of their outputs that makes repeated hyperparameter trials
//! affordable.

pub mod cache;
pub mod solver;

pub use cache::*;
pub use solver::*;
