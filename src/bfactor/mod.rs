//! Per-particle B-factor / scale-factor fitting.
//!
//! Responsibilities:
//!
//! - reduce complex half-plane spectra into 1-D radial profiles (`radial`)
//! - fit (B, scale) per profile by recursive grid refinement (`search`)
//! - drive both per micrograph, in per-particle or per-micrograph mode
//!   (`refiner`)

pub mod radial;
pub mod refiner;
pub mod search;

pub use radial::*;
pub use refiner::*;
pub use search::*;
