//! Shared domain types.
//!
//! This module defines:
//!
//! - configuration structs for the two fitting engines (`BFactorConfig`,
//!   `EstimationConfig`)
//! - fit outputs (`FitResult`, `MicrographBFactors`, `SigmaSet`)

pub mod types;

pub use types::*;
