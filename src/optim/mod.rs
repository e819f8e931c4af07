//! Derivative-free optimization.

pub mod nelder_mead;

pub use nelder_mead::*;
