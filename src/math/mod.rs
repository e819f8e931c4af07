//! Mathematical utilities: flat 2-D buffers and frequency-domain helpers.

pub mod filter;
pub mod image;

pub use filter::*;
pub use image::*;
