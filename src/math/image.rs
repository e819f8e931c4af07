//! Minimal row-major 2-D buffer.
//!
//! Spectra, correlation maps and weight masks are all small dense rasters;
//! a flat `Vec` with index arithmetic is all we need. FFT machinery and
//! image I/O live outside this crate.

use num_complex::Complex64;

/// A dense `w × h` raster stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    w: usize,
    h: usize,
    data: Vec<T>,
}

/// A complex half-plane spectrum: full extent in y, half extent in x.
pub type Spectrum = Image<Complex64>;

impl<T: Copy + Default> Image<T> {
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            data: vec![T::default(); w * h],
        }
    }
}

impl<T: Copy> Image<T> {
    pub fn from_fn(w: usize, h: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                data.push(f(x, y));
            }
        }
        Self { w, h, data }
    }

    pub fn from_vec(w: usize, h: usize, data: Vec<T>) -> Self {
        assert_eq!(data.len(), w * h, "image data length mismatch");
        Self { w, h, data }
    }

    pub fn width(&self) -> usize {
        self.w
    }

    pub fn height(&self) -> usize {
        self.h
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> T {
        debug_assert!(x < self.w && y < self.h);
        self.data[y * self.w + x]
    }

    #[inline]
    pub fn at_mut(&mut self, x: usize, y: usize) -> &mut T {
        debug_assert!(x < self.w && y < self.h);
        &mut self.data[y * self.w + x]
    }

    pub fn pixels(&self) -> &[T] {
        &self.data
    }

    /// Copy the `w × h` corner at the origin into a new image.
    ///
    /// Used to bound correlation-map memory to the configured displacement
    /// window. Requesting a window at least as large as the source returns
    /// an unchanged copy.
    pub fn crop_corner(&self, w: usize, h: usize) -> Self {
        let w = w.min(self.w);
        let h = h.min(self.h);
        Self::from_fn(w, h, |x, y| self.at(x, y))
    }
}
