//! Frequency-domain helpers: coordinate wrapping, radius binning and the
//! band-pass envelope applied to damage weights before caching.

use crate::math::Image;

/// Wrapped centered frequency coordinate for the full-extent axis of a
/// half-plane spectrum: rows `0..s` map to `[-s/2, s/2)`.
#[inline]
pub fn wrapped_centered(y: usize, s: usize) -> i64 {
    ((y + s / 2) % s) as i64 - (s / 2) as i64
}

/// Integer radius bin for the sample at centered offset `(x, yy)`.
#[inline]
pub fn radius_bin(x: i64, yy: i64) -> usize {
    (((x * x + yy * yy) as f64).sqrt() + 0.5) as usize
}

/// Smooth band-limiting envelope: 1 below `k0`, 0 above `k1`, a raised-cosine
/// taper in between.
pub fn bandpass_envelope(r: f64, k0: f64, k1: f64) -> f64 {
    if r <= k0 {
        1.0
    } else if r >= k1 {
        0.0
    } else {
        let u = (r - k0) / (k1 - k0);
        0.5 * (1.0 + (std::f64::consts::PI * u).cos())
    }
}

/// Multiply a half-plane weight mask by the band-pass envelope around the
/// alignment cutoff. Computed once per run; every later hyperparameter trial
/// reuses the result.
pub fn band_limit_weights(weights: &Image<f32>, k0: f64, k1: f64) -> Image<f32> {
    let s = weights.height();
    Image::from_fn(weights.width(), s, |x, y| {
        let yy = wrapped_centered(y, s);
        let r = ((x * x) as f64 + (yy * yy) as f64).sqrt();
        weights.at(x, y) * bandpass_envelope(r, k0, k1) as f32
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_covers_half_plane() {
        let s = 8;
        assert_eq!(wrapped_centered(0, s), 0);
        assert_eq!(wrapped_centered(1, s), 1);
        assert_eq!(wrapped_centered(3, s), 3);
        assert_eq!(wrapped_centered(4, s), -4);
        assert_eq!(wrapped_centered(7, s), -1);
    }

    #[test]
    fn radius_rounds_to_nearest() {
        assert_eq!(radius_bin(0, 0), 0);
        assert_eq!(radius_bin(3, 4), 5);
        assert_eq!(radius_bin(1, 1), 1); // sqrt(2) ≈ 1.414 rounds to 1
    }

    #[test]
    fn envelope_is_one_inside_zero_outside() {
        assert_eq!(bandpass_envelope(3.0, 9.0, 11.0), 1.0);
        assert_eq!(bandpass_envelope(15.0, 9.0, 11.0), 0.0);
        let mid = bandpass_envelope(10.0, 9.0, 11.0);
        assert!((mid - 0.5).abs() < 1e-12);
    }

    #[test]
    fn envelope_is_monotone_over_the_taper() {
        let mut prev = 1.0;
        for i in 0..=20 {
            let r = 9.0 + 2.0 * i as f64 / 20.0;
            let v = bandpass_envelope(r, 9.0, 11.0);
            assert!(v <= prev + 1e-12);
            prev = v;
        }
    }
}
