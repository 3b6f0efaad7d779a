//! Point sets on the unit sphere used to place cameras around a scene.
//!
//! The Fibonacci lattice follows the offset variant described at
//! <https://extremelearning.com.au/how-to-evenly-distribute-points-on-a-sphere-more-effectively-than-the-canonical-fibonacci-lattice/>,
//! with an empirical per-count offset that keeps points away from the poles.
//!
//! All arithmetic mirrors the single-precision reference captures bit for bit,
//! so regression images produced from these directions stay comparable
//! between runs and platforms.

use std::f64::consts::PI;

/// Golden ratio as used by the lattice: `1 + sqrt(5) / 2`.
///
/// This is not the textbook `(1 + sqrt(5)) / 2`. Reference captures were
/// produced with this value, so it is kept.
#[inline]
pub fn golden_ratio() -> f32 {
    1.0 + 5.0f32.sqrt() / 2.0
}

/// Pole offset for a lattice of `num_samples` points.
///
/// Step function over fixed breakpoints; larger lattices get larger offsets.
pub fn epsilon(num_samples: u32) -> f32 {
    match num_samples {
        n if n >= 600_000 => 214.0,
        n if n >= 400_000 => 75.0,
        n if n >= 11_000 => 27.0,
        n if n >= 890 => 10.0,
        n if n >= 177 => 3.33,
        n if n >= 24 => 1.33,
        _ => 0.33,
    }
}

/// Direction of lattice point `index` out of `num_samples`, as `[x, y, z]`.
///
/// `epsilon` is normally [`epsilon`]`(num_samples)`; it is a parameter so
/// callers can cache it across a sweep.
pub fn fibonacci_direction(index: u32, num_samples: u32, epsilon: f32) -> [f32; 3] {
    let theta = (2.0 * PI * index as f64 / golden_ratio() as f64) as f32;
    let denom = num_samples.saturating_sub(1) as f32 + 2.0 * epsilon;
    let phi = (1.0f32 - 2.0 * (index as f32 + epsilon) / denom).acos();

    let x = theta.cos() * phi.sin();
    let y = theta.sin() * phi.sin();
    let z = phi.cos();
    [x, y, z]
}

/// Uniformly distributed direction from two uniform numbers in `[0, 1)`.
pub fn uniform_direction(u: f32, v: f32) -> [f32; 3] {
    let z = 1.0 - 2.0 * u;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let t = 2.0 * std::f32::consts::PI * v;
    [r * t.cos(), r * t.sin(), z]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn len(v: [f32; 3]) -> f32 {
        (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
    }

    #[test]
    fn test_epsilon_breakpoints() {
        assert_eq!(epsilon(1), 0.33);
        assert_eq!(epsilon(23), 0.33);
        assert_eq!(epsilon(24), 1.33);
        assert_eq!(epsilon(176), 1.33);
        assert_eq!(epsilon(177), 3.33);
        assert_eq!(epsilon(889), 3.33);
        assert_eq!(epsilon(890), 10.0);
        assert_eq!(epsilon(10_999), 10.0);
        assert_eq!(epsilon(11_000), 27.0);
        assert_eq!(epsilon(399_999), 27.0);
        assert_eq!(epsilon(400_000), 75.0);
        assert_eq!(epsilon(599_999), 75.0);
        assert_eq!(epsilon(600_000), 214.0);
        assert_eq!(epsilon(u32::MAX), 214.0);
    }

    #[test]
    fn test_epsilon_monotone() {
        let mut last = 0.0;
        for n in [1, 24, 177, 890, 11_000, 400_000, 600_000] {
            let e = epsilon(n);
            assert!(e > last);
            last = e;
        }
    }

    #[test]
    fn test_golden_ratio_value() {
        assert!((golden_ratio() - 2.118_034).abs() < 1e-6);
    }

    #[test]
    fn test_fibonacci_unit_length() {
        let n = 64;
        let eps = epsilon(n);
        for i in 0..n {
            let d = fibonacci_direction(i, n, eps);
            assert!((len(d) - 1.0).abs() < 1e-5, "point {i} has length {}", len(d));
        }
    }

    #[test]
    fn test_fibonacci_first_point() {
        // theta is zero for the first point, so y is exactly zero.
        let d = fibonacci_direction(0, 32, epsilon(32));
        assert_eq!(d[1], 0.0);
        assert!(d[0] > 0.0);
        assert!(d[2] > 0.0 && d[2] < 1.0);
    }

    #[test]
    fn test_fibonacci_avoids_poles() {
        let n = 8;
        let eps = epsilon(n);
        for i in 0..n {
            let z = fibonacci_direction(i, n, eps)[2];
            assert!(z.abs() < 0.999, "point {i} sits on a pole");
        }
    }

    #[test]
    fn test_fibonacci_single_sample() {
        let d = fibonacci_direction(0, 1, epsilon(1));
        // 1 - 2 * eps / (2 * eps) == 0 -> point on the equator
        assert!(d[2].abs() < 1e-6);
        assert!((d[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_uniform_direction() {
        assert!((uniform_direction(0.0, 0.0)[2] - 1.0).abs() < 1e-6);
        for (u, v) in [(0.1, 0.9), (0.5, 0.5), (0.99, 0.01)] {
            assert!((len(uniform_direction(u, v)) - 1.0).abs() < 1e-5);
        }
    }
}
