//! Direct least-squares ellipse fit (Fitzgibbon, Pilu & Fisher 1999) in the
//! numerically stable block form of Halíř & Flusser.
//!
//! Points are shifted to their centroid and scaled to a mean distance of √2
//! before building the scatter matrix, and the conic is mapped back to pixel
//! coordinates afterwards.

use nalgebra::{self as na, Matrix3, Point2, Vector3};

use super::conic::{matrix_from_coeffs, ConicError};
use crate::geom::ellipse::{Parametric, PlanarEllipse, Quadratic};

const MIN_POINTS: usize = 6;

/// Fit an ellipse to `points`.
///
/// The returned conic has passed [`super::conic::check_ellipse_conditions`].
pub fn fit_ellipse_direct(
    points: &[Point2<f64>],
) -> Result<PlanarEllipse<Quadratic<f64>>, ConicError> {
    if points.len() < MIN_POINTS {
        return Err(ConicError::TooFewPoints {
            needed: MIN_POINTS,
            got: points.len(),
        });
    }
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(ConicError::NonFinite);
    }

    let (mean, scale) = normalization(points);

    // Scatter matrix blocks of the design matrix rows [x², xy, y², x, y, 1].
    let mut s1 = Matrix3::<f64>::zeros();
    let mut s2 = Matrix3::<f64>::zeros();
    let mut s3 = Matrix3::<f64>::zeros();
    for p in points {
        let x = (p.x - mean.x) * scale;
        let y = (p.y - mean.y) * scale;
        let quad = Vector3::new(x * x, x * y, y * y);
        let lin = Vector3::new(x, y, 1.0);
        s1 += quad * quad.transpose();
        s2 += quad * lin.transpose();
        s3 += lin * lin.transpose();
    }

    let s3_inv = s3.try_inverse().ok_or(ConicError::SingularScatter)?;
    let t = -s3_inv * s2.transpose();
    let reduced = s1 + s2 * t;

    // Premultiply by the inverse of the constraint matrix [[0,0,2],[0,-1,0],[2,0,0]].
    let system = Matrix3::new(
        reduced[(2, 0)] / 2.0,
        reduced[(2, 1)] / 2.0,
        reduced[(2, 2)] / 2.0,
        -reduced[(1, 0)],
        -reduced[(1, 1)],
        -reduced[(1, 2)],
        reduced[(0, 0)] / 2.0,
        reduced[(0, 1)] / 2.0,
        reduced[(0, 2)] / 2.0,
    );

    let quad = elliptic_eigenvector(&system).ok_or(ConicError::NoEllipticSolution)?;
    let lin = t * quad;

    let coeffs = denormalize([quad[0], quad[1], quad[2], lin[0], lin[1], lin[2]], mean, scale);
    PlanarEllipse::<Quadratic<f64>>::try_from_matrix(matrix_from_coeffs(&coeffs))
}

/// RMS geometric residual of `points` against `ellipse`.
pub fn rms_distance(ellipse: &Parametric<f64>, points: &[Point2<f64>]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = points
        .iter()
        .map(|p| ellipse.radial_distance(p).powi(2))
        .sum();
    (sum_sq / points.len() as f64).sqrt()
}

fn normalization(points: &[Point2<f64>]) -> (Point2<f64>, f64) {
    let n = points.len() as f64;
    let sum = points
        .iter()
        .fold(na::Vector2::zeros(), |acc, p| acc + p.coords);
    let mean = Point2::from(sum / n);
    let mean_dist = points.iter().map(|p| (p - mean).norm()).sum::<f64>() / n;
    let scale = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    (mean, scale)
}

/// Undo `x' = s (x - mx)`, `y' = s (y - my)` on conic coefficients.
fn denormalize(c: [f64; 6], mean: Point2<f64>, s: f64) -> [f64; 6] {
    let [a, b, cc, d, e, f] = c;
    let (mx, my) = (mean.x, mean.y);
    let s2 = s * s;
    [
        a * s2,
        b * s2,
        cc * s2,
        -2.0 * a * s2 * mx - b * s2 * my + d * s,
        -b * s2 * mx - 2.0 * cc * s2 * my + e * s,
        a * s2 * mx * mx + b * s2 * mx * my + cc * s2 * my * my - d * s * mx - e * s * my + f,
    ]
}

/// Eigenvector of the 3x3 reduced system that satisfies `4AC - B² > 0`.
///
/// The system is not symmetric, so eigenvalues come from the characteristic
/// cubic and eigenvectors from the adjugate of `system - λI`.
fn elliptic_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let m = system;
    let trace = m.trace();
    let minors = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)] + m[(0, 0)] * m[(2, 2)]
        - m[(0, 2)] * m[(2, 0)]
        + m[(1, 1)] * m[(2, 2)]
        - m[(1, 2)] * m[(2, 1)];
    let det = m.determinant();

    let mut best: Option<(f64, Vector3<f64>)> = None;
    for lambda in real_cubic_roots(-trace, minors, -det) {
        let Some(v) = null_vector(&(m - Matrix3::identity() * lambda)) else {
            continue;
        };
        let constraint = 4.0 * v[0] * v[2] - v[1] * v[1];
        if constraint <= 0.0 {
            continue;
        }
        if best.map_or(true, |(score, _)| lambda.abs() < score) {
            best = Some((lambda.abs(), v));
        }
    }
    best.map(|(_, v)| v)
}

/// Null vector of a rank-2 3x3 matrix: the largest row of its adjugate.
fn null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let rows = [
        m.row(1).transpose().cross(&m.row(2).transpose()),
        m.row(2).transpose().cross(&m.row(0).transpose()),
        m.row(0).transpose().cross(&m.row(1).transpose()),
    ];
    let best = rows
        .iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;
    let norm = best.norm();
    if !norm.is_finite() || norm < 1e-15 {
        return None;
    }
    Some(best / norm)
}

/// Real roots of `x³ + b x² + c x + d`.
fn real_cubic_roots(b: f64, c: f64, d: f64) -> Vec<f64> {
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;
    let disc = q * q / 4.0 + p * p * p / 27.0;

    if disc <= 0.0 {
        let r = (-p / 3.0).max(0.0).sqrt();
        let cos_arg = if r < 1e-15 {
            0.0
        } else {
            (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0)
        };
        let phi = cos_arg.acos();
        let tau = 2.0 * std::f64::consts::PI;
        (0..3)
            .map(|k| 2.0 * r * ((phi + tau * k as f64) / 3.0).cos() + shift)
            .collect()
    } else {
        let sq = disc.sqrt();
        vec![(-q / 2.0 + sq).cbrt() + (-q / 2.0 - sq).cbrt() + shift]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::ellipse::EllipseRepr;
    use crate::utils::sampling::sample_perimeter;
    use approx::assert_relative_eq;

    fn normalize_rotation(rot: f64) -> f64 {
        rot.rem_euclid(std::f64::consts::PI)
    }

    #[test]
    fn test_exact_points_recover_ellipse() -> anyhow::Result<()> {
        let truth = Parametric::<f64>::new(30.0, 15.0, 0.3, 100.0, 80.0);
        let points = sample_perimeter(&truth, 50);
        let fitted = fit_ellipse_direct(&points)?.try_into_parametric()?;

        assert_relative_eq!(fitted.semi_major(), 30.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.semi_minor(), 15.0, epsilon = 1e-6);
        assert_relative_eq!(
            normalize_rotation(fitted.rotation()),
            0.3,
            epsilon = 1e-6
        );
        assert_relative_eq!(fitted.x(), 100.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.y(), 80.0, epsilon = 1e-6);
        assert!(rms_distance(&fitted, &points) < 1e-6);
        Ok(())
    }

    #[test]
    fn test_partial_arc() -> anyhow::Result<()> {
        // Only the lower 40% of the outline, as with a drooping eyelid.
        let truth = Parametric::<f64>::new(25.0, 18.0, 0.0, 60.0, 50.0);
        let points: Vec<_> = sample_perimeter(&truth, 100)
            .into_iter()
            .filter(|p| p.y > 50.0 + 18.0 * 0.3)
            .collect();
        let fitted = fit_ellipse_direct(&points)?.try_into_parametric()?;
        assert_relative_eq!(fitted.x(), 60.0, epsilon = 1e-4);
        assert_relative_eq!(fitted.y(), 50.0, epsilon = 1e-4);
        assert_relative_eq!(fitted.semi_major(), 25.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn test_pixel_quantised_circle() -> anyhow::Result<()> {
        let truth = Parametric::<f64>::new(20.0, 20.0, 0.0, 40.5, 33.0);
        let points: Vec<_> = sample_perimeter(&truth, 120)
            .into_iter()
            .map(|p| Point2::new(p.x.round(), p.y.round()))
            .collect();
        let fitted = fit_ellipse_direct(&points)?.try_into_parametric()?;
        assert!((fitted.x() - 40.5).abs() < 0.5);
        assert!((fitted.y() - 33.0).abs() < 0.5);
        assert!((fitted.semi_major() - 20.0).abs() < 0.7);
        assert!(rms_distance(&fitted, &points) < 0.6);
        Ok(())
    }

    #[test]
    fn test_too_few_points() {
        let pts = vec![Point2::new(1.0, 2.0), Point2::new(3.0, 4.0)];
        assert_eq!(
            fit_ellipse_direct(&pts).unwrap_err(),
            ConicError::TooFewPoints { needed: 6, got: 2 }
        );
    }

    #[test]
    fn test_collinear_points_rejected() {
        let pts: Vec<_> = (0..20).map(|i| Point2::new(i as f64, 2.0 * i as f64)).collect();
        assert!(fit_ellipse_direct(&pts).is_err());
    }

    #[test]
    fn test_cubic_roots() {
        // (x - 1)(x - 2)(x - 3) = x³ - 6x² + 11x - 6
        let mut roots = real_cubic_roots(-6.0, 11.0, -6.0);
        roots.sort_by(f64::total_cmp);
        assert_eq!(roots.len(), 3);
        for (r, e) in roots.iter().zip([1.0, 2.0, 3.0]) {
            assert_relative_eq!(*r, e, epsilon = 1e-9);
        }

        // x³ + x + 2 = (x + 1)(x² - x + 2)
        let roots = real_cubic_roots(0.0, 1.0, 2.0);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], -1.0, epsilon = 1e-9);
    }
}
