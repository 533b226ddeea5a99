use nalgebra as na;
use thiserror::Error;

/// Reasons a conic cannot be used as a pupil outline.
///
/// These never leave the crate: the fitter logs and drops the offending
/// grouping.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConicError {
    #[error("Matrix contains NaN or infinite values")]
    NonFinite,

    #[error("Matrix is degenerate, det={0}")]
    Degenerate(f64),

    #[error("Matrix does not define an ellipse, discriminant={0}")]
    NotAnEllipse(f64),

    #[error("Matrix defines an imaginary ellipse, value at center={0}")]
    Imaginary(f64),

    #[error("Need at least {needed} points, got {got}")]
    TooFewPoints { needed: usize, got: usize },

    #[error("Scatter matrix is singular")]
    SingularScatter,

    #[error("No eigenvector satisfies the ellipse constraint")]
    NoEllipticSolution,
}

/// Conic matrix of the ellipse with semi-axes `a`, `b`, rotation `theta`
/// (radians, pixel coordinates) and center `(x, y)`, scaled by `a²b²`.
#[cfg(test)]
pub(crate) fn compute_matrix<F: na::RealField + Copy>(a: F, b: F, theta: F, x: F, y: F) -> na::Matrix3<F> {
    let two: F = na::convert(2.0);

    let sin_theta = theta.sin();
    let cos_theta = theta.cos();
    let a_pow2 = a.powi(2);
    let b_pow2 = b.powi(2);
    let sin_theta_pow2 = sin_theta.powi(2);
    let cos_theta_pow2 = cos_theta.powi(2);

    let a_quad = a_pow2 * sin_theta_pow2 + b_pow2 * cos_theta_pow2;
    let b_quad = two * (b_pow2 - a_pow2) * cos_theta * sin_theta;
    let c_quad = a_pow2 * cos_theta_pow2 + b_pow2 * sin_theta_pow2;
    let d_quad = -two * a_quad * x - b_quad * y;
    let e_quad = -b_quad * x - two * c_quad * y;
    let f_quad = a_quad * x.powi(2) + b_quad * x * y + c_quad * y.powi(2) - a_pow2 * b_pow2;

    na::Matrix3::from_rows(&[
        [a_quad, b_quad / two, d_quad / two].into(),
        [b_quad / two, c_quad, e_quad / two].into(),
        [d_quad / two, e_quad / two, f_quad].into(),
    ])
}

/// Conic matrix from `A x² + B xy + C y² + D x + E y + F = 0` coefficients.
pub fn matrix_from_coeffs<F: na::RealField + Copy>(coeffs: &[F; 6]) -> na::Matrix3<F> {
    let half: F = na::convert(0.5);
    let [a, b, c, d, e, f] = *coeffs;
    na::Matrix3::new(
        a,
        b * half,
        d * half,
        b * half,
        c,
        e * half,
        d * half,
        e * half,
        f,
    )
}

/// Checks that `matrix` is a real, non-degenerate ellipse.
///
/// All tests are made on the Frobenius-normalised matrix so they do not
/// depend on the overall scale of the conic.
pub(crate) fn check_ellipse_conditions<F: na::RealField + Copy>(
    matrix: &na::Matrix3<F>,
) -> Result<(), ConicError> {
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(ConicError::NonFinite);
    }

    let norm = matrix.norm();
    if norm <= F::default_epsilon() {
        return Err(ConicError::Degenerate(norm.to_subset_unchecked()));
    }
    let m = matrix.unscale(norm);

    // Upper-left 2x2 block: positive determinant for an ellipse. Compared to
    // the squared trace so extreme elongation also counts as degenerate.
    let a_33 = m.fixed_view::<2, 2>(0, 0);
    let trace = a_33.trace();
    let discriminant = a_33.determinant();
    let min_discriminant: F = na::convert(1e-12);
    if discriminant <= trace * trace * min_discriminant {
        return Err(ConicError::NotAnEllipse(discriminant.to_subset_unchecked()));
    }

    // Value of the conic at its center; it must have the opposite sign of
    // the quadratic part or the ellipse has no real points.
    let det = m.determinant();
    let f_center = det / discriminant;
    if f_center == F::zero() {
        return Err(ConicError::Degenerate(det.to_subset_unchecked()));
    }
    if f_center * trace > F::zero() {
        return Err(ConicError::Imaginary(f_center.to_subset_unchecked()));
    }

    Ok(())
}
