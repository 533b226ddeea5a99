use crate::math::conic::{self, ConicError};
use nalgebra as na;
use std::fmt::Debug;
use std::ops::Deref;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanarEllipseError {
    #[error("No center coordinates found: {0}")]
    NoCenterCoordinates(&'static str),

    #[error(transparent)]
    Conic(#[from] ConicError),
}

/// Defines the behavior of an ellipse representation
pub trait EllipseRepr: Debug {
    /// Underlying data type, must be real e.g. [f32] or [f64] or any other type that implements
    /// [na::RealField].
    type F: na::RealField + Copy;

    /// Returns the semi-major axis length
    fn semi_major(&self) -> Self::F;

    /// Returns the semi-minor axis length
    fn semi_minor(&self) -> Self::F;

    /// Returns the rotation of the major axis in radians, measured from +x towards +y in pixel
    /// coordinates.
    fn rotation(&self) -> Self::F;

    /// Returns the center coordinates
    fn center(&self) -> Result<(Self::F, Self::F), PlanarEllipseError>;

    /// Returns the parametric representation
    fn get_parametric(&self) -> Result<Parametric<Self::F>, PlanarEllipseError> {
        let (x, y) = self.center()?;
        Ok(Parametric::new(
            self.semi_major(),
            self.semi_minor(),
            self.rotation(),
            x,
            y,
        ))
    }
}

/// Parametric representation of an ellipse in the image plane.
///
/// Always canonical: `a >= b` and `theta` in `(-π/2, π/2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parametric<F: na::RealField + Copy> {
    /// Semi-major axis
    a: F,
    /// Semi-minor axis
    b: F,
    /// Rotation of the major axis in radians
    theta: F,
    /// Center x-coordinate
    x: F,
    /// Center y-coordinate
    y: F,
}

impl<F: na::RealField + Copy> Parametric<F> {
    pub fn new(a: F, b: F, theta: F, x: F, y: F) -> Self {
        let (a, b, theta) = if b > a {
            (b, a, theta + F::frac_pi_2())
        } else {
            (a, b, theta)
        };
        Self {
            a,
            b,
            theta: wrap_half_turn(theta),
            x,
            y,
        }
    }

    pub fn x(&self) -> F {
        self.x
    }

    pub fn y(&self) -> F {
        self.y
    }

    pub fn center_point(&self) -> na::Point2<F> {
        na::Point2::new(self.x, self.y)
    }

    /// Minor over major axis, in `(0, 1]`.
    pub fn aspect_ratio(&self) -> F {
        self.b / self.a
    }

    /// Point at parametric angle `t`.
    pub fn point_at(&self, t: F) -> na::Point2<F> {
        let (sin_th, cos_th) = self.theta.sin_cos();
        let (u, v) = (self.a * t.cos(), self.b * t.sin());
        na::Point2::new(
            self.x + u * cos_th - v * sin_th,
            self.y + u * sin_th + v * cos_th,
        )
    }

    /// Coordinates of `p` in the ellipse frame (major axis along +u).
    pub fn to_local(&self, p: &na::Point2<F>) -> (F, F) {
        let (sin_th, cos_th) = self.theta.sin_cos();
        let (dx, dy) = (p.x - self.x, p.y - self.y);
        (dx * cos_th + dy * sin_th, -dx * sin_th + dy * cos_th)
    }

    /// Parametric angle of the outline point on the ray from the center through `p`.
    pub fn parametric_angle(&self, p: &na::Point2<F>) -> F {
        let (u, v) = self.to_local(p);
        (v / self.b).atan2(u / self.a)
    }

    /// Distance from `p` to the outline, measured along the ray from the center.
    pub fn radial_distance(&self, p: &na::Point2<F>) -> F {
        let (u, v) = self.to_local(p);
        let rho = ((u / self.a).powi(2) + (v / self.b).powi(2)).sqrt();
        if rho <= F::default_epsilon() {
            return self.b;
        }
        let r = (u * u + v * v).sqrt();
        (r - r / rho).abs()
    }
}

/// Maps an axis angle into `(-π/2, π/2]`.
fn wrap_half_turn<F: na::RealField + Copy>(theta: F) -> F {
    if !theta.is_finite() {
        return theta;
    }
    let pi = F::pi();
    let wrapped = theta - pi * (theta / pi).round();
    if wrapped <= -F::frac_pi_2() {
        wrapped + pi
    } else {
        wrapped
    }
}

/// An ellipse in a 2D plane described as a 3x3 matrix of the conic section described by the
/// quadratic equation $A_Q$ [1].
///
/// The stored matrix is sign-normalised so its quadratic part is positive definite.
///
/// [1] https://en.wikipedia.org/wiki/Matrix_representation_of_conic_sections
#[derive(Debug, Clone)]
pub struct Quadratic<F: na::RealField>(na::Matrix3<F>);

impl<F: na::RealField + Copy> Quadratic<F> {
    /// Semi-axes `(major, minor)` from the eigenvalues of the quadratic part and the value of the
    /// conic at its center.
    fn extract_semi_axes(&self) -> (F, F) {
        let m = &self.0;
        let two: F = na::convert(2.0);
        let half_trace = (m[(0, 0)] + m[(1, 1)]) / two;
        let spread = (((m[(0, 0)] - m[(1, 1)]) / two).powi(2) + m[(0, 1)].powi(2)).sqrt();
        let f_center = m.determinant() / m.fixed_view::<2, 2>(0, 0).determinant();

        let major = (-f_center / (half_trace - spread)).sqrt();
        let minor = (-f_center / (half_trace + spread)).sqrt();
        (major, minor)
    }
}

impl<F: na::RealField + Copy> EllipseRepr for Parametric<F> {
    type F = F;
    fn semi_major(&self) -> F {
        self.a
    }
    fn semi_minor(&self) -> F {
        self.b
    }
    fn rotation(&self) -> F {
        self.theta
    }
    fn center(&self) -> Result<(F, F), PlanarEllipseError> {
        Ok((self.x, self.y))
    }
}

impl<F: na::RealField + Copy> EllipseRepr for Quadratic<F> {
    /*
    See https://linux-blog.anracom.com/2023/09/04/properties-of-ellipses-by-matrix-coefficients-i-two-defining-matrices/
    for the math behind implementation.
    */
    type F = F;
    fn semi_major(&self) -> F {
        self.extract_semi_axes().0
    }

    fn semi_minor(&self) -> F {
        self.extract_semi_axes().1
    }

    fn rotation(&self) -> F {
        let m = &self.0;

        let a = m[(0, 0)];
        let b = m[(0, 1)];
        let c = m[(1, 1)];

        let two: F = na::convert(2.0);
        -F::atan2(two * b, c - a) / two
    }

    fn center(&self) -> Result<(F, F), PlanarEllipseError> {
        let a_33 = self.0.fixed_view::<2, 2>(0, 0);

        let a_33_inv = a_33
            .try_inverse()
            .ok_or(PlanarEllipseError::NoCenterCoordinates(
                "Matrix is not invertible.",
            ))?;

        let b = na::Vector2::new(self.0[(0, 2)], self.0[(1, 2)]);

        let coords = -(a_33_inv * b);
        Ok((coords[0], coords[1]))
    }
}

#[derive(Debug, Clone)]
pub struct PlanarEllipse<R: EllipseRepr>(R);

impl<R: EllipseRepr> PlanarEllipse<R> {
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<F: na::RealField + Copy> PlanarEllipse<Quadratic<F>> {
    pub fn try_from_matrix(matrix: na::Matrix3<F>) -> Result<Self, ConicError> {
        conic::check_ellipse_conditions(&matrix)?;
        let matrix = if matrix[(0, 0)] + matrix[(1, 1)] < F::zero() {
            -matrix
        } else {
            matrix
        };
        Ok(Self(Quadratic(matrix)))
    }

    pub fn try_into_parametric(self) -> Result<PlanarEllipse<Parametric<F>>, PlanarEllipseError> {
        Ok(PlanarEllipse(self.0.get_parametric()?))
    }
}

impl<R: EllipseRepr> Deref for PlanarEllipse<R> {
    type Target = R;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
