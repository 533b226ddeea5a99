use nalgebra as na;

use crate::geom::ellipse::Parametric;

/// Points at `num_points` equally spaced parametric angles along the outline of `ellipse`.
pub fn sample_perimeter<F: na::RealField + Copy>(
    ellipse: &Parametric<F>,
    num_points: usize,
) -> Vec<na::Point2<F>> {
    let step = F::two_pi() / na::convert(num_points.max(1) as f64);
    (0..num_points)
        .map(|i| ellipse.point_at(step * na::convert(i as f64)))
        .collect()
}
