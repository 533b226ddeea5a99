//! Ellipse hypotheses from segment groupings.

use itertools::Itertools;
use nalgebra::Point2;
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::{DiameterBounds, FitParams};
use crate::frame::Roi;
use crate::geom::ellipse::{EllipseRepr, Parametric, PlanarEllipseError};
use crate::math::{fit_ellipse_direct, rms_distance};
use crate::segments::EdgeSegment;

/// Segments a candidate was fitted to, as indices into the fitter input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    Segment(usize),
    Pair(usize, usize),
}

impl CandidateSource {
    fn indices(self) -> impl Iterator<Item = usize> {
        let (first, second) = match self {
            CandidateSource::Segment(i) => (i, None),
            CandidateSource::Pair(i, j) => (i, Some(j)),
        };
        std::iter::once(first).chain(second)
    }
}

/// A fitted ellipse hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct EllipseCandidate {
    ellipse: Parametric<f64>,
    support: f64,
    residual: f64,
    source: CandidateSource,
}

impl EllipseCandidate {
    pub fn new(ellipse: Parametric<f64>, support: f64, residual: f64, source: CandidateSource) -> Self {
        Self {
            ellipse,
            support,
            residual,
            source,
        }
    }

    pub fn ellipse(&self) -> &Parametric<f64> {
        &self.ellipse
    }

    pub fn center(&self) -> Point2<f64> {
        self.ellipse.center_point()
    }

    pub fn semi_major(&self) -> f64 {
        self.ellipse.semi_major()
    }

    pub fn semi_minor(&self) -> f64 {
        self.ellipse.semi_minor()
    }

    /// Rotation of the major axis in radians, pixel coordinates.
    pub fn rotation(&self) -> f64 {
        self.ellipse.rotation()
    }

    /// Fraction of the perimeter covered by edge evidence, in `[0, 1]`.
    pub fn support(&self) -> f64 {
        self.support
    }

    /// RMS distance of the fitted points to the outline.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    pub fn source(&self) -> CandidateSource {
        self.source
    }
}

/// Why a fitted ellipse was not kept.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
enum Rejection {
    #[error("non-finite or flat ellipse")]
    NonFinite,
    #[error("aspect ratio {0:.3} below limit")]
    Aspect(f64),
    #[error("diameter {0:.1}px outside pupil size bounds")]
    Size(f64),
    #[error("center outside the frame")]
    CenterOutside,
    #[error("rms residual {0:.2}px too large")]
    Residual(f64),
}

/// Fit every segment alone and every pair of segments.
///
/// Degenerate fits are dropped; the result may be empty.
pub fn fit_candidates(
    segments: &[EdgeSegment],
    frame_bounds: &Roi,
    size: &DiameterBounds,
    params: &FitParams,
) -> Vec<EllipseCandidate> {
    let evidence: Vec<Point2<f64>> = segments
        .iter()
        .flat_map(|s| s.points().iter().copied())
        .collect();

    let singles = (0..segments.len()).map(CandidateSource::Segment);
    let pairs = (0..segments.len())
        .tuple_combinations()
        .filter(|&(i, j)| could_share_outline(&segments[i], &segments[j], size))
        .map(|(i, j)| CandidateSource::Pair(i, j));

    let mut attempted = 0usize;
    let candidates: Vec<EllipseCandidate> = singles
        .chain(pairs)
        .filter_map(|source| {
            attempted += 1;
            let points: Vec<Point2<f64>> = source
                .indices()
                .flat_map(|i| segments[i].points().iter().copied())
                .collect();
            fit_grouping(&points, &evidence, frame_bounds, size, params, source)
        })
        .collect();

    debug!(
        segments = segments.len(),
        groupings = attempted,
        candidates = candidates.len(),
        "ellipse candidates fitted"
    );
    candidates
}

/// Pairs whose joint extent exceeds the largest pupil cannot be one outline.
fn could_share_outline(a: &EdgeSegment, b: &EdgeSegment, size: &DiameterBounds) -> bool {
    let (ra, rb) = (a.bounds(), b.bounds());
    let width = ra.right().max(rb.right()) - ra.x.min(rb.x);
    let height = ra.bottom().max(rb.bottom()) - ra.y.min(rb.y);
    let limit = size.max + 2.0;
    width as f64 <= limit && height as f64 <= limit
}

fn fit_grouping(
    points: &[Point2<f64>],
    evidence: &[Point2<f64>],
    frame_bounds: &Roi,
    size: &DiameterBounds,
    params: &FitParams,
    source: CandidateSource,
) -> Option<EllipseCandidate> {
    let ellipse = match fit_parametric(points) {
        Ok(ellipse) => ellipse,
        Err(err) => {
            trace!(?source, %err, "fit discarded");
            return None;
        }
    };
    let residual = rms_distance(&ellipse, points);
    if let Err(reason) = validate(&ellipse, residual, frame_bounds, size, params) {
        trace!(?source, %reason, "fit rejected");
        return None;
    }

    // One refit on every evidence point close to the first estimate.
    let (ellipse, residual) = refit_on_inliers(&ellipse, evidence, frame_bounds, size, params)
        .unwrap_or((ellipse, residual));

    let support = support_measure(&ellipse, evidence, params);
    trace!(
        ?source,
        x = ellipse.x(),
        y = ellipse.y(),
        a = ellipse.semi_major(),
        b = ellipse.semi_minor(),
        support,
        residual,
        "candidate"
    );
    Some(EllipseCandidate::new(ellipse, support, residual, source))
}

fn fit_parametric(points: &[Point2<f64>]) -> Result<Parametric<f64>, PlanarEllipseError> {
    Ok(fit_ellipse_direct(points)?.try_into_parametric()?.into_inner())
}

fn refit_on_inliers(
    ellipse: &Parametric<f64>,
    evidence: &[Point2<f64>],
    frame_bounds: &Roi,
    size: &DiameterBounds,
    params: &FitParams,
) -> Option<(Parametric<f64>, f64)> {
    let inliers: Vec<Point2<f64>> = evidence
        .iter()
        .filter(|p| ellipse.radial_distance(p) <= params.support_band_px)
        .copied()
        .collect();
    let refined = fit_parametric(&inliers).ok()?;
    let residual = rms_distance(&refined, &inliers);
    validate(&refined, residual, frame_bounds, size, params).ok()?;
    Some((refined, residual))
}

fn validate(
    ellipse: &Parametric<f64>,
    residual: f64,
    frame_bounds: &Roi,
    size: &DiameterBounds,
    params: &FitParams,
) -> Result<(), Rejection> {
    let (a, b) = (ellipse.semi_major(), ellipse.semi_minor());
    let finite = [a, b, ellipse.rotation(), ellipse.x(), ellipse.y(), residual]
        .iter()
        .all(|v| v.is_finite());
    if !finite || b <= 0.0 {
        return Err(Rejection::NonFinite);
    }
    if ellipse.aspect_ratio() < params.min_aspect {
        return Err(Rejection::Aspect(ellipse.aspect_ratio()));
    }
    if !size.contains(2.0 * a) {
        return Err(Rejection::Size(2.0 * a));
    }
    if !frame_bounds.contains_point(ellipse.x(), ellipse.y()) {
        return Err(Rejection::CenterOutside);
    }
    if residual > params.max_rms_px {
        return Err(Rejection::Residual(residual));
    }
    Ok(())
}

/// Fraction of the perimeter, by arc length, backed by evidence within the band.
///
/// The outline is cut into `support_bins` equal parametric-angle bins, each
/// weighted by the arc length it spans.
pub fn support_measure(ellipse: &Parametric<f64>, evidence: &[Point2<f64>], params: &FitParams) -> f64 {
    let bins = params.support_bins.max(4);
    let step = std::f64::consts::TAU / bins as f64;
    let weights: Vec<f64> = (0..bins)
        .map(|k| {
            let start = ellipse.point_at(step * k as f64);
            let end = ellipse.point_at(step * (k + 1) as f64);
            (end - start).norm()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let mut covered = vec![false; bins];
    for p in evidence {
        if ellipse.radial_distance(p) > params.support_band_px {
            continue;
        }
        let t = ellipse.parametric_angle(p).rem_euclid(std::f64::consts::TAU);
        let k = ((t / step) as usize).min(bins - 1);
        covered[k] = true;
    }

    let hit: f64 = covered
        .iter()
        .zip(&weights)
        .filter(|(&c, _)| c)
        .map(|(_, w)| w)
        .sum();
    (hit / total).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::sampling::sample_perimeter;
    use approx::assert_relative_eq;

    fn bounds() -> DiameterBounds {
        DiameterBounds { min: 10.0, max: 120.0 }
    }

    fn frame_bounds() -> Roi {
        Roi::new(0, 0, 200, 160)
    }

    fn quantised(e: &Parametric<f64>, n: usize, keep: impl Fn(f64) -> bool) -> EdgeSegment {
        let step = std::f64::consts::TAU / n as f64;
        let points: Vec<_> = (0..n)
            .map(|i| i as f64 * step)
            .filter(|&t| keep(t))
            .map(|t| e.point_at(t).map(f64::round))
            .dedup()
            .collect();
        EdgeSegment::from_points(points, 4)
    }

    #[test]
    fn test_full_outline_has_full_support() {
        let truth = Parametric::new(30.0, 20.0, 0.0, 100.0, 80.0);
        let segments = vec![quantised(&truth, 400, |_| true)];
        let candidates = fit_candidates(&segments, &frame_bounds(), &bounds(), &FitParams::default());

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.source(), CandidateSource::Segment(0));
        assert!((c.center().x - 100.0).abs() < 0.5);
        assert!((c.center().y - 80.0).abs() < 0.5);
        assert!((c.semi_major() - 30.0).abs() < 1.0);
        assert!((c.semi_minor() - 20.0).abs() < 1.0);
        assert!(c.support() > 0.95, "support {}", c.support());
        assert!(c.residual() < 0.6);
    }

    #[test]
    fn test_two_arcs_form_a_pair() {
        let truth = Parametric::new(25.0, 18.0, 0.4, 90.0, 70.0);
        // Two opposite arcs with gaps at the ends of the minor axis.
        let right = quantised(&truth, 400, |t| t < 1.2 || t > 5.1);
        let left = quantised(&truth, 400, |t| t > 1.95 && t < 4.35);
        let segments = vec![right, left];
        let candidates = fit_candidates(&segments, &frame_bounds(), &bounds(), &FitParams::default());

        let pair = candidates
            .iter()
            .find(|c| c.source() == CandidateSource::Pair(0, 1))
            .expect("pair candidate");
        assert!((pair.center().x - 90.0).abs() < 0.5);
        assert!((pair.center().y - 70.0).abs() < 0.5);
        // Every candidate sees the evidence of both arcs.
        for c in &candidates {
            assert!(c.support() < 0.95);
        }
        assert!(pair.support() > 0.6);
    }

    #[test]
    fn test_occluded_outline_keeps_partial_support() {
        let truth = Parametric::new(20.0, 20.0, 0.0, 60.0, 60.0);
        let half = quantised(&truth, 300, |t| t < std::f64::consts::PI);
        let candidates = fit_candidates(&[half], &frame_bounds(), &bounds(), &FitParams::default());
        assert_eq!(candidates.len(), 1);
        assert_relative_eq!(candidates[0].support(), 0.5, epsilon = 0.06);
    }

    #[test]
    fn test_implausible_fits_are_rejected() {
        // Too large for the size bounds.
        let huge = Parametric::new(90.0, 80.0, 0.0, 100.0, 80.0);
        // Too elongated.
        let thin = Parametric::new(40.0, 6.0, 0.0, 100.0, 80.0);
        // Centre outside the frame.
        let outside = Parametric::new(20.0, 20.0, 0.0, 210.0, 80.0);
        for e in [huge, thin, outside] {
            let segments = vec![quantised(&e, 400, |_| true)];
            let candidates =
                fit_candidates(&segments, &frame_bounds(), &bounds(), &FitParams::default());
            assert!(candidates.is_empty(), "{e:?}");
        }
    }

    #[test]
    fn test_straight_segment_yields_nothing() {
        let line: Vec<_> = (0..40).map(|i| Point2::new(10.0 + i as f64, 30.0)).collect();
        let segments = vec![EdgeSegment::from_points(line, 4)];
        assert!(fit_candidates(&segments, &frame_bounds(), &bounds(), &FitParams::default()).is_empty());
    }

    #[test]
    fn test_support_measure_bins() {
        let e = Parametric::new(10.0, 10.0, 0.0, 0.0, 0.0);
        let params = FitParams::default();
        let all = sample_perimeter(&e, 720);
        assert_relative_eq!(support_measure(&e, &all, &params), 1.0);
        assert_relative_eq!(support_measure(&e, &[], &params), 0.0);
        let far: Vec<_> = all.iter().map(|p| Point2::new(p.x * 2.0, p.y * 2.0)).collect();
        assert_relative_eq!(support_measure(&e, &far, &params), 0.0);
    }
}
