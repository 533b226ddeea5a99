//! Confidence model and candidate selection.
//!
//! A candidate's base quality is the mean of three terms in `[0, 1]`: edge
//! support along the outline, dark/bright contrast across the outline and
//! shape plausibility. In tracking mode the base is discounted by how far the
//! candidate strays from the motion model's prediction:
//!
//! ```text
//! base       = (support + contrast + shape) / 3
//! confidence = base * (1 - w_t * (1 - temporal))
//! ```
//!
//! Every term enters with a non-negative weight, so confidence never drops
//! when any quality term improves.
//!
//! Selection also requires the outline polarity to be consistent: the share of
//! samples stepping the expected way must exceed the share stepping the other
//! way by `min_contrast_lead`. Texture and sensor noise step both ways about
//! equally often.

use tracing::debug;

use crate::config::{DiameterBounds, Polarity, ScoreParams};
use crate::fitter::EllipseCandidate;
use crate::frame::Frame;
use crate::geom::ellipse::{EllipseRepr, Parametric};
use crate::pupil::Pupil;

/// Relative size change at which the temporal size term falls to `e^-0.5`.
const SIZE_CHANGE_SIGMA: f64 = 0.2;

/// Expected pupil state derived from tracking history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prior {
    pub center_x: f64,
    pub center_y: f64,
    /// Expected full major axis length.
    pub major_axis: f64,
    /// Center displacement (px) the motion model considers ordinary.
    pub motion_sigma_px: f64,
}

impl Prior {
    /// Temporal consistency of `candidate` with this prior, in `[0, 1]`.
    pub fn consistency(&self, candidate: &EllipseCandidate) -> f64 {
        let c = candidate.center();
        let distance = (c.x - self.center_x).hypot(c.y - self.center_y);
        let sigma = self.motion_sigma_px.max(1.0);
        let position = (-0.5 * (distance / sigma).powi(2)).exp();

        let size = if self.major_axis > 0.0 {
            let change = (2.0 * candidate.semi_major() - self.major_axis).abs() / self.major_axis;
            (-0.5 * (change / SIZE_CHANGE_SIGMA).powi(2)).exp()
        } else {
            1.0
        };
        position * size
    }
}

/// Per-candidate score breakdown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub support: f64,
    pub contrast: f64,
    pub shape: f64,
    /// Fraction of outline samples stepping against the expected polarity.
    pub reversed: f64,
    /// `1.0` without a prior.
    pub temporal: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct Scorer<'p> {
    params: &'p ScoreParams,
    size: DiameterBounds,
}

impl<'p> Scorer<'p> {
    pub fn new(params: &'p ScoreParams, size: DiameterBounds) -> Self {
        Self { params, size }
    }

    pub fn score(&self, frame: &Frame<'_>, candidate: &EllipseCandidate, prior: Option<&Prior>) -> Score {
        let support = candidate.support().clamp(0.0, 1.0);
        let (contrast, reversed) = self.contrast(frame, candidate.ellipse());
        let shape = self.shape(candidate.ellipse());
        let temporal = prior.map_or(1.0, |p| p.consistency(candidate));

        let base = (support + contrast + shape) / 3.0;
        let weight = self.params.temporal_weight.clamp(0.0, 1.0);
        let confidence = (base * (1.0 - weight * (1.0 - temporal))).clamp(0.0, 1.0);
        Score {
            support,
            contrast,
            shape,
            reversed,
            temporal,
            confidence,
        }
    }

    fn is_viable(&self, score: &Score) -> bool {
        score.confidence >= self.params.min_viable_score
            && score.contrast - score.reversed >= self.params.min_contrast_lead
    }

    /// Pick the best viable candidate, or the not-found pupil if there is none.
    ///
    /// Ties go to the earlier candidate.
    pub fn select(&self, frame: &Frame<'_>, candidates: &[EllipseCandidate], prior: Option<&Prior>) -> Pupil {
        let mut best: Option<(usize, Score)> = None;
        let mut rejected = 0;
        for (i, candidate) in candidates.iter().enumerate() {
            let score = self.score(frame, candidate, prior);
            if !self.is_viable(&score) {
                rejected += 1;
                continue;
            }
            if best.map_or(true, |(_, b)| score.confidence > b.confidence) {
                best = Some((i, score));
            }
        }

        match best {
            Some((i, score)) => {
                let candidate = &candidates[i];
                debug!(
                    source = ?candidate.source(),
                    support = score.support,
                    contrast = score.contrast,
                    shape = score.shape,
                    temporal = score.temporal,
                    confidence = score.confidence,
                    "candidate selected"
                );
                Pupil::from_ellipse(candidate.ellipse(), score.confidence)
            }
            None => {
                debug!(rejected, "no viable candidate");
                Pupil::not_found(frame)
            }
        }
    }

    /// Fractions of outline samples where the inside is darker (or brighter,
    /// for bright pupils) than the outside by the configured margin, and where
    /// it steps the opposite way by the same margin.
    ///
    /// Samples that fall outside the frame count as neither.
    fn contrast(&self, frame: &Frame<'_>, ellipse: &Parametric<f64>) -> (f64, f64) {
        let samples = self.params.contrast_samples.max(1);
        let offset = self
            .params
            .contrast_offset_px
            .min(0.5 * ellipse.semi_minor())
            .max(0.5);
        let margin = i16::from(self.params.contrast_margin);
        let (a, b) = (ellipse.semi_major(), ellipse.semi_minor());
        let (sin_th, cos_th) = ellipse.rotation().sin_cos();

        let steps: Vec<i16> = (0..samples)
            .filter_map(|k| {
                let t = std::f64::consts::TAU * k as f64 / samples as f64;
                let p = ellipse.point_at(t);
                // Outward normal of the axis-aligned outline, rotated into the image.
                let (nu, nv) = (b * t.cos(), a * t.sin());
                let norm = nu.hypot(nv);
                if norm <= f64::EPSILON {
                    return None;
                }
                let (nu, nv) = (nu / norm, nv / norm);
                let (nx, ny) = (nu * cos_th - nv * sin_th, nu * sin_th + nv * cos_th);

                let inner = frame.sample(p.x - offset * nx, p.y - offset * ny);
                let outer = frame.sample(p.x + offset * nx, p.y + offset * ny);
                let step = i16::from(outer?) - i16::from(inner?);
                Some(match self.params.polarity {
                    Polarity::DarkPupil => step,
                    Polarity::BrightPupil => -step,
                })
            })
            .collect();
        let hits = steps.iter().filter(|&&step| step >= margin).count();
        let reversed = steps.iter().filter(|&&step| -step >= margin).count();
        (hits as f64 / samples as f64, reversed as f64 / samples as f64)
    }

    /// Aspect-ratio closeness to the typical ratio times a size factor that
    /// is `1` inside the diameter bounds.
    fn shape(&self, ellipse: &Parametric<f64>) -> f64 {
        let typical = self.params.typical_aspect.clamp(f64::EPSILON, 1.0);
        let spread = typical.max(1.0 - typical);
        let aspect = (1.0 - (ellipse.aspect_ratio() - typical).abs() / spread).clamp(0.0, 1.0);

        let diameter = 2.0 * ellipse.semi_major();
        let size = if self.size.contains(diameter) {
            1.0
        } else if diameter < self.size.min {
            diameter / self.size.min
        } else {
            self.size.max / diameter
        };
        aspect * size.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::CandidateSource;
    use crate::test_utils::{noise_frame, render_ellipse, EyeScene};
    use approx::assert_relative_eq;

    fn bounds() -> DiameterBounds {
        DiameterBounds { min: 10.0, max: 120.0 }
    }

    fn candidate(a: f64, b: f64, x: f64, y: f64, support: f64) -> EllipseCandidate {
        EllipseCandidate::new(Parametric::new(a, b, 0.0, x, y), support, 0.3, CandidateSource::Segment(0))
    }

    fn scene() -> Vec<u8> {
        render_ellipse(&EyeScene::new(200, 160).with_pupil(100.0, 80.0, 30.0, 20.0, 0.0))
    }

    #[test]
    fn test_true_outline_scores_high() {
        let data = scene();
        let frame = Frame::new(&data, 200, 160).unwrap();
        let params = ScoreParams::default();
        let scorer = Scorer::new(&params, bounds());

        let score = scorer.score(&frame, &candidate(30.0, 20.0, 100.0, 80.0, 1.0), None);
        assert_relative_eq!(score.contrast, 1.0);
        assert_relative_eq!(score.shape, 20.0 / 30.0, epsilon = 1e-12);
        assert_relative_eq!(score.temporal, 1.0);
        assert_relative_eq!(score.confidence, (2.0 + 2.0 / 3.0) / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_polarity_flips_contrast() {
        let data = scene();
        let frame = Frame::new(&data, 200, 160).unwrap();
        let params = ScoreParams {
            polarity: Polarity::BrightPupil,
            ..Default::default()
        };
        let scorer = Scorer::new(&params, bounds());
        let truth = candidate(30.0, 20.0, 100.0, 80.0, 1.0);
        let score = scorer.score(&frame, &truth, None);
        assert_relative_eq!(score.contrast, 0.0);
        assert_relative_eq!(score.reversed, 1.0);
        // Good support and shape do not make up for the wrong polarity.
        assert_eq!(scorer.select(&frame, &[truth], None), Pupil::not_found(&frame));
    }

    #[test]
    fn test_noise_outline_is_not_viable() {
        let data = noise_frame(200, 160, 7);
        let frame = Frame::new(&data, 200, 160).unwrap();
        let params = ScoreParams::default();
        let scorer = Scorer::new(&params, bounds());

        let c = candidate(30.0, 20.0, 100.0, 80.0, 1.0);
        let score = scorer.score(&frame, &c, None);
        // Noise steps both ways about equally often.
        assert!((score.contrast - score.reversed).abs() < params.min_contrast_lead, "{score:?}");
        assert!(score.confidence > params.min_viable_score);
        assert_eq!(scorer.select(&frame, &[c], None), Pupil::not_found(&frame));
    }

    #[test]
    fn test_select_prefers_better_candidate() {
        let data = scene();
        let frame = Frame::new(&data, 200, 160).unwrap();
        let params = ScoreParams::default();
        let scorer = Scorer::new(&params, bounds());

        // An ellipse over flat background: no contrast.
        let decoy = candidate(15.0, 14.0, 30.0, 30.0, 0.9);
        let truth = candidate(30.0, 20.0, 100.0, 80.0, 0.95);
        let pupil = scorer.select(&frame, &[decoy, truth], None);
        assert_relative_eq!(pupil.center_x, 100.0);
        assert_relative_eq!(pupil.width, 60.0);
        assert!(pupil.confidence > 0.66);
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        let data = scene();
        let frame = Frame::new(&data, 200, 160).unwrap();
        let params = ScoreParams::default();
        let scorer = Scorer::new(&params, bounds());
        let first = candidate(30.0, 20.0, 100.0, 80.0, 1.0);
        let second = EllipseCandidate::new(*first.ellipse(), 1.0, 0.1, CandidateSource::Pair(0, 1));
        let pupil = scorer.select(&frame, &[first.clone(), second], None);
        assert_eq!(pupil, Pupil::from_ellipse(first.ellipse(), pupil.confidence));
    }

    #[test]
    fn test_no_viable_candidate_gives_sentinel() {
        let data = vec![128u8; 200 * 160];
        let frame = Frame::new(&data, 200, 160).unwrap();
        let params = ScoreParams::default();
        let scorer = Scorer::new(&params, bounds());

        assert_eq!(scorer.select(&frame, &[], None), Pupil::not_found(&frame));
        let weak = candidate(20.0, 8.0, 100.0, 80.0, 0.1);
        assert_eq!(scorer.select(&frame, &[weak], None), Pupil::not_found(&frame));
    }

    #[test]
    fn test_temporal_penalty() {
        let data = scene();
        let frame = Frame::new(&data, 200, 160).unwrap();
        let params = ScoreParams::default();
        let scorer = Scorer::new(&params, bounds());
        let c = candidate(30.0, 20.0, 100.0, 80.0, 1.0);

        let near = Prior {
            center_x: 100.5,
            center_y: 80.0,
            major_axis: 60.0,
            motion_sigma_px: 8.0,
        };
        let far = Prior {
            center_x: 140.0,
            ..near
        };
        let free = scorer.score(&frame, &c, None).confidence;
        let close = scorer.score(&frame, &c, Some(&near)).confidence;
        let jumped = scorer.score(&frame, &c, Some(&far)).confidence;
        assert!(free >= close && close > jumped);
        assert!(close > 0.99 * free);
        // A far jump costs at most the temporal weight.
        assert_relative_eq!(jumped, free * (1.0 - params.temporal_weight), epsilon = 1e-3);
    }

    #[test]
    fn test_monotonic_in_support() {
        let data = scene();
        let frame = Frame::new(&data, 200, 160).unwrap();
        let params = ScoreParams::default();
        let scorer = Scorer::new(&params, bounds());
        let scores: Vec<f64> = [0.2, 0.5, 0.8, 1.0]
            .iter()
            .map(|&s| scorer.score(&frame, &candidate(30.0, 20.0, 100.0, 80.0, s), None).confidence)
            .collect();
        assert!(scores.windows(2).all(|w| w[0] < w[1]));
    }
}
