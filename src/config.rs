//! Tunable parameters for every pipeline stage.
//!
//! All structs implement [`Default`] with values calibrated for near-infrared
//! eye cameras at VGA-ish resolutions, and deserialize with missing fields
//! filled from those defaults.

use serde::{Deserialize, Serialize};

use crate::frame::{Frame, Roi};

/// Which side of the pupil boundary is expected to be darker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Dark pupil on a brighter iris (off-axis illumination).
    #[default]
    DarkPupil,
    /// Bright pupil on a darker iris (on-axis illumination).
    BrightPupil,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeParams {
    /// Absolute floor on the Sobel magnitude of an edge pixel.
    pub min_gradient: f32,
    /// Quantile of the non-maximum-suppressed magnitudes used as high threshold.
    pub high_quantile: f32,
    /// Low hysteresis threshold as a fraction of the high one.
    pub low_ratio: f32,
}

impl Default for EdgeParams {
    fn default() -> Self {
        Self {
            min_gradient: 24.0,
            high_quantile: 0.6,
            low_ratio: 0.35,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentParams {
    /// Segments with fewer points are noise.
    pub min_length_px: usize,
    /// Corner-split pieces with fewer points are dropped before merging.
    pub min_piece_px: usize,
    /// Window (in points) used to estimate tangents along a segment.
    pub tangent_window: usize,
    /// Tangent turn above which a chain is split.
    pub max_corner_deg: f64,
    /// Maximum endpoint gap bridged when merging two arcs.
    pub merge_gap_px: f64,
    /// Maximum tangent disagreement when merging two arcs.
    pub merge_angle_deg: f64,
    /// Segments whose largest deviation from their chord is below this are straight.
    pub min_sagitta_px: f64,
    /// Maximum number of segments forwarded to the fitter.
    pub max_segments: usize,
    /// Allowance for 8-connected outlines running longer than the curve they
    /// trace, applied to the largest pupil circumference.
    pub length_slack: f64,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            min_length_px: 10,
            min_piece_px: 5,
            tangent_window: 4,
            max_corner_deg: 60.0,
            merge_gap_px: 5.0,
            merge_angle_deg: 35.0,
            min_sagitta_px: 1.5,
            max_segments: 16,
            length_slack: 1.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitParams {
    /// Smallest accepted minor/major axis ratio.
    pub min_aspect: f64,
    /// Largest accepted RMS distance of the grouping points to the fit.
    pub max_rms_px: f64,
    /// Distance band within which an edge point supports the ellipse.
    pub support_band_px: f64,
    /// Number of angular bins used to measure perimeter coverage.
    pub support_bins: usize,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            min_aspect: 0.3,
            max_rms_px: 2.0,
            support_band_px: 1.5,
            support_bins: 72,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreParams {
    pub polarity: Polarity,
    /// Minor/major ratio considered most pupil-like.
    pub typical_aspect: f64,
    /// Offset of the inner and outer contrast samples from the outline.
    pub contrast_offset_px: f64,
    /// Intensity difference required between inner and outer sample.
    pub contrast_margin: u8,
    /// Perimeter samples used for the contrast measure.
    pub contrast_samples: usize,
    /// Weight of temporal consistency in tracking mode, in [0, 1].
    pub temporal_weight: f64,
    /// Candidates scoring below this are never reported.
    pub min_viable_score: f64,
    /// Required margin of expected-polarity samples over reversed ones.
    pub min_contrast_lead: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            polarity: Polarity::DarkPupil,
            typical_aspect: 1.0,
            contrast_offset_px: 3.0,
            contrast_margin: 5,
            contrast_samples: 128,
            temporal_weight: 0.3,
            min_viable_score: 0.3,
            min_contrast_lead: 0.4,
        }
    }
}

/// Parameters of the stateless detector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Restrict the search to this region of the frame.
    pub roi: Option<Roi>,
    /// Smallest pupil diameter in pixels; derived from the frame size if unset.
    pub min_pupil_diameter_px: Option<f64>,
    /// Largest pupil diameter in pixels; derived from the frame size if unset.
    pub max_pupil_diameter_px: Option<f64>,
    pub edge: EdgeParams,
    pub segment: SegmentParams,
    pub fit: FitParams,
    pub score: ScoreParams,
}

impl DetectorParams {
    /// Pupil diameter bounds `(min, max)` in pixels for `frame`.
    pub fn diameter_bounds(&self, frame: &Frame<'_>) -> DiameterBounds {
        let short_side = frame.width().min(frame.height()) as f64;
        let diagonal = (frame.width() as f64).hypot(frame.height() as f64);
        let min = self
            .min_pupil_diameter_px
            .unwrap_or_else(|| (0.05 * diagonal).max(6.0));
        let max = self
            .max_pupil_diameter_px
            .unwrap_or(0.8 * short_side)
            .max(min);
        DiameterBounds { min, max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiameterBounds {
    pub min: f64,
    pub max: f64,
}

impl DiameterBounds {
    pub fn contains(&self, diameter: f64) -> bool {
        diameter >= self.min && diameter <= self.max
    }

    /// Longest plausible pupil outline, a full circle of maximum diameter.
    pub fn max_circumference(&self) -> f64 {
        std::f64::consts::PI * self.max
    }
}

/// Parameters of the tracking front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    pub detector: DetectorParams,
    /// History older than this (ms) is stale.
    pub max_age_ms: f64,
    /// Results at or above this confidence are accepted as history.
    pub min_detection_confidence: f64,
    /// Search half-size as a multiple of the last pupil's semi-major axis.
    pub roi_scale: f64,
    /// Extra pixels added around the predicted search region.
    pub roi_padding_px: f64,
    /// Weight of the newest observation in the velocity estimate, in (0, 1].
    pub velocity_smoothing: f64,
    /// Clock step used when the caller provides no timestamp.
    pub frame_interval_ms: f64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            detector: DetectorParams::default(),
            max_age_ms: 300.0,
            min_detection_confidence: 0.66,
            roi_scale: 2.0,
            roi_padding_px: 8.0,
            velocity_smoothing: 0.6,
            frame_interval_ms: 16.67,
        }
    }
}
