use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::geom::ellipse::{EllipseRepr, Parametric};
use crate::utils::wrap_half_turn_deg;

/// A detected pupil outline.
///
/// `width` and `height` are the full lengths of the major and minor axis.
/// `angle` is the direction of the major axis in degrees within `[0, 180)`,
/// measured from the image +x axis and increasing counter-clockwise as the
/// image is displayed (y pointing down): 0° is a horizontal major axis, 90° a
/// vertical one.
///
/// A pupil with zero confidence is the "not found" result; its geometry is a
/// zero-sized ellipse at the frame center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pupil {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    pub angle: f64,
    pub confidence: f64,
}

impl Pupil {
    /// The zero-confidence result for `frame`.
    pub fn not_found(frame: &Frame<'_>) -> Self {
        let (center_x, center_y) = frame.center();
        Self {
            center_x,
            center_y,
            width: 0.0,
            height: 0.0,
            angle: 0.0,
            confidence: 0.0,
        }
    }

    pub fn from_ellipse(ellipse: &Parametric<f64>, confidence: f64) -> Self {
        // Pixel rotations turn from +x towards +y, which is clockwise on screen.
        let angle = wrap_half_turn_deg(-ellipse.rotation().to_degrees());
        Self {
            center_x: ellipse.x(),
            center_y: ellipse.y(),
            width: 2.0 * ellipse.semi_major(),
            height: 2.0 * ellipse.semi_minor(),
            angle,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Whether this is a detection at or above `min_confidence`.
    pub fn is_valid(&self, min_confidence: f64) -> bool {
        self.confidence > 0.0 && self.confidence >= min_confidence
    }

    pub fn center(&self) -> (f64, f64) {
        (self.center_x, self.center_y)
    }

    /// Full major axis length.
    pub fn major_axis(&self) -> f64 {
        self.width.max(self.height)
    }

    /// Full minor axis length.
    pub fn minor_axis(&self) -> f64 {
        self.width.min(self.height)
    }

    /// Equivalent circular diameter.
    pub fn diameter(&self) -> f64 {
        (self.width * self.height).sqrt()
    }

    /// Major axis rotation in pixel coordinates (radians, +x towards +y).
    pub fn rotation(&self) -> f64 {
        -self.angle.to_radians()
    }

    pub fn to_ellipse(&self) -> Parametric<f64> {
        Parametric::new(
            self.width / 2.0,
            self.height / 2.0,
            self.rotation(),
            self.center_x,
            self.center_y,
        )
    }
}
