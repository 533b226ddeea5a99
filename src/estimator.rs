//! Entry points selectable by name.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::config::TrackerParams;
use crate::detector::Detector;
use crate::error::Result;
use crate::frame::Frame;
use crate::pupil::Pupil;
use crate::tracker::Tracker;

/// Common interface of the stateless detector and the tracker.
pub trait PupilEstimator: Send {
    fn description(&self) -> &'static str;

    /// Estimate the pupil in `frame`. Stateless estimators ignore the
    /// timestamp; stateful ones advance their own clock when it is `None`.
    fn estimate(&mut self, frame: &Frame<'_>, timestamp_ms: Option<f64>) -> Result<Pupil>;

    /// Validate a raw single-channel buffer and estimate in it.
    fn estimate_buffer(
        &mut self,
        data: &[u8],
        width: usize,
        height: usize,
        timestamp_ms: Option<f64>,
    ) -> Result<Pupil> {
        let frame = Frame::new(data, width, height)?;
        self.estimate(&frame, timestamp_ms)
    }
}

impl PupilEstimator for Detector {
    fn description(&self) -> &'static str {
        Detector::description(self)
    }

    fn estimate(&mut self, frame: &Frame<'_>, _timestamp_ms: Option<f64>) -> Result<Pupil> {
        Ok(self.detect(frame))
    }
}

impl PupilEstimator for Tracker {
    fn description(&self) -> &'static str {
        Tracker::description(self)
    }

    fn estimate(&mut self, frame: &Frame<'_>, timestamp_ms: Option<f64>) -> Result<Pupil> {
        match timestamp_ms {
            Some(t) => self.detect_and_track(frame, t),
            None => self.detect_and_track_auto(frame),
        }
    }
}

/// Available algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Stateless full-frame detection.
    Detect,
    /// Temporal tracking with full-frame fallback.
    Track,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown method {0:?}, expected one of: detect (pure), track (purest)")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detect" | "pure" => Ok(Method::Detect),
            "track" | "purest" => Ok(Method::Track),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Detect => write!(f, "detect"),
            Method::Track => write!(f, "track"),
        }
    }
}

impl Method {
    pub fn build(self, params: TrackerParams) -> Box<dyn PupilEstimator> {
        match self {
            Method::Detect => Box::new(Detector::new(params.detector)),
            Method::Track => Box::new(Tracker::new(params)),
        }
    }
}
