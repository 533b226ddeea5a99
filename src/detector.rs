//! Stateless full-frame pupil detection.

use tracing::{debug, instrument};

use crate::config::DetectorParams;
use crate::edges::extract_edges;
use crate::error::Result;
use crate::fitter::fit_candidates;
use crate::frame::{Frame, Roi};
use crate::pupil::Pupil;
use crate::scorer::{Prior, Scorer};
use crate::segments::build_segments;

/// Runs edge extraction, segment grouping, ellipse fitting and scoring on
/// every call.
///
/// Holds only immutable parameters, so one detector can serve any number of
/// threads at once.
#[derive(Debug, Clone, Default)]
pub struct Detector {
    params: DetectorParams,
}

impl Detector {
    pub fn new(params: DetectorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    pub fn description(&self) -> &'static str {
        "edge-based ellipse detector (stateless, full frame)"
    }

    /// Detect the pupil in `frame`.
    ///
    /// Finding nothing is not an error: the result then has zero confidence.
    pub fn detect(&self, frame: &Frame<'_>) -> Pupil {
        self.detect_with_params(frame, &self.params)
    }

    /// Detect with `params` in place of the configured parameters for this call.
    pub fn detect_with_params(&self, frame: &Frame<'_>, params: &DetectorParams) -> Pupil {
        let roi = search_region(frame, params, None);
        run_pipeline(frame, params, &roi, None)
    }

    /// Validate a raw buffer and detect in it.
    pub fn detect_buffer(&self, data: &[u8], width: usize, height: usize) -> Result<Pupil> {
        let frame = Frame::new(data, width, height)?;
        Ok(self.detect(&frame))
    }

    /// Detect inside `region` (clamped to the user region of `params`, if any)
    /// with an optional prior from tracking history.
    pub(crate) fn detect_in(
        &self,
        frame: &Frame<'_>,
        params: &DetectorParams,
        region: &Roi,
        prior: Option<&Prior>,
    ) -> Pupil {
        let roi = search_region(frame, params, Some(region));
        run_pipeline(frame, params, &roi, prior)
    }
}

fn search_region(frame: &Frame<'_>, params: &DetectorParams, region: Option<&Roi>) -> Roi {
    let mut roi = frame.bounds();
    if let Some(user) = &params.roi {
        roi = user.clamp_to(&roi);
    }
    if let Some(region) = region {
        roi = region.clamp_to(&roi);
    }
    roi
}

#[instrument(level = "debug", skip_all, fields(roi = ?roi))]
fn run_pipeline(frame: &Frame<'_>, params: &DetectorParams, roi: &Roi, prior: Option<&Prior>) -> Pupil {
    let size = params.diameter_bounds(frame);
    let edges = extract_edges(frame, roi, &params.edge);
    debug!(edge_pixels = edges.len(), "edges extracted");
    if edges.is_empty() {
        return Pupil::not_found(frame);
    }

    let segments = build_segments(&edges, &size, &params.segment);
    let candidates = fit_candidates(&segments, &frame.bounds(), &size, &params.fit);
    Scorer::new(&params.score, size).select(frame, &candidates, prior)
}
