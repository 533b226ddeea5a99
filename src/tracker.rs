//! Stateful tracking on top of the [`Detector`].
//!
//! While the tracker holds a recent accepted pupil it only searches a region
//! around the position predicted by a constant-velocity model and scores
//! candidates against that prediction. Losing lock, or history going stale,
//! drops the tracker back to full-frame detection within the same call.

use tracing::{debug, warn};

use crate::config::{DetectorParams, TrackerParams};
use crate::detector::Detector;
use crate::error::{InvalidInputError, Result};
use crate::frame::{Frame, Roi};
use crate::pupil::Pupil;
use crate::scorer::Prior;

/// Whether usable history exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// No usable history: search the full frame.
    #[default]
    Cold,
    /// Recent accepted pupil: search around its predicted position.
    Warm,
}

/// Result of one search, as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Confidence at or above the acceptance threshold.
    Accepted,
    /// Confidence below the acceptance threshold.
    Rejected,
    /// History older than the staleness bound; nothing was searched.
    Stale,
}

/// What the tracker does after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Return the last search result.
    Report,
    /// Run a full-frame search before returning.
    RetryFullFrame,
}

impl TrackState {
    /// Whether a search in this state covers the whole frame.
    pub fn searches_full_frame(self) -> bool {
        self == TrackState::Cold
    }

    pub fn next(self, outcome: Outcome) -> (TrackState, Action) {
        match (self, outcome) {
            (_, Outcome::Accepted) => (TrackState::Warm, Action::Report),
            (TrackState::Warm, Outcome::Rejected | Outcome::Stale) => {
                (TrackState::Cold, Action::RetryFullFrame)
            }
            (TrackState::Cold, Outcome::Rejected | Outcome::Stale) => {
                (TrackState::Cold, Action::Report)
            }
        }
    }
}

/// History of the last accepted pupil.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerState {
    pub pupil: Pupil,
    pub timestamp_ms: f64,
    /// Smoothed center velocity in px/ms.
    pub velocity: (f64, f64),
    /// Smoothed change of the major axis in px/ms.
    pub size_drift: f64,
}

impl TrackerState {
    fn new(pupil: Pupil, timestamp_ms: f64) -> Self {
        Self {
            pupil,
            timestamp_ms,
            velocity: (0.0, 0.0),
            size_drift: 0.0,
        }
    }

    /// Fold a newly accepted `pupil` into the history.
    fn update(&self, pupil: Pupil, timestamp_ms: f64, smoothing: f64) -> Self {
        let dt = timestamp_ms - self.timestamp_ms;
        if dt <= 0.0 {
            return Self {
                pupil,
                timestamp_ms,
                ..*self
            };
        }
        let alpha = smoothing.clamp(f64::EPSILON, 1.0);
        let blend = |old: f64, observed: f64| alpha * observed + (1.0 - alpha) * old;
        let vx = (pupil.center_x - self.pupil.center_x) / dt;
        let vy = (pupil.center_y - self.pupil.center_y) / dt;
        let drift = (pupil.major_axis() - self.pupil.major_axis()) / dt;
        Self {
            pupil,
            timestamp_ms,
            velocity: (blend(self.velocity.0, vx), blend(self.velocity.1, vy)),
            size_drift: blend(self.size_drift, drift),
        }
    }

    /// Expected pupil at `timestamp_ms` under constant velocity.
    pub fn predict(&self, timestamp_ms: f64, padding_px: f64) -> Prior {
        let dt = (timestamp_ms - self.timestamp_ms).max(0.0);
        let (vx, vy) = self.velocity;
        let speed = vx.hypot(vy);
        Prior {
            center_x: self.pupil.center_x + vx * dt,
            center_y: self.pupil.center_y + vy * dt,
            major_axis: (self.pupil.major_axis() + self.size_drift * dt).max(0.0),
            motion_sigma_px: padding_px + 0.5 * speed * dt,
        }
    }
}

/// Pupil tracker for one video stream.
///
/// `detect_and_track` takes `&mut self`: one tracker serves one stream, use
/// one tracker per eye.
#[derive(Debug, Clone)]
pub struct Tracker {
    detector: Detector,
    params: TrackerParams,
    state: TrackState,
    history: Option<TrackerState>,
    clock_ms: Option<f64>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(TrackerParams::default())
    }
}

impl Tracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            detector: Detector::new(params.detector.clone()),
            params,
            state: TrackState::Cold,
            history: None,
            clock_ms: None,
        }
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    pub fn description(&self) -> &'static str {
        "edge-based ellipse tracker (temporal search region, full-frame fallback)"
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn history(&self) -> Option<&TrackerState> {
        self.history.as_ref()
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        self.state = TrackState::Cold;
        self.history = None;
        self.clock_ms = None;
    }

    /// Detect the pupil in `frame`, captured at `timestamp_ms`.
    pub fn detect_and_track(&mut self, frame: &Frame<'_>, timestamp_ms: f64) -> Result<Pupil> {
        let params = self.detector.params().clone();
        self.track(frame, &params, timestamp_ms)
    }

    /// Like [`Tracker::detect_and_track`] with `params` in place of the
    /// configured detector parameters for this call.
    ///
    /// The user region and pupil size bounds of `params` also bound the
    /// search around the predicted position.
    pub fn detect_and_track_with_params(
        &mut self,
        frame: &Frame<'_>,
        params: &DetectorParams,
        timestamp_ms: f64,
    ) -> Result<Pupil> {
        self.track(frame, params, timestamp_ms)
    }

    fn track(&mut self, frame: &Frame<'_>, params: &DetectorParams, timestamp_ms: f64) -> Result<Pupil> {
        if !timestamp_ms.is_finite() {
            return Err(InvalidInputError::InvalidTimestamp(timestamp_ms).into());
        }
        self.clock_ms = Some(timestamp_ms);

        if let Some(history) = &self.history {
            if timestamp_ms < history.timestamp_ms {
                warn!(
                    timestamp_ms,
                    last_ms = history.timestamp_ms,
                    "timestamp went backwards, dropping tracking history"
                );
                self.state = TrackState::Cold;
                self.history = None;
            }
        }

        let mut stale = self
            .history
            .as_ref()
            .is_some_and(|h| timestamp_ms - h.timestamp_ms > self.params.max_age_ms);

        loop {
            let (pupil, outcome) = if stale {
                stale = false;
                (None, Outcome::Stale)
            } else {
                let pupil = self.search(frame, params, timestamp_ms);
                (Some(pupil), self.classify(&pupil))
            };

            let (next, action) = self.state.next(outcome);
            if next != self.state {
                debug!(from = ?self.state, to = ?next, ?outcome, "tracker transition");
            }
            self.state = next;
            self.record(pupil.as_ref(), outcome, timestamp_ms);

            match action {
                Action::Report => {
                    return Ok(pupil.unwrap_or_else(|| Pupil::not_found(frame)));
                }
                Action::RetryFullFrame => continue,
            }
        }
    }

    /// Like [`Tracker::detect_and_track`] with a clock advancing by
    /// `frame_interval_ms` per call.
    pub fn detect_and_track_auto(&mut self, frame: &Frame<'_>) -> Result<Pupil> {
        let timestamp_ms = self
            .clock_ms
            .map_or(0.0, |t| t + self.params.frame_interval_ms);
        self.detect_and_track(frame, timestamp_ms)
    }

    /// Validate a raw buffer and track in it.
    pub fn track_buffer(&mut self, data: &[u8], width: usize, height: usize, timestamp_ms: f64) -> Result<Pupil> {
        let frame = Frame::new(data, width, height)?;
        self.detect_and_track(&frame, timestamp_ms)
    }

    fn search(&self, frame: &Frame<'_>, params: &DetectorParams, timestamp_ms: f64) -> Pupil {
        match &self.history {
            Some(history) if !self.state.searches_full_frame() => {
                let prior = history.predict(timestamp_ms, self.params.roi_padding_px);
                let region = self.search_region(frame, &prior);
                debug!(?region, "searching around prediction");
                self.detector.detect_in(frame, params, &region, Some(&prior))
            }
            _ => self.detector.detect_in(frame, params, &frame.bounds(), None),
        }
    }

    fn search_region(&self, frame: &Frame<'_>, prior: &Prior) -> Roi {
        let half = self.params.roi_scale * 0.5 * prior.major_axis
            + prior.motion_sigma_px
            + self.params.roi_padding_px;
        Roi::around(prior.center_x, prior.center_y, half, &frame.bounds())
    }

    fn classify(&self, pupil: &Pupil) -> Outcome {
        if pupil.is_valid(self.params.min_detection_confidence) {
            Outcome::Accepted
        } else {
            Outcome::Rejected
        }
    }

    fn record(&mut self, pupil: Option<&Pupil>, outcome: Outcome, timestamp_ms: f64) {
        self.history = match (outcome, pupil) {
            (Outcome::Accepted, Some(&pupil)) => Some(match &self.history {
                Some(history) => history.update(pupil, timestamp_ms, self.params.velocity_smoothing),
                None => TrackerState::new(pupil, timestamp_ms),
            }),
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_utils::{render_ellipse, uniform_frame, EyeScene};
    use approx::assert_relative_eq;

    const W: usize = 200;
    const H: usize = 160;

    fn pupil_frame(cx: f64, cy: f64) -> Vec<u8> {
        render_ellipse(&EyeScene::new(W, H).with_pupil(cx, cy, 18.0, 15.0, 0.0))
    }

    #[test]
    fn test_transition_function() {
        use Action::*;
        use Outcome::*;
        use TrackState::*;
        assert_eq!(Cold.next(Accepted), (Warm, Report));
        assert_eq!(Cold.next(Rejected), (Cold, Report));
        assert_eq!(Warm.next(Accepted), (Warm, Report));
        assert_eq!(Warm.next(Rejected), (Cold, RetryFullFrame));
        assert_eq!(Warm.next(Stale), (Cold, RetryFullFrame));
        assert!(Cold.searches_full_frame());
        assert!(!Warm.searches_full_frame());
    }

    #[test]
    fn test_history_velocity_and_prediction() {
        let pupil = |x: f64| Pupil {
            center_x: x,
            center_y: 50.0,
            width: 30.0,
            height: 20.0,
            angle: 0.0,
            confidence: 0.9,
        };
        let history = TrackerState::new(pupil(10.0), 0.0)
            .update(pupil(12.0), 10.0, 1.0)
            .update(pupil(14.0), 20.0, 1.0);
        assert_relative_eq!(history.velocity.0, 0.2);
        assert_relative_eq!(history.velocity.1, 0.0);

        let prior = history.predict(30.0, 8.0);
        assert_relative_eq!(prior.center_x, 16.0);
        assert_relative_eq!(prior.major_axis, 30.0);
        assert_relative_eq!(prior.motion_sigma_px, 8.0 + 0.5 * 0.2 * 10.0);
    }

    #[test]
    fn test_tracks_moving_pupil() -> anyhow::Result<()> {
        let mut tracker = Tracker::default();
        let mut locked = false;
        for i in 0..20 {
            let (cx, cy) = (60.0 + 3.0 * i as f64, 70.0 + 1.0 * i as f64);
            let data = pupil_frame(cx, cy);
            let frame = Frame::new(&data, W, H)?;
            let pupil = tracker.detect_and_track(&frame, i as f64 * 16.67)?;
            if locked {
                assert_eq!(tracker.state(), TrackState::Warm, "frame {i}");
            }
            if tracker.state() == TrackState::Warm {
                locked = true;
                assert!((pupil.center_x - cx).abs() <= 2.0, "frame {i}: {pupil:?}");
                assert!((pupil.center_y - cy).abs() <= 2.0, "frame {i}: {pupil:?}");
            }
        }
        assert!(locked);
        let history = tracker.history().expect("history after lock");
        assert!((history.velocity.0 - 3.0 / 16.67).abs() < 0.06);
        Ok(())
    }

    #[test]
    fn test_occlusion_and_recovery() -> anyhow::Result<()> {
        let mut tracker = Tracker::default();
        let clear = pupil_frame(100.0, 80.0);
        let blank = uniform_frame(W, H, 90);

        for i in 0..3 {
            tracker.detect_and_track(&Frame::new(&clear, W, H)?, i as f64 * 16.67)?;
        }
        assert_eq!(tracker.state(), TrackState::Warm);

        let occluded = tracker.detect_and_track(&Frame::new(&blank, W, H)?, 50.0)?;
        assert_eq!(occluded.confidence, 0.0);
        assert_eq!(tracker.state(), TrackState::Cold);
        assert!(tracker.history().is_none());

        let recovered = tracker.detect_and_track(&Frame::new(&clear, W, H)?, 66.7)?;
        assert!(recovered.confidence >= 0.66, "{recovered:?}");
        assert_eq!(tracker.state(), TrackState::Warm);
        Ok(())
    }

    #[test]
    fn test_jump_outside_search_region_relocks_in_same_call() -> anyhow::Result<()> {
        let mut tracker = Tracker::default();
        let left = pupil_frame(50.0, 60.0);
        let right = pupil_frame(150.0, 100.0);
        tracker.detect_and_track(&Frame::new(&left, W, H)?, 0.0)?;
        assert_eq!(tracker.state(), TrackState::Warm);

        let pupil = tracker.detect_and_track(&Frame::new(&right, W, H)?, 16.67)?;
        assert!((pupil.center_x - 150.0).abs() <= 2.0, "{pupil:?}");
        assert_eq!(tracker.state(), TrackState::Warm);
        Ok(())
    }

    #[test]
    fn test_stale_history_is_dropped() -> anyhow::Result<()> {
        let mut tracker = Tracker::default();
        let clear = pupil_frame(100.0, 80.0);
        let blank = uniform_frame(W, H, 90);
        tracker.detect_and_track(&Frame::new(&clear, W, H)?, 0.0)?;
        assert_eq!(tracker.state(), TrackState::Warm);

        let pupil = tracker.detect_and_track(&Frame::new(&blank, W, H)?, 1000.0)?;
        assert_eq!(pupil.confidence, 0.0);
        assert_eq!(tracker.state(), TrackState::Cold);

        tracker.detect_and_track(&Frame::new(&clear, W, H)?, 1016.0)?;
        let history = tracker.history().expect("history after relock");
        // Fresh history, so no velocity carried across the gap.
        assert_eq!(history.velocity, (0.0, 0.0));
        Ok(())
    }

    #[test]
    fn test_backwards_timestamp_drops_history() -> anyhow::Result<()> {
        let mut tracker = Tracker::default();
        let clear = pupil_frame(100.0, 80.0);
        tracker.detect_and_track(&Frame::new(&clear, W, H)?, 100.0)?;
        tracker.detect_and_track(&Frame::new(&clear, W, H)?, 116.0)?;
        let pupil = tracker.detect_and_track(&Frame::new(&clear, W, H)?, 50.0)?;
        assert!(pupil.confidence >= 0.66);
        let history = tracker.history().expect("relocked");
        assert_relative_eq!(history.timestamp_ms, 50.0);
        assert_eq!(history.velocity, (0.0, 0.0));
        Ok(())
    }

    #[test]
    fn test_auto_clock() -> anyhow::Result<()> {
        let mut tracker = Tracker::default();
        let clear = pupil_frame(100.0, 80.0);
        for _ in 0..3 {
            tracker.detect_and_track_auto(&Frame::new(&clear, W, H)?)?;
        }
        let history = tracker.history().expect("locked");
        assert_relative_eq!(history.timestamp_ms, 2.0 * 16.67, epsilon = 1e-9);

        tracker.reset();
        assert_eq!(tracker.state(), TrackState::Cold);
        assert!(tracker.history().is_none());
        tracker.detect_and_track_auto(&Frame::new(&clear, W, H)?)?;
        assert_relative_eq!(tracker.history().expect("locked").timestamp_ms, 0.0);
        Ok(())
    }

    #[test]
    fn test_invalid_input() {
        let mut tracker = Tracker::default();
        assert!(matches!(
            tracker.track_buffer(&[], 0, 0, 0.0),
            Err(Error::InvalidInput(InvalidInputError::ZeroDimension { .. }))
        ));
        assert!(matches!(
            tracker.track_buffer(&[], 64, 48, 0.0),
            Err(Error::InvalidInput(InvalidInputError::EmptyFrame))
        ));
        let data = pupil_frame(100.0, 80.0);
        let frame = Frame::new(&data, W, H).unwrap();
        assert!(matches!(
            tracker.detect_and_track(&frame, f64::NAN),
            Err(Error::InvalidInput(InvalidInputError::InvalidTimestamp(_)))
        ));
        assert_eq!(tracker.state(), TrackState::Cold);
    }

    #[test]
    fn test_per_call_params_bound_the_search() -> anyhow::Result<()> {
        let scene = EyeScene::new(240, 160)
            .with_pupil(60.0, 80.0, 20.0, 20.0, 0.0)
            .with_extra_pupil(180.0, 80.0, 30.0, 30.0);
        let data = render_ellipse(&scene);
        let frame = Frame::new(&data, 240, 160)?;
        let right_only = DetectorParams {
            roi: Some(Roi::new(130, 20, 100, 120)),
            ..Default::default()
        };
        let small_only = DetectorParams {
            max_pupil_diameter_px: Some(50.0),
            ..Default::default()
        };

        let mut tracker = Tracker::default();
        for i in 0..3 {
            let pupil = tracker.detect_and_track_with_params(&frame, &right_only, i as f64 * 10.0)?;
            assert!((pupil.center_x - 180.0).abs() <= 2.0, "{pupil:?}");
            assert_eq!(tracker.state(), TrackState::Warm);
        }

        tracker.reset();
        for i in 0..3 {
            let pupil = tracker.detect_and_track_with_params(&frame, &small_only, i as f64 * 10.0)?;
            assert!((pupil.center_x - 60.0).abs() <= 2.0, "{pupil:?}");
        }
        assert_eq!(tracker.params().detector, DetectorParams::default());
        Ok(())
    }
}
