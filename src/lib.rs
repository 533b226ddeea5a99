pub mod config;
pub mod detector;
pub mod edges;
mod error;
pub mod estimator;
pub mod fitter;
pub mod frame;
pub mod geom;
pub mod math;
pub mod pupil;
pub mod scorer;
pub mod segments;
pub mod tracker;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use config::{DetectorParams, Polarity, TrackerParams};
pub use detector::Detector;
pub use error::{Error, InvalidInputError, Result};
pub use estimator::{Method, PupilEstimator, UnknownMethod};
pub use frame::{Frame, Roi};
pub use pupil::Pupil;
pub use tracker::{TrackState, Tracker};
