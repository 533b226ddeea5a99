pub mod conic;
pub mod fit;

pub use conic::ConicError;
pub use fit::{fit_ellipse_direct, rms_distance};
