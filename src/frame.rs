//! Borrowed single-channel frames and pixel regions.

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::error::InvalidInputError;

/// Read-only view over an 8-bit, single-channel, row-major frame.
///
/// The engine only borrows the samples for the duration of one call.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
}

impl<'a> Frame<'a> {
    pub fn new(data: &'a [u8], width: usize, height: usize) -> Result<Self, InvalidInputError> {
        if width == 0 || height == 0 {
            return Err(InvalidInputError::ZeroDimension { width, height });
        }
        if data.is_empty() {
            return Err(InvalidInputError::EmptyFrame);
        }
        let expected = width
            .checked_mul(height)
            .ok_or(InvalidInputError::DimensionOverflow { width, height })?;
        if data.len() != expected {
            // A buffer that is an exact multiple of the pixel count is almost
            // always an interleaved color frame.
            if data.len() % expected == 0 && data.len() / expected <= 4 {
                return Err(InvalidInputError::NotSingleChannel {
                    channels: (data.len() / expected) as u8,
                });
            }
            return Err(InvalidInputError::BufferSizeMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn from_gray(image: &'a GrayImage) -> Result<Self, InvalidInputError> {
        Self::new(
            image.as_raw(),
            image.width() as usize,
            image.height() as usize,
        )
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Region covering the whole frame.
    pub fn bounds(&self) -> Roi {
        Roi::new(0, 0, self.width, self.height)
    }

    /// Frame center, used as the position of the "no pupil" sentinel.
    pub fn center(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Nearest-neighbour sample at a sub-pixel position, `None` outside the frame.
    pub fn sample(&self, x: f64, y: f64) -> Option<u8> {
        let (xi, yi) = (x.round(), y.round());
        if !xi.is_finite() || !yi.is_finite() || xi < 0.0 || yi < 0.0 {
            return None;
        }
        let (xi, yi) = (xi as usize, yi as usize);
        if xi >= self.width || yi >= self.height {
            return None;
        }
        Some(self.get(xi, yi))
    }
}

impl<'a> TryFrom<&'a GrayImage> for Frame<'a> {
    type Error = InvalidInputError;

    fn try_from(image: &'a GrayImage) -> Result<Self, Self::Error> {
        Self::from_gray(image)
    }
}

impl<'a> TryFrom<&'a DynamicImage> for Frame<'a> {
    type Error = InvalidInputError;

    fn try_from(image: &'a DynamicImage) -> Result<Self, Self::Error> {
        match image {
            DynamicImage::ImageLuma8(gray) => Self::from_gray(gray),
            other => Err(InvalidInputError::NotSingleChannel {
                channels: other.color().channel_count(),
            }),
        }
    }
}

/// Axis-aligned pixel rectangle, `[x, x + width) x [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Roi {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Square region of half-size `half` around `(cx, cy)`, clamped to `bounds`.
    pub fn around(cx: f64, cy: f64, half: f64, bounds: &Roi) -> Self {
        let x0 = (cx - half).floor().max(0.0) as usize;
        let y0 = (cy - half).floor().max(0.0) as usize;
        let x1 = (cx + half).ceil().max(0.0) as usize;
        let y1 = (cy + half).ceil().max(0.0) as usize;
        Self::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0)).clamp_to(bounds)
    }

    pub fn right(&self) -> usize {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> usize {
        self.y.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width.saturating_mul(self.height)
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x as f64 && x <= self.right() as f64 && y >= self.y as f64 && y <= self.bottom() as f64
    }

    /// Intersection with `bounds`; empty when they do not overlap.
    pub fn clamp_to(&self, bounds: &Roi) -> Self {
        let x0 = self.x.max(bounds.x);
        let y0 = self.y.max(bounds.y);
        let x1 = self.right().min(bounds.right());
        let y1 = self.bottom().min(bounds.bottom());
        if x1 <= x0 || y1 <= y0 {
            return Self::new(x0.min(bounds.right()), y0.min(bounds.bottom()), 0, 0);
        }
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }
}
