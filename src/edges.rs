//! Edge extraction: 3x3 binomial smoothing, Sobel gradients, non-maximum
//! suppression along the gradient direction and hysteresis with thresholds
//! relative to the frame's own gradient distribution.
//!
//! Because both thresholds are derived from the observed magnitudes, an
//! additive brightness offset leaves the edge set unchanged and a gain change
//! only rescales it. The absolute floor `min_gradient` is what makes a flat
//! frame produce no edges at all.

use std::collections::VecDeque;

use crate::config::EdgeParams;
use crate::frame::{Frame, Roi};

/// One edge pixel in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgePixel {
    pub x: usize,
    pub y: usize,
    pub gx: f32,
    pub gy: f32,
    pub magnitude: f32,
}

/// Edge pixels found inside a search region.
#[derive(Debug, Clone)]
pub struct EdgeMap {
    roi: Roi,
    mask: Vec<bool>,
    pixels: Vec<EdgePixel>,
}

impl EdgeMap {
    fn empty(roi: Roi) -> Self {
        Self {
            roi,
            mask: vec![false; roi.area()],
            pixels: Vec::new(),
        }
    }

    pub fn roi(&self) -> &Roi {
        &self.roi
    }

    /// Edge pixels in raster order.
    pub fn pixels(&self) -> &[EdgePixel] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn is_edge(&self, x: usize, y: usize) -> bool {
        self.roi.contains(x, y) && self.mask[(y - self.roi.y) * self.roi.width + (x - self.roi.x)]
    }
}

/// Quantised gradient orientation, each with the neighbour offsets compared
/// during non-maximum suppression (negative side first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sector {
    Horizontal,
    Diagonal,
    Vertical,
    AntiDiagonal,
}

impl Sector {
    fn from_gradient(gx: f32, gy: f32) -> Self {
        let mut deg = gy.atan2(gx).to_degrees();
        if deg < 0.0 {
            deg += 180.0;
        }
        match deg {
            d if !(22.5..157.5).contains(&d) => Sector::Horizontal,
            d if d < 67.5 => Sector::Diagonal,
            d if d < 112.5 => Sector::Vertical,
            _ => Sector::AntiDiagonal,
        }
    }

    fn neighbours(self) -> [(isize, isize); 2] {
        match self {
            Sector::Horizontal => [(-1, 0), (1, 0)],
            Sector::Diagonal => [(-1, -1), (1, 1)],
            Sector::Vertical => [(0, -1), (0, 1)],
            Sector::AntiDiagonal => [(1, -1), (-1, 1)],
        }
    }
}

/// Extract edge pixels of `frame` inside `roi`.
///
/// Never fails: an empty region, a frame too small for the Sobel kernel or a
/// region without contrast all yield an empty map.
pub fn extract_edges(frame: &Frame<'_>, roi: &Roi, params: &EdgeParams) -> EdgeMap {
    let roi = roi.clamp_to(&frame.bounds());
    if roi.is_empty() || frame.width() < 3 || frame.height() < 3 {
        return EdgeMap::empty(roi);
    }

    let area = Roi::new(roi.x.saturating_sub(1), roi.y.saturating_sub(1), roi.width + 2, roi.height + 2)
        .clamp_to(&frame.bounds());
    let smoothed = smooth(frame, &area);
    let blurred = |x: usize, y: usize| smoothed[(y - area.y) * area.width + (x - area.x)];

    let (w, h) = (roi.width, roi.height);
    let mut gx = vec![0f32; w * h];
    let mut gy = vec![0f32; w * h];
    let mut mag = vec![0f32; w * h];
    let mut max_mag = 0f32;

    let xs = roi.x.max(1)..roi.right().min(frame.width() - 1);
    let ys = roi.y.max(1)..roi.bottom().min(frame.height() - 1);
    for y in ys {
        for x in xs.clone() {
            let p = |dx: isize, dy: isize| {
                blurred((x as isize + dx) as usize, (y as isize + dy) as usize)
            };
            let sx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            let sy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            let i = (y - roi.y) * w + (x - roi.x);
            gx[i] = sx;
            gy[i] = sy;
            mag[i] = sx.hypot(sy);
            max_mag = max_mag.max(mag[i]);
        }
    }

    if max_mag < params.min_gradient {
        return EdgeMap::empty(roi);
    }

    let at = |m: &[f32], lx: isize, ly: isize| -> f32 {
        if lx < 0 || ly < 0 || lx >= w as isize || ly >= h as isize {
            0.0
        } else {
            m[ly as usize * w + lx as usize]
        }
    };

    // Non-maximum suppression. Ties are broken asymmetrically so a two-pixel
    // wide step keeps exactly one pixel.
    let mut thin = vec![0f32; w * h];
    for ly in 0..h {
        for lx in 0..w {
            let i = ly * w + lx;
            let m = mag[i];
            if m < params.min_gradient {
                continue;
            }
            let [(ax, ay), (bx, by)] = Sector::from_gradient(gx[i], gy[i]).neighbours();
            let a = at(&mag, lx as isize + ax, ly as isize + ay);
            let b = at(&mag, lx as isize + bx, ly as isize + by);
            if m > a && m >= b {
                thin[i] = m;
            }
        }
    }

    let mut survivors: Vec<f32> = thin.iter().copied().filter(|&m| m > 0.0).collect();
    if survivors.is_empty() {
        return EdgeMap::empty(roi);
    }
    survivors.sort_by(f32::total_cmp);
    let q = params.high_quantile.clamp(0.0, 1.0);
    let high = survivors[((survivors.len() - 1) as f32 * q).round() as usize].max(params.min_gradient);
    let low = (params.low_ratio * high).max(params.min_gradient);

    // Hysteresis: grow from strong pixels through weak ones.
    let mut mask = vec![false; w * h];
    let mut queue = VecDeque::new();
    for (i, &m) in thin.iter().enumerate() {
        if m >= high {
            mask[i] = true;
            queue.push_back(i);
        }
    }
    while let Some(i) = queue.pop_front() {
        let (lx, ly) = ((i % w) as isize, (i / w) as isize);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (nx, ny) = (lx + dx, ly + dy);
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let j = ny as usize * w + nx as usize;
                if !mask[j] && thin[j] >= low {
                    mask[j] = true;
                    queue.push_back(j);
                }
            }
        }
    }

    let pixels = mask
        .iter()
        .enumerate()
        .filter(|(_, &on)| on)
        .map(|(i, _)| EdgePixel {
            x: roi.x + i % w,
            y: roi.y + i / w,
            gx: gx[i],
            gy: gy[i],
            magnitude: mag[i],
        })
        .collect();

    EdgeMap { roi, mask, pixels }
}

/// 3x3 binomial smoothing of `area`, replicating the frame border.
fn smooth(frame: &Frame<'_>, area: &Roi) -> Vec<f32> {
    const KERNEL: [f32; 3] = [1.0, 2.0, 1.0];
    let (fw, fh) = (frame.width() as isize, frame.height() as isize);
    let at = |x: isize, y: isize| frame.get(x.clamp(0, fw - 1) as usize, y.clamp(0, fh - 1) as usize) as f32;

    let mut out = Vec::with_capacity(area.area());
    for y in area.y..area.bottom() {
        for x in area.x..area.right() {
            let (x, y) = (x as isize, y as isize);
            let mut sum = 0f32;
            for (ky, wy) in KERNEL.iter().enumerate() {
                for (kx, wx) in KERNEL.iter().enumerate() {
                    sum += wy * wx * at(x + kx as isize - 1, y + ky as isize - 1);
                }
            }
            out.push(sum / 16.0);
        }
    }
    out
}
