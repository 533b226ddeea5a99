//! Grouping of edge pixels into ordered arcs.
//!
//! Edge pixels are traced into 8-connected chains, chains are cut at corners,
//! neighbouring arcs that continue each other smoothly are merged and the
//! remaining arcs are filtered by length and straightness.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use itertools::Itertools;
use nalgebra::{Point2, Vector2};
use tracing::{debug, trace};

use crate::config::{DiameterBounds, SegmentParams};
use crate::edges::EdgeMap;
use crate::frame::Roi;
use crate::utils::{angle_between, signed_turn};

/// 4-connected neighbours first so staircases are walked without skipping pixels.
const NEIGHBOURS: [(isize, isize); 8] = [
    (1, 0),
    (0, 1),
    (-1, 0),
    (0, -1),
    (1, 1),
    (-1, 1),
    (-1, -1),
    (1, -1),
];

/// An ordered, connected arc of edge points.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSegment {
    points: Vec<Point2<f64>>,
    arc_length: f64,
    mean_curvature: f64,
    curvature_variance: f64,
    bounds: Roi,
}

impl EdgeSegment {
    pub fn from_points(points: Vec<Point2<f64>>, tangent_window: usize) -> Self {
        let arc_length = points
            .iter()
            .tuple_windows()
            .map(|(a, b)| (b - a).norm())
            .sum();
        let (mean_curvature, curvature_variance) = curvature_stats(&points, tangent_window);
        let bounds = bounding_roi(&points);
        Self {
            points,
            arc_length,
            mean_curvature,
            curvature_variance,
            bounds,
        }
    }

    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Polyline length in pixels.
    pub fn arc_length(&self) -> f64 {
        self.arc_length
    }

    /// Mean signed curvature in 1/px.
    pub fn mean_curvature(&self) -> f64 {
        self.mean_curvature
    }

    pub fn curvature_variance(&self) -> f64 {
        self.curvature_variance
    }

    pub fn bounds(&self) -> &Roi {
        &self.bounds
    }

    /// Largest distance of a point from the chord joining the endpoints.
    ///
    /// For a (nearly) closed arc the chord degenerates and the distance from
    /// the first point is used instead.
    pub fn sagitta(&self) -> f64 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0.0;
        };
        let chord = last - first;
        let chord_len = chord.norm();
        if chord_len < 1.0 {
            return self
                .points
                .iter()
                .map(|p| (p - first).norm())
                .fold(0.0, f64::max);
        }
        self.points
            .iter()
            .map(|p| {
                let d = p - first;
                (d.x * chord.y - d.y * chord.x).abs() / chord_len
            })
            .fold(0.0, f64::max)
    }

    /// Direction leaving the arc at its last point.
    fn tail_direction(&self, window: usize) -> Vector2<f64> {
        let n = self.points.len();
        let w = window.min(n.saturating_sub(1));
        self.points[n - 1] - self.points[n - 1 - w]
    }

    /// Direction entering the arc at its first point.
    fn head_direction(&self, window: usize) -> Vector2<f64> {
        let w = window.min(self.points.len().saturating_sub(1));
        self.points[w] - self.points[0]
    }

    fn endpoints(&self) -> impl Iterator<Item = &Point2<f64>> + Clone {
        self.points.first().into_iter().chain(self.points.last())
    }

    /// Last point and leaving direction of the arc walked backwards when `reversed`.
    fn exit(&self, reversed: bool, window: usize) -> (Point2<f64>, Vector2<f64>) {
        if reversed {
            (self.points[0], -self.head_direction(window))
        } else {
            (self.points[self.points.len() - 1], self.tail_direction(window))
        }
    }

    /// First point and entering direction of the arc walked backwards when `reversed`.
    fn entry(&self, reversed: bool, window: usize) -> (Point2<f64>, Vector2<f64>) {
        if reversed {
            (self.points[self.points.len() - 1], -self.tail_direction(window))
        } else {
            (self.points[0], self.head_direction(window))
        }
    }
}

/// Mean and variance of the discrete curvature along `points`.
fn curvature_stats(points: &[Point2<f64>], window: usize) -> (f64, f64) {
    let n = points.len();
    if n < 3 {
        return (0.0, 0.0);
    }
    let w = window.clamp(1, (n - 1) / 2);
    let curvatures: Vec<f64> = (w..n - w)
        .filter_map(|i| {
            let back = points[i] - points[i - w];
            let ahead = points[i + w] - points[i];
            let span = 0.5 * (back.norm() + ahead.norm());
            (span > f64::EPSILON).then(|| signed_turn(&back, &ahead) / span)
        })
        .collect();
    if curvatures.is_empty() {
        return (0.0, 0.0);
    }
    let count = curvatures.len() as f64;
    let mean = curvatures.iter().sum::<f64>() / count;
    let variance = curvatures.iter().map(|k| (k - mean).powi(2)).sum::<f64>() / count;
    (mean, variance)
}

fn bounding_roi(points: &[Point2<f64>]) -> Roi {
    if points.is_empty() {
        return Roi::new(0, 0, 0, 0);
    }
    let (mut x0, mut y0) = (f64::INFINITY, f64::INFINITY);
    let (mut x1, mut y1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    let (x0, y0) = (x0.max(0.0) as usize, y0.max(0.0) as usize);
    Roi::new(
        x0,
        y0,
        (x1.max(0.0) as usize + 1).saturating_sub(x0),
        (y1.max(0.0) as usize + 1).saturating_sub(y0),
    )
}

/// Build the arcs forwarded to the ellipse fitter.
///
/// Arcs longer than the circumference of the largest plausible pupil in
/// `size` are rejected as eyelid or eyelash structure.
pub fn build_segments(
    edges: &EdgeMap,
    size: &DiameterBounds,
    params: &SegmentParams,
) -> Vec<EdgeSegment> {
    let chains = trace_chains(edges);
    let traced = chains.len();

    let window = params.tangent_window.max(1);
    let max_turn = params.max_corner_deg.to_radians();
    let pieces: Vec<EdgeSegment> = chains
        .into_iter()
        .flat_map(|chain| split_at_corners(chain, window, max_turn))
        .filter(|piece| piece.len() >= params.min_piece_px.max(2))
        .map(|piece| EdgeSegment::from_points(piece, window))
        .collect();
    let split = pieces.len();

    let merged = merge_arcs(pieces, params);
    let merged_count = merged.len();

    let max_length = size.max_circumference() * params.length_slack;
    let mut kept: Vec<EdgeSegment> = merged
        .into_iter()
        .filter(|s| {
            let keep = s.len() >= params.min_length_px
                && s.arc_length() <= max_length
                && s.sagitta() >= params.min_sagitta_px;
            if !keep {
                trace!(
                    points = s.len(),
                    arc_length = s.arc_length(),
                    sagitta = s.sagitta(),
                    "segment discarded"
                );
            }
            keep
        })
        .collect();

    // Stable, so equal lengths keep tracing order.
    kept.sort_by(|a, b| b.arc_length().total_cmp(&a.arc_length()));
    kept.truncate(params.max_segments);

    debug!(
        chains = traced,
        pieces = split,
        merged = merged_count,
        kept = kept.len(),
        "segments built"
    );
    kept
}

/// Trace edge pixels into ordered 8-connected chains.
///
/// Chains are started at endpoints (pixels with a single neighbour) first so
/// open arcs are walked from one end to the other; what is left afterwards
/// are closed loops, started at their first pixel in raster order.
fn trace_chains(edges: &EdgeMap) -> Vec<Vec<Point2<f64>>> {
    let roi = *edges.roi();
    let (w, h) = (roi.width, roi.height);
    let index = |x: usize, y: usize| (y - roi.y) * w + (x - roi.x);
    let neighbours = |x: usize, y: usize| {
        NEIGHBOURS.iter().filter_map(move |&(dx, dy)| {
            let nx = x.checked_add_signed(dx)?;
            let ny = y.checked_add_signed(dy)?;
            edges.is_edge(nx, ny).then_some((nx, ny))
        })
    };

    let mut visited = vec![false; w * h];
    let mut chains = Vec::new();

    let endpoints: Vec<(usize, usize)> = edges
        .pixels()
        .iter()
        .map(|p| (p.x, p.y))
        .filter(|&(x, y)| neighbours(x, y).count() == 1)
        .collect();
    let everything = edges.pixels().iter().map(|p| (p.x, p.y));

    for (sx, sy) in endpoints.into_iter().chain(everything) {
        if visited[index(sx, sy)] {
            continue;
        }
        let mut chain = vec![Point2::new(sx as f64, sy as f64)];
        visited[index(sx, sy)] = true;
        let (mut x, mut y) = (sx, sy);
        while let Some((nx, ny)) = neighbours(x, y).find(|&(nx, ny)| !visited[index(nx, ny)]) {
            visited[index(nx, ny)] = true;
            chain.push(Point2::new(nx as f64, ny as f64));
            (x, y) = (nx, ny);
        }
        chains.push(chain);
    }
    chains
}

/// Cut a chain where the tangent turns by more than `max_turn` over `window` points.
///
/// Each run of points above the limit yields one cut at its sharpest point;
/// the corner pixel itself is dropped.
fn split_at_corners(chain: Vec<Point2<f64>>, window: usize, max_turn: f64) -> Vec<Vec<Point2<f64>>> {
    let n = chain.len();
    if n < 2 * window + 1 {
        return vec![chain];
    }

    let turn = |i: usize| angle_between(&(chain[i] - chain[i - window]), &(chain[i + window] - chain[i]));
    let mut corners = Vec::new();
    let mut run: Option<(usize, f64)> = None;
    for i in window..n - window {
        let t = turn(i);
        if t > max_turn {
            run = match run {
                Some((_, best)) if best >= t => run,
                _ => Some((i, t)),
            };
        } else if let Some((corner, _)) = run.take() {
            corners.push(corner);
        }
    }
    if let Some((corner, _)) = run {
        corners.push(corner);
    }
    if corners.is_empty() {
        return vec![chain];
    }

    let mut pieces = Vec::with_capacity(corners.len() + 1);
    let mut start = 0;
    for corner in corners {
        pieces.push(chain[start..corner].to_vec());
        start = corner + 1;
    }
    pieces.push(chain[start..].to_vec());
    pieces
}

/// Endpoint lookup in cells of the merge gap, so only arcs whose ends are
/// close are ever compared.
struct EndpointGrid {
    cell: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl EndpointGrid {
    fn new(max_gap: f64) -> Self {
        Self {
            cell: max_gap.max(1.0),
            cells: HashMap::new(),
        }
    }

    fn key(&self, p: &Point2<f64>) -> (i64, i64) {
        ((p.x / self.cell).floor() as i64, (p.y / self.cell).floor() as i64)
    }

    fn insert(&mut self, id: usize, arc: &EdgeSegment) {
        for p in arc.endpoints() {
            let key = self.key(p);
            self.cells.entry(key).or_default().push(id);
        }
    }

    /// Ids with an endpoint in a cell touching an endpoint of `arc`.
    ///
    /// Entries are never removed, so ids of merged-away arcs show up too.
    fn near(&self, arc: &EdgeSegment) -> Vec<usize> {
        let mut ids: Vec<usize> = arc
            .endpoints()
            .flat_map(|p| {
                let (cx, cy) = self.key(p);
                (cx - 1..=cx + 1).cartesian_product(cy - 1..=cy + 1)
            })
            .filter_map(|key| self.cells.get(&key))
            .flatten()
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// A possible merge of the arcs in slots `first < second`, valid while both
/// slots still have the versions it was computed from.
#[derive(Debug)]
struct Join {
    variance: f64,
    first: usize,
    second: usize,
    versions: (u32, u32),
    joined: EdgeSegment,
}

impl Ord for Join {
    /// Reversed so the max-heap yields the smoothest join, lowest slots on ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .variance
            .total_cmp(&self.variance)
            .then_with(|| (other.first, other.second).cmp(&(self.first, self.second)))
    }
}

impl PartialOrd for Join {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Join {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Join {}

/// Repeatedly join the pair of arcs that continue each other, smoothest result first.
///
/// Joins are kept in a priority queue; a merge invalidates the queued joins of
/// both inputs and queues the joins of the result with its neighbours.
fn merge_arcs(arcs: Vec<EdgeSegment>, params: &SegmentParams) -> Vec<EdgeSegment> {
    let window = params.tangent_window.max(1);
    let max_angle = params.merge_angle_deg.to_radians();

    let mut slots: Vec<Option<EdgeSegment>> = arcs.into_iter().map(Some).collect();
    let mut versions = vec![0u32; slots.len()];
    let mut grid = EndpointGrid::new(params.merge_gap_px);
    for (id, arc) in slots.iter().enumerate() {
        if let Some(arc) = arc {
            grid.insert(id, arc);
        }
    }

    let candidate = |slots: &[Option<EdgeSegment>], versions: &[u32], i: usize, j: usize| {
        let (first, second) = (i.min(j), i.max(j));
        let (Some(a), Some(b)) = (&slots[first], &slots[second]) else {
            return None;
        };
        let joined = try_join(a, b, window, params.merge_gap_px, max_angle)?;
        Some(Join {
            variance: joined.curvature_variance(),
            first,
            second,
            versions: (versions[first], versions[second]),
            joined,
        })
    };

    let mut queue = BinaryHeap::new();
    for (i, arc) in slots.iter().enumerate() {
        let Some(arc) = arc else {
            continue;
        };
        for j in grid.near(arc).into_iter().filter(|&j| j > i) {
            queue.extend(candidate(&slots, &versions, i, j));
        }
    }

    while let Some(Join {
        variance,
        first,
        second,
        versions: (first_version, second_version),
        joined,
    }) = queue.pop()
    {
        if versions[first] != first_version || versions[second] != second_version {
            continue;
        }
        trace!(first, second, variance, "arcs merged");
        versions[first] += 1;
        versions[second] += 1;
        slots[second] = None;
        grid.insert(first, &joined);
        slots[first] = Some(joined);
        if let Some(arc) = &slots[first] {
            for j in grid.near(arc).into_iter().filter(|&j| j != first) {
                queue.extend(candidate(&slots, &versions, first, j));
            }
        }
    }

    slots.into_iter().flatten().collect()
}

/// Join `a` and `b` if some orientation puts an end of one next to a start of
/// the other with agreeing tangents. Among valid orientations the smoothest
/// result is returned.
fn try_join(
    a: &EdgeSegment,
    b: &EdgeSegment,
    window: usize,
    max_gap: f64,
    max_angle: f64,
) -> Option<EdgeSegment> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let near = a
        .endpoints()
        .cartesian_product(b.endpoints())
        .any(|(p, q)| (p - q).norm() <= max_gap);
    if !near {
        return None;
    }

    [(a, false, b, false), (a, false, b, true), (a, true, b, false), (b, false, a, false)]
        .into_iter()
        .filter(|&(first, first_rev, second, second_rev)| {
            let (tail, leaving) = first.exit(first_rev, window);
            let (head, entering) = second.entry(second_rev, window);
            (head - tail).norm() <= max_gap && angle_between(&leaving, &entering) <= max_angle
        })
        .map(|(first, first_rev, second, second_rev)| {
            let mut points: Vec<Point2<f64>> = Vec::with_capacity(first.len() + second.len());
            for (segment, reversed) in [(first, first_rev), (second, second_rev)] {
                if reversed {
                    points.extend(segment.points.iter().rev());
                } else {
                    points.extend(&segment.points);
                }
            }
            EdgeSegment::from_points(points, window)
        })
        .min_by(|x, y| x.curvature_variance().total_cmp(&y.curvature_variance()))
}
