/*!
Spatial indexing and point-to-edge projection.

[`IndexedEdgePoint`] is the `rstar::Point`-implementing wrapper the graph's
`RTree` is built over. It indexes a representative point per *edge* (its
midpoint) rather than per node, since candidate generation and station
snapping need nearby edges, not nearby nodes.
*/

use geo::{Coord, HaversineDistance, LineString, Point};
use rstar::{Point as RstarPoint, RTree};

use crate::graph::{EdgeId, RoadGraph};

/// An edge's representative point in the spatial index.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct IndexedEdgePoint {
    pub edge: Option<EdgeId>,
    pub geometry: Point<f64>,
}

impl RstarPoint for IndexedEdgePoint {
    type Scalar = f64;
    const DIMENSIONS: usize = 2;

    fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
        IndexedEdgePoint {
            edge: None,
            geometry: Point::new(generator(0), generator(1)),
        }
    }

    fn nth(&self, index: usize) -> Self::Scalar {
        self.geometry.nth(index)
    }

    fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
        self.geometry.nth_mut(index)
    }
}

/// Meters-per-degree of latitude, used to convert a search radius in
/// meters into the `RTree`'s native lon/lat degree units.
const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Convert a radius in meters to degrees, conservatively sized for a
/// query centered at `lat_deg`: a degree of longitude covers less ground
/// than a degree of latitude away from the equator, so the longitude
/// conversion (the larger of the two) is used, keeping the query circle
/// at least as big as the true radius in every direction.
#[must_use]
pub fn meters_to_degrees_radius(meters: f64, lat_deg: f64) -> f64 {
    let lon_scale = lat_deg.to_radians().cos().abs().max(0.01);
    meters / (METERS_PER_DEG_LAT * lon_scale)
}

/// Build the edge `RTree` for a finished graph: one representative point
/// (the polyline midpoint) per edge.
#[must_use]
pub fn build_edge_rtree(graph: &RoadGraph) -> RTree<IndexedEdgePoint> {
    let points: Vec<IndexedEdgePoint> = graph
        .edge_ids()
        .filter_map(|id| {
            let edge = graph.edge(id)?;
            let mid = midpoint(&edge.geometry);
            Some(IndexedEdgePoint {
                edge: Some(id),
                geometry: mid,
            })
        })
        .collect();
    RTree::bulk_load(points)
}

fn midpoint(line: &LineString<f64>) -> Point<f64> {
    let coords: &[Coord<f64>] = line.0.as_slice();
    if coords.is_empty() {
        return Point::new(0.0, 0.0);
    }
    let mid = coords.len() / 2;
    Point::from(coords[mid])
}

/// The result of projecting a point onto an edge's polyline: the fraction
/// along the polyline (by cumulative segment length) of the closest
/// point, and the haversine distance from `p` to that closest point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub offset: f64,
    pub distance: f64,
}

/// Project `p` onto `line`, returning the fractional offset (in `[0, 1]`)
/// of the nearest point along the polyline and the distance to it.
///
/// Candidates are scored by distance to the true polyline, not just to
/// the edge's endpoint chord, so multi-segment edges (post
/// `simplifyGeoms`) are still matched accurately.
#[must_use]
pub fn project_point_onto_edge(p: Point<f64>, line: &LineString<f64>) -> Projection {
    let coords = line.0.as_slice();
    if coords.len() < 2 {
        let only = coords.first().copied().map(Point::from).unwrap_or(p);
        return Projection {
            offset: 0.0,
            distance: p.haversine_distance(&only),
        };
    }

    let total_length: f64 = coords
        .windows(2)
        .map(|w| Point::from(w[0]).haversine_distance(&Point::from(w[1])))
        .sum();

    let mut cumulative = 0.0;
    let mut best_distance = f64::INFINITY;
    let mut best_offset = 0.0;

    for w in coords.windows(2) {
        let seg_len = Point::from(w[0]).haversine_distance(&Point::from(w[1]));
        let closest = closest_point_on_segment(p, w[0], w[1]);
        let distance = p.haversine_distance(&closest);

        if distance < best_distance {
            best_distance = distance;
            let along = Point::from(w[0]).haversine_distance(&closest);
            best_offset = if total_length > 0.0 {
                ((cumulative + along) / total_length).clamp(0.0, 1.0)
            } else {
                0.0
            };
        }

        cumulative += seg_len;
    }

    Projection {
        offset: best_offset,
        distance: best_distance,
    }
}

/// Closest point on segment `a→b` to `p`, using a local equirectangular
/// projection (longitude scaled by `cos(latitude)`) so the parametric
/// projection is meaningful for lon/lat coordinates over short segments,
/// then mapped back to lon/lat.
fn closest_point_on_segment(p: Point<f64>, a: Coord<f64>, b: Coord<f64>) -> Point<f64> {
    let lat0 = a.y.to_radians();
    let scale = lat0.cos().max(1e-6);

    let ax = a.x * scale;
    let ay = a.y;
    let bx = b.x * scale;
    let by = b.y;
    let px = p.x() * scale;
    let py = p.y();

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;

    let t = if len_sq > 0.0 {
        (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let x = (ax + t * dx) / scale;
    let y = ay + t * dy;
    Point::new(x, y)
}

/// The point at fractional `offset` (`[0, 1]`) along `line`'s cumulative
/// length.
#[must_use]
pub fn point_at_offset(line: &LineString<f64>, offset: f64) -> Point<f64> {
    let coords = line.0.as_slice();
    if coords.is_empty() {
        return Point::new(0.0, 0.0);
    }
    if coords.len() == 1 {
        return Point::from(coords[0]);
    }
    let offset = offset.clamp(0.0, 1.0);
    let total_length: f64 = coords
        .windows(2)
        .map(|w| Point::from(w[0]).haversine_distance(&Point::from(w[1])))
        .sum();
    let target = offset * total_length;

    let mut cumulative = 0.0;
    for w in coords.windows(2) {
        let seg_len = Point::from(w[0]).haversine_distance(&Point::from(w[1]));
        if cumulative + seg_len >= target || seg_len == 0.0 {
            let local = if seg_len > 0.0 {
                (target - cumulative) / seg_len
            } else {
                0.0
            };
            let a = Point::from(w[0]);
            let b = Point::from(w[1]);
            return Point::new(a.x() + (b.x() - a.x()) * local, a.y() + (b.y() - a.y()) * local);
        }
        cumulative += seg_len;
    }
    Point::from(*coords.last().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_onto_straight_edge_midpoint() {
        let line = LineString::from(vec![(0.0, 0.0), (0.0, 1.0)]);
        let p = Point::new(0.0005, 0.5);
        let proj = project_point_onto_edge(p, &line);
        assert!(
            (proj.offset - 0.5).abs() < 0.05,
            "offset was {}",
            proj.offset
        );
    }

    #[test]
    fn point_at_offset_round_trips_endpoints() {
        let line = LineString::from(vec![(0.0, 0.0), (0.0, 1.0), (0.0, 2.0)]);
        let start = point_at_offset(&line, 0.0);
        let end = point_at_offset(&line, 1.0);
        assert!((start.y() - 0.0).abs() < 1e-9);
        assert!((end.y() - 2.0).abs() < 1e-6);
    }
}
