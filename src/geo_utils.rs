//! # Geographic Utilities
//!
//! Small geographic helpers shared by the feature compiler, the route builder
//! and the view controller.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two map points |
//! | [`compute_bounds`] | Bounding box of a set of points |
//! | [`coordinate_key`] | Integer grouping key at a fixed decimal precision |
//! | [`radial_offset`] | Evenly spaced offset around a shared base point |
//!
//! ## Example
//!
//! ```rust
//! use itinerary_map::{LngLat, geo_utils};
//!
//! let lisbon = LngLat::new(-9.1393, 38.7223);
//! let porto = LngLat::new(-8.6291, 41.1579);
//!
//! let dist = geo_utils::haversine_distance(&lisbon, &porto);
//! assert!((dist - 274_000.0).abs() < 5_000.0);
//! ```
//!
//! All functions expect WGS84 coordinates in degrees. Offsets are planar in
//! degree space, which is what the map renderer draws in at city zoom.

use geo::{Distance, Haversine, Point};
use std::f64::consts::TAU;

use crate::{Bounds, LngLat};

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance in meters (spherical Earth, radius 6,371 km).
#[inline]
pub fn haversine_distance(p1: &LngLat, p2: &LngLat) -> f64 {
    let point1 = Point::new(p1.lng, p1.lat);
    let point2 = Point::new(p2.lng, p2.lat);
    Haversine::distance(point1, point2)
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Bounding box of a set of points, `None` for empty input.
///
/// ```rust
/// use itinerary_map::{LngLat, geo_utils};
///
/// let points = vec![
///     LngLat::new(-0.1300, 51.5000),
///     LngLat::new(-0.1200, 51.5100),
///     LngLat::new(-0.1250, 51.5050),
/// ];
/// let bounds = geo_utils::compute_bounds(&points).unwrap();
/// assert_eq!(bounds.min_lat, 51.5000);
/// assert_eq!(bounds.max_lng, -0.1200);
/// ```
pub fn compute_bounds(points: &[LngLat]) -> Option<Bounds> {
    if points.is_empty() {
        return None;
    }

    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.lat);
        max_lat = max_lat.max(p.lat);
        min_lng = min_lng.min(p.lng);
        max_lng = max_lng.max(p.lng);
    }

    Some(Bounds { min_lat, max_lat, min_lng, max_lng })
}

// =============================================================================
// Grouping and Offsets
// =============================================================================

/// Highest precision honored by [`coordinate_key`]; larger values are clamped.
pub const MAX_KEY_PRECISION: u32 = 9;

/// Largest scaled magnitude kept as a rounded integer key.
const MAX_ROUNDED: f64 = (1u64 << 62) as f64;

/// Key identifying a coordinate at a fixed decimal precision.
///
/// Precision 6 treats points about 11 cm apart as identical. Coordinates too
/// large to scale into an `i64` fall back to their exact bit patterns, so two
/// distinct points never share a key through saturation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateKey {
    Rounded(i64, i64),
    Exact(u64, u64),
}

pub fn coordinate_key(point: &LngLat, precision: u32) -> CoordinateKey {
    let scale = 10f64.powi(precision.min(MAX_KEY_PRECISION) as i32);
    let lng = (point.lng * scale).round();
    let lat = (point.lat * scale).round();
    if lng.abs() < MAX_ROUNDED && lat.abs() < MAX_ROUNDED {
        CoordinateKey::Rounded(lng as i64, lat as i64)
    } else {
        CoordinateKey::Exact(point.lng.to_bits(), point.lat.to_bits())
    }
}

/// Position of member `index` of a group of `count` points sharing `base`.
///
/// Members sit on a circle of `radius_deg` at angle `index * 2π / count`.
/// A group of one is returned unchanged.
pub fn radial_offset(base: &LngLat, index: usize, count: usize, radius_deg: f64) -> LngLat {
    if count <= 1 {
        return *base;
    }
    let angle = index as f64 * TAU / count as f64;
    LngLat::new(
        base.lng + radius_deg * angle.cos(),
        base.lat + radius_deg * angle.sin(),
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
