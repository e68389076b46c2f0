//! # Point Feature Compilation
//!
//! Turns the event list into one map point per positioned event and a
//! [`MarkerIndex`] describing where every marker finally landed.
//!
//! ## Algorithm
//! 1. Resolve one coordinate per event, dropping events without one
//! 2. Group survivors by a coordinate key at fixed decimal precision
//! 3. Singletons keep their coordinate
//! 4. Members of larger groups are fanned out on a small circle around the
//!    group's base point, in input order, at evenly spaced angles
//!
//! Output order always follows input order, so compiling the same list twice
//! yields identical features and an identical index.

use geojson::{Feature, FeatureCollection, Geometry, Value};
use log::debug;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::event::{Event, EventCategory};
use crate::extract::{representative_location, resolve_coordinate};
use crate::geo_utils::{self, CoordinateKey};
use crate::route::parse_start_time;
use crate::{Bounds, LngLat};

/// Configuration for point compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct CompileConfig {
    /// Decimal places used to decide that two coordinates are identical.
    /// Default: 6 (about 11 cm). Values above 9 are treated as 9.
    pub coordinate_precision: u32,

    /// Radius of the fan-out circle for co-located events, in degrees.
    /// Default: 0.0003 (~30 m, visible at street zoom, invisible at country zoom)
    pub cluster_radius_deg: f64,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            coordinate_precision: 6,
            cluster_radius_deg: 0.0003,
        }
    }
}

/// An event that made it onto the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionedEvent {
    pub event_id: String,
    pub category: EventCategory,
    /// Final coordinate, offset if the event is part of a cluster.
    pub coordinate: LngLat,
    pub clustered: bool,
    /// Parsed start time; `None` when missing or unparsable.
    pub start: Option<chrono::DateTime<chrono::Utc>>,
}

/// A positioned event plus the display metadata its marker carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointFeature {
    #[serde(flatten)]
    pub positioned: PositionedEvent,
    pub title: String,
    pub event_type: Option<String>,
    pub location_name: Option<String>,
    pub start_time: Option<String>,
}

impl PointFeature {
    pub fn to_geojson(&self) -> Feature {
        let p = &self.positioned;
        let mut properties = Map::new();
        properties.insert("eventId".into(), JsonValue::from(p.event_id.clone()));
        properties.insert("category".into(), JsonValue::from(p.category.as_str()));
        properties.insert("eventType".into(), optional_string(&self.event_type));
        properties.insert("title".into(), JsonValue::from(self.title.clone()));
        properties.insert("locationName".into(), optional_string(&self.location_name));
        properties.insert("startTime".into(), optional_string(&self.start_time));
        properties.insert("clustered".into(), JsonValue::from(p.clustered));

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![p.coordinate.lng, p.coordinate.lat]))),
            id: Some(geojson::feature::Id::String(p.event_id.clone())),
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

pub(crate) fn optional_string(value: &Option<String>) -> JsonValue {
    value
        .as_ref()
        .map_or(JsonValue::Null, |s| JsonValue::from(s.clone()))
}

/// Where every marker landed.
///
/// Keyed collections are ordered so the index serializes identically for
/// identical input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerIndex {
    coordinates: BTreeMap<String, LngLat>,
    clustered_event_ids: BTreeSet<String>,
    all_coordinates: Vec<LngLat>,
}

impl MarkerIndex {
    /// Final coordinate of an event, if it is on the map.
    pub fn coordinate(&self, event_id: &str) -> Option<LngLat> {
        self.coordinates.get(event_id).copied()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.coordinates.contains_key(event_id)
    }

    pub fn is_clustered(&self, event_id: &str) -> bool {
        self.clustered_event_ids.contains(event_id)
    }

    pub fn clustered_event_ids(&self) -> &BTreeSet<String> {
        &self.clustered_event_ids
    }

    /// Every final coordinate in input order, for fitting the camera.
    pub fn all_coordinates(&self) -> &[LngLat] {
        &self.all_coordinates
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Bounds of all markers, `None` when nothing is positioned.
    pub fn bounds(&self) -> Option<Bounds> {
        geo_utils::compute_bounds(&self.all_coordinates)
    }

    /// Event whose marker is nearest to `point`, if within `max_distance_m`.
    pub fn event_at(&self, point: &LngLat, max_distance_m: f64) -> Option<&str> {
        let entries: Vec<GeomWithData<[f64; 2], &str>> = self
            .coordinates
            .iter()
            .map(|(id, c)| GeomWithData::new([c.lng, c.lat], id.as_str()))
            .collect();
        let tree = RTree::bulk_load(entries);

        let nearest = tree.nearest_neighbor(&[point.lng, point.lat])?;
        let [lng, lat] = *nearest.geom();
        let distance = geo_utils::haversine_distance(point, &LngLat::new(lng, lat));
        (distance <= max_distance_m).then_some(nearest.data)
    }

    fn insert(&mut self, event_id: &str, coordinate: LngLat, clustered: bool) {
        self.coordinates.insert(event_id.to_string(), coordinate);
        if clustered {
            self.clustered_event_ids.insert(event_id.to_string());
        }
        self.all_coordinates.push(coordinate);
    }
}

/// Resolve coordinates for every event, preserving order.
#[cfg(feature = "parallel")]
fn resolve_all(events: &[Event]) -> Vec<Option<LngLat>> {
    use rayon::prelude::*;
    events.par_iter().map(resolve_coordinate).collect()
}

#[cfg(not(feature = "parallel"))]
fn resolve_all(events: &[Event]) -> Vec<Option<LngLat>> {
    events.iter().map(resolve_coordinate).collect()
}

/// Compile positioned point features and the marker index.
///
/// Events without a resolvable coordinate are skipped. A repeated event id
/// keeps its first occurrence.
///
/// ```rust
/// use itinerary_map::{compile_points, CompileConfig, Event, EventDetails, Location};
///
/// let meal = |id: &str, lat: f64, lng: f64| Event::new(id, id, EventDetails::Meal {
///     location: Location::named(id).with_coordinates(lat, lng),
/// });
/// let events = vec![meal("a", 0.0, 0.0), meal("b", 0.0, 0.0), meal("c", 1.0, 1.0)];
///
/// let (points, index) = compile_points(&events, &CompileConfig::default());
/// assert_eq!(points.len(), 3);
/// assert!(index.is_clustered("a") && index.is_clustered("b"));
/// assert!(!index.is_clustered("c"));
/// assert_ne!(index.coordinate("a"), index.coordinate("b"));
/// ```
pub fn compile_points(events: &[Event], config: &CompileConfig) -> (Vec<PointFeature>, MarkerIndex) {
    let resolved = resolve_all(events);

    // Positioned candidates in input order, first positioned occurrence of each id only.
    let mut seen: HashSet<&str> = HashSet::with_capacity(events.len());
    let mut candidates: Vec<(&Event, LngLat)> = Vec::with_capacity(events.len());
    let mut dropped = 0usize;
    for (event, coordinate) in events.iter().zip(resolved) {
        let Some(coordinate) = coordinate else {
            dropped += 1;
            continue;
        };
        if !seen.insert(event.id.as_str()) {
            log::warn!("[FeatureCompiler] Duplicate event id {}, keeping first occurrence", event.id);
            continue;
        }
        candidates.push((event, coordinate));
    }

    // Group members by key; positions inside each group follow input order.
    let mut groups: HashMap<CoordinateKey, Vec<usize>> = HashMap::new();
    for (i, (_, coordinate)) in candidates.iter().enumerate() {
        groups
            .entry(geo_utils::coordinate_key(coordinate, config.coordinate_precision))
            .or_default()
            .push(i);
    }

    let mut index = MarkerIndex::default();
    let mut points = Vec::with_capacity(candidates.len());

    for (i, (event, coordinate)) in candidates.iter().enumerate() {
        let key = geo_utils::coordinate_key(coordinate, config.coordinate_precision);
        let members = &groups[&key];
        let clustered = members.len() > 1;

        let final_coordinate = if clustered {
            let base = candidates[members[0]].1;
            let position = members.iter().position(|&m| m == i).unwrap_or(0);
            geo_utils::radial_offset(&base, position, members.len(), config.cluster_radius_deg)
        } else {
            *coordinate
        };

        index.insert(&event.id, final_coordinate, clustered);
        points.push(PointFeature {
            positioned: PositionedEvent {
                event_id: event.id.clone(),
                category: event.category(),
                coordinate: final_coordinate,
                clustered,
                start: event.start_time.as_deref().and_then(parse_start_time),
            },
            title: event.title.clone(),
            event_type: event.event_type.clone(),
            location_name: representative_location(event).name.clone(),
            start_time: event.start_time.clone(),
        });
    }

    debug!(
        "[FeatureCompiler] {} events -> {} points ({} without coordinates, {} clustered)",
        events.len(),
        points.len(),
        dropped,
        index.clustered_event_ids.len()
    );

    (points, index)
}

/// GeoJSON collection of point features, in compile order.
pub fn point_feature_collection(points: &[PointFeature]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: points.iter().map(PointFeature::to_geojson).collect(),
        foreign_members: None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDetails, Location};
    use std::f64::consts::TAU;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn experience(id: &str, lat: f64, lng: f64) -> Event {
        Event::new(
            id,
            format!("Visit {}", id),
            EventDetails::Experience {
                location: Location::named(id).with_coordinates(lat, lng),
            },
        )
    }

    fn unlocated(id: &str) -> Event {
        Event::new(
            id,
            "Somewhere",
            EventDetails::Experience {
                location: Location::named("unknown"),
            },
        )
    }

    #[test]
    fn test_scenario_two_colocated_one_apart() {
        let events = vec![
            experience("A", 0.0, 0.0),
            experience("B", 0.0, 0.0),
            experience("C", 1.0, 1.0),
        ];
        let config = CompileConfig::default();
        let (points, index) = compile_points(&events, &config);

        assert_eq!(points.len(), 3);
        assert_eq!(index.len(), 3);

        let a = index.coordinate("A").unwrap();
        let b = index.coordinate("B").unwrap();
        assert_ne!(a, b);
        let origin = LngLat::new(0.0, 0.0);
        for p in [a, b] {
            let r = ((p.lng - origin.lng).powi(2) + (p.lat - origin.lat).powi(2)).sqrt();
            assert!(approx_eq(r, config.cluster_radius_deg, 1e-12));
        }

        assert_eq!(index.coordinate("C"), Some(LngLat::new(1.0, 1.0)));
        let clustered: Vec<&str> = index.clustered_event_ids().iter().map(String::as_str).collect();
        assert_eq!(clustered, vec!["A", "B"]);
        assert!(!points[2].positioned.clustered);
    }

    #[test]
    fn test_cluster_completeness_angles() {
        let n = 5;
        let events: Vec<Event> = (0..n).map(|i| experience(&format!("e{}", i), 38.7, -9.1)).collect();
        let config = CompileConfig::default();
        let (points, _) = compile_points(&events, &config);

        assert_eq!(points.len(), n);
        for (i, point) in points.iter().enumerate() {
            let c = point.positioned.coordinate;
            let dx = c.lng - -9.1;
            let dy = c.lat - 38.7;
            assert!(approx_eq((dx * dx + dy * dy).sqrt(), config.cluster_radius_deg, 1e-9));

            let expected = i as f64 * TAU / n as f64;
            let angle = dy.atan2(dx).rem_euclid(TAU);
            let diff = (angle - expected).abs();
            assert!(diff < 1e-6 || (TAU - diff) < 1e-6, "member {} at angle {}", i, angle);
        }

        let distinct: HashSet<(u64, u64)> = points
            .iter()
            .map(|p| (p.positioned.coordinate.lng.to_bits(), p.positioned.coordinate.lat.to_bits()))
            .collect();
        assert_eq!(distinct.len(), n);
    }

    #[test]
    fn test_near_identical_coordinates_group() {
        // 3 cm apart: same key at 6 decimals
        let events = vec![experience("a", 10.0, 20.0), experience("b", 10.000_000_3, 20.0)];
        let (_, index) = compile_points(&events, &CompileConfig::default());
        assert_eq!(index.clustered_event_ids().len(), 2);
    }

    #[test]
    fn test_unresolvable_events_are_filtered() {
        let events = vec![unlocated("x"), experience("a", 1.0, 2.0), unlocated("y")];
        let (points, index) = compile_points(&events, &CompileConfig::default());
        assert_eq!(points.len(), 1);
        assert!(index.contains("a"));
        assert!(!index.contains("x"));
        assert_eq!(index.all_coordinates().len(), 1);
    }

    #[test]
    fn test_no_event_loss() {
        let mut events = Vec::new();
        for i in 0..40 {
            if i % 3 == 0 {
                events.push(unlocated(&format!("u{}", i)));
            } else {
                let lat = (i % 4) as f64;
                events.push(experience(&format!("p{}", i), lat, 0.0));
            }
        }
        let resolvable = events.iter().filter(|e| resolve_coordinate(e).is_some()).count();
        let (points, index) = compile_points(&events, &CompileConfig::default());
        assert_eq!(points.len(), resolvable);
        assert_eq!(index.len(), resolvable);
        assert_eq!(index.all_coordinates().len(), resolvable);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let events = vec![experience("a", 1.0, 1.0), experience("a", 2.0, 2.0)];
        let (points, index) = compile_points(&events, &CompileConfig::default());
        assert_eq!(points.len(), 1);
        assert_eq!(index.coordinate("a"), Some(LngLat::new(1.0, 1.0)));
    }

    #[test]
    fn test_huge_coordinates_not_merged() {
        let events = vec![experience("a", 5.0, 1.0e300), experience("b", 5.0, 2.0e300)];
        let (points, index) = compile_points(&events, &CompileConfig::default());
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| !p.positioned.clustered));
        assert!(index.clustered_event_ids().is_empty());
        assert_eq!(index.coordinate("a"), Some(LngLat::new(1.0e300, 5.0)));
        assert_eq!(index.coordinate("b"), Some(LngLat::new(2.0e300, 5.0)));
    }

    #[test]
    fn test_deterministic_output() {
        let events = vec![
            experience("A", 0.0, 0.0),
            experience("B", 0.0, 0.0),
            experience("C", 1.0, 1.0),
            experience("D", 0.0, 0.0),
        ];
        let config = CompileConfig::default();
        let (p1, i1) = compile_points(&events, &config);
        let (p2, i2) = compile_points(&events, &config);

        let fc1 = serde_json::to_string(&point_feature_collection(&p1)).unwrap();
        let fc2 = serde_json::to_string(&point_feature_collection(&p2)).unwrap();
        assert_eq!(fc1, fc2);
        assert_eq!(
            serde_json::to_string(&i1).unwrap(),
            serde_json::to_string(&i2).unwrap()
        );
    }

    #[test]
    fn test_geojson_properties() {
        let event = experience("museum", 48.86, 2.33).with_type("museum").with_start("2024-01-01");
        let (points, _) = compile_points(&[event], &CompileConfig::default());
        let feature = points[0].to_geojson();

        let props = feature.properties.unwrap();
        assert_eq!(props["eventId"], "museum");
        assert_eq!(props["category"], "experience");
        assert_eq!(props["eventType"], "museum");
        assert_eq!(props["title"], "Visit museum");
        assert_eq!(props["startTime"], "2024-01-01");
        assert_eq!(props["clustered"], false);
        assert_eq!(
            feature.geometry.unwrap().value,
            Value::Point(vec![2.33, 48.86])
        );
    }

    #[test]
    fn test_event_at_hit_testing() {
        let events = vec![experience("a", 51.5, -0.12), experience("b", 48.85, 2.35)];
        let (_, index) = compile_points(&events, &CompileConfig::default());

        assert_eq!(index.event_at(&LngLat::new(-0.1201, 51.5001), 50.0), Some("a"));
        assert_eq!(index.event_at(&LngLat::new(-0.2, 51.6), 50.0), None);
        assert_eq!(MarkerIndex::default().event_at(&LngLat::new(0.0, 0.0), 50.0), None);
    }

    #[test]
    fn test_bounds_cover_markers() {
        let events = vec![experience("a", 10.0, 20.0), experience("b", 12.0, 18.0)];
        let (_, index) = compile_points(&events, &CompileConfig::default());
        let bounds = index.bounds().unwrap();
        assert_eq!(bounds.min_lat, 10.0);
        assert_eq!(bounds.max_lat, 12.0);
        assert_eq!(bounds.min_lng, 18.0);
        assert_eq!(bounds.max_lng, 20.0);
        assert!(MarkerIndex::default().bounds().is_none());
    }
}
