//! Chronological route lines between positioned events.
//!
//! Events with a marker and a parsable start time are ordered by start (ties
//! keep input order) and joined pairwise, giving one simple path through the
//! trip. Each segment is styled by the category of the event it leaves from.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use geojson::{Feature, FeatureCollection, Geometry, Value};
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;

use crate::event::{Event, EventCategory};
use crate::extract::resolve_coordinate;
use crate::features::{MarkerIndex, PositionedEvent};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse an event start time.
///
/// Accepts RFC 3339 and the local-time shapes date pickers produce. Values
/// without an offset are read as UTC so that the ordering is stable across
/// devices.
pub fn parse_start_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// A directed line from an earlier event to the next one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSegment {
    pub from: PositionedEvent,
    pub to: PositionedEvent,
    /// Category of `from`.
    pub category: EventCategory,
}

impl RouteSegment {
    pub fn to_geojson(&self) -> Feature {
        let mut properties = Map::new();
        properties.insert("fromEventId".into(), JsonValue::from(self.from.event_id.clone()));
        properties.insert("toEventId".into(), JsonValue::from(self.to.event_id.clone()));
        properties.insert("category".into(), JsonValue::from(self.category.as_str()));

        let line = vec![
            vec![self.from.coordinate.lng, self.from.coordinate.lat],
            vec![self.to.coordinate.lng, self.to.coordinate.lat],
        ];

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::LineString(line))),
            id: Some(geojson::feature::Id::String(format!(
                "{}->{}",
                self.from.event_id, self.to.event_id
            ))),
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Build the chronological route.
///
/// Coordinates come from `index` so lines meet the (possibly offset) markers.
/// Returns `max(0, k - 1)` segments for `k` events that have both a marker
/// and a start time. A duplicated id is represented by its first occurrence
/// with a usable coordinate, the same copy the marker index holds.
pub fn build_route(events: &[Event], index: &MarkerIndex) -> Vec<RouteSegment> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(events.len());
    let mut timed: Vec<PositionedEvent> = events
        .iter()
        .filter(|event| resolve_coordinate(event).is_some())
        .filter(|event| seen.insert(event.id.as_str()))
        .filter_map(|event| {
            let coordinate = index.coordinate(&event.id)?;
            let start = parse_start_time(event.start_time.as_deref()?)?;
            Some(PositionedEvent {
                event_id: event.id.clone(),
                category: event.category(),
                coordinate,
                clustered: index.is_clustered(&event.id),
                start: Some(start),
            })
        })
        .collect();

    // Stable: equal starts keep input order.
    timed.sort_by_key(|p| p.start);

    let segments: Vec<RouteSegment> = timed
        .windows(2)
        .map(|pair| RouteSegment {
            from: pair[0].clone(),
            to: pair[1].clone(),
            category: pair[0].category,
        })
        .collect();

    debug!(
        "[RouteBuilder] {} timed events -> {} segments",
        timed.len(),
        segments.len()
    );

    segments
}

/// GeoJSON collection of route lines, in chronological order.
pub fn route_feature_collection(segments: &[RouteSegment]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: segments.iter().map(RouteSegment::to_geojson).collect(),
        foreign_members: None,
    }
}

// ============================================================================
// Tests
// ============================================================================
