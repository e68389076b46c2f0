//! # Itinerary Map
//!
//! Spatial features and map view synchronization for travel itineraries.
//!
//! This library provides:
//! - Compilation of itinerary events into GeoJSON point and route features
//! - Fan-out of co-located markers so every event stays clickable
//! - A camera/popup state machine that follows the host's focused event
//! - A cooldown-gated bulk re-geocode with a rate-limited Nominatim client
//!
//! ## Features
//!
//! - **`parallel`** - Resolve event coordinates with rayon
//! - **`http`** - Enable the Nominatim geocoder
//! - **`timers`** - Enable the one-second refresh countdown ticker
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use itinerary_map::{compile, Event, EventDetails, Location};
//!
//! let events = vec![
//!     Event::new("louvre", "Louvre", EventDetails::Experience {
//!         location: Location::named("Louvre").with_coordinates(48.8606, 2.3376),
//!     })
//!     .with_start("2024-05-02T10:00:00Z"),
//!     Event::new("train", "TGV to Lyon", EventDetails::Travel {
//!         departure: Location::named("Gare de Lyon").with_coordinates(48.8443, 2.3743),
//!         arrival: Location::named("Lyon Part-Dieu").with_coordinates(45.7605, 4.8597),
//!     })
//!     .with_start("2024-05-03T08:00:00Z"),
//! ];
//!
//! let map = compile(&events);
//! assert_eq!(map.point_features.features.len(), 2);
//! assert_eq!(map.route_features.features.len(), 1);
//! assert!(map.marker_index.contains("train"));
//! ```

use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod event;
pub mod extract;
pub mod features;
pub mod geo_utils;
pub mod geocode;
pub mod refresh;
pub mod route;
pub mod view_sync;

// Nominatim client
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{NominatimConfig, NominatimGeocoder};

pub use error::{EventParseError, GeocodeError, MutationInProgress, RefreshError, StoreError};
pub use event::{Event, EventCategory, EventDetails, GeoCoordinate, Location, LocationRole};
pub use extract::{representative_location, resolve_coordinate};
pub use features::{compile_points, point_feature_collection, CompileConfig, MarkerIndex, PointFeature, PositionedEvent};
pub use geocode::{
    geocode_missing, regeocode_all, CoordinateMutationLock, GeocodeOutcome, GeocodeQuery, GeocodeReport, Geocoder,
};
pub use refresh::{
    format_remaining, Clock, CooldownStatus, GeocodeRefreshGate, ManualClock, MemoryTimestampStore, RefreshConfig,
    RefreshOutcome, RefreshTimestampStore, SystemClock,
};
pub use route::{build_route, parse_start_time, route_feature_collection, RouteSegment};
pub use view_sync::{
    CameraMove, CameraView, FlightId, FocusState, Popup, RenderingSurface, SyncOutcome, ViewPhase, ViewSyncConfig,
    ViewSyncController,
};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("ItineraryMapRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A map coordinate in renderer order.
///
/// # Example
/// ```
/// use itinerary_map::LngLat;
/// let lisbon = LngLat::new(-9.1393, 38.7223);
/// assert!(lisbon.is_finite());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lng.is_finite() && self.lat.is_finite()
    }
}

/// Geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

/// Smallest margin `Bounds::padded` adds, so a single marker still gets a
/// city-sized frame.
const MIN_PAD_DEG: f64 = 0.005;

impl Bounds {
    pub fn from_points(points: &[LngLat]) -> Option<Self> {
        geo_utils::compute_bounds(points)
    }

    pub fn center(&self) -> LngLat {
        LngLat::new(
            (self.min_lng + self.max_lng) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    /// Grow each side by `ratio` of the span, at least [`MIN_PAD_DEG`].
    /// Latitude is clamped to the poles.
    pub fn padded(&self, ratio: f64) -> Self {
        let pad_lat = ((self.max_lat - self.min_lat) * ratio).max(MIN_PAD_DEG);
        let pad_lng = ((self.max_lng - self.min_lng) * ratio).max(MIN_PAD_DEG);
        Self {
            min_lat: (self.min_lat - pad_lat).max(-90.0),
            max_lat: (self.max_lat + pad_lat).min(90.0),
            min_lng: self.min_lng - pad_lng,
            max_lng: self.max_lng + pad_lng,
        }
    }

    pub fn contains(&self, point: &LngLat) -> bool {
        point.lat >= self.min_lat && point.lat <= self.max_lat && point.lng >= self.min_lng && point.lng <= self.max_lng
    }
}

// ============================================================================
// Compilation
// ============================================================================

/// Everything the map renders for one event list.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMap {
    pub points: Vec<PointFeature>,
    pub segments: Vec<RouteSegment>,
    pub point_features: FeatureCollection,
    pub route_features: FeatureCollection,
    pub marker_index: MarkerIndex,
}

/// Compile points, route lines and the marker index with default settings.
///
/// Pure and deterministic: the same events in the same order always give the
/// same output.
pub fn compile(events: &[Event]) -> CompiledMap {
    compile_with_config(events, &CompileConfig::default())
}

/// Compile with custom settings.
pub fn compile_with_config(events: &[Event], config: &CompileConfig) -> CompiledMap {
    let (points, marker_index) = compile_points(events, config);
    let segments = build_route(events, &marker_index);
    CompiledMap {
        point_features: point_feature_collection(&points),
        route_features: route_feature_collection(&segments),
        points,
        segments,
        marker_index,
    }
}

// ============================================================================
// FFI Exports (only when feature enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use log::{info, warn};
    use std::time::Duration;

    /// Compiled map serialized for the host's map SDK.
    #[derive(Debug, Clone, uniffi::Record)]
    pub struct FfiCompiledMap {
        /// GeoJSON FeatureCollection of markers
        pub point_features_json: String,
        /// GeoJSON FeatureCollection of route lines
        pub route_features_json: String,
        pub marker_index_json: String,
        pub clustered_event_ids: Vec<String>,
        /// Padded frame around all markers, if any
        pub bounds: Option<Bounds>,
        pub success: bool,
        pub error: Option<String>,
    }

    impl FfiCompiledMap {
        fn failed(error: String) -> Self {
            Self {
                point_features_json: String::new(),
                route_features_json: String::new(),
                marker_index_json: String::new(),
                clustered_event_ids: Vec::new(),
                bounds: None,
                success: false,
                error: Some(error),
            }
        }
    }

    #[derive(Debug, Clone, uniffi::Record)]
    pub struct FfiCooldownStatus {
        pub on_cooldown: bool,
        pub remaining_ms: u64,
        /// `M:SS`
        pub remaining_text: String,
    }

    /// Compile a JSON array of events into GeoJSON strings.
    #[uniffi::export]
    pub fn ffi_compile_itinerary(events_json: String, config: CompileConfig) -> FfiCompiledMap {
        init_logging();

        let events = match Event::list_from_json(&events_json) {
            Ok(events) => events,
            Err(e) => {
                warn!("[ItineraryMapRust] Rejected event payload: {}", e);
                return FfiCompiledMap::failed(e.to_string());
            }
        };

        let start = std::time::Instant::now();
        let map = compile_with_config(&events, &config);

        let serialized = serde_json::to_string(&map.point_features).and_then(|points| {
            let routes = serde_json::to_string(&map.route_features)?;
            let index = serde_json::to_string(&map.marker_index)?;
            Ok((points, routes, index))
        });
        let (point_features_json, route_features_json, marker_index_json) = match serialized {
            Ok(parts) => parts,
            Err(e) => return FfiCompiledMap::failed(format!("serialization failed: {}", e)),
        };

        info!(
            "[ItineraryMapRust] Compiled {} events -> {} points, {} segments in {:?}",
            events.len(),
            map.points.len(),
            map.segments.len(),
            start.elapsed()
        );

        FfiCompiledMap {
            point_features_json,
            route_features_json,
            marker_index_json,
            clustered_event_ids: map.marker_index.clustered_event_ids().iter().cloned().collect(),
            bounds: map.marker_index.bounds().map(|b| b.padded(0.1)),
            success: true,
            error: None,
        }
    }

    /// Get default compile configuration.
    #[uniffi::export]
    pub fn default_compile_config() -> CompileConfig {
        CompileConfig::default()
    }

    /// Cooldown state from raw millisecond timestamps, for hosts that keep the
    /// last-refresh time themselves.
    #[uniffi::export]
    pub fn ffi_cooldown_status(last_refresh_ms: Option<i64>, now_ms: i64, cooldown_ms: u64) -> FfiCooldownStatus {
        use chrono::DateTime;

        let last = last_refresh_ms.and_then(DateTime::from_timestamp_millis);
        let status = match DateTime::from_timestamp_millis(now_ms) {
            Some(now) => refresh::status_at(last, now, Duration::from_millis(cooldown_ms)),
            None => CooldownStatus::ready(),
        };

        FfiCooldownStatus {
            on_cooldown: status.on_cooldown,
            remaining_ms: status.remaining.as_millis() as u64,
            remaining_text: status.remaining_text(),
        }
    }

    /// Event id of the marker nearest to a tap, within `max_distance_m`.
    #[uniffi::export]
    pub fn ffi_event_at(marker_index_json: String, lng: f64, lat: f64, max_distance_m: f64) -> Option<String> {
        let index: MarkerIndex = match serde_json::from_str(&marker_index_json) {
            Ok(index) => index,
            Err(e) => {
                warn!("[ItineraryMapRust] Bad marker index: {}", e);
                return None;
            }
        };
        index
            .event_at(&LngLat::new(lng, lat), max_distance_m)
            .map(str::to_string)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn sample_trip() -> Vec<Event> {
        vec![
            Event::new(
                "hotel",
                "Hotel Avenida",
                EventDetails::Accommodation {
                    check_in: Location::named("Hotel Avenida").with_coordinates(38.7169, -9.1399),
                    check_out: Location::named("Hotel Avenida").with_coordinates(38.7169, -9.1399),
                },
            )
            .with_start("2024-04-10T15:00:00Z"),
            Event::new(
                "fado",
                "Fado night",
                EventDetails::Experience {
                    location: Location::named("Hotel Avenida").with_coordinates(38.7169, -9.1399),
                },
            )
            .with_start("2024-04-10T21:00:00Z")
            .with_type("concert"),
            Event::new(
                "pasteis",
                "Pastéis de Belém",
                EventDetails::Meal {
                    location: Location::named("Pastéis de Belém").with_coordinates(38.6975, -9.2032),
                },
            )
            .with_start("2024-04-11T09:00"),
            Event::new(
                "train",
                "Train to Porto",
                EventDetails::Travel {
                    departure: Location::named("Santa Apolónia"),
                    arrival: Location::named("Campanhã").with_coordinates(41.1486, -8.5856),
                },
            )
            .with_start("2024-04-12T10:00:00Z"),
            Event::new(
                "tram",
                "Tram 28",
                EventDetails::Experience {
                    location: Location::named("Martim Moniz").with_coordinates(38.7159, -9.1363),
                },
            ),
        ]
    }

    #[test]
    fn test_compile_end_to_end() {
        let map = compile(&sample_trip());

        // train has no departure coordinate
        assert_eq!(map.points.len(), 4);
        assert_eq!(map.point_features.features.len(), 4);
        assert!(!map.marker_index.contains("train"));

        let clustered: Vec<&str> = map.marker_index.clustered_event_ids().iter().map(String::as_str).collect();
        assert_eq!(clustered, vec!["fado", "hotel"]);

        // tram has no start time: point only
        let route: Vec<(&str, &str)> = map
            .segments
            .iter()
            .map(|s| (s.from.event_id.as_str(), s.to.event_id.as_str()))
            .collect();
        assert_eq!(route, vec![("hotel", "fado"), ("fado", "pasteis")]);
        assert_eq!(map.segments[0].category, EventCategory::Accommodation);
        assert_eq!(map.route_features.features.len(), 2);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let events = sample_trip();
        let first = compile(&events);
        let second = compile(&events);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first.point_features).unwrap(),
            serde_json::to_string(&second.point_features).unwrap()
        );
        assert_eq!(
            serde_json::to_string(&first.route_features).unwrap(),
            serde_json::to_string(&second.route_features).unwrap()
        );
        assert_eq!(
            serde_json::to_string(&first.marker_index).unwrap(),
            serde_json::to_string(&second.marker_index).unwrap()
        );
    }

    #[test]
    fn test_compile_empty() {
        let map = compile(&[]);
        assert!(map.points.is_empty());
        assert!(map.segments.is_empty());
        assert!(map.marker_index.is_empty());
        assert!(map.marker_index.bounds().is_none());
    }

    #[test]
    fn test_custom_cluster_radius() {
        let config = CompileConfig {
            cluster_radius_deg: 0.01,
            ..CompileConfig::default()
        };
        let map = compile_with_config(&sample_trip(), &config);
        let hotel = map.marker_index.coordinate("hotel").unwrap();
        assert!(approx_eq(hotel.lng, -9.1399 + 0.01, 1e-9));
        assert!(approx_eq(hotel.lat, 38.7169, 1e-9));
    }

    #[test]
    fn test_bounds_padding() {
        let single = Bounds::from_points(&[LngLat::new(2.0, 48.0)]).unwrap();
        let padded = single.padded(0.1);
        assert!(approx_eq(padded.min_lat, 48.0 - MIN_PAD_DEG, 1e-12));
        assert!(approx_eq(padded.max_lng, 2.0 + MIN_PAD_DEG, 1e-12));
        assert_eq!(padded.center(), LngLat::new(2.0, 48.0));

        let wide = Bounds::from_points(&[LngLat::new(0.0, 0.0), LngLat::new(10.0, 20.0)]).unwrap();
        let padded = wide.padded(0.1);
        assert!(approx_eq(padded.min_lng, -1.0, 1e-12));
        assert!(approx_eq(padded.max_lat, 22.0, 1e-12));
        assert!(padded.contains(&LngLat::new(10.5, 21.0)));

        let polar = Bounds::from_points(&[LngLat::new(0.0, 89.999)]).unwrap();
        assert_eq!(polar.padded(0.1).max_lat, 90.0);
    }

    #[test]
    fn test_compile_from_json_payload() {
        let json = r#"[
            {"id": "a", "title": "Lunch", "category": "meal", "startTime": "2024-01-01T12:00:00Z",
             "location": {"name": "Cafe", "coordinates": {"latitude": 0.0, "longitude": 0.0}}},
            {"id": "b", "title": "Gallery", "category": "experience", "startTime": "2024-01-01T15:00:00Z",
             "location": {"name": "Gallery", "coordinates": {"latitude": 0.0, "longitude": 0.0}}},
            {"id": "c", "title": "Park", "category": "experience",
             "location": {"name": "Park", "coordinates": {"latitude": 1.0, "longitude": 1.0}}}
        ]"#;
        let events = Event::list_from_json(json).unwrap();
        let map = compile(&events);

        assert_eq!(map.points.len(), 3);
        assert_eq!(map.marker_index.coordinate("c"), Some(LngLat::new(1.0, 1.0)));
        assert_eq!(map.segments.len(), 1);

        let hit = map
            .marker_index
            .event_at(&LngLat::new(1.00001, 1.00001), 50.0);
        assert_eq!(hit, Some("c"));
    }
}
