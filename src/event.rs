//! Itinerary event model.
//!
//! Events arrive from the host as a tagged union over four categories. Each
//! category owns its own location sub-structure, so the coordinate extractor
//! and the geocoder can match on the variant instead of probing optional
//! fields.

use serde::{Deserialize, Serialize};

use crate::error::EventParseError;

/// Category of an itinerary event. Also used to style route lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Travel,
    Accommodation,
    Experience,
    Meal,
}

impl EventCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Travel => "travel",
            Self::Accommodation => "accommodation",
            Self::Experience => "experience",
            Self::Meal => "meal",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved geocoordinate as stored by the host.
///
/// Both components are optional because hosts persist partially written
/// coordinates; only a pair of finite numbers counts as resolved.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoCoordinate {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl GeoCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }

    /// Both components present and finite. `0,0` is a real place and counts.
    pub fn is_resolved(&self) -> bool {
        matches!(
            (self.latitude, self.longitude),
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite()
        )
    }
}

/// A place attached to an event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub coordinates: Option<GeoCoordinate>,
}

impl Location {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.coordinates = Some(GeoCoordinate::new(latitude, longitude));
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn has_resolved_coordinates(&self) -> bool {
        self.coordinates.as_ref().is_some_and(GeoCoordinate::is_resolved)
    }
}

/// Which location of an event a coordinate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocationRole {
    Departure,
    Arrival,
    CheckIn,
    CheckOut,
    Venue,
}

/// Category-specific part of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum EventDetails {
    #[serde(rename_all = "camelCase")]
    Travel {
        departure: Location,
        arrival: Location,
    },
    #[serde(rename_all = "camelCase")]
    Accommodation {
        check_in: Location,
        check_out: Location,
    },
    Experience {
        location: Location,
    },
    Meal {
        location: Location,
    },
}

impl EventDetails {
    pub fn category(&self) -> EventCategory {
        match self {
            Self::Travel { .. } => EventCategory::Travel,
            Self::Accommodation { .. } => EventCategory::Accommodation,
            Self::Experience { .. } => EventCategory::Experience,
            Self::Meal { .. } => EventCategory::Meal,
        }
    }

    /// Every location of the event with its role, in declaration order.
    pub fn locations_mut(&mut self) -> Vec<(LocationRole, &mut Location)> {
        match self {
            Self::Travel { departure, arrival } => vec![
                (LocationRole::Departure, departure),
                (LocationRole::Arrival, arrival),
            ],
            Self::Accommodation { check_in, check_out } => vec![
                (LocationRole::CheckIn, check_in),
                (LocationRole::CheckOut, check_out),
            ],
            Self::Experience { location } | Self::Meal { location } => {
                vec![(LocationRole::Venue, location)]
            }
        }
    }
}

/// One itinerary entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Sub-type within the category, e.g. "flight", "hotel", "museum", "dinner".
    #[serde(default)]
    pub event_type: Option<String>,
    /// Raw start time as entered; may be missing or unparsable.
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(flatten)]
    pub details: EventDetails,
}

impl Event {
    pub fn new(id: impl Into<String>, title: impl Into<String>, details: EventDetails) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            event_type: None,
            start_time: None,
            end_time: None,
            details,
        }
    }

    pub fn with_start(mut self, start_time: impl Into<String>) -> Self {
        self.start_time = Some(start_time.into());
        self
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn category(&self) -> EventCategory {
        self.details.category()
    }

    /// Parse a JSON array of events as sent by the host.
    pub fn list_from_json(json: &str) -> Result<Vec<Event>, EventParseError> {
        let events: Vec<Event> = serde_json::from_str(json)?;
        if let Some(event) = events.iter().find(|e| e.id.trim().is_empty()) {
            return Err(EventParseError::MissingId {
                title: event.title.clone(),
            });
        }
        Ok(events)
    }
}
