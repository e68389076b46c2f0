//! Representative coordinate of an event.

use crate::event::{Event, EventDetails, Location};
use crate::LngLat;

/// The location that stands for the whole event on the map.
///
/// Travel is drawn where it departs, accommodation where you check in.
pub fn representative_location(event: &Event) -> &Location {
    match &event.details {
        EventDetails::Travel { departure, .. } => departure,
        EventDetails::Accommodation { check_in, .. } => check_in,
        EventDetails::Experience { location } | EventDetails::Meal { location } => location,
    }
}

/// Resolve the event to a single finite `(lng, lat)` pair.
///
/// Returns `None` when the representative location has no coordinate or either
/// component is missing or non-finite. `0,0` is accepted.
///
/// ```rust
/// use itinerary_map::{resolve_coordinate, Event, EventDetails, Location};
///
/// let event = Event::new("e1", "Dinner", EventDetails::Meal {
///     location: Location::named("Null Island Grill").with_coordinates(0.0, 0.0),
/// });
/// let point = resolve_coordinate(&event).unwrap();
/// assert_eq!((point.lng, point.lat), (0.0, 0.0));
/// ```
pub fn resolve_coordinate(event: &Event) -> Option<LngLat> {
    let coordinates = representative_location(event).coordinates.as_ref()?;
    match (coordinates.latitude, coordinates.longitude) {
        (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => Some(LngLat::new(lng, lat)),
        _ => None,
    }
}
