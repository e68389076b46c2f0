//! # Geocoding Passes
//!
//! Fills in event coordinates through an external [`Geocoder`]. Two passes
//! exist:
//!
//! - [`geocode_missing`] only touches locations without a usable coordinate.
//!   Hosts run it whenever the event list changes.
//! - [`regeocode_all`] re-resolves every location that has address fields.
//!   This is the expensive bulk action the refresh gate protects.
//!
//! Both passes rewrite the same event collection, so they share a
//! [`CoordinateMutationLock`]: while one pass runs the other is rejected
//! instead of racing it. A failed lookup leaves the location untouched and is
//! reported in the [`GeocodeReport`]; nothing is retried here.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GeocodeError, MutationInProgress};
use crate::event::{Event, GeoCoordinate, Location, LocationRole};
use crate::LngLat;

/// Address-like fields sent to the geocoding provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeocodeQuery {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl GeocodeQuery {
    /// Query for a location, `None` if it has no non-blank address field.
    pub fn from_location(location: &Location) -> Option<Self> {
        let clean = |field: &Option<String>| {
            field
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let query = Self {
            name: clean(&location.name),
            address: clean(&location.address),
            city: clean(&location.city),
            country: clean(&location.country),
        };
        if query.name.is_none() && query.address.is_none() && query.city.is_none() && query.country.is_none() {
            return None;
        }
        Some(query)
    }

    /// Free-form search text, most specific part first.
    pub fn to_query_string(&self) -> String {
        [&self.name, &self.address, &self.city, &self.country]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// External address-to-coordinate service.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &GeocodeQuery) -> Result<LngLat, GeocodeError>;

    /// Resolve a batch; results line up with `queries`.
    ///
    /// The default runs lookups one after another. Providers with their own
    /// dispatch scheduling override this.
    async fn geocode_many(&self, queries: &[GeocodeQuery]) -> Vec<Result<LngLat, GeocodeError>> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            results.push(self.geocode(query).await);
        }
        results
    }
}

// ============================================================================
// Mutation lock
// ============================================================================

/// In-flight flag around bulk coordinate mutation of the event list.
///
/// Clones share the flag. Hand one clone to every path that rewrites
/// coordinates.
#[derive(Debug, Clone, Default)]
pub struct CoordinateMutationLock {
    in_flight: Arc<AtomicBool>,
}

impl CoordinateMutationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Result<MutationPermit, MutationInProgress> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MutationInProgress)?;
        Ok(MutationPermit {
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Held for the duration of a pass; releases the lock on drop.
#[derive(Debug)]
pub struct MutationPermit {
    in_flight: Arc<AtomicBool>,
}

impl Drop for MutationPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedLocation {
    pub event_id: String,
    pub role: LocationRole,
    pub coordinate: LngLat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeFailure {
    pub event_id: String,
    pub role: LocationRole,
    pub error: GeocodeError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeocodeReport {
    /// Distinct queries sent to the provider.
    pub lookups: usize,
    pub updated: Vec<UpdatedLocation>,
    pub failures: Vec<GeocodeFailure>,
}

/// Events after a pass, plus what happened.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeOutcome {
    pub events: Vec<Event>,
    pub report: GeocodeReport,
}

// ============================================================================
// Passes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassMode {
    MissingOnly,
    All,
}

/// Geocode only the locations that lack a usable coordinate.
pub async fn geocode_missing<G: Geocoder + ?Sized>(
    events: Vec<Event>,
    geocoder: &G,
    lock: &CoordinateMutationLock,
) -> Result<GeocodeOutcome, MutationInProgress> {
    let _permit = lock.try_acquire()?;
    Ok(run_pass(events, geocoder, PassMode::MissingOnly).await)
}

/// Re-geocode every location that has address fields.
pub async fn regeocode_all<G: Geocoder + ?Sized>(
    events: Vec<Event>,
    geocoder: &G,
    lock: &CoordinateMutationLock,
) -> Result<GeocodeOutcome, MutationInProgress> {
    let _permit = lock.try_acquire()?;
    Ok(regeocode_all_locked(events, geocoder).await)
}

/// Bulk pass for callers that already hold a [`MutationPermit`].
pub(crate) async fn regeocode_all_locked<G: Geocoder + ?Sized>(
    events: Vec<Event>,
    geocoder: &G,
) -> GeocodeOutcome {
    run_pass(events, geocoder, PassMode::All).await
}

async fn run_pass<G: Geocoder + ?Sized>(
    mut events: Vec<Event>,
    geocoder: &G,
    mode: PassMode,
) -> GeocodeOutcome {
    let mut report = GeocodeReport::default();

    // (event index, role, query slot); identical queries share one lookup.
    let mut targets: Vec<(usize, LocationRole, usize)> = Vec::new();
    let mut queries: Vec<GeocodeQuery> = Vec::new();
    let mut slots: HashMap<GeocodeQuery, usize> = HashMap::new();

    for (event_idx, event) in events.iter_mut().enumerate() {
        let event_id = event.id.clone();
        for (role, location) in event.details.locations_mut() {
            if mode == PassMode::MissingOnly && location.has_resolved_coordinates() {
                continue;
            }
            let Some(query) = GeocodeQuery::from_location(location) else {
                if mode == PassMode::MissingOnly {
                    report.failures.push(GeocodeFailure {
                        event_id: event_id.clone(),
                        role,
                        error: GeocodeError::NoAddress,
                    });
                }
                continue;
            };
            let slot = *slots.entry(query.clone()).or_insert_with(|| {
                queries.push(query);
                queries.len() - 1
            });
            targets.push((event_idx, role, slot));
        }
    }

    report.lookups = queries.len();
    if queries.is_empty() {
        debug!("[Geocode] Nothing to geocode ({:?})", mode);
        return GeocodeOutcome { events, report };
    }

    info!(
        "[Geocode] {:?} pass: {} locations, {} distinct lookups",
        mode,
        targets.len(),
        queries.len()
    );

    let results = geocoder.geocode_many(&queries).await;

    for (event_idx, role, slot) in targets {
        let event = &mut events[event_idx];
        let event_id = event.id.clone();
        let result = results
            .get(slot)
            .cloned()
            .unwrap_or_else(|| Err(GeocodeError::Malformed("missing batch result".into())));

        match result {
            Ok(coordinate) if coordinate.is_finite() => {
                if let Some((_, location)) = event
                    .details
                    .locations_mut()
                    .into_iter()
                    .find(|(r, _)| *r == role)
                {
                    location.coordinates = Some(GeoCoordinate::new(coordinate.lat, coordinate.lng));
                }
                report.updated.push(UpdatedLocation { event_id, role, coordinate });
            }
            Ok(coordinate) => {
                warn!("[Geocode] {} {:?}: non-finite result {:?}", event_id, role, coordinate);
                report.failures.push(GeocodeFailure {
                    event_id,
                    role,
                    error: GeocodeError::Malformed("non-finite coordinate".into()),
                });
            }
            Err(error) => {
                warn!("[Geocode] {} {:?}: {}", event_id, role, error);
                report.failures.push(GeocodeFailure { event_id, role, error });
            }
        }
    }

    info!(
        "[Geocode] {:?} pass done: {} updated, {} failed",
        mode,
        report.updated.len(),
        report.failures.len()
    );

    GeocodeOutcome { events, report }
}

// ============================================================================
// Tests
// ============================================================================
