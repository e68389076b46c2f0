//! Geocode missing coordinates through Nominatim, then hit the refresh cooldown.
//! Run with: cargo run --example geocode_refresh --features http

use std::sync::Arc;

use itinerary_map::{
    geocode_missing, CoordinateMutationLock, Event, EventDetails, GeocodeRefreshGate, Location, MemoryTimestampStore,
    NominatimConfig, NominatimGeocoder, RefreshConfig, SystemClock,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let events = vec![
        Event::new("museum", "Prado", EventDetails::Experience {
            location: Location::named("Museo del Prado").with_city("Madrid"),
        }),
        Event::new("dinner", "Sobrino de Botín", EventDetails::Meal {
            location: Location::named("Sobrino de Botín").with_address("Calle de Cuchilleros 17").with_city("Madrid"),
        }),
        Event::new("nowhere", "Mystery", EventDetails::Meal { location: Location::default() }),
    ];

    let geocoder = NominatimGeocoder::new(NominatimConfig::default())?;
    let lock = CoordinateMutationLock::new();

    println!("Auto-geocoding missing coordinates...");
    let outcome = geocode_missing(events, &geocoder, &lock).await?;
    for updated in &outcome.report.updated {
        println!("   {} {:?} -> ({:.5}, {:.5})", updated.event_id, updated.role, updated.coordinate.lng, updated.coordinate.lat);
    }
    for failure in &outcome.report.failures {
        println!("   {} {:?} failed: {}", failure.event_id, failure.role, failure.error);
    }

    let gate = GeocodeRefreshGate::new(
        Arc::new(MemoryTimestampStore::new()),
        Arc::new(SystemClock),
        RefreshConfig::default(),
        lock,
    );

    println!("\nManual refresh:");
    let refreshed = gate.request_refresh("demo-user", outcome.events, &geocoder).await?;
    println!(
        "   {} lookups, {} updated; next refresh in {}",
        refreshed.report.lookups,
        refreshed.report.updated.len(),
        refreshed.cooldown.remaining_text()
    );

    println!("\nImmediate second refresh:");
    match gate.request_refresh("demo-user", refreshed.events, &geocoder).await {
        Ok(_) => println!("   accepted (unexpected)"),
        Err(e) => println!("   rejected: {}", e),
    }

    Ok(())
}
