//! Compile a small Lisbon itinerary into map features.
//!
//! Run with: cargo run --example compile_itinerary

use itinerary_map::{compile, Event, EventDetails, Location};

fn main() {
    let events = vec![
        Event::new(
            "flight",
            "Flight to Lisbon",
            EventDetails::Travel {
                departure: Location::named("London Heathrow").with_coordinates(51.4700, -0.4543),
                arrival: Location::named("Lisbon Airport").with_coordinates(38.7742, -9.1342),
            },
        )
        .with_type("flight")
        .with_start("2024-04-10T08:00:00Z"),
        Event::new(
            "hotel",
            "Hotel Avenida",
            EventDetails::Accommodation {
                check_in: Location::named("Hotel Avenida").with_coordinates(38.7169, -9.1399),
                check_out: Location::named("Hotel Avenida").with_coordinates(38.7169, -9.1399),
            },
        )
        .with_type("hotel")
        .with_start("2024-04-10T15:00:00Z"),
        // Same building as the hotel: will be fanned out
        Event::new(
            "fado",
            "Fado night",
            EventDetails::Experience {
                location: Location::named("Hotel Avenida").with_coordinates(38.7169, -9.1399),
            },
        )
        .with_type("concert")
        .with_start("2024-04-10T21:00"),
        Event::new(
            "pasteis",
            "Pastéis de Belém",
            EventDetails::Meal {
                location: Location::named("Pastéis de Belém").with_coordinates(38.6975, -9.2032),
            },
        )
        .with_type("breakfast")
        .with_start("2024-04-11"),
        // Not geocoded yet: no marker
        Event::new(
            "tram",
            "Tram 28",
            EventDetails::Experience {
                location: Location::named("Martim Moniz").with_city("Lisbon"),
            },
        ),
    ];

    let map = compile(&events);

    println!("Itinerary Compilation\n");
    println!("{} events -> {} markers, {} route segments\n", events.len(), map.points.len(), map.segments.len());

    println!("Markers:");
    for point in &map.points {
        let p = &point.positioned;
        println!(
            "   {:<8} {:<14} ({:.5}, {:.5}){}",
            p.event_id,
            p.category,
            p.coordinate.lng,
            p.coordinate.lat,
            if p.clustered { "  [clustered]" } else { "" }
        );
    }

    println!("\nRoute:");
    for segment in &map.segments {
        println!("   {} -> {} ({})", segment.from.event_id, segment.to.event_id, segment.category);
    }

    if let Some(bounds) = map.marker_index.bounds() {
        let frame = bounds.padded(0.1);
        println!(
            "\nCamera frame: lng {:.3}..{:.3}, lat {:.3}..{:.3}",
            frame.min_lng, frame.max_lng, frame.min_lat, frame.max_lat
        );
    }

    println!("\nPoint GeoJSON:\n{}", serde_json::to_string_pretty(&map.point_features).unwrap());
}
