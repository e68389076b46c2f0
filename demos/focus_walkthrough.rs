//! Drive the camera/popup controller against a console "map".
//!
//! Run with: cargo run --example focus_walkthrough

use itinerary_map::{
    compile, CameraMove, CameraView, Event, EventDetails, LngLat, Location, Popup, RenderingSurface, SyncOutcome,
    ViewSyncController,
};

/// Prints every command and jumps the camera when asked to fly.
struct ConsoleMap {
    camera: CameraView,
    pending: Option<CameraMove>,
}

impl RenderingSurface for ConsoleMap {
    fn camera(&self) -> CameraView {
        self.camera
    }

    fn move_camera(&mut self, request: CameraMove) {
        println!(
            "   [map] fly #{} to ({:.4}, {:.4}) zoom {} over {}ms",
            request.flight.0, request.center.lng, request.center.lat, request.zoom, request.duration_ms
        );
        self.pending = Some(request);
    }

    fn show_popup(&mut self, popup: Popup) {
        println!("   [map] popup \"{}\" ({}) at ({:.4}, {:.4})", popup.title, popup.category, popup.anchor.lng, popup.anchor.lat);
    }

    fn hide_popup(&mut self) {
        println!("   [map] hide popup");
    }
}

fn meal(id: &str, title: &str, lat: f64, lng: f64) -> Event {
    Event::new(id, title, EventDetails::Meal {
        location: Location::named(title).with_coordinates(lat, lng),
    })
}

fn main() {
    let events = vec![
        meal("cafe", "Café A Brasileira", 38.7107, -9.1421),
        meal("tasca", "Tasca do Chico", 38.7118, -9.1446),
        meal("market", "Time Out Market", 38.7069, -9.1459),
    ];
    let map = compile(&events);
    let index = &map.marker_index;

    let mut surface = ConsoleMap {
        camera: CameraView { center: LngLat::new(-9.14, 38.71), zoom: 11.0 },
        pending: None,
    };
    let mut controller = ViewSyncController::default();

    println!("View Sync Walkthrough\n");

    println!("1. Focus cafe:");
    let first = controller.sync_focus(Some("cafe"), index, &events, &mut surface);

    println!("2. Focus tasca before the first flight lands:");
    controller.sync_focus(Some("tasca"), index, &events, &mut surface);

    println!("3. Both flights report completion:");
    if let (SyncOutcome::Flying(stale), Some(flight)) = (first, surface.pending.take()) {
        surface.camera = CameraView { center: flight.center, zoom: flight.zoom };
        println!("   stale flight #{} completion: {:?}", stale.0, controller.complete_flight(stale, index, &events, &mut surface));
        println!("   current flight #{} completion: {:?}", flight.flight.0, controller.complete_flight(flight.flight, index, &events, &mut surface));
    }

    println!("4. Focus tasca again:");
    let outcome = controller.sync_focus(Some("tasca"), index, &events, &mut surface);
    println!("   outcome: {:?}", outcome);

    println!("5. Clear focus:");
    if controller.sync_focus(None, index, &events, &mut surface) == SyncOutcome::Cleared {
        println!("   state: {:?}", controller.focus_state());
    }
}
