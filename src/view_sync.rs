//! # View Synchronization
//!
//! Keeps the map camera and the event popup in step with the host's focused
//! event. The controller decides *when* to fly and when to show or hide the
//! popup; the [`RenderingSurface`] decides *how*.
//!
//! ```text
//!            focus (far)              completion (current flight)
//!   Idle ───────────────────▶ Flying ─────────────────────────────▶ PopupOpen
//!    ▲  focus (already there)                                          │
//!    │  └─────────────────────────────────────────────────────────────▶│
//!    └──────────────── focus cleared / unresolvable ◀──────────────────┘
//! ```
//!
//! Every new focus request bumps a generation counter and each flight carries
//! the generation it was issued under. A completion whose [`FlightId`] is not
//! the current flight is ignored, so a stale flight never opens a popup.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventCategory};
use crate::features::MarkerIndex;
use crate::geo_utils::haversine_distance;
use crate::LngLat;

/// Camera and tolerance settings for [`ViewSyncController`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSyncConfig {
    /// Zoom for a stand-alone marker. Default: 14.0
    pub focus_zoom: f64,
    /// Zoom for a clustered marker, close enough to tell members apart.
    /// Default: 17.0
    pub cluster_focus_zoom: f64,
    /// Camera counts as arrived within this many meters. Default: 5.0
    pub distance_tolerance_m: f64,
    /// ...and within this many zoom levels. Default: 0.5
    pub zoom_tolerance: f64,
    /// Flight animation length. Default: 1500
    pub flight_duration_ms: u32,
    /// Forwarded on camera moves so reduced-motion settings don't skip them.
    /// Default: true
    pub essential: bool,
}

impl Default for ViewSyncConfig {
    fn default() -> Self {
        Self {
            focus_zoom: 14.0,
            cluster_focus_zoom: 17.0,
            distance_tolerance_m: 5.0,
            zoom_tolerance: 0.5,
            flight_duration_ms: 1500,
            essential: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    pub center: LngLat,
    pub zoom: f64,
}

/// Identifies one camera flight. Hand it back in
/// [`ViewSyncController::complete_flight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlightId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraMove {
    pub flight: FlightId,
    pub center: LngLat,
    pub zoom: f64,
    pub duration_ms: u32,
    pub essential: bool,
}

/// Popup content for the focused event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Popup {
    pub event_id: String,
    pub title: String,
    pub category: EventCategory,
    pub event_type: Option<String>,
    pub anchor: LngLat,
}

/// The map view as the controller sees it.
///
/// `move_camera` must eventually be answered with exactly one
/// [`ViewSyncController::complete_flight`] call for that flight.
pub trait RenderingSurface {
    fn camera(&self) -> CameraView;
    fn move_camera(&mut self, request: CameraMove);
    fn show_popup(&mut self, popup: Popup);
    fn hide_popup(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewPhase {
    Idle,
    Flying {
        flight: FlightId,
        event_id: String,
        target: LngLat,
    },
    PopupOpen {
        event_id: String,
        anchor: LngLat,
    },
}

/// What a [`ViewSyncController::sync_focus`] or
/// [`ViewSyncController::complete_flight`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Already showing (or flying to) the requested state, or a completion
    /// for a flight that is no longer current.
    Unchanged,
    Flying(FlightId),
    PopupShown,
    /// Focus was cleared by the host.
    Cleared,
    /// The focused event has no marker; the view was reset. Hosts usually
    /// clear their focus in response.
    Unresolvable,
}

/// Snapshot for hosts that mirror controller state in their UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusState {
    pub focused_event_id: Option<String>,
    pub popup_open: bool,
    pub anchor: Option<LngLat>,
}

/// Camera/popup state machine, one per map view.
#[derive(Debug, Clone)]
pub struct ViewSyncController {
    config: ViewSyncConfig,
    phase: ViewPhase,
    generation: u64,
}

impl Default for ViewSyncController {
    fn default() -> Self {
        Self::new(ViewSyncConfig::default())
    }
}

impl ViewSyncController {
    pub fn new(config: ViewSyncConfig) -> Self {
        Self {
            config,
            phase: ViewPhase::Idle,
            generation: 0,
        }
    }

    pub fn config(&self) -> &ViewSyncConfig {
        &self.config
    }

    pub fn phase(&self) -> &ViewPhase {
        &self.phase
    }

    pub fn focus_state(&self) -> FocusState {
        match &self.phase {
            ViewPhase::Idle => FocusState {
                focused_event_id: None,
                popup_open: false,
                anchor: None,
            },
            ViewPhase::Flying { event_id, .. } => FocusState {
                focused_event_id: Some(event_id.clone()),
                popup_open: false,
                anchor: None,
            },
            ViewPhase::PopupOpen { event_id, anchor } => FocusState {
                focused_event_id: Some(event_id.clone()),
                popup_open: true,
                anchor: Some(*anchor),
            },
        }
    }

    /// Drive the view toward `focused`. Call whenever the focus, the events
    /// or the marker index change.
    pub fn sync_focus<S: RenderingSurface + ?Sized>(
        &mut self,
        focused: Option<&str>,
        index: &MarkerIndex,
        events: &[Event],
        surface: &mut S,
    ) -> SyncOutcome {
        let Some(event_id) = focused else {
            if self.phase == ViewPhase::Idle {
                return SyncOutcome::Unchanged;
            }
            debug!("[ViewSync] Focus cleared");
            self.reset(surface);
            return SyncOutcome::Cleared;
        };

        let target = match (index.coordinate(event_id), find_event(events, event_id)) {
            (Some(target), Some(_)) => target,
            _ => {
                debug!("[ViewSync] {} has no marker, resetting view", event_id);
                self.reset(surface);
                return SyncOutcome::Unresolvable;
            }
        };

        match &self.phase {
            ViewPhase::PopupOpen { event_id: open, anchor } if open == event_id && *anchor == target => {
                return SyncOutcome::Unchanged;
            }
            ViewPhase::Flying { event_id: flying, target: heading, .. }
                if flying == event_id && *heading == target =>
            {
                return SyncOutcome::Unchanged;
            }
            _ => {}
        }

        // Anything still pending belongs to a previous request.
        self.reset(surface);
        self.generation += 1;

        let zoom = if index.is_clustered(event_id) {
            self.config.cluster_focus_zoom
        } else {
            self.config.focus_zoom
        };

        let camera = surface.camera();
        let distance = haversine_distance(&camera.center, &target);
        if distance <= self.config.distance_tolerance_m && (camera.zoom - zoom).abs() <= self.config.zoom_tolerance {
            debug!(
                "[ViewSync] {} already in view ({:.1} m away), opening popup",
                event_id, distance
            );
            return self.open_popup(event_id, target, events, surface);
        }

        let flight = FlightId(self.generation);
        debug!(
            "[ViewSync] Flying to {} ({:.0} m away, zoom {}) as flight {}",
            event_id, distance, zoom, flight.0
        );
        surface.move_camera(CameraMove {
            flight,
            center: target,
            zoom,
            duration_ms: self.config.flight_duration_ms,
            essential: self.config.essential,
        });
        self.phase = ViewPhase::Flying {
            flight,
            event_id: event_id.to_string(),
            target,
        };
        SyncOutcome::Flying(flight)
    }

    /// Camera flight `flight` finished.
    ///
    /// Completions for superseded or cancelled flights are ignored and return
    /// [`SyncOutcome::Unchanged`]. The marker is looked up again in `index` so
    /// the popup lands on current data; if it is gone the controller goes idle
    /// and returns [`SyncOutcome::Unresolvable`].
    pub fn complete_flight<S: RenderingSurface + ?Sized>(
        &mut self,
        flight: FlightId,
        index: &MarkerIndex,
        events: &[Event],
        surface: &mut S,
    ) -> SyncOutcome {
        let event_id = match &self.phase {
            ViewPhase::Flying { flight: current, event_id, .. } if *current == flight => event_id.clone(),
            _ => {
                debug!("[ViewSync] Ignoring stale completion for flight {}", flight.0);
                return SyncOutcome::Unchanged;
            }
        };

        match index.coordinate(&event_id) {
            Some(anchor) => self.open_popup(&event_id, anchor, events, surface),
            None => {
                debug!("[ViewSync] {} lost its marker mid-flight", event_id);
                self.phase = ViewPhase::Idle;
                SyncOutcome::Unresolvable
            }
        }
    }

    /// The user closed the popup on the surface itself.
    pub fn popup_dismissed(&mut self) {
        if matches!(self.phase, ViewPhase::PopupOpen { .. }) {
            self.phase = ViewPhase::Idle;
        }
    }

    fn open_popup<S: RenderingSurface + ?Sized>(
        &mut self,
        event_id: &str,
        anchor: LngLat,
        events: &[Event],
        surface: &mut S,
    ) -> SyncOutcome {
        let Some(event) = find_event(events, event_id) else {
            self.phase = ViewPhase::Idle;
            return SyncOutcome::Unresolvable;
        };
        surface.show_popup(Popup {
            event_id: event.id.clone(),
            title: event.title.clone(),
            category: event.category(),
            event_type: event.event_type.clone(),
            anchor,
        });
        self.phase = ViewPhase::PopupOpen {
            event_id: event_id.to_string(),
            anchor,
        };
        SyncOutcome::PopupShown
    }

    /// Close the popup and forget any pending flight.
    fn reset<S: RenderingSurface + ?Sized>(&mut self, surface: &mut S) {
        match self.phase {
            ViewPhase::PopupOpen { .. } => surface.hide_popup(),
            ViewPhase::Flying { .. } => self.generation += 1,
            ViewPhase::Idle => {}
        }
        self.phase = ViewPhase::Idle;
    }
}

fn find_event<'a>(events: &'a [Event], event_id: &str) -> Option<&'a Event> {
    events.iter().find(|e| e.id == event_id)
}

// ============================================================================
// Tests
// ============================================================================
