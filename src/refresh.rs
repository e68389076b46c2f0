//! # Geocode Refresh Gate
//!
//! Rate-limits the manual "re-geocode everything" action per user. The last
//! refresh time lives in an external [`RefreshTimestampStore`] so the cooldown
//! holds across sessions; writes are last-writer-wins.
//!
//! Remaining time is always derived from `last_refresh + cooldown - now`,
//! never from counting ticks, so a status can be recomputed from scratch at
//! any moment without drift.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{RefreshError, StoreError};
use crate::event::Event;
use crate::geocode::{regeocode_all_locked, CoordinateMutationLock, GeocodeReport, Geocoder};

// ============================================================================
// Seams
// ============================================================================

/// Wall clock used for cooldown math.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += step;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-user last-refresh timestamps.
#[async_trait]
pub trait RefreshTimestampStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
    async fn set(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// In-process store for tests, demos and single-device hosts.
#[derive(Debug, Default)]
pub struct MemoryTimestampStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryTimestampStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTimestampStore for MemoryTimestampStore {
    async fn get(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(user_id).copied())
    }

    async fn set(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(user_id.to_string(), at);
        Ok(())
    }
}

// ============================================================================
// Cooldown math
// ============================================================================

/// Configuration for [`GeocodeRefreshGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshConfig {
    /// Minimum time between two bulk refreshes. Default: 120 s
    pub cooldown_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { cooldown_secs: 120 }
    }
}

impl RefreshConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Cooldown state at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownStatus {
    pub on_cooldown: bool,
    pub remaining: Duration,
    /// When the cooldown ends, `None` if the user never refreshed.
    pub ends_at: Option<DateTime<Utc>>,
}

impl CooldownStatus {
    pub fn ready() -> Self {
        Self {
            on_cooldown: false,
            remaining: Duration::ZERO,
            ends_at: None,
        }
    }

    pub fn remaining_text(&self) -> String {
        format_remaining(self.remaining)
    }
}

/// Cooldown status given the last refresh time.
///
/// Equivalent to [`status_until`] at `last_refresh + cooldown`, so a status
/// computed here and a running countdown always agree. A refresh stamped in
/// the future by another device keeps counting down from that stamp.
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use itinerary_map::refresh::status_at;
/// use std::time::Duration;
///
/// let last = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
/// let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 0).unwrap();
/// let status = status_at(Some(last), now, Duration::from_secs(120));
/// assert!(status.on_cooldown);
/// assert_eq!(status.remaining, Duration::from_secs(60));
/// assert_eq!(status.remaining_text(), "1:00");
/// ```
pub fn status_at(last_refresh: Option<DateTime<Utc>>, now: DateTime<Utc>, cooldown: Duration) -> CooldownStatus {
    let ends_at = last_refresh.and_then(|last| {
        chrono::Duration::from_std(cooldown)
            .ok()
            .and_then(|span| last.checked_add_signed(span))
    });
    match ends_at {
        Some(ends_at) => status_until(ends_at, now),
        None => CooldownStatus::ready(),
    }
}

/// Cooldown status counting down to a known end time.
pub fn status_until(ends_at: DateTime<Utc>, now: DateTime<Utc>) -> CooldownStatus {
    // Negative spans fail to convert: the cooldown is over.
    let remaining = (ends_at - now).to_std().unwrap_or(Duration::ZERO);
    CooldownStatus {
        on_cooldown: now < ends_at,
        remaining,
        ends_at: Some(ends_at),
    }
}

/// Render remaining time as `M:SS`, rounding partial seconds up.
pub fn format_remaining(remaining: Duration) -> String {
    let mut secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{}:{:02}", secs / 60, secs % 60)
}

// ============================================================================
// Gate
// ============================================================================

/// Result of an accepted refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub events: Vec<Event>,
    pub report: GeocodeReport,
    /// Cooldown re-evaluated right after the refresh.
    pub cooldown: CooldownStatus,
}

pub struct GeocodeRefreshGate {
    store: Arc<dyn RefreshTimestampStore>,
    clock: Arc<dyn Clock>,
    config: RefreshConfig,
    lock: CoordinateMutationLock,
}

impl GeocodeRefreshGate {
    /// `lock` should be shared with the host's auto-geocode path.
    pub fn new(
        store: Arc<dyn RefreshTimestampStore>,
        clock: Arc<dyn Clock>,
        config: RefreshConfig,
        lock: CoordinateMutationLock,
    ) -> Self {
        Self { store, clock, config, lock }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub async fn check_cooldown(&self, user_id: &str) -> Result<CooldownStatus, StoreError> {
        let last = self.store.get(user_id).await?;
        Ok(status_at(last, self.clock.now(), self.config.cooldown()))
    }

    /// Re-geocode every event location unless the user is on cooldown.
    ///
    /// The new timestamp is written even when some lookups fail. A failed
    /// write is logged and does not fail the refresh.
    pub async fn request_refresh<G: Geocoder + ?Sized>(
        &self,
        user_id: &str,
        events: Vec<Event>,
        geocoder: &G,
    ) -> Result<RefreshOutcome, RefreshError> {
        let status = self.check_cooldown(user_id).await?;
        if status.on_cooldown {
            info!(
                "[RefreshGate] Rejected refresh for {}: {} remaining",
                user_id,
                status.remaining_text()
            );
            return Err(RefreshError::OnCooldown {
                remaining: status.remaining,
            });
        }

        let _permit = self.lock.try_acquire()?;

        info!("[RefreshGate] Refreshing {} events for {}", events.len(), user_id);
        let outcome = regeocode_all_locked(events, geocoder).await;

        let stamped_at = self.clock.now();
        if let Err(e) = self.store.set(user_id, stamped_at).await {
            warn!("[RefreshGate] Failed to record refresh time for {}: {}", user_id, e);
        }
        let cooldown = status_at(Some(stamped_at), self.clock.now(), self.config.cooldown());

        info!(
            "[RefreshGate] Refresh done for {}: {} updated, {} failed",
            user_id,
            outcome.report.updated.len(),
            outcome.report.failures.len()
        );

        Ok(RefreshOutcome {
            events: outcome.events,
            report: outcome.report,
            cooldown,
        })
    }
}

// ============================================================================
// Countdown (timers feature)
// ============================================================================

/// Handle to a running countdown; stops it on drop.
#[cfg(feature = "timers")]
#[derive(Debug)]
pub struct CountdownTicker {
    handle: tokio::task::JoinHandle<()>,
}

#[cfg(feature = "timers")]
impl CountdownTicker {
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(feature = "timers")]
impl Drop for CountdownTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Call `on_tick` once per second with the status counting down to `ends_at`.
///
/// The first tick fires immediately. The last one reports `on_cooldown ==
/// false`, after which the task ends. Must be called inside a tokio runtime.
#[cfg(feature = "timers")]
pub fn spawn_countdown<F>(ends_at: DateTime<Utc>, clock: Arc<dyn Clock>, mut on_tick: F) -> CountdownTicker
where
    F: FnMut(CooldownStatus) + Send + 'static,
{
    use tokio::time::{interval, MissedTickBehavior};

    let handle = tokio::spawn(async move {
        let mut ticks = interval(Duration::from_secs(1));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticks.tick().await;
            let status = status_until(ends_at, clock.now());
            let finished = !status.on_cooldown;
            on_tick(status);
            if finished {
                break;
            }
        }
    });

    CountdownTicker { handle }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDetails, Location};
    use crate::geocode::tests::TableGeocoder;
    use crate::LngLat;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn gate_with(store: Arc<dyn RefreshTimestampStore>, clock: Arc<ManualClock>) -> GeocodeRefreshGate {
        GeocodeRefreshGate::new(store, clock, RefreshConfig::default(), CoordinateMutationLock::new())
    }

    fn museum() -> Vec<Event> {
        vec![Event::new(
            "museum",
            "Museum",
            EventDetails::Experience {
                location: Location::named("Prado").with_city("Madrid"),
            },
        )]
    }

    struct WriteFailingStore;

    #[async_trait]
    impl RefreshTimestampStore for WriteFailingStore {
        async fn get(&self, _user_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
            Ok(None)
        }

        async fn set(&self, _user_id: &str, _at: DateTime<Utc>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::ZERO), "0:00");
        assert_eq!(format_remaining(Duration::from_secs(120)), "2:00");
        assert_eq!(format_remaining(Duration::from_secs(65)), "1:05");
        assert_eq!(format_remaining(Duration::from_millis(59_200)), "1:00");
        assert_eq!(format_remaining(Duration::from_millis(1)), "0:01");
    }

    #[test]
    fn test_never_refreshed_is_ready() {
        let status = status_at(None, t0(), Duration::from_secs(120));
        assert_eq!(status, CooldownStatus::ready());
    }

    #[test]
    fn test_remaining_decreases_and_hits_zero_at_expiry() {
        let cooldown = Duration::from_secs(120);
        let mut previous = None;
        for secs in 0..120 {
            let now = t0() + chrono::Duration::seconds(secs);
            let status = status_at(Some(t0()), now, cooldown);
            assert!(status.on_cooldown);
            if let Some(prev) = previous {
                assert!(status.remaining < prev);
            }
            previous = Some(status.remaining);
        }

        let expiry = t0() + chrono::Duration::seconds(120);
        let at = status_at(Some(t0()), expiry, cooldown);
        assert!(!at.on_cooldown);
        assert_eq!(at.remaining, Duration::ZERO);

        let after = status_at(Some(t0()), expiry + chrono::Duration::seconds(30), cooldown);
        assert!(!after.on_cooldown);
        assert_eq!(after.remaining, Duration::ZERO);
    }

    #[test]
    fn test_future_timestamp_still_counts_down() {
        let cooldown = Duration::from_secs(120);
        let last = t0() + chrono::Duration::seconds(600);

        let early = status_at(Some(last), t0(), cooldown);
        let later = status_at(Some(last), t0() + chrono::Duration::seconds(300), cooldown);
        assert!(early.on_cooldown && later.on_cooldown);
        assert!(later.remaining < early.remaining);
        assert_eq!(early.remaining, Duration::from_secs(720));

        // Same answer as a countdown toward the same end
        let ends_at = early.ends_at.unwrap();
        assert_eq!(status_until(ends_at, t0()), early);

        let done = status_at(Some(last), t0() + chrono::Duration::seconds(720), cooldown);
        assert!(!done.on_cooldown);
        assert_eq!(done.remaining, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_scenario_refresh_then_cooldown() {
        let clock = Arc::new(ManualClock::new(t0()));
        let gate = gate_with(Arc::new(MemoryTimestampStore::new()), Arc::clone(&clock));
        let geocoder = TableGeocoder::with(&[("Prado, Madrid", LngLat::new(-3.6921, 40.4138))]);

        let outcome = gate.request_refresh("u1", museum(), &geocoder).await.unwrap();
        assert_eq!(outcome.report.updated.len(), 1);
        assert!(outcome.cooldown.on_cooldown);
        assert_eq!(outcome.cooldown.remaining, Duration::from_secs(120));

        clock.advance(Duration::from_secs(60));
        let status = gate.check_cooldown("u1").await.unwrap();
        assert!(status.on_cooldown);
        assert_eq!(status.remaining, Duration::from_secs(60));

        clock.advance(Duration::from_secs(61));
        let status = gate.check_cooldown("u1").await.unwrap();
        assert!(!status.on_cooldown);

        // Other users are unaffected
        assert!(!gate.check_cooldown("u2").await.unwrap().on_cooldown);
    }

    #[tokio::test]
    async fn test_rejected_while_on_cooldown() {
        let clock = Arc::new(ManualClock::new(t0()));
        let gate = gate_with(Arc::new(MemoryTimestampStore::new()), Arc::clone(&clock));
        let geocoder = TableGeocoder::with(&[]);

        gate.request_refresh("u1", museum(), &geocoder).await.unwrap();
        let calls = geocoder.call_count();

        clock.advance(Duration::from_secs(30));
        let err = gate.request_refresh("u1", museum(), &geocoder).await.unwrap_err();
        assert_eq!(err.remaining(), Some(Duration::from_secs(90)));
        assert_eq!(err.to_string(), "refresh available in 1:30");
        assert_eq!(geocoder.call_count(), calls);
    }

    #[tokio::test]
    async fn test_timestamp_written_on_partial_failure() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MemoryTimestampStore::new());
        let gate = gate_with(store.clone(), Arc::clone(&clock));
        let geocoder = TableGeocoder::with(&[]);

        let outcome = gate.request_refresh("u1", museum(), &geocoder).await.unwrap();
        assert_eq!(outcome.report.failures.len(), 1);
        assert_eq!(outcome.events, museum());
        assert_eq!(store.get("u1").await.unwrap(), Some(t0()));
    }

    #[tokio::test]
    async fn test_store_write_failure_still_refreshes() {
        let clock = Arc::new(ManualClock::new(t0()));
        let gate = gate_with(Arc::new(WriteFailingStore), clock);
        let geocoder = TableGeocoder::with(&[("Prado, Madrid", LngLat::new(-3.6921, 40.4138))]);

        let outcome = gate.request_refresh("u1", museum(), &geocoder).await.unwrap();
        assert_eq!(outcome.report.updated.len(), 1);
        assert!(outcome.cooldown.on_cooldown);
    }

    #[tokio::test]
    async fn test_busy_when_auto_geocode_running() {
        let clock = Arc::new(ManualClock::new(t0()));
        let lock = CoordinateMutationLock::new();
        let store = Arc::new(MemoryTimestampStore::new());
        let gate = GeocodeRefreshGate::new(store.clone(), clock, RefreshConfig::default(), lock.clone());
        let geocoder = TableGeocoder::with(&[]);

        let _auto = lock.try_acquire().unwrap();
        let err = gate.request_refresh("u1", museum(), &geocoder).await.unwrap_err();
        assert_eq!(err, RefreshError::Busy);
        // Busy does not start a cooldown
        assert_eq!(store.get("u1").await.unwrap(), None);
    }

    #[cfg(feature = "timers")]
    #[tokio::test(start_paused = true)]
    async fn test_countdown_stops_after_expiry() {
        use std::sync::mpsc;

        let clock = Arc::new(ManualClock::new(t0()));
        let ends_at = t0() + chrono::Duration::seconds(2);
        let (tx, rx) = mpsc::channel();

        let ticker = spawn_countdown(ends_at, clock.clone(), move |status| {
            let _ = tx.send(status);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let first = rx.try_recv().unwrap();
        assert!(first.on_cooldown);
        assert_eq!(first.remaining, Duration::from_secs(2));

        clock.advance(Duration::from_secs(3));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let last = rx.try_recv().unwrap();
        assert!(!last.on_cooldown);
        assert_eq!(last.remaining, Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert!(ticker.is_finished());
    }
}
