//! Nominatim geocoder with dispatch rate limiting.
//!
//! - Connection pooling through one shared reqwest client
//! - Dispatch rate limiting (spaces out request starts, 1 req/s by default
//!   to respect the public Nominatim usage policy)
//! - Batches run concurrently with results kept in query order
//! - No retries: a 429 pushes the next dispatch slot back and the lookup
//!   fails, the location keeps its old state until the next pass

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::GeocodeError;
use crate::geocode::{GeocodeQuery, Geocoder};
use crate::LngLat;

/// Configuration for [`NominatimGeocoder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NominatimConfig {
    /// Default: `https://nominatim.openstreetmap.org`
    pub base_url: String,
    /// Nominatim rejects requests without an identifying agent.
    pub user_agent: String,
    /// Minimum spacing between request starts. Default: 1000
    pub dispatch_interval_ms: u64,
    /// Default: 15
    pub timeout_secs: u64,
    /// Requests in flight at once within a batch. Default: 4
    pub max_concurrency: usize,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: concat!("itinerary-map/", env!("CARGO_PKG_VERSION")).to_string(),
            dispatch_interval_ms: 1000,
            timeout_secs: 15,
            max_concurrency: 4,
        }
    }
}

/// One search hit. Nominatim sends coordinates as strings.
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Dispatch rate limiter: spaces out when requests START.
struct DispatchRateLimiter {
    interval: Duration,
    next_dispatch: Mutex<Instant>,
    dispatched_count: AtomicU32,
    consecutive_429s: AtomicU32,
}

impl DispatchRateLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_dispatch: Mutex::new(Instant::now()),
            dispatched_count: AtomicU32::new(0),
            consecutive_429s: AtomicU32::new(0),
        }
    }

    /// Wait for our dispatch slot. Each caller gets a unique slot
    /// `interval` after the previous one.
    async fn wait_for_dispatch_slot(&self) -> u32 {
        let (wait_duration, dispatch_num) = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();
            let dispatch_at = if *next > now { *next } else { now };
            *next = dispatch_at + self.interval;

            let num = self.dispatched_count.fetch_add(1, Ordering::Relaxed) + 1;
            (dispatch_at.saturating_duration_since(now), num)
        };

        // Wait outside the lock
        if wait_duration > Duration::from_millis(5) {
            debug!("[Dispatch #{}] Waiting {:?} for slot", dispatch_num, wait_duration);
            tokio::time::sleep(wait_duration).await;
        }

        dispatch_num
    }

    fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    /// Push every later dispatch back: 2, 4, then 8 intervals.
    async fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        let backoff = self.interval * (1 << count.min(3));
        let mut next = self.next_dispatch.lock().await;
        let resume_at = Instant::now() + backoff;
        if *next < resume_at {
            *next = resume_at;
        }
        warn!("[Nominatim] Got 429! Consecutive: {}, pausing dispatch {:?}", count, backoff);
        backoff
    }
}

/// Rate-limited client for the Nominatim `/search` endpoint.
pub struct NominatimGeocoder {
    client: Client,
    config: NominatimConfig,
    rate_limiter: DispatchRateLimiter,
}

impl NominatimGeocoder {
    pub fn new(config: NominatimConfig) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(config.max_concurrency.max(1))
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GeocodeError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rate_limiter: DispatchRateLimiter::new(Duration::from_millis(config.dispatch_interval_ms)),
            config,
        })
    }

    pub fn config(&self) -> &NominatimConfig {
        &self.config
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.config.base_url.trim_end_matches('/'))
    }

    async fn fetch(&self, query: &GeocodeQuery) -> Result<LngLat, GeocodeError> {
        let text = query.to_query_string();
        let dispatch_num = self.rate_limiter.wait_for_dispatch_slot().await;
        let req_start = Instant::now();

        let resp = self
            .client
            .get(self.search_url())
            .query(&[("q", text.as_str()), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.rate_limiter.record_429().await;
            return Err(GeocodeError::RateLimited);
        }
        self.rate_limiter.record_success();

        if !status.is_success() {
            return Err(GeocodeError::Status { status: status.as_u16() });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| GeocodeError::Transport(format!("body download error: {}", e)))?;
        let result = parse_search_response(&bytes, &text);

        debug!(
            "[Nominatim #{}] {:?} -> {} in {:?}",
            dispatch_num,
            text,
            if result.is_ok() { "hit" } else { "miss" },
            req_start.elapsed()
        );
        result
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &GeocodeQuery) -> Result<LngLat, GeocodeError> {
        self.fetch(query).await
    }

    async fn geocode_many(&self, queries: &[GeocodeQuery]) -> Vec<Result<LngLat, GeocodeError>> {
        use futures::stream::{self, StreamExt};

        let start = Instant::now();
        info!(
            "[Nominatim] Geocoding {} queries (dispatch interval: {}ms, max concurrent: {})",
            queries.len(),
            self.config.dispatch_interval_ms,
            self.config.max_concurrency
        );

        // Lookups are created up front; the stream only drives them.
        // buffered (not buffer_unordered) keeps results aligned with queries.
        let lookups: Vec<_> = queries.iter().map(|query| self.fetch(query)).collect();
        let results: Vec<Result<LngLat, GeocodeError>> = stream::iter(lookups)
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let success_count = results.iter().filter(|r| r.is_ok()).count();
        info!(
            "[Nominatim] DONE: {}/{} resolved in {:.2}s",
            success_count,
            results.len(),
            start.elapsed().as_secs_f64()
        );

        results
    }
}

/// First hit of a `/search?format=json` response.
fn parse_search_response(bytes: &[u8], query: &str) -> Result<LngLat, GeocodeError> {
    let places: Vec<NominatimPlace> =
        serde_json::from_slice(bytes).map_err(|e| GeocodeError::Malformed(format!("JSON parse error: {}", e)))?;

    let place = places.into_iter().next().ok_or_else(|| GeocodeError::NoMatch {
        query: query.to_string(),
    })?;

    let lat: f64 = place
        .lat
        .trim()
        .parse()
        .map_err(|_| GeocodeError::Malformed(format!("bad latitude {:?}", place.lat)))?;
    let lng: f64 = place
        .lon
        .trim()
        .parse()
        .map_err(|_| GeocodeError::Malformed(format!("bad longitude {:?}", place.lon)))?;

    let point = LngLat::new(lng, lat);
    if !point.is_finite() {
        return Err(GeocodeError::Malformed("non-finite coordinate".to_string()));
    }
    Ok(point)
}
