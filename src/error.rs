//! Error types.
//!
//! Missing coordinates and unparsable start times are normal filtering and are
//! expressed as `Option`. Only genuinely fallible operations (host payload
//! parsing, geocoding, refresh gating, timestamp storage) return these.

use std::time::Duration;
use thiserror::Error;

use crate::refresh::format_remaining;

/// Failure to read the host's event payload.
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event {title:?} has no id")]
    MissingId { title: String },
}

/// A single geocoding lookup failed. Recoverable: the location keeps whatever
/// coordinate state it had before.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeocodeError {
    #[error("location has no address fields to geocode")]
    NoAddress,
    #[error("no match for {query:?}")]
    NoMatch { query: String },
    #[error("geocoder rate limited the request")]
    RateLimited,
    #[error("geocoder returned HTTP {status}")]
    Status { status: u16 },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("malformed geocoder response: {0}")]
    Malformed(String),
}

/// Failure of the refresh-timestamp store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("timestamp store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt timestamp for user {user_id}: {reason}")]
    Corrupt { user_id: String, reason: String },
}

/// Rejection or failure of a bulk refresh request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// Soft rejection: nothing was done, try again after `remaining`.
    #[error("refresh available in {}", remaining_text(.remaining))]
    OnCooldown { remaining: Duration },
    /// Another bulk coordinate mutation is running.
    #[error("a geocoding pass is already in progress")]
    Busy,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn remaining_text(remaining: &Duration) -> String {
    format_remaining(*remaining)
}

impl RefreshError {
    /// Remaining cooldown if this is a cooldown rejection.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::OnCooldown { remaining } => Some(*remaining),
            _ => None,
        }
    }
}

/// Another bulk coordinate mutation holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a geocoding pass is already in progress")]
pub struct MutationInProgress;

impl From<MutationInProgress> for RefreshError {
    fn from(_: MutationInProgress) -> Self {
        RefreshError::Busy
    }
}
