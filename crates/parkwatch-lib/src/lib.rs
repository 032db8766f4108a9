//! Parkwatch Library - Proximity Tracking for Parking Availability
//!
//! This library ranks parking spots around a moving position and throttles
//! the proximity notifications that result. It is the headless core of a
//! find-parking app: platform concerns (device GPS, spot APIs, system
//! notifications) plug in through small traits, and everything observable is
//! driven by an explicit tracking session rather than process-global state.
//!
//! # Architecture
//!
//! - **[`coords`]**: WGS84 positions and haversine distance
//! - **[`SpotCollection`]**: In-memory spot catalog with distance ranking
//! - **[`AlertGate`]**: Per-session notification dedup with re-arm policy
//! - **[`TrackingSession`]**: Lifecycle around a continuous position watch
//! - **[`LocationProvider`] / [`SpotSource`] / [`AlertSink`]**: Integration seams
//!
//! # Flow
//!
//! Each position fix refreshes the catalog from the [`SpotSource`], ranks it
//! within the browse radius, gates the nearest spots against the alert
//! radius and the notified-set, and broadcasts the result as a
//! [`TrackerEvent`].

mod alert;
mod collection;
pub mod coords;
mod provider;
mod session;
mod spot;

// Public API exports
pub use alert::{AlertGate, DEFAULT_EXIT_HYSTERESIS, ProximityAlert, RearmPolicy};
pub use collection::{CollectionInfo, SpotCollection};
pub use coords::{GeoPoint, haversine_distance};
pub use provider::{
    AlertSink, BoxFuture, LocationProvider, Permission, PositionFix, PositionUpdates, SpotSource,
};
pub use session::{
    DEFAULT_ALERT_RADIUS_M, DEFAULT_BROWSE_RADIUS_M, SessionState, TrackerConfig, TrackerEvent,
    TrackingSession,
};
pub use spot::{Availability, NearbySummary, ParkingSpot, RankedSpot, SpotId};

/// Error types for the tracking module
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// The user or platform refused location access.
    #[error("location permission denied")]
    PermissionDenied,

    /// No position fix could be produced, not even a stale one.
    #[error("no position fix available")]
    LocationUnavailable,

    /// A caller-supplied value is out of range or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The parking spot source failed or returned malformed data.
    #[error("spot source error: {0}")]
    UpstreamData(String),
}

pub type Result<T> = std::result::Result<T, TrackError>;
