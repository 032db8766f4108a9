//! Integration seams for position sources, spot data and alert delivery
//!
//! The tracking session is generic over where positions come from, where
//! spot data comes from and where alerts go. Each seam is an object-safe
//! trait returning boxed futures, so platform adapters (device GPS, HTTP
//! APIs, push notifications) and test doubles plug in the same way.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::Result;
use crate::alert::ProximityAlert;
use crate::coords::GeoPoint;
use crate::spot::ParkingSpot;

/// Boxed future type used by the provider traits to stay object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a location permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// A position estimate from a location provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub point: GeoPoint,
    /// Estimated horizontal accuracy in meters, when the provider knows it.
    pub accuracy_m: Option<f64>,
    /// True when this is a cached last-known position rather than a fresh
    /// reading. Stale fixes are better than nothing for an initial map
    /// center but should not drive alerts.
    pub stale: bool,
}

impl PositionFix {
    /// A fresh fix with unknown accuracy
    pub fn new(point: GeoPoint) -> Self {
        Self {
            point,
            accuracy_m: None,
            stale: false,
        }
    }
}

/// Receiving end of a continuous position stream.
///
/// Dropping it is the unsubscribe: the producer observes the closed channel
/// on its next send and stops watching.
pub struct PositionUpdates {
    rx: mpsc::Receiver<PositionFix>,
}

impl PositionUpdates {
    /// Create a stream and the sender that feeds it. `buffer` bounds how many
    /// fixes may queue up before the producer is backpressured.
    pub fn channel(buffer: usize) -> (mpsc::Sender<PositionFix>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }

    /// Next fix, or `None` once the producer is done.
    pub async fn recv(&mut self) -> Option<PositionFix> {
        self.rx.recv().await
    }
}

/// Source of device positions.
pub trait LocationProvider: Send + Sync + 'static {
    /// Ask the platform for permission to read the device location.
    fn request_permission(&self) -> BoxFuture<'_, Permission>;

    /// One-shot current position. Fails with
    /// [`crate::TrackError::LocationUnavailable`] when no fresh reading can
    /// be obtained.
    fn current_fix(&self) -> BoxFuture<'_, Result<PositionFix>>;

    /// Most recent cached position, if the platform kept one. Callers must
    /// treat it as stale.
    fn last_known_fix(&self) -> BoxFuture<'_, Option<PositionFix>>;

    /// Start a continuous position watch. Each call is an independent
    /// subscription; dropping the returned stream ends it.
    fn subscribe(&self) -> PositionUpdates;
}

/// Source of parking spot data.
pub trait SpotSource: Send + Sync + 'static {
    /// Spots within `radius_m` meters of `near`. Implementations may return
    /// a superset; ranking applies the radius precisely.
    fn list_spots(&self, near: GeoPoint, radius_m: f64) -> BoxFuture<'_, Result<Vec<ParkingSpot>>>;

    /// Cheap reachability probe, for surfacing source status in a UI.
    fn health_check(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Destination for proximity alerts (system notifications, log lines, ...).
pub trait AlertSink: Send + Sync + 'static {
    /// Deliver one alert. Delivery is fire-and-forget; a sink that fails
    /// internally should log and move on rather than propagate.
    fn emit(&self, title: &str, body: &str, alert: &ProximityAlert);
}
