//! Spot catalog fixtures and alert logging
//!
//! The monitor has no parking backend to talk to, so the session is fed from
//! a JSON catalog file (or a small built-in demo set laid out around the
//! drive start) and alerts are logged instead of raised as system
//! notifications.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context as _;
use parkwatch_lib::{
    AlertSink, BoxFuture, GeoPoint, ParkingSpot, ProximityAlert, Result, SpotId, SpotSource,
    TrackError, haversine_distance,
};
use rand::Rng;
use serde::Deserialize;

/// Wire shape of a catalog file: the same envelope a nearby-parking API
/// responds with.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    spots: Vec<ParkingSpot>,
}

/// Serves spots from a fixed in-memory catalog, filtered by distance
pub struct FixtureSpotSource {
    spots: Vec<ParkingSpot>,
    /// When set, every n-th lookup fails, to exercise the degraded path
    fail_every: Option<u64>,
    lookups: AtomicU64,
}

impl FixtureSpotSource {
    pub fn new(spots: Vec<ParkingSpot>) -> Self {
        Self {
            spots,
            fail_every: None,
            lookups: AtomicU64::new(0),
        }
    }

    /// Load a catalog file: `{ "spots": [ ... ] }`
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open spot catalog {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let catalog: CatalogFile = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse spot catalog {}", path.display()))?;

        tracing::info!("Loaded {} spots from {}", catalog.spots.len(), path.display());
        Ok(Self::new(catalog.spots))
    }

    /// Built-in demo catalog around `center`: a garage a block north-east and
    /// a lot two blocks south-east, with randomized availability.
    pub fn demo_set(center: GeoPoint) -> Self {
        let mut rng = rand::thread_rng();
        Self::new(vec![
            ParkingSpot {
                id: SpotId(1),
                name: "Main Parking Garage".to_string(),
                address: Some("123 Main St".to_string()),
                location: GeoPoint::new(center.latitude + 0.001, center.longitude + 0.001),
                available_units: rng.gen_range(0..20),
                total_units: 50,
            },
            ParkingSpot {
                id: SpotId(2),
                name: "Central Parking Lot".to_string(),
                address: Some("456 Center Ave".to_string()),
                location: GeoPoint::new(center.latitude - 0.002, center.longitude + 0.002),
                available_units: rng.gen_range(0..15),
                total_units: 30,
            },
        ])
    }

    /// Make every `n`-th lookup fail with an upstream error
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }
}

impl SpotSource for FixtureSpotSource {
    fn list_spots(&self, near: GeoPoint, radius_m: f64) -> BoxFuture<'_, Result<Vec<ParkingSpot>>> {
        let lookup = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
        let result = match self.fail_every {
            Some(n) if lookup % n == 0 => Err(TrackError::UpstreamData(format!(
                "injected failure on lookup {lookup}"
            ))),
            _ => Ok(self
                .spots
                .iter()
                .filter(|spot| haversine_distance(near, spot.location) <= radius_m)
                .cloned()
                .collect()),
        };
        Box::pin(async move { result })
    }
}

/// Delivers alerts as log lines instead of system notifications
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn emit(&self, title: &str, body: &str, alert: &ProximityAlert) {
        tracing::info!("{title}: {body} (spot {})", alert.spot_id);
    }
}
