//! Simulated location provider
//!
//! Stands in for a device GPS: emits position fixes at a fixed cadence,
//! either dead-reckoning a synthetic straight-line drive or replaying the
//! points of a recorded GPX track. Optional per-fix jitter mimics consumer
//! GPS noise, which is also what makes the on-exit re-arm hysteresis
//! observable in a demo.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use parkwatch_lib::{
    BoxFuture, GeoPoint, LocationProvider, Permission, PositionFix, PositionUpdates, Result,
};
use rand::Rng;

/// Meters of travel per degree of latitude (and per degree of longitude at
/// the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// How many fixes may queue up before the producer is backpressured
const STREAM_BUFFER: usize = 16;

/// Where the simulated fixes come from
#[derive(Debug, Clone)]
enum Drive {
    /// Endless drive at constant speed and heading from a start point.
    /// Produces fixes until the subscriber goes away.
    Straight {
        start: GeoPoint,
        speed_mps: f64,
        heading_deg: f64,
    },
    /// Replay of a recorded track, one point per tick. The stream ends when
    /// the points run out.
    Replay { points: Vec<GeoPoint> },
}

/// A scripted stand-in for the device GPS
pub struct SimulatedLocationProvider {
    permission: Permission,
    drive: Drive,
    interval: Duration,
    jitter_m: f64,
    /// Most recently emitted fix, shared with the producer task
    current: Arc<Mutex<Option<PositionFix>>>,
}

impl SimulatedLocationProvider {
    /// Synthetic drive departing from `start`. A speed of zero pins the
    /// provider to the start position.
    pub fn straight_drive(
        start: GeoPoint,
        speed_mps: f64,
        heading_deg: f64,
        interval: Duration,
        jitter_m: f64,
    ) -> Self {
        Self {
            permission: Permission::Granted,
            drive: Drive::Straight {
                start,
                speed_mps,
                heading_deg,
            },
            interval,
            jitter_m,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Provider pinned to one position, for one-shot lookups
    pub fn stationary(position: GeoPoint) -> Self {
        Self::straight_drive(position, 0.0, 0.0, Duration::from_secs(1), 0.0)
    }

    /// Replay the track points of a GPX file, one per tick
    pub fn gpx_replay(path: &Path, interval: Duration, jitter_m: f64) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open track file {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let gpx = gpx::read(reader)
            .with_context(|| format!("Failed to parse GPX from {}", path.display()))?;

        let points = track_points(&gpx);
        anyhow::ensure!(
            !points.is_empty(),
            "Track {} contains no usable points",
            path.display()
        );
        tracing::info!(
            "Replaying {} track points from {}",
            points.len(),
            path.display()
        );

        Ok(Self {
            permission: Permission::Granted,
            drive: Drive::Replay { points },
            interval,
            jitter_m,
            current: Arc::new(Mutex::new(None)),
        })
    }

    /// Refuse the permission request, for demonstrating the denied path
    pub fn deny_permission(mut self) -> Self {
        self.permission = Permission::Denied;
        self
    }

    /// Where the drive begins; the demo spot set is laid out around this
    pub fn start_point(&self) -> GeoPoint {
        match &self.drive {
            Drive::Straight { start, .. } => *start,
            // Replay points are checked non-empty on construction.
            Drive::Replay { points } => points[0],
        }
    }

    fn initial_fix(&self) -> PositionFix {
        PositionFix::new(self.start_point())
    }
}

impl LocationProvider for SimulatedLocationProvider {
    fn request_permission(&self) -> BoxFuture<'_, Permission> {
        let permission = self.permission;
        Box::pin(async move { permission })
    }

    fn current_fix(&self) -> BoxFuture<'_, Result<PositionFix>> {
        // The simulator always knows where the drive is: the last emitted
        // fix, or the start of a drive that has not begun yet.
        let fix = (*self.current.lock().unwrap()).unwrap_or_else(|| self.initial_fix());
        Box::pin(async move { Ok(fix) })
    }

    fn last_known_fix(&self) -> BoxFuture<'_, Option<PositionFix>> {
        let fix = *self.current.lock().unwrap();
        Box::pin(async move { fix })
    }

    fn subscribe(&self) -> PositionUpdates {
        let (tx, updates) = PositionUpdates::channel(STREAM_BUFFER);
        let drive = self.drive.clone();
        let interval = self.interval;
        let jitter_m = self.jitter_m;
        let current = Arc::clone(&self.current);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut tick: u64 = 0;
            loop {
                ticker.tick().await;
                let point = match &drive {
                    Drive::Straight {
                        start,
                        speed_mps,
                        heading_deg,
                    } => {
                        let travelled_m = speed_mps * interval.as_secs_f64() * tick as f64;
                        advance(*start, *heading_deg, travelled_m)
                    }
                    Drive::Replay { points } => match points.get(tick as usize) {
                        Some(point) => *point,
                        // Track exhausted: drop the sender so the stream
                        // ends and the session winds down.
                        None => break,
                    },
                };

                let fix = PositionFix {
                    point: jittered(point, jitter_m),
                    accuracy_m: Some(jitter_m.max(5.0)),
                    stale: false,
                };
                *current.lock().unwrap() = Some(fix);
                if tx.send(fix).await.is_err() {
                    // Subscriber dropped the stream, stop producing.
                    break;
                }
                tick += 1;
            }
        });

        updates
    }
}

/// Flatten all track segments into one point sequence, skipping coordinates
/// outside WGS84 bounds.
fn track_points(gpx: &gpx::Gpx) -> Vec<GeoPoint> {
    let mut points = Vec::new();
    for track in &gpx.tracks {
        for segment in &track.segments {
            for waypoint in &segment.points {
                // GPX stores (x, y) = (lon, lat).
                let point = GeoPoint::new(waypoint.point().y(), waypoint.point().x());
                if point.is_valid() {
                    points.push(point);
                } else {
                    tracing::warn!("Skipping track point outside WGS84 bounds: ({point})");
                }
            }
        }
    }
    points
}

/// Planar dead reckoning, accurate enough at drive scale: offset a point by
/// `distance_m` along a compass heading (degrees clockwise from north).
fn advance(from: GeoPoint, heading_deg: f64, distance_m: f64) -> GeoPoint {
    let heading = heading_deg.to_radians();
    let dlat = distance_m * heading.cos() / METERS_PER_DEGREE;
    let dlon =
        distance_m * heading.sin() / (METERS_PER_DEGREE * from.latitude.to_radians().cos());
    GeoPoint::new(from.latitude + dlat, from.longitude + dlon)
}

/// Scatter a point by up to `jitter_m` meters on each axis
fn jittered(point: GeoPoint, jitter_m: f64) -> GeoPoint {
    if jitter_m <= 0.0 {
        return point;
    }
    let mut rng = rand::thread_rng();
    let dlat = rng.gen_range(-jitter_m..=jitter_m) / METERS_PER_DEGREE;
    let dlon = rng.gen_range(-jitter_m..=jitter_m)
        / (METERS_PER_DEGREE * point.latitude.to_radians().cos());
    GeoPoint::new(point.latitude + dlat, point.longitude + dlon)
}
