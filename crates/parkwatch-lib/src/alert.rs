//! Proximity alert gating with per-session notification dedup
//!
//! The gate decides which spots from a ranking pass deserve an alert. A spot
//! alerts at most once while it is considered "notified"; when it re-arms is
//! an explicit policy choice rather than an accident of state lifetime.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::spot::{RankedSpot, SpotId};

/// Default fraction by which a spot must overshoot the alert radius before an
/// [`RearmPolicy::OnExit`] gate re-arms it. Prevents alert flapping when GPS
/// jitter bounces a position across the radius boundary.
pub const DEFAULT_EXIT_HYSTERESIS: f64 = 0.2;

/// When a spot that has already alerted becomes eligible to alert again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RearmPolicy {
    /// Never within the same tracking session. The notified set survives
    /// until the session stops or the cache is cleared explicitly.
    Session,
    /// As soon as the spot leaves the alert radius (plus hysteresis margin)
    /// or drops out of the ranking entirely. Re-approaching the spot later
    /// in the same session alerts again.
    OnExit,
}

/// An alert the gate decided to fire for one spot.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityAlert {
    pub spot_id: SpotId,
    pub spot_name: String,
    pub address: Option<String>,
    pub distance_m: f64,
    pub available_units: u32,
}

impl ProximityAlert {
    fn for_spot(ranked: &RankedSpot) -> Self {
        Self {
            spot_id: ranked.spot.id,
            spot_name: ranked.spot.name.clone(),
            address: ranked.spot.address.clone(),
            distance_m: ranked.distance_m,
            available_units: ranked.spot.available_units,
        }
    }

    /// Notification headline
    pub fn title(&self) -> String {
        format!("Parking nearby: {}", self.spot_name)
    }

    /// Notification body with distance, availability and optional address
    pub fn body(&self) -> String {
        let mut body = format!(
            "{:.0} m away, {} units free",
            self.distance_m, self.available_units
        );
        if let Some(address) = &self.address {
            let _ = write!(body, " ({address})");
        }
        body
    }
}

/// Tracks which spots have alerted and gates new alerts accordingly.
///
/// Feed it every ranking pass via [`AlertGate::evaluate`]; it returns the
/// alerts to deliver for that pass. The gate never delivers anything itself.
#[derive(Debug, Clone)]
pub struct AlertGate {
    alert_radius_m: f64,
    rearm: RearmPolicy,
    exit_hysteresis: f64,
    notified: HashSet<SpotId>,
}

impl AlertGate {
    pub fn new(alert_radius_m: f64, rearm: RearmPolicy, exit_hysteresis: f64) -> Self {
        Self {
            alert_radius_m,
            rearm,
            exit_hysteresis,
            notified: HashSet::new(),
        }
    }

    /// Evaluate one ranking pass and return the alerts to fire, in ranking
    /// order (nearest first).
    ///
    /// A spot alerts when its distance is within the alert radius (boundary
    /// inclusive) and it is not currently in the notified set. Under
    /// [`RearmPolicy::OnExit`], notified spots re-arm first: a spot re-arms
    /// when it moved beyond `alert_radius * (1 + hysteresis)` or is absent
    /// from the ranking altogether.
    pub fn evaluate(&mut self, ranked: &[RankedSpot]) -> Vec<ProximityAlert> {
        if self.rearm == RearmPolicy::OnExit {
            let rearm_radius_m = self.alert_radius_m * (1.0 + self.exit_hysteresis);
            self.notified.retain(|id| {
                ranked
                    .iter()
                    .any(|r| r.spot.id == *id && r.distance_m <= rearm_radius_m)
            });
        }

        let mut fired = Vec::new();
        for ranked_spot in ranked {
            if ranked_spot.distance_m > self.alert_radius_m {
                // Ranking is sorted by distance, everything after is farther.
                break;
            }
            if self.notified.insert(ranked_spot.spot.id) {
                fired.push(ProximityAlert::for_spot(ranked_spot));
            }
        }
        fired
    }

    /// Forget all notified spots, re-arming every alert
    pub fn reset(&mut self) {
        self.notified.clear();
    }

    /// Whether this spot is currently suppressed
    pub fn is_notified(&self, id: SpotId) -> bool {
        self.notified.contains(&id)
    }

    /// Number of currently suppressed spots
    pub fn notified_count(&self) -> usize {
        self.notified.len()
    }

    /// Alert radius this gate was configured with
    pub fn alert_radius_m(&self) -> f64 {
        self.alert_radius_m
    }
}
