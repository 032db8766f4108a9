//! Parking spot entities and derived per-position views

use crate::coords::GeoPoint;

/// Stable identifier of a parking spot, unique within one data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpotId(pub u64);

impl std::fmt::Display for SpotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A parking facility as reported by the upstream data source.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParkingSpot {
    pub id: SpotId,
    pub name: String,
    /// Human-readable street address, when the source provides one.
    #[cfg_attr(feature = "serde", serde(default))]
    pub address: Option<String>,
    pub location: GeoPoint,
    /// Units currently free.
    pub available_units: u32,
    /// Total capacity of the facility.
    pub total_units: u32,
}

impl ParkingSpot {
    /// Coarse availability bucket used for display.
    pub fn availability(&self) -> Availability {
        match self.available_units {
            0 => Availability::Full,
            1..=5 => Availability::Limited,
            _ => Availability::Open,
        }
    }
}

/// Display bucket for how full a facility is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// More than five units free.
    Open,
    /// Between one and five units free.
    Limited,
    /// No units free.
    Full,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Availability::Open => "open",
            Availability::Limited => "limited",
            Availability::Full => "full",
        };
        write!(f, "{label}")
    }
}

/// A spot paired with its distance from a reference position.
///
/// Produced by ranking; the distance is only meaningful relative to the
/// position the ranking was computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSpot {
    pub spot: ParkingSpot,
    pub distance_m: f64,
}

/// Aggregate view over one ranking pass, for dashboard-style summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NearbySummary {
    /// Number of spots inside the ranking radius.
    pub spot_count: usize,
    /// Sum of free units across those spots.
    pub available_units: u64,
}

impl NearbySummary {
    pub fn of(ranked: &[RankedSpot]) -> Self {
        Self {
            spot_count: ranked.len(),
            available_units: ranked
                .iter()
                .map(|r| u64::from(r.spot.available_units))
                .sum(),
        }
    }
}
