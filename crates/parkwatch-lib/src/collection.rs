//! SpotCollection - in-memory catalog of parking spots with proximity ranking
//!
//! This module holds the spots last reported by the upstream source and
//! answers distance-ranked queries against them. The catalog is refreshed
//! wholesale on every position update, so mutation is replace-or-clear
//! rather than incremental insertion.

use geo::{Coord, Rect};

use crate::coords::{self, GeoPoint};
use crate::spot::{ParkingSpot, RankedSpot, SpotId};
use crate::{Result, TrackError};

/// Summary information about the catalog contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionInfo {
    /// Number of spots in the catalog
    pub spot_count: usize,
    /// Sum of `total_units` across all spots
    pub total_capacity: u64,
    /// Sum of `available_units` across all spots
    pub total_available: u64,
}

/// Aggregates recomputed on every refresh so the accessors stay O(1)
#[derive(Debug, Clone, Default)]
struct CachedStats {
    total_capacity: u64,
    total_available: u64,
    /// Bounding box in WGS84 degrees (x = longitude, y = latitude)
    bounding_box: Option<Rect<f64>>,
}

/// Catalog of the spots known from the upstream source
#[derive(Debug, Clone, Default)]
pub struct SpotCollection {
    spots: Vec<ParkingSpot>,
    cached_stats: CachedStats,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SpotCollection {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catalog contents with a fresh snapshot from the source.
    ///
    /// Spots with out-of-range coordinates are dropped with a warning rather
    /// than failing the whole snapshot, so one bad row from the upstream
    /// source does not blank the map.
    pub fn replace_all(&mut self, spots: Vec<ParkingSpot>) {
        #[cfg(feature = "profiling")]
        profiling::scope!("collection::replace_all");

        self.spots = spots;
        self.spots.retain(|spot| {
            if spot.location.is_valid() {
                true
            } else {
                tracing::warn!(
                    "Skipping spot {} ({}) with out-of-range location ({})",
                    spot.id,
                    spot.name,
                    spot.location
                );
                false
            }
        });
        self.rebuild_stats();
    }

    /// Rank catalog spots by distance from `position`, nearest first.
    ///
    /// Only spots within `radius_m` meters are returned. The sort is stable,
    /// so spots at identical distances keep their catalog order. Fails with
    /// [`TrackError::InvalidArgument`] for a non-positive or non-finite
    /// radius, or a position outside WGS84 bounds.
    pub fn rank_within(&self, position: GeoPoint, radius_m: f64) -> Result<Vec<RankedSpot>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("collection::rank_within");

        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(TrackError::InvalidArgument(format!(
                "search radius must be positive and finite, got {radius_m}"
            )));
        }
        if !position.is_valid() {
            return Err(TrackError::InvalidArgument(format!(
                "reference position out of range: {position}"
            )));
        }

        let mut ranked: Vec<RankedSpot> = self
            .spots
            .iter()
            .filter_map(|spot| {
                let distance_m = coords::haversine_distance(position, spot.location);
                (distance_m <= radius_m).then(|| RankedSpot {
                    spot: spot.clone(),
                    distance_m,
                })
            })
            .collect();

        // Stable sort keeps catalog order for equal distances.
        ranked.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));

        Ok(ranked)
    }

    /// Number of spots in the catalog
    pub fn len(&self) -> usize {
        self.spots.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    /// All spots in catalog order
    pub fn spots(&self) -> &[ParkingSpot] {
        &self.spots
    }

    /// Look up a spot by id
    pub fn get(&self, id: SpotId) -> Option<&ParkingSpot> {
        self.spots.iter().find(|spot| spot.id == id)
    }

    /// Summary information, served from cached stats
    pub fn info(&self) -> CollectionInfo {
        CollectionInfo {
            spot_count: self.spots.len(),
            total_capacity: self.cached_stats.total_capacity,
            total_available: self.cached_stats.total_available,
        }
    }

    /// Remove all spots
    pub fn clear(&mut self) {
        self.spots.clear();
        self.cached_stats = CachedStats::default();
    }

    /// Bounding box of all spot locations as (min_lat, min_lon, max_lat, max_lon)
    /// in WGS84 degrees, or `None` for an empty catalog
    pub fn bounding_box_wgs84(&self) -> Option<(f64, f64, f64, f64)> {
        let bbox = self.cached_stats.bounding_box?;
        Some((bbox.min().y, bbox.min().x, bbox.max().y, bbox.max().x))
    }

    /// Center of the bounding box as (lat, lon), convenient for map views
    pub fn center_wgs84(&self) -> Option<(f64, f64)> {
        self.bounding_box_wgs84()
            .map(|(min_lat, min_lon, max_lat, max_lon)| {
                ((min_lat + max_lat) / 2.0, (min_lon + max_lon) / 2.0)
            })
    }

    /// Recompute cached aggregates from scratch in one pass
    fn rebuild_stats(&mut self) {
        let mut stats = CachedStats::default();

        for spot in &self.spots {
            stats.total_capacity += u64::from(spot.total_units);
            stats.total_available += u64::from(spot.available_units);

            let corner = Coord {
                x: spot.location.longitude,
                y: spot.location.latitude,
            };
            match &mut stats.bounding_box {
                Some(bbox) => {
                    let min = bbox.min();
                    let max = bbox.max();
                    *bbox = Rect::new(
                        Coord {
                            x: min.x.min(corner.x),
                            y: min.y.min(corner.y),
                        },
                        Coord {
                            x: max.x.max(corner.x),
                            y: max.y.max(corner.y),
                        },
                    );
                }
                None => stats.bounding_box = Some(Rect::new(corner, corner)),
            }
        }

        self.cached_stats = stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_spot(id: u64, lat: f64, lon: f64, available: u32) -> ParkingSpot {
        ParkingSpot {
            id: SpotId(id),
            name: format!("Lot {id}"),
            address: None,
            location: GeoPoint::new(lat, lon),
            available_units: available,
            total_units: 50,
        }
    }

    #[test]
    fn test_empty_collection() {
        let collection = SpotCollection::new();
        assert!(collection.is_empty());
        assert_eq!(collection.len(), 0);
        assert_eq!(collection.bounding_box_wgs84(), None);
        assert_eq!(collection.center_wgs84(), None);

        let ranked = collection
            .rank_within(GeoPoint::new(0.0, 0.0), 1000.0)
            .unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_rank_within_radius() {
        let mut collection = SpotCollection::new();
        // ~111 m east of the origin at the equator
        collection.replace_all(vec![test_spot(1, 0.0, 0.001, 10)]);

        let ranked = collection
            .rank_within(GeoPoint::new(0.0, 0.0), 1000.0)
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].spot.id, SpotId(1));
        assert!((ranked[0].distance_m - 111.2).abs() < 0.5);
    }

    #[test]
    fn test_rank_excludes_beyond_radius() {
        let mut collection = SpotCollection::new();
        // ~1112 m east of the origin, just outside a 1 km radius
        collection.replace_all(vec![test_spot(1, 0.0, 0.01, 10)]);

        let ranked = collection
            .rank_within(GeoPoint::new(0.0, 0.0), 1000.0)
            .unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_rank_orders_nearest_first() {
        let mut collection = SpotCollection::new();
        collection.replace_all(vec![
            test_spot(1, 0.0, 0.005, 10),
            test_spot(2, 0.0, 0.001, 10),
            test_spot(3, 0.0, 0.003, 10),
        ]);

        let ranked = collection
            .rank_within(GeoPoint::new(0.0, 0.0), 1000.0)
            .unwrap();
        let order: Vec<SpotId> = ranked.iter().map(|r| r.spot.id).collect();
        assert_eq!(order, vec![SpotId(2), SpotId(3), SpotId(1)]);
        assert!(ranked[0].distance_m <= ranked[1].distance_m);
        assert!(ranked[1].distance_m <= ranked[2].distance_m);
    }

    #[test]
    fn test_rank_ties_keep_catalog_order() {
        let mut collection = SpotCollection::new();
        // Same location twice, so identical distances
        collection.replace_all(vec![
            test_spot(7, 0.0, 0.002, 10),
            test_spot(3, 0.0, 0.002, 10),
        ]);

        let ranked = collection
            .rank_within(GeoPoint::new(0.0, 0.0), 1000.0)
            .unwrap();
        let order: Vec<SpotId> = ranked.iter().map(|r| r.spot.id).collect();
        assert_eq!(order, vec![SpotId(7), SpotId(3)]);
    }

    #[test]
    fn test_rank_is_pure() {
        let mut collection = SpotCollection::new();
        collection.replace_all(vec![
            test_spot(1, 0.0, 0.005, 10),
            test_spot(2, 0.0, 0.001, 3),
        ]);

        let position = GeoPoint::new(0.0, 0.0);
        let first = collection.rank_within(position, 1000.0).unwrap();
        let second = collection.rank_within(position, 1000.0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rank_rejects_bad_radius() {
        let collection = SpotCollection::new();
        let origin = GeoPoint::new(0.0, 0.0);

        for radius in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let result = collection.rank_within(origin, radius);
            assert!(
                matches!(result, Err(TrackError::InvalidArgument(_))),
                "radius {radius} should be rejected"
            );
        }
    }

    #[test]
    fn test_rank_rejects_bad_position() {
        let collection = SpotCollection::new();
        let result = collection.rank_within(GeoPoint::new(91.0, 0.0), 1000.0);
        assert!(matches!(result, Err(TrackError::InvalidArgument(_))));
    }

    #[test]
    fn test_replace_all_drops_invalid_spots() {
        let mut collection = SpotCollection::new();
        collection.replace_all(vec![
            test_spot(1, 0.0, 0.001, 10),
            test_spot(2, 100.0, 0.0, 10), // latitude out of range
            test_spot(3, 0.0, 0.002, 10),
        ]);

        assert_eq!(collection.len(), 2);
        assert!(collection.get(SpotId(2)).is_none());
        assert!(collection.get(SpotId(1)).is_some());
        assert!(collection.get(SpotId(3)).is_some());
    }

    #[test]
    fn test_replace_all_overwrites_previous_snapshot() {
        let mut collection = SpotCollection::new();
        collection.replace_all(vec![test_spot(1, 0.0, 0.001, 10)]);
        collection.replace_all(vec![test_spot(2, 0.0, 0.002, 5)]);

        assert_eq!(collection.len(), 1);
        assert!(collection.get(SpotId(1)).is_none());
        assert!(collection.get(SpotId(2)).is_some());
    }

    #[test]
    fn test_info_tracks_capacity() {
        let mut collection = SpotCollection::new();
        collection.replace_all(vec![
            test_spot(1, 0.0, 0.001, 10),
            test_spot(2, 0.0, 0.002, 3),
        ]);

        let info = collection.info();
        assert_eq!(info.spot_count, 2);
        assert_eq!(info.total_capacity, 100);
        assert_eq!(info.total_available, 13);

        collection.clear();
        assert_eq!(collection.info(), CollectionInfo::default());
    }

    #[test]
    fn test_bounding_box_and_center() {
        let mut collection = SpotCollection::new();
        collection.replace_all(vec![
            test_spot(1, 10.0, 20.0, 10),
            test_spot(2, 12.0, 24.0, 10),
        ]);

        let bbox = collection.bounding_box_wgs84().unwrap();
        assert_eq!(bbox, (10.0, 20.0, 12.0, 24.0));

        let (center_lat, center_lon) = collection.center_wgs84().unwrap();
        assert!((center_lat - 11.0).abs() < 1e-9);
        assert!((center_lon - 22.0).abs() < 1e-9);
    }
}
