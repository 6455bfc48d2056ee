//! Groups stops into clusters for unmatched-stop reporting.
//!
//! Stops that belong to a station cluster under the station's id. Free-standing
//! stops fall back to the S2 cell that contains them. The hierarchy rules follow
//! the `parent_station` section of https://gtfs.org/schedule/reference/#stopstxt

use std::fmt;

use s2::cellid::CellID;
use s2::latlng::LatLng;

use super::is_valid_lat_lon;
use crate::models::{LocationType, StaticSnapshot, Stop};

/// S2 level 13 cells are roughly 1 km across.
pub const S2_CLUSTER_LEVEL: u64 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterType {
    Station,
    S2,
}

impl ClusterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Station => "station",
            ClusterType::S2 => "s2",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterAssignment {
    pub cluster_id: String,
    pub cluster_type: ClusterType,
}

impl ClusterAssignment {
    fn station(stop: &Stop) -> Self {
        Self {
            cluster_id: stop.id.clone(),
            cluster_type: ClusterType::Station,
        }
    }

    fn s2(stop: &Stop) -> Option<Self> {
        let (lat, lon) = stop.coordinates()?;
        if !is_valid_lat_lon(lat, lon) {
            return None;
        }
        Some(Self {
            cluster_id: s2_cluster_id(lat, lon, S2_CLUSTER_LEVEL),
            cluster_type: ClusterType::S2,
        })
    }
}

/// Stable `s2_<cell id>` key for the cell at `level` containing the point.
pub fn s2_cluster_id(lat: f64, lon: f64, level: u64) -> String {
    let cell = CellID::from(&LatLng::from_degrees(lat, lon)).parent(level);
    format!("s2_{}", cell.0)
}

/// Classifies `stop`, resolving parents through `hierarchy`.
///
/// Returns `None` for stops that cannot be clustered: malformed hierarchies,
/// dangling parents, or free-standing stops without usable coordinates.
pub fn cluster_id(stop: &Stop, hierarchy: &StaticSnapshot) -> Option<ClusterAssignment> {
    match stop.location_type {
        LocationType::StopOrPlatform => {
            if stop.parent_station.is_some() {
                let root = hierarchy.root(stop)?;
                (root.location_type == LocationType::Station)
                    .then(|| ClusterAssignment::station(root))
            } else {
                ClusterAssignment::s2(stop)
            }
        }
        LocationType::Station => Some(ClusterAssignment::station(stop)),
        LocationType::EntranceExit | LocationType::GenericNode => {
            let parent = hierarchy.parent(stop)?;
            (parent.location_type == LocationType::Station)
                .then(|| ClusterAssignment::station(parent))
        }
        LocationType::BoardingArea => {
            let parent = hierarchy.parent(stop)?;
            if parent.location_type != LocationType::StopOrPlatform {
                return None;
            }
            if parent.parent_station.is_none() {
                return ClusterAssignment::s2(stop);
            }
            let grandparent = hierarchy.parent(parent)?;
            (grandparent.location_type == LocationType::Station)
                .then(|| ClusterAssignment::station(grandparent))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(
        id: &str,
        location_type: LocationType,
        parent: Option<&str>,
        coords: Option<(f64, f64)>,
    ) -> Stop {
        Stop {
            id: id.to_string(),
            name: None,
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
            location_type,
            parent_station: parent.map(str::to_string),
        }
    }

    fn hierarchy(stops: Vec<Stop>) -> StaticSnapshot {
        StaticSnapshot::new(stops, vec![], vec![])
    }

    fn lookup(snapshot: &StaticSnapshot, id: &str) -> Option<ClusterAssignment> {
        cluster_id(snapshot.stop(id).unwrap(), snapshot)
    }

    #[test]
    fn test_station_clusters_by_own_id() {
        let snapshot = hierarchy(vec![stop("S1", LocationType::Station, None, None)]);
        let got = lookup(&snapshot, "S1").unwrap();
        assert_eq!(got.cluster_id, "S1");
        assert_eq!(got.cluster_type.as_str(), "station");
    }

    #[test]
    fn test_free_standing_stop_uses_stable_s2_cell() {
        let snapshot = hierarchy(vec![stop(
            "P",
            LocationType::StopOrPlatform,
            None,
            Some((47.6, -122.3)),
        )]);
        let first = lookup(&snapshot, "P").unwrap();
        let second = lookup(&snapshot, "P").unwrap();

        assert_eq!(first.cluster_type, ClusterType::S2);
        assert!(first.cluster_id.starts_with("s2_"));
        assert!(first.cluster_id.len() > 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_nearby_stops_share_s2_cell() {
        assert_eq!(
            s2_cluster_id(47.60000, -122.30000, S2_CLUSTER_LEVEL),
            s2_cluster_id(47.60001, -122.30001, S2_CLUSTER_LEVEL)
        );
        assert_ne!(
            s2_cluster_id(47.6, -122.3, S2_CLUSTER_LEVEL),
            s2_cluster_id(45.5, -122.7, S2_CLUSTER_LEVEL)
        );
    }

    #[test]
    fn test_platform_under_station() {
        let snapshot = hierarchy(vec![
            stop("ST", LocationType::Station, None, None),
            stop("P", LocationType::StopOrPlatform, Some("ST"), Some((1.0, 1.0))),
        ]);
        let got = lookup(&snapshot, "P").unwrap();
        assert_eq!(got.cluster_id, "ST");
        assert_eq!(got.cluster_type, ClusterType::Station);
    }

    #[test]
    fn test_platform_without_parent_or_coordinates() {
        let snapshot = hierarchy(vec![
            stop("P", LocationType::StopOrPlatform, None, None),
            stop("Z", LocationType::StopOrPlatform, None, Some((0.0, 0.0))),
        ]);
        assert!(lookup(&snapshot, "P").is_none());
        assert!(lookup(&snapshot, "Z").is_none());
    }

    #[test]
    fn test_platform_with_non_station_root_is_malformed() {
        let snapshot = hierarchy(vec![
            stop("N", LocationType::GenericNode, None, None),
            stop("P", LocationType::StopOrPlatform, Some("N"), Some((1.0, 1.0))),
        ]);
        assert!(lookup(&snapshot, "P").is_none());
    }

    #[test]
    fn test_entrance_needs_station_parent() {
        let snapshot = hierarchy(vec![
            stop("ST", LocationType::Station, None, None),
            stop("P", LocationType::StopOrPlatform, None, Some((1.0, 1.0))),
            stop("E1", LocationType::EntranceExit, Some("ST"), None),
            stop("E2", LocationType::GenericNode, Some("P"), None),
            stop("E3", LocationType::EntranceExit, None, Some((1.0, 1.0))),
        ]);
        assert_eq!(lookup(&snapshot, "E1").unwrap().cluster_id, "ST");
        assert!(lookup(&snapshot, "E2").is_none());
        assert!(lookup(&snapshot, "E3").is_none());
    }

    #[test]
    fn test_boarding_area_rules() {
        let snapshot = hierarchy(vec![
            stop("ST", LocationType::Station, None, None),
            stop("N", LocationType::GenericNode, None, None),
            stop("P1", LocationType::StopOrPlatform, Some("ST"), None),
            stop("P2", LocationType::StopOrPlatform, None, None),
            stop("P3", LocationType::StopOrPlatform, Some("N"), None),
            stop("B1", LocationType::BoardingArea, Some("P1"), None),
            stop("B2", LocationType::BoardingArea, Some("P2"), Some((47.6, -122.3))),
            stop("B3", LocationType::BoardingArea, Some("P3"), Some((47.6, -122.3))),
            stop("B4", LocationType::BoardingArea, Some("ST"), Some((47.6, -122.3))),
            stop("B5", LocationType::BoardingArea, Some("P2"), None),
        ]);

        assert_eq!(lookup(&snapshot, "B1").unwrap().cluster_id, "ST");

        let b2 = lookup(&snapshot, "B2").unwrap();
        assert_eq!(b2.cluster_type, ClusterType::S2);
        assert_eq!(b2.cluster_id, s2_cluster_id(47.6, -122.3, S2_CLUSTER_LEVEL));

        assert!(lookup(&snapshot, "B3").is_none());
        assert!(lookup(&snapshot, "B4").is_none());
        assert!(lookup(&snapshot, "B5").is_none());
    }
}
