//! Geospatial helpers: bounding boxes, coordinate validity, great-circle distance.

pub mod cluster;

pub use cluster::{ClusterAssignment, ClusterType, cluster_id};

use anyhow::{Result, bail};

use crate::models::Stop;

/// Mean Earth radius (volumetric), in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Lat/lon envelope of a server's static stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Inclusive on all four edges.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// Computes the envelope of every stop carrying valid coordinates.
pub fn compute_bounding_box(stops: &[Stop]) -> Result<BoundingBox> {
    if stops.is_empty() {
        bail!("no stops to compute bounding box");
    }

    let mut bbox: Option<BoundingBox> = None;
    for (lat, lon) in stops.iter().filter_map(Stop::coordinates) {
        if !is_valid_lat_lon(lat, lon) {
            continue;
        }
        bbox = Some(match bbox {
            None => BoundingBox {
                min_lat: lat,
                max_lat: lat,
                min_lon: lon,
                max_lon: lon,
            },
            Some(b) => BoundingBox {
                min_lat: b.min_lat.min(lat),
                max_lat: b.max_lat.max(lat),
                min_lon: b.min_lon.min(lon),
                max_lon: b.max_lon.max(lon),
            },
        });
    }

    match bbox {
        Some(b) => Ok(b),
        None => bail!("no valid latitude/longitude found in stops"),
    }
}

/// True for lat in [-90, 90] and lon in [-180, 180], except (0, 0).
///
/// The origin is a real place in the Gulf of Guinea, but feeds overwhelmingly
/// emit it for uninitialized positions, so it is treated as invalid.
pub fn is_valid_lat_lon(lat: f64, lon: f64) -> bool {
    if lat == 0.0 && lon == 0.0 {
        return false;
    }
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Great-circle distance in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
}

/// Average speed in m/s between two observations. `None` unless time moved forward.
pub fn speed_between(
    from: (f64, f64),
    to: (f64, f64),
    elapsed_secs: f64,
) -> Option<f64> {
    if elapsed_secs <= 0.0 {
        return None;
    }
    Some(haversine_distance(from.0, from.1, to.0, to.1) / elapsed_secs)
}
