//! Domain types shared by the stores, checks and geospatial helpers.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One monitored server, as supplied by the target list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTarget {
    pub id: u32,
    pub name: String,
    #[serde(rename = "oba_base_url")]
    pub rest_base_url: String,
    #[serde(rename = "oba_api_key")]
    pub rest_api_key: String,
    pub gtfs_url: String,
    #[serde(default)]
    pub trip_update_url: String,
    pub vehicle_position_url: String,
    /// Header name sent with GTFS-RT requests, empty when the feed is open.
    #[serde(default)]
    pub gtfs_rt_api_key: String,
    #[serde(default)]
    pub gtfs_rt_api_value: String,
    #[serde(default)]
    pub agency_id: String,
}

impl ServerTarget {
    /// The `server_id` label value.
    pub fn label(&self) -> String {
        self.id.to_string()
    }

    /// Returns the custom auth header for the realtime feed, if both halves are set.
    pub fn realtime_auth_header(&self) -> Option<(&str, &str)> {
        if self.gtfs_rt_api_key.is_empty() || self.gtfs_rt_api_value.is_empty() {
            None
        } else {
            Some((&self.gtfs_rt_api_key, &self.gtfs_rt_api_value))
        }
    }
}

/// GTFS `location_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationType {
    StopOrPlatform,
    Station,
    EntranceExit,
    GenericNode,
    BoardingArea,
}

impl LocationType {
    /// Maps the raw column value; empty means stop/platform, unknown codes are rejected.
    pub fn from_code(code: Option<u8>) -> Option<Self> {
        match code.unwrap_or(0) {
            0 => Some(LocationType::StopOrPlatform),
            1 => Some(LocationType::Station),
            2 => Some(LocationType::EntranceExit),
            3 => Some(LocationType::GenericNode),
            4 => Some(LocationType::BoardingArea),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_type: LocationType,
    pub parent_station: Option<String>,
}

impl Stop {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agency {
    pub id: Option<String>,
    pub name: String,
}

/// A service-calendar entry reduced to its active date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCalendar {
    pub service_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Parsed contents of the most recently downloaded static bundle.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshot {
    pub stops: Vec<Stop>,
    pub agencies: Vec<Agency>,
    pub services: Vec<ServiceCalendar>,
    stop_index: HashMap<String, usize>,
}

// Stop hierarchies in GTFS are at most three levels deep; anything longer is a cycle.
const MAX_HIERARCHY_DEPTH: usize = 8;

impl StaticSnapshot {
    pub fn new(stops: Vec<Stop>, agencies: Vec<Agency>, services: Vec<ServiceCalendar>) -> Self {
        let stop_index = stops
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Self {
            stops,
            agencies,
            services,
            stop_index,
        }
    }

    pub fn stop(&self, id: &str) -> Option<&Stop> {
        self.stop_index.get(id).map(|&i| &self.stops[i])
    }

    /// Resolves `parent_station`. A dangling reference resolves to `None`.
    pub fn parent(&self, stop: &Stop) -> Option<&Stop> {
        stop.parent_station.as_deref().and_then(|id| self.stop(id))
    }

    /// Follows the parent chain to its top. `None` if the chain dangles or loops.
    pub fn root<'a>(&'a self, stop: &'a Stop) -> Option<&'a Stop> {
        let mut current = stop;
        for _ in 0..MAX_HIERARCHY_DEPTH {
            match &current.parent_station {
                None => return Some(current),
                Some(_) => current = self.parent(current)?,
            }
        }
        None
    }

    /// Looks up the given stop ids, silently skipping unknown ones.
    pub fn stops_by_ids<'a>(&'a self, ids: &[String]) -> HashMap<&'a str, &'a Stop> {
        ids.iter()
            .filter_map(|id| self.stop(id))
            .map(|s| (s.id.as_str(), s))
            .collect()
    }

    /// Earliest and latest service end dates.
    pub fn service_end_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let earliest = self.services.iter().map(|s| s.end_date).min()?;
        let latest = self.services.iter().map(|s| s.end_date).max()?;
        Some((earliest, latest))
    }
}

/// GTFS-RT `VehicleStopStatus::STOPPED_AT`.
pub const VEHICLE_STATUS_STOPPED_AT: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportedPosition {
    pub latitude: f64,
    pub longitude: f64,
    /// Self-reported speed in m/s.
    pub speed: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRecord {
    pub vehicle_id: Option<String>,
    pub position: Option<ReportedPosition>,
    pub timestamp: Option<DateTime<Utc>>,
    pub current_status: Option<i32>,
}

impl VehicleRecord {
    pub fn is_stopped_at_stop(&self) -> bool {
        self.current_status == Some(VEHICLE_STATUS_STOPPED_AT)
    }
}

/// Vehicle positions from the most recent GTFS-RT fetch of one server.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub vehicles: Vec<VehicleRecord>,
}
