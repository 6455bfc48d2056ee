//! Protobuf parser for GTFS Realtime feeds.

use anyhow::Result;
use chrono::{DateTime, Utc};
use prost::Message;

use crate::gtfs_rt::FeedMessage;
use crate::models::{RealtimeSnapshot, ReportedPosition, VehicleRecord};

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Flattens the vehicle-position entities of `feed` into a snapshot.
///
/// Deleted entities and entities without a vehicle position are skipped.
pub fn realtime_snapshot_from_feed(feed: &FeedMessage, fetched_at: DateTime<Utc>) -> RealtimeSnapshot {
    let vehicles = feed
        .entity
        .iter()
        .filter(|e| !e.is_deleted.unwrap_or(false))
        .filter_map(|e| e.vehicle.as_ref())
        .map(|vp| VehicleRecord {
            vehicle_id: vp
                .vehicle
                .as_ref()
                .and_then(|v| v.id.clone())
                .filter(|id| !id.is_empty()),
            position: vp.position.as_ref().map(|p| ReportedPosition {
                latitude: f64::from(p.latitude),
                longitude: f64::from(p.longitude),
                speed: p.speed,
            }),
            timestamp: vp
                .timestamp
                .and_then(|ts| i64::try_from(ts).ok())
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            current_status: vp.current_status,
        })
        .collect();

    RealtimeSnapshot {
        fetched_at,
        vehicles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{FeedEntity, FeedHeader, Position, VehicleDescriptor, VehiclePosition};

    fn header() -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp: Some(1234567890),
            incrementality: None,
            feed_version: None,
        }
    }

    fn vehicle_entity(id: &str, vehicle_id: Option<&str>, position: Option<(f32, f32)>) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            is_deleted: None,
            vehicle: Some(VehiclePosition {
                vehicle: vehicle_id.map(|v| VehicleDescriptor {
                    id: Some(v.to_string()),
                    ..Default::default()
                }),
                position: position.map(|(lat, lon)| Position {
                    latitude: lat,
                    longitude: lon,
                    speed: Some(8.5),
                    ..Default::default()
                }),
                timestamp: Some(1_700_000_000),
                current_status: Some(1),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_parse_empty_bytes_returns_default_feed() {
        // An empty byte array decodes to a FeedMessage with default values
        // This is valid protobuf behavior
        let result = parse_feed(&[]);
        assert!(result.is_ok());
        let feed = result.unwrap();
        assert_eq!(feed.header.gtfs_realtime_version, "");
        assert!(feed.entity.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid_bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        let result = parse_feed(&invalid_bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_valid_minimal_feed() {
        let feed = FeedMessage {
            header: header(),
            entity: vec![],
        };
        let encoded = feed.encode_to_vec();
        let parsed = parse_feed(&encoded).unwrap();

        assert_eq!(parsed.header.gtfs_realtime_version, "2.0");
        assert_eq!(parsed.header.timestamp, Some(1234567890));
    }

    #[test]
    fn test_snapshot_extracts_vehicle_fields() {
        let feed = FeedMessage {
            header: header(),
            entity: vec![vehicle_entity("e1", Some("bus-1"), Some((47.6, -122.3)))],
        };
        let decoded = parse_feed(&feed.encode_to_vec()).unwrap();
        let snapshot = realtime_snapshot_from_feed(&decoded, Utc::now());

        assert_eq!(snapshot.vehicles.len(), 1);
        let v = &snapshot.vehicles[0];
        assert_eq!(v.vehicle_id.as_deref(), Some("bus-1"));
        let pos = v.position.unwrap();
        assert!((pos.latitude - 47.6).abs() < 1e-4);
        assert_eq!(pos.speed, Some(8.5));
        assert_eq!(v.timestamp.unwrap().timestamp(), 1_700_000_000);
        assert!(v.is_stopped_at_stop());
    }

    #[test]
    fn test_snapshot_skips_deleted_and_non_vehicle_entities() {
        let mut deleted = vehicle_entity("e2", Some("bus-2"), None);
        deleted.is_deleted = Some(true);
        let bare = FeedEntity {
            id: "e3".to_string(),
            is_deleted: None,
            vehicle: None,
        };
        let feed = FeedMessage {
            header: header(),
            entity: vec![vehicle_entity("e1", None, None), deleted, bare],
        };

        let snapshot = realtime_snapshot_from_feed(&feed, Utc::now());
        assert_eq!(snapshot.vehicles.len(), 1);
        assert!(snapshot.vehicles[0].vehicle_id.is_none());
        assert!(snapshot.vehicles[0].position.is_none());
    }
}
