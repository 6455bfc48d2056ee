//! Static GTFS bundle parsing.
//!
//! Only the tables the watchdog reads are loaded: `stops.txt` and `agency.txt`
//! (required) plus `calendar.txt` and `calendar_dates.txt` (optional). Rows
//! that fail to deserialize are skipped and counted rather than failing the
//! whole bundle.

use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::models::{Agency, LocationType, ServiceCalendar, StaticSnapshot, Stop};

const GTFS_DATE_FORMAT: &str = "%Y%m%d";
const EXCEPTION_SERVICE_ADDED: u8 = 1;

#[derive(Debug, Deserialize)]
struct StopRow {
    stop_id: String,
    #[serde(default)]
    stop_name: Option<String>,
    #[serde(default)]
    stop_lat: Option<f64>,
    #[serde(default)]
    stop_lon: Option<f64>,
    #[serde(default)]
    location_type: Option<u8>,
    #[serde(default)]
    parent_station: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgencyRow {
    #[serde(default)]
    agency_id: Option<String>,
    agency_name: String,
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    service_id: String,
    start_date: String,
    end_date: String,
}

#[derive(Debug, Deserialize)]
struct CalendarDateRow {
    service_id: String,
    date: String,
    exception_type: u8,
}

/// Parses a zipped static GTFS bundle.
pub fn parse_static_bundle(bytes: &[u8]) -> Result<StaticSnapshot> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("bundle is not a zip archive")?;

    let stops_raw = read_entry(&mut archive, "stops.txt")?.context("bundle has no stops.txt")?;
    let agency_raw = read_entry(&mut archive, "agency.txt")?.context("bundle has no agency.txt")?;
    let calendar_raw = read_entry(&mut archive, "calendar.txt")?;
    let calendar_dates_raw = read_entry(&mut archive, "calendar_dates.txt")?;

    let stops: Vec<Stop> = read_rows::<StopRow>("stops.txt", &stops_raw)?
        .into_iter()
        .filter_map(|row| {
            let Some(location_type) = LocationType::from_code(row.location_type) else {
                debug!(stop_id = %row.stop_id, code = ?row.location_type, "Skipping stop with unknown location_type");
                return None;
            };
            Some(Stop {
                id: row.stop_id,
                name: non_empty(row.stop_name),
                latitude: row.stop_lat,
                longitude: row.stop_lon,
                location_type,
                parent_station: non_empty(row.parent_station),
            })
        })
        .collect();

    let agencies: Vec<Agency> = read_rows::<AgencyRow>("agency.txt", &agency_raw)?
        .into_iter()
        .map(|row| Agency {
            id: non_empty(row.agency_id),
            name: row.agency_name,
        })
        .collect();
    if agencies.is_empty() {
        bail!("agency.txt has no agencies");
    }

    let mut services = Vec::new();
    if let Some(raw) = &calendar_raw {
        for row in read_rows::<CalendarRow>("calendar.txt", raw)? {
            match (parse_gtfs_date(&row.start_date), parse_gtfs_date(&row.end_date)) {
                (Some(start_date), Some(end_date)) => services.push(ServiceCalendar {
                    service_id: row.service_id,
                    start_date,
                    end_date,
                }),
                _ => debug!(service_id = %row.service_id, "Skipping calendar row with bad dates"),
            }
        }
    }

    if let Some(raw) = &calendar_dates_raw {
        let known: HashSet<String> = services.iter().map(|s| s.service_id.clone()).collect();
        let mut added: BTreeMap<String, (NaiveDate, NaiveDate)> = BTreeMap::new();
        for row in read_rows::<CalendarDateRow>("calendar_dates.txt", raw)? {
            if row.exception_type != EXCEPTION_SERVICE_ADDED {
                continue;
            }
            if known.contains(&row.service_id) {
                continue;
            }
            let Some(date) = parse_gtfs_date(&row.date) else {
                continue;
            };
            added
                .entry(row.service_id)
                .and_modify(|(start, end)| {
                    *start = (*start).min(date);
                    *end = (*end).max(date);
                })
                .or_insert((date, date));
        }
        services.extend(added.into_iter().map(|(service_id, (start_date, end_date))| {
            ServiceCalendar {
                service_id,
                start_date,
                end_date,
            }
        }));
    }

    debug!(
        stops = stops.len(),
        agencies = agencies.len(),
        services = services.len(),
        "Parsed static bundle"
    );
    Ok(StaticSnapshot::new(stops, agencies, services))
}

pub fn parse_gtfs_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), GTFS_DATE_FORMAT).ok()
}

/// Reads `name` from the archive root, or from a nested folder as some
/// publishers zip the directory rather than its contents. The root entry wins;
/// among nested ones the shallowest, then lexically first, is used.
fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<Vec<u8>>> {
    let suffix = format!("/{name}");
    let path = archive
        .file_names()
        .filter(|n| *n == name || n.ends_with(&suffix))
        .min_by_key(|n| (n.matches('/').count(), *n))
        .map(str::to_string);
    let Some(path) = path else {
        return Ok(None);
    };

    let mut file = match archive.by_name(&path) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to open {path}")),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .with_context(|| format!("failed to read {path}"))?;
    Ok(Some(buf))
}

fn read_rows<T: DeserializeOwned>(table: &str, raw: &[u8]) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(raw);

    // Fail early on a missing or unreadable header row.
    rdr.headers()
        .with_context(|| format!("{table} has no header row"))?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.deserialize::<T>() {
        match result {
            Ok(row) => rows.push(row),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(table, skipped, "Skipped malformed rows");
    }
    Ok(rows)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
