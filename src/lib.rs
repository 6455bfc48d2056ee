pub mod backoff;
pub mod checks;
pub mod config;
pub mod error;
pub mod exposition;
pub mod fetch;
pub mod geo;
pub mod gtfs;
pub mod http;
pub mod metrics;
pub mod models;
pub mod oba;
pub mod parser;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod tasks;
pub mod telemetry;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
