//! Parking spot occupancy tracking.
//!
//! Sensor uplinks are decoded into spot observations and reconciled into a
//! spot store, which the map front-end reads over HTTP.

pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod mqtt;
pub mod routes;
pub mod uplink;
