//! sighting-projector
//!
//! Projects where field teams of a live event may be now, from their last
//! sighting and the time since: greedy walks over real walking directions,
//! served over TCP with a shared, persisted directions cache.

pub mod traits;
pub mod model;
pub mod polyline;
pub mod walk;
pub mod cache;
pub mod projection;
pub mod registry;
pub mod osrm;
pub mod osrm_data;
pub mod haversine;
pub mod config;
pub mod server;
