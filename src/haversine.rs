//! Straight-line directions provider (fallback when OSRM is unavailable).
//!
//! Walks the great-circle line between two points at a fixed pace.
//! Ignores streets entirely, but never fails and needs no network.

use crate::model::{Route, Step};
use crate::polyline::Polyline;
use crate::traits::{DirectionsProvider, ProviderError};

/// Average walking pace assumption.
const DEFAULT_SPEED_KMH: f64 = 5.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone)]
pub struct StraightLineDirections {
    /// Assumed walking speed in km/h.
    pub speed_kmh: f64,
}

impl Default for StraightLineDirections {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

impl StraightLineDirections {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    /// Great-circle distance between two points in kilometers.
    pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
        let (lat1, lng1) = from;
        let (lat2, lng2) = to;

        let lat1_rad = lat1.to_radians();
        let lat2_rad = lat2.to_radians();
        let delta_lat = (lat2 - lat1).to_radians();
        let delta_lng = (lng2 - lng1).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }

    fn km_to_seconds(&self, km: f64) -> f64 {
        km / self.speed_kmh * 3600.0
    }
}

impl DirectionsProvider for StraightLineDirections {
    fn directions(&self, origin: (f64, f64), destination: (f64, f64)) -> Result<Vec<Route>, ProviderError> {
        if self.speed_kmh <= 0.0 {
            return Err(ProviderError::NoRoute);
        }
        let km = Self::haversine_km(origin, destination);
        let step = Step {
            duration: self.km_to_seconds(km),
            distance: km * 1000.0,
            polyline: Polyline::encode(&[origin, destination]),
        };
        Ok(vec![Route::from_steps(vec![step])])
    }
}
