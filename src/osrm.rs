//! OSRM HTTP adapter for walking directions.

use serde::Deserialize;

use crate::model::{Leg, Route, Step};
use crate::polyline::Polyline;
use crate::traits::{DirectionsProvider, ProviderError};

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "foot".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn route_url(&self, origin: (f64, f64), destination: (f64, f64)) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?alternatives=true&steps=true&overview=false&geometries=polyline",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            origin.1,
            origin.0,
            destination.1,
            destination.0
        )
    }
}

impl DirectionsProvider for OsrmClient {
    fn directions(&self, origin: (f64, f64), destination: (f64, f64)) -> Result<Vec<Route>, ProviderError> {
        let response = self.client.get(self.route_url(origin, destination)).send()?;

        // OSRM reports NoRoute and friends as 400 with a JSON body.
        let status = response.status();
        let body = response.json::<OsrmRouteResponse>().map_err(|err| {
            if status.is_success() {
                ProviderError::Malformed(err.to_string())
            } else {
                ProviderError::Status(status.to_string())
            }
        })?;

        into_routes(body)
    }
}

fn into_routes(body: OsrmRouteResponse) -> Result<Vec<Route>, ProviderError> {
    match body.code.as_str() {
        "Ok" => {}
        "NoRoute" | "NoSegment" => return Err(ProviderError::NoRoute),
        other => return Err(ProviderError::Status(other.to_string())),
    }

    let routes: Vec<Route> = body
        .routes
        .into_iter()
        .map(|route| Route {
            legs: route
                .legs
                .into_iter()
                .map(|leg| Leg {
                    distance: leg.distance,
                    duration: leg.duration,
                    steps: leg
                        .steps
                        .into_iter()
                        .map(|step| Step {
                            duration: step.duration,
                            distance: step.distance,
                            polyline: Polyline::new(step.geometry),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();

    if routes.is_empty() {
        return Err(ProviderError::NoRoute);
    }
    Ok(routes)
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    distance: f64,
    duration: f64,
    #[serde(default)]
    steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmStep {
    distance: f64,
    duration: f64,
    #[serde(default)]
    geometry: String,
}
