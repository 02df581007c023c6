//! Seams to the external collaborators of the projector.
//!
//! The engine only ever talks to a walking-directions service and a group
//! registry through these traits. Concrete adapters live in `osrm`,
//! `haversine` and `registry`; tests plug in scripted implementations.

use std::fmt;

use crate::model::{Group, Route};
use crate::registry::RegistryError;

/// Produces walking routes between two points.
///
/// Implementations return every alternative the backend offers, primary
/// route first. The simulator only walks the primary one.
pub trait DirectionsProvider: Send + Sync {
    fn directions(&self, origin: (f64, f64), destination: (f64, f64)) -> Result<Vec<Route>, ProviderError>;
}

/// Supplies a fresh snapshot of the event's groups.
pub trait GroupRegistry: Send + Sync {
    fn fetch_groups(&self) -> Result<Vec<Group>, RegistryError>;
}

impl<T: DirectionsProvider + ?Sized> DirectionsProvider for Box<T> {
    fn directions(&self, origin: (f64, f64), destination: (f64, f64)) -> Result<Vec<Route>, ProviderError> {
        (**self).directions(origin, destination)
    }
}

impl<T: GroupRegistry + ?Sized> GroupRegistry for Box<T> {
    fn fetch_groups(&self) -> Result<Vec<Group>, RegistryError> {
        (**self).fetch_groups()
    }
}

/// Failure of a single directions lookup.
#[derive(Debug)]
pub enum ProviderError {
    Http(reqwest::Error),
    /// Backend answered with a non-success code.
    Status(String),
    /// No walkable route between the two points.
    NoRoute,
    Malformed(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Http(err) => write!(f, "directions request failed: {err}"),
            ProviderError::Status(code) => write!(f, "directions backend returned {code}"),
            ProviderError::NoRoute => write!(f, "no walking route found"),
            ProviderError::Malformed(detail) => write!(f, "malformed directions response: {detail}"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Http(err)
    }
}
