//! Domain types shared by the engine, the cache and the wire protocol.

use std::fmt;
use std::str::FromStr;

use bitcode::{Decode, Encode};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::polyline::Polyline;

pub type GroupId = u64;

/// One of the fixed zones partitioning the event's geography.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Subarea {
    Alpha,
    Bravo,
    Charlie,
    Delta,
    Echo,
    Foxtrot,
}

impl Subarea {
    pub const ALL: [Subarea; 6] = [
        Subarea::Alpha,
        Subarea::Bravo,
        Subarea::Charlie,
        Subarea::Delta,
        Subarea::Echo,
        Subarea::Foxtrot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Subarea::Alpha => "Alpha",
            Subarea::Bravo => "Bravo",
            Subarea::Charlie => "Charlie",
            Subarea::Delta => "Delta",
            Subarea::Echo => "Echo",
            Subarea::Foxtrot => "Foxtrot",
        }
    }
}

impl fmt::Display for Subarea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Subarea {
    type Err = String;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Subarea::ALL
            .into_iter()
            .find(|area| area.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown subarea `{trimmed}`"))
    }
}

impl<'de> Deserialize<'de> for Subarea {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A team post registered for the event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub subarea: Subarea,
    /// (latitude, longitude)
    pub location: (f64, f64),
    /// Free-text address as listed by the registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub visits: u32,
}

/// Position of a sighting as sent by clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Location {
    Pair([f64; 2]),
    Coordinates { lat: f64, lng: f64 },
    Text(String),
}

impl Location {
    /// Resolves to (latitude, longitude).
    ///
    /// Text is accepted in the `"lat,lng"` form only; street addresses would
    /// need a geocoder and yield `None`.
    pub fn resolve(&self) -> Option<(f64, f64)> {
        let (lat, lng) = match self {
            Location::Pair([lat, lng]) => (*lat, *lng),
            Location::Coordinates { lat, lng } => (*lat, *lng),
            Location::Text(text) => {
                let (lat, lng) = text.split_once(',')?;
                (lat.trim().parse().ok()?, lng.trim().parse().ok()?)
            }
        };
        let valid = lat.is_finite() && lng.is_finite() && lat.abs() <= 90.0 && lng.abs() <= 180.0;
        valid.then_some((lat, lng))
    }
}

/// Last known position of a tracked team.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sighting {
    pub subarea: Subarea,
    pub location: Location,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Sighting {
    /// Seconds since the sighting, never negative.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = now.signed_duration_since(self.timestamp);
        (elapsed.num_milliseconds() as f64 / 1000.0).max(0.0)
    }
}

/// Request payload of one connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRequest {
    pub last_locations: Vec<Sighting>,
}

/// Parses RFC 3339 (any offset, `Z` included) or a zone-less ISO-8601
/// timestamp, which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
}

/// Smallest unit of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Encode, Decode)]
pub struct Step {
    /// Seconds.
    pub duration: f64,
    /// Meters.
    pub distance: f64,
    pub polyline: Polyline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Encode, Decode)]
pub struct Leg {
    pub distance: f64,
    pub duration: f64,
    pub steps: Vec<Step>,
}

/// A walking route as returned by the directions backend.
#[derive(Debug, Clone, PartialEq, Serialize, Encode, Decode)]
pub struct Route {
    pub legs: Vec<Leg>,
}

impl Route {
    /// Builds a single-leg route, deriving the leg totals from its steps.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        let distance = steps.iter().map(|step| step.distance).sum();
        let duration = steps.iter().map(|step| step.duration).sum();
        Self {
            legs: vec![Leg {
                distance,
                duration,
                steps,
            }],
        }
    }

    /// Walking distance of the first leg; candidates are ranked by it.
    pub fn distance(&self) -> f64 {
        self.legs.first().map(|leg| leg.distance).unwrap_or(f64::INFINITY)
    }

    pub fn steps(&self) -> &[Step] {
        self.legs.first().map(|leg| leg.steps.as_slice()).unwrap_or(&[])
    }
}
