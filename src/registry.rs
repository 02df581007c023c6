//! Group registry sources.
//!
//! The registry serves `GET {base_url}/api/group` as a JSON array. The same
//! document can be read from disk for events without connectivity.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

use crate::model::{Group, GroupId, Subarea};
use crate::traits::GroupRegistry;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    config: RegistryConfig,
    client: reqwest::blocking::Client,
}

impl RegistryClient {
    pub fn new(config: RegistryConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn groups_url(&self) -> String {
        format!("{}/api/group", self.config.base_url.trim_end_matches('/'))
    }
}

impl GroupRegistry for RegistryClient {
    fn fetch_groups(&self) -> Result<Vec<Group>, RegistryError> {
        let response = self.client.get(self.groups_url()).send()?;
        if !response.status().is_success() {
            return Err(RegistryError::Status(response.status().as_u16()));
        }
        let records = response.json::<Vec<RegistryGroup>>()?;
        Ok(into_groups(records))
    }
}

/// Reads the registry document from a local JSON file on every fetch.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl GroupRegistry for FileRegistry {
    fn fetch_groups(&self) -> Result<Vec<Group>, RegistryError> {
        let bytes = std::fs::read(&self.path)?;
        parse_groups(&bytes)
    }
}

/// Parses a registry document.
pub fn parse_groups(bytes: &[u8]) -> Result<Vec<Group>, RegistryError> {
    let records: Vec<RegistryGroup> = serde_json::from_slice(bytes)?;
    Ok(into_groups(records))
}

/// Drops records whose subarea is not one of the event's zones.
fn into_groups(records: Vec<RegistryGroup>) -> Vec<Group> {
    records
        .into_iter()
        .filter_map(|record| match record.subarea.name.parse::<Subarea>() {
            Ok(subarea) => Some(Group {
                id: record.id,
                name: record.name,
                subarea,
                location: (record.latitude, record.longitude),
                address: record.location,
                visits: record.visits,
            }),
            Err(reason) => {
                warn!(group = record.id, %reason, "skipping registry group");
                None
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct RegistryGroup {
    id: GroupId,
    name: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(rename = "Subarea")]
    subarea: RegistrySubarea,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    visits: u32,
}

#[derive(Debug, Deserialize)]
struct RegistrySubarea {
    name: String,
}

#[derive(Debug)]
pub enum RegistryError {
    Http(reqwest::Error),
    Status(u16),
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Http(err) => write!(f, "registry request failed: {err}"),
            RegistryError::Status(code) => write!(f, "registry returned HTTP {code}"),
            RegistryError::Io(err) => write!(f, "registry file unreadable: {err}"),
            RegistryError::Json(err) => write!(f, "registry document malformed: {err}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Http(err)
    }
}

impl From<io::Error> for RegistryError {
    fn from(err: io::Error) -> Self {
        RegistryError::Io(err)
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Json(err)
    }
}
