//! Server configuration.
//!
//! Defaults are usable for a local setup; `ServerConfig::from_env` overlays
//! the process environment.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

use crate::haversine::StraightLineDirections;
use crate::osrm::{OsrmClient, OsrmConfig};
use crate::projection::ProjectionOptions;
use crate::registry::{FileRegistry, RegistryClient, RegistryConfig};
use crate::traits::{DirectionsProvider, GroupRegistry};

#[derive(Debug, Clone)]
pub enum RegistrySource {
    Http(RegistryConfig),
    File(PathBuf),
}

impl RegistrySource {
    pub fn build(&self) -> Result<Box<dyn GroupRegistry>, reqwest::Error> {
        Ok(match self {
            RegistrySource::Http(config) => Box::new(RegistryClient::new(config.clone())?),
            RegistrySource::File(path) => Box::new(FileRegistry::new(path)),
        })
    }
}

#[derive(Debug, Clone)]
pub enum DirectionsBackend {
    Osrm(OsrmConfig),
    StraightLine { speed_kmh: f64 },
}

impl DirectionsBackend {
    pub fn build(&self) -> Result<Box<dyn DirectionsProvider>, reqwest::Error> {
        Ok(match self {
            DirectionsBackend::Osrm(config) => Box::new(OsrmClient::new(config.clone())?),
            DirectionsBackend::StraightLine { speed_kmh } => Box::new(StraightLineDirections::new(*speed_kmh)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Read/write timeout of a client connection.
    pub idle_timeout_secs: u64,
    pub max_request_bytes: u64,
    pub cache_path: PathBuf,
    pub cache_capacity: NonZeroUsize,
    /// Precompute every arrival lookup before accepting connections.
    pub warm_cache: bool,
    pub registry: RegistrySource,
    pub directions: DirectionsBackend,
    pub projection: ProjectionOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:31337".to_string(),
            idle_timeout_secs: 60,
            max_request_bytes: 64 * 1024,
            cache_path: PathBuf::from("directions_cache.bin"),
            cache_capacity: NonZeroUsize::new(4096).unwrap_or(NonZeroUsize::MIN),
            warm_cache: false,
            registry: RegistrySource::Http(RegistryConfig::default()),
            directions: DirectionsBackend::Osrm(OsrmConfig::default()),
            projection: ProjectionOptions::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("PROJECTOR_BIND") {
            config.bind_addr = addr;
        }
        if let Some(secs) = parsed(&lookup, "PROJECTOR_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout_secs = secs;
        }
        if let Some(bytes) = parsed(&lookup, "PROJECTOR_MAX_REQUEST_BYTES")? {
            config.max_request_bytes = bytes;
        }
        if let Some(path) = lookup("PROJECTOR_CACHE_PATH") {
            config.cache_path = PathBuf::from(path);
        }
        if let Some(capacity) = parsed(&lookup, "PROJECTOR_CACHE_CAPACITY")? {
            config.cache_capacity = capacity;
        }
        if let Some(warm) = parsed(&lookup, "PROJECTOR_WARM_CACHE")? {
            config.warm_cache = warm;
        }
        if let Some(secs) = parsed::<f64>(&lookup, "PROJECTOR_ELAPSED_OVERRIDE_SECS")? {
            config.projection.elapsed_override_secs = Some(secs);
        }

        if let Some(path) = lookup("REGISTRY_FILE") {
            config.registry = RegistrySource::File(PathBuf::from(path));
        } else if let Some(base_url) = lookup("REGISTRY_URL") {
            config.registry = RegistrySource::Http(RegistryConfig {
                base_url,
                ..RegistryConfig::default()
            });
        }

        let mut osrm = OsrmConfig::default();
        if let Some(base_url) = lookup("OSRM_URL") {
            osrm.base_url = base_url;
        }
        if let Some(profile) = lookup("OSRM_PROFILE") {
            osrm.profile = profile;
        }
        config.directions = match lookup("DIRECTIONS_BACKEND").as_deref() {
            None | Some("osrm") => DirectionsBackend::Osrm(osrm),
            Some("straight-line") => DirectionsBackend::StraightLine {
                speed_kmh: StraightLineDirections::default().speed_kmh,
            },
            Some(other) => return Err(ConfigError::invalid("DIRECTIONS_BACKEND", other)),
        };

        Ok(config)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|raw| raw.trim().parse().map_err(|_| ConfigError::invalid(key, &raw)))
        .transpose()
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { key: String, value: String },
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "invalid value `{value}` for {key}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:31337");
        assert_eq!(config.idle_timeout_secs, 60);
        assert_eq!(config.projection.alternatives, 3);
        assert!(matches!(config.directions, DirectionsBackend::Osrm(_)));
        assert!(matches!(config.registry, RegistrySource::Http(_)));
    }

    #[test]
    fn environment_overrides() {
        let config = config_from(&[
            ("PROJECTOR_BIND", "127.0.0.1:4000"),
            ("PROJECTOR_CACHE_CAPACITY", "16"),
            ("PROJECTOR_WARM_CACHE", "true"),
            ("PROJECTOR_ELAPSED_OVERRIDE_SECS", "2000"),
            ("REGISTRY_FILE", "/srv/groups.json"),
            ("DIRECTIONS_BACKEND", "straight-line"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:4000");
        assert_eq!(config.cache_capacity.get(), 16);
        assert!(config.warm_cache);
        assert_eq!(config.projection.elapsed_override_secs, Some(2000.0));
        assert!(matches!(config.registry, RegistrySource::File(_)));
        assert!(matches!(config.directions, DirectionsBackend::StraightLine { .. }));
    }

    #[test]
    fn osrm_settings() {
        let config = config_from(&[("OSRM_URL", "http://osrm:5000"), ("OSRM_PROFILE", "walking")]).unwrap();
        match config.directions {
            DirectionsBackend::Osrm(osrm) => {
                assert_eq!(osrm.base_url, "http://osrm:5000");
                assert_eq!(osrm.profile, "walking");
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(config_from(&[("PROJECTOR_CACHE_CAPACITY", "0")]).is_err());
        assert!(config_from(&[("PROJECTOR_IDLE_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config_from(&[("DIRECTIONS_BACKEND", "teleport")]).is_err());
    }
}
