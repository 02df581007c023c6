//! Walking-network dataset preparation for a local OSRM backend.
//!
//! Downloads a Geofabrik extract and runs the OSRM toolchain (via docker)
//! with the requested profile, so `osrm-routed` can serve `/route` queries.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

const OSRM_IMAGE: &str = "osrm/osrm-backend";

#[derive(Debug, Clone)]
pub struct GeofabrikRegion {
    /// Geofabrik region path, e.g. "europe/netherlands/utrecht".
    pub path: String,
}

impl GeofabrikRegion {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("region")
    }

    pub fn url(&self) -> String {
        format!("https://download.geofabrik.de/{}-latest.osm.pbf", self.path)
    }
}

/// Travel profile the routing graph is extracted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsrmProfile {
    Foot,
    Bicycle,
    Car,
}

impl OsrmProfile {
    pub fn name(self) -> &'static str {
        match self {
            OsrmProfile::Foot => "foot",
            OsrmProfile::Bicycle => "bicycle",
            OsrmProfile::Car => "car",
        }
    }

    fn lua_path(self) -> String {
        format!("/opt/{}.lua", self.name())
    }
}

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub region: GeofabrikRegion,
    pub data_root: PathBuf,
    pub profile: OsrmProfile,
}

impl DatasetConfig {
    pub fn walking(region: GeofabrikRegion, data_root: impl Into<PathBuf>) -> Self {
        Self {
            region,
            data_root: data_root.into(),
            profile: OsrmProfile::Foot,
        }
    }
}

/// A prepared (extracted, partitioned, customized) MLD dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Directory mounted as `/data` in the OSRM container.
    pub data_dir: PathBuf,
    pub osrm_base: PathBuf,
    pub pbf_path: PathBuf,
}

impl Dataset {
    /// Graph file name inside the container.
    pub fn container_graph_path(&self) -> String {
        format!("/data/{}", file_name(&self.osrm_base))
    }

    /// Prepares the dataset unless every artifact already exists.
    ///
    /// Each profile gets its own directory because extraction output is
    /// profile-specific but shares file names.
    pub fn ensure(config: &DatasetConfig) -> Result<Self, DatasetError> {
        let data_root = if config.data_root.is_absolute() {
            config.data_root.clone()
        } else {
            std::env::current_dir()?.join(&config.data_root)
        };
        let data_dir = data_root
            .join(config.region.name())
            .join(config.profile.name());
        fs::create_dir_all(&data_dir)?;

        let pbf_path = data_dir.join(format!("{}-latest.osm.pbf", config.region.name()));
        if !pbf_path.exists() {
            download(&config.region.url(), &pbf_path)?;
        }

        let osrm_base = data_dir.join(format!("{}-latest.osrm", config.region.name()));
        if !osrm_base.exists() {
            let lua = config.profile.lua_path();
            let pbf = format!("/data/{}", file_name(&pbf_path));
            run_osrm_tool(&["osrm-extract", "-p", &lua, &pbf], &data_dir)?;
        }

        let dataset = Self {
            data_dir,
            osrm_base,
            pbf_path,
        };
        if !dataset.mld_ready() {
            let graph = dataset.container_graph_path();
            run_osrm_tool(&["osrm-partition", &graph], &dataset.data_dir)?;
            run_osrm_tool(&["osrm-customize", &graph], &dataset.data_dir)?;
        }

        Ok(dataset)
    }

    pub fn mld_ready(&self) -> bool {
        ["osrm.partition", "osrm.mldgr", "osrm.cells"]
            .iter()
            .all(|ext| self.osrm_base.with_extension(ext).exists())
            && self.osrm_base.exists()
    }
}

#[derive(Debug)]
pub enum DatasetError {
    Io(io::Error),
    Http(reqwest::Error),
    ProcessFailure(String),
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetError::Io(err) => write!(f, "dataset I/O failed: {err}"),
            DatasetError::Http(err) => write!(f, "extract download failed: {err}"),
            DatasetError::ProcessFailure(detail) => write!(f, "OSRM preprocessing failed: {detail}"),
        }
    }
}

impl std::error::Error for DatasetError {}

impl From<io::Error> for DatasetError {
    fn from(err: io::Error) -> Self {
        DatasetError::Io(err)
    }
}

impl From<reqwest::Error> for DatasetError {
    fn from(err: reqwest::Error) -> Self {
        DatasetError::Http(err)
    }
}

fn download(url: &str, dest: &Path) -> Result<(), DatasetError> {
    let response = reqwest::blocking::get(url)?.error_for_status()?;
    let tmp_path = dest.with_extension("tmp");
    let mut writer = BufWriter::new(File::create(&tmp_path)?);
    writer.write_all(&response.bytes()?)?;
    writer.flush()?;
    fs::rename(tmp_path, dest)?;
    Ok(())
}

fn run_osrm_tool(args: &[&str], data_dir: &Path) -> Result<(), DatasetError> {
    let status = Command::new("docker")
        .args(["run", "--rm", "-t", "-v"])
        .arg(format!("{}:/data", data_dir.display()))
        .arg(OSRM_IMAGE)
        .args(args)
        .status()?;

    if status.success() {
        Ok(())
    } else {
        Err(DatasetError::ProcessFailure(format!(
            "{} exited with status {}",
            args.first().copied().unwrap_or("docker"),
            status
        )))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string()
}
