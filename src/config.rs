use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::geodesy::EvacuationSite;
use crate::lifecycle::LifecycleConfig;
use crate::sensor::SensorCheck;

#[derive(Debug, Clone, Parser)]
#[command(name = "floodwatch", about = "Flood incident reporting and triage service")]
pub struct Config {
    /// Address the HTTP server listens on.
    #[arg(long, env = "FLOODWATCH_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// TOML file listing evacuation sites. Uses the built-in list when absent.
    #[arg(long, env = "FLOODWATCH_SITES")]
    pub sites: Option<PathBuf>,

    #[arg(long, default_value_t = 1500)]
    pub sensor_latency_ms: u64,

    #[arg(long, default_value_t = 5000)]
    pub sensor_timeout_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub geolocation_timeout_ms: u64,

    /// Sessions untouched for this long are torn down.
    #[arg(long, env = "FLOODWATCH_SESSION_IDLE_TTL", default_value_t = 1800)]
    pub session_idle_ttl_secs: u64,
}

impl Config {
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            geolocation_timeout: Duration::from_millis(self.geolocation_timeout_ms),
            sensor: SensorCheck {
                latency: Duration::from_millis(self.sensor_latency_ms),
                timeout: Duration::from_millis(self.sensor_timeout_ms),
            },
        }
    }

    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.session_idle_ttl_secs)
    }

    pub fn load_sites(&self) -> Result<Vec<EvacuationSite>, ConfigError> {
        match &self.sites {
            Some(path) => load_sites(path),
            None => Ok(default_sites()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid site #{index}: {reason}")]
    Invalid { index: usize, reason: String },
}

#[derive(Debug, Deserialize)]
struct SitesFile {
    #[serde(default)]
    site: Vec<EvacuationSite>,
}

/// Reference evacuation sites around Metro Manila.
pub fn default_sites() -> Vec<EvacuationSite> {
    vec![
        EvacuationSite::new("Quezon City Memorial Circle", 14.6515, 121.0493),
        EvacuationSite::new("Rizal Park Evacuation Center", 14.5826, 120.9787),
        EvacuationSite::new("Marikina Sports Center", 14.6330, 121.0972),
    ]
}

pub fn load_sites(path: &Path) -> Result<Vec<EvacuationSite>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let sites = parse_sites(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate_sites(&sites)?;
    if sites.is_empty() {
        warn!(path = %path.display(), "no evacuation sites configured; triage feed will fail");
    }
    Ok(sites)
}

fn parse_sites(text: &str) -> Result<Vec<EvacuationSite>, toml::de::Error> {
    toml::from_str::<SitesFile>(text).map(|file| file.site)
}

fn validate_sites(sites: &[EvacuationSite]) -> Result<(), ConfigError> {
    for (index, site) in sites.iter().enumerate() {
        let reason = if site.name.trim().is_empty() {
            "name is empty".to_string()
        } else if let Err(err) = site.coordinate().validate() {
            err.to_string()
        } else {
            continue;
        };
        return Err(ConfigError::Invalid { index, reason });
    }
    Ok(())
}
