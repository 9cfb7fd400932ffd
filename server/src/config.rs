use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Context};
use ride_tracker_lib::{
    cost::{DEFAULT_FUEL_PRICE_PER_LITER, DEFAULT_VEHICLE_KM_PER_LITER},
    CostConfig,
};
use tracing::{info, warn};

pub const DEFAULT_LOG_DIR: &str = "server/log";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

pub struct ServerConfig {
    pub port: u16,
    /// Falls back to the data crate's default location when unset.
    pub database: Option<PathBuf>,
    pub static_dir: PathBuf,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub cost: CostConfig,
    pub tls: Option<TlsPaths>,
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let cost = CostConfig::new(
            try_load("FUEL_PRICE_PER_LITER", DEFAULT_FUEL_PRICE_PER_LITER)?,
            try_load("VEHICLE_KM_PER_LITER", DEFAULT_VEHICLE_KM_PER_LITER)?,
        )
        .context("Environment misconfigured")?;

        let tls = match (optional("RIDE_TLS_CERT"), optional("RIDE_TLS_KEY")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => return Err(anyhow!("RIDE_TLS_CERT and RIDE_TLS_KEY must be set together")),
        };

        let gemini_api_key = optional("GEMINI_API_KEY");
        if gemini_api_key.is_none() {
            warn!("GEMINI_API_KEY not set, odometer scanning is disabled");
        }

        Ok(Self {
            port: try_load("RIDE_PORT", 3000)?,
            database: optional("RIDE_DATABASE").map(PathBuf::from),
            static_dir: PathBuf::from(try_load("RIDE_STATIC_DIR", "frontend/dist".to_string())?),
            gemini_api_key,
            gemini_model: try_load("GEMINI_MODEL", DEFAULT_GEMINI_MODEL.to_string())?,
            cost,
            tls,
        })
    }
}

/// Read before logging is set up, so nothing is logged here.
pub fn log_dir() -> PathBuf {
    env::var("RIDE_LOG_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|e| {
            warn!("Invalid {key} value: {e}");
            anyhow!("Environment misconfigured: {key}={value}")
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
