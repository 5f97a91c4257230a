use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineError;
use crate::grid::{parse_clock, GridConfig, TimeGrid};
use crate::limits::*;
use crate::model::Company;

const DEFAULT_COMPANIES: &str =
    "C1:Quick Fix Plumbing,C2:Professional Drain Services,C3:Emergency Plumbing 24/7";

/// Scheduling parameters. Validated once when the engine is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub grid: GridConfig,
    pub hold_ttl: Duration,
    pub sweep_interval: Duration,
    /// Ordered. The order is the tie-break wherever several companies qualify.
    pub companies: Vec<Company>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            hold_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(10),
            companies: default_companies(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<TimeGrid, EngineError> {
        let grid = TimeGrid::new(&self.grid)?;
        if self.hold_ttl.is_zero() {
            return Err(EngineError::InvalidConfig("hold TTL must be positive".into()));
        }
        if self.hold_ttl > MAX_HOLD_TTL {
            return Err(EngineError::LimitExceeded("hold TTL too long"));
        }
        if self.sweep_interval.is_zero() {
            return Err(EngineError::InvalidConfig("sweep interval must be positive".into()));
        }
        // staleness of an expired hold is bounded by one sweep interval
        if self
            .sweep_interval
            .checked_mul(10)
            .is_none_or(|ten| ten > self.hold_ttl)
        {
            return Err(EngineError::InvalidConfig(format!(
                "sweep interval {:?} exceeds a tenth of the hold TTL {:?}",
                self.sweep_interval, self.hold_ttl
            )));
        }
        if self.companies.is_empty() {
            return Err(EngineError::InvalidConfig("no companies configured".into()));
        }
        if self.companies.len() > MAX_COMPANIES {
            return Err(EngineError::LimitExceeded("too many companies"));
        }
        let mut seen = HashSet::new();
        for company in &self.companies {
            if company.id.as_str().is_empty() || company.id.as_str().len() > MAX_COMPANY_ID_LEN {
                return Err(EngineError::InvalidConfig(format!(
                    "company id {:?} is empty or too long",
                    company.id.as_str()
                )));
            }
            if company.name.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("company name too long"));
            }
            if !seen.insert(&company.id) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate company id {}",
                    company.id
                )));
            }
        }
        Ok(grid)
    }
}

/// Process settings read from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub snapshot_interval: Duration,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        let defaults = EngineConfig::default();
        let work_start = match std::env::var("SLOTBOOK_WORK_START") {
            Ok(s) => parse_clock(&s)?,
            Err(_) => defaults.grid.work_start,
        };
        let work_end = match std::env::var("SLOTBOOK_WORK_END") {
            Ok(s) => parse_clock(&s)?,
            Err(_) => defaults.grid.work_end,
        };
        let companies = match std::env::var("SLOTBOOK_COMPANIES") {
            Ok(s) => parse_companies(&s)?,
            Err(_) => defaults.companies,
        };

        let engine = EngineConfig {
            grid: GridConfig {
                work_start,
                work_end,
                slot_minutes: env_or("SLOTBOOK_SLOT_MINUTES", defaults.grid.slot_minutes),
            },
            hold_ttl: Duration::from_secs(env_or(
                "SLOTBOOK_HOLD_TTL_SECS",
                defaults.hold_ttl.as_secs(),
            )),
            sweep_interval: Duration::from_secs(env_or(
                "SLOTBOOK_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            companies,
        };

        Ok(Self {
            bind: std::env::var("SLOTBOOK_BIND").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("SLOTBOOK_PORT", 7401),
            data_dir: PathBuf::from(
                std::env::var("SLOTBOOK_DATA_DIR").unwrap_or_else(|_| "./data".into()),
            ),
            max_connections: env_or("SLOTBOOK_MAX_CONNECTIONS", 256),
            metrics_port: std::env::var("SLOTBOOK_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            snapshot_interval: Duration::from_secs(env_or("SLOTBOOK_SNAPSHOT_INTERVAL_SECS", 5)),
            engine,
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.snapshot")
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse `ID:Name,ID:Name`. Order is preserved.
pub fn parse_companies(s: &str) -> Result<Vec<Company>, EngineError> {
    s.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((id, name)) if !id.trim().is_empty() => Ok(Company::new(id.trim(), name.trim())),
            _ => Err(EngineError::InvalidConfig(format!(
                "company entry {entry:?} is not ID:Name"
            ))),
        })
        .collect()
}

pub fn default_companies() -> Vec<Company> {
    parse_companies(DEFAULT_COMPANIES).unwrap_or_default()
}
