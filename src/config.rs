//! YAML configuration loading.
//!
//! Per `spec.md` §6: "YAML with keys `speed_factor`, `modbus.port`,
//! `tick_interval_ms`, `microstop.rates`, `breakdowns`, hierarchy ids,
//! log path." The SKU catalogue and schedule themselves are produced
//! by an external collaborator (the master-data workbook loader, out
//! of scope per `spec.md` §1); here that collaborator is stood in by
//! two sibling YAML files whose paths are part of this configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::domain::{Schedule, ScheduledBlock, Sku};
use crate::error::{SimError, SimResult};
use crate::events::Hierarchy;

fn default_fallback_port() -> u16 {
    crate::constants::FALLBACK_MODBUS_PORT
}

fn default_idle_timeout_sec() -> u64 {
    crate::constants::DEFAULT_MODBUS_IDLE_TIMEOUT_SEC
}

fn default_tick_interval_ms() -> u64 {
    crate::constants::DEFAULT_TICK_INTERVAL_MS
}

fn default_microstop_rate_multiplier() -> f64 {
    1.0
}

fn default_sim_id() -> String {
    "bottling-sim-1".to_string()
}

fn default_log_path() -> PathBuf {
    PathBuf::from("logs/transactions.jsonl")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusConfig {
    pub port: u16,
    #[serde(default = "default_fallback_port")]
    pub fallback_port: u16,
    /// Per-request read idle timeout, in seconds; a connection with no
    /// bytes read within this window is closed.
    #[serde(default = "default_idle_timeout_sec")]
    pub idle_timeout_sec: u64,
}

impl ModbusConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_sec)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MicrostopConfig {
    /// Scales every microstop's per-tick trigger probability uniformly.
    /// 1.0 reproduces the rates in `domain::microstops`; 0.0 disables
    /// microstops entirely (used by the deterministic scenario tests).
    #[serde(default = "default_microstop_rate_multiplier")]
    pub rate_multiplier: f64,
}

/// The full set of tunables an operator supplies at startup, per
/// `spec.md` §6's "Configuration inputs" list.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub speed_factor: f64,
    pub modbus: ModbusConfig,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub microstop: MicrostopConfig,
    pub hierarchy: Hierarchy,
    #[serde(default = "default_sim_id")]
    pub sim_id: String,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Path to the SKU catalogue YAML, standing in for the master-data
    /// workbook loader.
    pub skus_path: PathBuf,
    /// Path to the schedule YAML, standing in for the week-schedule
    /// loader.
    pub schedule_path: PathBuf,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SimError::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| SimError::config(format!("invalid config YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> SimResult<()> {
        if !(self.speed_factor.is_finite() && self.speed_factor > 0.0) {
            return Err(SimError::config(format!(
                "speed_factor must be a positive finite number, got {}",
                self.speed_factor
            )));
        }
        if self.modbus.port == 0 {
            return Err(SimError::config("modbus.port must be nonzero"));
        }
        if self.tick_interval_ms == 0 {
            return Err(SimError::config("tick_interval_ms must be nonzero"));
        }
        if self.modbus.idle_timeout_sec == 0 {
            return Err(SimError::config("modbus.idle_timeout_sec must be nonzero"));
        }
        Ok(())
    }

    /// Load the SKU catalogue referenced by [`Self::skus_path`].
    pub fn load_skus(&self) -> SimResult<Vec<Sku>> {
        load_yaml(&self.skus_path)
    }

    /// Load and validate the schedule referenced by [`Self::schedule_path`].
    pub fn load_schedule(&self) -> SimResult<Schedule> {
        let blocks: Vec<ScheduledBlock> = load_yaml(&self.schedule_path)?;
        Schedule::new(blocks)
    }
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> SimResult<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SimError::config(format!("failed to read {}: {e}", path.display()))
    })?;
    serde_yaml::from_str(&raw).map_err(|e| {
        SimError::config(format!("invalid YAML in {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str, name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("bottling_sim_config_test_{name}_{}.yaml", ulid::Ulid::new()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_minimal_valid_config() {
        let path = write_temp(
            r#"
speed_factor: 600.0
modbus:
  port: 502
hierarchy:
  enterprise: ACME
  site: SITE1
  area: BOTTLING
  line: LINE1
skus_path: skus.yaml
schedule_path: schedule.yaml
"#,
            "minimal",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.speed_factor, 600.0);
        assert_eq!(config.modbus.port, 502);
        assert_eq!(config.modbus.fallback_port, crate::constants::FALLBACK_MODBUS_PORT);
        assert_eq!(config.tick_interval_ms, crate::constants::DEFAULT_TICK_INTERVAL_MS);
        assert_eq!(
            config.modbus.idle_timeout_sec,
            crate::constants::DEFAULT_MODBUS_IDLE_TIMEOUT_SEC
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_non_positive_speed_factor() {
        let path = write_temp(
            r#"
speed_factor: -1.0
modbus:
  port: 502
hierarchy: {enterprise: A, site: B, area: C, line: D}
skus_path: skus.yaml
schedule_path: schedule.yaml
"#,
            "bad_speed",
        );
        assert!(Config::load(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
