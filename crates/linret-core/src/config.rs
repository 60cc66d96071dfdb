//! Persisted JSON configuration: every key and default mirrors the
//! deployment's config file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::adc::AdcConfig;
use crate::error::LinretError;
use crate::types::IfType;

fn default_web_ui_port() -> u16 {
    8000
}

fn default_cs_port() -> u16 {
    56987
}

fn default_eth_iface() -> String {
    "eth2".to_string()
}

fn default_lr_number() -> u8 {
    1
}

fn default_nodes_discover_period() -> f64 {
    1.0
}

fn default_delay_between_requests() -> f64 {
    0.15
}

fn default_delay_before_request() -> f64 {
    2.4
}

fn default_max_nodes_per_interface() -> BTreeMap<String, u8> {
    let mut map = BTreeMap::new();
    map.insert(IfType::Local.name().to_string(), 1);
    map.insert(IfType::Wifi0.name().to_string(), 0);
    map.insert(IfType::Wifi1.name().to_string(), 0);
    map.insert(IfType::Wired0.name().to_string(), 0);
    map.insert(IfType::Wired1.name().to_string(), 0);
    map
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbConfig {
    pub url: String,
    pub db_name: String,
    pub data_collection: String,
    pub timecache_collection: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            url: "mongodb://localhost:27017".to_string(),
            db_name: "linret".to_string(),
            data_collection: "data".to_string(),
            timecache_collection: "timecache".to_string(),
        }
    }
}

fn default_db_config() -> DbConfig {
    DbConfig::default()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NodeTimeoutsConfig {
    #[serde(default = "default_node_total_lifetime")]
    pub node_total_lifetime: f64,
    #[serde(default = "default_packet_wait_timeout")]
    pub packet_wait_timeout: f64,
    #[serde(default = "default_packet_lifetime")]
    pub packet_lifetime: f64,
}

fn default_node_total_lifetime() -> f64 {
    10.0
}

fn default_packet_wait_timeout() -> f64 {
    0.15
}

fn default_packet_lifetime() -> f64 {
    0.75
}

impl Default for NodeTimeoutsConfig {
    fn default() -> Self {
        NodeTimeoutsConfig {
            node_total_lifetime: default_node_total_lifetime(),
            packet_wait_timeout: default_packet_wait_timeout(),
            packet_lifetime: default_packet_lifetime(),
        }
    }
}

fn default_node_timeouts() -> NodeTimeoutsConfig {
    NodeTimeoutsConfig::default()
}

/// Persisted configuration. Every field carries its own
/// default so a partially-written config file still loads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_web_ui_port")]
    pub web_ui_port: u16,
    #[serde(default = "default_cs_port")]
    pub cs_port: u16,
    #[serde(default = "default_eth_iface")]
    pub eth_iface: String,
    #[serde(default = "default_lr_number")]
    pub lr_number: u8,
    #[serde(default)]
    pub chassis_mac: String,
    #[serde(default = "default_db_config")]
    pub db_config: DbConfig,
    #[serde(default)]
    pub auto_request_data: bool,
    #[serde(default)]
    pub use_system_time: bool,
    #[serde(default = "default_max_nodes_per_interface")]
    pub max_nodes_per_interface: BTreeMap<String, u8>,
    #[serde(default = "default_nodes_discover_period")]
    pub nodes_discover_period: f64,
    #[serde(default = "default_node_timeouts")]
    pub node_timeouts: NodeTimeoutsConfig,
    #[serde(default = "default_delay_between_requests")]
    pub delay_between_requests: f64,
    #[serde(default = "default_delay_before_request")]
    pub delay_before_request: f64,
    /// Stored as the raw JSON form; converted
    /// through `AdcConfig::to_json`/`from_json` at the point of use.
    #[serde(default)]
    pub latest_adc_config: Option<serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            web_ui_port: default_web_ui_port(),
            cs_port: default_cs_port(),
            eth_iface: default_eth_iface(),
            lr_number: default_lr_number(),
            chassis_mac: String::new(),
            db_config: default_db_config(),
            auto_request_data: false,
            use_system_time: false,
            max_nodes_per_interface: default_max_nodes_per_interface(),
            nodes_discover_period: default_nodes_discover_period(),
            node_timeouts: default_node_timeouts(),
            delay_between_requests: default_delay_between_requests(),
            delay_before_request: default_delay_before_request(),
            latest_adc_config: None,
        }
    }
}

impl Config {
    /// Reads and parses `path`. A missing file or parse failure falls back
    /// to all-defaults and is logged at `error!`, mirroring the reference's
    /// `load_config`.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                log::error!("could not read config {}: {e}, using defaults", path.display());
                return Config::default();
            }
        };
        match serde_json::from_str::<Config>(&text) {
            Ok(cfg) => {
                if let Err(e) = cfg.write_back(path) {
                    log::warn!("failed to write back merged config: {e}");
                }
                cfg
            }
            Err(e) => {
                log::error!("could not parse config {}: {e}, using defaults", path.display());
                Config::default()
            }
        }
    }

    /// Re-serializes the (possibly defaulted) document to disk, matching the
    /// reference's per-getter write-back of missing keys.
    pub fn write_back(&self, path: &Path) -> Result<(), LinretError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| LinretError::ConfigError(e.to_string()))?;
        fs::write(path, text).map_err(|e| LinretError::ConfigError(e.to_string()))
    }

    pub fn max_addr(&self, if_type: IfType) -> u8 {
        self.max_nodes_per_interface.get(if_type.name()).copied().unwrap_or(0)
    }

    pub fn latest_adc_config(&self) -> Option<AdcConfig> {
        self.latest_adc_config.as_ref().and_then(|v| AdcConfig::from_json(v).ok())
    }

    pub fn set_latest_adc_config(&mut self, cfg: AdcConfig) {
        self.latest_adc_config = Some(cfg.to_json());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.web_ui_port, 8000);
        assert_eq!(cfg.cs_port, 56987);
        assert_eq!(cfg.eth_iface, "eth2");
        assert_eq!(cfg.lr_number, 1);
        assert_eq!(cfg.node_timeouts.node_total_lifetime, 10.0);
        assert_eq!(cfg.node_timeouts.packet_wait_timeout, 0.15);
        assert_eq!(cfg.node_timeouts.packet_lifetime, 0.75);
        assert_eq!(cfg.delay_between_requests, 0.15);
        assert_eq!(cfg.delay_before_request, 2.4);
        assert_eq!(cfg.max_addr(IfType::Local), 1);
        assert_eq!(cfg.max_addr(IfType::Wifi0), 0);
    }

    #[test]
    fn partial_document_fills_in_defaults() {
        let partial = r#"{"lr_number": 3}"#;
        let cfg: Config = serde_json::from_str(partial).unwrap();
        assert_eq!(cfg.lr_number, 3);
        assert_eq!(cfg.web_ui_port, 8000);
        assert_eq!(cfg.node_timeouts.packet_lifetime, 0.75);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/linret-config-test.json"));
        assert_eq!(cfg, Config::default());
    }
}
