//! Runtime configuration for the composition root: loaded from YAML with
//! environment-variable overrides (§6, §10).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::scheduler::CronJobSpec;

fn default_db_path() -> PathBuf {
    default_home().join(".relayhive").join("relayhive.sqlite3")
}

fn default_rules_path() -> PathBuf {
    default_home().join(".relayhive").join("rules")
}

fn default_gateway_config_path() -> PathBuf {
    default_home().join(".relayhive").join("gateways.json")
}

fn default_http_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,
    #[serde(default)]
    pub heartbeat_interval_seconds: Option<f64>,
    #[serde(default)]
    pub cron_jobs: Vec<CronJobSpec>,
    #[serde(default = "default_gateway_config_path")]
    pub gateway_config_path: PathBuf,
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            rules_path: default_rules_path(),
            heartbeat_interval_seconds: None,
            cron_jobs: Vec::new(),
            gateway_config_path: default_gateway_config_path(),
            http_addr: default_http_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Loads from a YAML file if `path` is given and exists, then applies
    /// `RELAYHIVE_*` environment overrides on top — matching the
    /// teacher's config-then-env precedence.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&text)?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("RELAYHIVE_DB_PATH") {
            self.db_path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("RELAYHIVE_RULES_PATH") {
            self.rules_path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("RELAYHIVE_HEARTBEAT_INTERVAL_SECONDS") {
            if let Ok(parsed) = value.parse() {
                self.heartbeat_interval_seconds = Some(parsed);
            }
        }
        if let Ok(value) = std::env::var("RELAYHIVE_GATEWAY_CONFIG_PATH") {
            self.gateway_config_path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("RELAYHIVE_HTTP_ADDR") {
            self.http_addr = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_well_formed() {
        let config = RuntimeConfig::default();
        assert_eq!(config.http_addr, "127.0.0.1:8787");
        assert!(config.cron_jobs.is_empty());
    }

    #[test]
    fn loads_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "db_path: /tmp/custom.sqlite3\nhttp_addr: \"0.0.0.0:9000\"\n",
        )
        .unwrap();

        let config = RuntimeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/custom.sqlite3"));
        assert_eq!(config.http_addr, "0.0.0.0:9000");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = RuntimeConfig::load(Some(std::path::Path::new("/nonexistent/path.yaml"))).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }
}
