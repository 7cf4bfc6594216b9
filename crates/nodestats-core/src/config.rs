//! Agent configuration.
//!
//! A [`UserConfig`] holds whatever the operator supplied, from any source.
//! Sources are layered with [`UserConfig::merge`] and the result is checked
//! once by [`validate_and_build`] into the [`Config`] the agent runs with.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::sampler::SubsystemSet;

/// Default local pre-aggregation window.
pub const DEFAULT_AGGREGATION: Duration = Duration::from_secs(60);

/// Environment variables read by [`UserConfig::from_env`].
pub const ENV_POOL_ID: &str = "AZ_BATCH_POOL_ID";
pub const ENV_NODE_ID: &str = "AZ_BATCH_NODE_ID";
pub const ENV_INSTRUMENTATION_KEY: &str = "APP_INSIGHTS_INSTRUMENTATION_KEY";
pub const ENV_PROCESSES: &str = "AZ_BATCH_MONITOR_PROCESSES";

/// Default time between two samples.
pub const DEFAULT_SAMPLING_RATE: Duration = Duration::from_secs(5);

/// Configuration as supplied by the operator. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserConfig {
    pub pool_id: Option<String>,
    pub node_id: Option<String>,
    /// Telemetry ingestion key; metrics are only uploaded when set.
    pub instrumentation_key: Option<String>,
    /// Names of processes to monitor.
    pub processes: Vec<String>,
    /// Aggregation window in minutes.
    pub aggregation: Option<u64>,
    /// Subsystems to turn off.
    pub disable: Vec<String>,
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

/// Splits a comma-separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

impl UserConfig {
    /// Layer read from the process environment.
    pub fn from_env() -> UserConfig {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Layer read through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> UserConfig {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        UserConfig {
            pool_id: get(ENV_POOL_ID),
            node_id: get(ENV_NODE_ID),
            instrumentation_key: get(ENV_INSTRUMENTATION_KEY),
            processes: get(ENV_PROCESSES)
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    /// Overlays `other` on `self`. Values set in `other` win; empty strings
    /// and empty lists do not count as set.
    pub fn merge(mut self, other: UserConfig) -> UserConfig {
        if non_empty(&other.pool_id) {
            self.pool_id = other.pool_id;
        }
        if non_empty(&other.node_id) {
            self.node_id = other.node_id;
        }
        if non_empty(&other.instrumentation_key) {
            self.instrumentation_key = other.instrumentation_key;
        }
        if other.aggregation.is_some() {
            self.aggregation = other.aggregation;
        }
        if !other.processes.is_empty() {
            self.processes = other.processes;
        }
        if !other.disable.is_empty() {
            self.disable = other.disable;
        }
        self
    }
}

/// Which subsystems are turned off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DisableConfig {
    #[serde(rename = "diskIO")]
    pub disk_io: bool,
    #[serde(rename = "diskUsage")]
    pub disk_usage: bool,
    #[serde(rename = "networkIO")]
    pub network_io: bool,
    pub gpu: bool,
    pub cpu: bool,
    pub memory: bool,
}

impl DisableConfig {
    /// Parses subsystem names, ignoring case. Unknown names are logged and
    /// skipped.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Self {
        let mut disable = DisableConfig::default();
        for value in values {
            match value.as_ref().to_lowercase().as_str() {
                "diskio" => disable.disk_io = true,
                "diskusage" => disable.disk_usage = true,
                "networkio" => disable.network_io = true,
                "gpu" => disable.gpu = true,
                "cpu" => disable.cpu = true,
                "memory" => disable.memory = true,
                other => warn!("Ignoring unknown subsystem in disable list: {}", other),
            }
        }
        disable
    }

    /// The subsystems left enabled.
    pub fn enabled(&self) -> SubsystemSet {
        SubsystemSet {
            disk_io: !self.disk_io,
            disk_usage: !self.disk_usage,
            network_io: !self.network_io,
            cpu: !self.cpu,
            memory: !self.memory,
            gpu: !self.gpu,
        }
    }
}

impl fmt::Display for DisableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub pool_id: String,
    pub node_id: String,
    /// Empty when metrics are not uploaded.
    pub instrumentation_key: String,
    pub processes: Vec<String>,
    pub aggregation: Duration,
    pub sampling_rate: Duration,
    pub disable: DisableConfig,
}

impl Config {
    /// Logs the effective configuration with secrets masked.
    pub fn log_summary(&self) {
        info!("Pool ID: {}", self.pool_id);
        info!("Node ID: {}", self.node_id);
        info!("Instrumentation Key: {}", hide_secret(&self.instrumentation_key));
        info!("Aggregation: {:?}", self.aggregation);
        info!("Sampling rate: {:?}", self.sampling_rate);
        info!("Disable: {}", self.disable);
        info!("Monitoring processes: {:?}", self.processes);
    }
}

/// Configuration problems that prevent startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingPoolId,
    MissingNodeId,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingPoolId => write!(f, "Pool ID must be specified"),
            ConfigError::MissingNodeId => write!(f, "Node ID must be specified"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Checks required identifiers and fills in defaults.
pub fn validate_and_build(user: UserConfig) -> Result<Config, ConfigError> {
    let pool_id = user
        .pool_id
        .filter(|id| !id.is_empty())
        .ok_or(ConfigError::MissingPoolId)?;
    let node_id = user
        .node_id
        .filter(|id| !id.is_empty())
        .ok_or(ConfigError::MissingNodeId)?;

    let aggregation = match user.aggregation {
        None => DEFAULT_AGGREGATION,
        Some(0) => {
            warn!("Aggregation of 0 minutes is not allowed, using default");
            DEFAULT_AGGREGATION
        }
        Some(minutes) => Duration::from_secs(minutes.saturating_mul(60)),
    };

    Ok(Config {
        pool_id,
        node_id,
        instrumentation_key: user.instrumentation_key.unwrap_or_default(),
        processes: user.processes,
        aggregation,
        sampling_rate: DEFAULT_SAMPLING_RATE,
        disable: DisableConfig::parse(&user.disable),
    })
}

/// Masks a secret for display: `-` when empty, `xxxxx` otherwise.
pub fn hide_secret(secret: &str) -> &'static str {
    if secret.is_empty() { "-" } else { "xxxxx" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ids() -> UserConfig {
        UserConfig {
            pool_id: Some("pool-1".to_string()),
            node_id: Some("node-1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn build_config_with_defaults() {
        let config = validate_and_build(UserConfig {
            processes: vec!["foo.exe".to_string(), "bar".to_string()],
            ..ids()
        })
        .unwrap();

        assert_eq!(config.pool_id, "pool-1");
        assert_eq!(config.node_id, "node-1");
        assert_eq!(config.processes, vec!["foo.exe", "bar"]);
        assert_eq!(config.instrumentation_key, "");
        assert_eq!(config.aggregation, Duration::from_secs(60));
        assert_eq!(config.sampling_rate, Duration::from_secs(5));
        assert_eq!(config.disable, DisableConfig::default());
    }

    #[test]
    fn disable_list_is_case_insensitive() {
        let config = validate_and_build(UserConfig {
            disable: vec!["diskIO".to_string(), "CPU".to_string(), "bogus".to_string()],
            ..ids()
        })
        .unwrap();

        assert!(config.disable.disk_io);
        assert!(config.disable.cpu);
        assert!(!config.disable.network_io);
        assert!(!config.disable.disk_usage);
        assert!(!config.disable.memory);
        assert!(!config.disable.gpu);

        let enabled = config.disable.enabled();
        assert!(!enabled.disk_io);
        assert!(!enabled.cpu);
        assert!(enabled.memory);
    }

    #[test]
    fn missing_ids_are_rejected() {
        let err = validate_and_build(UserConfig {
            pool_id: None,
            ..ids()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingPoolId);
        assert_eq!(err.to_string(), "Pool ID must be specified");

        let err = validate_and_build(UserConfig {
            node_id: Some(String::new()),
            ..ids()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingNodeId);
    }

    #[test]
    fn aggregation_minutes() {
        let config = validate_and_build(UserConfig {
            aggregation: Some(3),
            ..ids()
        })
        .unwrap();
        assert_eq!(config.aggregation, Duration::from_secs(180));

        let config = validate_and_build(UserConfig {
            aggregation: Some(0),
            ..ids()
        })
        .unwrap();
        assert_eq!(config.aggregation, DEFAULT_AGGREGATION);
    }

    #[test]
    fn merge_prefers_set_values() {
        let base = UserConfig {
            instrumentation_key: Some("base-key".to_string()),
            processes: vec!["a".to_string()],
            aggregation: Some(2),
            ..ids()
        };
        let overlay = UserConfig {
            pool_id: Some("pool-2".to_string()),
            node_id: Some(String::new()),
            processes: vec!["b".to_string()],
            ..Default::default()
        };

        let merged = base.merge(overlay);
        assert_eq!(merged.pool_id.as_deref(), Some("pool-2"));
        assert_eq!(merged.node_id.as_deref(), Some("node-1"));
        assert_eq!(merged.instrumentation_key.as_deref(), Some("base-key"));
        assert_eq!(merged.processes, vec!["b"]);
        assert_eq!(merged.aggregation, Some(2));
        assert!(merged.disable.is_empty());
    }

    #[test]
    fn env_layer_reads_known_variables() {
        let env: HashMap<&str, &str> = [
            ("AZ_BATCH_POOL_ID", "env-pool"),
            ("AZ_BATCH_NODE_ID", ""),
            ("AZ_BATCH_MONITOR_PROCESSES", "python, worker.exe,,"),
        ]
        .into_iter()
        .collect();

        let layer = UserConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(layer.pool_id.as_deref(), Some("env-pool"));
        assert_eq!(layer.node_id, None);
        assert_eq!(layer.instrumentation_key, None);
        assert_eq!(layer.processes, vec!["python", "worker.exe"]);
        assert_eq!(layer.aggregation, None);
    }

    #[test]
    fn args_override_env_layer() {
        let env = UserConfig::from_lookup(|key| match key {
            ENV_POOL_ID => Some("env-pool".to_string()),
            ENV_NODE_ID => Some("env-node".to_string()),
            ENV_INSTRUMENTATION_KEY => Some("env-key".to_string()),
            _ => None,
        });
        let args = UserConfig {
            node_id: Some("arg-node".to_string()),
            aggregation: Some(5),
            ..Default::default()
        };

        let config = validate_and_build(env.merge(args)).unwrap();
        assert_eq!(config.pool_id, "env-pool");
        assert_eq!(config.node_id, "arg-node");
        assert_eq!(config.instrumentation_key, "env-key");
        assert_eq!(config.aggregation, Duration::from_secs(300));
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" a, b ,,c,"), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn disable_config_displays_as_json() {
        let disable = DisableConfig::parse(&["gpu", "networkIO"]);
        assert_eq!(
            disable.to_string(),
            r#"{"diskIO":false,"diskUsage":false,"networkIO":true,"gpu":true,"cpu":false,"memory":false}"#
        );
    }

    #[test]
    fn secrets_are_hidden() {
        assert_eq!(hide_secret(""), "-");
        assert_eq!(hide_secret("abc-123"), "xxxxx");
    }
}
