// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Control Plane Configuration
//
// Defines the configuration schema for a swarm control plane process:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - In-process bus sizing
// - Optional PostgreSQL persistence
// - Overseer trust valve and task deadlines
// - Trigger engine tenancy and audit history
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const API_VERSION: &str = "swarm-control/v1";
pub const KIND: &str = "ControlPlaneConfig";

/// Top-level Kubernetes-style control plane manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// API version (must be "swarm-control/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ControlPlaneConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ControlPlaneSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable instance name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneSpec {
    #[serde(default)]
    pub bus: BusConfig,

    /// Absent means no database: the trigger store refuses CRUD and matches nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub overseer: OverseerConfig,

    #[serde(default)]
    pub triggers: TriggersConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-subscriber buffer before a slow consumer starts lagging
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverseerConfig {
    /// Scored telemetry below this is routed to human review
    #[serde(default = "default_auto_execute_threshold")]
    pub auto_execute_threshold: f64,

    /// `meta.source_node` stamped on outbound command envelopes
    #[serde(default = "default_source_node")]
    pub source_node: String,

    #[serde(default = "default_task_timeout")]
    pub default_task_timeout_seconds: u64,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            auto_execute_threshold: default_auto_execute_threshold(),
            source_node: default_source_node(),
            default_task_timeout_seconds: default_task_timeout(),
        }
    }
}

impl OverseerConfig {
    pub fn default_task_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.default_task_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggersConfig {
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// Default page size for execution history queries
    #[serde(default = "default_execution_history_limit")]
    pub execution_history_limit: usize,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            tenant_id: default_tenant_id(),
            execution_history_limit: default_execution_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus scrape port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_bus_capacity() -> usize {
    1024
}

fn default_max_connections() -> u32 {
    5
}

fn default_auto_execute_threshold() -> f64 {
    0.7
}

fn default_source_node() -> String {
    "overseer".to_string()
}

fn default_task_timeout() -> u64 {
    30
}

fn default_tenant_id() -> String {
    crate::domain::trigger::DEFAULT_TENANT_ID.to_string()
}

fn default_execution_history_limit() -> usize {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "swarm-control".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: ControlPlaneSpec::default(),
        }
    }
}

impl ControlPlaneConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        std::fs::write(path, self.to_yaml_string()?)?;
        Ok(())
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SWARM_CONFIG_PATH environment variable
    /// 2. ./swarm-config.yaml (working directory)
    /// 3. ~/.swarm/config.yaml (user home)
    /// 4. /etc/swarm/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SWARM_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./swarm-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".swarm").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/swarm/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails loudly if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Logging section of the file `load_or_default` would pick, read without
    /// emitting any log lines. Falls back to defaults when the file is absent
    /// or unreadable; `load_or_default` reports those problems later.
    pub fn peek_logging(cli_path: Option<&Path>) -> LoggingConfig {
        cli_path
            .map(Path::to_path_buf)
            .or_else(Self::discover_config)
            .and_then(|path| Self::from_yaml_file(path).ok())
            .map(|config| config.spec.observability.logging)
            .unwrap_or_default()
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SWARM_DATABASE_URL").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: SWARM_DATABASE_URL");
            match self.spec.database.as_mut() {
                Some(db) => db.url = url,
                None => {
                    self.spec.database = Some(DatabaseConfig {
                        url,
                        max_connections: default_max_connections(),
                    })
                }
            }
        }

        if let Some(val) = lookup("SWARM_AUTO_EXECUTE_THRESHOLD") {
            match val.trim().parse::<f64>() {
                Ok(threshold) => {
                    tracing::info!("Environment override: SWARM_AUTO_EXECUTE_THRESHOLD={}", threshold);
                    self.spec.overseer.auto_execute_threshold = threshold;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for SWARM_AUTO_EXECUTE_THRESHOLD: '{}'. Expected a number. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Some(tenant) = lookup("SWARM_TENANT_ID").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: SWARM_TENANT_ID={}", tenant);
            self.spec.triggers.tenant_id = tenant;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.bus.capacity == 0 {
            anyhow::bail!("spec.bus.capacity must be greater than zero");
        }

        let threshold = self.spec.overseer.auto_execute_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!(
                "spec.overseer.auto_execute_threshold must be within [0, 1], got {}",
                threshold
            );
        }

        if self.spec.overseer.source_node.is_empty() {
            anyhow::bail!("spec.overseer.source_node cannot be empty");
        }

        if self.spec.triggers.tenant_id.is_empty() {
            anyhow::bail!("spec.triggers.tenant_id cannot be empty");
        }

        if let Some(db) = &self.spec.database {
            if db.url.is_empty() {
                anyhow::bail!("spec.database.url cannot be empty");
            }
            if db.max_connections == 0 {
                anyhow::bail!("spec.database.max_connections must be greater than zero");
            }
        }

        match self.spec.observability.logging.format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!(
                "Invalid spec.observability.logging.format: '{}'. Must be 'json' or 'text'",
                other
            ),
        }

        Ok(())
    }
}
