//! AgentForge configuration system.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ForgeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentForgeConfig {
    /// Model hint forwarded to the task processor.
    #[serde(default = "default_agent_model")]
    pub agent_model: String,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_agent_model() -> String { "claude-3-5-haiku-20241022".into() }

impl Default for AgentForgeConfig {
    fn default() -> Self {
        Self {
            agent_model: default_agent_model(),
            runtime: RuntimeConfig::default(),
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AgentForgeConfig {
    /// Load config from `path`, falling back to defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ForgeError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ForgeError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ForgeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.runtime.max_concurrency == 0 {
            return Err(ForgeError::Config("runtime.max_concurrency must be >= 1".into()));
        }
        if self.queue.default_max_attempts == 0 {
            return Err(ForgeError::Config("queue.default_max_attempts must be >= 1".into()));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(ForgeError::Config("scheduler.poll_interval_secs must be >= 1".into()));
        }
        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub autoscale: AutoscaleConfig,
    /// `running` tasks untouched for this long are requeued when a dispatcher starts. 0 disables.
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,
}

fn default_concurrency() -> usize { 10 }
fn default_max_concurrency() -> usize { 500 }
fn default_orphan_grace_secs() -> u64 { 300 }

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            max_concurrency: default_max_concurrency(),
            autoscale: AutoscaleConfig::default(),
            orphan_grace_secs: default_orphan_grace_secs(),
        }
    }
}

/// Autoscaling thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscaleConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_scale_up_pending_per_worker")]
    pub scale_up_pending_per_worker: usize,
    #[serde(default = "default_scale_down_idle_cycles")]
    pub scale_down_idle_cycles: u32,
}

fn bool_true() -> bool { true }
fn default_scale_up_pending_per_worker() -> usize { 2 }
fn default_scale_down_idle_cycles() -> u32 { 3 }

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scale_up_pending_per_worker: default_scale_up_pending_per_worker(),
            scale_down_idle_cycles: default_scale_down_idle_cycles(),
        }
    }
}

/// Queue defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
}

fn default_max_attempts() -> u32 { 3 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self { default_max_attempts: default_max_attempts() }
    }
}

/// Schedule loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

fn default_poll_interval_secs() -> u64 { 5 }
fn default_timezone() -> String { "UTC".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            default_timezone: default_timezone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentForgeConfig::default();
        assert_eq!(config.runtime.default_concurrency, 10);
        assert_eq!(config.runtime.max_concurrency, 500);
        assert!(config.runtime.autoscale.enabled);
        assert_eq!(config.runtime.autoscale.scale_up_pending_per_worker, 2);
        assert_eq!(config.runtime.autoscale.scale_down_idle_cycles, 3);
        assert_eq!(config.queue.default_max_attempts, 3);
        assert_eq!(config.scheduler.poll_interval_secs, 5);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            agent_model = "claude-3-opus-20240229"

            [runtime]
            default_concurrency = 4

            [runtime.autoscale]
            enabled = false
        "#;

        let config: AgentForgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent_model, "claude-3-opus-20240229");
        assert_eq!(config.runtime.default_concurrency, 4);
        assert_eq!(config.runtime.max_concurrency, 500);
        assert!(!config.runtime.autoscale.enabled);
        assert_eq!(config.runtime.autoscale.scale_down_idle_cycles, 3);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: AgentForgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.agent_model, "claude-3-5-haiku-20241022");
        assert_eq!(config.scheduler.default_timezone, "UTC");
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentForgeConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.runtime.default_concurrency, 10);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AgentForgeConfig::default();
        config.runtime.max_concurrency = 32;
        config.save_to(&path).unwrap();

        let loaded = AgentForgeConfig::load_from(&path).unwrap();
        assert_eq!(loaded.runtime.max_concurrency, 32);
    }

    #[test]
    fn test_rejects_zero_max_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[runtime]\nmax_concurrency = 0\n").unwrap();
        let err = AgentForgeConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }
}
