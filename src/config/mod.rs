//! Configuration management for looper
//!
//! Loads `<project>/.looper/looper.toml` and exposes the parts the plugin
//! subsystem consumes: default execution settings and the per-plugin
//! `[plugins.<name>]` configuration tables that get merged into the catalog
//! via [`Registry::update_plugin_config`](crate::plugins::Registry).
//! Hierarchical/global config merging is out of scope here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::looperdir;
use crate::plugins::Registry;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub agents: AgentsConfig,

    /// Per-plugin settings, keyed by plugin name. Values are injected into
    /// the plugin's environment on execution.
    pub plugins: HashMap<String, HashMap<String, toml::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Default agent type used by the task loop.
    pub default_type: String,

    /// Default plugin execution timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default_type: "claude".to_string(),
            timeout_secs: 30 * 60,
        }
    }
}

impl Config {
    /// Load the project config, returning defaults when no config file
    /// exists.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = looperdir::config_path(project_root);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("reading config: {}", path.display())));
            }
        };

        toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))
    }

    /// Push the `[plugins.<name>]` tables into the registry. Settings for
    /// plugins that are not in the catalog are skipped with a warning.
    pub fn apply_plugin_config(&self, registry: &Registry) {
        for (name, settings) in &self.plugins {
            if let Err(err) = registry.update_plugin_config(name, settings.clone()) {
                tracing::warn!(plugin = %name, error = %err, "skipping plugin config");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_yields_defaults() {
        let root = TempDir::new().unwrap();
        let config = Config::load(root.path()).unwrap();
        assert_eq!(config.agents.default_type, "claude");
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn plugin_tables_are_parsed() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(looperdir::dir_path(root.path())).unwrap();
        std::fs::write(
            looperdir::config_path(root.path()),
            r#"
[agents]
default_type = "codex"

[plugins.my-agent]
work_dir = "/tmp/work"
timeout = 120
"#,
        )
        .unwrap();

        let config = Config::load(root.path()).unwrap();
        assert_eq!(config.agents.default_type, "codex");

        let settings = config.plugins.get("my-agent").unwrap();
        assert_eq!(
            settings.get("work_dir"),
            Some(&toml::Value::String("/tmp/work".into()))
        );
        assert_eq!(settings.get("timeout"), Some(&toml::Value::Integer(120)));
    }

    #[test]
    fn apply_pushes_settings_into_registry() {
        let registry = Registry::new();
        let user = TempDir::new().unwrap();
        let loader = crate::plugins::Loader::new(None)
            .with_user_plugins_dir(user.path().to_path_buf());
        registry.initialize_with_loader(loader).unwrap();

        let mut config = Config::default();
        let mut settings = HashMap::new();
        settings.insert("verbose".to_string(), toml::Value::Boolean(true));
        config.plugins.insert("claude".to_string(), settings);
        // Unknown plugin settings must not fail the whole apply.
        config
            .plugins
            .insert("unknown".to_string(), HashMap::new());

        config.apply_plugin_config(&registry);

        let applied = registry.plugin_config("claude").unwrap();
        assert_eq!(applied.get("verbose"), Some(&toml::Value::Boolean(true)));
    }
}
