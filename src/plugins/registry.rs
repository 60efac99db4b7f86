//! Plugin registry - the process-wide catalog
//!
//! An explicitly constructed catalog object: the host creates exactly one
//! `Registry` at process start and passes it by reference to every consumer,
//! rather than hiding it behind package-level mutable state. Initialization
//! seeds built-in plugins first, then layers discovered plugins on top, so
//! disk-installed plugins take priority over built-ins of the same name.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::builtins;
use super::loader::Loader;
use super::manifest::Manifest;
use super::types::{Plugin, PluginCategory, PluginScope};

struct State {
    loader: Option<Loader>,
    plugins: HashMap<String, Plugin>,
    initialized: bool,
}

/// Catalog of all registered plugins, keyed by name.
pub struct Registry {
    state: RwLock<State>,
}

impl Registry {
    /// Create an empty, uninitialized registry.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                loader: None,
                plugins: HashMap::new(),
                initialized: false,
            }),
        }
    }

    /// Seed built-ins and run discovery. Idempotent: a second call is a
    /// no-op.
    pub fn initialize(&self, project_root: Option<PathBuf>) -> Result<()> {
        self.initialize_with_loader(Loader::new(project_root))
    }

    /// Like [`Registry::initialize`] but with a caller-supplied loader
    /// (tests, non-standard directory layouts).
    pub fn initialize_with_loader(&self, loader: Loader) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if state.initialized {
            return Ok(());
        }

        // Built-ins first; discovered plugins overwrite them by name.
        for plugin in builtins::builtin_plugins() {
            state.plugins.insert(plugin.name.clone(), plugin);
        }

        let discovered = loader.discover().context("discovering plugins")?;
        for plugin in discovered {
            state.plugins.insert(plugin.name.clone(), plugin);
        }

        state.loader = Some(loader);
        state.initialized = true;
        Ok(())
    }

    /// Whether the registry has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.state.read().unwrap().initialized
    }

    /// Register a plugin directly, replacing any existing entry of the same
    /// name. Used for built-ins and tests, independent of discovery.
    pub fn register(&self, plugin: Plugin) -> Result<()> {
        if plugin.name.is_empty() {
            return Err(anyhow!("plugin must have a name"));
        }

        let mut state = self.state.write().unwrap();
        state.plugins.insert(plugin.name.clone(), plugin);
        Ok(())
    }

    /// Remove a plugin from the catalog.
    pub fn unregister(&self, name: &str) {
        let mut state = self.state.write().unwrap();
        state.plugins.remove(name);
    }

    /// A plugin by name.
    pub fn get(&self, name: &str) -> Option<Plugin> {
        let state = self.state.read().unwrap();
        state.plugins.get(name).cloned()
    }

    /// The agent plugin providing the given agent type. Deterministic: when
    /// several plugins declare the same type, the lexicographically smallest
    /// plugin name wins.
    pub fn get_by_agent_type(&self, agent_type: &str) -> Option<Plugin> {
        let state = self.state.read().unwrap();
        state
            .plugins
            .values()
            .filter(|p| p.is_agent() && p.agent_type() == Some(agent_type))
            .min_by(|a, b| a.name.cmp(&b.name))
            .cloned()
    }

    /// The workflow plugin providing the given workflow type, with the same
    /// tie-break as [`Registry::get_by_agent_type`].
    pub fn get_by_workflow_type(&self, workflow_type: &str) -> Option<Plugin> {
        let state = self.state.read().unwrap();
        state
            .plugins
            .values()
            .filter(|p| p.is_workflow() && p.workflow_type() == Some(workflow_type))
            .min_by(|a, b| a.name.cmp(&b.name))
            .cloned()
    }

    /// All registered plugins, sorted by name.
    pub fn list(&self) -> Vec<Plugin> {
        let state = self.state.read().unwrap();
        let mut plugins: Vec<_> = state.plugins.values().cloned().collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        plugins
    }

    /// All plugins of a category, sorted by name.
    pub fn list_by_category(&self, category: PluginCategory) -> Vec<Plugin> {
        let state = self.state.read().unwrap();
        let mut plugins: Vec<_> = state
            .plugins
            .values()
            .filter(|p| p.category == category)
            .cloned()
            .collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        plugins
    }

    /// All agent plugins.
    pub fn list_agents(&self) -> Vec<Plugin> {
        self.list_by_category(PluginCategory::Agent)
    }

    /// All workflow plugins.
    pub fn list_workflows(&self) -> Vec<Plugin> {
        self.list_by_category(PluginCategory::Workflow)
    }

    /// All agent types provided by registered plugins, sorted and deduped.
    pub fn agent_types(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        let mut types: Vec<String> = state
            .plugins
            .values()
            .filter_map(|p| p.agent_type())
            .map(str::to_string)
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }

    /// All workflow types provided by registered plugins, sorted and
    /// deduped.
    pub fn workflow_types(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        let mut types: Vec<String> = state
            .plugins
            .values()
            .filter_map(|p| p.workflow_type())
            .map(str::to_string)
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }

    /// Re-run discovery and atomically replace the catalog. Built-ins are
    /// reseeded so they survive a reload unless a discovered plugin shadows
    /// them.
    pub fn reload(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();

        let loader = state
            .loader
            .as_ref()
            .ok_or_else(|| anyhow!("registry not initialized"))?;
        let discovered = loader.reload().context("reloading plugins")?;

        let mut plugins = HashMap::new();
        for plugin in builtins::builtin_plugins() {
            plugins.insert(plugin.name.clone(), plugin);
        }
        for plugin in discovered {
            plugins.insert(plugin.name.clone(), plugin);
        }

        state.plugins = plugins;
        Ok(())
    }

    /// The user plugins directory.
    pub fn user_plugins_dir(&self) -> Option<PathBuf> {
        let state = self.state.read().unwrap();
        state
            .loader
            .as_ref()
            .map(|l| l.user_plugins_dir().to_path_buf())
    }

    /// The project plugins directory, when a project root is configured.
    pub fn project_plugins_dir(&self) -> Option<PathBuf> {
        let state = self.state.read().unwrap();
        state.loader.as_ref().and_then(|l| l.project_plugins_dir())
    }

    /// Validate and register a plugin from `source_dir`, pointed at the
    /// directory the given scope would place it in. Copying the plugin tree
    /// into place is the installer front end's concern.
    pub fn install_plugin(&self, source_dir: &Path, scope: PluginScope) -> Result<Plugin> {
        let manifest = Manifest::parse(source_dir).context("parsing manifest")?;
        let category = manifest.category()?;

        let target_dir = {
            let state = self.state.read().unwrap();
            let loader = state
                .loader
                .as_ref()
                .ok_or_else(|| anyhow!("registry not initialized"))?;

            match scope {
                PluginScope::Project => {
                    loader.ensure_project_plugins_dir()?;
                    loader
                        .project_plugins_dir()
                        .ok_or_else(|| anyhow!("no project root set"))?
                        .join(&manifest.name)
                }
                PluginScope::User => {
                    loader.ensure_user_plugins_dir()?;
                    loader.user_plugins_dir().join(&manifest.name)
                }
                PluginScope::Builtin => {
                    return Err(anyhow!("cannot install a plugin with builtin scope"));
                }
            }
        };

        let binary_path = manifest.binary_path(&target_dir)?;

        let plugin = Plugin {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            category,
            manifest,
            path: target_dir,
            scope,
            binary_path,
            config: HashMap::new(),
        };

        self.register(plugin.clone())
            .context("registering plugin")?;

        Ok(plugin)
    }

    /// Remove a plugin from the catalog. Built-in plugins cannot be
    /// uninstalled; the catalog is left unchanged and an error returned.
    pub fn uninstall_plugin(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();

        let plugin = state
            .plugins
            .get(name)
            .ok_or_else(|| anyhow!("plugin {:?} not found", name))?;

        if plugin.scope == PluginScope::Builtin {
            return Err(anyhow!("cannot uninstall built-in plugin {:?}", name));
        }

        state.plugins.remove(name);
        Ok(())
    }

    /// Merge keys into a plugin's configuration map. Existing keys not named
    /// in `config` are kept.
    pub fn update_plugin_config(
        &self,
        name: &str,
        config: HashMap<String, toml::Value>,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();

        let plugin = state
            .plugins
            .get_mut(name)
            .ok_or_else(|| anyhow!("plugin {:?} not found", name))?;

        plugin.config.extend(config);
        Ok(())
    }

    /// A plugin's configuration map.
    pub fn plugin_config(&self, name: &str) -> Option<HashMap<String, toml::Value>> {
        let state = self.state.read().unwrap();
        state.plugins.get(name).map(|p| p.config.clone())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn empty_loader() -> (Loader, TempDir) {
        let dir = TempDir::new().unwrap();
        let loader =
            Loader::new(None).with_user_plugins_dir(dir.path().join("plugins"));
        (loader, dir)
    }

    #[test]
    fn initialize_is_idempotent() {
        let registry = Registry::new();
        let (loader, _dir) = empty_loader();

        registry.initialize_with_loader(loader).unwrap();
        let first_count = registry.list().len();
        assert!(first_count > 0);

        registry.initialize(None).unwrap();
        assert_eq!(registry.list().len(), first_count);
    }

    #[test]
    fn builtins_cannot_be_uninstalled() {
        let registry = Registry::new();
        let (loader, _dir) = empty_loader();
        registry.initialize_with_loader(loader).unwrap();

        let err = registry.uninstall_plugin("claude").unwrap_err();
        assert!(err.to_string().contains("built-in"));
        assert!(registry.get("claude").is_some());
    }

    #[test]
    fn user_scope_plugins_can_be_uninstalled() {
        let registry = Registry::new();
        let (loader, _dir) = empty_loader();
        registry.initialize_with_loader(loader).unwrap();

        let mut plugin = crate::plugins::builtins::builtin_plugins().remove(0);
        plugin.name = "local-agent".to_string();
        plugin.scope = PluginScope::User;
        registry.register(plugin).unwrap();

        registry.uninstall_plugin("local-agent").unwrap();
        assert!(registry.get("local-agent").is_none());
    }

    #[test]
    fn config_update_merges_keys() {
        let registry = Registry::new();
        let (loader, _dir) = empty_loader();
        registry.initialize_with_loader(loader).unwrap();

        let mut first = HashMap::new();
        first.insert("work_dir".to_string(), toml::Value::String("/tmp".into()));
        registry.update_plugin_config("claude", first).unwrap();

        let mut second = HashMap::new();
        second.insert("timeout".to_string(), toml::Value::Integer(120));
        registry.update_plugin_config("claude", second).unwrap();

        let config = registry.plugin_config("claude").unwrap();
        assert_eq!(config.len(), 2);
        assert_eq!(
            config.get("work_dir"),
            Some(&toml::Value::String("/tmp".into()))
        );
    }

    #[test]
    fn unknown_plugin_config_update_fails() {
        let registry = Registry::new();
        let (loader, _dir) = empty_loader();
        registry.initialize_with_loader(loader).unwrap();

        assert!(registry
            .update_plugin_config("nope", HashMap::new())
            .is_err());
    }
}
