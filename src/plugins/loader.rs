//! Plugin discovery and loading
//!
//! Scans two directory scopes - user (`~/.looper/plugins`) and project
//! (`<root>/.looper/plugins`) - parsing one manifest per subdirectory.
//! Project entries replace user entries of the same name in full; the merge
//! runs under an exclusive lock so readers never observe a partially-merged
//! catalog. A directory that fails to parse is skipped so one broken plugin
//! cannot block discovery of its siblings.

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::looperdir;

use super::manifest::Manifest;
use super::types::{Plugin, PluginCategory, PluginScope};

/// Discovers and loads plugins from the user and project scopes.
pub struct Loader {
    /// Path to the user plugins directory (`~/.looper/plugins`).
    user_plugins_dir: PathBuf,

    /// Current project root; project plugins are not loaded when unset.
    project_root: Option<PathBuf>,

    /// All loaded plugins indexed by name.
    plugins: RwLock<HashMap<String, Plugin>>,
}

impl Loader {
    /// Create a new loader. The user scope root defaults to
    /// `~/.looper/plugins`.
    pub fn new(project_root: Option<PathBuf>) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let user_plugins_dir = home.join(looperdir::DIR).join(looperdir::PLUGINS_DIR);

        Self {
            user_plugins_dir,
            project_root,
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// Override the user plugins directory (tests, non-standard layouts).
    pub fn with_user_plugins_dir(mut self, dir: PathBuf) -> Self {
        self.user_plugins_dir = dir;
        self
    }

    /// Discover and load plugins from both scopes, replacing the current
    /// catalog. Project-scoped plugins override user-scoped plugins with
    /// the same name. Returns the merged set.
    pub fn discover(&self) -> Result<Vec<Plugin>> {
        // Exclusive for the whole scan + merge + swap so no reader sees a
        // half-built catalog.
        let mut catalog = self.plugins.write().unwrap();

        let mut merged: HashMap<String, Plugin> = HashMap::new();

        for plugin in load_plugins_from_dir(&self.user_plugins_dir, PluginScope::User)? {
            merged.insert(plugin.name.clone(), plugin);
        }

        if let Some(root) = &self.project_root {
            let project_dir = looperdir::plugins_path(root);
            for plugin in load_plugins_from_dir(&project_dir, PluginScope::Project)? {
                merged.insert(plugin.name.clone(), plugin);
            }
        }

        *catalog = merged;
        Ok(catalog.values().cloned().collect())
    }

    /// Clear the catalog and rediscover all plugins.
    pub fn reload(&self) -> Result<Vec<Plugin>> {
        self.discover()
    }

    /// A loaded plugin by name.
    pub fn get(&self, name: &str) -> Option<Plugin> {
        let catalog = self.plugins.read().unwrap();
        catalog.get(name).cloned()
    }

    /// All loaded plugins, sorted by name.
    pub fn list(&self) -> Vec<Plugin> {
        let catalog = self.plugins.read().unwrap();
        let mut plugins: Vec<_> = catalog.values().cloned().collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        plugins
    }

    /// All loaded plugins of a category, sorted by name.
    pub fn list_by_category(&self, category: PluginCategory) -> Vec<Plugin> {
        let catalog = self.plugins.read().unwrap();
        let mut plugins: Vec<_> = catalog
            .values()
            .filter(|p| p.category == category)
            .cloned()
            .collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        plugins
    }

    /// All agent plugins.
    pub fn agent_plugins(&self) -> Vec<Plugin> {
        self.list_by_category(PluginCategory::Agent)
    }

    /// All workflow plugins.
    pub fn workflow_plugins(&self) -> Vec<Plugin> {
        self.list_by_category(PluginCategory::Workflow)
    }

    /// The agent plugin providing the given agent type. When several
    /// plugins declare the same type, the lexicographically smallest plugin
    /// name wins, so lookup is deterministic.
    pub fn get_by_agent_type(&self, agent_type: &str) -> Option<Plugin> {
        let catalog = self.plugins.read().unwrap();
        catalog
            .values()
            .filter(|p| p.is_agent() && p.agent_type() == Some(agent_type))
            .min_by(|a, b| a.name.cmp(&b.name))
            .cloned()
    }

    /// The workflow plugin providing the given workflow type, with the same
    /// deterministic tie-break as [`Loader::get_by_agent_type`].
    pub fn get_by_workflow_type(&self, workflow_type: &str) -> Option<Plugin> {
        let catalog = self.plugins.read().unwrap();
        catalog
            .values()
            .filter(|p| p.is_workflow() && p.workflow_type() == Some(workflow_type))
            .min_by(|a, b| a.name.cmp(&b.name))
            .cloned()
    }

    /// The user plugins directory.
    pub fn user_plugins_dir(&self) -> &Path {
        &self.user_plugins_dir
    }

    /// The project plugins directory, when a project root is set.
    pub fn project_plugins_dir(&self) -> Option<PathBuf> {
        self.project_root
            .as_deref()
            .map(looperdir::plugins_path)
    }

    /// The project root, when set.
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Create the user plugins directory if it doesn't exist.
    pub fn ensure_user_plugins_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.user_plugins_dir)?;
        Ok(())
    }

    /// Create the project plugins directory if it doesn't exist.
    pub fn ensure_project_plugins_dir(&self) -> Result<()> {
        let dir = self
            .project_plugins_dir()
            .ok_or_else(|| anyhow::anyhow!("no project root set"))?;
        std::fs::create_dir_all(dir)?;
        Ok(())
    }
}

/// Load all plugins from the immediate subdirectories of `dir`. A missing
/// directory yields an empty set; a subdirectory whose manifest fails to
/// parse is logged and skipped.
fn load_plugins_from_dir(dir: &Path, scope: PluginScope) -> Result<Vec<Plugin>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(anyhow::Error::new(err)
                .context(format!("reading plugins directory {}", dir.display())));
        }
    };

    let mut plugins = Vec::new();

    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        if !path.is_dir() {
            continue;
        }

        match load_plugin(&path, scope) {
            Ok(plugin) => {
                tracing::debug!(
                    plugin = %plugin.name,
                    version = %plugin.version,
                    scope = %plugin.scope,
                    "found plugin"
                );
                plugins.push(plugin);
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "skipping plugin directory"
                );
            }
        }
    }

    Ok(plugins)
}

/// Load a single plugin from a directory.
fn load_plugin(plugin_dir: &Path, scope: PluginScope) -> Result<Plugin> {
    let manifest = Manifest::parse(plugin_dir)?;
    let category = manifest.category()?;
    let binary_path = manifest.binary_path(plugin_dir)?;

    Ok(Plugin {
        name: manifest.name.clone(),
        version: manifest.version.clone(),
        category,
        manifest,
        path: plugin_dir.to_path_buf(),
        scope,
        binary_path,
        config: HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manifest::agent_manifest_for_type;
    use tempfile::TempDir;

    fn write_plugin(root: &Path, name: &str, version: &str) {
        let dir = root.join(name);
        let mut manifest = agent_manifest_for_type(name);
        manifest.name = name.to_string();
        manifest.version = version.to_string();
        manifest.write(&dir).unwrap();
    }

    fn loader_for(user: &TempDir, project: &TempDir) -> Loader {
        Loader::new(Some(project.path().to_path_buf()))
            .with_user_plugins_dir(user.path().to_path_buf())
    }

    #[test]
    fn project_scope_overrides_user_scope() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        write_plugin(user.path(), "foo", "1.0.0");
        let project_plugins = looperdir::plugins_path(project.path());
        write_plugin(&project_plugins, "foo", "2.0.0");

        let loader = loader_for(&user, &project);
        let plugins = loader.discover().unwrap();

        assert_eq!(plugins.len(), 1);
        let foo = loader.get("foo").unwrap();
        assert_eq!(foo.version, "2.0.0");
        assert_eq!(foo.scope, PluginScope::Project);
    }

    #[test]
    fn broken_plugin_does_not_block_siblings() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        write_plugin(user.path(), "good", "1.0.0");
        let broken = user.path().join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(super::super::manifest::MANIFEST_FILENAME), "not toml [").unwrap();

        let loader = loader_for(&user, &project);
        let plugins = loader.discover().unwrap();

        assert_eq!(plugins.len(), 1);
        assert!(loader.get("good").is_some());
    }

    #[test]
    fn missing_directories_yield_empty_catalog() {
        let user = TempDir::new().unwrap();
        let loader = Loader::new(None)
            .with_user_plugins_dir(user.path().join("does-not-exist"));

        assert!(loader.discover().unwrap().is_empty());
    }

    #[test]
    fn type_lookup_breaks_ties_lexicographically() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        // Both declare agent type "claude"; "alpha" must win.
        for name in ["zeta", "alpha"] {
            let dir = user.path().join(name);
            let mut manifest = agent_manifest_for_type("claude");
            manifest.name = name.to_string();
            manifest.write(&dir).unwrap();
        }

        let loader = loader_for(&user, &project);
        loader.discover().unwrap();

        let plugin = loader.get_by_agent_type("claude").unwrap();
        assert_eq!(plugin.name, "alpha");
    }
}
