//! Capability-based permission broker for plugins
//!
//! Plugins declare capabilities in their manifest; the host authorizes each
//! use at call time. Declaration is checked first and cannot be overridden
//! by a stored grant. Undeclared capability -> immediate error. Declared
//! capability -> consult the runtime permission table (denied / prompt /
//! granted, defaulting to prompt), prompting the user at most once per
//! (plugin, capability) key.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::error::CapabilityError;
use super::types::Plugin;

/// A class of operation a plugin must declare to be eligible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
    /// Create or modify files
    ModifyFiles,
    /// Run shell commands
    ExecuteCommands,
    /// Make network requests
    AccessNetwork,
    /// Read environment variables
    AccessEnv,
    /// Read files; implied by `ModifyFiles` or `AccessEnv` in the absence
    /// of a dedicated declaration
    ReadFiles,
}

impl CapabilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityType::ModifyFiles => "modify_files",
            CapabilityType::ExecuteCommands => "execute_commands",
            CapabilityType::AccessNetwork => "access_network",
            CapabilityType::AccessEnv => "access_env",
            CapabilityType::ReadFiles => "read_files",
        }
    }
}

impl FromStr for CapabilityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "modify_files" => Ok(CapabilityType::ModifyFiles),
            "execute_commands" => Ok(CapabilityType::ExecuteCommands),
            "access_network" => Ok(CapabilityType::AccessNetwork),
            "access_env" => Ok(CapabilityType::AccessEnv),
            "read_files" => Ok(CapabilityType::ReadFiles),
            _ => Err(format!("Invalid capability type: {}", s)),
        }
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime authorization state for a (plugin, capability) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// Explicitly denied
    Denied,
    /// Ask the user before allowing
    Prompt,
    /// Allowed
    Granted,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionLevel::Denied => "denied",
            PermissionLevel::Prompt => "prompt",
            PermissionLevel::Granted => "granted",
        };
        write!(f, "{}", s)
    }
}

/// A pending capability request, handed to the prompt handler.
pub struct CapabilityRequest<'a> {
    /// Plugin requesting the capability.
    pub plugin: &'a Plugin,

    /// Capability being requested.
    pub capability: CapabilityType,

    /// Additional context, e.g. the file path or command line involved.
    pub context: HashMap<String, String>,
}

type PromptHandler = dyn Fn(&CapabilityRequest<'_>) -> anyhow::Result<bool> + Send + Sync;
type AuditHook = dyn Fn(&Plugin, CapabilityType, bool) + Send + Sync;

/// Authorizes capability-gated plugin operations.
///
/// Permission records live only as long as this instance; use
/// [`CapabilityManager::export_permissions`] /
/// [`CapabilityManager::import_permissions`] to persist them externally.
pub struct CapabilityManager {
    /// Permission level per (plugin name, capability); absent key means
    /// `Prompt`.
    permissions: RwLock<HashMap<(String, CapabilityType), PermissionLevel>>,

    prompt_handler: RwLock<Option<Box<PromptHandler>>>,

    audit_hook: RwLock<Option<Box<AuditHook>>>,
}

impl CapabilityManager {
    pub fn new() -> Self {
        Self {
            permissions: RwLock::new(HashMap::new()),
            prompt_handler: RwLock::new(None),
            audit_hook: RwLock::new(None),
        }
    }

    /// Set the permission level for a plugin's capability.
    pub fn set_permission(
        &self,
        plugin_name: &str,
        capability: CapabilityType,
        level: PermissionLevel,
    ) {
        let mut permissions = self.permissions.write().unwrap();
        permissions.insert((plugin_name.to_string(), capability), level);
    }

    /// Get the stored permission level for a plugin's capability,
    /// defaulting to `Prompt` when unset.
    pub fn get_permission(
        &self,
        plugin_name: &str,
        capability: CapabilityType,
    ) -> PermissionLevel {
        let permissions = self.permissions.read().unwrap();
        permissions
            .get(&(plugin_name.to_string(), capability))
            .copied()
            .unwrap_or(PermissionLevel::Prompt)
    }

    /// Check whether a plugin may use a capability right now.
    pub fn check_capability(
        &self,
        plugin: &Plugin,
        capability: CapabilityType,
    ) -> Result<bool, CapabilityError> {
        self.check_capability_with_context(plugin, capability, HashMap::new())
    }

    /// Check a capability with request context (file path, command, ...).
    ///
    /// The manifest declaration is checked first and is independent of any
    /// stored permission. For `Prompt`-level permissions the registered
    /// handler's answer is persisted as `Granted`/`Denied`, so the same key
    /// is never prompted twice. Every outcome, on every path, triggers the
    /// audit hook.
    pub fn check_capability_with_context(
        &self,
        plugin: &Plugin,
        capability: CapabilityType,
        context: HashMap<String, String>,
    ) -> Result<bool, CapabilityError> {
        if !plugin.declares_capability(capability) {
            self.audit(plugin, capability, false);
            return Err(CapabilityError::NotDeclared {
                plugin: plugin.name.clone(),
                capability,
            });
        }

        match self.get_permission(&plugin.name, capability) {
            PermissionLevel::Granted => {
                self.audit(plugin, capability, true);
                Ok(true)
            }

            PermissionLevel::Denied => {
                self.audit(plugin, capability, false);
                Err(CapabilityError::Denied {
                    plugin: plugin.name.clone(),
                    capability,
                })
            }

            PermissionLevel::Prompt => {
                // The handler runs without the permission table's lock held,
                // so unrelated capability checks are never blocked on a
                // prompt.
                let handler = self.prompt_handler.read().unwrap();
                let handler = match handler.as_ref() {
                    Some(handler) => handler,
                    None => {
                        self.audit(plugin, capability, false);
                        return Err(CapabilityError::NoPromptHandler {
                            plugin: plugin.name.clone(),
                            capability,
                        });
                    }
                };

                let request = CapabilityRequest {
                    plugin,
                    capability,
                    context,
                };

                let granted = match handler(&request) {
                    Ok(granted) => granted,
                    Err(err) => {
                        self.audit(plugin, capability, false);
                        return Err(CapabilityError::Prompt(err));
                    }
                };

                self.audit(plugin, capability, granted);

                let level = if granted {
                    PermissionLevel::Granted
                } else {
                    PermissionLevel::Denied
                };
                self.set_permission(&plugin.name, capability, level);

                Ok(granted)
            }
        }
    }

    /// Register the interactive prompt handler.
    ///
    /// Contract: the handler must not call back into this manager for the
    /// same (plugin, capability) key. It runs with no permission lock held,
    /// so checks for other keys proceed concurrently, but same-key re-entry
    /// may prompt twice (last answer wins).
    pub fn set_prompt_handler<F>(&self, handler: F)
    where
        F: Fn(&CapabilityRequest<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let mut slot = self.prompt_handler.write().unwrap();
        *slot = Some(Box::new(handler));
    }

    /// Register the audit hook, invoked with (plugin, capability, granted)
    /// for every check outcome.
    pub fn set_audit_hook<F>(&self, hook: F)
    where
        F: Fn(&Plugin, CapabilityType, bool) + Send + Sync + 'static,
    {
        let mut slot = self.audit_hook.write().unwrap();
        *slot = Some(Box::new(hook));
    }

    fn audit(&self, plugin: &Plugin, capability: CapabilityType, granted: bool) {
        let hook = self.audit_hook.read().unwrap();
        if let Some(hook) = hook.as_ref() {
            hook(plugin, capability, granted);
        }
        tracing::debug!(
            plugin = %plugin.name,
            capability = %capability,
            granted,
            "capability check"
        );
    }

    /// Clear all permission settings.
    pub fn reset(&self) {
        let mut permissions = self.permissions.write().unwrap();
        permissions.clear();
    }

    /// Export all permissions as a flat `"plugin:capability"` keyed map for
    /// external persistence.
    pub fn export_permissions(&self) -> HashMap<String, PermissionLevel> {
        let permissions = self.permissions.read().unwrap();
        permissions
            .iter()
            .map(|((name, capability), level)| {
                (format!("{}:{}", name, capability), *level)
            })
            .collect()
    }

    /// Import permissions from a flat map, replacing the current table.
    /// Keys that do not parse as `"plugin:capability"` are skipped.
    pub fn import_permissions(&self, imported: HashMap<String, PermissionLevel>) {
        let mut permissions = self.permissions.write().unwrap();
        permissions.clear();

        for (key, level) in imported {
            let Some((name, capability)) = key.rsplit_once(':') else {
                tracing::warn!(key = %key, "skipping malformed permission key");
                continue;
            };
            match capability.parse::<CapabilityType>() {
                Ok(capability) => {
                    permissions.insert((name.to_string(), capability), level);
                }
                Err(_) => {
                    tracing::warn!(key = %key, "skipping unknown capability in permission key");
                }
            }
        }
    }
}

impl Default for CapabilityManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds subprocess commands on behalf of a plugin, routing every spawn
/// through the capability check so command execution cannot bypass
/// authorization.
pub struct RestrictedCommandBuilder<'a> {
    manager: &'a CapabilityManager,
    plugin: &'a Plugin,
}

impl<'a> RestrictedCommandBuilder<'a> {
    pub fn new(manager: &'a CapabilityManager, plugin: &'a Plugin) -> Self {
        Self { manager, plugin }
    }

    /// Create a command, failing if the plugin is not permitted to execute
    /// commands.
    pub fn command(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<tokio::process::Command, CapabilityError> {
        let mut context = HashMap::new();
        context.insert("command".to_string(), program.to_string());
        context.insert("args".to_string(), args.join(" "));

        let granted = self.manager.check_capability_with_context(
            self.plugin,
            CapabilityType::ExecuteCommands,
            context,
        )?;

        if !granted {
            return Err(CapabilityError::NotPermitted {
                plugin: self.plugin.name.clone(),
                capability: CapabilityType::ExecuteCommands,
            });
        }

        let mut command = tokio::process::Command::new(program);
        command.args(args);
        Ok(command)
    }
}

/// File reads and writes on behalf of a plugin, routed through the
/// capability check.
pub struct RestrictedFileAccess<'a> {
    manager: &'a CapabilityManager,
    plugin: &'a Plugin,
    /// Relative paths resolve against this directory when set.
    base_dir: Option<PathBuf>,
}

impl<'a> RestrictedFileAccess<'a> {
    pub fn new(
        manager: &'a CapabilityManager,
        plugin: &'a Plugin,
        base_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            manager,
            plugin,
            base_dir,
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn check(&self, capability: CapabilityType, path: &Path) -> Result<(), CapabilityError> {
        let mut context = HashMap::new();
        context.insert("file".to_string(), path.display().to_string());

        let granted =
            self.manager
                .check_capability_with_context(self.plugin, capability, context)?;

        if !granted {
            return Err(CapabilityError::NotPermitted {
                plugin: self.plugin.name.clone(),
                capability,
            });
        }

        Ok(())
    }

    /// Write a file, failing if the plugin may not modify files.
    pub fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), CapabilityError> {
        let full_path = self.resolve(path);
        self.check(CapabilityType::ModifyFiles, &full_path)?;

        std::fs::write(&full_path, data).map_err(|err| CapabilityError::Io {
            context: format!("writing {}", full_path.display()),
            source: err,
        })
    }

    /// Read a file, failing if the plugin may not read files.
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>, CapabilityError> {
        let full_path = self.resolve(path);
        self.check(CapabilityType::ReadFiles, &full_path)?;

        std::fs::read(&full_path).map_err(|err| CapabilityError::Io {
            context: format!("reading {}", full_path.display()),
            source: err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::builtins;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_plugin() -> Plugin {
        // claude builtin declares modify_files, execute_commands, access_env
        // but not access_network
        builtins::builtin_plugins()
            .into_iter()
            .find(|p| p.name == "claude")
            .unwrap()
    }

    #[test]
    fn undeclared_capability_fails_even_when_granted() {
        let manager = CapabilityManager::new();
        let plugin = test_plugin();

        manager.set_permission(
            &plugin.name,
            CapabilityType::AccessNetwork,
            PermissionLevel::Granted,
        );

        let result = manager.check_capability(&plugin, CapabilityType::AccessNetwork);
        assert!(matches!(result, Err(CapabilityError::NotDeclared { .. })));
    }

    #[test]
    fn granted_and_denied_levels() {
        let manager = CapabilityManager::new();
        let plugin = test_plugin();

        manager.set_permission(
            &plugin.name,
            CapabilityType::ModifyFiles,
            PermissionLevel::Granted,
        );
        assert!(manager
            .check_capability(&plugin, CapabilityType::ModifyFiles)
            .unwrap());

        manager.set_permission(
            &plugin.name,
            CapabilityType::ModifyFiles,
            PermissionLevel::Denied,
        );
        assert!(matches!(
            manager.check_capability(&plugin, CapabilityType::ModifyFiles),
            Err(CapabilityError::Denied { .. })
        ));
    }

    #[test]
    fn prompt_without_handler_behaves_as_denied() {
        let manager = CapabilityManager::new();
        let plugin = test_plugin();

        assert!(matches!(
            manager.check_capability(&plugin, CapabilityType::ModifyFiles),
            Err(CapabilityError::NoPromptHandler { .. })
        ));
    }

    #[test]
    fn prompt_answer_is_memoized_per_key() {
        let manager = CapabilityManager::new();
        let plugin = test_plugin();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        manager.set_prompt_handler(move |_request| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });

        assert!(manager
            .check_capability(&plugin, CapabilityType::ModifyFiles)
            .unwrap());
        assert!(manager
            .check_capability(&plugin, CapabilityType::ModifyFiles)
            .unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.get_permission(&plugin.name, CapabilityType::ModifyFiles),
            PermissionLevel::Granted
        );
    }

    #[test]
    fn declined_prompt_is_memoized_as_denied() {
        let manager = CapabilityManager::new();
        let plugin = test_plugin();

        manager.set_prompt_handler(|_request| Ok(false));

        assert!(!manager
            .check_capability(&plugin, CapabilityType::ModifyFiles)
            .unwrap());

        // Second check hits the stored denial without prompting.
        assert!(matches!(
            manager.check_capability(&plugin, CapabilityType::ModifyFiles),
            Err(CapabilityError::Denied { .. })
        ));
    }

    #[test]
    fn audit_hook_sees_every_outcome() {
        let manager = CapabilityManager::new();
        let plugin = test_plugin();

        let outcomes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        manager.set_audit_hook(move |_plugin, capability, granted| {
            sink.lock().unwrap().push((capability, granted));
        });

        manager.set_permission(
            &plugin.name,
            CapabilityType::ModifyFiles,
            PermissionLevel::Granted,
        );
        let _ = manager.check_capability(&plugin, CapabilityType::ModifyFiles);
        let _ = manager.check_capability(&plugin, CapabilityType::AccessNetwork);

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(
            outcomes.as_slice(),
            &[
                (CapabilityType::ModifyFiles, true),
                (CapabilityType::AccessNetwork, false),
            ]
        );
    }

    #[test]
    fn export_import_round_trip() {
        let manager = CapabilityManager::new();
        manager.set_permission("foo", CapabilityType::ModifyFiles, PermissionLevel::Granted);
        manager.set_permission(
            "bar",
            CapabilityType::ExecuteCommands,
            PermissionLevel::Denied,
        );

        let exported = manager.export_permissions();
        assert_eq!(
            exported.get("foo:modify_files"),
            Some(&PermissionLevel::Granted)
        );

        let other = CapabilityManager::new();
        other.import_permissions(exported);
        assert_eq!(
            other.get_permission("bar", CapabilityType::ExecuteCommands),
            PermissionLevel::Denied
        );
        assert_eq!(
            other.get_permission("foo", CapabilityType::AccessEnv),
            PermissionLevel::Prompt
        );
    }

    #[test]
    fn read_files_implied_by_modify_or_env() {
        let plugin = test_plugin();
        assert!(plugin.declares_capability(CapabilityType::ReadFiles));
        assert!(!plugin.declares_capability(CapabilityType::AccessNetwork));
    }
}
