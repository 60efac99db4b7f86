//! Plugin manifest parsing and validation
//!
//! Each plugin directory must contain a `looper-plugin.toml` manifest
//! declaring:
//! - Plugin metadata (name, version, category, binary path)
//! - Category-specific configuration (`[agent]` or `[workflow]`)
//! - Dependencies (required binaries, packages, API keys)
//! - Capabilities the plugin wants to use (file writes, commands, network,
//!   environment)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::{BinaryError, ManifestError};
use super::types::PluginCategory;

/// Name of the plugin manifest file inside each plugin directory.
pub const MANIFEST_FILENAME: &str = "looper-plugin.toml";

/// Parsed `looper-plugin.toml`. Immutable once parsed.
///
/// The `category` field stays a string at the serde boundary so that a
/// missing or unknown category surfaces as the dedicated manifest error
/// rather than a generic TOML failure; [`Manifest::category`] converts it to
/// the closed [`PluginCategory`] enum exactly once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub category: String,

    /// Human-readable description. Not part of the on-disk format; built-in
    /// plugin seeds set it for `plugin info` output.
    #[serde(skip)]
    pub description: String,

    /// General plugin metadata.
    #[serde(default)]
    pub plugin: PluginMetadata,

    /// Agent-specific configuration; required when category is `agent`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    /// Workflow-specific configuration; required when category is `workflow`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Dependencies>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

/// General plugin information from the `[plugin]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Path to the plugin binary, relative to the plugin directory.
    #[serde(default)]
    pub binary: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub homepage: String,

    #[serde(default)]
    pub license: String,

    /// Minimum looper version required to run this plugin.
    #[serde(default)]
    pub min_looper_version: String,
}

/// Agent-specific manifest configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent type this plugin registers (looked up by the task loop).
    #[serde(rename = "type", default)]
    pub agent_type: String,

    #[serde(default)]
    pub supports_streaming: bool,

    #[serde(default)]
    pub supports_tools: bool,

    #[serde(default)]
    pub supports_mcp: bool,

    /// How the prompt is delivered: "stdin" or "arg".
    #[serde(default)]
    pub default_prompt_format: String,
}

/// Workflow-specific manifest configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow type this plugin registers.
    #[serde(rename = "type", default)]
    pub workflow_type: String,

    #[serde(default)]
    pub supports_parallel: bool,

    #[serde(default)]
    pub supports_review: bool,

    /// Suggested iteration cap (0 = no limit).
    #[serde(default)]
    pub max_iterations: u32,
}

/// What the plugin needs from its environment to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependencies {
    /// Required executables in PATH.
    #[serde(default)]
    pub binaries: Vec<String>,

    /// Required system packages (advisory).
    #[serde(default)]
    pub packages: Vec<String>,

    /// Required API keys (for documentation).
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Minimum plugin version for dependencies.
    #[serde(default)]
    pub min_version: String,
}

/// Operations the plugin declares it wants to perform. Declaration is a
/// precondition for authorization, not a grant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub can_modify_files: bool,

    #[serde(default)]
    pub can_execute_commands: bool,

    #[serde(default)]
    pub can_access_network: bool,

    #[serde(default)]
    pub can_access_env: bool,
}

impl Manifest {
    /// Read and parse the manifest from a plugin directory, validating it
    /// fully before returning.
    pub fn parse(plugin_dir: &Path) -> Result<Self, ManifestError> {
        let manifest_path = plugin_dir.join(MANIFEST_FILENAME);

        let content = match std::fs::read_to_string(&manifest_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ManifestError::NotFound(manifest_path));
            }
            Err(err) => {
                return Err(ManifestError::Io {
                    path: manifest_path,
                    source: err,
                });
            }
        };

        let manifest: Manifest = toml::from_str(&content)?;
        manifest.validate()?;

        Ok(manifest)
    }

    /// Validate the manifest structure and required fields.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.is_empty() {
            return Err(ManifestError::MissingName);
        }

        if self.version.is_empty() {
            return Err(ManifestError::MissingVersion);
        }

        if self.category.is_empty() {
            return Err(ManifestError::MissingCategory);
        }

        let category = self.category()?;

        if self.plugin.binary.is_empty() {
            return Err(ManifestError::MissingBinary);
        }

        match category {
            PluginCategory::Agent => match &self.agent {
                None => return Err(ManifestError::MissingAgentConfig),
                Some(agent) if agent.agent_type.is_empty() => {
                    return Err(ManifestError::MissingAgentType);
                }
                Some(_) => {}
            },
            PluginCategory::Workflow => match &self.workflow {
                None => return Err(ManifestError::MissingWorkflowConfig),
                Some(workflow) if workflow.workflow_type.is_empty() => {
                    return Err(ManifestError::MissingWorkflowType);
                }
                Some(_) => {}
            },
        }

        validate_plugin_name(&self.name)?;

        Ok(())
    }

    /// The manifest's category as the closed enum.
    pub fn category(&self) -> Result<PluginCategory, ManifestError> {
        self.category
            .parse()
            .map_err(|_| ManifestError::InvalidCategory(self.category.clone()))
    }

    /// Validate then serialize the manifest to `looper-plugin.toml` inside
    /// `plugin_dir`, creating the directory if needed. The inverse of
    /// [`Manifest::parse`]; used by plugin scaffolding.
    pub fn write(&self, plugin_dir: &Path) -> Result<(), ManifestError> {
        self.validate()?;

        std::fs::create_dir_all(plugin_dir).map_err(|err| ManifestError::Io {
            path: plugin_dir.to_path_buf(),
            source: err,
        })?;

        let content = toml::to_string_pretty(self)?;
        let manifest_path = plugin_dir.join(MANIFEST_FILENAME);
        std::fs::write(&manifest_path, content).map_err(|err| ManifestError::Io {
            path: manifest_path,
            source: err,
        })?;

        Ok(())
    }

    /// Absolute path to the plugin's binary. The manifest's binary path is
    /// relative to the plugin directory.
    pub fn binary_path(&self, plugin_dir: &Path) -> Result<PathBuf, ManifestError> {
        if self.plugin.binary.is_empty() {
            return Err(ManifestError::MissingBinary);
        }
        Ok(plugin_dir.join(&self.plugin.binary))
    }
}

/// Validate that a plugin name is a valid identifier: alphanumeric with
/// hyphens or underscores, not starting with either.
pub fn validate_plugin_name(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::MissingName);
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ManifestError::InvalidName(name.to_string()));
    }

    if name.starts_with('-') || name.starts_with('_') {
        return Err(ManifestError::InvalidNamePrefix(name.to_string()));
    }

    Ok(())
}

/// Normalize a plugin name to a canonical form: lowercase, with dots,
/// slashes, and underscores replaced by hyphens.
pub fn normalize_plugin_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());

    for c in name.to_lowercase().chars() {
        match c {
            '.' | '/' | '_' => {
                if !normalized.ends_with('-') {
                    normalized.push('-');
                }
            }
            '-' => {
                if !normalized.ends_with('-') {
                    normalized.push('-');
                }
            }
            other => normalized.push(other),
        }
    }

    normalized.trim_matches('-').to_string()
}

/// Best-effort compatibility heuristic between a plugin's declared minimum
/// looper version and the running version.
///
/// Advisory, not a correctness guarantee: an empty minimum is always
/// compatible, a "dev" or empty current version is always treated as
/// compatible, and otherwise only the major components are compared
/// lexicographically as strings.
pub fn is_compatible_with_version(min_version: &str, current_version: &str) -> bool {
    if min_version.is_empty() {
        return true;
    }

    if current_version.is_empty() || current_version == "dev" {
        return true;
    }

    let min_major = min_version.split('.').next().unwrap_or("");
    let curr_major = current_version.split('.').next().unwrap_or("");

    if min_major != curr_major {
        return min_major < curr_major;
    }

    true
}

/// Check that a plugin binary exists, is a regular file, and is executable.
pub fn validate_binary_path(binary_path: &Path) -> Result<(), BinaryError> {
    let metadata = match std::fs::metadata(binary_path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(BinaryError::Missing(binary_path.to_path_buf()));
        }
        Err(err) => {
            return Err(BinaryError::Io {
                path: binary_path.to_path_buf(),
                source: err,
            });
        }
    };

    if metadata.is_dir() {
        return Err(BinaryError::NotAFile(binary_path.to_path_buf()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(BinaryError::NotExecutable(binary_path.to_path_buf()));
        }
    }

    Ok(())
}

/// Default manifest for a new plugin skeleton.
pub fn default_manifest(name: &str, category: PluginCategory) -> Manifest {
    Manifest {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        category: category.as_str().to_string(),
        description: format!("A {} plugin for looper", category),
        plugin: PluginMetadata {
            binary: format!("bin/{}", name),
            license: "MIT".to_string(),
            min_looper_version: "0.1.0".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Agent manifest skeleton for a given agent type.
pub fn agent_manifest_for_type(agent_type: &str) -> Manifest {
    let mut manifest = default_manifest(agent_type, PluginCategory::Agent);
    manifest.agent = Some(AgentConfig {
        agent_type: agent_type.to_string(),
        supports_streaming: true,
        supports_tools: true,
        default_prompt_format: "stdin".to_string(),
        ..Default::default()
    });
    manifest.capabilities = Some(Capabilities {
        can_modify_files: true,
        can_execute_commands: true,
        can_access_network: false,
        can_access_env: true,
    });
    manifest
}

/// Workflow manifest skeleton for a given workflow type.
pub fn workflow_manifest_for_type(workflow_type: &str) -> Manifest {
    let mut manifest = default_manifest(workflow_type, PluginCategory::Workflow);
    manifest.workflow = Some(WorkflowConfig {
        workflow_type: workflow_type.to_string(),
        supports_parallel: false,
        supports_review: true,
        max_iterations: 50,
    });
    manifest
}
