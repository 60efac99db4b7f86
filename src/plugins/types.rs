//! Core plugin types: the plugin record, its category and scope, and the
//! JSON-RPC envelope exchanged with plugin subprocesses.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::capabilities::CapabilityType;
use super::manifest::Manifest;

/// JSON-RPC protocol tag used in every request and response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Plugin category enumeration
///
/// Closed set: adding a category is a compile-time-checked change at every
/// dispatch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    /// Agent plugin (runs a prompt, returns a task summary)
    Agent,
    /// Workflow plugin (drives a whole task loop)
    Workflow,
}

impl PluginCategory {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginCategory::Agent => "agent",
            PluginCategory::Workflow => "workflow",
        }
    }

    /// Get all categories
    pub fn all() -> &'static [PluginCategory] {
        &[PluginCategory::Agent, PluginCategory::Workflow]
    }
}

impl FromStr for PluginCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(PluginCategory::Agent),
            "workflow" => Ok(PluginCategory::Workflow),
            _ => Err(format!("Invalid plugin category: {}", s)),
        }
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a plugin was loaded from. Determines override priority
/// (project > user > builtin) and whether it can be uninstalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginScope {
    /// Loaded from `~/.looper/plugins/`
    User,
    /// Loaded from `<project>/.looper/plugins/`
    Project,
    /// Compiled into the looper binary
    Builtin,
}

impl PluginScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginScope::User => "user",
            PluginScope::Project => "project",
            PluginScope::Builtin => "builtin",
        }
    }
}

impl fmt::Display for PluginScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A loaded plugin with its metadata and per-instance configuration.
#[derive(Debug, Clone)]
pub struct Plugin {
    /// Unique identifier; the catalog key.
    pub name: String,

    /// Semantic version declared by the manifest.
    pub version: String,

    /// Category, fixed at creation.
    pub category: PluginCategory,

    /// Parsed manifest data.
    pub manifest: Manifest,

    /// Absolute path to the plugin directory.
    pub path: PathBuf,

    /// Where this plugin was loaded from.
    pub scope: PluginScope,

    /// Absolute path to the plugin's executable binary.
    pub binary_path: PathBuf,

    /// Plugin-specific configuration from looper.toml; injected into the
    /// plugin's environment on execution.
    pub config: HashMap<String, toml::Value>,
}

impl Plugin {
    /// Whether this is an agent plugin.
    pub fn is_agent(&self) -> bool {
        self.category == PluginCategory::Agent
    }

    /// Whether this is a workflow plugin.
    pub fn is_workflow(&self) -> bool {
        self.category == PluginCategory::Workflow
    }

    /// The agent type this plugin provides, if it is an agent plugin.
    pub fn agent_type(&self) -> Option<&str> {
        self.manifest.agent.as_ref().map(|a| a.agent_type.as_str())
    }

    /// The workflow type this plugin provides, if it is a workflow plugin.
    pub fn workflow_type(&self) -> Option<&str> {
        self.manifest
            .workflow
            .as_ref()
            .map(|w| w.workflow_type.as_str())
    }

    /// Whether the manifest declares the given capability.
    ///
    /// `ReadFiles` has no dedicated declaration; it is implied by
    /// `ModifyFiles` or `AccessEnv`.
    pub fn declares_capability(&self, capability: CapabilityType) -> bool {
        let caps = match &self.manifest.capabilities {
            Some(caps) => caps,
            None => return false,
        };

        match capability {
            CapabilityType::ModifyFiles => caps.can_modify_files,
            CapabilityType::ExecuteCommands => caps.can_execute_commands,
            CapabilityType::AccessNetwork => caps.can_access_network,
            CapabilityType::AccessEnv => caps.can_access_env,
            CapabilityType::ReadFiles => caps.can_modify_files || caps.can_access_env,
        }
    }

    /// The execution timeout from this plugin's config, or `default` if the
    /// `timeout` key is absent or unusable. Accepts an integer number of
    /// seconds or a string like `"90"`.
    pub fn timeout(&self, default: Duration) -> Duration {
        match self.config.get("timeout") {
            Some(toml::Value::Integer(secs)) if *secs > 0 => {
                Duration::from_secs(*secs as u64)
            }
            Some(toml::Value::String(s)) => s
                .trim()
                .trim_end_matches('s')
                .parse::<u64>()
                .map(Duration::from_secs)
                .unwrap_or(default),
            _ => default,
        }
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{} ({})", self.name, self.scope)
        } else {
            write!(f, "{}@{} ({})", self.name, self.version, self.scope)
        }
    }
}

/// JSON-RPC request sent to a plugin subprocess on stdin.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC response read from a plugin subprocess's stdout.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<ResponseError>,
}

/// JSON-RPC application-level error.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[allow(dead_code)]
    pub data: Option<Value>,
}

/// Parameters for an agent plugin's `run` and `stream` methods.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRunParams {
    pub prompt: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

/// Result returned by an agent plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResult {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blockers: Vec<String>,
}

impl AgentResult {
    /// Whether this result ends a streaming exchange.
    pub fn is_terminal(&self) -> bool {
        self.status == "done" || self.status == "failed"
    }
}

/// Parameters for a workflow plugin's `run` method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowRunParams {
    #[serde(default)]
    pub config: HashMap<String, Value>,
    pub work_dir: String,
    pub todo_file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_prompt: String,
}

/// Result returned by a workflow plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}
