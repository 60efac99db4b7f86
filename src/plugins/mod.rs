//! Plugin system for looper
//!
//! Plugins are external binaries that extend the task loop with new agent
//! and workflow providers. They communicate over JSON-RPC on their standard
//! input/output, one fresh subprocess per call.
//!
//! # Architecture
//!
//! - **Manifest**: each plugin directory carries a `looper-plugin.toml`
//!   descriptor (metadata, category config, dependencies, capabilities)
//! - **Loader**: discovers plugins in `~/.looper/plugins` and
//!   `<project>/.looper/plugins`; project entries override user entries
//! - **Registry**: the process-wide catalog, seeded with built-in providers
//!   that disk-installed plugins may shadow
//! - **Executor**: drives one JSON-RPC exchange per subprocess, with prompt
//!   cancellation and escalating termination
//! - **CapabilityManager**: declare-then-authorize permission broker for
//!   file, command, network, and environment access
//! - **Validator**: static health checks, separate from the catalog
//!
//! # Security
//!
//! Plugins declare required capabilities in their manifest. The host only
//! authorizes capabilities that are both declared and permitted by the
//! runtime permission table, prompting the user at most once per
//! (plugin, capability) pair.

mod builtins;
mod capabilities;
mod error;
mod executor;
mod loader;
mod manifest;
mod registry;
mod types;
mod validation;

pub use builtins::{builtin_plugins, BUILTIN_PATH};
pub use capabilities::{
    CapabilityManager, CapabilityRequest, CapabilityType, PermissionLevel,
    RestrictedCommandBuilder, RestrictedFileAccess,
};
pub use error::{BinaryError, CapabilityError, ExecError, ManifestError};
pub use executor::{
    execute_agent_with_timeout, execute_workflow_with_timeout,
    stream_execute_with_timeout, Executor, RequestIds, DEFAULT_EXECUTION_TIMEOUT,
};
pub use loader::Loader;
pub use manifest::{
    agent_manifest_for_type, default_manifest, is_compatible_with_version,
    normalize_plugin_name, validate_binary_path, validate_plugin_name,
    workflow_manifest_for_type, AgentConfig, Capabilities, Dependencies, Manifest,
    PluginMetadata, WorkflowConfig, MANIFEST_FILENAME,
};
pub use registry::Registry;
pub use types::{
    AgentResult, AgentRunParams, Plugin, PluginCategory, PluginScope, Request,
    Response, ResponseError, WorkflowResult, WorkflowRunParams,
};
pub use validation::{ValidationResult, Validator};

use anyhow::Result;
use std::path::PathBuf;

use crate::looperdir;

/// The user-scope plugins directory (`~/.looper/plugins`).
pub fn user_plugins_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(home.join(looperdir::DIR).join(looperdir::PLUGINS_DIR))
}
