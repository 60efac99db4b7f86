//! Plugin subsystem error types
//!
//! These errors represent plugin failures, distinct from infrastructure
//! errors. Using thiserror for ergonomic error handling with proper Display
//! implementations. Nothing in this subsystem terminates the host process;
//! every failure mode is a returned value.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

use super::capabilities::CapabilityType;

/// Errors from parsing, validating, or writing a plugin manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Manifest file not found in the plugin directory
    #[error("manifest file not found: {0}")]
    NotFound(PathBuf),

    /// Manifest file could not be read or written
    #[error("accessing manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest is not valid TOML
    #[error("invalid manifest: {0}")]
    InvalidSyntax(#[from] toml::de::Error),

    /// Manifest could not be serialized back to TOML
    #[error("marshaling manifest: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing plugin name
    #[error("missing plugin name")]
    MissingName,

    /// Missing plugin version
    #[error("missing plugin version")]
    MissingVersion,

    /// Missing plugin category
    #[error("missing plugin category")]
    MissingCategory,

    /// Missing plugin binary path
    #[error("missing plugin binary path")]
    MissingBinary,

    /// Category is not one of the recognized values
    #[error("invalid plugin category: {0}")]
    InvalidCategory(String),

    /// Agent plugins must carry an `[agent]` section with a type
    #[error("agent configuration required for agent plugins")]
    MissingAgentConfig,

    /// The `[agent]` section is missing its `type` field
    #[error("agent.type is required")]
    MissingAgentType,

    /// Workflow plugins must carry a `[workflow]` section with a type
    #[error("workflow configuration required for workflow plugins")]
    MissingWorkflowConfig,

    /// The `[workflow]` section is missing its `type` field
    #[error("workflow.type is required")]
    MissingWorkflowType,

    /// Plugin name contains characters outside `[A-Za-z0-9_-]`
    #[error("invalid plugin name {0:?} (use alphanumeric, hyphens, underscores)")]
    InvalidName(String),

    /// Plugin name starts with `-` or `_`
    #[error("plugin name cannot start with hyphen or underscore")]
    InvalidNamePrefix(String),
}

/// Errors from resolving or checking a plugin binary
#[derive(Debug, Error)]
pub enum BinaryError {
    /// Binary does not exist at the resolved path
    #[error("plugin binary not found: {0}")]
    Missing(PathBuf),

    /// Resolved path is a directory
    #[error("plugin binary is a directory, not a file: {0}")]
    NotAFile(PathBuf),

    /// Binary exists but lacks the executable bit
    #[error("plugin binary is not executable: {0}")]
    NotExecutable(PathBuf),

    /// Binary could not be inspected
    #[error("accessing plugin binary {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from executing a plugin subprocess
#[derive(Debug, Error)]
pub enum ExecError {
    /// Request parameters could not be serialized
    #[error("marshaling request: {0}")]
    EncodeRequest(#[source] serde_json::Error),

    /// The plugin binary could not be spawned
    #[error("starting plugin binary {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing the request to the plugin's stdin failed
    #[error("writing request to plugin: {0}")]
    Stdin(#[source] std::io::Error),

    /// Reading the plugin's stdout failed
    #[error("reading response from plugin: {0}")]
    Stdout(#[source] std::io::Error),

    /// Waiting on the plugin process failed
    #[error("waiting for plugin process: {0}")]
    Wait(#[source] std::io::Error),

    /// The plugin exited with a non-zero status
    #[error("plugin execution failed ({status}){}", format_stderr(.stderr))]
    NonZeroExit { status: ExitStatus, stderr: String },

    /// The plugin's output was not a well-formed JSON-RPC envelope
    #[error("unmarshaling response: {0}")]
    Protocol(#[source] serde_json::Error),

    /// The plugin returned a JSON-RPC error
    #[error("plugin error (code {code}): {message}")]
    Rpc { code: i64, message: String },

    /// A streaming exchange ended without a terminal result
    #[error("plugin did not return a result")]
    NoResult,

    /// The caller's cancellation signal fired before completion
    #[error("plugin execution cancelled")]
    Cancelled,

    /// The bounded execution window elapsed
    #[error("plugin execution timed out after {0:?}")]
    Timeout(Duration),
}

fn format_stderr(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!("\nstderr: {}", stderr.trim())
    }
}

/// Errors from capability authorization
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The manifest does not declare the requested capability; no stored
    /// grant can override this
    #[error("plugin {plugin:?} does not declare capability {capability:?}")]
    NotDeclared {
        plugin: String,
        capability: CapabilityType,
    },

    /// The stored permission for this key is `denied`
    #[error("capability {capability:?} denied for plugin {plugin:?}")]
    Denied {
        plugin: String,
        capability: CapabilityType,
    },

    /// Permission is `prompt` but no prompt handler is registered
    #[error("capability {capability:?} requires permission for plugin {plugin:?} (no prompt handler)")]
    NoPromptHandler {
        plugin: String,
        capability: CapabilityType,
    },

    /// The prompt handler itself failed
    #[error("permission prompt failed: {0}")]
    Prompt(anyhow::Error),

    /// A capability-gated action was attempted without permission
    #[error("plugin {plugin:?} does not have permission for {capability:?}")]
    NotPermitted {
        plugin: String,
        capability: CapabilityType,
    },

    /// A capability-gated file or process operation failed after the check
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}
