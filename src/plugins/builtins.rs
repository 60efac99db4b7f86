//! Built-in plugin seeds
//!
//! Compiled-in agent providers, registered before discovery so plugins
//! installed on disk override them by name. Built-ins carry a sentinel
//! path instead of a real binary and are dispatched in-process by the
//! task loop rather than through the executor.

use std::collections::HashMap;
use std::path::PathBuf;

use super::manifest::{AgentConfig, Capabilities, Manifest, PluginMetadata};
use super::types::{Plugin, PluginCategory, PluginScope};

/// Sentinel path used for the `path` and `binary_path` of built-in plugins.
pub const BUILTIN_PATH: &str = "<builtin>";

/// All built-in plugins, in registration order.
pub fn builtin_plugins() -> Vec<Plugin> {
    vec![
        builtin_agent(
            "claude",
            "Claude AI agent integration (built-in)",
            AgentConfig {
                agent_type: "claude".to_string(),
                supports_streaming: true,
                supports_tools: true,
                supports_mcp: true,
                default_prompt_format: "stdin".to_string(),
            },
        ),
        builtin_agent(
            "codex",
            "Codex AI agent integration (built-in)",
            AgentConfig {
                agent_type: "codex".to_string(),
                supports_streaming: true,
                supports_tools: true,
                supports_mcp: false,
                default_prompt_format: "stdin".to_string(),
            },
        ),
        builtin_agent(
            "traditional",
            "Traditional command-runner agent (built-in)",
            AgentConfig {
                agent_type: "traditional".to_string(),
                supports_streaming: false,
                supports_tools: false,
                supports_mcp: false,
                default_prompt_format: "arg".to_string(),
            },
        ),
    ]
}

fn builtin_agent(name: &str, description: &str, agent: AgentConfig) -> Plugin {
    let binary = agent.agent_type.clone();
    let manifest = Manifest {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        category: PluginCategory::Agent.as_str().to_string(),
        description: description.to_string(),
        plugin: PluginMetadata {
            binary,
            license: "MIT".to_string(),
            min_looper_version: "0.1.0".to_string(),
            ..Default::default()
        },
        agent: Some(agent),
        workflow: None,
        dependencies: None,
        capabilities: Some(Capabilities {
            can_modify_files: true,
            can_execute_commands: true,
            can_access_network: false,
            can_access_env: true,
        }),
    };

    Plugin {
        name: name.to_string(),
        version: manifest.version.clone(),
        category: PluginCategory::Agent,
        manifest,
        path: PathBuf::from(BUILTIN_PATH),
        scope: PluginScope::Builtin,
        binary_path: PathBuf::from(BUILTIN_PATH),
        config: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_manifests_are_valid() {
        for plugin in builtin_plugins() {
            plugin.manifest.validate().unwrap();
            assert_eq!(plugin.scope, PluginScope::Builtin);
            assert_eq!(plugin.path, PathBuf::from(BUILTIN_PATH));
        }
    }

    #[test]
    fn builtin_names_are_unique() {
        let plugins = builtin_plugins();
        let mut names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), plugins.len());
    }
}
