//! Static plugin health checks
//!
//! A purely observational check combining manifest correctness, binary
//! executability and responsiveness, dependency presence, and capability
//! risk advisories. Hard errors mean the plugin is unusable; warnings flag
//! it for operator attention. Validation informs but never enforces policy -
//! enforcement is the capability manager's job at call time.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use super::manifest::{self, Manifest};
use super::types::PluginCategory;

/// Performs validation on plugins.
pub struct Validator {
    /// Escalate the binary responsiveness probe from warning to error.
    pub strict_mode: bool,

    /// Skip binary checks entirely. Useful for development when binaries
    /// aren't built yet.
    pub skip_binary_check: bool,

    /// Current looper version for compatibility checking.
    pub looper_version: String,
}

/// Outcome of validating one plugin.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.valid = false;
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Format the result for human display.
    pub fn format(&self, plugin_name: &str) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "Plugin: {}", plugin_name);
        let _ = writeln!(
            out,
            "Status: {}",
            if self.valid { "VALID" } else { "INVALID" }
        );

        if !self.errors.is_empty() {
            let _ = writeln!(out, "\nErrors:");
            for error in &self.errors {
                let _ = writeln!(out, "  - {}", error);
            }
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(out, "\nWarnings:");
            for warning in &self.warnings {
                let _ = writeln!(out, "  - {}", warning);
            }
        }

        out
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            strict_mode: false,
            skip_binary_check: false,
            looper_version: "dev".to_string(),
        }
    }

    /// Validate the plugin in `plugin_dir`. Never mutates catalog state.
    pub fn validate_plugin(&self, plugin_dir: &Path) -> ValidationResult {
        let mut result = ValidationResult::new();

        match std::fs::metadata(plugin_dir) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                result.error(format!(
                    "plugin path is not a directory: {}",
                    plugin_dir.display()
                ));
                return result;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                result.error(format!(
                    "plugin directory does not exist: {}",
                    plugin_dir.display()
                ));
                return result;
            }
            Err(err) => {
                result.error(format!("cannot access plugin directory: {}", err));
                return result;
            }
        }

        let manifest = match Manifest::parse(plugin_dir) {
            Ok(manifest) => manifest,
            Err(err) => {
                result.error(format!("manifest error: {}", err));
                return result;
            }
        };

        self.check_manifest(&manifest, &mut result);

        let binary_path = match manifest.binary_path(plugin_dir) {
            Ok(path) => path,
            Err(err) => {
                result.error(format!("binary path error: {}", err));
                return result;
            }
        };

        if !self.skip_binary_check {
            self.check_binary(&binary_path, &mut result);
        }

        self.check_dependencies(&manifest, &mut result);
        self.check_capabilities(&manifest, &mut result);

        result
    }

    /// Validate every immediate subdirectory of a plugins root, keyed by
    /// directory name.
    pub fn validate_plugin_dir(&self, plugins_dir: &Path) -> HashMap<String, ValidationResult> {
        let entries = match std::fs::read_dir(plugins_dir) {
            Ok(entries) => entries,
            Err(err) => {
                let mut result = ValidationResult::new();
                result.error(format!("cannot read plugin directory: {}", err));
                return HashMap::from([(String::new(), result)]);
            }
        };

        let mut results = HashMap::new();

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            results.insert(name, self.validate_plugin(&path));
        }

        results
    }

    fn check_manifest(&self, manifest: &Manifest, result: &mut ValidationResult) {
        // Structural validation already ran in Manifest::parse; these are
        // the advisory checks on top.

        if !is_valid_version(&manifest.version) {
            result.warn(format!(
                "version {:?} does not follow semver format (e.g., 1.0.0)",
                manifest.version
            ));
        }

        if !manifest::is_compatible_with_version(
            &manifest.plugin.min_looper_version,
            &self.looper_version,
        ) {
            result.warn(format!(
                "plugin requires looper version {}, current is {}",
                manifest.plugin.min_looper_version, self.looper_version
            ));
        }

        if let Ok(PluginCategory::Agent) = manifest.category() {
            if let Some(agent) = &manifest.agent {
                if !agent.default_prompt_format.is_empty()
                    && agent.default_prompt_format != "stdin"
                    && agent.default_prompt_format != "arg"
                {
                    result.warn(format!(
                        "unknown prompt format {:?} (should be 'stdin' or 'arg')",
                        agent.default_prompt_format
                    ));
                }
            }
        }
    }

    fn check_binary(&self, binary_path: &Path, result: &mut ValidationResult) {
        if let Err(err) = manifest::validate_binary_path(binary_path) {
            result.error(format!("binary validation failed: {}", err));
            return;
        }

        // Probe with --version, then --help. Advisory: not all plugin
        // protocols implement these flags.
        let responds = probe(binary_path, "--version") || probe(binary_path, "--help");
        if !responds {
            let message = format!(
                "binary does not respond to --version or --help: {}",
                binary_path.display()
            );
            if self.strict_mode {
                result.error(message);
            } else {
                result.warn(message);
            }
        }

        let ext = binary_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if matches!(ext.as_str(), "sh" | "bash" | "py" | "rb" | "pl") {
            result.warn(
                "binary is a script; consider compiling to a native binary for better performance",
            );
        }
    }

    fn check_dependencies(&self, manifest: &Manifest, result: &mut ValidationResult) {
        let Some(dependencies) = &manifest.dependencies else {
            return;
        };

        for binary in &dependencies.binaries {
            if which::which(binary).is_err() {
                result.warn(format!("required binary {:?} not found in PATH", binary));
            }
        }

        if !dependencies.api_keys.is_empty() {
            result.warn(format!(
                "plugin requires API keys: {} (ensure these are configured)",
                dependencies.api_keys.join(", ")
            ));
        }
    }

    fn check_capabilities(&self, manifest: &Manifest, result: &mut ValidationResult) {
        let Some(capabilities) = &manifest.capabilities else {
            return;
        };

        if capabilities.can_execute_commands {
            result.warn("plugin can execute commands (ensure you trust this plugin)");
        }

        if capabilities.can_access_network {
            result.warn("plugin can access network (ensure you trust this plugin)");
        }

        if manifest.category == PluginCategory::Agent.as_str()
            && !capabilities.can_modify_files
        {
            result.warn("agent plugin cannot modify files (this may be intentional)");
        }
    }
}

/// Run the binary with a single flag, discarding output. True if it exits
/// successfully.
fn probe(binary_path: &Path, flag: &str) -> bool {
    std::process::Command::new(binary_path)
        .arg(flag)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Loose semver shape check: at least non-empty major.minor components.
fn is_valid_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() >= 2 && !parts[0].is_empty() && !parts[1].is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manifest::agent_manifest_for_type;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn write_binary(dir: &Path, rel: &str, executable: bool) {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();

        let mode = if executable { 0o755 } else { 0o644 };
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    fn scaffold(name: &str) -> (TempDir, std::path::PathBuf) {
        let root = TempDir::new().unwrap();
        let dir = root.path().join(name);
        agent_manifest_for_type(name).write(&dir).unwrap();
        (root, dir)
    }

    #[test]
    fn missing_directory_is_invalid() {
        let validator = Validator::new();
        let result = validator.validate_plugin(Path::new("/nonexistent/plugin"));
        assert!(!result.valid);
        assert!(result.errors[0].contains("does not exist"));
    }

    #[test]
    fn manifest_failure_is_a_hard_error() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("broken");
        std::fs::create_dir_all(&dir).unwrap();

        let validator = Validator::new();
        let result = validator.validate_plugin(&dir);
        assert!(!result.valid);
        assert!(result.errors[0].contains("manifest error"));
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_binary_fails_unless_skipped() {
        let (_root, dir) = scaffold("probe");
        write_binary(&dir, "bin/probe", false);

        let mut validator = Validator::new();
        let result = validator.validate_plugin(&dir);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("not executable")));

        validator.skip_binary_check = true;
        let result = validator.validate_plugin(&dir);
        assert!(result.valid);
    }

    #[cfg(unix)]
    #[test]
    fn script_binary_warns() {
        let (_root, dir) = scaffold("scripted");
        // Rewrite the manifest to point at a .sh binary.
        let mut manifest = agent_manifest_for_type("scripted");
        manifest.plugin.binary = "bin/scripted.sh".to_string();
        manifest.write(&dir).unwrap();
        write_binary(&dir, "bin/scripted.sh", true);

        let validator = Validator::new();
        let result = validator.validate_plugin(&dir);
        assert!(result.valid);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("binary is a script")));
    }

    #[test]
    fn missing_dependency_binary_warns() {
        let (_root, dir) = scaffold("needy");
        let mut manifest = agent_manifest_for_type("needy");
        manifest.dependencies = Some(crate::plugins::manifest::Dependencies {
            binaries: vec!["definitely-not-a-real-binary-xyz".to_string()],
            api_keys: vec!["EXAMPLE_API_KEY".to_string()],
            ..Default::default()
        });
        manifest.write(&dir).unwrap();

        let mut validator = Validator::new();
        validator.skip_binary_check = true;
        let result = validator.validate_plugin(&dir);

        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("not found in PATH")));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("requires API keys")));
    }

    #[test]
    fn dangerous_capabilities_warn_but_never_block() {
        let (_root, dir) = scaffold("dangerous");
        let mut manifest = agent_manifest_for_type("dangerous");
        manifest.capabilities.as_mut().unwrap().can_access_network = true;
        manifest.write(&dir).unwrap();

        let mut validator = Validator::new();
        validator.skip_binary_check = true;
        let result = validator.validate_plugin(&dir);

        assert!(result.valid);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("can execute commands")));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("can access network")));
    }

    #[test]
    fn bad_version_shape_warns() {
        assert!(is_valid_version("1.0.0"));
        assert!(is_valid_version("0.1"));
        assert!(!is_valid_version("1"));
        assert!(!is_valid_version(""));
    }

    #[test]
    fn validate_plugin_dir_keys_by_name() {
        let root = TempDir::new().unwrap();
        agent_manifest_for_type("one")
            .write(&root.path().join("one"))
            .unwrap();
        agent_manifest_for_type("two")
            .write(&root.path().join("two"))
            .unwrap();

        let mut validator = Validator::new();
        validator.skip_binary_check = true;
        let results = validator.validate_plugin_dir(root.path());

        assert_eq!(results.len(), 2);
        assert!(results.contains_key("one"));
        assert!(results.contains_key("two"));
    }
}
