use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use looper_cli::plugins::{
    self, Manifest, PluginCategory, PluginScope, Registry, Validator,
};
use looper_cli::Config;

#[derive(Parser)]
#[command(name = "looper")]
#[command(author, version, about = "Looper - autonomous task-loop runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root (default: current directory)
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Plugin management commands
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },
}

#[derive(Subcommand)]
enum PluginCommands {
    /// List registered plugins
    #[command(alias = "ls")]
    List {
        /// Only show plugins of this category (agent, workflow)
        #[arg(long)]
        category: Option<String>,
    },

    /// Show details for a plugin
    #[command(alias = "show")]
    Info {
        /// Plugin name
        name: String,

        /// Also query the plugin binary's `info` method
        #[arg(long)]
        query: bool,
    },

    /// Validate a plugin directory
    #[command(alias = "check")]
    Validate {
        /// Path to the plugin directory
        path: PathBuf,

        /// Treat an unresponsive binary as an error
        #[arg(long)]
        strict: bool,

        /// Skip binary checks (useful before the binary is built)
        #[arg(long)]
        skip_binary_check: bool,
    },

    /// Create a new plugin skeleton
    #[command(alias = "new")]
    Create {
        /// Name of the plugin to create
        name: String,

        /// Plugin type: agent or workflow
        #[arg(long = "type", default_value = "agent")]
        plugin_type: String,

        /// Output directory (default: current directory)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Plugin author name
        #[arg(long)]
        author: Option<String>,

        /// Plugin description
        #[arg(long)]
        description: Option<String>,
    },

    /// Install a plugin from a directory
    #[command(alias = "add")]
    Install {
        /// Path to the plugin source directory
        path: PathBuf,

        /// Install into the project scope instead of the user scope
        #[arg(long)]
        project: bool,
    },

    /// Uninstall a plugin
    #[command(aliases = ["remove", "rm"])]
    Uninstall {
        /// Plugin name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "looper_cli=debug"
    } else {
        "looper_cli=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let project_root = match cli.project_root {
        Some(root) => root,
        None => std::env::current_dir().context("determining current directory")?,
    };

    // One catalog per process, passed by reference to everything below.
    let registry = Registry::new();
    registry.initialize(Some(project_root.clone()))?;

    let config = Config::load(&project_root)?;
    config.apply_plugin_config(&registry);

    match cli.command {
        Commands::Plugin { command } => run_plugin_command(command, &registry).await,
    }
}

async fn run_plugin_command(command: PluginCommands, registry: &Registry) -> Result<()> {
    match command {
        PluginCommands::List { category } => {
            let plugins = match category.as_deref() {
                Some(category) => {
                    let category = PluginCategory::from_str(category)
                        .map_err(|err| anyhow!(err))?;
                    registry.list_by_category(category)
                }
                None => registry.list(),
            };

            if plugins.is_empty() {
                println!("No plugins registered.");
                return Ok(());
            }

            for plugin in plugins {
                let type_name = plugin
                    .agent_type()
                    .or_else(|| plugin.workflow_type())
                    .unwrap_or("-");
                println!(
                    "{:<20} {:<10} {:<10} {:<12} {}",
                    plugin.name, plugin.version, plugin.category, plugin.scope, type_name
                );
            }
            Ok(())
        }

        PluginCommands::Info { name, query } => {
            let plugin = registry
                .get(&name)
                .ok_or_else(|| anyhow!("plugin {:?} not found", name))?;

            println!("Name:     {}", plugin.name);
            println!("Version:  {}", plugin.version);
            println!("Category: {}", plugin.category);
            println!("Scope:    {}", plugin.scope);
            println!("Path:     {}", plugin.path.display());
            println!("Binary:   {}", plugin.binary_path.display());
            if !plugin.manifest.description.is_empty() {
                println!("About:    {}", plugin.manifest.description);
            }
            if let Some(caps) = &plugin.manifest.capabilities {
                println!(
                    "Capabilities: modify_files={} execute_commands={} access_network={} access_env={}",
                    caps.can_modify_files,
                    caps.can_execute_commands,
                    caps.can_access_network,
                    caps.can_access_env
                );
            }

            if query && plugin.scope != PluginScope::Builtin {
                let executor = plugins::Executor::new(&plugin);
                let cancel = tokio_util::sync::CancellationToken::new();
                let timer = {
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                        cancel.cancel();
                    })
                };

                let result = executor.plugin_info(&cancel).await;
                timer.abort();

                match result {
                    Ok(value) => println!("Info:     {}", value),
                    Err(err) => println!("Info:     unavailable ({})", err),
                }
            }

            Ok(())
        }

        PluginCommands::Validate {
            path,
            strict,
            skip_binary_check,
        } => {
            let mut validator = Validator::new();
            validator.strict_mode = strict;
            validator.skip_binary_check = skip_binary_check;
            validator.looper_version = env!("CARGO_PKG_VERSION").to_string();

            let result = validator.validate_plugin(&path);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());

            print!("{}", result.format(&name));

            if result.valid {
                Ok(())
            } else {
                Err(anyhow!("plugin validation failed"))
            }
        }

        PluginCommands::Create {
            name,
            plugin_type,
            output,
            author,
            description,
        } => {
            let name = plugins::normalize_plugin_name(&name);
            let category =
                PluginCategory::from_str(&plugin_type).map_err(|err| anyhow!(err))?;

            let output = output.unwrap_or_else(|| PathBuf::from("."));
            let plugin_dir = output.join(&name);
            if plugin_dir.exists() {
                return Err(anyhow!(
                    "directory already exists: {}",
                    plugin_dir.display()
                ));
            }

            let mut manifest = match category {
                PluginCategory::Agent => plugins::agent_manifest_for_type(&name),
                PluginCategory::Workflow => plugins::workflow_manifest_for_type(&name),
            };
            if let Some(author) = author {
                manifest.plugin.author = author;
            }
            if let Some(description) = description {
                manifest.description = description;
            }

            scaffold_plugin(&plugin_dir, &manifest)?;

            println!("Created {} plugin skeleton at {}", category, plugin_dir.display());
            println!("Next steps:");
            println!("  1. Implement {}", manifest.plugin.binary);
            println!(
                "  2. Run `looper plugin validate {}`",
                plugin_dir.display()
            );
            Ok(())
        }

        PluginCommands::Install { path, project } => {
            let scope = if project {
                PluginScope::Project
            } else {
                PluginScope::User
            };

            let plugin = registry.install_plugin(&path, scope)?;
            println!("Installed {}", plugin);
            println!(
                "Copy the plugin files into {} to complete installation.",
                plugin.path.display()
            );
            Ok(())
        }

        PluginCommands::Uninstall { name } => {
            registry.uninstall_plugin(&name)?;
            println!("Uninstalled {}", name);
            Ok(())
        }
    }
}

/// Write a plugin skeleton: manifest, a stub binary, and a README.
fn scaffold_plugin(plugin_dir: &std::path::Path, manifest: &Manifest) -> Result<()> {
    manifest.write(plugin_dir)?;

    let binary_path = plugin_dir.join(&manifest.plugin.binary);
    if let Some(bin_dir) = binary_path.parent() {
        std::fs::create_dir_all(bin_dir)?;
    }

    let stub = format!(
        "#!/bin/sh\n\
         # {} plugin stub. Reads a JSON-RPC request on stdin and answers with\n\
         # a failed result; replace with a real implementation.\n\
         read -r _request\n\
         printf '%s\\n' '{{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{{\"status\":\"failed\",\"summary\":\"not implemented\"}}}}'\n",
        manifest.name
    );
    std::fs::write(&binary_path, stub)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&binary_path, std::fs::Permissions::from_mode(0o755))?;
    }

    let readme = format!(
        "# {}\n\nA looper {} plugin.\n\nEdit `{}` and implement the JSON-RPC methods\n`run` (and optionally `stream` and `info`).\n",
        manifest.name, manifest.category, manifest.plugin.binary
    );
    std::fs::write(plugin_dir.join("README.md"), readme)?;

    Ok(())
}
