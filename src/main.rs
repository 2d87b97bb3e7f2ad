use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use polylsp_client::{LspFacade, ServerConfig, ServerRegistry};
use polylsp_config::{load_config, Config};

/// Parsed command-line options.
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    workspace: Option<PathBuf>,
    lsp_command: Option<String>,
    eager: bool,
    verbose: bool,
    command: Command,
}

/// What to do after wiring up the registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Print the configured servers and their status.
    #[default]
    List,
    /// Start every server, report advertised capabilities, shut down.
    Check,
}

const USAGE: &str = "usage: polylsp [options] [list|check]

options:
  -c, --config <path>       TOML configuration file
  -w, --workspace <path>    workspace root (default: current directory)
      --lsp-command <cmd>   inline single-server command line
      --eager               start all servers at launch
  -v, --verbose             debug logging
  -h, --help                show this help";

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let value = iter.next().context("--config requires a path")?;
                args.config = Some(PathBuf::from(value));
            }
            "-w" | "--workspace" => {
                let value = iter.next().context("--workspace requires a path")?;
                args.workspace = Some(PathBuf::from(value));
            }
            "--lsp-command" => {
                args.lsp_command = Some(iter.next().context("--lsp-command requires a value")?);
            }
            "--eager" => args.eager = true,
            "-v" | "--verbose" => args.verbose = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            "list" => args.command = Command::List,
            "check" => args.command = Command::Check,
            other => bail!("unknown argument '{}'\n{}", other, USAGE),
        }
    }
    Ok(args)
}

/// Resolve the effective configuration: explicit file, inline command,
/// or the Python default, with flag overrides applied on top.
fn resolve_config(args: &Args) -> Result<Config> {
    let workspace = args
        .workspace
        .clone()
        .map_or_else(env::current_dir, Ok)
        .context("could not determine workspace root")?;

    let mut config = if let Some(path) = &args.config {
        load_config(path).with_context(|| format!("loading {}", path.display()))?
    } else if let Some(command_line) = &args.lsp_command {
        Config::from_command_line(command_line, workspace.clone())
            .context("--lsp-command must name an executable")?
    } else {
        Config::default_python(workspace.clone())
    };

    if args.workspace.is_some() {
        config.workspace = workspace;
    }
    if args.eager {
        config.eager_init = true;
    }
    Ok(config)
}

fn to_server_config(entry: &polylsp_config::ServerEntry) -> ServerConfig {
    ServerConfig {
        id: entry.id.clone(),
        command: entry.command.clone(),
        args: entry.args.clone(),
        extensions: entry.extensions.clone(),
        languages: entry.languages.clone(),
    }
}

async fn print_list(facade: &LspFacade) {
    let summaries = facade.list_servers().await;
    if summaries.is_empty() {
        println!("no servers configured");
        return;
    }
    for summary in summaries {
        println!(
            "{}\t{}\tlanguages: {}\textensions: {}\t{}",
            summary.id,
            summary.command,
            summary.languages.join(", "),
            summary.extensions.join(", "),
            summary.status
        );
    }
}

async fn run_check(facade: &LspFacade, registry: &ServerRegistry) -> Result<()> {
    if let Err(e) = registry.start_all().await {
        error!("{}", e);
    }

    for summary in facade.list_servers().await {
        match facade.describe_server(&summary.id).await {
            Ok(report) => {
                println!("{} ({}): {}", report.config.id, report.config.command, report.status);
                if let Some(caps) = report.capabilities {
                    let mut names: Vec<&String> = caps.keys().collect();
                    names.sort();
                    for name in names {
                        println!("  {}", name);
                    }
                }
            }
            Err(e) => error!("describe {}: {}", summary.id, e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let config = resolve_config(&args)?;

    // Logs go to stderr; stdout belongs to the caller.
    let filter = if args.verbose {
        "debug".to_string()
    } else {
        env::var("RUST_LOG").unwrap_or_else(|_| config.log.level.as_filter().to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let server_configs: Vec<ServerConfig> = config.lsps.iter().map(to_server_config).collect();
    let registry = Arc::new(ServerRegistry::new(server_configs, config.workspace.clone()));
    let facade = LspFacade::new(registry.clone());

    // Failed servers are reported but do not abort; the ones that did
    // start stay usable and are reaped by the final shutdown.
    if config.eager_init && args.command != Command::Check {
        info!("eager initialization: starting all servers");
        if let Err(e) = registry.start_all().await {
            error!("{}", e);
        }
    }

    match args.command {
        Command::List => print_list(&facade).await,
        Command::Check => run_check(&facade, &registry).await?,
    }

    registry.shutdown_all().await;
    Ok(())
}
