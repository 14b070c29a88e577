mod adapters_cmd;
mod config_cmds;
mod error;
mod logging;
mod output;
mod run_cmd;
mod status_cmd;
mod test_cmd;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};

use thenvoi_core::adapter::{AdapterCatalog, DEFAULT_ADAPTER};
use thenvoi_core::credentials::CredentialStore;
use thenvoi_core::process::{DEFAULT_STOP_TIMEOUT, ProcessRegistry};

use adapters_cmd::AdapterCommands;
use config_cmds::ConfigCommands;
use output::OutputFormat;
use run_cmd::RunArgs;

#[derive(Parser)]
#[command(
    name = "thenvoi",
    version,
    about = "Configure, run and supervise Thenvoi platform agents"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Debug logging and full error chains
    #[arg(long, global = true)]
    debug: bool,

    /// Also write debug logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Credential store (overrides THENVOI_CONFIG_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for PID files and agent logs (overrides THENVOI_STATE_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage agent credentials
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Discover available adapters
    Adapters {
        #[command(subcommand)]
        command: AdapterCommands,
    },
    /// Connect an agent to the platform
    Run {
        /// Agent name from the credential store
        name: String,
        /// Adapter to use
        #[arg(short, long, default_value_t = DEFAULT_ADAPTER.to_string())]
        adapter: String,
        /// Model (overrides the adapter default)
        #[arg(short, long)]
        model: Option<String>,
        /// Run detached in the background
        #[arg(short, long)]
        background: bool,
        /// Seconds to wait for a graceful shutdown
        #[arg(short, long, default_value_t = DEFAULT_STOP_TIMEOUT.as_secs())]
        timeout: u64,
        /// WebSocket URL (overrides THENVOI_WS_URL)
        #[arg(long)]
        ws_url: Option<String>,
        /// REST API URL (overrides THENVOI_REST_URL)
        #[arg(long)]
        rest_url: Option<String>,
    },
    /// Show running agents (omit the name to list all)
    Status {
        /// Agent to show
        name: Option<String>,
    },
    /// Stop a running agent
    Stop {
        /// Agent to stop
        name: Option<String>,
        /// Stop every running agent
        #[arg(short, long, conflicts_with = "name")]
        all: bool,
        /// Send SIGKILL immediately instead of SIGTERM
        #[arg(short, long)]
        force: bool,
        /// Seconds to wait before escalating to SIGKILL
        #[arg(short, long, default_value_t = DEFAULT_STOP_TIMEOUT.as_secs())]
        timeout: u64,
    },
    /// Check an agent's local configuration before running it
    Test {
        /// Agent to check
        name: String,
    },
    /// Print a shell completion script
    Completion {
        shell: clap_complete::Shell,
    },
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let config = cli.config.as_deref();
    let state_dir = cli.state_dir.as_deref();
    let verbose = cli.verbose > 0 || cli.debug;

    match cli.command {
        Commands::Config { command } => {
            let store = CredentialStore::from_env(config);
            config_cmds::run_config_command(command, &store, format)
        }
        Commands::Adapters { command } => {
            adapters_cmd::run_adapters_command(command, &AdapterCatalog::from_env(), format)
        }
        Commands::Run {
            name,
            adapter,
            model,
            background,
            timeout,
            ws_url,
            rest_url,
        } => {
            let store = CredentialStore::from_env(config);
            let registry = ProcessRegistry::from_env(state_dir)?;
            let args = RunArgs {
                name,
                adapter,
                model,
                background,
                shutdown_timeout: Duration::from_secs(timeout),
                ws_url,
                rest_url,
            };
            run_cmd::run_agent(args, &store, &registry, &AdapterCatalog::from_env()).await
        }
        Commands::Status { name } => {
            let registry = ProcessRegistry::from_env(state_dir)?;
            status_cmd::run_status(&registry, name.as_deref(), format)
        }
        Commands::Stop {
            name,
            all,
            force,
            timeout,
        } => {
            let registry = ProcessRegistry::from_env(state_dir)?;
            status_cmd::run_stop(&registry, name, all, force, Duration::from_secs(timeout)).await
        }
        Commands::Test { name } => {
            let store = CredentialStore::from_env(config);
            test_cmd::run_test(&store, &name, verbose, format)
        }
        Commands::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "thenvoi", &mut std::io::stdout());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let debug = cli.debug;

    let level = logging::console_level(cli.verbose, cli.quiet, cli.debug);
    if let Err(e) = logging::init(level, cli.log_file.as_deref()) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !error::is_silent(&e) {
                if debug {
                    eprintln!("Error: {e:?}");
                } else {
                    eprintln!("Error: {e:#}");
                }
                if let Some(hint) = error::hint(&e) {
                    eprintln!("Hint: {hint}");
                }
            }
            ExitCode::from(error::exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stop_and_run_default_to_the_registry_timeout() {
        let cli = Cli::try_parse_from(["thenvoi", "stop", "bot"]).unwrap();
        let Commands::Stop { timeout, .. } = cli.command else {
            panic!("expected stop");
        };
        assert_eq!(Duration::from_secs(timeout), DEFAULT_STOP_TIMEOUT);

        let cli = Cli::try_parse_from(["thenvoi", "run", "bot"]).unwrap();
        let Commands::Run { timeout, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(Duration::from_secs(timeout), DEFAULT_STOP_TIMEOUT);
    }
}
