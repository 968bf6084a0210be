//! herder CLI binary
//!
//! Thin front end over `herder-core`: parses the command list, optionally
//! daemonizes, installs the signal listener, and runs the supervision
//! loop.
//!
//! ```text
//! herder [-d] [COMMAND [ARGS...] ---]... COMMAND [ARGS...]
//! ```

use clap::{CommandFactory, Parser};
use herder_core::{CommandTable, Supervisor, SupervisorConfig, UnixProcessAdapter};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "herder")]
#[command(about = "Runs each COMMAND in the background, restarting it whenever it dies")]
#[command(long_about = "Runs each COMMAND with its ARGS in the background, restarting it when \
it dies for any reason.\n\nCommand groups are separated by a literal `---` token. Send SIGHUP \
to restart all processes; SIGTERM or SIGINT kills all processes and exits.")]
#[command(version)]
struct Cli {
    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long)]
    daemonize: bool,

    /// Commands to supervise, separated by `---`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    commands: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // No command groups: show usage, exit 0
    if cli.commands.is_empty() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        return ExitCode::SUCCESS;
    }

    let table = match CommandTable::parse(&cli.commands) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("herder: {}", e);
            return ExitCode::from(1);
        }
    };

    if cli.daemonize {
        // Closes stdio and detaches before the async runtime starts
        if let Err(e) = nix::unistd::daemon(false, false) {
            eprintln!("herder: failed to daemonize: {}", e);
            return ExitCode::from(1);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("herder: failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(table)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("herder: {}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(table: CommandTable) -> herder_core::Result<()> {
    info!("Starting herder with {} command group(s)", table.len());

    let supervisor = Supervisor::new(
        table,
        Arc::new(UnixProcessAdapter::new()),
        SupervisorConfig::default(),
    )?;

    // Signal installation failure is a fatal setup error
    let _signals = herder_core::signals::spawn_listener(supervisor.event_sender())?;

    supervisor.run().await
}
