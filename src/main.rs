//! Service CLI: daemon lifecycle plus a foreground `execute`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use autoinvest::config::Config;
use autoinvest::error::Result;
use autoinvest::supervisor;

#[derive(Parser)]
#[command(name = "autoinvest", version, about = "Recurring brokerage orders for the IBKR Web API")]
struct Cli {
    /// Path to the configuration document.
    #[arg(long, global = true, default_value = "autoinvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Start the daemon in the background.
    Start,
    /// Stop the daemon (SIGTERM, then SIGKILL after the grace period).
    Stop,
    /// Stop (if running) and start the daemon.
    Restart,
    /// Report daemon liveness, next fire time, and the last run.
    Status,
    /// Print the tail of the newest log file.
    Logs {
        /// Keep following the file as it grows.
        #[arg(long)]
        follow: bool,
        /// Number of trailing lines to print first.
        #[arg(long, default_value_t = 50)]
        lines: usize,
    },
    /// Execute the due orders once, in the foreground.
    Execute,
    /// Run the full service in the foreground (what `start` detaches).
    Run,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        // `run` installs its own rolling-file subscriber.
        CliCommand::Run => {
            let config = Config::load(&cli.config)?;
            supervisor::run(config).await
        }
        CliCommand::Start => {
            let config = Config::load(&cli.config)?;
            supervisor::start(&config, &cli.config)
        }
        CliCommand::Stop => {
            let config = Config::load(&cli.config)?;
            supervisor::stop(&config).await
        }
        CliCommand::Restart => {
            let config = Config::load(&cli.config)?;
            supervisor::restart(&config, &cli.config).await
        }
        CliCommand::Status => {
            let config = Config::load(&cli.config)?;
            supervisor::status(&config).await
        }
        CliCommand::Logs { follow, lines } => {
            let config = Config::load(&cli.config)?;
            supervisor::logs(&config, follow, lines).await
        }
        CliCommand::Execute => {
            init_stdout_logging();
            let config = Config::load(&cli.config)?;
            let report = supervisor::execute_once(&config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.aborted.is_some() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn init_stdout_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
