//! arbor - run AI coding agents in branch-scoped containers

use std::process::ExitCode;

use agent_arbor::cli::{self, Cli, Commands};
use agent_arbor::error::EXIT_FAILURE;
use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let Ok(directives) = std::env::var("ARBOR_DEBUG") else {
        return;
    };
    // A bare `ARBOR_DEBUG=1` turns on debug output for this crate only.
    let filter = match directives.as_str() {
        "" | "1" | "true" => EnvFilter::new("agent_arbor=debug"),
        custom => {
            EnvFilter::try_new(custom).unwrap_or_else(|_| EnvFilter::new("agent_arbor=debug"))
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let repo = cli.repo.as_deref();
    match cli.command {
        Commands::Completion { shell } => {
            generate(shell, &mut Cli::command(), "arbor", &mut std::io::stdout());
            Ok(())
        }
        Commands::Auth(args) => cli::auth::run(args).await,
        Commands::Run(args) => cli::run::run(repo, args).await,
        Commands::Recreate(args) => cli::run::recreate(repo, args).await,
        Commands::Attach(args) => cli::attach::run(repo, args).await,
        Commands::Ps(args) => cli::ps::run(repo, args).await,
        Commands::Logs(args) => cli::logs::run(repo, args).await,
        Commands::Stop(args) => cli::lifecycle::stop(repo, args).await,
        Commands::Kill(args) => cli::lifecycle::kill(repo, args).await,
        Commands::Rm(args) => cli::lifecycle::rm(repo, args).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<agent_arbor::Error>()
                .map(agent_arbor::Error::exit_code)
                .unwrap_or(EXIT_FAILURE);
            ExitCode::from(code as u8)
        }
    }
}
