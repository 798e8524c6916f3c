mod config;
mod error;
mod faults;
mod producer;

use clap::Parser;
use config::{Cli, Commands};

mod cmd;

use cmd::Outcome;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Tail(args) => cmd::tail::run(&cli.config, args).await,
        Commands::Sweep(args) => cmd::sweep::run(&cli.config, args).await,
        Commands::Produce(args) => cmd::produce::run(&cli.config, args).await,
        Commands::Run => cmd::run::run(&cli.config).await,
    };
    match result {
        Ok(Outcome::Done) => {}
        Ok(Outcome::Partial) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
