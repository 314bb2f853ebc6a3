use anyhow::Result;
use bayes_layers::cli::{fit, profile, Cli, Commands};
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Fit(args) => {
            fit::run(args)?;
        }
        Commands::Profile(args) => {
            profile::run(args)?;
        }
    }

    Ok(())
}
