use anyhow::Result;
use candle_svae::cli::{simulate, train, Cli, Commands};
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.command.verbose() && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.command {
        Commands::Train(args) => {
            train::run(args)?;
        }
        Commands::Simulate(args) => {
            simulate::run(args)?;
        }
    }

    Ok(())
}
