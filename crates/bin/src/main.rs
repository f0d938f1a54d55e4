mod cli;
mod commands;
mod output;

use clap::{CommandFactory, Parser};

use cli::{Cli, Commands};
use output::OutputFormat;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve(args)) => commands::serve::run(&args).await,
        Some(Commands::Health(args)) => commands::health::run(&args).await,
        Some(Commands::Info(args)) => {
            let format = if args.json {
                OutputFormat::Json
            } else {
                OutputFormat::Human
            };
            commands::info::run(&args, format)
        }
        Some(Commands::Fingerprint(args)) => commands::fingerprint::run(&args),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}
