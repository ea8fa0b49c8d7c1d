//! stockdash - inspect and exercise the StockDash network layer

use clap::Parser;

mod cli;
mod output;

use cli::args::GlobalOptions;
use cli::{Cli, Commands, ConfigCommands, OfflineCommands};
use stockdash_net::Result;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise warnings, or debug with `--debug`
fn init_logging(debug: bool) {
    let default = if debug { "stockdash=debug,stockdash_net=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let opts = GlobalOptions::from_cli(&cli);

    match cli.command {
        Commands::Get(args) => cli::get::run(&opts, &args).await,
        Commands::Offline(cmd) => match cmd {
            OfflineCommands::Status => cli::offline::status(&opts),
            OfflineCommands::List => cli::offline::list(&opts),
            OfflineCommands::Clear => cli::offline::clear(&opts),
        },
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => cli::config::show(&opts),
            ConfigCommands::Path => cli::config::path(&opts),
        },
        Commands::Version => {
            println!("stockdash version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
