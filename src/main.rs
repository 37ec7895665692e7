//! lantern - a language server that runs requests on a pool of worker processes

mod bridge;
mod cli;
mod config;
mod error;
mod executor;
mod extensions;
mod features;
mod logging;
mod paths;
mod protocol;
mod queue;
mod server;
mod store;
pub mod version;
mod worker;

use anyhow::{Result, bail};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    if let Some(Commands::Completions(args)) = &cli.command {
        args.generate();
        return;
    }

    logging::init(config::log_config(&cli));

    match run(&cli) {
        Ok(status) => std::process::exit(status),
        Err(e) => {
            eprintln!(
                "{}: {}",
                "error"
                    .if_supports_color(Stderr, |text| text.red())
                    .if_supports_color(Stderr, |text| text.bold()),
                e
            );
            for cause in e.chain().skip(1) {
                eprintln!(
                    "  {}: {}",
                    "caused by".if_supports_color(Stderr, |text| text.yellow()),
                    cause
                );
            }
            std::process::exit(1);
        }
    }
}

/// Run as the language server, or as a worker when started with `--internal-worker`.
fn run(cli: &Cli) -> Result<i32> {
    if cli.internal_worker {
        let Some(args) = config::worker_args(cli) else {
            bail!("--internal-worker requires --bridge <PATH>");
        };
        worker::run_worker_main(args);
    }

    let config = config::ServerConfig::from_cli(cli);
    Ok(server::run_server(config))
}
