mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
  let cli_args = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  match cli_args.command {
    Commands::Serve(serve_args) => commands::serve::run_echo_service(serve_args),
    Commands::Send(send_args) => commands::send::send_request(send_args),
    Commands::Probe(probe_args) => {
      if !commands::probe::probe_service(probe_args)? {
        std::process::exit(1);
      }
      Ok(())
    }
  }
}
