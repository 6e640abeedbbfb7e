use clap::{builder::TypedValueParser, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "ipcsvc", version, about = "Local IPC service utility")]
pub struct Cli {
  #[clap(subcommand)]
  pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
  /// Run a service that answers every request with its own payload
  Serve(ServeArgs),
  /// Send one request and print the reply
  Send(SendArgs),
  /// Check whether a service is accepting connections
  Probe(ProbeArgs),
}

/// Where services live and which program class they belong to.
#[derive(clap::Args, Debug)]
pub struct EnvArgs {
  /// Directory holding the service sockets
  #[clap(long, short, default_value = "/tmp")]
  pub root: PathBuf,

  /// Program class, selects the socket name prefix
  #[clap(long, value_parser = clap::builder::PossibleValuesParser::new(["server", "proxy", "agent", "none"]).map(|s| s.to_lowercase()), default_value = "none")]
  pub class: String,

  /// Service name
  #[clap(long, short)]
  pub name: String,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
  #[clap(flatten)]
  pub env: EnvArgs,

  /// Code used for replies; defaults to the request code
  #[clap(long)]
  pub reply_code: Option<u32>,

  /// Exit after answering this many requests
  #[clap(long)]
  pub max_requests: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct SendArgs {
  #[clap(flatten)]
  pub env: EnvArgs,

  /// Message code
  #[clap(long, short)]
  pub code: u32,

  /// Request payload, interpreted according to --payload-format
  #[clap(long, short, default_value = "")]
  pub payload: String,

  /// Format of the --payload argument
  #[clap(long, value_parser = clap::builder::PossibleValuesParser::new(["text", "hex", "base64"]).map(|s| s.to_lowercase()), default_value = "text")]
  pub payload_format: String,

  /// Output format for displaying the reply payload on STDOUT
  #[clap(long, value_parser = clap::builder::PossibleValuesParser::new(["text", "hex", "base64", "dump"]).map(|s| s.to_lowercase()), default_value = "text")]
  pub display_format: String,

  /// Timeout for the whole exchange in milliseconds; 0 waits forever
  #[clap(long, short, default_value_t = 5000)]
  pub timeout_ms: u64,
}

#[derive(Parser, Debug)]
pub struct ProbeArgs {
  #[clap(flatten)]
  pub env: EnvArgs,
}
