pub mod probe;
pub mod send;
pub mod serve;

use crate::cli::EnvArgs;

use anyhow::{Context as AnyhowContext, Result};
use ipcsvc::{IpcConfig, ServiceClass};

fn parse_class(class: &str) -> ServiceClass {
  match class {
    "server" => ServiceClass::Server,
    "proxy" => ServiceClass::Proxy,
    "agent" => ServiceClass::Agent,
    _ => ServiceClass::None,
  }
}

/// Validates the root directory given on the command line.
pub(crate) fn load_config(env: &EnvArgs) -> Result<IpcConfig> {
  IpcConfig::new(&env.root, parse_class(&env.class))
    .with_context(|| format!("Invalid IPC root directory: {:?}", env.root))
}
