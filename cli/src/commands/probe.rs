use crate::cli::ProbeArgs;

use anyhow::Result;
use ipcsvc::IpcSocket;
use std::time::Duration;

/// Returns whether the service accepted a connection.
pub fn probe_service(args: ProbeArgs) -> Result<bool> {
  let config = super::load_config(&args.env)?;
  let path = config.socket_path(&args.env.name)?;

  match IpcSocket::open(&config, &args.env.name, Duration::ZERO) {
    Ok(mut socket) => {
      socket.close();
      println!("Service '{}' is running at {}", args.env.name, path.display());
      Ok(true)
    }
    Err(e) => {
      println!("Service '{}' is not running: {}", args.env.name, e);
      Ok(false)
    }
  }
}
