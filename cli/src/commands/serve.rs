use crate::cli::ServeArgs;

use anyhow::{Context as AnyhowContext, Result};
use ipcsvc::{IpcService, Recv, Timeout};
use std::time::{Duration, Instant};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn has_unsent(service: &mut IpcService) -> bool {
  for id in service.clients() {
    if let Some(client) = service.client_by_id(id) {
      if service.client_unsent(&client) > 0 {
        return true;
      }
    }
  }
  false
}

/// Runs an echo service until `max_requests` have been answered, if given.
pub fn run_echo_service(args: ServeArgs) -> Result<()> {
  let config = super::load_config(&args.env)?;
  let mut service = IpcService::start(&config, &args.env.name)
    .with_context(|| format!("Cannot start service '{}'", args.env.name))?;
  println!("Service '{}' listening at {}", service.name(), service.path().display());

  let mut answered: u64 = 0;
  while args.max_requests.map_or(true, |max| answered < max) {
    let delivery = match service.recv(Timeout::Forever)? {
      Recv::Immediate(d) | Recv::Wait(d) => d,
      Recv::Timeout => continue,
    };

    let Some(request) = delivery.message else {
      tracing::info!(client_id = %delivery.client.id(), "Client disconnected");
      continue;
    };
    tracing::info!(client_id = %delivery.client.id(), request = %request.dump(), "Request received");

    let code = args.reply_code.unwrap_or(request.code());
    if let Err(e) = service.send(&delivery.client, code, request.data()) {
      tracing::warn!(client_id = %delivery.client.id(), error = %e, "Cannot send reply");
    }
    answered += 1;
  }

  // Let buffered replies drain before the sockets go away.
  let deadline = Instant::now() + DRAIN_TIMEOUT;
  while has_unsent(&mut service) && Instant::now() < deadline {
    service.recv(Timeout::After(Duration::from_millis(50)))?;
  }

  service.close();
  Ok(())
}
