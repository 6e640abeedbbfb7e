// tests/common.rs
#![allow(dead_code)] // Not every test binary uses every helper

use ipcsvc::{IpcConfig, IpcService, Recv, ServiceClass, Timeout};
use tempfile::TempDir;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::{Duration, Instant};

static SERVICE_COUNTER: AtomicUsize = AtomicUsize::new(0);

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);

pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Can be overridden by RUST_LOG env variable
    let default_filter = "ipcsvc=debug,warn";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");
  });
}

/// A fresh root directory with a config pointing at it. Keep the `TempDir`
/// alive for as long as the config is used.
pub fn test_config(class: ServiceClass) -> (TempDir, IpcConfig) {
  setup_tracing();
  let dir = tempfile::Builder::new()
    .prefix("ipc")
    .tempdir_in("/tmp")
    .expect("Failed to create temp root");
  let config = IpcConfig::new(dir.path(), class).expect("Failed to create IPC config");
  (dir, config)
}

/// Short service names unique within the test process.
pub fn unique_service_name() -> String {
  let count = SERVICE_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("t{}", count)
}

pub fn start_service(class: ServiceClass) -> (TempDir, IpcConfig, IpcService) {
  let (dir, config) = test_config(class);
  let service = IpcService::start(&config, &unique_service_name()).expect("Failed to start service");
  (dir, config, service)
}

/// Calls `recv` until a delivery arrives or `LONG_TIMEOUT` passes.
pub fn recv_delivery(service: &mut IpcService) -> ipcsvc::Delivery {
  let deadline = Instant::now() + LONG_TIMEOUT;
  loop {
    match service.recv(Timeout::After(Duration::from_millis(200))).expect("recv failed") {
      Recv::Immediate(d) | Recv::Wait(d) => return d,
      Recv::Timeout => assert!(Instant::now() < deadline, "no delivery within {:?}", LONG_TIMEOUT),
    }
  }
}
