// tests/async_socket.rs

mod common;

use common::{recv_delivery, start_service, test_config, unique_service_name, LONG_TIMEOUT};
use ipcsvc::{exchange, AsyncSocketState, ExchangeError, IpcAsyncSocket, IpcError, ServiceClass, Timeout};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const REQUEST: u32 = 10100;
const RESPONSE: u32 = 10101;

/// Runs an echo service on its own thread until `stop` is set.
fn spawn_echo(class: ServiceClass) -> (tempfile::TempDir, ipcsvc::IpcConfig, String, Arc<AtomicBool>, thread::JoinHandle<()>) {
  let (dir, config, mut service) = start_service(class);
  let name = service.name().to_string();
  let stop = Arc::new(AtomicBool::new(false));
  let stop_flag = stop.clone();

  let handle = thread::spawn(move || {
    while !stop_flag.load(Ordering::Relaxed) {
      let delivery = match service.recv(Timeout::After(Duration::from_millis(50))).unwrap().into_delivery() {
        Some(d) => d,
        None => continue,
      };
      if let Some(message) = delivery.message {
        // The client may already be gone; that is fine for an echo.
        let _ = service.send(&delivery.client, RESPONSE, message.data());
      }
    }
  });

  (dir, config, name, stop, handle)
}

#[test]
fn exchange_returns_reply() {
  let (_dir, config, name, stop, echo) = spawn_echo(ServiceClass::Server);

  let reply = exchange(&config, &name, REQUEST, Timeout::After(LONG_TIMEOUT), b"payload").unwrap();
  assert_eq!((reply.code(), reply.data()), (RESPONSE, &b"payload"[..]));

  // A second exchange uses a fresh connection.
  let reply = exchange(&config, &name, REQUEST, Timeout::Forever, b"again").unwrap();
  assert_eq!(reply.data(), b"again");

  stop.store(true, Ordering::Relaxed);
  echo.join().unwrap();
}

#[test]
fn exchange_without_service_fails_to_connect() {
  let (_dir, config) = test_config(ServiceClass::None);
  let err = exchange(&config, &unique_service_name(), REQUEST, Timeout::NoWait, b"").unwrap_err();
  assert!(matches!(
    err,
    IpcError::Exchange {
      kind: ExchangeError::Connect(_),
      ..
    }
  ));
}

#[test]
fn exchange_times_out_when_service_does_not_answer() {
  let (_dir, config, service) = start_service(ServiceClass::None);
  let err = exchange(
    &config,
    service.name(),
    REQUEST,
    Timeout::After(Duration::from_millis(200)),
    b"anyone?",
  )
  .unwrap_err();
  assert!(matches!(
    err,
    IpcError::Exchange {
      kind: ExchangeError::TimedOut,
      ..
    }
  ));
}

#[test]
fn async_socket_recovers_from_timeout() {
  let (_dir, config, mut service) = start_service(ServiceClass::None);
  let mut socket = IpcAsyncSocket::open(&config, service.name(), LONG_TIMEOUT).unwrap();

  socket.send(REQUEST, b"first").unwrap();
  assert!(socket.flush(Timeout::After(LONG_TIMEOUT)).unwrap());
  let client = recv_delivery(&mut service).client;

  assert!(socket.recv(Timeout::After(Duration::from_millis(50))).unwrap().is_none());
  assert_eq!(socket.state(), AsyncSocketState::Timeout);

  service.send(&client, RESPONSE, b"eventually").unwrap();
  let reply = socket.recv(Timeout::After(LONG_TIMEOUT)).unwrap().unwrap();
  assert_eq!(reply.data(), b"eventually");
  assert_eq!(socket.state(), AsyncSocketState::None);
}

#[test]
fn async_socket_reports_service_close() {
  let (_dir, config, mut service) = start_service(ServiceClass::None);
  let mut socket = IpcAsyncSocket::open(&config, service.name(), LONG_TIMEOUT).unwrap();
  socket.send(REQUEST, b"hello").unwrap();
  assert!(socket.flush(Timeout::After(LONG_TIMEOUT)).unwrap());

  let client = recv_delivery(&mut service).client;
  service.close_client(&client).unwrap();

  assert!(matches!(
    socket.recv(Timeout::After(LONG_TIMEOUT)),
    Err(IpcError::ConnectionClosed)
  ));
  assert_eq!(socket.state(), AsyncSocketState::Error);
  assert!(!socket.connected());
}
