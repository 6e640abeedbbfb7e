use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum IpcError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error), // Allows easy conversion from std::io::Error

  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String),

  // --- Timeouts ---
  #[error("Operation timed out")]
  Timeout,

  // --- Environment Errors ---
  #[error("The IPC service environment has been already initialized with root directory at \"{0}\"")]
  AlreadyInitialized(String),
  #[error("Invalid IPC root directory: {0}")]
  InvalidRoot(String),
  #[error("Socket path \"{0}\" exceeds maximum length of unix domain socket path")]
  PathTooLong(String),

  // --- Connection/Binding Errors ---
  #[error("Cannot create socket: {0}")]
  SocketCreate(#[source] io::Error),
  #[error("Cannot connect to service \"{service}\": {source}")]
  ConnectTimedOut {
    service: String,
    #[source]
    source: io::Error,
  },
  #[error("\"{0}\" service is already running")]
  AlreadyRunning(String),
  #[error("The file \"{0}\" is used by another process")]
  InUseByOther(String),
  #[error("Cannot bind socket to \"{path}\": {source}")]
  Bind {
    path: String,
    #[source]
    source: io::Error,
  },
  #[error("Cannot accept incoming IPC connection: {0}")]
  Accept(#[source] io::Error),
  #[error("Permission denied for path: {0}")]
  PermissionDenied(String),
  #[error("Connection closed by peer or transport")]
  ConnectionClosed,

  // --- Message Errors ---
  #[error("Message payload of {0} bytes does not fit the frame size field")]
  MessageTooLarge(usize),

  // --- State Errors ---
  #[error("Unknown IPC client id {0}")]
  UnknownClient(u64),
  #[error("Operation is invalid for the current socket state: {0}")]
  InvalidState(&'static str),

  // --- Request/Response ---
  #[error("IPC exchange with \"{service}\" failed: {kind}")]
  Exchange {
    service: String,
    #[source]
    kind: ExchangeError,
  },
}

/// The phase of [`crate::async_socket::exchange`] that failed.
#[derive(Error, Debug)]
pub enum ExchangeError {
  #[error("cannot connect: {0}")]
  Connect(#[source] Box<IpcError>),
  #[error("cannot send request: {0}")]
  Send(#[source] Box<IpcError>),
  #[error("cannot flush request: {0}")]
  Flush(#[source] Box<IpcError>),
  #[error("cannot receive response: {0}")]
  Receive(#[source] Box<IpcError>),
  #[error("timeout while waiting for response")]
  TimedOut,
}

// Helper function to map common std::io::Error kinds
impl IpcError {
  pub fn from_io_path(e: io::Error, path: &Path) -> Self {
    let path = path.display().to_string();
    match e.kind() {
      io::ErrorKind::AddrInUse => IpcError::Bind { path, source: e },
      io::ErrorKind::PermissionDenied => IpcError::PermissionDenied(path),
      io::ErrorKind::TimedOut => IpcError::Timeout,
      io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
        IpcError::ConnectionClosed
      }
      _ => IpcError::Io(e), // Default fallback
    }
  }

  /// True for errors that mean the peer went away rather than a local failure.
  pub fn is_disconnect(&self) -> bool {
    match self {
      IpcError::ConnectionClosed => true,
      IpcError::Io(e) => matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
      ),
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn io_kinds_map_to_variants() {
    let path = Path::new("/tmp/zabbix_x.sock");
    let e = IpcError::from_io_path(io::Error::from(io::ErrorKind::BrokenPipe), path);
    assert!(matches!(e, IpcError::ConnectionClosed));
    assert!(e.is_disconnect());

    let e = IpcError::from_io_path(io::Error::from(io::ErrorKind::PermissionDenied), path);
    assert!(matches!(e, IpcError::PermissionDenied(ref p) if p == "/tmp/zabbix_x.sock"));

    let e = IpcError::from_io_path(io::Error::from(io::ErrorKind::Other), path);
    assert!(matches!(e, IpcError::Io(_)));
    assert!(!e.is_disconnect());
  }

  #[test]
  fn exchange_error_names_phase() {
    let e = IpcError::Exchange {
      service: "preprocessing".into(),
      kind: ExchangeError::Send(Box::new(IpcError::ConnectionClosed)),
    };
    let text = e.to_string();
    assert!(text.contains("preprocessing"));
    assert!(text.contains("cannot send request"));
  }
}
