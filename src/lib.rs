//! ipcsvc - Local inter-process messaging over Unix domain sockets.
//!
//! A process hosts named services ([`IpcService`]); other processes on the
//! same host connect to them with a blocking [`IpcSocket`] or a timeout-driven
//! [`IpcAsyncSocket`] and exchange framed messages (a `u32` code plus an opaque
//! payload).

pub mod async_socket;
pub mod context;
pub mod error;
pub mod message;
pub mod protocol;
pub mod service;
pub mod transport;

// Re-export core types for user convenience
pub use async_socket::{exchange, AsyncSocketState, IpcAsyncSocket};
pub use context::{env, init_env, IpcConfig, ServiceClass};
pub use error::{ExchangeError, IpcError};
pub use message::{Message, RTC_CODE_LIMIT};
pub use service::{ClientHandle, ClientId, Delivery, IpcService, Recv, ServiceAlerter, Timeout};
pub use transport::IpcSocket;

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}
