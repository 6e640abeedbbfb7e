//! Unix domain socket transport: path resolution, the blocking client socket and
//! the nonblocking framed connection shared by the service and async socket.

pub mod endpoint;
pub mod socket;
pub(crate) mod connection;

pub use endpoint::sun_path_capacity;
pub use socket::{IpcSocket, CONNECT_RETRY_INTERVAL, RX_BUFFER_SIZE};
