// src/transport/endpoint.rs

use crate::context::IpcConfig;
use crate::error::IpcError;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

const SOCKET_PREFIX: &str = "zabbix_";
const SOCKET_SUFFIX: &str = ".sock";

/// Capacity of `sockaddr_un.sun_path` on this platform, terminating NUL included.
pub fn sun_path_capacity() -> usize {
  // SAFETY: sockaddr_un is plain old data; an all-zero value is valid.
  let addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
  addr.sun_path.len()
}

/// Builds `<root>/zabbix_<class-prefix><service_name>.sock`.
pub(crate) fn socket_path(config: &IpcConfig, service_name: &str) -> Result<PathBuf, IpcError> {
  if service_name.is_empty() || service_name.contains('/') || service_name.contains('\0') {
    return Err(IpcError::InvalidArgument(format!(
      "invalid IPC service name \"{}\"",
      service_name
    )));
  }

  let file_name = format!(
    "{}{}{}{}",
    SOCKET_PREFIX,
    config.class().prefix(),
    service_name,
    SOCKET_SUFFIX
  );
  let path = config.root().join(file_name);

  // +1 for the terminating NUL the kernel expects inside sun_path.
  if path.as_os_str().as_bytes().len() + 1 > sun_path_capacity() {
    tracing::debug!(path = ?path, "IPC socket path too long");
    return Err(IpcError::PathTooLong(path.display().to_string()));
  }
  Ok(path)
}
